use bubble_runtime::ContainerRuntime;

pub async fn pause(name: &str) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    super::find_container(&ctx.runtime, name).await?;
    ctx.runtime.freeze(name).await?;
    println!("Bubble '{name}' paused.");
    Ok(())
}
