use bubble_git::GitStore;

pub async fn git_update() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let store = GitStore::new(ctx.data_dir.git_dir());
    let updated = store.update_all_repos().await?;
    println!("Git store updated ({updated} repo(s)).");
    Ok(())
}
