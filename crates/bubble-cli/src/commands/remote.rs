use bubble_remote::{remote_command, RemoteHost};

pub async fn remote_set_default(host: &str) -> anyhow::Result<()> {
    let parsed = RemoteHost::parse(host)?;
    let ctx = super::context().await?;
    let mut config = ctx.config;
    config.remote.default_host = parsed.spec_string();
    config.save(&ctx.data_dir)?;
    println!("Default remote host set to {}.", parsed.spec_string());
    Ok(())
}

pub async fn remote_clear_default() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let mut config = ctx.config;
    config.remote.default_host = String::new();
    config.save(&ctx.data_dir)?;
    println!("Default remote host cleared.");
    Ok(())
}

pub async fn remote_status() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let spec = &ctx.config.remote.default_host;
    if spec.is_empty() {
        println!("No default remote host. Set one with: bubble remote set-default HOST");
        return Ok(());
    }

    let host = RemoteHost::parse(spec)?;
    println!("Default remote host: {spec}");
    match remote_command(&host, &["list".to_owned(), "--json".to_owned()]).await {
        Ok(output) => {
            let count = serde_json::from_str::<serde_json::Value>(&output)
                .ok()
                .and_then(|v| v.as_array().map(Vec::len));
            match count {
                Some(n) => println!("  Reachable; {n} bubble(s)."),
                None => println!("  Reachable."),
            }
        }
        Err(e) => println!("  Unreachable: {e}"),
    }
    Ok(())
}
