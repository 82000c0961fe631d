use anyhow::bail;
use bubble_remote::cloud::{
    cloud_init_script, ensure_ssh_key_files, update_known_hosts, CloudState,
};
use bubble_remote::{cloud_remote_host, HetznerClient};

pub async fn cloud_provision(
    server_type: Option<&str>,
    location: Option<&str>,
) -> anyhow::Result<()> {
    let ctx = super::context().await?;

    if CloudState::load(&ctx.data_dir).is_some() {
        bail!("A cloud server already exists. Destroy it first: bubble cloud destroy");
    }

    let mut cloud_config = ctx.config.cloud.clone();
    if let Some(server_type) = server_type {
        cloud_config.server_type = server_type.to_owned();
    }
    if let Some(location) = location {
        cloud_config.location = location.to_owned();
    }
    if cloud_config.server_type.is_empty() {
        cloud_config.server_type = "cx43".to_owned();
    }

    let client = HetznerClient::from_env()?;
    let public_key = ensure_ssh_key_files(&ctx.data_dir).await?;
    let ssh_key_id = client.ensure_ssh_key("bubble-cloud", &public_key).await?;

    println!(
        "Creating {} server '{}' in {}...",
        cloud_config.server_type, cloud_config.server_name, cloud_config.location
    );
    let user_data = cloud_init_script(cloud_config.idle_timeout);
    let server = client
        .create_server(
            &cloud_config,
            &cloud_config.server_type,
            ssh_key_id,
            &user_data,
        )
        .await?;

    let server = client.wait_for_status(server.id, "running").await?;
    let ipv4 = server.ipv4.clone().unwrap_or_default();

    CloudState {
        provider: cloud_config.provider.clone(),
        server_id: server.id,
        server_name: cloud_config.server_name.clone(),
        ipv4: ipv4.clone(),
        server_type: cloud_config.server_type.clone(),
        location: cloud_config.location.clone(),
        ssh_key_id,
    }
    .save(&ctx.data_dir)?;

    if !ipv4.is_empty() {
        update_known_hosts(&ctx.data_dir, &ipv4).await;
    }

    println!("Cloud server '{}' is up at {ipv4}.", cloud_config.server_name);
    println!("  Cloud-init is installing Incus; the first open may take a few minutes.");
    println!("  Idle auto-shutdown: {}s.", cloud_config.idle_timeout);
    Ok(())
}

pub async fn cloud_destroy(force: bool) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let Some(state) = CloudState::load(&ctx.data_dir) else {
        println!("No cloud server provisioned.");
        return Ok(());
    };

    if !force
        && !super::confirm(&format!(
            "Permanently destroy cloud server '{}' ({})?",
            state.server_name, state.ipv4
        ))?
    {
        bail!("Aborted.");
    }

    let client = HetznerClient::from_env()?;
    match client.delete_server(state.server_id).await {
        Ok(()) => println!("Server deleted."),
        Err(e) => println!("  Skipped server deletion ({e})"),
    }
    CloudState::clear(&ctx.data_dir);
    println!("Cloud state cleared.");
    Ok(())
}

pub async fn cloud_stop() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let Some(state) = CloudState::load(&ctx.data_dir) else {
        bail!("No cloud server provisioned. Run: bubble cloud provision");
    };
    let client = HetznerClient::from_env()?;
    client.power_off(state.server_id).await?;
    println!("Cloud server '{}' powering off.", state.server_name);
    Ok(())
}

pub async fn cloud_start() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let Some(state) = CloudState::load(&ctx.data_dir) else {
        bail!("No cloud server provisioned. Run: bubble cloud provision");
    };
    let client = HetznerClient::from_env()?;
    client.power_on(state.server_id).await?;
    let server = client.wait_for_status(state.server_id, "running").await?;
    if let Some(ip) = &server.ipv4 {
        update_known_hosts(&ctx.data_dir, ip).await;
        if *ip != state.ipv4 {
            let mut state = state;
            state.ipv4 = ip.clone();
            state.save(&ctx.data_dir)?;
        }
        println!("Cloud server running at {ip}.");
    } else {
        println!("Cloud server running.");
    }
    Ok(())
}

pub async fn cloud_status() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let Some(state) = CloudState::load(&ctx.data_dir) else {
        println!("No cloud server provisioned.");
        return Ok(());
    };

    println!("Cloud server: {} ({})", state.server_name, state.server_type);
    println!("  Location: {}", state.location);
    match HetznerClient::from_env() {
        Ok(client) => match client.get_server(state.server_id).await {
            Ok(server) => {
                println!("  Status: {}", server.status);
                println!("  IPv4: {}", server.ipv4.as_deref().unwrap_or("-"));
            }
            Err(e) => println!("  Status: unknown ({e})"),
        },
        Err(_) => println!("  Status: unknown (HETZNER_TOKEN not set)"),
    }
    println!(
        "  Default routing: {}",
        if ctx.config.cloud.default { "on" } else { "off" }
    );
    Ok(())
}

pub async fn cloud_ssh() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let host = cloud_remote_host(&ctx.data_dir).await?;
    let argv = host.ssh_cmd(&[]);
    let status = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .await?;
    if !status.success() {
        bail!("ssh exited with {status}");
    }
    Ok(())
}

pub async fn cloud_default(state: Option<&str>) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    match state {
        None => {
            let current = if ctx.config.cloud.default { "on" } else { "off" };
            println!("Cloud default routing: {current}");
        }
        Some("on") => {
            let mut config = ctx.config;
            config.cloud.default = true;
            config.save(&ctx.data_dir)?;
            println!("New bubbles default to the cloud server.");
        }
        Some("off") => {
            let mut config = ctx.config;
            config.cloud.default = false;
            config.save(&ctx.data_dir)?;
            println!("New bubbles default to the local runtime.");
        }
        Some(other) => bail!("expected 'on' or 'off', got {other:?}"),
    }
    Ok(())
}
