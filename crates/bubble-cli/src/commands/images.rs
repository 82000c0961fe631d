use anyhow::bail;
use bubble_build::{build_image, build_lean_toolchain_image, image_names};
use bubble_runtime::ContainerRuntime;

pub async fn images_list() -> anyhow::Result<()> {
    let ctx = super::context().await?;
    let images = ctx.runtime.list_images().await?;

    if images.is_empty() {
        println!("No images. Run: bubble images build base");
        return Ok(());
    }

    println!("{:<25} {:<12} {:<20}", "ALIAS", "SIZE", "CREATED");
    println!("{}", "-".repeat(57));
    for image in images {
        let aliases = image.aliases.join(", ");
        let size_mb = image.size as f64 / (1024.0 * 1024.0);
        let created = image
            .created_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{aliases:<25} {size_mb:>8.1} MB  {created:<20}");
    }
    Ok(())
}

pub async fn images_build(name: &str) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    build_image(&ctx.runtime, &ctx.data_dir, name).await?;
    Ok(())
}

/// Target of the detached background builds scheduled by the provision
/// pipeline; also usable directly.
pub async fn images_build_toolchain(version: &str) -> anyhow::Result<()> {
    let ctx = super::context().await?;
    build_lean_toolchain_image(&ctx.runtime, &ctx.data_dir, version).await?;
    Ok(())
}

pub async fn images_delete(name: Option<&str>, all: bool) -> anyhow::Result<()> {
    let ctx = super::context().await?;

    if all {
        let images = ctx.runtime.list_images().await?;
        let mut deleted = 0;
        for image in images {
            // Only bubble-built aliases; remote base images stay.
            for alias in image.aliases.iter().filter(|a| {
                a.as_str() == "base" || a.as_str() == "lean" || a.starts_with("lean-")
            }) {
                ctx.runtime.image_delete(alias).await?;
                println!("Deleted image '{alias}'.");
                deleted += 1;
            }
        }
        if deleted == 0 {
            println!("No bubble images to delete.");
        }
        return Ok(());
    }

    let Some(name) = name else {
        bail!(
            "specify an image name or --all. Known images: {}",
            image_names().join(", ")
        );
    };
    ctx.runtime.image_delete(name).await?;
    println!("Deleted image '{name}'.");
    Ok(())
}
