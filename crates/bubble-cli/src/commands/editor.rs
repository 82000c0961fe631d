use crate::attach::EditorChoice;

pub async fn editor(choice: Option<&str>) -> anyhow::Result<()> {
    let ctx = super::context().await?;

    match choice {
        None => {
            println!("Default editor: {}", ctx.config.editor);
            println!("Options: vscode, shell, emacs, neovim");
        }
        Some(choice) => {
            let parsed = EditorChoice::parse(choice)?;
            let mut config = ctx.config;
            config.editor = parsed.as_str().to_owned();
            config.save(&ctx.data_dir)?;
            println!("Default editor set to {parsed}.");
        }
    }
    Ok(())
}
