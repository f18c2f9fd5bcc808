use tokio::{fs, io::AsyncWriteExt};

use crate::config::Config;

use super::{Command, Context};

const HEADER: &str = r#"# Configuration of the w2e reward service.
#
# Any key can be overridden with a `W2E_`-prefixed environment variable,
# using `__` for nesting, e.g. `W2E_REWARDS__TASK=0.02`.
#
# Optional keys:
# base_url = "https://w2e.example"  # the mini app is served under it
# database = "w2e.sqlite"  # in-memory store if unset
# admin_token = "change-me"  # admin routes are disabled if unset

"#;

const CHANNEL_HINT: &str = r#"# id = -1001234567890  # preferred over the username
# username = "w2e_news"
"#;

/// Write a commented config file holding the defaults.
#[derive(Debug, clap::Args)]
pub struct InitConfig {
    /// Replace if the config file already exists.
    #[arg(long, short)]
    force: bool,
}

/// Content of a fresh config file.
fn template() -> eyre::Result<String> {
    let body = toml::to_string_pretty(&Config::default())?;
    let body = body.replacen("[channel]\n", &format!("[channel]\n{CHANNEL_HINT}"), 1);
    Ok(format!("{HEADER}{body}"))
}

impl Command for InitConfig {
    async fn execute(&self, ctx: Context<'_>) -> eyre::Result<()> {
        let path = ctx.config_path();
        if fs::try_exists(path).await? && !self.force {
            eyre::bail!("Config file already exists. Use `--force` to overwrite it.");
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = template()?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        tracing::info!(path = %path.display(), "config written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use w2e_model::RewardPolicy;

    use super::*;

    #[test]
    fn template_holds_the_defaults() -> eyre::Result<()> {
        let content = template()?;
        assert!(content.contains("W2E_"));

        let config: Config = toml::from_str(&content)?;
        assert_eq!(config.rewards.to_policy()?, RewardPolicy::default());
        assert_eq!(config.listen, Config::default().listen);
        assert!(config.base_url.is_none());
        assert!(config.channel.chat_id().is_none());
        Ok(())
    }

    #[test]
    fn optional_keys_can_be_uncommented() -> eyre::Result<()> {
        let content = template()?
            .lines()
            .map(|line| match line.strip_prefix("# ") {
                Some(setting) if setting.contains(" = ") => setting,
                _ => line,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let config: Config = toml::from_str(&content)?;
        assert_eq!(
            config.webapp_url()?.map(String::from).as_deref(),
            Some("https://w2e.example/webapp/mini/index.html")
        );
        assert_eq!(
            config.database.as_deref(),
            Some(std::path::Path::new("w2e.sqlite"))
        );
        assert_eq!(config.admin_token.as_deref(), Some("change-me"));
        assert_eq!(config.channel.chat_id().as_deref(), Some("-1001234567890"));
        Ok(())
    }
}
