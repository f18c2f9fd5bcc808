//! Command-line interface and HTTP service of the watch-to-earn ledger.

/// Configuration.
pub mod config;

/// Identity verification oracle.
pub mod identity;

/// Channel-membership oracle.
pub mod membership;

/// HTTP API.
pub mod api;

/// Commands.
pub mod commands;

use std::path::PathBuf;

use clap::Parser;
use commands::{Command, Commands, Context};
use config::Config;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

const ENV_PREFIX: &str = "W2E_";
const CONFIG_DIR: &str = "w2e";

/// We use `__` in the name of environment variable as an alias of `.`.
///
/// See [`Env`] for more infomation.
const DOT_ALIAS: &str = "__";

/// Command-line interface of the reward ledger.
#[derive(Debug)]
pub struct Cli {
    config_path: PathBuf,
    config: Config,
    command: Commands,
}

impl Cli {
    /// Creates from the command line arguments.
    ///
    /// Config values are layered: defaults, then the config file, then
    /// `W2E_`-prefixed environment variables.
    pub fn init() -> eyre::Result<Self> {
        let Args {
            config_path,
            command,
        } = Args::parse();
        let config_path = find_config(config_path)?;
        let config = load_config(&config_path)?;
        Ok(Self {
            config_path,
            config,
            command,
        })
    }

    /// Execute command.
    pub async fn execute(&self) -> eyre::Result<()> {
        self.command
            .execute(Context::new(&self.config_path, &self.config))
            .await
    }
}

/// Command-line interface of the reward ledger.
#[derive(Debug, Parser)]
#[command(name = "w2e", version)]
struct Args {
    /// Path to the config file.
    #[arg(long = "config", short, env = "W2E_CONFIG")]
    config_path: Option<PathBuf>,
    /// Commands.
    #[command(subcommand)]
    command: Commands,
}

fn find_config(path: Option<PathBuf>) -> eyre::Result<PathBuf> {
    use etcetera::{choose_base_strategy, BaseStrategy};

    match path {
        Some(path) => Ok(path),
        None => {
            let strategy = choose_base_strategy()?;
            Ok(strategy.config_dir().join(CONFIG_DIR).join("config.toml"))
        }
    }
}

/// Load the layered config. A missing file is not an error.
pub fn load_config(path: &std::path::Path) -> eyre::Result<Config> {
    let config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split(DOT_ALIAS))
        .extract()?;
    Ok(config)
}
