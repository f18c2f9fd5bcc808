use std::{path::Path, sync::Arc};

use accounts::Accounts;
use enum_dispatch::enum_dispatch;
use init_config::InitConfig;
use serve::Serve;
use w2e_ledger::{Engine, MemoryStore, SharedSecret, SqliteStore, Store};
use w2e_model::Clock;
use withdrawals::Withdrawals;

use crate::config::Config;

mod accounts;
mod init_config;
mod serve;
mod withdrawals;

/// Commands.
#[enum_dispatch]
#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Initialize config file.
    InitConfig(InitConfig),
    /// Run the HTTP service.
    Serve(Serve),
    /// Operate on withdrawal requests.
    Withdrawals(Withdrawals),
    /// Inspect accounts.
    Accounts(Accounts),
}

#[enum_dispatch(Commands)]
pub(crate) trait Command {
    async fn execute(&self, ctx: Context<'_>) -> eyre::Result<()>;
}

/// Execution context of a command.
pub struct Context<'a> {
    config_path: &'a Path,
    config: &'a Config,
}

impl<'a> Context<'a> {
    pub(crate) fn new(config_path: &'a Path, config: &'a Config) -> Self {
        Self {
            config_path,
            config,
        }
    }

    pub(crate) fn config_path(&self) -> &Path {
        self.config_path
    }

    pub(crate) fn config(&self) -> &Config {
        self.config
    }

    fn store(&self) -> eyre::Result<Arc<dyn Store>> {
        match &self.config.database {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening database");
                Ok(Arc::new(SqliteStore::open(path)?))
            }
            None => {
                tracing::warn!("no database configured, state is kept in memory");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    /// Build the engine from the config.
    pub(crate) fn engine(&self, clock: Arc<dyn Clock>) -> eyre::Result<Engine> {
        Ok(Engine::builder()
            .store(self.store()?)
            .policy(self.config.rewards.to_policy()?)
            .clock(clock)
            .postback_secret(SharedSecret::new(self.config.postback.token.clone()))
            .build())
    }

    /// Build the engine for an operator command, which needs a persistent
    /// database.
    pub(crate) fn operator_engine(&self) -> eyre::Result<Engine> {
        if self.config.database.is_none() {
            eyre::bail!("`database` is not configured, nothing to operate on");
        }
        self.engine(Arc::new(w2e_model::SystemClock))
    }
}

fn print_json(value: &impl serde::Serialize) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
