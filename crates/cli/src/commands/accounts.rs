use w2e_model::ExternalId;

use super::{print_json, Command, Context};

/// Account commands.
#[derive(Debug, clap::Args)]
pub struct Accounts {
    #[command(subcommand)]
    command: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Show an account.
    Show {
        /// External user id.
        external_id: i64,
    },
    /// Check the balance of an account against its transaction log.
    Reconcile {
        /// External user id.
        external_id: i64,
    },
    /// List the transactions of an account.
    Transactions {
        /// External user id.
        external_id: i64,
    },
}

impl Command for Accounts {
    async fn execute(&self, ctx: Context<'_>) -> eyre::Result<()> {
        let engine = ctx.operator_engine()?;
        match &self.command {
            Subcommand::Show { external_id } => {
                let account = engine.account_by_external_id(ExternalId(*external_id))?;
                print_json(&account)?;
            }
            Subcommand::Reconcile { external_id } => {
                let account = engine.account_by_external_id(ExternalId(*external_id))?;
                let reconciliation = engine.reconcile(account.id)?;
                print_json(&reconciliation)?;
                if !reconciliation.is_consistent() {
                    eyre::bail!("balance does not match the transaction log");
                }
            }
            Subcommand::Transactions { external_id } => {
                let account = engine.account_by_external_id(ExternalId(*external_id))?;
                print_json(&engine.transactions(account.id)?)?;
            }
        }
        Ok(())
    }
}
