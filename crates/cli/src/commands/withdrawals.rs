use w2e_model::WithdrawalId;

use super::{print_json, Command, Context};

/// Withdrawal commands.
#[derive(Debug, clap::Args)]
pub struct Withdrawals {
    #[command(subcommand)]
    command: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// List pending withdrawals, newest first.
    Pending {
        /// Maximum number of rows.
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Mark a pending withdrawal as processed.
    MarkProcessed {
        /// Withdrawal id.
        id: u64,
        /// Settlement reference, e.g. the payout transaction hash.
        settlement_ref: String,
    },
}

impl Command for Withdrawals {
    async fn execute(&self, ctx: Context<'_>) -> eyre::Result<()> {
        let engine = ctx.operator_engine()?;
        match &self.command {
            Subcommand::Pending { limit } => {
                let pending = engine.pending_withdrawals(*limit)?;
                print_json(&pending)?;
            }
            Subcommand::MarkProcessed { id, settlement_ref } => {
                let request = engine.mark_processed(WithdrawalId(*id), settlement_ref)?;
                print_json(&request)?;
            }
        }
        Ok(())
    }
}
