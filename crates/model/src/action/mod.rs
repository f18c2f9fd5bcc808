/// Reward credits.
pub mod reward;

/// Daily check-in.
pub mod checkin;

/// Task completion.
pub mod task;

/// Withdrawal requests and settlement.
pub mod withdrawal;

/// Ledger Action.
#[must_use = "actions do nothing unless you `execute` them"]
pub trait LedgerAction {
    /// The type of the execution report of the action.
    type Report;

    /// Execute.
    fn execute(self) -> crate::Result<Self::Report>;
}
