#![deny(missing_docs)]
#![deny(unreachable_pub)]

//! Domain model of the reward ledger.
//!
//! The model is storage-agnostic: every mutation is expressed against the
//! [`LedgerMut`] unit-of-work trait, and the store that implements it is
//! responsible for committing all writes of one unit atomically.

/// Accounts.
pub mod account;

/// Transaction log entries.
pub mod transaction;

/// Reward-earning tasks.
pub mod task;

/// Referral records.
pub mod referral;

/// Check-in streak tracking.
pub mod checkin;

/// Withdrawal requests.
pub mod withdrawal;

/// Idempotency keys.
pub mod idempotency;

/// Reward policy.
pub mod policy;

/// Unit-of-work traits.
pub mod ledger;

/// Ledger actions.
pub mod action;

/// Clock.
pub mod clock;

/// Error type.
pub mod error;

/// Utils for testing.
#[cfg(any(test, feature = "test"))]
pub mod test;

pub use account::{Account, AccountId, ExternalId, Profile, ReferralCode};
pub use action::LedgerAction;
pub use checkin::{CheckinSchedule, CheckinState};
pub use clock::{Clock, SystemClock};
pub use error::{Error, ErrorKind};
pub use idempotency::{Endpoint, IdempotencyKey, IdempotencyRecord};
pub use ledger::{Ledger, LedgerMut, LedgerMutExt};
pub use policy::{CascadeMode, ReferralPolicy, RewardPolicy};
pub use referral::{NewReferral, Referral, ReferralSummary};
pub use task::{Task, TaskStatus, TaskToken};
pub use transaction::{Category, NewTransaction, Transaction, TransactionId};
pub use withdrawal::{Network, NewWithdrawal, WithdrawalId, WithdrawalRequest, WithdrawalStatus};

/// Amount type used by the ledger.
pub type Amount = rust_decimal::Decimal;

/// Alias for result.
pub type Result<T> = std::result::Result<T, Error>;
