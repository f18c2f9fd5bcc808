use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{account::random_code, AccountId, Amount};

/// Opaque task token handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskToken(String);

impl TaskToken {
    /// Generate a random token.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(random_code(rng))
    }

    /// Get the token as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Issued, not yet rewarded.
    Pending,
    /// Rewarded.
    Completed,
}

/// A unit of reward-earning work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Owning account.
    pub account: AccountId,
    /// Task token.
    pub token: TaskToken,
    /// Reward amount fixed at issuance.
    pub amount: Amount,
    /// Status.
    pub status: TaskStatus,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Completion time.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl Task {
    /// Issue a new pending task.
    pub fn issue(
        account: AccountId,
        token: TaskToken,
        amount: Amount,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            account,
            token,
            amount,
            status: TaskStatus::Pending,
            created_at,
            completed_at: None,
        }
    }

    /// Transition `pending -> completed`.
    pub fn complete(&mut self, now: OffsetDateTime) -> crate::Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(crate::Error::TaskNotPending);
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }
}
