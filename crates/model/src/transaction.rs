use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{AccountId, Amount};

/// Transaction id assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Category tag of a balance mutation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::EnumString,
    strum::Display,
    strum::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Client-completed task.
    TaskCredit,
    /// Daily check-in.
    Checkin,
    /// Bonus paid to an inviting account.
    ReferralBonus,
    /// Channel follow reward.
    FollowReward,
    /// Debit for a withdrawal request.
    WithdrawalDebit,
    /// Ad-network postback payout.
    ExternalPostback,
}

impl Category {
    /// Whether this category is a credit.
    pub fn is_credit(&self) -> bool {
        !matches!(self, Self::WithdrawalDebit)
    }

    /// Whether a credit of this category may trigger the referral cascade.
    ///
    /// Referral bonuses never cascade further.
    pub fn is_reward(&self) -> bool {
        matches!(
            self,
            Self::TaskCredit | Self::Checkin | Self::FollowReward | Self::ExternalPostback
        )
    }
}

/// An entry of the append-only transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub id: TransactionId,
    /// Owning account.
    pub account: AccountId,
    /// Signed amount, positive for credits.
    pub amount: Amount,
    /// Category.
    pub category: Category,
    /// Structured metadata.
    pub metadata: Value,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A transaction to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// Owning account.
    pub account: AccountId,
    /// Signed amount.
    pub amount: Amount,
    /// Category.
    pub category: Category,
    /// Structured metadata.
    pub metadata: Value,
}

impl NewTransaction {
    /// Assign id and timestamp.
    pub fn into_transaction(self, id: TransactionId, created_at: OffsetDateTime) -> Transaction {
        Transaction {
            id,
            account: self.account,
            amount: self.amount,
            category: self.category,
            metadata: self.metadata,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn category_tags_round_trip() {
        for category in Category::iter() {
            let tag = category.to_string();
            assert_eq!(Category::from_str(&tag).unwrap(), category);
        }
        assert_eq!(Category::ExternalPostback.to_string(), "external_postback");
    }

    #[test]
    fn referral_bonus_does_not_cascade() {
        assert!(!Category::ReferralBonus.is_reward());
        assert!(!Category::WithdrawalDebit.is_reward());
        assert!(!Category::WithdrawalDebit.is_credit());
        assert!(Category::Checkin.is_reward());
    }
}
