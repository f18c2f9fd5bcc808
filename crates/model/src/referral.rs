use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AccountId, Amount, ReferralCode};

/// A paid referral bonus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    /// Record id.
    pub id: u64,
    /// Referral code of the inviting account.
    pub referrer_code: ReferralCode,
    /// The referred account whose reward triggered the bonus.
    pub invitee: AccountId,
    /// Bonus amount.
    pub bonus: Amount,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A referral record to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReferral {
    /// Referral code of the inviting account.
    pub referrer_code: ReferralCode,
    /// Referred account.
    pub invitee: AccountId,
    /// Bonus amount.
    pub bonus: Amount,
}

impl NewReferral {
    /// Assign id and timestamp.
    pub fn into_referral(self, id: u64, created_at: OffsetDateTime) -> Referral {
        Referral {
            id,
            referrer_code: self.referrer_code,
            invitee: self.invitee,
            bonus: self.bonus,
            created_at,
        }
    }
}

/// Referral statistics of an inviting account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralSummary {
    /// Referral code.
    pub code: ReferralCode,
    /// Number of bonus payments.
    pub count: u64,
    /// Sum of bonus payments.
    pub total_bonus: Amount,
}

impl ReferralSummary {
    /// Summarize the given records.
    pub fn from_records<'a>(
        code: ReferralCode,
        records: impl IntoIterator<Item = &'a Referral>,
    ) -> Self {
        let (count, total_bonus) = records
            .into_iter()
            .filter(|r| r.referrer_code == code)
            .fold((0, Amount::ZERO), |(count, total), r| {
                (count + 1, total + r.bonus)
            });
        Self {
            code,
            count,
            total_bonus,
        }
    }
}
