use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{checkin::CheckinSchedule, Amount, Category};

/// Decimal places of referral bonuses.
pub const BONUS_DECIMALS: u32 = 6;

/// Compute `round(base * pct / 100, 6)`.
///
/// Returns `None` when nothing should be paid.
pub fn referral_bonus(base: &Amount, pct: &Amount) -> Option<Amount> {
    let bonus = base
        .checked_mul(*pct)?
        .checked_div(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(BONUS_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    (bonus > Decimal::ZERO).then_some(bonus)
}

/// When referral bonuses are paid.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    /// On every reward-bearing credit of the referred account.
    #[default]
    Every,
    /// Only on the first reward-bearing credit of the referred account.
    FirstOnly,
}

/// Referral bonus policy.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
pub struct ReferralPolicy {
    /// Bonus percentage of the referred account's credit.
    #[builder(default = Decimal::TEN)]
    pct: Amount,
    /// Categories that trigger the cascade.
    #[builder(default = vec![Category::TaskCredit, Category::ExternalPostback])]
    cascade_on: Vec<Category>,
    /// Cascade mode.
    #[builder(default)]
    mode: CascadeMode,
}

impl Default for ReferralPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReferralPolicy {
    /// Bonus percentage.
    pub fn pct(&self) -> &Amount {
        &self.pct
    }

    /// Cascade mode.
    pub fn mode(&self) -> CascadeMode {
        self.mode
    }

    /// Whether a credit of `category` triggers the cascade.
    pub fn applies_to(&self, category: Category) -> bool {
        category.is_reward() && self.cascade_on.contains(&category)
    }

    /// Bonus for a credit of `base`.
    pub fn bonus(&self, base: &Amount) -> Option<Amount> {
        referral_bonus(base, &self.pct)
    }
}

/// Reward policy, fixed at engine construction.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
pub struct RewardPolicy {
    /// Reward of one task.
    #[builder(default = Decimal::new(1, 2))]
    task_reward: Amount,
    /// Check-in schedule.
    #[builder(default)]
    checkin_schedule: CheckinSchedule,
    /// Referral policy.
    #[builder(default)]
    referral: ReferralPolicy,
    /// Follow reward.
    #[builder(default = Decimal::new(1, 2))]
    follow_reward: Amount,
    /// Minimum withdrawal amount.
    #[builder(default = Decimal::ONE)]
    min_withdraw: Amount,
    /// Minimum ad watch time reported to clients.
    #[builder(default = 15)]
    min_watch_secs: u32,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RewardPolicy {
    /// Validate the policy.
    pub fn validate(&self) -> crate::Result<()> {
        let amounts = [&self.task_reward, &self.follow_reward, &self.min_withdraw];
        if amounts.into_iter().any(|a| a.is_sign_negative()) {
            return Err(crate::Error::invalid_argument("negative reward amount"));
        }
        if self
            .checkin_schedule
            .amounts()
            .iter()
            .any(|a| a.is_sign_negative())
        {
            return Err(crate::Error::invalid_argument("negative check-in reward"));
        }
        if self.referral.pct.is_sign_negative() || self.referral.pct > Decimal::ONE_HUNDRED {
            return Err(crate::Error::invalid_argument(
                "referral percentage must be in [0, 100]",
            ));
        }
        Ok(())
    }

    /// Fixed reward of one task.
    pub fn task_reward(&self) -> Amount {
        self.task_reward
    }

    /// Check-in reward of the given slot (`streak_before_claim mod 7`).
    pub fn checkin_reward(&self, slot: u8) -> Amount {
        self.checkin_schedule.reward(slot)
    }

    /// Check-in schedule.
    pub fn checkin_schedule(&self) -> &CheckinSchedule {
        &self.checkin_schedule
    }

    /// Referral policy.
    pub fn referral(&self) -> &ReferralPolicy {
        &self.referral
    }

    /// Follow reward.
    pub fn follow_reward(&self) -> Amount {
        self.follow_reward
    }

    /// Minimum withdrawal amount.
    pub fn min_withdraw(&self) -> Amount {
        self.min_withdraw
    }

    /// Minimum ad watch time.
    pub fn min_watch_secs(&self) -> u32 {
        self.min_watch_secs
    }
}
