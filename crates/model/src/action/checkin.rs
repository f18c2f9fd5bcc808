use serde_json::json;

use crate::{AccountId, Amount, Category, CheckinState, LedgerMut, RewardPolicy};

use super::{
    reward::{Reward, RewardReport},
    LedgerAction,
};

/// Claim the daily check-in reward.
#[must_use = "actions do nothing unless you `execute` them"]
pub struct ClaimCheckin<'a, L> {
    ledger: L,
    account: AccountId,
    policy: &'a RewardPolicy,
}

impl<'a, L: LedgerMut> ClaimCheckin<'a, L> {
    /// Create a new check-in claim.
    pub fn new(ledger: L, account: AccountId, policy: &'a RewardPolicy) -> Self {
        Self {
            ledger,
            account,
            policy,
        }
    }
}

impl<L: LedgerMut> LedgerAction for ClaimCheckin<'_, L> {
    type Report = CheckinReport;

    /// Execute the claim.
    /// # Notes
    /// - The reward is indexed by the streak produced by this claim.
    /// - A zero schedule slot advances the streak without crediting.
    fn execute(mut self) -> crate::Result<Self::Report> {
        let today = self.ledger.now().date();
        let before = self.ledger.checkin_state(self.account)?;
        let after = before.claim(today)?;
        let amount = self.policy.checkin_reward(after.streak - 1);

        self.ledger.update_checkin_state(self.account, &after)?;

        let reward = if amount > Amount::ZERO {
            Some(
                Reward::try_new(
                    &mut self.ledger,
                    self.account,
                    amount,
                    Category::Checkin,
                    self.policy.referral(),
                )?
                .metadata(json!({ "streak": after.streak, "day": today.to_string() }))
                .execute()?,
            )
        } else {
            None
        };

        let next_amount = self
            .policy
            .checkin_reward(after.next_claim_streak(today) - 1);
        let balance = match &reward {
            Some(reward) => reward.account().balance,
            None => self.ledger.account(self.account)?.balance,
        };

        Ok(CheckinReport {
            before,
            after,
            amount,
            next_amount,
            balance,
            reward,
        })
    }
}

/// Report of a check-in claim.
#[derive(Debug, Clone)]
pub struct CheckinReport {
    before: CheckinState,
    after: CheckinState,
    amount: Amount,
    next_amount: Amount,
    balance: Amount,
    reward: Option<RewardReport>,
}

impl CheckinReport {
    /// Streak before the claim.
    pub fn streak_before(&self) -> u8 {
        self.before.streak
    }

    /// Streak after the claim.
    pub fn streak(&self) -> u8 {
        self.after.streak
    }

    /// Check-in state after the claim.
    pub fn state(&self) -> &CheckinState {
        &self.after
    }

    /// Credited amount.
    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Reward of the next claim if the streak is kept.
    pub fn next_amount(&self) -> Amount {
        self.next_amount
    }

    /// Balance after the claim.
    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// The credit report, absent when the slot pays nothing.
    pub fn reward(&self) -> Option<&RewardReport> {
        self.reward.as_ref()
    }
}
