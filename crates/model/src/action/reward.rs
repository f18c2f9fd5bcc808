use serde_json::Value;

use crate::{
    ledger::{Posting, ReferralPayout},
    AccountId, Amount, Category, LedgerMut, LedgerMutExt, ReferralPolicy,
};

use super::LedgerAction;

/// Credit a reward and run the referral cascade.
#[must_use = "actions do nothing unless you `execute` them"]
pub struct Reward<'a, L> {
    ledger: L,
    account: AccountId,
    amount: Amount,
    category: Category,
    referral: &'a ReferralPolicy,
    count_task: bool,
    metadata: Value,
}

impl<'a, L: LedgerMut> Reward<'a, L> {
    /// Create a new reward of `amount` for `account`.
    pub fn try_new(
        ledger: L,
        account: AccountId,
        amount: Amount,
        category: Category,
        referral: &'a ReferralPolicy,
    ) -> crate::Result<Self> {
        if !category.is_reward() {
            return Err(crate::Error::invalid_argument(format!(
                "`{category}` is not a reward category"
            )));
        }
        if amount <= Amount::ZERO {
            return Err(crate::Error::InvalidAmount(amount));
        }
        Ok(Self {
            ledger,
            account,
            amount,
            category,
            referral,
            count_task: false,
            metadata: Value::Null,
        })
    }

    /// Also increment the completed-task counter.
    pub fn count_task(mut self, count: bool) -> Self {
        self.count_task = count;
        self
    }

    /// Attach metadata to the logged transaction.
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl<L: LedgerMut> LedgerAction for Reward<'_, L> {
    type Report = RewardReport;

    fn execute(mut self) -> crate::Result<Self::Report> {
        let mut posting = self
            .ledger
            .credit(self.account, self.amount, self.category, self.metadata)?;
        if self.count_task {
            posting.account.total_tasks = self.ledger.increment_task_count(self.account)?;
        }
        let referral = self.ledger.cascade_referral(
            &posting.account,
            &self.amount,
            self.category,
            self.referral,
        )?;
        Ok(RewardReport { posting, referral })
    }
}

/// Report of a reward.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardReport {
    posting: Posting,
    referral: Option<ReferralPayout>,
}

impl RewardReport {
    /// Credited amount.
    pub fn amount(&self) -> Amount {
        self.posting.transaction.amount
    }

    /// The rewarded account after the credit.
    pub fn account(&self) -> &crate::Account {
        &self.posting.account
    }

    /// The logged credit.
    pub fn transaction(&self) -> &crate::Transaction {
        &self.posting.transaction
    }

    /// The paid referral bonus, if any.
    pub fn referral(&self) -> Option<&ReferralPayout> {
        self.referral.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::test::TestLedger;

    use super::*;

    #[test]
    fn task_credit_with_cascade() -> crate::Result<()> {
        let mut ledger = TestLedger::default();
        let inviter = ledger.create_account(1, None);
        let invitee = ledger.create_account(2, Some(&inviter.referral_code));
        let policy = ReferralPolicy::default();

        let report = Reward::try_new(
            &mut ledger,
            invitee.id,
            dec!(0.02),
            Category::TaskCredit,
            &policy,
        )?
        .count_task(true)
        .execute()?;

        assert_eq!(report.account().balance, dec!(0.02));
        assert_eq!(report.account().total_tasks, 1);
        assert_eq!(report.referral().map(|r| r.referral.bonus), Some(dec!(0.002)));
        assert_eq!(ledger.balance_of(inviter.id), dec!(0.002));
        assert_eq!(ledger.account_of(invitee.id).total_tasks, 1);
        Ok(())
    }

    #[test]
    fn checkin_does_not_cascade_by_default() -> crate::Result<()> {
        let mut ledger = TestLedger::default();
        let inviter = ledger.create_account(1, None);
        let invitee = ledger.create_account(2, Some(&inviter.referral_code));
        let policy = ReferralPolicy::default();

        let report = Reward::try_new(&mut ledger, invitee.id, dec!(1), Category::Checkin, &policy)?
            .execute()?;
        assert!(report.referral().is_none());
        assert_eq!(ledger.balance_of(inviter.id), dec!(0));
        Ok(())
    }

    #[test]
    fn invalid_rewards_are_rejected() {
        let mut ledger = TestLedger::default();
        let account = ledger.create_account(1, None);
        let policy = ReferralPolicy::default();
        assert!(
            Reward::try_new(&mut ledger, account.id, dec!(0), Category::TaskCredit, &policy)
                .is_err()
        );
        assert!(Reward::try_new(
            &mut ledger,
            account.id,
            dec!(1),
            Category::ReferralBonus,
            &policy
        )
        .is_err());
    }
}
