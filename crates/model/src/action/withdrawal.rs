use serde_json::json;
use typed_builder::TypedBuilder;

use crate::{
    ledger::Posting, AccountId, Amount, LedgerMut, LedgerMutExt, Network, NewWithdrawal,
    RewardPolicy, WithdrawalId, WithdrawalRequest,
};

use super::LedgerAction;

/// Withdrawal request params.
#[derive(Debug, Clone, TypedBuilder)]
pub struct WithdrawalParams {
    /// Destination address.
    #[builder(setter(into))]
    address: String,
    /// Settlement network.
    #[builder(default)]
    network: Network,
    /// Requested amount, the full balance if absent.
    #[builder(default, setter(strip_option))]
    amount: Option<Amount>,
}

/// Request a withdrawal: debit the balance and record a pending request.
#[must_use = "actions do nothing unless you `execute` them"]
pub struct RequestWithdrawal<'a, L> {
    ledger: L,
    account: AccountId,
    params: WithdrawalParams,
    policy: &'a RewardPolicy,
}

impl<'a, L: LedgerMut> RequestWithdrawal<'a, L> {
    /// Create a new withdrawal request.
    pub fn new(
        ledger: L,
        account: AccountId,
        params: WithdrawalParams,
        policy: &'a RewardPolicy,
    ) -> Self {
        Self {
            ledger,
            account,
            params,
            policy,
        }
    }
}

impl<L: LedgerMut> LedgerAction for RequestWithdrawal<'_, L> {
    type Report = WithdrawalReport;

    /// Execute the request.
    /// # Notes
    /// - The pending check runs before the amount checks, so concurrent
    ///   full-balance requests are rejected as conflicts.
    fn execute(mut self) -> crate::Result<Self::Report> {
        let WithdrawalParams {
            address,
            network,
            amount,
        } = self.params;
        let address = network.validate_address(&address)?;

        if self.ledger.pending_withdrawal(self.account)?.is_some() {
            return Err(crate::Error::DuplicatePending);
        }

        let account = self.ledger.account(self.account)?;
        let amount = amount.unwrap_or(account.balance);
        let min = self.policy.min_withdraw();
        if amount < min {
            return Err(crate::Error::BelowMinimum { amount, min });
        }

        let posting = self.ledger.debit(
            self.account,
            amount,
            json!({
                "reason": "withdraw_request",
                "network": network,
                "address": address,
            }),
        )?;
        let request = self.ledger.insert_withdrawal(NewWithdrawal {
            account: self.account,
            amount,
            address,
            network,
        })?;

        Ok(WithdrawalReport { request, posting })
    }
}

/// Report of a withdrawal request.
#[derive(Debug, Clone)]
pub struct WithdrawalReport {
    request: WithdrawalRequest,
    posting: Posting,
}

impl WithdrawalReport {
    /// The pending request.
    pub fn request(&self) -> &WithdrawalRequest {
        &self.request
    }

    /// Balance after the debit.
    pub fn balance(&self) -> Amount {
        self.posting.account.balance
    }

    /// The logged debit.
    pub fn transaction(&self) -> &crate::Transaction {
        &self.posting.transaction
    }
}

/// Mark a pending withdrawal as processed.
#[must_use = "actions do nothing unless you `execute` them"]
pub struct MarkProcessed<L> {
    ledger: L,
    id: WithdrawalId,
    settlement_ref: String,
}

impl<L: LedgerMut> MarkProcessed<L> {
    /// Create a new settlement of withdrawal `id`.
    pub fn try_new(ledger: L, id: WithdrawalId, settlement_ref: &str) -> crate::Result<Self> {
        let settlement_ref = settlement_ref.trim();
        if settlement_ref.is_empty() {
            return Err(crate::Error::invalid_argument("empty settlement reference"));
        }
        Ok(Self {
            ledger,
            id,
            settlement_ref: settlement_ref.to_string(),
        })
    }
}

impl<L: LedgerMut> LedgerAction for MarkProcessed<L> {
    type Report = WithdrawalRequest;

    fn execute(mut self) -> crate::Result<Self::Report> {
        let mut request = self
            .ledger
            .withdrawal(self.id)?
            .ok_or(crate::Error::NotFoundOrNotPending(self.id))?;
        request.mark_processed(self.settlement_ref, self.ledger.now())?;
        self.ledger.update_withdrawal(&request)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::{test::TestLedger, Category, WithdrawalStatus};

    use super::*;

    const ADDRESS: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    fn funded(amount: Amount) -> crate::Result<(TestLedger, AccountId)> {
        let mut ledger = TestLedger::default();
        let account = ledger.create_account(1, None);
        ledger.credit(account.id, amount, Category::ExternalPostback, json!(null))?;
        Ok((ledger, account.id))
    }

    #[test]
    fn full_balance_withdrawal() -> crate::Result<()> {
        let (mut ledger, account) = funded(dec!(2.5))?;
        let policy = RewardPolicy::default();
        let params = WithdrawalParams::builder().address(ADDRESS).build();
        let report = RequestWithdrawal::new(&mut ledger, account, params, &policy).execute()?;
        assert_eq!(report.request().amount, dec!(2.5));
        assert_eq!(report.request().network.as_str(), "BSC");
        assert_eq!(report.balance(), dec!(0));
        assert_eq!(report.transaction().amount, dec!(-2.5));
        assert_eq!(ledger.ledger_sum(account), dec!(0));
        Ok(())
    }

    #[test]
    fn second_request_conflicts_while_pending() -> crate::Result<()> {
        let (mut ledger, account) = funded(dec!(3))?;
        let policy = RewardPolicy::default();
        let params = WithdrawalParams::builder()
            .address(ADDRESS)
            .amount(dec!(1))
            .build();
        RequestWithdrawal::new(&mut ledger, account, params.clone(), &policy).execute()?;
        let err = RequestWithdrawal::new(&mut ledger, account, params.clone(), &policy)
            .execute()
            .unwrap_err();
        assert!(matches!(err, crate::Error::DuplicatePending));
        assert_eq!(ledger.balance_of(account), dec!(2));

        let id = ledger.withdrawals()[0].id;
        let processed = MarkProcessed::try_new(&mut ledger, id, "0xhash")?.execute()?;
        assert_eq!(processed.status, WithdrawalStatus::Processed);
        assert_eq!(processed.settlement_ref.as_deref(), Some("0xhash"));

        RequestWithdrawal::new(&mut ledger, account, params, &policy).execute()?;
        assert_eq!(ledger.balance_of(account), dec!(1));
        Ok(())
    }

    #[test]
    fn rejections_leave_balance_untouched() -> crate::Result<()> {
        let (mut ledger, account) = funded(dec!(0.005))?;
        let policy = RewardPolicy::default();

        let params = WithdrawalParams::builder().address(ADDRESS).build();
        let err = RequestWithdrawal::new(&mut ledger, account, params, &policy)
            .execute()
            .unwrap_err();
        assert!(matches!(err, crate::Error::BelowMinimum { .. }));

        let params = WithdrawalParams::builder().address("0x1234").build();
        let err = RequestWithdrawal::new(&mut ledger, account, params, &policy)
            .execute()
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidAddress(_)));

        let params = WithdrawalParams::builder()
            .address(ADDRESS)
            .amount(dec!(5))
            .build();
        let err = RequestWithdrawal::new(&mut ledger, account, params, &policy)
            .execute()
            .unwrap_err();
        assert!(matches!(err, crate::Error::InsufficientBalance { .. }));

        assert_eq!(ledger.balance_of(account), dec!(0.005));
        assert!(ledger.withdrawals().is_empty());
        Ok(())
    }

    #[test]
    fn mark_processed_twice() -> crate::Result<()> {
        let (mut ledger, account) = funded(dec!(1))?;
        let policy = RewardPolicy::default();
        let params = WithdrawalParams::builder().address(ADDRESS).build();
        let id = RequestWithdrawal::new(&mut ledger, account, params, &policy)
            .execute()?
            .request()
            .id;
        MarkProcessed::try_new(&mut ledger, id, "ref")?.execute()?;
        let err = MarkProcessed::try_new(&mut ledger, id, "ref")?
            .execute()
            .unwrap_err();
        assert!(matches!(err, crate::Error::NotFoundOrNotPending(_)));
        let err = MarkProcessed::try_new(&mut ledger, WithdrawalId(99), "ref")?
            .execute()
            .unwrap_err();
        assert!(matches!(err, crate::Error::NotFoundOrNotPending(_)));
        assert!(MarkProcessed::try_new(&mut ledger, id, " ").is_err());
        Ok(())
    }
}
