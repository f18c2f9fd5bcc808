use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::{
    policy::CascadeMode, Account, AccountId, Amount, Category, CheckinState, IdempotencyKey,
    NewReferral, NewTransaction, NewWithdrawal, Referral, ReferralCode, ReferralPolicy, Task,
    TaskToken, Transaction, WithdrawalId, WithdrawalRequest,
};

/// Read access to the ledger inside one atomic unit.
pub trait Ledger {
    /// Timestamp of the unit.
    fn now(&self) -> OffsetDateTime;

    /// Get an account.
    fn account(&self, id: AccountId) -> crate::Result<Account>;

    /// Find an account by its referral code.
    fn account_by_code(&self, code: &ReferralCode) -> crate::Result<Option<Account>>;

    /// Get the check-in state of an account, the default state if it has never claimed.
    fn checkin_state(&self, id: AccountId) -> crate::Result<CheckinState>;

    /// Get the pending withdrawal of an account.
    fn pending_withdrawal(&self, id: AccountId) -> crate::Result<Option<WithdrawalRequest>>;

    /// Get a withdrawal.
    fn withdrawal(&self, id: WithdrawalId) -> crate::Result<Option<WithdrawalRequest>>;

    /// Get a task of an account.
    fn task(&self, account: AccountId, token: &TaskToken) -> crate::Result<Option<Task>>;

    /// Whether a referral bonus has ever been paid for `invitee`.
    fn has_referral_from(&self, invitee: AccountId) -> crate::Result<bool>;
}

/// Write access to the ledger inside one atomic unit.
///
/// Implementations must either commit every write of a unit or none of them.
pub trait LedgerMut: Ledger {
    /// Write back an account.
    fn update_account(&mut self, account: &Account) -> crate::Result<()>;

    /// Append to the transaction log.
    fn append_transaction(&mut self, transaction: NewTransaction) -> crate::Result<Transaction>;

    /// Write back the check-in state of an account.
    fn update_checkin_state(&mut self, id: AccountId, state: &CheckinState) -> crate::Result<()>;

    /// Insert a pending withdrawal.
    fn insert_withdrawal(&mut self, withdrawal: NewWithdrawal) -> crate::Result<WithdrawalRequest>;

    /// Write back a withdrawal.
    fn update_withdrawal(&mut self, withdrawal: &WithdrawalRequest) -> crate::Result<()>;

    /// Insert a task.
    fn insert_task(&mut self, task: &Task) -> crate::Result<()>;

    /// Write back a task.
    fn update_task(&mut self, task: &Task) -> crate::Result<()>;

    /// Insert a referral record.
    fn insert_referral(&mut self, referral: NewReferral) -> crate::Result<Referral>;

    /// Insert an idempotency record.
    ///
    /// Returns `false` if the token has already been claimed.
    fn claim(&mut self, key: &IdempotencyKey) -> crate::Result<bool>;
}

impl<L: Ledger + ?Sized> Ledger for &mut L {
    fn now(&self) -> OffsetDateTime {
        (**self).now()
    }

    fn account(&self, id: AccountId) -> crate::Result<Account> {
        (**self).account(id)
    }

    fn account_by_code(&self, code: &ReferralCode) -> crate::Result<Option<Account>> {
        (**self).account_by_code(code)
    }

    fn checkin_state(&self, id: AccountId) -> crate::Result<CheckinState> {
        (**self).checkin_state(id)
    }

    fn pending_withdrawal(&self, id: AccountId) -> crate::Result<Option<WithdrawalRequest>> {
        (**self).pending_withdrawal(id)
    }

    fn withdrawal(&self, id: WithdrawalId) -> crate::Result<Option<WithdrawalRequest>> {
        (**self).withdrawal(id)
    }

    fn task(&self, account: AccountId, token: &TaskToken) -> crate::Result<Option<Task>> {
        (**self).task(account, token)
    }

    fn has_referral_from(&self, invitee: AccountId) -> crate::Result<bool> {
        (**self).has_referral_from(invitee)
    }
}

impl<L: LedgerMut + ?Sized> LedgerMut for &mut L {
    fn update_account(&mut self, account: &Account) -> crate::Result<()> {
        (**self).update_account(account)
    }

    fn append_transaction(&mut self, transaction: NewTransaction) -> crate::Result<Transaction> {
        (**self).append_transaction(transaction)
    }

    fn update_checkin_state(&mut self, id: AccountId, state: &CheckinState) -> crate::Result<()> {
        (**self).update_checkin_state(id, state)
    }

    fn insert_withdrawal(&mut self, withdrawal: NewWithdrawal) -> crate::Result<WithdrawalRequest> {
        (**self).insert_withdrawal(withdrawal)
    }

    fn update_withdrawal(&mut self, withdrawal: &WithdrawalRequest) -> crate::Result<()> {
        (**self).update_withdrawal(withdrawal)
    }

    fn insert_task(&mut self, task: &Task) -> crate::Result<()> {
        (**self).insert_task(task)
    }

    fn update_task(&mut self, task: &Task) -> crate::Result<()> {
        (**self).update_task(task)
    }

    fn insert_referral(&mut self, referral: NewReferral) -> crate::Result<Referral> {
        (**self).insert_referral(referral)
    }

    fn claim(&mut self, key: &IdempotencyKey) -> crate::Result<bool> {
        (**self).claim(key)
    }
}

/// A balance mutation together with its log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// The account after the mutation.
    pub account: Account,
    /// The appended transaction.
    pub transaction: Transaction,
}

/// A paid referral bonus.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralPayout {
    /// The credit to the inviting account.
    pub posting: Posting,
    /// The referral record.
    pub referral: Referral,
}

/// Extension trait for [`LedgerMut`].
pub trait LedgerMutExt: LedgerMut {
    /// Increase balance and lifetime earnings by `amount` and log it.
    fn credit(
        &mut self,
        id: AccountId,
        amount: Amount,
        category: Category,
        metadata: Value,
    ) -> crate::Result<Posting> {
        if !category.is_credit() {
            return Err(crate::Error::invalid_argument(format!(
                "`{category}` is not a credit category"
            )));
        }
        let mut account = self.account(id)?;
        account.apply_credit(&amount)?;
        self.update_account(&account)?;
        let transaction = self.append_transaction(NewTransaction {
            account: id,
            amount,
            category,
            metadata,
        })?;
        Ok(Posting {
            account,
            transaction,
        })
    }

    /// Decrease balance by `amount` and log it with a negative amount.
    fn debit(&mut self, id: AccountId, amount: Amount, metadata: Value) -> crate::Result<Posting> {
        let mut account = self.account(id)?;
        account.apply_debit(&amount)?;
        self.update_account(&account)?;
        let transaction = self.append_transaction(NewTransaction {
            account: id,
            amount: -amount,
            category: Category::WithdrawalDebit,
            metadata,
        })?;
        Ok(Posting {
            account,
            transaction,
        })
    }

    /// Increment the completed-task counter, returning the new count.
    fn increment_task_count(&mut self, id: AccountId) -> crate::Result<u64> {
        let mut account = self.account(id)?;
        account.total_tasks = account
            .total_tasks
            .checked_add(1)
            .ok_or(crate::Error::Overflow)?;
        self.update_account(&account)?;
        Ok(account.total_tasks)
    }

    /// Claim an idempotency key, failing with [`DuplicateRequest`](crate::Error::DuplicateRequest)
    /// if it has been used.
    fn claim_or_conflict(&mut self, key: &IdempotencyKey) -> crate::Result<()> {
        if self.claim(key)? {
            Ok(())
        } else {
            Err(crate::Error::DuplicateRequest)
        }
    }

    /// Pay the inviting account of `invitee` a bonus for a credit of `credited`.
    fn cascade_referral(
        &mut self,
        invitee: &Account,
        credited: &Amount,
        category: Category,
        policy: &ReferralPolicy,
    ) -> crate::Result<Option<ReferralPayout>> {
        if !policy.applies_to(category) {
            return Ok(None);
        }
        let Some(code) = invitee.referred_by.as_ref() else {
            return Ok(None);
        };
        let Some(inviter) = self.account_by_code(code)? else {
            return Ok(None);
        };
        if inviter.id == invitee.id {
            return Ok(None);
        }
        if policy.mode() == CascadeMode::FirstOnly && self.has_referral_from(invitee.id)? {
            return Ok(None);
        }
        let Some(bonus) = policy.bonus(credited) else {
            return Ok(None);
        };
        let posting = self.credit(
            inviter.id,
            bonus,
            Category::ReferralBonus,
            json!({
                "from": invitee.external_id,
                "source": category,
            }),
        )?;
        let referral = self.insert_referral(NewReferral {
            referrer_code: inviter.referral_code,
            invitee: invitee.id,
            bonus,
        })?;
        Ok(Some(ReferralPayout { posting, referral }))
    }
}

impl<L: LedgerMut + ?Sized> LedgerMutExt for L {}
