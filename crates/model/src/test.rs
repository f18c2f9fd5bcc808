use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
};

use time::{macros::datetime, Duration, OffsetDateTime};

use crate::{
    Account, AccountId, Amount, CheckinState, Clock, ExternalId, IdempotencyKey, Ledger,
    LedgerMut, NewReferral, NewTransaction, NewWithdrawal, Profile, Referral, ReferralCode, Task,
    TaskToken, Transaction, TransactionId, WithdrawalId, WithdrawalRequest,
};

const EPOCH: OffsetDateTime = datetime!(2024-01-01 08:00 UTC);

/// Test Ledger.
///
/// A single-threaded in-memory ledger. Writes are applied immediately; use
/// [`TestLedger::atomically`] to get all-or-nothing semantics.
#[derive(Debug, Clone)]
pub struct TestLedger {
    now: OffsetDateTime,
    accounts: BTreeMap<AccountId, Account>,
    transactions: Vec<Transaction>,
    checkins: HashMap<AccountId, CheckinState>,
    withdrawals: BTreeMap<WithdrawalId, WithdrawalRequest>,
    tasks: HashMap<(AccountId, TaskToken), Task>,
    referrals: Vec<Referral>,
    tokens: HashSet<String>,
}

impl Default for TestLedger {
    fn default() -> Self {
        Self {
            now: EPOCH,
            accounts: Default::default(),
            transactions: Default::default(),
            checkins: Default::default(),
            withdrawals: Default::default(),
            tasks: Default::default(),
            referrals: Default::default(),
            tokens: Default::default(),
        }
    }
}

impl TestLedger {
    /// Create an account for the given external id.
    pub fn create_account(
        &mut self,
        external_id: i64,
        referred_by: Option<&ReferralCode>,
    ) -> Account {
        let id = AccountId(self.accounts.len() as u64 + 1);
        let code = ReferralCode::parse(&format!("CODE{external_id:04}"))
            .unwrap_or_else(|| ReferralCode::generate(&mut rand::thread_rng()));
        let account = Account::new(
            id,
            &Profile::bare(ExternalId(external_id)),
            code,
            referred_by.cloned(),
            self.now,
        );
        self.accounts.insert(id, account.clone());
        account
    }

    /// Advance the ledger time.
    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }

    /// Run `f` and roll back every write if it fails.
    pub fn atomically<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> crate::Result<T>,
    ) -> crate::Result<T> {
        let snapshot = self.clone();
        let res = f(self);
        if res.is_err() {
            *self = snapshot;
        }
        res
    }

    /// Get an account, panicking if it does not exist.
    pub fn account_of(&self, id: AccountId) -> &Account {
        &self.accounts[&id]
    }

    /// Balance of an account.
    pub fn balance_of(&self, id: AccountId) -> Amount {
        self.account_of(id).balance
    }

    /// Sum of the logged amounts of an account.
    pub fn ledger_sum(&self, id: AccountId) -> Amount {
        self.transactions_of(id).map(|tx| tx.amount).sum()
    }

    /// Logged transactions of an account.
    pub fn transactions_of(&self, id: AccountId) -> impl ExactSizeIterator<Item = &Transaction> {
        self.transactions
            .iter()
            .filter(move |tx| tx.account == id)
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// All referral records.
    pub fn referrals(&self) -> &[Referral] {
        &self.referrals
    }

    /// All withdrawal requests.
    pub fn withdrawals(&self) -> Vec<&WithdrawalRequest> {
        self.withdrawals.values().collect()
    }
}

impl Ledger for TestLedger {
    fn now(&self) -> OffsetDateTime {
        self.now
    }

    fn account(&self, id: AccountId) -> crate::Result<Account> {
        self.accounts
            .get(&id)
            .cloned()
            .ok_or(crate::Error::AccountNotFound)
    }

    fn account_by_code(&self, code: &ReferralCode) -> crate::Result<Option<Account>> {
        Ok(self
            .accounts
            .values()
            .find(|account| account.referral_code == *code)
            .cloned())
    }

    fn checkin_state(&self, id: AccountId) -> crate::Result<CheckinState> {
        Ok(self.checkins.get(&id).copied().unwrap_or_default())
    }

    fn pending_withdrawal(&self, id: AccountId) -> crate::Result<Option<WithdrawalRequest>> {
        Ok(self
            .withdrawals
            .values()
            .find(|w| w.account == id && w.is_pending())
            .cloned())
    }

    fn withdrawal(&self, id: WithdrawalId) -> crate::Result<Option<WithdrawalRequest>> {
        Ok(self.withdrawals.get(&id).cloned())
    }

    fn task(&self, account: AccountId, token: &TaskToken) -> crate::Result<Option<Task>> {
        Ok(self.tasks.get(&(account, token.clone())).cloned())
    }

    fn has_referral_from(&self, invitee: AccountId) -> crate::Result<bool> {
        Ok(self.referrals.iter().any(|r| r.invitee == invitee))
    }
}

impl LedgerMut for TestLedger {
    fn update_account(&mut self, account: &Account) -> crate::Result<()> {
        let slot = self
            .accounts
            .get_mut(&account.id)
            .ok_or(crate::Error::AccountNotFound)?;
        *slot = account.clone();
        Ok(())
    }

    fn append_transaction(&mut self, transaction: NewTransaction) -> crate::Result<Transaction> {
        let id = TransactionId(self.transactions.len() as u64 + 1);
        let transaction = transaction.into_transaction(id, self.now);
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    fn update_checkin_state(&mut self, id: AccountId, state: &CheckinState) -> crate::Result<()> {
        self.checkins.insert(id, *state);
        Ok(())
    }

    fn insert_withdrawal(&mut self, withdrawal: NewWithdrawal) -> crate::Result<WithdrawalRequest> {
        let id = WithdrawalId(self.withdrawals.len() as u64 + 1);
        let request = withdrawal.into_request(id, self.now);
        self.withdrawals.insert(id, request.clone());
        Ok(request)
    }

    fn update_withdrawal(&mut self, withdrawal: &WithdrawalRequest) -> crate::Result<()> {
        self.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    fn insert_task(&mut self, task: &Task) -> crate::Result<()> {
        self.tasks
            .insert((task.account, task.token.clone()), task.clone());
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> crate::Result<()> {
        self.insert_task(task)
    }

    fn insert_referral(&mut self, referral: NewReferral) -> crate::Result<Referral> {
        let referral = referral.into_referral(self.referrals.len() as u64 + 1, self.now);
        self.referrals.push(referral.clone());
        Ok(referral)
    }

    fn claim(&mut self, key: &IdempotencyKey) -> crate::Result<bool> {
        Ok(self.tokens.insert(key.token().to_string()))
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<OffsetDateTime>);

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(EPOCH)
    }
}

impl ManualClock {
    /// Create a clock stopped at `now`.
    pub fn new(now: OffsetDateTime) -> Self {
        Self(Mutex::new(now))
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        *self.lock() += duration;
    }

    /// Set the clock.
    pub fn set(&self, now: OffsetDateTime) {
        *self.lock() = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OffsetDateTime> {
        self.0.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::Value;

    use crate::{Category, LedgerMutExt};

    use super::*;

    #[test]
    fn atomically_rolls_back() -> crate::Result<()> {
        let mut ledger = TestLedger::default();
        let account = ledger.create_account(7, None);
        let res = ledger.atomically(|ledger| {
            ledger.credit(account.id, dec!(1), Category::TaskCredit, Value::Null)?;
            ledger.debit(account.id, dec!(2), Value::Null)
        });
        assert!(res.is_err());
        assert_eq!(ledger.balance_of(account.id), dec!(0));
        assert_eq!(ledger.transactions_of(account.id).len(), 0);
        Ok(())
    }

    #[test]
    fn manual_clock() {
        let clock = ManualClock::default();
        let before = clock.today();
        clock.advance(Duration::days(1));
        assert_eq!(before.next_day(), Some(clock.today()));
    }
}
