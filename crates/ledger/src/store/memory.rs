use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use time::OffsetDateTime;
use w2e_model::{
    Account, AccountId, CheckinState, ExternalId, IdempotencyKey, IdempotencyRecord, Ledger,
    LedgerMut, NewReferral, NewTransaction, NewWithdrawal, Profile, Referral, ReferralCode, Task,
    TaskToken, Transaction, TransactionId, WithdrawalId, WithdrawalRequest,
};

use super::{Scope, Store, UnitFn, MAX_CODE_ATTEMPTS};

/// Everything owned by one account.
#[derive(Debug)]
struct Row {
    account: Account,
    checkin: CheckinState,
    transactions: Vec<Transaction>,
    withdrawals: BTreeMap<WithdrawalId, WithdrawalRequest>,
    tasks: HashMap<TaskToken, Task>,
    /// Bonuses paid to this account.
    referrals: Vec<Referral>,
}

impl Row {
    fn new(account: Account) -> Self {
        Self {
            account,
            checkin: CheckinState::default(),
            transactions: Vec::new(),
            withdrawals: BTreeMap::new(),
            tasks: HashMap::new(),
            referrals: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Directory {
    rows: BTreeMap<AccountId, Arc<Mutex<Row>>>,
    by_external: HashMap<ExternalId, AccountId>,
    by_code: HashMap<ReferralCode, AccountId>,
    withdrawals: HashMap<WithdrawalId, AccountId>,
}

/// In-memory [`Store`].
///
/// Every account lives behind its own lock. A unit locks the accounts of its
/// scope in ascending id order, so units over disjoint scopes never contend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    directory: RwLock<Directory>,
    idempotency: Mutex<HashMap<String, IdempotencyRecord>>,
    next_account: AtomicU64,
    next_transaction: AtomicU64,
    next_withdrawal: AtomicU64,
    next_referral: AtomicU64,
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

fn lock<T>(mutex: &Mutex<T>) -> crate::Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| crate::Error::Poisoned("row"))
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> crate::Result<RwLockReadGuard<'_, Directory>> {
        self.directory
            .read()
            .map_err(|_| crate::Error::Poisoned("directory"))
    }

    fn write(&self) -> crate::Result<RwLockWriteGuard<'_, Directory>> {
        self.directory
            .write()
            .map_err(|_| crate::Error::Poisoned("directory"))
    }

    fn row(&self, id: AccountId) -> crate::Result<Option<Arc<Mutex<Row>>>> {
        Ok(self.read()?.rows.get(&id).cloned())
    }

    fn with_row<T>(
        &self,
        id: AccountId,
        f: impl FnOnce(&Row) -> T,
    ) -> crate::Result<Option<T>> {
        match self.row(id)? {
            Some(row) => Ok(Some(f(&*lock(&row)?))),
            None => Ok(None),
        }
    }
}

impl Store for MemoryStore {
    fn get_or_create(
        &self,
        profile: &Profile,
        referred_by: Option<&ReferralCode>,
        now: OffsetDateTime,
    ) -> crate::Result<Account> {
        let existing = self.read()?.by_external.get(&profile.external_id).copied();
        if let Some(id) = existing {
            if let Some(row) = self.row(id)? {
                let mut row = lock(&row)?;
                row.account.refresh_profile(profile);
                return Ok(row.account.clone());
            }
        }

        let mut directory = self.write()?;
        // Lost a creation race.
        if let Some(id) = directory.by_external.get(&profile.external_id).copied() {
            drop(directory);
            return self
                .account(id)?
                .ok_or(crate::Error::Model(w2e_model::Error::AccountNotFound));
        }

        let referred_by = referred_by
            .filter(|code| directory.by_code.contains_key(*code))
            .cloned();
        let mut rng = rand::thread_rng();
        let code = std::iter::repeat_with(|| ReferralCode::generate(&mut rng))
            .take(MAX_CODE_ATTEMPTS)
            .find(|code| !directory.by_code.contains_key(code))
            .ok_or_else(|| w2e_model::Error::storage("referral code space exhausted"))?;

        let id = AccountId(next_id(&self.next_account));
        let account = Account::new(id, profile, code.clone(), referred_by, now);
        directory.by_external.insert(profile.external_id, id);
        directory.by_code.insert(code, id);
        directory
            .rows
            .insert(id, Arc::new(Mutex::new(Row::new(account.clone()))));
        Ok(account)
    }

    fn account(&self, id: AccountId) -> crate::Result<Option<Account>> {
        self.with_row(id, |row| row.account.clone())
    }

    fn account_by_external_id(&self, external_id: ExternalId) -> crate::Result<Option<Account>> {
        let id = self.read()?.by_external.get(&external_id).copied();
        match id {
            Some(id) => self.account(id),
            None => Ok(None),
        }
    }

    fn account_by_code(&self, code: &ReferralCode) -> crate::Result<Option<Account>> {
        let id = self.read()?.by_code.get(code).copied();
        match id {
            Some(id) => self.account(id),
            None => Ok(None),
        }
    }

    fn checkin_state(&self, id: AccountId) -> crate::Result<CheckinState> {
        Ok(self.with_row(id, |row| row.checkin)?.unwrap_or_default())
    }

    fn withdrawal(&self, id: WithdrawalId) -> crate::Result<Option<WithdrawalRequest>> {
        let owner = self.read()?.withdrawals.get(&id).copied();
        match owner {
            Some(owner) => Ok(self
                .with_row(owner, |row| row.withdrawals.get(&id).cloned())?
                .flatten()),
            None => Ok(None),
        }
    }

    fn pending_withdrawals(&self, limit: usize) -> crate::Result<Vec<WithdrawalRequest>> {
        let rows = self.read()?.rows.values().cloned().collect::<Vec<_>>();
        let mut pending = Vec::new();
        for row in rows {
            let row = lock(&row)?;
            pending.extend(row.withdrawals.values().filter(|w| w.is_pending()).cloned());
        }
        pending.sort_by(|a, b| b.id.cmp(&a.id));
        pending.truncate(limit);
        Ok(pending)
    }

    fn transactions(&self, account: AccountId) -> crate::Result<Vec<Transaction>> {
        Ok(self
            .with_row(account, |row| row.transactions.clone())?
            .unwrap_or_default())
    }

    fn referrals(&self, code: &ReferralCode) -> crate::Result<Vec<Referral>> {
        let id = self.read()?.by_code.get(code).copied();
        match id {
            Some(id) => Ok(self
                .with_row(id, |row| row.referrals.clone())?
                .unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    fn atomically(
        &self,
        scope: &Scope,
        now: OffsetDateTime,
        f: &mut UnitFn<'_>,
    ) -> crate::Result<()> {
        let handles = {
            let directory = self.read()?;
            scope
                .iter()
                .map(|id| {
                    directory
                        .rows
                        .get(id)
                        .cloned()
                        .map(|row| (*id, row))
                        .ok_or(w2e_model::Error::AccountNotFound)
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        // Ascending id order.
        let mut rows = BTreeMap::new();
        for (id, handle) in handles.iter() {
            rows.insert(*id, lock(handle)?);
        }

        let mut unit = MemoryUnit {
            store: self,
            now,
            rows,
            staged: Staged::default(),
        };
        f(&mut unit)?;
        unit.commit()
    }
}

#[derive(Debug, Default)]
struct Staged {
    accounts: BTreeMap<AccountId, Account>,
    checkins: BTreeMap<AccountId, CheckinState>,
    transactions: Vec<Transaction>,
    withdrawals: BTreeMap<WithdrawalId, WithdrawalRequest>,
    tasks: HashMap<(AccountId, TaskToken), Task>,
    referrals: Vec<(AccountId, Referral)>,
    claimed: Vec<IdempotencyRecord>,
}

struct MemoryUnit<'a> {
    store: &'a MemoryStore,
    now: OffsetDateTime,
    rows: BTreeMap<AccountId, MutexGuard<'a, Row>>,
    staged: Staged,
}

impl MemoryUnit<'_> {
    fn row(&self, id: AccountId) -> w2e_model::Result<&Row> {
        self.rows
            .get(&id)
            .map(|row| &**row)
            .ok_or(w2e_model::Error::OutOfScope(id))
    }

    /// Publish the staged changes.
    ///
    /// Claims become visible here. If a racing unit published one of our
    /// tokens first, nothing is applied and the unit fails.
    fn commit(mut self) -> crate::Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut new_withdrawals = Vec::new();

        if !staged.claimed.is_empty() {
            let mut idempotency = lock(&self.store.idempotency)?;
            if staged
                .claimed
                .iter()
                .any(|record| idempotency.contains_key(&record.token))
            {
                return Err(w2e_model::Error::DuplicateRequest.into());
            }
            for record in staged.claimed {
                idempotency.insert(record.token.clone(), record);
            }
        }

        for (id, account) in staged.accounts {
            if let Some(row) = self.rows.get_mut(&id) {
                row.account = account;
            }
        }
        for (id, state) in staged.checkins {
            if let Some(row) = self.rows.get_mut(&id) {
                row.checkin = state;
            }
        }
        for tx in staged.transactions {
            if let Some(row) = self.rows.get_mut(&tx.account) {
                row.transactions.push(tx);
            }
        }
        for (id, withdrawal) in staged.withdrawals {
            if let Some(row) = self.rows.get_mut(&withdrawal.account) {
                if row.withdrawals.insert(id, withdrawal.clone()).is_none() {
                    new_withdrawals.push((id, withdrawal.account));
                }
            }
        }
        for ((account, token), task) in staged.tasks {
            if let Some(row) = self.rows.get_mut(&account) {
                row.tasks.insert(token, task);
            }
        }
        for (inviter, referral) in staged.referrals {
            if let Some(row) = self.rows.get_mut(&inviter) {
                row.referrals.push(referral);
            }
        }

        if !new_withdrawals.is_empty() {
            let mut directory = self.store.write()?;
            directory.withdrawals.extend(new_withdrawals);
        }
        Ok(())
    }
}

impl Ledger for MemoryUnit<'_> {
    fn now(&self) -> OffsetDateTime {
        self.now
    }

    fn account(&self, id: AccountId) -> w2e_model::Result<Account> {
        if let Some(account) = self.staged.accounts.get(&id) {
            return Ok(account.clone());
        }
        Ok(self.row(id)?.account.clone())
    }

    fn account_by_code(&self, code: &ReferralCode) -> w2e_model::Result<Option<Account>> {
        let id = self.store.read()?.by_code.get(code).copied();
        match id {
            Some(id) => self.account(id).map(Some),
            None => Ok(None),
        }
    }

    fn checkin_state(&self, id: AccountId) -> w2e_model::Result<CheckinState> {
        if let Some(state) = self.staged.checkins.get(&id) {
            return Ok(*state);
        }
        Ok(self.row(id)?.checkin)
    }

    fn pending_withdrawal(&self, id: AccountId) -> w2e_model::Result<Option<WithdrawalRequest>> {
        let row = self.row(id)?;
        let staged = self
            .staged
            .withdrawals
            .values()
            .filter(|w| w.account == id);
        let stored = row
            .withdrawals
            .values()
            .filter(|w| !self.staged.withdrawals.contains_key(&w.id));
        Ok(staged.chain(stored).find(|w| w.is_pending()).cloned())
    }

    fn withdrawal(&self, id: WithdrawalId) -> w2e_model::Result<Option<WithdrawalRequest>> {
        if let Some(withdrawal) = self.staged.withdrawals.get(&id) {
            return Ok(Some(withdrawal.clone()));
        }
        if let Some(found) = self
            .rows
            .values()
            .find_map(|row| row.withdrawals.get(&id).cloned())
        {
            return Ok(Some(found));
        }
        match self.store.read()?.withdrawals.get(&id) {
            Some(owner) => Err(w2e_model::Error::OutOfScope(*owner)),
            None => Ok(None),
        }
    }

    fn task(&self, account: AccountId, token: &TaskToken) -> w2e_model::Result<Option<Task>> {
        if let Some(task) = self.staged.tasks.get(&(account, token.clone())) {
            return Ok(Some(task.clone()));
        }
        Ok(self.row(account)?.tasks.get(token).cloned())
    }

    fn has_referral_from(&self, invitee: AccountId) -> w2e_model::Result<bool> {
        let staged = self.staged.referrals.iter().any(|(_, r)| r.invitee == invitee);
        let invitee_account = self.account(invitee)?;
        let Some(code) = invitee_account.referred_by else {
            return Ok(staged);
        };
        let stored = match self.account_by_code(&code)? {
            Some(inviter) => self
                .row(inviter.id)?
                .referrals
                .iter()
                .any(|r| r.invitee == invitee),
            None => false,
        };
        Ok(staged || stored)
    }
}

impl LedgerMut for MemoryUnit<'_> {
    fn update_account(&mut self, account: &Account) -> w2e_model::Result<()> {
        self.row(account.id)?;
        self.staged.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> w2e_model::Result<Transaction> {
        self.row(transaction.account)?;
        let id = TransactionId(next_id(&self.store.next_transaction));
        let transaction = transaction.into_transaction(id, self.now);
        self.staged.transactions.push(transaction.clone());
        Ok(transaction)
    }

    fn update_checkin_state(
        &mut self,
        id: AccountId,
        state: &CheckinState,
    ) -> w2e_model::Result<()> {
        self.row(id)?;
        self.staged.checkins.insert(id, *state);
        Ok(())
    }

    fn insert_withdrawal(
        &mut self,
        withdrawal: NewWithdrawal,
    ) -> w2e_model::Result<WithdrawalRequest> {
        self.row(withdrawal.account)?;
        let id = WithdrawalId(next_id(&self.store.next_withdrawal));
        let request = withdrawal.into_request(id, self.now);
        self.staged.withdrawals.insert(id, request.clone());
        Ok(request)
    }

    fn update_withdrawal(&mut self, withdrawal: &WithdrawalRequest) -> w2e_model::Result<()> {
        self.row(withdrawal.account)?;
        self.staged
            .withdrawals
            .insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    fn insert_task(&mut self, task: &Task) -> w2e_model::Result<()> {
        self.row(task.account)?;
        self.staged
            .tasks
            .insert((task.account, task.token.clone()), task.clone());
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> w2e_model::Result<()> {
        self.insert_task(task)
    }

    fn insert_referral(&mut self, referral: NewReferral) -> w2e_model::Result<Referral> {
        let inviter = self
            .account_by_code(&referral.referrer_code)?
            .ok_or(w2e_model::Error::AccountNotFound)?;
        let id = next_id(&self.store.next_referral);
        let referral = referral.into_referral(id, self.now);
        self.staged.referrals.push((inviter.id, referral.clone()));
        Ok(referral)
    }

    fn claim(&mut self, key: &IdempotencyKey) -> w2e_model::Result<bool> {
        let published = self
            .store
            .idempotency
            .lock()
            .map_err(|_| w2e_model::Error::storage("poisoned idempotency lock"))?
            .contains_key(key.token());
        let staged = self
            .staged
            .claimed
            .iter()
            .any(|record| record.token == key.token());
        if published || staged {
            return Ok(false);
        }
        self.staged
            .claimed
            .push(IdempotencyRecord::new(key, self.now));
        Ok(true)
    }
}
