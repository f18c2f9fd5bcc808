use std::{path::Path, str::FromStr, sync::Mutex, time::Duration};

use rusqlite::{
    named_params, params,
    types::{FromSqlError, Type},
    Connection, OptionalExtension, Row, TransactionBehavior,
};
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};
use w2e_model::{
    Account, AccountId, Amount, Category, CheckinState, ExternalId, IdempotencyKey, Ledger,
    LedgerMut, Network, NewReferral, NewTransaction, NewWithdrawal, Profile, Referral,
    ReferralCode, Task, TaskStatus, TaskToken, Transaction, TransactionId, WithdrawalId,
    WithdrawalRequest, WithdrawalStatus,
};

use super::{Scope, Store, UnitFn, MAX_CODE_ATTEMPTS};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id     INTEGER NOT NULL UNIQUE,
    username        TEXT,
    first_name      TEXT,
    referral_code   TEXT NOT NULL UNIQUE,
    referred_by     TEXT,
    balance         TEXT NOT NULL DEFAULT '0',
    lifetime_earned TEXT NOT NULL DEFAULT '0',
    total_tasks     INTEGER NOT NULL DEFAULT 0,
    checkin_streak  INTEGER NOT NULL DEFAULT 0,
    last_checkin    INTEGER,
    created_at      INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS transactions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id  INTEGER NOT NULL REFERENCES accounts(id),
    amount      TEXT NOT NULL,
    category    TEXT NOT NULL,
    metadata    TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
CREATE TABLE IF NOT EXISTS withdrawals (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id      INTEGER NOT NULL REFERENCES accounts(id),
    amount          TEXT NOT NULL,
    address         TEXT NOT NULL,
    network         TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    processed_at    INTEGER,
    settlement_ref  TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_withdrawals_pending
    ON withdrawals(account_id) WHERE status = 'pending';
CREATE TABLE IF NOT EXISTS tasks (
    account_id    INTEGER NOT NULL REFERENCES accounts(id),
    token         TEXT NOT NULL,
    amount        TEXT NOT NULL,
    status        TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    completed_at  INTEGER,
    PRIMARY KEY (account_id, token)
);
CREATE TABLE IF NOT EXISTS referrals (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    referrer_code  TEXT NOT NULL,
    invitee_id     INTEGER NOT NULL REFERENCES accounts(id),
    bonus          TEXT NOT NULL,
    created_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_referrals_code ON referrals(referrer_code);
CREATE INDEX IF NOT EXISTS idx_referrals_invitee ON referrals(invitee_id);
CREATE TABLE IF NOT EXISTS idempotency (
    token       TEXT PRIMARY KEY,
    endpoint    TEXT NOT NULL,
    first_seen  INTEGER NOT NULL
);
"#;

const ACCOUNT_COLUMNS: &str = "id, external_id, username, first_name, referral_code, \
    referred_by, balance, lifetime_earned, total_tasks, created_at";

const WITHDRAWAL_COLUMNS: &str = "id, account_id, amount, address, network, status, \
    created_at, processed_at, settlement_ref";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`Store`].
///
/// Amounts are stored as decimal text, timestamps as unix seconds and
/// check-in days as julian day numbers. Units run in `IMMEDIATE`
/// transactions on a single connection, so a unit waits for any unit in
/// flight even when their scopes are disjoint. Use [`MemoryStore`] when
/// units on different accounts must not block each other.
///
/// [`MemoryStore`]: super::memory::MemoryStore
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Open an in-memory database.
    pub fn in_memory() -> crate::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> crate::Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> crate::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| crate::Error::Poisoned("connection"))
    }
}

fn conversion_error<E>(idx: usize, ty: Type) -> impl FnOnce(E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |err| rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn get_amount(row: &Row<'_>, idx: usize) -> rusqlite::Result<Amount> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(conversion_error(idx, Type::Text))
}

fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs).map_err(conversion_error(idx, Type::Integer))
}

fn get_time_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    let secs: Option<i64> = row.get(idx)?;
    secs.map(OffsetDateTime::from_unix_timestamp)
        .transpose()
        .map_err(conversion_error(idx, Type::Integer))
}

fn get_tag<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|_| FromSqlError::Other(format!("unknown tag `{text}`").into()))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn get_code(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<ReferralCode>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text.as_deref().and_then(ReferralCode::parse))
}

fn read_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let referral_code = get_code(row, 4)?.ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            Box::new(FromSqlError::Other("malformed referral code".into())),
        )
    })?;
    Ok(Account {
        id: AccountId(row.get(0)?),
        external_id: ExternalId(row.get(1)?),
        username: row.get(2)?,
        first_name: row.get(3)?,
        referral_code,
        referred_by: get_code(row, 5)?,
        balance: get_amount(row, 6)?,
        lifetime_earned: get_amount(row, 7)?,
        total_tasks: row.get(8)?,
        created_at: get_time(row, 9)?,
    })
}

fn read_withdrawal(row: &Row<'_>) -> rusqlite::Result<WithdrawalRequest> {
    let network: String = row.get(4)?;
    Ok(WithdrawalRequest {
        id: WithdrawalId(row.get(0)?),
        account: AccountId(row.get(1)?),
        amount: get_amount(row, 2)?,
        address: row.get(3)?,
        network: Network::new(&network).map_err(conversion_error(4, Type::Text))?,
        status: get_tag::<WithdrawalStatus>(row, 5)?,
        created_at: get_time(row, 6)?,
        processed_at: get_time_opt(row, 7)?,
        settlement_ref: row.get(8)?,
    })
}

fn read_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let metadata: String = row.get(4)?;
    Ok(Transaction {
        id: TransactionId(row.get(0)?),
        account: AccountId(row.get(1)?),
        amount: get_amount(row, 2)?,
        category: get_tag::<Category>(row, 3)?,
        metadata: serde_json::from_str(&metadata).map_err(conversion_error(4, Type::Text))?,
        created_at: get_time(row, 5)?,
    })
}

fn read_referral(row: &Row<'_>) -> rusqlite::Result<Referral> {
    let referrer_code = get_code(row, 1)?.ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            Box::new(FromSqlError::Other("malformed referral code".into())),
        )
    })?;
    Ok(Referral {
        id: row.get(0)?,
        referrer_code,
        invitee: AccountId(row.get(2)?),
        bonus: get_amount(row, 3)?,
        created_at: get_time(row, 4)?,
    })
}

fn read_checkin(row: &Row<'_>) -> rusqlite::Result<CheckinState> {
    let last: Option<i32> = row.get(1)?;
    Ok(CheckinState {
        streak: row.get(0)?,
        last_claim: last
            .map(Date::from_julian_day)
            .transpose()
            .map_err(conversion_error(1, Type::Integer))?,
    })
}

fn query_account(
    conn: &Connection,
    filter: &str,
    param: &dyn rusqlite::ToSql,
) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {filter} = ?1"),
        [param],
        read_account,
    )
    .optional()
}

fn query_withdrawal(
    conn: &Connection,
    id: WithdrawalId,
) -> rusqlite::Result<Option<WithdrawalRequest>> {
    conn.query_row(
        &format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?1"),
        [id.0],
        read_withdrawal,
    )
    .optional()
}

fn query_checkin(conn: &Connection, id: AccountId) -> rusqlite::Result<Option<CheckinState>> {
    conn.query_row(
        "SELECT checkin_streak, last_checkin FROM accounts WHERE id = ?1",
        [id.0],
        read_checkin,
    )
    .optional()
}

impl Store for SqliteStore {
    fn get_or_create(
        &self,
        profile: &Profile,
        referred_by: Option<&ReferralCode>,
        now: OffsetDateTime,
    ) -> crate::Result<Account> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(mut account) =
            query_account(&tx, "external_id", &profile.external_id.0)?
        {
            if account.refresh_profile(profile) {
                tx.execute(
                    "UPDATE accounts SET username = ?1, first_name = ?2 WHERE id = ?3",
                    params![account.username, account.first_name, account.id.0],
                )?;
            }
            tx.commit()?;
            return Ok(account);
        }

        let referred_by = match referred_by {
            Some(code) => query_account(&tx, "referral_code", &code.as_str())?
                .map(|inviter| inviter.referral_code),
            None => None,
        };

        let mut rng = rand::thread_rng();
        let mut code = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = ReferralCode::generate(&mut rng);
            if query_account(&tx, "referral_code", &candidate.as_str())?.is_none() {
                code = Some(candidate);
                break;
            }
        }
        let code = code.ok_or_else(|| w2e_model::Error::storage("referral code space exhausted"))?;

        tx.execute(
            "INSERT INTO accounts
               (external_id, username, first_name, referral_code, referred_by, created_at)
             VALUES (:external_id, :username, :first_name, :code, :referred_by, :created_at)",
            named_params! {
                ":external_id": profile.external_id.0,
                ":username": profile.username,
                ":first_name": profile.first_name,
                ":code": code.as_str(),
                ":referred_by": referred_by.as_ref().map(|c| c.as_str()),
                ":created_at": now.unix_timestamp(),
            },
        )?;
        let id = AccountId(tx.last_insert_rowid() as u64);
        let account = query_account(&tx, "id", &id.0)?
            .ok_or(w2e_model::Error::AccountNotFound)?;
        tx.commit()?;
        Ok(account)
    }

    fn account(&self, id: AccountId) -> crate::Result<Option<Account>> {
        let conn = self.conn()?;
        Ok(query_account(&conn, "id", &id.0)?)
    }

    fn account_by_external_id(&self, external_id: ExternalId) -> crate::Result<Option<Account>> {
        let conn = self.conn()?;
        Ok(query_account(&conn, "external_id", &external_id.0)?)
    }

    fn account_by_code(&self, code: &ReferralCode) -> crate::Result<Option<Account>> {
        let conn = self.conn()?;
        Ok(query_account(&conn, "referral_code", &code.as_str())?)
    }

    fn checkin_state(&self, id: AccountId) -> crate::Result<CheckinState> {
        let conn = self.conn()?;
        Ok(query_checkin(&conn, id)?.unwrap_or_default())
    }

    fn withdrawal(&self, id: WithdrawalId) -> crate::Result<Option<WithdrawalRequest>> {
        let conn = self.conn()?;
        Ok(query_withdrawal(&conn, id)?)
    }

    fn pending_withdrawals(&self, limit: usize) -> crate::Result<Vec<WithdrawalRequest>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals
             WHERE status = 'pending' ORDER BY id DESC LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], read_withdrawal)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn transactions(&self, account: AccountId) -> crate::Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, account_id, amount, category, metadata, created_at
             FROM transactions WHERE account_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([account.0], read_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn referrals(&self, code: &ReferralCode) -> crate::Result<Vec<Referral>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, referrer_code, invitee_id, bonus, created_at
             FROM referrals WHERE referrer_code = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([code.as_str()], read_referral)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn atomically(
        &self,
        scope: &Scope,
        now: OffsetDateTime,
        f: &mut UnitFn<'_>,
    ) -> crate::Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut unit = SqliteUnit {
                conn: &tx,
                scope,
                now,
            };
            // Dropping `tx` without commit rolls back.
            f(&mut unit)?;
        }
        tx.commit()?;
        Ok(())
    }
}

struct SqliteUnit<'a> {
    conn: &'a Connection,
    scope: &'a Scope,
    now: OffsetDateTime,
}

fn db<T>(res: rusqlite::Result<T>) -> w2e_model::Result<T> {
    res.map_err(|err| crate::Error::from(err).into())
}

impl SqliteUnit<'_> {
    fn check_scope(&self, id: AccountId) -> w2e_model::Result<()> {
        if self.scope.contains(&id) {
            Ok(())
        } else {
            Err(w2e_model::Error::OutOfScope(id))
        }
    }
}

impl Ledger for SqliteUnit<'_> {
    fn now(&self) -> OffsetDateTime {
        self.now
    }

    fn account(&self, id: AccountId) -> w2e_model::Result<Account> {
        self.check_scope(id)?;
        db(query_account(self.conn, "id", &id.0))?.ok_or(w2e_model::Error::AccountNotFound)
    }

    fn account_by_code(&self, code: &ReferralCode) -> w2e_model::Result<Option<Account>> {
        let account = db(query_account(self.conn, "referral_code", &code.as_str()))?;
        if let Some(account) = &account {
            self.check_scope(account.id)?;
        }
        Ok(account)
    }

    fn checkin_state(&self, id: AccountId) -> w2e_model::Result<CheckinState> {
        self.check_scope(id)?;
        db(query_checkin(self.conn, id))?.ok_or(w2e_model::Error::AccountNotFound)
    }

    fn pending_withdrawal(&self, id: AccountId) -> w2e_model::Result<Option<WithdrawalRequest>> {
        self.check_scope(id)?;
        db(self
            .conn
            .query_row(
                &format!(
                    "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals
                     WHERE account_id = ?1 AND status = 'pending'"
                ),
                [id.0],
                read_withdrawal,
            )
            .optional())
    }

    fn withdrawal(&self, id: WithdrawalId) -> w2e_model::Result<Option<WithdrawalRequest>> {
        let withdrawal = db(query_withdrawal(self.conn, id))?;
        if let Some(withdrawal) = &withdrawal {
            self.check_scope(withdrawal.account)?;
        }
        Ok(withdrawal)
    }

    fn task(&self, account: AccountId, token: &TaskToken) -> w2e_model::Result<Option<Task>> {
        self.check_scope(account)?;
        db(self
            .conn
            .query_row(
                "SELECT amount, status, created_at, completed_at
                 FROM tasks WHERE account_id = ?1 AND token = ?2",
                params![account.0, token.as_str()],
                |row| {
                    Ok(Task {
                        account,
                        token: token.clone(),
                        amount: get_amount(row, 0)?,
                        status: get_tag::<TaskStatus>(row, 1)?,
                        created_at: get_time(row, 2)?,
                        completed_at: get_time_opt(row, 3)?,
                    })
                },
            )
            .optional())
    }

    fn has_referral_from(&self, invitee: AccountId) -> w2e_model::Result<bool> {
        db(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM referrals WHERE invitee_id = ?1)",
            [invitee.0],
            |row| row.get(0),
        ))
    }
}

impl LedgerMut for SqliteUnit<'_> {
    fn update_account(&mut self, account: &Account) -> w2e_model::Result<()> {
        self.check_scope(account.id)?;
        db(self.conn.execute(
            "UPDATE accounts SET username = :username, first_name = :first_name,
                balance = :balance, lifetime_earned = :lifetime_earned, total_tasks = :total_tasks
             WHERE id = :id",
            named_params! {
                ":username": account.username,
                ":first_name": account.first_name,
                ":balance": account.balance.to_string(),
                ":lifetime_earned": account.lifetime_earned.to_string(),
                ":total_tasks": account.total_tasks,
                ":id": account.id.0,
            },
        ))?;
        Ok(())
    }

    fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> w2e_model::Result<Transaction> {
        self.check_scope(transaction.account)?;
        let metadata = serde_json::to_string(&transaction.metadata)
            .map_err(crate::Error::from)?;
        let category: &'static str = transaction.category.into();
        db(self.conn.execute(
            "INSERT INTO transactions (account_id, amount, category, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                transaction.account.0,
                transaction.amount.to_string(),
                category,
                metadata,
                self.now.unix_timestamp(),
            ],
        ))?;
        let id = TransactionId(self.conn.last_insert_rowid() as u64);
        Ok(transaction.into_transaction(id, self.now))
    }

    fn update_checkin_state(
        &mut self,
        id: AccountId,
        state: &CheckinState,
    ) -> w2e_model::Result<()> {
        self.check_scope(id)?;
        db(self.conn.execute(
            "UPDATE accounts SET checkin_streak = ?1, last_checkin = ?2 WHERE id = ?3",
            params![
                state.streak,
                state.last_claim.map(Date::to_julian_day),
                id.0
            ],
        ))?;
        Ok(())
    }

    fn insert_withdrawal(
        &mut self,
        withdrawal: NewWithdrawal,
    ) -> w2e_model::Result<WithdrawalRequest> {
        self.check_scope(withdrawal.account)?;
        let inserted = self.conn.execute(
            "INSERT INTO withdrawals (account_id, amount, address, network, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![
                withdrawal.account.0,
                withdrawal.amount.to_string(),
                withdrawal.address,
                withdrawal.network.as_str(),
                self.now.unix_timestamp(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(w2e_model::Error::DuplicatePending);
            }
            Err(err) => return db(Err(err)),
        }
        let id = WithdrawalId(self.conn.last_insert_rowid() as u64);
        Ok(withdrawal.into_request(id, self.now))
    }

    fn update_withdrawal(&mut self, withdrawal: &WithdrawalRequest) -> w2e_model::Result<()> {
        self.check_scope(withdrawal.account)?;
        db(self.conn.execute(
            "UPDATE withdrawals SET status = ?1, processed_at = ?2, settlement_ref = ?3
             WHERE id = ?4",
            params![
                withdrawal.status.to_string(),
                withdrawal.processed_at.map(|t| t.unix_timestamp()),
                withdrawal.settlement_ref,
                withdrawal.id.0,
            ],
        ))?;
        Ok(())
    }

    fn insert_task(&mut self, task: &Task) -> w2e_model::Result<()> {
        self.check_scope(task.account)?;
        db(self.conn.execute(
            "INSERT INTO tasks (account_id, token, amount, status, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.account.0,
                task.token.as_str(),
                task.amount.to_string(),
                task.status.to_string(),
                task.created_at.unix_timestamp(),
                task.completed_at.map(|t| t.unix_timestamp()),
            ],
        ))?;
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> w2e_model::Result<()> {
        self.check_scope(task.account)?;
        db(self.conn.execute(
            "UPDATE tasks SET status = ?1, completed_at = ?2 WHERE account_id = ?3 AND token = ?4",
            params![
                task.status.to_string(),
                task.completed_at.map(|t| t.unix_timestamp()),
                task.account.0,
                task.token.as_str(),
            ],
        ))?;
        Ok(())
    }

    fn insert_referral(&mut self, referral: NewReferral) -> w2e_model::Result<Referral> {
        db(self.conn.execute(
            "INSERT INTO referrals (referrer_code, invitee_id, bonus, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                referral.referrer_code.as_str(),
                referral.invitee.0,
                referral.bonus.to_string(),
                self.now.unix_timestamp(),
            ],
        ))?;
        let id = self.conn.last_insert_rowid() as u64;
        Ok(referral.into_referral(id, self.now))
    }

    fn claim(&mut self, key: &IdempotencyKey) -> w2e_model::Result<bool> {
        let endpoint: &'static str = key.endpoint().into();
        let inserted = db(self.conn.execute(
            "INSERT OR IGNORE INTO idempotency (token, endpoint, first_seen) VALUES (?1, ?2, ?3)",
            params![key.token(), endpoint, self.now.unix_timestamp()],
        ))?;
        Ok(inserted == 1)
    }
}
