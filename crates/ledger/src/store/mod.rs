use std::collections::BTreeSet;

use time::OffsetDateTime;
use w2e_model::{
    Account, AccountId, CheckinState, ExternalId, LedgerMut, Profile, Referral, ReferralCode,
    Transaction, WithdrawalId, WithdrawalRequest,
};

/// In-memory store.
pub mod memory;

/// SQLite store.
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Maximum attempts to generate an unused referral code.
pub(crate) const MAX_CODE_ATTEMPTS: usize = 16;

/// The set of accounts a unit of work may touch.
///
/// Stores serialize units whose scopes overlap and must not block units
/// whose scopes are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope(BTreeSet<AccountId>);

impl Scope {
    /// Create a scope of one account.
    pub fn new(account: AccountId) -> Self {
        Self(BTreeSet::from([account]))
    }

    /// Add an account to the scope.
    pub fn with(mut self, account: impl Into<Option<AccountId>>) -> Self {
        if let Some(account) = account.into() {
            self.0.insert(account);
        }
        self
    }

    /// Whether the scope contains `account`.
    pub fn contains(&self, account: &AccountId) -> bool {
        self.0.contains(account)
    }

    /// Accounts in ascending order, the order in which locks are taken.
    pub fn iter(&self) -> impl Iterator<Item = &AccountId> {
        self.0.iter()
    }
}

/// A unit-of-work body.
pub type UnitFn<'a> = dyn FnMut(&mut dyn LedgerMut) -> w2e_model::Result<()> + 'a;

/// Durable store of the ledger.
pub trait Store: Send + Sync {
    /// Get the account of `profile`, creating it if absent.
    ///
    /// Display fields of an existing account are refreshed; its referral
    /// linkage never changes. A new account is linked to `referred_by` only
    /// if the code belongs to an existing account.
    fn get_or_create(
        &self,
        profile: &Profile,
        referred_by: Option<&ReferralCode>,
        now: OffsetDateTime,
    ) -> crate::Result<Account>;

    /// Get an account.
    fn account(&self, id: AccountId) -> crate::Result<Option<Account>>;

    /// Find an account by external id.
    fn account_by_external_id(&self, external_id: ExternalId) -> crate::Result<Option<Account>>;

    /// Find an account by referral code.
    fn account_by_code(&self, code: &ReferralCode) -> crate::Result<Option<Account>>;

    /// Get the check-in state of an account.
    fn checkin_state(&self, id: AccountId) -> crate::Result<CheckinState>;

    /// Get a withdrawal.
    fn withdrawal(&self, id: WithdrawalId) -> crate::Result<Option<WithdrawalRequest>>;

    /// List pending withdrawals, newest first.
    fn pending_withdrawals(&self, limit: usize) -> crate::Result<Vec<WithdrawalRequest>>;

    /// List the transactions of an account, oldest first.
    fn transactions(&self, account: AccountId) -> crate::Result<Vec<Transaction>>;

    /// List the referral records paid to the owner of `code`.
    fn referrals(&self, code: &ReferralCode) -> crate::Result<Vec<Referral>>;

    /// Run `f` as one atomic unit over the accounts of `scope`.
    ///
    /// Every write of the unit, idempotency claims included, is committed if
    /// `f` returns `Ok` and discarded otherwise.
    fn atomically(
        &self,
        scope: &Scope,
        now: OffsetDateTime,
        f: &mut UnitFn<'_>,
    ) -> crate::Result<()>;
}
