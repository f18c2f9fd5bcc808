use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::{Date, OffsetDateTime};
use typed_builder::TypedBuilder;
use w2e_model::{
    action::{
        checkin::{CheckinReport, ClaimCheckin},
        reward::{Reward, RewardReport},
        task::{CompleteTask, TaskReport},
        withdrawal::{MarkProcessed, RequestWithdrawal, WithdrawalParams, WithdrawalReport},
    },
    Account, AccountId, Amount, Category, Clock, Endpoint, ExternalId, IdempotencyKey, Ledger,
    LedgerAction, LedgerMut, LedgerMutExt, Profile, ReferralCode, ReferralSummary, RewardPolicy,
    SystemClock, Task, TaskToken, Transaction, WithdrawalId, WithdrawalRequest,
};

use crate::{
    ingest::{PostbackQuery, SharedSecret},
    store::{Scope, Store},
};

/// Default size of the pending withdrawal listing.
pub const DEFAULT_PENDING_LIMIT: usize = 20;

/// The ledger service.
///
/// Every mutating operation runs as one unit of work over the scope of the
/// affected account and its inviter.
#[derive(TypedBuilder)]
pub struct Engine {
    store: Arc<dyn Store>,
    #[builder(default)]
    policy: RewardPolicy,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
    #[builder(default = SharedSecret::new(""))]
    postback_secret: SharedSecret,
}

/// Check-in status of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinStatus {
    /// Current streak.
    pub streak: u8,
    /// Last claimed day.
    pub last_claim: Option<Date>,
    /// Whether a claim is allowed today.
    pub can_claim: bool,
    /// Reward of the next claim.
    pub next_amount: Amount,
}

/// Outcome of a postback.
#[derive(Debug, Clone)]
pub enum PostbackOutcome {
    /// The event id has been seen before.
    Duplicate,
    /// The event is recorded but not billable.
    Unpaid,
    /// The account has been credited.
    Credited(RewardReport),
}

/// Result of a balance audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Account id.
    pub account: AccountId,
    /// Stored balance.
    pub balance: Amount,
    /// Sum of the logged amounts.
    pub ledger_sum: Amount,
    /// Number of logged transactions.
    pub transactions: usize,
}

impl Reconciliation {
    /// Whether the stored balance matches the log.
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

impl Engine {
    /// Get the reward policy.
    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    fn atomically<T>(
        &self,
        scope: &Scope,
        f: impl FnOnce(&mut dyn LedgerMut) -> w2e_model::Result<T>,
    ) -> crate::Result<T> {
        let mut f = Some(f);
        let mut output = None;
        self.store.atomically(scope, self.now(), &mut |unit| {
            let f = f
                .take()
                .ok_or_else(|| w2e_model::Error::storage("unit body invoked twice"))?;
            output = Some(f(unit)?);
            Ok(())
        })?;
        output.ok_or_else(|| w2e_model::Error::storage("unit body not invoked").into())
    }

    fn existing(&self, id: AccountId) -> crate::Result<Account> {
        self.store
            .account(id)?
            .ok_or(crate::Error::Model(w2e_model::Error::AccountNotFound))
    }

    /// The account and its inviter, if any.
    fn scope_of(&self, account: &Account) -> crate::Result<Scope> {
        let inviter = match &account.referred_by {
            Some(code) => self.store.account_by_code(code)?.map(|inviter| inviter.id),
            None => None,
        };
        Ok(Scope::new(account.id).with(inviter))
    }

    /// Claim a client key on behalf of `id`. Client keys are per account.
    fn claim_key(
        unit: &mut dyn LedgerMut,
        id: AccountId,
        key: Option<&IdempotencyKey>,
    ) -> w2e_model::Result<()> {
        match key {
            Some(key) => unit.claim_or_conflict(&key.for_account(id)),
            None => Ok(()),
        }
    }

    /// Get the account of a verified identity, creating it if absent.
    ///
    /// `start_param` is the referral code of the invite link, ignored unless
    /// it resolves to an existing account.
    pub fn get_or_create(
        &self,
        profile: &Profile,
        start_param: Option<&str>,
    ) -> crate::Result<Account> {
        let code = start_param.and_then(ReferralCode::parse);
        let account = self.store.get_or_create(profile, code.as_ref(), self.now())?;
        tracing::debug!(
            account = %account.id,
            external_id = %account.external_id,
            "resolved account"
        );
        Ok(account)
    }

    /// Get an account.
    pub fn account(&self, id: AccountId) -> crate::Result<Account> {
        self.existing(id)
    }

    /// Find an account by external id.
    pub fn account_by_external_id(&self, external_id: ExternalId) -> crate::Result<Account> {
        self.store
            .account_by_external_id(external_id)?
            .ok_or(crate::Error::Model(w2e_model::Error::AccountNotFound))
    }

    /// Credit an account, running the referral cascade for reward categories.
    pub fn credit(
        &self,
        id: AccountId,
        amount: Amount,
        category: Category,
        metadata: Value,
    ) -> crate::Result<Transaction> {
        let account = self.existing(id)?;
        let scope = self.scope_of(&account)?;
        let referral = self.policy.referral();
        let transaction = self.atomically(&scope, |unit| {
            let posting = unit.credit(id, amount, category, metadata)?;
            unit.cascade_referral(&posting.account, &amount, category, referral)?;
            Ok(posting.transaction)
        })?;
        tracing::info!(account = %id, %amount, %category, "credited");
        Ok(transaction)
    }

    /// Debit an account.
    pub fn debit(
        &self,
        id: AccountId,
        amount: Amount,
        metadata: Value,
    ) -> crate::Result<Transaction> {
        let transaction = self.atomically(&Scope::new(id), |unit| {
            Ok(unit.debit(id, amount, metadata)?.transaction)
        })?;
        tracing::info!(account = %id, %amount, "debited");
        Ok(transaction)
    }

    /// Increment the completed-task counter.
    pub fn increment_task_count(&self, id: AccountId) -> crate::Result<u64> {
        self.atomically(&Scope::new(id), |unit| unit.increment_task_count(id))
    }

    /// Check-in status of an account.
    pub fn checkin_status(&self, id: AccountId) -> crate::Result<CheckinStatus> {
        self.existing(id)?;
        let state = self.store.checkin_state(id)?;
        let today = self.clock.today();
        Ok(CheckinStatus {
            streak: state.streak,
            last_claim: state.last_claim,
            can_claim: state.can_claim(today),
            next_amount: self
                .policy
                .checkin_reward(state.next_claim_streak(today) - 1),
        })
    }

    /// Claim the daily check-in reward.
    pub fn claim_checkin(
        &self,
        id: AccountId,
        key: Option<&IdempotencyKey>,
    ) -> crate::Result<CheckinReport> {
        let account = self.existing(id)?;
        let scope = self.scope_of(&account)?;
        let report = self.atomically(&scope, |unit| {
            Self::claim_key(unit, id, key)?;
            ClaimCheckin::new(unit, id, &self.policy).execute()
        })?;
        tracing::info!(
            account = %id,
            streak = report.streak(),
            amount = %report.amount(),
            "check-in claimed"
        );
        Ok(report)
    }

    /// Issue a pending task.
    pub fn start_task(&self, id: AccountId) -> crate::Result<Task> {
        let token = TaskToken::generate(&mut rand::thread_rng());
        let task = Task::issue(id, token, self.policy.task_reward(), self.now());
        self.atomically(&Scope::new(id), |unit| {
            unit.account(id)?;
            unit.insert_task(&task)
        })?;
        tracing::debug!(account = %id, token = %task.token, "task issued");
        Ok(task)
    }

    /// Complete a pending task.
    pub fn complete_task(
        &self,
        id: AccountId,
        token: TaskToken,
        key: Option<&IdempotencyKey>,
    ) -> crate::Result<TaskReport> {
        let account = self.existing(id)?;
        let scope = self.scope_of(&account)?;
        let report = self.atomically(&scope, |unit| {
            Self::claim_key(unit, id, key)?;
            CompleteTask::new(unit, id, token, &self.policy).execute()
        })?;
        tracing::info!(account = %id, amount = %report.reward().amount(), "task completed");
        Ok(report)
    }

    /// Pay the one-time follow reward.
    ///
    /// `is_member` is the answer of the channel-membership oracle.
    pub fn claim_follow(&self, id: AccountId, is_member: bool) -> crate::Result<RewardReport> {
        if !is_member {
            return Err(w2e_model::Error::NotChannelMember.into());
        }
        let account = self.existing(id)?;
        let scope = self.scope_of(&account)?;
        let key = IdempotencyKey::follow(id);
        let report = self.atomically(&scope, |unit| {
            unit.claim_or_conflict(&key)?;
            Reward::try_new(
                unit,
                id,
                self.policy.follow_reward(),
                Category::FollowReward,
                self.policy.referral(),
            )?
            .metadata(json!({ "reason": "follow_channel" }))
            .execute()
        })?;
        tracing::info!(account = %id, amount = %report.amount(), "follow reward paid");
        Ok(report)
    }

    /// Request a withdrawal.
    pub fn request_withdrawal(
        &self,
        id: AccountId,
        params: WithdrawalParams,
        key: Option<&IdempotencyKey>,
    ) -> crate::Result<WithdrawalReport> {
        let report = self.atomically(&Scope::new(id), |unit| {
            Self::claim_key(unit, id, key)?;
            RequestWithdrawal::new(unit, id, params, &self.policy).execute()
        });
        match &report {
            Ok(report) => tracing::info!(
                account = %id,
                withdrawal = %report.request().id,
                amount = %report.request().amount,
                "withdrawal requested"
            ),
            Err(err) => tracing::debug!(account = %id, %err, "withdrawal rejected"),
        }
        report
    }

    /// Mark a pending withdrawal as processed.
    pub fn mark_processed(
        &self,
        id: WithdrawalId,
        settlement_ref: &str,
    ) -> crate::Result<WithdrawalRequest> {
        let owner = self
            .store
            .withdrawal(id)?
            .ok_or(w2e_model::Error::NotFoundOrNotPending(id))?
            .account;
        let request = self.atomically(&Scope::new(owner), |unit| {
            MarkProcessed::try_new(unit, id, settlement_ref)?.execute()
        })?;
        tracing::info!(withdrawal = %id, account = %owner, "withdrawal processed");
        Ok(request)
    }

    /// List pending withdrawals, newest first.
    pub fn pending_withdrawals(
        &self,
        limit: Option<usize>,
    ) -> crate::Result<Vec<WithdrawalRequest>> {
        self.store
            .pending_withdrawals(limit.unwrap_or(DEFAULT_PENDING_LIMIT))
    }

    /// Ingest an ad-network postback.
    ///
    /// Duplicates are reported as [`PostbackOutcome::Duplicate`], not as errors.
    pub fn ingest_postback(&self, query: PostbackQuery) -> crate::Result<PostbackOutcome> {
        self.postback_secret.verify(query.token.as_deref())?;
        let event = query.into_event()?;
        let key = IdempotencyKey::new(Endpoint::Postback, &event.event_id)?;

        let account = if event.paid {
            Some(
                self.store
                    .get_or_create(&Profile::bare(event.external_id), None, self.now())?,
            )
        } else {
            self.store.account_by_external_id(event.external_id)?
        };
        let scope = match &account {
            Some(account) => self.scope_of(account)?,
            None => Scope::default(),
        };

        let amount = if event.amount > Amount::ZERO {
            event.amount
        } else {
            self.policy.task_reward()
        };
        let outcome = self.atomically(&scope, |unit| {
            if !unit.claim(&key)? {
                return Ok(PostbackOutcome::Duplicate);
            }
            let Some(account) = account.as_ref().filter(|_| event.paid) else {
                return Ok(PostbackOutcome::Unpaid);
            };
            let report = Reward::try_new(
                unit,
                account.id,
                amount,
                Category::ExternalPostback,
                self.policy.referral(),
            )?
            .count_task(true)
            .metadata(json!({
                "source": "monetag",
                "reqid": event.event_id,
                "raw": event.raw,
            }))
            .execute()?;
            Ok(PostbackOutcome::Credited(report))
        });
        // A racing delivery of the same event published its claim first.
        let outcome = match outcome {
            Err(crate::Error::Model(w2e_model::Error::DuplicateRequest)) => {
                PostbackOutcome::Duplicate
            }
            outcome => outcome?,
        };

        match &outcome {
            PostbackOutcome::Duplicate => {
                tracing::warn!(reqid = %event.event_id, "duplicate postback ignored")
            }
            PostbackOutcome::Unpaid => {
                tracing::debug!(reqid = %event.event_id, "unpaid postback recorded")
            }
            PostbackOutcome::Credited(report) => tracing::info!(
                reqid = %event.event_id,
                account = %report.account().id,
                amount = %report.amount(),
                "postback credited"
            ),
        }
        Ok(outcome)
    }

    /// Referral statistics of an account.
    pub fn referral_summary(&self, id: AccountId) -> crate::Result<ReferralSummary> {
        let account = self.existing(id)?;
        let records = self.store.referrals(&account.referral_code)?;
        Ok(ReferralSummary::from_records(
            account.referral_code,
            &records,
        ))
    }

    /// Transactions of an account, oldest first.
    pub fn transactions(&self, id: AccountId) -> crate::Result<Vec<Transaction>> {
        self.store.transactions(id)
    }

    /// Audit the balance of an account against its transaction log.
    pub fn reconcile(&self, id: AccountId) -> crate::Result<Reconciliation> {
        let account = self.existing(id)?;
        let transactions = self.store.transactions(id)?;
        let reconciliation = Reconciliation {
            account: id,
            balance: account.balance,
            ledger_sum: transactions.iter().map(|tx| tx.amount).sum(),
            transactions: transactions.len(),
        };
        if !reconciliation.is_consistent() {
            tracing::warn!(
                account = %id,
                balance = %reconciliation.balance,
                ledger_sum = %reconciliation.ledger_sum,
                "balance does not match the transaction log"
            );
        }
        Ok(reconciliation)
    }
}
