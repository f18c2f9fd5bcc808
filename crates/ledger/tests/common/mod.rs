#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal_macros::dec;
use serde_json::Value;
use tracing::{level_filters::LevelFilter, subscriber::set_default};
use tracing_subscriber::EnvFilter;
use w2e_ledger::{Engine, MemoryStore, PostbackQuery, SharedSecret, SqliteStore, Store};
use w2e_model::{
    test::ManualClock, Account, AccountId, Amount, Category, ExternalId, Profile, RewardPolicy,
};

pub const SECRET: &str = "s3cret";

pub fn setup_fmt_tracing() -> impl Drop {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_test_writer()
        .finish();
    set_default(subscriber)
}

/// Every store implementation, freshly created.
pub fn stores() -> Vec<(&'static str, Arc<dyn Store>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        (
            "sqlite",
            Arc::new(SqliteStore::in_memory().expect("open sqlite")),
        ),
    ]
}

pub struct Harness {
    pub name: &'static str,
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn all() -> Vec<Self> {
        Self::with_policy(RewardPolicy::default())
    }

    pub fn with_policy(policy: RewardPolicy) -> Vec<Self> {
        stores()
            .into_iter()
            .map(|(name, store)| {
                let clock = Arc::new(ManualClock::default());
                let engine = Engine::builder()
                    .store(store)
                    .policy(policy.clone())
                    .clock(clock.clone())
                    .postback_secret(SharedSecret::new(SECRET))
                    .build();
                Self {
                    name,
                    engine: Arc::new(engine),
                    clock,
                }
            })
            .collect()
    }

    pub fn account(&self, external_id: i64, start_param: Option<&str>) -> Account {
        self.engine
            .get_or_create(&Profile::bare(ExternalId(external_id)), start_param)
            .expect("create account")
    }

    pub fn fund(&self, id: AccountId, amount: Amount) {
        self.engine
            .credit(id, amount, Category::TaskCredit, Value::Null)
            .expect("fund account");
    }

    pub fn balance(&self, id: AccountId) -> Amount {
        self.engine.account(id).expect("account").balance
    }

    pub fn assert_consistent(&self, id: AccountId) {
        let reconciliation = self.engine.reconcile(id).expect("reconcile");
        assert!(
            reconciliation.is_consistent(),
            "[{}] {reconciliation:?}",
            self.name
        );
        assert!(reconciliation.balance >= dec!(0), "[{}] negative", self.name);
    }
}

pub fn postback(reqid: &str, telegram_id: i64, price: &str, paid: bool) -> PostbackQuery {
    PostbackQuery {
        token: Some(SECRET.to_string()),
        reqid: Some(reqid.to_string()),
        telegram_id: Some(telegram_id.to_string()),
        estimated_price: Some(price.to_string()),
        is_paid: Some(if paid { "1" } else { "0" }.to_string()),
        ..Default::default()
    }
}
