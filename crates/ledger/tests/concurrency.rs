mod common;

use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use common::{postback, setup_fmt_tracing, Harness};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal_macros::dec;
use serde_json::Value;
use w2e_ledger::{engine::PostbackOutcome, MemoryStore, Scope, SqliteStore, Store};
use w2e_model::{
    action::withdrawal::WithdrawalParams, test::ManualClock, Category, Clock, Endpoint, ErrorKind,
    IdempotencyKey,
};

const ADDRESS: &str = "0x00112233445566778899aabbccddeeff00112233";
const THREADS: usize = 8;

#[test]
fn concurrent_full_balance_withdrawals() {
    let _guard = setup_fmt_tracing();
    for h in Harness::all() {
        let account = h.account(1, None);
        h.fund(account.id, dec!(1.2));

        let results = thread::scope(|s| {
            let handles = (0..THREADS)
                .map(|_| {
                    let engine = &h.engine;
                    s.spawn(move || {
                        let params = WithdrawalParams::builder().address(ADDRESS).build();
                        engine.request_withdrawal(account.id, params, None)
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread panicked"))
                .collect::<Vec<_>>()
        });

        let succeeded = results.iter().filter(|res| res.is_ok()).count();
        assert_eq!(succeeded, 1, "[{}]", h.name);
        for err in results.iter().filter_map(|res| res.as_ref().err()) {
            assert!(
                matches!(err.kind(), ErrorKind::Conflict | ErrorKind::InsufficientBalance),
                "[{}] unexpected error: {err}",
                h.name
            );
        }
        assert_eq!(h.balance(account.id), dec!(0));
        assert_eq!(h.engine.pending_withdrawals(None).expect("list").len(), 1);
        h.assert_consistent(account.id);
    }
}

#[test]
fn concurrent_duplicate_postbacks() {
    for h in Harness::all() {
        let outcomes = thread::scope(|s| {
            let handles = (0..THREADS)
                .map(|_| {
                    let engine = &h.engine;
                    s.spawn(move || engine.ingest_postback(postback("evt-1", 9, "0.25", true)))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread panicked"))
                .collect::<Vec<_>>()
        });

        let credited = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Ok(PostbackOutcome::Credited(_))))
            .count();
        let duplicates = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Ok(PostbackOutcome::Duplicate)))
            .count();
        assert_eq!(credited, 1, "[{}]", h.name);
        assert_eq!(duplicates, THREADS - 1, "[{}]", h.name);

        let account = h
            .engine
            .account_by_external_id(w2e_model::ExternalId(9))
            .expect("account");
        assert_eq!(account.balance, dec!(0.25));
        assert_eq!(account.total_tasks, 1);
    }
}

#[test]
fn concurrent_credits_do_not_lose_updates() {
    for h in Harness::all() {
        let inviter = h.account(1, None);
        let invitees = (2..2 + THREADS as i64)
            .map(|id| h.account(id, Some(inviter.referral_code.as_str())))
            .collect::<Vec<_>>();

        thread::scope(|s| {
            for invitee in &invitees {
                let engine = &h.engine;
                s.spawn(move || {
                    for _ in 0..10 {
                        engine
                            .credit(invitee.id, dec!(0.1), Category::TaskCredit, Value::Null)
                            .expect("credit");
                    }
                });
            }
        });

        for invitee in &invitees {
            assert_eq!(h.balance(invitee.id), dec!(1), "[{}]", h.name);
            h.assert_consistent(invitee.id);
        }
        assert_eq!(h.balance(inviter.id), dec!(0.8), "[{}]", h.name);
        h.assert_consistent(inviter.id);
    }
}

#[test]
fn disjoint_units_do_not_block() -> w2e_ledger::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::default();
    let profile = |id| w2e_model::Profile::bare(w2e_model::ExternalId(id));
    let a = store.get_or_create(&profile(1), None, clock.now())?;
    let b = store.get_or_create(&profile(2), None, clock.now())?;

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    thread::scope(|s| -> w2e_ledger::Result<()> {
        let holder = {
            let store = store.clone();
            let now = clock.now();
            s.spawn(move || {
                store.atomically(&Scope::new(a.id), now, &mut |_| {
                    entered_tx
                        .send(())
                        .map_err(|_| w2e_model::Error::storage("send"))?;
                    release_rx
                        .recv_timeout(Duration::from_secs(5))
                        .map_err(|_| w2e_model::Error::storage("held unit timed out"))
                })
            })
        };

        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("holder entered its unit");
        store.atomically(&Scope::new(b.id), clock.now(), &mut |unit| {
            use w2e_model::LedgerMutExt;
            unit.credit(b.id, dec!(1), Category::TaskCredit, Value::Null)?;
            Ok(())
        })?;
        release_tx.send(()).expect("holder is waiting");
        holder.join().expect("thread panicked")
    })?;

    let b = store.account(b.id)?.expect("account b");
    assert_eq!(b.balance, dec!(1));
    Ok(())
}

#[test]
fn sqlite_units_wait_for_each_other() -> w2e_ledger::Result<()> {
    let store = Arc::new(SqliteStore::in_memory()?);
    let clock = ManualClock::default();
    let profile = |id| w2e_model::Profile::bare(w2e_model::ExternalId(id));
    let a = store.get_or_create(&profile(1), None, clock.now())?;
    let b = store.get_or_create(&profile(2), None, clock.now())?;

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();

    thread::scope(|s| -> w2e_ledger::Result<()> {
        let holder = {
            let store = store.clone();
            let now = clock.now();
            s.spawn(move || {
                store.atomically(&Scope::new(a.id), now, &mut |_| {
                    entered_tx
                        .send(())
                        .map_err(|_| w2e_model::Error::storage("send"))?;
                    release_rx
                        .recv_timeout(Duration::from_secs(5))
                        .map_err(|_| w2e_model::Error::storage("held unit timed out"))
                })
            })
        };
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("holder entered its unit");

        let waiter = {
            let store = store.clone();
            let now = clock.now();
            s.spawn(move || {
                let res = store.atomically(&Scope::new(b.id), now, &mut |unit| {
                    use w2e_model::LedgerMutExt;
                    unit.credit(b.id, dec!(1), Category::TaskCredit, Value::Null)?;
                    Ok(())
                });
                done_tx.send(()).expect("main thread is waiting");
                res
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

        release_tx.send(()).expect("holder is waiting");
        holder.join().expect("thread panicked")?;
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("waiter finished");
        waiter.join().expect("thread panicked")
    })?;

    let b = store.account(b.id)?.expect("account b");
    assert_eq!(b.balance, dec!(1));
    Ok(())
}

/// Run a unit over `scope` that claims `key`, signals `entered`, then waits
/// for `release` and commits (`true`) or rolls back (`false`).
fn held_claim(
    store: &MemoryStore,
    scope: Scope,
    key: &IdempotencyKey,
    entered: mpsc::Sender<bool>,
    release: mpsc::Receiver<bool>,
) -> w2e_ledger::Result<()> {
    let now = ManualClock::default().now();
    store.atomically(&scope, now, &mut |unit| {
        let claimed = unit.claim(key)?;
        entered
            .send(claimed)
            .map_err(|_| w2e_model::Error::storage("send"))?;
        let commit = release
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| w2e_model::Error::storage("held unit timed out"))?;
        if commit {
            Ok(())
        } else {
            Err(w2e_model::Error::storage("rolled back"))
        }
    })
}

#[test]
fn rolled_back_claims_are_never_visible() -> w2e_ledger::Result<()> {
    let store = MemoryStore::new();
    let key = IdempotencyKey::new(Endpoint::Postback, "evt-race")?;
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();

    thread::scope(|s| -> w2e_ledger::Result<()> {
        let holder =
            s.spawn(|| held_claim(&store, Scope::default(), &key, entered_tx, release_rx));
        assert!(entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("holder entered its unit"));

        // The holder's claim is not committed, so a racing unit may claim.
        let now = ManualClock::default().now();
        store.atomically(&Scope::default(), now, &mut |unit| {
            assert!(unit.claim(&key)?);
            Ok(())
        })?;

        release_tx.send(false).expect("holder is waiting");
        let err = holder.join().expect("thread panicked").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        Ok(())
    })?;

    // The rollback did not take the committed claim with it.
    let now = ManualClock::default().now();
    store.atomically(&Scope::default(), now, &mut |unit| {
        assert!(!unit.claim(&key)?);
        Ok(())
    })?;
    Ok(())
}

#[test]
fn the_later_of_two_racing_claims_fails() -> w2e_ledger::Result<()> {
    let store = MemoryStore::new();
    let key = IdempotencyKey::new(Endpoint::Postback, "evt-race")?;
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();

    thread::scope(|s| -> w2e_ledger::Result<()> {
        let holder =
            s.spawn(|| held_claim(&store, Scope::default(), &key, entered_tx, release_rx));
        assert!(entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("holder entered its unit"));

        let now = ManualClock::default().now();
        store.atomically(&Scope::default(), now, &mut |unit| {
            assert!(unit.claim(&key)?);
            Ok(())
        })?;

        release_tx.send(true).expect("holder is waiting");
        let err = holder.join().expect("thread panicked").unwrap_err();
        assert_eq!(err.tag(), "duplicate_request");
        Ok(())
    })
}

#[test]
fn random_operations_keep_the_ledger_consistent() {
    let _guard = setup_fmt_tracing();
    for h in Harness::all() {
        let mut rng = StdRng::seed_from_u64(42);
        let inviter = h.account(1, None);
        let inviter_code = inviter.referral_code.clone();
        let accounts = (2..6)
            .map(|id| h.account(id, Some(inviter_code.as_str())))
            .chain(Some(inviter))
            .collect::<Vec<_>>();

        for step in 0..200 {
            let account = &accounts[rng.gen_range(0, accounts.len())];
            // Rejections are expected; only the invariants matter here.
            let _ = match rng.gen_range(0, 6) {
                0 => h.engine.claim_checkin(account.id, None).map(drop),
                1 => h
                    .engine
                    .ingest_postback(postback(
                        &format!("evt-{}", rng.gen_range(0, 50)),
                        account.external_id.0,
                        "0.05",
                        rng.gen_bool(0.8),
                    ))
                    .map(drop),
                2 => {
                    let params = WithdrawalParams::builder()
                        .address(ADDRESS)
                        .amount(dec!(1))
                        .build();
                    h.engine
                        .request_withdrawal(account.id, params, None)
                        .map(drop)
                }
                3 => h
                    .engine
                    .debit(account.id, dec!(0.03), Value::Null)
                    .map(drop),
                4 => h
                    .engine
                    .start_task(account.id)
                    .and_then(|task| h.engine.complete_task(account.id, task.token, None))
                    .map(drop),
                _ => {
                    h.clock.advance(time::Duration::hours(rng.gen_range(1, 30)));
                    Ok(())
                }
            };
            if step % 20 == 0 {
                for account in &accounts {
                    h.assert_consistent(account.id);
                }
            }
        }
        for account in &accounts {
            h.assert_consistent(account.id);
        }
    }
}
