use rust_decimal_macros::dec;
use serde_json::Value;
use time::Duration;
use w2e_model::{
    action::{checkin::ClaimCheckin, reward::Reward, withdrawal::*},
    test::TestLedger,
    Category, Ledger, LedgerAction, LedgerMutExt, RewardPolicy,
};

const ADDRESS: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

#[test]
fn test_balance_equals_ledger_sum() -> w2e_model::Result<()> {
    let mut ledger = TestLedger::default();
    let policy = RewardPolicy::default();
    let inviter = ledger.create_account(1, None);
    let invitee = ledger.create_account(2, Some(&inviter.referral_code));

    for day in 0..10 {
        ClaimCheckin::new(&mut ledger, invitee.id, &policy).execute()?;
        Reward::try_new(
            &mut ledger,
            invitee.id,
            dec!(0.0137),
            Category::ExternalPostback,
            policy.referral(),
        )?
        .count_task(true)
        .execute()?;
        if day % 3 == 0 {
            ledger.advance(Duration::days(2));
        } else {
            ledger.advance(Duration::days(1));
        }
    }

    let params = WithdrawalParams::builder()
        .address(ADDRESS)
        .amount(dec!(0.5))
        .build();
    let _ = ledger.atomically(|ledger| {
        RequestWithdrawal::new(ledger, invitee.id, params, &policy).execute()
    });

    for account in [inviter.id, invitee.id] {
        let stored = ledger.account(account)?;
        assert_eq!(stored.balance, ledger.ledger_sum(account));
        assert!(stored.balance >= dec!(0));
        assert!(stored.lifetime_earned >= stored.balance);
    }
    assert_eq!(ledger.account(invitee.id)?.total_tasks, 10);
    assert_eq!(ledger.referrals().len(), 10);
    assert_eq!(ledger.balance_of(inviter.id), dec!(0.00137) * dec!(10));
    Ok(())
}

#[test]
fn test_failed_unit_leaves_no_trace() -> w2e_model::Result<()> {
    let mut ledger = TestLedger::default();
    let account = ledger.create_account(1, None);
    ledger.credit(account.id, dec!(2), Category::TaskCredit, Value::Null)?;

    let before = ledger.clone();
    let res = ledger.atomically(|ledger| {
        ledger.debit(account.id, dec!(1), Value::Null)?;
        ledger.debit(account.id, dec!(1.5), Value::Null)
    });
    assert!(res.is_err());
    assert_eq!(ledger.balance_of(account.id), before.balance_of(account.id));
    assert_eq!(
        ledger.transactions_of(account.id).len(),
        before.transactions_of(account.id).len()
    );
    Ok(())
}
