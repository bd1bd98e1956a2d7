mod common;

use carbonledger::domain::company::BalanceDelta;
use carbonledger::domain::ports::LedgerStore;
use carbonledger::domain::request::{
    NewRequest, Price, RequestPatch, RequestStatus, SettleAction, TradeType,
};
use carbonledger::error::LedgerError;
use common::{seeded_pair, submit, totals};
use rand::Rng;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlements_conserve_totals() {
    let ledger = seeded_pair().await;
    let before = totals(&ledger.store).await;
    let engine = Arc::new(ledger.engine);

    // Requests in both directions over the same pair of companies, so the
    // settlements contend for the same balance rows in both lock orders.
    let mut work = Vec::new();
    let mut rng = rand::thread_rng();
    for i in 0..20 {
        let (requestor, recipient) = if i % 2 == 0 {
            (ledger.a, ledger.b)
        } else {
            (ledger.b, ledger.a)
        };
        let r#type = if rng.gen_bool(0.5) {
            TradeType::Buy
        } else {
            TradeType::Sell
        };
        let action = if rng.gen_bool(0.5) {
            SettleAction::Accept
        } else {
            SettleAction::Reject
        };
        let request = engine
            .create_request(
                NewRequest::new(requestor, recipient, r#type, dec!(3), 2, None).unwrap(),
            )
            .await
            .unwrap();
        work.push((request.id, recipient, action));
    }

    let mut handles = Vec::new();
    for (id, recipient, action) in work.clone() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.settle(id, recipient, action).await
        }));
    }
    for handle in handles {
        // Accepts may legitimately fail on recipient solvency under some
        // interleavings; anything else is a bug.
        match handle.await.unwrap() {
            Ok(_) => {}
            Err(LedgerError::InsufficientBalance { .. }) => {}
            Err(other) => panic!("unexpected settlement error: {other}"),
        }
    }

    assert_eq!(totals(&ledger.store).await, before);

    // Every request reached a decision or is still cleanly pending; none is
    // half-settled.
    for (id, _, _) in work {
        let request = ledger.store.request(id).await.unwrap().unwrap();
        assert!(matches!(
            request.status,
            RequestStatus::Accepted | RequestStatus::Rejected | RequestStatus::Pending
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_settlements_apply_exactly_once() {
    let ledger = seeded_pair().await;
    let engine = Arc::new(ledger.engine);
    let request = engine
        .create_request(
            NewRequest::new(ledger.a, ledger.b, TradeType::Buy, dec!(5), 10, None).unwrap(),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let id = request.id;
        let recipient = ledger.b;
        handles.push(tokio::spawn(async move {
            engine.settle(id, recipient, SettleAction::Accept).await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(LedgerError::AlreadyProcessed) => {}
            Err(other) => panic!("unexpected settlement error: {other}"),
        }
    }
    assert_eq!(ok, 1);

    let b = ledger.store.balance(ledger.b).await.unwrap().unwrap();
    assert_eq!((b.carbon, b.cash), (40, dec!(2050)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_edit_waiting_on_a_settlement_cannot_revive_it() {
    let ledger = seeded_pair().await;
    let request = submit(&ledger, ledger.a, ledger.b, TradeType::Buy, dec!(5), 10).await;
    let engine = Arc::new(ledger.engine);

    // Hold both row locks, standing in for a settlement already in flight.
    let mut tx = ledger.store.begin(ledger.a, ledger.b).await.unwrap();

    let edit = {
        let engine = engine.clone();
        let (id, requestor) = (request.id, ledger.a);
        tokio::spawn(async move {
            let patch = RequestPatch {
                price: Some(Price::new(dec!(1)).unwrap()),
                ..Default::default()
            };
            engine.update_request(id, requestor, patch).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!edit.is_finished());

    // The settlement commits while the edit waits on the locks.
    let mut accepted = tx.request(request.id).await.unwrap().unwrap();
    accepted.status = RequestStatus::Accepted;
    tx.stage_request(accepted);
    tx.stage_delta(ledger.a, BalanceDelta::new(10, dec!(-50)));
    tx.stage_delta(ledger.b, BalanceDelta::new(-10, dec!(50)));
    tx.commit().await.unwrap();

    // The released edit must observe the terminal status, not overwrite it
    // with its stale pending copy.
    let result = edit.await.unwrap();
    assert!(matches!(result, Err(LedgerError::AlreadyProcessed)));

    let stored = ledger.store.request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Accepted);
    assert_eq!(stored.price.value(), dec!(5));

    // And a second accept must not transfer value again.
    let result = engine
        .settle(request.id, ledger.b, SettleAction::Accept)
        .await;
    assert!(matches!(result, Err(LedgerError::AlreadyProcessed)));
    let a = ledger.store.balance(ledger.a).await.unwrap().unwrap();
    assert_eq!((a.carbon, a.cash), (110, dec!(950)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_settlement_racing_a_redirect_is_denied() {
    let ledger = seeded_pair().await;
    let third = ledger
        .store
        .create_company("Carbon Neutral Inc", 10, dec!(500))
        .await
        .unwrap();
    let request = submit(&ledger, ledger.a, ledger.b, TradeType::Buy, dec!(5), 10).await;
    let engine = Arc::new(ledger.engine);

    let mut tx = ledger.store.begin(ledger.a, ledger.b).await.unwrap();
    let settle = {
        let engine = engine.clone();
        let (id, recipient) = (request.id, ledger.b);
        tokio::spawn(async move { engine.settle(id, recipient, SettleAction::Accept).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!settle.is_finished());

    // The request is redirected to a third company while the old recipient's
    // settlement waits on the locks.
    let mut redirected = tx.request(request.id).await.unwrap().unwrap();
    redirected.recipient = third.id;
    tx.stage_request(redirected);
    tx.commit().await.unwrap();

    // The old recipient may no longer settle it, and no balance row it did
    // not lock was touched.
    let result = settle.await.unwrap();
    assert!(matches!(result, Err(LedgerError::Unauthorized)));

    for (company, expected) in [
        (ledger.a, (100, dec!(1000))),
        (ledger.b, (50, dec!(2000))),
        (third.id, (10, dec!(500))),
    ] {
        let balance = ledger.store.balance(company).await.unwrap().unwrap();
        assert_eq!((balance.carbon, balance.cash), expected);
    }
    let stored = ledger.store.request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(stored.recipient, third.id);

    // The new recipient can.
    engine
        .settle(request.id, third.id, SettleAction::Accept)
        .await
        .unwrap();
    let balance = ledger.store.balance(third.id).await.unwrap().unwrap();
    assert_eq!((balance.carbon, balance.cash), (0, dec!(550)));
}
