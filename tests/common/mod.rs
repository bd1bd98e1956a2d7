#![allow(dead_code)]

use carbonledger::application::engine::SettlementEngine;
use carbonledger::domain::company::{CompanyBalance, CompanyId};
use carbonledger::domain::ports::LedgerStore;
use carbonledger::domain::request::{NewRequest, TradeRequest, TradeType};
use carbonledger::infrastructure::in_memory::InMemoryLedgerStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// An engine over a fresh in-memory store, with a second handle to the same
/// store for direct balance assertions.
pub struct TestLedger {
    pub engine: SettlementEngine,
    pub store: InMemoryLedgerStore,
    pub a: CompanyId,
    pub b: CompanyId,
}

/// Two companies: A with 100 credits / 1000 cash, B with 50 credits / 2000 cash.
pub async fn seeded_pair() -> TestLedger {
    let store = InMemoryLedgerStore::new();
    let a = store
        .create_company("Green Energy Corp", 100, dec!(1000))
        .await
        .unwrap();
    let b = store
        .create_company("Eco Solutions Ltd", 50, dec!(2000))
        .await
        .unwrap();
    TestLedger {
        engine: SettlementEngine::new(Box::new(store.clone())),
        store,
        a: a.id,
        b: b.id,
    }
}

pub async fn submit(
    ledger: &TestLedger,
    requestor: CompanyId,
    recipient: CompanyId,
    r#type: TradeType,
    price: Decimal,
    quantity: i64,
) -> TradeRequest {
    ledger
        .engine
        .create_request(NewRequest::new(requestor, recipient, r#type, price, quantity, None).unwrap())
        .await
        .unwrap()
}

pub async fn balance_of(ledger: &TestLedger, company: CompanyId) -> CompanyBalance {
    ledger.store.balance(company).await.unwrap().unwrap()
}

/// System-wide (carbon, cash) totals across all companies.
pub async fn totals(store: &InMemoryLedgerStore) -> (i64, Decimal) {
    let mut carbon = 0;
    let mut cash = Decimal::ZERO;
    for company in store.companies().await.unwrap() {
        let balance = store.balance(company.id).await.unwrap().unwrap();
        carbon += balance.carbon;
        cash += balance.cash;
    }
    (carbon, cash)
}
