use crate::domain::company::{BalanceDelta, Company, CompanyBalance, CompanyId};
use crate::domain::ports::{LedgerStore, SettlementTx};
use crate::domain::request::{
    NewRequest, RequestId, RequestStatus, RequestView, TradeRequest,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
struct LedgerState {
    companies: HashMap<CompanyId, Company>,
    balances: HashMap<CompanyId, CompanyBalance>,
    requests: HashMap<RequestId, TradeRequest>,
    next_company_id: u64,
    next_request_id: u64,
}

/// A thread-safe in-memory ledger store.
///
/// Rows live in `Arc<RwLock<..>>` maps shared across clones. Settlement
/// atomicity comes from per-company row locks handed out by `begin`: staged
/// writes only touch the maps on commit, under a single write guard, so a
/// transaction that fails or is dropped leaves the committed state unchanged.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    row_locks: Arc<Mutex<HashMap<CompanyId, Arc<Mutex<()>>>>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    fn view(request: &TradeRequest, counterparty: &Company) -> RequestView {
        RequestView {
            request: request.clone(),
            counterparty: counterparty.name.clone(),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_company(&self, name: &str, carbon: i64, cash: Decimal) -> Result<Company> {
        let mut state = self.state.write().await;
        if state.companies.values().any(|c| c.name == name) {
            return Err(LedgerError::ValidationError(format!(
                "Company name already exists: {name}"
            )));
        }
        state.next_company_id += 1;
        let id = CompanyId(state.next_company_id);
        let company = Company {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.companies.insert(id, company.clone());
        state
            .balances
            .insert(id, CompanyBalance::new(id, carbon, cash));
        Ok(company)
    }

    async fn company(&self, id: CompanyId) -> Result<Option<Company>> {
        let state = self.state.read().await;
        Ok(state.companies.get(&id).cloned())
    }

    async fn company_by_name(&self, name: &str) -> Result<Option<Company>> {
        let state = self.state.read().await;
        Ok(state.companies.values().find(|c| c.name == name).cloned())
    }

    async fn companies(&self) -> Result<Vec<Company>> {
        let state = self.state.read().await;
        let mut companies: Vec<Company> = state.companies.values().cloned().collect();
        companies.sort_by_key(|c| c.id);
        Ok(companies)
    }

    async fn balance(&self, id: CompanyId) -> Result<Option<CompanyBalance>> {
        let state = self.state.read().await;
        Ok(state.balances.get(&id).cloned())
    }

    async fn insert_request(&self, new: NewRequest) -> Result<TradeRequest> {
        let mut state = self.state.write().await;
        state.next_request_id += 1;
        let now = Utc::now();
        let request = TradeRequest {
            id: RequestId(state.next_request_id),
            requestor: new.requestor,
            recipient: new.recipient,
            r#type: new.r#type,
            price: new.price,
            quantity: new.quantity,
            reason: new.reason,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn request(&self, id: RequestId) -> Result<Option<TradeRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id).cloned())
    }

    async fn delete_request(&self, id: RequestId) -> Result<()> {
        let mut state = self.state.write().await;
        state.requests.remove(&id);
        Ok(())
    }

    async fn pending_made_by(&self, company: CompanyId) -> Result<Vec<RequestView>> {
        let state = self.state.read().await;
        let mut views: Vec<RequestView> = state
            .requests
            .values()
            .filter(|r| r.requestor == company && r.status == RequestStatus::Pending)
            .filter_map(|r| state.companies.get(&r.recipient).map(|c| Self::view(r, c)))
            .collect();
        views.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.request.id.cmp(&a.request.id))
        });
        Ok(views)
    }

    async fn pending_received_by(&self, company: CompanyId) -> Result<Vec<RequestView>> {
        let state = self.state.read().await;
        let mut views: Vec<RequestView> = state
            .requests
            .values()
            .filter(|r| r.recipient == company && r.status == RequestStatus::Pending)
            .filter_map(|r| state.companies.get(&r.requestor).map(|c| Self::view(r, c)))
            .collect();
        views.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.request.id.cmp(&a.request.id))
        });
        Ok(views)
    }

    async fn begin(&self, first: CompanyId, second: CompanyId) -> Result<Box<dyn SettlementTx>> {
        let mut ids = [first, second];
        ids.sort();
        // The registry lock is dropped before waiting on the row locks, so a
        // transaction blocked on a busy row never blocks other pairs.
        let handles: Vec<Arc<Mutex<()>>> = {
            let mut registry = self.row_locks.lock().await;
            let mut handles = Vec::with_capacity(2);
            for id in ids {
                if handles.len() == 1 && ids[0] == ids[1] {
                    break;
                }
                handles.push(registry.entry(id).or_default().clone());
            }
            handles
        };
        // Ascending company-id order, fixed globally: two settlements that
        // reference the same pair in opposite order cannot deadlock.
        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        Ok(Box::new(InMemorySettlementTx {
            state: self.state.clone(),
            _row_guards: guards,
            staged_request: None,
            staged_deltas: Vec::new(),
        }))
    }
}

struct InMemorySettlementTx {
    state: Arc<RwLock<LedgerState>>,
    _row_guards: Vec<OwnedMutexGuard<()>>,
    staged_request: Option<TradeRequest>,
    staged_deltas: Vec<(CompanyId, BalanceDelta)>,
}

#[async_trait]
impl SettlementTx for InMemorySettlementTx {
    async fn request(&mut self, id: RequestId) -> Result<Option<TradeRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id).cloned())
    }

    async fn balance(&mut self, company: CompanyId) -> Result<CompanyBalance> {
        let state = self.state.read().await;
        state
            .balances
            .get(&company)
            .cloned()
            .ok_or_else(|| LedgerError::StoreFailure(format!("no balance row for company {company}")))
    }

    fn stage_request(&mut self, request: TradeRequest) {
        self.staged_request = Some(request);
    }

    fn stage_delta(&mut self, company: CompanyId, delta: BalanceDelta) {
        self.staged_deltas.push((company, delta));
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.write().await;
        // Verify every staged row exists before mutating anything, so the
        // commit is all-or-nothing.
        for (company, _) in &self.staged_deltas {
            if !state.balances.contains_key(company) {
                return Err(LedgerError::StoreFailure(format!(
                    "no balance row for company {company}"
                )));
            }
        }
        if let Some(request) = self.staged_request {
            state.requests.insert(request.id, request);
        }
        for (company, delta) in &self.staged_deltas {
            if let Some(balance) = state.balances.get_mut(company) {
                balance.apply(delta);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Staged writes never reached the shared state; dropping them is the
        // whole rollback.
        Ok(())
    }
}
