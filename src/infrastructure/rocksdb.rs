use crate::domain::company::{BalanceDelta, Company, CompanyBalance, CompanyId};
use crate::domain::ports::{LedgerStore, SettlementTx};
use crate::domain::request::{
    NewRequest, RequestId, RequestStatus, RequestView, TradeRequest,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Column Family for company records.
pub const CF_COMPANIES: &str = "companies";
/// Column Family for balance rows.
pub const CF_BALANCES: &str = "balances";
/// Column Family for outstanding requests.
pub const CF_REQUESTS: &str = "requests";

/// A persistent ledger store backed by RocksDB.
///
/// Each entity lives in its own column family, keyed by big-endian id and
/// serialized as JSON. Settlement atomicity combines the in-process row-lock
/// registry (check-to-commit exclusion per company pair) with a `WriteBatch`
/// (all staged rows hit disk in one atomic write).
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>` and
/// the lock registry).
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<DB>,
    row_locks: Arc<Mutex<HashMap<CompanyId, Arc<Mutex<()>>>>>,
    // Serializes the name-uniqueness check with the insert.
    create_lock: Arc<Mutex<()>>,
    next_company_id: Arc<AtomicU64>,
    next_request_id: Arc<AtomicU64>,
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| LedgerError::StoreFailure(format!("serialize: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| LedgerError::StoreFailure(format!("deserialize: {e}")))
}

fn last_key(db: &DB, cf_name: &str) -> Result<u64> {
    let cf = db
        .cf_handle(cf_name)
        .ok_or_else(|| LedgerError::StoreFailure(format!("{cf_name} column family not found")))?;
    match db.iterator_cf(&cf, IteratorMode::End).next() {
        Some(item) => {
            let (key, _) = item?;
            let bytes: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| LedgerError::StoreFailure("malformed row key".to_string()))?;
            Ok(u64::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

impl RocksDbLedgerStore {
    /// Opens or creates a RocksDB ledger at the given path, ensuring the
    /// required column families exist and seeding the id counters from the
    /// highest stored keys.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_COMPANIES, Options::default()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Options::default()),
            ColumnFamilyDescriptor::new(CF_REQUESTS, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        let next_company_id = Arc::new(AtomicU64::new(last_key(&db, CF_COMPANIES)?));
        let next_request_id = Arc::new(AtomicU64::new(last_key(&db, CF_REQUESTS)?));

        Ok(Self {
            db: Arc::new(db),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
            create_lock: Arc::new(Mutex::new(())),
            next_company_id,
            next_request_id,
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::StoreFailure(format!("{name} column family not found")))
    }

    fn get_company(&self, id: CompanyId) -> Result<Option<Company>> {
        let cf = self.cf(CF_COMPANIES)?;
        match self.db.get_cf(&cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn all_companies(&self) -> Result<Vec<Company>> {
        let cf = self.cf(CF_COMPANIES)?;
        let mut companies = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            companies.push(decode(&value)?);
        }
        Ok(companies)
    }

    fn pending_views<F>(&self, keep: F, counterparty_of: fn(&TradeRequest) -> CompanyId) -> Result<Vec<RequestView>>
    where
        F: Fn(&TradeRequest) -> bool,
    {
        let cf = self.cf(CF_REQUESTS)?;
        let mut views = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let request: TradeRequest = decode(&value)?;
            if request.status != RequestStatus::Pending || !keep(&request) {
                continue;
            }
            if let Some(counterparty) = self.get_company(counterparty_of(&request))? {
                views.push(RequestView {
                    request,
                    counterparty: counterparty.name,
                });
            }
        }
        views.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.request.id.cmp(&a.request.id))
        });
        Ok(views)
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn create_company(&self, name: &str, carbon: i64, cash: Decimal) -> Result<Company> {
        let _create_guard = self.create_lock.lock().await;
        if self.company_by_name(name).await?.is_some() {
            return Err(LedgerError::ValidationError(format!(
                "Company name already exists: {name}"
            )));
        }
        let id = CompanyId(self.next_company_id.fetch_add(1, Ordering::SeqCst) + 1);
        let company = Company {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let balance = CompanyBalance::new(id, carbon, cash);

        // Company row and opening balance land in one atomic write.
        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_COMPANIES)?, id.0.to_be_bytes(), encode(&company)?);
        batch.put_cf(&self.cf(CF_BALANCES)?, id.0.to_be_bytes(), encode(&balance)?);
        self.db.write(batch)?;
        Ok(company)
    }

    async fn company(&self, id: CompanyId) -> Result<Option<Company>> {
        self.get_company(id)
    }

    async fn company_by_name(&self, name: &str) -> Result<Option<Company>> {
        Ok(self.all_companies()?.into_iter().find(|c| c.name == name))
    }

    async fn companies(&self) -> Result<Vec<Company>> {
        let mut companies = self.all_companies()?;
        companies.sort_by_key(|c| c.id);
        Ok(companies)
    }

    async fn balance(&self, id: CompanyId) -> Result<Option<CompanyBalance>> {
        let cf = self.cf(CF_BALANCES)?;
        match self.db.get_cf(&cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert_request(&self, new: NewRequest) -> Result<TradeRequest> {
        let id = RequestId(self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1);
        let now = Utc::now();
        let request = TradeRequest {
            id,
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
        let cf = self.cf(CF_REQUESTS)?;
        self.db.put_cf(&cf, id.0.to_be_bytes(), encode(&request)?)?;
        Ok(request)
    }

    async fn request(&self, id: RequestId) -> Result<Option<TradeRequest>> {
        let cf = self.cf(CF_REQUESTS)?;
        match self.db.get_cf(&cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_request(&self, id: RequestId) -> Result<()> {
        let cf = self.cf(CF_REQUESTS)?;
        self.db.delete_cf(&cf, id.0.to_be_bytes())?;
        Ok(())
    }

    async fn pending_made_by(&self, company: CompanyId) -> Result<Vec<RequestView>> {
        self.pending_views(|r| r.requestor == company, |r| r.recipient)
    }

    async fn pending_received_by(&self, company: CompanyId) -> Result<Vec<RequestView>> {
        self.pending_views(|r| r.recipient == company, |r| r.requestor)
    }

    async fn begin(&self, first: CompanyId, second: CompanyId) -> Result<Box<dyn SettlementTx>> {
        let mut ids = [first, second];
        ids.sort();
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
        // Fixed ascending acquisition order, same discipline as the
        // in-memory store.
        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        Ok(Box::new(RocksDbSettlementTx {
            store: self.clone(),
            _row_guards: guards,
            staged_request: None,
            staged_deltas: Vec::new(),
        }))
    }
}

struct RocksDbSettlementTx {
    store: RocksDbLedgerStore,
    _row_guards: Vec<OwnedMutexGuard<()>>,
    staged_request: Option<TradeRequest>,
    staged_deltas: Vec<(CompanyId, BalanceDelta)>,
}

#[async_trait]
impl SettlementTx for RocksDbSettlementTx {
    async fn request(&mut self, id: RequestId) -> Result<Option<TradeRequest>> {
        self.store.request(id).await
    }

    async fn balance(&mut self, company: CompanyId) -> Result<CompanyBalance> {
        self.store.balance(company).await?.ok_or_else(|| {
            LedgerError::StoreFailure(format!("no balance row for company {company}"))
        })
    }

    fn stage_request(&mut self, request: TradeRequest) {
        self.staged_request = Some(request);
    }

    fn stage_delta(&mut self, company: CompanyId, delta: BalanceDelta) {
        self.staged_deltas.push((company, delta));
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        // Read-and-apply happens before anything is written; the batch then
        // lands as a single atomic write.
        let mut batch = WriteBatch::default();
        let balances_cf = self.store.cf(CF_BALANCES)?;
        for (company, delta) in &self.staged_deltas {
            let mut balance = self.store.balance(*company).await?.ok_or_else(|| {
                LedgerError::StoreFailure(format!("no balance row for company {company}"))
            })?;
            balance.apply(delta);
            batch.put_cf(&balances_cf, company.0.to_be_bytes(), encode(&balance)?);
        }
        if let Some(request) = &self.staged_request {
            let requests_cf = self.store.cf(CF_REQUESTS)?;
            batch.put_cf(&requests_cf, request.id.0.to_be_bytes(), encode(request)?);
        }
        self.store.db.write(batch)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
