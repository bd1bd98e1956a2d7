use crate::domain::company::{BalanceDelta, Company, CompanyBalance, CompanyId};
use crate::domain::request::{NewRequest, RequestId, RequestView, TradeRequest};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Durable mapping from company to balance and from request id to request.
///
/// The store is the sole shared mutable resource. Reads, inserts, and deletes
/// go through the plain methods; every write that overwrites an existing
/// request row goes through [`LedgerStore::begin`], which returns a
/// transaction holding both companies' balance row locks.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates a company together with its opening balance in one atomic
    /// step. Fails with a validation error if the name is already taken.
    async fn create_company(&self, name: &str, carbon: i64, cash: Decimal) -> Result<Company>;

    async fn company(&self, id: CompanyId) -> Result<Option<Company>>;

    async fn company_by_name(&self, name: &str) -> Result<Option<Company>>;

    async fn companies(&self) -> Result<Vec<Company>>;

    async fn balance(&self, id: CompanyId) -> Result<Option<CompanyBalance>>;

    /// Inserts a PENDING request, assigning its id and timestamps.
    async fn insert_request(&self, new: NewRequest) -> Result<TradeRequest>;

    async fn request(&self, id: RequestId) -> Result<Option<TradeRequest>>;

    async fn delete_request(&self, id: RequestId) -> Result<()>;

    /// PENDING requests made by `company`, newest first, each carrying the
    /// recipient's display name.
    async fn pending_made_by(&self, company: CompanyId) -> Result<Vec<RequestView>>;

    /// PENDING requests addressed to `company`, newest first, each carrying
    /// the requestor's display name.
    async fn pending_received_by(&self, company: CompanyId) -> Result<Vec<RequestView>>;

    /// Opens a settlement transaction over two companies' balance rows.
    ///
    /// Implementations take the row locks in ascending company-id order so
    /// that settlements referencing the same pair in opposite order cannot
    /// deadlock. The locks are held until the transaction commits or rolls
    /// back; staged writes are applied all-or-nothing on commit.
    async fn begin(&self, first: CompanyId, second: CompanyId) -> Result<Box<dyn SettlementTx>>;
}

/// An open settlement transaction.
///
/// Reads observe the committed state while the row locks exclude concurrent
/// settlements over either company. Writes are staged in the transaction and
/// only reach the store on [`SettlementTx::commit`]; dropping the transaction
/// (or calling [`SettlementTx::rollback`]) discards them.
#[async_trait]
pub trait SettlementTx: Send {
    async fn request(&mut self, id: RequestId) -> Result<Option<TradeRequest>>;

    /// The current balance row for `company`. A company without a balance row
    /// is a store invariant violation and surfaces as a store failure.
    async fn balance(&mut self, company: CompanyId) -> Result<CompanyBalance>;

    fn stage_request(&mut self, request: TradeRequest);

    fn stage_delta(&mut self, company: CompanyId, delta: BalanceDelta);

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: u64,
    pub company_id: CompanyId,
}

/// Resolves an inbound credential to an identity, or fails the call with
/// an authentication error before it reaches the engine.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;
pub type IdentityProviderBox = Box<dyn IdentityProvider>;
