use crate::domain::company::CompanyId;
use crate::domain::ports::LedgerStoreBox;
use crate::domain::request::{
    NewRequest, RequestId, RequestPatch, RequestStatus, RequestView, SettleAction, TradeRequest,
    TransferPlan,
};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use serde::Serialize;

/// The main entry point for request lifecycle and settlement processing.
///
/// `SettlementEngine` validates and executes the transition of a request from
/// PENDING to a terminal state, enforcing authorization and recipient
/// solvency, and composes the store's atomic balance update. It owns the
/// ledger store port and holds no balance state of its own.
pub struct SettlementEngine {
    store: LedgerStoreBox,
}

/// A settled item in a bulk outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SettledItem {
    pub id: RequestId,
    pub action: SettleAction,
}

/// A failed item in a bulk outcome. The reason is the settlement error's
/// display string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub id: RequestId,
    pub reason: String,
}

/// Outcome of bulk processing: per-item results in input order, partial
/// application across the batch is the documented contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkOutcome {
    pub successful: Vec<SettledItem>,
    pub failed: Vec<FailedItem>,
}

impl SettlementEngine {
    pub fn new(store: LedgerStoreBox) -> Self {
        Self { store }
    }

    /// Executes the recipient's decision on a pending request.
    ///
    /// Preconditions, first failure wins: the request exists, the acting
    /// company is its recipient, and it is still PENDING. A reject transitions
    /// the status with no balance change. An accept additionally checks that
    /// the recipient's resulting carbon and cash stay non-negative, then
    /// commits the status flip and both balance updates in one transaction.
    ///
    /// All precondition re-checks and the solvency check run inside the store
    /// transaction, which holds both companies' balance row locks, so no other
    /// settlement can interleave between check and commit. If a concurrent
    /// edit redirected the request to a different recipient while the locks
    /// were being acquired, the transaction is abandoned and the checks start
    /// over against the new pair.
    #[tracing::instrument(skip(self))]
    pub async fn settle(
        &self,
        id: RequestId,
        acting: CompanyId,
        action: SettleAction,
    ) -> Result<TradeRequest> {
        let mut observed = self
            .store
            .request(id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;
        if observed.recipient != acting {
            return Err(LedgerError::Unauthorized);
        }
        if observed.status != RequestStatus::Pending {
            return Err(LedgerError::AlreadyProcessed);
        }

        loop {
            let locked = (observed.requestor, observed.recipient);
            let mut tx = self.store.begin(locked.0, locked.1).await?;

            // Re-read under the row locks: the request may have been settled,
            // edited, or deleted while we waited.
            let mut request = match tx.request(id).await? {
                Some(request) => request,
                None => {
                    tx.rollback().await?;
                    return Err(LedgerError::NotFound(id));
                }
            };
            // The staged deltas may only touch rows whose locks we hold. A
            // redirected request means the pair changed; lock the new pair
            // and re-run the checks.
            if (request.requestor, request.recipient) != locked {
                tx.rollback().await?;
                observed = request;
                continue;
            }
            if request.recipient != acting {
                tx.rollback().await?;
                return Err(LedgerError::Unauthorized);
            }
            if request.status != RequestStatus::Pending {
                tx.rollback().await?;
                return Err(LedgerError::AlreadyProcessed);
            }

            match action {
                SettleAction::Reject => {
                    request.status = RequestStatus::Rejected;
                    request.updated_at = Utc::now();
                    tx.stage_request(request.clone());
                    tx.commit().await?;
                    tracing::info!(%id, "request rejected");
                }
                SettleAction::Accept => {
                    let plan = TransferPlan::for_request(&request);
                    let recipient_balance = tx.balance(request.recipient).await?;
                    if let Some(resource) = recipient_balance.shortfall(&plan.recipient) {
                        tx.rollback().await?;
                        return Err(LedgerError::InsufficientBalance { resource });
                    }

                    request.status = RequestStatus::Accepted;
                    request.updated_at = Utc::now();
                    tx.stage_request(request.clone());
                    tx.stage_delta(request.requestor, plan.requestor);
                    tx.stage_delta(request.recipient, plan.recipient);
                    tx.commit().await?;
                    tracing::info!(%id, "request accepted and settled");
                }
            }

            return Ok(request);
        }
    }

    /// Sequentially settles a batch of requests, isolating per-item failures.
    ///
    /// One item's failure never aborts the batch, and no transaction spans
    /// items. Result ordering follows input order within each list.
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn bulk_settle(
        &self,
        ids: &[RequestId],
        acting: CompanyId,
        action: SettleAction,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self.settle(id, acting, action).await {
                Ok(_) => outcome.successful.push(SettledItem { id, action }),
                Err(err) => {
                    tracing::warn!(%id, error = %err, "bulk item failed");
                    outcome.failed.push(FailedItem {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// Creates a PENDING request on behalf of its requestor.
    ///
    /// Input validation (positive price and quantity, distinct parties)
    /// happens in [`NewRequest::new`]; this additionally checks that the
    /// recipient company exists.
    pub async fn create_request(&self, new: NewRequest) -> Result<TradeRequest> {
        if self.store.company(new.recipient).await?.is_none() {
            return Err(LedgerError::ValidationError(
                "Recipient company does not exist".to_string(),
            ));
        }
        let request = self.store.insert_request(new).await?;
        tracing::info!(id = %request.id, "request created");
        Ok(request)
    }

    /// Applies a partial edit to a request. Only the requestor may edit, and
    /// only while the request is still PENDING; the status is never settable
    /// through this path.
    ///
    /// The write happens inside a row-lock transaction. A settlement of the
    /// same request always locks the requestor's row too, so an edit can never
    /// interleave with it and overwrite a committed terminal status.
    pub async fn update_request(
        &self,
        id: RequestId,
        acting: CompanyId,
        patch: RequestPatch,
    ) -> Result<TradeRequest> {
        let observed = self
            .store
            .request(id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;
        if observed.requestor != acting {
            return Err(LedgerError::Unauthorized);
        }
        if observed.status != RequestStatus::Pending {
            return Err(LedgerError::AlreadyProcessed);
        }
        if let Some(recipient) = patch.recipient {
            // The requestor is immutable, so this holds inside the lock too.
            if recipient == observed.requestor {
                return Err(LedgerError::ValidationError(
                    "Requestor and recipient must differ".to_string(),
                ));
            }
        }

        let mut tx = self
            .store
            .begin(observed.requestor, observed.recipient)
            .await?;
        let mut request = match tx.request(id).await? {
            Some(request) => request,
            None => {
                tx.rollback().await?;
                return Err(LedgerError::NotFound(id));
            }
        };
        if request.status != RequestStatus::Pending {
            tx.rollback().await?;
            return Err(LedgerError::AlreadyProcessed);
        }

        if let Some(recipient) = patch.recipient {
            request.recipient = recipient;
        }
        if let Some(r#type) = patch.r#type {
            request.r#type = r#type;
        }
        if let Some(price) = patch.price {
            request.price = price;
        }
        if let Some(quantity) = patch.quantity {
            request.quantity = quantity;
        }
        if let Some(reason) = patch.reason {
            request.reason = Some(reason);
        }
        request.updated_at = Utc::now();

        tx.stage_request(request.clone());
        tx.commit().await?;
        Ok(request)
    }

    /// Deletes a request. Only the ownership check applies; deletion is
    /// permitted at any status.
    pub async fn delete_request(&self, id: RequestId, acting: CompanyId) -> Result<()> {
        let request = self
            .store
            .request(id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;
        if request.requestor != acting {
            return Err(LedgerError::Unauthorized);
        }
        self.store.delete_request(id).await
    }

    /// PENDING requests made by the company, newest first.
    pub async fn list_made(&self, company: CompanyId) -> Result<Vec<RequestView>> {
        self.store.pending_made_by(company).await
    }

    /// PENDING requests addressed to the company, newest first.
    pub async fn list_received(&self, company: CompanyId) -> Result<Vec<RequestView>> {
        self.store.pending_received_by(company).await
    }
}
