use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a trading company. Assigned by the store at creation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct CompanyId(pub u64);

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A trading entity. Immutable once created; the name is unique at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A signed change to one company's balance row.
///
/// Carbon is counted in whole credits, cash in decimal currency units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub carbon: i64,
    pub cash: Decimal,
}

impl BalanceDelta {
    pub fn new(carbon: i64, cash: Decimal) -> Self {
        Self { carbon, cash }
    }

    /// The mirror-image delta for the counterparty of a transfer.
    pub fn inverse(&self) -> Self {
        Self {
            carbon: -self.carbon,
            cash: -self.cash,
        }
    }
}

/// The carbon and cash holdings of one company.
///
/// Mutated only by a committed settlement or by initial seeding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyBalance {
    pub company: CompanyId,
    pub carbon: i64,
    pub cash: Decimal,
}

impl CompanyBalance {
    pub fn new(company: CompanyId, carbon: i64, cash: Decimal) -> Self {
        Self {
            company,
            carbon,
            cash,
        }
    }

    /// Applies a settlement delta to this row.
    pub fn apply(&mut self, delta: &BalanceDelta) {
        self.carbon += delta.carbon;
        self.cash += delta.cash;
    }

    /// Returns the first resource that would go negative under `delta`,
    /// or `None` if the row stays solvent.
    pub fn shortfall(&self, delta: &BalanceDelta) -> Option<&'static str> {
        if self.carbon + delta.carbon < 0 {
            return Some("carbon");
        }
        if self.cash + delta.cash < Decimal::ZERO {
            return Some("cash");
        }
        None
    }
}
