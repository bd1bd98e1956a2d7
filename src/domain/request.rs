use crate::domain::company::{BalanceDelta, CompanyId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an outstanding request. Assigned by the store on insert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction relative to the requestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    /// Requestor buys carbon from the recipient.
    Buy,
    /// Requestor sells carbon to the recipient.
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// The recipient's decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettleAction {
    Accept,
    Reject,
}

impl fmt::Display for SettleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettleAction::Accept => write!(f, "ACCEPT"),
            SettleAction::Reject => write!(f, "REJECT"),
        }
    }
}

/// Per-unit price of a trade. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LedgerError::ValidationError(
                "Price must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

/// Number of carbon credits in a trade. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> Result<Self> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(LedgerError::ValidationError(
                "Quantity must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

/// A proposed bilateral trade awaiting the recipient's decision.
///
/// Created PENDING by the requestor. Field edits are the requestor's while the
/// request is still PENDING; the status transition belongs to the recipient
/// through the settlement engine. ACCEPTED and REJECTED are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub id: RequestId,
    pub requestor: CompanyId,
    pub recipient: CompanyId,
    pub r#type: TradeType,
    pub price: Price,
    pub quantity: Quantity,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeRequest {
    /// Total cash value of the trade: per-unit price times quantity.
    pub fn total_cost(&self) -> Decimal {
        self.price.value() * Decimal::from(self.quantity.value())
    }
}

/// Validated input for creating a request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    pub requestor: CompanyId,
    pub recipient: CompanyId,
    pub r#type: TradeType,
    pub price: Price,
    pub quantity: Quantity,
    pub reason: Option<String>,
}

impl NewRequest {
    pub fn new(
        requestor: CompanyId,
        recipient: CompanyId,
        r#type: TradeType,
        price: Decimal,
        quantity: i64,
        reason: Option<String>,
    ) -> Result<Self> {
        if requestor == recipient {
            return Err(LedgerError::ValidationError(
                "Requestor and recipient must differ".to_string(),
            ));
        }
        Ok(Self {
            requestor,
            recipient,
            r#type,
            price: Price::new(price)?,
            quantity: Quantity::new(quantity)?,
            reason,
        })
    }
}

/// Partial edit of a PENDING request. Only provided fields are applied;
/// the status is never settable through this path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    pub recipient: Option<CompanyId>,
    pub r#type: Option<TradeType>,
    pub price: Option<Price>,
    pub quantity: Option<Quantity>,
    pub reason: Option<String>,
}

/// A request enriched with the counterparty's display name, as returned by
/// the made/received listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestView {
    pub request: TradeRequest,
    pub counterparty: String,
}

/// The balance movements an accepted request settles.
///
/// The recipient delta is constructed as the inverse of the requestor delta,
/// so the transfer is zero-sum by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferPlan {
    pub requestor: BalanceDelta,
    pub recipient: BalanceDelta,
}

impl TransferPlan {
    pub fn for_request(request: &TradeRequest) -> Self {
        let total = request.total_cost();
        let quantity = request.quantity.value();
        let requestor = match request.r#type {
            TradeType::Buy => BalanceDelta::new(quantity, -total),
            TradeType::Sell => BalanceDelta::new(-quantity, total),
        };
        Self {
            recipient: requestor.inverse(),
            requestor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending(r#type: TradeType, price: Decimal, quantity: i64) -> TradeRequest {
        let now = Utc::now();
        TradeRequest {
            id: RequestId(1),
            requestor: CompanyId(1),
            recipient: CompanyId(2),
            r#type,
            price: Price::new(price).unwrap(),
            quantity: Quantity::new(quantity).unwrap(),
            reason: None,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_price_validation() {
        assert!(Price::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Price::new(dec!(0.0)),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            Price::new(dec!(-1.0)),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_quantity_validation() {
        assert!(Quantity::new(1).is_ok());
        assert!(Quantity::new(0).is_err());
        assert!(Quantity::new(-5).is_err());
    }

    #[test]
    fn test_new_request_rejects_self_trade() {
        let result = NewRequest::new(
            CompanyId(1),
            CompanyId(1),
            TradeType::Buy,
            dec!(5.0),
            10,
            None,
        );
        assert!(matches!(result, Err(LedgerError::ValidationError(_))));
    }

    #[test]
    fn test_buy_plan_moves_carbon_to_requestor() {
        let request = pending(TradeType::Buy, dec!(5.0), 10);
        let plan = TransferPlan::for_request(&request);

        assert_eq!(plan.requestor.carbon, 10);
        assert_eq!(plan.requestor.cash, dec!(-50.0));
        assert_eq!(plan.recipient.carbon, -10);
        assert_eq!(plan.recipient.cash, dec!(50.0));
    }

    #[test]
    fn test_sell_plan_inverts_signs() {
        let request = pending(TradeType::Sell, dec!(5.0), 10);
        let plan = TransferPlan::for_request(&request);

        assert_eq!(plan.requestor.carbon, -10);
        assert_eq!(plan.requestor.cash, dec!(50.0));
        assert_eq!(plan.recipient.carbon, 10);
        assert_eq!(plan.recipient.cash, dec!(-50.0));
    }

    #[test]
    fn test_plan_is_zero_sum() {
        for r#type in [TradeType::Buy, TradeType::Sell] {
            let request = pending(r#type, dec!(48.0), 150);
            let plan = TransferPlan::for_request(&request);
            assert_eq!(plan.requestor.carbon + plan.recipient.carbon, 0);
            assert_eq!(plan.requestor.cash + plan.recipient.cash, Decimal::ZERO);
        }
    }

    #[test]
    fn test_status_serialization_matches_storage_format() {
        assert_eq!(
            serde_json::to_string(&RequestStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(serde_json::to_string(&TradeType::Buy).unwrap(), "\"BUY\"");
    }
}
