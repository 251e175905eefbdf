//! Order record as read from the store.

use crate::domain::{checked_sum, CustomerId, Decimal, LedgerError, OrderId, Timestamp};
use serde::{Deserialize, Serialize};

/// A customer's order, normalized from the store's representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Platform order id.
    pub id: OrderId,
    /// Creation time; primary fold ordering key.
    pub created_at: Timestamp,
    /// Pre-refund order value.
    pub subtotal: Decimal,
    /// Set when the order was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<Timestamp>,
    /// Refund line amounts, in the order the store reported them.
    pub refunds: Vec<Decimal>,
}

impl Order {
    pub fn new(id: OrderId, created_at: Timestamp, subtotal: Decimal) -> Self {
        Self {
            id,
            created_at,
            subtotal,
            cancelled_at: None,
            refunds: Vec::new(),
        }
    }

    pub fn with_refund(mut self, amount: Decimal) -> Self {
        self.refunds.push(amount);
        self
    }

    pub fn cancelled(mut self, at: Timestamp) -> Self {
        self.cancelled_at = Some(at);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// Sum of all refund line amounts.
    pub fn refunded_total(&self) -> Result<Decimal, LedgerError> {
        checked_sum(self.refunds.iter().copied())
    }

    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.created_at, self.id)
    }
}

/// Minimal order header used to resolve triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub customer: Option<CustomerId>,
    pub created_at: Timestamp,
}

impl OrderSummary {
    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.created_at, self.id)
    }
}

/// Position of an order in a customer's history: `(created_at, id)` ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderKey {
    pub created_at: Timestamp,
    pub id: OrderId,
}

impl OrderKey {
    pub fn new(created_at: Timestamp, id: OrderId) -> Self {
        Self { created_at, id }
    }
}
