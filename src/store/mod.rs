//! Store abstraction over the commerce platform holding orders and metafields.

use crate::domain::{CustomerId, Decimal, Order, OrderId, OrderKey, OrderSummary, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod mock;
pub mod shopify;

pub use mock::MockStore;
pub use shopify::ShopifyStore;

/// An order as listed by the store. `refunds` is `None` when the listing did
/// not carry refund lines inline and they must be fetched separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedOrder {
    pub id: OrderId,
    pub created_at: Timestamp,
    pub subtotal: Decimal,
    pub cancelled_at: Option<Timestamp>,
    pub refunds: Option<Vec<Decimal>>,
}

impl ListedOrder {
    /// Attach resolved refund lines, producing the uniform record.
    pub fn resolve(self, refunds: Vec<Decimal>) -> Order {
        Order {
            id: self.id,
            created_at: self.created_at,
            subtotal: self.subtotal,
            cancelled_at: self.cancelled_at,
            refunds,
        }
    }
}

impl From<Order> for ListedOrder {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            created_at: order.created_at,
            subtotal: order.subtotal,
            cancelled_at: order.cancelled_at,
            refunds: Some(order.refunds),
        }
    }
}

/// One page of a customer's order listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPage {
    pub orders: Vec<ListedOrder>,
    pub next_cursor: Option<String>,
}

/// One page of an order's refund line amounts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefundPage {
    pub amounts: Vec<Decimal>,
    pub next_cursor: Option<String>,
}

/// Metafield value type as understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetafieldType {
    #[serde(rename = "number_decimal")]
    NumberDecimal,
    #[serde(rename = "number_integer")]
    NumberInteger,
}

/// A single metafield write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafieldInput {
    pub owner_id: String,
    pub namespace: String,
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: MetafieldType,
    pub value: String,
}

/// Field-level rejection reported by a metafield mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(path) if !path.is_empty() => write!(f, "{}: {}", path.join("."), self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Store trait for reading order history and writing derived metafields.
///
/// Implementations must handle retry/backoff and rate limiting; every retry
/// must be logged.
#[async_trait]
pub trait OrderStore: Send + Sync + fmt::Debug {
    /// Fetch one page of a customer's orders, ascending by creation time.
    ///
    /// # Arguments
    /// * `customer` - Customer whose orders to list
    /// * `since` - Inclusive lower bound on `created_at`; `None` lists from the beginning
    /// * `cursor` - Continuation cursor from the previous page
    async fn list_orders_page(
        &self,
        customer: CustomerId,
        since: Option<Timestamp>,
        cursor: Option<&str>,
    ) -> Result<OrderPage, StoreError>;

    /// Fetch one page of an order's refund line amounts.
    async fn list_refunds_page(
        &self,
        order: OrderId,
        cursor: Option<&str>,
    ) -> Result<RefundPage, StoreError>;

    /// Look up an order's header. `None` when the order does not exist.
    async fn get_order(&self, order: OrderId) -> Result<Option<OrderSummary>, StoreError>;

    /// The customer's latest order strictly before `key` in `(created_at, id)` order.
    async fn preceding_order(
        &self,
        customer: CustomerId,
        key: OrderKey,
    ) -> Result<Option<OrderId>, StoreError>;

    /// Read a metafield value previously written on an order.
    async fn get_order_metafield(
        &self,
        order: OrderId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Upsert a batch of metafields. Field-level rejections come back as
    /// `UserError`s; transport failures as `StoreError`.
    async fn write_metafields(
        &self,
        batch: &[MetafieldInput],
    ) -> Result<Vec<UserError>, StoreError>;
}

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 4xx client error, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed record)
    ParseError(String),
    /// GraphQL top-level errors
    GraphqlError(String),
    /// Rate limit exceeded
    RateLimited,
    /// Other error
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            StoreError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            StoreError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            StoreError::GraphqlError(msg) => write!(f, "GraphQL error: {}", msg),
            StoreError::RateLimited => write!(f, "Rate limited"),
            StoreError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}
