//! Domain primitives: OrderId, CustomerId, Timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Instant in UTC at which an order was created or cancelled.
pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} id: {value}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Parse a platform id given either as a bare number or as a `gid://` URI.
fn parse_id(kind: &'static str, s: &str) -> Result<u64, IdParseError> {
    let raw = s.trim();
    let tail = match raw.strip_prefix("gid://shopify/") {
        Some(rest) => {
            let (resource, id) = rest.split_once('/').ok_or_else(|| IdParseError {
                kind,
                value: raw.to_string(),
            })?;
            if resource != kind {
                return Err(IdParseError {
                    kind,
                    value: raw.to_string(),
                });
            }
            id
        }
        None => raw,
    };
    tail.parse::<u64>().map_err(|_| IdParseError {
        kind,
        value: raw.to_string(),
    })
}

/// Order identifier. Numeric so `(created_at, id)` tie-breaks are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl OrderId {
    pub fn new(id: u64) -> Self {
        OrderId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// GraphQL global id, used as metafield owner.
    pub fn gid(&self) -> String {
        format!("gid://shopify/Order/{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_id("Order", s).map(OrderId)
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Customer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub u64);

impl CustomerId {
    pub fn new(id: u64) -> Self {
        CustomerId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// GraphQL global id, used as metafield owner.
    pub fn gid(&self) -> String {
        format!("gid://shopify/Customer/{}", self.0)
    }
}

impl FromStr for CustomerId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_id("Customer", s).map(CustomerId)
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_parses_numeric_and_gid() {
        assert_eq!(OrderId::from_str("42").unwrap(), OrderId::new(42));
        assert_eq!(
            OrderId::from_str("gid://shopify/Order/42").unwrap(),
            OrderId::new(42)
        );
    }

    #[test]
    fn test_order_id_rejects_foreign_gid() {
        assert!(OrderId::from_str("gid://shopify/Customer/42").is_err());
        assert!(OrderId::from_str("abc").is_err());
    }

    #[test]
    fn test_customer_id_gid_roundtrip() {
        let id = CustomerId::new(7);
        assert_eq!(id.gid(), "gid://shopify/Customer/7");
        assert_eq!(CustomerId::from_str(&id.gid()).unwrap(), id);
    }

    #[test]
    fn test_order_id_ordering() {
        assert!(OrderId::new(1) < OrderId::new(2));
    }
}
