//! Domain types and determinism layer for the share ledger.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Domain primitives: OrderId, CustomerId, Timestamp
//! - Order records and the `(created_at, id)` ordering key
//! - Ledger values: ShareUnit, LedgerState and its per-order/per-customer snapshots

pub mod decimal;
pub mod ledger;
pub mod order;
pub mod ordering;
pub mod primitives;

pub use decimal::Decimal;
pub use ledger::{checked_sum, CustomerDerived, LedgerError, LedgerState, OrderDerived, ShareUnit};
pub use order::{Order, OrderKey, OrderSummary};
pub use ordering::{dedup_orders, sort_orders_deterministic};
pub use primitives::{CustomerId, IdParseError, OrderId, Timestamp};
