pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod store;

pub use config::{Config, RecalcMode, SeedFallback};
pub use domain::{
    CustomerDerived, CustomerId, Decimal, LedgerState, Order, OrderDerived, OrderId, OrderKey,
    ShareUnit, Timestamp,
};
pub use engine::{effective_amount, Fold, LedgerFolder};
pub use error::AppError;
pub use orchestration::{
    CustomerLocks, RecalcDispatcher, RecalcError, RecalcReport, RecalcSettings, Recalculator,
    Trigger,
};
pub use store::{MockStore, OrderStore, ShopifyStore, StoreError};
