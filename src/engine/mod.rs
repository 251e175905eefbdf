//! Pure computation engine for deterministic ledger logic.

pub mod effective;
pub mod folder;

pub use effective::effective_amount;
pub use folder::{Fold, FoldEntry, LedgerFolder};
