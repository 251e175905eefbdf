//! Run coordination: history reading, write-back, the recalculation state
//! machine and per-customer dispatch.

pub mod dispatch;
pub mod locks;
pub mod orchestrator;
pub mod reader;
pub mod writer;

pub use dispatch::{spawn_outcome_reporter, RecalcDispatcher, RecalcOutcome, Trigger};
pub use locks::CustomerLocks;
pub use orchestrator::{RecalcError, RecalcPhase, RecalcReport, RecalcSettings, Recalculator};
pub use reader::{FetchError, HistoryBound, OrderHistoryReader};
pub use writer::{FieldKey, MetafieldKeys, MetafieldWriter, WriteError, WriteFailure, WriteSummary};
