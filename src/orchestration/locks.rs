use crate::domain::CustomerId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-customer run serialization.
///
/// Runs for the same customer queue on one async mutex; runs for different
/// customers never contend. Entries nobody holds or waits on are dropped the
/// next time a lock is taken.
#[derive(Debug, Clone, Default)]
pub struct CustomerLocks {
    inner: Arc<Mutex<HashMap<CustomerId, Arc<AsyncMutex<()>>>>>,
}

impl CustomerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `customer`'s ledger.
    pub async fn lock(&self, customer: CustomerId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.retain(|id, slot| *id == customer || Arc::strong_count(slot) > 1);
            map.entry(customer).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of customers with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
