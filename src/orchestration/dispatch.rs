//! Webhook trigger dispatch: background runs serialized per customer.

use crate::config::RecalcMode;
use crate::domain::{CustomerId, OrderId};
use crate::orchestration::locks::CustomerLocks;
use crate::orchestration::orchestrator::{RecalcError, RecalcReport, Recalculator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A request to rebuild one customer's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub customer: CustomerId,
    /// `None` forces a Full run.
    pub changed_order: Option<OrderId>,
}

impl Trigger {
    pub fn new(customer: CustomerId, changed_order: Option<OrderId>) -> Self {
        Self {
            customer,
            changed_order,
        }
    }
}

/// What became of a dispatched trigger.
#[derive(Debug)]
pub struct RecalcOutcome {
    pub trigger: Trigger,
    pub result: Result<RecalcReport, RecalcError>,
    /// A Full rerun followed a failed Partial write.
    pub repaired: bool,
}

#[derive(Debug, Clone)]
pub struct RecalcDispatcher {
    recalculator: Arc<Recalculator>,
    locks: CustomerLocks,
    outcomes: mpsc::UnboundedSender<RecalcOutcome>,
}

impl RecalcDispatcher {
    /// Create a dispatcher and the receiver its outcomes are published on.
    pub fn new(
        recalculator: Arc<Recalculator>,
        locks: CustomerLocks,
    ) -> (Self, mpsc::UnboundedReceiver<RecalcOutcome>) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        (
            Self {
                recalculator,
                locks,
                outcomes,
            },
            receiver,
        )
    }

    pub fn recalculator(&self) -> &Arc<Recalculator> {
        &self.recalculator
    }

    pub fn locks(&self) -> &CustomerLocks {
        &self.locks
    }

    /// Run a trigger under its customer's lock and wait for the outcome.
    ///
    /// A Partial run that fails while writing may have left a suffix of
    /// orders newer than the rest of the ledger; one Full rerun rewrites it.
    pub async fn run(&self, trigger: Trigger) -> RecalcOutcome {
        let _guard = self.locks.lock(trigger.customer).await;
        let mode = self.recalculator.mode_for(trigger.changed_order);
        let result = self
            .recalculator
            .recalculate(trigger.customer, trigger.changed_order)
            .await;

        match result {
            Err(RecalcError::Write(e)) if mode == RecalcMode::Partial => {
                warn!(
                    customer = %trigger.customer,
                    orders_written = e.orders_written,
                    error = %e,
                    "Partial write failed, repairing with full recalculation"
                );
                let result = self
                    .recalculator
                    .recalculate_as(trigger.customer, trigger.changed_order, RecalcMode::Full)
                    .await;
                RecalcOutcome {
                    trigger,
                    result,
                    repaired: true,
                }
            }
            result => RecalcOutcome {
                trigger,
                result,
                repaired: false,
            },
        }
    }

    /// Fire-and-forget: run the trigger on a background task and publish its outcome.
    ///
    /// A run that panics or is cancelled still publishes an outcome, as
    /// [`RecalcError::Aborted`].
    pub fn dispatch(&self, trigger: Trigger) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let runner = dispatcher.clone();
            let outcome = match tokio::spawn(async move { runner.run(trigger).await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(customer = %trigger.customer, error = %e, "Recalculation task aborted");
                    RecalcOutcome {
                        trigger,
                        result: Err(RecalcError::Aborted(e.to_string())),
                        repaired: false,
                    }
                }
            };
            if dispatcher.outcomes.send(outcome).is_err() {
                warn!(customer = %trigger.customer, "Outcome receiver dropped");
            }
        })
    }
}

/// Log every published outcome until all dispatchers are dropped.
pub fn spawn_outcome_reporter(mut outcomes: mpsc::UnboundedReceiver<RecalcOutcome>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            let customer = outcome.trigger.customer;
            match &outcome.result {
                Ok(report) => info!(
                    %customer,
                    run_id = %report.run_id,
                    repaired = outcome.repaired,
                    shares = %report.customer_state.cumulative_shares,
                    "Recalculation succeeded"
                ),
                Err(e) => error!(
                    %customer,
                    repaired = outcome.repaired,
                    error = %e,
                    "Recalculation failed"
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedFallback;
    use crate::domain::{Decimal, Order, ShareUnit};
    use crate::orchestration::orchestrator::RecalcSettings;
    use crate::domain::{OrderKey, OrderSummary, Timestamp};
    use crate::store::{MetafieldInput, MockStore, OrderPage, OrderStore, RefundPage, StoreError, UserError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    /// Store whose order listing panics mid-run.
    #[derive(Debug)]
    struct PanickingStore;

    #[async_trait]
    impl OrderStore for PanickingStore {
        async fn list_orders_page(
            &self,
            _customer: CustomerId,
            _since: Option<Timestamp>,
            _cursor: Option<&str>,
        ) -> Result<OrderPage, StoreError> {
            panic!("order listing exploded");
        }

        async fn list_refunds_page(
            &self,
            _order: OrderId,
            _cursor: Option<&str>,
        ) -> Result<RefundPage, StoreError> {
            Ok(RefundPage::default())
        }

        async fn get_order(&self, _order: OrderId) -> Result<Option<OrderSummary>, StoreError> {
            Ok(None)
        }

        async fn preceding_order(
            &self,
            _customer: CustomerId,
            _key: OrderKey,
        ) -> Result<Option<OrderId>, StoreError> {
            Ok(None)
        }

        async fn get_order_metafield(
            &self,
            _order: OrderId,
            _namespace: &str,
            _key: &str,
        ) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn write_metafields(
            &self,
            _batch: &[MetafieldInput],
        ) -> Result<Vec<UserError>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn make_order(id: u64, secs: i64, subtotal: &str) -> Order {
        Order::new(OrderId::new(id), Utc.timestamp_opt(secs, 0).unwrap(), d(subtotal))
    }

    fn dispatcher(
        store: Arc<MockStore>,
        mode: RecalcMode,
    ) -> (RecalcDispatcher, mpsc::UnboundedReceiver<RecalcOutcome>) {
        let settings = RecalcSettings {
            unit: ShareUnit::new(d("100")).unwrap(),
            mode,
            seed_fallback: SeedFallback::Abort,
        };
        RecalcDispatcher::new(
            Arc::new(Recalculator::new(store, settings)),
            CustomerLocks::new(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_publishes_outcome() {
        let customer = CustomerId::new(1);
        let store = Arc::new(MockStore::new().with_order(customer, make_order(1, 10, "250")));
        let (dispatcher, mut rx) = dispatcher(store, RecalcMode::Full);

        dispatcher
            .dispatch(Trigger::new(customer, Some(OrderId::new(1))))
            .await
            .unwrap();

        let outcome = rx.recv().await.unwrap();
        assert!(!outcome.repaired);
        let report = outcome.result.unwrap();
        assert_eq!(report.customer_state.cumulative_shares, d("2"));
    }

    #[tokio::test]
    async fn test_partial_write_failure_is_repaired_by_full_rerun() {
        let customer = CustomerId::new(1);
        let store = Arc::new(
            MockStore::new()
                .with_order(customer, make_order(1, 10, "40"))
                .failing_write_call(0),
        );
        let (dispatcher, _rx) = dispatcher(store.clone(), RecalcMode::Partial);

        let outcome = dispatcher
            .run(Trigger::new(customer, Some(OrderId::new(1))))
            .await;

        assert!(outcome.repaired);
        let report = outcome.result.unwrap();
        assert_eq!(report.mode, RecalcMode::Full);
        assert_eq!(
            store.metafield("gid://shopify/Order/1", "custom", "osszes_koltes"),
            Some("40.00".to_string())
        );
    }

    #[tokio::test]
    async fn test_full_write_failure_is_not_retried() {
        let customer = CustomerId::new(1);
        let store = Arc::new(
            MockStore::new()
                .with_order(customer, make_order(1, 10, "40"))
                .failing_write_call(0),
        );
        let (dispatcher, _rx) = dispatcher(store.clone(), RecalcMode::Full);

        let outcome = dispatcher.run(Trigger::new(customer, None)).await;

        assert!(!outcome.repaired);
        assert!(matches!(outcome.result, Err(RecalcError::Write(_))));
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_run_still_publishes_outcome() {
        let customer = CustomerId::new(1);
        let recalculator = Recalculator::new(Arc::new(PanickingStore), RecalcSettings::default());
        let (dispatcher, mut rx) = RecalcDispatcher::new(Arc::new(recalculator), CustomerLocks::new());

        dispatcher.dispatch(Trigger::new(customer, None)).await.unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.trigger.customer, customer);
        assert!(matches!(outcome.result, Err(RecalcError::Aborted(_))));
        // The lock was released when the task unwound.
        drop(dispatcher.locks().lock(customer).await);
    }

    #[tokio::test]
    async fn test_ledger_overflow_is_published_as_failure() {
        let customer = CustomerId::new(1);
        let store = Arc::new(MockStore::new().with_order(customer, make_order(1, 10, "80")));
        let settings = RecalcSettings {
            unit: ShareUnit::new(d("0.0000000000000000000000000001")).unwrap(),
            mode: RecalcMode::Full,
            seed_fallback: SeedFallback::Abort,
        };
        let (dispatcher, mut rx) = RecalcDispatcher::new(
            Arc::new(Recalculator::new(store.clone(), settings)),
            CustomerLocks::new(),
        );

        dispatcher.dispatch(Trigger::new(customer, None)).await.unwrap();

        let outcome = rx.recv().await.unwrap();
        assert!(matches!(outcome.result, Err(RecalcError::Ledger(_))));
        assert_eq!(store.write_calls(), 0);
    }
}
