//! Order history reader: follows store pagination and resolves refunds.

use crate::domain::{dedup_orders, sort_orders_deterministic, CustomerId, Order, OrderKey, Timestamp};
use crate::store::{ListedOrder, OrderStore, StoreError};
use futures::stream::{self, Stream, TryStreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// History retrieval failed part way. `partial` holds every order resolved
/// before the failure so callers can report how far the reader got; it must
/// never be folded as if complete.
#[derive(Debug, Error)]
#[error("order history fetch failed after {} orders: {source}", .partial.len())]
pub struct FetchError {
    pub source: StoreError,
    pub partial: Vec<Order>,
}

impl FetchError {
    pub fn new(source: StoreError) -> Self {
        Self {
            source,
            partial: Vec::new(),
        }
    }
}

/// Where a history read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryBound {
    /// From the customer's first order.
    All,
    /// From the given order (inclusive) onward.
    From(OrderKey),
}

impl HistoryBound {
    fn since(&self) -> Option<Timestamp> {
        match self {
            HistoryBound::All => None,
            HistoryBound::From(key) => Some(key.created_at),
        }
    }

    fn admits(&self, order: &Order) -> bool {
        match self {
            HistoryBound::All => true,
            HistoryBound::From(key) => order.key() >= *key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderHistoryReader {
    store: Arc<dyn OrderStore>,
}

impl OrderHistoryReader {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Lazily page through a customer's orders, resolving refunds per order.
    ///
    /// Each item is one store page. A failing page ends the stream with a
    /// `FetchError` whose `partial` holds the orders of that page resolved
    /// before the failure.
    pub fn pages(
        &self,
        customer: CustomerId,
        since: Option<Timestamp>,
    ) -> impl Stream<Item = Result<Vec<Order>, FetchError>> + Send + 'static {
        let store = self.store.clone();
        // State: Some(cursor) while pages remain, None once exhausted.
        stream::try_unfold(Some(None::<String>), move |state| {
            fetch_page(store.clone(), customer, since, state)
        })
    }

    /// Read the complete history from `bound` onward, sorted by `(created_at, id)`.
    ///
    /// # Errors
    /// Returns `FetchError` carrying everything read so far if any page or
    /// refund lookup fails. An empty `Ok` means the customer genuinely has no
    /// orders in range.
    pub async fn fetch_history(
        &self,
        customer: CustomerId,
        bound: HistoryBound,
    ) -> Result<Vec<Order>, FetchError> {
        let mut orders: Vec<Order> = Vec::new();
        let mut pages = Box::pin(self.pages(customer, bound.since()));

        loop {
            match pages.try_next().await {
                Ok(Some(page)) => orders.extend(page),
                Ok(None) => break,
                Err(mut err) => {
                    orders.append(&mut err.partial);
                    warn!(
                        "History fetch for customer={} aborted after {} orders: {}",
                        customer,
                        orders.len(),
                        err.source
                    );
                    return Err(FetchError {
                        source: err.source,
                        partial: orders,
                    });
                }
            }
        }

        let duplicates = dedup_orders(&mut orders);
        if duplicates > 0 {
            warn!(
                "Dropped {} duplicate orders from listing for customer={}",
                duplicates, customer
            );
        }
        orders.retain(|o| bound.admits(o));
        sort_orders_deterministic(&mut orders);

        Ok(orders)
    }
}

type PageStep = Option<(Vec<Order>, Option<Option<String>>)>;

async fn fetch_page(
    store: Arc<dyn OrderStore>,
    customer: CustomerId,
    since: Option<Timestamp>,
    state: Option<Option<String>>,
) -> Result<PageStep, FetchError> {
    let Some(cursor) = state else {
        return Ok(None);
    };

    let page = store
        .list_orders_page(customer, since, cursor.as_deref())
        .await
        .map_err(FetchError::new)?;
    debug!(
        "Fetched {} orders for customer={} (more: {})",
        page.orders.len(),
        customer,
        page.next_cursor.is_some()
    );

    let mut resolved = Vec::with_capacity(page.orders.len());
    for listed in page.orders {
        match resolve_refunds(store.as_ref(), listed).await {
            Ok(order) => resolved.push(order),
            Err(source) => {
                return Err(FetchError {
                    source,
                    partial: resolved,
                })
            }
        }
    }

    Ok(Some((resolved, page.next_cursor.map(Some))))
}

/// Produce the uniform record, fetching refund lines when the listing lacked them.
async fn resolve_refunds(store: &dyn OrderStore, listed: ListedOrder) -> Result<Order, StoreError> {
    if let Some(refunds) = listed.refunds.clone() {
        return Ok(listed.resolve(refunds));
    }
    // Cancellation zeroes the order regardless of refunds.
    if listed.cancelled_at.is_some() {
        return Ok(listed.resolve(Vec::new()));
    }

    let mut amounts = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list_refunds_page(listed.id, cursor.as_deref()).await?;
        amounts.extend(page.amounts);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(listed.resolve(amounts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, OrderId};
    use crate::store::MockStore;
    use chrono::{TimeZone, Utc};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn make_order(id: u64, secs: i64, subtotal: &str) -> Order {
        Order::new(OrderId::new(id), Utc.timestamp_opt(secs, 0).unwrap(), d(subtotal))
    }

    #[tokio::test]
    async fn test_fetch_history_follows_pages_and_sorts_ties_by_id() {
        let customer = CustomerId::new(1);
        let store = MockStore::new()
            .with_orders(
                customer,
                vec![
                    make_order(9, 100, "10"),
                    make_order(3, 100, "10"),
                    make_order(1, 50, "10"),
                    make_order(4, 200, "10"),
                ],
            )
            .with_page_size(1);
        let store = Arc::new(store);
        let reader = OrderHistoryReader::new(store.clone());

        let orders = reader.fetch_history(customer, HistoryBound::All).await.unwrap();

        let ids: Vec<u64> = orders.iter().map(|o| o.id.as_u64()).collect();
        assert_eq!(ids, vec![1, 3, 9, 4]);
        assert_eq!(store.orders_page_calls(), 4);
    }

    #[tokio::test]
    async fn test_fetch_history_resolves_deferred_refunds() {
        let customer = CustomerId::new(1);
        let store = MockStore::new()
            .with_order(
                customer,
                make_order(1, 10, "80")
                    .with_refund(d("10"))
                    .with_refund(d("5"))
                    .with_refund(d("15")),
            )
            .with_deferred_refunds()
            .with_page_size(2);
        let reader = OrderHistoryReader::new(Arc::new(store));

        let orders = reader.fetch_history(customer, HistoryBound::All).await.unwrap();
        assert_eq!(orders[0].refunded_total().unwrap(), d("30"));
    }

    #[tokio::test]
    async fn test_fetch_history_bound_excludes_earlier_ties() {
        let customer = CustomerId::new(1);
        let store = MockStore::new().with_orders(
            customer,
            vec![
                make_order(1, 50, "10"),
                make_order(2, 100, "10"),
                make_order(3, 100, "10"),
                make_order(4, 150, "10"),
            ],
        );
        let reader = OrderHistoryReader::new(Arc::new(store));

        let bound = HistoryBound::From(OrderKey::new(Utc.timestamp_opt(100, 0).unwrap(), OrderId::new(3)));
        let orders = reader.fetch_history(customer, bound).await.unwrap();

        let ids: Vec<u64> = orders.iter().map(|o| o.id.as_u64()).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_fetch_history_page_failure_carries_partial() {
        let customer = CustomerId::new(1);
        let store = MockStore::new()
            .with_orders(
                customer,
                vec![make_order(1, 10, "10"), make_order(2, 20, "10"), make_order(3, 30, "10")],
            )
            .with_page_size(1)
            .failing_orders_page(2);
        let reader = OrderHistoryReader::new(Arc::new(store));

        let err = reader
            .fetch_history(customer, HistoryBound::All)
            .await
            .unwrap_err();

        assert_eq!(err.partial.len(), 2);
        assert!(matches!(err.source, StoreError::HttpError { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_fetch_history_refund_failure_aborts() {
        let customer = CustomerId::new(1);
        let store = MockStore::new()
            .with_orders(customer, vec![make_order(1, 10, "10"), make_order(2, 20, "10")])
            .with_deferred_refunds()
            .failing_refunds_for(OrderId::new(2));
        let reader = OrderHistoryReader::new(Arc::new(store));

        let err = reader
            .fetch_history(customer, HistoryBound::All)
            .await
            .unwrap_err();

        assert_eq!(err.partial.len(), 1);
        assert_eq!(err.partial[0].id, OrderId::new(1));
    }

    #[tokio::test]
    async fn test_fetch_history_cancelled_skips_refund_lookup() {
        let customer = CustomerId::new(1);
        let cancelled = make_order(1, 10, "10").cancelled(Utc.timestamp_opt(11, 0).unwrap());
        let store = MockStore::new()
            .with_order(customer, cancelled)
            .with_deferred_refunds()
            .failing_refunds_for(OrderId::new(1));
        let reader = OrderHistoryReader::new(Arc::new(store));

        let orders = reader.fetch_history(customer, HistoryBound::All).await.unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_history_empty_customer_is_ok() {
        let reader = OrderHistoryReader::new(Arc::new(MockStore::new()));
        let orders = reader
            .fetch_history(CustomerId::new(42), HistoryBound::All)
            .await
            .unwrap();
        assert!(orders.is_empty());
    }
}
