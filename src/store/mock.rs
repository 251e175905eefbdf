//! In-memory store for testing without network calls.

use super::{
    ListedOrder, MetafieldInput, OrderPage, OrderStore, RefundPage, StoreError, UserError,
};
use crate::domain::{CustomerId, Decimal, Order, OrderId, OrderKey, OrderSummary, Timestamp};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

type MetafieldKey = (String, String, String);

#[derive(Debug)]
struct MockState {
    orders: Vec<(CustomerId, Order)>,
    metafields: BTreeMap<MetafieldKey, String>,
    page_size: usize,
    inline_refunds: bool,
    fail_orders_page: Option<usize>,
    failing_refunds: HashSet<OrderId>,
    rejected_owners: HashSet<String>,
    fail_write_call: Option<usize>,
    orders_page_calls: usize,
    write_calls: usize,
}

/// Mock store holding orders and metafields in memory.
///
/// Supports pagination, deferred refund listings and failure injection so
/// the reader, writer and orchestrator failure paths can be exercised.
#[derive(Debug)]
pub struct MockStore {
    inner: Mutex<MockState>,
}

impl MockStore {
    /// Create a new mock store with no orders.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockState {
                orders: Vec::new(),
                metafields: BTreeMap::new(),
                page_size: 250,
                inline_refunds: true,
                fail_orders_page: None,
                failing_refunds: HashSet::new(),
                rejected_owners: HashSet::new(),
                fail_write_call: None,
                orders_page_calls: 0,
                write_calls: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&mut self) -> &mut MockState {
        self.inner
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an order for a customer.
    pub fn with_order(mut self, customer: CustomerId, order: Order) -> Self {
        self.state_mut().orders.push((customer, order));
        self
    }

    /// Add multiple orders for a customer.
    pub fn with_orders(mut self, customer: CustomerId, orders: Vec<Order>) -> Self {
        self.state_mut()
            .orders
            .extend(orders.into_iter().map(|o| (customer, o)));
        self
    }

    /// Number of orders (and refund lines) returned per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.state_mut().page_size = page_size.max(1);
        self
    }

    /// Omit refunds from order listings so they must be fetched separately.
    pub fn with_deferred_refunds(mut self) -> Self {
        self.state_mut().inline_refunds = false;
        self
    }

    /// Fail the `n`th order page request (0-based, counted across the store's lifetime).
    pub fn failing_orders_page(mut self, n: usize) -> Self {
        self.state_mut().fail_orders_page = Some(n);
        self
    }

    /// Fail refund listings for an order.
    pub fn failing_refunds_for(mut self, order: OrderId) -> Self {
        self.state_mut().failing_refunds.insert(order);
        self
    }

    /// Reject metafield writes for an owner gid with a field-level error.
    pub fn rejecting_owner(mut self, owner_gid: String) -> Self {
        self.state_mut().rejected_owners.insert(owner_gid);
        self
    }

    /// Fail the `n`th write call (0-based) with a transport error.
    pub fn failing_write_call(mut self, n: usize) -> Self {
        self.state_mut().fail_write_call = Some(n);
        self
    }

    /// Add an order after construction.
    pub fn add_order(&self, customer: CustomerId, order: Order) {
        self.state().orders.push((customer, order));
    }

    /// Mark an existing order cancelled.
    pub fn cancel_order(&self, order: OrderId, at: Timestamp) {
        let mut state = self.state();
        if let Some((_, o)) = state.orders.iter_mut().find(|(_, o)| o.id == order) {
            o.cancelled_at = Some(at);
        }
    }

    /// Append a refund line to an existing order.
    pub fn add_refund(&self, order: OrderId, amount: Decimal) {
        let mut state = self.state();
        if let Some((_, o)) = state.orders.iter_mut().find(|(_, o)| o.id == order) {
            o.refunds.push(amount);
        }
    }

    /// Overwrite a stored metafield value directly.
    pub fn set_metafield(&self, owner_gid: &str, namespace: &str, key: &str, value: &str) {
        self.state().metafields.insert(
            (owner_gid.to_string(), namespace.to_string(), key.to_string()),
            value.to_string(),
        );
    }

    /// Stop rejecting writes for an owner.
    pub fn accept_owner(&self, owner_gid: &str) {
        self.state().rejected_owners.remove(owner_gid);
    }

    /// Read a stored metafield value.
    pub fn metafield(&self, owner_gid: &str, namespace: &str, key: &str) -> Option<String> {
        self.state()
            .metafields
            .get(&(owner_gid.to_string(), namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Snapshot of every stored metafield.
    pub fn metafields(&self) -> BTreeMap<(String, String, String), String> {
        self.state().metafields.clone()
    }

    pub fn orders_page_calls(&self) -> usize {
        self.state().orders_page_calls
    }

    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<usize, StoreError> {
    cursor
        .map(|c| {
            c.parse::<usize>()
                .map_err(|_| StoreError::ParseError(format!("Invalid cursor: {}", c)))
        })
        .transpose()
        .map(|offset| offset.unwrap_or(0))
}

#[async_trait]
impl OrderStore for MockStore {
    async fn list_orders_page(
        &self,
        customer: CustomerId,
        since: Option<Timestamp>,
        cursor: Option<&str>,
    ) -> Result<OrderPage, StoreError> {
        let mut state = self.state();
        let call = state.orders_page_calls;
        state.orders_page_calls += 1;
        if state.fail_orders_page == Some(call) {
            return Err(StoreError::HttpError {
                status: 503,
                message: "Service unavailable".to_string(),
            });
        }

        let offset = parse_cursor(cursor)?;

        // The platform sorts by creation time only; ties keep insertion order.
        let mut matching: Vec<&Order> = state
            .orders
            .iter()
            .filter(|(c, o)| *c == customer && since.map_or(true, |s| o.created_at >= s))
            .map(|(_, o)| o)
            .collect();
        matching.sort_by_key(|o| o.created_at);

        let end = (offset + state.page_size).min(matching.len());
        let orders = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|o| {
                let mut listed = ListedOrder::from((*o).clone());
                if !state.inline_refunds {
                    listed.refunds = None;
                }
                listed
            })
            .collect();

        Ok(OrderPage {
            orders,
            next_cursor: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn list_refunds_page(
        &self,
        order: OrderId,
        cursor: Option<&str>,
    ) -> Result<RefundPage, StoreError> {
        let state = self.state();
        if state.failing_refunds.contains(&order) {
            return Err(StoreError::NetworkError(format!(
                "refund listing for order {} timed out",
                order
            )));
        }

        let refunds = state
            .orders
            .iter()
            .find(|(_, o)| o.id == order)
            .map(|(_, o)| o.refunds.clone())
            .ok_or_else(|| StoreError::HttpError {
                status: 404,
                message: format!("order {} not found", order),
            })?;

        let offset = parse_cursor(cursor)?;
        let end = (offset + state.page_size).min(refunds.len());
        Ok(RefundPage {
            amounts: refunds.get(offset..end).unwrap_or_default().to_vec(),
            next_cursor: (end < refunds.len()).then(|| end.to_string()),
        })
    }

    async fn get_order(&self, order: OrderId) -> Result<Option<OrderSummary>, StoreError> {
        Ok(self
            .state()
            .orders
            .iter()
            .find(|(_, o)| o.id == order)
            .map(|(c, o)| OrderSummary {
                id: o.id,
                customer: Some(*c),
                created_at: o.created_at,
            }))
    }

    async fn preceding_order(
        &self,
        customer: CustomerId,
        key: OrderKey,
    ) -> Result<Option<OrderId>, StoreError> {
        Ok(self
            .state()
            .orders
            .iter()
            .filter(|(c, o)| *c == customer && o.key() < key)
            .map(|(_, o)| o.key())
            .max()
            .map(|k| k.id))
    }

    async fn get_order_metafield(
        &self,
        order: OrderId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.metafield(&order.gid(), namespace, key))
    }

    async fn write_metafields(
        &self,
        batch: &[MetafieldInput],
    ) -> Result<Vec<UserError>, StoreError> {
        let mut state = self.state();
        let call = state.write_calls;
        state.write_calls += 1;
        if state.fail_write_call == Some(call) {
            return Err(StoreError::NetworkError("connection reset".to_string()));
        }

        let errors: Vec<UserError> = batch
            .iter()
            .enumerate()
            .filter(|(_, m)| state.rejected_owners.contains(&m.owner_id))
            .map(|(i, m)| UserError {
                field: Some(vec!["metafields".to_string(), i.to_string(), "ownerId".to_string()]),
                message: format!("Owner {} does not exist", m.owner_id),
            })
            .collect();

        // metafieldsSet is all-or-nothing per call.
        if errors.is_empty() {
            for m in batch {
                state.metafields.insert(
                    (m.owner_id.clone(), m.namespace.clone(), m.key.clone()),
                    m.value.clone(),
                );
            }
        }

        Ok(errors)
    }
}
