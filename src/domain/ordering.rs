//! Stable order sorting for deterministic folding.

use crate::domain::Order;

/// Sort orders by `(created_at, id)` ascending.
///
/// The store sorts by creation time only; orders sharing a timestamp are
/// tie-broken by id so every run folds the same sequence.
pub fn sort_orders_deterministic(orders: &mut [Order]) {
    orders.sort_by_key(|o| o.key());
}

/// Drop repeated ids, keeping the first occurrence.
///
/// Cursor pagination over a live listing can hand back an order twice when a
/// neighbour is inserted between page fetches.
pub fn dedup_orders(orders: &mut Vec<Order>) -> usize {
    let before = orders.len();
    let mut seen = std::collections::HashSet::with_capacity(before);
    orders.retain(|o| seen.insert(o.id));
    before - orders.len()
}
