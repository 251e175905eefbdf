//! Metafield writer: pushes derived ledger fields back onto orders and the customer.

use crate::domain::{CustomerDerived, CustomerId, OrderDerived, OrderId};
use crate::store::{MetafieldInput, MetafieldType, OrderStore, StoreError, UserError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// The store accepts at most 25 metafields per `metafieldsSet` call.
const MAX_METAFIELDS_PER_CALL: usize = 25;
const FIELDS_PER_OWNER: usize = 3;

/// Namespace/key pair of one metafield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKey {
    pub namespace: String,
    pub key: String,
}

impl FieldKey {
    pub fn new(namespace: &str, key: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }
    }
}

/// Where each derived value lives in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetafieldKeys {
    pub order_cumulative_spend: FieldKey,
    pub order_shares: FieldKey,
    pub order_remainder: FieldKey,
    pub customer_cumulative_spend: FieldKey,
    pub customer_shares: FieldKey,
    pub customer_remainder: FieldKey,
}

impl Default for MetafieldKeys {
    fn default() -> Self {
        Self {
            order_cumulative_spend: FieldKey::new("custom", "osszes_koltes"),
            order_shares: FieldKey::new("custom", "order_share"),
            order_remainder: FieldKey::new("custom", "fennmarado_osszeg"),
            customer_cumulative_spend: FieldKey::new("loyalty", "net_spent_total"),
            customer_shares: FieldKey::new("loyalty", "reszvenyek_szama"),
            customer_remainder: FieldKey::new("custom", "jelenlegi_fennmarado"),
        }
    }
}

#[derive(Debug)]
pub enum WriteFailure {
    /// The mutation call itself failed.
    Transport(StoreError),
    /// The store rejected fields in the batch.
    Rejected(Vec<UserError>),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFailure::Transport(err) => write!(f, "{}", err),
            WriteFailure::Rejected(errors) => {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "rejected: {}", messages.join("; "))
            }
        }
    }
}

/// Metafield write failed. Orders before `orders_written` (in fold order)
/// were persisted; the customer record was not.
#[derive(Debug, Error)]
#[error("metafield write failed after {orders_written} orders: {failure}")]
pub struct WriteError {
    pub failure: WriteFailure,
    pub orders_written: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub orders_written: usize,
    pub calls: usize,
}

#[derive(Debug, Clone)]
pub struct MetafieldWriter {
    store: Arc<dyn OrderStore>,
    keys: MetafieldKeys,
}

impl MetafieldWriter {
    pub fn new(store: Arc<dyn OrderStore>, keys: MetafieldKeys) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &MetafieldKeys {
        &self.keys
    }

    fn field(owner: String, key: &FieldKey, value_type: MetafieldType, value: String) -> MetafieldInput {
        MetafieldInput {
            owner_id: owner,
            namespace: key.namespace.clone(),
            key: key.key.clone(),
            value_type,
            value,
        }
    }

    /// The three fields written on an order.
    pub fn order_metafields(&self, order: OrderId, derived: &OrderDerived) -> Vec<MetafieldInput> {
        let owner = order.gid();
        vec![
            Self::field(
                owner.clone(),
                &self.keys.order_cumulative_spend,
                MetafieldType::NumberDecimal,
                derived.state.cumulative_spend.to_fixed_2(),
            ),
            Self::field(
                owner.clone(),
                &self.keys.order_shares,
                MetafieldType::NumberInteger,
                derived.order_shares.to_canonical_string(),
            ),
            Self::field(
                owner,
                &self.keys.order_remainder,
                MetafieldType::NumberDecimal,
                derived.state.remainder.to_fixed_2(),
            ),
        ]
    }

    /// The three fields written on the customer.
    pub fn customer_metafields(
        &self,
        customer: CustomerId,
        derived: &CustomerDerived,
    ) -> Vec<MetafieldInput> {
        let owner = customer.gid();
        vec![
            Self::field(
                owner.clone(),
                &self.keys.customer_cumulative_spend,
                MetafieldType::NumberDecimal,
                derived.cumulative_spend.to_fixed_2(),
            ),
            Self::field(
                owner.clone(),
                &self.keys.customer_shares,
                MetafieldType::NumberInteger,
                derived.cumulative_shares.to_canonical_string(),
            ),
            Self::field(
                owner,
                &self.keys.customer_remainder,
                MetafieldType::NumberDecimal,
                derived.remainder.to_fixed_2(),
            ),
        ]
    }

    /// Write per-order fields in fold order, then the customer fields.
    ///
    /// Each order's fields share one mutation call, so an order is either
    /// fully written or not at all. A failure stops the run; everything
    /// before it stays written, leaving the store consistent with a prefix
    /// of the fold. Values are formatted deterministically, so re-sending an
    /// unchanged ledger rewrites identical strings.
    pub async fn write(
        &self,
        customer: CustomerId,
        orders: &[(OrderId, OrderDerived)],
        customer_derived: &CustomerDerived,
    ) -> Result<WriteSummary, WriteError> {
        let orders_per_call = MAX_METAFIELDS_PER_CALL / FIELDS_PER_OWNER;
        let mut summary = WriteSummary {
            orders_written: 0,
            calls: 0,
        };

        for chunk in orders.chunks(orders_per_call) {
            let batch: Vec<MetafieldInput> = chunk
                .iter()
                .flat_map(|(id, derived)| self.order_metafields(*id, derived))
                .collect();
            self.send(&batch, summary.orders_written).await?;
            summary.calls += 1;
            summary.orders_written += chunk.len();
            debug!(
                "Wrote derived fields for {}/{} orders of customer={}",
                summary.orders_written,
                orders.len(),
                customer
            );
        }

        let batch = self.customer_metafields(customer, customer_derived);
        self.send(&batch, summary.orders_written).await?;
        summary.calls += 1;

        Ok(summary)
    }

    async fn send(&self, batch: &[MetafieldInput], orders_written: usize) -> Result<(), WriteError> {
        let user_errors = self.store.write_metafields(batch).await.map_err(|e| {
            error!("Metafield mutation failed: {}", e);
            WriteError {
                failure: WriteFailure::Transport(e),
                orders_written,
            }
        })?;

        if !user_errors.is_empty() {
            error!("Metafield mutation rejected: {:?}", user_errors);
            return Err(WriteError {
                failure: WriteFailure::Rejected(user_errors),
                orders_written,
            });
        }
        Ok(())
    }
}
