use crate::domain::{CustomerDerived, Decimal, LedgerError, LedgerState, Order, OrderDerived, OrderId, OrderKey, ShareUnit};

use super::effective_amount;

/// One folded order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldEntry {
    pub order_id: OrderId,
    pub key: OrderKey,
    pub effective: Decimal,
    pub derived: OrderDerived,
}

/// Output of a fold pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub seed: LedgerState,
    pub entries: Vec<FoldEntry>,
    pub final_state: LedgerState,
}

impl Fold {
    /// The customer-level write-back: the state after the last order, or the
    /// seed when nothing was folded.
    pub fn customer_derived(&self) -> CustomerDerived {
        self.final_state
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of per-order shares across the pass.
    pub fn shares_earned(&self) -> Decimal {
        self.entries.iter().map(|e| e.derived.order_shares).sum()
    }
}

/// Sequential fold of effective amounts into cumulative ledger state.
#[derive(Debug, Clone, Copy)]
pub struct LedgerFolder {
    unit: ShareUnit,
}

impl LedgerFolder {
    pub fn new(unit: ShareUnit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> ShareUnit {
        self.unit
    }

    /// Fold `orders` on top of `seed`.
    ///
    /// `orders` must already be sorted by `(created_at, id)`; each step's
    /// output state is the next step's input. Fails on the first order whose
    /// arithmetic overflows; nothing partial is returned.
    pub fn fold(&self, seed: LedgerState, orders: &[Order]) -> Result<Fold, LedgerError> {
        let mut entries = Vec::with_capacity(orders.len());
        let final_state = orders.iter().try_fold(seed, |previous, order| {
            let effective = effective_amount(order)?;
            let current = previous.advance(effective, self.unit)?;
            entries.push(FoldEntry {
                order_id: order.id,
                key: order.key(),
                effective,
                derived: OrderDerived::between(previous, current),
            });
            Ok::<_, LedgerError>(current)
        })?;

        Ok(Fold {
            seed,
            entries,
            final_state,
        })
    }
}
