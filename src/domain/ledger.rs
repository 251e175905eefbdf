//! Share ledger values: the share unit, the running state and its snapshots.

use crate::domain::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("share unit must be positive, got {0}")]
    NonPositiveShareUnit(Decimal),
    #[error("ledger arithmetic overflow: {0}")]
    Overflow(String),
}

fn overflow(op: &str, lhs: Decimal, rhs: Decimal) -> LedgerError {
    LedgerError::Overflow(format!("{} {} {}", lhs, op, rhs))
}

/// Sum `amounts`, failing instead of wrapping or panicking.
pub fn checked_sum(amounts: impl IntoIterator<Item = Decimal>) -> Result<Decimal, LedgerError> {
    amounts.into_iter().try_fold(Decimal::zero(), |acc, amount| {
        acc.checked_add(amount).ok_or_else(|| overflow("+", acc, amount))
    })
}

/// Currency threshold: every full multiple of cumulative spend earns one share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareUnit(Decimal);

impl ShareUnit {
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if !value.is_positive() {
            return Err(LedgerError::NonPositiveShareUnit(value));
        }
        Ok(ShareUnit(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Whole shares contained in `spend`.
    ///
    /// Computed as `(spend - spend mod unit) / unit`, an exact multiple, so
    /// no rounding at the 28th digit can push a value across a share boundary.
    pub fn shares_in(&self, spend: Decimal) -> Result<Decimal, LedgerError> {
        let remainder = self.remainder_of(spend)?;
        let whole = spend
            .checked_sub(remainder)
            .ok_or_else(|| overflow("-", spend, remainder))?;
        let shares = whole
            .checked_div(self.0)
            .ok_or_else(|| overflow("/", whole, self.0))?;
        Ok(Decimal::new(shares.inner().round()))
    }

    pub fn remainder_of(&self, spend: Decimal) -> Result<Decimal, LedgerError> {
        spend
            .checked_rem(self.0)
            .ok_or_else(|| overflow("mod", spend, self.0))
    }
}

impl Default for ShareUnit {
    fn default() -> Self {
        ShareUnit(Decimal::from(12_700u64))
    }
}

impl std::fmt::Display for ShareUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Running ledger accumulator.
///
/// Immutable: each step of a fold produces a new value via [`LedgerState::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    pub cumulative_spend: Decimal,
    pub cumulative_shares: Decimal,
    pub remainder: Decimal,
}

impl LedgerState {
    /// The state of a customer with no qualifying orders.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Derive shares and remainder from a cumulative spend.
    pub fn from_spend(cumulative_spend: Decimal, unit: ShareUnit) -> Result<Self, LedgerError> {
        Ok(Self {
            cumulative_spend,
            cumulative_shares: unit.shares_in(cumulative_spend)?,
            remainder: unit.remainder_of(cumulative_spend)?,
        })
    }

    /// The state after crediting `amount`.
    pub fn advance(self, amount: Decimal, unit: ShareUnit) -> Result<Self, LedgerError> {
        let spend = self
            .cumulative_spend
            .checked_add(amount)
            .ok_or_else(|| overflow("+", self.cumulative_spend, amount))?;
        Self::from_spend(spend, unit)
    }
}

/// Per-order write-back: the ledger as of and including this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDerived {
    #[serde(flatten)]
    pub state: LedgerState,
    /// Shares earned by this order alone, given history order.
    pub order_shares: Decimal,
}

impl OrderDerived {
    pub fn between(previous: LedgerState, current: LedgerState) -> Self {
        Self {
            state: current,
            order_shares: current.cumulative_shares - previous.cumulative_shares,
        }
    }
}

/// Per-customer write-back: the ledger after the last folded order.
pub type CustomerDerived = LedgerState;
