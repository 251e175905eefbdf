use crate::domain::{Decimal, LedgerError, Order};

/// Spend credited to the ledger for one order.
///
/// Cancelled orders contribute nothing, whatever their refund state.
/// Over-refunds clamp to zero.
pub fn effective_amount(order: &Order) -> Result<Decimal, LedgerError> {
    if order.is_cancelled() {
        return Ok(Decimal::zero());
    }
    let refunded = order.refunded_total()?;
    let net = order.subtotal.checked_sub(refunded).ok_or_else(|| {
        LedgerError::Overflow(format!("order {}: {} - {}", order.id, order.subtotal, refunded))
    })?;
    Ok(net.max(Decimal::zero()))
}
