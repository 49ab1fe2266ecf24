//! Profit target rule.

use rust_decimal::Decimal;

use crate::position::Position;
use crate::types::CloseReason;

/// PnL (per share, whole order) at which profits are taken.
///
/// An absolute `target_profit` on the position wins over the
/// `profit_target` fraction of the open premium.
#[must_use]
pub fn profit_target(pos: &Position) -> Option<Decimal> {
    pos.target_profit.or_else(|| {
        pos.thresholds
            .profit_target
            .map(|fraction| pos.open_order.premium.abs() * fraction)
    })
}

#[must_use]
pub fn check_profit_target(pos: &Position, pnl: Decimal) -> Option<CloseReason> {
    let target = profit_target(pos)?;
    if pnl >= target {
        tracing::info!(
            order_tag = pos.order_tag,
            pnl = %pnl,
            target = %target,
            "Profit target hit"
        );
        return Some(CloseReason::ProfitTarget);
    }
    None
}
