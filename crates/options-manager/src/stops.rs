//! Stop rules: stop loss, days-in-trade, days-to-expiry and the time cutoffs.

use chrono::NaiveDateTime;
use legwork_core::TradingCalendar;
use rust_decimal::Decimal;

use crate::position::Position;
use crate::types::CloseReason;

/// PnL (per share, whole order) below which the stop fires. `None` when no stop is configured.
///
/// The base stop is `-|open premium| * stop_loss_multiplier`. For credit
/// structures with `cap_stop_loss` and a known max loss it is never deeper than
/// the net max loss. A debit structure's max loss is its premium, so it has no cap.
#[must_use]
pub fn stop_loss_threshold(pos: &Position) -> Option<Decimal> {
    let multiplier = pos.thresholds.stop_loss_multiplier?;
    let premium = pos.open_order.premium;
    let stop = -premium.abs() * multiplier;
    match pos.open_order.max_loss {
        Some(max_loss) if pos.thresholds.cap_stop_loss && pos.is_credit() => {
            Some(stop.max(max_loss * Decimal::from(pos.quantity) + premium))
        }
        _ => Some(stop),
    }
}

/// Close if the loss is beyond the stop threshold.
#[must_use]
pub fn check_stop_loss(pos: &Position, pnl: Decimal) -> Option<CloseReason> {
    let threshold = stop_loss_threshold(pos)?;
    if pnl < threshold {
        tracing::warn!(
            order_tag = pos.order_tag,
            pnl = %pnl,
            threshold = %threshold,
            "Stop loss triggered"
        );
        return Some(CloseReason::StopLoss);
    }
    None
}

/// Hard DIT closes regardless of PnL; soft DIT only at or above breakeven.
#[must_use]
pub fn check_days_in_trade(pos: &Position, dit: i64, pnl: Decimal) -> Option<CloseReason> {
    let thresholds = &pos.thresholds;
    if thresholds.hard_dit.is_some_and(|limit| dit >= i64::from(limit)) {
        return Some(CloseReason::HardDit);
    }
    if thresholds.soft_dit.is_some_and(|limit| dit >= i64::from(limit)) && pnl >= Decimal::ZERO {
        return Some(CloseReason::SoftDit);
    }
    None
}

/// Same pair on remaining days. A threshold only applies to positions opened
/// with more DTE than the threshold, so a trade opened inside the window is not
/// closed on its first tick.
#[must_use]
pub fn check_days_to_expiry(pos: &Position, dte: i64, pnl: Decimal) -> Option<CloseReason> {
    let thresholds = &pos.thresholds;
    let applies = |limit: u32| {
        let limit = i64::from(limit);
        pos.open_dte > limit && dte <= limit
    };
    if thresholds.hard_dte.is_some_and(applies) {
        return Some(CloseReason::HardDte);
    }
    if thresholds.soft_dte.is_some_and(applies) && pnl >= Decimal::ZERO {
        return Some(CloseReason::SoftDte);
    }
    None
}

/// Close once the cutoff time is reached on the last trading day on or before expiry.
#[must_use]
pub fn check_expiry_cutoff(
    pos: &Position,
    now: NaiveDateTime,
    calendar: &dyn TradingCalendar,
) -> Option<CloseReason> {
    let cutoff = pos.thresholds.market_close_cutoff_time?;
    let last_day = calendar.last_trading_day(pos.expiry);
    let today = now.date();
    if today > last_day || (today == last_day && now.time() >= cutoff) {
        return Some(CloseReason::ExpiryCutoff);
    }
    None
}

#[must_use]
pub fn check_end_of_backtest(now: NaiveDateTime, cutoff: Option<NaiveDateTime>) -> Option<CloseReason> {
    cutoff
        .is_some_and(|cutoff| now >= cutoff)
        .then_some(CloseReason::EndOfBacktest)
}
