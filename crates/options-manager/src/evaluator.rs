//! Ordered close rules.
//!
//! Every rule runs on every evaluation so that simultaneous reasons are all
//! reported, in this order: stop loss, profit target, DIT, DTE, expiry cutoff,
//! end-of-backtest cutoff, then the strategy's custom condition.

use chrono::NaiveDateTime;
use legwork_core::TradingCalendar;
use rust_decimal::Decimal;

use crate::position::Position;
use crate::stops;
use crate::targets;
use crate::types::{CloseReason, OrderStyle};

/// Per-tick inputs the position cannot know by itself.
#[derive(Clone, Copy)]
pub struct RiskInputs<'a> {
    pub now: NaiveDateTime,
    /// Per-share PnL of the whole order at this tick.
    pub pnl: Decimal,
    /// Trading days since the open fill.
    pub dit: i64,
    /// Trading days to expiry.
    pub dte: i64,
    pub end_of_backtest: Option<NaiveDateTime>,
    pub calendar: &'a dyn TradingCalendar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskVerdict {
    pub reasons: Vec<CloseReason>,
    pub order_style: OrderStyle,
}

impl RiskVerdict {
    #[must_use]
    pub fn should_close(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// Reason labels joined with ", ".
    #[must_use]
    pub fn label(&self) -> String {
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Runs every close rule against `pos`. `custom` is the strategy's own exit reason, if any.
#[must_use]
pub fn evaluate(pos: &Position, inputs: &RiskInputs<'_>, custom: Option<String>) -> RiskVerdict {
    let reasons: Vec<CloseReason> = [
        stops::check_stop_loss(pos, inputs.pnl),
        targets::check_profit_target(pos, inputs.pnl),
        stops::check_days_in_trade(pos, inputs.dit, inputs.pnl),
        stops::check_days_to_expiry(pos, inputs.dte, inputs.pnl),
        stops::check_expiry_cutoff(pos, inputs.now, inputs.calendar),
        stops::check_end_of_backtest(inputs.now, inputs.end_of_backtest),
        custom.map(CloseReason::Custom),
    ]
    .into_iter()
    .flatten()
    .collect();

    let order_style = if !pos.thresholds.use_limit_orders || reasons.iter().any(CloseReason::forces_market) {
        OrderStyle::Market
    } else {
        OrderStyle::Limit
    };

    RiskVerdict { reasons, order_style }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::fixtures::{at, opened_put_credit_spread};
    use legwork_core::WeekdayCalendar;
    use rust_decimal_macros::dec;

    fn make_inputs(calendar: &WeekdayCalendar, pnl: Decimal, dit: i64, dte: i64) -> RiskInputs<'_> {
        RiskInputs {
            now: at(2024, 1, 22, 10, 0),
            pnl,
            dit,
            dte,
            end_of_backtest: None,
            calendar,
        }
    }

    #[test]
    fn nothing_fires_on_a_quiet_position() {
        let calendar = WeekdayCalendar::new();
        let verdict = evaluate(&opened_put_credit_spread(1), &make_inputs(&calendar, dec!(0.2), 10, 19), None);
        assert!(!verdict.should_close());
        assert_eq!(verdict.order_style, OrderStyle::Limit);
    }

    #[test]
    fn stop_loss_forces_market() {
        let calendar = WeekdayCalendar::new();
        let mut pos = opened_put_credit_spread(1);
        pos.thresholds.stop_loss_multiplier = Some(dec!(2.0));
        let verdict = evaluate(&pos, &make_inputs(&calendar, dec!(-4.50), 10, 19), None);
        assert_eq!(verdict.reasons, vec![CloseReason::StopLoss]);
        assert_eq!(verdict.order_style, OrderStyle::Market);
    }

    #[test]
    fn simultaneous_reasons_keep_rule_order() {
        let calendar = WeekdayCalendar::new();
        let mut pos = opened_put_credit_spread(1);
        pos.thresholds.hard_dit = Some(5);
        pos.thresholds.soft_dte = Some(20);
        let verdict = evaluate(
            &pos,
            &make_inputs(&calendar, dec!(1.80), 10, 19),
            Some("Delta breach".to_string()),
        );
        assert_eq!(
            verdict.reasons,
            vec![
                CloseReason::ProfitTarget,
                CloseReason::HardDit,
                CloseReason::SoftDte,
                CloseReason::Custom("Delta breach".to_string()),
            ]
        );
        assert_eq!(verdict.label(), "Profit target, Hard Dit cutoff, Soft Dte cutoff, Delta breach");
        assert_eq!(verdict.order_style, OrderStyle::Limit);
    }

    #[test]
    fn hard_stops_fire_when_soft_also_matches() {
        let calendar = WeekdayCalendar::new();
        let mut pos = opened_put_credit_spread(1);
        pos.thresholds.soft_dit = Some(3);
        pos.thresholds.hard_dit = Some(5);
        pos.thresholds.soft_dte = Some(10);
        pos.thresholds.hard_dte = Some(12);
        let verdict = evaluate(&pos, &make_inputs(&calendar, dec!(0.5), 6, 9), None);
        assert_eq!(verdict.reasons, vec![CloseReason::HardDit, CloseReason::HardDte]);
    }

    #[test]
    fn end_of_backtest_overrides_limit_style() {
        let calendar = WeekdayCalendar::new();
        let pos = opened_put_credit_spread(1);
        let inputs = RiskInputs {
            end_of_backtest: Some(at(2024, 1, 22, 9, 30)),
            ..make_inputs(&calendar, dec!(1.9), 10, 19)
        };
        let verdict = evaluate(&pos, &inputs, None);
        assert_eq!(verdict.reasons, vec![CloseReason::ProfitTarget, CloseReason::EndOfBacktest]);
        assert_eq!(verdict.order_style, OrderStyle::Market);
    }

    #[test]
    fn limit_orders_disabled_means_market() {
        let calendar = WeekdayCalendar::new();
        let mut pos = opened_put_credit_spread(1);
        pos.thresholds.use_limit_orders = false;
        let verdict = evaluate(&pos, &make_inputs(&calendar, dec!(1.9), 10, 19), None);
        assert_eq!(verdict.reasons, vec![CloseReason::ProfitTarget]);
        assert_eq!(verdict.order_style, OrderStyle::Market);
    }
}
