use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calendar::WeekdayCalendar;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub manager: ManagerConfig,
    pub store: StoreConfig,
    /// Per-strategy settings keyed by strategy kind tag (e.g. "PutCreditSpread").
    pub strategies: BTreeMap<String, StrategyConfig>,
    /// Exchange holidays on top of weekends.
    pub holidays: Vec<NaiveDate>,
}

impl AppConfig {
    /// Weekday calendar minus the configured holidays.
    #[must_use]
    pub fn calendar(&self) -> WeekdayCalendar {
        WeekdayCalendar::with_holidays(self.holidays.iter().copied())
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Positions are managed only on minutes divisible by this value.
    pub manage_position_frequency: u32,
    /// Every open position is liquidated at market once this instant is reached.
    pub end_of_backtest_cutoff: Option<NaiveDateTime>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            manage_position_frequency: 1,
            end_of_backtest_cutoff: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the position document.
    pub dir: PathBuf,
    /// Blob key of the position document.
    pub key: String,
    /// Terminal positions older than this many days are purged from the archive.
    pub retention_days: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("state"),
            key: "positions.json".to_string(),
            retention_days: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub thresholds: RiskThresholds,
    pub selector: SelectorConfig,
}

/// Exit rules for one strategy. Copied onto each position when it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Fraction of the open premium at which profits are taken (0.8 = 80%).
    pub profit_target: Option<Decimal>,
    /// Stop when PnL < -|open premium| * multiplier.
    pub stop_loss_multiplier: Option<Decimal>,
    /// Never place the stop beyond the theoretical max loss of the structure.
    pub cap_stop_loss: bool,
    /// Close once profitable after this many days in trade.
    pub soft_dit: Option<u32>,
    /// Close unconditionally after this many days in trade.
    pub hard_dit: Option<u32>,
    /// Close once profitable with this many days to expiry left.
    pub soft_dte: Option<u32>,
    /// Close unconditionally with this many days to expiry left.
    pub hard_dte: Option<u32>,
    /// Time of day on the last trading day before expiry after which positions are closed.
    pub market_close_cutoff_time: Option<NaiveTime>,
    pub use_limit_orders: bool,
    /// Per-leg price concession applied to close limit prices.
    pub slippage: Decimal,
    pub validate_bid_ask_spread: bool,
    /// Max leg spread as a fraction of the open premium per unit.
    pub bid_ask_spread_ratio: Decimal,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            profit_target: Some(Decimal::new(8, 1)),
            stop_loss_multiplier: Some(Decimal::new(19, 1)),
            cap_stop_loss: true,
            soft_dit: None,
            hard_dit: None,
            soft_dte: None,
            hard_dte: None,
            market_close_cutoff_time: None,
            use_limit_orders: true,
            slippage: Decimal::ZERO,
            validate_bid_ask_spread: true,
            bid_ask_spread_ratio: Decimal::new(3, 1),
        }
    }
}

/// Contract selection window for one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Target DTE (upper bound of the window).
    pub dte: u32,
    /// Width of the DTE window below `dte`.
    pub dte_window: u32,
    /// Strike window, as offsets from the ATM strike's rank.
    pub min_strike_rank: i32,
    pub max_strike_rank: i32,
    pub use_furthest_expiry: bool,
    pub dynamic_dte_selection: bool,
    pub allow_multiple_entries_per_expiry: bool,
}

impl SelectorConfig {
    /// `(min_dte, max_dte)`, never negative.
    #[must_use]
    pub fn dte_range(&self) -> (i64, i64) {
        let max_dte = i64::from(self.dte);
        ((max_dte - i64::from(self.dte_window)).max(0), max_dte)
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            dte: 0,
            dte_window: 0,
            min_strike_rank: -20,
            max_strike_rank: 20,
            use_furthest_expiry: true,
            dynamic_dte_selection: false,
            allow_multiple_entries_per_expiry: false,
        }
    }
}
