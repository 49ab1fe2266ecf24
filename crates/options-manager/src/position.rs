//! Canonical in-memory representation of one multi-leg trade.
//!
//! Premium sign convention: sells are credits. `open_premium` is positive for
//! credit structures and negative for debit structures, `close_premium` has the
//! opposite sign of a normal close, and `pnl = open_premium + close_premium`.
//! Both are in currency (already scaled by the contract multiplier); the
//! working orders' `premium` fields are the same amounts per share.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use legwork_core::{ContractDescriptor, LegSide, OptionRight, OrderSide, RiskThresholds, TradingCalendar};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PositionError;
use crate::strategy::StrategyKind;

/// Standard US equity/index option multiplier.
pub const DEFAULT_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

/// Lifecycle of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Created,
    Submitted,
    PartiallyFilled,
    OpenFilled,
    Monitoring,
    CloseSubmitted,
    Closed,
    Expired,
    Cancelled,
}

impl PositionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Expired | Self::Cancelled)
    }
}

/// Which of the position's two orders an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Open,
    Close,
}

/// One constituent contract of the position. Immutable once the open order fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub contract_id: String,
    pub side: LegSide,
    pub right: OptionRight,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    /// Contracts of this leg per unit of the structure (e.g. 2 for a butterfly body).
    pub ratio: u32,
    pub multiplier: Decimal,
}

impl Leg {
    #[must_use]
    pub fn from_contract(contract: &ContractDescriptor, side: LegSide, ratio: u32) -> Self {
        Self {
            contract_id: contract.id.clone(),
            side,
            right: contract.right,
            strike: contract.strike,
            expiry: contract.expiry,
            ratio,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Signed contracts held per unit: negative for short legs.
    #[must_use]
    pub fn signed_ratio(&self) -> Decimal {
        self.side.sign() * Decimal::from(self.ratio)
    }
}

/// Open or close order of a position, with its fill progress and price tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingOrder {
    pub limit_price: Option<Decimal>,
    /// Net price per unit of the structure. `None` until the order is fully filled.
    pub fill_price: Option<Decimal>,
    pub filled: bool,
    /// Contracts filled so far, across all legs.
    pub fills: u32,
    /// Contracts filled so far per leg, keyed by contract id.
    pub leg_fills: BTreeMap<String, u32>,
    /// Net premium per share for the whole order quantity.
    pub premium: Decimal,
    pub mid_price: Option<Decimal>,
    pub mid_price_min: Option<Decimal>,
    pub mid_price_max: Option<Decimal>,
    /// Summed bid-ask spread of the legs when the order was submitted.
    pub bid_ask_spread: Option<Decimal>,
    /// Theoretical max loss per share per unit, negative. Open order only.
    pub max_loss: Option<Decimal>,
    pub submitted_at: Option<NaiveDateTime>,
    pub filled_at: Option<NaiveDateTime>,
}

impl WorkingOrder {
    /// Tracks the running min/max mid price while the order is working.
    pub fn observe_mid(&mut self, mid: Decimal) {
        self.mid_price = Some(mid);
        self.mid_price_min = Some(self.mid_price_min.map_or(mid, |m| m.min(mid)));
        self.mid_price_max = Some(self.mid_price_max.map_or(mid, |m| m.max(mid)));
    }
}

/// A fill notification for one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFill {
    pub contract_id: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
    pub time: NaiveDateTime,
}

/// What a fill did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The order was already filled; nothing changed.
    Duplicate,
    /// The position is retired; the fill was dropped.
    Ignored,
    Partial,
    OpenFilled,
    Closed,
}

/// Everything needed to create a position from the selected contracts.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub order_id: u64,
    pub strategy: StrategyKind,
    pub legs: Vec<Leg>,
    pub quantity: u32,
    pub thresholds: RiskThresholds,
    pub opened_at: NaiveDateTime,
    pub open_dte: i64,
    pub target_profit: Option<Decimal>,
    pub max_loss: Option<Decimal>,
    pub linked_order_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub order_id: u64,
    pub order_tag: String,
    #[serde(rename = "strategy_kind")]
    pub strategy: StrategyKind,
    pub legs: Vec<Leg>,
    /// Units of the structure.
    pub quantity: u32,
    /// Earliest leg expiry.
    pub expiry: NaiveDate,
    #[serde(default)]
    pub thresholds: RiskThresholds,
    /// Absolute profit target per share, overriding `thresholds.profit_target`.
    #[serde(default)]
    pub target_profit: Option<Decimal>,
    /// Tag of the closed trade whose DTE drove this position's expiry choice.
    #[serde(default)]
    pub linked_order_tag: Option<String>,
    pub state: PositionState,
    pub open_order: WorkingOrder,
    pub close_order: WorkingOrder,
    pub opened_at: NaiveDateTime,
    pub open_dte: i64,
    #[serde(default)]
    pub open_premium: Decimal,
    #[serde(default)]
    pub close_premium: Decimal,
    #[serde(default)]
    pub pnl: Decimal,
    #[serde(default)]
    pub pnl_min: Decimal,
    #[serde(default)]
    pub pnl_max: Decimal,
    #[serde(default)]
    pub pnl_min_dit: i64,
    #[serde(default)]
    pub pnl_max_dit: i64,
    #[serde(default)]
    pub close_reasons: Vec<String>,
    #[serde(default)]
    pub close_dte: Option<i64>,
    #[serde(default)]
    pub dit: Option<i64>,
    #[serde(default)]
    pub closed_at: Option<NaiveDateTime>,
}

impl Position {
    /// Creates a position in the `Created` state.
    ///
    /// # Errors
    ///
    /// `InvalidPosition` when [`Position::validate`] rejects the new position.
    pub fn new(request: NewPosition) -> Result<Self, PositionError> {
        let expiry = request
            .legs
            .iter()
            .map(|leg| leg.expiry)
            .min()
            .unwrap_or(request.opened_at.date());

        let position = Self {
            order_id: request.order_id,
            order_tag: format!("{}-{}", request.strategy, request.order_id),
            strategy: request.strategy,
            legs: request.legs,
            quantity: request.quantity,
            expiry,
            thresholds: request.thresholds,
            target_profit: request.target_profit,
            linked_order_tag: request.linked_order_tag,
            state: PositionState::Created,
            open_order: WorkingOrder {
                max_loss: request.max_loss,
                ..WorkingOrder::default()
            },
            close_order: WorkingOrder::default(),
            opened_at: request.opened_at,
            open_dte: request.open_dte,
            open_premium: Decimal::ZERO,
            close_premium: Decimal::ZERO,
            pnl: Decimal::ZERO,
            pnl_min: Decimal::ZERO,
            pnl_max: Decimal::ZERO,
            pnl_min_dit: 0,
            pnl_max_dit: 0,
            close_reasons: Vec::new(),
            close_dte: None,
            dit: None,
            closed_at: None,
        };
        position.validate()?;
        Ok(position)
    }

    /// Checks the structural invariants every position must hold.
    ///
    /// # Errors
    ///
    /// `InvalidPosition` when there are no legs, the quantity is zero, or a leg
    /// has a zero ratio or a non-positive multiplier.
    pub fn validate(&self) -> Result<(), PositionError> {
        if self.legs.is_empty() {
            return Err(PositionError::InvalidPosition(format!(
                "order {} has no legs",
                self.order_id
            )));
        }
        if self.quantity == 0 {
            return Err(PositionError::InvalidPosition(format!(
                "order {} has zero quantity",
                self.order_id
            )));
        }
        if let Some(leg) = self.legs.iter().find(|leg| leg.ratio == 0) {
            return Err(PositionError::InvalidPosition(format!(
                "leg {} of order {} has zero ratio",
                leg.contract_id, self.order_id
            )));
        }
        if let Some(leg) = self.legs.iter().find(|leg| leg.multiplier <= Decimal::ZERO) {
            return Err(PositionError::InvalidPosition(format!(
                "leg {} of order {} has multiplier {}",
                leg.contract_id, self.order_id, leg.multiplier
            )));
        }
        Ok(())
    }

    /// Opened for net premium received.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        self.strategy.is_credit()
    }

    #[must_use]
    pub fn multiplier(&self) -> Decimal {
        self.legs.first().map_or(DEFAULT_MULTIPLIER, |leg| leg.multiplier)
    }

    /// Contracts across all legs needed to fill one order.
    #[must_use]
    pub fn contracts_per_order(&self) -> u32 {
        self.legs.iter().map(|leg| leg.ratio).sum::<u32>() * self.quantity
    }

    /// Only positions whose open order is filled, and which are not already closing, are evaluated.
    #[must_use]
    pub fn is_eligible_for_evaluation(&self) -> bool {
        self.open_order.filled && matches!(self.state, PositionState::OpenFilled | PositionState::Monitoring)
    }

    #[must_use]
    pub fn leg(&self, contract_id: &str) -> Option<&Leg> {
        self.legs.iter().find(|leg| leg.contract_id == contract_id)
    }

    /// Trading days since the open order filled.
    #[must_use]
    pub fn days_in_trade(&self, today: NaiveDate, calendar: &dyn TradingCalendar) -> Option<i64> {
        self.open_order
            .filled_at
            .map(|filled| calendar.trading_days_between(filled.date(), today))
    }

    /// Trading days left until expiry.
    #[must_use]
    pub fn days_to_expiry(&self, today: NaiveDate, calendar: &dyn TradingCalendar) -> i64 {
        calendar.trading_days_between(today, self.expiry)
    }

    /// Records that the open order was handed to execution.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the position is `Created`.
    pub fn mark_submitted(
        &mut self,
        limit_price: Option<Decimal>,
        mid_price: Decimal,
        bid_ask_spread: Decimal,
        time: NaiveDateTime,
    ) -> Result<(), PositionError> {
        if self.state != PositionState::Created {
            return Err(self.invalid("submit the open order"));
        }
        self.open_order.limit_price = limit_price;
        self.open_order.bid_ask_spread = Some(bid_ask_spread);
        self.open_order.submitted_at = Some(time);
        self.open_order.observe_mid(mid_price);
        self.state = PositionState::Submitted;
        Ok(())
    }

    /// Applies one leg fill to the open or close order.
    ///
    /// A fill for an order that is already filled is a logged no-op.
    ///
    /// # Errors
    ///
    /// `UnknownContract` when the fill is for a contract outside the legs,
    /// `InvalidTransition` when the order is not working.
    pub fn record_fill(&mut self, kind: OrderKind, fill: &LegFill) -> Result<FillOutcome, PositionError> {
        let already_filled = match kind {
            OrderKind::Open => self.open_order.filled,
            OrderKind::Close => self.close_order.filled,
        };
        if already_filled {
            debug!(
                order_id = self.order_id,
                contract = fill.contract_id,
                ?kind,
                "Duplicate fill for a filled order ignored"
            );
            return Ok(FillOutcome::Duplicate);
        }

        let accepts = match kind {
            OrderKind::Open => matches!(
                self.state,
                PositionState::Created | PositionState::Submitted | PositionState::PartiallyFilled
            ),
            OrderKind::Close => self.state == PositionState::CloseSubmitted,
        };
        if !accepts {
            return Err(self.invalid("record a fill"));
        }

        let (multiplier, leg_target) = self
            .leg(&fill.contract_id)
            .map(|leg| (leg.multiplier, leg.ratio * self.quantity))
            .ok_or_else(|| PositionError::UnknownContract {
                order_id: self.order_id,
                contract_id: fill.contract_id.clone(),
            })?;

        let leg_filled = self
            .order(kind)
            .leg_fills
            .get(&fill.contract_id)
            .copied()
            .unwrap_or(0);
        if leg_filled >= leg_target {
            debug!(
                order_id = self.order_id,
                contract = fill.contract_id,
                ?kind,
                "Duplicate fill for a filled leg ignored"
            );
            return Ok(FillOutcome::Duplicate);
        }
        let accepted = fill.quantity.min(leg_target - leg_filled);
        if accepted < fill.quantity {
            warn!(
                order_id = self.order_id,
                contract = fill.contract_id,
                quantity = fill.quantity,
                accepted,
                "Leg overfilled, excess ignored"
            );
        }

        // Buying debits, selling credits.
        let amount = fill.side.sign() * Decimal::from(accepted) * fill.price * multiplier;
        let order = match kind {
            OrderKind::Open => {
                self.open_premium -= amount;
                &mut self.open_order
            }
            OrderKind::Close => {
                self.close_premium -= amount;
                &mut self.close_order
            }
        };
        order.fills += accepted;
        *order.leg_fills.entry(fill.contract_id.clone()).or_insert(0) += accepted;

        if !self.is_order_complete(kind) {
            if kind == OrderKind::Open {
                self.state = PositionState::PartiallyFilled;
            }
            return Ok(FillOutcome::Partial);
        }

        let multiplier = self.multiplier();
        let units = Decimal::from(self.quantity);
        let premium = match kind {
            OrderKind::Open => self.open_premium,
            OrderKind::Close => self.close_premium,
        } / multiplier;
        let order = match kind {
            OrderKind::Open => &mut self.open_order,
            OrderKind::Close => &mut self.close_order,
        };
        order.filled = true;
        order.filled_at = Some(fill.time);
        order.premium = premium;
        order.fill_price = Some(premium / units);

        match kind {
            OrderKind::Open => {
                self.state = PositionState::OpenFilled;
                info!(
                    order_tag = self.order_tag,
                    premium = %self.open_premium.round_dp(2),
                    fill_price = %(premium / units).round_dp(2),
                    "OPEN filled"
                );
                Ok(FillOutcome::OpenFilled)
            }
            OrderKind::Close => {
                self.pnl = self.open_premium + self.close_premium;
                self.state = PositionState::Closed;
                self.closed_at = Some(fill.time);
                info!(
                    order_tag = self.order_tag,
                    premium = %self.close_premium.round_dp(2),
                    pnl = %self.pnl.round_dp(2),
                    reasons = ?self.close_reasons,
                    "CLOSE filled"
                );
                Ok(FillOutcome::Closed)
            }
        }
    }

    /// First evaluation after the open fill.
    pub fn begin_monitoring(&mut self) {
        if self.state == PositionState::OpenFilled {
            self.state = PositionState::Monitoring;
        }
    }

    /// Moves the position to `CloseSubmitted` and records why and at what prices.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the position is `OpenFilled` or `Monitoring`.
    pub fn submit_close(&mut self, request: CloseRequest) -> Result<(), PositionError> {
        if !matches!(self.state, PositionState::OpenFilled | PositionState::Monitoring) {
            return Err(self.invalid("submit the close order"));
        }
        self.close_order = WorkingOrder {
            limit_price: request.limit_price,
            bid_ask_spread: Some(request.bid_ask_spread),
            submitted_at: Some(request.time),
            ..WorkingOrder::default()
        };
        self.close_order.observe_mid(request.mid_price);
        self.close_reasons = request.reasons;
        self.close_dte = Some(request.close_dte);
        self.dit = Some(request.dit);
        self.state = PositionState::CloseSubmitted;
        Ok(())
    }

    /// Applies a cancel notification.
    ///
    /// Cancelling the open order retires the position. Cancelling a pending
    /// close returns it to `Monitoring` so the next tick can re-evaluate it.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the targeted order is not working.
    pub fn cancel(&mut self, kind: OrderKind, time: NaiveDateTime) -> Result<(), PositionError> {
        match kind {
            OrderKind::Open
                if matches!(
                    self.state,
                    PositionState::Created | PositionState::Submitted | PositionState::PartiallyFilled
                ) =>
            {
                if self.open_order.fills > 0 {
                    warn!(
                        order_tag = self.order_tag,
                        fills = self.open_order.fills,
                        "Open order cancelled after partial fills"
                    );
                }
                self.state = PositionState::Cancelled;
                self.closed_at = Some(time);
                Ok(())
            }
            OrderKind::Close if self.state == PositionState::CloseSubmitted => {
                if self.close_order.fills > 0 {
                    warn!(
                        order_tag = self.order_tag,
                        fills = self.close_order.fills,
                        "Close order cancelled after partial fills"
                    );
                }
                self.close_order = WorkingOrder::default();
                self.close_premium = Decimal::ZERO;
                self.close_reasons.clear();
                self.state = PositionState::Monitoring;
                Ok(())
            }
            _ => Err(self.invalid("cancel")),
        }
    }

    /// Marks a non-terminal position as expired.
    pub fn expire(&mut self, time: NaiveDateTime) {
        if !self.state.is_terminal() {
            self.state = PositionState::Expired;
            self.closed_at = Some(time);
        }
    }

    /// Tracks the PnL range over the life of the position, in currency.
    /// `pnl` is per share; the DIT of each extreme is in calendar days.
    pub fn update_pnl_range(&mut self, date: NaiveDate, pnl: Decimal) {
        let Some(filled_at) = self.open_order.filled_at else {
            return;
        };
        let dit = (date - filled_at.date()).num_days();
        let value = pnl * self.multiplier();
        if value < self.pnl_min {
            self.pnl_min = value;
            self.pnl_min_dit = dit;
        }
        if value > self.pnl_max {
            self.pnl_max = value;
            self.pnl_max_dit = dit;
        }
    }

    #[must_use]
    pub fn summary(&self) -> PositionSummary {
        PositionSummary {
            order_id: self.order_id,
            order_tag: self.order_tag.clone(),
            strategy: self.strategy,
            expiry: self.expiry,
            state: self.state,
            quantity: self.quantity,
            legs: self
                .legs
                .iter()
                .map(|leg| format!("{:?} {}x {}{}", leg.side, leg.ratio, leg.strike, leg.right))
                .collect(),
            open_premium: self.open_premium,
            close_premium: self.close_premium,
            pnl: self.pnl,
            dit: self.dit,
            close_reasons: self.close_reasons.clone(),
        }
    }

    fn order(&self, kind: OrderKind) -> &WorkingOrder {
        match kind {
            OrderKind::Open => &self.open_order,
            OrderKind::Close => &self.close_order,
        }
    }

    /// Every leg has reached `ratio * quantity` contracts on this order.
    fn is_order_complete(&self, kind: OrderKind) -> bool {
        let order = self.order(kind);
        self.legs.iter().all(|leg| {
            order.leg_fills.get(&leg.contract_id).copied().unwrap_or(0) >= leg.ratio * self.quantity
        })
    }

    fn invalid(&self, action: &'static str) -> PositionError {
        PositionError::InvalidTransition {
            order_id: self.order_id,
            state: self.state,
            action,
        }
    }
}

/// Prices and bookkeeping recorded when a close is submitted.
#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub reasons: Vec<String>,
    pub limit_price: Option<Decimal>,
    pub mid_price: Decimal,
    pub bid_ask_spread: Decimal,
    pub close_dte: i64,
    pub dit: i64,
    pub time: NaiveDateTime,
}

/// Compact view of a position for reporting collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub order_id: u64,
    pub order_tag: String,
    pub strategy: StrategyKind,
    pub expiry: NaiveDate,
    pub state: PositionState,
    pub quantity: u32,
    pub legs: Vec<String>,
    pub open_premium: Decimal,
    pub close_premium: Decimal,
    pub pnl: Decimal,
    pub dit: Option<i64>,
    pub close_reasons: Vec<String>,
}
