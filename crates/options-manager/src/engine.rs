//! Risk management engine: one evaluation pass per scheduled tick.
//!
//! The engine owns the [`PositionRegistry`] and the [`StrategyRegistry`].
//! Fill and cancel notifications arrive between ticks through
//! [`RiskEngine::apply_fill`] and [`RiskEngine::apply_cancel`]; nothing runs
//! concurrently with a pass.

use chrono::{NaiveDateTime, Timelike};
use legwork_core::{ContractDescriptor, LegSide, ManagerConfig, MarketSnapshot, TradingCalendar};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::error::{EvaluationError, PositionError, SelectorError};
use crate::evaluator::{self, RiskInputs};
use crate::monitor::PositionValue;
use crate::position::{CloseRequest, FillOutcome, Leg, NewPosition, Position, PositionState};
use crate::registry::PositionRegistry;
use crate::selector::{self, Selection, SelectionRequest};
use crate::strategy::{StrategyKind, StrategyRegistry};
use crate::types::{CancelEvent, CloseInstruction, CloseLeg, FillEvent, OrderStyle};

/// Request from the strategy layer to open a position on selected contracts.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub strategy: StrategyKind,
    /// Contract, side and ratio per leg.
    pub legs: Vec<(ContractDescriptor, LegSide, u32)>,
    pub quantity: u32,
    pub target_profit: Option<Decimal>,
    /// Theoretical max loss per share per unit (negative).
    pub max_loss: Option<Decimal>,
    /// Closed trade this entry was sized from (see [`Selection::linked_order_tag`]).
    pub linked_order_tag: Option<String>,
}

pub struct RiskEngine<C> {
    config: ManagerConfig,
    calendar: C,
    positions: PositionRegistry,
    strategies: StrategyRegistry,
}

impl<C: TradingCalendar> RiskEngine<C> {
    #[must_use]
    pub fn new(config: ManagerConfig, calendar: C, strategies: StrategyRegistry) -> Self {
        Self::with_positions(config, calendar, strategies, PositionRegistry::new())
    }

    /// Resumes from a registry restored by the position store.
    #[must_use]
    pub fn with_positions(
        config: ManagerConfig,
        calendar: C,
        strategies: StrategyRegistry,
        positions: PositionRegistry,
    ) -> Self {
        info!(
            frequency = config.manage_position_frequency,
            strategies = strategies.len(),
            positions = positions.len(),
            open = positions.open_len(),
            "Risk engine started"
        );
        Self {
            config,
            calendar,
            positions,
            strategies,
        }
    }

    #[must_use]
    pub fn positions(&self) -> &PositionRegistry {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PositionRegistry {
        &mut self.positions
    }

    #[must_use]
    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    #[must_use]
    pub fn calendar(&self) -> &C {
        &self.calendar
    }

    /// Selects contracts for `strategy` using its selector settings, open expiries and the
    /// closed-trade log.
    ///
    /// # Errors
    ///
    /// Any [`SelectorError`].
    pub fn select_contracts(
        &self,
        strategy: StrategyKind,
        contracts: &[ContractDescriptor],
        now: NaiveDateTime,
        underlying_price: Decimal,
    ) -> Result<Selection, SelectorError> {
        let config = self
            .strategies
            .get(strategy)
            .map(|registered| registered.config.selector.clone())
            .unwrap_or_default();
        let open_expiries = self.positions.open_expiries(strategy);
        selector::select_contracts(
            &SelectionRequest {
                contracts,
                today: now.date(),
                underlying_price,
                config: &config,
                closed_trades: self.positions.closed_trades(),
                open_expiries: &open_expiries,
            },
            &self.calendar,
        )
    }

    /// Creates and registers a position in the `Created` state. The strategy's
    /// thresholds are copied onto it and stay fixed for its lifetime.
    ///
    /// # Errors
    ///
    /// `UnregisteredStrategy` for an unknown strategy, or the position's own validation errors.
    pub fn open_position(&mut self, request: OpenRequest, now: NaiveDateTime) -> Result<&Position, EvaluationError> {
        let thresholds = self
            .strategies
            .get(request.strategy)
            .map(|registered| registered.config.thresholds.clone())
            .ok_or_else(|| EvaluationError::UnregisteredStrategy(request.strategy.to_string()))?;

        let legs: Vec<Leg> = request
            .legs
            .iter()
            .map(|(contract, side, ratio)| Leg::from_contract(contract, *side, *ratio))
            .collect();
        let open_dte = legs
            .iter()
            .map(|leg| leg.expiry)
            .min()
            .map_or(0, |expiry| self.calendar.trading_days_between(now.date(), expiry));

        let order_id = self.positions.next_order_id();
        let position = Position::new(NewPosition {
            order_id,
            strategy: request.strategy,
            legs,
            quantity: request.quantity,
            thresholds,
            opened_at: now,
            open_dte,
            target_profit: request.target_profit,
            max_loss: request.max_loss,
            linked_order_tag: request.linked_order_tag.clone(),
        })?;
        info!(
            order_tag = position.order_tag,
            expiry = %position.expiry,
            open_dte,
            quantity = position.quantity,
            "Position created"
        );
        self.positions.insert(position)?;

        if let Some(tag) = &request.linked_order_tag {
            self.positions.take_closed_trade(tag);
        }
        self.positions
            .get(order_id)
            .ok_or(EvaluationError::Position(PositionError::UnknownOrder(order_id)))
    }

    /// # Errors
    ///
    /// See [`PositionRegistry::apply_fill`].
    pub fn apply_fill(&mut self, event: &FillEvent) -> Result<FillOutcome, PositionError> {
        let outcome = self.positions.apply_fill(event)?;
        if outcome == FillOutcome::Closed {
            self.prune_closed_trades();
        }
        Ok(outcome)
    }

    /// Keeps only closed trades some dynamic-DTE strategy could still select on.
    fn prune_closed_trades(&mut self) {
        let floor = self
            .strategies
            .iter()
            .map(|(_, registered)| &registered.config.selector)
            .filter(|selector| selector.dynamic_dte_selection)
            .map(|selector| selector.dte_range().0)
            .min();
        let dropped = self.positions.prune_closed_trades(floor);
        if dropped > 0 {
            debug!(dropped, remaining = self.positions.closed_trades().len(), "Pruned closed trades");
        }
    }

    /// # Errors
    ///
    /// See [`PositionRegistry::apply_cancel`].
    pub fn apply_cancel(&mut self, event: &CancelEvent) -> Result<PositionState, PositionError> {
        self.positions.apply_cancel(event)
    }

    pub fn expire_positions(&mut self, now: NaiveDateTime) -> Vec<String> {
        self.positions.expire_positions(now)
    }

    /// True when `now` falls on the management schedule.
    #[must_use]
    pub fn is_scheduled(&self, now: NaiveDateTime) -> bool {
        now.minute() % self.config.manage_position_frequency.max(1) == 0
    }

    /// Runs one risk pass and returns the close instructions to execute.
    ///
    /// Every eligible position is valued before anything is mutated. If any
    /// valuation is unavailable the whole pass is dropped: no instructions and
    /// no PnL-range updates for this tick.
    pub fn manage_risk(&mut self, now: NaiveDateTime, snapshot: &MarketSnapshot) -> Vec<CloseInstruction> {
        if !self.is_scheduled(now) {
            return Vec::new();
        }

        for (kind, registered) in self.strategies.iter_mut() {
            if let Err(e) = registered.hooks.pre_manage_risk(&self.positions) {
                error!(strategy = %kind, error = %e, "pre_manage_risk hook failed");
            }
        }

        let mut valued: Vec<(String, PositionValue)> = Vec::new();
        for tag in self.positions.open_tags() {
            let Some(position) = self.positions.by_tag(&tag) else {
                continue;
            };
            if !position.is_eligible_for_evaluation() {
                continue;
            }
            match position.current_value(snapshot) {
                Ok(value) => valued.push((tag, value)),
                Err(e) => {
                    warn!(
                        order_tag = tag,
                        reason = %e,
                        "Pricing unavailable, skipping risk pass for this tick"
                    );
                    return Vec::new();
                }
            }
        }

        let mut instructions = Vec::new();
        for (tag, value) in valued {
            match self.evaluate_position(&tag, &value, now) {
                Ok(Some(instruction)) => instructions.push(instruction),
                Ok(None) => {}
                Err(e) => error!(order_tag = tag, error = %e, "Failed to evaluate position"),
            }
        }

        if !instructions.is_empty() {
            info!(count = instructions.len(), "Close instructions emitted");
        }
        instructions
    }

    fn evaluate_position(
        &mut self,
        tag: &str,
        value: &PositionValue,
        now: NaiveDateTime,
    ) -> Result<Option<CloseInstruction>, EvaluationError> {
        let today = now.date();
        let Some(position) = self.positions.by_tag_mut(tag) else {
            return Ok(None);
        };
        let registered = self
            .strategies
            .get_mut(position.strategy)
            .ok_or_else(|| EvaluationError::UnregisteredStrategy(position.strategy.to_string()))?;

        let dit = position
            .days_in_trade(today, &self.calendar)
            .ok_or(EvaluationError::MissingOpenFill(position.order_id))?;
        let dte = position.days_to_expiry(today, &self.calendar);

        // Engine-owned state only moves once both hooks have succeeded.
        registered.hooks.monitor_position(position)?;
        let custom = registered.hooks.should_close(position, now)?;
        position.begin_monitoring();
        position.update_pnl_range(today, value.pnl);

        let verdict = evaluator::evaluate(
            position,
            &RiskInputs {
                now,
                pnl: value.pnl,
                dit,
                dte,
                end_of_backtest: self.config.end_of_backtest_cutoff,
                calendar: &self.calendar,
            },
            custom,
        );
        if !verdict.should_close() {
            debug!(order_tag = tag, pnl = %value.pnl, dit, dte, "Position within limits");
            return Ok(None);
        }

        let limit_price = (verdict.order_style == OrderStyle::Limit).then_some(value.limit_price);
        let reason = verdict.label();
        let instruction = CloseInstruction {
            order_id: position.order_id,
            order_tag: position.order_tag.clone(),
            legs: position
                .legs
                .iter()
                .map(|leg| CloseLeg {
                    contract_id: leg.contract_id.clone(),
                    side: leg.side.closing_side(),
                    quantity: leg.ratio * position.quantity,
                })
                .collect(),
            reasons: verdict.reasons.clone(),
            reason: reason.clone(),
            order_style: verdict.order_style,
            limit_price,
        };

        position.submit_close(CloseRequest {
            reasons: verdict.reasons.iter().map(ToString::to_string).collect(),
            limit_price,
            mid_price: value.mid_price,
            bid_ask_spread: value.bid_ask_spread,
            close_dte: dte,
            dit,
            time: now,
        })?;

        info!(
            order_tag = tag,
            reason,
            style = ?instruction.order_style,
            pnl = %value.pnl,
            dit,
            dte,
            "Closing position"
        );
        Ok(Some(instruction))
    }
}
