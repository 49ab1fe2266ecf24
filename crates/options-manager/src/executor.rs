//! Applies fill, cancel and expiry notifications from the execution collaborator.

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::error::PositionError;
use crate::position::{FillOutcome, LegFill, OrderKind, PositionState};
use crate::registry::{ClosedTrade, PositionRegistry};
use crate::types::{CancelEvent, FillEvent};

impl PositionRegistry {
    /// Routes a leg fill to the working order of its position.
    ///
    /// Open-order fills are accepted until the open order completes, close-order
    /// fills while a close is pending. A completed close leaves the open index
    /// and is logged for dynamic DTE selection.
    ///
    /// # Errors
    ///
    /// `UnknownOrder` for an order id the registry has never seen, or any
    /// [`PositionError`] raised by the position itself.
    pub fn apply_fill(&mut self, event: &FillEvent) -> Result<FillOutcome, PositionError> {
        let position = self
            .get_mut(event.order_id)
            .ok_or(PositionError::UnknownOrder(event.order_id))?;

        let kind = match position.state {
            PositionState::Created
            | PositionState::Submitted
            | PositionState::PartiallyFilled
            | PositionState::OpenFilled
            | PositionState::Monitoring => OrderKind::Open,
            PositionState::CloseSubmitted | PositionState::Closed => OrderKind::Close,
            PositionState::Expired | PositionState::Cancelled => {
                warn!(
                    order_tag = position.order_tag,
                    state = ?position.state,
                    contract = event.contract_id,
                    "Fill for a retired position ignored"
                );
                return Ok(FillOutcome::Ignored);
            }
        };

        let outcome = position.record_fill(
            kind,
            &LegFill {
                contract_id: event.contract_id.clone(),
                side: event.side,
                quantity: event.quantity,
                price: event.price,
                time: event.time,
            },
        )?;

        if outcome == FillOutcome::Closed {
            let order_tag = position.order_tag.clone();
            let close_dte = position.close_dte;
            self.remove_from_open(&order_tag);
            if let Some(close_dte) = close_dte {
                self.record_closed_trade(ClosedTrade { order_tag, close_dte });
            }
        }
        Ok(outcome)
    }

    /// Cancels whichever order of the position is working.
    ///
    /// # Errors
    ///
    /// `UnknownOrder`, or `InvalidTransition` when nothing is working.
    pub fn apply_cancel(&mut self, event: &CancelEvent) -> Result<PositionState, PositionError> {
        let position = self
            .get_mut(event.order_id)
            .ok_or(PositionError::UnknownOrder(event.order_id))?;

        let kind = if position.state == PositionState::CloseSubmitted {
            OrderKind::Close
        } else {
            OrderKind::Open
        };
        position.cancel(kind, event.time)?;
        let state = position.state;
        info!(order_tag = position.order_tag, ?kind, ?state, "Order cancelled");

        if state.is_terminal() {
            let order_tag = position.order_tag.clone();
            self.remove_from_open(&order_tag);
        }
        Ok(state)
    }

    /// Moves open positions whose expiry is before today to `Expired`.
    /// Returns the tags that expired.
    pub fn expire_positions(&mut self, now: NaiveDateTime) -> Vec<String> {
        let today = now.date();
        let expired: Vec<String> = self
            .open_positions()
            .filter(|position| position.expiry < today)
            .map(|position| position.order_tag.clone())
            .collect();

        for tag in &expired {
            if let Some(position) = self.by_tag_mut(tag) {
                position.expire(now);
                warn!(order_tag = tag, expiry = %position.expiry, "Position expired");
            }
            self.remove_from_open(tag);
        }
        expired
    }
}
