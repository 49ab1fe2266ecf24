//! Single owner of every position, the open index and the closed-trade log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PositionError;
use crate::position::Position;
use crate::strategy::StrategyKind;

/// DTE at which a trade was closed. Feeds dynamic DTE selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub order_tag: String,
    pub close_dte: i64,
}

#[derive(Debug, Default)]
pub struct PositionRegistry {
    /// Archive of every position, keyed by order id.
    positions: BTreeMap<u64, Position>,
    /// Order tag -> order id, for every position in the archive.
    tags: BTreeMap<String, u64>,
    /// Tags of positions still open.
    open: BTreeSet<String>,
    /// Oldest first.
    closed_trades: Vec<ClosedTrade>,
    next_order_id: u64,
}

impl PositionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_order_id: 1,
            ..Self::default()
        }
    }

    /// Hands out the next order id. Ids are never reused.
    pub fn next_order_id(&mut self) -> u64 {
        let id = self.next_order_id.max(1);
        self.next_order_id = id + 1;
        id
    }

    /// Adds a position. It joins the open index unless it is already terminal.
    ///
    /// # Errors
    ///
    /// `DuplicateOrder` when the order id or tag is already taken.
    pub fn insert(&mut self, position: Position) -> Result<(), PositionError> {
        let open = !position.state.is_terminal();
        self.insert_indexed(position, open)
    }

    pub(crate) fn insert_indexed(&mut self, position: Position, open: bool) -> Result<(), PositionError> {
        if self.positions.contains_key(&position.order_id) || self.tags.contains_key(&position.order_tag) {
            return Err(PositionError::DuplicateOrder {
                order_id: position.order_id,
                order_tag: position.order_tag.clone(),
            });
        }
        self.next_order_id = self.next_order_id.max(position.order_id + 1);
        self.tags.insert(position.order_tag.clone(), position.order_id);
        if open {
            self.open.insert(position.order_tag.clone());
        }
        debug!(order_tag = position.order_tag, open, "Position registered");
        self.positions.insert(position.order_id, position);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, order_id: u64) -> Option<&Position> {
        self.positions.get(&order_id)
    }

    pub fn get_mut(&mut self, order_id: u64) -> Option<&mut Position> {
        self.positions.get_mut(&order_id)
    }

    #[must_use]
    pub fn by_tag(&self, order_tag: &str) -> Option<&Position> {
        self.tags.get(order_tag).and_then(|id| self.positions.get(id))
    }

    pub fn by_tag_mut(&mut self, order_tag: &str) -> Option<&mut Position> {
        let id = *self.tags.get(order_tag)?;
        self.positions.get_mut(&id)
    }

    #[must_use]
    pub fn is_open(&self, order_tag: &str) -> bool {
        self.open.contains(order_tag)
    }

    /// Copy of the open index, safe to iterate while the registry changes.
    #[must_use]
    pub fn open_tags(&self) -> Vec<String> {
        self.open.iter().cloned().collect()
    }

    pub(crate) fn remove_from_open(&mut self, order_tag: &str) -> bool {
        self.open.remove(order_tag)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.iter().filter_map(|tag| self.by_tag(tag))
    }

    /// Every position, open or not, in order id order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[must_use]
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    /// Expiries held by open positions of `strategy`.
    #[must_use]
    pub fn open_expiries(&self, strategy: StrategyKind) -> BTreeSet<NaiveDate> {
        self.open_positions()
            .filter(|position| position.strategy == strategy)
            .map(|position| position.expiry)
            .collect()
    }

    pub fn record_closed_trade(&mut self, trade: ClosedTrade) {
        self.closed_trades.push(trade);
    }

    #[must_use]
    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed_trades
    }

    /// Removes the closed trade a new position was sized from, so it drives at most one entry.
    pub fn take_closed_trade(&mut self, order_tag: &str) -> Option<ClosedTrade> {
        let index = self
            .closed_trades
            .iter()
            .position(|trade| trade.order_tag == order_tag)?;
        Some(self.closed_trades.remove(index))
    }

    /// Drops closed trades that can no longer drive an expiry choice: those
    /// closed below `min_close_dte`, or all of them when there is no floor.
    pub fn prune_closed_trades(&mut self, min_close_dte: Option<i64>) -> usize {
        let before = self.closed_trades.len();
        match min_close_dte {
            Some(floor) => self.closed_trades.retain(|trade| trade.close_dte >= floor),
            None => self.closed_trades.clear(),
        }
        before - self.closed_trades.len()
    }

    /// Drops terminal positions closed before `before` from the archive.
    pub fn purge_closed(&mut self, before: NaiveDate) -> usize {
        let stale: Vec<u64> = self
            .positions
            .values()
            .filter(|position| {
                position.state.is_terminal()
                    && !self.open.contains(&position.order_tag)
                    && position.closed_at.is_some_and(|closed| closed.date() < before)
            })
            .map(|position| position.order_id)
            .collect();
        for id in &stale {
            if let Some(position) = self.positions.remove(id) {
                self.tags.remove(&position.order_tag);
            }
        }
        if !stale.is_empty() {
            info!(purged = stale.len(), %before, "Purged closed positions");
        }
        stale.len()
    }
}
