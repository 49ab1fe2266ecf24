//! Error types for selection, position bookkeeping, valuation and persistence.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::position::PositionState;

/// Contract selection failures, surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("no contracts available within the DTE window [{min_dte}, {max_dte}]")]
    NoContractsAvailable { min_dte: i64, max_dte: i64 },

    #[error("no valid expiry: every candidate expiry already has an open position")]
    NoValidExpiry,

    #[error("strike window [{min_rank}, {max_rank}] around the ATM strike is empty")]
    StrikeRangeEmpty { min_rank: i32, max_rank: i32 },
}

/// Position model and registry failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("order {order_id} has no leg for contract {contract_id}")]
    UnknownContract { order_id: u64, contract_id: String },

    #[error("order {order_id}: cannot {action} while {state:?}")]
    InvalidTransition {
        order_id: u64,
        state: PositionState,
        action: &'static str,
    },

    #[error("order id {order_id} or tag {order_tag} is already registered")]
    DuplicateOrder { order_id: u64, order_tag: String },

    #[error("unknown order id {0}")]
    UnknownOrder(u64),
}

/// Mark-to-market is not trustworthy this tick. Callers defer; never treat as zero PnL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingUnavailable {
    #[error("no quote for contract {contract_id}")]
    MissingQuote { contract_id: String },

    #[error("crossed quote for contract {contract_id}: bid {bid} > ask {ask}")]
    CrossedQuote {
        contract_id: String,
        bid: Decimal,
        ask: Decimal,
    },

    #[error("bid-ask spread {spread} on {contract_id} exceeds limit {limit}")]
    SpreadTooWide {
        contract_id: String,
        spread: Decimal,
        limit: Decimal,
    },
}

/// Failure while evaluating a single position. The position is skipped for this tick.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("order {0} is marked filled but has no open fill time")]
    MissingOpenFill(u64),

    #[error("no strategy registered for kind {0}")]
    UnregisteredStrategy(String),

    #[error("strategy hook failed: {0}")]
    Hook(#[from] anyhow::Error),

    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Errors from position persistence operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error reading/writing the blob.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Blob store backend failure.
    #[error("blob store error: {0}")]
    Blob(String),
}
