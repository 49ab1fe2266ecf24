//! Deterministic risk management and lifecycle for multi-leg options positions.
//!
//! Runs synchronously inside the host's tick callback:
//! - Selects contracts by DTE and strike window, with optional dynamic DTE
//! - Tracks each position's legs, working orders, fills and PnL
//! - Evaluates ordered close rules and emits close instructions
//! - Persists and restores the full position set across restarts
//!
//! Orders are never placed here; close instructions go to an external executor.

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod monitor;
pub mod position;
pub mod registry;
pub mod selector;
pub mod stops;
pub mod store;
pub mod strategy;
pub mod targets;
pub mod types;

pub use engine::{OpenRequest, RiskEngine};
pub use error::{EvaluationError, PositionError, PricingUnavailable, SelectorError, StoreError};
pub use evaluator::{RiskInputs, RiskVerdict};
pub use monitor::PositionValue;
pub use position::{
    CloseRequest, FillOutcome, Leg, LegFill, NewPosition, OrderKind, Position, PositionState, PositionSummary,
    WorkingOrder,
};
pub use registry::{ClosedTrade, PositionRegistry};
pub use selector::{select_contracts, Selection, SelectionRequest};
pub use store::{BlobStore, FileBlobStore, MemoryBlobStore, PositionStore};
pub use strategy::{DefaultHooks, RegisteredStrategy, StrategyHooks, StrategyKind, StrategyRegistry};
pub use types::{CancelEvent, CloseInstruction, CloseLeg, CloseReason, FillEvent, OrderStyle};
