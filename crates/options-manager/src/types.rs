//! Types exchanged with the host: close instructions out, fill and cancel events in.

use chrono::NaiveDateTime;
use legwork_core::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reason for closing a position, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    ProfitTarget,
    HardDit,
    SoftDit,
    HardDte,
    SoftDte,
    ExpiryCutoff,
    EndOfBacktest,
    /// Strategy-specific exit with its own label.
    Custom(String),
}

impl CloseReason {
    /// True for reasons that force a market order.
    #[must_use]
    pub fn forces_market(&self) -> bool {
        matches!(self, Self::StopLoss | Self::EndOfBacktest)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "Stop Loss trigger"),
            Self::ProfitTarget => write!(f, "Profit target"),
            Self::HardDit => write!(f, "Hard Dit cutoff"),
            Self::SoftDit => write!(f, "Soft Dit cutoff"),
            Self::HardDte => write!(f, "Hard Dte cutoff"),
            Self::SoftDte => write!(f, "Soft Dte cutoff"),
            Self::ExpiryCutoff => write!(f, "Expiration date cutoff"),
            Self::EndOfBacktest => write!(f, "End of backtest cutoff"),
            Self::Custom(label) => write!(f, "{label}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStyle {
    Market,
    Limit,
}

/// One leg of a close instruction. The target position in the contract is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseLeg {
    pub contract_id: String,
    pub side: OrderSide,
    /// Contracts to trade to flatten the leg.
    pub quantity: u32,
}

/// Instruction for the execution collaborator to flatten every leg of a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInstruction {
    pub order_id: u64,
    pub order_tag: String,
    pub legs: Vec<CloseLeg>,
    pub reasons: Vec<CloseReason>,
    /// Reason labels joined with ", ".
    pub reason: String,
    pub order_style: OrderStyle,
    /// Net limit price per unit for limit orders, in the position-value convention
    /// (negative when closing costs money).
    pub limit_price: Option<Decimal>,
}

/// Fill notification from the execution collaborator, keyed by order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: u64,
    pub contract_id: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
    pub time: NaiveDateTime,
}

/// Cancel notification for whichever order of the position is working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelEvent {
    pub order_id: u64,
    pub time: NaiveDateTime,
}
