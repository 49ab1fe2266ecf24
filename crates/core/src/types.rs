//! Contract, quote and side types shared across the workspace.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Options contract right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// Side of a leg at the time the position was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSide {
    Long,
    Short,
}

impl LegSide {
    /// +1 for long legs, -1 for short legs.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Order side that opens this leg.
    #[must_use]
    pub const fn opening_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that flattens this leg.
    #[must_use]
    pub const fn closing_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Read-only description of a listed option contract, as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    /// Host-assigned contract id (e.g. "SPXW 240119P04700000").
    pub id: String,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub right: OptionRight,
}

impl ContractDescriptor {
    pub fn new(id: impl Into<String>, strike: Decimal, expiry: NaiveDate, right: OptionRight) -> Self {
        Self {
            id: id.into(),
            strike,
            expiry,
            right,
        }
    }

    /// Human-readable contract description (e.g., "4700P 2024-01-19").
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}{} {}", self.strike, self.right, self.expiry)
    }
}

/// Top-of-book quote for one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    #[must_use]
    pub const fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// True when the ask is below the bid.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        self.ask < self.bid
    }
}

/// Quotes for the subscribed contracts at one tick, keyed by contract id.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    quotes: HashMap<String, Quote>,
}

impl MarketSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contract_id: impl Into<String>, quote: Quote) {
        self.quotes.insert(contract_id.into(), quote);
    }

    #[must_use]
    pub fn with_quote(mut self, contract_id: impl Into<String>, bid: Decimal, ask: Decimal) -> Self {
        self.insert(contract_id, Quote::new(bid, ask));
        self
    }

    #[must_use]
    pub fn quote(&self, contract_id: &str) -> Option<&Quote> {
        self.quotes.get(contract_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_mid_and_spread() {
        let quote = Quote::new(dec!(1.10), dec!(1.30));
        assert_eq!(quote.mid(), dec!(1.20));
        assert_eq!(quote.spread(), dec!(0.20));
        assert!(!quote.is_crossed());
        assert!(Quote::new(dec!(1.30), dec!(1.10)).is_crossed());
    }

    #[test]
    fn leg_side_reverses_on_close() {
        assert_eq!(LegSide::Short.opening_side(), OrderSide::Sell);
        assert_eq!(LegSide::Short.closing_side(), OrderSide::Buy);
        assert_eq!(LegSide::Long.closing_side(), OrderSide::Sell);
        assert_eq!(LegSide::Short.sign(), dec!(-1));
    }

    #[test]
    fn option_right_serializes_lowercase() {
        let json = serde_json::to_string(&OptionRight::Put).unwrap();
        assert_eq!(json, "\"put\"");
    }
}
