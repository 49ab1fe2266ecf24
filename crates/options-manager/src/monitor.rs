//! Position monitoring: mark-to-market from live quotes.

use legwork_core::MarketSnapshot;
use rust_decimal::Decimal;

use crate::error::PricingUnavailable;
use crate::position::Position;

/// Mark-to-market of one position at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionValue {
    /// Per-share PnL of the whole order: open premium plus the cost of closing at mid.
    pub pnl: Decimal,
    /// Net mid per unit of the structure if it were closed now (negative when closing costs money).
    pub mid_price: Decimal,
    /// `mid_price` after the configured slippage on every leg.
    pub limit_price: Decimal,
    /// Summed leg spreads per unit.
    pub bid_ask_spread: Decimal,
}

impl Position {
    /// Values the position from `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`PricingUnavailable`] when a leg has no quote, a crossed quote,
    /// or (with spread validation on) a spread wider than
    /// `bid_ask_spread_ratio` of the open premium per unit. Callers must defer,
    /// never treat this as zero PnL.
    pub fn current_value(&self, snapshot: &MarketSnapshot) -> Result<PositionValue, PricingUnavailable> {
        let thresholds = &self.thresholds;
        let units = Decimal::from(self.quantity);
        let spread_limit = (thresholds.validate_bid_ask_spread && self.open_order.filled)
            .then(|| thresholds.bid_ask_spread_ratio * (self.open_order.premium / units).abs());

        let mut mid_price = Decimal::ZERO;
        let mut bid_ask_spread = Decimal::ZERO;
        let mut contracts = Decimal::ZERO;
        for leg in &self.legs {
            let quote = snapshot
                .quote(&leg.contract_id)
                .ok_or_else(|| PricingUnavailable::MissingQuote {
                    contract_id: leg.contract_id.clone(),
                })?;
            if quote.is_crossed() {
                return Err(PricingUnavailable::CrossedQuote {
                    contract_id: leg.contract_id.clone(),
                    bid: quote.bid,
                    ask: quote.ask,
                });
            }
            if let Some(limit) = spread_limit {
                if quote.spread() > limit {
                    return Err(PricingUnavailable::SpreadTooWide {
                        contract_id: leg.contract_id.clone(),
                        spread: quote.spread(),
                        limit,
                    });
                }
            }
            let ratio = Decimal::from(leg.ratio);
            mid_price += leg.signed_ratio() * quote.mid();
            bid_ask_spread += ratio * quote.spread();
            contracts += ratio;
        }

        Ok(PositionValue {
            pnl: self.open_order.premium + mid_price * units,
            mid_price,
            limit_price: mid_price - thresholds.slippage * contracts,
            bid_ask_spread,
        })
    }
}
