//! Contract selection: narrows a chain snapshot to one expiry and a strike
//! window around the ATM strike.
//!
//! Selection is a pure query. The caller subscribes to the chosen contracts
//! and keeps any per-contract bookkeeping in its own side table keyed by
//! contract id.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use legwork_core::{ContractDescriptor, SelectorConfig, TradingCalendar};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::SelectorError;
use crate::registry::ClosedTrade;

/// Inputs for one selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub contracts: &'a [ContractDescriptor],
    pub today: NaiveDate,
    pub underlying_price: Decimal,
    pub config: &'a SelectorConfig,
    /// Closed trades, oldest first. Only read when dynamic DTE selection is on.
    pub closed_trades: &'a [ClosedTrade],
    /// Expiries already held by open positions of the same strategy.
    pub open_expiries: &'a BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub expiry: NaiveDate,
    /// Trading days to `expiry`.
    pub dte: i64,
    pub atm_strike: Decimal,
    /// Contracts of `expiry` inside the strike window, by ascending strike.
    pub contracts: Vec<ContractDescriptor>,
    /// Closed trade whose DTE drove the expiry choice, when dynamic selection applied.
    pub linked_order_tag: Option<String>,
}

/// Picks the expiry and strike window to trade.
///
/// # Errors
///
/// - [`SelectorError::NoContractsAvailable`] when nothing lies inside the DTE window.
/// - [`SelectorError::NoValidExpiry`] when the chosen expiry is already open and
///   multiple entries per expiry are not allowed.
/// - [`SelectorError::StrikeRangeEmpty`] when the rank window misses every strike.
pub fn select_contracts(
    request: &SelectionRequest<'_>,
    calendar: &dyn TradingCalendar,
) -> Result<Selection, SelectorError> {
    let config = request.config;
    let (min_dte, max_dte) = config.dte_range();

    let in_window: Vec<(&ContractDescriptor, i64)> = request
        .contracts
        .iter()
        .map(|contract| (contract, calendar.trading_days_between(request.today, contract.expiry)))
        .filter(|(_, dte)| (min_dte..=max_dte).contains(dte))
        .collect();
    if in_window.is_empty() {
        return Err(SelectorError::NoContractsAvailable { min_dte, max_dte });
    }

    // Distinct expiries, furthest first.
    let mut expiries: Vec<(NaiveDate, i64)> = in_window
        .iter()
        .map(|(contract, dte)| (contract.expiry, *dte))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    expiries.reverse();

    let dynamic_reference = config
        .dynamic_dte_selection
        .then(|| {
            request
                .closed_trades
                .iter()
                .find(|trade| trade.close_dte >= min_dte)
        })
        .flatten();

    let (expiry, dte) = match dynamic_reference {
        Some(trade) => closest_expiry(&expiries, trade.close_dte),
        None if config.use_furthest_expiry => expiries.first().copied(),
        None => expiries.last().copied(),
    }
    .ok_or(SelectorError::NoContractsAvailable { min_dte, max_dte })?;

    if !config.allow_multiple_entries_per_expiry && request.open_expiries.contains(&expiry) {
        debug!(%expiry, "Expiry already has an open position");
        return Err(SelectorError::NoValidExpiry);
    }

    let strikes: Vec<Decimal> = in_window
        .iter()
        .filter(|(contract, _)| contract.expiry == expiry)
        .map(|(contract, _)| contract.strike)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let atm_index = atm_index(&strikes, request.underlying_price)
        .ok_or(SelectorError::NoContractsAvailable { min_dte, max_dte })?;

    let empty = SelectorError::StrikeRangeEmpty {
        min_rank: config.min_strike_rank,
        max_rank: config.max_strike_rank,
    };
    let last = strikes.len() as i64 - 1;
    let low = (atm_index as i64 + i64::from(config.min_strike_rank)).max(0);
    let high = (atm_index as i64 + i64::from(config.max_strike_rank)).min(last);
    if low > high {
        return Err(empty);
    }
    let (Some(&min_strike), Some(&max_strike)) = (strikes.get(low as usize), strikes.get(high as usize)) else {
        return Err(empty);
    };

    let mut contracts: Vec<ContractDescriptor> = in_window
        .into_iter()
        .filter(|(contract, _)| contract.expiry == expiry && (min_strike..=max_strike).contains(&contract.strike))
        .map(|(contract, _)| contract.clone())
        .collect();
    contracts.sort_by(|a, b| a.strike.cmp(&b.strike));

    debug!(
        %expiry,
        dte,
        atm = %strikes[atm_index],
        %min_strike,
        %max_strike,
        contracts = contracts.len(),
        "Contracts selected"
    );

    Ok(Selection {
        expiry,
        dte,
        atm_strike: strikes[atm_index],
        contracts,
        linked_order_tag: dynamic_reference.map(|trade| trade.order_tag.clone()),
    })
}

/// Expiry whose DTE is closest to `reference`, preferring those with at least
/// `reference` days left so the new trade can run as long as the one it replaces.
/// Ties go to the shorter DTE.
fn closest_expiry(expiries: &[(NaiveDate, i64)], reference: i64) -> Option<(NaiveDate, i64)> {
    let distance = |&(_, dte): &(NaiveDate, i64)| ((dte - reference).abs(), dte);
    expiries
        .iter()
        .copied()
        .filter(|(_, dte)| *dte >= reference)
        .min_by_key(distance)
        .or_else(|| expiries.iter().copied().min_by_key(distance))
}

/// Index of the strike closest to `price`. Ties go to the lower strike.
/// `strikes` must be sorted ascending.
#[must_use]
pub fn atm_index(strikes: &[Decimal], price: Decimal) -> Option<usize> {
    strikes
        .iter()
        .enumerate()
        .min_by_key(|(_, strike)| (**strike - price).abs())
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use legwork_core::{OptionRight, WeekdayCalendar};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Monday 2024-01-01 with no holidays, so trading-day offsets are easy to place.
    fn today() -> NaiveDate {
        date(2024, 1, 1)
    }

    /// The date `dte` trading days after `today()`.
    fn expiry_at(dte: i64) -> NaiveDate {
        let calendar = WeekdayCalendar::new();
        let mut day = today();
        while calendar.trading_days_between(today(), day) < dte {
            day += chrono::Duration::days(1);
        }
        day
    }

    fn make_chain(dtes: &[i64], strikes: &[Decimal]) -> Vec<ContractDescriptor> {
        let mut chain = Vec::new();
        for &dte in dtes {
            let expiry = expiry_at(dte);
            for &strike in strikes {
                for right in [OptionRight::Put, OptionRight::Call] {
                    chain.push(ContractDescriptor::new(
                        format!("{expiry}{right}{strike}"),
                        strike,
                        expiry,
                        right,
                    ));
                }
            }
        }
        chain
    }

    fn make_config(dte: u32, window: u32) -> SelectorConfig {
        SelectorConfig {
            dte,
            dte_window: window,
            ..SelectorConfig::default()
        }
    }

    fn select(
        chain: &[ContractDescriptor],
        config: &SelectorConfig,
        price: Decimal,
        closed: &[ClosedTrade],
        open: &BTreeSet<NaiveDate>,
    ) -> Result<Selection, SelectorError> {
        select_contracts(
            &SelectionRequest {
                contracts: chain,
                today: today(),
                underlying_price: price,
                config,
                closed_trades: closed,
                open_expiries: open,
            },
            &WeekdayCalendar::new(),
        )
    }

    fn strikes() -> Vec<Decimal> {
        vec![dec!(90), dec!(95), dec!(100), dec!(105), dec!(110)]
    }

    #[test]
    fn atm_is_closest_strike() {
        assert_eq!(atm_index(&strikes(), dec!(101)), Some(2));
        // tie between 95 and 100 goes to the lower strike
        assert_eq!(atm_index(&strikes(), dec!(97.5)), Some(1));
        assert_eq!(atm_index(&[], dec!(100)), None);
    }

    #[test]
    fn empty_chain_has_no_contracts() {
        let err = select(&[], &make_config(30, 10), dec!(100), &[], &BTreeSet::new()).unwrap_err();
        assert_eq!(err, SelectorError::NoContractsAvailable { min_dte: 20, max_dte: 30 });
    }

    #[test]
    fn results_stay_inside_dte_and_strike_windows() {
        let chain = make_chain(&[5, 10, 15, 20, 35], &strikes());
        let config = SelectorConfig {
            min_strike_rank: -1,
            max_strike_rank: 1,
            ..make_config(20, 10)
        };
        let selection = select(&chain, &config, dec!(101), &[], &BTreeSet::new()).unwrap();
        assert_eq!(selection.dte, 20);
        assert_eq!(selection.atm_strike, dec!(100));
        assert!(selection.contracts.iter().all(|c| c.expiry == expiry_at(20)));
        let picked: BTreeSet<Decimal> = selection.contracts.iter().map(|c| c.strike).collect();
        assert_eq!(picked, BTreeSet::from([dec!(95), dec!(100), dec!(105)]));
        assert_eq!(selection.contracts.len(), 6);
    }

    #[test]
    fn nearest_expiry_when_not_furthest() {
        let chain = make_chain(&[10, 15, 20], &strikes());
        let config = SelectorConfig {
            use_furthest_expiry: false,
            ..make_config(20, 10)
        };
        let selection = select(&chain, &config, dec!(100), &[], &BTreeSet::new()).unwrap();
        assert_eq!(selection.dte, 10);
        assert!(selection.linked_order_tag.is_none());
    }

    #[test]
    fn dynamic_dte_follows_closed_trades() {
        let chain = make_chain(&[10, 15, 20, 35], &strikes());
        let config = SelectorConfig {
            dynamic_dte_selection: true,
            ..make_config(40, 30)
        };
        let closed = [
            ClosedTrade {
                order_tag: "IronCondor-1".into(),
                close_dte: 12,
            },
            ClosedTrade {
                order_tag: "IronCondor-2".into(),
                close_dte: 30,
            },
        ];
        let selection = select(&chain, &config, dec!(100), &closed, &BTreeSet::new()).unwrap();
        assert_eq!(selection.dte, 15);
        assert_eq!(selection.linked_order_tag.as_deref(), Some("IronCondor-1"));
    }

    #[test]
    fn dynamic_dte_falls_back_to_closest_shorter_expiry() {
        let chain = make_chain(&[10, 15, 20, 35], &strikes());
        let config = SelectorConfig {
            dynamic_dte_selection: true,
            ..make_config(40, 30)
        };
        let closed = [ClosedTrade {
            order_tag: "IronCondor-4".into(),
            close_dte: 38,
        }];
        let selection = select(&chain, &config, dec!(100), &closed, &BTreeSet::new()).unwrap();
        assert_eq!(selection.dte, 35);
    }

    #[test]
    fn dynamic_dte_ignores_trades_closed_below_min_dte() {
        let chain = make_chain(&[10, 15, 20, 35], &strikes());
        let config = SelectorConfig {
            dynamic_dte_selection: true,
            ..make_config(40, 30)
        };
        let closed = [ClosedTrade {
            order_tag: "IronCondor-1".into(),
            close_dte: 3,
        }];
        let selection = select(&chain, &config, dec!(100), &closed, &BTreeSet::new()).unwrap();
        // falls back to the furthest expiry
        assert_eq!(selection.dte, 35);
        assert!(selection.linked_order_tag.is_none());
    }

    #[test]
    fn open_expiry_blocks_second_entry() {
        let chain = make_chain(&[15, 20], &strikes());
        let open = BTreeSet::from([expiry_at(20)]);
        let config = make_config(20, 10);
        assert_eq!(
            select(&chain, &config, dec!(100), &[], &open),
            Err(SelectorError::NoValidExpiry)
        );

        let config = SelectorConfig {
            allow_multiple_entries_per_expiry: true,
            ..config
        };
        assert!(select(&chain, &config, dec!(100), &[], &open).is_ok());
    }

    #[test]
    fn strike_window_clamps_to_chain() {
        let chain = make_chain(&[20], &strikes());
        let config = SelectorConfig {
            min_strike_rank: -10,
            max_strike_rank: 0,
            ..make_config(20, 0)
        };
        let selection = select(&chain, &config, dec!(104), &[], &BTreeSet::new()).unwrap();
        let max = selection.contracts.iter().map(|c| c.strike).max();
        let min = selection.contracts.iter().map(|c| c.strike).min();
        assert_eq!((min, max), (Some(dec!(90)), Some(dec!(105))));
    }

    #[test]
    fn window_beyond_the_chain_is_empty() {
        let chain = make_chain(&[20], &strikes());
        let config = SelectorConfig {
            min_strike_rank: 5,
            max_strike_rank: 8,
            ..make_config(20, 0)
        };
        assert_eq!(
            select(&chain, &config, dec!(100), &[], &BTreeSet::new()),
            Err(SelectorError::StrikeRangeEmpty { min_rank: 5, max_rank: 8 })
        );
    }
}
