//! Strategy kinds and the hooks a strategy can plug into the risk pass.
//!
//! Positions carry an explicit [`StrategyKind`] tag. The [`StrategyRegistry`]
//! resolves a tag to the strategy's configuration and hooks, both when
//! opening positions and when restoring them from the store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::NaiveDateTime;
use legwork_core::{AppConfig, StrategyConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::position::Position;
use crate::registry::PositionRegistry;

macro_rules! strategy_kinds {
    ($($kind:ident => $credit:expr),+ $(,)?) => {
        /// Structure traded by a position.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum StrategyKind {
            $($kind),+
        }

        impl StrategyKind {
            pub const ALL: &'static [StrategyKind] = &[$(StrategyKind::$kind),+];

            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(StrategyKind::$kind => stringify!($kind)),+
                }
            }

            /// True when the structure is opened for a net credit.
            #[must_use]
            pub const fn is_credit(self) -> bool {
                match self {
                    $(StrategyKind::$kind => $credit),+
                }
            }
        }
    };
}

strategy_kinds! {
    PutCreditSpread => true,
    CallCreditSpread => true,
    IronCondor => true,
    IronFly => true,
    CreditButterfly => true,
    ShortStrangle => true,
    ShortStraddle => true,
    ShortCall => true,
    ShortPut => true,
    DebitButterfly => false,
    ReverseIronFly => false,
    ReverseIronCondor => false,
    CallDebitSpread => false,
    PutDebitSpread => false,
    LongStrangle => false,
    LongStraddle => false,
    LongCall => false,
    LongPut => false,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown strategy kind '{s}'"))
    }
}

/// Extension points a strategy can implement. All hooks default to no-ops.
pub trait StrategyHooks {
    /// Called once per managed tick before any position is looked at. State refresh only.
    fn pre_manage_risk(&mut self, _positions: &PositionRegistry) -> Result<()> {
        Ok(())
    }

    /// Called for every valued position. Telemetry, scaling; never decides a close.
    fn monitor_position(&mut self, _position: &Position) -> Result<()> {
        Ok(())
    }

    /// Strategy-specific exit. `Some(reason)` closes the position.
    fn should_close(&self, _position: &Position, _now: NaiveDateTime) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Hooks for strategies that rely on the standard exit rules only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl StrategyHooks for DefaultHooks {}

pub struct RegisteredStrategy {
    pub config: StrategyConfig,
    pub hooks: Box<dyn StrategyHooks>,
}

impl fmt::Debug for RegisteredStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredStrategy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Strategy kind tag -> configuration and hooks.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<StrategyKind, RegisteredStrategy>,
}

impl StrategyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every configured strategy with [`DefaultHooks`]. Unknown tags are logged and skipped.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        for (tag, strategy) in &config.strategies {
            match tag.parse::<StrategyKind>() {
                Ok(kind) => registry.register(kind, strategy.clone(), Box::new(DefaultHooks)),
                Err(e) => warn!(tag, error = %e, "Ignoring configuration for unknown strategy"),
            }
        }
        registry
    }

    pub fn register(&mut self, kind: StrategyKind, config: StrategyConfig, hooks: Box<dyn StrategyHooks>) {
        self.strategies.insert(kind, RegisteredStrategy { config, hooks });
    }

    #[must_use]
    pub fn with(mut self, kind: StrategyKind, config: StrategyConfig) -> Self {
        self.register(kind, config, Box::new(DefaultHooks));
        self
    }

    /// Resolves a persisted tag to a registered kind.
    #[must_use]
    pub fn resolve(&self, tag: &str) -> Option<StrategyKind> {
        tag.parse::<StrategyKind>()
            .ok()
            .filter(|kind| self.strategies.contains_key(kind))
    }

    #[must_use]
    pub fn get(&self, kind: StrategyKind) -> Option<&RegisteredStrategy> {
        self.strategies.get(&kind)
    }

    pub fn get_mut(&mut self, kind: StrategyKind) -> Option<&mut RegisteredStrategy> {
        self.strategies.get_mut(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StrategyKind, &RegisteredStrategy)> {
        self.strategies.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&StrategyKind, &mut RegisteredStrategy)> {
        self.strategies.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_strings() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>(), Ok(*kind));
        }
        assert!("Wheel".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn credit_and_debit_structures() {
        assert!(StrategyKind::IronCondor.is_credit());
        assert!(StrategyKind::PutCreditSpread.is_credit());
        assert!(!StrategyKind::LongCall.is_credit());
        assert!(!StrategyKind::DebitButterfly.is_credit());
    }

    #[test]
    fn resolve_requires_registration() {
        let registry = StrategyRegistry::new().with(StrategyKind::IronCondor, StrategyConfig::default());
        assert_eq!(registry.resolve("IronCondor"), Some(StrategyKind::IronCondor));
        assert_eq!(registry.resolve("PutCreditSpread"), None);
        assert_eq!(registry.resolve("NotAStrategy"), None);
    }

    #[test]
    fn from_config_skips_unknown_tags() {
        let mut config = AppConfig::default();
        config.strategies.insert("ShortPut".to_string(), StrategyConfig::default());
        config.strategies.insert("Mystery".to_string(), StrategyConfig::default());
        let registry = StrategyRegistry::from_config(&config);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(StrategyKind::ShortPut).is_some());
    }
}
