//! Shared building blocks for the legwork options risk core: contract and
//! quote types, trading-calendar arithmetic and configuration.

pub mod calendar;
pub mod config;
pub mod config_loader;
pub mod types;

pub use calendar::{TradingCalendar, WeekdayCalendar};
pub use config::{AppConfig, ManagerConfig, RiskThresholds, SelectorConfig, StoreConfig, StrategyConfig};
pub use config_loader::ConfigLoader;
pub use types::{ContractDescriptor, LegSide, MarketSnapshot, OptionRight, OrderSide, Quote};
