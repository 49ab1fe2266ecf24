use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml`, `LEGWORK_*` environment
    /// variables and `config/Config.json`. Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml")
    }

    /// Same as [`ConfigLoader::load`] with an explicit TOML path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config: AppConfig = Self::figment(path.as_ref()).extract()?;
        tracing::debug!(
            path = %path.as_ref().display(),
            strategies = config.strategies.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LEGWORK_").split("__"))
            .join(Json::file("config/Config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn merges_toml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "legwork.toml",
                r#"
                [manager]
                manage_position_frequency = 5

                [strategies.PutCreditSpread.thresholds]
                stop_loss_multiplier = "2.0"
                hard_dte = 1

                [strategies.PutCreditSpread.selector]
                dte = 45
                dte_window = 7
                "#,
            )?;
            jail.set_env("LEGWORK_STORE__KEY", "spx.json");

            let config = ConfigLoader::load_from("legwork.toml").expect("config should load");
            assert_eq!(config.manager.manage_position_frequency, 5);
            assert_eq!(config.store.key, "spx.json");

            let strategy = &config.strategies["PutCreditSpread"];
            assert_eq!(strategy.thresholds.stop_loss_multiplier, Some(dec!(2.0)));
            assert_eq!(strategy.thresholds.hard_dte, Some(1));
            assert_eq!(strategy.selector.dte_range(), (38, 45));
            Ok(())
        });
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("absent.toml").expect("defaults should load");
            assert_eq!(config.manager.manage_position_frequency, 1);
            assert_eq!(config.store.key, "positions.json");
            assert!(config.strategies.is_empty());
            Ok(())
        });
    }
}
