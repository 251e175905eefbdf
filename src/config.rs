use crate::domain::{Decimal, ShareUnit};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Smallest accepted `SHARE_UNIT`: one cent.
fn min_share_unit() -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(1, 2))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: String,
    pub shop_name: String,
    pub access_token: String,
    pub webhook_secret: String,
    pub api_version: String,
    pub base_url: String,
    pub share_unit: ShareUnit,
    pub recalc_mode: RecalcMode,
    pub seed_fallback: SeedFallback,
    pub retry_max_elapsed: Duration,
}

/// Strategy used for triggers that name a changed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalcMode {
    /// Replay the customer's whole history.
    Full,
    /// Seed from the preceding order and replay from the trigger onward.
    Partial,
}

/// What a Partial run does when it cannot trust its seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedFallback {
    /// Rerun as Full.
    Downgrade,
    /// Fail the run with `SeedMissingOrStale`.
    Abort,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required(env_map: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    env_map
        .get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let bind_addr = env_map
            .get("BIND_ADDR")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let shop_name = required(&env_map, "SHOPIFY_SHOP_NAME")?;
        let access_token = required(&env_map, "SHOPIFY_API_ACCESS_TOKEN")?;
        let webhook_secret = required(&env_map, "SHOPIFY_API_SECRET_KEY")?;

        let api_version = env_map
            .get("SHOPIFY_API_VERSION")
            .cloned()
            .unwrap_or_else(|| "2023-10".to_string());

        let base_url = env_map
            .get("SHOPIFY_BASE_URL")
            .cloned()
            .unwrap_or_else(|| format!("https://{}.myshopify.com", shop_name));

        let share_unit = match env_map.get("SHARE_UNIT") {
            None => ShareUnit::default(),
            Some(raw) => Decimal::from_str_canonical(raw)
                .ok()
                .filter(|d| *d >= min_share_unit())
                .and_then(|d| ShareUnit::new(d).ok())
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "SHARE_UNIT".to_string(),
                        format!("must be a decimal of at least 0.01, got {}", raw),
                    )
                })?,
        };

        let recalc_mode = match env_map
            .get("RECALC_MODE")
            .map(|s| s.as_str())
            .unwrap_or("full")
        {
            "full" => RecalcMode::Full,
            "partial" => RecalcMode::Partial,
            other => {
                return Err(ConfigError::InvalidValue(
                    "RECALC_MODE".to_string(),
                    format!("must be full or partial, got {}", other),
                ))
            }
        };

        let seed_fallback = match env_map
            .get("SEED_FALLBACK")
            .map(|s| s.as_str())
            .unwrap_or("downgrade")
        {
            "downgrade" => SeedFallback::Downgrade,
            "abort" => SeedFallback::Abort,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SEED_FALLBACK".to_string(),
                    format!("must be downgrade or abort, got {}", other),
                ))
            }
        };

        let retry_max_elapsed_ms = env_map
            .get("RETRY_MAX_ELAPSED_MS")
            .map(|s| s.as_str())
            .unwrap_or("30000")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "RETRY_MAX_ELAPSED_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        Ok(Config {
            port,
            bind_addr,
            shop_name,
            access_token,
            webhook_secret,
            api_version,
            base_url,
            share_unit,
            recalc_mode,
            seed_fallback,
            retry_max_elapsed: Duration::from_millis(retry_max_elapsed_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("SHOPIFY_SHOP_NAME".to_string(), "test-shop".to_string());
        map.insert("SHOPIFY_API_ACCESS_TOKEN".to_string(), "shpat_123".to_string());
        map.insert("SHOPIFY_API_SECRET_KEY".to_string(), "secret".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_version, "2023-10");
        assert_eq!(config.base_url, "https://test-shop.myshopify.com");
        assert_eq!(config.share_unit, ShareUnit::default());
        assert_eq!(config.recalc_mode, RecalcMode::Full);
        assert_eq!(config.seed_fallback, SeedFallback::Downgrade);
        assert_eq!(config.retry_max_elapsed, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_shop_name() {
        let mut env_map = setup_required_env();
        env_map.remove("SHOPIFY_SHOP_NAME");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "SHOPIFY_SHOP_NAME"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_access_token() {
        let mut env_map = setup_required_env();
        env_map.remove("SHOPIFY_API_ACCESS_TOKEN");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "SHOPIFY_API_ACCESS_TOKEN"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_blank_secret_counts_as_missing() {
        let mut env_map = setup_required_env();
        env_map.insert("SHOPIFY_API_SECRET_KEY".to_string(), "  ".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "SHOPIFY_API_SECRET_KEY"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_share_unit_must_be_at_least_one_cent() {
        for bad in ["0", "-5", "lots", "0.001", "0.0000000000000000000000000001"] {
            let mut env_map = setup_required_env();
            env_map.insert("SHARE_UNIT".to_string(), bad.to_string());
            match Config::from_env_map(env_map) {
                Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SHARE_UNIT"),
                _ => panic!("Expected InvalidValue error for {}", bad),
            }
        }
    }

    #[test]
    fn test_share_unit_override() {
        let mut env_map = setup_required_env();
        env_map.insert("SHARE_UNIT".to_string(), "100".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.share_unit.value(), Decimal::from(100u64));

        let mut env_map = setup_required_env();
        env_map.insert("SHARE_UNIT".to_string(), "0.01".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.share_unit.value(), min_share_unit());
    }

    #[test]
    fn test_invalid_recalc_mode() {
        let mut env_map = setup_required_env();
        env_map.insert("RECALC_MODE".to_string(), "sometimes".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "RECALC_MODE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_partial_mode_with_abort() {
        let mut env_map = setup_required_env();
        env_map.insert("RECALC_MODE".to_string(), "partial".to_string());
        env_map.insert("SEED_FALLBACK".to_string(), "abort".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.recalc_mode, RecalcMode::Partial);
        assert_eq!(config.seed_fallback, SeedFallback::Abort);
    }

    #[test]
    fn test_invalid_seed_fallback() {
        let mut env_map = setup_required_env();
        env_map.insert("SEED_FALLBACK".to_string(), "guess".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SEED_FALLBACK"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
