use chrono_tz::Tz;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::db::PoolSettings;
use crate::notifications::templates::DEFAULT_WRAP_WIDTH;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub pool_min_size: u32,
    pub pool_max_size: u32,
    pub pool_acquire_timeout_secs: u64,
    pub wrap_width: usize,
    pub timezone: Tz,
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    pool_min_size: Option<u32>,
    pool_max_size: Option<u32>,
    pool_acquire_timeout_secs: Option<u64>,
    wrap_width: Option<usize>,
    timezone: Option<String>,
    log_dir: Option<String>,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let path = Path::new(path_str);
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        Self::merge(env_config, file_config)
    }

    fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<Self, String> {
        let defaults = PoolSettings::default();
        let timezone = match env.timezone.or(file.timezone) {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| format!("Invalid TIMEZONE {name:?}: {e}"))?,
            None => Tz::UTC,
        };

        let config = ServerConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or("DATABASE_URL is required")?,
            pool_min_size: env
                .pool_min_size
                .or(file.pool_min_size)
                .unwrap_or(defaults.min_size),
            pool_max_size: env
                .pool_max_size
                .or(file.pool_max_size)
                .unwrap_or(defaults.max_size),
            pool_acquire_timeout_secs: env
                .pool_acquire_timeout_secs
                .or(file.pool_acquire_timeout_secs)
                .unwrap_or(defaults.acquire_timeout.as_secs()),
            wrap_width: env
                .wrap_width
                .or(file.wrap_width)
                .unwrap_or(DEFAULT_WRAP_WIDTH),
            timezone,
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
        };

        if config.pool_min_size > config.pool_max_size || config.pool_max_size == 0 {
            return Err(format!(
                "Invalid pool bounds: min {} max {}",
                config.pool_min_size, config.pool_max_size
            ));
        }
        if config.wrap_width == 0 {
            return Err("WRAP_WIDTH must be positive".to_string());
        }
        Ok(config)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            min_size: self.pool_min_size,
            max_size: self.pool_max_size,
            acquire_timeout: Duration::from_secs(self.pool_acquire_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> PartialServerConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let file = from_toml(r#"database_url = "postgres://ndr@localhost/ndr""#);
        let config = ServerConfig::merge(PartialServerConfig::default(), file).unwrap();

        assert_eq!(config.pool_settings(), PoolSettings::default());
        assert_eq!(config.wrap_width, 78);
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.log_dir, "logs");
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = from_toml(
            r#"
            database_url = "postgres://file@localhost/ndr"
            pool_max_size = 20
            timezone = "Europe/Berlin"
            "#,
        );
        let env = PartialServerConfig {
            database_url: Some("postgres://env@localhost/ndr".to_string()),
            timezone: Some("America/New_York".to_string()),
            ..Default::default()
        };
        let config = ServerConfig::merge(env, file).unwrap();

        assert_eq!(config.database_url, "postgres://env@localhost/ndr");
        assert_eq!(config.pool_max_size, 20);
        assert_eq!(config.timezone, chrono_tz::America::New_York);
    }

    #[test]
    fn test_database_url_is_required() {
        let err = ServerConfig::merge(PartialServerConfig::default(), PartialServerConfig::default())
            .unwrap_err();
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    fn test_rejects_bad_timezone_and_bounds() {
        let bad_tz = from_toml(
            r#"
            database_url = "postgres://localhost/ndr"
            timezone = "Mars/Olympus_Mons"
            "#,
        );
        assert!(ServerConfig::merge(PartialServerConfig::default(), bad_tz).is_err());

        let bad_bounds = from_toml(
            r#"
            database_url = "postgres://localhost/ndr"
            pool_min_size = 50
            pool_max_size = 5
            "#,
        );
        assert!(ServerConfig::merge(PartialServerConfig::default(), bad_bounds).is_err());
    }
}
