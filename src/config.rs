use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite:matchday_pulse.db";
const DEFAULT_ANNOUNCE_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Sqlite,
    // Demo mode: nothing survives a restart
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub storage_mode: StorageMode,
    pub seed_file: Option<PathBuf>,
    pub announce_interval: Duration,
}

impl Config {
    /// Reads configuration from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let storage_mode = match lookup("STORAGE_MODE").as_deref() {
            None | Some("sqlite") => StorageMode::Sqlite,
            Some("memory") => StorageMode::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_MODE",
                    value: other.to_string(),
                })
            }
        };

        let seed_file = lookup("SEED_FILE")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let announce_interval = match lookup("ANNOUNCE_INTERVAL_SECONDS") {
            None => Duration::from_secs(DEFAULT_ANNOUNCE_INTERVAL_SECONDS),
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "ANNOUNCE_INTERVAL_SECONDS",
                        value: raw,
                    })
                }
            },
        };

        Ok(Self {
            discord_token,
            database_url,
            storage_mode,
            seed_file,
            announce_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("DISCORD_TOKEN", "abc")]).unwrap();
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.storage_mode, StorageMode::Sqlite);
        assert!(cfg.seed_file.is_none());
        assert_eq!(cfg.announce_interval, Duration::from_secs(60));
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("DISCORD_TOKEN"))));
        assert!(matches!(
            config(&[("DISCORD_TOKEN", "  ")]),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn memory_mode_with_seed() {
        let cfg = config(&[
            ("DISCORD_TOKEN", "abc"),
            ("STORAGE_MODE", "memory"),
            ("SEED_FILE", "demo/polls.json"),
            ("ANNOUNCE_INTERVAL_SECONDS", "15"),
        ])
        .unwrap();
        assert_eq!(cfg.storage_mode, StorageMode::Memory);
        assert_eq!(cfg.seed_file, Some(PathBuf::from("demo/polls.json")));
        assert_eq!(cfg.announce_interval, Duration::from_secs(15));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            config(&[("DISCORD_TOKEN", "abc"), ("STORAGE_MODE", "postgres")]),
            Err(ConfigError::Invalid { name: "STORAGE_MODE", .. })
        ));
        assert!(matches!(
            config(&[("DISCORD_TOKEN", "abc"), ("ANNOUNCE_INTERVAL_SECONDS", "0")]),
            Err(ConfigError::Invalid { name: "ANNOUNCE_INTERVAL_SECONDS", .. })
        ));
    }
}
