use crate::error::ConfigError;
use log::LevelFilter;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Scylla,
    /// Nothing survives a restart.
    Memory,
}

impl FromStr for Storage {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scylla" => Ok(Storage::Scylla),
            "memory" => Ok(Storage::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: Storage,
    pub scylla_node: String,
    pub alphavantage_api_key: String,
    /// Without a bot token notifications are written to the log only.
    pub discord_bot_token: Option<String>,
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    pub eval_interval: Duration,
    pub quote_delay: Duration,
    pub starting_balance: f64,
    pub log_level: LevelFilter,
}

impl Config {
    /// Reads the configuration from the environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        Ok(Config {
            storage: parse_or(&lookup, "STORAGE", Storage::Scylla)?,
            scylla_node: lookup("SCYLLA_NODE").unwrap_or_else(|| "127.0.0.1:9042".to_string()),
            alphavantage_api_key: required("ALPHAVANTAGE_API_KEY")?,
            discord_bot_token: lookup("DISCORD_BOT_TOKEN").filter(|v| !v.trim().is_empty()),
            jwt_secret: required("JWT_SECRET")?,
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3030)))?,
            eval_interval: Duration::from_secs(parse_or(&lookup, "EVAL_INTERVAL_SECS", 300)?),
            quote_delay: Duration::from_millis(parse_or(&lookup, "QUOTE_DELAY_MS", 1000)?),
            starting_balance: parse_or(&lookup, "STARTING_BALANCE", 100_000.0)?,
            log_level: parse_or(&lookup, "LOG_LEVEL", LevelFilter::Info)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn applies_defaults() {
        let config =
            Config::from_lookup(lookup(&[("ALPHAVANTAGE_API_KEY", "demo"), ("JWT_SECRET", "s")]))
                .unwrap();
        assert_eq!(config.storage, Storage::Scylla);
        assert_eq!(config.scylla_node, "127.0.0.1:9042");
        assert_eq!(config.eval_interval, Duration::from_secs(300));
        assert_eq!(config.quote_delay, Duration::from_millis(1000));
        assert_eq!(config.starting_balance, 100_000.0);
        assert_eq!(config.log_level, LevelFilter::Info);
        assert!(config.discord_bot_token.is_none());
    }

    #[test]
    fn requires_api_key() {
        let err = Config::from_lookup(lookup(&[("JWT_SECRET", "s")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ALPHAVANTAGE_API_KEY")));
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Config::from_lookup(lookup(&[
            ("ALPHAVANTAGE_API_KEY", "demo"),
            ("JWT_SECRET", "s"),
            ("EVAL_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "EVAL_INTERVAL_SECS", .. }));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ALPHAVANTAGE_API_KEY", "demo"),
            ("JWT_SECRET", "s"),
            ("DISCORD_BOT_TOKEN", "abc"),
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("LOG_LEVEL", "debug"),
            ("STORAGE", "Memory"),
        ]))
        .unwrap();
        assert_eq!(config.storage, Storage::Memory);
        assert_eq!(config.discord_bot_token.as_deref(), Some("abc"));
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }
}
