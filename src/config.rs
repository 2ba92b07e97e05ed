use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3600;
pub const DEFAULT_STAGE_DELAYS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
    Duration::from_secs(8),
];
pub const DEFAULT_EXPIRE_COMPLETED_JOBS_AFTER: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3600";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("STAGE_DELAYS_MS must hold exactly four millisecond values, got {0:?}")]
    StageCount(String),
    #[error("STAGE_DELAYS_MS value {0:?} is not a number")]
    StageValue(String),
    #[error("STAGE_DELAYS_MS must be strictly increasing")]
    StageOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub stage_delays: [Duration; 4],
    pub expire_completed_jobs_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            stage_delays: DEFAULT_STAGE_DELAYS,
            expire_completed_jobs_after: DEFAULT_EXPIRE_COMPLETED_JOBS_AFTER,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let stage_delays = match lookup("STAGE_DELAYS_MS") {
            Some(raw) => parse_stage_delays(&raw)?,
            None => defaults.stage_delays,
        };

        Ok(Config {
            port: parse_or(&lookup, "PORT", defaults.port),
            stage_delays,
            expire_completed_jobs_after: Duration::from_secs(parse_or(
                &lookup,
                "EXPIRE_COMPLETED_JOBS_AFTER_SECS",
                defaults.expire_completed_jobs_after.as_secs(),
            )),
        })
    }
}

/// Settings for `vidjob-client`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ClientConfig::default();

        ClientConfig {
            base_url: lookup("VIDJOB_URL").unwrap_or(defaults.base_url),
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
        }
    }
}

fn parse_or<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("ignoring unparseable {key}={raw:?}");
            default
        }),
        None => default,
    }
}

pub fn parse_stage_delays(raw: &str) -> Result<[Duration; 4], ConfigError> {
    let values = raw
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::StageValue(part.to_owned()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let delays: [Duration; 4] = values
        .try_into()
        .map_err(|_| ConfigError::StageCount(raw.to_owned()))?;

    if delays.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ConfigError::StageOrder);
    }

    Ok(delays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("STAGE_DELAYS_MS", "10, 20, 30, 40"),
            ("EXPIRE_COMPLETED_JOBS_AFTER_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.stage_delays[3], Duration::from_millis(40));
        assert_eq!(config.expire_completed_jobs_after, Duration::from_secs(5));
    }

    #[test]
    fn client_settings_come_from_their_own_variables() {
        assert_eq!(ClientConfig::from_lookup(lookup(&[])), ClientConfig::default());

        let config = ClientConfig::from_lookup(lookup(&[
            ("VIDJOB_URL", "http://render-box:9000"),
            ("POLL_INTERVAL_MS", "250"),
        ]));

        assert_eq!(config.base_url, "http://render-box:9000");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn bad_poll_interval_falls_back() {
        let config = ClientConfig::from_lookup(lookup(&[("POLL_INTERVAL_MS", "soon")]));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn bad_port_falls_back() {
        let config = Config::from_lookup(lookup(&[("PORT", "http")])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn stage_delays_must_be_increasing() {
        assert_eq!(parse_stage_delays("10,10,20,30"), Err(ConfigError::StageOrder));
        assert!(matches!(
            parse_stage_delays("10,20,30"),
            Err(ConfigError::StageCount(_))
        ));
        assert!(matches!(
            parse_stage_delays("10,x,30,40"),
            Err(ConfigError::StageValue(_))
        ));
    }
}
