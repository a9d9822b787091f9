use relay::config::{Config as RelayConfig, EnvError, Environment};
use serde::Deserialize;
use std::fs::File;

pub const DEFAULT_STATSD_PORT: u16 = 8125;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
}

fn default_statsd_port() -> u16 {
    DEFAULT_STATSD_PORT
}

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
    pub sentry_dsn: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let mut config: Config = serde_yaml::from_reader(file)?;
        config.relay.environment = Environment::detect(|key| std::env::var(key).ok());

        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads every setting from environment variables, looked up through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay = RelayConfig::from_lookup(&lookup)?;

        // Older deployments set FLASK_DEBUG
        let debug = lookup("RELAY_DEBUG").or_else(|| lookup("FLASK_DEBUG"));
        let logging = LoggingConfig {
            debug: debug.is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            sentry_dsn: lookup("SENTRY_DSN").filter(|dsn| !dsn.is_empty()),
        };

        let metrics = match lookup("STATSD_HOST").filter(|host| !host.is_empty()) {
            Some(statsd_host) => {
                let statsd_port = match lookup("STATSD_PORT") {
                    Some(port) => port.trim().parse().map_err(|_| {
                        ConfigError::Env(EnvError::InvalidValue {
                            name: "STATSD_PORT",
                            value: port,
                        })
                    })?,
                    None => DEFAULT_STATSD_PORT,
                };
                Some(MetricsConfig {
                    statsd_host,
                    statsd_port,
                })
            }
            None => None,
        };

        Ok(Config {
            common: CommonConfig { metrics, logging },
            relay,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("could not read config from environment: {0}")]
    Env(#[from] EnvError),
}
