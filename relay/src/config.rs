use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DOWNSTREAM_URL: &str = "http://localhost:8081";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid downstream URL {0:?}: {1}")]
    InvalidDownstreamUrl(String, String),

    #[error("Downstream URL must use http or https: {0}")]
    UnsupportedScheme(String),

    #[error("Downstream timeout cannot be 0")]
    InvalidTimeout,
}

#[derive(Error, Debug, PartialEq)]
pub enum EnvError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Relay configuration, built once at startup and never mutated afterwards.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for inbound webhooks
    #[serde(default)]
    pub listener: Listener,
    /// Where received webhooks are forwarded to
    #[serde(default)]
    pub downstream: Downstream,
    /// Hosting environment reported by `/status`
    ///
    /// Never read from a config file, always detected from the process
    /// environment.
    #[serde(skip)]
    pub environment: Environment,
}

impl Config {
    /// Builds the config from environment variables, looked up through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(host) = lookup("HOST") {
            config.listener.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.listener.port = port.trim().parse().map_err(|_| EnvError::InvalidValue {
                name: "PORT",
                value: port,
            })?;
        }
        if let Some(url) = lookup("LOCAL_SERVER_URL") {
            config.downstream.url = url;
        }
        config.environment = Environment::detect(&lookup);

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.downstream.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// The local application receiving relayed webhooks
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Downstream {
    /// Base URL; webhooks are posted to `<url>/webhook`
    ///
    /// Kept as the configured string so it is reported back verbatim.
    #[serde(default = "default_downstream_url")]
    pub url: String,
    /// Upper bound on a single delivery attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_downstream_url() -> String {
    DEFAULT_DOWNSTREAM_URL.into()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for Downstream {
    fn default() -> Self {
        Downstream {
            url: default_downstream_url(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Downstream {
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ValidationError::InvalidDownstreamUrl(self.url.clone(), e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(self.url.clone()));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Where the relay is running, as reported by `/status`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Heroku,
    #[default]
    Local,
}

impl Environment {
    /// Set by the Heroku runtime on every dyno.
    pub const MARKER: &'static str = "DYNO";

    pub fn detect<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(Self::MARKER) {
            Some(_) => Environment::Heroku,
            None => Environment::Local,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Environment::Heroku => "heroku",
            Environment::Local => "local",
        }
    }
}
