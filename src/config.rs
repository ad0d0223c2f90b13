use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

/// Port the webhook listener binds when TLS is enabled.
pub const TLS_PORT: u16 = 8443;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_filter(self) -> &'static str {
        match self {
            Environment::Dev => "error",
            Environment::Prod => "info",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => write!(f, "dev"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err("expected `dev` or `prod`".to_string()),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct TelegramConfig {
    pub token: String,
    pub webhook_url: Url,
    /// Sent with `setWebhook` and checked on every callback when present.
    pub webhook_secret: Option<String>,
}

// Keeps the bot token out of log output.
impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("webhook_url", &self.webhook_url.as_str())
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_host: String,
    pub bot_port: u16,
    pub health_port: u16,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    pub enabled: bool,
    pub bind_host: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub environment: Environment,
}

fn default_port() -> u16 {
    3000
}

fn default_health_port() -> u16 {
    1469
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_tls_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let token = get("TELEGRAM_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_TOKEN"))?;
        let webhook_raw =
            get("TELEGRAM_WEBHOOK").ok_or(ConfigError::Missing("TELEGRAM_WEBHOOK"))?;
        let webhook_url = Url::parse(&webhook_raw).map_err(|e| ConfigError::Invalid {
            name: "TELEGRAM_WEBHOOK",
            value: webhook_raw.clone(),
            reason: e.to_string(),
        })?;
        let environment_raw = get("ENVIRONMENT").ok_or(ConfigError::Missing("ENVIRONMENT"))?;
        let environment = parse("ENVIRONMENT", &environment_raw)?;

        let webhook_secret = match get("TELEGRAM_WEBHOOK_SECRET") {
            Some(secret) => Some(validate_secret(secret)?),
            None => None,
        };

        let bot_port = match get("BOT_PORT") {
            Some(raw) => parse("BOT_PORT", &raw)?,
            None => match get("PORT") {
                Some(raw) => parse("PORT", &raw)?,
                None => default_port(),
            },
        };
        let health_port = match get("HEALTH_PORT") {
            Some(raw) => parse("HEALTH_PORT", &raw)?,
            None => default_health_port(),
        };
        let request_timeout = match get("REQUEST_TIMEOUT_SECS") {
            Some(raw) => parse("REQUEST_TIMEOUT_SECS", &raw)?,
            None => default_request_timeout_secs(),
        };
        let shutdown_timeout = match get("SHUTDOWN_TIMEOUT_SECS") {
            Some(raw) => parse("SHUTDOWN_TIMEOUT_SECS", &raw)?,
            None => default_shutdown_timeout_secs(),
        };

        Ok(Config {
            telegram: TelegramConfig {
                token,
                webhook_url,
                webhook_secret,
            },
            server: ServerConfig {
                bind_host: get("BIND_HOST").unwrap_or_else(default_bind_host),
                bot_port,
                health_port,
                request_timeout: Duration::from_secs(request_timeout),
                shutdown_timeout: Duration::from_secs(shutdown_timeout),
            },
            tls: TlsConfig {
                enabled: get("SSL_ENABLED").as_deref() == Some("true"),
                bind_host: get("TLS_BIND_HOST").unwrap_or_else(default_tls_bind_host),
                cert_path: get("TLS_CERT_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("localhost.crt")),
                key_path: get("TLS_KEY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("localhost.key")),
            },
            environment,
        })
    }

    /// Host the webhook listener binds. The TLS listener is public by default.
    pub fn bot_host(&self) -> &str {
        if self.tls.enabled {
            &self.tls.bind_host
        } else {
            &self.server.bind_host
        }
    }

    /// Port the webhook listener binds: the fixed TLS port or the plain port.
    pub fn bot_port(&self) -> u16 {
        if self.tls.enabled {
            TLS_PORT
        } else {
            self.server.bot_port
        }
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Telegram accepts 1-256 characters from `A-Z`, `a-z`, `0-9`, `_` and `-`.
fn validate_secret(secret: String) -> Result<String, ConfigError> {
    let valid = secret.len() <= 256
        && secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(secret)
    } else {
        Err(ConfigError::Invalid {
            name: "TELEGRAM_WEBHOOK_SECRET",
            value: "<redacted>".to_string(),
            reason: "must be 1-256 characters of A-Z, a-z, 0-9, _ or -".to_string(),
        })
    }
}
