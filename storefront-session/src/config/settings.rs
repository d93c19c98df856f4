use std::time::Duration;

use config::{Config, ConfigError, File, FileFormat};
use secrecy::SecretString;
use serde::Deserialize;
use storefront_api::DEFAULT_BASE_URL;

use crate::connection::{
    Backoff, ConnectionOptions, RetryPolicy, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REALTIME_URL,
    DEFAULT_RETRY_DELAY,
};

pub const CONFIG_PATH_ENV: &str = "STOREFRONT_CONFIG";
pub const ENV_PREFIX: &str = "STOREFRONT";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub identity: IdentitySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeSettings {
    #[serde(default = "default_realtime_url")]
    pub url: String,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetrySettings {
    Fixed {
        #[serde(default = "default_delay_secs")]
        delay_secs: u64,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    Exponential {
        #[serde(default = "default_initial_delay_secs")]
        initial_delay_secs: u64,
        #[serde(default = "default_max_delay_secs")]
        max_delay_secs: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default = "default_jitter")]
        jitter: bool,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::Fixed {
            delay_secs: default_delay_secs(),
            max_attempts: None,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        match *self {
            Self::Fixed {
                delay_secs,
                max_attempts,
            } => RetryPolicy {
                backoff: Backoff::Fixed(Duration::from_secs(delay_secs)),
                max_attempts,
            },
            Self::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
                jitter,
                max_attempts,
            } => RetryPolicy {
                backoff: Backoff::Exponential {
                    initial: Duration::from_secs(initial_delay_secs),
                    max: Duration::from_secs(max_delay_secs),
                    multiplier,
                    jitter,
                },
                max_attempts,
            },
        }
    }

    fn max_attempts(&self) -> Option<u32> {
        match self {
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct IdentitySettings {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            api_key: String::new(),
            refresh_token: None,
        }
    }
}

impl IdentitySettings {
    /// Credential used to sign in at startup, if configured
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
    }
}

impl std::fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("token_url", &self.token_url)
            .field("api_key", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_realtime_url() -> String {
    DEFAULT_REALTIME_URL.to_string()
}

fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
}

fn default_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY.as_secs()
}

fn default_initial_delay_secs() -> u64 {
    1
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_token_url() -> String {
    "https://securetoken.googleapis.com/v1/token".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());

        let settings = Config::builder()
            .add_source(File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            return Err("api.base_url is required".to_string());
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err("api.base_url must be a valid HTTP(S) URL".to_string());
        }

        let realtime_url = self.realtime.url.trim();
        if !realtime_url.starts_with("ws://") && !realtime_url.starts_with("wss://") {
            return Err("realtime.url must be a ws:// or wss:// URL".to_string());
        }
        if self.realtime.handshake_timeout_secs == 0 {
            return Err("realtime.handshake_timeout_secs must be greater than zero".to_string());
        }

        if self.realtime.retry.max_attempts() == Some(0) {
            return Err("realtime.retry.max_attempts must be at least 1".to_string());
        }
        if let RetrySettings::Fixed { delay_secs: 0, .. } = self.realtime.retry {
            return Err("realtime.retry.delay_secs must be greater than zero".to_string());
        }
        if let RetrySettings::Exponential {
            initial_delay_secs,
            max_delay_secs,
            multiplier,
            ..
        } = self.realtime.retry
        {
            if initial_delay_secs == 0 {
                return Err(
                    "realtime.retry.initial_delay_secs must be greater than zero".to_string(),
                );
            }
            if multiplier < 1.0 {
                return Err("realtime.retry.multiplier must be at least 1.0".to_string());
            }
            if max_delay_secs < initial_delay_secs {
                return Err(
                    "realtime.retry.max_delay_secs must not be below initial_delay_secs"
                        .to_string(),
                );
            }
        }

        if self.identity.refresh_token.is_some() && self.identity.token_url.trim().is_empty() {
            return Err("identity.token_url is required to sign in".to_string());
        }
        Ok(())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            handshake_timeout: Duration::from_secs(self.realtime.handshake_timeout_secs),
            retry: self.realtime.retry.policy(),
        }
    }
}
