//! Application configuration loaded from `BUSTMAKER_*` environment variables.

use crate::application::orchestrator::GenerationPolicy;
use crate::error::{BustError, Result};
use crate::infrastructure::gateways::GatewayEnvironment;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "BUSTMAKER_";

/// Which generation backend serves dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Procedural,
    Remote,
}

impl FromStr for ProviderKind {
    type Err = BustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "procedural" => Ok(Self::Procedural),
            "remote" => Ok(Self::Remote),
            other => Err(BustError::ConfigError(format!("unknown provider: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayMode {
    #[default]
    Mock,
    Dodo,
}

impl FromStr for GatewayMode {
    type Err = BustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "dodo" => Ok(Self::Dodo),
            other => Err(BustError::ConfigError(format!("unknown payment gateway: {other}"))),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    /// Credits granted when an account is opened.
    pub starting_credits: u64,
    pub upload_cost: u64,
    pub max_upload_bytes: usize,
    pub webhook_secret: Option<String>,
    pub generation_timeout: Duration,
    pub stale_grace: Duration,
    pub provider: ProviderKind,
    pub provider_url: String,
    pub provider_poll_interval: Duration,
    /// Simulated work time of the procedural provider.
    pub procedural_delay: Duration,
    pub gateway: GatewayMode,
    pub gateway_api_key: Option<String>,
    pub gateway_environment: GatewayEnvironment,
    /// Frontend base URL used in checkout redirects.
    pub client_url: String,
    /// Directory for uploaded images. In memory when unset.
    pub upload_dir: Option<PathBuf>,
    pub log_json: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("starting_credits", &self.starting_credits)
            .field("upload_cost", &self.upload_cost)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("generation_timeout", &self.generation_timeout)
            .field("stale_grace", &self.stale_grace)
            .field("provider", &self.provider)
            .field("provider_url", &self.provider_url)
            .field("gateway", &self.gateway)
            .field("gateway_environment", &self.gateway_environment)
            .field("client_url", &self.client_url)
            .field("upload_dir", &self.upload_dir)
            .finish_non_exhaustive()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            starting_credits: 5,
            upload_cost: 1,
            max_upload_bytes: 10 * 1024 * 1024,
            webhook_secret: None,
            generation_timeout: Duration::from_secs(300),
            stale_grace: Duration::from_secs(60),
            provider: ProviderKind::Procedural,
            provider_url: "http://127.0.0.1:5001".to_string(),
            provider_poll_interval: Duration::from_secs(5),
            procedural_delay: Duration::from_secs(3),
            gateway: GatewayMode::Mock,
            gateway_api_key: None,
            gateway_environment: GatewayEnvironment::Sandbox,
            client_url: "http://localhost:5173".to_string(),
            upload_dir: None,
            log_json: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, which receives full variable
    /// names such as `BUSTMAKER_UPLOAD_COST`. Unset or empty values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            starting_credits: parse_or(var("STARTING_CREDITS"), "STARTING_CREDITS", defaults.starting_credits)?,
            upload_cost: parse_or(var("UPLOAD_COST"), "UPLOAD_COST", defaults.upload_cost)?,
            max_upload_bytes: parse_or(var("MAX_UPLOAD_BYTES"), "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            webhook_secret: var("WEBHOOK_SECRET"),
            generation_timeout: parse_or(var("GENERATION_TIMEOUT_SECS"), "GENERATION_TIMEOUT_SECS", 300)
                .map(Duration::from_secs)?,
            stale_grace: parse_or(var("STALE_GRACE_SECS"), "STALE_GRACE_SECS", 60).map(Duration::from_secs)?,
            provider: var("PROVIDER").map(|v| v.parse()).transpose()?.unwrap_or_default(),
            provider_url: var("PROVIDER_URL").unwrap_or(defaults.provider_url),
            provider_poll_interval: parse_or(var("PROVIDER_POLL_SECS"), "PROVIDER_POLL_SECS", 5)
                .map(Duration::from_secs)?,
            procedural_delay: parse_or(var("PROCEDURAL_DELAY_MS"), "PROCEDURAL_DELAY_MS", 3000)
                .map(Duration::from_millis)?,
            gateway: var("GATEWAY").map(|v| v.parse()).transpose()?.unwrap_or_default(),
            gateway_api_key: var("GATEWAY_API_KEY"),
            gateway_environment: var("GATEWAY_ENV").map(|v| v.parse()).transpose()?.unwrap_or_default(),
            client_url: var("CLIENT_URL").unwrap_or(defaults.client_url),
            upload_dir: var("UPLOAD_DIR").map(PathBuf::from),
            log_json: parse_or(var("LOG_JSON"), "LOG_JSON", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_cost == 0 {
            return Err(BustError::ConfigError("upload cost must be positive".to_string()));
        }
        if self.max_upload_bytes == 0 {
            return Err(BustError::ConfigError("max upload size must be positive".to_string()));
        }
        if self.generation_timeout.is_zero() {
            return Err(BustError::ConfigError("generation timeout must be positive".to_string()));
        }
        if self.gateway == GatewayMode::Dodo && self.gateway_api_key.is_none() {
            return Err(BustError::ConfigError(format!(
                "{ENV_PREFIX}GATEWAY_API_KEY is required for the dodo gateway"
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> GenerationPolicy {
        GenerationPolicy {
            upload_cost: self.upload_cost,
            max_upload_bytes: self.max_upload_bytes,
            timeout: self.generation_timeout,
            stale_grace: self.stale_grace,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, name: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| BustError::ConfigError(format!("Invalid {ENV_PREFIX}{name}: {raw}"))),
        None => Ok(default),
    }
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
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.starting_credits, 5);
        assert_eq!(config.upload_cost, 1);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.generation_timeout, Duration::from_secs(300));
        assert_eq!(config.provider, ProviderKind::Procedural);
        assert_eq!(config.gateway, GatewayMode::Mock);
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BUSTMAKER_STARTING_CREDITS", "10"),
            ("BUSTMAKER_WEBHOOK_SECRET", "whsec"),
            ("BUSTMAKER_PROVIDER", "remote"),
            ("BUSTMAKER_PROVIDER_URL", "http://gen:5001"),
            ("BUSTMAKER_GENERATION_TIMEOUT_SECS", "30"),
            ("BUSTMAKER_GATEWAY", "dodo"),
            ("BUSTMAKER_GATEWAY_API_KEY", "sk_test"),
            ("BUSTMAKER_GATEWAY_ENV", "production"),
        ]))
        .unwrap();
        assert_eq!(config.starting_credits, 10);
        assert_eq!(config.webhook_secret.as_deref(), Some("whsec"));
        assert_eq!(config.provider, ProviderKind::Remote);
        assert_eq!(config.provider_url, "http://gen:5001");
        assert_eq!(config.policy().timeout, Duration::from_secs(30));
        assert_eq!(config.gateway_environment, GatewayEnvironment::Production);
        assert!(!format!("{config:?}").contains("whsec"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("BUSTMAKER_UPLOAD_COST", "abc")])),
            Err(BustError::ConfigError(_))
        ));
        assert!(AppConfig::from_lookup(lookup(&[("BUSTMAKER_UPLOAD_COST", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("BUSTMAKER_GATEWAY", "dodo")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("BUSTMAKER_PROVIDER", "magic")])).is_err());
    }
}
