use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use chatgate::{
    actions::TokenCreationConfig,
    models::request::ModelSettings,
    providers::configs::{FeeProviderConfig, ProviderConfig, StandardProviderConfig},
    retry::RetryPolicy,
};
use config::{Config, Environment};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::time::Duration;

const MAX_RETRY_ATTEMPTS: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server address: {}", e)))
    }
}

/// Bearer-token provider. Enabled once `api_key` is set.
#[derive(Debug, Deserialize)]
pub struct StandardSettings {
    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Comma separated stop sequences
    pub stop: String,
    /// JSON object merged into every request body
    pub extensions: String,
    pub timeout_secs: u64,
}

/// Fee-negotiating provider. Enabled once host, address and fallback fee are all set.
#[derive(Debug, Deserialize)]
pub struct FeeSettings {
    pub host: Option<String>,
    pub provider_address: Option<String>,
    pub fallback_fee: Option<f64>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stop: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Token-creation service. Enabled once host, user address and creation fee are all set.
#[derive(Debug, Deserialize)]
pub struct TokenCreationSettings {
    pub host: Option<String>,
    pub user_address: Option<String>,
    pub creation_fee: Option<String>,
    pub max_supply: String,
    pub initial_price: String,
    pub creator_lockup_period: String,
    pub lock_liquidity: bool,
    pub liquidity_lock_period: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub standard: StandardSettings,
    pub fee: FeeSettings,
    pub retry: RetrySettings,
    pub token_creation: TokenCreationSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Self::load()?;
        settings.validate()?;
        Ok(settings)
    }

    fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            // Standard provider defaults; the api key has none
            .set_default("standard.host", "https://nilai-a779.nillion.network")?
            .set_default("standard.model", "meta-llama/Llama-3.1-8B-Instruct")?
            .set_default("standard.temperature", 0.2)?
            .set_default("standard.top_p", 0.95)?
            .set_default("standard.max_tokens", 2048)?
            .set_default("standard.stop", "")?
            .set_default("standard.extensions", r#"{"nilrag":{}}"#)?
            .set_default("standard.timeout_secs", 120)?
            // Fee provider defaults; host, address and fee have none
            .set_default("fee.model", "og-basic")?
            .set_default("fee.temperature", 0.2)?
            .set_default("fee.top_p", 0.95)?
            .set_default("fee.max_tokens", 2048)?
            .set_default("fee.stop", "")?
            .set_default("fee.timeout_secs", 120)?
            // Retry defaults
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.backoff_ms", 200)?
            .set_default("retry.max_backoff_ms", 2000)?
            // Token creation defaults; host, user address and fee have none
            .set_default("token_creation.max_supply", "1000000000000000000000000")?
            .set_default("token_creation.initial_price", "1")?
            .set_default("token_creation.creator_lockup_period", "86400")?
            .set_default("token_creation.lock_liquidity", true)?
            .set_default("token_creation.liquidity_lock_period", "2592000")?
            .set_default("token_creation.timeout_secs", 30)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.retry.max_attempts) {
            return Err(ConfigError::Invalid(format!(
                "{} must be between 1 and {}, got {}",
                to_env_var("retry.max_attempts"),
                MAX_RETRY_ATTEMPTS,
                self.retry.max_attempts
            )));
        }
        if self.provider_configs()?.is_empty() {
            return Err(ConfigError::NoProviders {
                standard: to_env_var("standard.api_key"),
                fee: format!("{}_FEE__*", ENV_PREFIX),
            });
        }
        self.token_creation_config()?;
        Ok(())
    }

    /// Configs for every provider whose required values are present
    pub fn provider_configs(&self) -> Result<Vec<ProviderConfig>, ConfigError> {
        let mut configs = Vec::new();

        if let Some(api_key) = non_empty(&self.standard.api_key) {
            let standard = &self.standard;
            let settings = model_settings(
                "standard",
                &standard.model,
                standard.temperature,
                standard.top_p,
                standard.max_tokens,
                &standard.stop,
            )?;
            let mut config = StandardProviderConfig::new(&standard.host, api_key, settings);
            config.extensions = parse_extensions(&standard.extensions)?;
            config.timeout = Duration::from_secs(standard.timeout_secs);
            configs.push(ProviderConfig::Standard(config));
        }

        let fee = &self.fee;
        let host = non_empty(&fee.host);
        let provider_address = non_empty(&fee.provider_address);
        match (host, provider_address, fee.fallback_fee) {
            (None, None, None) => {}
            (Some(host), Some(provider_address), Some(fallback_fee)) => {
                let settings = model_settings(
                    "fee",
                    &fee.model,
                    fee.temperature,
                    fee.top_p,
                    fee.max_tokens,
                    &fee.stop,
                )?;
                let mut config =
                    FeeProviderConfig::new(host, provider_address, fallback_fee, settings);
                config.timeout = Duration::from_secs(fee.timeout_secs);
                configs.push(ProviderConfig::FeeNegotiating(config));
            }
            (host, provider_address, _) => {
                let field = if host.is_none() {
                    "fee.host"
                } else if provider_address.is_none() {
                    "fee.provider_address"
                } else {
                    "fee.fallback_fee"
                };
                return Err(ConfigError::MissingEnvVar {
                    env_var: to_env_var(field),
                });
            }
        }

        Ok(configs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    /// Token-creation config, or `None` when the service is not configured
    pub fn token_creation_config(&self) -> Result<Option<TokenCreationConfig>, ConfigError> {
        let tc = &self.token_creation;
        let host = non_empty(&tc.host);
        let user_address = non_empty(&tc.user_address);
        let creation_fee = non_empty(&tc.creation_fee);
        match (host, user_address, creation_fee) {
            (None, None, None) => Ok(None),
            (Some(host), Some(user_address), Some(creation_fee)) => Ok(Some(TokenCreationConfig {
                host: host.to_string(),
                user_address: user_address.to_string(),
                max_supply: tc.max_supply.clone(),
                initial_price: tc.initial_price.clone(),
                creator_lockup_period: tc.creator_lockup_period.clone(),
                lock_liquidity: tc.lock_liquidity,
                liquidity_lock_period: tc.liquidity_lock_period.clone(),
                creation_fee: creation_fee.to_string(),
                timeout: Duration::from_secs(tc.timeout_secs),
            })),
            (host, user_address, _) => {
                let field = if host.is_none() {
                    "token_creation.host"
                } else if user_address.is_none() {
                    "token_creation.user_address"
                } else {
                    "token_creation.creation_fee"
                };
                Err(ConfigError::MissingEnvVar {
                    env_var: to_env_var(field),
                })
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn model_settings(
    section: &str,
    model: &str,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stop: &str,
) -> Result<ModelSettings, ConfigError> {
    let settings = ModelSettings {
        model: model.to_string(),
        temperature,
        top_p,
        max_tokens,
        stop: stop
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    };
    settings
        .validate()
        .map_err(|e| ConfigError::Invalid(format!("{} provider: {}", section, e)))?;
    Ok(settings)
}

fn parse_extensions(raw: &str) -> Result<Map<String, Value>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        ConfigError::Invalid(format!(
            "{} must be a JSON object: {}",
            to_env_var("standard.extensions"),
            e
        ))
    })
}
