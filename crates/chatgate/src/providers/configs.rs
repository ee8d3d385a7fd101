use std::time::Duration;

use serde_json::{Map, Value};

use crate::models::request::ModelSettings;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Standard(StandardProviderConfig),
    FeeNegotiating(FeeProviderConfig),
}

/// Bearer-token chat-completions endpoint
#[derive(Debug, Clone)]
pub struct StandardProviderConfig {
    pub host: String,
    pub api_key: String,
    pub settings: ModelSettings,
    /// Provider-specific fields merged into every request body
    pub extensions: Map<String, Value>,
    pub timeout: Duration,
}

impl StandardProviderConfig {
    pub fn new<H: Into<String>, K: Into<String>>(
        host: H,
        api_key: K,
        settings: ModelSettings,
    ) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            settings,
            extensions: Map::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Pay-per-query endpoint with fee settlement
#[derive(Debug, Clone)]
pub struct FeeProviderConfig {
    pub host: String,
    pub provider_address: String,
    /// Fee offered on the first query of every call
    pub fallback_fee: f64,
    pub settings: ModelSettings,
    pub timeout: Duration,
}

impl FeeProviderConfig {
    pub fn new<H: Into<String>, A: Into<String>>(
        host: H,
        provider_address: A,
        fallback_fee: f64,
        settings: ModelSettings,
    ) -> Self {
        Self {
            host: host.into(),
            provider_address: provider_address.into(),
            fallback_fee,
            settings,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
