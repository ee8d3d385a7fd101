use super::message::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("model name must not be empty")]
    EmptyModel,
    #[error("temperature must be within [0, 2], got {0}")]
    Temperature(f32),
    #[error("top_p must be within [0, 1], got {0}")]
    TopP(f32),
    #[error("max_tokens must be positive")]
    MaxTokens,
}

/// Sampling parameters a provider is configured with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl ModelSettings {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            temperature: 0.2,
            top_p: 0.95,
            max_tokens: 2048,
            stop: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.model.trim().is_empty() {
            return Err(SettingsError::EmptyModel);
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(SettingsError::Temperature(self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(SettingsError::TopP(self.top_p));
        }
        if self.max_tokens == 0 {
            return Err(SettingsError::MaxTokens);
        }
        Ok(())
    }
}

/// One call's worth of input for a provider. Built fresh for every turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub stop: Vec<String>,
}

impl ProviderRequest {
    pub fn new(settings: &ModelSettings, messages: Vec<Message>, stream: bool) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
            messages,
            stream,
            stop: settings.stop.clone(),
        }
    }
}
