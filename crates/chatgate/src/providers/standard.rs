use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::base::Provider;
use super::configs::StandardProviderConfig;
use super::factory::ProviderKind;
use super::utils::{enforce_stop_sequences, messages_to_spec, StopSequenceFilter};
use crate::errors::ProviderError;
use crate::models::request::{ModelSettings, ProviderRequest};
use crate::stream::{decode_stream, TokenStream};

pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Client for a bearer-token authenticated chat-completions endpoint
pub struct StandardProvider {
    client: Client,
    config: StandardProviderConfig,
}

impl StandardProvider {
    pub fn new(config: StandardProviderConfig) -> Result<Self> {
        config.settings.validate()?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn payload(&self, request: &ProviderRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": messages_to_spec(&request.messages),
            "temperature": request.temperature,
            "top_p": request.top_p,
            "max_tokens": request.max_tokens,
            "stream": request.stream,
        });

        if let Some(body) = payload.as_object_mut() {
            for (key, value) in &self.config.extensions {
                body.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        payload
    }

    async fn post(&self, payload: Value) -> Result<Response, ProviderError> {
        let url = format!(
            "{}{}",
            self.config.host.trim_end_matches('/'),
            COMPLETIONS_PATH
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Http {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// Pull `choices[0].message.content` out of a non-streaming response
fn response_content(body: &Value) -> Option<&str> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
}

#[async_trait]
impl Provider for StandardProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Standard
    }

    fn settings(&self) -> &ModelSettings {
        &self.config.settings
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let mut payload = self.payload(request);
        payload["stream"] = json!(false);

        let response = self.post(payload).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let text = response_content(&body)
            .map(|content| enforce_stop_sequences(content, &request.stop))
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(text)
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<TokenStream, ProviderError> {
        let mut payload = self.payload(request);
        payload["stream"] = json!(true);

        let response = self.post(payload).await?;
        debug!("completion stream opened");
        let tokens = decode_stream(response.bytes_stream());

        if request.stop.is_empty() {
            return Ok(tokens);
        }

        let mut filter = StopSequenceFilter::new(request.stop.clone());
        Ok(Box::pin(async_stream::stream! {
            let mut tokens = tokens;
            while let Some(token) = tokens.next().await {
                match token {
                    Ok(token) => {
                        if let Some(out) = filter.push(&token) {
                            yield Ok(out);
                        }
                        if filter.is_stopped() {
                            break;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
            if let Some(rest) = filter.finish() {
                yield Ok(rest);
            }
        }))
    }
}
