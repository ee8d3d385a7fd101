//! Client for a pay-per-query endpoint.
//!
//! A query may be refused with a 500 whose body quotes the fee the provider expects. The client
//! then settles that fee and repeats the query once, offering the quoted amount:
//!
//! ```text
//! Query --200--> done
//!   |--500 + quote--> Settle --200--> Retry --200--> done
//! ```
//!
//! Any other outcome ends the call; the outer retry policy decides whether to start over.

use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::base::Provider;
use super::configs::FeeProviderConfig;
use super::factory::ProviderKind;
use super::utils::{enforce_stop_sequences, messages_to_prompt};
use crate::errors::ProviderError;
use crate::models::request::{ModelSettings, ProviderRequest};

pub const QUERY_PATH: &str = "/api/services/query";
pub const SETTLE_PATH: &str = "/api/services/settle-fee";

lazy_static! {
    static ref FEE_PATTERN: Regex = Regex::new(r"expected (\d+\.\d+) A0GI").unwrap();
}

/// Fee the provider asked for before it will answer
#[derive(Debug, Clone, PartialEq)]
pub struct FeeQuote {
    pub provider_address: String,
    pub fee: f64,
}

impl FeeQuote {
    /// Extract the quoted fee from an error body such as `... expected 0.0042 A0GI ...`
    pub fn parse(provider_address: &str, body: &str) -> Option<Self> {
        let amount = FEE_PATTERN.captures(body)?.get(1)?.as_str();
        let fee = amount.parse::<f64>().ok()?;
        Some(Self {
            provider_address: provider_address.to_string(),
            fee,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    provider_address: &'a str,
    query: &'a str,
    fallback_fee: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleBody<'a> {
    provider_address: &'a str,
    fee: f64,
}

pub struct FeeNegotiatingProvider {
    client: Client,
    config: FeeProviderConfig,
}

impl FeeNegotiatingProvider {
    pub fn new(config: FeeProviderConfig) -> Result<Self> {
        config.settings.validate()?;
        if !config.fallback_fee.is_finite() || config.fallback_fee < 0.0 {
            anyhow::bail!("fallback fee must be a non-negative number");
        }
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host.trim_end_matches('/'), path)
    }

    async fn query(&self, prompt: &str, fee: f64) -> Result<(StatusCode, String), ProviderError> {
        let body = QueryBody {
            provider_address: &self.config.provider_address,
            query: prompt,
            fallback_fee: fee,
        };
        debug!("sending query offering fee {}", fee);

        let response = self
            .client
            .post(self.url(QUERY_PATH))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("query answered with status {}", status);
        Ok((status, text))
    }

    async fn settle(&self, quote: &FeeQuote) -> Result<(), ProviderError> {
        let body = SettleBody {
            provider_address: &quote.provider_address,
            fee: quote.fee,
        };
        info!("settling fee of {} A0GI", quote.fee);

        let response = self
            .client
            .post(self.url(SETTLE_PATH))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                info!("fee settled");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::SettlementFailed {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Second query after settlement. Every failure here is final for this call.
    async fn retry_query(&self, prompt: &str, quote: &FeeQuote) -> Result<String, ProviderError> {
        let (status, body) = self
            .query(prompt, quote.fee)
            .await
            .map_err(|e| ProviderError::RetryFailed(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(ProviderError::RetryFailed(format!(
                "status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::RetryFailed(format!("unparseable body: {}", e)))?;
        response_content(&value)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::RetryFailed(format!("missing content: {}", body)))
    }

    async fn negotiate(&self, prompt: &str) -> Result<String, ProviderError> {
        let (status, body) = self.query(prompt, self.config.fallback_fee).await?;

        match status {
            StatusCode::OK => {
                let value: Value = serde_json::from_str(&body)
                    .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
                response_content(&value)
                    .map(str::to_string)
                    .ok_or(ProviderError::EmptyCompletion)
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                let quote = FeeQuote::parse(&self.config.provider_address, &body)
                    .ok_or_else(|| ProviderError::FeeUnparseable(body.clone()))?;
                info!("provider requires a fee of {} A0GI", quote.fee);

                self.settle(&quote).await?;
                self.retry_query(prompt, &quote).await
            }
            status => {
                warn!("query failed with status {}", status);
                Err(ProviderError::Http {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// Pull non-blank `response.content` out of a query response
fn response_content(body: &Value) -> Option<&str> {
    body.pointer("/response/content")
        .and_then(Value::as_str)
        .filter(|content| !content.trim().is_empty())
}

#[async_trait]
impl Provider for FeeNegotiatingProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::FeeNegotiating
    }

    fn settings(&self) -> &ModelSettings {
        &self.config.settings
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let prompt = messages_to_prompt(&request.messages);
        let text = self.negotiate(&prompt).await?;

        let text = enforce_stop_sequences(&text, &request.stop);
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(text)
    }
}
