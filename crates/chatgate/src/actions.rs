//! Commands the model can embed in its completion, and the side actions they trigger
//!
//! The only command is token creation, written by the model as
//! `~newcoincreaterequest#<name>#<symbol>#<initial supply>~`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

/// Character that opens an embedded command
pub const COMMAND_OPEN: char = '~';
pub const CREATE_TOKEN_PATH: &str = "/api/action/createToken";

lazy_static! {
    static ref CREATE_COIN: Regex =
        Regex::new(r"~newcoincreaterequest#([^#~\n]+)#([^#~\n]+)#(\d+)~").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinRequest {
    pub name: String,
    pub symbol: String,
    pub initial_supply: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionAction {
    PlainText(String),
    CreateCoin(CoinRequest),
}

impl CompletionAction {
    /// Find the first well-formed command in a completion; anything else is plain text
    pub fn parse(text: &str) -> Self {
        CREATE_COIN
            .captures(text)
            .and_then(|captures| {
                let name = captures.get(1)?.as_str().trim();
                let symbol = captures.get(2)?.as_str().trim();
                let initial_supply = captures.get(3)?.as_str().parse().ok()?;
                if name.is_empty() || symbol.is_empty() {
                    return None;
                }
                Some(CompletionAction::CreateCoin(CoinRequest {
                    name: name.to_string(),
                    symbol: symbol.to_string(),
                    initial_supply,
                }))
            })
            .unwrap_or_else(|| CompletionAction::PlainText(text.to_string()))
    }
}

/// Replace the first command in `text` with `replacement`
pub fn replace_command(text: &str, replacement: &str) -> String {
    CREATE_COIN.replace(text, regex::NoExpand(replacement)).into_owned()
}

/// Holds streamed text back from the first command opener onward.
///
/// Text before the opener is forwarded immediately. What was held is released by
/// [`CommandFilter::finish`] once the completion is known, so a raw command never reaches
/// the caller.
#[derive(Debug, Default)]
pub struct CommandFilter {
    held: Option<String>,
}

impl CommandFilter {
    pub fn push(&mut self, token: &str) -> Option<String> {
        if let Some(held) = self.held.as_mut() {
            held.push_str(token);
            return None;
        }
        match token.find(COMMAND_OPEN) {
            Some(index) => {
                self.held = Some(token[index..].to_string());
                let before = &token[..index];
                (!before.is_empty()).then(|| before.to_string())
            }
            None => Some(token.to_string()),
        }
    }

    pub fn finish(self) -> String {
        self.held.unwrap_or_default()
    }
}

/// Fixed fields of every token-creation call
#[derive(Debug, Clone)]
pub struct TokenCreationConfig {
    pub host: String,
    pub user_address: String,
    pub max_supply: String,
    pub initial_price: String,
    pub creator_lockup_period: String,
    pub lock_liquidity: bool,
    pub liquidity_lock_period: String,
    pub creation_fee: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenBody<'a> {
    user_address: &'a str,
    name: &'a str,
    symbol: &'a str,
    initial_supply: String,
    max_supply: &'a str,
    initial_price: &'a str,
    creator_lockup_period: &'a str,
    lock_liquidity: bool,
    liquidity_lock_period: &'a str,
    #[serde(rename = "CREATION_FEE")]
    creation_fee: &'a str,
}

pub struct TokenCreator {
    client: Client,
    config: TokenCreationConfig,
}

impl TokenCreator {
    pub fn new(config: TokenCreationConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub async fn create(&self, request: &CoinRequest) -> Result<Value> {
        let url = format!(
            "{}{}",
            self.config.host.trim_end_matches('/'),
            CREATE_TOKEN_PATH
        );
        let body = CreateTokenBody {
            user_address: &self.config.user_address,
            name: &request.name,
            symbol: &request.symbol,
            initial_supply: request.initial_supply.to_string(),
            max_supply: &self.config.max_supply,
            initial_price: &self.config.initial_price,
            creator_lockup_period: &self.config.creator_lockup_period,
            lock_liquidity: self.config.lock_liquidity,
            liquidity_lock_period: &self.config.liquidity_lock_period,
            creation_fee: &self.config.creation_fee,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("token creation failed with status {}: {}", status, text));
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    /// Create the token and describe the outcome for the user
    pub async fn acknowledge(&self, request: &CoinRequest) -> String {
        info!(
            "creating token {} ({}) with initial supply {}",
            request.name, request.symbol, request.initial_supply
        );
        match self.create(request).await {
            Ok(_) => format!(
                "Your token {} ({}) is being created with an initial supply of {}.",
                request.name, request.symbol, request.initial_supply
            ),
            Err(e) => {
                error!("token creation for {} failed: {}", request.symbol, e);
                format!(
                    "Sorry, creating your token {} ({}) failed. Please try again later.",
                    request.name, request.symbol
                )
            }
        }
    }
}
