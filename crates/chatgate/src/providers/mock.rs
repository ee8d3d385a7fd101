use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::base::Provider;
use super::factory::ProviderKind;
use crate::errors::ProviderError;
use crate::models::request::{ModelSettings, ProviderRequest};
use crate::stream::TokenStream;

/// One scripted attempt: the fragments to stream, optionally followed by an error
pub struct Outcome {
    pub tokens: Vec<String>,
    pub error: Option<ProviderError>,
    /// Keep the stream open forever after the fragments
    pub stall: bool,
}

impl Outcome {
    pub fn text(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            error: None,
            stall: false,
        }
    }

    pub fn stalled(tokens: &[&str]) -> Self {
        Self {
            stall: true,
            ..Self::text(tokens)
        }
    }

    pub fn fail(error: ProviderError) -> Self {
        Self {
            tokens: Vec::new(),
            error: Some(error),
            stall: false,
        }
    }

    pub fn partial(tokens: &[&str], error: ProviderError) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            error: Some(error),
            stall: false,
        }
    }
}

/// A mock provider that replays pre-configured outcomes, one per call
pub struct MockProvider {
    kind: ProviderKind,
    settings: ModelSettings,
    outcomes: Mutex<VecDeque<Outcome>>,
    calls: AtomicU32,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind, outcomes: Vec<Outcome>) -> Self {
        Self {
            kind,
            settings: ModelSettings::new("mock-model"),
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_outcome(&self, request: &ProviderRequest) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Outcome::fail(ProviderError::EmptyCompletion))
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let Outcome { tokens, error, .. } = self.next_outcome(request);
        if let Some(error) = error {
            return Err(error);
        }
        let text = tokens.concat();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(text)
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<TokenStream, ProviderError> {
        let Outcome {
            tokens,
            error,
            stall,
        } = self.next_outcome(request);
        match (tokens.is_empty(), error) {
            (true, Some(error)) => Err(error),
            (_, error) => {
                let mut items: Vec<Result<String, ProviderError>> =
                    tokens.into_iter().map(Ok).collect();
                items.extend(error.map(Err));
                if stall {
                    return Ok(Box::pin(stream::iter(items).chain(stream::pending())));
                }
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }
}
