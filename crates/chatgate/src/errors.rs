use thiserror::Error;

use crate::conversation::ConversationError;
use crate::providers::factory::ProviderKind;
use crate::retry::RetryError;

/// Failure of a single provider attempt
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider returned an empty completion")]
    EmptyCompletion,

    #[error("provider request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("no fee quote found in provider response: {0}")]
    FeeUnparseable(String),

    #[error("fee settlement failed with status {status}: {body}")]
    SettlementFailed { status: u16, body: String },

    #[error("query after fee settlement failed: {0}")]
    RetryFailed(String),

    #[error("malformed stream fragment: {0}")]
    MalformedStreamFragment(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed reading provider stream: {0}")]
    Transport(String),

    #[error("stream interrupted after partial output: {0}")]
    StreamInterrupted(String),

    #[error("caller went away before the completion finished")]
    Cancelled,
}

impl ProviderError {
    /// Whether repeating the whole call may succeed.
    ///
    /// A refused settlement is a final decision by the provider, and a stream that already
    /// delivered tokens cannot be replayed without duplicating output. A 500 without a fee quote
    /// is treated like any other server error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::SettlementFailed { .. }
                | ProviderError::StreamInterrupted(_)
                | ProviderError::Cancelled
        )
    }
}

/// Failure of a whole chat turn, as seen by the HTTP layer
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("provider {0} is not configured")]
    ProviderUnavailable(ProviderKind),

    #[error(transparent)]
    Exhausted(#[from] RetryError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),
}
