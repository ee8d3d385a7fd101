use async_trait::async_trait;
use futures::stream;

use super::factory::ProviderKind;
use crate::errors::ProviderError;
use crate::models::request::{ModelSettings, ProviderRequest};
use crate::stream::TokenStream;

/// Base trait for the LLM backends the gateway forwards to
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Sampling parameters used to build requests for this provider
    fn settings(&self) -> &ModelSettings;

    /// Produce the full completion for the request in one round trip
    async fn complete(&self, request: &ProviderRequest) -> Result<String, ProviderError>;

    /// Produce the completion as a stream of text fragments.
    ///
    /// Providers without native streaming deliver the whole completion as one fragment.
    async fn stream(&self, request: &ProviderRequest) -> Result<TokenStream, ProviderError> {
        let text = self.complete(request).await?;
        Ok(Box::pin(stream::once(async move { Ok(text) })))
    }
}
