use std::sync::Arc;

use chatgate::{
    actions::TokenCreator, completion::CompletionService, conversation::ConversationStore,
    providers::factory,
};
use tracing::info;

use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CompletionService>,
}

impl AppState {
    pub fn new(service: CompletionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Build every configured provider and the token service from settings
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let mut service = CompletionService::new(
            Arc::new(ConversationStore::new()),
            settings.retry_policy(),
        );

        for config in settings.provider_configs()? {
            let provider = factory::get_provider(config)?;
            info!("provider {} enabled", provider.kind());
            service = service.with_provider(provider);
        }

        if let Some(config) = settings.token_creation_config()? {
            info!("token creation enabled");
            service = service.with_token_creator(Arc::new(TokenCreator::new(config)?));
        }

        Ok(Self::new(service))
    }
}
