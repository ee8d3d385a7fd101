//! Orchestration of a single chat turn
//!
//! A turn resolves the provider, locks the conversation, sends history plus the new query
//! through the retry policy, resolves any embedded command, and finally stores the user and
//! assistant messages together. A failed turn leaves the history untouched.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::actions::{replace_command, CommandFilter, CompletionAction, TokenCreator};
use crate::conversation::ConversationStore;
use crate::errors::{CompletionError, ProviderError};
use crate::models::message::Message;
use crate::models::request::ProviderRequest;
use crate::prompts::{system_prompt, Character};
use crate::providers::base::Provider;
use crate::providers::factory::ProviderKind;
use crate::retry::RetryPolicy;

const STREAM_BUFFER: usize = 100;

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// One inbound user query
#[derive(Debug, Clone)]
pub struct ChatQuery {
    pub query: String,
    pub provider: ProviderKind,
    pub conversation_id: String,
    pub character: Character,
}

pub struct CompletionService {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    store: Arc<ConversationStore>,
    retry: RetryPolicy,
    token_creator: Option<Arc<TokenCreator>>,
}

impl CompletionService {
    pub fn new(store: Arc<ConversationStore>, retry: RetryPolicy) -> Self {
        Self {
            providers: HashMap::new(),
            store,
            retry,
            token_creator: None,
        }
    }

    /// Register a provider under its own kind, replacing any previous one
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn with_token_creator(mut self, token_creator: Arc<TokenCreator>) -> Self {
        self.token_creator = Some(token_creator);
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, CompletionError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or(CompletionError::ProviderUnavailable(kind))
    }

    /// Text to store and show in place of an embedded command, if the completion carries one
    async fn resolve_action(&self, text: &str) -> Option<String> {
        match CompletionAction::parse(text) {
            CompletionAction::PlainText(_) => None,
            CompletionAction::CreateCoin(request) => match &self.token_creator {
                Some(creator) => Some(creator.acknowledge(&request).await),
                None => {
                    warn!("token creation requested but no token service is configured");
                    Some(format!(
                        "Token creation for {} ({}) is not available right now.",
                        request.name, request.symbol
                    ))
                }
            },
        }
    }

    /// Run a turn and return the final assistant text
    pub async fn complete(&self, query: ChatQuery) -> Result<String, CompletionError> {
        if query.query.trim().is_empty() {
            return Err(CompletionError::EmptyQuery);
        }
        let provider = self.provider(query.provider)?;
        let conversation = self
            .store
            .get_or_create(&query.conversation_id, || system_prompt(query.character))
            .await;
        let mut conversation = conversation.lock().await;

        let user = Message::user(query.query.as_str());
        let request = ProviderRequest::new(
            provider.settings(),
            conversation.with_pending(&user),
            false,
        );

        let provider = provider.as_ref();
        let request = &request;
        let raw = self
            .retry
            .run(move |_| provider.complete(request))
            .await?;

        let reply = match self.resolve_action(&raw).await {
            Some(ack) => replace_command(&raw, &ack),
            None => raw,
        };
        conversation.append_turn(user, Message::assistant(reply.as_str()))?;
        info!(
            "conversation {} now holds {} messages",
            conversation.id(),
            conversation.len()
        );
        Ok(reply)
    }

    /// Run a turn, forwarding text to the returned stream as soon as it is decoded.
    ///
    /// The turn runs on its own task. Dropping the stream aborts the in-flight provider call.
    pub fn stream(self: &Arc<Self>, query: ChatQuery) -> ReplyStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let conversation_id = query.conversation_id.clone();
            tokio::select! {
                result = service.stream_turn(query, &tx) => {
                    if let Err(e) = result {
                        let _ = tx.send(Err(e)).await;
                    }
                }
                _ = tx.closed() => {
                    info!("caller left conversation {}, aborting completion", conversation_id);
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn stream_turn(
        &self,
        query: ChatQuery,
        tx: &mpsc::Sender<Result<String, CompletionError>>,
    ) -> Result<(), CompletionError> {
        if query.query.trim().is_empty() {
            return Err(CompletionError::EmptyQuery);
        }
        let provider = self.provider(query.provider)?;
        let conversation = self
            .store
            .get_or_create(&query.conversation_id, || system_prompt(query.character))
            .await;
        let mut conversation = conversation.lock().await;

        let user = Message::user(query.query.as_str());
        let request = ProviderRequest::new(
            provider.settings(),
            conversation.with_pending(&user),
            true,
        );

        let provider = provider.as_ref();
        let request = &request;
        let (raw, held) = self
            .retry
            .run(move |_| forward_attempt(provider, request, tx))
            .await?;

        let (reply, tail) = match self.resolve_action(&raw).await {
            Some(ack) => (replace_command(&raw, &ack), replace_command(&held, &ack)),
            None => (raw, held),
        };
        // The turn is stored before the tail is sent
        conversation.append_turn(user, Message::assistant(reply.as_str()))?;
        info!(
            "conversation {} now holds {} messages",
            conversation.id(),
            conversation.len()
        );

        if !tail.is_empty() && tx.send(Ok(tail)).await.is_err() {
            info!("caller left before the last part of the reply was sent");
        }
        Ok(())
    }
}

/// Stream one attempt to the caller.
///
/// Returns the full raw text and the part held back by the command filter. Leading whitespace
/// is held until real text arrives, so a blank attempt forwards nothing. Failing before anything
/// reached the caller keeps the error retryable; failing after that cannot be retried without
/// repeating output.
async fn forward_attempt(
    provider: &dyn Provider,
    request: &ProviderRequest,
    tx: &mpsc::Sender<Result<String, CompletionError>>,
) -> Result<(String, String), ProviderError> {
    let mut tokens = provider.stream(request).await?;
    let mut raw = String::new();
    let mut filter = CommandFilter::default();
    let mut sent = false;

    while let Some(token) = tokens.next().await {
        match token {
            Ok(token) => {
                let started = !raw.trim().is_empty();
                raw.push_str(&token);
                if raw.trim().is_empty() {
                    continue;
                }
                let fresh = if started { token.as_str() } else { raw.as_str() };
                if let Some(out) = filter.push(fresh) {
                    if tx.send(Ok(out)).await.is_err() {
                        return Err(ProviderError::Cancelled);
                    }
                    sent = true;
                }
            }
            Err(e) if !sent => return Err(e),
            Err(e) => return Err(ProviderError::StreamInterrupted(e.to_string())),
        }
    }

    if raw.trim().is_empty() {
        return Err(ProviderError::EmptyCompletion);
    }
    Ok((raw, filter.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use std::time::Duration;
    use crate::providers::mock::{MockProvider, Outcome};

    fn service(provider: Arc<MockProvider>) -> Arc<CompletionService> {
        Arc::new(
            CompletionService::new(
                Arc::new(ConversationStore::new()),
                RetryPolicy::new(3).without_backoff(),
            )
            .with_provider(provider),
        )
    }

    fn query(text: &str, id: &str) -> ChatQuery {
        ChatQuery {
            query: text.to_string(),
            provider: ProviderKind::Standard,
            conversation_id: id.to_string(),
            character: Character::default(),
        }
    }

    async fn drain(stream: ReplyStream) -> Result<String, CompletionError> {
        let items: Vec<_> = stream.collect().await;
        let mut text = String::new();
        for item in items {
            text.push_str(&item?);
        }
        Ok(text)
    }

    #[tokio::test]
    async fn test_complete_builds_history() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![Outcome::text(&["Hi there"]), Outcome::text(&["I am fine"])],
        ));
        let service = service(Arc::clone(&provider));

        assert_eq!(service.complete(query("Hello", "c1")).await.unwrap(), "Hi there");
        let first = service.store().history("c1").await.unwrap();
        assert_eq!(first.len(), 3);

        service.complete(query("How are you?", "c1")).await.unwrap();
        let second = service.store().history("c1").await.unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(&second[..3], &first[..]);
        assert_eq!(second[3], Message::user("How are you?"));
        assert_eq!(second[4], Message::assistant("I am fine"));

        // The second request carried the whole prior history plus the new query
        let requests = provider.requests();
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[0].role(), Role::System);
    }

    #[tokio::test]
    async fn test_empty_completions_are_retried_not_stored() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![
                Outcome::text(&["  "]),
                Outcome::fail(ProviderError::Http {
                    status: 500,
                    body: "oops".into(),
                }),
                Outcome::text(&["third time"]),
            ],
        ));
        let service = service(Arc::clone(&provider));

        assert_eq!(service.complete(query("q", "c")).await.unwrap(), "third time");
        assert_eq!(provider.calls(), 3);
        assert_eq!(service.store().history("c").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_turn_leaves_history_untouched() {
        let provider = Arc::new(MockProvider::new(ProviderKind::Standard, vec![]));
        let service = service(Arc::clone(&provider));

        let err = service.complete(query("q", "c")).await.unwrap_err();
        match err {
            CompletionError::Exhausted(retry) => {
                assert_eq!(retry.attempts, 3);
                assert!(matches!(retry.last_error, ProviderError::EmptyCompletion));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(provider.calls(), 3);
        assert_eq!(
            service.store().history("c").await.unwrap(),
            vec![Message::system(system_prompt(Character::default()))]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let provider = Arc::new(MockProvider::new(ProviderKind::Standard, vec![]));
        let service = service(provider);
        let mut q = query("q", "c");
        q.provider = ProviderKind::FeeNegotiating;
        assert!(matches!(
            service.complete(q).await,
            Err(CompletionError::ProviderUnavailable(ProviderKind::FeeNegotiating))
        ));
    }

    #[tokio::test]
    async fn test_stream_forwards_tokens_and_stores_reply() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![Outcome::text(&["Hel", "lo", " world"])],
        ));
        let service = service(provider);

        let text = drain(service.stream(query("Hi", "s"))).await.unwrap();
        assert_eq!(text, "Hello world");
        let history = service.store().history("s").await.unwrap();
        assert_eq!(history[2], Message::assistant("Hello world"));
    }

    #[tokio::test]
    async fn test_stream_retries_failures_before_first_token() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![
                Outcome::fail(ProviderError::Transport("reset".into())),
                Outcome::text(&[]),
                Outcome::text(&["ok"]),
            ],
        ));
        let service = service(Arc::clone(&provider));

        assert_eq!(drain(service.stream(query("Hi", "s"))).await.unwrap(), "ok");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_blank_stream_attempt_forwards_nothing() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![Outcome::text(&["\n  ", " "]), Outcome::text(&["\n", "ok"])],
        ));
        let service = service(Arc::clone(&provider));

        let text = drain(service.stream(query("Hi", "s"))).await.unwrap();
        assert_eq!(text, "\nok");
        assert_eq!(provider.calls(), 2);
        let history = service.store().history("s").await.unwrap();
        assert_eq!(history[2].content(), text);
    }

    #[tokio::test]
    async fn test_dropped_stream_aborts_turn_and_releases_conversation() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![Outcome::stalled(&["partial"]), Outcome::text(&["second"])],
        ));
        let service = service(Arc::clone(&provider));

        let mut replies = service.stream(query("Hi", "s"));
        assert_eq!(replies.next().await.unwrap().unwrap(), "partial");
        drop(replies);

        let reply = tokio::time::timeout(
            Duration::from_secs(5),
            service.complete(query("again", "s")),
        )
        .await
        .expect("conversation still locked by the aborted turn")
        .unwrap();
        assert_eq!(reply, "second");
        assert_eq!(provider.calls(), 2);

        let history = service.store().history("s").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1], Message::user("again"));
    }

    #[tokio::test]
    async fn test_forward_attempt_to_closed_caller_is_cancelled() {
        let provider = MockProvider::new(ProviderKind::Standard, vec![Outcome::text(&["hi"])]);
        let request = ProviderRequest::new(provider.settings(), vec![Message::user("q")], true);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let err = forward_attempt(&provider, &request, &tx).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_turn_is_stored_even_if_tail_cannot_be_sent() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![Outcome::text(&["~newcoincreaterequest#Doge2#DG2#1000~"])],
        ));
        let service = service(provider);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        service
            .stream_turn(query("make a coin", "s"), &tx)
            .await
            .unwrap();
        let history = service.store().history("s").await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(!history[2].content().contains('~'));
    }

    #[tokio::test]
    async fn test_stream_interrupted_after_output_is_not_retried() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![
                Outcome::partial(&["half"], ProviderError::Transport("reset".into())),
                Outcome::text(&["never used"]),
            ],
        ));
        let service = service(Arc::clone(&provider));

        let items: Vec<_> = service.stream(query("Hi", "s")).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "half");
        assert!(items[1].is_err());
        assert_eq!(provider.calls(), 1);
        assert_eq!(service.store().history("s").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_replaces_command_without_token_service() {
        let provider = Arc::new(MockProvider::new(
            ProviderKind::Standard,
            vec![Outcome::text(&["Sure ~newcoin", "createrequest#Doge2#DG2#1000~"])],
        ));
        let service = service(provider);

        let text = drain(service.stream(query("make a coin", "s"))).await.unwrap();
        assert!(text.starts_with("Sure "));
        assert!(!text.contains('~'));

        let history = service.store().history("s").await.unwrap();
        assert_eq!(history[2].content(), text);
    }

    #[tokio::test]
    async fn test_same_conversation_turns_are_serialized() {
        let outcomes = (0..8)
            .map(|i| Outcome::text(&[format!("reply {}", i).as_str()]))
            .collect();
        let provider = Arc::new(MockProvider::new(ProviderKind::Standard, outcomes));
        let service = service(provider);

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.complete(query(&format!("q{}", i), "shared")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = service.store().history("shared").await.unwrap();
        assert_eq!(history.len(), 17);
        for pair in history[1..].chunks(2) {
            assert_eq!(pair[0].role(), Role::User);
            assert_eq!(pair[1].role(), Role::Assistant);
        }
    }
}
