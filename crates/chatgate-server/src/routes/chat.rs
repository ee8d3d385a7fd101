use crate::{error::ApiError, state::AppState};
use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use chatgate::{
    completion::{ChatQuery, ReplyStream},
    errors::CompletionError,
    prompts::Character,
    providers::factory::ProviderKind,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use uuid::Uuid;

pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    query: Option<String>,
    llm: Option<String>,
    conversation_id: Option<String>,
    character: Option<String>,
    stream: Option<String>,
}

impl ChatParams {
    fn wants_stream(&self) -> bool {
        let flag = self.stream.as_deref().map(|s| s.trim().to_ascii_lowercase());
        !matches!(flag.as_deref(), Some("false" | "0" | "no"))
    }
}

// Raw reply text streamed as it is produced, without SSE framing
pub struct SseResponse {
    replies: ReplyStream,
    conversation_id: String,
}

impl SseResponse {
    fn new(replies: ReplyStream, conversation_id: String) -> Self {
        Self {
            replies,
            conversation_id,
        }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, CompletionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.replies.as_mut().poll_next(cx).map(|item| {
            item.map(|reply| {
                reply
                    .map(Bytes::from)
                    .inspect_err(|e| tracing::error!("reply stream ended early: {}", e))
            })
        })
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let conversation_id = self.conversation_id.clone();
        (
            [
                (header::CONTENT_TYPE, "text/event-stream".to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
                (header::CONNECTION, "keep-alive".to_string()),
                (header::HeaderName::from_static(CONVERSATION_ID_HEADER), conversation_id),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

async fn handler(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Result<Response, ApiError> {
    let wants_stream = params.wants_stream();
    let query = params.query.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(CompletionError::EmptyQuery.into());
    }

    let conversation_id = params
        .conversation_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let chat_query = ChatQuery {
        query,
        provider: ProviderKind::from_tag(params.llm.as_deref()),
        conversation_id: conversation_id.clone(),
        character: Character::from_name(params.character.as_deref()),
    };
    tracing::info!(
        "chat turn on conversation {} with provider {}",
        conversation_id,
        chat_query.provider
    );

    if !wants_stream {
        let reply = state.service.complete(chat_query).await?;
        return Ok((
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (header::HeaderName::from_static(CONVERSATION_ID_HEADER), conversation_id),
            ],
            reply,
        )
            .into_response());
    }

    // Commit to a 200 only once the turn has produced something
    let mut replies = state.service.stream(chat_query);
    let first = match replies.next().await {
        Some(Ok(text)) => Some(Ok(text)),
        Some(Err(e)) => return Err(e.into()),
        None => None,
    };
    let replies: ReplyStream = Box::pin(stream::iter(first).chain(replies));
    Ok(SseResponse::new(replies, conversation_id).into_response())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", get(handler))
        .with_state(state)
}
