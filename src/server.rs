use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domains::records::{now_ms, ChatRecord, MessageRecord, Role, Visibility, VoteType};
use crate::entitlements::{entitlements_for, UserType};
use crate::error::{ParleyError, Result};
use crate::interfaces::models::{ChatMessage, LanguageModel, TokenUsage};
use crate::services::models::{self, ModelSelector, CHAT_MODEL};
use crate::services::queries::{ChatPageRequest, NewChat, QueryService};
use crate::session::{Session, SessionRegistry};

const ENTITLEMENT_WINDOW_HOURS: u64 = 24;
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<QueryService>,
    pub models: Arc<ModelSelector>,
    pub sessions: Arc<SessionRegistry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    timestamp: i64,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    id: String,
    message: IncomingMessage,
    selected_chat_model: Option<String>,
    selected_visibility_type: Option<Visibility>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    id: Option<String>,
    parts: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    chat_id: String,
    message: MessageRecord,
    usage: TokenUsage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    limit: Option<usize>,
    starting_after: Option<String>,
    ending_before: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatWithMessages {
    chat: ChatRecord,
    messages: Vec<MessageRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityRequest {
    visibility: Visibility,
}

#[derive(Deserialize)]
struct TitleRequest {
    title: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteQuery {
    chat_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    chat_id: String,
    message_id: String,
    #[serde(rename = "type")]
    vote_type: VoteType,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LimitsResponse {
    user_type: UserType,
    max_messages_per_day: usize,
    used: usize,
    remaining: usize,
    available_chat_model_ids: Vec<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/guest", post(auth_guest))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/history", get(history))
        .route("/chat/:id", get(chat_by_id).delete(delete_chat))
        .route("/chat/:id/visibility", patch(update_visibility))
        .route("/chat/:id/title", patch(update_title))
        .route("/chat/:id/streams", get(stream_ids))
        .route("/vote", get(votes).patch(vote))
        .route("/message/:id/trailing", delete(delete_trailing))
        .route("/limits", get(limits))
        .with_state(state)
}

fn error_response(err: ParleyError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        code: err.kind().to_string(),
        message: err.to_string(),
    };
    (status, Json(body)).into_response()
}

async fn authorize(headers: &HeaderMap, sessions: &SessionRegistry) -> Result<Session> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("");
    if bearer.is_empty() {
        return Err(ParleyError::Unauthorized("Missing bearer token".to_string()));
    }
    sessions
        .resolve(bearer)
        .await
        .ok_or_else(|| ParleyError::Unauthorized("Invalid or expired session".to_string()))
}

/// Loads the chat and enforces ownership. Public chats pass the read-only
/// check for any session.
async fn chat_for_access(
    queries: &QueryService,
    chat_id: &str,
    session: &Session,
    read_only: bool,
) -> Result<ChatRecord> {
    let chat = queries
        .chat_by_id(chat_id)
        .await?
        .ok_or_else(|| ParleyError::NotFound(format!("Chat with id {chat_id} not found")))?;
    if chat.user_id == session.user_id {
        return Ok(chat);
    }
    if read_only && chat.visibility == Visibility::Public {
        return Ok(chat);
    }
    Err(ParleyError::Forbidden(
        "This chat belongs to another user".to_string(),
    ))
}

fn parts_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: now_ms(),
    })
}

async fn auth_guest(State(state): State<AppState>) -> Response {
    let result = async {
        let user = state.queries.create_guest_user().await?;
        let session = state.sessions.issue(&user.id, UserType::Guest).await;
        Ok::<_, ParleyError>(session)
    }
    .await;
    match result {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Output of the shared pre-flight shared by the blocking and streaming
/// chat handlers: the chat shell exists, quota and model checks passed,
/// and the user turn is persisted.
struct PreparedTurn {
    chat: ChatRecord,
    history: Vec<ChatMessage>,
    model: Arc<dyn LanguageModel>,
}

async fn prepare_turn(
    state: &AppState,
    session: &Session,
    payload: ChatRequest,
) -> Result<PreparedTurn> {
    if payload.message.parts.is_empty() {
        return Err(ParleyError::Api(
            "Message must contain at least one part".to_string(),
        ));
    }

    let entitlements = entitlements_for(session.user_type);
    let used = state
        .queries
        .user_message_count_since(&session.user_id, ENTITLEMENT_WINDOW_HOURS)
        .await?;
    if used >= entitlements.max_messages_per_day {
        return Err(ParleyError::RateLimited(
            "You have exceeded your maximum number of messages for the day".to_string(),
        ));
    }

    let slot = payload.selected_chat_model.as_deref().unwrap_or(CHAT_MODEL);
    if !entitlements.available_chat_model_ids.contains(&slot) {
        return Err(ParleyError::Forbidden(format!(
            "Model {slot} is not available for this account"
        )));
    }
    let model = state.models.language_model(slot)?;

    let user_text = parts_text(&payload.message.parts);
    let chat = match state.queries.chat_by_id(&payload.id).await? {
        Some(existing) => {
            if existing.user_id != session.user_id {
                return Err(ParleyError::Forbidden(
                    "This chat belongs to another user".to_string(),
                ));
            }
            existing
        }
        None => {
            let title = match models::generate_title(&state.models, &user_text).await {
                Ok(title) if !title.is_empty() => title,
                _ => user_text.chars().take(80).collect(),
            };
            state
                .queries
                .save_chat(NewChat {
                    id: payload.id.clone(),
                    user_id: session.user_id.clone(),
                    title,
                    visibility: payload
                        .selected_visibility_type
                        .unwrap_or(Visibility::Private),
                })
                .await?
        }
    };

    let user_message = MessageRecord {
        id: payload
            .message
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        chat_id: chat.id.clone(),
        role: Role::User,
        parts: payload.message.parts,
        attachments: Vec::new(),
        created_at: now_ms(),
    };
    state.queries.save_messages(vec![user_message]).await?;

    // The stream id is registered when generation starts, not when it
    // finishes, so an abandoned turn still leaves a findable stream.
    state
        .queries
        .create_stream(&Uuid::new_v4().to_string(), &chat.id)
        .await?;

    let history = state
        .queries
        .messages_by_chat(&chat.id)
        .await?
        .iter()
        .map(|m| ChatMessage::new(m.role.as_str(), parts_text(&m.parts)))
        .collect();

    Ok(PreparedTurn {
        chat,
        history,
        model,
    })
}

async fn finish_turn(
    queries: &QueryService,
    chat_id: &str,
    text: &str,
    usage: TokenUsage,
) -> Result<MessageRecord> {
    let assistant_message = MessageRecord {
        id: Uuid::new_v4().to_string(),
        chat_id: chat_id.to_string(),
        role: Role::Assistant,
        parts: vec![json!({"type": "text", "text": text})],
        attachments: Vec::new(),
        created_at: now_ms(),
    };
    let mut saved = queries.save_messages(vec![assistant_message]).await?;

    queries
        .update_chat_last_context(chat_id, serde_json::to_value(usage).unwrap_or(Value::Null))
        .await?;

    Ok(saved.remove(0))
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        let turn = prepare_turn(&state, &session, payload).await?;
        let completion = turn.model.complete(&turn.history).await?;
        let message =
            finish_turn(&state.queries, &turn.chat.id, &completion.text, completion.usage).await?;
        Ok::<_, ParleyError>(ChatResponse {
            chat_id: turn.chat.id,
            message,
            usage: completion.usage,
        })
    }
    .await;
    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let session = match authorize(&headers, &state.sessions).await {
        Ok(session) => session,
        Err(err) => return error_response(err),
    };
    let turn = match prepare_turn(&state, &session, payload).await {
        Ok(turn) => turn,
        Err(err) => return error_response(err),
    };

    let queries = Arc::clone(&state.queries);
    let chat_id = turn.chat.id.clone();
    let body = Body::from_stream(async_stream::stream! {
        let mut collected = String::new();
        let mut stream = turn.model.complete_stream(turn.history);
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    if let Some(delta) = &event.delta {
                        collected.push_str(delta);
                    }
                    let finished = event.event_type == "finish";
                    if finished {
                        let usage = event.usage.unwrap_or_default();
                        if let Err(err) =
                            finish_turn(&queries, &chat_id, &collected, usage).await
                        {
                            tracing::warn!(error = %err, "failed to persist streamed turn");
                        }
                    }
                    let line = format!(
                        "data: {}\n\n",
                        serde_json::to_string(&event).unwrap_or_default()
                    );
                    yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(line));
                    if finished {
                        break;
                    }
                }
                Err(err) => {
                    let body = json!({"eventType": "error", "code": err.kind(), "message": err.to_string()});
                    yield Ok(Bytes::from(format!("data: {body}\n\n")));
                    break;
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        state
            .queries
            .chats_by_user(
                &session.user_id,
                ChatPageRequest {
                    limit: query.limit.unwrap_or(10),
                    starting_after: query.starting_after,
                    ending_before: query.ending_before,
                },
            )
            .await
    }
    .await;
    match result {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn chat_by_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        let chat = chat_for_access(&state.queries, &id, &session, true).await?;
        let messages = state.queries.messages_by_chat(&id).await?;
        Ok::<_, ParleyError>(ChatWithMessages { chat, messages })
    }
    .await;
    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        chat_for_access(&state.queries, &id, &session, false).await?;
        state.queries.delete_chat(&id).await
    }
    .await;
    match result {
        Ok(chat) => (StatusCode::OK, Json(chat)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_visibility(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<VisibilityRequest>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        chat_for_access(&state.queries, &id, &session, false).await?;
        state
            .queries
            .update_chat_visibility(&id, payload.visibility)
            .await
    }
    .await;
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_title(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<TitleRequest>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        chat_for_access(&state.queries, &id, &session, false).await?;
        state.queries.update_chat_title(&id, &payload.title).await
    }
    .await;
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn stream_ids(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        chat_for_access(&state.queries, &id, &session, true).await?;
        state.queries.stream_ids_by_chat(&id).await
    }
    .await;
    match result {
        Ok(ids) => (StatusCode::OK, Json(json!({"streamIds": ids}))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn votes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VoteQuery>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        // A chat that never existed has no votes; that is an empty list,
        // not an error.
        match state.queries.chat_by_id(&query.chat_id).await? {
            Some(_) => {
                chat_for_access(&state.queries, &query.chat_id, &session, true).await?;
                state.queries.votes_by_chat(&query.chat_id).await
            }
            None => Ok(Vec::new()),
        }
    }
    .await;
    match result {
        Ok(votes) => (StatusCode::OK, Json(votes)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VoteRequest>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        chat_for_access(&state.queries, &payload.chat_id, &session, false).await?;
        state
            .queries
            .vote_message(&payload.chat_id, &payload.message_id, payload.vote_type)
            .await
    }
    .await;
    match result {
        Ok(vote) => (StatusCode::OK, Json(vote)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_trailing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        let message = state
            .queries
            .message_by_id(&id)
            .await?
            .ok_or_else(|| ParleyError::NotFound(format!("Message with id {id} not found")))?;
        chat_for_access(&state.queries, &message.chat_id, &session, false).await?;
        let deleted = state.queries.delete_trailing_messages(&id).await?;
        Ok::<_, ParleyError>(json!({"deleted": deleted}))
    }
    .await;
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn limits(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = async {
        let session = authorize(&headers, &state.sessions).await?;
        limits_for_session(&state, &session).await
    }
    .await;
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn limits_for_session(state: &AppState, session: &Session) -> Result<Value> {
    let entitlements = entitlements_for(session.user_type);
    let used = state
        .queries
        .user_message_count_since(&session.user_id, ENTITLEMENT_WINDOW_HOURS)
        .await?;
    let response = LimitsResponse {
        user_type: session.user_type,
        max_messages_per_day: entitlements.max_messages_per_day,
        used,
        remaining: entitlements.max_messages_per_day.saturating_sub(used),
        available_chat_model_ids: entitlements
            .available_chat_model_ids
            .iter()
            .map(|id| id.to_string())
            .collect(),
    };
    serde_json::to_value(response).map_err(|e| ParleyError::Serialization(e.to_string()))
}

pub async fn run_with_shutdown<F>(host: &str, port: u16, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweeper = state.sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Runtime(e.to_string()))?;
    tracing::info!(%addr, "listening");

    let shutdown = async move {
        shutdown.await;
        sweeper.abort();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ParleyError::Runtime(e.to_string()))?;

    Ok(())
}
