//! HTTP surface of the dev server: the message store REST routes and the
//! `/ws` upgrade.
//!
//! Every route authenticates with `Authorization: Bearer <user id>`; the
//! socket takes the same token as a `token` query parameter.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use serde::Deserialize;

use tandem_proto::api::{
    CreateConversationRequest, HistoryQuery, HistoryResponse, PostMessageRequest,
    StatusUpdateRequest,
};
use tandem_proto::message::{Conversation, ConversationId, Message, MessageId, UserId};

use crate::state::{DevError, DevState};
use crate::ws;

impl IntoResponse for DevError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Injected => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// The authenticated caller, taken from the bearer token.
pub struct Caller(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = DevError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Self(UserId::new(token)))
            .ok_or(DevError::Unauthorized)
    }
}

/// Builds the router over a shared state.
pub fn router(state: Arc<DevState>) -> axum::Router {
    axum::Router::new()
        .route("/conversations", post(create_conversation))
        .route(
            "/conversations/{id}/messages",
            get(history).post(post_message),
        )
        .route("/conversations/{id}/messages/read", put(mark_read))
        .route("/messages/{id}/status", put(set_status))
        .route("/messages/{id}", delete(delete_message))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Starts the dev server on the given address with an empty state.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(DevState::new())).await
}

/// Starts the dev server over a pre-seeded [`DevState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<DevState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "dev server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn create_conversation(
    State(state): State<Arc<DevState>>,
    Caller(caller): Caller,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), DevError> {
    let [a, b] = body.participant_ids;
    if caller != a && caller != b {
        return Err(DevError::Forbidden("caller must be a participant"));
    }
    let conversation = state.create_conversation(a, b).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn history(
    State(state): State<Arc<DevState>>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Query(page): Query<PageParams>,
) -> Result<Json<HistoryResponse>, DevError> {
    let defaults = HistoryQuery::default();
    let messages = state
        .history(
            &id,
            &caller,
            page.limit.unwrap_or(defaults.limit),
            page.offset.unwrap_or(defaults.offset),
        )
        .await?;
    Ok(Json(HistoryResponse { messages }))
}

async fn post_message(
    State(state): State<Arc<DevState>>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<Message>), DevError> {
    let message = state
        .post_message(&id, &caller, body.content, body.message_type)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    State(state): State<Arc<DevState>>,
    Caller(caller): Caller,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, DevError> {
    state.mark_conversation_read(&id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_status(
    State(state): State<Arc<DevState>>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<StatusCode, DevError> {
    state.set_status(&id, body.status, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_message(
    State(state): State<Arc<DevState>>,
    Caller(caller): Caller,
    Path(id): Path<MessageId>,
) -> Result<StatusCode, DevError> {
    state.delete_message(&id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Upgrades `/ws?token=<user id>` to a socket for that user.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DevState>>,
    Query(query): Query<WsQuery>,
) -> Result<Response, DevError> {
    let user = query
        .token
        .filter(|t| !t.trim().is_empty())
        .map(UserId::new)
        .ok_or(DevError::Unauthorized)?;
    Ok(ws.on_upgrade(move |socket| ws::handle_socket(socket, state, user)))
}
