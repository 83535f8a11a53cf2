use crate::{app::App, feedback::ConversationSession};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use std::time::Instant;
use tokio::signal;

/// Bound on concurrently tracked sessions; past it the least recently
/// used session is evicted so an unattended daemon cannot grow without
/// limit.
const MAX_SESSIONS: usize = 1024;

struct SessionEntry {
    last_used: Instant,
    session: Arc<Mutex<ConversationSession>>,
}

struct SharedState {
    app: App,
    /// Sessions are owned by their conversation: the map hands out one
    /// Arc per session id and each request locks only that session.
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_session_id: AtomicU64,
}

impl SharedState {
    fn session(&self, id: u64) -> Option<Arc<Mutex<ConversationSession>>> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.get_mut(&id)?;
        entry.last_used = Instant::now();
        Some(entry.session.clone())
    }

    fn new_session(&self) -> (u64, Arc<Mutex<ConversationSession>>) {
        let mut sessions = self.sessions.lock().unwrap();

        if sessions.len() >= MAX_SESSIONS {
            // ids grow monotonically, so ties on the timestamp evict the
            // older session
            let oldest = sessions
                .iter()
                .min_by_key(|(id, entry)| (entry.last_used, **id))
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                log::debug!("session cap reached, evicting session {oldest}");
                sessions.remove(&oldest);
            }
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Mutex::new(ConversationSession::new()));
        sessions.insert(
            id,
            SessionEntry {
                last_used: Instant::now(),
                session: session.clone(),
            },
        );
        (id, session)
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("empty message received")]
    EmptyMessage,

    #[error("unknown session {0}")]
    UnknownSession(u64),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            ApiError::EmptyMessage => axum::http::StatusCode::BAD_REQUEST,
            ApiError::UnknownSession(_) => axum::http::StatusCode::NOT_FOUND,
        };
        (status, json!({"error": self.to_string()}).to_string()).into_response()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatRequest {
    /// Omit to start a new conversation
    session_id: Option<u64>,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatResponse {
    session_id: u64,
    reply: String,
}

async fn chat(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<axum::Json<ChatResponse>, ApiError> {
    log::debug!("payload: {payload:?}");

    if payload.message.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }

    let (session_id, session) = match payload.session_id {
        Some(id) => (id, state.session(id).ok_or(ApiError::UnknownSession(id))?),
        None => state.new_session(),
    };

    let reply = tokio::task::block_in_place(move || {
        let mut session = session.lock().unwrap();
        state.app.handle_turn(&mut session, &payload.message)
    });

    Ok(ChatResponse { session_id, reply }.into())
}

#[derive(Debug, Clone, Serialize)]
struct StatusResponse {
    entries: usize,
    awaiting_sessions: usize,
}

async fn status(State(state): State<Arc<SharedState>>) -> axum::Json<StatusResponse> {
    let awaiting_sessions = state
        .sessions
        .lock()
        .unwrap()
        .values()
        .filter(|entry| entry.session.lock().unwrap().is_awaiting_feedback())
        .count();

    StatusResponse {
        entries: state.app.kb().len(),
        awaiting_sessions,
    }
    .into()
}

fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/status", get(status))
        .fallback_service(tower_http::services::ServeDir::new("static"))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn start_app(app: App, listen_addr: &str) {
    let state = Arc::new(SharedState {
        app,
        sessions: Mutex::new(HashMap::new()),
        next_session_id: AtomicU64::new(1),
    });

    let router = router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await.unwrap();
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

pub fn start_daemon(app: App, listen_addr: &str) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(app, listen_addr).await });
}
