use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, get_service, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::services::ServeDir;

use crate::{
    config::ServerConfig,
    exam::{self, ExamRequest},
    llm::Dispatcher,
    models::{ChatMessage, ChatSessionPatch, DocumentKind, NewChatSession, NewDocument},
    providers::{ProviderId, ProviderInfo},
    store::MemoryStore,
    telemetry,
};

/** \brief Owner recorded on every session and document. */
pub const ANONYMOUS_USER: &str = "anonymous";
/** \brief Room for multipart boundaries and part headers on top of the file limit. */
const MULTIPART_HEADROOM: usize = 64 * 1024;

/**
 * \brief Everything the handlers share; built once at start-up.
 */
pub struct AppState {
    pub store: MemoryStore,
    pub dispatcher: Dispatcher,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_dispatcher(config, Dispatcher::new())
    }

    pub fn with_dispatcher(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            store: MemoryStore::new(),
            dispatcher,
            config,
        }
    }
}

type SharedState = Arc<AppState>;

#[derive(Serialize, Debug)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_err(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/**
 * \brief Log the cause and answer 500 with a generic message.
 */
fn internal_err<E: std::fmt::Display>(message: &'static str) -> impl FnOnce(E) -> ApiError {
    move |e| {
        telemetry::log_error("server", &format!("{}: {}", message, e));
        api_err(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

fn multipart_err(e: MultipartError) -> ApiError {
    let status = e.status();
    telemetry::log_error("server.upload", &format!("multipart: {}", e.body_text()));
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        api_err(status, "File too large")
    } else {
        api_err(status, "Failed to upload file")
    }
}

/**
 * \brief Build the API router with the static client as fallback.
 */
pub fn router(state: SharedState) -> Router {
    let ui_root = &state.config.ui_dir;
    let static_handler = if std::path::Path::new(ui_root).exists() {
        ServeDir::new(ui_root)
    } else {
        ServeDir::new(&state.config.ui_fallback)
    }
    .append_index_html_on_directories(true);

    Router::new()
        .route("/api/upload", post(upload_document))
        .route(
            "/api/chat-sessions",
            get(list_chat_sessions).post(create_chat_session),
        )
        .route("/api/chat-sessions/{id}", put(update_chat_session))
        .route("/api/documents", get(list_documents))
        .route("/api/ai/chat", post(ai_chat))
        .route("/api/exam-prep", post(exam_prep))
        .route("/api/providers", get(list_providers))
        .route("/api/health", get(health_check))
        .layer(DefaultBodyLimit::max(
            state.config.upload_limit.saturating_add(MULTIPART_HEADROOM),
        ))
        .fallback_service(get_service(static_handler))
        .with_state(state)
}

/**
 * \brief Bind `config.addr` and serve until the process exits.
 */
pub async fn run(config: ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    println!("Server listening on http://{}", listener.local_addr()?);
    serve(listener, Arc::new(AppState::new(config))).await
}

pub async fn serve(listener: tokio::net::TcpListener, state: SharedState) -> Result<()> {
    telemetry::log_event("server", &format!("listening on {}", listener.local_addr()?));
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/**
 * \brief `POST /api/upload`: store the `file` part as text.
 * \details `upload_limit` caps the file's own bytes, not the multipart envelope.
 */
async fn upload_document(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let limit = state.config.upload_limit;
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_err)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let kind = DocumentKind::from_mime(field.content_type().unwrap_or_default());
        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_err)? {
            if bytes.len() + chunk.len() > limit {
                telemetry::log_error(
                    "server.upload",
                    &format!("{} exceeds {} bytes", filename, limit),
                );
                return Err(api_err(StatusCode::PAYLOAD_TOO_LARGE, "File too large"));
            }
            bytes.extend_from_slice(&chunk);
        }
        let document = state
            .store
            .create_document(
                NewDocument {
                    filename,
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                    kind,
                },
                ANONYMOUS_USER,
            )
            .map_err(internal_err("Failed to upload file"))?;
        telemetry::log_event(
            "server.upload",
            &format!("document id={} bytes={}", document.id, bytes.len()),
        );
        return Ok(Json(json!({ "document": document })));
    }
    Err(api_err(StatusCode::BAD_REQUEST, "No file uploaded"))
}

async fn list_chat_sessions(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let sessions = state
        .store
        .chat_sessions_by_user(ANONYMOUS_USER)
        .map_err(internal_err("Failed to fetch chat sessions"))?;
    Ok(Json(json!({ "sessions": sessions })))
}

async fn create_chat_session(
    State(state): State<SharedState>,
    Json(input): Json<NewChatSession>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .store
        .create_chat_session(input, ANONYMOUS_USER)
        .map_err(internal_err("Failed to create chat session"))?;
    telemetry::log_event("server.session", &format!("create id={}", session.id));
    Ok(Json(json!({ "session": session })))
}

async fn update_chat_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(patch): Json<ChatSessionPatch>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .store
        .update_chat_session(&id, patch)
        .map_err(internal_err("Failed to update chat session"))?;
    Ok(Json(json!({ "session": session })))
}

async fn list_documents(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let documents = state
        .store
        .documents_by_user(ANONYMOUS_USER)
        .map_err(internal_err("Failed to fetch documents"))?;
    Ok(Json(json!({ "documents": documents })))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AiChatRequest {
    provider: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    api_key: String,
}

fn parse_provider(name: &str) -> Result<ProviderId, ApiError> {
    name.parse()
        .map_err(|_| api_err(StatusCode::BAD_REQUEST, format!("Unsupported provider: {}", name)))
}

/**
 * \brief `POST /api/ai/chat`: proxy one completion; vendor failures come back as content.
 */
async fn ai_chat(
    State(state): State<SharedState>,
    Json(req): Json<AiChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let provider = parse_provider(&req.provider)?;
    if req.api_key.trim().is_empty() {
        return Err(api_err(StatusCode::BAD_REQUEST, "API key is required"));
    }
    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .or_else(|| provider.info().default_model().map(str::to_string))
        .unwrap_or_default();
    let response = state
        .dispatcher
        .send(provider, &model, &req.messages, req.api_key.trim())
        .await;
    Ok(Json(json!({
        "response": response.content,
        "provider": response.provider,
        "model": response.model,
        "usage": response.usage,
    })))
}

/**
 * \brief `POST /api/exam-prep`: generate questions, falling back to one synthetic question.
 */
async fn exam_prep(
    State(state): State<SharedState>,
    Json(req): Json<ExamRequest>,
) -> Result<Json<Value>, ApiError> {
    let config = &state.config;
    let provider = match req.provider.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(name) => parse_provider(name)?,
        None => config.exam_provider.unwrap_or_default(),
    };
    let model = req
        .model
        .clone()
        .or_else(|| config.exam_model.clone())
        .or_else(|| provider.info().default_model().map(str::to_string))
        .unwrap_or_default();
    let api_key = req.api_key.clone().or_else(|| config.exam_api_key.clone());
    telemetry::log_event(
        "server.exam",
        &format!(
            "exam={} difficulty={} topics={} provider={}",
            req.exam_type,
            req.difficulty.as_str(),
            req.topics.len(),
            provider
        ),
    );
    let questions =
        exam::generate_questions(&state.dispatcher, &req, provider, &model, api_key.as_deref())
            .await;
    Ok(Json(json!({ "questions": questions })))
}

async fn list_providers() -> Json<Value> {
    let providers: Vec<&ProviderInfo> = ProviderId::ALL.iter().map(|p| p.info()).collect();
    Json(json!({ "providers": providers }))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}
