use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use ultimate_ai_core_sdk::{
    config::ServerConfig,
    llm::Dispatcher,
    providers::ProviderId,
    server::{self, AppState},
};

const MOCK_KEY: &str = "gsk_test_key_1234567890";

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// OpenAI-compatible vendor that answers every completion with `reply`.
async fn spawn_vendor(reply: &str) -> String {
    async fn completions(
        State(reply): State<Arc<String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != format!("Bearer {}", MOCK_KEY) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "Invalid API Key"}})),
            );
        }
        assert_eq!(body["stream"], false);
        (
            StatusCode::OK,
            Json(json!({
                "choices": [{"message": {"role": "assistant", "content": reply.as_str()}}],
                "usage": {"completion_tokens": 5, "total_tokens": 12}
            })),
        )
    }

    let app = Router::new()
        .route("/chat/completions", post(completions))
        .with_state(Arc::new(reply.to_string()));
    spawn(app).await
}

async fn spawn_app(config: ServerConfig, dispatcher: Dispatcher) -> String {
    let state = Arc::new(AppState::with_dispatcher(config, dispatcher));
    spawn(server::router(state)).await
}

fn test_config() -> ServerConfig {
    ServerConfig {
        ui_dir: "does-not-exist/dist".into(),
        ui_fallback: "does-not-exist/web".into(),
        upload_limit: 4 * 1024,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn chat_session_create_list_and_update() {
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat-sessions", base))
        .json(&json!({"title": "Physics", "provider": "groq", "model": "llama-3.3-70b-versatile"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let session = &body["session"];
    let id = session["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(session["messages"], json!([]));
    assert_eq!(session["userId"], "anonymous");
    assert_eq!(session["createdAt"], session["updatedAt"]);

    let listed: Value = client
        .get(format!("{}/api/chat-sessions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["sessions"].as_array().unwrap().len(), 1);

    let updated: Value = client
        .put(format!("{}/api/chat-sessions/{}", base, id))
        .json(&json!({"title": "Mechanics", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["session"]["title"], "Mechanics");
    assert_eq!(updated["session"]["provider"], "groq");
    assert_eq!(updated["session"]["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn updating_unknown_session_is_a_server_error() {
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let resp = reqwest::Client::new()
        .put(format!("{}/api/chat-sessions/nope", base))
        .json(&json!({"title": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"error": "Failed to update chat session"}));
}

#[tokio::test]
async fn upload_stores_documents() {
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let client = reqwest::Client::new();

    let form = Form::new().part(
        "file",
        Part::bytes(b"Newton's laws".to_vec())
            .file_name("notes.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["document"]["filename"], "notes.txt");
    assert_eq!(body["document"]["content"], "Newton's laws");
    assert_eq!(body["document"]["type"], "text");

    let form = Form::new().part(
        "file",
        Part::bytes(vec![0x25, 0x50, 0x44, 0x46, 0xff])
            .file_name("paper.pdf")
            .mime_str("application/pdf")
            .unwrap(),
    );
    let body: Value = client
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["document"]["type"], "pdf");
    assert!(body["document"]["content"]
        .as_str()
        .unwrap()
        .starts_with("%PDF"));

    let docs: Value = client
        .get(format!("{}/api/documents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(docs["documents"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn upload_without_file_is_rejected() {
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let form = Form::new().text("note", "no file here");
    let resp = reqwest::Client::new()
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"error": "No file uploaded"}));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let form = Form::new().part(
        "file",
        Part::bytes(vec![b'a'; 16 * 1024])
            .file_name("big.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let resp = reqwest::Client::new()
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

fn text_file(len: usize) -> Form {
    Form::new().part(
        "file",
        Part::bytes(vec![b'a'; len])
            .file_name("notes.txt")
            .mime_str("text/plain")
            .unwrap(),
    )
}

#[tokio::test]
async fn upload_limit_counts_file_bytes_only() {
    let limit = test_config().upload_limit;
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(text_file(limit))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["document"]["content"].as_str().unwrap().len(), limit);

    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(text_file(limit + 1))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"error": "File too large"}));
}

#[tokio::test]
async fn default_limit_accepts_a_ten_megabyte_file() {
    let config = ServerConfig {
        upload_limit: ServerConfig::default().upload_limit,
        ..test_config()
    };
    let base = spawn_app(config, Dispatcher::new()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/upload", base))
        .multipart(text_file(10 * 1024 * 1024))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn ai_chat_proxies_to_vendor() {
    let vendor = spawn_vendor("Force equals mass times acceleration.").await;
    let dispatcher = Dispatcher::new().with_base_url(ProviderId::Groq, vendor);
    let base = spawn_app(test_config(), dispatcher).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/ai/chat", base))
        .json(&json!({
            "provider": "groq",
            "model": "llama-3.3-70b-versatile",
            "messages": [{"role": "user", "content": "What is F=ma?"}],
            "apiKey": MOCK_KEY
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["response"], "Force equals mass times acceleration.");
    assert_eq!(body["provider"], "groq");
    assert_eq!(body["model"], "llama-3.3-70b-versatile");
    assert_eq!(body["usage"]["totalTokens"], 12);

    let body: Value = client
        .post(format!("{}/api/ai/chat", base))
        .json(&json!({
            "provider": "groq",
            "messages": [{"role": "user", "content": "hi"}],
            "apiKey": "gsk_wrong_key_000000000"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let content = body["response"].as_str().unwrap();
    assert!(content.contains("API Error"));
    assert!(content.contains("Invalid API Key"));
    assert_eq!(body["usage"]["totalTokens"], 0);
}

#[tokio::test]
async fn ai_chat_reply_is_plain_text_when_vendor_is_down() {
    let dispatcher = Dispatcher::new().with_base_url(ProviderId::Groq, "http://127.0.0.1:9");
    let base = spawn_app(test_config(), dispatcher).await;
    let body: Value = reqwest::Client::new()
        .post(format!("{}/api/ai/chat", base))
        .json(&json!({
            "provider": "groq",
            "model": "m",
            "messages": [{"role": "user", "content": "hello"}],
            "apiKey": "gsk_abcdefghijkl"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["response"].is_string(), "unexpected body: {}", body);
    assert!(body["response"].as_str().unwrap().contains("API Error"));
    assert_eq!(body["model"], "m");
}

#[tokio::test]
async fn ai_chat_rejects_unknown_provider() {
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/ai/chat", base))
        .json(&json!({"provider": "openai", "messages": [], "apiKey": MOCK_KEY}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exam_prep_parses_vendor_questions() {
    let questions = json!([
        {"id": 1, "question": "Unit of force?", "options": ["Joule", "Newton", "Watt", "Pascal"],
         "correct": 1, "explanation": "kg·m/s²", "topic": "physics"},
        {"id": 2, "question": "Derivative of x^2?", "options": ["x", "2x", "x^2", "2"],
         "correct": 1, "explanation": "power rule", "topic": "calculus"}
    ]);
    let reply = format!("```json\n{}\n```", questions);
    let vendor = spawn_vendor(&reply).await;
    let dispatcher = Dispatcher::new().with_base_url(ProviderId::Groq, vendor);
    let base = spawn_app(test_config(), dispatcher).await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/api/exam-prep", base))
        .json(&json!({
            "examType": "sat",
            "difficulty": "hard",
            "topics": "physics, calculus",
            "provider": "groq",
            "apiKey": MOCK_KEY
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let qs = body["questions"].as_array().unwrap();
    assert_eq!(qs.len(), 2);
    assert_eq!(qs[0]["type"], "multiple-choice");
    assert_eq!(qs[1]["topic"], "calculus");
}

#[tokio::test]
async fn exam_prep_falls_back_on_unusable_output() {
    let vendor = spawn_vendor("Sorry, I can't produce questions right now.").await;
    let dispatcher = Dispatcher::new().with_base_url(ProviderId::Groq, vendor);
    let config = ServerConfig {
        exam_provider: Some(ProviderId::Groq),
        exam_api_key: Some(MOCK_KEY.into()),
        ..test_config()
    };
    let base = spawn_app(config, dispatcher).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/api/exam-prep", base))
        .json(&json!({"examType": "gre", "difficulty": "medium", "topics": ["vocabulary"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let qs = body["questions"].as_array().unwrap();
    assert_eq!(qs.len(), 1);
    assert_eq!(qs[0]["topic"], "gre");

    let resp = client
        .post(format!("{}/api/exam-prep", base))
        .json(&json!({"examType": "gre", "provider": "nobody"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn providers_and_health() {
    let base = spawn_app(test_config(), Dispatcher::new()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/api/providers", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let providers = body["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 6);
    assert_eq!(providers[0]["name"], "groq");
    assert!(providers[0].get("apiBase").is_none());

    let health: Value = client
        .get(format!("{}/api/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["ok"], true);
}
