use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::{
    models::{AiResponse, ChatMessage, Role, Usage},
    providers::ProviderId,
    telemetry,
};

const OPENAI_MAX_TOKENS: u32 = 4000;
const OPENAI_TEMPERATURE: f64 = 0.7;
const HF_MAX_NEW_TOKENS: u32 = 512;

/**
 * \brief Fully shaped outbound request for one vendor call.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Value,
}

/**
 * \brief Text and counters pulled out of a vendor response.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
}

type BuildFn = fn(&str, &str, &[ChatMessage], &str) -> PreparedRequest;
type ParseFn = fn(&Value) -> Result<Completion>;

/**
 * \brief Per-vendor request shaping and response parsing.
 */
#[derive(Clone, Copy)]
pub struct Strategy {
    /** \brief (api_base, model, messages, api_key) -> request */
    pub build: BuildFn,
    pub parse: ParseFn,
}

/**
 * \brief Strategy table.
 */
pub fn strategy(provider: ProviderId) -> Strategy {
    match provider {
        ProviderId::Groq | ProviderId::Mistral => Strategy {
            build: build_openai,
            parse: parse_openai,
        },
        ProviderId::OpenRouter => Strategy {
            build: build_openrouter,
            parse: parse_openai,
        },
        ProviderId::Cohere => Strategy {
            build: build_cohere,
            parse: parse_cohere,
        },
        ProviderId::Gemini => Strategy {
            build: build_gemini,
            parse: parse_gemini,
        },
        ProviderId::HuggingFace => Strategy {
            build: build_huggingface,
            parse: parse_huggingface,
        },
    }
}

/**
 * \brief Issues completion requests; one instance is shared by the whole process.
 * \details No retries and no timeouts wrap the vendor call.
 */
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    base_urls: HashMap<ProviderId, String>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_urls: HashMap::new(),
        }
    }

    /**
     * \brief Point one provider at a different API base (proxies, tests).
     */
    pub fn with_base_url(mut self, provider: ProviderId, base: impl Into<String>) -> Self {
        self.base_urls.insert(provider, base.into());
        self
    }

    pub fn base_url(&self, provider: ProviderId) -> &str {
        self.base_urls
            .get(&provider)
            .map(String::as_str)
            .unwrap_or(provider.info().api_base)
    }

    /**
     * \brief Send a chat completion; failures come back as diagnostic content.
     */
    pub async fn send(
        &self,
        provider: ProviderId,
        model: &str,
        messages: &[ChatMessage],
        api_key: &str,
    ) -> AiResponse {
        telemetry::log_event(
            "llm.dispatch",
            &format!(
                "provider={} model={} msgs={}",
                provider,
                model,
                messages.len()
            ),
        );
        match self.try_send(provider, model, messages, api_key).await {
            Ok(completion) => AiResponse {
                content: completion.content,
                provider,
                model: model.to_string(),
                usage: completion.usage,
            },
            Err(e) => {
                telemetry::log_error(
                    "llm.dispatch",
                    &format!("provider={} model={} failed: {}", provider, model, e),
                );
                AiResponse {
                    content: error_content(provider, &e),
                    provider,
                    model: model.to_string(),
                    usage: Some(Usage::default()),
                }
            }
        }
    }

    /**
     * \brief Same call with failures propagated.
     */
    pub async fn try_send(
        &self,
        provider: ProviderId,
        model: &str,
        messages: &[ChatMessage],
        api_key: &str,
    ) -> Result<Completion> {
        let strategy = strategy(provider);
        let prepared = (strategy.build)(self.base_url(provider), model, messages, api_key);

        let mut req = self
            .client
            .post(&prepared.url)
            .header(CONTENT_TYPE, "application/json")
            .json(&prepared.body);
        if !prepared.query.is_empty() {
            req = req.query(&prepared.query);
        }
        for (name, value) in &prepared.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!(
                "{} API error: {} - {}",
                provider.info().display_name,
                status.as_u16(),
                vendor_error_message(&text)
            );
        }
        let v: Value = resp.json().await?;
        (strategy.parse)(&v)
    }
}

/**
 * \brief User-facing diagnostic with remediation hints.
 */
pub fn error_content(provider: ProviderId, err: &anyhow::Error) -> String {
    let info = provider.info();
    format!(
        "❌ **API Error**: {}\n\nPlease check:\n1. Your {} API key is valid\n2. You have sufficient credits\n3. Your internet connection is stable\n\nGet an API key at: {}",
        err, info.display_name, info.console_url
    )
}

fn vendor_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
        })
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| "Unknown error".to_string())
}

fn bearer(api_key: &str) -> (String, String) {
    (AUTHORIZATION.as_str().to_string(), format!("Bearer {}", api_key))
}

fn openai_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect()
}

fn build_openai(base: &str, model: &str, messages: &[ChatMessage], api_key: &str) -> PreparedRequest {
    PreparedRequest {
        url: format!("{}/chat/completions", base.trim_end_matches('/')),
        headers: vec![bearer(api_key)],
        query: Vec::new(),
        body: json!({
            "model": model,
            "messages": openai_messages(messages),
            "max_tokens": OPENAI_MAX_TOKENS,
            "temperature": OPENAI_TEMPERATURE,
            "stream": false
        }),
    }
}

fn build_openrouter(
    base: &str,
    model: &str,
    messages: &[ChatMessage],
    api_key: &str,
) -> PreparedRequest {
    let mut req = build_openai(base, model, messages, api_key);
    req.headers
        .push(("X-Title".to_string(), "UltimateAI".to_string()));
    req
}

fn parse_openai(v: &Value) -> Result<Completion> {
    let content = v
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid response format: missing choices[0].message"))?;
    let usage = v.get("usage").map(|u| Usage {
        tokens_used: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
    });
    Ok(Completion {
        content: content.to_string(),
        usage,
    })
}

fn build_cohere(base: &str, model: &str, messages: &[ChatMessage], api_key: &str) -> PreparedRequest {
    PreparedRequest {
        url: format!("{}/chat", base.trim_end_matches('/')),
        headers: vec![bearer(api_key)],
        query: Vec::new(),
        body: json!({
            "model": model,
            "messages": openai_messages(messages),
        }),
    }
}

fn parse_cohere(v: &Value) -> Result<Completion> {
    let parts = v
        .pointer("/message/content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid response format: missing message.content"))?;
    let content = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");
    let usage = v.pointer("/usage/tokens").map(|t| {
        let input = t.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let output = t.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        Usage {
            tokens_used: output,
            total_tokens: input + output,
        }
    });
    Ok(Completion { content, usage })
}

fn build_gemini(base: &str, model: &str, messages: &[ChatMessage], api_key: &str) -> PreparedRequest {
    let (system_prompt, contents) = gemini_payload(messages);
    let mut body = json!({ "contents": contents });
    if let Some(sys) = system_prompt {
        body["system_instruction"] = json!({ "parts": [{"text": sys}] });
    }
    PreparedRequest {
        url: format!(
            "{}/models/{}:generateContent",
            base.trim_end_matches('/'),
            model
        ),
        headers: Vec::new(),
        query: vec![("key".to_string(), api_key.to_string())],
        body,
    }
}

fn gemini_payload(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.clone()),
            Role::Assistant => contents.push(json!({
                "role": "model",
                "parts": [{"text": msg.content}]
            })),
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{"text": msg.content}]
            })),
        }
    }
    let system_prompt = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system_prompt, contents)
}

fn parse_gemini(v: &Value) -> Result<Completion> {
    let parts = v
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow!("Invalid response format: missing candidates[0].content"))?;
    let content = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");
    let usage = v.get("usageMetadata").map(|u| Usage {
        tokens_used: u
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_tokens: u.get("totalTokenCount").and_then(Value::as_u64).unwrap_or(0),
    });
    Ok(Completion { content, usage })
}

fn build_huggingface(
    base: &str,
    model: &str,
    messages: &[ChatMessage],
    api_key: &str,
) -> PreparedRequest {
    PreparedRequest {
        url: format!("{}/models/{}", base.trim_end_matches('/'), model),
        headers: vec![bearer(api_key)],
        query: Vec::new(),
        body: json!({
            "inputs": transcript(messages),
            "parameters": {
                "max_new_tokens": HF_MAX_NEW_TOKENS,
                "return_full_text": false
            }
        }),
    }
}

/// Flattens the history into a plain prompt for text-generation models.
fn transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for msg in messages {
        let label = match msg.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&msg.content);
        out.push('\n');
    }
    out.push_str("Assistant:");
    out
}

fn parse_huggingface(v: &Value) -> Result<Completion> {
    if let Some(err) = v.get("error").and_then(|e| e.as_str()) {
        bail!("Hugging Face API error: {}", err);
    }
    let text = v
        .pointer("/0/generated_text")
        .or_else(|| v.get("generated_text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow!("Invalid response format: missing generated_text"))?;
    Ok(Completion {
        content: text.trim().to_string(),
        usage: None,
    })
}
