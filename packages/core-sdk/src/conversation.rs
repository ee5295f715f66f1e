use anyhow::{bail, Result};

use crate::{
    credentials::CredentialStore,
    llm::Dispatcher,
    model_selector::auto_select_model,
    models::{AiResponse, ChatMessage},
    providers::ProviderId,
    telemetry,
};

pub const MISSING_KEY_MESSAGE: &str = "API key is not configured or invalid.";

/**
 * \brief Client-side chat: ordered history against one provider.
 */
#[derive(Debug, Clone)]
pub struct Conversation {
    provider: ProviderId,
    model: String,
    auto_model: bool,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /**
     * \brief Start empty on the provider's first model.
     */
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            model: provider.info().default_model().unwrap_or_default().to_string(),
            auto_model: false,
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /** \brief Re-pick the model from each prompt's keywords. */
    pub fn with_auto_model(mut self, enabled: bool) -> Self {
        self.auto_model = enabled;
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /**
     * \brief Append `prompt`, dispatch the full history and append the reply.
     * \details Empty prompts and missing keys are rejected before anything is
     *          appended. Provider failures arrive as diagnostic reply content.
     */
    pub async fn send(
        &mut self,
        dispatcher: &Dispatcher,
        credentials: &CredentialStore,
        prompt: &str,
    ) -> Result<AiResponse> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("Please enter a message.");
        }
        let Some(api_key) = credentials.get_decrypted(self.provider) else {
            bail!(MISSING_KEY_MESSAGE);
        };
        if self.auto_model {
            if let Some(model) = auto_select_model(self.provider.info().models, prompt) {
                self.model = model.to_string();
            }
        }

        self.messages.push(ChatMessage::user(prompt));
        let response = dispatcher
            .send(self.provider, &self.model, &self.messages, &api_key)
            .await;
        telemetry::log_event(
            "conversation",
            &format!(
                "provider={} model={} history={}",
                self.provider,
                self.model,
                self.messages.len()
            ),
        );
        self.messages.push(ChatMessage::assistant(response.content.clone()));
        Ok(response)
    }
}
