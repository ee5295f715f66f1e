pub mod config;
pub mod conversation;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod exam;
pub mod llm;
pub mod model_selector;
pub mod models;
pub mod providers;
pub mod server;
pub mod store;
pub mod telemetry;

/**
 * \brief Common imports for front ends built on the SDK.
 */
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::conversation::Conversation;
    pub use crate::credentials::CredentialStore;
    pub use crate::db::LocalStorage;
    pub use crate::llm::Dispatcher;
    pub use crate::models::{AiResponse, ChatMessage, Role};
    pub use crate::providers::ProviderId;
    pub use crate::{exam, model_selector, server, telemetry};
}
