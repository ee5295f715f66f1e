use anyhow::{Context, Result};

use crate::providers::ProviderId;

pub const DEFAULT_ADDR: &str = "127.0.0.1:5173";
pub const DEFAULT_UPLOAD_LIMIT: usize = 10 * 1024 * 1024;

/**
 * \brief Server settings, read from `ULTIMATEAI_*` environment variables.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    /** \brief Built single-page client, served when present. */
    pub ui_dir: String,
    pub ui_fallback: String,
    /** \brief Maximum upload body in bytes. */
    pub upload_limit: usize,
    /** \brief Provider used by exam-prep when the request names none. */
    pub exam_provider: Option<ProviderId>,
    pub exam_model: Option<String>,
    pub exam_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            ui_dir: "client/dist".to_string(),
            ui_fallback: "web".to_string(),
            upload_limit: DEFAULT_UPLOAD_LIMIT,
            exam_provider: None,
            exam_model: None,
            exam_api_key: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /**
     * \brief Build from an arbitrary variable source; blank values count as unset.
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();
        if let Some(addr) = get("ULTIMATEAI_ADDR") {
            config.addr = addr;
        }
        if let Some(dir) = get("ULTIMATEAI_UI_DIR") {
            config.ui_dir = dir;
        }
        if let Some(dir) = get("ULTIMATEAI_UI_FALLBACK") {
            config.ui_fallback = dir;
        }
        if let Some(limit) = get("ULTIMATEAI_UPLOAD_LIMIT") {
            config.upload_limit = limit
                .parse()
                .with_context(|| format!("invalid ULTIMATEAI_UPLOAD_LIMIT: {}", limit))?;
        }
        if let Some(provider) = get("ULTIMATEAI_EXAM_PROVIDER") {
            config.exam_provider = Some(provider.parse()?);
        }
        config.exam_model = get("ULTIMATEAI_EXAM_MODEL");
        config.exam_api_key = get("ULTIMATEAI_EXAM_API_KEY");
        Ok(config)
    }
}
