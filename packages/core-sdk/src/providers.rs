use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

/**
 * \brief Identifier of a supported AI vendor.
 */
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[default]
    Groq,
    #[serde(rename = "huggingface")]
    HuggingFace,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Cohere,
    Gemini,
    Mistral,
}

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        ProviderId::Groq,
        ProviderId::HuggingFace,
        ProviderId::OpenRouter,
        ProviderId::Cohere,
        ProviderId::Gemini,
        ProviderId::Mistral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Groq => "groq",
            ProviderId::HuggingFace => "huggingface",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Cohere => "cohere",
            ProviderId::Gemini => "gemini",
            ProviderId::Mistral => "mistral",
        }
    }

    /**
     * \brief Static metadata for this provider.
     */
    pub fn info(&self) -> &'static ProviderInfo {
        match self {
            ProviderId::Groq => &GROQ,
            ProviderId::HuggingFace => &HUGGINGFACE,
            ProviderId::OpenRouter => &OPENROUTER,
            ProviderId::Cohere => &COHERE,
            ProviderId::Gemini => &GEMINI,
            ProviderId::Mistral => &MISTRAL,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown provider: {}", s))
    }
}

/**
 * \brief Immutable per-vendor configuration.
 */
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub models: &'static [&'static str],
    /** \brief Key format hint such as `gsk_...`; the part before `...` is the prefix. */
    pub api_key_format: &'static str,
    pub free_available: bool,
    pub description: &'static str,
    #[serde(skip)]
    pub api_base: &'static str,
    #[serde(skip)]
    pub console_url: &'static str,
}

impl ProviderInfo {
    pub fn key_prefix(&self) -> &'static str {
        self.api_key_format.trim_end_matches("...")
    }

    pub fn default_model(&self) -> Option<&'static str> {
        self.models.first().copied()
    }
}

static GROQ: ProviderInfo = ProviderInfo {
    name: "groq",
    display_name: "Groq (Recommended)",
    models: &[
        "llama-3.3-70b-versatile",
        "llama-3.1-8b-instant",
        "llama-guard-3-8b",
        "gemma2-9b-it",
        "mistral-saba-24b",
    ],
    api_key_format: "gsk_...",
    free_available: true,
    description: "Ultra-fast inference with 14,400 requests/day free",
    api_base: "https://api.groq.com/openai/v1",
    console_url: "https://console.groq.com/",
};

static HUGGINGFACE: ProviderInfo = ProviderInfo {
    name: "huggingface",
    display_name: "Hugging Face",
    models: &["microsoft/DialoGPT-large", "facebook/blenderbot-400M-distill"],
    api_key_format: "hf_...",
    free_available: true,
    description: "Free inference API with various open models",
    api_base: "https://api-inference.huggingface.co",
    console_url: "https://huggingface.co/settings/tokens",
};

static OPENROUTER: ProviderInfo = ProviderInfo {
    name: "openrouter",
    display_name: "OpenRouter",
    models: &[
        "openai/gpt-4",
        "anthropic/claude-3-opus",
        "meta-llama/llama-2-70b",
    ],
    api_key_format: "sk-or-...",
    free_available: false,
    description: "Unified access to premium models",
    api_base: "https://openrouter.ai/api/v1",
    console_url: "https://openrouter.ai/keys",
};

static COHERE: ProviderInfo = ProviderInfo {
    name: "cohere",
    display_name: "Cohere",
    models: &["command-r-plus", "command-r", "command"],
    api_key_format: "co-...",
    free_available: true,
    description: "Enterprise-grade language models",
    api_base: "https://api.cohere.com/v2",
    console_url: "https://dashboard.cohere.com/api-keys",
};

static GEMINI: ProviderInfo = ProviderInfo {
    name: "gemini",
    display_name: "Google Gemini",
    models: &["gemini-2.5-flash", "gemini-2.5-pro", "gemini-1.5-pro"],
    api_key_format: "AIza...",
    free_available: true,
    description: "Google AI with multimodal capabilities",
    api_base: "https://generativelanguage.googleapis.com/v1beta",
    console_url: "https://aistudio.google.com/app/apikey",
};

static MISTRAL: ProviderInfo = ProviderInfo {
    name: "mistral",
    display_name: "Mistral AI",
    models: &[
        "mistral-large-latest",
        "mistral-medium-latest",
        "mistral-small-latest",
    ],
    api_key_format: "sk-...",
    free_available: false,
    description: "Efficient European AI models",
    api_base: "https://api.mistral.ai/v1",
    console_url: "https://console.mistral.ai/api-keys/",
};

/**
 * \brief Format check applied before a key is stored.
 * \details Keys shorter than 10 characters (after trimming) are rejected.
 *          Otherwise a key passes if it carries the provider prefix or is at
 *          least 20 characters long.
 */
pub fn validate_api_key(provider: ProviderId, api_key: &str) -> bool {
    if utf16_len(api_key.trim()) < 10 {
        return false;
    }
    let prefix = provider.info().key_prefix();
    if prefix.is_empty() {
        return utf16_len(api_key) >= 10;
    }
    api_key.starts_with(prefix) || utf16_len(api_key) >= 20
}

/// Length in UTF-16 code units, the unit browser-side checks count in.
fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_are_rejected_for_every_provider() {
        for p in ProviderId::ALL {
            assert!(!validate_api_key(p, ""));
            assert!(!validate_api_key(p, "abc"));
            assert!(!validate_api_key(p, "123456789"));
            assert!(!validate_api_key(p, "   gsk_1    "));
        }
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // 5 two-byte characters: 10 bytes, 5 units
        assert!(!validate_api_key(ProviderId::Groq, "ééééé"));
        // 10 units still counts as long enough for a prefixed key
        assert!(validate_api_key(ProviderId::Groq, "gsk_éééééé"));
        // 19 multi-byte characters are not "long" even though they exceed 20 bytes
        assert!(!validate_api_key(ProviderId::Mistral, &"é".repeat(19)));
        assert!(validate_api_key(ProviderId::Mistral, &"é".repeat(20)));
    }

    #[test]
    fn prefixed_or_long_keys_are_accepted() {
        for p in ProviderId::ALL {
            let prefixed = format!("{}abcdefghij", p.info().key_prefix());
            assert!(validate_api_key(p, &prefixed), "prefixed key for {}", p);
            assert!(validate_api_key(p, "x".repeat(20).as_str()));
        }
        assert!(!validate_api_key(ProviderId::Groq, "hf_abcdefghi"));
    }

    #[test]
    fn parse_is_case_insensitive_and_rejects_unknown() {
        assert_eq!("Groq".parse::<ProviderId>().unwrap(), ProviderId::Groq);
        assert_eq!(
            " huggingface ".parse::<ProviderId>().unwrap(),
            ProviderId::HuggingFace
        );
        assert!("openai".parse::<ProviderId>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        for p in ProviderId::ALL {
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p));
            assert_eq!(p.info().name, p.as_str());
        }
    }

    #[test]
    fn every_provider_has_models() {
        for p in ProviderId::ALL {
            assert!(p.info().default_model().is_some());
        }
    }
}
