//! Keyword heuristic that picks a model for a prompt.
//!
//! Categories are checked in order; the first one whose keywords appear in the
//! prompt decides which model-name fragments are preferred. Ties go to list
//! order, and the first model is the fallback for everything.

use crate::providers::ProviderId;

struct Category {
    keywords: &'static [&'static str],
    preferred: &'static [&'static str],
}

const CATEGORIES: &[Category] = &[
    // math / STEM
    Category {
        keywords: &[
            "math",
            "physics",
            "engineering",
            "solve",
            "calculate",
            "problem",
            "formula",
        ],
        preferred: &["70b", "120b", "pro"],
    },
    // code
    Category {
        keywords: &["code", "debug", "python", "javascript", "error", "program"],
        preferred: &["120b", "70b", "command-r-plus"],
    },
    // research
    Category {
        keywords: &["research", "paper", "analyze", "report", "summarize", "study"],
        preferred: &["70b", "pro", "opus"],
    },
    // creative
    Category {
        keywords: &["story", "poem", "art", "creative", "imagine", "design"],
        preferred: &["gemini", "mistral", "command-r"],
    },
];

const GENERAL_PREFERRED: &[&str] = &["8b", "flash", "instant"];

/**
 * \brief Choose a model from `models` for `prompt`; None only for an empty list.
 */
pub fn auto_select_model<'a, S: AsRef<str>>(models: &'a [S], prompt: &str) -> Option<&'a str> {
    let first = models.first()?.as_ref();
    let lower = prompt.to_lowercase();

    let preferred = CATEGORIES
        .iter()
        .find(|c| c.keywords.iter().any(|k| lower.contains(k)))
        .map(|c| c.preferred)
        .unwrap_or(GENERAL_PREFERRED);

    let picked = models
        .iter()
        .map(AsRef::as_ref)
        .find(|m| preferred.iter().any(|p| m.contains(p)))
        .unwrap_or(first);
    Some(picked)
}

/**
 * \brief Same heuristic over a provider's static model list.
 */
pub fn auto_select_for_provider(provider: ProviderId, prompt: &str) -> Option<&'static str> {
    auto_select_model(provider.info().models, prompt)
}
