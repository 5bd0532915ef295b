//! Static model metadata.

use super::BackendKind;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_GEMINI_FLASH_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

// Longer prefixes must precede shorter ones they extend.
const TOKEN_LIMITS: &[(&str, u32)] = &[
    ("gemini-1.5-pro", 2_097_152),
    ("gemini-1.5-flash", 1_048_576),
    ("gemini-2.0-flash-preview-image-generation", 32_000),
    ("gemini-2.0-flash-lite", 1_048_576),
    ("gemini-2.0-flash", 1_048_576),
    ("gemini-2.5-pro", 1_048_576),
    ("gemini-2.5-flash-lite", 1_048_576),
    ("gemini-2.5-flash", 1_048_576),
    ("gemini-embedding-001", 2_048),
    ("gpt-4.1-mini", 1_047_576),
    ("gpt-4.1", 1_047_576),
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-3.5-turbo", 16_385),
    ("o4-mini", 200_000),
    ("o3-mini", 200_000),
    ("o3", 200_000),
];

/// Context window of a known model, in tokens.
///
/// Dated or suffixed variants (`gemini-2.5-pro-preview-05-06`) resolve to
/// their base entry. Unknown models return `None`.
#[must_use]
pub fn token_limit(model: &str) -> Option<u32> {
    let model = model.strip_prefix("models/").unwrap_or(model);
    TOKEN_LIMITS.iter().find_map(|(name, limit)| {
        let rest = model.strip_prefix(name)?;
        (rest.is_empty() || rest.starts_with('-')).then_some(*limit)
    })
}

/// Backend that serves a model, judged by its name.
///
/// Returns `None` for names this crate does not recognize. Callers decide
/// what an unknown model means; nothing here guesses a default backend.
#[must_use]
pub fn infer_backend(model: &str) -> Option<BackendKind> {
    let model = model.strip_prefix("models/").unwrap_or(model);
    if model.starts_with("gemini-") {
        Some(BackendKind::Gemini)
    } else if model.starts_with("gpt-") || model.starts_with("o3") || model.starts_with("o4") {
        Some(BackendKind::OpenAi)
    } else {
        None
    }
}
