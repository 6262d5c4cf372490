//! Provider selection: picks the completion backend from config.
//!
//! Selection happens once at startup; the rest of the system only sees an
//! `Arc<dyn Provider>`.

use crate::openai_compat::OpenAiCompatProvider;
use rustedtavern_config::ProviderConfig;
use rustedtavern_core::error::ProviderError;
use rustedtavern_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the configured provider.
///
/// `api_url` overrides the well-known base URL. `custom` has no default and
/// must set `api_url`.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let kind = config.kind.trim().to_ascii_lowercase();

    let base_url = match (&config.api_url, default_base_url(&kind)) {
        (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
        (_, Some(url)) => url.to_string(),
        (_, None) if kind == "custom" => {
            return Err(ProviderError::NotConfigured(
                "provider kind 'custom' requires api_url".into(),
            ));
        }
        (_, None) => {
            return Err(ProviderError::NotConfigured(format!(
                "unknown provider kind '{kind}'"
            )));
        }
    };

    let api_key = config.api_key.clone().unwrap_or_default();
    let provider = OpenAiCompatProvider::new(
        &kind,
        &base_url,
        api_key,
        Duration::from_secs(config.timeout_secs),
    )?;

    info!(provider = %kind, base_url = %base_url, model = %config.model, "Completion provider ready");
    Ok(Arc::new(provider))
}

/// Base URL of a well-known provider kind.
pub fn default_base_url(kind: &str) -> Option<&'static str> {
    match kind {
        "openai" => Some("https://api.openai.com/v1"),
        "claude" | "anthropic" => Some("https://api.anthropic.com/v1"),
        "google" | "gemini" => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        _ => None,
    }
}
