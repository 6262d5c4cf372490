//! Building the engine pieces from configuration.

use rustedtavern_config::{AppConfig, JsonScopeStore};
use rustedtavern_core::{HistoryLog, Provider};
use rustedtavern_engine::{
    CharacterRegistry, ChatEngine, GenerationSettings, SessionDefaults, SessionManager,
};
use rustedtavern_history::{FileHistoryLog, InMemoryHistoryLog};
use rustedtavern_preset::PresetRegistry;
use std::sync::Arc;
use tracing::debug;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Registries and scope bindings from the data directory.
pub fn session_manager(config: &AppConfig) -> Result<SessionManager, Box<dyn std::error::Error>> {
    let characters = CharacterRegistry::load_dir(&config.characters_dir());
    let presets = PresetRegistry::load_dir(&config.presets_dir());
    let store = JsonScopeStore::open(config.bindings_path())?;

    Ok(SessionManager::new(
        characters,
        presets,
        Arc::new(store),
        SessionDefaults::from_config(config),
    ))
}

pub fn history_log(config: &AppConfig, ephemeral: bool) -> Arc<dyn HistoryLog> {
    if ephemeral {
        Arc::new(InMemoryHistoryLog::new())
    } else {
        Arc::new(FileHistoryLog::new(config.history_dir()))
    }
}

/// The full turn pipeline, with the configured provider.
pub fn chat_engine(
    config: &AppConfig,
    ephemeral: bool,
) -> Result<ChatEngine, Box<dyn std::error::Error>> {
    let provider = rustedtavern_providers::build_from_config(&config.provider)?;
    debug!(
        provider = %provider.name(),
        model = %config.provider.model,
        ephemeral,
        "Building chat engine"
    );

    Ok(ChatEngine::new(
        session_manager(config)?,
        history_log(config, ephemeral),
        provider,
        GenerationSettings::from_config(config),
    ))
}
