//! One-shot scope administration: bindings and history.

use super::runtime::{history_log, load_config, session_manager};
use rustedtavern_core::{HistoryKey, HistoryLog, ScopeId};

pub async fn set_preset(scope: ScopeId, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let sessions = session_manager(&config)?;

    let diagnostics = sessions.set_preset(&scope, name).await?;
    println!("{scope} now uses preset '{name}'");
    for diagnostic in diagnostics {
        println!("  note: {diagnostic}");
    }
    Ok(())
}

pub async fn set_character(scope: ScopeId, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let sessions = session_manager(&config)?;

    sessions.set_character(&scope, name).await?;
    println!("{scope} now talks to {name}");
    Ok(())
}

pub async fn clear(scope: ScopeId) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let sessions = session_manager(&config)?;
    let history = history_log(&config, false);

    let character = sessions.resolve_character(&scope).await?;
    let key = HistoryKey::new(scope, character.name.clone());
    history.clear(&key).await?;
    println!("Cleared history {key}");
    Ok(())
}
