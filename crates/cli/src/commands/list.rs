//! Listing characters, presets and history streams.

use super::runtime::{load_config, session_manager};
use rustedtavern_config::{BindingKind, ScopeStore};
use rustedtavern_core::{HistoryKey, HistoryLog, ScopeId};
use rustedtavern_history::FileHistoryLog;
use rustedtavern_preset::compile;

pub async fn characters() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let sessions = session_manager(&config)?;
    let bindings = sessions.store().list(BindingKind::Character).await?;

    if sessions.characters().is_empty() {
        println!("No character cards in {}", config.characters_dir().display());
        println!("Scopes without a card talk to the built-in '{}'.", config.fallback_character);
    }
    for name in sessions.characters().names() {
        let scopes: Vec<String> = bindings
            .iter()
            .filter(|(_, bound)| bound == name)
            .map(|(scope, _)| scope.to_string())
            .collect();
        if scopes.is_empty() {
            println!("  {name}");
        } else {
            println!("  {name}  ({})", scopes.join(", "));
        }
    }
    Ok(())
}

pub async fn presets() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let sessions = session_manager(&config)?;
    let presets = sessions.presets();

    for name in presets.names() {
        let status = match presets.get(name).map(compile) {
            Ok(Ok(order)) => format!(
                "{} items, {} regex rules",
                order.items().len(),
                presets.regex_bundle(name).rules.len()
            ),
            Ok(Err(e)) | Err(e) => format!("invalid: {e}"),
        };
        let marker = if name == config.default_preset { "*" } else { " " };
        println!(" {marker} {name}  {status}");
    }
    Ok(())
}

pub async fn history(scope: Option<ScopeId>, depth: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let log = FileHistoryLog::new(config.history_dir());

    let Some(scope) = scope else {
        let streams = log.streams()?;
        if streams.is_empty() {
            println!("No history yet in {}", log.dir().display());
        }
        for stream in streams {
            println!("  {stream}");
        }
        return Ok(());
    };

    let sessions = session_manager(&config)?;
    let character = sessions.resolve_character(&scope).await?;
    let key = HistoryKey::new(scope, character.name.clone());
    let entries = log.read_window(&key, depth).await?;

    println!("{key}  ({} records)", entries.len());
    for entry in entries {
        println!(
            "  [{}] {}: {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.speaker_name,
            entry.text
        );
    }
    Ok(())
}
