//! `rustedtavern preview`: show the assembled prompt for a message.

use super::runtime::{history_log, load_config, session_manager};
use rustedtavern_core::{HistoryLog, ScopeId};
use rustedtavern_engine::{AssemblyInput, ContextAssembler};

pub async fn run(
    scope: ScopeId,
    nickname: String,
    message: String,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let sessions = session_manager(&config)?;
    let history = history_log(&config, false);

    let session = sessions.get_or_create(&scope, &nickname).await?;
    let window = history
        .read_window(&session.history_key(), config.history_depth)
        .await?;
    let placeholders = session.placeholders();
    let context = ContextAssembler::new().assemble(&AssemblyInput {
        character: &session.character,
        order: &session.compiled_order,
        placeholders: &placeholders,
        persona_description: &session.persona_description,
        history: &window,
        user_message: &message,
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&context.messages)?);
        return Ok(());
    }

    println!(
        "{}  character={} preset={} regex_rules={}",
        session.scope,
        session.character.name,
        session.preset_name,
        session.compiled_regex.len()
    );
    for note in session.compiled_order.diagnostics() {
        println!("  note: {note}");
    }
    for (index, message) in context.messages.iter().enumerate() {
        let in_history = if context.history_range.contains(&index) { "h" } else { " " };
        println!("{index:>3}{in_history} [{}] {}", message.role, message.content);
    }
    println!(
        "\n{} messages, ~{} tokens, {} empty items dropped",
        context.messages.len(),
        context.estimated_tokens(),
        context.dropped
    );
    Ok(())
}
