//! `rustedtavern chat`: interactive or single-message role-play.

use super::runtime::{chat_engine, load_config};
use rustedtavern_config::AppConfig;
use rustedtavern_core::ScopeId;
use rustedtavern_engine::{ChatEngine, InboundTurn};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    scope: ScopeId,
    nickname: String,
    message: Option<String>,
    ephemeral: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    if !config.has_api_key() && config.provider.kind != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set RUSTEDTAVERN_API_KEY (or OPENAI_API_KEY), or add it to:");
        eprintln!(
            "    {}",
            AppConfig::config_dir().join("config.toml").display()
        );
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let engine = chat_engine(&config, ephemeral)?;

    if let Some(text) = message {
        let reply = engine
            .respond(InboundTurn::new(scope, nickname, text))
            .await?;
        println!("{}", reply.text);
        return Ok(());
    }

    let session = engine.sessions().get_or_create(&scope, &nickname).await?;
    println!();
    println!("  Scope:      {scope}");
    println!("  Character:  {}", session.character.name);
    println!("  Preset:     {}", session.preset_name);
    println!("  Provider:   {} ({})", config.provider.kind, config.provider.model);
    if ephemeral {
        println!("  History:    in memory only");
    }
    println!();
    println!("  Type a message and press Enter. Commands: /reset /clear /preset NAME");
    println!("  /character NAME /info /exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt()?;
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }

        if let Some(command) = line.strip_prefix('/') {
            if let Err(e) = slash_command(&engine, &scope, command).await {
                eprintln!("  [Error] {e}");
            }
        } else {
            eprint!("  ...");
            match engine
                .respond(InboundTurn::new(scope.clone(), nickname.clone(), line))
                .await
            {
                Ok(reply) => {
                    eprint!("\r     \r");
                    for text_line in reply.text.lines() {
                        println!("  {} > {text_line}", reply.character);
                    }
                }
                Err(e) => {
                    eprint!("\r     \r");
                    eprintln!("  [Error] {e}");
                }
            }
        }
        println!();
        prompt()?;
    }

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

async fn slash_command(
    engine: &ChatEngine,
    scope: &ScopeId,
    command: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match (name, arg) {
        ("reset", _) => {
            engine.reset_session(scope).await;
            println!("  Session reset. History kept.");
        }
        ("clear", _) => {
            let key = engine.clear_history(scope).await?;
            println!("  Cleared {key}");
        }
        ("preset", preset) if !preset.is_empty() => {
            let diagnostics = engine.set_preset(scope, preset).await?;
            println!("  Preset switched to '{preset}'");
            for diagnostic in diagnostics {
                println!("  note: {diagnostic}");
            }
        }
        ("character", character) if !character.is_empty() => {
            engine.set_character(scope, character).await?;
            println!("  Now talking to {character}. The next message starts a new session.");
        }
        ("info", _) => match engine.sessions().info(scope).await {
            Some(info) => println!("  {}", serde_json::to_string_pretty(&info)?),
            None => println!("  No active session."),
        },
        _ => println!("  Unknown command '/{command}'"),
    }
    Ok(())
}
