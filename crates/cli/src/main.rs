//! RustedTavern CLI entry point.
//!
//! Commands:
//! - `onboard`        Write the default config and data directories
//! - `chat`           Interactive or single-message role-play
//! - `preview`        Print the prompt a message would produce
//! - `clear`          Truncate a scope's history
//! - `characters`     List character cards
//! - `presets`        List presets
//! - `history`        List history streams or show one
//! - `set-preset`     Bind a preset to a scope
//! - `set-character`  Bind a character to a scope
//! - `preset-import`  Convert a SillyTavern preset export

use clap::{Parser, Subcommand};
use rustedtavern_core::ScopeId;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "rustedtavern",
    about = "RustedTavern: character role-play with swappable presets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directories
    Onboard,

    /// Chat with the scope's character
    Chat {
        /// Conversation scope, e.g. `private:alice` or `group:123456`
        #[arg(short, long, default_value = "private:local")]
        scope: ScopeId,

        /// Your display name, substituted for {{user}}
        #[arg(short, long, default_value = "User")]
        nickname: String,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Keep history in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Show the messages a turn would send, without calling the provider
    Preview {
        #[arg(short, long, default_value = "private:local")]
        scope: ScopeId,

        #[arg(short, long, default_value = "User")]
        nickname: String,

        #[arg(short, long)]
        message: String,

        /// Print the message list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Truncate the history of the scope's current character
    Clear {
        #[arg(short, long)]
        scope: ScopeId,
    },

    /// List character cards
    Characters,

    /// List presets
    Presets,

    /// List history streams, or show the latest records of one scope
    History {
        #[arg(short, long)]
        scope: Option<ScopeId>,

        /// Records to show
        #[arg(short, long, default_value_t = 20)]
        depth: usize,
    },

    /// Bind a preset to a scope
    SetPreset {
        #[arg(short, long)]
        scope: ScopeId,

        name: String,
    },

    /// Bind a character to a scope
    SetCharacter {
        #[arg(short, long)]
        scope: ScopeId,

        name: String,
    },

    /// Import a SillyTavern chat-completion preset export
    PresetImport {
        file: PathBuf,

        /// Preset name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            scope,
            nickname,
            message,
            ephemeral,
        } => commands::chat::run(scope, nickname, message, ephemeral).await?,
        Commands::Preview {
            scope,
            nickname,
            message,
            json,
        } => commands::preview::run(scope, nickname, message, json).await?,
        Commands::Clear { scope } => commands::admin::clear(scope).await?,
        Commands::Characters => commands::list::characters().await?,
        Commands::Presets => commands::list::presets().await?,
        Commands::History { scope, depth } => commands::list::history(scope, depth).await?,
        Commands::SetPreset { scope, name } => commands::admin::set_preset(scope, &name).await?,
        Commands::SetCharacter { scope, name } => {
            commands::admin::set_character(scope, &name).await?
        }
        Commands::PresetImport { file, name } => {
            commands::preset_import::run(&file, name.as_deref()).await?
        }
    }

    Ok(())
}
