//! Subcommand implementations.

pub mod admin;
pub mod chat;
pub mod list;
pub mod onboard;
pub mod preset_import;
pub mod preview;
pub mod runtime;
