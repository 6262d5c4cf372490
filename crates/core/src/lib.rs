//! # RustedTavern Core
//!
//! Domain types, traits, and error definitions for the RustedTavern
//! role-play engine. Persistence, presets and providers live in their own
//! crates and implement against what is defined here.

pub mod character;
pub mod error;
pub mod fs;
pub mod history;
pub mod message;
pub mod placeholder;
pub mod provider;
pub mod scope;

// Re-export key types at crate root for ergonomics
pub use character::CharacterCard;
pub use error::{Error, Result};
pub use history::{HistoryEntry, HistoryKey, HistoryLog};
pub use message::{Message, Role};
pub use placeholder::Placeholders;
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use scope::{ScopeId, ScopeKind};
