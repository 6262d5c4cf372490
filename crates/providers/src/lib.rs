//! Completion service implementations for RustedTavern.
//!
//! Every backend speaks the OpenAI chat-completions dialect and implements
//! `rustedtavern_core::Provider`. The router picks one from configuration
//! once, at startup.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, default_base_url};
