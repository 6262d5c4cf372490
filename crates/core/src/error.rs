//! Error types for the RustedTavern domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use std::path::PathBuf;
use thiserror::Error;

/// The top-level error type for all RustedTavern operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Preset errors ---
    #[error("Preset error: {0}")]
    Preset(#[from] PresetError),

    // --- History errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Completion service errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Character errors ---
    #[error("Character error: {0}")]
    Character(#[from] CharacterError),

    // --- Scope binding store errors ---
    #[error("Scope store error: {0}")]
    ScopeStore(#[from] ScopeStoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Why a preset's prompt order was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderViolation {
    #[error("prompt order has no chatHistory marker")]
    MissingHistoryMarker,

    #[error("prompt order has {count} chatHistory markers, expected exactly one")]
    DuplicateHistoryMarker { count: usize },
}

#[derive(Debug, Clone, Error)]
pub enum PresetError {
    #[error("Invalid prompt order in preset '{preset}': {reason}")]
    InvalidPresetOrder {
        preset: String,
        reason: OrderViolation,
    },

    #[error("Preset not found: {0}")]
    NotFound(String),

    #[error("Failed to parse preset '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("Failed to import preset: {0}")]
    Import(String),

    #[error("Preset storage error at {path}: {reason}")]
    Storage { path: PathBuf, reason: String },
}

/// Reason a single regex rule was left out of a pipeline.
///
/// Never fatal: the rule is skipped and the rest of the bundle still applies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegexRuleError {
    #[error("Malformed regex rule '{rule}': invalid pattern: {reason}")]
    InvalidPattern { rule: String, reason: String },

    #[error("Malformed regex rule file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Malformed regex rule '{0}': empty pattern")]
    EmptyPattern(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to write history at {path}: {reason}")]
    WriteFailure { path: PathBuf, reason: String },

    #[error("Failed to read history at {path}: {reason}")]
    ReadFailure { path: PathBuf, reason: String },

    #[error("Corrupt history record on line {line}: {reason}")]
    RecordCorrupt { line: usize, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum CharacterError {
    #[error("Character not found: {0}")]
    NotFound(String),

    #[error("Failed to parse character card {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Failed to read characters from {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum ScopeStoreError {
    #[error("Failed to read scope bindings at {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write scope bindings at {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Failed to parse scope bindings at {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}
