//! History log implementations for RustedTavern.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileHistoryLog;
pub use in_memory::InMemoryHistoryLog;
