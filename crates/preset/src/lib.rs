//! Presets for RustedTavern.
//!
//! A preset bundles prompt fragments with an ordering relative to the chat
//! history, plus a directory of regex rules that clean model replies.
//!
//! - [`model`]: the preset file format
//! - [`compiler`]: turns a preset's order into a validated [`CompiledOrder`]
//! - [`postprocess`]: loads and applies regex rule bundles
//! - [`import`]: converts SillyTavern exports
//! - [`registry`]: the set of presets available to sessions

pub mod compiler;
pub mod import;
pub mod model;
pub mod postprocess;
pub mod registry;

pub use compiler::{CompiledItem, CompiledOrder, OrderDiagnostic, ResolvedFragment, compile};
pub use model::{Marker, OrderEntry, Preset, PromptFragment};
pub use postprocess::{RegexBundle, RegexFlags, RegexPipeline, RegexRule};
pub use registry::PresetRegistry;
