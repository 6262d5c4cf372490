//! Preset order compiler.
//!
//! Resolves every order entry once, so assembly never has to look at the
//! preset again or guess what kind of entry it holds:
//!
//! - entries toggled off, and references to disabled fragments, are dropped
//! - references that match neither a fragment nor a marker are dropped and
//!   reported as diagnostics
//! - the result must hold exactly one `chatHistory` marker, otherwise the
//!   whole preset is rejected with `InvalidPresetOrder`

use crate::model::{Marker, Preset};
use rustedtavern_core::error::{OrderViolation, PresetError};
use rustedtavern_core::message::Role;
use tracing::{debug, warn};

/// A fragment reference resolved to its role and raw (unsubstituted) text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFragment {
    pub identifier: String,
    pub role: Role,
    pub content: String,
}

/// One compiled order element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledItem {
    Fragment(ResolvedFragment),
    Marker(Marker),
}

/// Something the compiler dropped that the preset author probably wants to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderDiagnostic {
    /// Order names something that is neither a fragment nor a marker
    UnresolvedReference(String),
    /// A fragment flagged as a marker whose identifier is not in the vocabulary
    UnknownMarker(String),
}

impl std::fmt::Display for OrderDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderDiagnostic::UnresolvedReference(id) => {
                write!(f, "order entry '{id}' matches no fragment or marker")
            }
            OrderDiagnostic::UnknownMarker(id) => write!(f, "unknown marker '{id}'"),
        }
    }
}

/// A validated prompt order with exactly one chat-history marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledOrder {
    preset_name: String,
    items: Vec<CompiledItem>,
    history_index: usize,
    diagnostics: Vec<OrderDiagnostic>,
}

impl CompiledOrder {
    pub fn preset_name(&self) -> &str {
        &self.preset_name
    }

    pub fn items(&self) -> &[CompiledItem] {
        &self.items
    }

    /// Items placed before the chat history.
    pub fn before(&self) -> &[CompiledItem] {
        &self.items[..self.history_index]
    }

    /// Items placed after the chat history.
    pub fn after(&self) -> &[CompiledItem] {
        &self.items[self.history_index + 1..]
    }

    pub fn diagnostics(&self) -> &[OrderDiagnostic] {
        &self.diagnostics
    }
}

/// Compile a preset's order.
pub fn compile(preset: &Preset) -> Result<CompiledOrder, PresetError> {
    let mut items = Vec::with_capacity(preset.order.len());
    let mut diagnostics = Vec::new();

    for entry in &preset.order {
        let identifier = entry.identifier();

        if !entry.enabled() {
            debug!(preset = %preset.name, identifier, "Order entry toggled off");
            continue;
        }

        match preset.fragment(identifier) {
            Some(fragment) if !fragment.enabled => {
                debug!(preset = %preset.name, identifier, "Fragment disabled");
            }
            Some(fragment) if fragment.is_marker => match Marker::from_identifier(identifier) {
                Some(marker) => items.push(CompiledItem::Marker(marker)),
                None => {
                    warn!(preset = %preset.name, identifier, "Skipping unknown marker");
                    diagnostics.push(OrderDiagnostic::UnknownMarker(identifier.to_string()));
                }
            },
            Some(fragment) => items.push(CompiledItem::Fragment(ResolvedFragment {
                identifier: fragment.identifier.clone(),
                role: fragment.role,
                content: fragment.content.clone(),
            })),
            None => match Marker::from_identifier(identifier) {
                Some(marker) => items.push(CompiledItem::Marker(marker)),
                None => {
                    warn!(preset = %preset.name, identifier, "Skipping unresolved order entry");
                    diagnostics.push(OrderDiagnostic::UnresolvedReference(identifier.to_string()));
                }
            },
        }
    }

    let history_positions: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| matches!(item, CompiledItem::Marker(Marker::ChatHistory)))
        .map(|(i, _)| i)
        .collect();

    let history_index = match history_positions.as_slice() {
        [index] => *index,
        [] => {
            return Err(PresetError::InvalidPresetOrder {
                preset: preset.name.clone(),
                reason: OrderViolation::MissingHistoryMarker,
            });
        }
        many => {
            return Err(PresetError::InvalidPresetOrder {
                preset: preset.name.clone(),
                reason: OrderViolation::DuplicateHistoryMarker { count: many.len() },
            });
        }
    };

    debug!(
        preset = %preset.name,
        items = items.len(),
        history_index,
        dropped = diagnostics.len(),
        "Prompt order compiled"
    );

    Ok(CompiledOrder {
        preset_name: preset.name.clone(),
        items,
        history_index,
        diagnostics,
    })
}
