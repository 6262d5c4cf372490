//! Context assembly pipeline.
//!
//! Builds the provider message list from three parts, in order:
//!
//! 1. **Before**: compiled order items ahead of the `chatHistory` marker
//! 2. **History block**: the character's opening line, the history window,
//!    then the live user message
//! 3. **After**: compiled order items behind the marker
//!
//! Markers resolve to character card fields and are sent as system
//! messages; fragments keep their declared role. Any before/after item whose
//! substituted text is blank is dropped. The history block is always emitted
//! in full, so the message count is
//! `non-empty before + 2 + window length + non-empty after`.
//!
//! # Determinism
//!
//! Assembly is a pure function of its input. The same character, order,
//! placeholders, window and message always produce the same list.

use super::token;
use rustedtavern_core::character::CharacterCard;
use rustedtavern_core::history::HistoryEntry;
use rustedtavern_core::message::{Message, Role};
use rustedtavern_core::placeholder::Placeholders;
use rustedtavern_preset::{CompiledItem, CompiledOrder, Marker};
use std::ops::Range;

// ── Types ─────────────────────────────────────────────────────────────────

/// Everything the assembler reads for one provider call.
pub struct AssemblyInput<'a> {
    /// The session's character.
    pub character: &'a CharacterCard,
    /// The session's compiled prompt order.
    pub order: &'a CompiledOrder,
    /// Nickname and character name for `{{user}}` / `{{char}}`.
    pub placeholders: &'a Placeholders,
    /// Text for the `personaDescription` marker. Usually empty.
    pub persona_description: &'a str,
    /// The bounded history window, oldest first.
    pub history: &'a [HistoryEntry],
    /// The live user message.
    pub user_message: &'a str,
}

/// The assembled context, ready for a provider request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub messages: Vec<Message>,
    /// Where the history block sits in `messages`.
    pub history_range: Range<usize>,
    /// Before/after items dropped for being blank.
    pub dropped: usize,
}

impl AssembledContext {
    pub fn estimated_tokens(&self) -> usize {
        token::estimate_messages_tokens(&self.messages)
    }
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Assemble the message list for one turn.
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> AssembledContext {
        let order = input.order;
        let mut messages = Vec::with_capacity(
            order.before().len() + input.history.len() + 2 + order.after().len(),
        );
        let mut dropped = 0;

        // ── Before the history marker ──────────────────────────────────────
        dropped += Self::render_items(order.before(), input, &mut messages);

        // ── History block ──────────────────────────────────────────────────
        let history_start = messages.len();
        let substitute = |text: &str| input.placeholders.substitute(text);

        messages.push(Message::assistant(substitute(&input.character.first_message)));
        messages.extend(input.history.iter().map(|entry| {
            let role = if entry.is_user {
                Role::User
            } else {
                Role::Assistant
            };
            Message::new(role, substitute(&entry.text))
        }));
        messages.push(Message::user(substitute(input.user_message)));
        let history_range = history_start..messages.len();

        // ── After the history marker ───────────────────────────────────────
        dropped += Self::render_items(order.after(), input, &mut messages);

        AssembledContext {
            messages,
            history_range,
            dropped,
        }
    }

    /// Resolve, substitute and push each item. Returns how many were blank.
    fn render_items(
        items: &[CompiledItem],
        input: &AssemblyInput<'_>,
        out: &mut Vec<Message>,
    ) -> usize {
        let mut dropped = 0;
        for item in items {
            let (role, raw) = match item {
                CompiledItem::Marker(marker) => (Role::System, Self::resolve_marker(*marker, input)),
                CompiledItem::Fragment(fragment) => (fragment.role, fragment.content.as_str()),
            };
            let text = input.placeholders.substitute(raw);
            if text.trim().is_empty() {
                dropped += 1;
                continue;
            }
            out.push(Message::new(role, text));
        }
        dropped
    }

    /// The raw text a marker stands for. World info is not modelled and
    /// always resolves empty.
    fn resolve_marker<'a>(marker: Marker, input: &AssemblyInput<'a>) -> &'a str {
        let card = input.character;
        match marker {
            Marker::CharDescription => &card.description,
            Marker::CharPersonality => &card.personality,
            Marker::Scenario => &card.scenario,
            Marker::DialogueExamples => &card.dialogue_examples,
            Marker::PersonaDescription => input.persona_description,
            Marker::WorldInfoBefore | Marker::WorldInfoAfter | Marker::ChatHistory => "",
        }
    }
}
