//! Preset file format.
//!
//! ```json
//! {
//!   "fragments": {
//!     "main": {"role": "system", "content": "Write {{char}}'s next reply.", "enabled": true},
//!     "chatHistory": {"marker": true}
//!   },
//!   "order": ["main", "charDescription", "chatHistory", {"identifier": "jailbreak", "enabled": false}]
//! }
//! ```
//!
//! `fragments` may also be a list. Duplicate identifiers are kept in
//! declaration order and lookups take the first one.

use rustedtavern_core::error::PresetError;
use rustedtavern_core::fs::write_atomic;
use rustedtavern_core::message::Role;
use rustedtavern_core::scope::sanitize_file_component;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

// ── Markers ───────────────────────────────────────────────────────────────

/// Structural placeholders a prompt order can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    WorldInfoBefore,
    PersonaDescription,
    CharDescription,
    CharPersonality,
    Scenario,
    WorldInfoAfter,
    DialogueExamples,
    ChatHistory,
}

impl Marker {
    pub const ALL: [Marker; 8] = [
        Marker::WorldInfoBefore,
        Marker::PersonaDescription,
        Marker::CharDescription,
        Marker::CharPersonality,
        Marker::Scenario,
        Marker::WorldInfoAfter,
        Marker::DialogueExamples,
        Marker::ChatHistory,
    ];

    /// The identifier used in preset files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::WorldInfoBefore => "worldInfoBefore",
            Marker::PersonaDescription => "personaDescription",
            Marker::CharDescription => "charDescription",
            Marker::CharPersonality => "charPersonality",
            Marker::Scenario => "scenario",
            Marker::WorldInfoAfter => "worldInfoAfter",
            Marker::DialogueExamples => "dialogueExamples",
            Marker::ChatHistory => "chatHistory",
        }
    }

    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == identifier)
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Fragments ─────────────────────────────────────────────────────────────

/// A named, role-tagged block of template text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptFragment {
    /// Filled from the map key when omitted
    #[serde(default)]
    pub identifier: String,

    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Role,

    #[serde(default, deserialize_with = "text_or_null")]
    pub content: String,

    #[serde(default = "default_true", deserialize_with = "bool_or_null")]
    pub enabled: bool,

    #[serde(rename = "marker", default, deserialize_with = "false_or_null")]
    pub is_marker: bool,
}

fn default_true() -> bool {
    true
}

/// SillyTavern leaves `role` empty or null on markers; treat that as system.
fn lenient_role<'de, D>(deserializer: D) -> Result<Role, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<String>::deserialize(deserializer)?.as_deref() {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        _ => Role::System,
    })
}

fn text_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn bool_or_null<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn false_or_null<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

// ── Order ─────────────────────────────────────────────────────────────────

/// One element of a preset's prompt order, as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderEntry {
    /// A fragment identifier or a marker name
    Identifier(String),
    /// SillyTavern's per-entry toggle
    Toggle {
        identifier: String,
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

impl OrderEntry {
    pub fn identifier(&self) -> &str {
        match self {
            OrderEntry::Identifier(id) => id,
            OrderEntry::Toggle { identifier, .. } => identifier,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            OrderEntry::Identifier(_) => true,
            OrderEntry::Toggle { enabled, .. } => *enabled,
        }
    }
}

impl From<Marker> for OrderEntry {
    fn from(marker: Marker) -> Self {
        OrderEntry::Identifier(marker.as_str().to_string())
    }
}

// ── Preset ────────────────────────────────────────────────────────────────

/// A named bundle of fragments and their order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Taken from the file stem when the file does not set it
    #[serde(default)]
    pub name: String,

    #[serde(
        default,
        deserialize_with = "fragments_map_or_list",
        serialize_with = "fragments_as_map"
    )]
    pub fragments: Vec<PromptFragment>,

    #[serde(default)]
    pub order: Vec<OrderEntry>,
}

impl Preset {
    /// Parse a preset file. `name` is used when the JSON carries none.
    pub fn from_json(name: &str, json: &str) -> Result<Self, PresetError> {
        let mut preset: Preset = serde_json::from_str(json).map_err(|e| PresetError::Parse {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        if preset.name.trim().is_empty() {
            preset.name = name.to_string();
        }
        Ok(preset)
    }

    /// Read `<dir>/<name>.json`-style files.
    pub fn load(path: &Path) -> Result<Self, PresetError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read_to_string(path).map_err(|e| PresetError::Storage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&stem, &content)
    }

    /// Write this preset as `<dir>/<name>.json`, atomically.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf, PresetError> {
        let path = dir.join(format!("{}.json", sanitize_file_component(&self.name)));
        let json = serde_json::to_vec_pretty(self).map_err(|e| PresetError::Storage {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &json).map_err(|e| PresetError::Storage {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(path)
    }

    /// First fragment with this identifier, in declaration order.
    pub fn fragment(&self, identifier: &str) -> Option<&PromptFragment> {
        self.fragments.iter().find(|f| f.identifier == identifier)
    }

    /// Persona card fields around the chat history, with no extra fragments.
    pub fn builtin_default() -> Self {
        Self {
            name: "default".into(),
            fragments: Vec::new(),
            order: [
                Marker::CharDescription,
                Marker::CharPersonality,
                Marker::Scenario,
                Marker::DialogueExamples,
                Marker::ChatHistory,
            ]
            .into_iter()
            .map(OrderEntry::from)
            .collect(),
        }
    }
}

fn fragments_as_map<S>(fragments: &[PromptFragment], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(fragments.iter().map(|f| (&f.identifier, f)))
}

fn fragments_map_or_list<'de, D>(deserializer: D) -> Result<Vec<PromptFragment>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FragmentsVisitor;

    impl<'de> Visitor<'de> for FragmentsVisitor {
        type Value = Vec<PromptFragment>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a map of identifier to fragment, or a list of fragments")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some(fragment) = seq.next_element::<PromptFragment>()? {
                if fragment.identifier.is_empty() {
                    return Err(de::Error::custom("fragment in list has no identifier"));
                }
                out.push(fragment);
            }
            Ok(out)
        }

        // Entries are streamed, so duplicate keys survive in order.
        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some((key, mut fragment)) = map.next_entry::<String, PromptFragment>()? {
                if fragment.identifier.is_empty() {
                    fragment.identifier = key;
                }
                out.push(fragment);
            }
            Ok(out)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(FragmentsVisitor)
}
