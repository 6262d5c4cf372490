//! Character cards: the immutable persona data a session role-plays.
//!
//! Cards come in the TavernAI V1 shape (fields at the top level) or the V2
//! shape (`{"spec": "chara_card_v2", "data": {...}}`). Both parse into the
//! same [`CharacterCard`]. Image-embedded cards are not decoded here.

use crate::error::CharacterError;
use serde::{Deserialize, Deserializer, Serialize};

/// Persona data consumed by context assembly.
///
/// Every text field may contain `{{user}}` / `{{char}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterCard {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub personality: String,

    #[serde(default)]
    pub scenario: String,

    #[serde(rename = "mes_example", default)]
    pub dialogue_examples: String,

    #[serde(rename = "first_mes", default)]
    pub first_message: String,
}

impl CharacterCard {
    /// Parse a V1 or V2 card from JSON. `source_name` only labels errors.
    pub fn from_json(source_name: &str, json: &str) -> Result<Self, CharacterError> {
        let raw: RawCard = serde_json::from_str(json).map_err(|e| CharacterError::Parse {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;

        let fields = match raw.data {
            Some(data) => *data,
            None => raw.fields,
        };

        let name = fields.name.trim().to_string();
        if name.is_empty() {
            return Err(CharacterError::Parse {
                source_name: source_name.to_string(),
                reason: "card has no name".into(),
            });
        }

        Ok(Self {
            name,
            description: fields.description,
            personality: fields.personality,
            scenario: fields.scenario,
            dialogue_examples: fields.mes_example,
            first_message: fields.first_mes,
        })
    }

    /// The built-in persona used when a scope has no usable character.
    pub fn fallback(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "{{char}} is a friendly, curious companion chatting with {{user}}.".into(),
            personality: String::new(),
            scenario: String::new(),
            dialogue_examples: String::new(),
            first_message: "Hello, {{user}}.".into(),
        }
    }
}

#[derive(Deserialize)]
struct RawCard {
    #[serde(flatten)]
    fields: RawFields,

    #[serde(default)]
    data: Option<Box<RawFields>>,
}

#[derive(Deserialize, Default)]
struct RawFields {
    #[serde(default, alias = "char_name")]
    name: String,

    #[serde(default, deserialize_with = "text_or_lines")]
    description: String,

    #[serde(default, alias = "char_persona", deserialize_with = "text_or_lines")]
    personality: String,

    #[serde(default, alias = "world_scenario", deserialize_with = "text_or_lines")]
    scenario: String,

    #[serde(default, alias = "example_dialogue", deserialize_with = "text_or_lines")]
    mes_example: String,

    #[serde(default, alias = "char_greeting", deserialize_with = "text_or_lines")]
    first_mes: String,
}

/// Accept a string, a list of strings (joined by newline), or null.
fn text_or_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Text>::deserialize(deserializer)? {
        Some(Text::One(s)) => s,
        Some(Text::Many(lines)) => lines.join("\n"),
        None => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v1_card() {
        let card = CharacterCard::from_json(
            "nia.json",
            r#"{"name":"Nia","description":"{{char}} is curious.","first_mes":"Oh, hi {{user}}!"}"#,
        )
        .unwrap();
        assert_eq!(card.name, "Nia");
        assert_eq!(card.description, "{{char}} is curious.");
        assert_eq!(card.first_message, "Oh, hi {{user}}!");
        assert!(card.personality.is_empty());
    }

    #[test]
    fn parses_v2_card_from_data_block() {
        let card = CharacterCard::from_json(
            "yulia.json",
            r#"{
                "spec": "chara_card_v2",
                "spec_version": "2.0",
                "data": {
                    "name": "Yulia",
                    "description": "A vampire matriarch.",
                    "personality": "stern",
                    "scenario": "A castle at night.",
                    "mes_example": ["<START>", "{{char}}: Welcome."],
                    "first_mes": "You are awake.",
                    "extensions": {"depth_prompt": {"depth": 4}}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(card.name, "Yulia");
        assert_eq!(card.dialogue_examples, "<START>\n{{char}}: Welcome.");
        assert_eq!(card.scenario, "A castle at night.");
    }

    #[test]
    fn null_fields_become_empty() {
        let card =
            CharacterCard::from_json("x", r#"{"name":"X","scenario":null,"first_mes":null}"#)
                .unwrap();
        assert!(card.scenario.is_empty());
        assert!(card.first_message.is_empty());
    }

    #[test]
    fn nameless_card_is_rejected() {
        let err = CharacterCard::from_json("blank.json", r#"{"description":"no name"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("blank.json"));
    }

    #[test]
    fn fallback_has_opening_line() {
        let card = CharacterCard::fallback("Sakana");
        assert_eq!(card.name, "Sakana");
        assert!(!card.first_message.is_empty());
    }
}
