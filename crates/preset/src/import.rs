//! Import of SillyTavern chat-completion preset exports.
//!
//! SillyTavern stores fragments as a `prompts` list and keeps one prompt
//! order per character id. The global order lives under id `100001`; when
//! that is absent the first order in the file is used, and when the file has
//! no order at all the prompts are taken in list order.

use crate::model::{OrderEntry, Preset, PromptFragment};
use rustedtavern_core::error::PresetError;
use rustedtavern_core::message::Role;
use serde::Deserialize;
use tracing::{debug, info};

/// Character id SillyTavern uses for the global prompt order.
pub const GLOBAL_ORDER_ID: u64 = 100001;

#[derive(Deserialize)]
struct StExport {
    #[serde(default)]
    prompts: Vec<StPrompt>,

    #[serde(default)]
    prompt_order: Vec<StPromptOrder>,
}

#[derive(Deserialize)]
struct StPrompt {
    identifier: Option<String>,
    role: Option<String>,
    content: Option<String>,
    enabled: Option<bool>,
    marker: Option<bool>,
}

#[derive(Deserialize)]
struct StPromptOrder {
    #[serde(default)]
    character_id: serde_json::Value,

    #[serde(default)]
    order: Vec<StOrderItem>,
}

#[derive(Deserialize)]
struct StOrderItem {
    identifier: Option<String>,
    enabled: Option<bool>,
}

impl StPromptOrder {
    fn is_global(&self) -> bool {
        match &self.character_id {
            serde_json::Value::Number(n) => n.as_u64() == Some(GLOBAL_ORDER_ID),
            serde_json::Value::String(s) => s.trim() == GLOBAL_ORDER_ID.to_string(),
            _ => false,
        }
    }
}

/// Convert a SillyTavern export into a native preset named `name`.
pub fn import_sillytavern(json: &str, name: &str) -> Result<Preset, PresetError> {
    let export: StExport =
        serde_json::from_str(json).map_err(|e| PresetError::Import(e.to_string()))?;

    let fragments: Vec<PromptFragment> = export
        .prompts
        .into_iter()
        .filter_map(|p| {
            let identifier = p.identifier.filter(|id| !id.trim().is_empty())?;
            Some(PromptFragment {
                identifier,
                role: match p.role.as_deref() {
                    Some("user") => Role::User,
                    Some("assistant") => Role::Assistant,
                    _ => Role::System,
                },
                content: p.content.unwrap_or_default(),
                enabled: p.enabled.unwrap_or(true),
                is_marker: p.marker.unwrap_or(false),
            })
        })
        .collect();

    if fragments.is_empty() {
        return Err(PresetError::Import("export contains no prompts".into()));
    }

    let chosen = export
        .prompt_order
        .iter()
        .find(|o| o.is_global())
        .or_else(|| export.prompt_order.first());

    let order: Vec<OrderEntry> = match chosen {
        Some(prompt_order) => {
            debug!(character_id = %prompt_order.character_id, "Using SillyTavern prompt order");
            prompt_order
                .order
                .iter()
                .filter_map(|item| {
                    item.identifier.clone().map(|identifier| OrderEntry::Toggle {
                        identifier,
                        enabled: item.enabled.unwrap_or(true),
                    })
                })
                .collect()
        }
        None => fragments
            .iter()
            .map(|f| OrderEntry::Identifier(f.identifier.clone()))
            .collect(),
    };

    info!(
        preset = name,
        fragments = fragments.len(),
        order = order.len(),
        "Imported SillyTavern preset"
    );

    Ok(Preset {
        name: name.to_string(),
        fragments,
        order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompiledItem, compile};
    use crate::model::Marker;

    const EXPORT: &str = r#"{
        "temperature": 1.0,
        "prompts": [
            {"name": "Main Prompt", "identifier": "main", "system_prompt": true, "role": "system",
             "content": "Write {{char}}'s next reply.", "enabled": true},
            {"name": "Chat History", "identifier": "chatHistory", "system_prompt": true, "marker": true},
            {"name": "Char Description", "identifier": "charDescription", "marker": true},
            {"name": "Jailbreak", "identifier": "jailbreak", "role": "user", "content": "Stay in role."},
            {"name": "No id"}
        ],
        "prompt_order": [
            {"character_id": 100000, "order": [{"identifier": "chatHistory", "enabled": true}]},
            {"character_id": 100001, "order": [
                {"identifier": "main", "enabled": true},
                {"identifier": "charDescription", "enabled": true},
                {"identifier": "chatHistory", "enabled": true},
                {"identifier": "jailbreak", "enabled": false}
            ]}
        ]
    }"#;

    #[test]
    fn converts_prompts_and_global_order() {
        let preset = import_sillytavern(EXPORT, "mygo").unwrap();
        assert_eq!(preset.name, "mygo");
        assert_eq!(preset.fragments.len(), 4);
        assert_eq!(preset.order.len(), 4);
        assert!(!preset.order[3].enabled());
        assert_eq!(preset.fragment("jailbreak").unwrap().role, Role::User);

        let compiled = compile(&preset).unwrap();
        assert_eq!(compiled.before().len(), 2);
        assert_eq!(compiled.before()[1], CompiledItem::Marker(Marker::CharDescription));
        assert!(compiled.after().is_empty());
    }

    #[test]
    fn falls_back_to_first_order() {
        let preset = import_sillytavern(
            r#"{
                "prompts": [{"identifier": "chatHistory", "marker": true}],
                "prompt_order": [{"character_id": "7", "order": [{"identifier": "chatHistory"}]}]
            }"#,
            "x",
        )
        .unwrap();
        assert_eq!(preset.order.len(), 1);
        assert!(compile(&preset).is_ok());
    }

    #[test]
    fn without_order_uses_prompt_list() {
        let preset = import_sillytavern(
            r#"{"prompts": [{"identifier": "main", "content": "hi"}, {"identifier": "chatHistory", "marker": true}]}"#,
            "x",
        )
        .unwrap();
        let ids: Vec<&str> = preset.order.iter().map(|o| o.identifier()).collect();
        assert_eq!(ids, vec!["main", "chatHistory"]);
    }

    #[test]
    fn empty_export_is_an_error() {
        assert!(matches!(
            import_sillytavern(r#"{"prompts": []}"#, "x"),
            Err(PresetError::Import(_))
        ));
        assert!(import_sillytavern("not json", "x").is_err());
    }
}
