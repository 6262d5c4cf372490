//! The set of character cards sessions can bind to.

use rustedtavern_core::character::CharacterCard;
use rustedtavern_core::error::CharacterError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Character cards keyed by name. Cards are shared read-only between sessions.
#[derive(Debug, Default)]
pub struct CharacterRegistry {
    cards: BTreeMap<String, Arc<CharacterCard>>,
}

impl CharacterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` card in `dir`. Unreadable cards are skipped with a
    /// warning; a missing directory gives an empty registry.
    pub fn load_dir(dir: &Path) -> Self {
        let mut registry = Self::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "No characters directory");
                return registry;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            match Self::load_card(&path) {
                Ok(card) => registry.insert(card),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable character card"),
            }
        }

        debug!(count = registry.len(), "Character registry loaded");
        registry
    }

    fn load_card(path: &Path) -> Result<CharacterCard, CharacterError> {
        let json = std::fs::read_to_string(path).map_err(|e| CharacterError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        CharacterCard::from_json(&path.display().to_string(), &json)
    }

    /// Add or replace a card, keyed by its name.
    pub fn insert(&mut self, card: CharacterCard) {
        self.cards.insert(card.name.clone(), Arc::new(card));
    }

    pub fn get(&self, name: &str) -> Result<Arc<CharacterCard>, CharacterError> {
        self.cards
            .get(name)
            .cloned()
            .ok_or_else(|| CharacterError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cards.contains_key(name)
    }

    /// Card names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.cards.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_v1_and_v2_cards() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nia.json"),
            r#"{"name": "Nia", "description": "{{char}} is curious.", "first_mes": "Hi!"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("yulia.json"),
            r#"{"spec": "chara_card_v2", "data": {"name": "Yulia", "mes_example": ["a", "b"]}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = CharacterRegistry::load_dir(dir.path());
        assert_eq!(registry.names(), vec!["Nia", "Yulia"]);
        assert_eq!(registry.get("Yulia").unwrap().dialogue_examples, "a\nb");
        assert!(matches!(
            registry.get("broken"),
            Err(CharacterError::NotFound(_))
        ));
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CharacterRegistry::load_dir(&dir.path().join("absent")).is_empty());
    }
}
