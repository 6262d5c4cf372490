//! The set of presets a session manager can activate.

use crate::model::Preset;
use crate::postprocess::RegexBundle;
use rustedtavern_core::error::PresetError;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Presets keyed by name, plus where their regex bundles live.
///
/// Regex bundles are read from disk each time they are requested so that a
/// recompile picks up edited rule files.
#[derive(Debug, Default)]
pub struct PresetRegistry {
    presets: BTreeMap<String, Preset>,
    regex_root: Option<PathBuf>,
    bundles: HashMap<String, RegexBundle>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` preset in `presets_dir`. Regex rules are looked up
    /// under `<presets_dir>/regex/<preset>/`.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub fn load_dir(presets_dir: &Path) -> Self {
        let mut registry = Self {
            regex_root: Some(presets_dir.join("regex")),
            ..Self::default()
        };

        let entries = match std::fs::read_dir(presets_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %presets_dir.display(), error = %e, "No presets directory");
                return registry;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            match Preset::load(&path) {
                Ok(preset) => registry.insert(preset),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable preset"),
            }
        }

        debug!(count = registry.presets.len(), "Preset registry loaded");
        registry
    }

    /// Add or replace a preset.
    pub fn insert(&mut self, preset: Preset) {
        self.presets.insert(preset.name.clone(), preset);
    }

    /// Attach an in-memory regex bundle, overriding any rule directory.
    pub fn insert_regex_bundle(&mut self, preset: impl Into<String>, bundle: RegexBundle) {
        self.bundles.insert(preset.into(), bundle);
    }

    pub fn get(&self, name: &str) -> Result<&Preset, PresetError> {
        self.presets
            .get(name)
            .ok_or_else(|| PresetError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    /// Preset names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// The regex rules bundled with `preset`.
    pub fn regex_bundle(&self, preset: &str) -> RegexBundle {
        if let Some(bundle) = self.bundles.get(preset) {
            return bundle.clone();
        }
        match &self.regex_root {
            Some(root) => RegexBundle::load_dir(&root.join(preset)),
            None => RegexBundle::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::RegexRule;

    #[test]
    fn loads_presets_and_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mygo.json"),
            r#"{"order": ["charDescription", "chatHistory"]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("named.json"),
            r#"{"name": "Gemini", "order": ["chatHistory"]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{{{").unwrap();

        let registry = PresetRegistry::load_dir(dir.path());
        assert_eq!(registry.names(), vec!["Gemini", "mygo"]);
        assert!(registry.get("mygo").is_ok());
        assert!(matches!(registry.get("broken"), Err(PresetError::NotFound(_))));
    }

    #[test]
    fn regex_bundle_comes_from_preset_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mygo.json"), r#"{"order": ["chatHistory"]}"#).unwrap();
        let rules = dir.path().join("regex").join("mygo");
        std::fs::create_dir_all(&rules).unwrap();
        std::fs::write(
            rules.join("strip.json"),
            r#"{"findRegex": "\\*\\*", "replaceString": ""}"#,
        )
        .unwrap();

        let registry = PresetRegistry::load_dir(dir.path());
        assert_eq!(registry.regex_bundle("mygo").rules.len(), 1);
        assert!(registry.regex_bundle("other").rules.is_empty());
    }

    #[test]
    fn in_memory_bundle_overrides_disk() {
        let mut registry = PresetRegistry::new();
        registry.insert(Preset::builtin_default());
        registry.insert_regex_bundle(
            "default",
            RegexBundle::from_rules(vec![RegexRule::new("x", "y")]),
        );
        assert_eq!(registry.regex_bundle("default").rules.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PresetRegistry::load_dir(&dir.path().join("absent"));
        assert!(registry.is_empty());
    }
}
