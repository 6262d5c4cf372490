//! Session manager: one live session per chat scope.
//!
//! A scope is Absent until its first message, which creates an Active
//! session from the scope's bindings. Preset changes and nickname changes
//! recompile the active session in place; an explicit reset returns the
//! scope to Absent. History is never touched here.

use crate::characters::CharacterRegistry;
use rustedtavern_config::{AppConfig, BindingKind, ScopeStore};
use rustedtavern_core::character::CharacterCard;
use rustedtavern_core::error::Result;
use rustedtavern_core::history::HistoryKey;
use rustedtavern_core::placeholder::Placeholders;
use rustedtavern_core::scope::{ScopeId, ScopeKind};
use rustedtavern_preset::{
    CompiledOrder, OrderDiagnostic, Preset, PresetRegistry, RegexBundle, RegexFlags, RegexPipeline,
    compile,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// The live state for one scope.
#[derive(Debug, Clone)]
pub struct Session {
    pub scope: ScopeId,
    pub character: Arc<CharacterCard>,
    pub nickname: String,
    pub preset_name: String,
    pub persona_description: String,
    pub compiled_order: CompiledOrder,
    pub compiled_regex: RegexPipeline,
}

impl Session {
    pub fn placeholders(&self) -> Placeholders {
        Placeholders::new(&self.nickname, &self.character.name)
    }

    /// The history stream this session reads and appends.
    pub fn history_key(&self) -> HistoryKey {
        HistoryKey::new(self.scope.clone(), self.character.name.clone())
    }
}

/// Read-only summary of a session, for admin commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub scope: String,
    pub character: String,
    pub nickname: String,
    pub preset: String,
    pub regex_rules: usize,
    pub regex_skipped: usize,
    pub order_diagnostics: Vec<String>,
}

/// Active session counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub groups: usize,
    pub private: usize,
}

/// Values applied when a scope has made no choice of its own.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub fallback_character: String,
    pub default_preset: String,
    pub persona_description: String,
    pub regex_flags: RegexFlags,
}

impl SessionDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fallback_character: config.fallback_character.clone(),
            default_preset: config.default_preset.clone(),
            persona_description: config.persona_description.clone(),
            regex_flags: RegexFlags {
                case_insensitive: config.regex.case_insensitive,
                multi_line: config.regex.multi_line,
                dot_all: config.regex.dot_all,
            },
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ── Manager ───────────────────────────────────────────────────────────────

/// Owns every active session plus the registries they are built from.
///
/// Callers serialize work per scope (see `ChatEngine`); the manager itself
/// only guarantees that its map is consistent.
pub struct SessionManager {
    characters: CharacterRegistry,
    presets: PresetRegistry,
    store: Arc<dyn ScopeStore>,
    defaults: SessionDefaults,
    sessions: RwLock<HashMap<ScopeId, Arc<Session>>>,
}

impl SessionManager {
    /// The built-in `default` preset is added when the registry lacks one.
    pub fn new(
        characters: CharacterRegistry,
        mut presets: PresetRegistry,
        store: Arc<dyn ScopeStore>,
        defaults: SessionDefaults,
    ) -> Self {
        let builtin = Preset::builtin_default();
        if !presets.contains(&builtin.name) {
            presets.insert(builtin);
        }

        Self {
            characters,
            presets,
            store,
            defaults,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn characters(&self) -> &CharacterRegistry {
        &self.characters
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    pub fn store(&self) -> &Arc<dyn ScopeStore> {
        &self.store
    }

    /// The scope's session, creating it on first use. A changed nickname
    /// recompiles the regex pipeline in place.
    pub async fn get_or_create(&self, scope: &ScopeId, nickname: &str) -> Result<Arc<Session>> {
        if let Some(session) = self.sessions.read().await.get(scope) {
            if session.nickname == nickname {
                return Ok(Arc::clone(session));
            }
        }

        let existing = self.sessions.read().await.get(scope).cloned();
        let session = match existing {
            Some(current) => {
                let placeholders = Placeholders::new(nickname, &current.character.name);
                let refreshed = Session {
                    nickname: nickname.to_string(),
                    compiled_regex: self.compile_regex(&current.preset_name, &placeholders),
                    ..(*current).clone()
                };
                info!(
                    scope = %scope,
                    from = %current.nickname,
                    to = %nickname,
                    "Nickname changed, regex recompiled"
                );
                Arc::new(refreshed)
            }
            None => Arc::new(self.create(scope, nickname).await?),
        };

        self.sessions
            .write()
            .await
            .insert(scope.clone(), Arc::clone(&session));
        Ok(session)
    }

    async fn create(&self, scope: &ScopeId, nickname: &str) -> Result<Session> {
        let character = self.resolve_character(scope).await?;
        let preset_name = self.resolve_preset_name(scope).await?;
        let preset = self.presets.get(&preset_name)?;
        let compiled_order = compile(preset)?;
        let placeholders = Placeholders::new(nickname, &character.name);
        let compiled_regex = self.compile_regex(&preset_name, &placeholders);

        info!(
            scope = %scope,
            character = %character.name,
            preset = %preset_name,
            regex_rules = compiled_regex.len(),
            "Session created"
        );

        Ok(Session {
            scope: scope.clone(),
            character,
            nickname: nickname.to_string(),
            preset_name,
            persona_description: self.defaults.persona_description.clone(),
            compiled_order,
            compiled_regex,
        })
    }

    /// The character a new session in `scope` would use: the bound card, or
    /// the fallback when nothing usable is bound.
    pub async fn resolve_character(&self, scope: &ScopeId) -> Result<Arc<CharacterCard>> {
        match self.store.get(scope, BindingKind::Character).await? {
            Some(name) => match self.characters.get(&name) {
                Ok(card) => Ok(card),
                Err(e) => {
                    warn!(scope = %scope, character = %name, error = %e, "Bound character missing, using fallback");
                    Ok(self.fallback_character())
                }
            },
            None => Ok(self.fallback_character()),
        }
    }

    fn fallback_character(&self) -> Arc<CharacterCard> {
        let name = &self.defaults.fallback_character;
        self.characters
            .get(name)
            .unwrap_or_else(|_| Arc::new(CharacterCard::fallback(name.clone())))
    }

    async fn resolve_preset_name(&self, scope: &ScopeId) -> Result<String> {
        if let Some(name) = self.store.get(scope, BindingKind::Preset).await? {
            if self.presets.contains(&name) {
                return Ok(name);
            }
            warn!(scope = %scope, preset = %name, "Bound preset missing, using default");
        }

        let default = &self.defaults.default_preset;
        if self.presets.contains(default) {
            return Ok(default.clone());
        }
        warn!(preset = %default, "Configured default preset missing, using built-in");
        Ok(Preset::builtin_default().name)
    }

    fn compile_regex(&self, preset: &str, placeholders: &Placeholders) -> RegexPipeline {
        self.compile_bundle(&self.presets.regex_bundle(preset), placeholders)
    }

    fn compile_bundle(&self, bundle: &RegexBundle, placeholders: &Placeholders) -> RegexPipeline {
        RegexPipeline::compile(bundle, self.defaults.regex_flags, placeholders)
    }

    /// Switch `scope` to `preset`.
    ///
    /// The preset is compiled before anything changes; an unknown or invalid
    /// preset leaves both the binding and the session as they were. Returns
    /// the entries the compiler dropped.
    pub async fn set_preset(&self, scope: &ScopeId, preset: &str) -> Result<Vec<OrderDiagnostic>> {
        let compiled_order = compile(self.presets.get(preset)?)?;
        self.store.set(scope, BindingKind::Preset, preset).await?;

        // Rule files are read before the session map is locked.
        let bundle = self.presets.regex_bundle(preset);
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(scope).cloned() {
            let updated = Session {
                preset_name: preset.to_string(),
                compiled_regex: self.compile_bundle(&bundle, &current.placeholders()),
                compiled_order: compiled_order.clone(),
                ..(*current).clone()
            };
            sessions.insert(scope.clone(), Arc::new(updated));
        }

        info!(scope = %scope, preset, dropped = compiled_order.diagnostics().len(), "Preset switched");
        Ok(compiled_order.diagnostics().to_vec())
    }

    /// Bind `scope` to `character` and end its session, so the next message
    /// starts a fresh one on the new character's history stream.
    pub async fn set_character(&self, scope: &ScopeId, character: &str) -> Result<()> {
        self.characters.get(character)?;
        self.store.set(scope, BindingKind::Character, character).await?;
        self.sessions.write().await.remove(scope);
        info!(scope = %scope, character, "Character switched, session reset");
        Ok(())
    }

    /// Drop the scope's session. Returns whether one was active.
    pub async fn reset(&self, scope: &ScopeId) -> bool {
        let existed = self.sessions.write().await.remove(scope).is_some();
        if existed {
            info!(scope = %scope, "Session reset");
        } else {
            debug!(scope = %scope, "Reset of absent session");
        }
        existed
    }

    pub async fn get(&self, scope: &ScopeId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(scope).cloned()
    }

    pub async fn info(&self, scope: &ScopeId) -> Option<SessionInfo> {
        self.get(scope).await.map(|s| SessionInfo {
            scope: s.scope.to_string(),
            character: s.character.name.clone(),
            nickname: s.nickname.clone(),
            preset: s.preset_name.clone(),
            regex_rules: s.compiled_regex.len(),
            regex_skipped: s.compiled_regex.skipped().len(),
            order_diagnostics: s
                .compiled_order
                .diagnostics()
                .iter()
                .map(ToString::to_string)
                .collect(),
        })
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let groups = sessions
            .keys()
            .filter(|scope| scope.kind == ScopeKind::Group)
            .count();
        SessionStats {
            active: sessions.len(),
            groups,
            private: sessions.len() - groups,
        }
    }
}
