//! Per-scope key-value store for character and preset choices.
//!
//! Administrative commands set these; the session manager reads them when a
//! scope's session is first created. The JSON backend rewrites the whole file
//! atomically on every change.

use async_trait::async_trait;
use rustedtavern_core::error::ScopeStoreError;
use rustedtavern_core::fs::write_atomic;
use rustedtavern_core::scope::ScopeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Which per-scope choice a binding records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Character,
    Preset,
}

/// Narrow get/set/list interface over scope bindings.
#[async_trait]
pub trait ScopeStore: Send + Sync {
    async fn get(&self, scope: &ScopeId, kind: BindingKind)
    -> Result<Option<String>, ScopeStoreError>;

    async fn set(
        &self,
        scope: &ScopeId,
        kind: BindingKind,
        value: &str,
    ) -> Result<(), ScopeStoreError>;

    /// All bindings of `kind`, ordered by scope.
    async fn list(&self, kind: BindingKind) -> Result<Vec<(ScopeId, String)>, ScopeStoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Bindings {
    #[serde(default)]
    characters: BTreeMap<ScopeId, String>,

    #[serde(default)]
    presets: BTreeMap<ScopeId, String>,
}

impl Bindings {
    fn table(&self, kind: BindingKind) -> &BTreeMap<ScopeId, String> {
        match kind {
            BindingKind::Character => &self.characters,
            BindingKind::Preset => &self.presets,
        }
    }

    fn table_mut(&mut self, kind: BindingKind) -> &mut BTreeMap<ScopeId, String> {
        match kind {
            BindingKind::Character => &mut self.characters,
            BindingKind::Preset => &mut self.presets,
        }
    }
}

/// Bindings persisted to a JSON file.
pub struct JsonScopeStore {
    path: PathBuf,
    bindings: Mutex<Bindings>,
}

impl JsonScopeStore {
    /// Open the store at `path`. A missing file reads as empty and is only
    /// created on the first `set`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ScopeStoreError> {
        let path = path.into();
        let bindings = Self::load(&path)?;
        debug!(
            path = %path.display(),
            characters = bindings.characters.len(),
            presets = bindings.presets.len(),
            "Scope bindings loaded"
        );
        Ok(Self {
            path,
            bindings: Mutex::new(bindings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Bindings, ScopeStoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Bindings::default()),
            Err(e) => {
                return Err(ScopeStoreError::Read {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(Bindings::default());
        }

        serde_json::from_str(&content).map_err(|e| ScopeStoreError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ScopeStore for JsonScopeStore {
    async fn get(
        &self,
        scope: &ScopeId,
        kind: BindingKind,
    ) -> Result<Option<String>, ScopeStoreError> {
        Ok(self.bindings.lock().await.table(kind).get(scope).cloned())
    }

    async fn set(
        &self,
        scope: &ScopeId,
        kind: BindingKind,
        value: &str,
    ) -> Result<(), ScopeStoreError> {
        let mut guard = self.bindings.lock().await;

        // Write the new state first; memory only changes if the disk did.
        let mut next = guard.clone();
        next.table_mut(kind).insert(scope.clone(), value.to_string());

        let json = serde_json::to_vec_pretty(&next).map_err(|e| ScopeStoreError::Write {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, &json).map_err(|e| ScopeStoreError::Write {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        *guard = next;
        debug!(scope = %scope, ?kind, value, "Scope binding saved");
        Ok(())
    }

    async fn list(&self, kind: BindingKind) -> Result<Vec<(ScopeId, String)>, ScopeStoreError> {
        Ok(self
            .bindings
            .lock()
            .await
            .table(kind)
            .iter()
            .map(|(scope, value)| (scope.clone(), value.clone()))
            .collect())
    }
}

/// Process-local bindings, for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryScopeStore {
    bindings: Mutex<Bindings>,
}

impl InMemoryScopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScopeStore for InMemoryScopeStore {
    async fn get(
        &self,
        scope: &ScopeId,
        kind: BindingKind,
    ) -> Result<Option<String>, ScopeStoreError> {
        Ok(self.bindings.lock().await.table(kind).get(scope).cloned())
    }

    async fn set(
        &self,
        scope: &ScopeId,
        kind: BindingKind,
        value: &str,
    ) -> Result<(), ScopeStoreError> {
        self.bindings
            .lock()
            .await
            .table_mut(kind)
            .insert(scope.clone(), value.to_string());
        Ok(())
    }

    async fn list(&self, kind: BindingKind) -> Result<Vec<(ScopeId, String)>, ScopeStoreError> {
        Ok(self
            .bindings
            .lock()
            .await
            .table(kind)
            .iter()
            .map(|(scope, value)| (scope.clone(), value.clone()))
            .collect())
    }
}
