//! The turn pipeline.
//!
//! Every operation on a scope runs under that scope's lock, so two turns
//! for the same scope never read the same history window or interleave
//! their appends. Different scopes proceed independently.

use crate::context::{AssembledContext, AssemblyInput, ContextAssembler};
use crate::session::{Session, SessionManager};
use chrono::Utc;
use rustedtavern_config::AppConfig;
use rustedtavern_core::error::Result;
use rustedtavern_core::history::{HistoryEntry, HistoryKey, HistoryLog};
use rustedtavern_core::provider::{Provider, ProviderRequest, Usage};
use rustedtavern_core::scope::ScopeId;
use rustedtavern_preset::OrderDiagnostic;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One inbound user message.
#[derive(Debug, Clone)]
pub struct InboundTurn {
    pub scope: ScopeId,
    /// The sender's display name, substituted for `{{user}}`
    pub nickname: String,
    pub text: String,
}

impl InboundTurn {
    pub fn new(scope: ScopeId, nickname: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            scope,
            nickname: nickname.into(),
            text: text.into(),
        }
    }
}

/// The processed reply to one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    /// Name of the character that replied
    pub character: String,
    pub usage: Option<Usage>,
}

/// Model parameters for every provider request.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// History records fed into each prompt
    pub history_depth: usize,
}

impl GenerationSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            max_tokens: Some(config.provider.max_tokens),
            history_depth: config.history_depth,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Sessions, history and the provider, wired into the turn pipeline.
pub struct ChatEngine {
    sessions: SessionManager,
    history: Arc<dyn HistoryLog>,
    provider: Arc<dyn Provider>,
    assembler: ContextAssembler,
    settings: GenerationSettings,
    scope_locks: Mutex<HashMap<ScopeId, Arc<Mutex<()>>>>,
}

impl ChatEngine {
    pub fn new(
        sessions: SessionManager,
        history: Arc<dyn HistoryLog>,
        provider: Arc<dyn Provider>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            sessions,
            history,
            provider,
            assembler: ContextAssembler::new(),
            settings,
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn history(&self) -> &Arc<dyn HistoryLog> {
        &self.history
    }

    /// The lock for `scope`. Entries nobody holds are pruned on the way, so
    /// the map only tracks scopes with work in flight.
    async fn scope_lock(&self, scope: &ScopeId) -> Arc<Mutex<()>> {
        let mut locks = self.scope_locks.lock().await;
        locks.retain(|key, lock| key == scope || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(scope.clone()).or_default())
    }

    /// Run one turn: assemble, complete, post-process, record.
    ///
    /// A provider failure is returned unchanged and nothing is recorded.
    pub async fn respond(&self, turn: InboundTurn) -> Result<TurnReply> {
        let lock = self.scope_lock(&turn.scope).await;
        let _guard = lock.lock().await;

        let session = self
            .sessions
            .get_or_create(&turn.scope, &turn.nickname)
            .await?;
        let key = session.history_key();
        let window = self
            .history
            .read_window(&key, self.settings.history_depth)
            .await?;
        let context = self.assemble(&session, &window, &turn.text);
        let received_at = Utc::now();

        debug!(
            stream = %key,
            window = window.len(),
            messages = context.messages.len(),
            estimated_tokens = context.estimated_tokens(),
            "Context assembled"
        );

        let response = self
            .provider
            .complete(ProviderRequest {
                model: self.settings.model.clone(),
                messages: context.messages,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            })
            .await?;

        let text = session.compiled_regex.process(&response.content);
        let user_turn = HistoryEntry::user(&turn.nickname, &turn.text, received_at);
        let reply_turn = HistoryEntry::reply(&session.character.name, &text, Utc::now());
        self.history.append(&key, user_turn, reply_turn).await?;

        debug!(stream = %key, provider = %self.provider.name(), "Turn recorded");

        Ok(TurnReply {
            text,
            character: session.character.name.clone(),
            usage: response.usage,
        })
    }

    /// Assemble the context a turn would send, without calling the provider.
    pub async fn preview(&self, turn: InboundTurn) -> Result<AssembledContext> {
        let lock = self.scope_lock(&turn.scope).await;
        let _guard = lock.lock().await;

        let session = self
            .sessions
            .get_or_create(&turn.scope, &turn.nickname)
            .await?;
        let window = self
            .history
            .read_window(&session.history_key(), self.settings.history_depth)
            .await?;
        Ok(self.assemble(&session, &window, &turn.text))
    }

    fn assemble(&self, session: &Session, window: &[HistoryEntry], text: &str) -> AssembledContext {
        let placeholders = session.placeholders();
        self.assembler.assemble(&AssemblyInput {
            character: &session.character,
            order: &session.compiled_order,
            placeholders: &placeholders,
            persona_description: &session.persona_description,
            history: window,
            user_message: text,
        })
    }

    pub async fn set_preset(&self, scope: &ScopeId, preset: &str) -> Result<Vec<OrderDiagnostic>> {
        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;
        self.sessions.set_preset(scope, preset).await
    }

    pub async fn set_character(&self, scope: &ScopeId, character: &str) -> Result<()> {
        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;
        self.sessions.set_character(scope, character).await
    }

    pub async fn reset_session(&self, scope: &ScopeId) -> bool {
        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;
        self.sessions.reset(scope).await
    }

    /// Truncate the history stream of the scope's current character.
    pub async fn clear_history(&self, scope: &ScopeId) -> Result<HistoryKey> {
        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;

        let key = match self.sessions.get(scope).await {
            Some(session) => session.history_key(),
            None => {
                let character = self.sessions.resolve_character(scope).await?;
                HistoryKey::new(scope.clone(), character.name.clone())
            }
        };
        self.history.clear(&key).await?;
        info!(stream = %key, "History cleared");
        Ok(key)
    }
}
