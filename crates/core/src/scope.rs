//! Chat scopes: the addressable conversation a session and its history belong to.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Whether a scope is a shared group conversation or a direct one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Group,
    Private,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Group => "group",
            ScopeKind::Private => "private",
        }
    }
}

/// Identifies one conversation, e.g. `group:123456` or `private:alice`.
///
/// Serialized as its `kind:id` string so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeId {
    pub kind: ScopeKind,
    pub id: String,
}

impl ScopeId {
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Group,
            id: id.into(),
        }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Private,
            id: id.into(),
        }
    }

    /// File-name-safe form: `group-123456`.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.kind.as_str(), sanitize_file_component(&self.id))
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scope '{0}', expected group:<id> or private:<id>")]
pub struct ParseScopeError(pub String);

impl FromStr for ScopeId {
    type Err = ParseScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseScopeError(s.to_string()))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(ParseScopeError(s.to_string()));
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "group" => Ok(Self::group(id)),
            "private" => Ok(Self::private(id)),
            _ => Err(ParseScopeError(s.to_string())),
        }
    }
}

impl TryFrom<String> for ScopeId {
    type Error = ParseScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScopeId> for String {
    fn from(scope: ScopeId) -> Self {
        scope.to_string()
    }
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_file_component(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
