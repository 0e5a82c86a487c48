use std::collections::HashMap;

use crate::model::ProviderKind;

/// Read-only lookup of provider credentials.
///
/// Implementations may be backed by a keychain, a secrets manager or the
/// process environment. Values are never logged.
pub trait CredentialStore: Send + Sync {
    fn credential(&self, kind: ProviderKind) -> Option<String>;
}

/// Reads `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and `COMPATIBLE_API_KEY`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    pub fn variable(kind: ProviderKind) -> &'static str {
        match kind {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Compatible => "COMPATIBLE_API_KEY",
        }
    }
}

impl CredentialStore for EnvCredentials {
    fn credential(&self, kind: ProviderKind) -> Option<String> {
        std::env::var(Self::variable(kind))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// In-memory credentials, mostly for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    values: HashMap<ProviderKind, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ProviderKind, credential: impl Into<String>) -> Self {
        self.values.insert(kind, credential.into());
        self
    }
}

impl CredentialStore for StaticCredentials {
    fn credential(&self, kind: ProviderKind) -> Option<String> {
        self.values.get(&kind).cloned()
    }
}
