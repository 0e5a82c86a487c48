use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::client::ProviderClient;
use crate::config::AssistantConfig;
use crate::conversation::Conversation;
use crate::credentials::{CredentialStore, EnvCredentials};
use crate::errors::{AssistantError, StreamFailure};
use crate::model::{ConversationId, OwnerId, ProviderKind};
use crate::store::{ConversationStore, InMemoryConversationStore};
use crate::transport::{ReqwestTransport, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct AssistantInner {
    pub(crate) config: AssistantConfig,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Arc<dyn ConversationStore>,
    pub(crate) audit: Arc<dyn AuditSink>,
}

impl AssistantInner {
    pub(crate) fn client(&self, kind: ProviderKind) -> ProviderClient {
        ProviderClient::new(
            kind,
            self.config.provider(kind).clone(),
            Arc::clone(&self.credentials),
            Arc::clone(&self.transport),
        )
        .with_idle_timeout(self.config.idle_timeout())
    }

    /// Records an audit event. Sink failures are logged and otherwise ignored.
    pub(crate) async fn audit(
        &self,
        action: AuditEvent,
        owner: &OwnerId,
        metadata: serde_json::Value,
    ) {
        if let Err(err) = self.audit.log(action, owner, metadata).await {
            warn!(
                event = "audit.failed",
                domain = "audit",
                action = action.as_str(),
                error = %err
            );
        }
    }
}

/// Entry point for creating and restoring conversations.
#[derive(Clone)]
pub struct Assistant {
    pub(crate) inner: Arc<AssistantInner>,
}

impl Assistant {
    pub fn builder() -> AssistantBuilder {
        AssistantBuilder::default()
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.inner.config
    }

    /// Whether `kind` currently has a usable credential and endpoint.
    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.inner.client(kind).is_configured()
    }

    /// Providers that can serve requests right now.
    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.is_configured(*kind))
            .collect()
    }

    /// Creates a new empty conversation owned by `owner`.
    pub async fn create_conversation(
        &self,
        owner: impl Into<OwnerId>,
        provider: ProviderKind,
    ) -> Result<Conversation, AssistantError> {
        let owner = owner.into();
        let id = self.inner.store.create_conversation(&owner, provider).await?;
        info!(
            event = "conversation.created",
            domain = "conversation",
            conversation_id = %id,
            provider = %provider
        );
        self.inner
            .audit(
                AuditEvent::ConversationCreated,
                &owner,
                serde_json::json!({
                    "conversation_id": id.to_string(),
                    "provider": provider.as_str(),
                }),
            )
            .await;
        Ok(Conversation::new(
            Arc::clone(&self.inner),
            id,
            owner,
            provider,
            Vec::new(),
        ))
    }

    /// Restores a stored conversation after checking that `owner` owns it.
    ///
    /// Placeholder turns left behind by an interrupted stream are removed.
    pub async fn open_conversation(
        &self,
        owner: impl Into<OwnerId>,
        id: ConversationId,
    ) -> Result<Conversation, AssistantError> {
        let owner = owner.into();
        let stored_owner = self.inner.store.fetch_owner(id).await?;
        if stored_owner != owner {
            warn!(
                event = "conversation.access_denied",
                domain = "conversation",
                conversation_id = %id
            );
            return Err(AssistantError::AccessDenied(id));
        }
        let provider = self.inner.store.fetch_provider(id).await?;
        let mut turns = self.inner.store.fetch_turns(id).await?;
        let stale: Vec<_> = turns
            .iter()
            .filter(|turn| !turn.complete)
            .map(|turn| turn.id)
            .collect();
        for turn_id in &stale {
            if let Err(err) = self.inner.store.delete_turn(*turn_id).await {
                warn!(
                    event = "conversation.stale_turn_cleanup_failed",
                    domain = "conversation",
                    conversation_id = %id,
                    error = %err
                );
            }
        }
        turns.retain(|turn| turn.complete);
        info!(
            event = "conversation.opened",
            domain = "conversation",
            conversation_id = %id,
            turns = turns.len(),
            stale_turns = stale.len()
        );
        Ok(Conversation::new(
            Arc::clone(&self.inner),
            id,
            owner,
            provider,
            turns,
        ))
    }
}

/// Builder for wiring collaborators into an [`Assistant`].
///
/// Unset collaborators default to environment credentials, a reqwest
/// transport, an in-memory store and a tracing audit sink.
#[derive(Default)]
pub struct AssistantBuilder {
    config: Option<AssistantConfig>,
    credentials: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn ConversationStore>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl AssistantBuilder {
    pub fn config(mut self, config: AssistantConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Builds the assistant and validates timing settings.
    pub fn build(self) -> Result<Assistant, AssistantError> {
        let config = self.config.unwrap_or_default();
        if config.idle_timeout_ms == 0 {
            return Err(StreamFailure::InvalidConfiguration(
                "idle timeout must be greater than zero".into(),
            )
            .into());
        }
        if config.retry.max_attempts == 0 {
            return Err(StreamFailure::InvalidConfiguration(
                "retry policy needs at least one attempt".into(),
            )
            .into());
        }
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(CONNECT_TIMEOUT)?),
        };
        Ok(Assistant {
            inner: Arc::new(AssistantInner {
                config,
                credentials: self
                    .credentials
                    .unwrap_or_else(|| Arc::new(EnvCredentials)),
                transport,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryConversationStore::new())),
                audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::model::ChatRole;
    use crate::retry::RetryPolicy;
    use crate::store::StoredTurn;
    use crate::test_support::{FakeTransport, RecordingAuditSink};

    fn assistant(store: Arc<InMemoryConversationStore>, audit: Arc<RecordingAuditSink>) -> Assistant {
        Assistant::builder()
            .credentials(Arc::new(
                StaticCredentials::new().with(ProviderKind::OpenAi, "sk-test"),
            ))
            .transport(FakeTransport::new())
            .store(store)
            .audit(audit)
            .build()
            .expect("assistant")
    }

    #[test]
    fn build_rejects_zero_attempt_policy() {
        let result = Assistant::builder()
            .config(AssistantConfig::default().with_retry(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::standard()
            }))
            .transport(FakeTransport::new())
            .build();
        assert!(matches!(
            result,
            Err(AssistantError::Stream(StreamFailure::InvalidConfiguration(message))) if message.contains("attempt")
        ));
    }

    #[test]
    fn configured_providers_follow_credentials() {
        let assistant = assistant(
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(RecordingAuditSink::default()),
        );
        assert_eq!(assistant.configured_providers(), vec![ProviderKind::OpenAi]);
        assert!(!assistant.is_configured(ProviderKind::Anthropic));
    }

    #[tokio::test]
    async fn create_conversation_is_audited() {
        let audit = Arc::new(RecordingAuditSink::default());
        let assistant = assistant(Arc::new(InMemoryConversationStore::new()), Arc::clone(&audit));
        let conversation = assistant
            .create_conversation("patient-1", ProviderKind::OpenAi)
            .await
            .expect("create");
        assert_eq!(conversation.provider(), ProviderKind::OpenAi);
        assert_eq!(audit.events(), vec![AuditEvent::ConversationCreated]);
    }

    #[tokio::test]
    async fn open_conversation_checks_owner_and_drops_stale_placeholders() {
        let store = Arc::new(InMemoryConversationStore::new());
        let assistant = assistant(Arc::clone(&store), Arc::new(RecordingAuditSink::default()));
        let owner = OwnerId::from("patient-1");
        let id = store
            .create_conversation(&owner, ProviderKind::Anthropic)
            .await
            .expect("create");
        store
            .create_turn(StoredTurn::new(id, ChatRole::User, "Is ibuprofen safe?", true))
            .await
            .expect("user");
        store
            .create_turn(StoredTurn::new(id, ChatRole::Assistant, "", false))
            .await
            .expect("placeholder");

        let denied = assistant.open_conversation("someone-else", id).await;
        assert!(matches!(denied, Err(AssistantError::AccessDenied(denied_id)) if denied_id == id));

        let conversation = assistant
            .open_conversation(owner, id)
            .await
            .expect("open");
        assert_eq!(conversation.provider(), ProviderKind::Anthropic);
        assert_eq!(conversation.snapshot().turns.len(), 1);
        assert_eq!(store.fetch_turns(id).await.expect("turns").len(), 1);
    }

    #[tokio::test]
    async fn open_missing_conversation_is_not_found() {
        let assistant = assistant(
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(RecordingAuditSink::default()),
        );
        let missing = ConversationId::new();
        let result = assistant.open_conversation("patient-1", missing).await;
        assert!(matches!(result, Err(AssistantError::ConversationNotFound(id)) if id == missing));
    }
}
