use tracing::info;

use crate::model::OwnerId;

/// Auditable actions. Metadata never contains message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    ConversationCreated,
    MessageSent,
    ResponseCompleted,
    ResponseFailed,
    ResponseCancelled,
    ProviderSwitched,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationCreated => "conversation_created",
            Self::MessageSent => "message_sent",
            Self::ResponseCompleted => "response_completed",
            Self::ResponseFailed => "response_failed",
            Self::ResponseCancelled => "response_cancelled",
            Self::ProviderSwitched => "provider_switched",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort audit trail. Callers ignore returned errors.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(
        &self,
        event: AuditEvent,
        owner: &OwnerId,
        metadata: serde_json::Value,
    ) -> Result<(), AuditError>;
}

/// Writes audit records as structured `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(
        &self,
        event: AuditEvent,
        owner: &OwnerId,
        metadata: serde_json::Value,
    ) -> Result<(), AuditError> {
        info!(
            event = "audit.record",
            domain = "audit",
            action = event.as_str(),
            owner = %owner,
            metadata = %metadata
        );
        Ok(())
    }
}
