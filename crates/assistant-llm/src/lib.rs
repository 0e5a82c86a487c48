//! Streaming LLM provider layer for a conversational health assistant.
//!
//! Talks to hosted OpenAI, hosted Anthropic or a self-hosted
//! OpenAI-compatible server, streams replies token by token and keeps the
//! conversation store consistent across retries, failures and cancellation.
//!
//! # Usage
//!
//! ```no_run
//! use assistant_llm::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), AssistantError> {
//! let assistant = Assistant::builder()
//!     .config(AssistantConfig::from_env())
//!     .build()?;
//!
//! let mut conversation = assistant
//!     .create_conversation("patient-42", ProviderKind::OpenAi)
//!     .await?;
//!
//! let mut updates = conversation.subscribe();
//! tokio::spawn(async move {
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow().clone();
//!         print!("\r{}", snapshot.partial_text);
//!     }
//! });
//!
//! let reply = conversation.send_message("How much water should I drink?").await?;
//! println!("\n{reply}");
//! # Ok(())
//! # }
//! ```

/// Assistant entry point and builder.
pub mod assistant;
/// Audit trail collaborator.
pub mod audit;
/// Provider client and streaming handle.
pub mod client;
/// Provider and assistant configuration.
pub mod config;
/// Conversation orchestrator and observable snapshot.
pub mod conversation;
/// Credential lookup collaborator.
pub mod credentials;
/// Public error types.
pub mod errors;
/// Provider kinds, chat turns and identifiers.
pub mod model;
/// Logging bootstrap.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Retry and backoff policy.
pub mod retry;
/// Incremental server-sent events parser.
pub mod sse;
/// Conversation persistence collaborator.
pub mod store;
/// HTTP transport seam.
pub mod transport;
/// Per-provider request encoding and frame decoding.
pub mod vendors;

#[cfg(test)]
pub(crate) mod test_support;

pub use assistant::{Assistant, AssistantBuilder};
pub use audit::{AuditError, AuditEvent, AuditSink, TracingAuditSink};
pub use client::{AbortHandle, CompletionStream, ProviderClient, StreamOutcome};
pub use config::{AssistantConfig, ProviderConfig};
pub use conversation::{CancelHandle, Conversation, ConversationSnapshot, TurnView};
pub use credentials::{CredentialStore, EnvCredentials, StaticCredentials};
pub use errors::{AssistantError, StoreError, StreamFailure};
pub use model::{ChatRole, ChatTurn, ConversationId, OwnerId, ProviderKind, TurnId};
pub use observability::init_observability;
pub use retry::{RetryDecision, RetryPolicy};
pub use sse::{Frame, SseDecoder};
pub use store::{ConversationStore, InMemoryConversationStore, StoredTurn};
pub use transport::{HttpRequest, HttpStreamResponse, ReqwestTransport, Transport, TransportError};
