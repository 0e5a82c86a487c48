//! Common imports for typical assistant usage.
pub use crate::{
    Assistant, AssistantBuilder, AssistantConfig, AssistantError, CancelHandle, ChatRole,
    Conversation, ConversationSnapshot, CredentialStore, EnvCredentials, OwnerId, ProviderConfig,
    ProviderKind, RetryPolicy, StaticCredentials, StreamFailure, TurnView,
};
