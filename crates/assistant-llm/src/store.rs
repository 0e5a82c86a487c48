//! Conversation persistence seam.
//!
//! The orchestrator only talks to [`ConversationStore`]; encryption at rest is
//! the store implementation's concern. [`InMemoryConversationStore`] is the
//! reference implementation used by tests and the demo.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::errors::StoreError;
use crate::model::{ChatRole, ChatTurn, ConversationId, OwnerId, ProviderKind, TurnId};

/// One persisted turn.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoredTurn {
    pub id: TurnId,
    pub conversation_id: ConversationId,
    pub role: ChatRole,
    pub text: String,
    /// `false` while an assistant placeholder is still streaming.
    pub complete: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredTurn {
    pub fn new(
        conversation_id: ConversationId,
        role: ChatRole,
        text: impl Into<String>,
        complete: bool,
    ) -> Self {
        Self {
            id: TurnId::new(),
            conversation_id,
            role,
            text: text.into(),
            complete,
            created_at: Utc::now(),
        }
    }

    pub fn to_chat_turn(&self) -> ChatTurn {
        ChatTurn::new(self.role, self.text.clone())
    }
}

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        owner: &OwnerId,
        provider: ProviderKind,
    ) -> Result<ConversationId, StoreError>;

    async fn fetch_owner(&self, id: ConversationId) -> Result<OwnerId, StoreError>;

    async fn fetch_provider(&self, id: ConversationId) -> Result<ProviderKind, StoreError>;

    async fn set_provider(&self, id: ConversationId, provider: ProviderKind)
    -> Result<(), StoreError>;

    async fn create_turn(&self, turn: StoredTurn) -> Result<(), StoreError>;

    async fn update_turn_text(
        &self,
        id: TurnId,
        text: &str,
        complete: bool,
    ) -> Result<(), StoreError>;

    async fn delete_turn(&self, id: TurnId) -> Result<(), StoreError>;

    /// All turns of a conversation in creation order.
    async fn fetch_turns(&self, id: ConversationId) -> Result<Vec<StoredTurn>, StoreError>;

    /// Provider context: complete turns only, in order.
    async fn fetch_history(&self, id: ConversationId) -> Result<Vec<ChatTurn>, StoreError> {
        Ok(self
            .fetch_turns(id)
            .await?
            .iter()
            .filter(|turn| turn.complete)
            .map(StoredTurn::to_chat_turn)
            .collect())
    }
}

#[derive(Debug)]
struct ConversationRecord {
    owner: OwnerId,
    provider: ProviderKind,
    turns: Vec<StoredTurn>,
}

/// Process-local store backed by `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<ConversationId, ConversationRecord>,
    turn_index: DashMap<TurnId, ConversationId>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn conversation_of(&self, turn: TurnId) -> Result<ConversationId, StoreError> {
        self.turn_index
            .get(&turn)
            .map(|entry| *entry.value())
            .ok_or(StoreError::TurnNotFound(turn))
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_conversation(
        &self,
        owner: &OwnerId,
        provider: ProviderKind,
    ) -> Result<ConversationId, StoreError> {
        let id = ConversationId::new();
        self.conversations.insert(
            id,
            ConversationRecord {
                owner: owner.clone(),
                provider,
                turns: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn fetch_owner(&self, id: ConversationId) -> Result<OwnerId, StoreError> {
        self.conversations
            .get(&id)
            .map(|record| record.owner.clone())
            .ok_or(StoreError::ConversationNotFound(id))
    }

    async fn fetch_provider(&self, id: ConversationId) -> Result<ProviderKind, StoreError> {
        self.conversations
            .get(&id)
            .map(|record| record.provider)
            .ok_or(StoreError::ConversationNotFound(id))
    }

    async fn set_provider(
        &self,
        id: ConversationId,
        provider: ProviderKind,
    ) -> Result<(), StoreError> {
        let mut record = self
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::ConversationNotFound(id))?;
        record.provider = provider;
        Ok(())
    }

    async fn create_turn(&self, turn: StoredTurn) -> Result<(), StoreError> {
        let conversation_id = turn.conversation_id;
        let turn_id = turn.id;
        let mut record = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        record.turns.push(turn);
        drop(record);
        self.turn_index.insert(turn_id, conversation_id);
        Ok(())
    }

    async fn update_turn_text(
        &self,
        id: TurnId,
        text: &str,
        complete: bool,
    ) -> Result<(), StoreError> {
        let conversation_id = self.conversation_of(id)?;
        let mut record = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        let turn = record
            .turns
            .iter_mut()
            .find(|turn| turn.id == id)
            .ok_or(StoreError::TurnNotFound(id))?;
        turn.text = text.to_string();
        turn.complete = complete;
        Ok(())
    }

    async fn delete_turn(&self, id: TurnId) -> Result<(), StoreError> {
        let conversation_id = self.conversation_of(id)?;
        if let Some(mut record) = self.conversations.get_mut(&conversation_id) {
            record.turns.retain(|turn| turn.id != id);
        }
        self.turn_index.remove(&id);
        Ok(())
    }

    async fn fetch_turns(&self, id: ConversationId) -> Result<Vec<StoredTurn>, StoreError> {
        self.conversations
            .get(&id)
            .map(|record| record.turns.clone())
            .ok_or(StoreError::ConversationNotFound(id))
    }
}
