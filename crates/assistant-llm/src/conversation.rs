//! Conversation orchestrator.
//!
//! A [`Conversation`] owns the in-memory view of one conversation, drives the
//! provider stream for each user message and keeps the store in step with it.
//! Observable state is published through a `watch` channel so a UI can render
//! partial text without holding a reference to the conversation.
//!
//! Every send goes `Idle -> Sending -> Streaming -> Idle`. While streaming
//! there is exactly one placeholder assistant turn; it is persisted once on
//! success and deleted on failure or cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assistant::AssistantInner;
use crate::audit::AuditEvent;
use crate::client::{ProviderClient, StreamOutcome};
use crate::errors::{AssistantError, StreamFailure};
use crate::model::{ChatRole, ChatTurn, ConversationId, OwnerId, ProviderKind, TurnId};
use crate::retry::RetryDecision;
use crate::store::StoredTurn;

/// One turn as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct TurnView {
    pub id: TurnId,
    pub role: ChatRole,
    pub text: String,
    /// Set only on the assistant placeholder while its response streams.
    pub streaming: bool,
}

impl From<&StoredTurn> for TurnView {
    fn from(turn: &StoredTurn) -> Self {
        Self {
            id: turn.id,
            role: turn.role,
            text: turn.text.clone(),
            streaming: false,
        }
    }
}

/// Observable projection of a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    pub provider: ProviderKind,
    pub turns: Vec<TurnView>,
    pub is_streaming: bool,
    /// Text received so far for the streaming turn; empty when idle.
    pub partial_text: String,
    pub streaming_turn: Option<TurnId>,
    pub last_error: Option<AssistantError>,
}

/// Cancels the in-flight response of a conversation from another task.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

enum StreamStep {
    Cancelled,
    Delta(String),
    Ended,
}

pub struct Conversation {
    inner: Arc<AssistantInner>,
    id: ConversationId,
    owner: OwnerId,
    provider: ProviderKind,
    turns: Vec<TurnView>,
    streaming_turn: Option<TurnId>,
    partial: String,
    last_error: Option<AssistantError>,
    client: Option<Arc<ProviderClient>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    snapshot_tx: watch::Sender<ConversationSnapshot>,
}

impl Conversation {
    pub(crate) fn new(
        inner: Arc<AssistantInner>,
        id: ConversationId,
        owner: OwnerId,
        provider: ProviderKind,
        turns: Vec<StoredTurn>,
    ) -> Self {
        let turns: Vec<TurnView> = turns.iter().map(TurnView::from).collect();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (snapshot_tx, _) = watch::channel(ConversationSnapshot {
            conversation_id: id,
            provider,
            turns: turns.clone(),
            is_streaming: false,
            partial_text: String::new(),
            streaming_turn: None,
            last_error: None,
        });
        Self {
            inner,
            id,
            owner,
            provider,
            turns,
            streaming_turn: None,
            partial: String::new(),
            last_error: None,
            client: None,
            cancel_tx,
            cancel_rx,
            snapshot_tx,
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn turns(&self) -> &[TurnView] {
        &self.turns
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_turn.is_some()
    }

    pub fn partial_text(&self) -> &str {
        &self.partial
    }

    pub fn last_error(&self) -> Option<&AssistantError> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.id,
            provider: self.provider,
            turns: self.turns.clone(),
            is_streaming: self.streaming_turn.is_some(),
            partial_text: self.partial.clone(),
            streaming_turn: self.streaming_turn,
            last_error: self.last_error.clone(),
        }
    }

    /// Receives a fresh snapshot on every state change, including each delta.
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Handle that cancels the response currently being streamed.
    ///
    /// The flag is cleared at the start of every send, so a cancel issued
    /// while idle does not affect the next message.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Sends a user message and streams the assistant reply.
    ///
    /// Returns the complete reply text. Deltas are visible through
    /// [`Conversation::subscribe`] while this future is pending.
    pub async fn send_message(&mut self, text: &str) -> Result<String, AssistantError> {
        if text.trim().is_empty() {
            return Err(AssistantError::ContentRejected("message is empty".into()));
        }
        self.ensure_idle()?;
        let client = self.prepare().await?;

        let turn = StoredTurn::new(self.id, ChatRole::User, text, true);
        let view = TurnView::from(&turn);
        if let Err(err) = self.inner.store.create_turn(turn).await {
            return Err(self.record(err.into()));
        }
        self.stream_reply(client, Some(view)).await
    }

    /// Re-sends the most recent user message.
    ///
    /// When that message has no reply (the last attempt failed), the reply is
    /// requested again without storing the message a second time.
    pub async fn retry_last_message(&mut self) -> Result<String, AssistantError> {
        self.ensure_idle()?;
        let last_user = self
            .turns
            .iter()
            .rev()
            .find(|turn| turn.role == ChatRole::User)
            .map(|turn| turn.text.clone())
            .ok_or_else(|| AssistantError::ContentRejected("no message to retry".into()))?;
        let unanswered = self
            .turns
            .last()
            .is_some_and(|turn| turn.role == ChatRole::User);
        if !unanswered {
            return self.send_message(&last_user).await;
        }
        let client = self.prepare().await?;
        self.stream_reply(client, None).await
    }

    /// Moves the conversation to another provider.
    ///
    /// A system turn records the switch; the cached client is replaced.
    pub async fn switch_provider(&mut self, kind: ProviderKind) -> Result<(), AssistantError> {
        self.ensure_idle()?;
        if kind == self.provider {
            return Ok(());
        }
        if let Err(err) = self.authorize().await {
            return Err(self.record(err));
        }
        let client = Arc::new(self.inner.client(kind));
        if !client.is_configured() {
            return Err(self.record(AssistantError::NotConfigured(kind)));
        }
        if let Err(err) = self.inner.store.set_provider(self.id, kind).await {
            return Err(self.record(err.into()));
        }

        let previous = self.provider;
        let note = StoredTurn::new(
            self.id,
            ChatRole::System,
            format!(
                "Provider switched from {} to {}.",
                previous.display_name(),
                kind.display_name()
            ),
            true,
        );
        let view = TurnView::from(&note);
        if let Err(err) = self.inner.store.create_turn(note).await {
            warn!(
                event = "conversation.switch_note_failed",
                domain = "conversation",
                conversation_id = %self.id,
                error = %err
            );
        } else {
            self.turns.push(view);
        }

        self.provider = kind;
        self.client = Some(client);
        self.last_error = None;
        self.publish();
        info!(
            event = "conversation.provider_switched",
            domain = "conversation",
            conversation_id = %self.id,
            from = %previous,
            to = %kind
        );
        self.inner
            .audit(
                AuditEvent::ProviderSwitched,
                &self.owner,
                serde_json::json!({
                    "conversation_id": self.id.to_string(),
                    "from": previous.as_str(),
                    "to": kind.as_str(),
                }),
            )
            .await;
        Ok(())
    }

    /// Cancels the active stream.
    ///
    /// While `send_message` is pending use a [`CancelHandle`] instead. Called
    /// directly, this also cleans up a placeholder left by a send future that
    /// was dropped before completing.
    pub async fn cancel_streaming(&mut self) {
        self.cancel_tx.send_replace(true);
        if let Some(client) = &self.client {
            client.cancel();
        }
        if let Some(placeholder) = self.streaming_turn {
            self.discard_placeholder(placeholder).await;
            self.last_error = Some(AssistantError::Stream(StreamFailure::Cancelled));
            self.publish();
            self.audit_outcome(&StreamFailure::Cancelled, 0).await;
        }
    }

    fn ensure_idle(&self) -> Result<(), AssistantError> {
        if self.streaming_turn.is_some() {
            return Err(AssistantError::StreamInProgress);
        }
        Ok(())
    }

    /// Ownership and configuration checks shared by every send path.
    async fn prepare(&mut self) -> Result<Arc<ProviderClient>, AssistantError> {
        if let Err(err) = self.authorize().await {
            return Err(self.record(err));
        }
        let client = self.client();
        if !client.is_configured() {
            return Err(self.record(AssistantError::NotConfigured(self.provider)));
        }
        self.cancel_tx.send_replace(false);
        Ok(client)
    }

    async fn authorize(&self) -> Result<(), AssistantError> {
        let owner = self.inner.store.fetch_owner(self.id).await?;
        if owner != self.owner {
            warn!(
                event = "conversation.access_denied",
                domain = "conversation",
                conversation_id = %self.id
            );
            return Err(AssistantError::AccessDenied(self.id));
        }
        Ok(())
    }

    fn client(&mut self) -> Arc<ProviderClient> {
        match &self.client {
            Some(client) if client.kind() == self.provider => Arc::clone(client),
            _ => {
                let client = Arc::new(self.inner.client(self.provider));
                self.client = Some(Arc::clone(&client));
                client
            }
        }
    }

    /// Creates the placeholder and streams into it.
    ///
    /// `user_turn` is the freshly stored user message. It becomes visible in
    /// the same snapshot as the placeholder, and is removed from the store
    /// again when the send fails before streaming starts.
    async fn stream_reply(
        &mut self,
        client: Arc<ProviderClient>,
        user_turn: Option<TurnView>,
    ) -> Result<String, AssistantError> {
        let placeholder = StoredTurn::new(self.id, ChatRole::Assistant, "", false);
        let placeholder_id = placeholder.id;
        if let Err(err) = self.inner.store.create_turn(placeholder).await {
            if let Some(turn) = &user_turn {
                self.delete_stored(turn.id).await;
            }
            return Err(self.record(err.into()));
        }
        let history = match self.inner.store.fetch_history(self.id).await {
            Ok(history) => history,
            Err(err) => {
                self.delete_stored(placeholder_id).await;
                if let Some(turn) = &user_turn {
                    self.delete_stored(turn.id).await;
                }
                return Err(self.record(err.into()));
            }
        };

        self.turns.extend(user_turn);
        self.turns.push(TurnView {
            id: placeholder_id,
            role: ChatRole::Assistant,
            text: String::new(),
            streaming: true,
        });
        self.streaming_turn = Some(placeholder_id);
        self.partial.clear();
        self.last_error = None;
        self.publish();

        info!(
            event = "conversation.stream_started",
            domain = "conversation",
            conversation_id = %self.id,
            provider = %self.provider,
            history_turns = history.len()
        );
        self.inner
            .audit(
                AuditEvent::MessageSent,
                &self.owner,
                serde_json::json!({
                    "conversation_id": self.id.to_string(),
                    "provider": self.provider.as_str(),
                    "history_turns": history.len(),
                }),
            )
            .await;

        let (outcome, attempts) = self.stream_with_retries(&client, &history).await;
        self.finalize(placeholder_id, outcome, attempts).await
    }

    async fn stream_with_retries(
        &mut self,
        client: &ProviderClient,
        history: &[ChatTurn],
    ) -> (StreamOutcome, u32) {
        let policy = self.inner.config.retry.clone();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            self.reset_partial();
            let failure = match self.stream_once(client, history).await {
                Ok(_) if *self.cancel_rx.borrow() => {
                    return (Err(StreamFailure::Cancelled), attempts);
                }
                Ok(text) => return (Ok(text), attempts),
                Err(StreamFailure::Cancelled) => {
                    return (Err(StreamFailure::Cancelled), attempts);
                }
                Err(failure) => failure,
            };
            match policy.decide(&failure, attempts) {
                RetryDecision::GiveUp => return (Err(failure), attempts),
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        event = "conversation.retry_scheduled",
                        domain = "conversation",
                        conversation_id = %self.id,
                        provider = %self.provider,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        code = failure.code()
                    );
                    let cancelled = tokio::select! {
                        biased;
                        _ = cancel_requested(&mut self.cancel_rx) => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        return (Err(StreamFailure::Cancelled), attempts);
                    }
                }
            }
        }
    }

    async fn stream_once(&mut self, client: &ProviderClient, history: &[ChatTurn]) -> StreamOutcome {
        let mut stream = client.stream_completion(history);
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel_requested(&mut self.cancel_rx) => StreamStep::Cancelled,
                delta = stream.next_delta() => delta.map_or(StreamStep::Ended, StreamStep::Delta),
            };
            match step {
                StreamStep::Cancelled => {
                    client.cancel();
                    return Err(StreamFailure::Cancelled);
                }
                StreamStep::Delta(delta) => self.apply_delta(&delta),
                StreamStep::Ended => return stream.finish().await,
            }
        }
    }

    fn apply_delta(&mut self, delta: &str) {
        let Some(placeholder) = self.streaming_turn else {
            return;
        };
        self.partial.push_str(delta);
        if let Some(turn) = self.turns.iter_mut().rev().find(|t| t.id == placeholder) {
            turn.text.push_str(delta);
        }
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.partial_text.push_str(delta);
            if let Some(turn) = snapshot.turns.iter_mut().rev().find(|t| t.id == placeholder) {
                turn.text.push_str(delta);
            }
        });
    }

    /// Drops text from a failed attempt before the next one starts.
    fn reset_partial(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        debug!(
            event = "conversation.partial_discarded",
            domain = "conversation",
            conversation_id = %self.id,
            chars = self.partial.chars().count()
        );
        self.partial.clear();
        if let Some(placeholder) = self.streaming_turn
            && let Some(turn) = self.turns.iter_mut().find(|t| t.id == placeholder)
        {
            turn.text.clear();
        }
        self.publish();
    }

    async fn finalize(
        &mut self,
        placeholder: TurnId,
        outcome: StreamOutcome,
        attempts: u32,
    ) -> Result<String, AssistantError> {
        match outcome {
            Ok(text) => {
                if let Err(err) = self
                    .inner
                    .store
                    .update_turn_text(placeholder, &text, true)
                    .await
                {
                    self.discard_placeholder(placeholder).await;
                    return Err(self.record(err.into()));
                }
                if let Some(turn) = self.turns.iter_mut().find(|t| t.id == placeholder) {
                    turn.text = text.clone();
                    turn.streaming = false;
                }
                self.streaming_turn = None;
                self.partial.clear();
                self.publish();
                info!(
                    event = "conversation.response_completed",
                    domain = "conversation",
                    conversation_id = %self.id,
                    provider = %self.provider,
                    chars = text.chars().count(),
                    attempts
                );
                self.inner
                    .audit(
                        AuditEvent::ResponseCompleted,
                        &self.owner,
                        serde_json::json!({
                            "conversation_id": self.id.to_string(),
                            "provider": self.provider.as_str(),
                            "chars": text.chars().count(),
                            "attempts": attempts,
                        }),
                    )
                    .await;
                Ok(text)
            }
            Err(failure) => {
                self.discard_placeholder(placeholder).await;
                let error = AssistantError::Stream(failure.clone());
                self.last_error = Some(error.clone());
                self.publish();
                self.audit_outcome(&failure, attempts).await;
                Err(error)
            }
        }
    }

    async fn audit_outcome(&self, failure: &StreamFailure, attempts: u32) {
        let action = if *failure == StreamFailure::Cancelled {
            AuditEvent::ResponseCancelled
        } else {
            AuditEvent::ResponseFailed
        };
        info!(
            event = "conversation.response_aborted",
            domain = "conversation",
            conversation_id = %self.id,
            provider = %self.provider,
            code = failure.code(),
            attempts
        );
        self.inner
            .audit(
                action,
                &self.owner,
                serde_json::json!({
                    "conversation_id": self.id.to_string(),
                    "provider": self.provider.as_str(),
                    "code": failure.code(),
                    "attempts": attempts,
                }),
            )
            .await;
    }

    async fn discard_placeholder(&mut self, placeholder: TurnId) {
        self.delete_stored(placeholder).await;
        self.turns.retain(|turn| turn.id != placeholder);
        self.streaming_turn = None;
        self.partial.clear();
    }

    async fn delete_stored(&self, turn: TurnId) {
        if let Err(err) = self.inner.store.delete_turn(turn).await {
            warn!(
                event = "conversation.turn_cleanup_failed",
                domain = "conversation",
                conversation_id = %self.id,
                turn_id = %turn,
                error = %err
            );
        }
    }

    fn record(&mut self, error: AssistantError) -> AssistantError {
        self.last_error = Some(error.clone());
        self.publish();
        error
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

async fn cancel_requested(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
