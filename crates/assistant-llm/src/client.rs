use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::credentials::CredentialStore;
use crate::errors::StreamFailure;
use crate::model::{ChatTurn, ProviderKind};
use crate::sse::{Frame, SseDecoder};
use crate::transport::{ByteStream, HttpRequest, Transport};
use crate::vendors::{self, Decoded};

/// Terminal result of one streaming call: the full text or a classified failure.
pub type StreamOutcome = Result<String, StreamFailure>;

pub(crate) const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 16 * 1024;

/// Handle used to cancel an in-flight completion.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation. The stream resolves with `StreamFailure::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Client for one provider backend.
///
/// The client is a pure function of its [`ProviderConfig`], the credential
/// lookup and the transport. It remembers the most recent stream so that
/// [`ProviderClient::cancel`] can stop it.
pub struct ProviderClient {
    kind: ProviderKind,
    config: ProviderConfig,
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    idle_timeout: Duration,
    active: Mutex<Option<AbortHandle>>,
}

impl ProviderClient {
    pub fn new(
        kind: ProviderKind,
        config: ProviderConfig,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            kind,
            config,
            credentials,
            transport,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            active: Mutex::new(None),
        }
    }

    /// Idle timeout: maximum time without any received bytes, including the
    /// wait for response headers. Each chunk restarts it.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        let credential = self.credentials.credential(self.kind);
        vendors::is_configured(self.kind, &self.config, credential.as_deref())
    }

    /// Starts a streaming completion for `history`.
    ///
    /// Never fails synchronously; build errors resolve the returned stream
    /// with `InvalidConfiguration`.
    pub fn stream_completion(&self, history: &[ChatTurn]) -> CompletionStream {
        let (delta_tx, delta_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);
        let abort = AbortHandle { tx: abort_tx };

        let credential = self.credentials.credential(self.kind);
        match vendors::build_request(self.kind, &self.config, credential.as_deref(), history) {
            Ok(request) => {
                debug!(
                    event = "llm.stream_requested",
                    domain = "llm",
                    provider = %self.kind,
                    model = %self.config.model,
                    turns = history.len()
                );
                *self.active_slot() = Some(abort.clone());
                tokio::spawn(pump(
                    self.kind,
                    Arc::clone(&self.transport),
                    request,
                    self.idle_timeout,
                    delta_tx,
                    outcome_tx,
                    abort_rx,
                ));
            }
            Err(failure) => {
                warn!(
                    event = "llm.request_invalid",
                    domain = "llm",
                    provider = %self.kind,
                    error = %failure
                );
                let _ = outcome_tx.send(Err(failure));
            }
        }

        CompletionStream {
            deltas: delta_rx,
            outcome: outcome_rx,
            abort,
        }
    }

    /// Cancels the most recent stream. Idempotent; a no-op when idle.
    pub fn cancel(&self) {
        if let Some(handle) = self.active_slot().take() {
            handle.abort();
        }
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving side of one streaming completion.
pub struct CompletionStream {
    deltas: mpsc::UnboundedReceiver<String>,
    outcome: oneshot::Receiver<StreamOutcome>,
    abort: AbortHandle,
}

impl CompletionStream {
    /// Next non-empty delta, in arrival order. `None` once the stream ended.
    pub async fn next_delta(&mut self) -> Option<String> {
        self.deltas.recv().await
    }

    /// Drains remaining deltas and returns the single outcome.
    pub async fn finish(mut self) -> StreamOutcome {
        while self.deltas.recv().await.is_some() {}
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(StreamFailure::Network(
                "stream task ended without outcome".into(),
            )),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

async fn pump(
    kind: ProviderKind,
    transport: Arc<dyn Transport>,
    request: HttpRequest,
    idle_timeout: Duration,
    delta_tx: mpsc::UnboundedSender<String>,
    outcome_tx: oneshot::Sender<StreamOutcome>,
    mut abort_rx: watch::Receiver<bool>,
) {
    let started = Instant::now();
    let outcome = drive(kind, transport, request, idle_timeout, &delta_tx, &mut abort_rx).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        Ok(text) => info!(
            event = "llm.stream_completed",
            domain = "llm",
            provider = %kind,
            chars = text.chars().count(),
            elapsed_ms
        ),
        Err(StreamFailure::Cancelled) => info!(
            event = "llm.stream_cancelled",
            domain = "llm",
            provider = %kind,
            elapsed_ms
        ),
        Err(failure) => warn!(
            event = "llm.stream_failed",
            domain = "llm",
            provider = %kind,
            code = failure.code(),
            error = %failure,
            elapsed_ms
        ),
    }
    drop(delta_tx);
    let _ = outcome_tx.send(outcome);
}

async fn drive(
    kind: ProviderKind,
    transport: Arc<dyn Transport>,
    request: HttpRequest,
    idle_timeout: Duration,
    delta_tx: &mpsc::UnboundedSender<String>,
    abort_rx: &mut watch::Receiver<bool>,
) -> StreamOutcome {
    if *abort_rx.borrow() {
        return Err(StreamFailure::Cancelled);
    }

    let response = tokio::select! {
        biased;
        _ = aborted(abort_rx) => return Err(StreamFailure::Cancelled),
        opened = tokio::time::timeout(idle_timeout, transport.open_stream(request)) => match opened {
            Err(_) => return Err(StreamFailure::Timeout),
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(response)) => response,
        },
    };
    debug!(
        event = "llm.stream_opened",
        domain = "llm",
        provider = %kind,
        status = response.status
    );

    let success = response.is_success();
    let status = response.status;
    let retry_after = response.retry_after;
    let mut body = response.body;
    if !success {
        let text = match status {
            401 | 403 | 429 => String::new(),
            _ => tokio::select! {
                biased;
                _ = aborted(abort_rx) => return Err(StreamFailure::Cancelled),
                text = read_error_body(&mut body, idle_timeout) => text,
            },
        };
        return Err(classify_status(status, retry_after, &text));
    }

    let mut decoder = SseDecoder::default();
    let mut text = String::new();
    let deadline = tokio::time::sleep(idle_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = aborted(abort_rx) => {
                decoder.reset();
                return Err(StreamFailure::Cancelled);
            }
            _ = delta_tx.closed() => {
                decoder.reset();
                return Err(StreamFailure::Cancelled);
            }
            _ = &mut deadline => {
                decoder.reset();
                return Err(StreamFailure::Timeout);
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    deadline.as_mut().reset(Instant::now() + idle_timeout);
                    for frame in decoder.feed(&bytes) {
                        if let Some(outcome) = apply_frame(kind, &frame, &mut text, delta_tx) {
                            return outcome;
                        }
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    if let Some(frame) = decoder.finish()
                        && let Some(outcome) = apply_frame(kind, &frame, &mut text, delta_tx)
                    {
                        return outcome;
                    }
                    debug!(
                        event = "llm.stream_eof",
                        domain = "llm",
                        provider = %kind,
                        chars = text.chars().count()
                    );
                    return Ok(text);
                }
            },
        }
    }
}

fn apply_frame(
    kind: ProviderKind,
    frame: &Frame,
    text: &mut String,
    delta_tx: &mpsc::UnboundedSender<String>,
) -> Option<StreamOutcome> {
    match vendors::decode_frame(kind, frame)? {
        Decoded::Delta(delta) => {
            text.push_str(&delta);
            let _ = delta_tx.send(delta);
            None
        }
        Decoded::Done => Some(Ok(std::mem::take(text))),
        Decoded::Failed(failure) => Some(Err(failure)),
    }
}

/// Resolves once the abort flag is set. Pends forever if every handle is gone.
async fn aborted(abort_rx: &mut watch::Receiver<bool>) {
    if abort_rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn read_error_body(body: &mut ByteStream, idle_timeout: Duration) -> String {
    let mut buf = Vec::new();
    while buf.len() < ERROR_BODY_LIMIT {
        match tokio::time::timeout(idle_timeout, body.next()).await {
            Ok(Some(Ok(chunk))) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(ERROR_BODY_LIMIT);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Maps a non-success HTTP status to the failure taxonomy.
pub(crate) fn classify_status(status: u16, retry_after: Option<u64>, body: &str) -> StreamFailure {
    match status {
        401 | 403 => StreamFailure::AuthenticationFailed,
        429 => StreamFailure::RateLimited { retry_after },
        _ => StreamFailure::Provider {
            status,
            message: vendors::error_message_from_body(body),
        },
    }
}
