//! Scripted transport and fixtures shared by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::audit::{AuditError, AuditEvent, AuditSink};
use crate::model::OwnerId;
use crate::transport::{ByteStream, HttpRequest, HttpStreamResponse, Transport, TransportError};

enum Body {
    Chunks(Vec<Bytes>),
    Live(mpsc::UnboundedReceiver<Result<Bytes, TransportError>>),
}

enum Step {
    Respond {
        status: u16,
        retry_after: Option<u64>,
        body: Body,
    },
    Fail(TransportError),
}

/// Sender side of a body the test feeds by hand.
pub(crate) struct LiveBody {
    tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
}

impl LiveBody {
    pub(crate) fn send(&self, chunk: &str) {
        let _ = self.tx.send(Ok(Bytes::copy_from_slice(chunk.as_bytes())));
    }

    pub(crate) fn fail(&self, err: TransportError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Transport that replays scripted responses in order and records requests.
#[derive(Default)]
pub(crate) struct FakeTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, step: Step) {
        self.steps.lock().expect("steps lock").push_back(step);
    }

    /// 200 response whose body arrives as the given chunks.
    pub(crate) fn push_sse<S: AsRef<str>>(&self, chunks: &[S]) {
        let chunks = chunks
            .iter()
            .map(|c| Bytes::copy_from_slice(c.as_ref().as_bytes()))
            .collect();
        self.push(Step::Respond {
            status: 200,
            retry_after: None,
            body: Body::Chunks(chunks),
        });
    }

    pub(crate) fn push_status(&self, status: u16, retry_after: Option<u64>, body: &str) {
        self.push(Step::Respond {
            status,
            retry_after,
            body: Body::Chunks(vec![Bytes::copy_from_slice(body.as_bytes())]),
        });
    }

    pub(crate) fn push_error(&self, err: TransportError) {
        self.push(Step::Fail(err));
    }

    /// 200 response whose body stays open until the returned handle is dropped.
    pub(crate) fn push_live(&self) -> LiveBody {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Step::Respond {
            status: 200,
            retry_after: None,
            body: Body::Live(rx),
        });
        LiveBody { tx }
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, TransportError> {
        self.requests.lock().expect("requests lock").push(request);
        let step = self.steps.lock().expect("steps lock").pop_front();
        match step {
            Some(Step::Respond {
                status,
                retry_after,
                body,
            }) => {
                let body: ByteStream = match body {
                    Body::Chunks(chunks) => {
                        Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
                    }
                    Body::Live(rx) => Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|item| (item, rx))
                    })),
                };
                Ok(HttpStreamResponse {
                    status,
                    retry_after,
                    body,
                })
            }
            Some(Step::Fail(err)) => Err(err),
            None => Err(TransportError::Connect("no scripted response".into())),
        }
    }
}

/// OpenAI-shaped event stream for `pieces`, terminated by `[DONE]`.
pub(crate) fn openai_sse(pieces: &[&str]) -> String {
    let mut out = String::new();
    for piece in pieces {
        let data = serde_json::json!({"choices":[{"delta":{"content":piece}}]});
        out.push_str(&format!("data: {data}\n\n"));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

/// One OpenAI-shaped delta frame.
pub(crate) fn openai_delta(piece: &str) -> String {
    let data = serde_json::json!({"choices":[{"delta":{"content":piece}}]});
    format!("data: {data}\n\n")
}

/// Anthropic-shaped event stream for `pieces`, terminated by `message_stop`.
pub(crate) fn anthropic_sse(pieces: &[&str]) -> String {
    let mut out = String::from("event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
    for piece in pieces {
        let data = serde_json::json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":piece}});
        out.push_str(&format!("event: content_block_delta\ndata: {data}\n\n"));
    }
    out.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    out
}

/// Audit sink that remembers every record.
#[derive(Default)]
pub(crate) struct RecordingAuditSink {
    records: Mutex<Vec<(AuditEvent, serde_json::Value)>>,
}

impl RecordingAuditSink {
    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.records
            .lock()
            .expect("records lock")
            .iter()
            .map(|(event, _)| *event)
            .collect()
    }

    pub(crate) fn records(&self) -> Vec<(AuditEvent, serde_json::Value)> {
        self.records.lock().expect("records lock").clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for RecordingAuditSink {
    async fn log(
        &self,
        event: AuditEvent,
        _owner: &OwnerId,
        metadata: serde_json::Value,
    ) -> Result<(), AuditError> {
        self.records
            .lock()
            .expect("records lock")
            .push((event, metadata));
        Ok(())
    }
}

/// Audit sink that always fails.
pub(crate) struct FailingAuditSink;

#[async_trait::async_trait]
impl AuditSink for FailingAuditSink {
    async fn log(
        &self,
        _event: AuditEvent,
        _owner: &OwnerId,
        _metadata: serde_json::Value,
    ) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("audit database offline".into()))
    }
}
