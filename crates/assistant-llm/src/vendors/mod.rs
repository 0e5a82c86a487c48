//! Provider-specific request encoding and response decoding.
//!
//! Everything outside this module sees providers only through
//! [`ProviderKind`]; the match arms below are the single place where the three
//! wire shapes differ.
mod anthropic;
mod compatible;
mod openai;

use crate::config::ProviderConfig;
use crate::errors::StreamFailure;
use crate::model::{ChatTurn, ProviderKind};
use crate::sse::Frame;
use crate::transport::HttpRequest;

pub use anthropic::ANTHROPIC_VERSION;

/// Semantic meaning of one frame for a given provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Incremental text to append.
    Delta(String),
    /// Provider signalled end of stream.
    Done,
    /// Provider reported an error inside an otherwise healthy stream.
    Failed(StreamFailure),
}

/// Decodes one frame. Frames without usable content, including malformed
/// JSON, decode to `None`.
pub fn decode_frame(kind: ProviderKind, frame: &Frame) -> Option<Decoded> {
    match kind {
        ProviderKind::OpenAi | ProviderKind::Compatible => openai::decode_frame(frame),
        ProviderKind::Anthropic => anthropic::decode_frame(frame),
    }
}

/// Whether the backend has what it needs to accept a request.
pub fn is_configured(kind: ProviderKind, config: &ProviderConfig, credential: Option<&str>) -> bool {
    match kind {
        ProviderKind::OpenAi => config.endpoint().is_some() && openai::is_valid_key(credential),
        ProviderKind::Anthropic => {
            config.endpoint().is_some() && anthropic::is_valid_key(credential)
        }
        ProviderKind::Compatible => compatible::is_configured(config, credential),
    }
}

/// Builds the streaming request for `history`.
pub fn build_request(
    kind: ProviderKind,
    config: &ProviderConfig,
    credential: Option<&str>,
    history: &[ChatTurn],
) -> Result<HttpRequest, StreamFailure> {
    if config.model.trim().is_empty() {
        return Err(StreamFailure::InvalidConfiguration(format!(
            "{kind} model must not be empty"
        )));
    }
    match kind {
        ProviderKind::OpenAi => openai::build_request(config, credential, history),
        ProviderKind::Anthropic => anthropic::build_request(config, credential, history),
        ProviderKind::Compatible => compatible::build_request(config, credential, history),
    }
}

/// Extracts a provider error message from a non-success response body.
///
/// Used for logs and `StreamFailure::Provider`; never shown to end users.
pub(crate) fn error_message_from_body(body: &str) -> String {
    const MAX_LEN: usize = 300;
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .or_else(|| value.get("message"))
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned)
        });
    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return "empty error body".into();
    }
    message.chars().take(MAX_LEN).collect()
}

fn sampling_temperature(config: &ProviderConfig) -> f64 {
    (f64::from(config.temperature) * 100.0).round() / 100.0
}

fn non_blank(credential: Option<&str>) -> Option<&str> {
    credential.map(str::trim).filter(|c| !c.is_empty())
}
