use crate::config::ProviderConfig;
use crate::errors::StreamFailure;
use crate::model::ChatTurn;
use crate::sse::Frame;
use crate::transport::HttpRequest;

use super::{Decoded, non_blank, sampling_temperature};

pub(super) fn is_valid_key(credential: Option<&str>) -> bool {
    non_blank(credential).is_some_and(|key| {
        key.starts_with("sk-") && !key.chars().any(char::is_whitespace)
    })
}

/// Chat completions body; also used by OpenAI-compatible servers.
pub(super) fn build_body(config: &ProviderConfig, history: &[ChatTurn]) -> serde_json::Value {
    let messages = history
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.content,
            })
        })
        .collect::<Vec<_>>();
    serde_json::json!({
        "model": config.model,
        "messages": messages,
        "temperature": sampling_temperature(config),
        "max_tokens": config.max_tokens,
        "stream": true,
    })
}

pub(super) fn build_request(
    config: &ProviderConfig,
    credential: Option<&str>,
    history: &[ChatTurn],
) -> Result<HttpRequest, StreamFailure> {
    let url = config.endpoint().ok_or_else(|| {
        StreamFailure::InvalidConfiguration("missing OpenAI base URL".into())
    })?;
    let key = non_blank(credential)
        .ok_or_else(|| StreamFailure::InvalidConfiguration("missing OpenAI API key".into()))?;
    Ok(HttpRequest::new(url, build_body(config, history))
        .with_header("Authorization", format!("Bearer {key}"))
        .with_header("Accept", "text/event-stream"))
}

pub(super) fn decode_frame(frame: &Frame) -> Option<Decoded> {
    if frame.terminal {
        return Some(Decoded::Done);
    }
    let value: serde_json::Value = serde_json::from_str(&frame.data).ok()?;
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("stream error")
            .to_string();
        return Some(Decoded::Failed(StreamFailure::Provider {
            status: 500,
            message,
        }));
    }
    let content = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if content.is_empty() {
        return None;
    }
    Some(Decoded::Delta(content.to_string()))
}
