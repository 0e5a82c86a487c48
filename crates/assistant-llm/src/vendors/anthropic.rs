use crate::config::ProviderConfig;
use crate::errors::StreamFailure;
use crate::model::{ChatRole, ChatTurn};
use crate::sse::Frame;
use crate::transport::HttpRequest;

use super::{Decoded, non_blank, sampling_temperature};

/// Value sent in the `anthropic-version` header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const DELTA_EVENT: &str = "content_block_delta";
const STOP_EVENT: &str = "message_stop";
const ERROR_EVENT: &str = "error";

pub(super) fn is_valid_key(credential: Option<&str>) -> bool {
    non_blank(credential).is_some_and(|key| {
        key.starts_with("sk-ant-") && !key.chars().any(char::is_whitespace)
    })
}

/// Messages API body. System turns are folded into the top-level `system`
/// field and consecutive turns of the same role are merged, since the API
/// requires alternating roles.
pub(super) fn build_body(config: &ProviderConfig, history: &[ChatTurn]) -> serde_json::Value {
    let system = history
        .iter()
        .filter(|turn| turn.role == ChatRole::System)
        .map(|turn| turn.content.trim())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut merged: Vec<(ChatRole, String)> = Vec::new();
    // Blank turns are rejected by the API; dropping one can leave two user
    // turns adjacent, which the merge below joins.
    let turns = history
        .iter()
        .filter(|t| t.role != ChatRole::System && !t.content.trim().is_empty());
    for turn in turns {
        match merged.last_mut() {
            Some((role, content)) if *role == turn.role => {
                content.push_str("\n\n");
                content.push_str(&turn.content);
            }
            _ => merged.push((turn.role, turn.content.clone())),
        }
    }
    let messages = merged
        .into_iter()
        .map(|(role, content)| {
            serde_json::json!({
                "role": role.as_str(),
                "content": content,
            })
        })
        .collect::<Vec<_>>();

    let mut body = serde_json::json!({
        "model": config.model,
        "messages": messages,
        "max_tokens": config.max_tokens,
        "temperature": sampling_temperature(config),
        "stream": true,
    });
    if !system.is_empty() {
        body["system"] = serde_json::Value::String(system);
    }
    body
}

pub(super) fn build_request(
    config: &ProviderConfig,
    credential: Option<&str>,
    history: &[ChatTurn],
) -> Result<HttpRequest, StreamFailure> {
    let url = config.endpoint().ok_or_else(|| {
        StreamFailure::InvalidConfiguration("missing Anthropic base URL".into())
    })?;
    let key = non_blank(credential).ok_or_else(|| {
        StreamFailure::InvalidConfiguration("missing Anthropic API key".into())
    })?;
    Ok(HttpRequest::new(url, build_body(config, history))
        .with_header("x-api-key", key)
        .with_header("anthropic-version", ANTHROPIC_VERSION)
        .with_header("Accept", "text/event-stream"))
}

pub(super) fn decode_frame(frame: &Frame) -> Option<Decoded> {
    match frame.event.as_deref()? {
        DELTA_EVENT => {
            let value: serde_json::Value = serde_json::from_str(&frame.data).ok()?;
            let text = value.get("delta")?.get("text")?.as_str()?;
            if text.is_empty() {
                return None;
            }
            Some(Decoded::Delta(text.to_string()))
        }
        STOP_EVENT => Some(Decoded::Done),
        ERROR_EVENT => {
            let value: serde_json::Value = serde_json::from_str(&frame.data).ok()?;
            let error = value.get("error")?;
            let kind = error.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("stream error")
                .to_string();
            let status = if kind == "overloaded_error" { 529 } else { 500 };
            Some(Decoded::Failed(StreamFailure::Provider { status, message }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_frame(event: &str, data: &str) -> Frame {
        Frame {
            event: Some(event.into()),
            data: data.into(),
            ..Frame::default()
        }
    }

    #[test]
    fn content_block_delta_yields_text() {
        let frame = event_frame(DELTA_EVENT, r#"{"delta":{"text":"Hi"}}"#);
        assert_eq!(decode_frame(&frame), Some(Decoded::Delta("Hi".into())));
    }

    #[test]
    fn only_marked_events_carry_content() {
        let text = r#"{"delta":{"text":"Hi"}}"#;
        assert_eq!(decode_frame(&event_frame("message_delta", text)), None);
        assert_eq!(
            decode_frame(&Frame {
                data: text.into(),
                ..Frame::default()
            }),
            None
        );
        assert_eq!(
            decode_frame(&event_frame(
                DELTA_EVENT,
                r#"{"delta":{"type":"input_json_delta","partial_json":"{"}}"#
            )),
            None
        );
    }

    #[test]
    fn message_stop_is_terminal_but_done_token_is_not() {
        assert_eq!(
            decode_frame(&event_frame(STOP_EVENT, r#"{"type":"message_stop"}"#)),
            Some(Decoded::Done)
        );
        assert_eq!(
            decode_frame(&Frame {
                data: "[DONE]".into(),
                terminal: true,
                ..Frame::default()
            }),
            None
        );
    }

    #[test]
    fn overloaded_error_event_is_retryable_provider_failure() {
        let decoded = decode_frame(&event_frame(
            ERROR_EVENT,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        match decoded {
            Some(Decoded::Failed(failure)) => {
                assert!(failure.is_transient());
                assert!(matches!(failure, StreamFailure::Provider { status: 529, .. }));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn system_turns_become_top_level_field() {
        let history = vec![
            ChatTurn::system("You are a careful health assistant."),
            ChatTurn::user("I missed a dose."),
            ChatTurn::system("Switched to Anthropic."),
            ChatTurn::user("What should I do?"),
            ChatTurn::assistant("Take it when you remember."),
        ];
        let req = build_request(&ProviderConfig::anthropic(), Some("sk-ant-test"), &history)
            .expect("request");
        assert_eq!(
            req.body["system"],
            "You are a careful health assistant.\n\nSwitched to Anthropic."
        );
        let messages = req.body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "I missed a dose.\n\nWhat should I do?");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(req.header("x-api-key"), Some("sk-ant-test"));
        assert_eq!(req.header("anthropic-version"), Some(ANTHROPIC_VERSION));
        assert_eq!(req.header("authorization"), None);
    }

    #[test]
    fn system_field_is_omitted_without_system_turns() {
        let body = build_body(&ProviderConfig::anthropic(), &[ChatTurn::user("hello")]);
        assert!(body.get("system").is_none());
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn empty_assistant_reply_is_left_out_of_messages() {
        let history = [
            ChatTurn::user("first"),
            ChatTurn::assistant(""),
            ChatTurn::user("second"),
        ];
        let body = build_body(&ProviderConfig::anthropic(), &history);
        assert_eq!(
            body["messages"],
            serde_json::json!([{"role": "user", "content": "first\n\nsecond"}])
        );
    }
}
