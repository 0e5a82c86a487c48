use crate::config::ProviderConfig;
use crate::errors::StreamFailure;
use crate::model::ChatTurn;
use crate::transport::HttpRequest;

use super::{non_blank, openai};

fn valid_endpoint(config: &ProviderConfig) -> Option<String> {
    let endpoint = config.endpoint()?;
    let url = reqwest::Url::parse(&endpoint).ok()?;
    let scheme_ok = matches!(url.scheme(), "http" | "https");
    let host_ok = url.host_str().is_some_and(|h| !h.is_empty());
    (scheme_ok && host_ok).then_some(endpoint)
}

pub(super) fn is_configured(config: &ProviderConfig, credential: Option<&str>) -> bool {
    valid_endpoint(config).is_some() && (!config.auth_required || non_blank(credential).is_some())
}

pub(super) fn build_request(
    config: &ProviderConfig,
    credential: Option<&str>,
    history: &[ChatTurn],
) -> Result<HttpRequest, StreamFailure> {
    let url = valid_endpoint(config).ok_or_else(|| {
        StreamFailure::InvalidConfiguration("self-hosted base URL is missing or invalid".into())
    })?;
    let key = non_blank(credential);
    if config.auth_required && key.is_none() {
        return Err(StreamFailure::InvalidConfiguration(
            "self-hosted endpoint requires an API key".into(),
        ));
    }
    let mut request = HttpRequest::new(url, openai::build_body(config, history))
        .with_header("Accept", "text/event-stream");
    if let Some(key) = key {
        request = request.with_header("Authorization", format!("Bearer {key}"));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_http_base_url() {
        assert!(!is_configured(&ProviderConfig::compatible(), None));
        assert!(!is_configured(
            &ProviderConfig::compatible().base_url("ftp://models.local"),
            None
        ));
        assert!(!is_configured(
            &ProviderConfig::compatible().base_url("not a url"),
            None
        ));
        assert!(is_configured(
            &ProviderConfig::compatible().base_url("http://192.168.1.20:11434"),
            None
        ));
    }

    #[test]
    fn auth_required_needs_credential() {
        let config = ProviderConfig::compatible()
            .base_url("https://llm.clinic.internal")
            .auth_required(true);
        assert!(!is_configured(&config, None));
        assert!(is_configured(&config, Some("any-token")));
        assert!(matches!(
            build_request(&config, None, &[ChatTurn::user("hi")]),
            Err(StreamFailure::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn bearer_header_only_when_credential_present() {
        let config = ProviderConfig::compatible()
            .base_url("http://localhost:8000")
            .path("/api/chat");
        let anonymous = build_request(&config, None, &[ChatTurn::user("hi")]).expect("request");
        assert_eq!(anonymous.url, "http://localhost:8000/api/chat");
        assert_eq!(anonymous.header("authorization"), None);

        let with_key =
            build_request(&config, Some("local-key"), &[ChatTurn::user("hi")]).expect("request");
        assert_eq!(with_key.header("authorization"), Some("Bearer local-key"));
        assert_eq!(with_key.body["messages"][0]["content"], "hi");
    }
}
