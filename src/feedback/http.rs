//! HTTP feedback providers.
//!
//! Two wire formats are supported:
//!
//! - `generic`: `POST {endpoint}` with `{"prompt": ...}`, answered by
//!   `{"status": "success" | "not_found" | "rate_limited" | "unavailable" | "error", "text": ...}`
//! - `gemini`: `POST {endpoint}/models/{model}:generateContent` with the key
//!   in the `x-goog-api-key` header, answered by
//!   `candidates[0].content.parts[0].text`
//!
//! HTTP 404, 429 and 503 map to not-found, rate-limited and unavailable for
//! both formats.

use super::provider::{FeedbackProvider, ProviderError, ProviderReply};
use super::{ProviderConfig, ProviderKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

/// A provider reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: String,
    kind: ProviderKind,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

/// Body of a `generic` provider answer.
#[derive(Debug, Deserialize)]
struct GenericAnswer {
    status: String,
    #[serde(default)]
    text: Option<String>,
}

impl HttpProvider {
    /// Build a provider from its configuration.
    ///
    /// Gemini providers need an API key; generic providers send one as a
    /// bearer token when present.
    pub fn from_config(
        config: &ProviderConfig,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = config.resolve_api_key();
        let endpoint = config.endpoint.trim_end_matches('/');

        let url = match config.kind {
            ProviderKind::Generic => endpoint.to_string(),
            ProviderKind::Gemini => {
                if api_key.is_none() {
                    return Err(ProviderError::Config(format!(
                        "provider '{}' has no API key",
                        config.name
                    )));
                }
                let model = config.model.as_deref().ok_or_else(|| {
                    ProviderError::Config(format!("provider '{}' has no model", config.name))
                })?;
                format!("{endpoint}/models/{model}:generateContent")
            }
        };

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            url,
            api_key,
            timeout,
            client,
        })
    }

    /// Request URL, without credentials.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, prompt: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(&self.url).timeout(self.timeout);
        match self.kind {
            ProviderKind::Generic => {
                let builder = builder.json(&serde_json::json!({ "prompt": prompt }));
                match &self.api_key {
                    Some(key) => builder.bearer_auth(key),
                    None => builder,
                }
            }
            ProviderKind::Gemini => builder
                .header(GEMINI_KEY_HEADER, self.api_key.as_deref().unwrap_or_default())
                .json(&serde_json::json!({
                    "contents": [{ "parts": [{ "text": prompt }] }]
                })),
        }
    }

    fn parse_success(&self, body: &serde_json::Value) -> Result<ProviderReply, ProviderError> {
        match self.kind {
            ProviderKind::Generic => {
                let answer: GenericAnswer = serde_json::from_value(body.clone())
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?;
                match answer.status.as_str() {
                    "success" => answer
                        .text
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .map(ProviderReply::Success)
                        .ok_or_else(|| ProviderError::Malformed("success without text".into())),
                    "not_found" => Ok(ProviderReply::NotFound),
                    "rate_limited" => Ok(ProviderReply::RateLimited),
                    "unavailable" => Ok(ProviderReply::Unavailable),
                    other => Ok(ProviderReply::Failed {
                        status: None,
                        detail: format!("provider status '{other}'"),
                    }),
                }
            }
            ProviderKind::Gemini => body
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(|v| v.as_str())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(ProviderReply::Success)
                .ok_or_else(|| ProviderError::Malformed("no candidate text".into())),
        }
    }
}

#[async_trait]
impl FeedbackProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<ProviderReply, ProviderError> {
        // Error text must not carry the request URL.
        let response = self.request(prompt).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Network(e.without_url().to_string())
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Ok(ProviderReply::NotFound),
            StatusCode::TOO_MANY_REQUESTS => return Ok(ProviderReply::RateLimited),
            StatusCode::SERVICE_UNAVAILABLE => return Ok(ProviderReply::Unavailable),
            s if !s.is_success() => {
                let detail = response.text().await.unwrap_or_default();
                return Ok(ProviderReply::Failed {
                    status: Some(s.as_u16()),
                    detail,
                });
            }
            _ => {}
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.without_url().to_string()))?;
        self.parse_success(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(url: &str) -> HttpProvider {
        let config = ProviderConfig::generic("local", url);
        HttpProvider::from_config(&config, reqwest::Client::new(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_generic_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .match_body(mockito::Matcher::Json(serde_json::json!({"prompt": "hi"})))
            .with_status(200)
            .with_body(r#"{"status":"success","text":"  Keep going!  "}"#)
            .create_async()
            .await;

        let provider = generic(&format!("{}/generate", server.url()));
        let reply = provider.generate("hi").await.unwrap();
        assert_eq!(reply, ProviderReply::Success("Keep going!".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_status_classes() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("POST", "/a").with_status(404).create_async().await;
        let _b = server.mock("POST", "/b").with_status(429).create_async().await;
        let _c = server.mock("POST", "/c").with_status(503).create_async().await;
        let _d = server
            .mock("POST", "/d")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let base = server.url();
        assert_eq!(
            generic(&format!("{base}/a")).generate("p").await.unwrap(),
            ProviderReply::NotFound
        );
        assert_eq!(
            generic(&format!("{base}/b")).generate("p").await.unwrap(),
            ProviderReply::RateLimited
        );
        assert_eq!(
            generic(&format!("{base}/c")).generate("p").await.unwrap(),
            ProviderReply::Unavailable
        );
        assert_eq!(
            generic(&format!("{base}/d")).generate("p").await.unwrap(),
            ProviderReply::Failed {
                status: Some(500),
                detail: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_generic_body_status_classes() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/generate")
            .with_status(200)
            .with_body(r#"{"status":"rate_limited"}"#)
            .create_async()
            .await;

        let provider = generic(&format!("{}/generate", server.url()));
        assert_eq!(
            provider.generate("p").await.unwrap(),
            ProviderReply::RateLimited
        );
    }

    #[tokio::test]
    async fn test_success_without_text_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/generate")
            .with_status(200)
            .with_body(r#"{"status":"success"}"#)
            .create_async()
            .await;

        let provider = generic(&format!("{}/generate", server.url()));
        assert!(matches!(
            provider.generate("p").await,
            Err(ProviderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_gemini_request_and_answer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
            .match_header("x-goog-api-key", "secret")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "contents": [{ "parts": [{ "text": "prompt" }] }]
            })))
            .with_status(200)
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"Great session.\n"}]}}]}"#,
            )
            .create_async()
            .await;

        let mut config = ProviderConfig::gemini("gemini-2.0-flash");
        config.endpoint = format!("{}/v1beta", server.url());
        config.api_key = Some("secret".to_string());
        let provider =
            HttpProvider::from_config(&config, reqwest::Client::new(), Duration::from_secs(5))
                .unwrap();

        let reply = provider.generate("prompt").await.unwrap();
        assert_eq!(reply, ProviderReply::Success("Great session.".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_network_error_hides_credentials() {
        // Bind and drop to find a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = ProviderConfig::gemini("gemini-pro");
        config.endpoint = format!("http://127.0.0.1:{port}");
        config.api_key = Some("SECRET123".to_string());
        let provider =
            HttpProvider::from_config(&config, reqwest::Client::new(), Duration::from_secs(5))
                .unwrap();

        let err = provider.generate("prompt").await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        let text = err.to_string();
        assert!(!text.contains("SECRET123"), "key leaked: {text}");
        assert!(!text.contains("generateContent"), "url leaked: {text}");
    }

    #[test]
    fn test_gemini_requires_key() {
        let mut config = ProviderConfig::gemini("gemini-pro");
        config.api_key = None;
        config.api_key_env = None;
        let result =
            HttpProvider::from_config(&config, reqwest::Client::new(), Duration::from_secs(5));
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }
}
