//! Feedback generation with ordered provider failover.
//!
//! [`FeedbackGenerator::generate`] always returns text. Providers are tried
//! in priority order, each up to `tries_per_provider` times:
//!
//! | reply                         | next step                               |
//! |-------------------------------|-----------------------------------------|
//! | success                       | return the text                         |
//! | not found, rate limited       | skip to the next provider               |
//! | unavailable                   | wait `backoff`, retry the same provider |
//! | network error, other failure  | retry the same provider at once         |
//!
//! A provider that runs out of tries hands over to the next one. With no
//! providers configured the generator answers [`DISABLED_FEEDBACK`]; when
//! every provider is exhausted it answers [`UNAVAILABLE_FEEDBACK`].
//!
//! Worst-case latency is `providers × tries × (request_timeout + backoff)`,
//! and the whole call is additionally capped by `ceiling`.

pub mod http;
pub mod provider;

pub use http::HttpProvider;
pub use provider::{FeedbackProvider, ProviderError, ProviderReply};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Returned when no provider is configured.
pub const DISABLED_FEEDBACK: &str = "Good work today. Keep it up!";

/// Returned when every provider failed.
pub const UNAVAILABLE_FEEDBACK: &str =
    "Automatic feedback based on your session data is unavailable right now.";

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Wire format of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Generic,
    Gemini,
}

/// One entry in the provider priority list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name used in logs
    pub name: String,
    pub kind: ProviderKind,
    /// Base URL (gemini) or full generate URL (generic)
    pub endpoint: String,
    /// Model name, required for gemini
    #[serde(default)]
    pub model: Option<String>,
    /// Inline credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the credential
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    /// A generic provider at `endpoint`.
    pub fn generic(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Generic,
            endpoint: endpoint.into(),
            model: None,
            api_key: None,
            api_key_env: None,
        }
    }

    /// A Gemini model reading its key from `GEMINI_API_KEY`.
    pub fn gemini(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            name: model.clone(),
            kind: ProviderKind::Gemini,
            endpoint: GEMINI_ENDPOINT.to_string(),
            model: Some(model),
            api_key: None,
            api_key_env: Some("GEMINI_API_KEY".to_string()),
        }
    }

    /// Inline key if set, otherwise the environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// Providers and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Providers in priority order
    pub providers: Vec<ProviderConfig>,
    /// Attempts per provider
    pub tries_per_provider: u32,
    /// Pause before retrying an unavailable provider
    #[serde(with = "crate::config::duration_secs")]
    pub backoff: Duration,
    /// Timeout of one provider request
    #[serde(with = "crate::config::duration_secs")]
    pub request_timeout: Duration,
    /// Cap on one whole `generate` call
    #[serde(with = "crate::config::duration_secs")]
    pub ceiling: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig::gemini("gemini-2.0-flash"),
                ProviderConfig::gemini("gemini-flash-latest"),
                ProviderConfig::gemini("gemini-pro"),
            ],
            tries_per_provider: 2,
            backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            ceiling: Duration::from_secs(60),
        }
    }
}

/// Retry and failover settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub tries_per_provider: u32,
    pub backoff: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries_per_provider: 2,
            backoff: Duration::from_secs(2),
            ceiling: Duration::from_secs(60),
        }
    }
}

/// Position in the provider list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    provider: usize,
    attempt: u32,
}

impl Cursor {
    fn start() -> Self {
        Self {
            provider: 0,
            attempt: 0,
        }
    }

    fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }

    fn next_provider(self) -> Self {
        Self {
            provider: self.provider + 1,
            attempt: 0,
        }
    }
}

/// What to do after one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Done(String),
    NextProvider,
    Retry { backoff: bool },
}

impl Step {
    fn from_result(result: Result<ProviderReply, ProviderError>) -> Self {
        match result {
            Ok(ProviderReply::Success(text)) => Step::Done(text),
            Ok(ProviderReply::NotFound) | Ok(ProviderReply::RateLimited) => Step::NextProvider,
            Ok(ProviderReply::Unavailable) => Step::Retry { backoff: true },
            Ok(ProviderReply::Failed { .. }) | Err(_) => Step::Retry { backoff: false },
        }
    }
}

/// Produces commentary text for report prompts.
#[derive(Clone)]
pub struct FeedbackGenerator {
    providers: Vec<Arc<dyn FeedbackProvider>>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for FeedbackGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("FeedbackGenerator")
            .field("providers", &names)
            .field("policy", &self.policy)
            .finish()
    }
}

impl FeedbackGenerator {
    pub fn new(providers: Vec<Arc<dyn FeedbackProvider>>, policy: RetryPolicy) -> Self {
        Self { providers, policy }
    }

    /// A generator that always answers [`DISABLED_FEEDBACK`].
    pub fn disabled() -> Self {
        Self::new(Vec::new(), RetryPolicy::default())
    }

    /// Build HTTP providers from configuration.
    ///
    /// Providers without usable credentials are skipped with a warning.
    pub fn from_config(config: &FeedbackConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        let mut providers: Vec<Arc<dyn FeedbackProvider>> = Vec::new();
        for provider_config in &config.providers {
            match HttpProvider::from_config(provider_config, client.clone(), config.request_timeout)
            {
                Ok(provider) => providers.push(Arc::new(provider)),
                Err(e) => tracing::warn!("Skipping feedback provider: {}", e),
            }
        }

        if providers.is_empty() {
            tracing::info!("No feedback provider configured; using canned feedback");
        }

        Ok(Self::new(
            providers,
            RetryPolicy {
                tries_per_provider: config.tries_per_provider.max(1),
                backoff: config.backoff,
                ceiling: config.ceiling,
            },
        ))
    }

    /// Whether any provider is configured.
    pub fn is_enabled(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Generate commentary for `prompt`. Never fails.
    pub async fn generate(&self, prompt: &str) -> String {
        if self.providers.is_empty() {
            return DISABLED_FEEDBACK.to_string();
        }

        match tokio::time::timeout(self.policy.ceiling, self.try_providers(prompt)).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::warn!("All feedback providers failed");
                UNAVAILABLE_FEEDBACK.to_string()
            }
            Err(_) => {
                tracing::warn!(
                    "Feedback generation abandoned after {:?}",
                    self.policy.ceiling
                );
                UNAVAILABLE_FEEDBACK.to_string()
            }
        }
    }

    async fn try_providers(&self, prompt: &str) -> Option<String> {
        let tries = self.policy.tries_per_provider.max(1);
        let mut cursor = Cursor::start();

        while let Some(provider) = self.providers.get(cursor.provider) {
            let result = provider.generate(prompt).await;
            if let Err(ref e) = result {
                tracing::debug!(provider = provider.name(), "Provider call failed: {}", e);
            }

            cursor = match Step::from_result(result) {
                Step::Done(text) => {
                    tracing::debug!(
                        provider = provider.name(),
                        attempt = cursor.attempt + 1,
                        "Feedback generated"
                    );
                    return Some(text);
                }
                Step::NextProvider => {
                    tracing::info!(
                        provider = provider.name(),
                        "Provider not usable, moving to next"
                    );
                    cursor.next_provider()
                }
                Step::Retry { .. } if cursor.attempt + 1 >= tries => {
                    tracing::info!(
                        provider = provider.name(),
                        "Provider out of tries, moving to next"
                    );
                    cursor.next_provider()
                }
                Step::Retry { backoff } => {
                    if backoff {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                    cursor.next_attempt()
                }
            };
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted results and counts calls. Repeats the last one.
    struct FakeProvider {
        name: String,
        script: Mutex<VecDeque<Result<ProviderReply, ProviderError>>>,
        last: Mutex<Option<ProviderReply>>,
        calls: AtomicUsize,
        hang: bool,
    }

    impl FakeProvider {
        fn new(name: &str, script: Vec<Result<ProviderReply, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                hang: false,
            })
        }

        fn always(name: &str, reply: ProviderReply) -> Arc<Self> {
            let provider = Self::new(name, Vec::new());
            *provider.last.lock().unwrap() = Some(reply);
            provider
        }

        fn hanging(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(VecDeque::new()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                hang: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedbackProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _prompt: &str) -> Result<ProviderReply, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                return next;
            }
            match self.last.lock().unwrap().clone() {
                Some(reply) => Ok(reply),
                None => Err(ProviderError::Timeout),
            }
        }
    }

    fn generator(providers: Vec<Arc<FakeProvider>>) -> FeedbackGenerator {
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn FeedbackProvider>)
            .collect();
        FeedbackGenerator::new(providers, RetryPolicy::default())
    }

    fn success(text: &str) -> ProviderReply {
        ProviderReply::Success(text.to_string())
    }

    #[tokio::test]
    async fn test_disabled_without_providers() {
        let generator = FeedbackGenerator::disabled();
        assert!(!generator.is_enabled());
        assert_eq!(generator.generate("prompt").await, DISABLED_FEEDBACK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_fails_over_without_retry() {
        let a = FakeProvider::always("a", ProviderReply::NotFound);
        let b = FakeProvider::always("b", success("from b"));
        let generator = generator(vec![a.clone(), b.clone()]);

        assert_eq!(generator.generate("prompt").await, "from b");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_fails_over_without_retry() {
        let a = FakeProvider::always("a", ProviderReply::RateLimited);
        let b = FakeProvider::always("b", success("ok"));
        let generator = generator(vec![a.clone(), b.clone()]);

        assert_eq!(generator.generate("prompt").await, "ok");
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_unavailable_exhausts_every_try() {
        let providers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| FakeProvider::always(n, ProviderReply::Unavailable))
            .collect();
        let generator = generator(providers.clone());

        let started = tokio::time::Instant::now();
        assert_eq!(generator.generate("prompt").await, UNAVAILABLE_FEEDBACK);

        let total: usize = providers.iter().map(|p| p.calls()).sum();
        assert_eq!(total, 3 * 2);
        // One backoff per provider, between its two tries.
        assert_eq!(started.elapsed(), Duration::from_secs(3 * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_then_retry_after_unavailable() {
        let a = FakeProvider::new("a", vec![Err(ProviderError::Timeout), Err(ProviderError::Timeout)]);
        let b = FakeProvider::new(
            "b",
            vec![Ok(ProviderReply::Unavailable), Ok(success("b on try 2"))],
        );
        let generator = generator(vec![a.clone(), b.clone()]);

        let started = tokio::time::Instant::now();
        assert_eq!(generator.generate("prompt").await, "b on try 2");
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
        // Network errors do not back off; the unavailable reply does.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_short_circuits() {
        let a = FakeProvider::always("a", success("first"));
        let b = FakeProvider::always("b", success("second"));
        let generator = generator(vec![a.clone(), b.clone()]);

        assert_eq!(generator.generate("prompt").await, "first");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failures_retry_without_backoff() {
        let a = FakeProvider::new(
            "a",
            vec![
                Ok(ProviderReply::Failed {
                    status: Some(500),
                    detail: "internal".to_string(),
                }),
                Ok(success("recovered")),
            ],
        );
        let generator = generator(vec![a.clone()]);

        let started = tokio::time::Instant::now();
        assert_eq!(generator.generate("prompt").await, "recovered");
        assert_eq!(a.calls(), 2);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_bounds_hanging_provider() {
        let a = FakeProvider::hanging("a");
        let generator = FeedbackGenerator::new(
            vec![a.clone() as Arc<dyn FeedbackProvider>],
            RetryPolicy {
                ceiling: Duration::from_secs(30),
                ..RetryPolicy::default()
            },
        );

        let started = tokio::time::Instant::now();
        assert_eq!(generator.generate("prompt").await, UNAVAILABLE_FEEDBACK);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_step_classification() {
        assert_eq!(
            Step::from_result(Ok(ProviderReply::NotFound)),
            Step::NextProvider
        );
        assert_eq!(
            Step::from_result(Ok(ProviderReply::Unavailable)),
            Step::Retry { backoff: true }
        );
        assert_eq!(
            Step::from_result(Err(ProviderError::Network("refused".into()))),
            Step::Retry { backoff: false }
        );
    }

    #[test]
    fn test_from_config_skips_providers_without_keys() {
        let config = FeedbackConfig {
            providers: vec![ProviderConfig {
                api_key_env: Some("FOCUS_TELEMETRY_TEST_UNSET_KEY".to_string()),
                ..ProviderConfig::gemini("gemini-pro")
            }],
            ..FeedbackConfig::default()
        };
        let generator = FeedbackGenerator::from_config(&config).unwrap();
        assert!(!generator.is_enabled());
    }

    #[tokio::test]
    async fn test_http_failover_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("POST", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let working = server
            .mock("POST", "/working")
            .with_status(200)
            .with_body(r#"{"status":"success","text":"Steady focus."}"#)
            .expect(1)
            .create_async()
            .await;

        let config = FeedbackConfig {
            providers: vec![
                ProviderConfig::generic("missing", format!("{}/missing", server.url())),
                ProviderConfig::generic("working", format!("{}/working", server.url())),
            ],
            ..FeedbackConfig::default()
        };
        let generator = FeedbackGenerator::from_config(&config).unwrap();

        assert_eq!(generator.generate("prompt").await, "Steady focus.");
        missing.assert_async().await;
        working.assert_async().await;
    }
}
