use super::errors::ProviderError;
use crate::message::Message;
use crate::model::ModelConfig;
use crate::providers::base::{Provider, ProviderUsage};
use crate::providers::formats::google::{create_request, get_usage, response_to_message};
use crate::tool::Tool;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const GOOGLE_API_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";
pub const GOOGLE_HOST_VAR: &str = "GOOGLE_HOST";

const MAX_RETRIES: u32 = 3;

#[derive(Debug)]
pub struct GoogleProvider {
    client: Client,
    host: String,
    api_key: Option<String>,
    model: ModelConfig,
    retry_base_delay: Duration,
}

impl GoogleProvider {
    /// Build a provider from `GOOGLE_API_KEY` and `GOOGLE_HOST`.
    ///
    /// A missing key is not an error here; requests fail with
    /// [`ProviderError::Authentication`] until one is configured.
    pub fn from_env(model: ModelConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(GOOGLE_API_KEY_VAR)
            .ok()
            .filter(|key| !key.is_empty());
        let host =
            std::env::var(GOOGLE_HOST_VAR).unwrap_or_else(|_| GOOGLE_API_HOST.to_string());
        Self::new(host, api_key, model)
    }

    pub fn new(
        host: String,
        api_key: Option<String>,
        model: ModelConfig,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self {
            client,
            host,
            api_key,
            model,
            retry_base_delay: Duration::from_secs(2),
        })
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn endpoint(&self) -> Result<Url, ProviderError> {
        let base_url = Url::parse(&self.host)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid base URL: {e}")))?;
        base_url
            .join(&format!(
                "v1beta/models/{}:generateContent",
                self.model.model_name
            ))
            .map_err(|e| {
                ProviderError::RequestFailed(format!("Failed to construct endpoint URL: {e}"))
            })
    }

    async fn post(&self, payload: &Value) -> Result<Value, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Authentication(format!("{GOOGLE_API_KEY_VAR} is not set"))
        })?;
        let url = self.endpoint()?;

        let mut retries = 0;
        loop {
            let response = self
                .client
                .post(url.clone())
                .header("x-goog-api-key", api_key)
                .json(payload)
                .send()
                .await?;

            match handle_response(response).await {
                Err(ProviderError::RateLimitExceeded(message)) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(ProviderError::RateLimitExceeded(format!(
                            "Max retries exceeded for rate limit error: {message}"
                        )));
                    }
                    let delay = self.retry_base_delay * 2u32.pow(retries - 1);
                    tracing::warn!(?delay, retries, "rate limited by Gemini, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

async fn handle_response(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let body: Option<Value> = response.json().await.ok();
    let detail = || {
        body.as_ref()
            .and_then(|b| b.get("error"))
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string())
    };

    match status {
        StatusCode::OK => body.ok_or_else(|| {
            ProviderError::ResponseParseError("response body is not JSON".to_string())
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ProviderError::Authentication(detail()))
        }
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimitExceeded(detail())),
        StatusCode::BAD_REQUEST if detail().contains("exceeds the maximum number of tokens") => {
            Err(ProviderError::ContextLengthExceeded(detail()))
        }
        s if s.is_server_error() => Err(ProviderError::ServerError(detail())),
        _ => Err(ProviderError::RequestFailed(format!(
            "Request failed with status {status}: {}",
            detail()
        ))),
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    #[tracing::instrument(skip(self, system, messages, tools), fields(model = %self.model.model_name))]
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, ProviderUsage), ProviderError> {
        let payload = create_request(&self.model, system, messages, tools);
        let response = self.post(&payload).await?;

        let message = response_to_message(&response)?;
        let usage = get_usage(&response);
        let model = response
            .get("modelVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.model.model_name.clone());
        tracing::debug!(?usage, "gemini completion finished");
        Ok((message, ProviderUsage::new(model, usage)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENDPOINT: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

    fn provider(server: &MockServer, key: Option<&str>) -> GoogleProvider {
        GoogleProvider::new(
            server.uri(),
            key.map(str::to_string),
            ModelConfig::new("gemini-2.5-flash".to_string()),
        )
        .unwrap()
        .with_retry_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_complete_parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("x-goog-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hello Joe"}]}}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6},
                "modelVersion": "gemini-2.5-flash-001"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (message, usage) = provider(&server, Some("secret"))
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap();
        assert_eq!(message.as_concat_text(), "Hello Joe");
        assert_eq!(usage.model, "gemini-2.5-flash-001");
        assert_eq!(usage.usage.total_tokens, Some(6));
    }

    #[tokio::test]
    async fn test_missing_key_fails_on_first_call() {
        let server = MockServer::start().await;
        let err = provider(&server, None)
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "quota exhausted"}
            })))
            .expect(u64::from(MAX_RETRIES) + 1)
            .mount(&server)
            .await;

        let err = provider(&server, Some("secret"))
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"message": "API key not valid"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server, Some("bad"))
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();
        match err {
            ProviderError::Authentication(message) => assert_eq!(message, "API key not valid"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_endpoint_follows_configured_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = GoogleProvider::new(
            server.uri(),
            Some("secret".to_string()),
            ModelConfig::new("gemini-2.5-pro".to_string()),
        )
        .unwrap();
        let (_, usage) = provider
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap();
        assert_eq!(usage.model, "gemini-2.5-pro");
    }
}
