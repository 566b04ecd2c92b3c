use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{needs_refresh, ClientCredentials, Token, TokenResponse};
use crate::config::{AzureSettings, PollingConfig};
use crate::error::{AzpipesError, Result};

use super::types::{ApiRequest, HttpMethod, RequestBody, RequestOutcome};

/// Sends a single HTTP request. Retry policy lives above this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<RequestOutcome>;
}

/// Every delay the client takes goes through here.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("azpipes/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AzpipesError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<RequestOutcome> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        Ok(RequestOutcome::new(status, bytes.to_vec()))
    }
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Delay taken before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_unit: Duration::from_millis(500),
        }
    }
}

impl From<&PollingConfig> for RetryPolicy {
    fn from(polling: &PollingConfig) -> Self {
        Self {
            max_attempts: polling.max_attempts,
            backoff_unit: polling.backoff_unit(),
        }
    }
}

/// Per-call additions to the defaults `api_request` sends.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub max_attempts: Option<u32>,
}

impl RequestOptions {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }
}

/// Authenticated Azure DevOps REST client.
///
/// Owns the bearer token for its whole lifetime and swaps it in place when
/// the API reports it expired.
pub struct AzureClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    credentials: ClientCredentials,
    login_url: String,
    scope: String,
    api_version: String,
    retry: RetryPolicy,
    token: Token,
}

impl AzureClient {
    /// Creates the client and fetches its first token.
    ///
    /// # Errors
    ///
    /// Returns [`AzpipesError::Auth`] if the token endpoint rejects the
    /// credentials, or a network error if it cannot be reached.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        credentials: ClientCredentials,
        settings: &AzureSettings,
        retry: RetryPolicy,
    ) -> Result<Self> {
        settings.validate()?;

        let token = fetch_token(
            transport.as_ref(),
            &credentials,
            &settings.login_url,
            &settings.scope,
        )
        .await?;

        Ok(Self {
            transport,
            sleeper,
            credentials,
            login_url: settings.login_url.clone(),
            scope: settings.scope.clone(),
            api_version: settings.api_version.clone(),
            retry,
            token,
        })
    }

    #[cfg(test)]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Exchanges the client credentials for a fresh bearer token.
    pub async fn authenticate(&self) -> Result<Token> {
        fetch_token(
            self.transport.as_ref(),
            &self.credentials,
            &self.login_url,
            &self.scope,
        )
        .await
    }

    async fn refresh_token(&mut self) -> Result<()> {
        warn!("Refreshing access token");
        self.token = self.authenticate().await?;
        Ok(())
    }

    pub(crate) async fn pause(&self, duration: Duration) {
        self.sleeper.sleep(duration).await;
    }

    fn build_request(
        &self,
        method: HttpMethod,
        uri: &str,
        options: &RequestOptions,
    ) -> ApiRequest {
        let query = merge_pairs(
            vec![("api-version".to_string(), self.api_version.clone())],
            &options.params,
        );
        let headers = merge_pairs(
            vec![
                ("Accept".to_string(), "application/json".to_string()),
                (
                    "Authorization".to_string(),
                    format!("Bearer {}", self.token.as_str()),
                ),
            ],
            &options.headers,
        );
        let body = options
            .body
            .clone()
            .map_or(RequestBody::Empty, RequestBody::Json);

        ApiRequest {
            method,
            url: uri.to_string(),
            query,
            headers,
            body,
        }
    }

    /// Issues an API call, retrying until the status is accepted.
    ///
    /// Before retry `n` the token is refreshed if the previous status was
    /// 203 or 401, then the client sleeps `backoff_unit * n`. Once the
    /// retries are spent the last response is returned as-is; callers must
    /// inspect its status.
    pub async fn api_request(
        &mut self,
        method: HttpMethod,
        uri: &str,
        options: RequestOptions,
    ) -> Result<RequestOutcome> {
        let max_attempts = options.max_attempts.unwrap_or(self.retry.max_attempts);

        debug!("{method} {uri}");
        let mut outcome = self
            .transport
            .send(self.build_request(method, uri, &options))
            .await?;

        let mut attempt = 0;
        while !outcome.is_accepted() {
            attempt += 1;
            if attempt > max_attempts {
                warn!(
                    "{method} {uri} still failing with status {} after {max_attempts} retries",
                    outcome.status
                );
                break;
            }

            if needs_refresh(outcome.status) {
                self.refresh_token().await?;
            }

            let delay = self.retry.backoff(attempt);
            info!(
                "{method} {uri} returned {}, retry {attempt}/{max_attempts} in {delay:?}",
                outcome.status
            );
            self.sleeper.sleep(delay).await;

            outcome = self
                .transport
                .send(self.build_request(method, uri, &options))
                .await?;
        }

        Ok(outcome)
    }
}

async fn fetch_token(
    transport: &dyn Transport,
    credentials: &ClientCredentials,
    login_url: &str,
    scope: &str,
) -> Result<Token> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        login_url.trim_end_matches('/'),
        credentials.tenant
    );
    let form = vec![
        ("client_id".to_string(), credentials.client_id.clone()),
        ("client_secret".to_string(), credentials.client_secret.clone()),
        ("grant_type".to_string(), "client_credentials".to_string()),
        ("scope".to_string(), scope.to_string()),
    ];

    let outcome = transport
        .send(ApiRequest {
            method: HttpMethod::Post,
            url,
            query: Vec::new(),
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: RequestBody::Form(form),
        })
        .await?;

    if !(200..300).contains(&outcome.status) {
        return Err(AzpipesError::Auth {
            status: outcome.status,
            body: outcome.render(),
        });
    }

    let response: TokenResponse = outcome.parse().map_err(|_| {
        AzpipesError::InvalidResponse("token response has no access_token".to_string())
    })?;

    Ok(Token::from(response.access_token))
}

/// Appends `overrides` to `defaults`, replacing entries with the same key.
fn merge_pairs(
    mut defaults: Vec<(String, String)>,
    overrides: &[(String, String)],
) -> Vec<(String, String)> {
    for (key, value) in overrides {
        match defaults
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = value.clone(),
            None => defaults.push((key.clone(), value.clone())),
        }
    }
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            tenant: "tenant-1".to_string(),
        }
    }

    fn settings(server_url: &str) -> AzureSettings {
        AzureSettings {
            base_url: format!("{server_url}/_apis/pipelines"),
            login_url: server_url.to_string(),
            ..AzureSettings::default()
        }
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=policy.max_attempts).map(|n| policy.backoff(n)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2000),
                Duration::from_millis(2500),
            ]
        );
    }

    #[test]
    fn test_merge_pairs_overrides_case_insensitively() {
        let merged = merge_pairs(
            vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("api-version".to_string(), "6.0".to_string()),
            ],
            &[
                ("accept".to_string(), "text/plain".to_string()),
                ("top".to_string(), "10".to_string()),
            ],
        );

        assert_eq!(
            merged,
            vec![
                ("Accept".to_string(), "text/plain".to_string()),
                ("api-version".to_string(), "6.0".to_string()),
                ("top".to_string(), "10".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_http_transport_authenticates_and_sends_defaults() {
        let mut server = mockito::Server::new_async().await;

        let token_mock = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
                Matcher::UrlEncoded(
                    "scope".into(),
                    "https://app.vssps.visualstudio.com/.default".into(),
                ),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"abc","token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let status_mock = server
            .mock("GET", "/_apis/pipelines/222/runs/1")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                "6.0-preview.1".into(),
            ))
            .match_header("authorization", "Bearer abc")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"state":"completed","result":"succeeded"}"#)
            .create_async()
            .await;

        let mut client = AzureClient::connect(
            Arc::new(HttpTransport::new().unwrap()),
            Arc::new(TokioSleeper),
            credentials(),
            &settings(&server.url()),
            RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(client.token().as_str(), "abc");

        let url = format!("{}/_apis/pipelines/222/runs/1", server.url());
        let outcome = client
            .api_request(HttpMethod::Get, &url, RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.status, 200);
        token_mock.assert_async().await;
        status_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_endpoint_rejection_is_fatal() {
        let mut server = mockito::Server::new_async().await;

        let token_mock = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_client"}"#)
            .expect(1)
            .create_async()
            .await;

        let result = AzureClient::connect(
            Arc::new(HttpTransport::new().unwrap()),
            Arc::new(TokioSleeper),
            credentials(),
            &settings(&server.url()),
            RetryPolicy::default(),
        )
        .await;

        match result {
            Err(AzpipesError::Auth { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_client"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected authentication to fail"),
        }
        token_mock.assert_async().await;
    }
}
