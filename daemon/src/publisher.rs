use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.github.com/graphql";
pub const DEFAULT_CLIENT_MUTATION_ID: &str = "presence-daemon";

const USER_AGENT: &str = concat!("presence-daemon/", env!("CARGO_PKG_VERSION"));

const UPDATE_STATUS_MUTATION: &str = "\
mutation UpdateStatus($input: ChangeUserStatusInput!) {
  changeUserStatus(input: $input) {
    clientMutationId
    status { message emoji expiresAt }
  }
}";

const WHOAMI_QUERY: &str = "query WhoAmI { viewer { login } }";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("undecodable response: {0}")]
    Decode(String),
    #[error("endpoint rejected the request: {0}")]
    Api(String),
}

/// Remote presence endpoint. One call replaces the currently displayed status.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        text: &str,
        emoji: &str,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

// ── GitHub ────────────────────────────────────────────────────────────────────

/// Publishes through the GitHub GraphQL `changeUserStatus` mutation.
pub struct GithubPublisher {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    client_mutation_id: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl GithubPublisher {
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        client_mutation_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
            client_mutation_id: client_mutation_id.into(),
        })
    }

    /// Login of the account the token belongs to.
    pub async fn whoami(&self) -> Result<String, PublishError> {
        let data = self.execute(json!({ "query": WHOAMI_QUERY })).await?;
        data.pointer("/viewer/login")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PublishError::Decode("missing viewer.login".to_string()))
    }

    fn status_request(&self, text: &str, emoji: &str, expires_at: DateTime<Utc>) -> Value {
        // GitHub rejects an empty emoji string; null means "no emoji".
        let emoji = (!emoji.is_empty()).then_some(emoji);
        json!({
            "query": UPDATE_STATUS_MUTATION,
            "variables": {
                "input": {
                    "clientMutationId": self.client_mutation_id,
                    "message": text,
                    "emoji": emoji,
                    "expiresAt": expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                }
            }
        })
    }

    async fn execute(&self, body: Value) -> Result<Value, PublishError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PublishError::Status(resp.status()));
        }

        let parsed = resp
            .json::<GraphQlResponse>()
            .await
            .map_err(|e| PublishError::Decode(e.to_string()))?;
        into_data(parsed)
    }
}

fn into_data(resp: GraphQlResponse) -> Result<Value, PublishError> {
    if !resp.errors.is_empty() {
        let messages: Vec<&str> = resp.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(PublishError::Api(messages.join("; ")));
    }
    resp.data
        .ok_or_else(|| PublishError::Decode("response has neither data nor errors".to_string()))
}

impl Publisher for GithubPublisher {
    async fn publish(
        &self,
        text: &str,
        emoji: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        self.execute(self.status_request(text, emoji, expires_at))
            .await
            .map(|_| ())
    }
}

// ── Log only ──────────────────────────────────────────────────────────────────

/// Dry-run publisher: logs what would have been published.
#[derive(Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

impl Publisher for LogPublisher {
    async fn publish(
        &self,
        text: &str,
        emoji: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        tracing::info!(%text, %emoji, %expires_at, "status (dry run)");
        Ok(())
    }
}
