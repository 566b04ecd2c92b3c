use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// HTTP statuses `api_request` treats as success.
pub const ACCEPTED_STATUSES: [u16; 4] = [200, 201, 202, 204];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A fully resolved outbound request, as handed to a [`super::client::Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Raw(Vec<u8>),
}

/// Status code plus body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub status: u16,
    pub body: ResponseBody,
}

impl RequestOutcome {
    /// Builds an outcome from raw bytes, keeping them as JSON when they parse.
    pub fn new(status: u16, bytes: Vec<u8>) -> Self {
        let body = match serde_json::from_slice(&bytes) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Raw(bytes),
        };
        Self { status, body }
    }

    pub fn is_accepted(&self) -> bool {
        ACCEPTED_STATUSES.contains(&self.status)
    }

    /// Deserializes the JSON body into `T`. Raw bodies deserialize from `null`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.body {
            ResponseBody::Json(value) => value.clone(),
            ResponseBody::Raw(_) => serde_json::Value::Null,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Pretty JSON when the body is JSON, lossy text otherwise.
    pub fn render(&self) -> String {
        match &self.body {
            ResponseBody::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            ResponseBody::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PipelineKind {
    Build,
    Pr,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => f.write_str("build"),
            Self::Pr => f.write_str("pr"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

/// Terminal verdict of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunResult {
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl RunResult {
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
            Self::Canceled => f.write_str("canceled"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunLinks {
    #[serde(rename = "self")]
    pub self_: Option<Link>,
}

/// Body of both the trigger response and the status response.
#[derive(Debug, Clone, Deserialize)]
pub struct RunStatus {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub state: Option<RunState>,
    #[serde(default)]
    pub result: Option<RunResult>,
    #[serde(rename = "_links", default)]
    pub links: Option<RunLinks>,
}

impl RunStatus {
    pub fn status_url(&self) -> Option<&str> {
        self.links
            .as_ref()
            .and_then(|links| links.self_.as_ref())
            .map(|link| link.href.as_str())
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == Some(RunState::InProgress)
    }
}

/// Request body for `POST {base}/{pipelineId}/runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunBody {
    pub resources: RunResources,
    pub variables: RunVariables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResources {
    pub repositories: Repositories,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repositories {
    pub common: CommonRepository,
    #[serde(rename = "self")]
    pub self_: RefOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonRepository {
    pub repository: RepositoryRef,
    pub ref_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRef {
    pub full_name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefOnly {
    pub ref_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RunVariables {
    pub notify_github_repository: RunVariable,
    pub notify_commit_sha: RunVariable,
    pub utils_pr_number: RunVariable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunVariable {
    pub is_secret: bool,
    pub value: String,
}

impl RunVariable {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            is_secret: false,
            value: value.into(),
        }
    }
}

impl RunBody {
    pub fn new(
        branch_ref: &str,
        common_repository: &str,
        notify_repository: &str,
        commit_sha: &str,
        pr_number: &str,
    ) -> Self {
        Self {
            resources: RunResources {
                repositories: Repositories {
                    common: CommonRepository {
                        repository: RepositoryRef {
                            full_name: common_repository.to_string(),
                            kind: "gitHub".to_string(),
                        },
                        ref_name: format!("refs/pull/{pr_number}/merge"),
                    },
                    self_: RefOnly {
                        ref_name: branch_ref.to_string(),
                    },
                },
            },
            variables: RunVariables {
                notify_github_repository: RunVariable::plain(notify_repository),
                notify_commit_sha: RunVariable::plain(commit_sha),
                utils_pr_number: RunVariable::plain(pr_number),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_body_shape() {
        let body = RunBody::new(
            "refs/heads/main",
            "NHSDigital/api-management-utils",
            "NHSDigital/api-management-utils",
            "abc123",
            "42",
        );

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "resources": {
                    "repositories": {
                        "common": {
                            "repository": {
                                "fullName": "NHSDigital/api-management-utils",
                                "type": "gitHub"
                            },
                            "refName": "refs/pull/42/merge"
                        },
                        "self": { "refName": "refs/heads/main" }
                    }
                },
                "variables": {
                    "NOTIFY_GITHUB_REPOSITORY": {
                        "isSecret": false,
                        "value": "NHSDigital/api-management-utils"
                    },
                    "NOTIFY_COMMIT_SHA": { "isSecret": false, "value": "abc123" },
                    "UTILS_PR_NUMBER": { "isSecret": false, "value": "42" }
                }
            })
        );
    }

    #[test]
    fn test_run_body_serialization_is_stable() {
        let build = || RunBody::new("refs/heads/main", "org/common", "org/notify", "sha", "7");

        let first = serde_json::to_vec(&build()).unwrap();
        let second = serde_json::to_vec(&build()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_outcome_keeps_non_json_body_raw() {
        let outcome = RequestOutcome::new(502, b"<html>Bad Gateway</html>".to_vec());

        assert_eq!(
            outcome.body,
            ResponseBody::Raw(b"<html>Bad Gateway</html>".to_vec())
        );
        assert_eq!(outcome.render(), "<html>Bad Gateway</html>");
        assert!(!outcome.is_accepted());
    }

    #[test]
    fn test_outcome_accepted_statuses() {
        for status in [200, 201, 202, 204] {
            assert!(RequestOutcome::new(status, Vec::new()).is_accepted());
        }
        for status in [203, 301, 401, 404, 500] {
            assert!(!RequestOutcome::new(status, Vec::new()).is_accepted());
        }
    }

    #[test]
    fn test_run_status_parsing() {
        let outcome = RequestOutcome::from_json(
            200,
            json!({
                "id": 9,
                "state": "completed",
                "result": "canceled",
                "_links": { "self": { "href": "https://x/runs/9" } }
            }),
        );

        let status: RunStatus = outcome.parse().unwrap();
        assert_eq!(status.id, Some(9));
        assert_eq!(status.state, Some(RunState::Completed));
        assert_eq!(status.result, Some(RunResult::Canceled));
        assert_eq!(status.status_url(), Some("https://x/runs/9"));
        assert!(!status.is_in_progress());
    }

    #[test]
    fn test_unrecognised_state_and_result() {
        let outcome = RequestOutcome::from_json(
            200,
            json!({ "state": "cancelling", "result": "partiallySucceeded" }),
        );

        let status: RunStatus = outcome.parse().unwrap();
        assert_eq!(status.state, Some(RunState::Unknown));
        assert_eq!(status.result, Some(RunResult::Unknown));
        assert!(status.status_url().is_none());
    }

    #[test]
    fn test_run_result_display() {
        assert_eq!(RunResult::Succeeded.to_string(), "succeeded");
        assert_eq!(RunResult::Canceled.to_string(), "canceled");
        assert!(RunResult::Succeeded.is_success());
        assert!(!RunResult::Failed.is_success());
    }
}
