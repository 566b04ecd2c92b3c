use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::auth::{ClientCredentials, Secrets};
use crate::error::{AzpipesError, Result};

use super::client::{Sleeper, Transport};
use super::types::{ApiRequest, RequestBody, ResponseBody};
pub use super::types::RequestOutcome;

impl ApiRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl RequestOutcome {
    pub fn from_json(status: u16, value: Value) -> Self {
        Self {
            status,
            body: ResponseBody::Json(value),
        }
    }
}

/// Replays canned responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<RequestOutcome>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: impl IntoIterator<Item = RequestOutcome>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn is_token_request(request: &ApiRequest) -> bool {
        request.url.ends_with("/oauth2/v2.0/token")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<RequestOutcome> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AzpipesError::InvalidResponse("response script exhausted".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub fn secrets() -> Secrets {
    Secrets {
        credentials: ClientCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            tenant: "tenant".to_string(),
        },
        commit_sha: "abc123".to_string(),
        pr_number: "42".to_string(),
    }
}

pub fn token(access_token: &str) -> RequestOutcome {
    RequestOutcome::from_json(200, json!({ "access_token": access_token }))
}

pub fn status(code: u16) -> RequestOutcome {
    RequestOutcome::from_json(code, json!({ "message": format!("status {code}") }))
}

pub fn triggered(status_url: &str) -> RequestOutcome {
    RequestOutcome::from_json(
        200,
        json!({
            "id": 1,
            "state": "inProgress",
            "_links": { "self": { "href": status_url } }
        }),
    )
}

pub fn in_progress() -> RequestOutcome {
    RequestOutcome::from_json(200, json!({ "state": "inProgress" }))
}

pub fn completed(result: &str) -> RequestOutcome {
    RequestOutcome::from_json(200, json!({ "state": "completed", "result": result }))
}

pub fn json_body(request: &ApiRequest) -> Option<&Value> {
    match &request.body {
        RequestBody::Json(value) => Some(value),
        _ => None,
    }
}
