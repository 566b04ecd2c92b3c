use serde::Deserialize;
use std::fmt;

use crate::error::{AzpipesError, Result};

pub const CLIENT_ID_VAR: &str = "AZ_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "AZ_CLIENT_SECRET";
pub const CLIENT_TENANT_VAR: &str = "AZ_CLIENT_TENANT";
pub const COMMIT_SHA_VAR: &str = "NOTIFY_COMMIT_SHA";
pub const PR_NUMBER_VAR: &str = "UTILS_PR_NUMBER";

/// Bearer access token issued by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Service principal used for the client-credentials grant.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// Everything a pipeline client needs from the environment.
///
/// The commit SHA and PR number are not credentials, but they arrive the
/// same way and are required for every triggered run.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub credentials: ClientCredentials,
    pub commit_sha: String,
    pub pr_number: String,
}

impl Secrets {
    /// Builds the secrets from a lookup keyed by environment variable name.
    ///
    /// # Errors
    ///
    /// Returns [`AzpipesError::MissingSecret`] naming the first variable
    /// that is unset or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(AzpipesError::MissingSecret(name))
        };

        Ok(Self {
            credentials: ClientCredentials {
                client_id: require(CLIENT_ID_VAR)?,
                client_secret: require(CLIENT_SECRET_VAR)?,
                tenant: require(CLIENT_TENANT_VAR)?,
            },
            commit_sha: require(COMMIT_SHA_VAR)?,
            pr_number: require(PR_NUMBER_VAR)?,
        })
    }
}

/// Successful response from the OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Statuses that mean the bearer token has expired or was rejected.
pub fn needs_refresh(status: u16) -> bool {
    matches!(status, 203 | 401)
}
