use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzpipesError {
    #[error("Missing required secret: environment variable {0} is not set")]
    MissingSecret(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authentication failed (status {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pipeline run response has no self status link")]
    MissingStatusLink,

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Pipeline run still in progress after {polls} polls")]
    PollTimeout { polls: u32 },
}

pub type Result<T> = std::result::Result<T, AzpipesError>;
