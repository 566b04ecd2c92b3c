mod azure;

#[cfg(test)]
pub(crate) use azure::testing;
pub use azure::{
    HttpTransport, PipelineClient, PipelineKind, RequestOutcome, RunResult, Sleeper, TokioSleeper,
    Transport,
};
