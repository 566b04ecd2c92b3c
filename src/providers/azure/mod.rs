mod client;
mod provider;
#[cfg(test)]
pub(crate) mod testing;
mod types;


pub use client::{HttpTransport, Sleeper, TokioSleeper, Transport};
pub use provider::PipelineClient;
pub use types::{PipelineKind, RequestOutcome, RunResult};
