use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Secrets;
use crate::config::{AzureSettings, PollingConfig};
use crate::error::{AzpipesError, Result};
use crate::output::{print_response, print_run_result};

use super::client::{
    AzureClient, HttpTransport, RequestOptions, RetryPolicy, Sleeper, TokioSleeper, Transport,
};
use super::types::{HttpMethod, PipelineKind, RunBody, RunResult, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` polls until the run leaves `inProgress`
    pub max_polls: Option<u32>,
}

impl From<&PollingConfig> for PollSettings {
    fn from(polling: &PollingConfig) -> Self {
        Self {
            interval: polling.interval(),
            max_polls: polling.max_polls,
        }
    }
}

/// Triggers Azure DevOps pipeline runs and waits for their verdict.
///
/// Each instance owns its own credential and HTTP session, so separate
/// services can be driven concurrently from separate clients.
pub struct PipelineClient {
    client: AzureClient,
    base_url: String,
    common_repository: String,
    notify_repository: String,
    commit_sha: String,
    pr_number: String,
    polling: PollSettings,
}

impl PipelineClient {
    /// Builds a client over the real HTTP stack.
    pub async fn new(
        secrets: Secrets,
        settings: &AzureSettings,
        polling: &PollingConfig,
    ) -> Result<Self> {
        Self::connect(
            secrets,
            settings,
            polling,
            Arc::new(HttpTransport::new()?),
            Arc::new(TokioSleeper),
        )
        .await
    }

    /// Builds a client over the given transport and sleeper, authenticating
    /// before returning.
    pub async fn connect(
        secrets: Secrets,
        settings: &AzureSettings,
        polling: &PollingConfig,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let client = AzureClient::connect(
            transport,
            sleeper,
            secrets.credentials,
            settings,
            RetryPolicy::from(polling),
        )
        .await?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            common_repository: settings.common_repository.clone(),
            notify_repository: settings.notify_repository.clone(),
            commit_sha: secrets.commit_sha,
            pr_number: secrets.pr_number,
            polling: PollSettings::from(polling),
        })
    }

    pub fn runs_url(&self, pipeline_id: u64) -> String {
        format!("{}/{pipeline_id}/runs", self.base_url)
    }

    pub fn build_request_body(&self, branch_ref: &str) -> RunBody {
        RunBody::new(
            branch_ref,
            &self.common_repository,
            &self.notify_repository,
            &self.commit_sha,
            &self.pr_number,
        )
    }

    /// Triggers `pipeline_id` on `branch_ref` and waits for the run to finish.
    ///
    /// A trigger that does not answer 200 reports [`RunResult::Failed`]
    /// without polling.
    ///
    /// # Errors
    ///
    /// Returns an error if a token refresh fails, the transport fails, the
    /// trigger response carries no status link, or `max_polls` is exceeded.
    pub async fn run_pipeline(
        &mut self,
        service: &str,
        kind: PipelineKind,
        pipeline_id: u64,
        branch_ref: &str,
    ) -> Result<RunResult> {
        let run_url = self.runs_url(pipeline_id);
        let body = serde_json::to_value(self.build_request_body(branch_ref))?;

        info!("Triggering {service} {kind} pipeline {pipeline_id} on {branch_ref}");
        let response = self
            .client
            .api_request(HttpMethod::Post, &run_url, RequestOptions::json(body))
            .await?;
        print_response(&response, &format!("Initial request to {run_url}"));

        if response.status != 200 {
            warn!(
                "Triggering pipeline: {service} {kind} failed, status code: {}",
                response.status
            );
            print_run_result(service, kind, RunResult::Failed);
            return Ok(RunResult::Failed);
        }

        let run: RunStatus = response.parse()?;
        let status_url = run
            .status_url()
            .ok_or(AzpipesError::MissingStatusLink)?
            .to_string();
        info!("Run {:?} created, polling {status_url}", run.id);

        let result = self.wait_for_completion(&status_url).await?;
        print_run_result(service, kind, result);
        Ok(result)
    }

    /// Polls `status_url` while the run reports `inProgress`.
    async fn wait_for_completion(&mut self, status_url: &str) -> Result<RunResult> {
        let mut polls = 0;
        let mut waited = Duration::ZERO;

        loop {
            let response = self
                .client
                .api_request(HttpMethod::Get, status_url, RequestOptions::default())
                .await?;
            polls += 1;
            print_response(
                &response,
                &format!("Response from {status_url} after {} seconds", waited.as_secs()),
            );

            let status: RunStatus = match response.parse() {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "Unreadable status response (HTTP {}): {e}, treating run as failed",
                        response.status
                    );
                    return Ok(RunResult::Failed);
                }
            };

            if !status.is_in_progress() {
                info!(
                    "Run left inProgress after {polls} polls (HTTP {}): {:?}",
                    response.status, status.state
                );
                return Ok(status.result.unwrap_or_else(|| {
                    warn!("Status response carried no result, treating run as failed");
                    RunResult::Failed
                }));
            }

            if self.polling.max_polls.is_some_and(|max| polls >= max) {
                return Err(AzpipesError::PollTimeout { polls });
            }

            self.client.pause(self.polling.interval).await;
            waited += self.polling.interval;
        }
    }
}
