use indexmap::IndexMap;
use log::{error, info};
use std::sync::Arc;

use crate::auth::Secrets;
use crate::config::{AzureSettings, PollingConfig, ServicePipelines};
use crate::error::Result;
use crate::providers::{
    HttpTransport, PipelineClient, PipelineKind, RunResult, Sleeper, TokioSleeper, Transport,
};

/// Produces the transport and sleeper for one service's client.
pub type Connector =
    Arc<dyn Fn() -> Result<(Arc<dyn Transport>, Arc<dyn Sleeper>)> + Send + Sync>;

pub fn http_connector() -> Connector {
    Arc::new(|| {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        Ok((transport, sleeper))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub service: String,
    pub kind: PipelineKind,
    pub pipeline_id: u64,
    pub result: RunResult,
}

/// Everything that happened for one service.
#[derive(Debug, Clone)]
pub struct ServiceOutcome {
    pub service: String,
    pub reports: Vec<RunReport>,
    pub error: Option<String>,
}

impl ServiceOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && !self.reports.is_empty()
            && self.reports.iter().all(|report| report.result.is_success())
    }
}

pub fn all_succeeded(outcomes: &[ServiceOutcome]) -> bool {
    outcomes.iter().all(ServiceOutcome::succeeded)
}

/// Pull-request deployment test: triggers each service's pipelines from an
/// independent client, all services concurrently.
pub struct DeploymentRun {
    pub settings: AzureSettings,
    pub polling: PollingConfig,
    pub secrets: Secrets,
    /// Also run the `pr` pipeline once `build` succeeded
    pub with_pr: bool,
    pub connector: Connector,
}

impl DeploymentRun {
    pub async fn run(
        &self,
        services: &IndexMap<String, ServicePipelines>,
    ) -> Vec<ServiceOutcome> {
        info!("Triggering pipelines for {} services", services.len());

        let handles: Vec<_> = services
            .iter()
            .map(|(service, pipelines)| {
                let job = ServiceJob {
                    service: service.clone(),
                    pipelines: pipelines.clone(),
                    settings: self.settings.clone(),
                    polling: self.polling.clone(),
                    secrets: self.secrets.clone(),
                    with_pr: self.with_pr,
                    connector: self.connector.clone(),
                };
                tokio::spawn(job.run())
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(services.keys())
            .map(|(joined, service)| {
                joined.unwrap_or_else(|e| ServiceOutcome {
                    service: service.clone(),
                    reports: Vec::new(),
                    error: Some(format!("job did not finish: {e}")),
                })
            })
            .collect()
    }
}

struct ServiceJob {
    service: String,
    pipelines: ServicePipelines,
    settings: AzureSettings,
    polling: PollingConfig,
    secrets: Secrets,
    with_pr: bool,
    connector: Connector,
}

impl ServiceJob {
    async fn run(self) -> ServiceOutcome {
        let mut reports = Vec::new();
        let error = match self.trigger(&mut reports).await {
            Ok(()) => None,
            Err(e) => {
                error!("{}: {e}", self.service);
                Some(e.to_string())
            }
        };

        ServiceOutcome {
            service: self.service,
            reports,
            error,
        }
    }

    async fn trigger(&self, reports: &mut Vec<RunReport>) -> Result<()> {
        let (transport, sleeper) = (self.connector)()?;
        let mut client = PipelineClient::connect(
            self.secrets.clone(),
            &self.settings,
            &self.polling,
            transport,
            sleeper,
        )
        .await?;

        let mut kinds = vec![(PipelineKind::Build, self.pipelines.build)];
        if self.with_pr {
            kinds.push((PipelineKind::Pr, self.pipelines.pr));
        }

        for (kind, pipeline_id) in kinds {
            let result = client
                .run_pipeline(&self.service, kind, pipeline_id, &self.pipelines.branch)
                .await?;
            reports.push(RunReport {
                service: self.service.clone(),
                kind,
                pipeline_id,
                result,
            });
            if !result.is_success() {
                break;
            }
        }

        Ok(())
    }
}
