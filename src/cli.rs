use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use log::info;
use std::path::PathBuf;

use crate::auth::{
    Secrets, CLIENT_ID_VAR, CLIENT_SECRET_VAR, CLIENT_TENANT_VAR, COMMIT_SHA_VAR, PR_NUMBER_VAR,
};
use crate::config::{Config, ServicePipelines};
use crate::output::print_summary;
use crate::providers::{PipelineClient, PipelineKind};
use crate::runner::{all_succeeded, http_connector, DeploymentRun};

#[derive(Parser)]
#[command(name = "azpipes")]
#[command(author, version, about = "Azure DevOps pipeline trigger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./azpipes.{toml,json,yaml,yml} when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds between status polls
    #[arg(long, global = true)]
    interval_secs: Option<u64>,

    /// Stop waiting after this many in-progress polls
    #[arg(long, global = true)]
    max_polls: Option<u32>,

    #[command(flatten)]
    secrets: SecretArgs,
}

/// Service principal and pull-request identity, normally supplied by CI
/// through the environment.
#[derive(Args, Default)]
struct SecretArgs {
    #[arg(long, global = true, env = "AZ_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    #[arg(long, global = true, env = "AZ_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, global = true, env = "AZ_CLIENT_TENANT", hide_env_values = true)]
    client_tenant: Option<String>,

    /// Commit reported back to GitHub by the notify step
    #[arg(long, global = true, env = "NOTIFY_COMMIT_SHA", hide_env_values = true)]
    commit_sha: Option<String>,

    /// Pull request whose merge ref is checked out as `common`
    #[arg(long, global = true, env = "UTILS_PR_NUMBER", hide_env_values = true)]
    pr_number: Option<String>,
}

impl SecretArgs {
    fn resolve(&self) -> crate::error::Result<Secrets> {
        Secrets::from_lookup(|name| {
            let value = match name {
                CLIENT_ID_VAR => &self.client_id,
                CLIENT_SECRET_VAR => &self.client_secret,
                CLIENT_TENANT_VAR => &self.client_tenant,
                COMMIT_SHA_VAR => &self.commit_sha,
                PR_NUMBER_VAR => &self.pr_number,
                _ => return None,
            };
            value.clone()
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a single pipeline and wait for its result
    Run {
        #[arg(short, long)]
        service: String,

        #[arg(short, long, value_enum, default_value_t = PipelineKind::Build)]
        kind: PipelineKind,

        #[arg(short, long)]
        pipeline_id: u64,

        #[arg(short, long, default_value = "refs/heads/main")]
        branch: String,
    },
    /// Trigger the configured pull-request deployment pipelines for every service
    TestDeployments {
        /// Also run each service's `pr` pipeline after a successful build
        #[arg(long, default_value_t = false)]
        with_pr: bool,

        /// Restrict to these services (repeatable)
        #[arg(short, long)]
        service: Vec<String>,
    },
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(interval_secs) = self.interval_secs {
            config.polling.interval_secs = interval_secs;
        }
        if self.max_polls.is_some() {
            config.polling.max_polls = self.max_polls;
        }
        Ok(config)
    }

    async fn execute_run(
        &self,
        config: Config,
        service: &str,
        kind: PipelineKind,
        pipeline_id: u64,
        branch: &str,
    ) -> Result<bool> {
        let secrets = self.secrets.resolve()?;
        let mut client = PipelineClient::new(secrets, &config.azure, &config.polling)
            .await
            .context("Failed to create pipeline client")?;

        let result = client
            .run_pipeline(service, kind, pipeline_id, branch)
            .await
            .with_context(|| format!("Pipeline {service} {kind} did not complete"))?;

        Ok(result.is_success())
    }

    async fn execute_test_deployments(
        &self,
        config: Config,
        with_pr: bool,
        only: &[String],
    ) -> Result<bool> {
        let services = select_services(&config.pipelines, only)?;
        let secrets = self.secrets.resolve()?;

        info!("Running deployment tests for: {:?}", services.keys());

        let deployment = DeploymentRun {
            settings: config.azure,
            polling: config.polling,
            secrets,
            with_pr,
            connector: http_connector(),
        };
        let outcomes = deployment.run(&services).await;

        print_summary(&outcomes);
        Ok(all_succeeded(&outcomes))
    }

    /// Runs the selected command; `Ok(false)` means a pipeline did not succeed.
    pub async fn execute(&self) -> Result<bool> {
        let config = self.load_config()?;

        match &self.command {
            Commands::Run {
                service,
                kind,
                pipeline_id,
                branch,
            } => {
                self.execute_run(config, service, *kind, *pipeline_id, branch)
                    .await
            }
            Commands::TestDeployments { with_pr, service } => {
                self.execute_test_deployments(config, *with_pr, service)
                    .await
            }
        }
    }
}

fn select_services(
    pipelines: &IndexMap<String, ServicePipelines>,
    only: &[String],
) -> Result<IndexMap<String, ServicePipelines>> {
    if only.is_empty() {
        return Ok(pipelines.clone());
    }

    let mut selected = IndexMap::new();
    for name in only {
        let Some(service) = pipelines.get(name) else {
            bail!("Unknown service '{name}', not found in the pipelines config");
        };
        selected.insert(name.clone(), service.clone());
    }
    Ok(selected)
}
