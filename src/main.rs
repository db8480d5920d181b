use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use autobench_scheduler::catalog::{CatalogClient, HttpCatalogClient};
use autobench_scheduler::cli::{Cli, Command, PlanArgs, RunArgs};
use autobench_scheduler::config::{DeploymentConfig, InstanceConfig, RunConfig, RuntimeConfig};
use autobench_scheduler::endpoint::{EndpointDriver, HttpEndpointDriver};
use autobench_scheduler::group::ScenarioGroup;
use autobench_scheduler::planner::InstancePlanner;
use autobench_scheduler::recommender::HttpRecommenderClient;
use autobench_scheduler::result::BenchmarkResult;
use autobench_scheduler::scenario::{ExecutorSpec, Scenario, ScenarioDeployment};
use autobench_scheduler::scheduler::Scheduler;
use autobench_scheduler::template::ScriptRenderer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let run_config = RunConfig {
        catalog_base_url: cli
            .catalog_base_url
            .clone()
            .unwrap_or_else(RunConfig::default_catalog_base_url),
        recommender_base_url: cli
            .recommender_base_url
            .clone()
            .unwrap_or_else(RunConfig::default_recommender_base_url),
        endpoint_base_url: cli
            .endpoint_base_url
            .clone()
            .unwrap_or_else(RunConfig::default_endpoint_base_url),
        auth_token: cli.token.clone(),
        namespace: cli.namespace.clone(),
        load_generator_bin: cli
            .load_generator_bin
            .clone()
            .unwrap_or_else(RunConfig::default_load_generator_bin),
    };

    match cli.command {
        Command::Plan(args) => run_plan(run_config, args).await,
        Command::Run(args) => run_benchmark(run_config, args).await,
    }
}

/// Drives the configuration-feasibility pipeline (C1 + C2 + C4) and prints the
/// resulting viable `(instance, runtime config)` pairs as JSON.
async fn run_plan(run_config: RunConfig, args: PlanArgs) -> Result<()> {
    let catalog = HttpCatalogClient::new(run_config.catalog_base_url.clone());
    let recommender = HttpRecommenderClient::new(run_config.recommender_base_url.clone());

    let options = catalog
        .list_gpu_options()
        .context("failed to fetch compute catalog")?;

    let plan = InstancePlanner::plan(
        &options,
        &args.gpu_types,
        &args.preferred_vendor,
        &args.preferred_region_prefix,
    );
    let pairs = InstancePlanner::viable(&recommender, &args.model_id, &plan);

    tracing::info!(
        candidates = plan.len(),
        viable = pairs.len(),
        "planning complete"
    );
    println!("{}", serde_json::to_string_pretty(&pairs)?);
    Ok(())
}

/// A scenario group as described in the `--plan-file` JSON, deserialized into
/// the typed `ScenarioDeployment`/`Scenario` pair the scheduler consumes.
#[derive(Debug, Deserialize)]
struct RunPlanGroup {
    deployment_id: String,
    runtime_config: RuntimeConfig,
    instance_config: InstanceConfig,
    #[serde(default)]
    adopt: bool,
    scenarios: Vec<RunPlanScenario>,
}

#[derive(Debug, Deserialize)]
struct RunPlanScenario {
    dataset_file_path: String,
    pre_allocated_vus: u32,
    rate: u32,
    duration: String,
    #[serde(default)]
    max_new_tokens: Option<u32>,
}

/// Runs the full scheduling and execution engine (C9 over C5-C8) against the
/// groups described in `args.plan_file`, then persists the result (C10).
async fn run_benchmark(run_config: RunConfig, args: RunArgs) -> Result<()> {
    let plan_json = std::fs::read_to_string(&args.plan_file)
        .with_context(|| format!("failed to read plan file {}", args.plan_file.display()))?;
    let plan_groups: Vec<RunPlanGroup> =
        serde_json::from_str(&plan_json).context("failed to parse plan file as JSON")?;

    let driver: Arc<dyn EndpointDriver + Send + Sync> = Arc::new(HttpEndpointDriver::new(
        run_config.endpoint_base_url.clone(),
        run_config.auth_token.clone(),
    ));
    let renderer = Arc::new(ScriptRenderer::new().context("failed to build script renderer")?);

    let mut groups = Vec::with_capacity(plan_groups.len());
    for plan_group in plan_groups {
        let deployment = if plan_group.adopt {
            let (handle, config) = driver
                .adopt(&plan_group.deployment_id, &run_config.namespace)
                .with_context(|| format!("failed to adopt endpoint {}", plan_group.deployment_id))?;
            ScenarioDeployment::adopt_existing(plan_group.deployment_id.clone(), config, handle)
        } else {
            let config = DeploymentConfig::new(
                plan_group.runtime_config,
                plan_group.instance_config,
                run_config.namespace.clone(),
                &[run_config.namespace.clone()],
            )?;
            ScenarioDeployment::new_for_creation(plan_group.deployment_id.clone(), config)
        };

        let scenarios = plan_group
            .scenarios
            .into_iter()
            .map(|s| {
                Scenario::new(
                    deployment.clone(),
                    ExecutorSpec {
                        pre_allocated_vus: s.pre_allocated_vus,
                        rate: s.rate,
                        duration: s.duration,
                        max_new_tokens: s.max_new_tokens,
                    },
                    s.dataset_file_path,
                )
            })
            .collect();

        groups.push(ScenarioGroup::new(deployment, scenarios)?);
    }

    let scheduler = Scheduler::new(
        driver,
        renderer,
        run_config.load_generator_bin.clone(),
        run_config.namespace.clone(),
    );

    let cancellation = scheduler.cancellation_token();
    let ctrl_c_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received interrupt, stopping admission and tearing down running groups");
            ctrl_c_token.cancel();
        }
    });

    let scenario_group_results = scheduler.run(groups).await?;

    let mut benchmark_result = BenchmarkResult::new(scenario_group_results);
    let saved_dir = benchmark_result.save(&args.output_dir)?;
    tracing::info!(output_dir = %saved_dir.display(), "benchmark results persisted");
    println!("{}", saved_dir.display());
    Ok(())
}

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
