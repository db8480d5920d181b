use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Automates end-to-end performance benchmarking of LLM inference endpoints
/// across heterogeneous cloud GPU configurations.
#[derive(Parser, Debug)]
#[command(author, version, about = "LLM inference benchmark scheduler")]
pub struct Cli {
    /// Billing namespace (principal) endpoints are created under.
    #[arg(long, env = "AUTOBENCH_NAMESPACE")]
    pub namespace: String,

    /// Bearer token for the catalog/recommender/endpoint control plane.
    #[arg(long, env = "HF_TOKEN")]
    pub token: String,

    /// Base URL of the compute catalog API.
    #[arg(long)]
    pub catalog_base_url: Option<String>,

    /// Base URL of the runtime-config recommender API.
    #[arg(long)]
    pub recommender_base_url: Option<String>,

    /// Base URL of the inference-endpoint control plane.
    #[arg(long)]
    pub endpoint_base_url: Option<String>,

    /// Path to the load-generator binary.
    #[arg(long)]
    pub load_generator_bin: Option<String>,

    /// Enable verbose logging (repeat for more detail).
    #[arg(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enumerate viable (instance x runtime-config) pairs for a model.
    Plan(PlanArgs),
    /// Run a benchmark: deploy, drive scenarios, collect and persist results.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Model identifier to plan for (e.g. a Hub repo id).
    #[arg(long)]
    pub model_id: String,

    /// Candidate GPU instance types to consider (e.g. nvidia-a10g).
    #[arg(long = "gpu-type", required = true)]
    pub gpu_types: Vec<String>,

    /// Preferred vendor; ties in cost are broken toward this vendor.
    #[arg(long, default_value = "aws")]
    pub preferred_vendor: String,

    /// Preferred region prefix; ties are broken toward regions with this
    /// prefix.
    #[arg(long, default_value = "us")]
    pub preferred_region_prefix: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to a JSON file describing the scenario groups to run: a list of
    /// `{deployment_id, runtime_config, instance_config, adopt, scenarios}`
    /// objects.
    #[arg(long)]
    pub plan_file: PathBuf,

    /// Directory results are persisted under (a
    /// `benchmark_<benchmark_id>/` subdirectory is created inside it).
    #[arg(long)]
    pub output_dir: PathBuf,
}
