use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scenario::{Scenario, ScenarioDeployment, ScenarioResult};
use crate::template::ScriptRenderer;

/// The snapshot of a deployment embedded in a [`ScenarioGroupResult`]: the
/// runtime + instance config it ran with and the raw endpoint descriptor,
/// if one was ever obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentDetails {
    pub runtime_config: crate::config::RuntimeConfig,
    pub instance_config: crate::config::InstanceConfig,
    pub endpoint_details: Option<serde_json::Value>,
}

/// The deployment's final status as determined by the scheduler's
/// per-group task (spec §4.8 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub status: DeploymentOutcome,
    pub error: Option<String>,
    pub oom: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioGroupResult {
    pub deployment_id: String,
    pub scenario_results: Vec<ScenarioResult>,
    pub deployment_details: DeploymentDetails,
    pub deployment_status: DeploymentStatus,
}

/// The minimum quiescence period enforced between scenarios in a group, so
/// the endpoint can drain and metrics stabilize (spec §4.7).
pub const INTER_SCENARIO_PAUSE: Duration = Duration::from_secs(10);

/// A list of scenarios pinned to one deployment — the scheduling unit
/// (component C8). Every scenario's `deployment_id` must equal the group's.
pub struct ScenarioGroup {
    pub deployment: ScenarioDeployment,
    pub scenarios: Vec<Scenario>,
}

impl ScenarioGroup {
    /// Construct a group, enforcing that every scenario shares the group's
    /// `deployment_id` (spec §3 invariant).
    pub fn new(deployment: ScenarioDeployment, scenarios: Vec<Scenario>) -> Result<Self> {
        let group = Self {
            deployment,
            scenarios,
        };
        validate_group_deployment_ids(&group)?;
        Ok(group)
    }

    /// Run every scenario strictly in order, sleeping [`INTER_SCENARIO_PAUSE`]
    /// between each. A scenario's own failure never aborts the group: its
    /// result is simply recorded and the next scenario proceeds.
    ///
    /// Synchronous by design (spec §4.8: "scenario_group.run() (synchronously,
    /// off the main cooperative timeline...")) — the scheduler drives this
    /// from a blocking worker thread so the admission loop stays responsive.
    ///
    /// `deployment_details`/`deployment_status` are filled in by the caller
    /// once this returns, since only the scheduler knows the deployment's
    /// overall outcome (creation/teardown) at the point this runs.
    pub fn run(
        &self,
        renderer: &ScriptRenderer,
        load_generator_bin: &str,
        cancellation: &CancellationToken,
    ) -> Vec<ScenarioResult> {
        let mut results = Vec::with_capacity(self.scenarios.len());
        for (i, scenario) in self.scenarios.iter().enumerate() {
            if cancellation.is_cancelled() {
                break;
            }
            let result = match scenario.run(renderer, load_generator_bin, cancellation) {
                Ok(result) => result,
                Err(e) => failed_result(scenario, &e),
            };
            results.push(result);

            if i + 1 < self.scenarios.len() && !cancellation.is_cancelled() {
                std::thread::sleep(INTER_SCENARIO_PAUSE);
            }
        }
        results
    }
}

fn failed_result(scenario: &Scenario, error: &crate::error::AutobenchError) -> ScenarioResult {
    ScenarioResult {
        scenario_id: scenario.scenario_id.clone(),
        deployment_id: scenario.deployment.deployment_id.clone(),
        executor_type: crate::template::CONSTANT_ARRIVAL_RATE.to_string(),
        executor_variables: Default::default(),
        rendered_script: String::new(),
        metrics: None,
        status: crate::scenario::ScenarioStatus {
            status: crate::scenario::ScenarioOutcome::Failed,
            error: Some(error.to_string()),
        },
    }
}

fn validate_group_deployment_ids(group: &ScenarioGroup) -> Result<()> {
    for scenario in &group.scenarios {
        if scenario.deployment.deployment_id != group.deployment.deployment_id {
            return Err(crate::error::AutobenchError::DeploymentNotRunning(format!(
                "scenario {} belongs to deployment {} not group deployment {}",
                scenario.scenario_id, scenario.deployment.deployment_id, group.deployment.deployment_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ExecutorSpec;

    fn deployment(id: &str) -> ScenarioDeployment {
        ScenarioDeployment::new_for_creation(
            id,
            crate::config::DeploymentConfig {
                runtime_config: crate::config::RuntimeConfig {
                    model_id: "m".to_string(),
                    max_batch_prefill_tokens: 1,
                    max_input_tokens: 1,
                    max_total_tokens: 1,
                    num_shard: 1,
                    quantize: None,
                    estimated_memory_in_gigabytes: None,
                },
                instance_config: crate::config::InstanceConfig {
                    id: "i".to_string(),
                    vendor: "aws".to_string(),
                    region: "us-east-1".to_string(),
                    accelerator: "gpu".to_string(),
                    instance_type: "nvidia-a10g".to_string(),
                    instance_size: "x1".to_string(),
                    num_gpus: Some(1),
                    gpu_memory_in_gb: Some(24),
                    memory_in_gb: Some(64),
                    num_cpus: Some(8),
                    price_per_hour: Some(1.0),
                    architecture: None,
                    vendor_status: None,
                    region_status: None,
                    status: None,
                },
                namespace: "ns".to_string(),
            },
        )
    }

    fn scenario(deployment: &ScenarioDeployment) -> Scenario {
        Scenario::new(
            deployment.clone(),
            ExecutorSpec {
                pre_allocated_vus: 1,
                rate: 1,
                duration: "10s".to_string(),
                max_new_tokens: None,
            },
            "/tmp/data.json",
        )
    }

    #[test]
    fn validate_rejects_mismatched_deployment_ids() {
        let dep = deployment("dep-a");
        let other_dep = deployment("dep-b");
        let group = ScenarioGroup {
            scenarios: vec![scenario(&other_dep)],
            deployment: dep,
        };
        assert!(validate_group_deployment_ids(&group).is_err());
    }

    #[test]
    fn run_accumulates_a_result_per_scenario_despite_failures() {
        // A single scenario avoids the 10s inter-scenario pause in this test;
        // serial-ordering-with-pause is covered at the scheduler level.
        let dep = deployment("dep-a");
        let group = ScenarioGroup::new(dep.clone(), vec![scenario(&dep)]).unwrap();
        let renderer = ScriptRenderer::new().unwrap();
        // deployment.endpoint is None so the scenario fails with
        // deployment_not_running, but it still produces a result.
        let results = group.run(&renderer, "k6", &CancellationToken::new());
        assert_eq!(results.len(), 1);
        assert!(results
            .iter()
            .all(|r| r.status.status == crate::scenario::ScenarioOutcome::Failed));
    }
}
