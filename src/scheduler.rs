use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::endpoint::{EndpointDriver, QuotaDocument};
use crate::error::AutobenchError;
use crate::group::{
    DeploymentDetails, DeploymentOutcome, DeploymentStatus, ScenarioGroup, ScenarioGroupResult,
};
use crate::scenario::ScenarioDeployment;
use crate::template::ScriptRenderer;

/// How often the admission loop re-examines `pending` and refetches quota
/// (spec §4.8 main loop).
pub const ADMISSION_TICK: Duration = Duration::from_secs(10);

/// How long the scheduler waits after a failed creation before fetching
/// logs for the OOM heuristic (spec §4.8 step 4).
const POST_FAILURE_LOG_WAIT: Duration = Duration::from_secs(60);

/// How long the scheduler waits before tearing down a deployment, to let
/// in-flight work settle (spec §4.8 step 5).
const PRE_DELETE_WAIT: Duration = Duration::from_secs(5);

/// Quota-aware admission and lifecycle coordination over concurrent scenario
/// groups (component C9 — the coordination core).
///
/// Modeled as a single event-loop task that dispatches blocking work
/// (HTTP calls, subprocess waits, long sleeps) to the tokio blocking thread
/// pool via `spawn_blocking`; no state is shared with those workers beyond
/// what's moved into each call, so `pending`/`running`/`results`/`quota`
/// need no locks (spec §9 Design Notes).
pub struct Scheduler {
    driver: Arc<dyn EndpointDriver + Send + Sync>,
    renderer: Arc<ScriptRenderer>,
    load_generator_bin: String,
    namespace: String,
    cancellation: CancellationToken,
}

impl Scheduler {
    pub fn new(
        driver: Arc<dyn EndpointDriver + Send + Sync>,
        renderer: Arc<ScriptRenderer>,
        load_generator_bin: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            renderer,
            load_generator_bin: load_generator_bin.into(),
            namespace: namespace.into(),
            cancellation: CancellationToken::new(),
        }
    }

    /// A token callers can use to cancel an in-progress [`Self::run`]. Once
    /// cancelled, the loop stops admitting new groups but still completes
    /// teardown for every group already running (spec §5).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    async fn fetch_quota(&self) -> Result<QuotaDocument, AutobenchError> {
        let driver = self.driver.clone();
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || driver.fetch_quota(&namespace))
            .await
            .map_err(|e| AutobenchError::EndpointError(format!("quota fetch task panicked: {e}")))?
    }

    /// Admission predicate for group `G` (spec §4.8):
    /// admit iff the deployment already exists and is running, or there is
    /// quota headroom for its (vendor, instance_type, num_gpus).
    fn admit(&self, group: &ScenarioGroup, quota: &QuotaDocument) -> bool {
        if group.deployment.is_running() {
            return true;
        }
        let instance = &group.deployment.config.instance_config;
        let required = instance.num_gpus.unwrap_or(0);
        quota.available(&instance.vendor, &instance.instance_type) >= required
    }

    /// Drives every group through admission, deploy → benchmark → teardown,
    /// and returns the accumulated results in completion order (spec §4.8).
    pub async fn run(
        &self,
        groups: Vec<ScenarioGroup>,
    ) -> Result<Vec<ScenarioGroupResult>, AutobenchError> {
        let mut pending: VecDeque<ScenarioGroup> = groups.into_iter().collect();
        let mut running: JoinSet<ScenarioGroupResult> = JoinSet::new();
        let mut results = Vec::new();

        let mut quota = self.fetch_quota().await?;
        tracing::info!(
            groups = pending.len(),
            namespace = %self.namespace,
            "scheduler starting"
        );

        loop {
            // Opportunistically drain any groups that finished since the
            // last tick; quota is refreshed at least once per completion
            // (spec §8 testable property).
            while let Some(joined) = running.try_join_next() {
                match joined {
                    Ok(result) => results.push(result),
                    Err(e) => tracing::error!("group task join error: {e}"),
                }
                quota = self.fetch_quota().await?;
            }

            if pending.is_empty() && running.is_empty() {
                break;
            }

            let snapshot: Vec<ScenarioGroup> = pending.drain(..).collect();
            for group in snapshot {
                if !self.cancellation.is_cancelled() && self.admit(&group, &quota) {
                    // The control plane won't report this group's accelerators as
                    // used until its endpoint actually comes up, so reserve them
                    // locally now — otherwise a second group snapshotted in the
                    // same tick could pass the same quota headroom check.
                    if !group.deployment.is_running() {
                        let instance = &group.deployment.config.instance_config;
                        quota.reserve(
                            &instance.vendor,
                            &instance.instance_type,
                            instance.num_gpus.unwrap_or(0),
                        );
                    }
                    tracing::info!(deployment_id = %group.deployment.deployment_id, "admitting group");
                    running.spawn(deploy_and_benchmark(
                        self.driver.clone(),
                        self.renderer.clone(),
                        self.load_generator_bin.clone(),
                        self.cancellation.clone(),
                        group,
                    ));
                } else {
                    pending.push_back(group);
                }
            }

            if pending.is_empty() && running.is_empty() {
                break;
            }

            tokio::time::sleep(ADMISSION_TICK).await;
            quota = self.fetch_quota().await?;
        }

        tracing::info!(results = results.len(), "scheduler run complete");
        Ok(results)
    }
}

/// The per-group task (spec §4.8 "deploy_and_benchmark").
async fn deploy_and_benchmark(
    driver: Arc<dyn EndpointDriver + Send + Sync>,
    renderer: Arc<ScriptRenderer>,
    load_generator_bin: String,
    cancellation: CancellationToken,
    mut group: ScenarioGroup,
) -> ScenarioGroupResult {
    let deployment_id = group.deployment.deployment_id.clone();
    let mut deployment_status = DeploymentStatus {
        status: DeploymentOutcome::Failed,
        error: None,
        oom: false,
    };
    let mut group_result: Option<ScenarioGroupResult> = None;

    match bring_endpoint_up(&driver, &mut group.deployment).await {
        Ok(()) => {
            let scenario_results = run_scenarios(&group, &renderer, &load_generator_bin, &cancellation).await;
            deployment_status.status = DeploymentOutcome::Success;
            group_result = Some(ScenarioGroupResult {
                deployment_id: deployment_id.clone(),
                scenario_results,
                deployment_details: deployment_details(&group.deployment),
                deployment_status: deployment_status.clone(),
            });
        }
        Err(e) => {
            tracing::error!(deployment_id = %deployment_id, error = %e, "failed to bring endpoint up");
            deployment_status.error = Some(e.to_string());
            tokio::time::sleep(POST_FAILURE_LOG_WAIT).await;
            deployment_status.oom = fetch_oom_heuristic(
                &driver,
                &group.deployment.config.namespace,
                &deployment_id,
            )
            .await;
        }
    }

    if group.deployment.is_running() && group.deployment.teardown_on_exit {
        tokio::time::sleep(PRE_DELETE_WAIT).await;
        if let Some(endpoint) = group.deployment.endpoint.clone() {
            let driver = driver.clone();
            let outcome = tokio::task::spawn_blocking(move || driver.delete(&endpoint)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => append_error(&mut deployment_status, e.to_string()),
                Err(e) => append_error(&mut deployment_status, format!("delete task panicked: {e}")),
            }
        }
    }

    let mut result = group_result.unwrap_or_else(|| ScenarioGroupResult {
        deployment_id,
        scenario_results: Vec::new(),
        deployment_details: deployment_details(&group.deployment),
        deployment_status: deployment_status.clone(),
    });
    result.deployment_status = deployment_status;
    result
}

/// Bring the deployment's endpoint to `running`: create if absent, resume
/// if present but not running, no-op if already running (spec §4.8 step 1).
async fn bring_endpoint_up(
    driver: &Arc<dyn EndpointDriver + Send + Sync>,
    deployment: &mut ScenarioDeployment,
) -> Result<(), AutobenchError> {
    if deployment.endpoint.is_none() {
        let driver = driver.clone();
        let deployment_id = deployment.deployment_id.clone();
        let config = deployment.config.clone();
        let handle = tokio::task::spawn_blocking(move || driver.create(&deployment_id, &config))
            .await
            .map_err(|e| AutobenchError::EndpointError(format!("create task panicked: {e}")))??;
        deployment.endpoint = Some(handle);
    } else if !deployment.is_running() {
        let driver = driver.clone();
        let handle = deployment.endpoint.clone().expect("checked above");
        let resumed = tokio::task::spawn_blocking(move || driver.resume(&handle))
            .await
            .map_err(|e| AutobenchError::EndpointError(format!("resume task panicked: {e}")))??;
        deployment.endpoint = Some(resumed);
    }
    Ok(())
}

/// Run the group's scenarios off the cooperative timeline (spec §4.8 step 2).
async fn run_scenarios(
    group: &ScenarioGroup,
    renderer: &Arc<ScriptRenderer>,
    load_generator_bin: &str,
    cancellation: &CancellationToken,
) -> Vec<crate::scenario::ScenarioResult> {
    let group_snapshot = ScenarioGroup {
        deployment: group.deployment.clone(),
        scenarios: group.scenarios.clone(),
    };
    let renderer = renderer.clone();
    let load_generator_bin = load_generator_bin.to_string();
    let cancellation = cancellation.clone();

    tokio::task::spawn_blocking(move || group_snapshot.run(&renderer, &load_generator_bin, &cancellation))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("scenario group task panicked: {e}");
            Vec::new()
        })
}

/// Best-effort diagnostic: wait for logs and look for the substring
/// `"OutOfMemoryError"` (spec §4.8 step 4, §9 Open Question — not a
/// contract, diagnostic only).
///
/// Fetched by `(namespace, deployment_id)` rather than a live endpoint
/// handle: a failed `create` never produces one, so this must remain
/// reachable even when `deployment.endpoint` is `None`.
async fn fetch_oom_heuristic(
    driver: &Arc<dyn EndpointDriver + Send + Sync>,
    namespace: &str,
    deployment_id: &str,
) -> bool {
    let driver = driver.clone();
    let namespace = namespace.to_string();
    let deployment_id = deployment_id.to_string();
    match tokio::task::spawn_blocking(move || driver.logs(&namespace, &deployment_id)).await {
        Ok(Ok(text)) => text.contains("OutOfMemoryError"),
        Ok(Err(e)) => {
            tracing::warn!("failed to fetch endpoint logs for OOM heuristic: {e}");
            false
        }
        Err(e) => {
            tracing::warn!("logs task panicked: {e}");
            false
        }
    }
}

fn append_error(status: &mut DeploymentStatus, message: String) {
    status.error = Some(match status.error.take() {
        Some(existing) => format!("{existing}; {message}"),
        None => message,
    });
}

fn deployment_details(deployment: &ScenarioDeployment) -> DeploymentDetails {
    DeploymentDetails {
        runtime_config: deployment.config.runtime_config.clone(),
        instance_config: deployment.config.instance_config.clone(),
        endpoint_details: deployment.endpoint.as_ref().map(|h| h.raw.clone()),
    }
}
