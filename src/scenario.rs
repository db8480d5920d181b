use std::collections::HashMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::DeploymentConfig;
use crate::endpoint::{EndpointHandle, EndpointStatus};
use crate::error::{AutobenchError, Result};
use crate::template::{ScriptRenderer, ScriptVariables, CONSTANT_ARRIVAL_RATE};

/// How often the supervising thread polls the child for exit / cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A deployment's lifecycle handle (spec §3): the deployment id used as the
/// endpoint name, its config, and the endpoint handle once one exists.
///
/// Scenarios are pinned to a deployment but do not own it; the owning
/// `ScenarioGroup` outlives every `Scenario` built against it (spec §9:
/// Group is the single owner, Scenarios hold no back-pointer). Two explicit
/// constructors replace the original system's post-hoc "is this adopted?"
/// mutation (spec §9 Design Notes).
#[derive(Debug, Clone)]
pub struct ScenarioDeployment {
    pub deployment_id: String,
    pub config: DeploymentConfig,
    pub endpoint: Option<EndpointHandle>,
    pub exists: bool,
    pub teardown_on_exit: bool,
}

impl ScenarioDeployment {
    /// A deployment that does not exist yet and will be created by the
    /// scheduler; torn down on exit.
    pub fn new_for_creation(deployment_id: impl Into<String>, config: DeploymentConfig) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            config,
            endpoint: None,
            exists: false,
            teardown_on_exit: true,
        }
    }

    /// A deployment adopted from an already-running (or resumable) endpoint;
    /// not torn down on exit.
    pub fn adopt_existing(
        deployment_id: impl Into<String>,
        config: DeploymentConfig,
        endpoint: EndpointHandle,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            config,
            endpoint: Some(endpoint),
            exists: true,
            teardown_on_exit: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.endpoint
            .as_ref()
            .is_some_and(|h| h.status.is_running())
    }
}

/// The parameters for one `constant_arrival_rate` load-generator invocation.
#[derive(Debug, Clone)]
pub struct ExecutorSpec {
    pub pre_allocated_vus: u32,
    pub rate: u32,
    pub duration: String,
    pub max_new_tokens: Option<u32>,
}

/// The terminal status of a scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStatus {
    pub status: ScenarioOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioOutcome {
    Success,
    Failed,
}

/// The outcome of a single load-generator invocation (component C7's
/// product type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub deployment_id: String,
    pub executor_type: String,
    pub executor_variables: HashMap<String, serde_json::Value>,
    pub rendered_script: String,
    pub metrics: Option<serde_json::Value>,
    pub status: ScenarioStatus,
}

/// An immutable description of one load-generator run against one
/// deployment (spec §3). `run()` is the scenario executor (component C7).
#[derive(Debug, Clone)]
pub struct Scenario {
    pub scenario_id: String,
    pub deployment: ScenarioDeployment,
    pub executor: ExecutorSpec,
    pub dataset_file_path: String,
}

impl Scenario {
    pub fn new(
        deployment: ScenarioDeployment,
        executor: ExecutorSpec,
        dataset_file_path: impl Into<String>,
    ) -> Self {
        Self {
            scenario_id: uuid::Uuid::new_v4().to_string(),
            deployment,
            executor,
            dataset_file_path: dataset_file_path.into(),
        }
    }

    /// Render the script and run the load-generator binary to completion,
    /// classifying its exit code and stdout into a [`ScenarioResult`].
    ///
    /// Preconditions: `deployment.endpoint` must exist and report `running`;
    /// otherwise fails with `deployment_not_running` (spec §4.6). If
    /// `cancellation` fires while the subprocess is running, its process
    /// group is signaled and the run is reported as a failure.
    pub fn run(
        &self,
        renderer: &ScriptRenderer,
        load_generator_bin: &str,
        cancellation: &CancellationToken,
    ) -> Result<ScenarioResult> {
        let endpoint = self.deployment.endpoint.as_ref().ok_or_else(|| {
            AutobenchError::DeploymentNotRunning(self.deployment.deployment_id.clone())
        })?;
        if endpoint.status != EndpointStatus::Running {
            return Err(AutobenchError::DeploymentNotRunning(
                self.deployment.deployment_id.clone(),
            ));
        }

        let variables = ScriptVariables {
            host: endpoint.url.clone(),
            data_file: self.dataset_file_path.clone(),
            pre_allocated_vus: self.executor.pre_allocated_vus,
            rate: self.executor.rate,
            duration: self.executor.duration.clone(),
            max_new_tokens: self.executor.max_new_tokens,
        };

        let script_path = renderer.render(CONSTANT_ARRIVAL_RATE, &variables)?;
        let rendered_script = std::fs::read_to_string(&script_path)
            .map_err(|e| AutobenchError::SubprocessNonzero(e.to_string()))?;

        tracing::info!(scenario_id = %self.scenario_id, "spawning load generator");
        let output = spawn_and_wait(load_generator_bin, &script_path, cancellation)?;

        let (status, metrics) = classify(&output);

        Ok(ScenarioResult {
            scenario_id: self.scenario_id.clone(),
            deployment_id: self.deployment.deployment_id.clone(),
            executor_type: CONSTANT_ARRIVAL_RATE.to_string(),
            executor_variables: crate::template::variables_to_map(&variables),
            rendered_script,
            metrics,
            status,
        })
    }
}

struct GeneratorOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Spawns `<bin> run --quiet <script>` and waits for it to exit, capturing
/// stdout/stderr in full without interleaving them with the console
/// (spec §4.6 step 3). On Unix, the process runs in its own process group so
/// cancellation can signal the whole group rather than a single pid.
///
/// stdout/stderr are drained on their own threads concurrently with the wait
/// loop below, the way `subprocess.communicate()` does in the original
/// system — a load generator that writes more than the OS pipe buffer before
/// exiting would otherwise block on `write` forever, since nothing would be
/// reading the pipe until after `try_wait` observed the exit that can never
/// come.
///
/// Polls rather than blocking on `wait()` so a cancellation request can be
/// observed and acted on (spec §5: cancellation "must signal and kill any
/// in-flight subprocess").
fn spawn_and_wait(
    load_generator_bin: &str,
    script_path: &std::path::Path,
    cancellation: &CancellationToken,
) -> Result<GeneratorOutput> {
    let mut command = Command::new(load_generator_bin);
    command
        .arg("run")
        .arg("--quiet")
        .arg(script_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|e| AutobenchError::SubprocessNonzero(e.to_string()))?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout_pipe.read_to_string(&mut buf);
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr_pipe.read_to_string(&mut buf);
        buf
    });

    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| AutobenchError::SubprocessNonzero(e.to_string()))?
        {
            let stdout = stdout_reader.join().unwrap_or_default();
            let stderr = stderr_reader.join().unwrap_or_default();
            return Ok(GeneratorOutput {
                success: status.success(),
                stdout,
                stderr,
            });
        }

        if cancellation.is_cancelled() {
            kill_process_group(&child);
            let _ = child.wait();
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
            return Err(AutobenchError::SubprocessNonzero(
                "load generator cancelled".to_string(),
            ));
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_process_group(child: &std::process::Child) {
    // SAFETY: `child`'s pid is a valid process group id because the
    // command was spawned with `process_group(0)`.
    unsafe {
        libc::kill(-(child.id() as i32), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &std::process::Child) {
    let _ = child;
}

/// Classify a completed load-generator invocation per spec §4.6 step 4.
fn classify(output: &GeneratorOutput) -> (ScenarioStatus, Option<serde_json::Value>) {
    if !output.success {
        return (
            ScenarioStatus {
                status: ScenarioOutcome::Failed,
                error: Some(output.stderr.clone()),
            },
            None,
        );
    }

    match serde_json::from_str::<serde_json::Value>(output.stdout.trim()) {
        Ok(value) if value.is_object() => (
            ScenarioStatus {
                status: ScenarioOutcome::Success,
                error: None,
            },
            Some(value),
        ),
        _ => (
            ScenarioStatus {
                status: ScenarioOutcome::Failed,
                error: Some("Failed to parse output as JSON".to_string()),
            },
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(success: bool, stdout: &str, stderr: &str) -> GeneratorOutput {
        GeneratorOutput {
            success,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn nonzero_exit_is_failed_with_stderr_as_error() {
        let (status, metrics) = classify(&output(false, "", "boom"));
        assert_eq!(status.status, ScenarioOutcome::Failed);
        assert_eq!(status.error.as_deref(), Some("boom"));
        assert!(metrics.is_none());
    }

    #[test]
    fn zero_exit_with_valid_json_is_success() {
        let (status, metrics) = classify(&output(true, r#"{"a": 1}"#, ""));
        assert_eq!(status.status, ScenarioOutcome::Success);
        assert!(status.error.is_none());
        assert_eq!(metrics.unwrap()["a"], 1);
    }

    #[test]
    fn zero_exit_with_non_json_stdout_is_parse_failure() {
        let (status, metrics) = classify(&output(true, "not json\n", ""));
        assert_eq!(status.status, ScenarioOutcome::Failed);
        assert_eq!(status.error.as_deref(), Some("Failed to parse output as JSON"));
        assert!(metrics.is_none());
    }

    #[test]
    fn zero_bytes_on_stdout_is_parse_failure() {
        let (status, metrics) = classify(&output(true, "", ""));
        assert_eq!(status.status, ScenarioOutcome::Failed);
        assert!(metrics.is_none());
    }

    #[test]
    fn scenario_run_rejects_non_running_deployment() {
        let deployment = ScenarioDeployment::new_for_creation(
            "dep-1",
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
        );
        let scenario = Scenario::new(
            deployment,
            ExecutorSpec {
                pre_allocated_vus: 1,
                rate: 1,
                duration: "10s".to_string(),
                max_new_tokens: None,
            },
            "/tmp/data.json",
        );
        let renderer = ScriptRenderer::new().unwrap();
        let err = scenario
            .run(&renderer, "k6", &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, AutobenchError::DeploymentNotRunning(_)));
    }
}
