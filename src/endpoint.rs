use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};

use crate::config::{DeploymentConfig, InstanceConfig, RuntimeConfig};
use crate::error::{AutobenchError, Result};

/// Lifecycle states an endpoint can report through the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Pending,
    Initializing,
    Running,
    Paused,
    Deleted,
    Failed,
}

impl EndpointStatus {
    pub fn is_running(self) -> bool {
        matches!(self, EndpointStatus::Running)
    }
}

/// An opaque handle to a created or adopted endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    pub name: String,
    pub namespace: String,
    pub url: String,
    pub status: EndpointStatus,
    /// The raw endpoint descriptor as returned by the control plane, kept
    /// verbatim for the deployment-details snapshot in `ScenarioGroupResult`.
    pub raw: serde_json::Value,
}

/// The quota entry for one (vendor, instance_type) pair.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceQuota {
    #[serde(rename = "instanceType")]
    pub instance_type: String,
    #[serde(rename = "maxAccelerators")]
    pub max_accelerators: u32,
    #[serde(rename = "usedAccelerators")]
    pub used_accelerators: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorQuota {
    pub name: String,
    pub quotas: Vec<InstanceQuota>,
}

/// The namespace's per-vendor, per-instance-type GPU accounting, fetched
/// fresh by the scheduler on every tick (spec §6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QuotaDocument {
    #[serde(default)]
    pub vendors: Vec<VendorQuota>,
}

impl QuotaDocument {
    /// Available GPU headroom for `(vendor, instance_type)`. A missing
    /// entry is treated as zero capacity (spec §4.8).
    pub fn available(&self, vendor: &str, instance_type: &str) -> u32 {
        self.vendors
            .iter()
            .find(|v| v.name == vendor)
            .and_then(|v| v.quotas.iter().find(|q| q.instance_type == instance_type))
            .map(|q| q.max_accelerators.saturating_sub(q.used_accelerators))
            .unwrap_or(0)
    }

    /// Locally accounts for `amount` accelerators just committed to a newly
    /// admitted group, so a single admission pass over several pending groups
    /// doesn't over-admit against capacity the control plane hasn't reported
    /// as used yet (spec §6 quota backpressure).
    pub fn reserve(&mut self, vendor: &str, instance_type: &str, amount: u32) {
        if let Some(quota) = self
            .vendors
            .iter_mut()
            .find(|v| v.name == vendor)
            .and_then(|v| v.quotas.iter_mut().find(|q| q.instance_type == instance_type))
        {
            quota.used_accelerators = quota.used_accelerators.saturating_add(amount);
        }
    }
}

/// Thin façade over the inference-endpoint control plane (component C5):
/// create, adopt-existing, wait-running, resume, delete, status.
///
/// Deliberately out of scope for this crate: the control plane itself. This
/// trait specifies only the contract the scheduler and scenario executor
/// depend on.
pub trait EndpointDriver {
    /// Submit creation and block until the endpoint reports `running`.
    fn create(&self, deployment_id: &str, config: &DeploymentConfig) -> Result<EndpointHandle>;

    /// Retrieve an existing endpoint by name. If `initializing`, wait for it
    /// to become `running`; if any other non-running state, resume and wait.
    /// Also reconstructs the `DeploymentConfig` the endpoint was created
    /// with, pulled from its env vars and compute/provider fields.
    fn adopt(&self, name: &str, namespace: &str) -> Result<(EndpointHandle, DeploymentConfig)>;

    fn resume(&self, handle: &EndpointHandle) -> Result<EndpointHandle>;

    /// Delete the endpoint, retrying up to 3 times with exponential backoff
    /// (min 4s, max 10s) on failure.
    fn delete(&self, handle: &EndpointHandle) -> Result<()>;

    fn status(&self, handle: &EndpointHandle) -> Result<EndpointStatus>;

    /// Fetch endpoint logs (JSON or plain text) for post-failure diagnostics.
    ///
    /// Addressed by `(namespace, name)` rather than a handle: a failed
    /// `create` never produces a running handle, but its logs are still
    /// reachable by the name the endpoint was submitted under (spec §4.8
    /// step 4).
    fn logs(&self, namespace: &str, name: &str) -> Result<String>;

    /// Fetch the namespace's current GPU quota document.
    fn fetch_quota(&self, namespace: &str) -> Result<QuotaDocument>;
}

/// HTTP-backed endpoint driver.
pub struct HttpEndpointDriver {
    client: reqwest::blocking::Client,
    base_url: String,
    auth_token: String,
}

impl HttpEndpointDriver {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.auth_token)
    }

    /// Poll until the endpoint reports `running`, offloading the wait to the
    /// control plane's own settle time. Implementations should bound this
    /// with a configurable upper bound per spec §5; here we bound it to a
    /// generous number of polls at a fixed interval.
    fn wait_running(&self, handle: &mut EndpointHandle) -> Result<()> {
        const MAX_POLLS: u32 = 180;
        const POLL_INTERVAL: Duration = Duration::from_secs(5);

        for _ in 0..MAX_POLLS {
            let status = self.status(handle)?;
            handle.status = status;
            if status.is_running() {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Err(AutobenchError::EndpointError(format!(
            "endpoint {} did not reach running within the wait budget",
            handle.name
        )))
    }
}

impl EndpointDriver for HttpEndpointDriver {
    fn create(&self, deployment_id: &str, config: &DeploymentConfig) -> Result<EndpointHandle> {
        let env = config.runtime_config.env_vars();
        let body = serde_json::json!({
            "accountId": config.namespace,
            "compute": {
                "accelerator": "gpu",
                "instanceType": config.instance_config.instance_type,
                "instanceSize": config.instance_config.instance_size,
                "scaling": {"minReplica": 0, "maxReplica": 1, "scaleToZeroTimeout": 30},
            },
            "model": {
                "repository": config.runtime_config.model_id,
                "framework": "pytorch",
                "task": "text-generation",
                "image": {
                    "custom": {
                        "url": "ghcr.io/huggingface/text-generation-inference:latest",
                        "healthRoute": "/health",
                        "env": env,
                    }
                },
            },
        });

        let url = format!(
            "{}/v2/endpoint/{}",
            self.base_url, config.namespace
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AutobenchError::EndpointError(format!(
                "create endpoint {deployment_id} failed with status {}",
                response.status()
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        let mut handle = EndpointHandle {
            name: deployment_id.to_string(),
            namespace: config.namespace.clone(),
            url: raw
                .get("status")
                .and_then(|s| s.get("url"))
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string(),
            status: EndpointStatus::Pending,
            raw,
        };

        self.wait_running(&mut handle)?;
        Ok(handle)
    }

    fn adopt(&self, name: &str, namespace: &str) -> Result<(EndpointHandle, DeploymentConfig)> {
        let url = format!("{}/v2/endpoint/{}/{}", self.base_url, namespace, name);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .map_err(|e| AutobenchError::NotFound(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AutobenchError::NotFound(format!(
                "endpoint {name} not found: status {}",
                response.status()
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .map_err(|e| AutobenchError::NotFound(e.to_string()))?;

        let status = parse_status(&raw);
        let mut handle = EndpointHandle {
            name: name.to_string(),
            namespace: namespace.to_string(),
            url: raw
                .get("status")
                .and_then(|s| s.get("url"))
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string(),
            status,
            raw: raw.clone(),
        };

        match status {
            EndpointStatus::Initializing => self.wait_running(&mut handle)?,
            EndpointStatus::Running => {}
            _ => {
                handle = self.resume(&handle)?;
                self.wait_running(&mut handle)?;
            }
        }

        let deployment_config = reconstruct_deployment_config(&raw, namespace)?;
        Ok((handle, deployment_config))
    }

    fn resume(&self, handle: &EndpointHandle) -> Result<EndpointHandle> {
        let url = format!(
            "{}/v2/endpoint/{}/{}/resume",
            self.base_url, handle.namespace, handle.name
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .send()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AutobenchError::EndpointError(format!(
                "resume endpoint {} failed with status {}",
                handle.name,
                response.status()
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        Ok(EndpointHandle {
            name: handle.name.clone(),
            namespace: handle.namespace.clone(),
            url: handle.url.clone(),
            status: parse_status(&raw),
            raw,
        })
    }

    fn delete(&self, handle: &EndpointHandle) -> Result<()> {
        let url = format!(
            "{}/v2/endpoint/{}/{}",
            self.base_url, handle.namespace, handle.name
        );

        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(4),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let mut attempts = 0;
        let max_attempts = 3;
        let mut last_err: Option<AutobenchError> = None;

        while attempts < max_attempts {
            attempts += 1;
            let result = self
                .client
                .delete(&url)
                .header("Authorization", self.auth_header())
                .send();

            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_err = Some(AutobenchError::DeleteError(format!(
                        "delete endpoint {} failed with status {}",
                        handle.name,
                        response.status()
                    )));
                }
                Err(e) => {
                    last_err = Some(AutobenchError::DeleteError(e.to_string()));
                }
            }

            if attempts < max_attempts {
                if let Some(delay) = backoff.next_backoff() {
                    std::thread::sleep(delay);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AutobenchError::DeleteError(format!("delete endpoint {} exhausted retries", handle.name))
        }))
    }

    fn status(&self, handle: &EndpointHandle) -> Result<EndpointStatus> {
        let url = format!(
            "{}/v2/endpoint/{}/{}",
            self.base_url, handle.namespace, handle.name
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        let raw: serde_json::Value = response
            .json()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        Ok(parse_status(&raw))
    }

    fn logs(&self, namespace: &str, name: &str) -> Result<String> {
        let url = format!("{}/v2/endpoint/{}/{}/logs", self.base_url, namespace, name);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        // Logs may come back as JSON or plain text; treat both uniformly as
        // a diagnostic string, never as a contract (spec §9 Open Question).
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.contains("json") {
            let value: serde_json::Value = response
                .json()
                .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;
            Ok(value.to_string())
        } else {
            response
                .text()
                .map_err(|e| AutobenchError::EndpointError(e.to_string()))
        }
    }

    fn fetch_quota(&self, namespace: &str) -> Result<QuotaDocument> {
        let url = format!("{}/provider/quotas/{}", self.base_url, namespace);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AutobenchError::EndpointError(format!(
                "quota fetch for {namespace} failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .map_err(|e| AutobenchError::EndpointError(e.to_string()))
    }
}

fn parse_status(raw: &serde_json::Value) -> EndpointStatus {
    let status_str = raw
        .get("status")
        .and_then(|s| s.get("state"))
        .and_then(|s| s.as_str())
        .unwrap_or("pending");

    match status_str {
        "running" => EndpointStatus::Running,
        "initializing" | "pending" => EndpointStatus::Initializing,
        "paused" => EndpointStatus::Paused,
        "deleted" => EndpointStatus::Deleted,
        "failed" => EndpointStatus::Failed,
        _ => EndpointStatus::Pending,
    }
}

/// Reconstruct a `DeploymentConfig` from an adopted endpoint's raw
/// descriptor (env vars + compute/provider fields).
fn reconstruct_deployment_config(
    raw: &serde_json::Value,
    namespace: &str,
) -> Result<DeploymentConfig> {
    let env = raw
        .pointer("/model/image/custom/env")
        .cloned()
        .unwrap_or_default();

    let get_u32 = |key: &str| -> u32 {
        env.get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    };

    let runtime_config = RuntimeConfig {
        model_id: raw
            .pointer("/model/repository")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        max_batch_prefill_tokens: get_u32("MAX_BATCH_PREFILL_TOKENS"),
        max_input_tokens: get_u32("MAX_INPUT_TOKENS"),
        max_total_tokens: get_u32("MAX_TOTAL_TOKENS"),
        num_shard: {
            let v = get_u32("NUM_SHARD");
            if v == 0 { 1 } else { v }
        },
        quantize: env
            .get("QUANTIZE")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        estimated_memory_in_gigabytes: None,
    };

    let instance_config = InstanceConfig {
        id: raw
            .pointer("/compute/id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        vendor: raw
            .pointer("/provider/vendor")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        region: raw
            .pointer("/provider/region")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        accelerator: "gpu".to_string(),
        instance_type: raw
            .pointer("/compute/instanceType")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        instance_size: raw
            .pointer("/compute/instanceSize")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        num_gpus: None,
        gpu_memory_in_gb: None,
        memory_in_gb: None,
        num_cpus: None,
        price_per_hour: None,
        architecture: None,
        vendor_status: None,
        region_status: None,
        status: None,
    };

    DeploymentConfig::new(runtime_config, instance_config, namespace.to_string(), &[namespace.to_string()])
}
