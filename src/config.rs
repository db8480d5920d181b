use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AutobenchError, Result};

/// Per-model runtime specification applied to the inference container.
///
/// See spec §3. `env_vars()` derives the environment map handed to the
/// container; `QUANTIZE` is present iff `quantize` is `Some`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub model_id: String,
    pub max_batch_prefill_tokens: u32,
    pub max_input_tokens: u32,
    pub max_total_tokens: u32,
    #[serde(default = "default_num_shard")]
    pub num_shard: u32,
    pub quantize: Option<String>,
    pub estimated_memory_in_gigabytes: Option<f64>,
}

fn default_num_shard() -> u32 {
    1
}

impl RuntimeConfig {
    /// The environment variables applied to the inference container.
    pub fn env_vars(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "MAX_BATCH_PREFILL_TOKENS".to_string(),
            self.max_batch_prefill_tokens.to_string(),
        );
        env.insert(
            "MAX_INPUT_TOKENS".to_string(),
            self.max_input_tokens.to_string(),
        );
        env.insert(
            "MAX_TOTAL_TOKENS".to_string(),
            self.max_total_tokens.to_string(),
        );
        env.insert("NUM_SHARD".to_string(), self.num_shard.to_string());
        env.insert("MODEL_ID".to_string(), "/repository".to_string());
        if let Some(quantize) = &self.quantize {
            env.insert("QUANTIZE".to_string(), quantize.clone());
        }
        env
    }
}

/// A single catalog row describing a provisionable compute instance.
///
/// See spec §3. Required fields are mandatory in the catalog document;
/// optional fields may be absent for instances the provider hasn't fully
/// priced or characterized yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
    pub vendor: String,
    pub region: String,
    pub accelerator: String,
    pub instance_type: String,
    pub instance_size: String,
    pub num_gpus: Option<u32>,
    pub gpu_memory_in_gb: Option<u32>,
    pub memory_in_gb: Option<u32>,
    pub num_cpus: Option<u32>,
    pub price_per_hour: Option<f64>,
    pub architecture: Option<String>,
    pub vendor_status: Option<String>,
    pub region_status: Option<String>,
    pub status: Option<String>,
}

impl InstanceConfig {
    /// Total GPU memory across all GPUs on the instance, used to query the
    /// recommender.
    pub fn total_gpu_memory_gb(&self) -> u32 {
        self.gpu_memory_in_gb.unwrap_or(0) * self.num_gpus.unwrap_or(0)
    }
}

/// The pairing of a runtime config, an instance config, and the billing
/// namespace the deployment will run under.
///
/// Construction fails with `PermissionError` if the namespace is not a
/// principal the caller can pay for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub runtime_config: RuntimeConfig,
    pub instance_config: InstanceConfig,
    pub namespace: String,
}

impl DeploymentConfig {
    /// Construct a new deployment config, enforcing the namespace-payable
    /// invariant described in spec §3.
    pub fn new(
        runtime_config: RuntimeConfig,
        instance_config: InstanceConfig,
        namespace: String,
        payable_namespaces: &[String],
    ) -> Result<Self> {
        if !payable_namespaces.iter().any(|n| n == &namespace) {
            return Err(AutobenchError::PermissionError(format!(
                "namespace '{namespace}' is not a payable principal"
            )));
        }
        Ok(Self {
            runtime_config,
            instance_config,
            namespace,
        })
    }
}

/// Process-wide configuration for a scheduler run: base URLs, auth, GPU
/// selection preferences, and the load generator binary path.
///
/// Mirrors the teacher's `DbConfig`/`default_url` pattern of bundling
/// connection parameters behind a single config struct with sensible
/// defaults.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub catalog_base_url: String,
    pub recommender_base_url: String,
    pub endpoint_base_url: String,
    pub auth_token: String,
    pub namespace: String,
    pub load_generator_bin: String,
}

impl RunConfig {
    pub fn default_catalog_base_url() -> String {
        "https://api.endpoints.huggingface.cloud".to_string()
    }

    pub fn default_recommender_base_url() -> String {
        "https://huggingface.co".to_string()
    }

    pub fn default_endpoint_base_url() -> String {
        "https://api.endpoints.huggingface.cloud".to_string()
    }

    pub fn default_load_generator_bin() -> String {
        std::env::var("AUTOBENCH_K6_BIN").unwrap_or_else(|_| "k6".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_config(quantize: Option<&str>) -> RuntimeConfig {
        RuntimeConfig {
            model_id: "meta-llama/Meta-Llama-3-8B-Instruct".to_string(),
            max_batch_prefill_tokens: 4096,
            max_input_tokens: 2048,
            max_total_tokens: 4096,
            num_shard: 2,
            quantize: quantize.map(|q| q.to_string()),
            estimated_memory_in_gigabytes: Some(24.0),
        }
    }

    fn instance_config() -> InstanceConfig {
        InstanceConfig {
            id: "aws-us-east-1-nvidia-a10g".to_string(),
            vendor: "aws".to_string(),
            region: "us-east-1".to_string(),
            accelerator: "gpu".to_string(),
            instance_type: "nvidia-a10g".to_string(),
            instance_size: "x1".to_string(),
            num_gpus: Some(1),
            gpu_memory_in_gb: Some(24),
            memory_in_gb: Some(64),
            num_cpus: Some(8),
            price_per_hour: Some(1.5),
            architecture: Some("x86_64".to_string()),
            vendor_status: Some("available".to_string()),
            region_status: Some("available".to_string()),
            status: Some("available".to_string()),
        }
    }

    #[test]
    fn env_vars_without_quantize_has_no_quantize_key() {
        let cfg = runtime_config(None);
        let env = cfg.env_vars();
        assert!(!env.contains_key("QUANTIZE"));
        assert_eq!(env.get("NUM_SHARD").unwrap(), "2");
        assert_eq!(env.get("MODEL_ID").unwrap(), "/repository");
    }

    #[test]
    fn env_vars_with_quantize_includes_it() {
        let cfg = runtime_config(Some("bitsandbytes"));
        let env = cfg.env_vars();
        assert_eq!(env.get("QUANTIZE").unwrap(), "bitsandbytes");
    }

    #[test]
    fn deployment_config_rejects_unpayable_namespace() {
        let err = DeploymentConfig::new(
            runtime_config(None),
            instance_config(),
            "someone-else".to_string(),
            &["andrewrreed".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, AutobenchError::PermissionError(_)));
    }

    #[test]
    fn deployment_config_accepts_payable_namespace() {
        let cfg = DeploymentConfig::new(
            runtime_config(None),
            instance_config(),
            "andrewrreed".to_string(),
            &["andrewrreed".to_string()],
        )
        .unwrap();
        assert_eq!(cfg.namespace, "andrewrreed");
    }
}
