use serde::Deserialize;

use crate::config::RuntimeConfig;

/// Retrieves a runtime config for a (model, GPU memory, GPU count) query
/// (component C2).
///
/// A `None` return means the recommender deemed the model infeasible on an
/// instance with the given GPU memory/count — this is not an error, it is
/// how the planner learns an instance should be excluded.
pub trait RecommenderClient {
    fn recommend(&self, model_id: &str, gpu_memory_gb: u32, num_gpus: u32) -> Option<RuntimeConfig>;
}

#[derive(Debug, Deserialize)]
struct RecommendResponse {
    config: RuntimeConfig,
}

/// HTTP-backed recommender client hitting
/// `GET {base_url}/integrations/tgi/v1/config`.
pub struct HttpRecommenderClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpRecommenderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl RecommenderClient for HttpRecommenderClient {
    fn recommend(&self, model_id: &str, gpu_memory_gb: u32, num_gpus: u32) -> Option<RuntimeConfig> {
        let url = format!("{}/integrations/tgi/v1/config", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[
                ("model_id", model_id.to_string()),
                ("gpu_memory", gpu_memory_gb.to_string()),
                ("num_gpus", num_gpus.to_string()),
            ])
            .send()
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("recommender request failed: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<serde_json::Value>()
                .ok()
                .and_then(|v| v.get("detail").cloned())
                .map(|v| v.to_string())
                .unwrap_or_default();
            tracing::warn!(
                "recommender returned {status} for model {model_id}: {detail}; treating as infeasible"
            );
            return None;
        }

        match response.json::<RecommendResponse>() {
            Ok(body) => Some(body.config),
            Err(e) => {
                tracing::warn!("failed to parse recommender response: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRecommender {
        feasible: bool,
    }

    impl RecommenderClient for FakeRecommender {
        fn recommend(&self, model_id: &str, _gpu_memory_gb: u32, _num_gpus: u32) -> Option<RuntimeConfig> {
            if !self.feasible {
                return None;
            }
            Some(RuntimeConfig {
                model_id: model_id.to_string(),
                max_batch_prefill_tokens: 4096,
                max_input_tokens: 2048,
                max_total_tokens: 4096,
                num_shard: 1,
                quantize: None,
                estimated_memory_in_gigabytes: Some(20.0),
            })
        }
    }

    #[test]
    fn infeasible_model_yields_none() {
        let client = FakeRecommender { feasible: false };
        assert!(client.recommend("too-big/model", 24, 1).is_none());
    }

    #[test]
    fn feasible_model_yields_runtime_config() {
        let client = FakeRecommender { feasible: true };
        let cfg = client.recommend("ok/model", 24, 1).unwrap();
        assert_eq!(cfg.model_id, "ok/model");
    }
}
