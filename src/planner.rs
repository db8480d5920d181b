use std::collections::HashSet;

use crate::config::{InstanceConfig, RuntimeConfig};
use crate::recommender::RecommenderClient;

/// Filters, sorts, and deduplicates catalog rows into a ranked set of viable
/// (instance × runtime) pairs (component C4).
pub struct InstancePlanner;

impl InstancePlanner {
    /// Filter the catalog to the requested GPU types, sort by
    /// `(num_gpus, instance_type, vendor_key, region_key, price_per_hour)`,
    /// and keep only the first (cheapest, most-preferred) row per
    /// `(num_gpus, instance_type)` pair.
    ///
    /// The result is price-minimal within the preferred vendor+region
    /// combination and stable under repeated calls on the same catalog.
    pub fn plan(
        catalog: &[InstanceConfig],
        gpu_types: &[String],
        preferred_vendor: &str,
        preferred_region_prefix: &str,
    ) -> Vec<InstanceConfig> {
        let mut candidates: Vec<&InstanceConfig> = catalog
            .iter()
            .filter(|row| gpu_types.iter().any(|t| t == &row.instance_type))
            .collect();

        candidates.sort_by(|a, b| {
            let a_vendor_key = if a.vendor == preferred_vendor { 0 } else { 1 };
            let b_vendor_key = if b.vendor == preferred_vendor { 0 } else { 1 };
            let a_region_key = if a.region.starts_with(preferred_region_prefix) {
                0
            } else {
                1
            };
            let b_region_key = if b.region.starts_with(preferred_region_prefix) {
                0
            } else {
                1
            };
            let a_price = a.price_per_hour.unwrap_or(f64::MAX);
            let b_price = b.price_per_hour.unwrap_or(f64::MAX);

            a.num_gpus
                .cmp(&b.num_gpus)
                .then(a.instance_type.cmp(&b.instance_type))
                .then(a_vendor_key.cmp(&b_vendor_key))
                .then(a_region_key.cmp(&b_region_key))
                .then(a_price.partial_cmp(&b_price).unwrap_or(std::cmp::Ordering::Equal))
        });

        let mut seen: HashSet<(Option<u32>, String)> = HashSet::new();
        let mut result = Vec::new();
        for row in candidates {
            let key = (row.num_gpus, row.instance_type.clone());
            if seen.insert(key) {
                result.push(row.clone());
            }
        }
        result
    }

    /// Query the recommender for each instance and keep only the pairs it
    /// deems feasible.
    pub fn viable(
        recommender: &dyn RecommenderClient,
        model_id: &str,
        instances: &[InstanceConfig],
    ) -> Vec<(InstanceConfig, RuntimeConfig)> {
        let mut pairs = Vec::new();
        for instance in instances {
            let num_gpus = instance.num_gpus.unwrap_or(0);
            if num_gpus == 0 {
                continue;
            }
            let gpu_memory = instance.total_gpu_memory_gb();
            if let Some(runtime_config) = recommender.recommend(model_id, gpu_memory, num_gpus) {
                pairs.push((instance.clone(), runtime_config));
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommender::RecommenderClient;

    fn instance(
        id: &str,
        vendor: &str,
        region: &str,
        instance_type: &str,
        num_gpus: u32,
        price: f64,
    ) -> InstanceConfig {
        InstanceConfig {
            id: id.to_string(),
            vendor: vendor.to_string(),
            region: region.to_string(),
            accelerator: "gpu".to_string(),
            instance_type: instance_type.to_string(),
            instance_size: "x1".to_string(),
            num_gpus: Some(num_gpus),
            gpu_memory_in_gb: Some(24),
            memory_in_gb: Some(64),
            num_cpus: Some(8),
            price_per_hour: Some(price),
            architecture: Some("x86_64".to_string()),
            vendor_status: Some("available".to_string()),
            region_status: Some("available".to_string()),
            status: Some("available".to_string()),
        }
    }

    #[test]
    fn plan_dedupes_keeping_cheapest_per_key() {
        let catalog = vec![
            instance("a", "aws", "us-east-1", "nvidia-a10g", 1, 2.0),
            instance("b", "aws", "us-east-1", "nvidia-a10g", 1, 1.0),
            instance("c", "gcp", "us-central1", "nvidia-a10g", 1, 0.5),
        ];
        let plan = InstancePlanner::plan(
            &catalog,
            &["nvidia-a10g".to_string()],
            "aws",
            "us",
        );
        // preferred vendor "aws" sorts before "gcp" regardless of price,
        // and within aws the cheaper row ("b") wins the dedupe.
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, "b");
    }

    #[test]
    fn plan_filters_to_requested_gpu_types() {
        let catalog = vec![
            instance("a", "aws", "us-east-1", "nvidia-a10g", 1, 1.0),
            instance("b", "aws", "us-east-1", "nvidia-t4", 1, 1.0),
        ];
        let plan = InstancePlanner::plan(&catalog, &["nvidia-a10g".to_string()], "aws", "us");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].instance_type, "nvidia-a10g");
    }

    #[test]
    fn plan_is_stable_across_repeated_calls() {
        let catalog = vec![
            instance("a", "aws", "us-east-1", "nvidia-a10g", 1, 2.0),
            instance("b", "aws", "us-east-1", "nvidia-a10g", 2, 1.0),
        ];
        let first = InstancePlanner::plan(&catalog, &["nvidia-a10g".to_string()], "aws", "us");
        let second = InstancePlanner::plan(&catalog, &["nvidia-a10g".to_string()], "aws", "us");
        let first_ids: Vec<_> = first.iter().map(|r| r.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|r| r.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    struct FakeRecommender {
        feasible_ids: Vec<String>,
    }

    impl RecommenderClient for FakeRecommender {
        fn recommend(&self, model_id: &str, _gpu_memory_gb: u32, _num_gpus: u32) -> Option<crate::config::RuntimeConfig> {
            if self.feasible_ids.iter().any(|i| i == model_id) {
                Some(crate::config::RuntimeConfig {
                    model_id: model_id.to_string(),
                    max_batch_prefill_tokens: 4096,
                    max_input_tokens: 2048,
                    max_total_tokens: 4096,
                    num_shard: 1,
                    quantize: None,
                    estimated_memory_in_gigabytes: None,
                })
            } else {
                None
            }
        }
    }

    #[test]
    fn viable_omits_infeasible_instances() {
        let recommender = FakeRecommender {
            feasible_ids: vec!["model".to_string()],
        };
        let instances = vec![instance("a", "aws", "us-east-1", "nvidia-a10g", 1, 1.0)];
        let pairs = InstancePlanner::viable(&recommender, "model", &instances);
        assert_eq!(pairs.len(), 1);
    }
}
