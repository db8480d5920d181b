use serde::Deserialize;

use crate::config::InstanceConfig;
use crate::error::{AutobenchError, Result};

/// Fetches and normalizes the cloud compute-option catalog (component C1).
///
/// Implementations fetch a nested vendor → region → compute document and
/// flatten it into a list of [`InstanceConfig`] rows, filtered to those that
/// are currently available GPU instances.
pub trait CatalogClient {
    fn list_gpu_options(&self) -> Result<Vec<InstanceConfig>>;
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    vendors: Vec<VendorDoc>,
}

#[derive(Debug, Deserialize)]
struct VendorDoc {
    name: String,
    status: String,
    regions: Vec<RegionDoc>,
}

#[derive(Debug, Deserialize)]
struct RegionDoc {
    name: String,
    #[allow(dead_code)]
    label: String,
    status: String,
    computes: Vec<ComputeDoc>,
}

#[derive(Debug, Deserialize)]
struct ComputeDoc {
    id: String,
    accelerator: String,
    status: String,
    #[serde(rename = "numAccelerators")]
    num_accelerators: Option<f64>,
    #[serde(rename = "memoryGb")]
    memory_gb: Option<f64>,
    #[serde(rename = "gpuMemoryGb")]
    gpu_memory_gb: Option<f64>,
    #[serde(rename = "instanceType")]
    instance_type: String,
    #[serde(rename = "instanceSize")]
    instance_size: String,
    architecture: Option<String>,
    #[serde(rename = "pricePerHour")]
    price_per_hour: Option<f64>,
    #[serde(rename = "numCpus")]
    num_cpus: Option<f64>,
}

/// Flattens a parsed catalog document into instance rows, carrying
/// vendor/region metadata alongside each compute row, and filters to
/// available GPU instances. Kept free of I/O so it's independently testable.
fn flatten_and_filter(doc: CatalogDocument) -> Vec<InstanceConfig> {
    let mut rows = Vec::new();
    for vendor in doc.vendors {
        for region in vendor.regions {
            for compute in region.computes {
                let all_available = vendor.status == "available"
                    && region.status == "available"
                    && compute.status == "available";
                if !all_available || compute.accelerator != "gpu" {
                    continue;
                }
                rows.push(InstanceConfig {
                    id: compute.id,
                    vendor: vendor.name.clone(),
                    region: region.name.clone(),
                    accelerator: compute.accelerator,
                    instance_type: compute.instance_type,
                    instance_size: compute.instance_size,
                    num_gpus: compute.num_accelerators.map(|v| v as u32),
                    gpu_memory_in_gb: compute.gpu_memory_gb.map(|v| v as u32),
                    memory_in_gb: compute.memory_gb.map(|v| v as u32),
                    num_cpus: compute.num_cpus.map(|v| v as u32),
                    price_per_hour: compute.price_per_hour,
                    architecture: compute.architecture,
                    vendor_status: Some(vendor.status.clone()),
                    region_status: Some(region.status.clone()),
                    status: Some(compute.status),
                });
            }
        }
    }
    rows
}

/// HTTP-backed catalog client hitting `GET {base_url}/v2/provider`.
pub struct HttpCatalogClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl CatalogClient for HttpCatalogClient {
    fn list_gpu_options(&self) -> Result<Vec<InstanceConfig>> {
        let url = format!("{}/v2/provider", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| AutobenchError::CatalogFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AutobenchError::CatalogFetchError(format!(
                "catalog endpoint returned {}",
                response.status()
            )));
        }

        let doc: CatalogDocument = response
            .json()
            .map_err(|e| AutobenchError::CatalogFetchError(e.to_string()))?;

        Ok(flatten_and_filter(doc))
    }
}
