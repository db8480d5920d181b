use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AutobenchError, Result};
use crate::group::ScenarioGroupResult;

/// The typed tree produced by a benchmark run (component C10), persisted as
/// a directory at `<output_dir>/benchmark_<benchmark_id>/` (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub benchmark_id: String,
    pub scenario_group_results: Vec<ScenarioGroupResult>,
    #[serde(skip_serializing, default)]
    pub output_dir: Option<PathBuf>,
}

impl BenchmarkResult {
    pub fn new(scenario_group_results: Vec<ScenarioGroupResult>) -> Self {
        Self {
            benchmark_id: uuid::Uuid::new_v4().to_string(),
            scenario_group_results,
            output_dir: None,
        }
    }

    /// Persist this result under `<parent_dir>/benchmark_<benchmark_id>/`.
    ///
    /// Fails if the target directory already exists (spec §4.9). Each
    /// scenario's `rendered_script` is written to `scripts/<scenario_id>.js`
    /// and replaced in `results.json` by that relative path, matching the
    /// original system's `k6_script` path-substitution contract.
    pub fn save(&mut self, parent_dir: &Path) -> Result<PathBuf> {
        let benchmark_dir = parent_dir.join(format!("benchmark_{}", self.benchmark_id));
        std::fs::create_dir(&benchmark_dir).map_err(|e| {
            AutobenchError::PersistenceError(format!(
                "output directory {} already exists or could not be created: {e}",
                benchmark_dir.display()
            ))
        })?;

        let scripts_dir = benchmark_dir.join("scripts");
        let mut serializable = self.clone();
        serializable.output_dir = None;

        for group in &mut serializable.scenario_group_results {
            for scenario in &mut group.scenario_results {
                if scenario.rendered_script.is_empty() {
                    continue;
                }
                std::fs::create_dir_all(&scripts_dir).map_err(|e| {
                    AutobenchError::PersistenceError(format!("failed to create scripts dir: {e}"))
                })?;
                let relative_path = format!("scripts/{}.js", scenario.scenario_id);
                let script_path = benchmark_dir.join(&relative_path);
                std::fs::write(&script_path, &scenario.rendered_script).map_err(|e| {
                    AutobenchError::PersistenceError(format!("failed to write script: {e}"))
                })?;
                scenario.rendered_script = relative_path;
            }
        }

        let json = serde_json::to_string_pretty(&serializable)
            .map_err(|e| AutobenchError::PersistenceError(e.to_string()))?;
        std::fs::write(benchmark_dir.join("results.json"), json)
            .map_err(|e| AutobenchError::PersistenceError(e.to_string()))?;

        self.output_dir = Some(benchmark_dir.clone());
        Ok(benchmark_dir)
    }

    /// Reconstruct a [`BenchmarkResult`] from a directory previously written
    /// by [`Self::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(dir.join("results.json"))
            .map_err(|e| AutobenchError::PersistenceError(e.to_string()))?;
        let mut result: BenchmarkResult = serde_json::from_str(&json)
            .map_err(|e| AutobenchError::PersistenceError(e.to_string()))?;
        result.output_dir = Some(dir.to_path_buf());
        Ok(result)
    }
}
