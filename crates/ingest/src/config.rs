use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use forecast_core::ModelConfig;
use telemetry::{PreprocessorConfig, StoreConfig};
use trainer::TrainerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// UDP address telemetry datagrams arrive on.
    pub bind: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9999".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub preprocessor: PreprocessorConfig,
    pub trainer: TrainerConfig,
    pub model: ModelConfig,
    pub ingest: IngestConfig,
}

impl PipelineConfig {
    /// Reads `path` as YAML, or returns the defaults when it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainer::RestorePolicy;

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.trainer.input_width, 64);
        assert_eq!(config.trainer.partition, [0.8, 0.1, 0.1]);
        assert_eq!(config.ingest.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(
            &path,
            "store:\n  num_beacons: 8\n\
             trainer:\n  epochs: 2\n  restore_policy: initial\n\
             model:\n  hidden_size: 32\n",
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.store.num_beacons, 8);
        assert_eq!(config.trainer.epochs, 2);
        assert_eq!(config.trainer.restore_policy, RestorePolicy::Initial);
        assert_eq!(config.trainer.batch_size, 64);
        assert_eq!(config.model.hidden_size, 32);
        assert_eq!(config.preprocessor.wait_time_ms, 10);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, "trainer: [1, 2").unwrap();
        assert!(PipelineConfig::load(&path).is_err());
    }
}
