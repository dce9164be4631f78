// rust/seqbatch-core/src/config.rs

//! Pipeline configuration.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::batching::BatchType;
use crate::error::{PipelineError, Result};
use crate::length::LengthLimit;

// Top-level configuration: one section per pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub training: TrainingConfig,
    pub inference: InferenceConfig,
}

/// Training pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Examples (or tokens, see `batch_type`) per batch and replica.
    pub batch_size: usize,
    /// "examples" or "tokens", checked by `validate`.
    pub batch_type: String,
    /// Number of replicas consuming each batch; scales the batch size and
    /// is the divisor enforced on emitted batch sizes.
    pub batch_multiplier: usize,
    /// Token batching rounds window sizes to a multiple of this value.
    pub batch_size_multiple: usize,
    // Width of the length buckets; unset disables bucketing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_width: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_features_length: Option<LengthLimit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_labels_length: Option<LengthLimit>,
    /// Iterate the source once instead of forever.
    pub single_pass: bool,
    // Number of examples in the source, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_size: Option<usize>,
    pub num_shards: usize,
    pub shard_index: usize,
    /// Workers applying the process function; unset means 4.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
    /// 0 disables shuffling; negative or larger than the dataset shuffles
    /// the whole dataset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle_buffer_size: Option<i64>,
    /// Batches read ahead; unset picks the available parallelism, 0
    /// disables prefetching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch_buffer_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Inference pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub batch_size: usize,
    /// Reorder by length with this bucket width; unset or 0 keeps input order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_width: Option<usize>,
    // Unset uses every available core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch_buffer_size: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            batch_type: BatchType::Examples.to_string(),
            batch_multiplier: 1,
            batch_size_multiple: 1,
            bucket_width: None,
            maximum_features_length: None,
            maximum_labels_length: None,
            single_pass: false,
            dataset_size: None,
            num_shards: 1,
            shard_index: 0,
            num_threads: None,
            shuffle_buffer_size: None,
            prefetch_buffer_size: None,
            seed: None,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            bucket_width: None,
            num_threads: None,
            prefetch_buffer_size: None,
        }
    }
}

impl TrainingConfig {
    /// The parsed `batch_type`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] naming the value when
    /// it is neither "examples" nor "tokens".
    pub fn batch_type(&self) -> Result<BatchType> {
        self.batch_type.parse()
    }

    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] naming the first
    /// invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_configuration(
                "training.batch_size must be greater than 0",
            ));
        }
        self.batch_type()?;
        if self.batch_multiplier == 0 {
            return Err(PipelineError::invalid_configuration(
                "training.batch_multiplier must be at least 1",
            ));
        }
        if self.batch_size_multiple == 0 {
            return Err(PipelineError::invalid_configuration(
                "training.batch_size_multiple must be at least 1",
            ));
        }
        if self.bucket_width == Some(0) {
            return Err(PipelineError::invalid_configuration(
                "training.bucket_width must be greater than 0",
            ));
        }
        if self.num_shards == 0 {
            return Err(PipelineError::invalid_configuration(
                "training.num_shards must be at least 1",
            ));
        }
        if self.shard_index >= self.num_shards {
            return Err(PipelineError::invalid_configuration(format!(
                "training.shard_index ({}) must be less than num_shards ({})",
                self.shard_index, self.num_shards
            )));
        }
        if self.num_threads == Some(0) {
            return Err(PipelineError::invalid_configuration(
                "training.num_threads must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl InferenceConfig {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] naming the first
    /// invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_configuration(
                "inference.batch_size must be greater than 0",
            ));
        }
        if self.num_threads == Some(0) {
            return Err(PipelineError::invalid_configuration(
                "inference.num_threads must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl FromStr for PipelineConfig {
    type Err = PipelineError;

    /// Parse and validate configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| PipelineError::config_with_source("failed to parse TOML config", e))?;
        config.validate()?;
        Ok(config)
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.parse().ok())
}

impl PipelineConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::io_with_source(path, "failed to read config file", e)
        })?;
        content.parse()
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `SEQBATCH_` followed by the
    // section and field name. For example:
    // - `SEQBATCH_TRAINING_BATCH_SIZE` overrides `training.batch_size`
    // - `SEQBATCH_TRAINING_BATCH_TYPE` overrides `training.batch_type`
    // - `SEQBATCH_INFERENCE_BUCKET_WIDTH` overrides `inference.bucket_width`
    //
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let training = &mut self.training;
        if let Some(v) = env_value("SEQBATCH_TRAINING_BATCH_SIZE") {
            training.batch_size = v;
        }
        if let Some(v) = env_value::<BatchType>("SEQBATCH_TRAINING_BATCH_TYPE") {
            training.batch_type = v.to_string();
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_BATCH_MULTIPLIER") {
            training.batch_multiplier = v;
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_BATCH_SIZE_MULTIPLE") {
            training.batch_size_multiple = v;
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_BUCKET_WIDTH") {
            training.bucket_width = Some(v);
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_MAXIMUM_FEATURES_LENGTH") {
            training.maximum_features_length = Some(LengthLimit::Single(v));
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_MAXIMUM_LABELS_LENGTH") {
            training.maximum_labels_length = Some(LengthLimit::Single(v));
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_SINGLE_PASS") {
            training.single_pass = v;
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_DATASET_SIZE") {
            training.dataset_size = Some(v);
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_NUM_SHARDS") {
            training.num_shards = v;
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_SHARD_INDEX") {
            training.shard_index = v;
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_NUM_THREADS") {
            training.num_threads = Some(v);
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_SHUFFLE_BUFFER_SIZE") {
            training.shuffle_buffer_size = Some(v);
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_PREFETCH_BUFFER_SIZE") {
            training.prefetch_buffer_size = Some(v);
        }
        if let Some(v) = env_value("SEQBATCH_TRAINING_SEED") {
            training.seed = Some(v);
        }

        let inference = &mut self.inference;
        if let Some(v) = env_value("SEQBATCH_INFERENCE_BATCH_SIZE") {
            inference.batch_size = v;
        }
        if let Some(v) = env_value("SEQBATCH_INFERENCE_BUCKET_WIDTH") {
            inference.bucket_width = Some(v);
        }
        if let Some(v) = env_value("SEQBATCH_INFERENCE_NUM_THREADS") {
            inference.num_threads = Some(v);
        }
        if let Some(v) = env_value("SEQBATCH_INFERENCE_PREFETCH_BUFFER_SIZE") {
            inference.prefetch_buffer_size = Some(v);
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.inference.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();

        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.training.batch_type().unwrap(), BatchType::Examples);
        assert_eq!(config.training.batch_multiplier, 1);
        assert_eq!(config.training.batch_size_multiple, 1);
        assert!(config.training.bucket_width.is_none());
        assert!(!config.training.single_pass);
        assert_eq!(config.training.num_shards, 1);
        assert_eq!(config.training.shard_index, 0);
        assert!(config.training.prefetch_buffer_size.is_none());

        assert_eq!(config.inference.batch_size, 32);
        assert!(config.inference.bucket_width.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: PipelineConfig = "".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_full() {
        let toml_str = r#"
            [training]
            batch_size = 4096
            batch_type = "tokens"
            batch_multiplier = 2
            batch_size_multiple = 8
            bucket_width = 5
            maximum_features_length = [100, 50]
            maximum_labels_length = 120
            single_pass = true
            dataset_size = 100000
            num_shards = 4
            shard_index = 3
            num_threads = 8
            shuffle_buffer_size = -1
            prefetch_buffer_size = 0
            seed = 7

            [inference]
            batch_size = 16
            bucket_width = 10
        "#;

        let config: PipelineConfig = toml_str.parse().unwrap();
        let training = &config.training;
        assert_eq!(training.batch_size, 4096);
        assert_eq!(training.batch_type().unwrap(), BatchType::Tokens);
        assert_eq!(training.bucket_width, Some(5));
        assert_eq!(
            training.maximum_features_length,
            Some(LengthLimit::PerSource(vec![100, 50]))
        );
        assert_eq!(training.maximum_labels_length, Some(LengthLimit::Single(120)));
        assert!(training.single_pass);
        assert_eq!(training.shuffle_buffer_size, Some(-1));
        assert_eq!(training.prefetch_buffer_size, Some(0));
        assert_eq!(training.seed, Some(7));
        assert_eq!(config.inference.batch_size, 16);
        assert_eq!(config.inference.bucket_width, Some(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_batch_type_names_value() {
        let result: Result<PipelineConfig> = "[training]\nbatch_type = \"sentences\"".parse();
        let err = result.unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("'sentences'"));

        let config = TrainingConfig {
            batch_type: "words".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_invalid_configuration());
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: Result<PipelineConfig> = "invalid = [".parse();
        assert!(matches!(result, Err(PipelineError::Config { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [training]
            batch_size = 8
            bucket_width = 2
            "#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.training.batch_size, 8);
        assert_eq!(config.training.bucket_width, Some(2));
    }

    #[test]
    fn test_from_file_not_found() {
        let result = PipelineConfig::from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[training]\nnum_shards = 2\nshard_index = 2").unwrap();
        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert!(err.is_invalid_configuration());
    }

    #[test]
    fn test_validate_training() {
        let invalid = [
            TrainingConfig { batch_size: 0, ..Default::default() },
            TrainingConfig { batch_multiplier: 0, ..Default::default() },
            TrainingConfig { batch_size_multiple: 0, ..Default::default() },
            TrainingConfig { bucket_width: Some(0), ..Default::default() },
            TrainingConfig { num_shards: 0, ..Default::default() },
            TrainingConfig { num_threads: Some(0), ..Default::default() },
        ];
        for config in invalid {
            assert!(config.validate().unwrap_err().is_invalid_configuration());
        }
    }

    #[test]
    fn test_validate_inference_allows_zero_bucket_width() {
        let config = InferenceConfig {
            bucket_width: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = InferenceConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    // Helper to clear all SEQBATCH_ environment variables for test isolation
    fn clear_seqbatch_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("SEQBATCH_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variable tests are combined into a single test to avoid
    // race conditions when tests run in parallel, since env vars are global state.
    #[test]
    fn test_env_overrides() {
        clear_seqbatch_env_vars();

        std::env::set_var("SEQBATCH_TRAINING_BATCH_SIZE", "128");
        std::env::set_var("SEQBATCH_TRAINING_BATCH_TYPE", "tokens");
        std::env::set_var("SEQBATCH_TRAINING_BUCKET_WIDTH", "3");
        std::env::set_var("SEQBATCH_TRAINING_SINGLE_PASS", "true");
        std::env::set_var("SEQBATCH_TRAINING_SHUFFLE_BUFFER_SIZE", "-1");
        std::env::set_var("SEQBATCH_INFERENCE_BATCH_SIZE", "10");

        let config = PipelineConfig::default().with_env_overrides();

        assert_eq!(config.training.batch_size, 128);
        assert_eq!(config.training.batch_type().unwrap(), BatchType::Tokens);
        assert_eq!(config.training.bucket_width, Some(3));
        assert!(config.training.single_pass);
        assert_eq!(config.training.shuffle_buffer_size, Some(-1));
        assert_eq!(config.inference.batch_size, 10);

        clear_seqbatch_env_vars();

        // Invalid values should be ignored (keep defaults)
        std::env::set_var("SEQBATCH_TRAINING_BATCH_SIZE", "not_a_number");
        std::env::set_var("SEQBATCH_TRAINING_BATCH_TYPE", "sentences");

        let config = PipelineConfig::default().with_env_overrides();
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.training.batch_type().unwrap(), BatchType::Examples);

        clear_seqbatch_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut original = PipelineConfig::default();
        original.training.batch_type = BatchType::Tokens.to_string();
        original.training.maximum_features_length = Some(LengthLimit::PerSource(vec![3, 4]));
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: PipelineConfig = toml_str.parse().unwrap();
        assert_eq!(parsed.training.batch_type().unwrap(), BatchType::Tokens);
        assert_eq!(
            parsed.training.maximum_features_length,
            Some(LengthLimit::PerSource(vec![3, 4]))
        );
    }
}
