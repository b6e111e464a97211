//! TOML configuration.
//!
//! Every section is optional. Missing keys fall back to their defaults:
//!
//! ```toml
//! extractor = "optimized"
//!
//! [extraction]
//! n_fft = 2048
//! hop_length = 512
//!
//! [weights]
//! correlation_weight = 0.7
//! l2_weight = 0.3
//!
//! [thresholds]
//! min_score = 0.8
//! min_duration = 0.0
//! correlation_threshold = 0.7
//! l2_threshold = 0.5
//!
//! [lsh]
//! num_tables = 5
//! hash_size = 10
//! seed = 42
//!
//! [batch]
//! mode = "thread"
//! max_workers = 8
//! ```

use crate::batch::BatchConfig;
use crate::compare::{MatchThresholds, SimilarityWeights};
use crate::error::{FingerprintError, Result};
use crate::extractor::{ExtractionParams, ExtractorKind};
use crate::lsh::LshConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub extractor: ExtractorKind,
    pub extraction: ExtractionParams,
    pub weights: SimilarityWeights,
    pub thresholds: MatchThresholds,
    pub lsh: LshConfig,
    pub batch: BatchConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| FingerprintError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| FingerprintError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FingerprintError::Config(e.to_string()))
    }

    /// Check every invariant. Deserialization already validates the STFT
    /// parameters; this covers values set programmatically too.
    pub fn validate(&self) -> Result<()> {
        self.extraction.validate()?;
        self.lsh.validate()?;
        self.batch.validate()?;

        let w = &self.weights;
        if !(w.correlation_weight.is_finite() && w.l2_weight.is_finite())
            || w.correlation_weight < 0.0
            || w.l2_weight < 0.0
        {
            return Err(FingerprintError::invalid(
                "similarity weights must be finite and >= 0",
            ));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("min_score", t.min_score),
            ("min_duration", t.min_duration),
            ("correlation_threshold", t.correlation_threshold),
            ("l2_threshold", t.l2_threshold),
        ] {
            if value.is_nan() {
                return Err(FingerprintError::invalid(format!("{} is NaN", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::DispatchMode;
    use std::io::Write;

    // ==========================================================================
    // PARSING TESTS
    // ==========================================================================

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.extraction.n_fft(), 2048);
        assert_eq!(config.extraction.hop_length(), 512);
        assert_eq!(config.weights.correlation_weight, 0.7);
        assert_eq!(config.thresholds.min_score, 0.8);
        assert_eq!(config.lsh.num_tables, 5);
        assert_eq!(config.lsh.hash_size, 10);
        assert_eq!(config.lsh.seed, 42);
        assert_eq!(config.batch.mode, DispatchMode::Thread);
        assert_eq!(config.batch.max_workers, None);
        assert_eq!(config.extractor, ExtractorKind::Optimized);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            extractor = "reference"

            [extraction]
            n_fft = 4096
            hop_length = 1024

            [lsh]
            hash_size = 12

            [batch]
            mode = "isolated"
            max_workers = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.extractor, ExtractorKind::Reference);
        assert_eq!(config.extraction.n_fft(), 4096);
        assert_eq!(config.lsh.hash_size, 12);
        assert_eq!(config.lsh.num_tables, 5);
        assert_eq!(config.batch.mode, DispatchMode::Isolated);
        assert_eq!(config.batch.max_workers, Some(3));
        assert_eq!(config.weights, SimilarityWeights::default());
    }

    #[test]
    fn test_round_trip_toml() {
        let mut config = Config::default();
        config.lsh.seed = 7;
        config.thresholds.min_score = 0.6;
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    // ==========================================================================
    // VALIDATION TESTS
    // ==========================================================================

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml_str("[extraction]\nn_fft = 1000\nhop_length = 10").is_err());
        assert!(Config::from_toml_str("[lsh]\nhash_size = 65").is_err());
        assert!(Config::from_toml_str("[batch]\nmax_workers = 0").is_err());
        assert!(Config::from_toml_str("[weights]\nl2_weight = -0.5").is_err());
        assert!(Config::from_toml_str("extractor = \"gpu\"").is_err());
        assert!(Config::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[thresholds]\nmin_score = 0.9").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.thresholds.min_score, 0.9);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/sonoprint.toml")).unwrap_err();
        assert!(matches!(err, FingerprintError::Io(_)));
    }
}
