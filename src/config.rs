//! Sweep configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cleanup::DEFAULT_ANSWER_MARKER;
use crate::error::{EvalError, Result};
use crate::generate::DEFAULT_MAX_NEW_TOKENS;
use crate::prompt::PromptMode;

pub const DEFAULT_CHECKPOINT_PATTERN: &str = "llama_lora_finetuned_lr{lr}_wd{wd}";
pub const DEFAULT_RESULTS_PATTERN: &str = "llama_lora_finetuned_results_lr{lr}_wd{wd}.csv";

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    pub corpus: PathBuf,
    pub checkpoint_root: PathBuf,
    pub results_dir: PathBuf,
    pub learning_rates: Vec<f64>,
    pub weight_decays: Vec<f64>,
    /// Generator command line; see `CommandGenerator` for placeholders.
    pub generator: String,
    #[serde(default = "default_checkpoint_pattern")]
    pub checkpoint_pattern: String,
    #[serde(default = "default_results_pattern")]
    pub results_pattern: String,
    #[serde(default = "default_modes")]
    pub modes: Vec<PromptMode>,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default = "default_answer_marker")]
    pub answer_marker: String,
    #[serde(default)]
    pub jobs: usize,
    /// Per-generation limit such as "90s" or "2m".
    #[serde(default)]
    pub generation_timeout: Option<String>,
}

fn default_checkpoint_pattern() -> String {
    DEFAULT_CHECKPOINT_PATTERN.to_string()
}

fn default_results_pattern() -> String {
    DEFAULT_RESULTS_PATTERN.to_string()
}

fn default_modes() -> Vec<PromptMode> {
    PromptMode::ALL.to_vec()
}

fn default_max_new_tokens() -> usize {
    DEFAULT_MAX_NEW_TOKENS
}

fn default_answer_marker() -> String {
    DEFAULT_ANSWER_MARKER.to_string()
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut config: SweepConfig = toml::from_str(&raw)?;
        config.resolve_relative_to(path.parent().unwrap_or_else(|| Path::new(".")));
        config.validate()?;
        Ok(config)
    }

    /// Relative paths in the file are taken relative to the file itself.
    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [&mut self.corpus, &mut self.checkpoint_root, &mut self.results_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.learning_rates.is_empty() || self.weight_decays.is_empty() {
            return Err(EvalError::InvalidArg(
                "learning_rates and weight_decays must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self
            .learning_rates
            .iter()
            .chain(&self.weight_decays)
            .find(|v| !v.is_finite() || **v < 0.0)
        {
            return Err(EvalError::InvalidArg(format!(
                "hyperparameter {bad} must be finite and non-negative"
            )));
        }
        if self.modes.is_empty() {
            return Err(EvalError::InvalidArg("modes must not be empty".to_string()));
        }
        if self.generator.trim().is_empty() {
            return Err(EvalError::InvalidArg("generator must not be empty".to_string()));
        }
        self.timeout()?;
        Ok(())
    }

    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.generation_timeout
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw).map_err(|e| {
                    EvalError::InvalidArg(format!("generation_timeout {raw:?}: {e}"))
                })
            })
            .transpose()
    }

    /// Grid in learning-rate-major order.
    pub fn grid(&self) -> Vec<(f64, f64)> {
        self.learning_rates
            .iter()
            .flat_map(|lr| self.weight_decays.iter().map(move |wd| (*lr, *wd)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
corpus = "data/test.jsonl"
checkpoint_root = "/models"
results_dir = "results"
learning_rates = [0.01, 0.001]
weight_decays = [0.0001]
generator = "python generate.py --checkpoint {checkpoint}"
"#;

    #[test]
    fn defaults_fill_optional_fields() {
        let config: SweepConfig = toml::from_str(MINIMAL).unwrap();

        assert_eq!(config.checkpoint_pattern, DEFAULT_CHECKPOINT_PATTERN);
        assert_eq!(config.modes, PromptMode::ALL.to_vec());
        assert_eq!(config.max_new_tokens, 50);
        assert_eq!(config.answer_marker, "Answer:");
        assert_eq!(config.jobs, 0);
        assert!(config.timeout().unwrap().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn grid_is_learning_rate_major() {
        let mut config: SweepConfig = toml::from_str(MINIMAL).unwrap();
        config.weight_decays = vec![0.1, 0.2];

        assert_eq!(
            config.grid(),
            vec![(0.01, 0.1), (0.01, 0.2), (0.001, 0.1), (0.001, 0.2)]
        );
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.toml");
        fs::write(&path, MINIMAL).unwrap();

        let config = SweepConfig::load(&path).unwrap();
        assert_eq!(config.corpus, dir.path().join("data/test.jsonl"));
        assert_eq!(config.results_dir, dir.path().join("results"));
        assert_eq!(config.checkpoint_root, PathBuf::from("/models"));
    }

    #[test]
    fn parses_modes_and_timeout() {
        let raw = format!("{MINIMAL}modes = [\"few_shot\"]\ngeneration_timeout = \"90s\"\n");
        let config: SweepConfig = toml::from_str(&raw).unwrap();

        assert_eq!(config.modes, vec![PromptMode::FewShot]);
        assert_eq!(config.timeout().unwrap(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config: SweepConfig = toml::from_str(MINIMAL).unwrap();
        config.weight_decays.clear();
        assert!(config.validate().is_err());

        let mut config: SweepConfig = toml::from_str(MINIMAL).unwrap();
        config.learning_rates.push(-1.0);
        assert!(config.validate().is_err());

        let mut config: SweepConfig = toml::from_str(MINIMAL).unwrap();
        config.generation_timeout = Some("soon".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_mode_is_a_config_error() {
        let raw = format!("{MINIMAL}modes = [\"one_shot\"]\n");
        assert!(toml::from_str::<SweepConfig>(&raw).is_err());
    }
}
