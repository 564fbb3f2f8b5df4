//! Optimizer and model configuration.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::Dimensionality;
use crate::model::{ModelFamily, TileModel};

// =============================================================================
// Model selection
// =============================================================================

/// Regulariser side of an interpolated model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regularizer {
    pub family: ModelFamily,
    /// Weight of the regulariser in the blend, in [0, 1].
    pub lambda: f64,
}

/// Requested model for a tile: a base family, optionally regularised
/// towards a second family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub family: ModelFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regularizer: Option<Regularizer>,
}

impl ModelSpec {
    pub fn plain(family: ModelFamily) -> Self {
        Self {
            family,
            regularizer: None,
        }
    }

    pub fn regularized(family: ModelFamily, towards: ModelFamily, lambda: f64) -> Self {
        Self {
            family,
            regularizer: Some(Regularizer {
                family: towards,
                lambda,
            }),
        }
    }

    /// Identity model of the given dimensionality.
    pub fn build(&self, dim: Dimensionality) -> Result<TileModel> {
        let model = TileModel::new(self.family, dim);
        match self.regularizer {
            None => Ok(model),
            Some(r) => TileModel::interpolated(model, TileModel::new(r.family, dim), r.lambda),
        }
    }
}

impl Default for ModelSpec {
    /// Affine regularised towards translation with λ = 0.1.
    fn default() -> Self {
        Self::regularized(ModelFamily::Affine, ModelFamily::Translation, 0.1)
    }
}

/// How the initial model of every tile is chosen.
///
/// `translation_only` wins over everything else, then `affine_only`, then a
/// per-tile entry, then `default`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub translation_only: bool,
    pub affine_only: bool,
    pub default: ModelSpec,
    pub per_tile: BTreeMap<usize, ModelSpec>,
}

impl ModelConfig {
    pub fn translation_only() -> Self {
        Self {
            translation_only: true,
            ..Default::default()
        }
    }

    pub fn affine_only() -> Self {
        Self {
            affine_only: true,
            ..Default::default()
        }
    }

    pub fn spec_for(&self, tile: usize) -> ModelSpec {
        if self.translation_only {
            ModelSpec::plain(ModelFamily::Translation)
        } else if self.affine_only {
            ModelSpec::plain(ModelFamily::Affine)
        } else {
            self.per_tile.get(&tile).copied().unwrap_or(self.default)
        }
    }

    /// Initial model for a tile in a dataset of the given dimensionality.
    pub fn model_for(&self, tile: usize, dim: Dimensionality) -> Result<TileModel> {
        self.spec_for(tile).build(dim)
    }

    /// Panics on an invalid configuration.
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{}", err);
        }
    }

    /// Reports the first invalid setting.
    pub fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !(self.translation_only && self.affine_only),
            "translation_only and affine_only are mutually exclusive"
        );
        for spec in std::iter::once(&self.default).chain(self.per_tile.values()) {
            if let Some(r) = spec.regularizer {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&r.lambda),
                    "Regularizer lambda must be in [0, 1], got {}",
                    r.lambda
                );
            }
        }
        Ok(())
    }
}

// =============================================================================
// Optimizer configuration
// =============================================================================

/// Configuration of a global optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub models: ModelConfig,
    /// Fixed number of refinement iterations per phase.
    pub iterations: usize,
    /// Step size of the translation phase.
    pub translation_damping: f64,
    /// Step size of the full-model phase.
    pub full_model_damping: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            models: ModelConfig::default(),
            iterations: 5000,
            translation_damping: 1.0,
            full_model_damping: 0.9,
        }
    }
}

impl OptimizerConfig {
    /// Panics on an invalid configuration.
    pub fn validate(&self) {
        if let Err(err) = self.check() {
            panic!("{}", err);
        }
    }

    /// Reports the first invalid setting.
    pub fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.iterations > 0,
            "iterations must be positive, got {}",
            self.iterations
        );
        anyhow::ensure!(
            self.translation_damping > 0.0 && self.translation_damping <= 1.0,
            "translation_damping must be in (0, 1], got {}",
            self.translation_damping
        );
        anyhow::ensure!(
            self.full_model_damping > 0.0 && self.full_model_damping <= 1.0,
            "full_model_damping must be in (0, 1], got {}",
            self.full_model_damping
        );
        self.models.check()
    }

    /// Load from a YAML or JSON file, chosen by extension, and check it.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config: Self = load_file(path)?;
        config
            .check()
            .with_context(|| format!("Invalid optimizer configuration in {}", path.display()))?;
        Ok(config)
    }
}

// =============================================================================
// File loading
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .with_context(|| format!("Missing file extension: {}", path.display()))?;

        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Unsupported file extension for file: {}", path.display()),
        }
    }
}

pub fn deserialize<T: DeserializeOwned>(text: &str, format: FileFormat) -> anyhow::Result<T> {
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(text)?),
        FileFormat::Json => Ok(serde_json::from_str(text)?),
    }
}

/// Read and deserialize a YAML or JSON file.
pub fn load_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    deserialize(&text, format).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_pipeline() {
        let config = OptimizerConfig::default();
        assert_eq!(config.iterations, 5000);
        assert_eq!(config.translation_damping, 1.0);
        assert_eq!(config.full_model_damping, 0.9);
        assert_eq!(
            config.models.default,
            ModelSpec::regularized(ModelFamily::Affine, ModelFamily::Translation, 0.1)
        );
        config.validate();
    }

    #[test]
    fn flags_override_per_tile_choice() {
        let mut models = ModelConfig::translation_only();
        models
            .per_tile
            .insert(3, ModelSpec::plain(ModelFamily::Rigid));
        let model = models.model_for(3, Dimensionality::Two).unwrap();
        assert!(model.is_translation());

        models.translation_only = false;
        let model = models.model_for(3, Dimensionality::Two).unwrap();
        assert_eq!(model.family(), Some(ModelFamily::Rigid));

        let model = models.model_for(4, Dimensionality::Three).unwrap();
        assert_eq!(model.family(), None);
        assert_eq!(model.dimensionality(), Dimensionality::Three);

        let model = ModelConfig::affine_only()
            .model_for(4, Dimensionality::Two)
            .unwrap();
        assert_eq!(model, TileModel::new(ModelFamily::Affine, Dimensionality::Two));
    }

    #[test]
    fn yaml_config_fills_missing_fields() {
        let text = "
iterations: 200
models:
  per_tile:
    7:
      family: rigid
      regularizer:
        family: translation
        lambda: 0.25
";
        let config: OptimizerConfig = deserialize(text, FileFormat::Yaml).unwrap();
        assert_eq!(config.iterations, 200);
        assert_eq!(config.full_model_damping, 0.9);
        assert_eq!(
            config.models.per_tile[&7],
            ModelSpec::regularized(ModelFamily::Rigid, ModelFamily::Translation, 0.25)
        );
        assert!(!config.models.translation_only);
    }

    #[test]
    fn json_config_parses() {
        let text = r#"{ "models": { "translation_only": true }, "translation_damping": 0.5 }"#;
        let config: OptimizerConfig = deserialize(text, FileFormat::Json).unwrap();
        assert!(config.models.translation_only);
        assert_eq!(config.translation_damping, 0.5);
        assert_eq!(config.iterations, 5000);
    }

    #[test]
    fn file_format_is_chosen_by_extension() {
        assert_eq!(
            FileFormat::from_path(Path::new("run.YML")).unwrap(),
            FileFormat::Yaml
        );
        assert_eq!(
            FileFormat::from_path(Path::new("matches.json")).unwrap(),
            FileFormat::Json
        );
        assert!(FileFormat::from_path(Path::new("config.toml")).is_err());
        assert!(FileFormat::from_path(Path::new("config")).is_err());
    }

    #[test]
    #[should_panic(expected = "mutually exclusive")]
    fn both_flags_are_rejected() {
        let models = ModelConfig {
            translation_only: true,
            affine_only: true,
            ..Default::default()
        };
        models.validate();
    }

    #[test]
    #[should_panic(expected = "iterations must be positive")]
    fn zero_iterations_are_rejected() {
        OptimizerConfig {
            iterations: 0,
            ..Default::default()
        }
        .validate();
    }

    fn write_temp(name: &str, text: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("tile_optimizer_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn loading_checks_the_configuration() {
        let path = write_temp("valid.yaml", "iterations: 12\n");
        assert_eq!(OptimizerConfig::load(&path).unwrap().iterations, 12);

        let path = write_temp("zero_iterations.yaml", "iterations: 0\n");
        let err = OptimizerConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("iterations must be positive"));

        let path = write_temp(
            "bad_lambda.json",
            r#"{ "models": { "default": { "family": "affine", "regularizer": { "family": "translation", "lambda": 2.0 } } } }"#,
        );
        let err = OptimizerConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("lambda must be in [0, 1]"));
    }
}
