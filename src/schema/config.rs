//! Configuration types for the search engine, optimizer and per-sector search spaces.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Activation, ConnectionKind, LayerKind, Param, Sector};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Evolution settings shared by every sector.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Configured sectors. Searching an unlisted sector is rejected.
    #[serde(default = "default_sectors")]
    pub sectors: BTreeMap<Sector, SectorConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            sectors: default_sectors(),
        }
    }
}

fn default_sectors() -> BTreeMap<Sector, SectorConfig> {
    Sector::built_in()
        .into_iter()
        .map(|sector| {
            let config = SectorConfig::for_sector(&sector);
            (sector, config)
        })
        .collect()
}

impl EngineConfig {
    /// Parse configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Register or replace a sector.
    pub fn with_sector(mut self, sector: Sector, config: SectorConfig) -> Self {
        self.sectors.insert(sector, config);
        self
    }

    /// Validate the optimizer and every sector.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.optimizer.validate()?;
        for (sector, config) in &self.sectors {
            config.validate(sector)?;
        }
        Ok(())
    }
}

/// Genetic algorithm settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Number of architectures per generation.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Architectures carried unchanged into the next generation and archived.
    #[serde(default = "default_elite_size")]
    pub elite_size: usize,
    /// Candidates drawn per tournament.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Crossover probability (0.0-1.0).
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Probability that an offspring receives one mutation (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Completed generations after which a session stops.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Perturbation scale as a fraction of the parameter range.
    /// Noise is clipped to two standard deviations.
    #[serde(default = "default_perturbation_strength")]
    pub perturbation_strength: f64,
    /// Per-architecture evaluation timeout in milliseconds.
    #[serde(default)]
    pub evaluation_timeout_ms: Option<u64>,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            elite_size: default_elite_size(),
            tournament_size: default_tournament_size(),
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            max_generations: default_max_generations(),
            perturbation_strength: default_perturbation_strength(),
            evaluation_timeout_ms: None,
            random_seed: None,
        }
    }
}

fn default_population_size() -> usize {
    20
}
fn default_elite_size() -> usize {
    5
}
fn default_tournament_size() -> usize {
    3
}
fn default_crossover_rate() -> f64 {
    0.7
}
fn default_mutation_rate() -> f64 {
    0.3
}
fn default_max_generations() -> usize {
    100
}
fn default_perturbation_strength() -> f64 {
    0.05
}

impl OptimizerConfig {
    pub fn evaluation_timeout(&self) -> Option<Duration> {
        self.evaluation_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        if self.tournament_size == 0 {
            return Err(ConfigError::EmptyTournament);
        }
        if self.max_generations == 0 {
            return Err(ConfigError::NoGenerations);
        }
        check_probability("crossover_rate", self.crossover_rate)?;
        check_probability("mutation_rate", self.mutation_rate)?;
        if !(self.perturbation_strength.is_finite() && self.perturbation_strength >= 0.0) {
            return Err(ConfigError::InvalidRate {
                name: "perturbation_strength",
                value: self.perturbation_strength,
            });
        }
        Ok(())
    }
}

/// Structural constraints and biases for one sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorConfig {
    /// Accuracy at which a search stops early.
    #[serde(default = "default_target_accuracy")]
    pub target_accuracy: f64,
    #[serde(default = "default_min_layers")]
    pub min_layers: usize,
    #[serde(default = "default_max_layers")]
    pub max_layers: usize,
    /// Layer kinds the generator may sample.
    #[serde(default = "default_layer_kinds")]
    pub layer_kinds: Vec<LayerKind>,
    /// Connection kinds permitted. Forward is mandatory.
    #[serde(default = "default_connection_kinds")]
    pub connection_kinds: Vec<ConnectionKind>,
    #[serde(default = "default_activations")]
    pub activations: Vec<Activation>,
    /// Probability of a skip connection at each eligible position.
    #[serde(default = "default_skip_probability")]
    pub skip_probability: f64,
    #[serde(default)]
    pub param_ranges: ParamRanges,
    /// Sector-specific narrowing of parameter ranges.
    #[serde(default)]
    pub clamps: Vec<ParamClamp>,
    #[serde(default)]
    pub complexity_weights: ComplexityWeights,
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self {
            target_accuracy: default_target_accuracy(),
            min_layers: default_min_layers(),
            max_layers: default_max_layers(),
            layer_kinds: default_layer_kinds(),
            connection_kinds: default_connection_kinds(),
            activations: default_activations(),
            skip_probability: default_skip_probability(),
            param_ranges: ParamRanges::default(),
            clamps: Vec::new(),
            complexity_weights: ComplexityWeights::default(),
        }
    }
}

fn default_target_accuracy() -> f64 {
    99.2
}
fn default_min_layers() -> usize {
    5
}
fn default_max_layers() -> usize {
    50
}
fn default_layer_kinds() -> Vec<LayerKind> {
    LayerKind::ALL.to_vec()
}
fn default_connection_kinds() -> Vec<ConnectionKind> {
    ConnectionKind::ALL.to_vec()
}
fn default_activations() -> Vec<Activation> {
    Activation::ALL.to_vec()
}
fn default_skip_probability() -> f64 {
    0.3
}

impl SectorConfig {
    /// Built-in defaults for a sector, including its structural clamps.
    pub fn for_sector(sector: &Sector) -> Self {
        let clamps = match sector {
            // Bounded attention keeps educational models small.
            Sector::Ferpa => vec![ParamClamp {
                param: Param::AttentionHeads,
                min: None,
                max: Some(4.0),
            }],
            // Capacity floor for dense layers.
            Sector::Fisma => vec![ParamClamp {
                param: Param::DenseUnits,
                min: Some(128.0),
                max: None,
            }],
            _ => Vec::new(),
        };
        Self {
            clamps,
            ..Self::default()
        }
    }

    /// Bounds for a parameter after applying this sector's clamps.
    pub fn valid_range(&self, param: Param) -> (f64, f64) {
        let (mut lo, mut hi) = self.param_ranges.bounds(param);
        for clamp in self.clamps.iter().filter(|c| c.param == param) {
            if let Some(min) = clamp.min {
                lo = lo.max(min);
            }
            if let Some(max) = clamp.max {
                hi = hi.min(max);
            }
        }
        (lo, hi)
    }

    pub fn validate(&self, sector: &Sector) -> Result<(), ConfigError> {
        if self.min_layers == 0 || self.min_layers > self.max_layers {
            return Err(ConfigError::InvalidLayerBounds {
                sector: sector.clone(),
                min: self.min_layers,
                max: self.max_layers,
            });
        }
        if self.layer_kinds.is_empty() {
            return Err(ConfigError::NoLayerKinds(sector.clone()));
        }
        if self.activations.is_empty() {
            return Err(ConfigError::NoActivations(sector.clone()));
        }
        if !self.connection_kinds.contains(&ConnectionKind::Forward) {
            return Err(ConfigError::ForwardRequired(sector.clone()));
        }
        check_probability("skip_probability", self.skip_probability)?;
        if !self.target_accuracy.is_finite() {
            return Err(ConfigError::InvalidRate {
                name: "target_accuracy",
                value: self.target_accuracy,
            });
        }

        for param in Param::ALL {
            let (min, max) = self.param_ranges.bounds(param);
            let invalid = !(min.is_finite() && max.is_finite())
                || min > max
                || (param.is_integer() && (min < 1.0 || min.ceil() > max.floor()))
                || (param == Param::DropoutRate && (min <= 0.0 || max >= 1.0));
            if invalid {
                return Err(ConfigError::InvalidParamRange { param, min, max });
            }

            let (lo, hi) = self.valid_range(param);
            if lo > hi || (param.is_integer() && lo.ceil() > hi.floor()) {
                return Err(ConfigError::InvalidClamp {
                    sector: sector.clone(),
                    param,
                });
            }
        }

        Ok(())
    }
}

/// Base ranges for kind-specific parameters, as inclusive (min, max).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRanges {
    #[serde(default = "default_dense_units")]
    pub dense_units: (f64, f64),
    #[serde(default = "default_conv_filters")]
    pub conv_filters: (f64, f64),
    #[serde(default = "default_lstm_units")]
    pub lstm_units: (f64, f64),
    #[serde(default = "default_attention_heads")]
    pub attention_heads: (f64, f64),
    #[serde(default = "default_attention_embedding_dim")]
    pub attention_embedding_dim: (f64, f64),
    #[serde(default = "default_dropout_rate")]
    pub dropout_rate: (f64, f64),
}

impl Default for ParamRanges {
    fn default() -> Self {
        Self {
            dense_units: default_dense_units(),
            conv_filters: default_conv_filters(),
            lstm_units: default_lstm_units(),
            attention_heads: default_attention_heads(),
            attention_embedding_dim: default_attention_embedding_dim(),
            dropout_rate: default_dropout_rate(),
        }
    }
}

fn default_dense_units() -> (f64, f64) {
    (32.0, 543.0)
}
fn default_conv_filters() -> (f64, f64) {
    (16.0, 271.0)
}
fn default_lstm_units() -> (f64, f64) {
    (32.0, 287.0)
}
fn default_attention_heads() -> (f64, f64) {
    (1.0, 8.0)
}
fn default_attention_embedding_dim() -> (f64, f64) {
    (64.0, 575.0)
}
fn default_dropout_rate() -> (f64, f64) {
    (0.1, 0.6)
}

impl ParamRanges {
    pub fn bounds(&self, param: Param) -> (f64, f64) {
        match param {
            Param::DenseUnits => self.dense_units,
            Param::ConvFilters => self.conv_filters,
            Param::LstmUnits => self.lstm_units,
            Param::AttentionHeads => self.attention_heads,
            Param::AttentionEmbeddingDim => self.attention_embedding_dim,
            Param::DropoutRate => self.dropout_rate,
        }
    }
}

/// Narrows one parameter's valid range for a sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamClamp {
    pub param: Param,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Scale factors for the structural complexity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityWeights {
    #[serde(default = "default_dense_per_unit")]
    pub dense_per_unit: f64,
    #[serde(default = "default_conv_per_filter")]
    pub conv_per_filter: f64,
    #[serde(default = "default_lstm_per_unit")]
    pub lstm_per_unit: f64,
    #[serde(default = "default_attention_per_head_dim")]
    pub attention_per_head_dim: f64,
    /// Flat cost of a dropout or normalization layer.
    #[serde(default = "default_shape_preserving")]
    pub shape_preserving: f64,
    #[serde(default = "default_per_connection")]
    pub per_connection: f64,
    /// Extra cost of each skip, residual or attention connection.
    #[serde(default = "default_per_non_forward")]
    pub per_non_forward: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            dense_per_unit: default_dense_per_unit(),
            conv_per_filter: default_conv_per_filter(),
            lstm_per_unit: default_lstm_per_unit(),
            attention_per_head_dim: default_attention_per_head_dim(),
            shape_preserving: default_shape_preserving(),
            per_connection: default_per_connection(),
            per_non_forward: default_per_non_forward(),
        }
    }
}

fn default_dense_per_unit() -> f64 {
    0.1
}
fn default_conv_per_filter() -> f64 {
    0.05
}
fn default_lstm_per_unit() -> f64 {
    0.2
}
fn default_attention_per_head_dim() -> f64 {
    0.001
}
fn default_shape_preserving() -> f64 {
    0.01
}
fn default_per_connection() -> f64 {
    0.05
}
fn default_per_non_forward() -> f64 {
    0.1
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRate { name, value })
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Sector {sector}: invalid layer bounds min={min} max={max}")]
    InvalidLayerBounds {
        sector: Sector,
        min: usize,
        max: usize,
    },
    #[error("Sector {0} allows no layer kinds")]
    NoLayerKinds(Sector),
    #[error("Sector {0} allows no activation functions")]
    NoActivations(Sector),
    #[error("Sector {0} must allow forward connections")]
    ForwardRequired(Sector),
    #[error("Invalid range for {param:?}: [{min}, {max}]")]
    InvalidParamRange { param: Param, min: f64, max: f64 },
    #[error("Sector {sector}: clamp on {param:?} leaves an empty range")]
    InvalidClamp { sector: Sector, param: Param },
    #[error("{name} out of range: {value}")]
    InvalidRate { name: &'static str, value: f64 },
    #[error("Population size must be at least 1")]
    EmptyPopulation,
    #[error("Tournament size must be at least 1")]
    EmptyTournament,
    #[error("Max generations must be at least 1")]
    NoGenerations,
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
