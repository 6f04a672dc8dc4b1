//! Architecture data model: sectors, layers, connections and performance records.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ComplexityWeights;

/// Independent operating domain with its own search space and target accuracy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sector {
    /// Educational records.
    Ferpa,
    /// Federal information systems.
    Fisma,
    /// Content filtering.
    Cipa,
    /// Balanced, general-purpose domain. Also the fallback search space.
    General,
    /// Any other named sector, uppercased when parsed.
    Custom(String),
}

impl Sector {
    /// Sectors configured out of the box.
    pub fn built_in() -> [Sector; 4] {
        [Sector::Ferpa, Sector::Fisma, Sector::Cipa, Sector::General]
    }

    /// Canonical name.
    pub fn as_str(&self) -> &str {
        match self {
            Sector::Ferpa => "FERPA",
            Sector::Fisma => "FISMA",
            Sector::Cipa => "CIPA",
            Sector::General => "GENERAL",
            Sector::Custom(name) => name,
        }
    }
}

/// Sector names are case-insensitive: every parsed name is uppercased.
impl From<&str> for Sector {
    fn from(name: &str) -> Self {
        let name = name.to_ascii_uppercase();
        match name.as_str() {
            "FERPA" => Sector::Ferpa,
            "FISMA" => Sector::Fisma,
            "CIPA" => Sector::Cipa,
            "GENERAL" => Sector::General,
            _ => Sector::Custom(name),
        }
    }
}

impl From<String> for Sector {
    fn from(name: String) -> Self {
        Sector::from(name.as_str())
    }
}

impl From<Sector> for String {
    fn from(sector: Sector) -> Self {
        sector.as_str().to_string()
    }
}

impl FromStr for Sector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Sector::from(s))
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique architecture identifier (sector, generation, sequence and random suffix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchitectureId(pub String);

impl ArchitectureId {
    pub fn new(sector: &Sector, generation: usize, sequence: u64, suffix: u32) -> Self {
        Self(format!(
            "nas-{}-g{}-{:06}-{:08x}",
            sector.as_str().to_ascii_lowercase(),
            generation,
            sequence,
            suffix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchitectureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer identifier, unique within one architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u32);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

/// Kind of a layer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Dense,
    Conv2d,
    Lstm,
    Attention,
    Dropout,
    BatchNorm,
}

impl LayerKind {
    pub const ALL: [LayerKind; 6] = [
        LayerKind::Dense,
        LayerKind::Conv2d,
        LayerKind::Lstm,
        LayerKind::Attention,
        LayerKind::Dropout,
        LayerKind::BatchNorm,
    ];

    /// Regularization and normalization layers keep their input shape.
    pub fn is_shape_preserving(self) -> bool {
        matches!(self, LayerKind::Dropout | LayerKind::BatchNorm)
    }

    /// Whether an activation function is meaningful for this kind.
    pub fn has_activation(self) -> bool {
        !self.is_shape_preserving()
    }

    /// Numeric parameters that mutation may perturb.
    pub fn tunables(self) -> &'static [Param] {
        match self {
            LayerKind::Dense => &[Param::DenseUnits],
            LayerKind::Conv2d => &[Param::ConvFilters],
            LayerKind::Lstm => &[Param::LstmUnits],
            LayerKind::Attention => &[Param::AttentionHeads, Param::AttentionEmbeddingDim],
            LayerKind::Dropout => &[Param::DropoutRate],
            LayerKind::BatchNorm => &[],
        }
    }
}

/// A tunable, kind-specific numeric layer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    DenseUnits,
    ConvFilters,
    LstmUnits,
    AttentionHeads,
    AttentionEmbeddingDim,
    DropoutRate,
}

impl Param {
    pub const ALL: [Param; 6] = [
        Param::DenseUnits,
        Param::ConvFilters,
        Param::LstmUnits,
        Param::AttentionHeads,
        Param::AttentionEmbeddingDim,
        Param::DropoutRate,
    ];

    /// Layer kind owning this parameter.
    pub fn kind(self) -> LayerKind {
        match self {
            Param::DenseUnits => LayerKind::Dense,
            Param::ConvFilters => LayerKind::Conv2d,
            Param::LstmUnits => LayerKind::Lstm,
            Param::AttentionHeads | Param::AttentionEmbeddingDim => LayerKind::Attention,
            Param::DropoutRate => LayerKind::Dropout,
        }
    }

    /// Integer-valued parameters are positive widths or counts.
    pub fn is_integer(self) -> bool {
        !matches!(self, Param::DropoutRate)
    }
}

/// Kind-specific layer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerParams {
    Dense {
        units: u32,
    },
    Conv2d {
        filters: u32,
        kernel_size: [u32; 2],
        strides: [u32; 2],
    },
    Lstm {
        units: u32,
    },
    Attention {
        heads: u32,
        embedding_dim: u32,
    },
    Dropout {
        rate: f64,
    },
    BatchNorm,
}

impl LayerParams {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerParams::Dense { .. } => LayerKind::Dense,
            LayerParams::Conv2d { .. } => LayerKind::Conv2d,
            LayerParams::Lstm { .. } => LayerKind::Lstm,
            LayerParams::Attention { .. } => LayerKind::Attention,
            LayerParams::Dropout { .. } => LayerKind::Dropout,
            LayerParams::BatchNorm => LayerKind::BatchNorm,
        }
    }

    /// Read a numeric parameter. `None` if this layer kind does not have it.
    pub fn get(&self, param: Param) -> Option<f64> {
        match (self, param) {
            (LayerParams::Dense { units }, Param::DenseUnits)
            | (LayerParams::Lstm { units }, Param::LstmUnits) => Some(f64::from(*units)),
            (LayerParams::Conv2d { filters, .. }, Param::ConvFilters) => Some(f64::from(*filters)),
            (LayerParams::Attention { heads, .. }, Param::AttentionHeads) => {
                Some(f64::from(*heads))
            }
            (LayerParams::Attention { embedding_dim, .. }, Param::AttentionEmbeddingDim) => {
                Some(f64::from(*embedding_dim))
            }
            (LayerParams::Dropout { rate }, Param::DropoutRate) => Some(*rate),
            _ => None,
        }
    }

    /// Write a numeric parameter, rounding integer parameters.
    /// Returns false if this layer kind does not have the parameter.
    pub fn set(&mut self, param: Param, value: f64) -> bool {
        let as_count = value.round().max(1.0) as u32;
        match (self, param) {
            (LayerParams::Dense { units }, Param::DenseUnits)
            | (LayerParams::Lstm { units }, Param::LstmUnits) => *units = as_count,
            (LayerParams::Conv2d { filters, .. }, Param::ConvFilters) => *filters = as_count,
            (LayerParams::Attention { heads, .. }, Param::AttentionHeads) => *heads = as_count,
            (LayerParams::Attention { embedding_dim, .. }, Param::AttentionEmbeddingDim) => {
                *embedding_dim = as_count
            }
            (LayerParams::Dropout { rate }, Param::DropoutRate) => *rate = value,
            _ => return false,
        }
        true
    }

    /// Output shape descriptor. Empty for shape-preserving kinds.
    pub fn output_shape(&self) -> Vec<u32> {
        match self {
            LayerParams::Dense { units } | LayerParams::Lstm { units } => vec![*units],
            LayerParams::Conv2d { filters, .. } => vec![*filters],
            LayerParams::Attention { embedding_dim, .. } => vec![*embedding_dim],
            LayerParams::Dropout { .. } | LayerParams::BatchNorm => Vec::new(),
        }
    }
}

/// Activation function tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Gelu,
    Swish,
    Tanh,
    Sigmoid,
    LeakyRelu,
}

impl Activation {
    pub const ALL: [Activation; 6] = [
        Activation::Relu,
        Activation::Gelu,
        Activation::Swish,
        Activation::Tanh,
        Activation::Sigmoid,
        Activation::LeakyRelu,
    ];
}

/// One node in the architecture graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    #[serde(flatten)]
    pub params: LayerParams,
    /// Present only for transform-capable kinds.
    pub activation: Option<Activation>,
    pub output_shape: Vec<u32>,
}

impl Layer {
    pub fn new(id: LayerId, params: LayerParams, activation: Option<Activation>) -> Self {
        let activation = activation.filter(|_| params.kind().has_activation());
        let output_shape = params.output_shape();
        Self {
            id,
            params,
            activation,
            output_shape,
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.params.kind()
    }
}

/// Kind of a directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Sequential edge between adjacent layers.
    Forward,
    /// Edge from a non-adjacent earlier layer.
    Skip,
    Residual,
    Attention,
}

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 4] = [
        ConnectionKind::Forward,
        ConnectionKind::Skip,
        ConnectionKind::Residual,
        ConnectionKind::Attention,
    ];
}

/// Directed edge between two layers of the same architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: LayerId,
    pub to: LayerId,
    /// Search-time heuristic in [0, 1]; not a trained weight.
    pub weight: f64,
    pub kind: ConnectionKind,
}

/// Evaluator output attached to an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Percentage in [0, 100].
    pub accuracy: f64,
    pub latency: f64,
    pub memory: f64,
    pub compute_cost: f64,
    pub convergence_speed: f64,
    /// Percentage in [0, 100].
    pub robustness: f64,
}

impl PerformanceRecord {
    /// Record assigned to architectures whose evaluation failed or timed out.
    pub fn worst() -> Self {
        Self {
            accuracy: 0.0,
            latency: f64::MAX,
            memory: f64::MAX,
            compute_cost: f64::MAX,
            convergence_speed: 0.0,
            robustness: 0.0,
        }
    }

    /// Clamp percentage fields into [0, 100]; NaN becomes 0.
    pub fn clamped(self) -> Self {
        let percent = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) };
        Self {
            accuracy: percent(self.accuracy),
            robustness: percent(self.robustness),
            ..self
        }
    }
}

/// Structural invariant violations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructureError {
    #[error("Layer count {count} outside [{min}, {max}]")]
    LayerCount {
        count: usize,
        min: usize,
        max: usize,
    },
    #[error("Duplicate layer id {0}")]
    DuplicateLayer(LayerId),
    #[error("Connection {from} -> {to} references a missing layer")]
    DanglingConnection { from: LayerId, to: LayerId },
    #[error("Layer {0} is connected to itself")]
    SelfLoop(LayerId),
    #[error("Missing forward connection {from} -> {to}")]
    MissingForward { from: LayerId, to: LayerId },
}

/// One candidate network topology under evolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub id: ArchitectureId,
    pub sector: Sector,
    /// Generation the architecture was created in.
    pub generation: usize,
    /// Zero (random), one (copy/mutation) or two (crossover) parents.
    pub parents: Vec<ArchitectureId>,
    pub layers: Vec<Layer>,
    pub connections: Vec<Connection>,
    /// Derived from structure; see [`complexity`].
    pub complexity: f64,
    /// `None` until evaluated.
    #[serde(default)]
    pub performance: Option<PerformanceRecord>,
}

impl Architecture {
    /// Accuracy, or 0 if not yet evaluated.
    pub fn accuracy(&self) -> f64 {
        self.performance.map_or(0.0, |p| p.accuracy)
    }

    pub fn is_evaluated(&self) -> bool {
        self.performance.is_some()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn has_layer_kind(&self, kind: LayerKind) -> bool {
        self.layers.iter().any(|l| l.kind() == kind)
    }

    /// Check the structural invariants against layer-count bounds.
    pub fn validate(&self, min_layers: usize, max_layers: usize) -> Result<(), StructureError> {
        let count = self.layers.len();
        if count < min_layers || count > max_layers {
            return Err(StructureError::LayerCount {
                count,
                min: min_layers,
                max: max_layers,
            });
        }

        let mut ids = HashSet::with_capacity(count);
        for layer in &self.layers {
            if !ids.insert(layer.id) {
                return Err(StructureError::DuplicateLayer(layer.id));
            }
        }

        for c in &self.connections {
            if !ids.contains(&c.from) || !ids.contains(&c.to) {
                return Err(StructureError::DanglingConnection {
                    from: c.from,
                    to: c.to,
                });
            }
            if c.from == c.to {
                return Err(StructureError::SelfLoop(c.from));
            }
        }

        for pair in self.layers.windows(2) {
            let (from, to) = (pair[0].id, pair[1].id);
            let linked = self
                .connections
                .iter()
                .any(|c| c.kind == ConnectionKind::Forward && c.from == from && c.to == to);
            if !linked {
                return Err(StructureError::MissingForward { from, to });
            }
        }

        Ok(())
    }
}

/// Ranking order: higher accuracy first, then lower complexity, then id.
pub fn rank_order(a: &Architecture, b: &Architecture) -> Ordering {
    b.accuracy()
        .total_cmp(&a.accuracy())
        .then_with(|| a.complexity.total_cmp(&b.complexity))
        .then_with(|| a.id.cmp(&b.id))
}

/// Structural complexity. Pure and never negative.
pub fn complexity(
    layers: &[Layer],
    connections: &[Connection],
    weights: &ComplexityWeights,
) -> f64 {
    let layer_total: f64 = layers
        .iter()
        .map(|layer| match &layer.params {
            LayerParams::Dense { units } => f64::from(*units) * weights.dense_per_unit,
            LayerParams::Conv2d { filters, .. } => f64::from(*filters) * weights.conv_per_filter,
            LayerParams::Lstm { units } => f64::from(*units) * weights.lstm_per_unit,
            LayerParams::Attention {
                heads,
                embedding_dim,
            } => f64::from(*heads) * f64::from(*embedding_dim) * weights.attention_per_head_dim,
            LayerParams::Dropout { .. } | LayerParams::BatchNorm => weights.shape_preserving,
        })
        .sum();

    let non_forward = connections
        .iter()
        .filter(|c| c.kind != ConnectionKind::Forward)
        .count();
    let connection_total = connections.len() as f64 * weights.per_connection
        + non_forward as f64 * weights.per_non_forward;

    (layer_total + connection_total).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(id: u32, units: u32) -> Layer {
        Layer::new(
            LayerId(id),
            LayerParams::Dense { units },
            Some(Activation::Relu),
        )
    }

    fn scored(id: &str, accuracy: f64, complexity: f64) -> Architecture {
        Architecture {
            id: ArchitectureId(id.to_string()),
            sector: Sector::General,
            generation: 0,
            parents: Vec::new(),
            layers: Vec::new(),
            connections: Vec::new(),
            complexity,
            performance: Some(PerformanceRecord {
                accuracy,
                ..PerformanceRecord::worst()
            }),
        }
    }

    #[test]
    fn test_sector_parsing() {
        assert_eq!(Sector::from("ferpa"), Sector::Ferpa);
        assert_eq!(Sector::from("A"), Sector::Custom("A".to_string()));
        assert_eq!(Sector::from("lab"), Sector::from("LAB"));
        assert_eq!(Sector::from("lab").to_string(), "LAB");
        assert_eq!(Sector::Fisma.to_string(), "FISMA");
    }

    #[test]
    fn test_sector_serializes_as_string() {
        let json = serde_json::to_string(&Sector::Cipa).unwrap();
        assert_eq!(json, "\"CIPA\"");
        let parsed: Sector = serde_json::from_str("\"lab\"").unwrap();
        assert_eq!(parsed, Sector::Custom("LAB".to_string()));
    }

    #[test]
    fn test_tie_break_prefers_lower_complexity() {
        let simple = scored("a", 90.0, 10.0);
        let heavy = scored("b", 90.0, 20.0);
        assert_eq!(rank_order(&simple, &heavy), Ordering::Less);

        let mut ranked = vec![heavy.clone(), simple.clone()];
        ranked.sort_by(rank_order);
        assert_eq!(ranked[0].id, simple.id);
    }

    #[test]
    fn test_rank_accuracy_dominates() {
        let better = scored("a", 91.0, 500.0);
        let worse = scored("b", 90.0, 1.0);
        assert_eq!(rank_order(&better, &worse), Ordering::Less);
    }

    #[test]
    fn test_complexity_counts_non_forward() {
        let weights = ComplexityWeights::default();
        let layers = vec![dense(0, 100), dense(1, 100), dense(2, 100)];
        let forward = vec![
            Connection {
                from: LayerId(0),
                to: LayerId(1),
                weight: 1.0,
                kind: ConnectionKind::Forward,
            },
            Connection {
                from: LayerId(1),
                to: LayerId(2),
                weight: 1.0,
                kind: ConnectionKind::Forward,
            },
        ];
        let mut with_skip = forward.clone();
        with_skip.push(Connection {
            from: LayerId(0),
            to: LayerId(2),
            weight: 0.2,
            kind: ConnectionKind::Skip,
        });

        let base = complexity(&layers, &forward, &weights);
        let skipped = complexity(&layers, &with_skip, &weights);
        assert!((base - (30.0 + 0.1)).abs() < 1e-9);
        assert!((skipped - base - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_param_set_rounds_integers() {
        let mut params = LayerParams::Dense { units: 64 };
        assert!(params.set(Param::DenseUnits, 99.6));
        assert_eq!(params.get(Param::DenseUnits), Some(100.0));
        assert!(!params.set(Param::DropoutRate, 0.3));
    }

    #[test]
    fn test_shape_preserving_layers_have_no_activation() {
        let layer = Layer::new(
            LayerId(0),
            LayerParams::Dropout { rate: 0.2 },
            Some(Activation::Gelu),
        );
        assert!(layer.activation.is_none());
        assert!(layer.output_shape.is_empty());
    }

    #[test]
    fn test_validate_detects_self_loop() {
        let mut arch = scored("a", 0.0, 0.0);
        arch.layers = vec![dense(0, 32), dense(1, 32)];
        arch.connections = vec![
            Connection {
                from: LayerId(0),
                to: LayerId(1),
                weight: 1.0,
                kind: ConnectionKind::Forward,
            },
            Connection {
                from: LayerId(1),
                to: LayerId(1),
                weight: 1.0,
                kind: ConnectionKind::Residual,
            },
        ];
        assert_eq!(
            arch.validate(1, 5),
            Err(StructureError::SelfLoop(LayerId(1)))
        );
        arch.connections.pop();
        assert!(arch.validate(1, 5).is_ok());
        assert!(matches!(
            arch.validate(3, 5),
            Err(StructureError::LayerCount { count: 2, .. })
        ));
    }
}
