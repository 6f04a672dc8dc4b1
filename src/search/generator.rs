//! Architecture generation: random graphs, connection chains and complexity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::prelude::*;

use crate::schema::{
    Architecture, ArchitectureId, ConfigError, Connection, ConnectionKind, Layer, LayerId,
    LayerKind, LayerParams, Param, complexity,
};

use super::space::SearchSpace;

/// Builds architectures that honor one sector's search space.
#[derive(Debug)]
pub struct ArchitectureGenerator {
    space: Arc<SearchSpace>,
    next_sequence: AtomicU64,
}

impl ArchitectureGenerator {
    /// Create a generator. Fails if the space's bounds are inconsistent.
    pub fn new(space: Arc<SearchSpace>) -> Result<Self, ConfigError> {
        space.config().validate(space.sector())?;
        Ok(Self {
            space,
            next_sequence: AtomicU64::new(0),
        })
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Allocate a fresh architecture id.
    pub fn next_id<R: Rng + ?Sized>(&self, rng: &mut R, generation: usize) -> ArchitectureId {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        ArchitectureId::new(self.space.sector(), generation, sequence, rng.r#gen())
    }

    /// Generate a random architecture within the space's bounds.
    pub fn generate_random<R: Rng + ?Sized>(&self, rng: &mut R, generation: usize) -> Architecture {
        let (min_layers, max_layers) = self.space.layer_bounds();
        let count = rng.gen_range(min_layers..=max_layers);

        let layers: Vec<Layer> = (0..count).map(|i| self.random_layer(rng, i)).collect();

        let allow_skip = self.space.allows_connection(ConnectionKind::Skip);
        let skip_probability = self.space.config().skip_probability;
        let mut connections = Vec::with_capacity(count * 2);

        for i in 1..count {
            connections.push(Connection {
                from: layers[i - 1].id,
                to: layers[i].id,
                weight: rng.r#gen::<f64>(),
                kind: ConnectionKind::Forward,
            });

            // Skip connections start at least two layers back
            if i > 1 && allow_skip && rng.gen_bool(skip_probability) {
                let from = rng.gen_range(0..i - 1);
                connections.push(Connection {
                    from: layers[from].id,
                    to: layers[i].id,
                    weight: rng.r#gen::<f64>() * 0.5,
                    kind: ConnectionKind::Skip,
                });
            }
        }

        let complexity = complexity(
            &layers,
            &connections,
            &self.space.config().complexity_weights,
        );

        Architecture {
            id: self.next_id(rng, generation),
            sector: self.space.sector().clone(),
            generation,
            parents: Vec::new(),
            layers,
            connections,
            complexity,
            performance: None,
        }
    }

    /// Generate a random layer for the given position.
    pub fn random_layer<R: Rng + ?Sized>(&self, rng: &mut R, index: usize) -> Layer {
        let kind = self
            .space
            .layer_kinds()
            .choose(rng)
            .copied()
            .unwrap_or(LayerKind::Dense);

        let activation = if kind.has_activation() {
            self.space.activations().choose(rng).copied()
        } else {
            None
        };

        let mut params = match kind {
            LayerKind::Dense => LayerParams::Dense {
                units: self.sample_count(rng, Param::DenseUnits),
            },
            LayerKind::Conv2d => LayerParams::Conv2d {
                filters: self.sample_count(rng, Param::ConvFilters),
                kernel_size: [3, 3],
                strides: [1, 1],
            },
            LayerKind::Lstm => LayerParams::Lstm {
                units: self.sample_count(rng, Param::LstmUnits),
            },
            LayerKind::Attention => LayerParams::Attention {
                heads: self.sample_count(rng, Param::AttentionHeads),
                embedding_dim: self.sample_count(rng, Param::AttentionEmbeddingDim),
            },
            LayerKind::Dropout => {
                let (lo, hi) = self.space.sampling_range(Param::DropoutRate);
                LayerParams::Dropout {
                    rate: rng.gen_range(lo..=hi),
                }
            }
            LayerKind::BatchNorm => LayerParams::BatchNorm,
        };

        // Sector clamps apply after sampling
        for &param in kind.tunables() {
            if let Some(value) = params.get(param) {
                params.set(param, self.clamp_param(param, value));
            }
        }

        Layer::new(LayerId(index as u32), params, activation)
    }

    fn sample_count<R: Rng + ?Sized>(&self, rng: &mut R, param: Param) -> u32 {
        let (lo, hi) = self.space.sampling_range(param);
        rng.gen_range(lo.ceil() as u32..=hi.floor() as u32)
    }

    /// Clamp a parameter value into its valid range for this sector.
    pub fn clamp_param(&self, param: Param, value: f64) -> f64 {
        let (lo, hi) = self.space.valid_range(param);
        if param.is_integer() {
            value.round().clamp(lo.ceil(), hi.floor())
        } else {
            value.clamp(lo, hi)
        }
    }

    /// Relabel layers, regenerate the forward chain and recompute complexity.
    pub fn rebuild(&self, architecture: &mut Architecture) {
        for (i, layer) in architecture.layers.iter_mut().enumerate() {
            layer.id = LayerId(i as u32);
        }
        architecture.connections = forward_chain(&architecture.layers);
        architecture.complexity = self.complexity(architecture);
    }

    /// Structural complexity under this sector's weights.
    pub fn complexity(&self, architecture: &Architecture) -> f64 {
        complexity(
            &architecture.layers,
            &architecture.connections,
            &self.space.config().complexity_weights,
        )
    }
}

/// Mandatory forward connections between every adjacent pair of layers.
pub fn forward_chain(layers: &[Layer]) -> Vec<Connection> {
    layers
        .windows(2)
        .map(|pair| Connection {
            from: pair[0].id,
            to: pair[1].id,
            weight: 1.0,
            kind: ConnectionKind::Forward,
        })
        .collect()
}
