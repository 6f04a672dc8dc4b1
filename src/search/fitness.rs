//! Fitness evaluation for candidate architectures.
//!
//! Scoring is a pluggable contract: the engine only requires a
//! [`FitnessEvaluator`]. [`SurrogateEvaluator`] is the default, a cheap
//! simulated scorer shaped by per-sector [`SectorBias`] functions.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use rand::prelude::*;

use crate::schema::{Architecture, LayerKind, PerformanceRecord, Sector};

/// Maps an architecture to a performance record.
///
/// Implementations may be slow or have side effects (an external trainer,
/// a surrogate model). Calls for different architectures run concurrently.
pub trait FitnessEvaluator: Send + Sync {
    fn evaluate(&self, architecture: &Architecture) -> Result<PerformanceRecord, EvaluationError>;
}

impl<F> FitnessEvaluator for F
where
    F: Fn(&Architecture) -> Result<PerformanceRecord, EvaluationError> + Send + Sync,
{
    fn evaluate(&self, architecture: &Architecture) -> Result<PerformanceRecord, EvaluationError> {
        self(architecture)
    }
}

/// Failure to score one architecture. Never aborts a generation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluation failed: {0}")]
    Failed(String),
    #[error("Architecture rejected by evaluator: {0}")]
    Rejected(String),
    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Evaluator panicked")]
    Panicked,
}

/// Sector-specific accuracy shaping, in accuracy points.
pub trait SectorBias: Send + Sync {
    fn bonus(&self, architecture: &Architecture) -> f64;
}

impl<F> SectorBias for F
where
    F: Fn(&Architecture) -> f64 + Send + Sync,
{
    fn bonus(&self, architecture: &Architecture) -> f64 {
        self(architecture)
    }
}

/// Bonus when the architecture contains at least one layer of a kind.
#[derive(Debug, Clone)]
pub struct LayerPresenceBias {
    pub kind: LayerKind,
    pub bonus: f64,
}

impl SectorBias for LayerPresenceBias {
    fn bonus(&self, architecture: &Architecture) -> f64 {
        if architecture.has_layer_kind(self.kind) {
            self.bonus
        } else {
            0.0
        }
    }
}

/// Bonus for architectures below a complexity ceiling.
#[derive(Debug, Clone)]
pub struct ComplexityCeilingBias {
    pub ceiling: f64,
    pub bonus: f64,
}

impl SectorBias for ComplexityCeilingBias {
    fn bonus(&self, architecture: &Architecture) -> f64 {
        if architecture.complexity < self.ceiling {
            self.bonus
        } else {
            0.0
        }
    }
}

/// Constant bonus.
#[derive(Debug, Clone)]
pub struct FlatBias(pub f64);

impl SectorBias for FlatBias {
    fn bonus(&self, _architecture: &Architecture) -> f64 {
        self.0
    }
}

/// Default scoring bias for a sector. Custom sectors get none.
pub fn default_bias(sector: &Sector) -> Option<Box<dyn SectorBias>> {
    match sector {
        Sector::Ferpa => Some(Box::new(LayerPresenceBias {
            kind: LayerKind::Dropout,
            bonus: 2.0,
        })),
        Sector::Fisma => Some(Box::new(LayerPresenceBias {
            kind: LayerKind::Attention,
            bonus: 3.0,
        })),
        Sector::Cipa => Some(Box::new(ComplexityCeilingBias {
            ceiling: 50.0,
            bonus: 2.0,
        })),
        Sector::General => Some(Box::new(FlatBias(1.0))),
        Sector::Custom(_) => None,
    }
}

/// Simulated scorer: noisy base accuracy, sector bias and complexity penalty.
///
/// Deterministic for a given seed and architecture id, so results do not
/// depend on the order parallel evaluations finish in.
pub struct SurrogateEvaluator {
    seed: u64,
    biases: HashMap<Sector, Box<dyn SectorBias>>,
}

impl SurrogateEvaluator {
    /// Create with the built-in sector biases.
    pub fn new(seed: u64) -> Self {
        let biases = Sector::built_in()
            .into_iter()
            .filter_map(|sector| default_bias(&sector).map(|bias| (sector, bias)))
            .collect();
        Self { seed, biases }
    }

    /// Create without any sector bias.
    pub fn unbiased(seed: u64) -> Self {
        Self {
            seed,
            biases: HashMap::new(),
        }
    }

    /// Replace the bias for a sector.
    pub fn with_bias<B: SectorBias + 'static>(mut self, sector: Sector, bias: B) -> Self {
        self.biases.insert(sector, Box::new(bias));
        self
    }

    fn rng_for(&self, architecture: &Architecture) -> StdRng {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        architecture.id.hash(&mut hasher);
        StdRng::seed_from_u64(hasher.finish())
    }
}

impl FitnessEvaluator for SurrogateEvaluator {
    fn evaluate(&self, architecture: &Architecture) -> Result<PerformanceRecord, EvaluationError> {
        let mut rng = self.rng_for(architecture);
        let complexity = architecture.complexity;

        let bonus = self
            .biases
            .get(&architecture.sector)
            .map_or(0.0, |bias| bias.bonus(architecture));
        let penalty = (complexity / 100.0).min(0.2) * 10.0;
        let base = rng.gen_range(70.0..95.0);
        let accuracy = (base + bonus - penalty).min(99.9);

        Ok(PerformanceRecord {
            accuracy,
            latency: complexity * 2.0 + rng.gen_range(0.0..10.0),
            memory: complexity * 0.5 + rng.gen_range(0.0..5.0),
            compute_cost: complexity * 1000.0 + rng.gen_range(0.0..10_000.0),
            convergence_speed: 100.0 - complexity + rng.gen_range(0.0..20.0),
            robustness: accuracy * 0.8 + rng.gen_range(0.0..15.0),
        }
        .clamped())
    }
}

/// Evaluate one architecture, converting panics and timeouts into errors.
///
/// With a timeout the evaluation runs on its own thread; a late result is
/// discarded when it eventually arrives.
pub fn evaluate_guarded(
    evaluator: &Arc<dyn FitnessEvaluator>,
    architecture: &Architecture,
    timeout: Option<Duration>,
) -> Result<PerformanceRecord, EvaluationError> {
    let Some(limit) = timeout else {
        return panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(architecture)))
            .unwrap_or(Err(EvaluationError::Panicked));
    };

    let (tx, rx) = mpsc::channel();
    let worker_evaluator = Arc::clone(evaluator);
    let candidate = architecture.clone();

    thread::Builder::new()
        .name(format!("nas-eval-{}", architecture.id))
        .spawn(move || {
            let _ = tx.send(worker_evaluator.evaluate(&candidate));
        })
        .map_err(|e| EvaluationError::Failed(e.to_string()))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(EvaluationError::Timeout(limit)),
        // Sender dropped without a result: the worker panicked
        Err(RecvTimeoutError::Disconnected) => Err(EvaluationError::Panicked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        Activation, ArchitectureId, Layer, LayerId, LayerParams, SectorConfig,
    };
    use crate::search::generator::ArchitectureGenerator;
    use crate::search::space::SearchSpace;

    fn sample(sector: Sector, seed: u64) -> Architecture {
        let space = SearchSpace::new(sector.clone(), SectorConfig::for_sector(&sector)).unwrap();
        let generator = ArchitectureGenerator::new(Arc::new(space)).unwrap();
        generator.generate_random(&mut StdRng::seed_from_u64(seed), 0)
    }

    #[test]
    fn test_surrogate_deterministic_per_id() {
        let evaluator = SurrogateEvaluator::new(42);
        let arch = sample(Sector::General, 1);

        let first = evaluator.evaluate(&arch).unwrap();
        let second = evaluator.evaluate(&arch).unwrap();
        assert_eq!(first, second);
        assert!((0.0..=99.9).contains(&first.accuracy));
        assert!((0.0..=100.0).contains(&first.robustness));
    }

    #[test]
    fn test_layer_presence_bias() {
        let bias = LayerPresenceBias {
            kind: LayerKind::Dropout,
            bonus: 2.0,
        };
        let mut arch = sample(Sector::Ferpa, 2);
        arch.layers = vec![Layer::new(
            LayerId(0),
            LayerParams::Dense { units: 64 },
            Some(Activation::Relu),
        )];
        assert_eq!(bias.bonus(&arch), 0.0);

        arch.layers
            .push(Layer::new(LayerId(1), LayerParams::Dropout { rate: 0.2 }, None));
        assert_eq!(bias.bonus(&arch), 2.0);
    }

    #[test]
    fn test_closure_bias_and_evaluator() {
        let evaluator = SurrogateEvaluator::unbiased(1)
            .with_bias(Sector::from("A"), |_: &Architecture| 5.0);
        let arch = sample(Sector::from("A"), 3);
        let biased = evaluator.evaluate(&arch).unwrap();
        let plain = SurrogateEvaluator::unbiased(1).evaluate(&arch).unwrap();
        assert!(biased.accuracy >= plain.accuracy);

        let always_fails = |_: &Architecture| -> Result<PerformanceRecord, EvaluationError> {
            Err(EvaluationError::Rejected("unsupported".into()))
        };
        assert!(always_fails.evaluate(&arch).is_err());
    }

    #[test]
    fn test_guarded_catches_panic() {
        let evaluator: Arc<dyn FitnessEvaluator> =
            Arc::new(|_: &Architecture| -> Result<PerformanceRecord, EvaluationError> {
                panic!("trainer crashed")
            });
        let arch = sample(Sector::General, 4);

        assert_eq!(
            evaluate_guarded(&evaluator, &arch, None),
            Err(EvaluationError::Panicked)
        );
        assert_eq!(
            evaluate_guarded(&evaluator, &arch, Some(Duration::from_secs(5))),
            Err(EvaluationError::Panicked)
        );
    }

    #[test]
    fn test_guarded_timeout() {
        let evaluator: Arc<dyn FitnessEvaluator> =
            Arc::new(|_: &Architecture| -> Result<PerformanceRecord, EvaluationError> {
                thread::sleep(Duration::from_millis(500));
                Ok(PerformanceRecord::worst())
            });
        let mut arch = sample(Sector::General, 5);
        arch.id = ArchitectureId("slow".to_string());

        let result = evaluate_guarded(&evaluator, &arch, Some(Duration::from_millis(20)));
        assert_eq!(
            result,
            Err(EvaluationError::Timeout(Duration::from_millis(20)))
        );
    }
}
