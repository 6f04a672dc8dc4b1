//! Generational genetic algorithm over architecture graphs.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use rand::prelude::*;
use rayon::prelude::*;

use crate::schema::{
    Architecture, ArchitectureId, ConfigError, GenerationReport, OptimizerConfig,
    PerformanceRecord, StopReason, rank_order,
};

use super::fitness::{FitnessEvaluator, evaluate_guarded};
use super::generator::ArchitectureGenerator;

/// Arena of the live population, keyed by architecture id.
#[derive(Debug, Default, Clone)]
pub struct Population {
    members: HashMap<ArchitectureId, Architecture>,
    /// Ids in ranking order once [`Population::rank`] has run.
    ranking: Vec<ArchitectureId>,
}

impl Population {
    /// Insert an architecture. Returns false if the id is already present.
    pub fn insert(&mut self, architecture: Architecture) -> bool {
        if self.members.contains_key(&architecture.id) {
            return false;
        }
        self.ranking.push(architecture.id.clone());
        self.members.insert(architecture.id.clone(), architecture);
        true
    }

    pub fn get(&self, id: &ArchitectureId) -> Option<&Architecture> {
        self.members.get(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Architecture> {
        self.members.values()
    }

    /// Sort the ranking by accuracy, then complexity.
    pub fn rank(&mut self) {
        let members = &self.members;
        self.ranking
            .sort_by(|a, b| rank_order(&members[a], &members[b]));
    }

    /// Members in ranking order.
    pub fn ranked(&self) -> impl Iterator<Item = &Architecture> {
        self.ranking.iter().filter_map(|id| self.members.get(id))
    }

    fn ranked_ids(&self) -> &[ArchitectureId] {
        &self.ranking
    }
}

/// Structural mutation applied to an offspring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    AddLayer,
    RemoveLayer,
    PerturbParameter,
}

/// Result of one completed generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub report: GenerationReport,
    /// Top-ranked architectures of the completed generation.
    pub elites: Vec<Architecture>,
    /// Set when this generation ended the search.
    pub stop: Option<StopReason>,
}

/// Drives the evaluate, rank, select and reproduce cycle for one sector.
pub struct Optimizer {
    config: OptimizerConfig,
    target_accuracy: f64,
    generator: ArchitectureGenerator,
    evaluator: Arc<dyn FitnessEvaluator>,
    rng: StdRng,
    population: Population,
    /// Completed generations.
    generation: usize,
    best_accuracy: f64,
    total_seen: usize,
    total_evaluations: u64,
    stop_reason: Option<StopReason>,
}

impl Optimizer {
    /// Create an optimizer with an injected random source.
    pub fn new(
        config: OptimizerConfig,
        generator: ArchitectureGenerator,
        evaluator: Arc<dyn FitnessEvaluator>,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let target_accuracy = generator.space().target_accuracy();

        Ok(Self {
            config,
            target_accuracy,
            generator,
            evaluator,
            rng,
            population: Population::default(),
            generation: 0,
            best_accuracy: f64::NEG_INFINITY,
            total_seen: 0,
            total_evaluations: 0,
            stop_reason: None,
        })
    }

    /// Fill generation 0: seeded elites first, then random architectures.
    /// Seeded architectures keep their performance records.
    pub fn initialize<I>(&mut self, seeds: I) -> usize
    where
        I: IntoIterator<Item = Architecture>,
    {
        self.population = Population::default();
        self.generation = 0;
        self.stop_reason = None;

        let sector = self.generator.space().sector().clone();
        let (min_layers, max_layers) = self.generator.space().layer_bounds();
        let mut seeded = 0;

        for seed in seeds {
            if self.population.len() >= self.config.population_size {
                break;
            }
            if seed.sector != sector || seed.validate(min_layers, max_layers).is_err() {
                debug!("Skipping incompatible seed {}", seed.id);
                continue;
            }
            if self.population.insert(seed) {
                seeded += 1;
            }
        }

        while self.population.len() < self.config.population_size {
            let architecture = self.generator.generate_random(&mut self.rng, 0);
            self.population.insert(architecture);
        }

        self.total_seen = self.population.len();
        seeded
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy.max(0.0)
    }

    pub fn total_seen(&self) -> usize {
        self.total_seen
    }

    pub fn total_evaluations(&self) -> u64 {
        self.total_evaluations
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn generator(&self) -> &ArchitectureGenerator {
        &self.generator
    }

    /// Run one full generation. Returns `None` once the search has stopped.
    pub fn step(&mut self) -> Option<GenerationOutcome> {
        if self.stop_reason.is_some() || self.population.is_empty() {
            return None;
        }

        let (evaluated, failed) = self.evaluate_population();
        self.population.rank();
        self.generation += 1;

        let report = self.report(evaluated, failed);
        self.best_accuracy = self.best_accuracy.max(report.best_accuracy);

        let elites: Vec<Architecture> = self
            .population
            .ranked()
            .take(self.config.elite_size)
            .cloned()
            .collect();

        let stop = if report.best_accuracy >= self.target_accuracy {
            Some(StopReason::TargetReached)
        } else if self.generation >= self.config.max_generations {
            Some(StopReason::MaxGenerations)
        } else {
            None
        };

        debug!(
            "{} generation {}: best={:.2} avg={:.2} evaluated={} failed={}",
            report.sector,
            report.generation,
            report.best_accuracy,
            report.average_accuracy,
            evaluated,
            failed
        );

        match &stop {
            Some(reason) => self.stop_reason = Some(reason.clone()),
            None => self.reproduce(&elites),
        }

        Some(GenerationOutcome {
            report,
            elites,
            stop,
        })
    }

    /// Score every unevaluated architecture in parallel. Returns (evaluated, failed).
    fn evaluate_population(&mut self) -> (usize, usize) {
        let evaluator = &self.evaluator;
        let timeout = self.config.evaluation_timeout();

        let pending: Vec<&mut Architecture> = self
            .population
            .members
            .values_mut()
            .filter(|a| a.performance.is_none())
            .collect();
        let evaluated = pending.len();

        // Collecting is the barrier: ranking waits for every evaluation
        let failed: usize = pending
            .into_par_iter()
            .map(
                |architecture| match evaluate_guarded(evaluator, architecture, timeout) {
                    Ok(record) => {
                        architecture.performance = Some(record.clamped());
                        0
                    }
                    Err(err) => {
                        warn!("Evaluation of {} failed: {}", architecture.id, err);
                        architecture.performance = Some(PerformanceRecord::worst());
                        1
                    }
                },
            )
            .sum();

        self.total_evaluations += evaluated as u64;
        (evaluated, failed)
    }

    fn report(&self, evaluated: usize, failed: usize) -> GenerationReport {
        let count = self.population.len().max(1) as f64;
        let (accuracy_sum, complexity_sum) = self
            .population
            .iter()
            .fold((0.0, 0.0), |(acc, cx), a| (acc + a.accuracy(), cx + a.complexity));
        let best = self.population.ranked().next();

        GenerationReport {
            sector: self.generator.space().sector().clone(),
            generation: self.generation,
            best_accuracy: best.map_or(0.0, Architecture::accuracy),
            average_accuracy: accuracy_sum / count,
            average_complexity: complexity_sum / count,
            best_id: best.map(|a| a.id.clone()).unwrap_or_else(|| {
                ArchitectureId(String::new())
            }),
            evaluated,
            failed,
        }
    }

    /// Build the next population from elites and offspring.
    fn reproduce(&mut self, elites: &[Architecture]) {
        let ranked: Vec<ArchitectureId> = self.population.ranked_ids().to_vec();
        let mut next = Population::default();

        for elite in elites {
            next.insert(elite.clone());
        }

        while next.len() < self.config.population_size {
            let first = self.tournament(&ranked);
            let second = self.tournament(&ranked);
            let parent1 = self.population.members[&first].clone();
            let parent2 = self.population.members[&second].clone();

            let mut offspring = if self.rng.gen_bool(self.config.crossover_rate) {
                self.crossover(&parent1, &parent2)
            } else {
                self.clone_parent(&parent1)
            };

            if self.rng.gen_bool(self.config.mutation_rate) {
                let kind = self.mutate(&mut offspring);
                debug!("Mutated {} with {:?}", offspring.id, kind);
            }

            if next.insert(offspring) {
                self.total_seen += 1;
            }
        }

        self.population = next;
    }

    /// Tournament selection over the ranked ids. Sampling is with replacement,
    /// and the lowest drawn rank wins, which honors the complexity tie-break.
    fn tournament(&mut self, ranked: &[ArchitectureId]) -> ArchitectureId {
        let winner = (0..self.config.tournament_size)
            .map(|_| self.rng.gen_range(0..ranked.len()))
            .min()
            .unwrap_or(0);
        ranked[winner].clone()
    }

    /// Single-point crossover. Only the forward chain is rebuilt; skip
    /// connections are not inherited.
    pub fn crossover(&mut self, parent1: &Architecture, parent2: &Architecture) -> Architecture {
        let shorter = parent1.layers.len().min(parent2.layers.len());
        let cut = if shorter == 0 {
            0
        } else {
            self.rng.gen_range(0..shorter)
        };

        let layers = parent1.layers[..cut]
            .iter()
            .chain(&parent2.layers[cut..])
            .cloned()
            .collect();

        let mut child = Architecture {
            id: self.generator.next_id(&mut self.rng, self.generation),
            sector: parent1.sector.clone(),
            generation: self.generation,
            parents: vec![parent1.id.clone(), parent2.id.clone()],
            layers,
            connections: Vec::new(),
            complexity: 0.0,
            performance: None,
        };
        self.generator.rebuild(&mut child);
        child
    }

    /// Offspring that copies one parent verbatim, connections included.
    fn clone_parent(&mut self, parent: &Architecture) -> Architecture {
        Architecture {
            id: self.generator.next_id(&mut self.rng, self.generation),
            generation: self.generation,
            parents: vec![parent.id.clone()],
            performance: None,
            ..parent.clone()
        }
    }

    /// Apply one uniformly chosen mutation operator. Operators that would
    /// violate the layer bounds leave the architecture unchanged.
    pub fn mutate(&mut self, architecture: &mut Architecture) -> MutationKind {
        let (min_layers, max_layers) = self.generator.space().layer_bounds();
        let kind = match self.rng.gen_range(0..3) {
            0 => MutationKind::AddLayer,
            1 => MutationKind::RemoveLayer,
            _ => MutationKind::PerturbParameter,
        };

        match kind {
            MutationKind::AddLayer => {
                if architecture.layers.len() < max_layers {
                    let index = architecture.layers.len();
                    let layer = self.generator.random_layer(&mut self.rng, index);
                    architecture.layers.push(layer);
                    self.generator.rebuild(architecture);
                }
            }
            MutationKind::RemoveLayer => {
                if architecture.layers.len() > min_layers {
                    let index = self.rng.gen_range(0..architecture.layers.len());
                    architecture.layers.remove(index);
                    self.generator.rebuild(architecture);
                }
            }
            MutationKind::PerturbParameter => self.perturb(architecture),
        }

        architecture.performance = None;
        kind
    }

    /// Nudge one numeric parameter of one layer, clamped to its valid range.
    fn perturb(&mut self, architecture: &mut Architecture) {
        let tunable: Vec<usize> = architecture
            .layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| !layer.kind().tunables().is_empty())
            .map(|(i, _)| i)
            .collect();
        let Some(&index) = tunable.choose(&mut self.rng) else {
            return;
        };

        let layer = &mut architecture.layers[index];
        let Some(&param) = layer.kind().tunables().choose(&mut self.rng) else {
            return;
        };
        let Some(value) = layer.params.get(param) else {
            return;
        };

        let (lo, hi) = self.generator.space().valid_range(param);
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        let delta = noise.clamp(-2.0, 2.0) * self.config.perturbation_strength * (hi - lo);
        let mutated = self.generator.clamp_param(param, value + delta);

        layer.params.set(param, mutated);
        layer.output_shape = layer.params.output_shape();
        architecture.complexity = self.generator.complexity(architecture);
    }
}
