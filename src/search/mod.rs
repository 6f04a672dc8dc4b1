//! Evolutionary search over neural network architectures.
//!
//! # Overview
//!
//! The search system consists of:
//!
//! - **Search Spaces** (`space`): Per-sector layer kinds, bounds and parameter ranges
//! - **Generator** (`generator`): Random architectures and structural rebuilds
//! - **Fitness** (`fitness`): Pluggable evaluators and the default surrogate scorer
//! - **Optimizer** (`optimizer`): Selection, crossover, mutation and elitism
//! - **Archive** (`archive`): Ranked retention and export of the best architectures
//! - **Controller** (`controller`): Session lifecycle, status queries and deployment
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use nas_engine::schema::{EngineConfig, Sector};
//! use nas_engine::search::{SearchController, SurrogateEvaluator};
//!
//! let controller = SearchController::new(
//!     EngineConfig::default(),
//!     Arc::new(SurrogateEvaluator::new(7)),
//! )
//! .unwrap();
//!
//! let events = controller.subscribe();
//! controller.start_search(&Sector::Ferpa).unwrap();
//! let reason = controller.run_search(&Sector::Ferpa).unwrap();
//!
//! println!("Stopped: {:?}", reason);
//! for event in events.try_iter() {
//!     println!("{:?}", event);
//! }
//!
//! let best = controller.deploy_best(&Sector::Ferpa).unwrap();
//! println!("Deployed {} ({:.2}%)", best.id, best.accuracy());
//! ```
//!
//! # Sessions
//!
//! Each sector runs at most one session at a time. Sessions of different
//! sectors are independent and may run on separate threads via
//! [`SearchController::spawn_search`]. Within a generation, fitness
//! evaluations run in parallel on the rayon pool.

mod archive;
mod controller;
mod events;
mod fitness;
mod generator;
mod optimizer;
mod space;

pub use archive::{EliteArchive, EliteExport};
pub use controller::{SearchController, SearchError, SearchSession};
pub use events::{EventBus, EventCallback};
pub use fitness::{
    ComplexityCeilingBias, EvaluationError, FitnessEvaluator, FlatBias, LayerPresenceBias,
    SectorBias, SurrogateEvaluator, default_bias, evaluate_guarded,
};
pub use generator::{ArchitectureGenerator, forward_chain};
pub use optimizer::{GenerationOutcome, MutationKind, Optimizer, Population};
pub use space::{SearchSpace, SearchSpaceRegistry};
