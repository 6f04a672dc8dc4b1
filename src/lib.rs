//! NAS Engine - Evolutionary neural architecture search.
//!
//! This crate searches, per regulated deployment sector, for neural network
//! architectures that maximize a pluggable fitness score while respecting
//! sector-specific structural constraints.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Architecture graphs, configuration and event types
//! - `search`: Search spaces, generation, evaluation, evolution and control
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use nas_engine::{EngineConfig, SearchController, Sector, SurrogateEvaluator};
//!
//! let controller =
//!     SearchController::new(EngineConfig::default(), Arc::new(SurrogateEvaluator::new(1)))
//!         .unwrap();
//!
//! controller.start_search(&Sector::General).unwrap();
//! controller.run_search(&Sector::General).unwrap();
//!
//! let status = controller.get_status(&Sector::General);
//! println!("Best accuracy after {} generations: {:.2}", status.generation, status.best_accuracy);
//! ```

pub mod schema;
pub mod search;

// Re-export commonly used types
pub use schema::{Architecture, EngineConfig, NasEvent, SearchStatus, Sector};
pub use search::{FitnessEvaluator, SearchController, SearchError, SurrogateEvaluator};
