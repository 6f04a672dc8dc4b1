//! Notification, status and progress types published by the search engine.

use serde::{Deserialize, Serialize};

use super::{ArchitectureId, Sector};

/// Notification delivered to external subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NasEvent {
    SearchStarted {
        sector: Sector,
        /// Archived elites seeded into generation 0.
        seeded_elites: usize,
    },
    GenerationCompleted {
        sector: Sector,
        generation: usize,
        best_accuracy: f64,
    },
    ArchitectureImproved {
        sector: Sector,
        generation: usize,
        best_accuracy: f64,
        architecture_id: ArchitectureId,
    },
    TargetReached {
        sector: Sector,
        generation: usize,
        accuracy: f64,
    },
    SearchStopped {
        sector: Sector,
        generation: usize,
        reason: StopReason,
    },
    ArchitectureDeployed {
        sector: Sector,
        architecture_id: ArchitectureId,
    },
    SearchFailed {
        sector: Sector,
        reason: String,
    },
}

impl NasEvent {
    pub fn sector(&self) -> &Sector {
        match self {
            NasEvent::SearchStarted { sector, .. }
            | NasEvent::GenerationCompleted { sector, .. }
            | NasEvent::ArchitectureImproved { sector, .. }
            | NasEvent::TargetReached { sector, .. }
            | NasEvent::SearchStopped { sector, .. }
            | NasEvent::ArchitectureDeployed { sector, .. }
            | NasEvent::SearchFailed { sector, .. } => sector,
        }
    }
}

/// Reason a search session stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Best accuracy reached the sector's target.
    TargetReached,
    /// Reached maximum generations.
    MaxGenerations,
    /// Stopped by the caller.
    Cancelled,
    /// A generation could not be completed.
    Error(String),
}

/// Snapshot answered by status queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub active: bool,
    /// Completed generations in the current (or last) session.
    pub generation: usize,
    /// Best archived accuracy.
    pub best_accuracy: f64,
    /// Mean complexity of the archived elites.
    pub average_complexity: f64,
    pub total_architectures_seen: usize,
}

/// Statistics for one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub sector: Sector,
    /// Completed generation count, starting at 1.
    pub generation: usize,
    pub best_accuracy: f64,
    pub average_accuracy: f64,
    pub average_complexity: f64,
    pub best_id: ArchitectureId,
    /// Architectures scored this generation.
    pub evaluated: usize,
    /// Evaluations that failed or timed out.
    pub failed: usize,
}
