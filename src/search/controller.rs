//! Search controller: per-sector session lifecycle, archives and deployment.

use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use log::{error, info};
use rand::prelude::*;

use crate::schema::{
    Architecture, ConfigError, EngineConfig, GenerationReport, NasEvent, SearchStatus, Sector,
    StopReason,
};

use super::archive::EliteArchive;
use super::events::EventBus;
use super::fitness::FitnessEvaluator;
use super::generator::ArchitectureGenerator;
use super::optimizer::Optimizer;
use super::space::SearchSpaceRegistry;

/// Errors surfaced to callers of the controller.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("No search space configured for sector {0}")]
    UnknownSector(Sector),
    #[error("A search is already running for sector {0}")]
    AlreadyRunning(Sector),
    #[error("No search session exists for sector {0}")]
    NotStarted(Sector),
    #[error("No architecture available to deploy for sector {0}")]
    NoArchitectureAvailable(Sector),
    #[error("Generation failed for sector {sector}: {reason}")]
    GenerationFailed { sector: Sector, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Live state of one sector's search.
///
/// Status fields are atomics so queries never wait on a running generation.
/// The optimizer mutex admits one generation transition at a time.
pub struct SearchSession {
    sector: Sector,
    active: AtomicBool,
    generation: AtomicUsize,
    total_seen: AtomicUsize,
    stop_reason: Mutex<Option<StopReason>>,
    optimizer: Mutex<Optimizer>,
}

impl SearchSession {
    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Completed generations.
    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Acquire)
    }

    pub fn total_architectures_seen(&self) -> usize {
        self.total_seen.load(Ordering::Acquire)
    }

    /// Why the session stopped, if it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Flip to inactive and record why. Only the first caller wins.
    fn deactivate(&self, reason: &StopReason) -> bool {
        let mut stop_reason = self.stop_reason.lock().unwrap_or_else(PoisonError::into_inner);
        let won = self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            *stop_reason = Some(reason.clone());
        }
        won
    }
}

impl fmt::Debug for SearchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchSession")
            .field("sector", &self.sector)
            .field("active", &self.is_active())
            .field("generation", &self.generation())
            .field("total_seen", &self.total_architectures_seen())
            .finish_non_exhaustive()
    }
}

/// Public entry point: starts, steps, stops and reports sector searches.
pub struct SearchController {
    config: EngineConfig,
    registry: SearchSpaceRegistry,
    evaluator: Arc<dyn FitnessEvaluator>,
    sessions: Mutex<HashMap<Sector, Arc<SearchSession>>>,
    archives: RwLock<HashMap<Sector, Arc<EliteArchive>>>,
    events: EventBus,
    sessions_started: AtomicU64,
}

impl SearchController {
    /// Create a controller. The configuration is validated up front.
    pub fn new(
        config: EngineConfig,
        evaluator: Arc<dyn FitnessEvaluator>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let registry = SearchSpaceRegistry::from_config(&config)?;

        Ok(Self {
            config,
            registry,
            evaluator,
            sessions: Mutex::new(HashMap::new()),
            archives: RwLock::new(HashMap::new()),
            events: EventBus::new(),
            sessions_started: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SearchSpaceRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to notifications from every sector.
    pub fn subscribe(&self) -> Receiver<NasEvent> {
        self.events.subscribe()
    }

    /// Register a callback for every event.
    ///
    /// Callbacks run while the publishing sector's session is locked and must
    /// not call back into the controller for that sector.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&NasEvent) + Send + Sync + 'static,
    {
        self.events.on_event(callback);
    }

    /// Start a search, seeding generation 0 with the sector's archive.
    pub fn start_search(&self, sector: &Sector) -> Result<Arc<SearchSession>, SearchError> {
        let rng = self.session_rng(sector);
        self.start_search_with_rng(sector, rng)
    }

    /// Start a search with an injected random source.
    pub fn start_search_with_rng(
        &self,
        sector: &Sector,
        rng: StdRng,
    ) -> Result<Arc<SearchSession>, SearchError> {
        let space = self
            .registry
            .get(sector)
            .ok_or_else(|| SearchError::UnknownSector(sector.clone()))?;

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.get(sector).is_some_and(|s| s.is_active()) {
            return Err(SearchError::AlreadyRunning(sector.clone()));
        }

        let generator = ArchitectureGenerator::new(space)?;
        let mut optimizer = Optimizer::new(
            self.config.optimizer.clone(),
            generator,
            Arc::clone(&self.evaluator),
            rng,
        )?;

        let seeds = self
            .archive(sector)
            .map(|archive| archive.entries().to_vec())
            .unwrap_or_default();
        let seeded_elites = optimizer.initialize(seeds);

        let session = Arc::new(SearchSession {
            sector: sector.clone(),
            active: AtomicBool::new(true),
            generation: AtomicUsize::new(0),
            total_seen: AtomicUsize::new(optimizer.total_seen()),
            stop_reason: Mutex::new(None),
            optimizer: Mutex::new(optimizer),
        });
        sessions.insert(sector.clone(), Arc::clone(&session));
        drop(sessions);

        info!("Started search for {sector} with {seeded_elites} seeded elites");
        self.events.publish(NasEvent::SearchStarted {
            sector: sector.clone(),
            seeded_elites,
        });

        Ok(session)
    }

    /// Advance a sector's search by one generation.
    ///
    /// Returns `Ok(None)` once the session is stopped; no new generation
    /// begins after a stop. Events are published before the session lock is
    /// released, so a sector's events keep generation order.
    pub fn step_generation(
        &self,
        sector: &Sector,
    ) -> Result<Option<GenerationReport>, SearchError> {
        let session = self
            .session(sector)
            .ok_or_else(|| SearchError::NotStarted(sector.clone()))?;
        self.step_session(&session)
    }

    fn step_session(
        &self,
        session: &SearchSession,
    ) -> Result<Option<GenerationReport>, SearchError> {
        let sector = &session.sector;
        let mut optimizer = session
            .optimizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !session.is_active() {
            return Ok(None);
        }

        let previous_best = optimizer.best_accuracy();
        let had_scored = optimizer.generation() > 0;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| optimizer.step())) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                self.finish(session, StopReason::MaxGenerations);
                return Ok(None);
            }
            Err(_) => {
                let reason = "generation panicked".to_string();
                self.fail(session, &reason);
                return Err(SearchError::GenerationFailed {
                    sector: sector.clone(),
                    reason,
                });
            }
        };

        // Elites of a completed generation go in as one copy-on-write swap
        self.commit_elites(sector, &outcome.elites);
        session
            .generation
            .store(outcome.report.generation, Ordering::Release);
        session
            .total_seen
            .store(optimizer.total_seen(), Ordering::Release);

        let report = outcome.report;
        self.events.publish(NasEvent::GenerationCompleted {
            sector: sector.clone(),
            generation: report.generation,
            best_accuracy: report.best_accuracy,
        });
        if !had_scored || report.best_accuracy > previous_best {
            self.events.publish(NasEvent::ArchitectureImproved {
                sector: sector.clone(),
                generation: report.generation,
                best_accuracy: report.best_accuracy,
                architecture_id: report.best_id.clone(),
            });
        }

        match outcome.stop {
            Some(StopReason::TargetReached) => {
                info!(
                    "Target accuracy reached for {sector} in generation {}: {:.2}",
                    report.generation, report.best_accuracy
                );
                self.events.publish(NasEvent::TargetReached {
                    sector: sector.clone(),
                    generation: report.generation,
                    accuracy: report.best_accuracy,
                });
                self.finish(session, StopReason::TargetReached);
            }
            Some(reason) => self.finish(session, reason),
            None => {}
        }

        Ok(Some(report))
    }

    /// Run generations on the calling thread until the session stops.
    pub fn run_search(&self, sector: &Sector) -> Result<StopReason, SearchError> {
        let session = self
            .session(sector)
            .ok_or_else(|| SearchError::NotStarted(sector.clone()))?;
        self.run_session(&session)
    }

    /// Drive one session to completion. A later restart of the same sector
    /// creates a new session, which this loop never touches.
    fn run_session(&self, session: &SearchSession) -> Result<StopReason, SearchError> {
        while self.step_session(session)?.is_some() {}
        Ok(session.stop_reason().unwrap_or(StopReason::Cancelled))
    }

    /// Start a search and run it on a background thread.
    pub fn spawn_search(
        self: &Arc<Self>,
        sector: &Sector,
    ) -> Result<JoinHandle<Result<StopReason, SearchError>>, SearchError> {
        let session = self.start_search(sector)?;
        let controller = Arc::clone(self);
        let worker_session = Arc::clone(&session);

        let spawned = thread::Builder::new()
            .name(format!("nas-search-{sector}"))
            .spawn(move || controller.run_session(&worker_session));

        spawned.map_err(|e| {
            self.fail(&session, &e.to_string());
            SearchError::Io(e)
        })
    }

    /// Stop a sector's search at the next generation boundary. Idempotent.
    pub fn stop_search(&self, sector: &Sector) {
        if let Some(session) = self.session(sector) {
            self.cancel(&session);
        }
    }

    /// Stop every session and clear all archives.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<SearchSession>> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for session in sessions {
            self.cancel(&session);
        }
        self.archives
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Search controller shut down");
    }

    pub fn get_status(&self, sector: &Sector) -> SearchStatus {
        let archive = self.archive(sector);
        let (best_accuracy, average_complexity) = archive
            .as_deref()
            .map_or((0.0, 0.0), |a| (a.best_accuracy(), a.average_complexity()));

        match self.session(sector) {
            Some(session) => SearchStatus {
                active: session.is_active(),
                generation: session.generation(),
                best_accuracy,
                average_complexity,
                total_architectures_seen: session.total_architectures_seen(),
            },
            None => SearchStatus {
                best_accuracy,
                average_complexity,
                ..SearchStatus::default()
            },
        }
    }

    /// Up to `n` archived architectures, best first.
    pub fn get_best_architectures(&self, sector: &Sector, n: usize) -> Vec<Architecture> {
        self.archive(sector)
            .map(|archive| archive.best(n).to_vec())
            .unwrap_or_default()
    }

    /// Return the top archived architecture and announce its deployment.
    pub fn deploy_best(&self, sector: &Sector) -> Result<Architecture, SearchError> {
        let best = self
            .archive(sector)
            .and_then(|archive| archive.top().cloned())
            .ok_or_else(|| SearchError::NoArchitectureAvailable(sector.clone()))?;

        info!(
            "Deploying {} for {sector} (accuracy {:.2})",
            best.id,
            best.accuracy()
        );
        self.events.publish(NasEvent::ArchitectureDeployed {
            sector: sector.clone(),
            architecture_id: best.id.clone(),
        });
        Ok(best)
    }

    /// Current archive snapshot for a sector.
    pub fn archive(&self, sector: &Sector) -> Option<Arc<EliteArchive>> {
        self.archives
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sector)
            .cloned()
    }

    /// Replace a sector's archive, e.g. with one loaded from disk.
    pub fn restore_archive(&self, archive: EliteArchive) -> Result<(), SearchError> {
        let sector = archive.sector().clone();
        if !self.registry.is_configured(&sector) {
            return Err(SearchError::UnknownSector(sector));
        }
        self.archives
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sector, Arc::new(archive));
        Ok(())
    }

    pub fn session(&self, sector: &Sector) -> Option<Arc<SearchSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sector)
            .cloned()
    }

    fn commit_elites(&self, sector: &Sector, elites: &[Architecture]) {
        let mut archives = self.archives.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = archives.get(sector).map_or_else(
            || EliteArchive::new(sector.clone(), self.config.optimizer.elite_size),
            |current| (**current).clone(),
        );
        for elite in elites {
            next.insert(elite.clone());
        }
        archives.insert(sector.clone(), Arc::new(next));
    }

    /// Deactivate once any in-flight generation has finished.
    fn cancel(&self, session: &SearchSession) {
        let reason = StopReason::Cancelled;
        let optimizer = session
            .optimizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if session.deactivate(&reason) {
            self.announce_stop(session, reason);
        }
        drop(optimizer);
    }

    fn finish(&self, session: &SearchSession, reason: StopReason) {
        if session.deactivate(&reason) {
            self.announce_stop(session, reason);
        }
    }

    fn announce_stop(&self, session: &SearchSession, reason: StopReason) {
        info!(
            "Stopped search for {} after {} generations: {:?}",
            session.sector,
            session.generation(),
            reason
        );
        self.events.publish(NasEvent::SearchStopped {
            sector: session.sector.clone(),
            generation: session.generation(),
            reason,
        });
    }

    fn fail(&self, session: &SearchSession, reason: &str) {
        error!("Search for {} failed: {reason}", session.sector);
        self.events.publish(NasEvent::SearchFailed {
            sector: session.sector.clone(),
            reason: reason.to_string(),
        });
        self.finish(session, StopReason::Error(reason.to_string()));
    }

    /// Per-session RNG: deterministic from the configured seed, otherwise entropy.
    fn session_rng(&self, sector: &Sector) -> StdRng {
        let session_index = self.sessions_started.fetch_add(1, Ordering::Relaxed);
        match self.config.optimizer.random_seed {
            Some(seed) => {
                let mut hasher = DefaultHasher::new();
                seed.hash(&mut hasher);
                sector.hash(&mut hasher);
                session_index.hash(&mut hasher);
                StdRng::seed_from_u64(hasher.finish())
            }
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{OptimizerConfig, SectorConfig};
    use crate::search::fitness::SurrogateEvaluator;

    fn controller(max_generations: usize) -> SearchController {
        let config = EngineConfig {
            optimizer: OptimizerConfig {
                population_size: 10,
                elite_size: 3,
                max_generations,
                random_seed: Some(42),
                ..Default::default()
            },
            ..Default::default()
        }
        .with_sector(
            Sector::from("A"),
            SectorConfig {
                min_layers: 5,
                max_layers: 10,
                target_accuracy: 99.9,
                ..Default::default()
            },
        );
        SearchController::new(config, Arc::new(SurrogateEvaluator::new(1))).unwrap()
    }

    #[test]
    fn test_unknown_sector_rejected() {
        let controller = controller(3);
        let err = controller.start_search(&Sector::from("nowhere")).unwrap_err();
        assert!(matches!(err, SearchError::UnknownSector(_)));
    }

    #[test]
    fn test_session_debug() {
        let controller = controller(3);
        let session = controller.start_search(&Sector::from("A")).unwrap();
        let debug = format!("{:?}", session);
        assert!(debug.contains("SearchSession"));
        assert!(debug.contains("active: true"));
    }

    #[test]
    fn test_single_member_population_with_default_elites() {
        let config = EngineConfig {
            optimizer: OptimizerConfig {
                population_size: 1,
                random_seed: Some(9),
                ..Default::default()
            },
            ..Default::default()
        }
        .with_sector(
            Sector::from("A"),
            SectorConfig {
                target_accuracy: 0.0,
                ..Default::default()
            },
        );
        let controller =
            SearchController::new(config, Arc::new(SurrogateEvaluator::new(2))).unwrap();
        let sector = Sector::from("A");

        controller.start_search(&sector).unwrap();
        assert_eq!(
            controller.run_search(&sector).unwrap(),
            StopReason::TargetReached
        );
        assert_eq!(controller.get_status(&sector).generation, 1);
        assert_eq!(controller.get_best_architectures(&sector, 5).len(), 1);
    }

    #[test]
    fn test_zero_generations_rejected() {
        let config = EngineConfig {
            optimizer: OptimizerConfig {
                max_generations: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            SearchController::new(config, Arc::new(SurrogateEvaluator::new(1))),
            Err(SearchError::Config(ConfigError::NoGenerations))
        ));
    }

    #[test]
    fn test_double_start_rejected() {
        let controller = controller(3);
        let sector = Sector::from("A");
        controller.start_search(&sector).unwrap();
        assert!(matches!(
            controller.start_search(&sector),
            Err(SearchError::AlreadyRunning(_))
        ));

        controller.stop_search(&sector);
        assert!(controller.start_search(&sector).is_ok());
    }

    #[test]
    fn test_step_without_session() {
        let controller = controller(3);
        assert!(matches!(
            controller.step_generation(&Sector::General),
            Err(SearchError::NotStarted(_))
        ));
    }

    #[test]
    fn test_stop_takes_effect_at_boundary() {
        let controller = controller(50);
        let sector = Sector::from("A");
        controller.start_search(&sector).unwrap();

        assert!(controller.step_generation(&sector).unwrap().is_some());
        controller.stop_search(&sector);
        assert!(controller.step_generation(&sector).unwrap().is_none());

        let status = controller.get_status(&sector);
        assert!(!status.active);
        assert_eq!(status.generation, 1);
        assert_eq!(
            controller.session(&sector).unwrap().stop_reason(),
            Some(StopReason::Cancelled)
        );
    }

    #[test]
    fn test_deploy_requires_archive() {
        let controller = controller(2);
        assert!(matches!(
            controller.deploy_best(&Sector::from("A")),
            Err(SearchError::NoArchitectureAvailable(_))
        ));

        let sector = Sector::from("A");
        controller.start_search(&sector).unwrap();
        controller.run_search(&sector).unwrap();

        let deployed = controller.deploy_best(&sector).unwrap();
        assert_eq!(
            deployed.id,
            controller.get_best_architectures(&sector, 1)[0].id
        );
    }

    #[test]
    fn test_restart_seeds_from_archive() {
        let controller = controller(2);
        let sector = Sector::from("A");
        let events = controller.subscribe();

        controller.start_search(&sector).unwrap();
        controller.run_search(&sector).unwrap();
        let best_before = controller.get_status(&sector).best_accuracy;

        controller.start_search(&sector).unwrap();
        let seeded = events.try_iter().filter_map(|e| match e {
            NasEvent::SearchStarted { seeded_elites, .. } => Some(seeded_elites),
            _ => None,
        });
        assert_eq!(seeded.collect::<Vec<_>>(), vec![0, 3]);

        controller.run_search(&sector).unwrap();
        assert!(controller.get_status(&sector).best_accuracy >= best_before);
    }

    #[test]
    fn test_shutdown_clears_archives() {
        let controller = controller(1);
        let sector = Sector::from("A");
        controller.start_search(&sector).unwrap();
        controller.run_search(&sector).unwrap();
        assert!(!controller.get_best_architectures(&sector, 5).is_empty());

        controller.shutdown();
        assert!(controller.get_best_architectures(&sector, 5).is_empty());
    }
}
