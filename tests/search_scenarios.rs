use std::sync::Arc;
use std::sync::mpsc::Receiver;

use nas_engine::schema::{
    Architecture, EngineConfig, LayerParams, NasEvent, OptimizerConfig, PerformanceRecord, Sector,
    SectorConfig, StopReason, rank_order,
};
use nas_engine::search::{
    EliteArchive, EvaluationError, FitnessEvaluator, SearchController, SearchError,
    SurrogateEvaluator,
};

fn sector_a(target_accuracy: f64) -> SectorConfig {
    SectorConfig {
        min_layers: 5,
        max_layers: 10,
        target_accuracy,
        ..Default::default()
    }
}

fn controller_with(
    max_generations: usize,
    target_accuracy: f64,
    evaluator: Arc<dyn FitnessEvaluator>,
) -> SearchController {
    let config = EngineConfig {
        optimizer: OptimizerConfig {
            population_size: 20,
            elite_size: 5,
            max_generations,
            random_seed: Some(42),
            ..Default::default()
        },
        ..Default::default()
    }
    .with_sector(Sector::from("A"), sector_a(target_accuracy));
    SearchController::new(config, evaluator).unwrap()
}

fn controller(max_generations: usize, target_accuracy: f64) -> SearchController {
    controller_with(
        max_generations,
        target_accuracy,
        Arc::new(SurrogateEvaluator::new(11)),
    )
}

fn drain(events: &Receiver<NasEvent>) -> Vec<NasEvent> {
    events.try_iter().collect()
}

#[test]
fn test_search_runs_to_max_generations() {
    let controller = controller(3, 99.9);
    let sector = Sector::from("A");

    controller.start_search(&sector).unwrap();
    let reason = controller.run_search(&sector).unwrap();
    assert_eq!(reason, StopReason::MaxGenerations);

    let status = controller.get_status(&sector);
    assert_eq!(status.generation, 3);
    assert!(!status.active);
    assert!(status.total_architectures_seen >= 20);

    let best = controller.get_best_architectures(&sector, 5);
    assert_eq!(best.len(), 5);
    for pair in best.windows(2) {
        assert!(pair[0].accuracy() >= pair[1].accuracy());
        assert!(rank_order(&pair[0], &pair[1]).is_lt());
    }
    for arch in &best {
        assert!(arch.validate(5, 10).is_ok());
        assert_eq!(arch.sector, sector);
    }
    assert_eq!(status.best_accuracy, best[0].accuracy());
}

#[test]
fn test_target_zero_stops_after_first_generation() {
    let controller = controller(100, 0.0);
    let sector = Sector::from("A");
    let events = controller.subscribe();

    controller.start_search(&sector).unwrap();
    let reason = controller.run_search(&sector).unwrap();
    assert_eq!(reason, StopReason::TargetReached);
    assert_eq!(controller.get_status(&sector).generation, 1);

    let events = drain(&events);
    assert!(matches!(events[0], NasEvent::SearchStarted { .. }));
    assert!(matches!(
        events[1],
        NasEvent::GenerationCompleted { generation: 1, .. }
    ));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, NasEvent::TargetReached { generation: 1, .. }))
    );
    assert!(matches!(
        events.last(),
        Some(NasEvent::SearchStopped {
            reason: StopReason::TargetReached,
            ..
        })
    ));
}

#[test]
fn test_stop_is_idempotent() {
    let controller = controller(100, 99.9);
    let sector = Sector::from("A");
    let events = controller.subscribe();

    controller.start_search(&sector).unwrap();
    controller.step_generation(&sector).unwrap();
    controller.stop_search(&sector);
    controller.stop_search(&sector);
    assert!(controller.step_generation(&sector).unwrap().is_none());

    let stopped = drain(&events)
        .into_iter()
        .filter(|e| matches!(e, NasEvent::SearchStopped { .. }))
        .count();
    assert_eq!(stopped, 1);
    assert!(!controller.get_status(&sector).active);

    // Stopping a sector that never ran is a no-op
    controller.stop_search(&Sector::Cipa);
}

#[test]
fn test_failed_evaluations_rank_last() {
    let surrogate = SurrogateEvaluator::new(5);
    let evaluator = move |arch: &Architecture| -> Result<PerformanceRecord, EvaluationError> {
        if arch.layer_count() > 8 {
            Err(EvaluationError::Failed("out of memory".to_string()))
        } else {
            surrogate.evaluate(arch)
        }
    };
    let controller = controller_with(1, 99.9, Arc::new(evaluator));
    let sector = Sector::from("A");

    controller.start_search(&sector).unwrap();
    let report = controller.step_generation(&sector).unwrap().unwrap();
    assert_eq!(report.evaluated, 20);
    assert!(report.failed < 20);

    let best = controller.get_best_architectures(&sector, 5);
    assert!(best[0].layer_count() <= 8);
    for arch in best.iter().filter(|a| a.layer_count() > 8) {
        assert_eq!(arch.accuracy(), 0.0);
    }
}

#[test]
fn test_archive_bounded_and_best_monotonic() {
    let controller = controller(8, 99.9);
    let sector = Sector::from("A");
    let events = controller.subscribe();

    controller.start_search(&sector).unwrap();
    let mut previous = 0.0;
    while let Some(report) = controller.step_generation(&sector).unwrap() {
        let archive = controller.archive(&sector).unwrap();
        assert!(archive.len() <= 5);
        assert!(archive.best_accuracy() >= previous);
        assert!(report.best_accuracy >= previous);
        previous = archive.best_accuracy();
    }

    let bests: Vec<f64> = drain(&events)
        .into_iter()
        .filter_map(|e| match e {
            NasEvent::GenerationCompleted { best_accuracy, .. } => Some(best_accuracy),
            _ => None,
        })
        .collect();
    assert_eq!(bests.len(), 8);
    assert!(bests.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn test_error_cases() {
    let controller = controller(2, 99.9);
    let sector = Sector::from("A");

    assert!(matches!(
        controller.start_search(&Sector::from("unlisted")),
        Err(SearchError::UnknownSector(_))
    ));
    assert!(matches!(
        controller.deploy_best(&sector),
        Err(SearchError::NoArchitectureAvailable(_))
    ));

    controller.start_search(&sector).unwrap();
    assert!(matches!(
        controller.start_search(&sector),
        Err(SearchError::AlreadyRunning(_))
    ));

    assert!(controller.get_best_architectures(&Sector::Cipa, 5).is_empty());
    assert_eq!(controller.get_status(&Sector::Cipa).generation, 0);
}

#[test]
fn test_deploy_announces_best() {
    let controller = controller(2, 99.9);
    let sector = Sector::from("A");

    controller.start_search(&sector).unwrap();
    controller.run_search(&sector).unwrap();

    let events = controller.subscribe();
    let deployed = controller.deploy_best(&sector).unwrap();
    assert_eq!(
        drain(&events),
        vec![NasEvent::ArchitectureDeployed {
            sector: sector.clone(),
            architecture_id: deployed.id.clone(),
        }]
    );
}

#[test]
fn test_concurrent_sector_searches() {
    let config = EngineConfig {
        optimizer: OptimizerConfig {
            max_generations: 5,
            random_seed: Some(3),
            ..Default::default()
        },
        ..Default::default()
    };
    let controller =
        Arc::new(SearchController::new(config, Arc::new(SurrogateEvaluator::new(3))).unwrap());

    let handles: Vec<_> = [Sector::Ferpa, Sector::Fisma, Sector::Cipa]
        .iter()
        .map(|sector| controller.spawn_search(sector).unwrap())
        .collect();
    for handle in handles {
        let reason = handle.join().unwrap().unwrap();
        assert!(matches!(
            reason,
            StopReason::MaxGenerations | StopReason::TargetReached
        ));
    }

    for arch in controller.get_best_architectures(&Sector::Ferpa, 5) {
        assert_eq!(arch.sector, Sector::Ferpa);
        for layer in &arch.layers {
            if let LayerParams::Attention { heads, .. } = layer.params {
                assert!(heads <= 4);
            }
        }
    }
    for arch in controller.get_best_architectures(&Sector::Fisma, 5) {
        assert_eq!(arch.sector, Sector::Fisma);
        for layer in &arch.layers {
            if let LayerParams::Dense { units } = layer.params {
                assert!(units >= 128);
            }
        }
    }
    assert!(controller.get_status(&Sector::General).generation == 0);
}

#[test]
fn test_archive_persists_across_controllers() {
    let dir = tempfile::tempdir().unwrap();
    let sector = Sector::from("A");

    let first = controller(3, 99.9);
    first.start_search(&sector).unwrap();
    first.run_search(&sector).unwrap();
    let saved = first.archive(&sector).unwrap();
    saved.save_to_dir(dir.path()).unwrap();

    let second = controller(1, 99.9);
    let loaded = EliteArchive::load_from_dir(dir.path(), sector.clone(), 5).unwrap();
    assert_eq!(loaded.len(), saved.len());
    second.restore_archive(loaded).unwrap();
    assert_eq!(
        second.get_status(&sector).best_accuracy,
        saved.best_accuracy()
    );

    let events = second.subscribe();
    second.start_search(&sector).unwrap();
    assert!(matches!(
        drain(&events).first(),
        Some(NasEvent::SearchStarted {
            seeded_elites: 5,
            ..
        })
    ));

    second.run_search(&sector).unwrap();
    assert!(second.get_status(&sector).best_accuracy >= saved.best_accuracy());

    let foreign = EliteArchive::new(Sector::from("unlisted"), 5);
    assert!(matches!(
        second.restore_archive(foreign),
        Err(SearchError::UnknownSector(_))
    ));
}
