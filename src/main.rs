//! NAS Engine CLI - Run architecture searches from JSON configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use nas_engine::{
    schema::{EngineConfig, NasEvent, Sector},
    search::{EliteArchive, SearchController, SurrogateEvaluator},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.get(1).is_some_and(|a| a == "--help" || a == "-h") {
        print_usage(&args[0]);
        return;
    }

    if args.get(1).is_some_and(|a| a == "--example") {
        print_example_config();
        return;
    }

    let mut config_path: Option<PathBuf> = None;
    let mut sectors: Vec<Sector> = Vec::new();
    let mut archive_dir: Option<PathBuf> = None;

    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--sector" => match rest.next() {
                Some(sector) => sectors.push(Sector::from(sector.as_str())),
                None => exit_with("--sector requires a value"),
            },
            "--archive" => match rest.next() {
                Some(dir) => archive_dir = Some(PathBuf::from(dir)),
                None => exit_with("--archive requires a directory"),
            },
            path => config_path = Some(PathBuf::from(path)),
        }
    }

    let config = match &config_path {
        Some(path) => EngineConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }),
        None => EngineConfig::default(),
    };

    if sectors.is_empty() {
        sectors = config.sectors.keys().cloned().collect();
    }

    let seed = config.optimizer.random_seed.unwrap_or(0);
    let elite_size = config.optimizer.elite_size;
    let controller = SearchController::new(config, Arc::new(SurrogateEvaluator::new(seed)))
        .unwrap_or_else(|e| {
            eprintln!("Error creating controller: {}", e);
            std::process::exit(1);
        });
    let controller = Arc::new(controller);

    // Resume from previously exported elites
    if let Some(dir) = archive_dir.as_ref().filter(|d| d.is_dir()) {
        for sector in &sectors {
            match EliteArchive::load_from_dir(dir, sector.clone(), elite_size) {
                Ok(archive) if !archive.is_empty() => {
                    println!("Restored {} elites for {}", archive.len(), sector);
                    if let Err(e) = controller.restore_archive(archive) {
                        eprintln!("Error restoring archive for {}: {}", sector, e);
                    }
                }
                Ok(_) => {}
                Err(e) => eprintln!("Error reading archive for {}: {}", sector, e),
            }
        }
    }

    println!("Neural Architecture Search");
    println!("==========================");
    println!(
        "Sectors: {}",
        sectors
            .iter()
            .map(Sector::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();

    let events = controller.subscribe();
    let start = Instant::now();

    let mut handles = Vec::with_capacity(sectors.len());
    for sector in &sectors {
        match controller.spawn_search(sector) {
            Ok(handle) => handles.push((sector.clone(), handle)),
            Err(e) => eprintln!("Error starting search for {}: {}", sector, e),
        }
    }

    let mut running = handles.len();
    while running > 0 {
        let Ok(event) = events.recv() else {
            break;
        };
        match &event {
            NasEvent::GenerationCompleted {
                sector,
                generation,
                best_accuracy,
            } => {
                if generation % 10 == 0 {
                    println!(
                        "  [{}] generation {}: best={:.2}%",
                        sector, generation, best_accuracy
                    );
                }
            }
            NasEvent::TargetReached {
                sector,
                generation,
                accuracy,
            } => println!(
                "  [{}] target reached in generation {}: {:.2}%",
                sector, generation, accuracy
            ),
            NasEvent::SearchStopped {
                sector,
                generation,
                reason,
            } => {
                println!(
                    "  [{}] stopped after {} generations ({:?})",
                    sector, generation, reason
                );
                running -= 1;
            }
            _ => {}
        }
    }

    for (sector, handle) in handles {
        match handle.join() {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => eprintln!("Search for {} failed: {}", sector, e),
            Err(_) => eprintln!("Search thread for {} panicked", sector),
        }
    }

    println!();
    println!("Results:");
    for sector in &sectors {
        let status = controller.get_status(sector);
        match controller.deploy_best(sector) {
            Ok(best) => println!(
                "  {}: {} layers, accuracy {:.2}%, complexity {:.2}, {} architectures seen ({})",
                sector,
                best.layer_count(),
                best.accuracy(),
                best.complexity,
                status.total_architectures_seen,
                best.id
            ),
            Err(e) => println!("  {}: {}", sector, e),
        }

        if let Some(dir) = &archive_dir
            && let Some(archive) = controller.archive(sector)
            && let Err(e) = archive.save_to_dir(dir)
        {
            eprintln!("Error saving archive for {}: {}", sector, e);
        }
    }

    println!();
    println!("Time: {:.2}s", start.elapsed().as_secs_f32());
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} [config.json] [--sector NAME]... [--archive DIR]",
        program
    );
    eprintln!();
    eprintln!("Run evolutionary architecture searches for each sector.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.json     Engine configuration (default: built-in sectors)");
    eprintln!("  --sector NAME   Search only this sector (repeatable)");
    eprintln!("  --archive DIR   Load elites from and save elites to DIR");
    eprintln!("  --example       Print the default configuration");
}

fn print_example_config() {
    match serde_json::to_string_pretty(&EngineConfig::default()) {
        Ok(json) => {
            println!("Example configuration (config.json):");
            println!("{}", json);
        }
        Err(e) => exit_with(&format!("Error serializing config: {}", e)),
    }
}

fn exit_with(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}
