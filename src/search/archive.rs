//! Elite archive: ranked retention of the best architectures of a sector.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::schema::{Architecture, Sector, rank_order};

/// Capped, ranked list of a sector's best architectures.
///
/// Entries are owned snapshots, so later changes to the live population
/// never reach them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliteArchive {
    sector: Sector,
    capacity: usize,
    entries: Vec<Architecture>,
}

impl EliteArchive {
    pub fn new(sector: Sector, capacity: usize) -> Self {
        Self {
            sector,
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert an evaluated architecture, keeping ranking order and the cap.
    /// Returns true if the architecture is retained.
    pub fn insert(&mut self, architecture: Architecture) -> bool {
        if architecture.sector != self.sector
            || !architecture.is_evaluated()
            || self.entries.iter().any(|e| e.id == architecture.id)
        {
            return false;
        }

        let position = self
            .entries
            .partition_point(|e| rank_order(e, &architecture).is_lt());
        if position >= self.capacity {
            return false;
        }

        self.entries.insert(position, architecture);
        self.entries.truncate(self.capacity);
        true
    }

    /// Up to `n` top-ranked entries.
    pub fn best(&self, n: usize) -> &[Architecture] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn top(&self) -> Option<&Architecture> {
        self.entries.first()
    }

    pub fn entries(&self) -> &[Architecture] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn best_accuracy(&self) -> f64 {
        self.top().map_or(0.0, Architecture::accuracy)
    }

    pub fn average_complexity(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().map(|a| a.complexity).sum::<f64>() / self.entries.len() as f64
    }

    /// Save every entry as a JSON file in `dir`.
    pub fn save_to_dir<P: AsRef<Path>>(&self, dir: P) -> io::Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut paths = Vec::with_capacity(self.entries.len());
        for (rank, architecture) in self.entries.iter().enumerate() {
            let export = EliteExport {
                rank,
                architecture: architecture.clone(),
            };
            let path = dir.join(format!("{}.json", architecture.id));
            let json = serde_json::to_string_pretty(&export)?;
            fs::write(&path, json)?;
            paths.push(path);
        }

        Ok(paths)
    }

    /// Load a sector's entries from a directory written by [`Self::save_to_dir`].
    /// Files for other sectors and unreadable files are skipped.
    pub fn load_from_dir<P: AsRef<Path>>(
        dir: P,
        sector: Sector,
        capacity: usize,
    ) -> io::Result<Self> {
        let mut archive = Self::new(sector, capacity);

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Ok(export) = load_export(&path)
            {
                archive.insert(export.architecture);
            }
        }

        Ok(archive)
    }
}

/// On-disk format of one archived architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliteExport {
    /// Rank at the time of export.
    pub rank: usize,
    pub architecture: Architecture,
}

fn load_export(path: &Path) -> io::Result<EliteExport> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
