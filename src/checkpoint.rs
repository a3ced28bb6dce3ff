//! Checkpoints of replication state at day boundaries.
//!
//! A [`ReplicationSnapshot`] holds everything needed to resume a sample path: the cursor,
//! the parameter draw, each stratum's compartments and last-day counters, and the
//! aggregated histories. Snapshots are keyed by path identifier and checkpoint date.

use std::collections::HashMap;
use std::fs::{create_dir_all, read_dir, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::compartments::{Compartments, Counters};
use crate::error::SimError;
use crate::params::EpiParams;
use crate::replication::History;
use crate::stratum::{Strata, Stratum};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StratumSnapshot {
    pub state: Compartments<Array2<f64>>,
    pub tracking: Counters<Array2<f64>>,
}

impl StratumSnapshot {
    #[must_use]
    pub fn of(stratum: &Stratum) -> StratumSnapshot {
        StratumSnapshot {
            state: stratum.state().clone(),
            tracking: stratum.tracking().clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSnapshot {
    pub next_t: usize,
    pub params: EpiParams,
    pub strata: Strata<StratumSnapshot>,
    pub history: History,
}

pub trait CheckpointStore {
    /// # Errors
    ///
    /// Returns a `SimError` if the snapshot cannot be written.
    fn save(
        &mut self,
        path_id: &str,
        date: NaiveDate,
        snapshot: &ReplicationSnapshot,
    ) -> Result<(), SimError>;

    /// # Errors
    ///
    /// Returns `SimError::MissingCheckpoint` if nothing was saved under this key.
    fn load(&self, path_id: &str, date: NaiveDate) -> Result<ReplicationSnapshot, SimError>;
}

/// Stores each snapshot as `{path_id}_{YYYY-MM-DD}_sim.json` in one directory.
#[derive(Clone, Debug)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
}

impl JsonCheckpointStore {
    /// # Errors
    ///
    /// Returns a `SimError` if the directory cannot be created.
    pub fn new(dir: &Path) -> Result<JsonCheckpointStore, SimError> {
        create_dir_all(dir)?;
        Ok(JsonCheckpointStore {
            dir: dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path_for(&self, path_id: &str, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{path_id}_{}_sim.json", date.format("%Y-%m-%d")))
    }

    /// Identifiers of every path with a checkpoint on `date`, sorted.
    ///
    /// # Errors
    ///
    /// Returns a `SimError` if the directory cannot be listed.
    pub fn path_ids(&self, date: NaiveDate) -> Result<Vec<String>, SimError> {
        let suffix = format!("_{}_sim.json", date.format("%Y-%m-%d"));
        let mut ids = Vec::new();
        for entry in read_dir(&self.dir)? {
            let name = entry?.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(&suffix)) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn save(
        &mut self,
        path_id: &str,
        date: NaiveDate,
        snapshot: &ReplicationSnapshot,
    ) -> Result<(), SimError> {
        let mut writer = BufWriter::new(File::create(self.path_for(path_id, date))?);
        serde_json::to_writer(&mut writer, snapshot)?;
        writer.flush()?;
        Ok(())
    }

    fn load(&self, path_id: &str, date: NaiveDate) -> Result<ReplicationSnapshot, SimError> {
        let path = self.path_for(path_id, date);
        let file = File::open(&path)
            .map_err(|_| SimError::MissingCheckpoint(path.display().to_string()))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Keeps snapshots in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: HashMap<(String, NaiveDate), ReplicationSnapshot>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(
        &mut self,
        path_id: &str,
        date: NaiveDate,
        snapshot: &ReplicationSnapshot,
    ) -> Result<(), SimError> {
        self.snapshots
            .insert((path_id.to_string(), date), snapshot.clone());
        Ok(())
    }

    fn load(&self, path_id: &str, date: NaiveDate) -> Result<ReplicationSnapshot, SimError> {
        self.snapshots
            .get(&(path_id.to_string(), date))
            .cloned()
            .ok_or_else(|| SimError::MissingCheckpoint(format!("{path_id} at {date}")))
    }
}
