//! Per-unit checkpoints so reruns reuse accepted attempts.
//!
//! Written as `<dir>/<unit_id>/checkpoint.json` with a sibling
//! `checkpoint.digest`; a digest mismatch on read is an error, never a
//! silent restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RepairState, Result, SpliceError, UnitId};
use crate::merge::AttemptSelection;
use crate::store::Digest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCheckpoint {
    pub unit_id: UnitId,
    /// Attempt chosen for each ordinal the last run reached.
    pub selection: AttemptSelection,
    pub repair: BTreeMap<u32, RepairState>,
    pub updated_at: DateTime<Utc>,
}

impl UnitCheckpoint {
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            selection: AttemptSelection::new(),
            repair: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Persist the checkpoint and its digest. Both files are replaced atomically.
pub fn write_checkpoint(checkpoint: &UnitCheckpoint, dir: &Path) -> Result<PathBuf> {
    let unit_dir = dir.join(checkpoint.unit_id.as_str());
    std::fs::create_dir_all(&unit_dir)?;

    let artifact_path = unit_dir.join("checkpoint.json");
    let digest_path = unit_dir.join("checkpoint.digest");
    let json = serde_json::to_vec_pretty(checkpoint)?;
    let digest = Digest::compute(&json).to_hex();

    write_atomic(&unit_dir, &artifact_path, &json)?;
    write_atomic(&unit_dir, &digest_path, digest.as_bytes())?;

    Ok(artifact_path)
}

/// Read and verify a checkpoint. `Ok(None)` when the unit has never been checkpointed.
pub fn read_checkpoint(unit_id: &UnitId, dir: &Path) -> Result<Option<UnitCheckpoint>> {
    let unit_dir = dir.join(unit_id.as_str());
    let artifact_path = unit_dir.join("checkpoint.json");
    let digest_path = unit_dir.join("checkpoint.digest");

    let json = match std::fs::read(&artifact_path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let digest = std::fs::read_to_string(&digest_path)?;
    let actual = Digest::compute(&json).to_hex();
    if digest.trim() != actual {
        return Err(SpliceError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(Some(serde_json::from_slice(&json)?))
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RepairStatus;

    fn sample() -> UnitCheckpoint {
        let mut cp = UnitCheckpoint::new(UnitId::new("demo-0123456789ab-t1"));
        cp.selection = AttemptSelection::new().with(1, 1).with(2, 3);
        let mut state = RepairState::new(2, 3, 1);
        state.begin_call();
        state.begin_call();
        state.mark_repaired(3);
        cp.repair.insert(2, state);
        cp
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cp = sample();
        let path = write_checkpoint(&cp, dir.path()).unwrap();
        assert!(path.ends_with("checkpoint.json"));

        let back = read_checkpoint(&cp.unit_id, dir.path()).unwrap().unwrap();
        assert_eq!(back, cp);
        assert_eq!(back.repair[&2].status, RepairStatus::Repaired);
    }

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let got = read_checkpoint(&UnitId::new("nobody-t1"), dir.path()).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_tampered_checkpoint_detected() {
        let dir = tempfile::tempdir().unwrap();
        let cp = sample();
        let path = write_checkpoint(&cp, dir.path()).unwrap();

        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw = raw.replace("\"2\": 3", "\"2\": 4");
        std::fs::write(&path, raw).unwrap();

        match read_checkpoint(&cp.unit_id, dir.path()) {
            Err(SpliceError::DigestMismatch { .. }) => {}
            other => panic!("expected DigestMismatch, got {other:?}"),
        }
    }
}
