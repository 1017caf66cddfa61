use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{CandidateStore, Result, StoreError};
use crate::domain::UnitId;

/// Filesystem-backed candidate store.
///
/// Layout: `<root>/candidates/<unit_id>/<ordinal>/<attempt>.txt`
pub struct FsCandidateStore {
    candidates_dir: PathBuf,
}

impl FsCandidateStore {
    /// Create a store rooted at `root`. Creates `root/candidates/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let candidates_dir = root.as_ref().join("candidates");
        fs::create_dir_all(&candidates_dir)?;
        Ok(Self { candidates_dir })
    }

    fn ordinal_dir(&self, unit: &UnitId, ordinal: u32) -> PathBuf {
        self.candidates_dir
            .join(unit.as_str())
            .join(ordinal.to_string())
    }

    fn attempt_path(&self, unit: &UnitId, ordinal: u32, attempt: u32) -> PathBuf {
        self.ordinal_dir(unit, ordinal)
            .join(format!("{}.txt", attempt))
    }
}

/// Flush the directory entry created by a rename.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl CandidateStore for FsCandidateStore {
    fn put(&self, unit: &UnitId, ordinal: u32, text: &str) -> Result<u32> {
        if ordinal == 0 {
            return Err(StoreError::InvalidOrdinal);
        }
        let dir = self.ordinal_dir(unit, ordinal);
        fs::create_dir_all(&dir)?;

        let attempt = self.attempts(unit, ordinal)?.last().copied().unwrap_or(0) + 1;
        let path = self.attempt_path(unit, ordinal, attempt);

        // Atomic write: temp file in the same directory, fsync, then no-clobber rename.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::Conflict {
                    unit: unit.clone(),
                    ordinal,
                    attempt,
                }
            } else {
                StoreError::Io(e.error)
            }
        })?;
        sync_dir(&dir)?;

        Ok(attempt)
    }

    fn get(&self, unit: &UnitId, ordinal: u32, attempt: u32) -> Result<String> {
        let path = self.attempt_path(unit, ordinal, attempt);
        fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    unit: unit.clone(),
                    ordinal,
                    attempt,
                }
            } else {
                StoreError::Io(e)
            }
        })
    }

    fn attempts(&self, unit: &UnitId, ordinal: u32) -> Result<Vec<u32>> {
        let dir = self.ordinal_dir(unit, ordinal);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut attempts = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(n) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                attempts.push(n);
            }
        }
        attempts.sort_unstable();
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsCandidateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCandidateStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn unit() -> UnitId {
        UnitId::new("server-0123456789ab-t1")
    }

    #[test]
    fn candidate_roundtrip() {
        let (_dir, store) = make_store();
        let attempt = store.put(&unit(), 1, "int f(void) { return 1; }").unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(
            store.get(&unit(), 1, 1).unwrap(),
            "int f(void) { return 1; }"
        );
    }

    #[test]
    fn attempts_strictly_increase_per_ordinal() {
        let (_dir, store) = make_store();
        assert_eq!(store.put(&unit(), 1, "a").unwrap(), 1);
        assert_eq!(store.put(&unit(), 1, "b").unwrap(), 2);
        assert_eq!(store.put(&unit(), 2, "c").unwrap(), 1);
        assert_eq!(store.put(&unit(), 1, "a").unwrap(), 3);
        assert_eq!(store.attempts(&unit(), 1).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.latest(&unit(), 1).unwrap(), 3);
        assert_eq!(store.get(&unit(), 1, 1).unwrap(), "a");
    }

    #[test]
    fn latest_without_candidates_errors() {
        let (_dir, store) = make_store();
        match store.latest(&unit(), 4) {
            Err(StoreError::NoCandidates { ordinal, .. }) => assert_eq!(ordinal, 4),
            other => panic!("expected NoCandidates, got {other:?}"),
        }
        assert!(store.attempts(&unit(), 4).unwrap().is_empty());
    }

    #[test]
    fn get_nonexistent_returns_not_found() {
        let (_dir, store) = make_store();
        store.put(&unit(), 1, "x").unwrap();
        match store.get(&unit(), 1, 9) {
            Err(StoreError::NotFound { attempt, .. }) => assert_eq!(attempt, 9),
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(!store.exists(&unit(), 1, 9).unwrap());
        assert!(store.exists(&unit(), 1, 1).unwrap());
    }

    #[test]
    fn ordinal_zero_rejected() {
        let (_dir, store) = make_store();
        assert!(matches!(
            store.put(&unit(), 0, "x"),
            Err(StoreError::InvalidOrdinal)
        ));
    }

    #[test]
    fn stray_files_are_ignored() {
        let (dir, store) = make_store();
        store.put(&unit(), 1, "x").unwrap();
        let ordinal_dir = dir
            .path()
            .join("candidates")
            .join(unit().as_str())
            .join("1");
        std::fs::write(ordinal_dir.join("notes.md"), "operator notes").unwrap();
        std::fs::write(ordinal_dir.join("draft.txt"), "not an attempt").unwrap();
        assert_eq!(store.attempts(&unit(), 1).unwrap(), vec![1]);
    }

    #[test]
    fn put_leaves_only_the_attempt_file() {
        let (dir, store) = make_store();
        store.put(&unit(), 2, "int h(void) { return 2; }").unwrap();
        let ordinal_dir = dir
            .path()
            .join("candidates")
            .join(unit().as_str())
            .join("2");
        let names: Vec<String> = std::fs::read_dir(&ordinal_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.txt"]);

        let reopened = FsCandidateStore::new(dir.path()).unwrap();
        assert_eq!(reopened.get(&unit(), 2, 1).unwrap(), "int h(void) { return 2; }");
    }

    #[test]
    fn put_verified_returns_attempt() {
        let (_dir, store) = make_store();
        let text = "void g(int x) {\n    (void)x;\n}\n";
        assert_eq!(store.put_verified(&unit(), 3, text).unwrap(), 1);
        assert_eq!(store.get(&unit(), 3, 1).unwrap(), text);
    }

    #[test]
    fn unicode_text_roundtrip() {
        let (_dir, store) = make_store();
        let text = "/* größe */ int f(void) { return 0; }";
        let attempt = store.put(&unit(), 1, text).unwrap();
        assert_eq!(store.get(&unit(), 1, attempt).unwrap(), text);
    }
}
