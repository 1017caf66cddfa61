//! Compile results keyed by what was compiled.
//!
//! Layout: `<dir>/<sha256>.json`, where the digest covers the toolchain
//! fingerprint, the file name and the variant text. Only the raw exit code and
//! output are kept; classification runs again on every hit so changed
//! environment rules take effect.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use splice_core::Digest;
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCompile {
    pub exit_code: i32,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct CompileCache {
    dir: PathBuf,
    fingerprint: String,
}

impl CompileCache {
    /// `fingerprint` identifies the toolchain settings the results belong to.
    pub fn new(dir: impl Into<PathBuf>, fingerprint: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key(&self, file_name: &str, text: &str) -> Digest {
        let mut keyed = self.fingerprint.as_bytes().to_vec();
        keyed.push(0);
        keyed.extend_from_slice(file_name.as_bytes());
        keyed.push(0);
        keyed.extend_from_slice(text.as_bytes());
        Digest::compute(&keyed)
    }

    fn path(&self, key: &Digest) -> PathBuf {
        self.dir.join(format!("{}.json", key.to_hex()))
    }

    /// A missing or unreadable entry is a miss.
    pub fn get(&self, key: &Digest) -> Option<CachedCompile> {
        let path = self.path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read compile cache entry");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt compile cache entry");
                None
            }
        }
    }

    pub fn put(&self, key: &Digest, entry: &CachedCompile) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_vec(entry).map_err(io::Error::other)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(key)).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_covers_fingerprint_name_and_text() {
        let gcc = CompileCache::new("/tmp/c", "gcc -O2");
        let clang = CompileCache::new("/tmp/c", "clang -O2");
        let key = gcc.key("a.c", "int x;");
        assert_eq!(key, gcc.key("a.c", "int x;"));
        assert_ne!(key, clang.key("a.c", "int x;"));
        assert_ne!(key, gcc.key("b.c", "int x;"));
        assert_ne!(key, gcc.key("a.c", "int y;"));
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path().join("cc"), "gcc");
        let key = cache.key("a.c", "int x;");
        assert_eq!(cache.get(&key), None);

        let entry = CachedCompile {
            exit_code: 1,
            output: "a.c:1:1: error: boom".into(),
        };
        cache.put(&key, &entry).unwrap();
        assert_eq!(cache.get(&key), Some(entry));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path(), "gcc");
        let key = cache.key("a.c", "int x;");
        std::fs::write(dir.path().join(format!("{}.json", key.to_hex())), "{not json").unwrap();
        assert_eq!(cache.get(&key), None);
    }
}
