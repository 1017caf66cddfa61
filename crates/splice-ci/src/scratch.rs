//! Per-compile scratch directories.

use std::io::Write;
use std::path::{Path, PathBuf};

use splice_core::emit_cleanup_failed;
use tempfile::TempDir;

/// A private directory removed when dropped.
///
/// Removal errors are logged and swallowed so cleanup never masks the
/// verdict being produced.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Create a uniquely named directory under `parent` (or the system temp dir).
    pub fn create(parent: Option<&Path>, label: &str) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("splice-{label}-");
        builder.prefix(&prefix);
        let dir = match parent {
            Some(p) => {
                std::fs::create_dir_all(p)?;
                builder.tempdir_in(p)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `text` as `file_name`, flush it to disk and confirm it is readable and non-empty.
    pub fn materialize(&self, file_name: &str, text: &str) -> std::io::Result<PathBuf> {
        let target = self.path.join(file_name);
        let mut file = std::fs::File::create(&target)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        drop(file);

        let len = std::fs::metadata(&target)?.len();
        if len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is empty after write", target.display()),
            ));
        }
        Ok(target)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                emit_cleanup_failed(&self.path, &e);
            }
        }
    }
}
