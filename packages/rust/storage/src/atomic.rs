//! Temp-then-rename file writes.
//!
//! An [`AtomicFile`] writes into a hidden sibling `.<name>.tmp` and only
//! becomes visible under its target name on [`AtomicFile::commit`]. Dropping
//! it uncommitted removes the temporary.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use docforest_shared::{DocForestError, Result};

/// Suffix of in-progress temporaries.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A file being written under a temporary name.
pub struct AtomicFile {
    target: PathBuf,
    temp: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    /// Create the temporary for `target`, truncating any stale one.
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let temp = temp_path(&target)?;
        let file = File::create(&temp).map_err(|e| DocForestError::io(&temp, e))?;
        Ok(Self {
            target,
            temp,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Flush, sync and rename into place.
    pub fn commit(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| DocForestError::io(&self.temp, e.into_error()))?;
            file.sync_all().map_err(|e| DocForestError::io(&self.temp, e))?;
        }
        std::fs::rename(&self.temp, &self.target)
            .map_err(|e| DocForestError::io(&self.target, e))?;
        // Nothing left for Drop to clean up.
        self.temp = PathBuf::new();
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::other("atomic file already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        self.writer.take();
        if self.temp.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.temp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.temp.display(), error = %e, "failed to discard temporary");
            }
        }
    }
}

/// Write `bytes` to `target` atomically.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = AtomicFile::create(target)?;
    file.write_all(bytes)
        .map_err(|e| DocForestError::io(target, e))?;
    file.commit()
}

/// True for names the stores never treat as artifacts.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn temp_path(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DocForestError::Storage(format!("bad artifact path {}", target.display())))?;
    Ok(target.with_file_name(format!(".{name}{TEMP_SUFFIX}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");

        let mut file = AtomicFile::create(&target).unwrap();
        file.write_all(b"a,b\n").unwrap();
        assert!(!target.exists());
        assert!(dir.path().join(".out.csv.tmp").exists());

        file.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "a,b\n");
        assert!(!dir.path().join(".out.csv.tmp").exists());
    }

    #[test]
    fn drop_without_commit_discards() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tree.json");
        {
            let mut file = AtomicFile::create(&target).unwrap();
            file.write_all(b"{\"partial\":").unwrap();
        }
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.json");
        write_atomic(&target, b"1").unwrap();
        write_atomic(&target, b"2").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"2");
    }
}
