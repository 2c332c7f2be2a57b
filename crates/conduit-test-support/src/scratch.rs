use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A tempdir that outlives the test, with small helpers for writing fixture
/// files under it without each test hand-rolling `tempfile::tempdir()` +
/// `std::fs::write`.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> Self {
        ScratchDir {
            dir: tempfile::tempdir().expect("create scratch dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `contents` to `name` under the scratch dir, creating parent
    /// directories if needed, and return the full path.
    pub fn write_file(&self, name: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, contents).expect("write fixture file");
        path
    }
}

impl Default for ScratchDir {
    fn default() -> Self {
        Self::new()
    }
}
