use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// How many trailing bytes before `seek` get hashed to detect whether the
/// file's content actually changed underneath a resumed journal (§4.C).
pub const HASH_WINDOW: u64 = 4096;

/// Per-stream resume state, persisted as JSON at
/// `<root>/seekjournals/<slug>` (§6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeekJournal {
    pub last_hash: u64,
    pub last_len: u64,
    pub last_start: u64,
    pub seek: u64,
}

impl SeekJournal {
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let journal = serde_json::from_slice(&bytes).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
                })?;
                Ok(Some(journal))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write via a temp file + rename so a crash never leaves a
    /// half-written journal behind.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("journal")
        ));
        let bytes = serde_json::to_vec(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, path)
    }

    /// Record that we've read up through `new_seek`, hashing the
    /// `HASH_WINDOW` bytes immediately preceding it so a future resume can
    /// detect whether the file changed out from under us.
    pub fn advance(&mut self, new_seek: u64, preceding_bytes: &[u8]) {
        self.seek = new_seek;
        self.last_len = preceding_bytes.len() as u64;
        self.last_start = new_seek.saturating_sub(preceding_bytes.len() as u64);
        self.last_hash = hash_tail(preceding_bytes);
    }

    /// Whether `live_bytes` (the bytes currently on disk at
    /// `[last_start, seek)`) still matches what we last saw there.
    pub fn still_valid(&self, live_bytes: &[u8]) -> bool {
        live_bytes.len() as u64 == self.last_len && hash_tail(live_bytes) == self.last_hash
    }
}

pub fn hash_tail(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seekjournals").join("stream-a");
        let mut journal = SeekJournal::default();
        journal.advance(1024, b"tail bytes");
        journal.save(&path).unwrap();

        let loaded = SeekJournal::load(&path).unwrap().unwrap();
        assert_eq!(loaded, journal);
    }

    #[test]
    fn missing_journal_loads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seekjournals").join("never-written");
        assert!(SeekJournal::load(&path).unwrap().is_none());
    }

    #[test]
    fn still_valid_detects_changed_tail_bytes() {
        let mut journal = SeekJournal::default();
        journal.advance(100, b"original tail");
        assert!(journal.still_valid(b"original tail"));
        assert!(!journal.still_valid(b"different tail"));
    }
}
