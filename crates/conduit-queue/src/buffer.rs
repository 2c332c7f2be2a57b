use crate::error::QueueError;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// What `QueueBuffer::append` does once both `max_file_size` (per file) and
/// `max_buffer_size` (total on-disk bytes for this runner) are exhausted
/// (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the append so the caller can trigger an orderly shutdown.
    Shutdown,
    /// Silently discard the record, counting it.
    Drop,
    /// Wait until a reader has advanced past enough bytes to make room.
    Block,
}

pub(crate) struct Shared {
    pub(crate) dir: PathBuf,
    max_file_size: u64,
    /// 0 means unlimited.
    max_buffer_size: u64,
    overflow_policy: OverflowPolicy,
    pub(crate) notify: Notify,
    state: Mutex<State>,
    dropped_count: AtomicU64,
}

struct State {
    current_file_id: u64,
    current_file: std::fs::File,
    current_size: u64,
    total_bytes_on_disk: u64,
}

pub(crate) fn file_name(file_id: u64) -> String {
    format!("{file_id:012}.log")
}

/// A per-runner, disk-backed, rotating record buffer providing at-least-once
/// delivery for buffered runners (§4.E).
pub struct QueueBuffer {
    pub(crate) shared: Arc<Shared>,
}

impl QueueBuffer {
    /// Open (or create) the queue directory `dir`, resuming from whatever
    /// `NNNNNNNNNNNN.log` files are already there.
    pub fn open(
        dir: impl Into<PathBuf>,
        max_file_size: u64,
        max_buffer_size: u64,
        overflow_policy: OverflowPolicy,
    ) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut max_id = 0u64;
        let mut found_any = false;
        let mut total_bytes_on_disk = 0u64;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(id_str) = name.strip_suffix(".log") else {
                continue;
            };
            let Ok(id) = id_str.parse::<u64>() else {
                continue;
            };
            found_any = true;
            max_id = max_id.max(id);
            total_bytes_on_disk += entry.metadata()?.len();
        }
        if !found_any {
            max_id = 0;
        }

        let current_path = dir.join(file_name(max_id));
        let current_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_path)?;
        let current_size = current_file.metadata()?.len();

        Ok(QueueBuffer {
            shared: Arc::new(Shared {
                dir,
                max_file_size,
                max_buffer_size,
                overflow_policy,
                notify: Notify::new(),
                state: Mutex::new(State {
                    current_file_id: max_id,
                    current_file,
                    current_size,
                    total_bytes_on_disk,
                }),
                dropped_count: AtomicU64::new(0),
            }),
        })
    }

    /// Append one already-framed record (§4.A), rotating to a new file if
    /// the current one would exceed `max_file_size`, and applying the
    /// overflow policy if the runner's total on-disk bytes would exceed
    /// `max_buffer_size`.
    pub async fn append(&self, frame: &[u8]) -> Result<(), QueueError> {
        loop {
            enum Outcome {
                Written,
                Dropped,
                WouldBlock,
            }

            let outcome = {
                let mut state = self.shared.state.lock().unwrap();

                if self.shared.max_file_size > 0
                    && state.current_size + frame.len() as u64 > self.shared.max_file_size
                {
                    self.rotate(&mut state)?;
                }

                let would_exceed_buffer = self.shared.max_buffer_size > 0
                    && state.total_bytes_on_disk + frame.len() as u64 > self.shared.max_buffer_size;

                if would_exceed_buffer {
                    match self.shared.overflow_policy {
                        OverflowPolicy::Shutdown => return Err(QueueError::ShutdownOnOverflow),
                        OverflowPolicy::Drop => {
                            self.shared.dropped_count.fetch_add(1, Ordering::Relaxed);
                            warn!(dir = %self.shared.dir.display(), "queue buffer full, dropping record");
                            Outcome::Dropped
                        }
                        OverflowPolicy::Block => Outcome::WouldBlock,
                    }
                } else {
                    state.current_file.write_all(frame)?;
                    state.current_size += frame.len() as u64;
                    state.total_bytes_on_disk += frame.len() as u64;
                    Outcome::Written
                }
            };

            match outcome {
                Outcome::Written | Outcome::Dropped => return Ok(()),
                Outcome::WouldBlock => {
                    self.shared.notify.notified().await;
                }
            }
        }
    }

    fn rotate(&self, state: &mut State) -> std::io::Result<()> {
        state.current_file.sync_all()?;
        let next_id = state.current_file_id + 1;
        let path = self.shared.dir.join(file_name(next_id));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        debug!(file_id = next_id, "rotated queue buffer to new file");
        state.current_file_id = next_id;
        state.current_file = file;
        state.current_size = 0;
        Ok(())
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped_count.load(Ordering::Relaxed)
    }

    pub fn total_bytes_on_disk(&self) -> u64 {
        self.shared.state.lock().unwrap().total_bytes_on_disk
    }

    pub(crate) fn reclaim(&self, bytes: u64) {
        let mut state = self.shared.state.lock().unwrap();
        state.total_bytes_on_disk = state.total_bytes_on_disk.saturating_sub(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rotates_to_a_new_file_once_max_file_size_would_be_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = QueueBuffer::open(dir.path(), 10, 0, OverflowPolicy::Drop).unwrap();
        buffer.append(b"12345").await.unwrap();
        buffer.append(b"12345").await.unwrap(); // exactly fills file 0
        buffer.append(b"1").await.unwrap(); // forces rotation to file 1

        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_str().unwrap().to_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["000000000000.log", "000000000001.log"]);
    }

    #[tokio::test]
    async fn drop_policy_counts_without_growing_disk_usage() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = QueueBuffer::open(dir.path(), 0, 5, OverflowPolicy::Drop).unwrap();
        buffer.append(b"12345").await.unwrap();
        let before = buffer.total_bytes_on_disk();
        buffer.append(b"overflow").await.unwrap();
        assert_eq!(buffer.total_bytes_on_disk(), before);
        assert_eq!(buffer.dropped_count(), 1);
    }

    #[tokio::test]
    async fn resumes_from_existing_files_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let buffer = QueueBuffer::open(dir.path(), 0, 0, OverflowPolicy::Drop).unwrap();
            buffer.append(b"hello").await.unwrap();
        }
        let reopened = QueueBuffer::open(dir.path(), 0, 0, OverflowPolicy::Drop).unwrap();
        assert_eq!(reopened.total_bytes_on_disk(), 5);
    }
}
