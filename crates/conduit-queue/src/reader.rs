use crate::buffer::{file_name, QueueBuffer};
use crate::error::QueueError;
use conduit_message::frame;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

/// Reads framed records out of a [`QueueBuffer`] in order, starting from a
/// persisted cursor, and advances the acked cursor only when the caller
/// confirms downstream delivery via [`QueueReader::update_cursor`] (§4.E).
pub struct QueueReader {
    shared: Arc<crate::buffer::Shared>,
    cursor_path: PathBuf,
    cursor_update_count: u64,
    read_file_id: u64,
    read_offset: u64,
    acked_file_id: u64,
    acked_offset: u64,
    lowest_retained_file_id: u64,
    updates_since_flush: u64,
}

fn parse_cursor(s: &str) -> Result<(u64, u64), QueueError> {
    let (file_part, offset_part) = s
        .split_once(':')
        .ok_or_else(|| QueueError::MalformedCursor(s.to_owned()))?;
    let file_id: u64 = file_part
        .parse()
        .map_err(|_| QueueError::MalformedCursor(s.to_owned()))?;
    let offset: u64 = offset_part
        .parse()
        .map_err(|_| QueueError::MalformedCursor(s.to_owned()))?;
    Ok((file_id, offset))
}

fn format_cursor(file_id: u64, offset: u64) -> String {
    format!("{file_id:012}:{offset}")
}

impl QueueReader {
    pub(crate) fn new(buffer: &QueueBuffer, cursor_update_count: u64) -> std::io::Result<Self> {
        let shared = buffer.shared.clone();
        let cursor_path = shared.dir.join("cursor");
        let (file_id, offset) = match std::fs::read_to_string(&cursor_path) {
            Ok(contents) => parse_cursor(contents.trim()).unwrap_or((0, 0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, 0),
            Err(e) => return Err(e),
        };

        Ok(QueueReader {
            shared,
            cursor_path,
            cursor_update_count: cursor_update_count.max(1),
            read_file_id: file_id,
            read_offset: offset,
            acked_file_id: file_id,
            acked_offset: offset,
            lowest_retained_file_id: file_id,
            updates_since_flush: 0,
        })
    }

    /// The position just past the record most recently returned by
    /// [`Self::next_record`] — embed this in a delivered pack so the
    /// eventual ack can call [`Self::update_cursor`] with it.
    pub fn queue_cursor(&self) -> String {
        format_cursor(self.read_file_id, self.read_offset)
    }

    /// Decode and return the next framed record's message bytes, or `None`
    /// if the reader has caught up to the writer (no complete record
    /// currently available).
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, QueueError> {
        loop {
            let path = self.shared.dir.join(file_name(self.read_file_id));
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            if (self.read_offset as usize) < bytes.len() {
                match frame::decode_frame(&bytes[self.read_offset as usize..])? {
                    Some(decoded) => {
                        let (start, len) = decoded.message_range;
                        let abs_start = self.read_offset as usize + start;
                        let record = bytes[abs_start..abs_start + len].to_vec();
                        self.read_offset += decoded.consumed as u64;
                        return Ok(Some(record));
                    }
                    None => return Ok(None),
                }
            }

            let next_path = self.shared.dir.join(file_name(self.read_file_id + 1));
            if next_path.exists() {
                self.read_file_id += 1;
                self.read_offset = 0;
                continue;
            }
            return Ok(None);
        }
    }

    /// Accept an ack for a previously returned [`Self::queue_cursor`]
    /// value. Idempotent and monotonic: a cursor older than the one
    /// already acked is ignored rather than rejected with an error, since
    /// acks can race. Every `cursor_update_count`-th accepted ack flushes
    /// the cursor to disk and unlinks any now-fully-acked files.
    pub fn update_cursor(&mut self, cursor: &str) -> Result<(), QueueError> {
        let (file_id, offset) = parse_cursor(cursor)?;
        if (file_id, offset) <= (self.acked_file_id, self.acked_offset) {
            trace!(cursor, "ignoring stale or duplicate cursor ack");
            return Ok(());
        }
        self.acked_file_id = file_id;
        self.acked_offset = offset;

        self.updates_since_flush += 1;
        if self.updates_since_flush >= self.cursor_update_count {
            self.flush()?;
        }
        Ok(())
    }

    /// Persist the acked cursor and unlink any files it has fully passed,
    /// regardless of `cursor_update_count`'s batching.
    pub fn flush(&mut self) -> Result<(), QueueError> {
        let tmp_path = self.shared.dir.join(".cursor.tmp");
        std::fs::write(&tmp_path, format_cursor(self.acked_file_id, self.acked_offset))?;
        std::fs::rename(&tmp_path, &self.cursor_path)?;
        self.updates_since_flush = 0;

        while self.lowest_retained_file_id < self.acked_file_id {
            let path = self.shared.dir.join(file_name(self.lowest_retained_file_id));
            if let Ok(metadata) = std::fs::metadata(&path) {
                let len = metadata.len();
                if std::fs::remove_file(&path).is_ok() {
                    self.shared.reclaim(len);
                    debug!(file_id = self.lowest_retained_file_id, "unlinked fully-acked queue file");
                }
            }
            self.lowest_retained_file_id += 1;
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }
}

impl crate::buffer::QueueBuffer {
    pub fn reader(&self, cursor_update_count: u64) -> std::io::Result<QueueReader> {
        QueueReader::new(self, cursor_update_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OverflowPolicy;
    use conduit_message::Message;

    fn framed(ty: &str) -> Vec<u8> {
        let msg = Message::new([0u8; 16], 0, ty).encode();
        frame::encode_frame(&msg, None)
    }

    #[tokio::test]
    async fn reads_records_in_order_and_returns_none_at_the_tip() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = QueueBuffer::open(dir.path(), 0, 0, OverflowPolicy::Drop).unwrap();
        buffer.append(&framed("a")).await.unwrap();
        buffer.append(&framed("b")).await.unwrap();

        let mut reader = buffer.reader(1).unwrap();
        let first = Message::decode(&reader.next_record().unwrap().unwrap()).unwrap();
        assert_eq!(first.r#type(), "a");
        let second = Message::decode(&reader.next_record().unwrap().unwrap()).unwrap();
        assert_eq!(second.r#type(), "b");
        assert!(reader.next_record().unwrap().is_none());
    }

    #[tokio::test]
    async fn update_cursor_is_idempotent_and_rejects_regressions() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = QueueBuffer::open(dir.path(), 0, 0, OverflowPolicy::Drop).unwrap();
        buffer.append(&framed("a")).await.unwrap();
        buffer.append(&framed("b")).await.unwrap();

        let mut reader = buffer.reader(1).unwrap();
        reader.next_record().unwrap();
        let cursor_after_a = reader.queue_cursor();
        reader.next_record().unwrap();
        let cursor_after_b = reader.queue_cursor();

        reader.update_cursor(&cursor_after_b).unwrap();
        reader.update_cursor(&cursor_after_a).unwrap(); // stale, ignored
        reader.flush().unwrap();

        let persisted = std::fs::read_to_string(dir.path().join("cursor")).unwrap();
        assert_eq!(persisted, cursor_after_b);
    }

    #[tokio::test]
    async fn crossing_a_file_boundary_unlinks_only_after_ack_passes_it() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = QueueBuffer::open(dir.path(), 1, 0, OverflowPolicy::Drop).unwrap();
        buffer.append(&framed("a")).await.unwrap(); // forces file 0 then rotate
        buffer.append(&framed("b")).await.unwrap();

        let mut reader = buffer.reader(1).unwrap();
        reader.next_record().unwrap();
        let cursor_after_a = reader.queue_cursor();
        reader.next_record().unwrap();

        assert!(dir.path().join("000000000000.log").exists());
        reader.update_cursor(&cursor_after_a).unwrap();
        assert!(!dir.path().join("000000000000.log").exists());
    }
}
