use crate::splitter::{RecordSlice, SplitError, Splitter};
use bytes::{Buf, BytesMut};

/// What happens to a record that would exceed `max_record_size` without a
/// splitter ever finding its boundary (§4.C, the `io.ErrShortBuffer` case).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OversizePolicy {
    Drop,
    Truncate,
}

#[derive(Debug, Clone)]
pub struct StreamDriverConfig {
    pub initial_capacity: usize,
    pub max_record_size: usize,
    pub oversize_policy: OversizePolicy,
}

impl Default for StreamDriverConfig {
    fn default() -> Self {
        StreamDriverConfig {
            initial_capacity: 64 * 1024,
            max_record_size: 256 * 1024,
            oversize_policy: OversizePolicy::Drop,
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Record(RecordSlice),
    Error(SplitError),
    NeedMoreData,
}

/// Feeds raw bytes to a [`Splitter`] and pulls out complete records,
/// enforcing a maximum buffered record size (§4.C).
pub struct StreamDriver<S: Splitter> {
    splitter: S,
    buf: BytesMut,
    config: StreamDriverConfig,
    dropped_oversize: u64,
    truncated_oversize: u64,
}

impl<S: Splitter> StreamDriver<S> {
    pub fn new(splitter: S, config: StreamDriverConfig) -> Self {
        StreamDriver {
            buf: BytesMut::with_capacity(config.initial_capacity),
            splitter,
            config,
            dropped_oversize: 0,
            truncated_oversize: 0,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    pub fn dropped_oversize(&self) -> u64 {
        self.dropped_oversize
    }

    pub fn truncated_oversize(&self) -> u64 {
        self.truncated_oversize
    }

    /// Pull at most one outcome from the currently buffered bytes. Call in
    /// a loop after each `feed` until it returns [`PollOutcome::NeedMoreData`].
    pub fn poll(&mut self) -> PollOutcome {
        if self.buf.is_empty() {
            return PollOutcome::NeedMoreData;
        }

        let result = self.splitter.find_record(&self.buf);
        if result.consumed > 0 {
            self.buf.advance(result.consumed);
        }
        if let Some(record) = result.record {
            return PollOutcome::Record(record);
        }
        if let Some(err) = result.err {
            return PollOutcome::Error(err);
        }
        if self.buf.len() > self.config.max_record_size {
            return self.handle_oversize();
        }
        PollOutcome::NeedMoreData
    }

    fn handle_oversize(&mut self) -> PollOutcome {
        match self.config.oversize_policy {
            OversizePolicy::Drop => {
                self.buf.clear();
                self.dropped_oversize += 1;
                PollOutcome::Error(SplitError::Oversize)
            }
            OversizePolicy::Truncate => {
                let bytes = self.buf.split_to(self.config.max_record_size).to_vec();
                self.truncated_oversize += 1;
                PollOutcome::Record(RecordSlice { bytes, signer: None })
            }
        }
    }

    /// Deliver whatever trailing record the splitter recognizes once the
    /// underlying stream has reached EOF (e.g. [`crate::NullSplitter`]'s
    /// whole-body record, or a [`crate::RegexSplitter`] configured with
    /// `incomplete_final`).
    pub fn finalize(&mut self) -> Option<RecordSlice> {
        if self.buf.is_empty() {
            return None;
        }
        let result = self.splitter.at_eof(&self.buf);
        if result.consumed > 0 {
            self.buf.advance(result.consumed);
        }
        result.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::TokenSplitter;

    fn driver_with_limit(max_record_size: usize, policy: OversizePolicy) -> StreamDriver<TokenSplitter> {
        StreamDriver::new(
            TokenSplitter::default(),
            StreamDriverConfig {
                initial_capacity: 16,
                max_record_size,
                oversize_policy: policy,
            },
        )
    }

    #[test]
    fn delivers_record_exactly_at_max_record_size() {
        let mut driver = driver_with_limit(5, OversizePolicy::Drop);
        driver.feed(b"abcde\n");
        match driver.poll() {
            PollOutcome::Record(r) => assert_eq!(r.bytes, b"abcde"),
            other => panic!("expected a record, got {other:?}"),
        }
        assert_eq!(driver.dropped_oversize(), 0);
    }

    #[test]
    fn drops_record_exceeding_max_record_size_by_one() {
        let mut driver = driver_with_limit(5, OversizePolicy::Drop);
        driver.feed(b"abcdef"); // 6 bytes, no delimiter yet
        match driver.poll() {
            PollOutcome::Error(SplitError::Oversize) => {}
            other => panic!("expected Oversize error, got {other:?}"),
        }
        assert_eq!(driver.dropped_oversize(), 1);
        assert_eq!(driver.buffered_len(), 0);
    }

    #[test]
    fn truncates_record_exceeding_max_record_size() {
        let mut driver = driver_with_limit(5, OversizePolicy::Truncate);
        driver.feed(b"abcdefgh");
        match driver.poll() {
            PollOutcome::Record(r) => assert_eq!(r.bytes, b"abcde"),
            other => panic!("expected a truncated record, got {other:?}"),
        }
        assert_eq!(driver.truncated_oversize(), 1);
        assert_eq!(driver.buffered_len(), 3);
    }

    #[test]
    fn partial_record_waits_for_more_data() {
        let mut driver = driver_with_limit(64, OversizePolicy::Drop);
        driver.feed(b"no delimiter yet");
        assert!(matches!(driver.poll(), PollOutcome::NeedMoreData));
    }

    #[test]
    fn finalize_delivers_nothing_for_token_splitter_without_override() {
        let mut driver = driver_with_limit(64, OversizePolicy::Drop);
        driver.feed(b"trailing");
        assert!(driver.finalize().is_none());
    }
}
