use conduit_message::frame;
use regex::bytes::Regex as BytesRegex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("record exceeds the maximum buffer size")]
    Oversize,
    #[error("framed record failed to decode: {0}")]
    Frame(#[from] frame::FrameError),
    #[error("hmac verification failed for signer {signer}")]
    HmacMismatch { signer: String },
}

/// One delivered record, plus whatever the splitter learned about its
/// provenance (only [`FramingSplitter`] populates `signer`).
#[derive(Debug, Clone)]
pub struct RecordSlice {
    pub bytes: Vec<u8>,
    pub signer: Option<String>,
}

/// The result of one `find_record`/`at_eof` call: how many bytes of `buf`
/// were consumed, the record found (if any), and an error to count (if
/// the consumed bytes were a malformed record rather than a clean one).
#[derive(Debug, Default)]
pub struct FindResult {
    pub consumed: usize,
    pub record: Option<RecordSlice>,
    pub err: Option<SplitError>,
}

impl FindResult {
    fn none() -> Self {
        FindResult::default()
    }

    fn record(consumed: usize, bytes: Vec<u8>) -> Self {
        FindResult {
            consumed,
            record: Some(RecordSlice { bytes, signer: None }),
            err: None,
        }
    }
}

/// Locates record boundaries in a byte stream (§4.C).
///
/// `find_record` is called repeatedly by the driving loop with whatever
/// bytes are currently buffered; it must not block and must not assume it
/// sees a complete record on every call.
pub trait Splitter: Send {
    fn find_record(&mut self, buf: &[u8]) -> FindResult;

    /// Called once with the remaining bytes after the underlying stream
    /// reaches EOF. Most splitters have nothing left to deliver by then;
    /// override when a trailing partial record should still be emitted.
    fn at_eof(&mut self, _buf: &[u8]) -> FindResult {
        FindResult::none()
    }
}

/// Splits on a fixed single-byte delimiter (default `b'\n'`).
pub struct TokenSplitter {
    pub delimiter: u8,
    pub include_delimiter: bool,
}

impl Default for TokenSplitter {
    fn default() -> Self {
        TokenSplitter {
            delimiter: b'\n',
            include_delimiter: false,
        }
    }
}

impl Splitter for TokenSplitter {
    fn find_record(&mut self, buf: &[u8]) -> FindResult {
        match buf.iter().position(|&b| b == self.delimiter) {
            None => FindResult::none(),
            Some(pos) => {
                let record_end = if self.include_delimiter { pos + 1 } else { pos };
                FindResult::record(pos + 1, buf[..record_end].to_vec())
            }
        }
    }
}

/// Where the capture group of a [`RegexSplitter`]'s delimiter attaches:
/// to the end of the record just closed, or to the start of the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePosition {
    Start,
    End,
}

/// Splits on a regex delimiter, optionally re-attaching a single capture
/// group to one side of the boundary (§4.C).
pub struct RegexSplitter {
    pub regex: BytesRegex,
    pub capture_position: CapturePosition,
    /// Whether a trailing, delimiter-less remainder is delivered at EOF.
    pub incomplete_final: bool,
}

impl RegexSplitter {
    pub fn new(regex: BytesRegex, capture_position: CapturePosition) -> Self {
        RegexSplitter {
            regex,
            capture_position,
            incomplete_final: false,
        }
    }

    fn boundary(&self, buf: &[u8]) -> Option<usize> {
        let caps = self.regex.captures(buf)?;
        let anchor = caps.get(1).unwrap_or_else(|| caps.get(0).unwrap());
        Some(match self.capture_position {
            CapturePosition::End => anchor.end(),
            CapturePosition::Start => anchor.start(),
        })
    }
}

impl Splitter for RegexSplitter {
    fn find_record(&mut self, buf: &[u8]) -> FindResult {
        match self.boundary(buf) {
            None => FindResult::none(),
            Some(0) => {
                // A zero-width boundary at the very start would never make
                // progress; wait for more bytes instead of spinning.
                FindResult::none()
            }
            Some(boundary) => FindResult::record(boundary, buf[..boundary].to_vec()),
        }
    }

    fn at_eof(&mut self, buf: &[u8]) -> FindResult {
        if self.incomplete_final && !buf.is_empty() {
            FindResult::record(buf.len(), buf.to_vec())
        } else {
            FindResult::none()
        }
    }
}

/// Wraps [`conduit_message::frame`]'s envelope format: each record is one
/// decoded message body, with the envelope's signer surfaced separately so
/// the driver can copy it onto the delivered [`crate::Pack`].
#[derive(Default)]
pub struct FramingSplitter {
    keyring: Option<frame::Keyring>,
}

impl FramingSplitter {
    pub fn new() -> Self {
        FramingSplitter { keyring: None }
    }

    pub fn with_keyring(keyring: frame::Keyring) -> Self {
        FramingSplitter {
            keyring: Some(keyring),
        }
    }
}

impl Splitter for FramingSplitter {
    fn find_record(&mut self, buf: &[u8]) -> FindResult {
        if buf.is_empty() {
            return FindResult::none();
        }
        if buf[0] != frame::RECORD_SEPARATOR {
            // Not at a record boundary: resync past the garbage and count
            // it as an error (§4.A, §8 scenario S3).
            return match frame::find_next_record_separator(buf, 0) {
                Some(next) if next > 0 => FindResult {
                    consumed: next,
                    record: None,
                    err: Some(SplitError::Frame(frame::FrameError::MissingUnitSeparator)),
                },
                _ => FindResult::none(),
            };
        }

        match frame::decode_frame(buf) {
            Ok(None) => FindResult::none(),
            Ok(Some(decoded)) => {
                let (start, len) = decoded.message_range;
                let message_bytes = &buf[start..start + len];
                if let Some(keyring) = &self.keyring {
                    if frame::verify_hmac(&decoded.header, message_bytes, keyring).is_err() {
                        return FindResult {
                            consumed: decoded.consumed,
                            record: None,
                            err: Some(SplitError::HmacMismatch {
                                signer: decoded.header.hmac_signer.clone().unwrap_or_default(),
                            }),
                        };
                    }
                }
                FindResult {
                    consumed: decoded.consumed,
                    record: Some(RecordSlice {
                        bytes: message_bytes.to_vec(),
                        signer: decoded.header.hmac_signer.clone(),
                    }),
                    err: None,
                }
            }
            Err(e) => {
                // A corrupt header: skip past this separator and resync
                // at the next one rather than stalling the stream.
                let next = frame::find_next_record_separator(buf, 1).unwrap_or(buf.len());
                FindResult {
                    consumed: next.max(1),
                    record: None,
                    err: Some(SplitError::Frame(e)),
                }
            }
        }
    }
}

/// Delivers the entire buffered stream as a single record at EOF (used for
/// whole-body inputs that have no internal record structure).
#[derive(Default)]
pub struct NullSplitter;

impl Splitter for NullSplitter {
    fn find_record(&mut self, _buf: &[u8]) -> FindResult {
        FindResult::none()
    }

    fn at_eof(&mut self, buf: &[u8]) -> FindResult {
        if buf.is_empty() {
            FindResult::none()
        } else {
            FindResult::record(buf.len(), buf.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_splitter_excludes_delimiter_by_default() {
        let mut s = TokenSplitter::default();
        let r = s.find_record(b"hello\nworld");
        assert_eq!(r.consumed, 6);
        assert_eq!(r.record.unwrap().bytes, b"hello");
    }

    #[test]
    fn token_splitter_waits_for_delimiter() {
        let mut s = TokenSplitter::default();
        let r = s.find_record(b"partial");
        assert_eq!(r.consumed, 0);
        assert!(r.record.is_none());
    }

    #[test]
    fn token_splitter_can_include_delimiter() {
        let mut s = TokenSplitter {
            delimiter: b'\n',
            include_delimiter: true,
        };
        let r = s.find_record(b"hello\nworld");
        assert_eq!(r.record.unwrap().bytes, b"hello\n");
    }

    #[test]
    fn regex_splitter_end_capture_attaches_to_current_record() {
        let re = BytesRegex::new(r"(\r\n)").unwrap();
        let mut s = RegexSplitter::new(re, CapturePosition::End);
        let r = s.find_record(b"line-one\r\nline-two");
        assert_eq!(r.record.unwrap().bytes, b"line-one\r\n");
    }

    #[test]
    fn regex_splitter_start_capture_leaves_delimiter_for_next_record() {
        let re = BytesRegex::new(r"(?m)^(\d{4}-\d{2}-\d{2})").unwrap();
        let mut s = RegexSplitter::new(re, CapturePosition::Start);
        let buf = b"body one\n2024-01-02 body two";
        let r = s.find_record(buf);
        assert_eq!(r.record.unwrap().bytes, b"body one\n");
    }

    #[test]
    fn regex_splitter_incomplete_final_delivers_remainder_at_eof() {
        let re = BytesRegex::new(r"(\n)").unwrap();
        let mut s = RegexSplitter::new(re, CapturePosition::End);
        s.incomplete_final = true;
        let r = s.at_eof(b"trailing, no newline");
        assert_eq!(r.record.unwrap().bytes, b"trailing, no newline");
    }

    #[test]
    fn null_splitter_delivers_whole_buffer_only_at_eof() {
        let mut s = NullSplitter;
        assert!(s.find_record(b"anything").record.is_none());
        let r = s.at_eof(b"whole body");
        assert_eq!(r.record.unwrap().bytes, b"whole body");
    }

    #[test]
    fn framing_splitter_resyncs_past_garbage() {
        use conduit_message::Message;
        let msg = Message::new([1u8; 16], 1, "t").encode();
        let frame_bytes = frame::encode_frame(&msg, None);
        let mut stream = b"GARBAGE".to_vec();
        stream.extend_from_slice(&frame_bytes);

        let mut s = FramingSplitter::new();
        let skip = s.find_record(&stream);
        assert!(skip.record.is_none());
        assert!(skip.err.is_some());
        assert_eq!(skip.consumed, 7);

        let found = s.find_record(&stream[skip.consumed..]);
        assert_eq!(found.record.unwrap().bytes, msg);
    }

    #[test]
    fn framing_splitter_drops_on_hmac_mismatch() {
        use conduit_message::{HashFunction, Keyring, Message};
        let msg = Message::new([2u8; 16], 1, "t").encode();
        let frame_bytes = frame::encode_frame(&msg, Some(("signer", 1, b"key", HashFunction::Sha1)));
        let mut keyring = Keyring::new();
        keyring.insert("signer", 1, b"wrong".to_vec());

        let mut s = FramingSplitter::with_keyring(keyring);
        let r = s.find_record(&frame_bytes);
        assert!(r.record.is_none());
        assert!(matches!(r.err, Some(SplitError::HmacMismatch { .. })));
        assert_eq!(r.consumed, frame_bytes.len());
    }
}
