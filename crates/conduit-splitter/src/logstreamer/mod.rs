//! Resumable tailing of one or more rotated log files grouped into
//! logical streams (§4.C).

mod config;
mod discover;
mod journal;
mod stream;

pub use config::{LogStreamerConfig, PriorityField};
pub use discover::{group_by_stream, scan, DiscoveredFile, FileIdentity};
pub use journal::SeekJournal;
pub use stream::{LogStream, ResolvedTarget};
