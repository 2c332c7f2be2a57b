mod driver;
pub mod logstreamer;
mod splitter;

pub use driver::{OversizePolicy, PollOutcome, StreamDriver, StreamDriverConfig};
pub use splitter::{
    CapturePosition, FramingSplitter, NullSplitter, RecordSlice, RegexSplitter, SplitError,
    Splitter, TokenSplitter,
};
