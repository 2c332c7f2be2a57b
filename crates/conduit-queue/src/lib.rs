mod buffer;
mod error;
mod reader;

pub use buffer::{OverflowPolicy, QueueBuffer};
pub use error::QueueError;
pub use reader::QueueReader;
