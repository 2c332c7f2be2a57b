use conduit_message::frame::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("i/o error in queue buffer: {0}")]
    Io(#[from] std::io::Error),
    #[error("buffered record failed to decode: {0}")]
    Frame(#[from] FrameError),
    #[error("queue buffer is full and overflow policy is shutdown")]
    ShutdownOnOverflow,
    #[error("malformed cursor string '{0}'")]
    MalformedCursor(String),
}
