//! The message model: the structured record that flows through the daemon,
//! its canonical protobuf encoding, and the signed wire frame used to
//! carry it between processes.
//!
//! # Canonical encoding
//! [`Message::encode`] / [`Message::decode`] implement the stable
//! protobuf form defined in [`proto`]. Field numbers there are fixed
//! across versions — never renumbered, only added to — since the same
//! bytes are written to disk queues across daemon restarts and upgrades.

mod field;
pub mod frame;
mod message;
mod pack;
mod proto;

pub use field::{Field, FieldValue};
pub use frame::{FrameError, FrameHeader, HashFunction, Keyring};
pub use message::{Message, MessageDecodeError};
pub use pack::{DeliveryError, Pack, PackPoolHandle};
