//! The protobuf message shapes behind the canonical encoding (§3, §4.A):
//! [`MessageProto`]/[`FieldProto`] for [`crate::Message`], and
//! [`FrameHeaderProto`] for the framed wire envelope's header.
//!
//! These are hand-written against `prost`'s derive macros rather than
//! generated from a `.proto` file by `prost-build`. There's exactly one
//! schema, it never needs to interoperate with a non-Rust client, and
//! `prost` itself documents deriving `Message`/`Oneof` directly on plain
//! structs as a supported mode — so there's no `build.rs`/`protoc` step
//! to carry for a schema this small.

/// Field numbers are part of the canonical form and are written to disk
/// queues across restarts and upgrades: never renumber, only add.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageProto {
    #[prost(bytes = "vec", tag = "1")]
    pub uuid: Vec<u8>,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(string, tag = "3")]
    pub r#type: String,
    #[prost(string, tag = "4")]
    pub logger: String,
    #[prost(int32, tag = "5")]
    pub severity: i32,
    #[prost(string, tag = "6")]
    pub payload: String,
    #[prost(string, tag = "7")]
    pub env_version: String,
    #[prost(int32, tag = "8")]
    pub pid: i32,
    #[prost(string, tag = "9")]
    pub hostname: String,
    #[prost(message, repeated, tag = "10")]
    pub fields: Vec<FieldProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    pub representation: Option<String>,
    #[prost(oneof = "FieldValueProto", tags = "3, 4, 5, 6, 7")]
    pub value: Option<FieldValueProto>,
}

/// A field is multi-valued, and every value in it shares one type — a
/// `oneof` of repeated-scalar messages models that directly.
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum FieldValueProto {
    #[prost(message, tag = "3")]
    Strings(StringList),
    #[prost(message, tag = "4")]
    Bytes(BytesList),
    #[prost(message, tag = "5")]
    Integers(IntegerList),
    #[prost(message, tag = "6")]
    Doubles(DoubleList),
    #[prost(message, tag = "7")]
    Bools(BoolList),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringList {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub values: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IntegerList {
    #[prost(int64, repeated, tag = "1")]
    pub values: Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DoubleList {
    #[prost(double, repeated, tag = "1")]
    pub values: Vec<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BoolList {
    #[prost(bool, repeated, tag = "1")]
    pub values: Vec<bool>,
}

/// The small protobuf header preceding every framed message (§4.A): a
/// message length, and an optional HMAC signature over the message bytes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FrameHeaderProto {
    #[prost(uint32, tag = "1")]
    pub message_length: u32,
    /// 0 = MD5, 1 = SHA1. Absent when the frame is unsigned.
    #[prost(int32, optional, tag = "2")]
    pub hmac_hash_function: Option<i32>,
    #[prost(string, optional, tag = "3")]
    pub hmac_signer: Option<String>,
    #[prost(uint32, tag = "4")]
    pub hmac_key_version: u32,
    #[prost(bytes = "vec", tag = "5")]
    pub hmac: Vec<u8>,
}
