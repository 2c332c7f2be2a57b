use crate::field::{Field, FieldValue};
use crate::proto::MessageProto;
use prost::Message as _;
use thiserror::Error;

/// The immutable-after-decode structured record that flows through the
/// daemon (§3). Construct with [`Message::new`], mutate with the typed
/// setters while assembling a message in a decoder, then treat it as
/// read-only once handed to the router.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    uuid: [u8; 16],
    timestamp_ns: i64,
    r#type: String,
    logger: String,
    severity: i32,
    payload: String,
    env_version: String,
    pid: i32,
    hostname: String,
    fields: Vec<Field>,
}

#[derive(Debug, Error)]
pub enum MessageDecodeError {
    #[error("malformed message bytes: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("field value is missing its oneof payload")]
    MissingFieldValue,
}

impl Message {
    pub fn new(uuid: [u8; 16], timestamp_ns: i64, r#type: impl Into<String>) -> Self {
        Message {
            uuid,
            timestamp_ns,
            r#type: r#type.into(),
            logger: String::new(),
            severity: 6, // syslog INFO
            payload: String::new(),
            env_version: String::new(),
            pid: 0,
            hostname: String::new(),
            fields: Vec::new(),
        }
    }

    pub fn uuid(&self) -> &[u8; 16] {
        &self.uuid
    }
    pub fn set_uuid(&mut self, uuid: [u8; 16]) {
        self.uuid = uuid;
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }
    pub fn set_timestamp_ns(&mut self, ts: i64) {
        self.timestamp_ns = ts;
    }

    pub fn r#type(&self) -> &str {
        &self.r#type
    }
    pub fn set_type(&mut self, v: impl Into<String>) {
        self.r#type = v.into();
    }

    pub fn logger(&self) -> &str {
        &self.logger
    }
    pub fn set_logger(&mut self, v: impl Into<String>) {
        self.logger = v.into();
    }

    pub fn severity(&self) -> i32 {
        self.severity
    }
    pub fn set_severity(&mut self, v: i32) {
        self.severity = v;
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
    pub fn set_payload(&mut self, v: impl Into<String>) {
        self.payload = v.into();
    }

    pub fn env_version(&self) -> &str {
        &self.env_version
    }
    pub fn set_env_version(&mut self, v: impl Into<String>) {
        self.env_version = v.into();
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }
    pub fn set_pid(&mut self, v: i32) {
        self.pid = v;
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
    pub fn set_hostname(&mut self, v: impl Into<String>) {
        self.hostname = v.into();
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Returns the first field with a matching name, if any.
    pub fn find_first_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the value of the first field with a matching name.
    pub fn get_field_value(&self, name: &str) -> Option<&FieldValue> {
        self.find_first_field(name).map(|f| &f.value)
    }

    /// All fields (possibly more than one) sharing `name`.
    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> {
        self.fields.iter().filter(move |f| f.name == name)
    }

    /// Canonical encode: the protobuf form written to disk queues and the
    /// framed wire protocol (§3, §4.A). Field numbers in
    /// [`crate::proto::MessageProto`] never change across versions.
    pub fn encode(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Decode bytes previously produced by [`Message::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageDecodeError> {
        Message::from_proto(MessageProto::decode(bytes)?)
    }

    fn to_proto(&self) -> MessageProto {
        MessageProto {
            uuid: self.uuid.to_vec(),
            timestamp: self.timestamp_ns,
            r#type: self.r#type.clone(),
            logger: self.logger.clone(),
            severity: self.severity,
            payload: self.payload.clone(),
            env_version: self.env_version.clone(),
            pid: self.pid,
            hostname: self.hostname.clone(),
            fields: self.fields.iter().map(Field::to_proto).collect(),
        }
    }

    fn from_proto(p: MessageProto) -> Result<Self, MessageDecodeError> {
        let mut uuid = [0u8; 16];
        let n = p.uuid.len().min(16);
        uuid[..n].copy_from_slice(&p.uuid[..n]);

        let mut fields = Vec::with_capacity(p.fields.len());
        for f in p.fields {
            fields.push(Field::from_proto(f)?);
        }

        Ok(Message {
            uuid,
            timestamp_ns: p.timestamp,
            r#type: p.r#type,
            logger: p.logger,
            severity: p.severity,
            payload: p.payload,
            env_version: p.env_version,
            pid: p.pid,
            hostname: p.hostname,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut msg = Message::new([7u8; 16], 1_700_000_000_000_000_000, "nginx.access");
        msg.set_logger("nginx");
        msg.set_severity(3);
        msg.set_payload("GET / HTTP/1.1");
        msg.set_hostname("web-01");
        msg.set_pid(4242);
        msg.add_field(Field::new("status", FieldValue::integer(404)));
        msg.add_field(Field::new(
            "tag",
            FieldValue::Strings(vec!["a".into(), "b".into()]),
        ));

        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).expect("decode");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn multi_valued_field_preserves_all_entries() {
        let mut msg = Message::new([0u8; 16], 0, "t");
        msg.add_field(Field::new(
            "tag",
            FieldValue::Strings(vec!["a".into(), "b".into()]),
        ));
        let field = msg.find_first_field("tag").unwrap();
        match &field.value {
            FieldValue::Strings(vs) => assert_eq!(vs, &vec!["a".to_string(), "b".to_string()]),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_bytes() {
        let msg = Message::new([1u8; 16], 5, "t");
        let bytes = msg.encode();
        // Cut into the middle of the uuid field's length-prefixed 16-byte
        // payload so the declared length can't be satisfied by what's left.
        let truncated = &bytes[..bytes.len().min(6)];
        assert!(Message::decode(truncated).is_err());
    }
}
