use crate::message::MessageDecodeError;
use crate::proto::{self, BoolList, BytesList, DoubleList, FieldValueProto, IntegerList, StringList};

/// A dynamic, multi-valued field attached to a [`crate::Message`].
///
/// Multiple fields may share the same `name`; each individual field is
/// itself multi-valued (`FieldValue` wraps a `Vec`).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub representation: Option<String>,
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Field {
            name: name.into(),
            representation: None,
            value,
        }
    }

    pub fn with_representation(mut self, representation: impl Into<String>) -> Self {
        self.representation = Some(representation.into());
        self
    }

    pub(crate) fn to_proto(&self) -> proto::FieldProto {
        proto::FieldProto {
            name: self.name.clone(),
            representation: self.representation.clone(),
            value: Some(self.value.to_proto()),
        }
    }

    pub(crate) fn from_proto(p: proto::FieldProto) -> Result<Self, MessageDecodeError> {
        let value = FieldValue::from_proto(p.value.ok_or(MessageDecodeError::MissingFieldValue)?);
        Ok(Field {
            name: p.name,
            representation: p.representation,
            value,
        })
    }
}

/// The value carried by a [`Field`]. Every variant is a `Vec` because a
/// single named field may carry more than one value (§3, §4.B scenario S2).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Strings(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    Integers(Vec<i64>),
    Doubles(Vec<f64>),
    Bools(Vec<bool>),
}

impl FieldValue {
    pub fn string(v: impl Into<String>) -> Self {
        FieldValue::Strings(vec![v.into()])
    }

    pub fn integer(v: i64) -> Self {
        FieldValue::Integers(vec![v])
    }

    pub fn double(v: f64) -> Self {
        FieldValue::Doubles(vec![v])
    }

    pub fn boolean(v: bool) -> Self {
        FieldValue::Bools(vec![v])
    }

    /// Returns true if any of the multi-valued entries matches `f`
    /// (§4.B: "the field matches if ANY of the multi-valued entries
    /// satisfies the comparison").
    pub fn any<T>(values: &[T], mut f: impl FnMut(&T) -> bool) -> bool {
        values.iter().any(|v| f(v))
    }

    fn to_proto(&self) -> FieldValueProto {
        match self {
            FieldValue::Strings(vs) => FieldValueProto::Strings(StringList { values: vs.clone() }),
            FieldValue::Bytes(vs) => FieldValueProto::Bytes(BytesList { values: vs.clone() }),
            FieldValue::Integers(vs) => FieldValueProto::Integers(IntegerList { values: vs.clone() }),
            FieldValue::Doubles(vs) => FieldValueProto::Doubles(DoubleList { values: vs.clone() }),
            FieldValue::Bools(vs) => FieldValueProto::Bools(BoolList { values: vs.clone() }),
        }
    }

    fn from_proto(p: FieldValueProto) -> Self {
        match p {
            FieldValueProto::Strings(l) => FieldValue::Strings(l.values),
            FieldValueProto::Bytes(l) => FieldValue::Bytes(l.values),
            FieldValueProto::Integers(l) => FieldValue::Integers(l.values),
            FieldValueProto::Doubles(l) => FieldValue::Doubles(l.values),
            FieldValueProto::Bools(l) => FieldValue::Bools(l.values),
        }
    }
}
