use conduit_message::{Field, FieldValue, Message};

/// Build a minimal message of the given type with a fixed, non-random UUID
/// derived from `seed` so fixtures are reproducible across runs.
pub fn sample_message(seed: u8, r#type: &str) -> Message {
    Message::new([seed; 16], 1_700_000_000_000_000_000 + seed as i64, r#type)
}

/// [`sample_message`] with a payload and one string field attached, the
/// shape most matcher and splitter tests reach for.
pub fn sample_message_with_field(seed: u8, r#type: &str, field_name: &str, field_value: &str) -> Message {
    let mut msg = sample_message(seed, r#type);
    msg.set_payload(field_value);
    msg.add_field(Field::new(field_name, FieldValue::string(field_value)));
    msg
}
