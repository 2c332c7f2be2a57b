mod ast;
mod compile;
mod eval;
mod lexer;
mod parser;

use conduit_message::{Field, FieldValue, Message};
use thiserror::Error;

pub use ast::{Attribute, CompareOp, Expr, Literal, Operand};
pub use compile::TypeError;
pub use eval::{EvalError, MatchOutcome};
pub use lexer::LexError;
pub use parser::ParseError;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// A compiled matcher predicate (§3, §4.B). Immutable once built;
/// `evaluate` is `&self` so one `Matcher` can be shared across runners.
#[derive(Debug, Clone)]
pub struct Matcher {
    source: String,
    expr: Expr,
}

impl Matcher {
    /// Lex, parse, and type-check `src`, producing a reusable matcher.
    pub fn compile(src: &str) -> Result<Self, CompileError> {
        let tokens = lexer::lex(src)?;
        let expr = parser::Parser::new(&tokens).parse()?;
        compile::type_check(&expr)?;
        Ok(Matcher {
            source: src.to_owned(),
            expr,
        })
    }

    /// The original expression text, useful for logging which matcher
    /// rejected or accepted a message.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, msg: &Message) -> MatchOutcome {
        eval::evaluate(&self.expr, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_with(ty: &str, fields: Vec<Field>) -> Message {
        let mut msg = Message::new([0u8; 16], 0, ty);
        for f in fields {
            msg.add_field(f);
        }
        msg
    }

    /// Scenario S1 (spec §8): `Type == 'nginx.access' && Fields[status] >= 400`.
    #[test]
    fn scenario_s1_type_and_numeric_field_threshold() {
        let matcher =
            Matcher::compile("Type == 'nginx.access' && Fields[status] >= 400").unwrap();

        let hit = msg_with(
            "nginx.access",
            vec![Field::new("status", FieldValue::integer(404))],
        );
        assert_eq!(matcher.evaluate(&hit), MatchOutcome::Match);

        let miss_status = msg_with(
            "nginx.access",
            vec![Field::new("status", FieldValue::integer(200))],
        );
        assert_eq!(matcher.evaluate(&miss_status), MatchOutcome::NoMatch);

        let miss_type = msg_with(
            "nginx.error",
            vec![Field::new("status", FieldValue::integer(500))],
        );
        assert_eq!(matcher.evaluate(&miss_type), MatchOutcome::NoMatch);
    }

    /// Scenario S2 (spec §8): `Fields[tag] == 'b'` matches a multi-valued
    /// field `["a", "b"]` under ANY semantics.
    #[test]
    fn scenario_s2_multi_valued_field_any_semantics() {
        let matcher = Matcher::compile("Fields[tag] == 'b'").unwrap();
        let msg = msg_with(
            "t",
            vec![Field::new(
                "tag",
                FieldValue::Strings(vec!["a".into(), "b".into()]),
            )],
        );
        assert_eq!(matcher.evaluate(&msg), MatchOutcome::Match);

        let miss = msg_with(
            "t",
            vec![Field::new(
                "tag",
                FieldValue::Strings(vec!["a".into(), "c".into()]),
            )],
        );
        assert_eq!(matcher.evaluate(&miss), MatchOutcome::NoMatch);
    }

    #[test]
    fn missing_field_yields_error_not_panic() {
        let matcher = Matcher::compile("Fields[missing] == 'x'").unwrap();
        let msg = msg_with("t", vec![]);
        match matcher.evaluate(&msg) {
            MatchOutcome::Error(EvalError::MissingField(name)) => assert_eq!(name, "missing"),
            other => panic!("expected Error(MissingField), got {other:?}"),
        }
    }

    #[test]
    fn and_short_circuits_before_reaching_missing_field() {
        // Left side is false, so the right side (which would error) is
        // never evaluated and the result is a clean no-match.
        let matcher = Matcher::compile("FALSE && Fields[missing] == 'x'").unwrap();
        let msg = msg_with("t", vec![]);
        assert_eq!(matcher.evaluate(&msg), MatchOutcome::NoMatch);
    }

    #[test]
    fn or_short_circuits_once_left_matches() {
        let matcher = Matcher::compile("TRUE || Fields[missing] == 'x'").unwrap();
        let msg = msg_with("t", vec![]);
        assert_eq!(matcher.evaluate(&msg), MatchOutcome::Match);
    }

    #[test]
    fn regex_match_against_payload() {
        let matcher = Matcher::compile("Payload =~ /^GET /").unwrap();
        let mut msg = msg_with("t", vec![]);
        msg.set_payload("GET / HTTP/1.1");
        assert_eq!(matcher.evaluate(&msg), MatchOutcome::Match);

        let mut miss = msg_with("t", vec![]);
        miss.set_payload("POST /");
        assert_eq!(matcher.evaluate(&miss), MatchOutcome::NoMatch);
    }

    #[test]
    fn negated_regex_match() {
        let matcher = Matcher::compile("Payload !~ /^GET /").unwrap();
        let mut msg = msg_with("t", vec![]);
        msg.set_payload("POST /");
        assert_eq!(matcher.evaluate(&msg), MatchOutcome::Match);
    }

    #[test]
    fn compile_time_type_mismatch_is_rejected() {
        let err = Matcher::compile("Severity == 'bad'").unwrap_err();
        assert!(matches!(err, CompileError::Type(TypeError::ExpectedNumeric { .. })));

        let err = Matcher::compile("Type == 7").unwrap_err();
        assert!(matches!(err, CompileError::Type(TypeError::ExpectedString { .. })));
    }

    #[test]
    fn dynamic_field_type_mismatch_is_runtime_only() {
        // Fields[] can't be type-checked at compile time; it only
        // surfaces a mismatch once evaluated against a real message.
        let matcher = Matcher::compile("Fields[status] == 'x'").unwrap();
        let msg = msg_with(
            "t",
            vec![Field::new("status", FieldValue::integer(200))],
        );
        match matcher.evaluate(&msg) {
            MatchOutcome::Error(EvalError::FieldTypeMismatch { name }) => {
                assert_eq!(name, "status")
            }
            other => panic!("expected Error(FieldTypeMismatch), got {other:?}"),
        }
    }

    #[test]
    fn not_and_parens_compose() {
        let matcher = Matcher::compile("!(Type == 'a' || Type == 'b')").unwrap();
        assert_eq!(matcher.evaluate(&msg_with("a", vec![])), MatchOutcome::NoMatch);
        assert_eq!(matcher.evaluate(&msg_with("c", vec![])), MatchOutcome::Match);
    }
}
