use crate::ast::{Attribute, CompareOp, Expr, Literal, Operand};
use conduit_message::{FieldValue, Message};
use std::cmp::Ordering;
use thiserror::Error;

/// The three-state result of evaluating a matcher against a message (§4.B).
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match,
    NoMatch,
    Error(EvalError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("message has no field named '{0}'")]
    MissingField(String),
    #[error("field '{name}' value type does not match the comparand")]
    FieldTypeMismatch { name: String },
}

/// Evaluate `expr` against `msg`. Missing fields or type mismatches on a
/// `Fields[name]` comparison are treated as no-match for the purposes of
/// short-circuiting `&&`/`||`, but the first error encountered on the path
/// actually taken is still surfaced as [`MatchOutcome::Error`] so callers
/// can count it (§4.B, §7).
pub fn evaluate(expr: &Expr, msg: &Message) -> MatchOutcome {
    let mut first_error = None;
    let result = eval_bool(expr, msg, &mut first_error);
    match (result, first_error) {
        (true, _) => MatchOutcome::Match,
        (false, Some(e)) => MatchOutcome::Error(e),
        (false, None) => MatchOutcome::NoMatch,
    }
}

fn eval_bool(expr: &Expr, msg: &Message, first_error: &mut Option<EvalError>) -> bool {
    match expr {
        Expr::True => true,
        Expr::False => false,
        Expr::Not(inner) => !eval_bool(inner, msg, first_error),
        Expr::And(l, r) => {
            eval_bool(l, msg, first_error) && eval_bool(r, msg, first_error)
        }
        Expr::Or(l, r) => eval_bool(l, msg, first_error) || eval_bool(r, msg, first_error),
        Expr::Compare { lhs, op, rhs } => match eval_compare(lhs, *op, rhs, msg) {
            Ok(b) => b,
            Err(e) => {
                if first_error.is_none() {
                    *first_error = Some(e);
                }
                false
            }
        },
        Expr::RegexMatch {
            lhs,
            negate,
            regex,
            ..
        } => match eval_regex(lhs, regex, msg) {
            Ok(b) => b ^ negate,
            Err(e) => {
                if first_error.is_none() {
                    *first_error = Some(e);
                }
                false
            }
        },
    }
}

fn eval_compare(
    lhs: &Operand,
    op: CompareOp,
    rhs: &Literal,
    msg: &Message,
) -> Result<bool, EvalError> {
    match lhs {
        Operand::Attribute(attr) => Ok(compare_attribute(*attr, op, rhs, msg)),
        Operand::Field(name) => {
            let value = msg
                .get_field_value(name)
                .ok_or_else(|| EvalError::MissingField(name.clone()))?;
            compare_field_any(value, op, rhs, name)
        }
    }
}

fn compare_attribute(attr: Attribute, op: CompareOp, rhs: &Literal, msg: &Message) -> bool {
    match attr {
        Attribute::Type => cmp_str(msg.r#type(), op, rhs),
        Attribute::Logger => cmp_str(msg.logger(), op, rhs),
        Attribute::Payload => cmp_str(msg.payload(), op, rhs),
        Attribute::Hostname => cmp_str(msg.hostname(), op, rhs),
        Attribute::EnvVersion => cmp_str(msg.env_version(), op, rhs),
        Attribute::Uuid => cmp_str(&uuid_string(msg), op, rhs),
        Attribute::Severity => cmp_num(msg.severity() as f64, op, rhs),
        Attribute::Timestamp => cmp_num(msg.timestamp_ns() as f64, op, rhs),
        Attribute::Pid => cmp_num(msg.pid() as f64, op, rhs),
    }
}

fn cmp_str(value: &str, op: CompareOp, rhs: &Literal) -> bool {
    let Literal::Str(s) = rhs else { return false };
    let ordering = value.cmp(s.as_str());
    apply_ordering(ordering, op)
}

fn cmp_num(value: f64, op: CompareOp, rhs: &Literal) -> bool {
    let rhs_num = match rhs {
        Literal::Int(i) => *i as f64,
        Literal::Float(f) => *f,
        _ => return false,
    };
    let Some(ordering) = value.partial_cmp(&rhs_num) else {
        return false;
    };
    apply_ordering(ordering, op)
}

fn apply_ordering(ordering: Ordering, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// `Fields[name] OP literal` matches if ANY of the field's multiple
/// values satisfies the comparison (§3, §4.B, scenario S2).
fn compare_field_any(
    value: &FieldValue,
    op: CompareOp,
    rhs: &Literal,
    name: &str,
) -> Result<bool, EvalError> {
    match value {
        FieldValue::Strings(vs) => {
            if let Literal::Str(_) = rhs {
                Ok(vs.iter().any(|v| cmp_str(v, op, rhs)))
            } else {
                Err(EvalError::FieldTypeMismatch {
                    name: name.to_owned(),
                })
            }
        }
        FieldValue::Integers(vs) => {
            if matches!(rhs, Literal::Int(_) | Literal::Float(_)) {
                Ok(vs.iter().any(|v| cmp_num(*v as f64, op, rhs)))
            } else {
                Err(EvalError::FieldTypeMismatch {
                    name: name.to_owned(),
                })
            }
        }
        FieldValue::Doubles(vs) => {
            if matches!(rhs, Literal::Int(_) | Literal::Float(_)) {
                Ok(vs.iter().any(|v| cmp_num(*v, op, rhs)))
            } else {
                Err(EvalError::FieldTypeMismatch {
                    name: name.to_owned(),
                })
            }
        }
        FieldValue::Bools(vs) => {
            if let Literal::Bool(b) = rhs {
                let matches_eq = vs.iter().any(|v| v == b);
                Ok(match op {
                    CompareOp::Eq => matches_eq,
                    CompareOp::Ne => vs.iter().any(|v| v != b),
                    _ => false,
                })
            } else {
                Err(EvalError::FieldTypeMismatch {
                    name: name.to_owned(),
                })
            }
        }
        FieldValue::Bytes(_) => Err(EvalError::FieldTypeMismatch {
            name: name.to_owned(),
        }),
    }
}

fn eval_regex(lhs: &Operand, regex: &regex::Regex, msg: &Message) -> Result<bool, EvalError> {
    match lhs {
        Operand::Attribute(attr) => Ok(regex.is_match(&attribute_as_string(attr, msg))),
        Operand::Field(name) => {
            let value = msg
                .get_field_value(name)
                .ok_or_else(|| EvalError::MissingField(name.clone()))?;
            match value {
                FieldValue::Strings(vs) => Ok(vs.iter().any(|v| regex.is_match(v))),
                _ => Err(EvalError::FieldTypeMismatch {
                    name: name.clone(),
                }),
            }
        }
    }
}

fn attribute_as_string(attr: &Attribute, msg: &Message) -> String {
    match attr {
        Attribute::Type => msg.r#type().to_owned(),
        Attribute::Logger => msg.logger().to_owned(),
        Attribute::Payload => msg.payload().to_owned(),
        Attribute::Hostname => msg.hostname().to_owned(),
        Attribute::EnvVersion => msg.env_version().to_owned(),
        Attribute::Uuid => uuid_string(msg),
        Attribute::Severity => msg.severity().to_string(),
        Attribute::Timestamp => msg.timestamp_ns().to_string(),
        Attribute::Pid => msg.pid().to_string(),
    }
}

fn uuid_string(msg: &Message) -> String {
    uuid::Uuid::from_bytes(*msg.uuid()).to_string()
}
