use crate::ast::{Expr, Literal, Operand};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TypeError {
    #[error("attribute '{attribute}' is string-typed but was compared against a numeric literal")]
    ExpectedString { attribute: &'static str },
    #[error("attribute '{attribute}' is numeric but was compared against a string literal")]
    ExpectedNumeric { attribute: &'static str },
}

fn attribute_name(a: crate::ast::Attribute) -> &'static str {
    use crate::ast::Attribute::*;
    match a {
        Type => "Type",
        Logger => "Logger",
        Severity => "Severity",
        Timestamp => "Timestamp",
        Payload => "Payload",
        Hostname => "Hostname",
        Pid => "Pid",
        EnvVersion => "EnvVersion",
        Uuid => "Uuid",
    }
}

/// Type-checks comparisons at compile time (§4.B): a string attribute
/// compared against a numeric literal (or vice versa) is a compile error.
/// `Fields[name]` comparisons are not checked here — their type is only
/// known at evaluation time, per message.
pub fn type_check(expr: &Expr) -> Result<(), TypeError> {
    match expr {
        Expr::True | Expr::False => Ok(()),
        Expr::Not(inner) => type_check(inner),
        Expr::And(l, r) | Expr::Or(l, r) => {
            type_check(l)?;
            type_check(r)
        }
        Expr::RegexMatch { .. } => Ok(()),
        Expr::Compare { lhs, rhs, .. } => {
            if let Operand::Attribute(attr) = lhs {
                let is_numeric_literal = matches!(rhs, Literal::Int(_) | Literal::Float(_));
                let is_string_literal = matches!(rhs, Literal::Str(_));
                if attr.is_numeric() && is_string_literal {
                    return Err(TypeError::ExpectedNumeric {
                        attribute: attribute_name(*attr),
                    });
                }
                if !attr.is_numeric() && is_numeric_literal {
                    return Err(TypeError::ExpectedString {
                        attribute: attribute_name(*attr),
                    });
                }
            }
            Ok(())
        }
    }
}
