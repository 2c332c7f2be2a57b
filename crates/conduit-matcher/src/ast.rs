use regex::Regex;

/// A message attribute name reserved by the grammar (§3, §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Type,
    Logger,
    Severity,
    Timestamp,
    Payload,
    Hostname,
    Pid,
    EnvVersion,
    Uuid,
}

impl Attribute {
    pub fn from_ident(s: &str) -> Option<Self> {
        Some(match s {
            "Type" => Attribute::Type,
            "Logger" => Attribute::Logger,
            "Severity" => Attribute::Severity,
            "Timestamp" => Attribute::Timestamp,
            "Payload" => Attribute::Payload,
            "Hostname" => Attribute::Hostname,
            "Pid" => Attribute::Pid,
            "EnvVersion" => Attribute::EnvVersion,
            "Uuid" => Attribute::Uuid,
            _ => return None,
        })
    }

    /// Whether the attribute compares as a string (lexical) or a number.
    pub fn is_numeric(self) -> bool {
        matches!(self, Attribute::Severity | Attribute::Timestamp | Attribute::Pid)
    }
}

/// The left-hand side of a comparison: a well-known attribute or a
/// dynamic `Fields[name]` lookup.
#[derive(Debug, Clone)]
pub enum Operand {
    Attribute(Attribute),
    Field(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// The compiled predicate tree (§4.B).
#[derive(Debug, Clone)]
pub enum Expr {
    True,
    False,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        lhs: Operand,
        op: CompareOp,
        rhs: Literal,
    },
    RegexMatch {
        lhs: Operand,
        negate: bool,
        regex: Box<Regex>,
        pattern: String,
    },
}
