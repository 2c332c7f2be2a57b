use crate::ast::{Attribute, CompareOp, Expr, Literal, Operand};
use crate::lexer::Token;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected token {0:?}, expected {1}")]
    Unexpected(Token, &'static str),
    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEof(&'static str),
    #[error("unknown attribute or field reference '{0}'")]
    UnknownOperand(String),
    #[error("regex match (=~/!~) requires a /regex/ literal on the right-hand side")]
    RegexRhsMustBeLiteral,
    #[error("invalid regex pattern '{0}': {1}")]
    InvalidRegex(String, regex::Error),
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_or()?;
        self.expect_eof()?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(ParseError::Unexpected(other.clone(), "end of expression")),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while matches!(self.peek(), Token::And) {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                match self.advance() {
                    Token::RParen => Ok(inner),
                    other => Err(ParseError::Unexpected(other, "')'")),
                }
            }
            Token::Ident(name) if name == "TRUE" => {
                self.advance();
                Ok(Expr::True)
            }
            Token::Ident(name) if name == "FALSE" => {
                self.advance();
                Ok(Expr::False)
            }
            Token::Ident(_) => self.parse_comparison(),
            other => Err(ParseError::Unexpected(other, "an expression")),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        match self.advance() {
            Token::Ident(name) if name == "Fields" => {
                match self.advance() {
                    Token::LBracket => {}
                    other => return Err(ParseError::Unexpected(other, "'['")),
                }
                let field_name = match self.advance() {
                    Token::Str(s) => s,
                    Token::Ident(s) => s,
                    other => return Err(ParseError::Unexpected(other, "field name")),
                };
                match self.advance() {
                    Token::RBracket => {}
                    other => return Err(ParseError::Unexpected(other, "']'")),
                }
                Ok(Operand::Field(field_name))
            }
            Token::Ident(name) => Attribute::from_ident(&name)
                .map(Operand::Attribute)
                .ok_or(ParseError::UnknownOperand(name)),
            other => Err(ParseError::Unexpected(other, "an attribute or Fields[...]")),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_operand()?;
        match self.advance() {
            Token::Eq => self.parse_literal_rhs(lhs, CompareOp::Eq),
            Token::Ne => self.parse_literal_rhs(lhs, CompareOp::Ne),
            Token::Lt => self.parse_literal_rhs(lhs, CompareOp::Lt),
            Token::Le => self.parse_literal_rhs(lhs, CompareOp::Le),
            Token::Gt => self.parse_literal_rhs(lhs, CompareOp::Gt),
            Token::Ge => self.parse_literal_rhs(lhs, CompareOp::Ge),
            Token::RegexEq => self.parse_regex_rhs(lhs, false),
            Token::RegexNe => self.parse_regex_rhs(lhs, true),
            other => Err(ParseError::Unexpected(
                other,
                "a comparison or regex-match operator",
            )),
        }
    }

    fn parse_literal_rhs(&mut self, lhs: Operand, op: CompareOp) -> Result<Expr, ParseError> {
        let literal = match self.advance() {
            Token::Str(s) => Literal::Str(s),
            Token::Int(i) => Literal::Int(i),
            Token::Float(f) => Literal::Float(f),
            Token::Ident(name) if name == "TRUE" => Literal::Bool(true),
            Token::Ident(name) if name == "FALSE" => Literal::Bool(false),
            other => return Err(ParseError::Unexpected(other, "a literal")),
        };
        Ok(Expr::Compare {
            lhs,
            op,
            rhs: literal,
        })
    }

    fn parse_regex_rhs(&mut self, lhs: Operand, negate: bool) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::Regex(pattern) => {
                let regex =
                    Regex::new(&pattern).map_err(|e| ParseError::InvalidRegex(pattern.clone(), e))?;
                Ok(Expr::RegexMatch {
                    lhs,
                    negate,
                    regex: Box::new(regex),
                    pattern,
                })
            }
            _ => Err(ParseError::RegexRhsMustBeLiteral),
        }
    }
}
