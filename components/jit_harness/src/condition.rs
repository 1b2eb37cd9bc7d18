//! `skip-if` expressions.
//!
//! Conditions are parsed once when a test is loaded and evaluated once
//! against the [`CapabilityEnvironment`] before scheduling. Evaluation never
//! mutates anything; the same expression against the same environment
//! always produces the same answer.

use crate::capability::{CapabilityEnvironment, CapabilityError};
use core_types::Value;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing or evaluating a condition
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    /// Character that starts no token
    #[error("unexpected character `{ch}` at column {column}")]
    UnexpectedChar { ch: char, column: usize },

    /// String literal without closing quote
    #[error("unterminated string starting at column {column}")]
    UnterminatedString { column: usize },

    /// Token in a position the grammar does not allow
    #[error("expected {expected} at column {column}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        column: usize,
    },

    /// Nothing to evaluate
    #[error("empty expression")]
    Empty,

    /// Identifier or function the environment does not provide
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),

    /// A predicate used without calling it
    #[error("capability `{0}` is a predicate and must be called")]
    NotAValue(String),

    /// A plain value used as a function
    #[error("capability `{0}` is not callable")]
    NotCallable(String),

    /// The capability itself rejected the call
    #[error("capability `{name}` failed: {source}")]
    Capability {
        name: String,
        #[source]
        source: CapabilityError,
    },

    /// `x in y` where `y` has no keys
    #[error("right-hand side of `in` is not a container (found {0})")]
    NotAContainer(&'static str),
}

impl ConditionError {
    /// Whether the error means the environment lacks a named capability.
    pub fn is_unknown_capability(&self) -> bool {
        matches!(self, ConditionError::UnknownCapability(_))
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==` or `===`
    Eq,
    /// `!=` or `!==`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn apply(self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => lhs.strict_equals(rhs),
            CompareOp::Ne => !lhs.strict_equals(rhs),
            CompareOp::Lt => lhs.compare(rhs) == Some(Less),
            CompareOp::Gt => lhs.compare(rhs) == Some(Greater),
            CompareOp::Le => matches!(lhs.compare(rhs), Some(Less | Equal)),
            CompareOp::Ge => matches!(lhs.compare(rhs), Some(Greater | Equal)),
        }
    }
}

/// Parsed condition syntax tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number, string, boolean or `undefined`
    Literal(Value),
    /// The runtime's global object
    This,
    /// Zero-arity capability lookup
    Ident(String),
    /// Capability predicate call with literal arguments
    Call { name: String, args: Vec<Value> },
    /// Logical negation
    Not(Box<Expr>),
    /// Short-circuit conjunction
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction
    Or(Box<Expr>, Box<Expr>),
    /// Binary comparison
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Membership test, `key in container`
    In { key: Box<Expr>, container: Box<Expr> },
}

/// A parsed `skip-if` expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parse a condition.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let source = source.trim();
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expression()?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// The expression text, trimmed
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The syntax tree
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate to a boolean against `env`.
    pub fn evaluate(&self, env: &CapabilityEnvironment) -> Result<bool, ConditionError> {
        Ok(eval(&self.expr, env)?.is_truthy())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(expr: &Expr, env: &CapabilityEnvironment) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::This => Ok(env.globals().clone()),
        Expr::Ident(name) => env.value(name),
        Expr::Call { name, args } => env.call(name, args),
        Expr::Not(inner) => Ok(Value::Boolean(!eval(inner, env)?.is_truthy())),
        Expr::And(lhs, rhs) => {
            if !eval(lhs, env)?.is_truthy() {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(eval(rhs, env)?.is_truthy()))
        }
        Expr::Or(lhs, rhs) => {
            if eval(lhs, env)?.is_truthy() {
                return Ok(Value::Boolean(true));
            }
            Ok(Value::Boolean(eval(rhs, env)?.is_truthy()))
        }
        Expr::Compare { op, lhs, rhs } => {
            let lhs = eval(lhs, env)?;
            let rhs = eval(rhs, env)?;
            Ok(Value::Boolean(op.apply(&lhs, &rhs)))
        }
        Expr::In { key, container } => {
            let key = eval(key, env)?.to_string();
            let container = eval(container, env)?;
            container
                .has_key(&key)
                .map(Value::Boolean)
                .ok_or(ConditionError::NotAContainer(container.type_of()))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Bang,
    AndAnd,
    OrOr,
    Op(CompareOp),
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string {:?}", s),
            Token::Ident(name) => write!(f, "`{}`", name),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::Comma => f.write_str("`,`"),
            Token::Bang => f.write_str("`!`"),
            Token::AndAnd => f.write_str("`&&`"),
            Token::OrOr => f.write_str("`||`"),
            Token::Op(op) => write!(f, "operator {:?}", op),
            Token::End => f.write_str("end of expression"),
        }
    }
}

/// Token plus its 1-based column
type Spanned = (Token, usize);

fn tokenize(source: &str) -> Result<Vec<Spanned>, ConditionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i + 1;
        let next = chars.get(i + 1).copied();

        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' | ')' | ',' => {
                tokens.push((
                    match c {
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        _ => Token::Comma,
                    },
                    column,
                ));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((Token::AndAnd, column));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((Token::OrOr, column));
                i += 2;
            }
            '=' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                tokens.push((Token::Op(CompareOp::Eq), column));
            }
            '!' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                tokens.push((Token::Op(CompareOp::Ne), column));
            }
            '!' => {
                tokens.push((Token::Bang, column));
                i += 1;
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                let op = match (c, or_equal) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    (_, false) => CompareOp::Gt,
                    (_, true) => CompareOp::Ge,
                };
                tokens.push((Token::Op(op), column));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j).copied() {
                        None => return Err(ConditionError::UnterminatedString { column }),
                        Some(ch) if ch == quote => break,
                        Some('\\') => {
                            let escaped = chars
                                .get(j + 1)
                                .copied()
                                .ok_or(ConditionError::UnterminatedString { column })?;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            j += 2;
                        }
                        Some(ch) => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push((Token::Str(text), column));
                i = j + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::UnexpectedChar { ch: c, column })?;
                tokens.push((Token::Number(number), column));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push((Token::Ident(word), column));
            }
            ch => return Err(ConditionError::UnexpectedChar { ch, column }),
        }
    }

    tokens.push((Token::End, chars.len() + 1));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn column(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &'static str) -> ConditionError {
        ConditionError::UnexpectedToken {
            expected,
            found: self.peek().to_string(),
            column: self.column(),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ConditionError> {
        if *self.peek() == Token::End {
            return Err(ConditionError::Empty);
        }
        let expr = self.parse_or()?;
        if *self.peek() != Token::End {
            return Err(self.unexpected("end of expression"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_not()?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if *self.peek() == Token::Bang {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_relational()
    }

    fn parse_relational(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_primary()?;
        match self.peek().clone() {
            Token::Op(op) => {
                self.advance();
                let rhs = self.parse_primary()?;
                Ok(Expr::Compare {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            Token::Ident(word) if word == "in" => {
                self.advance();
                let container = self.parse_primary()?;
                Ok(Expr::In {
                    key: Box::new(lhs),
                    container: Box::new(container),
                })
            }
            _ => Ok(lhs),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.peek().clone() {
            Token::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                if *self.peek() != Token::RParen {
                    return Err(self.unexpected("`)`"));
                }
                self.advance();
                Ok(inner)
            }
            Token::Ident(name) => {
                if let Some(literal) = keyword_literal(&name) {
                    self.advance();
                    return Ok(Expr::Literal(literal));
                }
                if name == "this" {
                    self.advance();
                    return Ok(Expr::This);
                }
                if name == "in" {
                    return Err(self.unexpected("an operand"));
                }
                self.advance();
                if *self.peek() == Token::LParen {
                    self.advance();
                    let args = self.parse_arguments()?;
                    return Ok(Expr::Call { name, args });
                }
                Ok(Expr::Ident(name))
            }
            Token::Number(_) | Token::Str(_) => Ok(Expr::Literal(self.parse_literal()?)),
            _ => Err(self.unexpected("an operand")),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Value>, ConditionError> {
        let mut args = Vec::new();
        if *self.peek() == Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_literal()?);
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                Token::RParen => {
                    self.advance();
                    return Ok(args);
                }
                _ => return Err(self.unexpected("`,` or `)`")),
            }
        }
    }

    fn parse_literal(&mut self) -> Result<Value, ConditionError> {
        let value = match self.peek() {
            Token::Number(n) => Value::Number(*n),
            Token::Str(s) => Value::String(s.clone()),
            Token::Ident(name) => match keyword_literal(name) {
                Some(value) => value,
                None => return Err(self.unexpected("a literal argument")),
            },
            _ => return Err(self.unexpected("a literal argument")),
        };
        self.advance();
        Ok(value)
    }
}

fn keyword_literal(word: &str) -> Option<Value> {
    match word {
        "true" => Some(Value::Boolean(true)),
        "false" => Some(Value::Boolean(false)),
        "undefined" => Some(Value::Undefined),
        _ => None,
    }
}
