//! Sandboxed evaluation of backend-authored condition strings.
//!
//! Schemas carry `depends_on` / `read_only_depends_on` / `mandatory_depends_on`
//! strings of the form `eval:<boolean expression over doc fields>`. This module
//! parses the practical subset of that convention into a tagged AST and
//! evaluates it by recursive descent; host-language code is never compiled or
//! executed from remote strings.
//!
//! # Failure mode
//!
//! Evaluation is fail-OPEN: an unparseable expression or a reference to a
//! field absent from the document resolves to the governed property's default
//! (visible, editable, not mandatory) via [`eval_condition`]. Conditions that
//! mention role membership are out of scope and short-circuit to the default
//! without evaluation.
//!
//! # Grammar
//!
//! ```text
//! or_expr    := and_expr (("or" | "||") and_expr)*
//! and_expr   := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | comparison
//! comparison := primary (("==" | "=" | "!=" | "in" | "not in") primary)?
//! primary    := "(" or_expr ")" | "doc" "." ident | literal | list
//! ```

use crate::error::ConditionError;
use crate::types::{Document, FieldValue};

/// Evaluate a condition string against a document snapshot.
///
/// `default` is the governed property's fail-open value: `true` for
/// visibility, `false` for read-only and mandatory. It is returned when the
/// condition is absent in spirit (empty), unparseable, references an
/// undefined field, or mentions roles.
///
/// A string without the `eval:` prefix is the backend shorthand for a
/// truthiness test of that fieldname.
pub fn eval_condition(raw: &str, doc: &Document, default: bool) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return default;
    }
    if mentions_roles(raw) {
        return default;
    }

    match Condition::parse(raw) {
        Ok(condition) => match condition.evaluate(doc) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(condition = raw, %err, "condition evaluation failed open");
                default
            }
        },
        Err(err) => {
            tracing::debug!(condition = raw, %err, "condition parse failed open");
            default
        }
    }
}

/// Whether a condition's source text references role membership.
///
/// Role checks cannot be evaluated client-side and always resolve to the
/// governed property's default.
pub fn mentions_roles(raw: &str) -> bool {
    raw.contains("role")
}

/// A parsed condition: a pure boolean function of a document snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    expr: Expr,
}

impl Condition {
    /// Parse a condition string, stripping the `eval:` prefix when present.
    ///
    /// Without the prefix the whole string is read as a fieldname whose
    /// truthiness is the condition.
    ///
    /// # Errors
    ///
    /// Returns `ConditionError` for lexical or syntactic failures.
    pub fn parse(raw: &str) -> Result<Self, ConditionError> {
        let raw = raw.trim();
        let expr = match raw.strip_prefix("eval:") {
            Some(source) => Parser::new(lex(source)?).parse()?,
            None => Expr::Field(raw.to_string()),
        };
        Ok(Condition { expr })
    }

    /// Evaluate against a document snapshot. Pure: no side effects, no
    /// access to anything outside `doc`.
    ///
    /// # Errors
    ///
    /// Returns `ConditionError::UndefinedField` when the expression reads a
    /// field the document does not carry, or `NonListMembership` for an `in`
    /// whose right side is not a list. Callers fail open on either.
    pub fn evaluate(&self, doc: &Document) -> Result<bool, ConditionError> {
        eval_bool(&self.expr, doc)
    }
}

// --- AST ---

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Field(String),
    Literal(Literal),
    List(Vec<Literal>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Eq,
    Ne,
    Not,
    And,
    Or,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn lex(source: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                // Accept =, == and === as equality.
                while chars.peek() == Some(&'=') {
                    chars.next();
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    while chars.peek() == Some(&'=') {
                        chars.next();
                    }
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(ConditionError::UnexpectedChar('&'));
                }
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(ConditionError::UnexpectedChar('|'));
                }
                tokens.push(Token::Or);
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => text.push(c),
                        None => return Err(ConditionError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                if c == '-' {
                    text.push(c);
                    chars.next();
                }
                let mut is_float = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else if d == '.' && !is_float {
                        is_float = true;
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if text == "-" {
                    return Err(ConditionError::UnexpectedChar('-'));
                }
                let token = if is_float {
                    Token::Float(
                        text.parse()
                            .map_err(|_| ConditionError::UnexpectedToken(text.clone()))?,
                    )
                } else {
                    Token::Int(
                        text.parse()
                            .map_err(|_| ConditionError::UnexpectedToken(text.clone()))?,
                    )
                };
                tokens.push(token);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // `doc.<fieldname>` lexes as a single field reference.
                if ident == "doc" && chars.peek() == Some(&'.') {
                    chars.next();
                    let mut field = String::new();
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_alphanumeric() || d == '_' {
                            field.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if field.is_empty() {
                        return Err(ConditionError::UnexpectedEnd);
                    }
                    tokens.push(Token::Field(field));
                } else {
                    tokens.push(match ident.as_str() {
                        "and" => Token::And,
                        "or" => Token::Or,
                        "not" => Token::Not,
                        _ => Token::Ident(ident),
                    });
                }
            }
            other => return Err(ConditionError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

// --- Parser ---

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<Expr, ConditionError> {
        let expr = self.or_expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(t) => Err(ConditionError::UnexpectedToken(format!("{:?}", t))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.unary()?;
        while self.eat(&Token::And) {
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat(&Token::Not) {
            // `not in` after a primary is handled in comparison(); a leading
            // `not`/`!` negates the operand.
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.primary()?;

        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Ident(kw)) if kw == "in" => Some(CompareOp::In),
            Some(Token::Not) => {
                // Only `not in` continues a comparison.
                if matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(kw)) if kw == "in") {
                    self.pos += 1;
                    Some(CompareOp::NotIn)
                } else {
                    None
                }
            }
            _ => None,
        };

        match op {
            Some(op) => {
                self.pos += 1;
                let rhs = self.primary()?;
                Ok(Expr::Compare {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            None => Ok(lhs),
        }
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                if self.eat(&Token::RParen) {
                    Ok(expr)
                } else {
                    Err(ConditionError::UnexpectedEnd)
                }
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.literal()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    if self.eat(&Token::RBracket) {
                        break;
                    }
                    return Err(ConditionError::UnexpectedEnd);
                }
                Ok(Expr::List(items))
            }
            Some(Token::Field(name)) => Ok(Expr::Field(name)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Token::Int(n)) => Ok(Expr::Literal(Literal::Int(n))),
            Some(Token::Float(n)) => Ok(Expr::Literal(Literal::Float(n))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" | "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Literal::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Literal::Null)),
                other => Err(ConditionError::UnexpectedToken(other.to_string())),
            },
            Some(other) => Err(ConditionError::UnexpectedToken(format!("{:?}", other))),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn literal(&mut self) -> Result<Literal, ConditionError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Int(n)) => Ok(Literal::Int(n)),
            Some(Token::Float(n)) => Ok(Literal::Float(n)),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" | "True" => Ok(Literal::Bool(true)),
                "false" | "False" => Ok(Literal::Bool(false)),
                "null" | "None" => Ok(Literal::Null),
                other => Err(ConditionError::UnexpectedToken(other.to_string())),
            },
            Some(other) => Err(ConditionError::UnexpectedToken(format!("{:?}", other))),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}

// --- Evaluation ---

/// Resolved operand during evaluation.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Value(FieldValue),
    Bool(bool),
    List(Vec<Literal>),
}

fn eval_bool(expr: &Expr, doc: &Document) -> Result<bool, ConditionError> {
    match expr {
        Expr::And(lhs, rhs) => Ok(eval_bool(lhs, doc)? && eval_bool(rhs, doc)?),
        Expr::Or(lhs, rhs) => Ok(eval_bool(lhs, doc)? || eval_bool(rhs, doc)?),
        Expr::Not(inner) => Ok(!eval_bool(inner, doc)?),
        Expr::Compare { op, lhs, rhs } => {
            let lhs = resolve(lhs, doc)?;
            let rhs = resolve(rhs, doc)?;
            match op {
                CompareOp::Eq => Ok(loose_eq(&lhs, &rhs)),
                CompareOp::Ne => Ok(!loose_eq(&lhs, &rhs)),
                CompareOp::In => membership(&lhs, &rhs),
                CompareOp::NotIn => membership(&lhs, &rhs).map(|m| !m),
            }
        }
        other => Ok(truthy(&resolve(other, doc)?)),
    }
}

fn resolve(expr: &Expr, doc: &Document) -> Result<Operand, ConditionError> {
    match expr {
        // A reference to a field the document does not carry is an
        // undefined-field failure, which callers resolve fail-open.
        Expr::Field(name) => doc
            .get(name)
            .cloned()
            .map(Operand::Value)
            .ok_or_else(|| ConditionError::UndefinedField(name.clone())),
        Expr::Literal(lit) => Ok(literal_operand(lit)),
        Expr::List(items) => Ok(Operand::List(items.clone())),
        compound => eval_bool(compound, doc).map(Operand::Bool),
    }
}

fn literal_operand(lit: &Literal) -> Operand {
    match lit {
        Literal::Str(s) => Operand::Value(FieldValue::Str(s.clone())),
        Literal::Int(n) => Operand::Value(FieldValue::Int(*n)),
        Literal::Float(n) => Operand::Value(FieldValue::Float(*n)),
        // Check fields store 0/1, so boolean literals compare numerically.
        Literal::Bool(b) => Operand::Value(FieldValue::check(*b)),
        Literal::Null => Operand::Value(FieldValue::Null),
    }
}

fn truthy(operand: &Operand) -> bool {
    match operand {
        Operand::Value(v) => v.truthy(),
        Operand::Bool(b) => *b,
        Operand::List(items) => !items.is_empty(),
    }
}

fn membership(needle: &Operand, haystack: &Operand) -> Result<bool, ConditionError> {
    let Operand::List(items) = haystack else {
        return Err(ConditionError::NonListMembership);
    };
    Ok(items
        .iter()
        .any(|item| loose_eq(needle, &literal_operand(item))))
}

/// Backend conditions are written against loosely typed documents, so
/// equality follows the convention: numeric cross-type comparison, and
/// numeric strings compare equal to numbers.
fn loose_eq(lhs: &Operand, rhs: &Operand) -> bool {
    match (lhs, rhs) {
        (Operand::Value(a), Operand::Value(b)) => value_eq(a, b),
        (Operand::Bool(a), Operand::Bool(b)) => a == b,
        (Operand::Bool(a), Operand::Value(v)) | (Operand::Value(v), Operand::Bool(a)) => {
            *a == v.truthy()
        }
        _ => false,
    }
}

fn value_eq(a: &FieldValue, b: &FieldValue) -> bool {
    use FieldValue::*;
    match (a, b) {
        (Null, Null) => true,
        (Str(x), Str(y)) => x == y,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (Int(x), Float(y)) | (Float(y), Int(x)) => (*x as f64) == *y,
        (Str(s), Int(n)) | (Int(n), Str(s)) => s.parse::<i64>().map(|v| v == *n).unwrap_or(false),
        (Str(s), Float(n)) | (Float(n), Str(s)) => {
            s.parse::<f64>().map(|v| v == *n).unwrap_or(false)
        }
        _ => false,
    }
}
