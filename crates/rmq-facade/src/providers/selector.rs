//! Evaluation of subscription filters against stored messages.
//!
//! Supports the SQL92 subset used by flow coloring and typical property
//! filters: `=`, `<>`/`!=`, `<`, `<=`, `>`, `>=`, `AND`, `OR`, `NOT`,
//! parentheses, `IS [NOT] NULL`, quoted string literals and numbers. The
//! pseudo-property `TAGS` refers to the message tag.
//!
//! Comparisons treat an absent property as the empty string; only
//! `IS NULL` distinguishes "absent" from "empty".

use crate::filter::{FilterExpression, FilterType};
use std::collections::HashMap;
use std::fmt;

const TAGS_PROPERTY: &str = "TAGS";

/// Error produced for malformed filter expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError {
    pub expression: String,
    pub message: String,
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid filter '{}': {}", self.expression, self.message)
    }
}

/// Compiled subscription filter
#[derive(Debug, Clone)]
pub enum Selector {
    All,
    Tags(Vec<String>),
    Sql(Predicate),
}

impl Selector {
    /// Compile a filter expression
    pub fn compile(filter: &FilterExpression) -> Result<Self, SelectorError> {
        match filter.filter_type {
            FilterType::Tag => Ok(match filter.tags() {
                None => Self::All,
                Some(tags) => Self::Tags(tags.into_iter().map(str::to_string).collect()),
            }),
            FilterType::Sql92 => {
                let tokens = tokenize(&filter.expression).map_err(|message| SelectorError {
                    expression: filter.expression.clone(),
                    message,
                })?;
                let mut parser = Parser { tokens, pos: 0 };
                let predicate = parser.parse_or().and_then(|p| {
                    if parser.pos == parser.tokens.len() {
                        Ok(p)
                    } else {
                        Err(format!("unexpected token {:?}", parser.tokens[parser.pos]))
                    }
                });
                predicate
                    .map(Self::Sql)
                    .map_err(|message| SelectorError {
                        expression: filter.expression.clone(),
                        message,
                    })
            }
        }
    }

    /// Check a message's tag and properties against the filter
    pub fn matches(&self, tag: Option<&str>, properties: &HashMap<String, String>) -> bool {
        match self {
            Self::All => true,
            Self::Tags(tags) => tag.is_some_and(|t| tags.iter().any(|candidate| candidate == t)),
            Self::Sql(predicate) => predicate.eval(&|name: &str| {
                if name.eq_ignore_ascii_case(TAGS_PROPERTY) {
                    tag
                } else {
                    properties.get(name).map(String::as_str)
                }
            }),
        }
    }
}

// ============================================================================
// Predicate Tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Property(String),
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Or(Box<Predicate>, Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    IsNull {
        property: String,
        negated: bool,
    },
}

impl Predicate {
    fn eval<'m>(&self, lookup: &dyn Fn(&str) -> Option<&'m str>) -> bool {
        match self {
            Self::Or(a, b) => a.eval(lookup) || b.eval(lookup),
            Self::And(a, b) => a.eval(lookup) && b.eval(lookup),
            Self::Not(p) => !p.eval(lookup),
            Self::IsNull { property, negated } => lookup(property).is_none() != *negated,
            Self::Compare { left, op, right } => {
                let resolve = |operand: &Operand| -> Value {
                    match operand {
                        Operand::Property(name) => Value::Text(lookup(name).unwrap_or("").to_string()),
                        Operand::Text(s) => Value::Text(s.clone()),
                        Operand::Number(n) => Value::Number(*n),
                    }
                };
                compare(&resolve(left), *op, &resolve(right))
            }
        }
    }
}

enum Value {
    Text(String),
    Number(f64),
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Number(b)) => a.trim().parse::<f64>().ok().and_then(|a| a.partial_cmp(b)),
        (Value::Number(a), Value::Text(b)) => b.trim().parse::<f64>().ok().and_then(|b| a.partial_cmp(&b)),
    };

    match ordering {
        None => false,
        Some(ordering) => match op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        },
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Text(String),
    Number(f64),
    Op(CompareOp),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('>') => {
                    tokens.push(Token::Op(CompareOp::Ne));
                    i += 2;
                }
                Some('=') => {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                // '' inside a literal is an escaped quote
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", literal))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate, String> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate, String> {
        if self.eat_keyword("NOT") {
            return Ok(Predicate::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                other => Err(format!("expected ')', found {:?}", other)),
            };
        }

        let left = self.parse_operand()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err("expected NULL after IS".to_string());
            }
            return match left {
                Operand::Property(property) => Ok(Predicate::IsNull { property, negated }),
                other => Err(format!("IS NULL needs a property, found {:?}", other)),
            };
        }

        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => return Err(format!("expected comparison operator, found {:?}", other)),
        };
        let right = self.parse_operand()?;

        Ok(Predicate::Compare { left, op, right })
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Operand::Property(name)),
            Some(Token::Text(text)) => Ok(Operand::Text(text)),
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            other => Err(format!("expected operand, found {:?}", other)),
        }
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
