//! Restricted condition language for `conditional` steps.
//!
//! Supports literals (numbers, quoted strings, `true`, `false`, `null`),
//! dotted context paths with an optional trailing `.length`, parentheses,
//! `!`, `&&`, `||`, loose and strict equality and the four ordering
//! comparisons. Nothing else is accepted; there is no arithmetic and no
//! function call syntax.

use std::cmp::Ordering;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::path::{get_by_path, is_truthy};

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    // Logical
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),

    // Comparison
    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    StrictEqual(Box<Expression>, Box<Expression>),
    StrictNotEqual(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
    SmallerThan(Box<Expression>, Box<Expression>),
    SmallerThanOrEqual(Box<Expression>, Box<Expression>),

    // Leaf nodes
    Literal(Value),
    Path(String),
}

impl Expression {
    pub fn evaluate(&self, context: &Value) -> Value {
        match self {
            Expression::Literal(value) => value.clone(),
            Expression::Path(path) => resolve(context, path).unwrap_or(Value::Null),
            Expression::Not(inner) => Value::Bool(!is_truthy(&inner.evaluate(context))),
            Expression::And(left, right) => Value::Bool(
                is_truthy(&left.evaluate(context)) && is_truthy(&right.evaluate(context)),
            ),
            Expression::Or(left, right) => Value::Bool(
                is_truthy(&left.evaluate(context)) || is_truthy(&right.evaluate(context)),
            ),
            Expression::Equal(left, right) => {
                Value::Bool(loose_equal(&left.evaluate(context), &right.evaluate(context)))
            }
            Expression::NotEqual(left, right) => {
                Value::Bool(!loose_equal(&left.evaluate(context), &right.evaluate(context)))
            }
            Expression::StrictEqual(left, right) => {
                Value::Bool(strict_equal(&left.evaluate(context), &right.evaluate(context)))
            }
            Expression::StrictNotEqual(left, right) => {
                Value::Bool(!strict_equal(&left.evaluate(context), &right.evaluate(context)))
            }
            Expression::GreaterThan(left, right) => compare(left, right, context, Ordering::is_gt),
            Expression::GreaterThanOrEqual(left, right) => {
                compare(left, right, context, Ordering::is_ge)
            }
            Expression::SmallerThan(left, right) => compare(left, right, context, Ordering::is_lt),
            Expression::SmallerThanOrEqual(left, right) => {
                compare(left, right, context, Ordering::is_le)
            }
        }
    }
}

/// Parse and evaluate `source` against `context`, reducing the result to a
/// boolean by truthiness.
pub fn evaluate_condition(source: &str, context: &Value) -> Result<bool> {
    let expression = parse(source)?;
    Ok(is_truthy(&expression.evaluate(context)))
}

pub fn parse(source: &str) -> Result<Expression> {
    let tokens = tokenize(source).map_err(|detail| invalid(source, &detail))?;
    if tokens.is_empty() {
        return Err(invalid(source, "empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expression = parser.or().map_err(|detail| invalid(source, &detail))?;
    if let Some(extra) = parser.peek() {
        return Err(invalid(source, &format!("unexpected {extra:?}")));
    }
    Ok(expression)
}

fn invalid(source: &str, detail: &str) -> anyhow::Error {
    anyhow!("invalid condition '{source}': {detail}")
}

/// `None` when `path` does not resolve; such operands never order.
fn resolve(context: &Value, path: &str) -> Option<Value> {
    if let Some(found) = get_by_path(context, path) {
        return Some(found.clone());
    }
    path.strip_suffix(".length")
        .and_then(|parent| get_by_path(context, parent))
        .and_then(|parent| match parent {
            Value::Array(items) => Some(items.len()),
            Value::String(text) => Some(text.chars().count()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        })
        .map(Value::from)
}

fn operand(expression: &Expression, context: &Value) -> Option<Value> {
    match expression {
        Expression::Path(path) => resolve(context, path),
        other => Some(other.evaluate(context)),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::Number(num) => num.as_f64(),
        Value::String(text) if text.trim().is_empty() => Some(0.0),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn strict_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn loose_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => strict_equal(left, right),
    }
}

fn compare(
    left: &Expression,
    right: &Expression,
    context: &Value,
    accept: fn(Ordering) -> bool,
) -> Value {
    let (Some(left), Some(right)) = (operand(left, context), operand(right, context)) else {
        return Value::Bool(false);
    };
    let ordering = match (&left, &right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (as_number(&left), as_number(&right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    Value::Bool(ordering.map_or(false, accept))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '{' if next == Some('{') => return Err(format!("unresolved placeholder at {i}")),
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                if chars.get(i + 2) == Some(&'=') {
                    tokens.push(Token::StrictEq);
                    i += 3;
                } else {
                    tokens.push(Token::Eq);
                    i += 2;
                }
            }
            '!' if next == Some('=') => {
                if chars.get(i + 2) == Some(&'=') {
                    tokens.push(Token::StrictNotEq);
                    i += 3;
                } else {
                    tokens.push(Token::NotEq);
                    i += 2;
                }
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                tokens.push(match (c, inclusive) {
                    ('<', false) => Token::Lt,
                    ('<', true) => Token::Le,
                    ('>', false) => Token::Gt,
                    _ => Token::Ge,
                });
                i += if inclusive { 2 } else { 1 };
            }
            '\'' | '"' => {
                let (text, end) = read_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && starts_number(&tokens, next)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| format!("malformed number '{text}'"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let (path, end) = read_path(&chars, i)?;
                tokens.push(Token::Ident(path));
                i = end;
            }
            other => return Err(format!("unexpected character '{other}' at {i}")),
        }
    }
    Ok(tokens)
}

fn starts_number(tokens: &[Token], next: Option<char>) -> bool {
    let follows_value = matches!(
        tokens.last(),
        Some(Token::Number(_) | Token::Str(_) | Token::Ident(_) | Token::RParen)
    );
    !follows_value && next.map_or(false, |c| c.is_ascii_digit())
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars.get(i + 1).ok_or("unterminated escape")?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

/// Reads `a.b-c.0` and `a[0]`/`a['key']`, normalised to dot notation.
fn read_path(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut path = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c.is_alphanumeric() || matches!(c, '_' | '$' | '-' | '.') {
            path.push(c);
            i += 1;
        } else if c == '[' {
            let close = chars[i..]
                .iter()
                .position(|&ch| ch == ']')
                .map(|offset| i + offset)
                .ok_or("unterminated index")?;
            let inner: String = chars[i + 1..close].iter().collect();
            let key = inner.trim().trim_matches(|ch: char| ch == '\'' || ch == '"');
            path.push('.');
            path.push_str(key);
            i = close + 1;
        } else {
            break;
        }
    }
    Ok((path.trim_end_matches('.').to_string(), i))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or(&mut self) -> Result<Expression, String> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression, String> {
        let mut left = self.equality()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.equality()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expression, String> {
        let mut left = self.comparison()?;
        loop {
            let build: fn(Box<Expression>, Box<Expression>) -> Expression = match self.peek() {
                Some(Token::Eq) => Expression::Equal,
                Some(Token::NotEq) => Expression::NotEqual,
                Some(Token::StrictEq) => Expression::StrictEqual,
                Some(Token::StrictNotEq) => Expression::StrictNotEqual,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = build(Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> Result<Expression, String> {
        let mut left = self.unary()?;
        loop {
            let build: fn(Box<Expression>, Box<Expression>) -> Expression = match self.peek() {
                Some(Token::Gt) => Expression::GreaterThan,
                Some(Token::Ge) => Expression::GreaterThanOrEqual,
                Some(Token::Lt) => Expression::SmallerThan,
                Some(Token::Le) => Expression::SmallerThanOrEqual,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = build(Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expression, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.unary()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression, String> {
        match self.advance() {
            Some(Token::Number(number)) => Ok(Expression::Literal(
                serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(text)) => Ok(Expression::Literal(Value::String(text))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expression::Literal(Value::Bool(true)),
                "false" => Expression::Literal(Value::Bool(false)),
                "null" | "undefined" => Expression::Literal(Value::Null),
                _ => Expression::Path(name),
            }),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
