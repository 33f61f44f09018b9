//! Restricted expression language for branch conditions.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ( ("||" | "or") and )*
//! and     := eq ( ("&&" | "and") eq )*
//! eq      := cmp ( ("==" | "!=") cmp )*
//! cmp     := sum ( ("<" | "<=" | ">" | ">=") sum )*
//! sum     := product ( ("+" | "-") product )*
//! product := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("!" | "not" | "-") unary | atom
//! atom    := number | string | true | false | null | path | "(" or ")"
//! path    := ident ( "." ident )*
//! ```
//!
//! Paths rooted at `signal` read the incoming signal, paths rooted at
//! `variables` read the variable store, and any other identifier is a
//! variable name. Unknown paths evaluate to null.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::ExpressionError;

/// Longest accepted source text, in characters.
pub const MAX_EXPRESSION_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Not,
  Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Or,
  And,
  Equal,
  NotEqual,
  Less,
  LessEqual,
  Greater,
  GreaterEqual,
  Add,
  Subtract,
  Multiply,
  Divide,
  Remainder,
}

impl BinaryOp {
  /// Left binding power.
  fn precedence(self) -> u8 {
    match self {
      BinaryOp::Or => 1,
      BinaryOp::And => 2,
      BinaryOp::Equal | BinaryOp::NotEqual => 3,
      BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => 4,
      BinaryOp::Add | BinaryOp::Subtract => 5,
      BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => 6,
    }
  }
}

impl fmt::Display for BinaryOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let op = match self {
      BinaryOp::Or => "||",
      BinaryOp::And => "&&",
      BinaryOp::Equal => "==",
      BinaryOp::NotEqual => "!=",
      BinaryOp::Less => "<",
      BinaryOp::LessEqual => "<=",
      BinaryOp::Greater => ">",
      BinaryOp::GreaterEqual => ">=",
      BinaryOp::Add => "+",
      BinaryOp::Subtract => "-",
      BinaryOp::Multiply => "*",
      BinaryOp::Divide => "/",
      BinaryOp::Remainder => "%",
    };
    f.write_str(op)
  }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
  Literal(Value),
  Path(Vec<String>),
  Unary(UnaryOp, Box<Expression>),
  Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

/// Values visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Scope {
  pub signal: Value,
  pub variables: BTreeMap<String, Value>,
}

impl Scope {
  pub fn new(signal: Value, variables: BTreeMap<String, Value>) -> Self {
    Self { signal, variables }
  }

  fn resolve(&self, path: &[String]) -> Value {
    let Some((root, rest)) = path.split_first() else {
      return Value::Null;
    };
    let base = match root.as_str() {
      "signal" => Some(self.signal.clone()),
      "variables" => match rest.split_first() {
        Some((key, rest)) => return lookup(self.variables.get(key), rest),
        None => Some(Value::Object(
          self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        )),
      },
      name => self.variables.get(name).cloned(),
    };
    lookup(base.as_ref(), rest)
  }
}

fn lookup(base: Option<&Value>, rest: &[String]) -> Value {
  let mut current = match base {
    Some(value) => value,
    None => return Value::Null,
  };
  for segment in rest {
    current = match current.get(segment.as_str()) {
      Some(value) => value,
      None => return Value::Null,
    };
  }
  current.clone()
}

/// JSON truthiness: null, false, 0, "" and empty arrays are false.
pub fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(_) => true,
  }
}

impl Expression {
  /// Parse source text.
  pub fn parse(source: &str) -> Result<Self, ExpressionError> {
    let len = source.chars().count();
    if len > MAX_EXPRESSION_LEN {
      return Err(ExpressionError::TooLong {
        len,
        max: MAX_EXPRESSION_LEN,
      });
    }
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    match parser.peek() {
      Some((pos, token)) => Err(ExpressionError::syntax(
        *pos,
        format!("unexpected {}", token),
      )),
      None => Ok(expr),
    }
  }

  pub fn evaluate(&self, scope: &Scope) -> Result<Value, ExpressionError> {
    match self {
      Expression::Literal(value) => Ok(value.clone()),
      Expression::Path(path) => Ok(scope.resolve(path)),
      Expression::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!truthy(&inner.evaluate(scope)?))),
      Expression::Unary(UnaryOp::Negate, inner) => {
        let value = inner.evaluate(scope)?;
        let n = as_number(&value, "-")?;
        number(-n)
      }
      Expression::Binary(BinaryOp::And, left, right) => {
        if !truthy(&left.evaluate(scope)?) {
          return Ok(Value::Bool(false));
        }
        Ok(Value::Bool(truthy(&right.evaluate(scope)?)))
      }
      Expression::Binary(BinaryOp::Or, left, right) => {
        if truthy(&left.evaluate(scope)?) {
          return Ok(Value::Bool(true));
        }
        Ok(Value::Bool(truthy(&right.evaluate(scope)?)))
      }
      Expression::Binary(op, left, right) => {
        let left = left.evaluate(scope)?;
        let right = right.evaluate(scope)?;
        binary(*op, &left, &right)
      }
    }
  }

  /// Evaluate and reduce to a boolean.
  pub fn evaluate_bool(&self, scope: &Scope) -> Result<bool, ExpressionError> {
    self.evaluate(scope).map(|v| truthy(&v))
  }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
  match op {
    BinaryOp::Equal => Ok(Value::Bool(loosely_equal(left, right))),
    BinaryOp::NotEqual => Ok(Value::Bool(!loosely_equal(left, right))),
    BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
      let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
          let a = as_number(left, &op.to_string())?;
          let b = as_number(right, &op.to_string())?;
          a.partial_cmp(&b)
            .ok_or_else(|| ExpressionError::type_error("cannot compare NaN"))?
        }
      };
      Ok(Value::Bool(match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEqual => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        _ => ordering.is_ge(),
      }))
    }
    BinaryOp::Add if left.is_string() || right.is_string() => {
      Ok(Value::String(format!("{}{}", display(left), display(right))))
    }
    BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply => {
      let a = as_number(left, &op.to_string())?;
      let b = as_number(right, &op.to_string())?;
      number(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        _ => a * b,
      })
    }
    BinaryOp::Divide | BinaryOp::Remainder => {
      let a = as_number(left, &op.to_string())?;
      let b = as_number(right, &op.to_string())?;
      if b == 0.0 {
        return Err(ExpressionError::DivisionByZero);
      }
      number(if op == BinaryOp::Divide { a / b } else { a % b })
    }
    BinaryOp::And => Ok(Value::Bool(truthy(left) && truthy(right))),
    BinaryOp::Or => Ok(Value::Bool(truthy(left) || truthy(right))),
  }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
  match (left, right) {
    (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
    _ => left == right,
  }
}

fn as_number(value: &Value, op: &str) -> Result<f64, ExpressionError> {
  value
    .as_f64()
    .ok_or_else(|| ExpressionError::type_error(format!("'{}' expects numbers, got {}", op, value)))
}

fn number(n: f64) -> Result<Value, ExpressionError> {
  if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
    return Ok(Value::from(n as i64));
  }
  serde_json::Number::from_f64(n)
    .map(Value::Number)
    .ok_or_else(|| ExpressionError::type_error("result is not a finite number"))
}

fn display(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

// -- lexer --

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Number(f64),
  Str(String),
  Ident(String),
  Op(&'static str),
  Dot,
  LParen,
  RParen,
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Token::Number(n) => write!(f, "number {}", n),
      Token::Str(s) => write!(f, "string '{}'", s),
      Token::Ident(name) => write!(f, "'{}'", name),
      Token::Op(op) => write!(f, "'{}'", op),
      Token::Dot => f.write_str("'.'"),
      Token::LParen => f.write_str("'('"),
      Token::RParen => f.write_str("')'"),
    }
  }
}

const OPERATORS: &[&str] = &[
  "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%",
];

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
  let chars: Vec<char> = source.chars().collect();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    let start = i;

    if c.is_whitespace() {
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
      }
      if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
          i += 1;
        }
      }
      let text: String = chars[start..i].iter().collect();
      let n = text
        .parse::<f64>()
        .map_err(|_| ExpressionError::syntax(start, format!("bad number '{}'", text)))?;
      tokens.push((start, Token::Number(n)));
      continue;
    }

    if c.is_alphabetic() || c == '_' {
      while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
      }
      tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
      continue;
    }

    if c == '"' || c == '\'' {
      i += 1;
      let mut text = String::new();
      loop {
        let Some(&next) = chars.get(i) else {
          return Err(ExpressionError::syntax(start, "unterminated string"));
        };
        i += 1;
        match next {
          '\\' => {
            let escaped = chars
              .get(i)
              .ok_or_else(|| ExpressionError::syntax(start, "unterminated string"))?;
            text.push(match escaped {
              'n' => '\n',
              't' => '\t',
              other => *other,
            });
            i += 1;
          }
          q if q == c => break,
          other => text.push(other),
        }
      }
      tokens.push((start, Token::Str(text)));
      continue;
    }

    match c {
      '(' => tokens.push((start, Token::LParen)),
      ')' => tokens.push((start, Token::RParen)),
      '.' => tokens.push((start, Token::Dot)),
      _ => {
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
          return Err(ExpressionError::syntax(start, format!("unexpected character '{}'", c)));
        };
        tokens.push((start, Token::Op(*op)));
        i += op.len();
        continue;
      }
    }
    i += 1;
  }

  Ok(tokens)
}

// -- parser --

struct Parser {
  tokens: Vec<(usize, Token)>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<&(usize, Token)> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<(usize, Token)> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn end_position(&self) -> usize {
    self
      .tokens
      .last()
      .map(|(pos, _)| pos + 1)
      .unwrap_or_default()
  }

  fn peek_binary(&self) -> Option<BinaryOp> {
    let (_, token) = self.peek()?;
    let op = match token {
      Token::Op("||") => BinaryOp::Or,
      Token::Op("&&") => BinaryOp::And,
      Token::Op("==") => BinaryOp::Equal,
      Token::Op("!=") => BinaryOp::NotEqual,
      Token::Op("<") => BinaryOp::Less,
      Token::Op("<=") => BinaryOp::LessEqual,
      Token::Op(">") => BinaryOp::Greater,
      Token::Op(">=") => BinaryOp::GreaterEqual,
      Token::Op("+") => BinaryOp::Add,
      Token::Op("-") => BinaryOp::Subtract,
      Token::Op("*") => BinaryOp::Multiply,
      Token::Op("/") => BinaryOp::Divide,
      Token::Op("%") => BinaryOp::Remainder,
      Token::Ident(word) if word == "or" => BinaryOp::Or,
      Token::Ident(word) if word == "and" => BinaryOp::And,
      _ => return None,
    };
    Some(op)
  }

  /// Precedence climbing: parse operators binding tighter than `min`.
  fn expression(&mut self, min: u8) -> Result<Expression, ExpressionError> {
    let mut left = self.unary()?;
    while let Some(op) = self.peek_binary() {
      let precedence = op.precedence();
      if precedence <= min {
        break;
      }
      self.pos += 1;
      let right = self.expression(precedence)?;
      left = Expression::Binary(op, Box::new(left), Box::new(right));
    }
    Ok(left)
  }

  fn unary(&mut self) -> Result<Expression, ExpressionError> {
    let op = match self.peek() {
      Some((_, Token::Op("!"))) => Some(UnaryOp::Not),
      Some((_, Token::Ident(word))) if word == "not" => Some(UnaryOp::Not),
      Some((_, Token::Op("-"))) => Some(UnaryOp::Negate),
      _ => None,
    };
    match op {
      Some(op) => {
        self.pos += 1;
        Ok(Expression::Unary(op, Box::new(self.unary()?)))
      }
      None => self.atom(),
    }
  }

  fn atom(&mut self) -> Result<Expression, ExpressionError> {
    let end = self.end_position();
    let Some((pos, token)) = self.next() else {
      return Err(ExpressionError::syntax(end, "unexpected end of expression"));
    };
    match token {
      Token::Number(n) => Ok(Expression::Literal(number(n)?)),
      Token::Str(s) => Ok(Expression::Literal(Value::String(s))),
      Token::LParen => {
        let inner = self.expression(0)?;
        match self.next() {
          Some((_, Token::RParen)) => Ok(inner),
          _ => Err(ExpressionError::syntax(pos, "unclosed '('")),
        }
      }
      Token::Ident(word) => match word.as_str() {
        "true" => Ok(Expression::Literal(Value::Bool(true))),
        "false" => Ok(Expression::Literal(Value::Bool(false))),
        "null" => Ok(Expression::Literal(Value::Null)),
        "and" | "or" | "not" => Err(ExpressionError::syntax(pos, format!("unexpected '{}'", word))),
        _ => {
          let mut path = vec![word];
          while let Some((_, Token::Dot)) = self.peek() {
            self.pos += 1;
            match self.next() {
              Some((_, Token::Ident(segment))) => path.push(segment),
              _ => return Err(ExpressionError::syntax(pos, "expected name after '.'")),
            }
          }
          Ok(Expression::Path(path))
        }
      },
      other => Err(ExpressionError::syntax(pos, format!("unexpected {}", other))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn eval(source: &str, scope: &Scope) -> Value {
    Expression::parse(source).unwrap().evaluate(scope).unwrap()
  }

  fn scope() -> Scope {
    let mut variables = BTreeMap::new();
    variables.insert("count".to_string(), json!(3));
    variables.insert("mode".to_string(), json!("night"));
    variables.insert("sensor".to_string(), json!({ "level": 0.25 }));
    Scope::new(
      json!({ "source": 7, "data": { "pass": true, "n": 10 } }),
      variables,
    )
  }

  #[test]
  fn test_paths() {
    let scope = scope();
    assert_eq!(eval("signal.data.pass", &scope), json!(true));
    assert_eq!(eval("signal.source", &scope), json!(7));
    assert_eq!(eval("count", &scope), json!(3));
    assert_eq!(eval("variables.mode", &scope), json!("night"));
    assert_eq!(eval("sensor.level", &scope), json!(0.25));
    assert_eq!(eval("signal.data.missing.deeper", &scope), Value::Null);
    assert_eq!(eval("nothing", &scope), Value::Null);
  }

  #[test]
  fn test_precedence_and_arithmetic() {
    let scope = scope();
    assert_eq!(eval("1 + 2 * 3", &scope), json!(7));
    assert_eq!(eval("(1 + 2) * 3", &scope), json!(9));
    assert_eq!(eval("10 - 4 - 3", &scope), json!(3));
    assert_eq!(eval("7 % 4", &scope), json!(3));
    assert_eq!(eval("1 / 4", &scope), json!(0.25));
    assert_eq!(eval("-count + 1", &scope), json!(-2));
    assert_eq!(eval("signal.data.n / 2 == 5", &scope), json!(true));
  }

  #[test]
  fn test_boolean_operators() {
    let scope = scope();
    assert_eq!(eval("count > 2 && mode == 'night'", &scope), json!(true));
    assert_eq!(eval("count > 5 or not signal.data.pass", &scope), json!(false));
    assert_eq!(eval("!false and true", &scope), json!(true));
    assert_eq!(eval("count >= 3 || missing.call", &scope), json!(true));
    assert_eq!(eval("1 == 1.0", &scope), json!(true));
    assert_eq!(eval("\"a\" < \"b\"", &scope), json!(true));
    assert_eq!(eval("null != false", &scope), json!(true));
  }

  #[test]
  fn test_string_concatenation() {
    let scope = scope();
    assert_eq!(eval("'mode: ' + mode", &scope), json!("mode: night"));
    assert_eq!(eval("'n=' + count", &scope), json!("n=3"));
  }

  #[test]
  fn test_truthiness() {
    assert!(!truthy(&json!(null)));
    assert!(!truthy(&json!(0)));
    assert!(!truthy(&json!("")));
    assert!(!truthy(&json!([])));
    assert!(truthy(&json!({})));
    assert!(truthy(&json!("0")));
  }

  #[test]
  fn test_rejects_code_like_input() {
    for source in [
      "eval('x')",
      "window.location = 1",
      "a; b",
      "x => x",
      "count +",
      "(count",
      "signal.",
      "`template`",
    ] {
      assert!(Expression::parse(source).is_err(), "{} should not parse", source);
    }
  }

  #[test]
  fn test_rejects_long_input() {
    let source = "1 + ".repeat(200) + "1";
    assert!(matches!(
      Expression::parse(&source),
      Err(ExpressionError::TooLong { .. })
    ));
  }

  #[test]
  fn test_runtime_errors() {
    let scope = scope();
    let err = Expression::parse("1 / 0").unwrap().evaluate(&scope);
    assert!(matches!(err, Err(ExpressionError::DivisionByZero)));

    let err = Expression::parse("mode * 2").unwrap().evaluate(&scope);
    assert!(matches!(err, Err(ExpressionError::Type { .. })));
  }
}
