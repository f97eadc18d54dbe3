//! Safe boolean expression evaluation.
//!
//! User-supplied workflow conditions are the only path from stored strings to
//! evaluation, so the language is a closed whitelist: literals (numbers,
//! strings, booleans, null), lists, comparisons (`> < >= <= == != in not
//! in`), `and` / `or` / `not`, and parentheses.  Identifiers, calls,
//! arithmetic, attribute or subscript syntax are hard rejects — there is no
//! name lookup and nothing from the host process is reachable.
//!
//! Python-style literals (`True`, `None`, single quotes) are accepted
//! alongside JSON spellings because stored conditions from older automations
//! use them.

use maestro_domain::{Error, Result};
use serde_json::{json, Value};

use crate::template::resolve_template;

/// Resolve templates in `condition` against `ctx`, then evaluate the result.
pub fn evaluate_condition(condition: &str, ctx: &Value) -> Result<bool> {
    match resolve_template(condition, ctx) {
        Value::String(expr) => evaluate_expression(&expr),
        Value::Bool(b) => Ok(b),
        other => Err(Error::Validation(format!(
            "condition resolved to {other}, which is not an evaluable expression"
        ))),
    }
}

/// Parse and evaluate a whitelisted boolean expression.
pub fn evaluate_expression(expression: &str) -> Result<bool> {
    let tokens = lex(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_or()?;
    parser.expect_end()?;
    match eval(&ast)? {
        Value::Bool(b) => Ok(b),
        other => Err(Error::Validation(format!(
            "expression must evaluate to a boolean, got {other}"
        ))),
    }
}

// ─── Lexer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    And,
    Or,
    Not,
    In,
    Gt,
    Lt,
    Ge,
    Le,
    EqEq,
    NotEq,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(Error::Validation(
                        "assignment is not allowed in expressions; use ==".into(),
                    ));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err(Error::Validation("unexpected '!' in expression".into()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i).copied() {
                        Some('\\') => match chars.get(i + 1).copied() {
                            Some(next) => {
                                value.push(next);
                                i += 2;
                            }
                            None => {
                                return Err(Error::Validation("unterminated escape".into()))
                            }
                        },
                        Some(ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(Error::Validation("unterminated string literal".into()))
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number: f64 = literal.parse().map_err(|_| {
                    Error::Validation(format!("invalid number literal '{literal}'"))
                })?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    "in" => tokens.push(Token::In),
                    "true" | "True" => tokens.push(Token::Bool(true)),
                    "false" | "False" => tokens.push(Token::Bool(false)),
                    "null" | "None" => tokens.push(Token::Null),
                    other => {
                        return Err(Error::Validation(format!(
                            "name '{other}' is not allowed in expressions"
                        )))
                    }
                }
            }
            other => {
                return Err(Error::Validation(format!(
                    "character '{other}' is not allowed in expressions"
                )))
            }
        }
    }
    Ok(tokens)
}

// ─── Parser ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    In,
    NotIn,
}

#[derive(Debug)]
enum Expr {
    Lit(Value),
    List(Vec<Expr>),
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "unexpected trailing tokens in expression at position {}",
                self.pos
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let first = self.parse_and()?;
        let mut parts = vec![first];
        while self.eat(&Token::Or) {
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            Expr::Or(parts)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let first = self.parse_not()?;
        let mut parts = vec![first];
        while self.eat(&Token::And) {
            parts.push(self.parse_not()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            Expr::And(parts)
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            // `not in` never reaches here: the comparison parser consumes it.
            Ok(Expr::Not(Box::new(self.parse_not()?)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let first = self.parse_operand()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Ge) => CmpOp::Ge,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::EqEq) => CmpOp::Eq,
                Some(Token::NotEq) => CmpOp::Ne,
                Some(Token::In) => CmpOp::In,
                Some(Token::Not) => {
                    // Only valid as `not in`.
                    if self.tokens.get(self.pos + 1) == Some(&Token::In) {
                        self.pos += 1;
                        CmpOp::NotIn
                    } else {
                        break;
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.parse_operand()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_operand(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(Expr::Lit(json!(n))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::String(s))),
            Some(Token::Bool(b)) => Ok(Expr::Lit(Value::Bool(b))),
            Some(Token::Null) => Ok(Expr::Lit(Value::Null)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat(&Token::Comma) {
                            // Tolerate a trailing comma before the bracket.
                            if self.eat(&Token::RBracket) {
                                break;
                            }
                            continue;
                        }
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        return Err(Error::Validation("expected ',' or ']' in list".into()));
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(Error::Validation("expected ')'".into()));
                }
                Ok(inner)
            }
            other => Err(Error::Validation(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}

// ─── Evaluation ───────────────────────────────────────────────────────────────

fn eval(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::List(items) => {
            let values: Result<Vec<Value>> = items.iter().map(eval).collect();
            Ok(Value::Array(values?))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner)?))),
        Expr::And(parts) => {
            for part in parts {
                if !truthy(&eval(part)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expr::Or(parts) => {
            for part in parts {
                if truthy(&eval(part)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Compare { first, rest } => {
            // Chained comparisons evaluate pairwise, like `1 < x < 10`.
            let mut left = eval(first)?;
            for (op, right_expr) in rest {
                let right = eval(right_expr)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::Ne => Ok(!values_equal(left, right)),
        CmpOp::In | CmpOp::NotIn => {
            let contains = match right {
                Value::Array(items) => items.iter().any(|item| values_equal(left, item)),
                Value::String(haystack) => match left {
                    Value::String(needle) => haystack.contains(needle.as_str()),
                    _ => {
                        return Err(Error::Validation(
                            "'in' on a string requires a string on the left".into(),
                        ))
                    }
                },
                other => {
                    return Err(Error::Validation(format!(
                        "'in' requires a list or string on the right, got {other}"
                    )))
                }
            };
            Ok(if op == CmpOp::In { contains } else { !contains })
        }
        CmpOp::Gt | CmpOp::Lt | CmpOp::Ge | CmpOp::Le => {
            let ordering = match (left, right) {
                (Value::Number(_), Value::Number(_)) => {
                    let (x, y) = (
                        left.as_f64().unwrap_or(f64::NAN),
                        right.as_f64().unwrap_or(f64::NAN),
                    );
                    x.partial_cmp(&y).ok_or_else(|| {
                        Error::Validation("numbers are not comparable".into())
                    })?
                }
                (Value::String(x), Value::String(y)) => x.cmp(y),
                (l, r) => {
                    return Err(Error::Validation(format!(
                        "cannot order {l} against {r}"
                    )))
                }
            };
            Ok(match op {
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Le => ordering.is_le(),
                _ => unreachable!(),
            })
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
