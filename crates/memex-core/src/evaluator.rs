//! # Expression Evaluator
//!
//! A closed arithmetic/logic sandbox over path references.
//!
//! ## Grammar
//!
//! - Identifiers: `seg(.seg)*` where `seg` is `[A-Za-z_][A-Za-z0-9_]*` followed
//!   by any number of bracket groups (`["k"]`, `['k']`, `[1]`)
//! - `__ptr.rest` resolves `rest` under the target of the pointer stored at the
//!   evaluation scope
//! - Literals: decimal numbers (optional exponent) and the reserved words
//!   `true`, `false`, `null`, `undefined`, `NaN`, `Infinity`
//! - Operators by precedence: unary `-` `!` (7, right-assoc), `* / %` (6),
//!   `+ -` (5), `< <= > >=` (4), `== !=` (3), `&&` (2), `||` (1)
//!
//! Tokens are converted to postfix with an explicit operator stack, checking
//! adjacency as they go, and the postfix form is run on a value stack.
//!
//! ## Failure
//!
//! Every failure (disallowed character, malformed syntax, unresolved
//! identifier, non-finite arithmetic) yields `None`. Nothing here panics and
//! nothing here calls back into host code other than [`Resolve`].

use crate::primitives::POINTER_NAMESPACE;
use crate::{SemanticPath, Value};

// =============================================================================
// RESOLVER SEAM
// =============================================================================

/// Read access the evaluator needs from its host store.
pub trait Resolve {
    /// Read a (possibly selector-bearing) path the way a public read does.
    fn read_path(&self, path: &SemanticPath) -> Option<Value>;

    /// The raw index entry stored exactly at `path`.
    fn index_entry(&self, path: &SemanticPath) -> Option<Value>;
}

// =============================================================================
// TOKENS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Neg,
    Not,
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl Op {
    const fn precedence(self) -> u8 {
        match self {
            Self::Neg | Self::Not => 7,
            Self::Mul | Self::Div | Self::Rem => 6,
            Self::Add | Self::Sub => 5,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Eq | Self::Ne => 3,
            Self::And => 2,
            Self::Or => 1,
        }
    }

    const fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Not)
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            "+" => Self::Add,
            "-" => Self::Sub,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "&&" => Self::And,
            "||" => Self::Or,
            "!" => Self::Not,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Identifier(String),
    Op(Op),
    LParen,
    RParen,
}

const TWO_CHAR_OPS: [&str; 6] = [">=", "<=", "==", "!=", "&&", "||"];

fn reserved_literal(word: &str) -> Option<Value> {
    Some(match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" | "undefined" => Value::Null,
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        _ => return None,
    })
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            '_' | '+' | '-' | '*' | '/' | '%' | '(' | ')' | '.' | '<' | '>' | '=' | '!' | '&'
                | '|' | '[' | ']' | '"' | '\''
        )
}

fn tokenize(raw: &str) -> Option<Vec<Token>> {
    let bytes = raw.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        match b {
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
                continue;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
                continue;
            }
            _ => {}
        }

        if let Some(two) = raw.get(i..i + 2) {
            if TWO_CHAR_OPS.contains(&two) {
                tokens.push(Token::Op(Op::from_symbol(two)?));
                i += 2;
                continue;
            }
        }

        if matches!(b, b'+' | b'-' | b'*' | b'/' | b'%' | b'<' | b'>' | b'!') {
            tokens.push(Token::Op(Op::from_symbol(raw.get(i..=i)?)?));
            i += 1;
            continue;
        }

        let next_is_digit = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        if b.is_ascii_digit() || (b == b'.' && next_is_digit) {
            let end = scan_number(bytes, i)?;
            let n: f64 = raw.get(i..end)?.parse().ok()?;
            if !n.is_finite() {
                return None;
            }
            tokens.push(Token::Literal(Value::Number(n)));
            i = end;
            continue;
        }

        if b.is_ascii_alphabetic() || b == b'_' {
            let end = scan_identifier(raw, i);
            let word = raw.get(i..end)?;
            match reserved_literal(word) {
                Some(literal) => tokens.push(Token::Literal(literal)),
                None => tokens.push(Token::Identifier(word.to_string())),
            }
            i = end;
            continue;
        }

        return None;
    }
    Some(tokens)
}

/// End of a decimal literal starting at `start`. `None` on a dangling exponent.
fn scan_number(bytes: &[u8], start: usize) -> Option<usize> {
    let digits = |mut j: usize| {
        while bytes.get(j).is_some_and(u8::is_ascii_digit) {
            j += 1;
        }
        j
    };
    let mut j = digits(start);
    if bytes.get(j) == Some(&b'.') {
        j = digits(j + 1);
    }
    if matches!(bytes.get(j), Some(b'e' | b'E')) {
        let mut k = j + 1;
        if matches!(bytes.get(k), Some(b'+' | b'-')) {
            k += 1;
        }
        let after = digits(k);
        if after == k {
            return None;
        }
        j = after;
    }
    Some(j)
}

/// End of the identifier chain starting at `start`.
fn scan_identifier(raw: &str, start: usize) -> usize {
    let bytes = raw.as_bytes();
    let mut i = start;
    loop {
        // segment head
        while bytes
            .get(i)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            i += 1;
        }
        while bytes.get(i) == Some(&b'[') {
            match scan_bracket(bytes, i) {
                Some(end) => i = end,
                None => return i,
            }
        }
        let continues = bytes.get(i) == Some(&b'.')
            && bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_');
        if !continues {
            return i;
        }
        i += 1;
    }
}

/// End (one past `]`) of the bracket group opening at `open`.
fn scan_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let body = open + 1;
    if let Some(&q) = bytes.get(body).filter(|b| matches!(**b, b'"' | b'\'')) {
        let close_quote = bytes[body + 1..].iter().position(|&b| b == q);
        if let Some(offset) = close_quote {
            let after = body + 1 + offset + 1;
            if bytes.get(after) == Some(&b']') {
                return Some(after + 1);
            }
        }
    }
    let close = bytes[body..].iter().position(|&b| b == b']')?;
    (close > 0).then_some(body + close + 1)
}

// =============================================================================
// POSTFIX CONVERSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Value,
    Op,
    LParen,
    RParen,
}

enum Stacked {
    Op(Op),
    LParen,
}

fn to_postfix(tokens: Vec<Token>) -> Option<Vec<Token>> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut ops: Vec<Stacked> = Vec::new();
    let mut prev = Prev::Start;

    for token in tokens {
        let after_operand = matches!(prev, Prev::Value | Prev::RParen);
        match token {
            Token::Literal(_) | Token::Identifier(_) => {
                if after_operand {
                    return None;
                }
                out.push(token);
                prev = Prev::Value;
            }
            Token::LParen => {
                if after_operand {
                    return None;
                }
                ops.push(Stacked::LParen);
                prev = Prev::LParen;
            }
            Token::RParen => {
                if !after_operand {
                    return None;
                }
                loop {
                    match ops.pop()? {
                        Stacked::LParen => break,
                        Stacked::Op(op) => out.push(Token::Op(op)),
                    }
                }
                prev = Prev::RParen;
            }
            Token::Op(symbol) => {
                let op = match symbol {
                    Op::Sub if !after_operand => Op::Neg,
                    Op::Not if after_operand => return None,
                    other if !other.is_unary() && !after_operand => return None,
                    other => other,
                };
                while let Some(Stacked::Op(top)) = ops.last() {
                    let should_pop = if op.is_unary() {
                        op.precedence() < top.precedence()
                    } else {
                        op.precedence() <= top.precedence()
                    };
                    if !should_pop {
                        break;
                    }
                    out.push(Token::Op(*top));
                    ops.pop();
                }
                ops.push(Stacked::Op(op));
                prev = Prev::Op;
            }
        }
    }

    if matches!(prev, Prev::Start | Prev::Op | Prev::LParen) {
        return None;
    }
    while let Some(top) = ops.pop() {
        match top {
            Stacked::LParen => return None,
            Stacked::Op(op) => out.push(Token::Op(op)),
        }
    }
    Some(out)
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Evaluate `expr` with identifiers resolved against `scope`.
///
/// Returns a finite `Number` or a `Bool`; `None` when the expression cannot
/// be evaluated, in which case callers keep the raw expression text.
pub fn evaluate<R: Resolve + ?Sized>(
    expr: &str,
    scope: &SemanticPath,
    resolver: &R,
) -> Option<Value> {
    let result = evaluate_inner(expr, scope, resolver);
    if result.is_none() {
        tracing::trace!(expr, scope = %scope, "expression declined to evaluate");
    }
    result
}

fn evaluate_inner<R: Resolve + ?Sized>(
    expr: &str,
    scope: &SemanticPath,
    resolver: &R,
) -> Option<Value> {
    let raw = expr.trim();
    if raw.is_empty() || !raw.chars().all(is_allowed_char) {
        return None;
    }
    let tokens = tokenize(raw)?;
    if tokens.is_empty() {
        return None;
    }
    let postfix = to_postfix(tokens)?;

    let mut stack: Vec<Value> = Vec::new();
    for token in postfix {
        match token {
            Token::Literal(value) => stack.push(value),
            Token::Identifier(label) => stack.push(resolve_identifier(&label, scope, resolver)?),
            Token::Op(op) if op.is_unary() => {
                let a = stack.pop()?;
                stack.push(apply_unary(op, &a)?);
            }
            Token::Op(op) => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.push(apply_binary(op, &a, &b)?);
            }
            Token::LParen | Token::RParen => return None,
        }
    }

    if stack.len() != 1 {
        return None;
    }
    match stack.pop()? {
        Value::Number(n) if n.is_finite() => Some(Value::Number(n)),
        Value::Bool(b) => Some(Value::Bool(b)),
        _ => None,
    }
}

fn apply_unary(op: Op, a: &Value) -> Option<Value> {
    match op {
        Op::Neg => Some(Value::Number(-a.to_finite_number()?)),
        Op::Not => Some(Value::Bool(!a.is_truthy())),
        _ => None,
    }
}

fn apply_binary(op: Op, a: &Value, b: &Value) -> Option<Value> {
    match op {
        Op::And => return Some(Value::Bool(a.is_truthy() && b.is_truthy())),
        Op::Or => return Some(Value::Bool(a.is_truthy() || b.is_truthy())),
        Op::Eq => return Some(Value::Bool(a.loose_eq(b))),
        Op::Ne => return Some(Value::Bool(!a.loose_eq(b))),
        _ => {}
    }

    let x = a.to_finite_number()?;
    let y = b.to_finite_number()?;
    let result = match op {
        Op::Lt => return Some(Value::Bool(x < y)),
        Op::Le => return Some(Value::Bool(x <= y)),
        Op::Gt => return Some(Value::Bool(x > y)),
        Op::Ge => return Some(Value::Bool(x >= y)),
        Op::Add => x + y,
        Op::Sub => x - y,
        Op::Mul => x * y,
        Op::Div => x / y,
        Op::Rem => x % y,
        _ => return None,
    };
    result.is_finite().then_some(Value::Number(result))
}

/// Resolve one identifier: scope-relative first, then absolute.
/// `Null` counts as unresolved.
fn resolve_identifier<R: Resolve + ?Sized>(
    label: &str,
    scope: &SemanticPath,
    resolver: &R,
) -> Option<Value> {
    let present = |v: Option<Value>| v.filter(|v| *v != Value::Null);

    if let Some(rest) = label
        .strip_prefix(POINTER_NAMESPACE)
        .and_then(|r| r.strip_prefix('.'))
    {
        let entry = resolver.index_entry(scope)?;
        let target = SemanticPath::parse(entry.as_pointer()?);
        return present(resolver.read_path(&target.join(&SemanticPath::parse(rest))));
    }

    let relative = SemanticPath::parse(label);
    present(resolver.read_path(&scope.join(&relative)))
        .or_else(|| present(resolver.read_path(&relative)))
}

/// Distinct identifier labels in `expr`, in first-seen order. Reserved words
/// are excluded. An expression that does not tokenize has no references.
#[must_use]
pub fn extract_references(expr: &str) -> Vec<String> {
    let Some(tokens) = tokenize(expr.trim()) else {
        return Vec::new();
    };
    let mut refs: Vec<String> = Vec::new();
    for token in tokens {
        if let Token::Identifier(label) = token {
            if !refs.contains(&label) {
                refs.push(label);
            }
        }
    }
    refs
}

// =============================================================================
// TESTS
// =============================================================================
