//! Template expression resolver.
//!
//! Parameter values are either literals or templates containing
//! `{{ expr }}` spans. A string that is exactly one span evaluates to the
//! expression's native value; spans embedded in larger text are
//! interpolated as strings. Evaluation failures never escape
//! [`resolve`]: a whole-string span becomes `null`, an embedded one
//! renders as `[Error]`.
//!
//! The expression language is a small, side-effect free subset of a
//! scripting language over the variables `$json`, `$execution` and `$now`.

use crate::error::ExpressionError;
use crate::value::{
    compare, display_string, format_number, loose_eq, number_value, strict_eq, to_number, truthy,
    type_name,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue, json};
use std::cmp::Ordering;
use tracing::debug;

/// Rendering of an embedded span that failed to evaluate.
pub const ERROR_MARKER: &str = "[Error]";

/// Variables visible to an expression.
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    /// Payload of the current item.
    pub json: JsonValue,
    /// Run metadata (`id`, `mode`, `workflowId`).
    pub execution: JsonValue,
    /// Evaluation time, exposed as `$now`.
    pub now: DateTime<Utc>,
}

impl ExpressionContext {
    /// Creates a context for an item payload.
    #[must_use]
    pub fn new(json: JsonValue) -> Self {
        Self {
            json,
            execution: JsonValue::Object(Map::new()),
            now: Utc::now(),
        }
    }

    /// Sets the run metadata.
    #[must_use]
    pub fn with_execution(mut self, execution: JsonValue) -> Self {
        self.execution = execution;
        self
    }
}

/// Resolves a parameter value against a context.
///
/// Non-strings and strings without `{{` are returned unchanged.
#[must_use]
pub fn resolve(value: &JsonValue, ctx: &ExpressionContext) -> JsonValue {
    let JsonValue::String(text) = value else {
        return value.clone();
    };
    if !text.contains("{{") {
        return value.clone();
    }

    let segments = split_template(text);
    if let [Segment::Expr(expr)] = segments.as_slice() {
        return match evaluate(expr, ctx) {
            Ok(Some(v)) => v,
            Ok(None) => JsonValue::Null,
            Err(e) => {
                debug!(expression = %expr, error = %e, "expression evaluation failed");
                JsonValue::Null
            }
        };
    }

    let mut out = String::with_capacity(text.len());
    for segment in segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Expr(expr) => match evaluate(expr, ctx) {
                Ok(v) => out.push_str(&display_string(v.as_ref())),
                Err(e) => {
                    debug!(expression = %expr, error = %e, "expression evaluation failed");
                    out.push_str(ERROR_MARKER);
                }
            },
        }
    }
    JsonValue::String(out)
}

/// Resolves every string inside a JSON structure.
#[must_use]
pub fn resolve_deep(value: &JsonValue, ctx: &ExpressionContext) -> JsonValue {
    match value {
        JsonValue::String(_) => resolve(value, ctx),
        JsonValue::Array(items) => {
            JsonValue::Array(items.iter().map(|v| resolve_deep(v, ctx)).collect())
        }
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_deep(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Evaluates a bare expression (without the braces).
///
/// `Ok(None)` means the expression evaluated to `undefined`.
///
/// # Errors
///
/// Returns an error for syntax errors, unknown identifiers and type errors.
pub fn evaluate(
    expression: &str,
    ctx: &ExpressionContext,
) -> Result<Option<JsonValue>, ExpressionError> {
    let syntax = |reason: String| ExpressionError::Syntax {
        expression: expression.trim().to_string(),
        reason,
    };
    let tokens = tokenize(expression).map_err(syntax)?;
    let mut parser = Parser::new(&tokens);
    let (expr, _) = parser.parse_expression().map_err(syntax)?;
    if let Some(token) = parser.peek() {
        return Err(syntax(format!("unexpected token '{token}'")));
    }
    eval(&expr, ctx)
}

enum Segment<'a> {
    Text(&'a str),
    Expr(&'a str),
}

fn split_template(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        segments.push(Segment::Expr(&rest[start + 2..start + 2 + len]));
        rest = &rest[start + 2 + len + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    segments
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", format_number(*n)),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::Ident(s) => write!(f, "{s}"),
            Self::Punct(p) => write!(f, "{p}"),
        }
    }
}

const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", ".", "[", "]", "(", ")", "!", "-",
    "+", "*", "/", "%", "<", ">", "?", ":", ",",
];

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let starts_number = c.is_ascii_digit()
            || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit));
        if starts_number {
            let start = i;
            let mut seen_dot = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || (chars[i] == '.' && !seen_dot)) {
                seen_dot |= chars[i] == '.';
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let n = literal
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{literal}'"))?;
            tokens.push(Token::Num(n));
            continue;
        }

        if matches!(c, '\'' | '"' | '`') {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err("unterminated string".to_string());
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let Some(&escaped) = chars.get(i) else {
                        return Err("unterminated string".to_string());
                    };
                    i += 1;
                    s.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                } else {
                    s.push(ch);
                }
            }
            tokens.push(Token::Str(s));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let punct = PUNCTUATORS.iter().find(|p| {
            p.chars()
                .enumerate()
                .all(|(offset, pc)| chars.get(i + offset) == Some(&pc))
        });
        match punct {
            Some(p) => {
                i += p.len();
                tokens.push(Token::Punct(p));
            }
            None => return Err(format!("unexpected character '{c}'")),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Nullish,
}

impl BinaryOp {
    fn from_punct(p: &str) -> Option<Self> {
        Some(match p {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            "==" => Self::Eq,
            "!=" => Self::NotEq,
            "===" => Self::StrictEq,
            "!==" => Self::StrictNotEq,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "&&" => Self::And,
            "||" => Self::Or,
            "??" => Self::Nullish,
            _ => return None,
        })
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::StrictEq => "===",
            Self::StrictNotEq => "!==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Nullish => "??",
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Option<JsonValue>),
    Ident(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Deepest nesting accepted, both for parser recursion and for the tree
/// it builds. Evaluation and drop recurse over the tree.
const MAX_DEPTH: usize = 128;

/// A parsed subtree and its depth.
type Parsed = Result<(Expr, usize), String>;

fn bounded(depth: usize) -> Result<usize, String> {
    if depth > MAX_DEPTH {
        Err("nesting too deep".to_string())
    } else {
        Ok(depth)
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), String> {
        if self.eat(punct) {
            Ok(())
        } else {
            match self.peek() {
                Some(t) => Err(format!("expected '{punct}' but found '{t}'")),
                None => Err(format!("expected '{punct}' but reached end of input")),
            }
        }
    }

    /// Consumes one of `ops` if it is the next token.
    fn eat_binary(&mut self, ops: &[&str]) -> Option<BinaryOp> {
        let Some(Token::Punct(p)) = self.peek() else {
            return None;
        };
        if !ops.contains(p) {
            return None;
        }
        let op = BinaryOp::from_punct(p);
        self.pos += 1;
        op
    }

    fn parse_expression(&mut self) -> Parsed {
        self.nesting += 1;
        bounded(self.nesting)?;
        let parsed = self.parse_conditional();
        self.nesting -= 1;
        parsed
    }

    fn parse_conditional(&mut self) -> Parsed {
        let (condition, depth) = self.parse_binary(0)?;
        if self.eat("?") {
            let (then, then_depth) = self.parse_expression()?;
            self.expect(":")?;
            let (otherwise, otherwise_depth) = self.parse_expression()?;
            let depth = bounded(1 + depth.max(then_depth).max(otherwise_depth))?;
            return Ok((
                Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise)),
                depth,
            ));
        }
        Ok((condition, depth))
    }

    /// Precedence climbing over the binary operator levels, loosest first.
    fn parse_binary(&mut self, level: usize) -> Parsed {
        const LEVELS: &[&[&str]] = &[
            &["||", "??"],
            &["&&"],
            &["===", "!==", "==", "!="],
            &["<=", ">=", "<", ">"],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        let Some(ops) = LEVELS.get(level) else {
            return self.parse_unary();
        };
        let (mut left, mut depth) = self.parse_binary(level + 1)?;
        while let Some(op) = self.eat_binary(ops) {
            let (right, right_depth) = self.parse_binary(level + 1)?;
            depth = bounded(1 + depth.max(right_depth))?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn parse_unary(&mut self) -> Parsed {
        let mut ops = Vec::new();
        loop {
            let op = if self.eat("!") {
                UnaryOp::Not
            } else if self.eat("-") {
                UnaryOp::Neg
            } else if self.eat("+") {
                UnaryOp::Plus
            } else {
                break;
            };
            ops.push(op);
            bounded(ops.len())?;
        }
        let (mut expr, mut depth) = self.parse_postfix()?;
        for op in ops.into_iter().rev() {
            depth = bounded(depth + 1)?;
            expr = Expr::Unary(op, Box::new(expr));
        }
        Ok((expr, depth))
    }

    fn parse_postfix(&mut self) -> Parsed {
        let (mut expr, mut depth) = self.parse_primary()?;
        loop {
            if self.eat(".") {
                match self.next() {
                    Some(Token::Ident(name)) => {
                        depth = bounded(depth + 1)?;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => return Err("expected property name after '.'".to_string()),
                }
            } else if self.eat("[") {
                let (index, index_depth) = self.parse_expression()?;
                self.expect("]")?;
                depth = bounded(1 + depth.max(index_depth))?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let (args, args_depth) = self.parse_list(")")?;
                depth = bounded(1 + depth.max(args_depth))?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok((expr, depth));
            }
        }
    }

    /// Parses a comma-separated list, returning it with its deepest element.
    fn parse_list(&mut self, close: &str) -> Result<(Vec<Expr>, usize), String> {
        let mut items = Vec::new();
        let mut depth = 0;
        if self.eat(close) {
            return Ok((items, depth));
        }
        loop {
            let (item, item_depth) = self.parse_expression()?;
            items.push(item);
            depth = depth.max(item_depth);
            if self.eat(close) {
                return Ok((items, depth));
            }
            self.expect(",")?;
        }
    }

    fn parse_primary(&mut self) -> Parsed {
        let literal = |value: JsonValue| -> Parsed { Ok((Expr::Literal(Some(value)), 1)) };
        match self.next() {
            Some(Token::Num(n)) => literal(number_value(n)),
            Some(Token::Str(s)) => literal(JsonValue::String(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => literal(JsonValue::Bool(true)),
                "false" => literal(JsonValue::Bool(false)),
                "null" => literal(JsonValue::Null),
                "undefined" => Ok((Expr::Literal(None), 1)),
                _ => Ok((Expr::Ident(name), 1)),
            },
            Some(Token::Punct("(")) => {
                let inner = self.parse_expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => {
                let (items, depth) = self.parse_list("]")?;
                Ok((Expr::Array(items), bounded(depth + 1)?))
            }
            Some(token) => Err(format!("unexpected token '{token}'")),
            None => Err("unexpected end of input".to_string()),
        }
    }
}

type EvalResult = Result<Option<JsonValue>, ExpressionError>;

fn type_error(reason: impl Into<String>) -> ExpressionError {
    ExpressionError::Type {
        reason: reason.into(),
    }
}

fn eval(expr: &Expr, ctx: &ExpressionContext) -> EvalResult {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => match name.as_str() {
            "$json" => Ok(Some(ctx.json.clone())),
            "$execution" => Ok(Some(ctx.execution.clone())),
            "$now" => Ok(Some(JsonValue::String(ctx.now.to_rfc3339()))),
            _ => Err(ExpressionError::UnknownIdentifier { name: name.clone() }),
        },
        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|e| eval(e, ctx).map(|v| v.unwrap_or(JsonValue::Null)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(JsonValue::Array(values)))
        }
        Expr::Member(object, name) => {
            let target = eval(object, ctx)?;
            member(target.as_ref(), name)
        }
        Expr::Index(object, index) => {
            let target = eval(object, ctx)?;
            let key = eval(index, ctx)?;
            match (target.as_ref(), key.as_ref()) {
                (Some(JsonValue::Array(items)), Some(JsonValue::Number(n))) => Ok(n
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get(i))
                    .cloned()),
                (Some(JsonValue::String(s)), Some(JsonValue::Number(n))) => Ok(n
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| JsonValue::String(c.to_string()))),
                _ => member(target.as_ref(), &display_string(key.as_ref())),
            }
        }
        Expr::Call(callee, args) => call(callee, args, ctx),
        Expr::Unary(op, operand) => {
            let value = eval(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(Some(JsonValue::Bool(!truthy(value.as_ref())))),
                UnaryOp::Neg | UnaryOp::Plus => {
                    let n = to_number(value.as_ref()).ok_or_else(|| {
                        type_error(format!("cannot negate {}", type_name(value.as_ref())))
                    })?;
                    Ok(Some(number_value(if *op == UnaryOp::Neg { -n } else { n })))
                }
            }
        }
        Expr::Binary(op, left, right) => binary(*op, left, right, ctx),
        Expr::Conditional(condition, then, otherwise) => {
            if truthy(eval(condition, ctx)?.as_ref()) {
                eval(then, ctx)
            } else {
                eval(otherwise, ctx)
            }
        }
    }
}

fn member(target: Option<&JsonValue>, name: &str) -> EvalResult {
    match target {
        None | Some(JsonValue::Null) => Err(type_error(format!(
            "cannot read property '{name}' of {}",
            type_name(target)
        ))),
        Some(JsonValue::Object(map)) => Ok(map.get(name).cloned()),
        Some(JsonValue::Array(items)) if name == "length" => Ok(Some(json!(items.len()))),
        Some(JsonValue::Array(items)) => Ok(name.parse::<usize>().ok().and_then(|i| items.get(i)).cloned()),
        Some(JsonValue::String(s)) if name == "length" => Ok(Some(json!(s.chars().count()))),
        Some(_) => Ok(None),
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &ExpressionContext) -> EvalResult {
    let lhs = eval(left, ctx)?;
    match op {
        BinaryOp::And if !truthy(lhs.as_ref()) => return Ok(lhs),
        BinaryOp::Or if truthy(lhs.as_ref()) => return Ok(lhs),
        BinaryOp::Nullish if !matches!(lhs, None | Some(JsonValue::Null)) => return Ok(lhs),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => return eval(right, ctx),
        _ => {}
    }
    let rhs = eval(right, ctx)?;
    let (a, b) = (lhs.as_ref(), rhs.as_ref());
    let boolean = |v: bool| Ok(Some(JsonValue::Bool(v)));

    match op {
        BinaryOp::Eq => boolean(loose_eq(a, b)),
        BinaryOp::NotEq => boolean(!loose_eq(a, b)),
        BinaryOp::StrictEq => boolean(strict_eq(a, b)),
        BinaryOp::StrictNotEq => boolean(!strict_eq(a, b)),
        BinaryOp::Lt => boolean(compare(a, b) == Some(Ordering::Less)),
        BinaryOp::Le => boolean(matches!(compare(a, b), Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => boolean(compare(a, b) == Some(Ordering::Greater)),
        BinaryOp::Ge => boolean(matches!(
            compare(a, b),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Add if is_textual(a) || is_textual(b) => Ok(Some(JsonValue::String(format!(
            "{}{}",
            display_string(a),
            display_string(b)
        )))),
        _ => {
            let (Some(x), Some(y)) = (to_number(a), to_number(b)) else {
                return Err(type_error(format!(
                    "cannot apply '{}' to {} and {}",
                    op.symbol(),
                    type_name(a),
                    type_name(b)
                )));
            };
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                _ => x % y,
            };
            if !result.is_finite() {
                return Err(type_error(format!("'{}' produced a non-finite number", op.symbol())));
            }
            Ok(Some(number_value(result)))
        }
    }
}

fn is_textual(value: Option<&JsonValue>) -> bool {
    matches!(
        value,
        Some(JsonValue::String(_) | JsonValue::Array(_) | JsonValue::Object(_))
    )
}

fn call(callee: &Expr, args: &[Expr], ctx: &ExpressionContext) -> EvalResult {
    let values = args
        .iter()
        .map(|a| eval(a, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let arg = |i: usize| values.get(i).and_then(Option::as_ref);

    match callee {
        Expr::Member(object, name) => match object.as_ref() {
            Expr::Ident(global) if global == "Math" => math(name, &values),
            Expr::Ident(global) if global == "JSON" => match name.as_str() {
                "stringify" => Ok(arg(0)
                    .map(|v| JsonValue::String(v.to_string()))),
                "parse" => serde_json::from_str(&display_string(arg(0)))
                    .map(Some)
                    .map_err(|e| type_error(format!("JSON.parse: {e}"))),
                _ => Err(type_error(format!("JSON.{name} is not a function"))),
            },
            _ => {
                let receiver = eval(object, ctx)?;
                method(receiver.as_ref(), name, &values)
            }
        },
        Expr::Ident(name) => match name.as_str() {
            "String" => Ok(Some(JsonValue::String(display_string(arg(0))))),
            "Number" => Ok(Some(to_number(arg(0)).map_or(JsonValue::Null, number_value))),
            "Boolean" => Ok(Some(JsonValue::Bool(truthy(arg(0))))),
            "Math" | "JSON" => Err(type_error(format!("{name} is not a function"))),
            _ => Err(ExpressionError::UnknownIdentifier { name: name.clone() }),
        },
        _ => Err(type_error("expression is not a function")),
    }
}

fn math(name: &str, args: &[Option<JsonValue>]) -> EvalResult {
    let numbers = args
        .iter()
        .map(|a| to_number(a.as_ref()))
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| type_error(format!("Math.{name} expects numbers")))?;
    let first = numbers.first().copied().unwrap_or(f64::NAN);
    let result = match name {
        "abs" => first.abs(),
        "ceil" => first.ceil(),
        "floor" => first.floor(),
        "round" => (first + 0.5).floor(),
        "sqrt" => first.sqrt(),
        "pow" => first.powf(numbers.get(1).copied().unwrap_or(f64::NAN)),
        "min" => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        _ => return Err(type_error(format!("Math.{name} is not a function"))),
    };
    if !result.is_finite() {
        return Err(type_error(format!("Math.{name} produced a non-finite number")));
    }
    Ok(Some(number_value(result)))
}

fn method(receiver: Option<&JsonValue>, name: &str, args: &[Option<JsonValue>]) -> EvalResult {
    let arg_string = |i: usize| display_string(args.get(i).and_then(Option::as_ref));
    let text = |s: String| Ok(Some(JsonValue::String(s)));

    match (receiver, name) {
        (Some(JsonValue::String(s)), "toUpperCase") => text(s.to_uppercase()),
        (Some(JsonValue::String(s)), "toLowerCase") => text(s.to_lowercase()),
        (Some(JsonValue::String(s)), "trim") => text(s.trim().to_string()),
        (Some(JsonValue::String(s)), "includes") => Ok(Some(json!(s.contains(&arg_string(0))))),
        (Some(JsonValue::String(s)), "startsWith") => {
            Ok(Some(json!(s.starts_with(&arg_string(0)))))
        }
        (Some(JsonValue::String(s)), "endsWith") => Ok(Some(json!(s.ends_with(&arg_string(0))))),
        (Some(JsonValue::String(s)), "split") => {
            let separator = arg_string(0);
            let parts: Vec<JsonValue> = if separator.is_empty() {
                s.chars().map(|c| JsonValue::String(c.to_string())).collect()
            } else {
                s.split(separator.as_str())
                    .map(|p| JsonValue::String(p.to_string()))
                    .collect()
            };
            Ok(Some(JsonValue::Array(parts)))
        }
        (Some(JsonValue::Array(items)), "includes") => {
            let needle = args.first().and_then(Option::as_ref);
            Ok(Some(json!(items.iter().any(|i| strict_eq(Some(i), needle)))))
        }
        (Some(JsonValue::Array(items)), "join") => {
            let separator = match args.first() {
                Some(Some(sep)) => display_string(Some(sep)),
                _ => ",".to_string(),
            };
            text(join(items, &separator))
        }
        (Some(JsonValue::Array(items)), "toString") => text(join(items, ",")),
        (Some(JsonValue::Number(n)), "toFixed") => {
            let digits = to_number(args.first().and_then(Option::as_ref))
                .map_or(0, |d| d.clamp(0.0, 20.0) as usize);
            text(format!("{:.*}", digits, n.as_f64().unwrap_or_default()))
        }
        (Some(value), "toString") => text(display_string(Some(value))),
        _ => Err(type_error(format!(
            "{name} is not a function on {}",
            type_name(receiver)
        ))),
    }
}

fn join(items: &[JsonValue], separator: &str) -> String {
    items
        .iter()
        .map(|i| match i {
            JsonValue::Null => String::new(),
            other => display_string(Some(other)),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(json: JsonValue) -> ExpressionContext {
        ExpressionContext::new(json).with_execution(json!({ "id": "run_1", "mode": "workflow" }))
    }

    fn eval_str(expr: &str, json: JsonValue) -> Option<JsonValue> {
        evaluate(expr, &ctx(json)).expect("evaluates")
    }

    #[test]
    fn whole_span_preserves_native_type() {
        let c = ctx(json!({ "x": 5 }));
        assert_eq!(resolve(&json!("{{ $json.x }}"), &c), json!(5));
        assert_eq!(resolve(&json!("{{$json}}"), &c), json!({ "x": 5 }));
    }

    #[test]
    fn embedded_span_interpolates() {
        let c = ctx(json!({ "x": 5 }));
        assert_eq!(resolve(&json!("v={{ $json.x }}"), &c), json!("v=5"));
        assert_eq!(
            resolve(&json!("{{ $json.x }} and {{ $json.x * 2 }}"), &c),
            json!("5 and 10")
        );
    }

    #[test]
    fn non_templates_pass_through() {
        let c = ctx(json!({}));
        assert_eq!(resolve(&json!(42), &c), json!(42));
        assert_eq!(resolve(&json!("plain text"), &c), json!("plain text"));
        assert_eq!(resolve(&json!("{{ unclosed"), &c), json!("{{ unclosed"));
    }

    #[test]
    fn failures_degrade_locally() {
        let c = ctx(json!({}));
        assert_eq!(resolve(&json!("{{ nope }}"), &c), JsonValue::Null);
        assert_eq!(resolve(&json!("a {{ nope }} b"), &c), json!("a [Error] b"));
        assert_eq!(resolve(&json!("a {{ $json.missing }} b"), &c), json!("a  b"));
        assert_eq!(resolve(&json!("{{ $json.missing.deeper }}"), &c), JsonValue::Null);
    }

    #[test]
    fn resolve_deep_walks_structures() {
        let c = ctx(json!({ "name": "Ada" }));
        let value = json!({ "greeting": "hi {{ $json.name }}", "list": ["{{ $json.name }}", 1] });
        assert_eq!(
            resolve_deep(&value, &c),
            json!({ "greeting": "hi Ada", "list": ["Ada", 1] })
        );
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(eval_str("1 + 2 * 3", json!({})), Some(json!(7)));
        assert_eq!(eval_str("(1 + 2) * 3", json!({})), Some(json!(9)));
        assert_eq!(eval_str("7 % 4 - -1", json!({})), Some(json!(4)));
        assert_eq!(eval_str("'n=' + $json.n", json!({ "n": 2 })), Some(json!("n=2")));
        assert_eq!(eval_str("10 / 4", json!({})), Some(json!(2.5)));
        assert!(evaluate("1 / 0", &ctx(json!({}))).is_err());
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval_str("$json.n >= 3 && $json.n < 5", json!({ "n": 4 })), Some(json!(true)));
        assert_eq!(eval_str("$json.s == 5", json!({ "s": "5" })), Some(json!(true)));
        assert_eq!(eval_str("$json.s === 5", json!({ "s": "5" })), Some(json!(false)));
        assert_eq!(eval_str("$json.a || 'fallback'", json!({})), Some(json!("fallback")));
        assert_eq!(eval_str("$json.a ?? 0", json!({ "a": false })), Some(json!(false)));
        assert_eq!(eval_str("$json.n > 1 ? 'big' : 'small'", json!({ "n": 2 })), Some(json!("big")));
        assert_eq!(eval_str("!$json.flag", json!({ "flag": true })), Some(json!(false)));
    }

    #[test]
    fn member_and_index_access() {
        let data = json!({ "items": [{ "id": 1 }, { "id": 2 }], "key": "id", "name": "Ada" });
        assert_eq!(eval_str("$json.items[1].id", data.clone()), Some(json!(2)));
        assert_eq!(eval_str("$json.items[0][$json.key]", data.clone()), Some(json!(1)));
        assert_eq!(eval_str("$json.items.length", data.clone()), Some(json!(2)));
        assert_eq!(eval_str("$json.name.length", data.clone()), Some(json!(3)));
        assert_eq!(eval_str("$json['name']", data), Some(json!("Ada")));
    }

    #[test]
    fn methods_and_globals() {
        let data = json!({ "s": " Hello ", "tags": ["a", "b"], "price": 3.14159 });
        assert_eq!(eval_str("$json.s.trim().toUpperCase()", data.clone()), Some(json!("HELLO")));
        assert_eq!(eval_str("$json.tags.join('-')", data.clone()), Some(json!("a-b")));
        assert_eq!(eval_str("$json.tags.includes('b')", data.clone()), Some(json!(true)));
        assert_eq!(eval_str("'a,b'.split(',')", data.clone()), Some(json!(["a", "b"])));
        assert_eq!(eval_str("$json.price.toFixed(2)", data.clone()), Some(json!("3.14")));
        assert_eq!(eval_str("Math.max(1, 5, 3)", data.clone()), Some(json!(5)));
        assert_eq!(eval_str("Math.round(2.5)", data.clone()), Some(json!(3)));
        assert_eq!(eval_str("JSON.stringify($json.tags)", data.clone()), Some(json!(r#"["a","b"]"#)));
        assert_eq!(eval_str("JSON.parse('{\"a\":1}').a", data.clone()), Some(json!(1)));
        assert_eq!(eval_str("Number('42') + 1", data.clone()), Some(json!(43)));
        assert_eq!(eval_str("String(12)", data), Some(json!("12")));
    }

    #[test]
    fn execution_and_now_are_visible() {
        assert_eq!(eval_str("$execution.id", json!({})), Some(json!("run_1")));
        let now = eval_str("$now", json!({})).expect("defined");
        assert!(now.as_str().is_some_and(|s| s.contains('T')));
    }

    #[test]
    fn unknown_identifiers_are_rejected() {
        let err = evaluate("process.exit()", &ctx(json!({}))).unwrap_err();
        assert_eq!(
            err,
            ExpressionError::UnknownIdentifier {
                name: "process".to_string()
            }
        );
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = evaluate("1 +", &ctx(json!({}))).unwrap_err();
        assert!(matches!(err, ExpressionError::Syntax { .. }));
        let err = evaluate("'open", &ctx(json!({}))).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
        assert!(evaluate("1 2", &ctx(json!({}))).is_err());
    }

    #[test]
    fn deep_nesting_is_rejected_without_exhausting_the_stack() {
        let templates = [
            format!("{{{{ {}1 }}}}", "!".repeat(100_000)),
            format!("{{{{ {}1{} }}}}", "(".repeat(100_000), ")".repeat(100_000)),
            format!("{{{{ $json{} }}}}", ".a".repeat(100_000)),
            format!("{{{{ 1{} }}}}", " + 1".repeat(100_000)),
        ];
        let outcome = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                templates
                    .iter()
                    .map(|t| resolve(&json!(t), &ctx(json!({}))))
                    .collect::<Vec<_>>()
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(outcome.iter().all(JsonValue::is_null), "{outcome:?}");

        let err = evaluate(&format!("{}1", "-".repeat(500)), &ctx(json!({}))).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"));
        let inline = resolve(&json!(format!("x={{{{ {}1 }}}}", "!".repeat(1000))), &ctx(json!({})));
        assert_eq!(inline, json!(format!("x={ERROR_MARKER}")));
    }

    #[test]
    fn moderate_nesting_still_evaluates() {
        let sum = format!("1{}", " + 1".repeat(100));
        assert_eq!(eval_str(&sum, json!({})), Some(json!(101)));
        assert_eq!(eval_str("((((2 * 3))))", json!({})), Some(json!(6)));
        assert_eq!(eval_str("!!!true", json!({})), Some(json!(false)));
    }
}
