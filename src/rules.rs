//! Sandboxed expression language for policy rules.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!` (short-circuiting)
//! - Membership: `x in list`
//! - Dot-path access: `principalId`, `request.labels.env`
//! - Literals: integers, floats, `"strings"`, `true`, `false`
//! - Relation calls: `rel("relation")`, `full("relation", object)`, the
//!   only two callable functions; anything else is a compile error
//! - Parentheses for grouping
//!
//! Compilation is context-independent (unknown identifiers read as null at
//! evaluation time), so a compiled rule can be cached by its source string
//! and shared across requests. Rule size is capped at compile time:
//! overly long or too deeply nested input is a parse error.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::errors::RuleError;

/// The two predicates a rule may call, bound to request state by the
/// caller. Relation checks go through here and nowhere else.
#[async_trait]
pub trait RelationPredicates: Send + Sync {
    /// Does the principal have `relation` on the request's resource?
    async fn rel(&self, relation: &str) -> bool;
    /// Does the principal have `relation` on an arbitrary `object`?
    async fn full(&self, relation: &str, object: &str) -> bool;
}

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    Path(Vec<String>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Func {
    Rel,
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

// ─── Parser ─────────────────────────────────────────────────────────────

const MAX_DEPTH: usize = 128;
const MAX_TOKENS: usize = 1024;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,  // ==
    Ne,  // !=
    Gt,  // >
    Lt,  // <
    Ge,  // >=
    Le,  // <=
    And, // &&
    Or,  // ||
    Not, // !
    In,  // in
}

fn tokenize(input: &str) -> Result<Vec<Token>, RuleError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
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
            '=' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1; // skip escaped char
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(RuleError::Parse("unterminated string literal".into()));
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(Token::Str(s));
                i += 1; // skip closing quote
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                if num_str.contains('.') {
                    let f: f64 = num_str
                        .parse()
                        .map_err(|_| RuleError::Parse(format!("invalid float `{num_str}`")))?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = num_str
                        .parse()
                        .map_err(|_| RuleError::Parse(format!("invalid integer `{num_str}`")))?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(RuleError::Parse(format!("unexpected character `{c}`")));
            }
        }
    }
    Ok(tokens)
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect_rparen(&mut self) -> Result<(), RuleError> {
        if self.advance() != Some(Token::RParen) {
            return Err(RuleError::Parse("expected closing parenthesis `)`".into()));
        }
        Ok(())
    }

    /// Entry: parse_or
    fn parse_expr(&mut self) -> Result<Expr, RuleError> {
        self.parse_or()
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// comparison = unary (("==" | "!=" | ">" | "<" | ">=" | "<=" | "in") unary)?
    fn parse_comparison(&mut self) -> Result<Expr, RuleError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Le) => BinOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_unary()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// unary = "!" unary | primary
    /// Every recursion cycle in the grammar passes through this production,
    /// so one depth check here bounds every nesting form the grammar allows.
    fn parse_unary(&mut self) -> Result<Expr, RuleError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(RuleError::Parse("expression too deeply nested".into()));
        }
        let expr = if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            Expr::UnaryNot(Box::new(inner))
        } else {
            self.parse_primary()?
        };
        self.depth -= 1;
        Ok(expr)
    }

    /// primary = literal | call | path | "(" expr ")"
    fn parse_primary(&mut self) -> Result<Expr, RuleError> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Int(n)))
            }
            Some(Token::Float(f)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Float(f)))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Str(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(false)))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.peek() == Some(&Token::LParen) {
                    return self.parse_call(&name);
                }
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => {
                            return Err(RuleError::Parse("expected identifier after `.`".into()));
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            other => Err(RuleError::Parse(format!("unexpected token: {other:?}"))),
        }
    }

    /// call = name "(" expr ("," expr)* ")"
    /// Name and arity are checked against the whitelist here, at compile time.
    fn parse_call(&mut self, name: &str) -> Result<Expr, RuleError> {
        let (func, arity) = match name {
            "rel" => (Func::Rel, 1),
            "full" => (Func::Full, 2),
            other => return Err(RuleError::UnknownFunction(other.to_string())),
        };
        self.advance(); // consume `(`
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_rparen()?;
        if args.len() != arity {
            return Err(RuleError::Parse(format!(
                "{name}() takes exactly {arity} argument(s), got {}",
                args.len()
            )));
        }
        Ok(Expr::Call { func, args })
    }
}

/// Parse a rule string into an AST. Pure syntax plus the call whitelist;
/// no context is consulted. Input is bounded: at most `MAX_TOKENS` tokens
/// and `MAX_DEPTH` nesting levels.
pub fn parse_rule(input: &str) -> Result<Expr, RuleError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(RuleError::Parse("empty expression".into()));
    }
    // The token cap also bounds flat operator chains like `a && b && ...`,
    // which build a deep left-leaning tree without any parser recursion.
    if tokens.len() > MAX_TOKENS {
        return Err(RuleError::Parse(format!(
            "expression too long: {} tokens (limit {MAX_TOKENS})",
            tokens.len()
        )));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(RuleError::Parse(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

/// Compiled-rule cache keyed by the exact source string.
#[derive(Debug, Default)]
pub struct RuleCompiler {
    cache: DashMap<String, Arc<Expr>>,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source`, reusing the cached program when the same source
    /// was compiled before.
    pub fn compile(&self, source: &str) -> Result<Arc<Expr>, RuleError> {
        if let Some(expr) = self.cache.get(source) {
            return Ok(expr.clone());
        }
        let expr = Arc::new(parse_rule(source)?);
        self.cache.insert(source.to_string(), expr.clone());
        Ok(expr)
    }
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// Evaluate a parsed rule against a JSON context, resolving `rel`/`full`
/// through `predicates`. The result must be a boolean.
pub async fn evaluate(
    expr: &Expr,
    context: &Value,
    predicates: &dyn RelationPredicates,
) -> Result<bool, RuleError> {
    match eval_value(expr, context, predicates).await? {
        EvalResult::Bool(b) => Ok(b),
        other => Err(RuleError::Type(format!(
            "rule must evaluate to boolean, got: {other:?}"
        ))),
    }
}

#[derive(Debug, Clone)]
enum EvalResult {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Array(Vec<EvalResult>),
    Null,
}

impl EvalResult {
    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalResult::Int(n) => Some(*n as f64),
            EvalResult::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn into_str(self, func: &str) -> Result<String, RuleError> {
        match self {
            EvalResult::Str(s) => Ok(s),
            other => Err(RuleError::Type(format!(
                "{func}() arguments must be strings, got: {other:?}"
            ))),
        }
    }
}

impl PartialEq for EvalResult {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EvalResult::Int(a), EvalResult::Int(b)) => a == b,
            (EvalResult::Float(a), EvalResult::Float(b)) => a == b,
            (EvalResult::Int(a), EvalResult::Float(b)) => (*a as f64) == *b,
            (EvalResult::Float(a), EvalResult::Int(b)) => *a == (*b as f64),
            (EvalResult::Str(a), EvalResult::Str(b)) => a == b,
            (EvalResult::Bool(a), EvalResult::Bool(b)) => a == b,
            (EvalResult::Null, EvalResult::Null) => true,
            _ => false,
        }
    }
}

fn expect_bool(value: EvalResult, op: &str) -> Result<bool, RuleError> {
    match value {
        EvalResult::Bool(b) => Ok(b),
        _ => Err(RuleError::Type(format!("`{op}` requires boolean operands"))),
    }
}

// Relation calls make evaluation async, and async recursion needs boxing.
fn eval_value<'a>(
    expr: &'a Expr,
    context: &'a Value,
    predicates: &'a dyn RelationPredicates,
) -> BoxFuture<'a, Result<EvalResult, RuleError>> {
    Box::pin(async move {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                LitValue::Int(n) => EvalResult::Int(*n),
                LitValue::Float(f) => EvalResult::Float(*f),
                LitValue::Str(s) => EvalResult::Str(s.clone()),
                LitValue::Bool(b) => EvalResult::Bool(*b),
            }),
            Expr::Path(segments) => {
                let mut current = context;
                for seg in segments {
                    current = current.get(seg).unwrap_or(&Value::Null);
                }
                Ok(json_to_eval(current))
            }
            Expr::UnaryNot(inner) => {
                let val = eval_value(inner, context, predicates).await?;
                match val {
                    EvalResult::Bool(b) => Ok(EvalResult::Bool(!b)),
                    _ => Err(RuleError::Type(
                        "`!` operator requires a boolean operand".into(),
                    )),
                }
            }
            Expr::In {
                element,
                collection,
            } => {
                let elem = eval_value(element, context, predicates).await?;
                let coll = eval_value(collection, context, predicates).await?;
                match coll {
                    EvalResult::Array(items) => Ok(EvalResult::Bool(items.contains(&elem))),
                    _ => Err(RuleError::Type(
                        "`in` operator requires an array on the right side".into(),
                    )),
                }
            }
            Expr::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_value(arg, context, predicates).await?);
                }
                match func {
                    Func::Rel => {
                        let mut values = values.into_iter();
                        let relation = match values.next() {
                            Some(v) => v.into_str("rel")?,
                            None => return Err(RuleError::Type("rel() missing argument".into())),
                        };
                        Ok(EvalResult::Bool(predicates.rel(&relation).await))
                    }
                    Func::Full => {
                        let mut values = values.into_iter();
                        let (relation, object) = match (values.next(), values.next()) {
                            (Some(r), Some(o)) => (r.into_str("full")?, o.into_str("full")?),
                            _ => return Err(RuleError::Type("full() missing arguments".into())),
                        };
                        Ok(EvalResult::Bool(predicates.full(&relation, &object).await))
                    }
                }
            }
            Expr::BinOp { op, left, right } => match op {
                // && and || short-circuit so a decided expression never
                // triggers relation calls from its unevaluated side.
                BinOp::And => {
                    let l = eval_value(left, context, predicates).await?;
                    if !expect_bool(l, "&&")? {
                        return Ok(EvalResult::Bool(false));
                    }
                    let r = eval_value(right, context, predicates).await?;
                    Ok(EvalResult::Bool(expect_bool(r, "&&")?))
                }
                BinOp::Or => {
                    let l = eval_value(left, context, predicates).await?;
                    if expect_bool(l, "||")? {
                        return Ok(EvalResult::Bool(true));
                    }
                    let r = eval_value(right, context, predicates).await?;
                    Ok(EvalResult::Bool(expect_bool(r, "||")?))
                }
                BinOp::Eq | BinOp::Ne => {
                    let l = eval_value(left, context, predicates).await?;
                    let r = eval_value(right, context, predicates).await?;
                    let equal = l == r;
                    Ok(EvalResult::Bool(if *op == BinOp::Eq { equal } else { !equal }))
                }
                BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
                    let l = eval_value(left, context, predicates).await?;
                    let r = eval_value(right, context, predicates).await?;
                    let lf = l.as_f64().ok_or_else(|| {
                        RuleError::Type("comparison operator requires numeric operands".into())
                    })?;
                    let rf = r.as_f64().ok_or_else(|| {
                        RuleError::Type("comparison operator requires numeric operands".into())
                    })?;
                    let result = match op {
                        BinOp::Gt => lf > rf,
                        BinOp::Lt => lf < rf,
                        BinOp::Ge => lf >= rf,
                        BinOp::Le => lf <= rf,
                        _ => unreachable!(),
                    };
                    Ok(EvalResult::Bool(result))
                }
            },
        }
    })
}

fn json_to_eval(value: &Value) -> EvalResult {
    match value {
        Value::Null => EvalResult::Null,
        Value::Bool(b) => EvalResult::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvalResult::Int(i)
            } else if let Some(f) = n.as_f64() {
                EvalResult::Float(f)
            } else {
                EvalResult::Null
            }
        }
        Value::String(s) => EvalResult::Str(s.clone()),
        Value::Array(arr) => EvalResult::Array(arr.iter().map(json_to_eval).collect()),
        Value::Object(_) => EvalResult::Null, // objects not directly comparable
    }
}
