//! Expression Sandbox
//!
//! A deliberately small language for expression props: literals, dotted
//! paths, arithmetic, comparison, boolean logic, a ternary and a handful of
//! pure builtins. Evaluation sees only the variables it is handed and is
//! bounded by a gas limit.

use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Maximum nesting depth accepted by the parser.
pub const MAX_DEPTH: usize = 64;

/// Default gas limit for one evaluation.
pub const DEFAULT_GAS_LIMIT: u64 = 10_000;

pub const BUILTINS: &[&str] = &["len", "upper", "lower", "concat", "coalesce", "not_empty"];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("`{name}` expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("gas exhausted after {0} steps")]
    GasExhausted(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Get(Box<Expr>, Segment),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Root identifiers referenced anywhere in the expression.
    pub fn roots(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_roots(&mut out);
        out
    }

    fn collect_roots(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Get(inner, _) | Expr::Unary(_, inner) => inner.collect_roots(out),
            Expr::Binary(_, l, r) => {
                l.collect_roots(out);
                r.collect_roots(out);
            }
            Expr::Ternary(c, t, e) => {
                c.collect_roots(out);
                t.collect_roots(out);
                e.collect_roots(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_roots(out)),
        }
    }

    /// Function names called anywhere in the expression.
    pub fn calls(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Get(inner, _) | Expr::Unary(_, inner) => inner.collect_calls(out),
            Expr::Binary(_, l, r) => {
                l.collect_calls(out);
                r.collect_calls(out);
            }
            Expr::Ternary(c, t, e) => {
                c.collect_calls(out);
                t.collect_calls(out);
                e.collect_calls(out);
            }
            Expr::Call(name, args) => {
                out.insert(name.clone());
                args.iter().for_each(|a| a.collect_calls(out));
            }
        }
    }
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "&&", "||", "==", "!=", "<=", ">=", "(", ")", "[", "]", ".", ",", "?", ":", "!", "+", "-",
    "*", "/", "%", "<", ">",
];

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                // a trailing `.` followed by a letter is member access, not a decimal point
                if chars[i] == '.' && !chars.get(i + 1).map_or(false, |n| n.is_ascii_digit()) {
                    break;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse::<f64>().map_err(|_| ExpressionError::Syntax {
                position: start,
                message: format!("bad number `{}`", text),
            })?;
            tokens.push((start, Token::Number(n)));
        } else if c == '"' || c == '\'' {
            let start = i;
            i += 1;
            let mut text = String::new();
            loop {
                match chars.get(i) {
                    None => {
                        return Err(ExpressionError::Syntax {
                            position: start,
                            message: "unterminated string".to_string(),
                        })
                    }
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(*other),
                            None => {
                                return Err(ExpressionError::Syntax {
                                    position: i,
                                    message: "dangling escape".to_string(),
                                })
                            }
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == c => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push((start, Token::Str(text)));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let punct = PUNCTUATION
                .iter()
                .find(|p| rest.starts_with(**p))
                .ok_or_else(|| ExpressionError::Syntax {
                    position: i,
                    message: format!("unexpected character `{}`", c),
                })?;
            tokens.push((i, Token::Punct(*punct)));
            i += punct.len();
        }
    }
    Ok(tokens)
}

// --- Parser ---

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
    end: usize,
}

/// Parse expression source text.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end: source.len(),
    };
    let expr = parser.ternary()?;
    if let Some((position, token)) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::Syntax {
            position: *position,
            message: format!("unexpected trailing {:?}", token),
        });
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExpressionError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", punct)))
        }
    }

    fn error(&self, message: String) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position(),
            message,
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(ExpressionError::TooDeep)
        } else {
            Ok(())
        }
    }

    fn ternary(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let cond = self.binary(0)?;
        let expr = if self.eat("?") {
            let then = self.ternary()?;
            self.expect(":")?;
            let otherwise = self.ternary()?;
            Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(expr)
    }

    /// Precedence climbing over the binary operator table.
    fn binary(&mut self, min_level: usize) -> Result<Expr, ExpressionError> {
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[("<=", BinaryOp::Le), (">=", BinaryOp::Ge), ("<", BinaryOp::Lt), (">", BinaryOp::Gt)],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];
        if min_level == LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(min_level + 1)?;
        // each chained operator nests the left operand one level deeper
        let mut chained = 0;
        'outer: loop {
            for (punct, op) in LEVELS[min_level] {
                if self.eat(punct) {
                    self.enter()?;
                    chained += 1;
                    let right = self.binary(min_level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            self.depth -= chained;
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat("!") {
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        if self.eat("-") {
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        let mut chained = 0;
        loop {
            if self.eat(".") {
                self.enter()?;
                chained += 1;
                match self.tokens.get(self.pos).cloned() {
                    Some((_, Token::Ident(name))) => {
                        self.pos += 1;
                        expr = Expr::Get(Box::new(expr), Segment::Field(name));
                    }
                    _ => return Err(self.error("expected field name after `.`".to_string())),
                }
            } else if self.eat("[") {
                self.enter()?;
                chained += 1;
                let index = match self.tokens.get(self.pos).cloned() {
                    Some((_, Token::Number(n))) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                    _ => return Err(self.error("expected non-negative integer index".to_string())),
                };
                self.pos += 1;
                self.expect("]")?;
                expr = Expr::Get(Box::new(expr), Segment::Index(index));
            } else {
                self.depth -= chained;
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some((_, token)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error("unexpected end of expression".to_string()));
        };
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Expr::Literal(number(n)?)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat("(") => {
                    self.enter()?;
                    let mut args = Vec::new();
                    if !self.eat(")") {
                        loop {
                            args.push(self.ternary()?);
                            if self.eat(")") {
                                break;
                            }
                            self.expect(",")?;
                        }
                    }
                    self.depth -= 1;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Var(name)),
            },
            Token::Punct("(") => {
                let inner = self.ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct(p) => {
                self.pos -= 1;
                Err(self.error(format!("unexpected `{}`", p)))
            }
        }
    }
}

// --- Evaluation ---

/// Evaluates parsed expressions against an explicit variable map.
pub struct Sandbox<'a> {
    vars: &'a BTreeMap<String, Value>,
    gas: u64,
    gas_limit: u64,
}

impl<'a> Sandbox<'a> {
    pub fn new(vars: &'a BTreeMap<String, Value>, gas_limit: u64) -> Self {
        Self {
            vars,
            gas: 0,
            gas_limit,
        }
    }

    fn tick(&mut self) -> Result<(), ExpressionError> {
        self.gas += 1;
        if self.gas > self.gas_limit {
            Err(ExpressionError::GasExhausted(self.gas_limit))
        } else {
            Ok(())
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ExpressionError> {
        self.tick()?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone())),
            Expr::Get(inner, segment) => {
                let base = self.eval(inner)?;
                get_segment(&base, segment)
            }
            Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!truthy(&self.eval(inner)?))),
            Expr::Unary(UnaryOp::Neg, inner) => {
                let v = self.eval(inner)?;
                number(-as_number(&v, "-")?)
            }
            Expr::Binary(BinaryOp::And, l, r) => {
                Ok(Value::Bool(truthy(&self.eval(l)?) && truthy(&self.eval(r)?)))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                Ok(Value::Bool(truthy(&self.eval(l)?) || truthy(&self.eval(r)?)))
            }
            Expr::Binary(op, l, r) => {
                let left = self.eval(l)?;
                let right = self.eval(r)?;
                binary(*op, &left, &right)
            }
            Expr::Ternary(c, t, e) => {
                if truthy(&self.eval(c)?) {
                    self.eval(t)
                } else {
                    self.eval(e)
                }
            }
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, values)
            }
        }
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(
    source: &str,
    vars: &BTreeMap<String, Value>,
    gas_limit: u64,
) -> Result<Value, ExpressionError> {
    let expr = parse(source)?;
    Sandbox::new(vars, gas_limit).eval(&expr)
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn number(n: f64) -> Result<Value, ExpressionError> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::Type(format!("{} is not a finite number", n)))
}

fn as_number(v: &Value, op: &str) -> Result<f64, ExpressionError> {
    v.as_f64()
        .ok_or_else(|| ExpressionError::Type(format!("`{}` expects numbers, got {}", op, v)))
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn get_segment(base: &Value, segment: &Segment) -> Result<Value, ExpressionError> {
    match (base, segment) {
        (Value::Object(map), Segment::Field(name)) => map
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::Type(format!("no field `{}`", name))),
        (Value::Array(items), Segment::Index(i)) => items
            .get(*i)
            .cloned()
            .ok_or_else(|| ExpressionError::Type(format!("index {} out of bounds", i))),
        (other, Segment::Field(name)) => {
            Err(ExpressionError::Type(format!("cannot read `{}` of {}", name, other)))
        }
        (other, Segment::Index(i)) => {
            Err(ExpressionError::Type(format!("cannot index {} with [{}]", other, i)))
        }
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                Ok(Value::String(format!("{}{}", display(left), display(right))))
            } else {
                number(as_number(left, "+")? + as_number(right, "+")?)
            }
        }
        BinaryOp::Sub => number(as_number(left, "-")? - as_number(right, "-")?),
        BinaryOp::Mul => number(as_number(left, "*")? * as_number(right, "*")?),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = as_number(right, "/")?;
            if divisor == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            let dividend = as_number(left, "/")?;
            if op == BinaryOp::Div {
                number(dividend / divisor)
            } else {
                number(dividend % divisor)
            }
        }
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => as_number(left, "<")?.partial_cmp(&as_number(right, "<")?),
            }
            .ok_or_else(|| ExpressionError::Type("incomparable values".to_string()))?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(match op {
            BinaryOp::And => truthy(left) && truthy(right),
            _ => truthy(left) || truthy(right),
        })),
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let exactly_one = |args: &[Value]| {
        if args.len() == 1 {
            Ok(())
        } else {
            Err(ExpressionError::Arity {
                name: name.to_string(),
                expected: "1",
                actual: args.len(),
            })
        }
    };
    match name {
        "len" => {
            exactly_one(&args)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => return Err(ExpressionError::Type(format!("len() of {}", other))),
            };
            Ok(Value::from(n as u64))
        }
        "upper" => {
            exactly_one(&args)?;
            Ok(Value::String(display(&args[0]).to_uppercase()))
        }
        "lower" => {
            exactly_one(&args)?;
            Ok(Value::String(display(&args[0]).to_lowercase()))
        }
        "concat" => Ok(Value::String(args.iter().map(display).collect())),
        "coalesce" => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
        "not_empty" => {
            exactly_one(&args)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

/// Wrap named values as an object (used to expose `const`).
pub fn object(entries: &BTreeMap<String, Value>) -> Value {
    Value::Object(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<_, _>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_with(source: &str, vars: serde_json::Value) -> Result<Value, ExpressionError> {
        let vars: BTreeMap<String, Value> = serde_json::from_value(vars).unwrap();
        evaluate(source, &vars, DEFAULT_GAS_LIMIT)
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval_with("1 + 2 * 3", json!({})).unwrap(), json!(7));
        assert_eq!(eval_with("(1 + 2) * 3", json!({})).unwrap(), json!(9));
        assert_eq!(eval_with("7 % 4 - -1", json!({})).unwrap(), json!(4));
        assert_eq!(eval_with("1 / 4", json!({})).unwrap(), json!(0.25));
    }

    #[test]
    fn test_string_concat_and_paths() {
        let vars = json!({"user": {"name": "Ada", "tags": ["x", "y"]}});
        assert_eq!(
            eval_with("'Hello, ' + user.name", vars.clone()).unwrap(),
            json!("Hello, Ada")
        );
        assert_eq!(eval_with("user.tags[1]", vars.clone()).unwrap(), json!("y"));
        assert_eq!(eval_with("len(user.tags) == 2", vars).unwrap(), json!(true));
    }

    #[test]
    fn test_ternary_and_logic() {
        let vars = json!({"count": 0, "name": ""});
        assert_eq!(
            eval_with("count > 0 ? 'some' : 'none'", vars.clone()).unwrap(),
            json!("none")
        );
        assert_eq!(eval_with("!name && count == 0", vars.clone()).unwrap(), json!(true));
        assert_eq!(eval_with("coalesce(null, name, 'x')", vars).unwrap(), json!(""));
    }

    #[test]
    fn test_unknown_identifier_is_error() {
        let err = eval_with("secret + 1", json!({})).unwrap_err();
        assert_eq!(err, ExpressionError::UnknownIdentifier("secret".into()));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            eval_with("1 / 0", json!({})).unwrap_err(),
            ExpressionError::DivisionByZero
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("1 +"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(parse("'open"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(parse("a b"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(parse("a # b"), Err(ExpressionError::Syntax { .. })));
    }

    #[test]
    fn test_depth_limit() {
        let source = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&source).unwrap_err(), ExpressionError::TooDeep);
    }

    #[test]
    fn test_long_operator_chains_are_too_deep() {
        let sum = format!("1{}", "+1".repeat(50_000));
        assert_eq!(parse(&sum).unwrap_err(), ExpressionError::TooDeep);
        let path = format!("user{}", ".a".repeat(50_000));
        assert_eq!(parse(&path).unwrap_err(), ExpressionError::TooDeep);
        let index = format!("rows{}", "[0]".repeat(50_000));
        assert_eq!(parse(&index).unwrap_err(), ExpressionError::TooDeep);
        // short chains stay well inside the limit
        let short = format!("1{}", "+1".repeat(20));
        assert_eq!(evaluate(&short, &BTreeMap::new(), DEFAULT_GAS_LIMIT).unwrap(), json!(21));
    }

    #[test]
    fn test_gas_limit() {
        let vars = BTreeMap::new();
        let err = evaluate("1 + 1 + 1 + 1", &vars, 3).unwrap_err();
        assert_eq!(err, ExpressionError::GasExhausted(3));
    }

    #[test]
    fn test_roots_and_calls() {
        let expr = parse("upper(user.name) + const.suffix + (flag ? a : b[0])").unwrap();
        let roots: Vec<_> = expr.roots().into_iter().collect();
        assert_eq!(roots, vec!["a", "b", "const", "flag", "user"]);
        assert!(expr.calls().contains("upper"));
    }
}
