//! Sandboxed expression language for notebook cells.
//!
//! # Syntax
//!
//! ```text
//! 42, 1.5, "text", true, false, null     // literals
//! price, tax_rate                        // references to other cells
//!
//! // Operators (precedence low to high)
//! a || b
//! a && b
//! a == b, a != b
//! a < b, a <= b, a > b, a >= b
//! a + b, a - b                           // `+` concatenates when either side is a string
//! a * b, a / b, a % b
//! -a, !a
//!
//! // Functions (fixed set)
//! min(a, b, ...), max(a, b, ...), abs(x), sqrt(x)
//! floor(x), ceil(x), round(x)
//! len(s_or_list), upper(s), lower(s), concat(a, b, ...)
//! if(cond, then, else)                   // only the chosen branch is evaluated
//! ```
//!
//! Expressions nested deeper than [`MAX_DEPTH`] are rejected at parse time.

use std::collections::BTreeSet;

use serde_json::{json, Number, Value};
use thiserror::Error;

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::is_truthy;

/// Deepest expression tree accepted. Parentheses, call arguments, unary
/// operators and each operator in a binary chain all count as a level, so
/// parsing, evaluation and drop stay within this many nested frames.
pub const MAX_DEPTH: usize = 128;

/// Names callable from expressions.
pub const FUNCTIONS: &[&str] = &[
    "min", "max", "abs", "sqrt", "floor", "ceil", "round", "len", "upper", "lower", "concat", "if",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character: '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token: '{0}'")]
    UnexpectedToken(String),
    #[error("invalid number: '{0}'")]
    InvalidNumber(String),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unknown function: '{0}'")]
    UnknownFunction(String),
    #[error("expression nested more than {} levels deep", MAX_DEPTH)]
    TooDeep,
}

impl From<ParseError> for ConductorError {
    fn from(e: ParseError) -> Self {
        ConductorError::Expression(e.to_string())
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    Comma,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consume `next` if it follows.
    fn eat(&mut self, next: char) -> bool {
        if self.peek_char() == Some(next) {
            self.next_char();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.next_char();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> std::result::Result<f64, ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.next_char();
            } else {
                break;
            }
        }
        let s = &self.input[start..self.pos];
        s.parse()
            .map_err(|_| ParseError::InvalidNumber(s.to_string()))
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.next_char();
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn read_string(&mut self, quote: char) -> std::result::Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.next_char() {
                None => return Err(ParseError::UnterminatedString),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.next_char() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(ParseError::UnterminatedString),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn next_token(&mut self) -> std::result::Result<Token, ParseError> {
        self.skip_whitespace();

        let Some(c) = self.peek_char() else {
            return Ok(Token::Eof);
        };

        if c.is_ascii_digit() || c == '.' {
            return Ok(Token::Number(self.read_number()?));
        }
        if c.is_alphabetic() || c == '_' {
            return Ok(Token::Ident(self.read_ident()));
        }

        self.next_char();
        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '"' | '\'' => Token::Str(self.read_string(c)?),
            '!' if self.eat('=') => Token::NotEq,
            '!' => Token::Bang,
            '=' if self.eat('=') => Token::EqEq,
            '<' if self.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.eat('=') => Token::Ge,
            '>' => Token::Gt,
            '&' if self.eat('&') => Token::AndAnd,
            '|' if self.eat('|') => Token::OrOr,
            other => return Err(ParseError::UnexpectedChar(other)),
        };
        Ok(token)
    }
}

// ============================================================================
// AST
// ============================================================================

/// AST node for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Literal(Value),
    Ident(String),
    Unary(UnaryOp, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Call(String, Vec<Ast>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Ast {
    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Ast::Literal(_) => {}
            Ast::Ident(name) => {
                out.insert(name.clone());
            }
            Ast::Unary(_, inner) => inner.collect_references(out),
            Ast::Binary(_, left, right) => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Ast::Call(_, args) => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    /// Open parentheses, call argument lists and unary operators.
    nesting: usize,
}

type ParseResult<T> = std::result::Result<T, ParseError>;

/// A parsed subtree and its depth.
type Parsed = (Ast, usize);

fn bounded(depth: usize) -> ParseResult<usize> {
    if depth > MAX_DEPTH {
        Err(ParseError::TooDeep)
    } else {
        Ok(depth)
    }
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            nesting: 0,
        })
    }

    fn advance(&mut self) -> ParseResult<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current == expected {
            self.advance()
        } else if self.current == Token::Eof {
            Err(ParseError::UnexpectedEnd)
        } else {
            Err(ParseError::UnexpectedToken(format!("{:?}", self.current)))
        }
    }

    fn descend(&mut self) -> ParseResult<()> {
        self.nesting = bounded(self.nesting + 1)?;
        Ok(())
    }

    fn ascend(&mut self) {
        self.nesting -= 1;
    }

    /// Parse a left-associative chain of binary operators. Each operator
    /// adds a level to the tree, so long chains hit the depth limit too.
    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> ParseResult<Parsed>,
        op_for: fn(&Token) -> Option<BinOp>,
    ) -> ParseResult<Parsed> {
        let (mut left, mut depth) = next(self)?;
        while let Some(op) = op_for(&self.current) {
            self.advance()?;
            let (right, right_depth) = next(self)?;
            depth = bounded(1 + depth.max(right_depth))?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn parse_expr(&mut self) -> ParseResult<Parsed> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Parsed> {
        self.binary_chain(Self::parse_and, |t| (*t == Token::OrOr).then_some(BinOp::Or))
    }

    fn parse_and(&mut self) -> ParseResult<Parsed> {
        self.binary_chain(Self::parse_equality, |t| {
            (*t == Token::AndAnd).then_some(BinOp::And)
        })
    }

    fn parse_equality(&mut self) -> ParseResult<Parsed> {
        self.binary_chain(Self::parse_comparison, |t| match t {
            Token::EqEq => Some(BinOp::Eq),
            Token::NotEq => Some(BinOp::Ne),
            _ => None,
        })
    }

    fn parse_comparison(&mut self) -> ParseResult<Parsed> {
        self.binary_chain(Self::parse_add_sub, |t| match t {
            Token::Lt => Some(BinOp::Lt),
            Token::Le => Some(BinOp::Le),
            Token::Gt => Some(BinOp::Gt),
            Token::Ge => Some(BinOp::Ge),
            _ => None,
        })
    }

    fn parse_add_sub(&mut self) -> ParseResult<Parsed> {
        self.binary_chain(Self::parse_mul_div, |t| match t {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_mul_div(&mut self) -> ParseResult<Parsed> {
        self.binary_chain(Self::parse_unary, |t| match t {
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::Percent => Some(BinOp::Rem),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> ParseResult<Parsed> {
        let op = match self.current {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.advance()?;
        self.descend()?;
        let (inner, depth) = self.parse_unary()?;
        self.ascend();
        Ok((Ast::Unary(op, Box::new(inner)), bounded(depth + 1)?))
    }

    fn parse_primary(&mut self) -> ParseResult<Parsed> {
        match &self.current {
            Token::Number(n) => {
                let n = *n;
                self.advance()?;
                Ok((Ast::Literal(number(n).unwrap_or(Value::Null)), 1))
            }
            Token::Str(s) => {
                let s = s.clone();
                self.advance()?;
                Ok((Ast::Literal(Value::String(s)), 1))
            }
            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;

                // Check if it's a function call
                if self.current == Token::LParen {
                    if !FUNCTIONS.contains(&name.as_str()) {
                        return Err(ParseError::UnknownFunction(name));
                    }
                    self.advance()?;
                    self.descend()?;
                    let mut args = Vec::new();
                    let mut depth = 0;
                    if self.current != Token::RParen {
                        loop {
                            let (arg, arg_depth) = self.parse_expr()?;
                            args.push(arg);
                            depth = depth.max(arg_depth);
                            if self.current != Token::Comma {
                                break;
                            }
                            self.advance()?;
                        }
                    }
                    self.expect(Token::RParen)?;
                    self.ascend();
                    return Ok((Ast::Call(name, args), bounded(depth + 1)?));
                }

                let ast = match name.as_str() {
                    "true" => Ast::Literal(Value::Bool(true)),
                    "false" => Ast::Literal(Value::Bool(false)),
                    "null" => Ast::Literal(Value::Null),
                    _ => Ast::Ident(name),
                };
                Ok((ast, 1))
            }
            Token::LParen => {
                self.advance()?;
                self.descend()?;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                self.ascend();
                Ok(inner)
            }
            Token::Eof => Err(ParseError::UnexpectedEnd),
            other => Err(ParseError::UnexpectedToken(format!("{:?}", other))),
        }
    }
}

// ============================================================================
// Expr
// ============================================================================

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    ast: Ast,
}

impl Expr {
    pub fn parse(source: &str) -> std::result::Result<Self, ParseError> {
        let mut parser = Parser::new(source)?;
        let (ast, _) = parser.parse_expr()?;
        if parser.current != Token::Eof {
            return Err(ParseError::UnexpectedToken(format!("{:?}", parser.current)));
        }
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Identifiers the expression reads.
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.ast.collect_references(&mut out);
        out
    }

    /// Evaluate, resolving identifiers through `lookup`.
    pub fn eval<F>(&self, lookup: &F) -> Result<Value>
    where
        F: Fn(&str) -> Result<Value>,
    {
        eval(&self.ast, lookup)
    }
}

fn err(message: impl Into<String>) -> ConductorError {
    ConductorError::Expression(message.into())
}

/// JSON number from f64; whole values become integers.
fn number(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Some(json!(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number)
    }
}

fn as_number(value: &Value, context: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| err(format!("{} expects a number, got {}", context, value)))
}

fn numeric(n: f64) -> Result<Value> {
    number(n).ok_or_else(|| err("result is not a finite number"))
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval<F>(ast: &Ast, lookup: &F) -> Result<Value>
where
    F: Fn(&str) -> Result<Value>,
{
    match ast {
        Ast::Literal(v) => Ok(v.clone()),
        Ast::Ident(name) => lookup(name),
        Ast::Unary(UnaryOp::Neg, inner) => numeric(-as_number(&eval(inner, lookup)?, "-")?),
        Ast::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!is_truthy(&eval(inner, lookup)?))),
        Ast::Binary(BinOp::And, left, right) => {
            if !is_truthy(&eval(left, lookup)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&eval(right, lookup)?)))
        }
        Ast::Binary(BinOp::Or, left, right) => {
            if is_truthy(&eval(left, lookup)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&eval(right, lookup)?)))
        }
        Ast::Binary(op, left, right) => {
            let l = eval(left, lookup)?;
            let r = eval(right, lookup)?;
            binary(*op, &l, &r)
        }
        Ast::Call(name, args) if name == "if" => {
            let [cond, then, otherwise] = args.as_slice() else {
                return Err(err("if expects 3 arguments"));
            };
            if is_truthy(&eval(cond, lookup)?) {
                eval(then, lookup)
            } else {
                eval(otherwise, lookup)
            }
        }
        Ast::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, lookup))
                .collect::<Result<Vec<_>>>()?;
            call(name, &values)
        }
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinOp::Add if l.is_string() || r.is_string() => {
            Ok(Value::String(format!("{}{}", text(l), text(r))))
        }
        BinOp::Add => numeric(as_number(l, "+")? + as_number(r, "+")?),
        BinOp::Sub => numeric(as_number(l, "-")? - as_number(r, "-")?),
        BinOp::Mul => numeric(as_number(l, "*")? * as_number(r, "*")?),
        BinOp::Div | BinOp::Rem => {
            let a = as_number(l, "/")?;
            let b = as_number(r, "/")?;
            if b == 0.0 {
                return Err(err("division by zero"));
            }
            numeric(if op == BinOp::Div { a / b } else { a % b })
        }
        BinOp::Eq => Ok(Value::Bool(loosely_equal(l, r))),
        BinOp::Ne => Ok(Value::Bool(!loosely_equal(l, r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let a = as_number(l, "comparison")?;
                    let b = as_number(r, "comparison")?;
                    a.partial_cmp(&b)
                        .ok_or_else(|| err("cannot compare NaN"))?
                }
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::And | BinOp::Or => Err(err("logical operators are short-circuited")),
    }
}

/// Numbers compare by value so `1 == 1.0`.
fn loosely_equal(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn call(name: &str, args: &[Value]) -> Result<Value> {
    let unary = |f: fn(f64) -> f64| -> Result<Value> {
        match args {
            [x] => numeric(f(as_number(x, name)?)),
            _ => Err(err(format!("{} expects 1 argument", name))),
        }
    };
    match name {
        "abs" => unary(f64::abs),
        "sqrt" => unary(f64::sqrt),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "min" | "max" => {
            if args.is_empty() {
                return Err(err(format!("{} expects at least 1 argument", name)));
            }
            let mut best = as_number(&args[0], name)?;
            for arg in &args[1..] {
                let n = as_number(arg, name)?;
                best = if name == "min" { best.min(n) } else { best.max(n) };
            }
            numeric(best)
        }
        "len" => match args {
            [Value::String(s)] => Ok(json!(s.chars().count())),
            [Value::Array(items)] => Ok(json!(items.len())),
            [other] => Err(err(format!("len expects a string or list, got {}", other))),
            _ => Err(err("len expects 1 argument")),
        },
        "upper" | "lower" => match args {
            [v] => {
                let s = text(v);
                Ok(Value::String(if name == "upper" {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                }))
            }
            _ => Err(err(format!("{} expects 1 argument", name))),
        },
        "concat" => Ok(Value::String(args.iter().map(text).collect())),
        other => Err(err(format!("unknown function '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(source: &str) -> Result<Value> {
        let scope = |name: &str| -> Result<Value> {
            match name {
                "x" => Ok(json!(4)),
                "name" => Ok(json!("ada")),
                "items" => Ok(json!([1, 2, 3])),
                other => Err(err(format!("unknown identifier '{}'", other))),
            }
        };
        Expr::parse(source)?.eval(&scope)
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval_str("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval_str("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval_str("10 % 4 - -1").unwrap(), json!(3));
        assert_eq!(eval_str("7 / 2").unwrap(), json!(3.5));
        assert_eq!(eval_str("x * x").unwrap(), json!(16));
    }

    #[test]
    fn test_strings_and_functions() {
        assert_eq!(eval_str("\"hi \" + name").unwrap(), json!("hi ada"));
        assert_eq!(eval_str("upper(name)").unwrap(), json!("ADA"));
        assert_eq!(eval_str("len(name) + len(items)").unwrap(), json!(6));
        assert_eq!(eval_str("concat('a', 1, true)").unwrap(), json!("a1true"));
        assert_eq!(eval_str("max(1, x, 2)").unwrap(), json!(4));
        assert_eq!(eval_str("round(sqrt(10))").unwrap(), json!(3));
    }

    #[test]
    fn test_logic_and_comparison() {
        assert_eq!(eval_str("x > 3 && x <= 4").unwrap(), json!(true));
        assert_eq!(eval_str("x == 4.0").unwrap(), json!(true));
        assert_eq!(eval_str("!x || false").unwrap(), json!(false));
        assert_eq!(eval_str("'b' > 'a'").unwrap(), json!(true));
    }

    #[test]
    fn test_if_is_lazy() {
        assert_eq!(eval_str("if(x > 1, 'big', missing)").unwrap(), json!("big"));
        assert!(eval_str("if(x > 10, 'big', missing)").is_err());
    }

    #[test]
    fn test_references() {
        let expr = Expr::parse("a + f(b) * a").unwrap_err();
        assert_eq!(expr, ParseError::UnknownFunction("f".into()));

        let expr = Expr::parse("a + max(b, 2) * a").unwrap();
        let refs: Vec<_> = expr.references().into_iter().collect();
        assert_eq!(refs, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Expr::parse("1 +").unwrap_err(), ParseError::UnexpectedEnd);
        assert_eq!(Expr::parse("1 # 2").unwrap_err(), ParseError::UnexpectedChar('#'));
        assert_eq!(Expr::parse("'open").unwrap_err(), ParseError::UnterminatedString);
        assert!(matches!(
            Expr::parse("1 2").unwrap_err(),
            ParseError::UnexpectedToken(_)
        ));
    }

    #[test]
    fn test_depth_limit() {
        let flat = format!("1{}", " + 1".repeat(MAX_DEPTH - 1));
        assert_eq!(eval_str(&flat).unwrap(), json!(MAX_DEPTH));

        let long = format!("1{}", " + 1".repeat(2000));
        assert_eq!(Expr::parse(&long).unwrap_err(), ParseError::TooDeep);

        let parens = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert_eq!(Expr::parse(&parens).unwrap_err(), ParseError::TooDeep);

        let negations = format!("{}1", "-".repeat(500));
        assert_eq!(Expr::parse(&negations).unwrap_err(), ParseError::TooDeep);

        let calls = format!("{}1{}", "abs(".repeat(500), ")".repeat(500));
        assert_eq!(Expr::parse(&calls).unwrap_err(), ParseError::TooDeep);

        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(eval_str(&shallow).unwrap(), json!(1));
    }

    #[test]
    fn test_runtime_errors() {
        let e = eval_str("1 / 0").unwrap_err();
        assert!(e.to_string().contains("division by zero"));
        let e = eval_str("name * 2").unwrap_err();
        assert!(e.to_string().contains("expects a number"));
        let e = eval_str("nobody").unwrap_err();
        assert!(e.to_string().contains("unknown identifier"));
    }
}
