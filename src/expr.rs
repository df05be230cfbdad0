// NETBENCH LINKAGE FORMULAS
// RESTRICTED, SIDE-EFFECT-FREE ARITHMETIC OVER A PARAMETER SET.
//
//   LITERALS     1  2.5  .5  1e3
//   NAMES        THE SWEPT VARIABLE + EVERY NUMERIC FIELD (BOOL -> 0.0 / 1.0)
//   OPERATORS    + - * / // % **   UNARY + -
//   FUNCTIONS    min max abs floor ceil round
//
// ANYTHING ELSE (STRINGS, ATTRIBUTES, KEYWORDS, COMPARISONS, OTHER CALLS)
// IS REJECTED WITH InvalidExpression. NOTHING IS COERCED SILENTLY.

use crate::error::{Error, Result};
use crate::params::ParameterSet;

const MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                // EXPONENT: 1e3, 2.5E-2
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                if i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    return Err(Error::expr(src, "only decimal numeric literals are allowed"));
                }
                let text: String = chars[start..i].iter().filter(|&&c| c != '_').collect();
                let v: f64 = text
                    .parse()
                    .map_err(|_| Error::expr(src, format!("malformed number '{}'", text)))?;
                out.push(Token::Num(v));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    return Err(Error::expr(src, "attribute access is not allowed"));
                }
                out.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '+' => {
                out.push(Token::Plus);
                i += 1;
            }
            '-' => {
                out.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    out.push(Token::StarStar);
                    i += 2;
                } else {
                    out.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    out.push(Token::SlashSlash);
                    i += 2;
                } else {
                    out.push(Token::Slash);
                    i += 1;
                }
            }
            '%' => {
                out.push(Token::Percent);
                i += 1;
            }
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            ',' => {
                out.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => return Err(Error::expr(src, "only numeric literals are allowed")),
            '=' => return Err(Error::expr(src, "keywords and assignments are not allowed")),
            '<' | '>' | '!' => return Err(Error::expr(src, "comparisons are not allowed")),
            other => {
                return Err(Error::expr(src, format!("unsupported character '{}'", other)));
            }
        }
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Round,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "abs" => Some(Self::Abs),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "round" => Some(Self::Round),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Num(f64),
    Name(String),
    Neg(Box<Expr>),
    Pos(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn fail(&self, reason: impl Into<String>) -> Error {
        Error::expr(self.src, reason)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.fail("expression nests too deeply"));
        }
        Ok(())
    }

    // additive := term (('+' | '-') term)*
    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    // term := unary (('*' | '/' | '//' | '%') unary)*
    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::SlashSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    // unary := ('+' | '-') unary | power
    fn unary(&mut self) -> Result<Expr> {
        self.enter()?;
        let e = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Expr::Neg(Box::new(self.unary()?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                Expr::Pos(Box::new(self.unary()?))
            }
            _ => self.power()?,
        };
        self.depth -= 1;
        Ok(e)
    }

    // power := primary ('**' unary)?   RIGHT-ASSOCIATIVE, -2**2 == -(2**2)
    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::StarStar) {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(Expr::Bin(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Num(v)) => Ok(Expr::Num(v)),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Name(name));
                }
                let func = Func::lookup(&name)
                    .ok_or_else(|| self.fail(format!("function '{}' is not allowed", name)))?;
                self.pos += 1;
                let args = self.arguments()?;
                check_arity(self.src, func, args.len())?;
                Ok(Expr::Call(func, args))
            }
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.additive()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.fail("unbalanced parenthesis")),
                }
            }
            Some(t) => Err(self.fail(format!("unexpected token {:?}", t))),
            None => Err(self.fail("unexpected end of expression")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            self.enter()?;
            args.push(self.additive()?);
            self.depth -= 1;
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.fail("malformed argument list")),
            }
        }
    }
}

fn check_arity(src: &str, func: Func, n: usize) -> Result<()> {
    let ok = match func {
        Func::Min | Func::Max => n >= 2,
        Func::Abs | Func::Floor | Func::Ceil | Func::Round => n == 1,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::expr(src, format!("wrong number of arguments ({}) for {:?}", n, func)))
    }
}

// PYTHON-STYLE MODULO: RESULT TAKES THE SIGN OF THE DIVISOR
fn py_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// A parsed linkage formula. Parsing happens once; evaluation walks the tree
/// against a parameter set and an optional swept-variable binding.
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    source: String,
    ast: Expr,
}

impl Formula {
    pub fn parse(src: &str) -> Result<Self> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(Error::expr(src, "empty expression"));
        }
        let mut p = Parser {
            src,
            tokens,
            pos: 0,
            depth: 0,
        };
        let ast = p.additive()?;
        if p.pos < p.tokens.len() {
            return Err(p.fail(format!("unexpected trailing token {:?}", p.tokens[p.pos])));
        }
        Ok(Self {
            source: src.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, ctx: &ParameterSet, var: Option<(&str, f64)>) -> Result<f64> {
        self.walk(&self.ast, ctx, var)
    }

    fn resolve(&self, name: &str, ctx: &ParameterSet, var: Option<(&str, f64)>) -> Result<f64> {
        if let Some((var_name, v)) = var {
            if var_name == name {
                return Ok(v);
            }
        }
        match ctx.get(name) {
            Some(value) => value.as_number().ok_or_else(|| {
                Error::expr(&self.source, format!("field '{}' has no numeric value", name))
            }),
            None => Err(Error::expr(&self.source, format!("unknown name '{}'", name))),
        }
    }

    fn walk(&self, e: &Expr, ctx: &ParameterSet, var: Option<(&str, f64)>) -> Result<f64> {
        match e {
            Expr::Num(v) => Ok(*v),
            Expr::Name(n) => self.resolve(n, ctx, var),
            Expr::Neg(inner) => Ok(-self.walk(inner, ctx, var)?),
            Expr::Pos(inner) => self.walk(inner, ctx, var),
            Expr::Bin(op, l, r) => {
                let a = self.walk(l, ctx, var)?;
                let b = self.walk(r, ctx, var)?;
                self.binary(*op, a, b)
            }
            Expr::Call(func, args) => {
                let vals = args
                    .iter()
                    .map(|a| self.walk(a, ctx, var))
                    .collect::<Result<Vec<f64>>>()?;
                Ok(match func {
                    Func::Min => vals.iter().copied().fold(f64::INFINITY, f64::min),
                    Func::Max => vals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    Func::Abs => vals[0].abs(),
                    Func::Floor => vals[0].floor(),
                    Func::Ceil => vals[0].ceil(),
                    Func::Round => vals[0].round_ties_even(),
                })
            }
        }
    }

    fn binary(&self, op: BinOp, a: f64, b: f64) -> Result<f64> {
        let zero_div = || Error::expr(&self.source, "division by zero");
        match op {
            BinOp::Add => Ok(a + b),
            BinOp::Sub => Ok(a - b),
            BinOp::Mul => Ok(a * b),
            BinOp::Div if b == 0.0 => Err(zero_div()),
            BinOp::Div => Ok(a / b),
            BinOp::FloorDiv if b == 0.0 => Err(zero_div()),
            BinOp::FloorDiv => Ok((a / b).floor()),
            BinOp::Mod if b == 0.0 => Err(zero_div()),
            BinOp::Mod => Ok(py_mod(a, b)),
            BinOp::Pow => {
                if a == 0.0 && b < 0.0 {
                    return Err(zero_div());
                }
                let v = a.powf(b);
                if v.is_nan() {
                    return Err(Error::expr(&self.source, "power has no real result"));
                }
                if v.is_infinite() {
                    return Err(Error::expr(&self.source, "power overflows"));
                }
                Ok(v)
            }
        }
    }
}

/// One-shot parse + evaluate.
pub fn evaluate(expression: &str, ctx: &ParameterSet, var_name: &str, var_value: f64) -> Result<f64> {
    Formula::parse(expression)?.eval(ctx, Some((var_name, var_value)))
}
