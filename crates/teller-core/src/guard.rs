//! Restricted expression grammar for transition guards and after-effects.
//!
//! Expressions can read named context fields (`otp_fail` or `ctx.otp_fail`),
//! compare, and do boolean/arithmetic work; effects can assign fields
//! (`otp_fail += 1; risk_flag = true`). Nothing else is reachable, so
//! configuration data never gets a code-execution capability.

use crate::session::{Context, Scalar};
use anyhow::{anyhow, bail, Result};

/// Evaluate a guard expression. Empty/absent guards are always true.
/// The result is the truthiness of the final value (false/0/"" are false).
pub fn evaluate(expr: &str, ctx: &Context) -> Result<bool> {
    if expr.trim().is_empty() {
        return Ok(true);
    }
    let tokens = lex(expr)?;
    let mut parser = Parser::new(tokens);
    let ast = parser.expression()?;
    parser.expect_end()?;
    Ok(eval(&ast, ctx)?.truthy())
}

/// Apply an after-effect: `;`-separated `field = expr`, `field += expr`,
/// `field -= expr` statements. Empty/absent effects are a no-op.
pub fn apply(expr: &str, ctx: &mut Context) -> Result<()> {
    for stmt in expr.split(';') {
        if stmt.trim().is_empty() {
            continue;
        }
        let tokens = lex(stmt)?;
        let mut parser = Parser::new(tokens);
        let (field, op, rhs) = parser.statement()?;
        parser.expect_end()?;
        let value = eval(&rhs, ctx)?;
        let new = match op {
            AssignOp::Set => value,
            AssignOp::Add => {
                let cur = field_value(ctx, &field)?;
                eval_binary(BinOp::Add, cur, value)?
            }
            AssignOp::Sub => {
                let cur = field_value(ctx, &field)?;
                eval_binary(BinOp::Sub, cur, value)?
            }
        };
        ctx.fields.insert(field, new);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    OrOr,
    AndAnd,
    Not,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Dot,
    Assign,
    PlusAssign,
    MinusAssign,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '+' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() {
                    Token::PlusAssign
                } else {
                    Token::Plus
                });
            }
            '-' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() {
                    Token::MinusAssign
                } else {
                    Token::Minus
                });
            }
            '=' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() {
                    Token::EqEq
                } else {
                    Token::Assign
                });
            }
            '!' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() {
                    Token::Ne
                } else {
                    Token::Not
                });
            }
            '<' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() {
                    Token::Le
                } else {
                    Token::Lt
                });
            }
            '>' => {
                chars.next();
                tokens.push(if chars.next_if_eq(&'=').is_some() {
                    Token::Ge
                } else {
                    Token::Gt
                });
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_none() {
                    bail!("single `|` is not an operator");
                }
                tokens.push(Token::OrOr);
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_none() {
                    bail!("single `&` is not an operator");
                }
                tokens.push(Token::AndAnd);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => bail!("unterminated string literal"),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let mut num = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if num.contains('.') {
                    tokens.push(Token::Float(
                        num.parse().map_err(|_| anyhow!("bad number `{num}`"))?,
                    ));
                } else {
                    tokens.push(Token::Int(
                        num.parse().map_err(|_| anyhow!("bad number `{num}`"))?,
                    ));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(ident),
                });
            }
            other => bail!("unexpected character `{other}`"),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Scalar),
    Field(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

enum AssignOp {
    Set,
    Add,
    Sub,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.tokens.len() {
            bail!("trailing tokens in expression");
        }
        Ok(())
    }

    /// `field (=|+=|-=) expression`
    fn statement(&mut self) -> Result<(String, AssignOp, Expr)> {
        let field = self.field_name()?;
        let op = match self.next() {
            Some(Token::Assign) => AssignOp::Set,
            Some(Token::PlusAssign) => AssignOp::Add,
            Some(Token::MinusAssign) => AssignOp::Sub,
            other => bail!("expected assignment operator, got {:?}", other),
        };
        let rhs = self.expression()?;
        Ok((field, op, rhs))
    }

    fn expression(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.not_expr()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            Ok(Expr::Not(Box::new(self.not_expr()?)))
        } else {
            self.cmp_expr()
        }
    }

    fn cmp_expr(&mut self) -> Result<Expr> {
        let lhs = self.add_expr()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.add_expr()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn add_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.mul_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn mul_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary_expr(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            Ok(Expr::Neg(Box::new(self.unary_expr()?)))
        } else {
            self.atom()
        }
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Lit(Scalar::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Lit(Scalar::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Scalar::Str(s))),
            Some(Token::Bool(b)) => Ok(Expr::Lit(Scalar::Bool(b))),
            Some(Token::Ident(name)) => {
                // `ctx.foo` and bare `foo` both name the field `foo`
                if name == "ctx" && self.eat(&Token::Dot) {
                    match self.next() {
                        Some(Token::Ident(field)) => Ok(Expr::Field(field)),
                        other => bail!("expected field name after `ctx.`, got {:?}", other),
                    }
                } else {
                    Ok(Expr::Field(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expression()?;
                if !self.eat(&Token::RParen) {
                    bail!("missing closing parenthesis");
                }
                Ok(inner)
            }
            other => bail!("unexpected token {:?}", other),
        }
    }

    fn field_name(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => {
                if name == "ctx" && self.eat(&Token::Dot) {
                    match self.next() {
                        Some(Token::Ident(field)) => Ok(field),
                        other => bail!("expected field name after `ctx.`, got {:?}", other),
                    }
                } else {
                    Ok(name)
                }
            }
            other => bail!("expected field name, got {:?}", other),
        }
    }
}

fn field_value(ctx: &Context, name: &str) -> Result<Scalar> {
    ctx.fields
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow!("unknown context field `{name}`"))
}

fn eval(expr: &Expr, ctx: &Context) -> Result<Scalar> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Field(name) => field_value(ctx, name),
        Expr::Not(inner) => Ok(Scalar::Bool(!eval(inner, ctx)?.truthy())),
        Expr::Neg(inner) => match eval(inner, ctx)? {
            Scalar::Int(n) => Ok(Scalar::Int(-n)),
            Scalar::Float(f) => Ok(Scalar::Float(-f)),
            other => bail!("cannot negate {other:?}"),
        },
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if eval(lhs, ctx)?.truthy() {
                Ok(Scalar::Bool(true))
            } else {
                Ok(Scalar::Bool(eval(rhs, ctx)?.truthy()))
            }
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !eval(lhs, ctx)?.truthy() {
                Ok(Scalar::Bool(false))
            } else {
                Ok(Scalar::Bool(eval(rhs, ctx)?.truthy()))
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, ctx)?;
            let rhs = eval(rhs, ctx)?;
            eval_binary(*op, lhs, rhs)
        }
    }
}

fn eval_binary(op: BinOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar> {
    use BinOp::*;
    match op {
        Eq => Ok(Scalar::Bool(scalar_eq(&lhs, &rhs))),
        Ne => Ok(Scalar::Bool(!scalar_eq(&lhs, &rhs))),
        Lt | Le | Gt | Ge => {
            let ord = match (&lhs, &rhs) {
                (Scalar::Str(a), Scalar::Str(b)) => a.partial_cmp(b),
                (a, b) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            }
            .ok_or_else(|| anyhow!("cannot order {lhs:?} and {rhs:?}"))?;
            Ok(Scalar::Bool(match op {
                Lt => ord.is_lt(),
                Le => ord.is_le(),
                Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        Add => match (&lhs, &rhs) {
            (Scalar::Str(a), Scalar::Str(b)) => Ok(Scalar::Str(format!("{a}{b}"))),
            (Scalar::Int(a), Scalar::Int(b)) => Ok(Scalar::Int(a + b)),
            _ => numeric(op, &lhs, &rhs, |x, y| x + y),
        },
        Sub => match (&lhs, &rhs) {
            (Scalar::Int(a), Scalar::Int(b)) => Ok(Scalar::Int(a - b)),
            _ => numeric(op, &lhs, &rhs, |x, y| x - y),
        },
        Mul => match (&lhs, &rhs) {
            (Scalar::Int(a), Scalar::Int(b)) => Ok(Scalar::Int(a * b)),
            _ => numeric(op, &lhs, &rhs, |x, y| x * y),
        },
        Div => match (&lhs, &rhs) {
            (_, Scalar::Int(0)) => bail!("division by zero"),
            (Scalar::Int(a), Scalar::Int(b)) => Ok(Scalar::Int(a / b)),
            _ => numeric(op, &lhs, &rhs, |x, y| x / y),
        },
        Rem => match (&lhs, &rhs) {
            (_, Scalar::Int(0)) => bail!("modulo by zero"),
            (Scalar::Int(a), Scalar::Int(b)) => Ok(Scalar::Int(a % b)),
            _ => bail!("modulo needs integers"),
        },
        Or | And => unreachable!("short-circuit ops handled in eval"),
    }
}

fn scalar_eq(lhs: &Scalar, rhs: &Scalar) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn numeric(op: BinOp, lhs: &Scalar, rhs: &Scalar, f: fn(f64, f64) -> f64) -> Result<Scalar> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok(Scalar::Float(f(a, b))),
        _ => bail!("{op:?} needs numbers, got {lhs:?} and {rhs:?}"),
    }
}
