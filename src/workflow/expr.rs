//! The `when:` expression sub-language.
//!
//! A small, safe language: boolean/arithmetic operators, literals, field
//! access on prior outputs (`steps.<id>.outputs.<field>`), and a fixed set
//! of helpers (`len`, `contains`, `in`). No arbitrary code; parsing happens
//! at workflow load, evaluation against a [`ResolutionContext`] at run
//! time.
//!
//! Grammar (recursive descent):
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := not ("&&" not)*
//! not     := "!" not | cmp
//! cmp     := add (("=="|"!="|"<="|">="|"<"|">") add)?
//! add     := mul (("+"|"-") mul)*
//! mul     := unary (("*"|"/"|"%") unary)*
//! unary   := "-" unary | primary
//! primary := literal | func "(" args ")" | path | "(" expr ")"
//! ```

use serde_json::Value;

use crate::error::{AutoPrError, Result};
use crate::workflow::reference::ResolutionContext;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
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
}

/// Fixed helper set; nothing else is callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Len,
    Contains,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    And,
    Or,
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

/// Parsed expression AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

fn parse_error(position: usize, details: impl Into<String>) -> AutoPrError {
    AutoPrError::ExprParse {
        position,
        details: details.into(),
    }
}

fn type_error(details: impl Into<String>) -> AutoPrError {
    AutoPrError::ExprType {
        details: details.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            '.' => {
                tokens.push((i, Token::Dot));
                i += 1;
            }
            '+' => {
                tokens.push((i, Token::Plus));
                i += 1;
            }
            '-' => {
                tokens.push((i, Token::Minus));
                i += 1;
            }
            '*' => {
                tokens.push((i, Token::Star));
                i += 1;
            }
            '/' => {
                tokens.push((i, Token::Slash));
                i += 1;
            }
            '%' => {
                tokens.push((i, Token::Percent));
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Ne));
                    i += 2;
                } else {
                    tokens.push((i, Token::Not));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Eq));
                    i += 2;
                } else {
                    return Err(parse_error(i, "single '=' (use '==')"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Le));
                    i += 2;
                } else {
                    tokens.push((i, Token::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Ge));
                    i += 2;
                } else {
                    tokens.push((i, Token::Gt));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push((i, Token::And));
                    i += 2;
                } else {
                    return Err(parse_error(i, "single '&' (use '&&')"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push((i, Token::Or));
                    i += 2;
                } else {
                    return Err(parse_error(i, "single '|' (use '||')"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(parse_error(start, "unterminated string")),
                    }
                }
                tokens.push((start, Token::Str(s)));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut s = String::new();
                while let Some(&ch) = chars.get(i) {
                    if ch.is_ascii_digit() || (ch == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
                        s.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| parse_error(start, format!("invalid number '{}'", s)))?;
                tokens.push((start, Token::Number(n)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut s = String::new();
                while let Some(&ch) = chars.get(i) {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                        s.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                let token = match s.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(s),
                };
                tokens.push((start, token));
            }
            other => return Err(parse_error(i, format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.input_len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(parse_error(self.position(), format!("expected {}", what)))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_add()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_mul()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let position = self.position();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                // Helper call?
                let func = match name.as_str() {
                    "len" => Some(Func::Len),
                    "contains" => Some(Func::Contains),
                    "in" => Some(Func::In),
                    _ => None,
                };
                if let Some(func) = func {
                    if self.peek() == Some(&Token::LParen) {
                        self.pos += 1;
                        let mut args = vec![self.parse_or()?];
                        while self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            args.push(self.parse_or()?);
                        }
                        self.expect(&Token::RParen, "')'")?;
                        let arity = if func == Func::Len { 1 } else { 2 };
                        if args.len() != arity {
                            return Err(parse_error(
                                position,
                                format!("helper takes {} argument(s), got {}", arity, args.len()),
                            ));
                        }
                        return Ok(Expr::Call { func, args });
                    }
                }
                // Dotted path
                let mut segments = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(seg)) => segments.push(seg),
                        Some(Token::Number(n)) if n.fract() == 0.0 => {
                            segments.push((n as u64).to_string())
                        }
                        _ => {
                            return Err(parse_error(
                                self.position(),
                                "expected field name after '.'",
                            ))
                        }
                    }
                }
                Ok(Expr::Path(segments))
            }
            Some(other) => Err(parse_error(position, format!("unexpected token {:?}", other))),
            None => Err(parse_error(position, "unexpected end of expression")),
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl Expr {
    /// Parse an expression; errors carry the offending position.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(parse_error(0, "empty expression"));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            input_len: input.len(),
        };
        let expr = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(parse_error(parser.position(), "trailing tokens"));
        }
        Ok(expr)
    }

    /// Evaluate against a resolution context.
    pub fn eval(&self, step_id: &str, ctx: &ResolutionContext) -> Result<Value> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Path(segments) => ctx.lookup_path(step_id, segments),
            Self::Not(inner) => {
                let v = inner.eval(step_id, ctx)?;
                Ok(Value::Bool(!as_bool(&v)?))
            }
            Self::Neg(inner) => {
                let v = inner.eval(step_id, ctx)?;
                Ok(number_value(-as_number(&v)?))
            }
            Self::Binary { op, left, right } => eval_binary(*op, left, right, step_id, ctx),
            Self::Call { func, args } => eval_call(*func, args, step_id, ctx),
        }
    }

    /// Evaluate and require a boolean (the `when:` contract).
    pub fn eval_bool(&self, step_id: &str, ctx: &ResolutionContext) -> Result<bool> {
        let v = self.eval(step_id, ctx)?;
        as_bool(&v)
    }
}

fn as_bool(v: &Value) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| type_error(format!("expected boolean, got {}", v)))
}

fn as_number(v: &Value) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| type_error(format!("expected number, got {}", v)))
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    step_id: &str,
    ctx: &ResolutionContext,
) -> Result<Value> {
    // Short-circuit the boolean operators
    match op {
        BinOp::And => {
            if !as_bool(&left.eval(step_id, ctx)?)? {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(as_bool(&right.eval(step_id, ctx)?)?));
        }
        BinOp::Or => {
            if as_bool(&left.eval(step_id, ctx)?)? {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(as_bool(&right.eval(step_id, ctx)?)?));
        }
        _ => {}
    }

    let l = left.eval(step_id, ctx)?;
    let r = right.eval(step_id, ctx)?;
    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&l, &r) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => as_number(&l)?
                    .partial_cmp(&as_number(&r)?)
                    .ok_or_else(|| type_error("incomparable numbers"))?,
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::Add => Ok(number_value(as_number(&l)? + as_number(&r)?)),
        BinOp::Sub => Ok(number_value(as_number(&l)? - as_number(&r)?)),
        BinOp::Mul => Ok(number_value(as_number(&l)? * as_number(&r)?)),
        BinOp::Div => {
            let divisor = as_number(&r)?;
            if divisor == 0.0 {
                return Err(type_error("division by zero"));
            }
            Ok(number_value(as_number(&l)? / divisor))
        }
        BinOp::Rem => {
            let divisor = as_number(&r)?;
            if divisor == 0.0 {
                return Err(type_error("modulo by zero"));
            }
            Ok(number_value(as_number(&l)? % divisor))
        }
        BinOp::And | BinOp::Or => unreachable!(),
    }
}

fn eval_call(func: Func, args: &[Expr], step_id: &str, ctx: &ResolutionContext) -> Result<Value> {
    match func {
        Func::Len => {
            let v = args[0].eval(step_id, ctx)?;
            let len = match &v {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(type_error(format!("len() of {}", other))),
            };
            Ok(Value::from(len as i64))
        }
        Func::Contains => {
            let haystack = args[0].eval(step_id, ctx)?;
            let needle = args[1].eval(step_id, ctx)?;
            let result = match (&haystack, &needle) {
                (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
                (Value::Array(items), n) => items.contains(n),
                (other, _) => {
                    return Err(type_error(format!("contains() on {}", other)));
                }
            };
            Ok(Value::Bool(result))
        }
        Func::In => {
            // in(x, collection) is contains(collection, x)
            let needle = args[0].eval(step_id, ctx)?;
            let haystack = args[1].eval(step_id, ctx)?;
            let result = match (&haystack, &needle) {
                (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
                (Value::Array(items), n) => items.contains(n),
                (other, _) => return Err(type_error(format!("in() over {}", other))),
            };
            Ok(Value::Bool(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use serde_json::json;

    fn eval(input: &str) -> Result<Value> {
        let mut steps = FxHashMap::default();
        steps.insert(
            "analyze".to_string(),
            json!({"merge_block": true, "count": 3, "tags": ["security", "typing"], "summary": "two findings"}),
        );
        let inputs = json!({"threshold": "low"});
        let event = json!({"repo": "o/r", "pr_number": 42, "kind": "pr_opened"});
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        Expr::parse(input)?.eval("test", &ctx)
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("true").unwrap(), json!(true));
        assert_eq!(eval("42").unwrap(), json!(42));
        assert_eq!(eval("3.5").unwrap(), json!(3.5));
        assert_eq!(eval("'hi'").unwrap(), json!("hi"));
        assert_eq!(eval("null").unwrap(), json!(null));
    }

    #[test]
    fn test_path_access() {
        assert_eq!(eval("steps.analyze.outputs.merge_block").unwrap(), json!(true));
        assert_eq!(eval("inputs.threshold").unwrap(), json!("low"));
        assert_eq!(eval("event.pr_number").unwrap(), json!(42));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("steps.analyze.outputs.count >= 3").unwrap(), json!(true));
        assert_eq!(eval("steps.analyze.outputs.count < 3").unwrap(), json!(false));
        assert_eq!(eval("event.kind == 'pr_opened'").unwrap(), json!(true));
        assert_eq!(eval("1 != 2").unwrap(), json!(true));
        assert_eq!(eval("'abc' < 'abd'").unwrap(), json!(true));
    }

    #[test]
    fn test_boolean_logic_and_precedence() {
        assert_eq!(eval("true && false || true").unwrap(), json!(true));
        assert_eq!(eval("!(1 == 1)").unwrap(), json!(false));
        assert_eq!(
            eval("steps.analyze.outputs.merge_block && event.pr_number > 0").unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval("10 % 3").unwrap(), json!(1));
        assert_eq!(eval("-2 + 5").unwrap(), json!(3));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(eval("len(steps.analyze.outputs.tags)").unwrap(), json!(2));
        assert_eq!(eval("len('abc')").unwrap(), json!(3));
        assert_eq!(
            eval("contains(steps.analyze.outputs.tags, 'security')").unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("contains(steps.analyze.outputs.summary, 'findings')").unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("in('typing', steps.analyze.outputs.tags)").unwrap(),
            json!(true)
        );
        assert_eq!(eval("in('perf', steps.analyze.outputs.tags)").unwrap(), json!(false));
    }

    #[test]
    fn test_short_circuit_avoids_resolution() {
        // Right side references a missing step but must never be evaluated
        assert_eq!(eval("false && steps.ghost.outputs.x").unwrap(), json!(false));
        assert_eq!(eval("true || steps.ghost.outputs.x").unwrap(), json!(true));
    }

    #[test]
    fn test_missing_path_is_unresolved_reference() {
        let err = eval("steps.ghost.outputs.x").unwrap_err();
        assert_eq!(err.code(), "APR-022");
    }

    #[test]
    fn test_parse_errors_carry_position() {
        for bad in ["1 +", "len(", "a = b", "&& true", "1 ="] {
            let err = Expr::parse(bad).unwrap_err();
            assert_eq!(err.code(), "APR-017", "input: {}", bad);
        }
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(eval("1 && true").unwrap_err().code(), "APR-018");
        assert_eq!(eval("len(5)").unwrap_err().code(), "APR-018");
        assert_eq!(eval("1 / 0").unwrap_err().code(), "APR-018");
    }

    #[test]
    fn test_helper_arity_checked_at_parse() {
        assert!(Expr::parse("len(1, 2)").is_err());
        assert!(Expr::parse("contains(1)").is_err());
    }

    #[test]
    fn test_eval_bool_rejects_non_boolean() {
        let mut steps = FxHashMap::default();
        steps.insert("a".to_string(), json!({"n": 5}));
        let inputs = json!({});
        let event = json!({});
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        let err = Expr::parse("steps.a.outputs.n")
            .unwrap()
            .eval_bool("s", &ctx)
            .unwrap_err();
        assert_eq!(err.code(), "APR-018");
    }
}
