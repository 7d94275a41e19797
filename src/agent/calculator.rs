//! Arithmetic expression evaluator backing the `calculator` tool.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/' | '%') unary)*
//! unary  := '-' unary | '+' unary | power
//! power  := atom (('^' | '**') unary)?
//! atom   := number | '(' expr ')'
//! ```
//!
//! `^` binds tighter than unary minus and is right associative, so `-2^2` is
//! `-4` and `2^3^2` is `512`.

use thiserror::Error;

/// Nesting limit for parentheses and unary signs.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum CalcError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NotFinite,
    #[error("expression is nested too deeply")]
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| CalcError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Num(value));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                Token::Caret
            }
            '*' | '×' => Token::Star,
            '/' | '÷' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(CalcError::UnexpectedChar(other)),
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Token::Slash | Token::Percent => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value = if op == Token::Slash { value / rhs } else { value % rhs };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    /// Every recursive path passes through here.
    fn unary(&mut self) -> Result<f64, CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Caret) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, CalcError> {
        match self.next() {
            Some(Token::Num(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    Some(other) => Err(CalcError::UnexpectedToken(format!("{:?}", other))),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(other) => Err(CalcError::UnexpectedToken(format!("{:?}", other))),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(CalcError::UnexpectedToken(format!("{:?}", extra)));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

/// Render a result without a trailing `.0` for whole numbers.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> f64 {
        evaluate(expr).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("15 * 23 + 47"), 392.0);
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("10 % 4 + 1"), 3.0);
    }

    #[test]
    fn test_power_and_unary_minus() {
        assert_eq!(eval("-2^2"), -4.0);
        assert_eq!(eval("(-2)^2"), 4.0);
        assert_eq!(eval("2^3^2"), 512.0);
        assert_eq!(eval("2**10"), 1024.0);
        assert_eq!(eval("2^-1"), 0.5);
        assert_eq!(eval("--3"), 3.0);
    }

    #[test]
    fn test_decimals() {
        assert!((eval("0.1 + 0.2") - 0.3).abs() < 1e-12);
        assert_eq!(eval(".5 * 4"), 2.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("5 % 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("2 +"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("(1 + 2"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("abs(3)"), Err(CalcError::UnexpectedChar('a')));
        assert!(matches!(evaluate("1.2.3"), Err(CalcError::InvalidNumber(_))));
        assert!(matches!(evaluate("1 2"), Err(CalcError::UnexpectedToken(_))));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(evaluate(&deep), Err(CalcError::TooDeep));
        assert_eq!(evaluate(&"-".repeat(100_000)), Err(CalcError::TooDeep));

        let nested = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(eval(&nested), 1.0);
        assert_eq!(eval(&format!("{}2", "--".repeat(100))), 2.0);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(392.0), "392");
        assert_eq!(format_number(-4.0), "-4");
        assert_eq!(format_number(2.5), "2.5");
    }
}
