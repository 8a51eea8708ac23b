//! Arithmetic tool
//!
//! Input is sanitized down to digits, `+ - * / ( ) .` and whitespace, then
//! evaluated by a small recursive-descent parser. Nothing else is ever
//! interpreted: no names, no calls, no exponentiation.

use super::{Tool, ToolOutput};
use crate::agent::types::ToolType;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Nesting bound for parentheses and unary operators.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `input`, reporting failures inside the output.
    pub fn evaluate(&self, input: &str) -> ToolOutput {
        let expression = input.trim();
        match evaluate(expression) {
            Ok(result) => ToolOutput::success(json!({
                "expression": expression,
                "result": number_value(result),
            })),
            Err(e) => {
                tracing::debug!(expression, "calculator rejected input: {}", e);
                ToolOutput::failure_with(
                    json!({ "expression": expression, "result": Value::Null }),
                    e,
                )
            }
        }
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn tool_type(&self) -> ToolType {
        ToolType::Calculator
    }

    fn description(&self) -> &str {
        "Evaluate arithmetic expressions with + - * / and parentheses"
    }

    async fn execute(&self, input: &str) -> ToolOutput {
        self.evaluate(input)
    }
}

/// Keep only characters the grammar knows about.
pub fn sanitize(expression: &str) -> String {
    expression
        .chars()
        .filter(|c| c.is_ascii_digit() || "+-*/().".contains(*c) || c.is_whitespace())
        .collect()
}

/// Sanitize and evaluate an expression.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let cleaned = sanitize(expression);
    if cleaned.trim().is_empty() {
        return Err("No arithmetic expression found in input".to_string());
    }

    let tokens = tokenize(&cleaned)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("Unexpected token '{}'", token));
    }
    if !value.is_finite() {
        return Err("Result is not a finite number".to_string());
    }
    Ok(value)
}

/// Integral results become JSON integers, everything else a float.
fn number_value(n: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '0'..='9' | '.' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[start..end];
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| format!("Malformed number '{}'", literal))?;
                Token::Number(n)
            }
            other => return Err(format!("Invalid character '{}'", other)),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == Token::Star {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err("Division by zero".to_string());
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    // unary := ('+' | '-') unary | primary
    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(|p| p.unary())
            }
            Some(Token::Minus) => {
                self.pos += 1;
                self.nested(|p| p.unary()).map(|v| -v)
            }
            _ => self.primary(),
        }
    }

    // primary := number | '(' expr ')'
    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.nested(|p| p.expr())?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("Unbalanced parentheses".to_string()),
                }
            }
            Some(token) => Err(format!("Unexpected token '{}'", token)),
            None => Err("Unexpected end of expression".to_string()),
        }
    }

    fn nested<F>(&mut self, f: F) -> Result<f64, String>
    where
        F: FnOnce(&mut Self) -> Result<f64, String>,
    {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("Expression is nested too deeply".to_string());
        }
        let result = f(self);
        self.depth -= 1;
        result
    }
}
