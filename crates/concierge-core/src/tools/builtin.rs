//! Built-in tools: arithmetic and wall-clock time.
//!
//! Both are pure, dependency-free capabilities every deployment gets;
//! collaborator-backed tools (search, CRM) are registered by the embedding
//! binary.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::error::{CoreError, Result};
use crate::tools::traits::Tool;

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Evaluates infix arithmetic expressions: `+ - * / % ^`, parentheses,
/// unary minus.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression, e.g. `(199.99 * 3) * 1.0825`. \
         Supports + - * / % ^ and parentheses."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The infix arithmetic expression to evaluate"
                }
            },
            "required": ["expression"],
            "additionalProperties": false
        })
    }

    async fn run(&self, arguments: Value) -> Result<Value> {
        let expression = arguments["expression"]
            .as_str()
            .ok_or_else(|| CoreError::InvalidArguments {
                tool: "calculator".into(),
                reason: "`expression` must be a string".into(),
            })?;

        let value = evaluate(expression).map_err(|reason| CoreError::InvalidArguments {
            tool: "calculator".into(),
            reason,
        })?;
        Ok(Value::String(format_number(value)))
    }
}

/// Render without a trailing `.0` when the result is integral.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(Op),
    LeftParen,
    RightParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Neg,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div | Self::Rem => 2,
            Self::Neg => 3,
            Self::Pow => 4,
        }
    }

    fn right_associative(self) -> bool {
        matches!(self, Self::Pow | Self::Neg)
    }
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' || c == '_' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal: String = input[start..end].chars().filter(|&c| c != '_').collect();
                let value: f64 = literal
                    .parse()
                    .map_err(|_| format!("invalid number `{literal}`"))?;
                tokens.push(Token::Number(value));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Op(Op::Add));
            }
            '-' => {
                chars.next();
                // `-` is unary at the start of the expression, after an
                // operator, or after an opening parenthesis.
                let unary = matches!(
                    tokens.last(),
                    None | Some(Token::Op(_)) | Some(Token::LeftParen)
                );
                tokens.push(Token::Op(if unary { Op::Neg } else { Op::Sub }));
            }
            '*' => {
                chars.next();
                tokens.push(Token::Op(Op::Mul));
            }
            '/' => {
                chars.next();
                tokens.push(Token::Op(Op::Div));
            }
            '%' => {
                chars.next();
                tokens.push(Token::Op(Op::Rem));
            }
            '^' => {
                chars.next();
                tokens.push(Token::Op(Op::Pow));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            other => return Err(format!("unexpected character `{other}`")),
        }
    }

    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    Ok(tokens)
}

/// Shunting-yard: infix tokens to reverse Polish order.
fn to_rpn(tokens: Vec<Token>) -> std::result::Result<Vec<Token>, String> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();

    for token in tokens {
        match token {
            Token::Number(_) => output.push(token),
            Token::Op(op) => {
                while let Some(Token::Op(top)) = stack.last() {
                    let pops = top.precedence() > op.precedence()
                        || (top.precedence() == op.precedence() && !op.right_associative());
                    if pops {
                        output.push(stack.pop().ok_or("operator stack underflow")?);
                    } else {
                        break;
                    }
                }
                stack.push(token);
            }
            Token::LeftParen => stack.push(token),
            Token::RightParen => {
                loop {
                    match stack.pop() {
                        Some(Token::LeftParen) => break,
                        Some(t) => output.push(t),
                        None => return Err("unbalanced parentheses".into()),
                    }
                }
            }
        }
    }

    while let Some(token) = stack.pop() {
        if token == Token::LeftParen {
            return Err("unbalanced parentheses".into());
        }
        output.push(token);
    }
    Ok(output)
}

fn eval_rpn(tokens: &[Token]) -> std::result::Result<f64, String> {
    let mut stack: Vec<f64> = Vec::new();

    for token in tokens {
        match token {
            Token::Number(n) => stack.push(*n),
            Token::Op(Op::Neg) => {
                let v = stack.pop().ok_or("missing operand")?;
                stack.push(-v);
            }
            Token::Op(op) => {
                let rhs = stack.pop().ok_or("missing operand")?;
                let lhs = stack.pop().ok_or("missing operand")?;
                let value = match op {
                    Op::Add => lhs + rhs,
                    Op::Sub => lhs - rhs,
                    Op::Mul => lhs * rhs,
                    Op::Rem => {
                        if rhs == 0.0 {
                            return Err("remainder by zero".into());
                        }
                        lhs % rhs
                    }
                    Op::Div => {
                        if rhs == 0.0 {
                            return Err("division by zero".into());
                        }
                        lhs / rhs
                    }
                    Op::Pow => lhs.powf(rhs),
                    Op::Neg => unreachable!("handled above"),
                };
                stack.push(value);
            }
            Token::LeftParen | Token::RightParen => {
                return Err("unbalanced parentheses".into());
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(value), true) if value.is_finite() => Ok(value),
        (Some(_), true) => Err("result is not a finite number".into()),
        _ => Err("malformed expression".into()),
    }
}

fn evaluate(expression: &str) -> std::result::Result<f64, String> {
    let tokens = tokenize(expression)?;
    let rpn = to_rpn(tokens)?;
    eval_rpn(&rpn)
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Reports the current UTC time in RFC 3339.
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC (RFC 3339)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn run(&self, _arguments: Value) -> Result<Value> {
        Ok(Value::String(
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        ))
    }
}
