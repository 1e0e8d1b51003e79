// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::context::ToolContext;
use crate::tool::{Tool, ToolError, ToolInput, ToolParameter};

/// Arithmetic evaluator: `+ - * /`, parentheses, unary minus.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "expression",
            "string",
            "Arithmetic expression, e.g. 15*23+100.",
        )]
    }

    async fn execute(&self, input: &ToolInput, _ctx: &ToolContext) -> Result<String, ToolError> {
        let expression = input
            .str_arg_or_raw("expression")
            .ok_or_else(|| ToolError::invalid("Missing expression."))?;
        let value = evaluate(&expression).map_err(ToolError::invalid)?;
        // Print integers without a trailing ".0".
        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{}", value as i64))
        } else {
            Ok(format!("{value}"))
        }
    }
}

/// Recursive-descent evaluation over a token-free char cursor.
fn evaluate(expression: &str) -> Result<f64, String> {
    let chars: Vec<char> = expression.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return Err("Empty expression.".into());
    }
    let mut pos = 0usize;
    let value = parse_sum(&chars, &mut pos)?;
    if pos != chars.len() {
        return Err(format!("Unexpected character at position {pos}."));
    }
    if !value.is_finite() {
        return Err("Result is not finite.".into());
    }
    Ok(value)
}

fn parse_sum(chars: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_product(chars, pos)?;
    while let Some(&op) = chars.get(*pos) {
        match op {
            '+' => {
                *pos += 1;
                value += parse_product(chars, pos)?;
            }
            '-' => {
                *pos += 1;
                value -= parse_product(chars, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_product(chars: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_atom(chars, pos)?;
    while let Some(&op) = chars.get(*pos) {
        match op {
            '*' => {
                *pos += 1;
                value *= parse_atom(chars, pos)?;
            }
            '/' => {
                *pos += 1;
                let divisor = parse_atom(chars, pos)?;
                if divisor == 0.0 {
                    return Err("Division by zero.".into());
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_atom(chars: &[char], pos: &mut usize) -> Result<f64, String> {
    match chars.get(*pos) {
        Some('-') => {
            *pos += 1;
            Ok(-parse_atom(chars, pos)?)
        }
        Some('(') => {
            *pos += 1;
            let value = parse_sum(chars, pos)?;
            if chars.get(*pos) != Some(&')') {
                return Err("Missing closing parenthesis.".into());
            }
            *pos += 1;
            Ok(value)
        }
        Some(c) if c.is_ascii_digit() || *c == '.' => {
            let start = *pos;
            while matches!(chars.get(*pos), Some(c) if c.is_ascii_digit() || *c == '.') {
                *pos += 1;
            }
            let literal: String = chars[start..*pos].iter().collect();
            literal
                .parse::<f64>()
                .map_err(|_| format!("Invalid number: {literal}"))
        }
        Some(c) => Err(format!("Unexpected character: {c}")),
        None => Err("Unexpected end of expression.".into()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
