//! Recursive-descent parser for Graphite-style target expressions.
//!
//! Grammar (simplified):
//! ```text
//! expr         = const | string | name-or-call
//! const        = [+-]? digits ('.' digits)? ([eE][+-]? digits)?
//! string       = '"' …not-" '"'  |  '\'' …not-' '\''
//! name-or-call = name ( '(' arglist ')' )?
//! arglist      = expr ((',' | ' ') expr)*
//! ```
//!
//! Names admit glob characters and brace expansion: commas and closing
//! braces terminate a name only at brace depth zero, so
//! `servers.{a,b}.cpu` scans as a single selector.

use thiserror::Error;

use crate::ast::Expr;
use crate::error::EvalError;
use crate::types::is_name_char;

/// A parse failure: which rule failed, and the unconsumed input at the
/// offending byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} at {remainder:?}")]
pub struct ParseError<'a> {
    pub kind: EvalError,
    pub remainder: &'a str,
}

fn fail<T>(kind: EvalError, remainder: &str) -> Result<T, ParseError<'_>> {
    Err(ParseError { kind, remainder })
}

/// Parse a target expression, returning the tree and the unconsumed tail.
/// Leading whitespace is skipped; callers expect an empty tail at top level.
pub fn parse(input: &str) -> Result<(Expr, &str), ParseError<'_>> {
    parse_expr(input)
}

fn parse_expr(input: &str) -> Result<(Expr, &str), ParseError<'_>> {
    let input = input.trim_start();
    let Some(&first) = input.as_bytes().first() else {
        return fail(EvalError::MissingExpr, input);
    };

    if first.is_ascii_digit() || first == b'-' || first == b'+' {
        return parse_const(input);
    }
    if first == b'\'' || first == b'"' {
        let (val, rest) = parse_string(input)?;
        return Ok((Expr::String { val: val.to_string() }, rest));
    }

    let (name, rest) = parse_name(input);
    if name.is_empty() {
        return fail(EvalError::MissingArgument, rest);
    }

    if rest.as_bytes().first() == Some(&b'(') {
        let (arg_string, args, rest) = parse_arg_list(rest)?;
        let expr = Expr::Func {
            target: name.to_string(),
            args,
            arg_string,
        };
        return Ok((expr, rest));
    }

    Ok((Expr::Name { target: name.to_string() }, rest))
}

/// Slurp every byte that could belong to a floating-point literal and let
/// `f64::from_str` sort out validity.
fn parse_const(input: &str) -> Result<(Expr, &str), ParseError<'_>> {
    let end = input
        .as_bytes()
        .iter()
        .position(|c| !matches!(c, b'0'..=b'9' | b'+' | b'-' | b'.' | b'e' | b'E'))
        .unwrap_or(input.len());
    match input[..end].parse::<f64>() {
        Ok(val) => Ok((Expr::Const { val }, &input[end..])),
        Err(_) => fail(EvalError::UnexpectedCharacter, input),
    }
}

fn parse_string(input: &str) -> Result<(&str, &str), ParseError<'_>> {
    let quote = input.as_bytes()[0];
    let body = &input[1..];
    match body.as_bytes().iter().position(|&c| c == quote) {
        Some(end) => Ok((&body[..end], &body[end + 1..])),
        None => fail(EvalError::MissingQuote, body),
    }
}

/// Scan a metric name, tracking brace depth so brace-expansion selectors
/// keep their inner commas. Never fails; may return an empty name.
fn parse_name(input: &str) -> (&str, &str) {
    let bytes = input.as_bytes();
    let mut braces = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => braces += 1,
            b'}' => {
                if braces == 0 {
                    break;
                }
                braces -= 1;
            }
            b',' => {
                if braces == 0 {
                    break;
                }
            }
            c if is_name_char(c) => {}
            _ => break,
        }
        i += 1;
    }
    (&input[..i], &input[i..])
}

/// Parse `(arg, arg, …)`, capturing the verbatim text between the outer
/// parentheses via slice-length arithmetic. Arguments are separated by a
/// single comma or space.
fn parse_arg_list(input: &str) -> Result<(String, Vec<Expr>, &str), ParseError<'_>> {
    debug_assert!(input.starts_with('('));
    let body = &input[1..];

    let lead = body.trim_start();
    if let Some(rest) = lead.strip_prefix(')') {
        let arg_string = body[..body.len() - lead.len()].to_string();
        return Ok((arg_string, Vec::new(), rest));
    }

    let mut args = Vec::new();
    let mut rest = body;
    loop {
        let (arg, r) = parse_expr(rest)?;
        args.push(arg);
        rest = r;
        match rest.as_bytes().first() {
            None => return fail(EvalError::MissingComma, rest),
            Some(b')') => {
                let arg_string = body[..body.len() - rest.len()].to_string();
                return Ok((arg_string, args, &rest[1..]));
            }
            Some(b',') | Some(b' ') => rest = &rest[1..],
            Some(_) => return fail(EvalError::UnexpectedCharacter, rest),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════
