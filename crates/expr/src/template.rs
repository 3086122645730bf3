// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Interpolated string templates.
//!
//! A template is literal text with `${! <expression> }` segments, e.g.
//! `tenant-${! meta("tenant") }`. A template consisting solely of literal
//! text never fails to evaluate.

use crate::{Error, EvalContext, Expr};

/// A parsed interpolated template.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Interpolation(Expr),
}

impl Template {
    /// Parses a template from its source text.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut rest = input;

        while let Some(start) = rest.find("${!") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_owned()));
            }
            let after_marker = &rest[start + 3..];
            let end = find_closing_brace(after_marker).ok_or_else(|| Error::Parse {
                details: format!("unterminated interpolation in template `{input}`"),
            })?;
            let expr_src = after_marker[..end].trim();
            segments.push(Segment::Interpolation(Expr::parse(expr_src)?));
            rest = &after_marker[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_owned()));
        }

        Ok(Template { segments })
    }

    /// Evaluates the template against a message context.
    ///
    /// Absent values render as the empty string; an empty result is a legal,
    /// distinct key.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<String, Error> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Interpolation(expr) => {
                    let value = expr.eval(ctx)?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}

/// Finds the interpolation-terminating `}`, skipping braces inside quoted
/// strings.
fn find_closing_brace(input: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '}' if !in_string => return Some(i),
            _ => {}
        }
    }
    None
}
