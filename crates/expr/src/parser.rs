// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Expression parser and evaluator.

use crate::{Error, EvalContext, Value};
use ::pest::Parser as _;
use ::pest::iterators::Pair;

#[allow(missing_docs)]
mod pest {
    #[derive(pest_derive::Parser)]
    #[grammar = "mapping.pest"]
    pub struct MappingPestParser;
}

pub(crate) use pest::Rule;

/// A parsed mapping expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A literal scalar.
    Literal(Value),
    /// A function over the message being mapped.
    Function(Func),
    /// A comparison between two operands.
    Compare {
        /// Comparison operator.
        op: CmpOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
}

/// The functions the mapping language defines.
#[derive(Debug, Clone)]
pub enum Func {
    /// Current UTC instant from the injected clock, as fractional unix seconds.
    Now,
    /// The payload parsed as JSON, optionally drilled into by a dot path.
    Json(Option<String>),
    /// A metadata value by key.
    Meta(String),
    /// The payload as a UTF-8 string.
    Content,
    /// The message position within its input batch.
    BatchIndex,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl Expr {
    /// Parses an expression from its source text.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut pairs =
            pest::MappingPestParser::parse(Rule::expression, input).map_err(|e| Error::Parse {
                details: e.to_string(),
            })?;
        let expression = pairs.next().ok_or_else(|| Error::Parse {
            details: "empty expression".to_owned(),
        })?;
        let comparison = expression
            .into_inner()
            .find(|p| p.as_rule() == Rule::comparison)
            .ok_or_else(|| Error::Parse {
                details: "expected a comparison".to_owned(),
            })?;
        parse_comparison(comparison)
    }

    /// Evaluates the expression against a message context.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value, Error> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Function(func) => eval_function(func, ctx),
            Expr::Compare { op, lhs, rhs } => {
                let lhs = lhs.eval(ctx)?;
                let rhs = rhs.eval(ctx)?;
                Ok(Value::Bool(compare(*op, &lhs, &rhs)))
            }
        }
    }
}

fn parse_comparison(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    let mut inner = pair.into_inner();
    let lhs = parse_operand(inner.next().ok_or_else(|| Error::Parse {
        details: "missing operand".to_owned(),
    })?)?;

    match inner.next() {
        None => Ok(lhs),
        Some(op_pair) => {
            let op = match op_pair.as_str() {
                "==" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                ">=" => CmpOp::Ge,
                "<=" => CmpOp::Le,
                ">" => CmpOp::Gt,
                "<" => CmpOp::Lt,
                other => {
                    return Err(Error::Parse {
                        details: format!("unknown operator `{other}`"),
                    });
                }
            };
            let rhs = parse_operand(inner.next().ok_or_else(|| Error::Parse {
                details: "missing right-hand operand".to_owned(),
            })?)?;
            Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })
        }
    }
}

fn parse_operand(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    let inner = pair.into_inner().next().ok_or_else(|| Error::Parse {
        details: "empty operand".to_owned(),
    })?;
    match inner.as_rule() {
        Rule::function => parse_function(inner),
        Rule::string => Ok(Expr::Literal(Value::Str(unescape(string_body(&inner))))),
        Rule::number => {
            let text = inner.as_str();
            if text.contains('.') {
                let v = text.parse::<f64>().map_err(|e| Error::Parse {
                    details: format!("invalid number `{text}`: {e}"),
                })?;
                Ok(Expr::Literal(Value::Float(v)))
            } else {
                let v = text.parse::<i64>().map_err(|e| Error::Parse {
                    details: format!("invalid number `{text}`: {e}"),
                })?;
                Ok(Expr::Literal(Value::Int(v)))
            }
        }
        Rule::boolean => Ok(Expr::Literal(Value::Bool(inner.as_str() == "true"))),
        other => Err(Error::Parse {
            details: format!("unexpected operand rule {other:?}"),
        }),
    }
}

fn parse_function(pair: Pair<'_, Rule>) -> Result<Expr, Error> {
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .ok_or_else(|| Error::Parse {
            details: "missing function name".to_owned(),
        })?
        .as_str()
        .to_owned();
    let args: Vec<String> = match inner.next() {
        Some(arguments) => arguments
            .into_inner()
            .map(|s| unescape(string_body(&s)))
            .collect(),
        None => Vec::new(),
    };

    let func = match (name.as_str(), args.len()) {
        ("now", 0) => Func::Now,
        ("json", 0) => Func::Json(None),
        ("json", 1) => Func::Json(args.into_iter().next()),
        ("meta", 1) => Func::Meta(args.into_iter().next().unwrap_or_default()),
        ("content", 0) => Func::Content,
        ("batch_index", 0) => Func::BatchIndex,
        ("now" | "content" | "batch_index", _) => {
            return Err(Error::BadArity {
                name: name.clone(),
                expected: 0,
            });
        }
        ("meta" | "json", _) => {
            return Err(Error::BadArity {
                name: name.clone(),
                expected: 1,
            });
        }
        _ => return Err(Error::UnknownFunction { name: name.clone() }),
    };
    Ok(Expr::Function(func))
}

fn string_body<'a>(pair: &Pair<'a, Rule>) -> &'a str {
    // string = "\"" ~ inner_str ~ "\"" — strip the quotes.
    let text = pair.as_str();
    &text[1..text.len() - 1]
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn eval_function(func: &Func, ctx: &EvalContext<'_>) -> Result<Value, Error> {
    match func {
        Func::Now => {
            let now = (ctx.now)();
            Ok(Value::Float(now.timestamp_micros() as f64 / 1_000_000.0))
        }
        Func::Json(path) => {
            let root = ctx.payload_json()?;
            match path {
                None => Ok(Value::from_json(&root)),
                Some(path) => Ok(lookup_path(&root, path)),
            }
        }
        Func::Meta(key) => Ok(ctx
            .metadata
            .get(key)
            .map_or(Value::Null, |v| Value::Str(v.clone()))),
        Func::Content => Ok(Value::Str(
            String::from_utf8_lossy(ctx.payload).into_owned(),
        )),
        Func::BatchIndex => Ok(Value::Int(ctx.batch_index as i64)),
    }
}

fn lookup_path(root: &serde_json::Value, path: &str) -> Value {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => match map.get(segment) {
                Some(next) => next,
                None => return Value::Null,
            },
            serde_json::Value::Array(items) => match segment.parse::<usize>().ok() {
                Some(index) => match items.get(index) {
                    Some(next) => next,
                    None => return Value::Null,
                },
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    Value::from_json(current)
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
    // Numeric comparison whenever both sides coerce to numbers; metadata
    // values arrive as strings, so "7" == 7 must hold.
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
        };
    }

    match op {
        CmpOp::Eq => structural_eq(lhs, rhs),
        CmpOp::Ne => !structural_eq(lhs, rhs),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => match op {
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                _ => false,
            },
            _ => false,
        },
    }
}

fn structural_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 12, 0, 0).unwrap()
    }

    fn eval(expr: &str, payload: &str, metadata: &[(&str, &str)]) -> Value {
        let metadata: BTreeMap<String, String> = metadata
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let now = fixed_now;
        let ctx = EvalContext {
            payload: payload.as_bytes(),
            metadata: &metadata,
            batch_index: 3,
            now: &now,
        };
        Expr::parse(expr).unwrap().eval(&ctx).unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("42", "{}", &[]), Value::Int(42));
        assert_eq!(eval("-7.5", "{}", &[]), Value::Float(-7.5));
        assert_eq!(eval("true", "{}", &[]), Value::Bool(true));
        assert_eq!(
            eval("\"hello\"", "{}", &[]),
            Value::Str("hello".to_owned())
        );
    }

    #[test]
    fn test_json_paths() {
        let payload = r#"{"id":"abc","nested":{"n":7},"items":[1,2,3]}"#;
        assert_eq!(
            eval("json(\"id\")", payload, &[]),
            Value::Str("abc".to_owned())
        );
        assert_eq!(eval("json(\"nested.n\")", payload, &[]), Value::Int(7));
        assert_eq!(eval("json(\"items.1\")", payload, &[]), Value::Int(2));
        assert_eq!(eval("json(\"missing\")", payload, &[]), Value::Null);
    }

    #[test]
    fn test_json_invalid_payload_errors() {
        let ctx_meta = BTreeMap::new();
        let now = fixed_now;
        let ctx = EvalContext {
            payload: b"not json",
            metadata: &ctx_meta,
            batch_index: 0,
            now: &now,
        };
        let expr = Expr::parse("json(\"id\")").unwrap();
        assert!(matches!(expr.eval(&ctx), Err(Error::Eval { .. })));
    }

    #[test]
    fn test_meta_and_batch_index() {
        assert_eq!(
            eval("meta(\"tenant\")", "{}", &[("tenant", "acme")]),
            Value::Str("acme".to_owned())
        );
        assert_eq!(eval("meta(\"absent\")", "{}", &[]), Value::Null);
        assert_eq!(eval("batch_index()", "{}", &[]), Value::Int(3));
    }

    #[test]
    fn test_now_uses_injected_clock() {
        let expected = fixed_now().timestamp() as f64;
        assert_eq!(eval("now()", "{}", &[]), Value::Float(expected));
    }

    #[test]
    fn test_numeric_coercion_in_comparisons() {
        // Metadata values are strings but compare numerically.
        let metadata = [("batch_expected_length", "7"), ("batch_length", "7")];
        assert_eq!(
            eval(
                "meta(\"batch_expected_length\") == meta(\"batch_length\")",
                "{}",
                &metadata
            ),
            Value::Bool(true)
        );
        assert_eq!(
            eval("meta(\"batch_length\") >= 10", "{}", &[("batch_length", "9")]),
            Value::Bool(false)
        );
        assert_eq!(eval("json(\"n\") == 5", r#"{"n":5}"#, &[]), Value::Bool(true));
    }

    #[test]
    fn test_string_comparisons() {
        assert_eq!(
            eval("\"a\" != \"b\"", "{}", &[]),
            Value::Bool(true)
        );
        // Null only equals Null.
        assert_eq!(
            eval("meta(\"absent\") == \"\"", "{}", &[]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Expr::parse("=="), Err(Error::Parse { .. })));
        assert!(matches!(
            Expr::parse("frobnicate()"),
            Err(Error::UnknownFunction { .. })
        ));
        assert!(matches!(
            Expr::parse("meta()"),
            Err(Error::BadArity { .. })
        ));
        assert!(matches!(
            Expr::parse("now(\"x\")"),
            Err(Error::BadArity { .. })
        ));
    }
}
