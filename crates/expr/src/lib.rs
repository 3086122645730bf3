// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Mapping expression language for weir buffers.
//!
//! Mappings are small, side-effect-free expressions evaluated per message:
//! a timestamp source (`now()`, `json("ts")`), a grouping key template
//! (`literal-${! meta("tenant") }`), a length hint, or a boolean window-close
//! predicate (`meta("batch_expected_length") == meta("batch_length")`).
//!
//! The grammar lives in `mapping.pest`; see [`Expr::parse`] and
//! [`Template::parse`] for the two entry points.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

mod parser;
mod template;

pub use parser::Expr;
pub use template::Template;

/// Errors raised while parsing or evaluating a mapping.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The mapping source text does not conform to the grammar.
    #[error("mapping parse error: {details}")]
    Parse {
        /// Parser diagnostics, including the offending location.
        details: String,
    },

    /// The mapping references a function the language does not define.
    #[error("unknown mapping function `{name}`")]
    UnknownFunction {
        /// The unrecognized function name.
        name: String,
    },

    /// A known function was invoked with the wrong number of arguments.
    #[error("mapping function `{name}` expects {expected} argument(s)")]
    BadArity {
        /// The function name.
        name: String,
        /// The number of arguments the function accepts.
        expected: usize,
    },

    /// The mapping could not be evaluated against the message.
    #[error("mapping evaluation error: {details}")]
    Eval {
        /// A description of the failure.
        details: String,
    },
}

/// A scalar mapping result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value (missing JSON path or metadata key).
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    Str(String),
}

impl Value {
    /// Converts a JSON value into a mapping value. Objects and arrays are
    /// carried as their compact JSON text.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }

    /// Returns the numeric form of the value, coercing numeric strings.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Returns the boolean form of the value, if it has one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// The message-scoped inputs a mapping is evaluated against.
pub struct EvalContext<'a> {
    /// Raw message payload.
    pub payload: &'a [u8],
    /// Message metadata.
    pub metadata: &'a BTreeMap<String, String>,
    /// Position of the message within its input batch.
    pub batch_index: usize,
    /// Clock capability backing `now()`.
    pub now: &'a dyn Fn() -> DateTime<Utc>,
}

impl<'a> EvalContext<'a> {
    /// Parses the payload as JSON.
    pub(crate) fn payload_json(&self) -> Result<serde_json::Value, Error> {
        serde_json::from_slice(self.payload).map_err(|e| Error::Eval {
            details: format!("payload is not valid JSON: {e}"),
        })
    }
}
