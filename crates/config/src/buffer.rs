// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Buffer section of the pipeline document.
//!
//! The buffer sits between the input and the processing pipeline and owns
//! the delivery guarantees of everything it stages. `window` groups the
//! stream into per-key windows; `memory` is a transparent staging FIFO;
//! `none` passes batches straight through (the default).

use crate::error::{Context, Error};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use weir_expr::{Expr, Template};

/// Default admission limit on distinct live keys.
pub const DEFAULT_MAX_PENDING_KEYS: usize = 100;

/// Default number of staged batches in a memory buffer.
pub const DEFAULT_MEMORY_LIMIT: usize = 100;

/// The buffer variants a pipeline can be configured with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BufferConfig {
    /// No buffering; batches flow straight through.
    #[default]
    None,
    /// Keyed windowing buffer.
    Window(Box<WindowBufferConfig>),
    /// Transparent in-memory staging FIFO.
    Memory(MemoryBufferConfig),
}

impl BufferConfig {
    /// Validates the buffer section, contextualizing diagnostics with the
    /// component path.
    pub fn validate(&self, context: &Context) -> Result<(), Error> {
        match self {
            BufferConfig::None => Ok(()),
            BufferConfig::Window(config) => {
                config.validate(&context.clone().with_component("buffer.window"))
            }
            BufferConfig::Memory(config) => {
                config.validate(&context.clone().with_component("buffer.memory"))
            }
        }
    }
}

/// Configuration of the keyed windowing buffer.
///
/// Memory is bounded by `max_pending_keys * messages-per-window`; an
/// unbounded `max_pending_keys` of zero combined with unbounded window
/// contents gives unbounded memory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WindowBufferConfig {
    /// Per-message timestamp source. Must yield fractional unix seconds or
    /// an ISO-8601 string.
    #[serde(default = "default_timestamp_mapping")]
    pub timestamp_mapping: String,

    /// Admission limit on distinct live keys. Zero disables the bound.
    #[serde(default = "default_max_pending_keys")]
    pub max_pending_keys: usize,

    /// Window length, added to the first-message timestamp to compute the
    /// expiry of each window.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub timeout: Duration,

    /// Interpolated template producing the grouping key per message. An
    /// empty key is legal and distinct.
    pub key_mapping: String,

    /// Optional interpolated template producing the expected window length,
    /// used as a pre-allocation hint. Unparseable results degrade to zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_mapping: Option<String>,

    /// Optional early-closure predicate evaluated against the window
    /// contents after each append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

fn default_timestamp_mapping() -> String {
    "now()".to_owned()
}

fn default_max_pending_keys() -> usize {
    DEFAULT_MAX_PENDING_KEYS
}

impl WindowBufferConfig {
    /// Validates the mappings and bounds of the window buffer section.
    pub fn validate(&self, context: &Context) -> Result<(), Error> {
        let mut errors = Vec::new();

        if self.timeout.is_zero() {
            errors.push(Error::InvalidValue {
                context: context.clone(),
                field: "timeout".to_owned(),
                details: "window length must be positive".to_owned(),
            });
        }

        if let Err(e) = Expr::parse(&self.timestamp_mapping) {
            errors.push(Error::InvalidMapping {
                context: context.clone(),
                field: "timestamp_mapping".to_owned(),
                details: e.to_string(),
            });
        }
        if let Err(e) = Template::parse(&self.key_mapping) {
            errors.push(Error::InvalidMapping {
                context: context.clone(),
                field: "key_mapping".to_owned(),
                details: e.to_string(),
            });
        }
        if let Some(length_mapping) = &self.length_mapping {
            if let Err(e) = Template::parse(length_mapping) {
                errors.push(Error::InvalidMapping {
                    context: context.clone(),
                    field: "length_mapping".to_owned(),
                    details: e.to_string(),
                });
            }
        }
        if let Some(check) = &self.check {
            if let Err(e) = Expr::parse(check) {
                errors.push(Error::InvalidMapping {
                    context: context.clone(),
                    field: "check".to_owned(),
                    details: e.to_string(),
                });
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::InvalidConfiguration { errors }),
        }
    }
}

/// Configuration of the transparent in-memory buffer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MemoryBufferConfig {
    /// Maximum number of staged batches before writers back-pressure.
    #[serde(default = "default_memory_limit")]
    pub limit: usize,
}

fn default_memory_limit() -> usize {
    DEFAULT_MEMORY_LIMIT
}

impl MemoryBufferConfig {
    /// Validates the memory buffer section.
    pub fn validate(&self, context: &Context) -> Result<(), Error> {
        if self.limit == 0 {
            return Err(Error::InvalidValue {
                context: context.clone(),
                field: "limit".to_owned(),
                details: "staging limit must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn window_yaml() -> &'static str {
        r#"
window:
  timeout: 1s
  key_mapping: '${! json("sequence") }'
  length_mapping: '${! json("length") }'
  check: 'meta("batch_expected_length") == meta("batch_length")'
  max_pending_keys: 10
"#
    }

    #[test]
    fn test_window_config_deserializes() {
        let config: BufferConfig = serde_yaml::from_str(window_yaml()).unwrap();
        let BufferConfig::Window(window) = &config else {
            panic!("expected window buffer");
        };
        assert_eq!(window.timeout, Duration::from_secs(1));
        assert_eq!(window.max_pending_keys, 10);
        assert_eq!(window.timestamp_mapping, "now()");
        config.validate(&Context::default()).unwrap();
    }

    #[test]
    fn test_window_defaults() {
        let yaml = r#"
window:
  timeout: 250ms
  key_mapping: fixed-key
"#;
        let config: BufferConfig = serde_yaml::from_str(yaml).unwrap();
        let BufferConfig::Window(window) = &config else {
            panic!("expected window buffer");
        };
        assert_eq!(window.max_pending_keys, DEFAULT_MAX_PENDING_KEYS);
        assert!(window.length_mapping.is_none());
        assert!(window.check.is_none());
        config.validate(&Context::default()).unwrap();
    }

    #[test]
    fn test_window_missing_required_fields() {
        let yaml = r#"
window:
  key_mapping: fixed-key
"#;
        let result: Result<BufferConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err(), "timeout is required");
    }

    #[test]
    fn test_window_rejects_bad_mapping() {
        let yaml = r#"
window:
  timeout: 1s
  key_mapping: '${! frobnicate() }'
"#;
        let config: BufferConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate(&Context::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidMapping { ref field, .. } if field == "key_mapping"));
    }

    #[test]
    fn test_window_rejects_zero_timeout() {
        let yaml = r#"
window:
  timeout: 0s
  key_mapping: fixed-key
"#;
        let config: BufferConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate(&Context::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref field, .. } if field == "timeout"));
    }

    #[test]
    fn test_window_collects_multiple_errors() {
        let yaml = r#"
window:
  timeout: 0s
  key_mapping: '${! nope() }'
  check: '=='
"#;
        let config: BufferConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate(&Context::default()).unwrap_err();
        let Error::InvalidConfiguration { errors } = err else {
            panic!("expected aggregate error");
        };
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_memory_config() {
        let config: BufferConfig = serde_yaml::from_str("memory:\n  limit: 5\n").unwrap();
        config.validate(&Context::default()).unwrap();

        let config: BufferConfig = serde_yaml::from_str("memory: {}\n").unwrap();
        let BufferConfig::Memory(memory) = &config else {
            panic!("expected memory buffer");
        };
        assert_eq!(memory.limit, DEFAULT_MEMORY_LIMIT);

        let config: BufferConfig = serde_yaml::from_str("memory:\n  limit: 0\n").unwrap();
        assert!(config.validate(&Context::default()).is_err());
    }

    #[test]
    fn test_default_is_none() {
        let config = BufferConfig::default();
        assert!(matches!(config, BufferConfig::None));
        config.validate(&Context::default()).unwrap();
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
window:
  timeout: 1s
  key_mapping: k
  surprising_field: 1
"#;
        let result: Result<BufferConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }
}

