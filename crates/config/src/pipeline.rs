// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline document specification.
//!
//! A document composes an input, an optional buffer, a chain of processors,
//! and an output. Only the buffer section is interpreted here; the other
//! sections are opaque to this crate and handed verbatim to the components
//! that own them.

use crate::PipelineId;
use crate::buffer::BufferConfig;
use crate::error::{Context, Error};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// A full pipeline document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Input section, interpreted by the input component.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,

    /// Buffer between the input and the processing pipeline.
    #[serde(default)]
    pub buffer: BufferConfig,

    /// The processing pipeline.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Output section, interpreted by the output component.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
}

/// The processor chain of a pipeline document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Processor sections in execution order, interpreted by the processors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processors: Vec<Value>,
}

impl PipelineConfig {
    /// Create a new [`PipelineConfig`] from a JSON string.
    pub fn from_json(pipeline_id: PipelineId, json_str: &str) -> Result<Self, Error> {
        let config: PipelineConfig =
            serde_json::from_str(json_str).map_err(|e| Error::DeserializationError {
                context: Context::new(pipeline_id.clone()),
                format: "JSON".to_owned(),
                details: e.to_string(),
            })?;
        config.validate(&pipeline_id)?;
        Ok(config)
    }

    /// Create a new [`PipelineConfig`] from a YAML string.
    pub fn from_yaml(pipeline_id: PipelineId, yaml_str: &str) -> Result<Self, Error> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml_str).map_err(|e| Error::DeserializationError {
                context: Context::new(pipeline_id.clone()),
                format: "YAML".to_owned(),
                details: e.to_string(),
            })?;
        config.validate(&pipeline_id)?;
        Ok(config)
    }

    /// Load a [`PipelineConfig`] from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(
        pipeline_id: PipelineId,
        path: P,
    ) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
            context: Context::new(pipeline_id.clone()),
            details: e.to_string(),
        })?;
        Self::from_json(pipeline_id, &contents)
    }

    /// Load a [`PipelineConfig`] from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(
        pipeline_id: PipelineId,
        path: P,
    ) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
            context: Context::new(pipeline_id.clone()),
            details: e.to_string(),
        })?;
        Self::from_yaml(pipeline_id, &contents)
    }

    /// Load a [`PipelineConfig`] from a file, detecting the format from the
    /// file extension.
    ///
    /// Supports:
    /// - JSON files: `.json`
    /// - YAML files: `.yaml`, `.yml`
    pub fn from_file<P: AsRef<Path>>(pipeline_id: PipelineId, path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("json") => Self::from_json_file(pipeline_id, path),
            Some("yaml" | "yml") => Self::from_yaml_file(pipeline_id, path),
            other => Err(Error::UnsupportedFileFormat {
                context: Context::new(pipeline_id),
                extension: other.unwrap_or("<none>").to_owned(),
            }),
        }
    }

    /// Validates the typed sections of the document.
    pub fn validate(&self, pipeline_id: &PipelineId) -> Result<(), Error> {
        self.buffer.validate(&Context::new(pipeline_id.clone()))
    }
}
