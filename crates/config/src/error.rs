// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.
//!
//! Note: All errors are contextualized with the pipeline id and the component
//! path inside the document, if applicable.

use miette::Diagnostic;
use std::fmt::Display;

/// Errors that can occur while loading or validating a pipeline document.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A collection of errors that occurred during parsing or validation.
    #[error("Invalid configuration: {errors:?}")]
    #[diagnostic(code(weir::config::invalid_configuration))]
    InvalidConfiguration {
        /// The individual errors.
        #[related]
        errors: Vec<Error>,
    },

    /// An error that occurred while reading a configuration file.
    #[error("File read error: {details}\nContext: {context}")]
    #[diagnostic(code(weir::config::file_read_error))]
    FileReadError {
        /// The context in which the error occurred.
        context: Context,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a configuration document.
    #[error("{format} deserialization error: {details}\nContext: {context}")]
    #[diagnostic(code(weir::config::deserialization_error))]
    DeserializationError {
        /// The context in which the error occurred.
        context: Context,
        /// The format of the configuration document (e.g. "YAML").
        format: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// The file extension does not identify a supported document format.
    #[error("Unsupported configuration file format `{extension}`\nContext: {context}")]
    #[diagnostic(code(weir::config::unsupported_file_format))]
    UnsupportedFileFormat {
        /// The context in which the error occurred.
        context: Context,
        /// The unrecognized extension.
        extension: String,
    },

    /// A mapping string inside the buffer section failed to parse.
    #[error("Invalid `{field}` mapping: {details}\nContext: {context}")]
    #[diagnostic(code(weir::config::invalid_mapping))]
    InvalidMapping {
        /// The context in which the error occurred.
        context: Context,
        /// The configuration field holding the mapping.
        field: String,
        /// The mapping parser diagnostics.
        details: String,
    },

    /// A field value is outside its permitted range.
    #[error("Invalid `{field}` value: {details}\nContext: {context}")]
    #[diagnostic(code(weir::config::invalid_value))]
    InvalidValue {
        /// The context in which the error occurred.
        context: Context,
        /// The offending field.
        field: String,
        /// Why the value is rejected.
        details: String,
    },
}

/// The location in the configuration a diagnostic refers to.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// The pipeline id, if applicable.
    pub pipeline_id: Option<crate::PipelineId>,
    /// Dotted path of the component inside the document (e.g. `buffer.window`).
    pub component: Option<String>,
}

impl Context {
    /// Creates a new context for the given pipeline.
    #[must_use]
    pub const fn new(pipeline_id: crate::PipelineId) -> Self {
        Self {
            pipeline_id: Some(pipeline_id),
            component: None,
        }
    }

    /// Returns the context narrowed to a component path.
    #[must_use]
    pub fn with_component(mut self, component: &str) -> Self {
        self.component = Some(component.to_owned());
        self
    }
}

impl Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pipeline_id) = &self.pipeline_id {
            write!(f, "Pipeline: '{pipeline_id}'")?;
        }
        if let Some(component) = &self.component {
            write!(f, " Component: '{component}'")?;
        }
        Ok(())
    }
}
