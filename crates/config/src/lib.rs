// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration model for weir stream pipelines.
//!
//! A pipeline document composes `input -> buffer -> processors -> output`.
//! The buffer section is fully typed here; input, processor, and output
//! sections are opaque JSON values interpreted by the components that own
//! them. Mapping strings inside the buffer section are parse-validated at
//! load time so malformed mappings surface as configuration diagnostics
//! instead of runtime failures.

pub mod buffer;
pub mod error;
pub mod pipeline;

/// Identifier of a pipeline, used to contextualize diagnostics.
pub type PipelineId = String;
