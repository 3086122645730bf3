// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the buffer engine.
//!
//! Important note: these errors are `Clone` because a single failure may be
//! fanned out to every derived acknowledgement of a batch, and Send-safe so
//! they can cross writer/reader task boundaries.

/// Errors surfaced by the buffer engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The timestamp mapping produced neither fractional unix seconds nor an
    /// ISO-8601 string. Fatal for the whole input batch.
    #[error("invalid timestamp mapping result: {details}")]
    BadTimestamp {
        /// What the mapping produced instead.
        details: String,
    },

    /// The key mapping failed to evaluate. Fatal for the whole input batch.
    #[error("key mapping failed: {details}")]
    BadKey {
        /// The evaluation diagnostics.
        details: String,
    },

    /// Admission was denied because the buffer already holds the maximum
    /// number of pending keys. The writer must retry or route elsewhere.
    #[error("buffer saturated: {max_pending_keys} pending keys already live")]
    Saturated {
        /// The configured admission limit.
        max_pending_keys: usize,
    },

    /// A derived acknowledgement was requested after the upstream
    /// acknowledgement already fired.
    #[error("acknowledgement derived after the upstream ack fired")]
    AckerClosed,

    /// The window holding the message was discarded by a graceful shutdown
    /// before it could be flushed; upstream should replay on restart.
    #[error("window closed before flushing")]
    WindowClosed,

    /// The buffer is fully drained; no further batches will be produced.
    /// This terminates the consumer and is not an operator fault.
    #[error("end of buffer")]
    EndOfBuffer,

    /// The read context was cancelled.
    #[error("read cancelled")]
    Cancelled,

    /// An internal queue was closed while still in use.
    #[error("internal channel closed: {details}")]
    ChannelClosed {
        /// Which queue failed.
        details: String,
    },

    /// The buffer could not be constructed from its configuration section.
    #[error("invalid buffer configuration: {details}")]
    Configuration {
        /// The configuration diagnostics.
        details: String,
    },

    /// No buffer factory is registered under the requested URN.
    #[error("unknown buffer plugin `{urn}`")]
    UnknownBuffer {
        /// The unresolved plugin URN.
        urn: String,
    },
}
