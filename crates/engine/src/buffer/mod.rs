// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! The buffer seam between an input and the processing pipeline.
//!
//! A buffer takes ownership of delivery: the upstream hands a batch plus an
//! acknowledgement callback to [`Buffer::write_batch`] and must not invoke
//! the callback itself; the buffer guarantees it fires exactly once, after
//! every staged message has been resolved by the downstream consumer
//! driving [`Buffer::read_batch`].

use crate::acker::UpstreamAck;
use crate::clock::Clock;
use crate::error::Error;
use crate::message::MessageBatch;
use async_trait::async_trait;
use linkme::distributed_slice;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod memory;
pub(crate) mod store;
pub mod window;

/// The acknowledgement callback handed to the downstream consumer with each
/// read batch. Must be invoked exactly once: `None` on success, the error
/// otherwise.
pub type BatchAck = Box<dyn FnOnce(Option<Error>) + Send>;

/// A transactional staging buffer.
#[async_trait]
pub trait Buffer: Send + Sync {
    /// Stages a batch.
    ///
    /// `upstream_ack` is invoked exactly once by the buffer: on a fatal
    /// admission or mapping failure immediately (and the same error is also
    /// returned), otherwise once every staged message has been acknowledged
    /// downstream.
    async fn write_batch(
        &self,
        batch: MessageBatch,
        upstream_ack: UpstreamAck,
    ) -> Result<(), Error>;

    /// Returns the next readable batch and its acknowledgement callback.
    ///
    /// Suspends until a batch is available. Returns [`Error::EndOfBuffer`]
    /// once the buffer is drained after end-of-input, which terminates the
    /// consumer. Cancelling `cancel` signals end-of-input and returns
    /// [`Error::Cancelled`].
    async fn read_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(MessageBatch, BatchAck), Error>;

    /// Signals that no further [`Buffer::write_batch`] calls will be made.
    ///
    /// Idempotent; only the first call has an effect. Pending state is not
    /// flushed here: the reader performs the drain.
    fn end_of_input(&self);

    /// Releases retained resources and returns immediately.
    ///
    /// Does not wait for in-flight flushes. A graceful shutdown signals
    /// [`Buffer::end_of_input`] and drains [`Buffer::read_batch`] to
    /// [`Error::EndOfBuffer`] first; otherwise pending acknowledgements are
    /// left dangling.
    async fn close(&self) -> Result<(), Error>;
}

/// A factory for creating buffers from their configuration section.
pub struct BufferFactory {
    /// The plugin URN the factory registers under.
    pub urn: &'static str,
    /// Creates a buffer from the raw configuration section.
    pub create: fn(&serde_json::Value, Clock) -> Result<Arc<dyn Buffer>, Error>,
}

/// Registry of buffer factories, populated at link time by the buffer
/// implementations.
#[allow(unsafe_code)]
#[distributed_slice]
pub static BUFFER_FACTORIES: [BufferFactory] = [..];

/// Creates a buffer by plugin URN from a raw configuration section.
pub fn build_buffer(
    urn: &str,
    config: &serde_json::Value,
    clock: Clock,
) -> Result<Arc<dyn Buffer>, Error> {
    let factory = BUFFER_FACTORIES
        .iter()
        .find(|f| f.urn == urn)
        .ok_or_else(|| Error::UnknownBuffer {
            urn: urn.to_owned(),
        })?;
    (factory.create)(config, clock)
}

/// Creates the buffer a validated pipeline document asks for, or `None` for
/// an unbuffered pipeline.
pub fn build_from_config(
    config: &weir_config::buffer::BufferConfig,
    clock: Clock,
) -> Result<Option<Arc<dyn Buffer>>, Error> {
    match config {
        weir_config::buffer::BufferConfig::None => Ok(None),
        weir_config::buffer::BufferConfig::Window(window) => {
            let buffer: Arc<dyn Buffer> = window::WindowBuffer::from_config(window, clock)?;
            Ok(Some(buffer))
        }
        weir_config::buffer::BufferConfig::Memory(memory) => {
            let buffer: Arc<dyn Buffer> = memory::MemoryBuffer::from_config(memory);
            Ok(Some(buffer))
        }
    }
}
