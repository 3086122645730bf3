// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Keyed windowing buffer engine.
//!
//! The buffer is the transactional staging stage of a weir pipeline: an
//! upstream input hands it batches together with an acknowledgement
//! callback, a downstream consumer reads aggregated batches back out, and
//! the buffer guarantees the upstream callback fires exactly once per batch,
//! after every message it staged has been resolved downstream.
//!
//! Two implementations are provided: the keyed windowing buffer
//! ([`buffer::window::WindowBuffer`]), which groups messages into per-key
//! windows closed by time or by a configured predicate, and the transparent
//! in-memory FIFO ([`buffer::memory::MemoryBuffer`]). Both register
//! themselves in [`buffer::BUFFER_FACTORIES`] under their URN.

pub use linkme::distributed_slice;

pub mod acker;
pub mod buffer;
pub mod clock;
pub mod error;
pub mod message;
pub mod testing;

pub use acker::{BatchAcker, DerivedAck, UpstreamAck};
pub use buffer::{BUFFER_FACTORIES, BatchAck, Buffer, BufferFactory, build_buffer};
pub use clock::Clock;
pub use error::Error;
pub use message::{Message, MessageBatch};
