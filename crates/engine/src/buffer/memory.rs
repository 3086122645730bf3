// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Transparent in-memory staging buffer.
//!
//! Batches are staged in a bounded FIFO and handed downstream unchanged,
//! each with its original upstream acknowledgement: acks pass straight
//! through, so delivery semantics are whatever the surrounding transaction
//! model provides. Writers back-pressure once `limit` batches are staged.
//! Unlike the windowing buffer, staged batches are still delivered after
//! end-of-input; the FIFO drains before `EndOfBuffer`.

use crate::acker::UpstreamAck;
use crate::buffer::{BUFFER_FACTORIES, BatchAck, Buffer, BufferFactory};
use crate::error::Error;
use crate::message::MessageBatch;
use async_trait::async_trait;
use linkme::distributed_slice;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use weir_channel::mpsc;
use weir_config::buffer::MemoryBufferConfig;

/// URN for the transparent in-memory buffer.
pub const MEMORY_BUFFER_URN: &str = "urn:weir:buffer:memory";

struct StagedBatch {
    batch: MessageBatch,
    ack: UpstreamAck,
}

/// A bounded FIFO of staged batches. Intended for a single reader task.
pub struct MemoryBuffer {
    tx: mpsc::Sender<StagedBatch>,
    rx: mpsc::Receiver<StagedBatch>,
}

impl MemoryBuffer {
    /// Builds a memory buffer from its configuration section.
    #[must_use]
    pub fn from_config(config: &MemoryBufferConfig) -> Arc<Self> {
        Self::with_limit(config.limit.max(1))
    }

    /// Builds a memory buffer staging at most `limit` batches.
    #[must_use]
    pub fn with_limit(limit: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::Channel::new(limit);
        Arc::new(MemoryBuffer { tx, rx })
    }
}

#[async_trait]
impl Buffer for MemoryBuffer {
    async fn write_batch(
        &self,
        batch: MessageBatch,
        upstream_ack: UpstreamAck,
    ) -> Result<(), Error> {
        let staged = StagedBatch {
            batch,
            ack: upstream_ack,
        };
        match self.tx.send_async(staged).await {
            Ok(()) => Ok(()),
            Err(send_error) => {
                let err = Error::ChannelClosed {
                    details: "write after end of input".to_owned(),
                };
                (send_error.inner().ack)(Some(err.clone()));
                Err(err)
            }
        }
    }

    async fn read_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(MessageBatch, BatchAck), Error> {
        tokio::select! {
            received = self.rx.recv() => match received {
                Ok(staged) => Ok((staged.batch, staged.ack)),
                Err(_) => Err(Error::EndOfBuffer),
            },
            _ = cancel.cancelled() => {
                self.end_of_input();
                Err(Error::Cancelled)
            }
        }
    }

    fn end_of_input(&self) {
        self.tx.close();
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Register factory for the in-memory buffer.
#[allow(unsafe_code)]
#[distributed_slice(BUFFER_FACTORIES)]
pub static MEMORY_BUFFER_FACTORY: BufferFactory = BufferFactory {
    urn: MEMORY_BUFFER_URN,
    create: |cfg, _clock| {
        let config: MemoryBufferConfig =
            serde_json::from_value(cfg.clone()).map_err(|e| Error::Configuration {
                details: e.to_string(),
            })?;
        let buffer: Arc<dyn Buffer> = MemoryBuffer::from_config(&config);
        Ok(buffer)
    },
};
