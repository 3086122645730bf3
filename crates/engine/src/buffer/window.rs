// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Keyed windowing buffer.
//!
//! Incoming batches are split into per-message entries, grouped by a mapped
//! key into pending windows, and flushed downstream as one batch per window
//! once the window expires or the configured check predicate closes it.
//! Delivery is at-least-once: the upstream acknowledgement of a batch fires
//! only when every message it contributed has been acknowledged downstream,
//! and windows still pending at end-of-input are nacked so upstream replays
//! them.
//!
//! One cooperative timeout-queuer task runs per buffer. It wakes on a
//! half-window interval, on the refresh signal, or on end-of-input, and
//! marks expired windows for flushing. Flushable keys travel through a
//! capacity-one completion queue; enqueues are performed by spawned tasks so
//! neither the queuer nor a writer parks inside the store lock waiting for
//! a reader.

use crate::acker::{BatchAcker, UpstreamAck};
use crate::buffer::store::{PendingMessage, WindowStore};
use crate::buffer::{BUFFER_FACTORIES, BatchAck, Buffer, BufferFactory};
use crate::clock::Clock;
use crate::error::Error;
use crate::message::MessageBatch;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use linkme::distributed_slice;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weir_channel::mpmc;
use weir_config::buffer::WindowBufferConfig;
use weir_expr::{EvalContext, Expr, Template, Value};

/// URN for the keyed windowing buffer.
pub const WINDOW_BUFFER_URN: &str = "urn:weir:buffer:window";

/// Metadata key carrying the grouping key of a staged message.
pub const METADATA_BATCH_KEY: &str = "batch_key";
/// Metadata key carrying the expected window length (`0` when absent).
pub const METADATA_BATCH_EXPECTED_LENGTH: &str = "batch_expected_length";
/// Metadata key carrying the window size at the moment the message was
/// appended.
pub const METADATA_BATCH_LENGTH: &str = "batch_length";

struct Inner {
    size: chrono::Duration,
    half_size: Duration,
    timestamp_mapping: Expr,
    key_mapping: Template,
    length_mapping: Option<Template>,
    check: Option<Expr>,
    clock: Clock,
    store: WindowStore,
    completion_tx: mpmc::Sender<String>,
    completion_rx: mpmc::Receiver<String>,
    refresh: Notify,
    end_of_input: CancellationToken,
}

/// The keyed windowing buffer. See the module documentation.
pub struct WindowBuffer {
    inner: Arc<Inner>,
    queuer: Mutex<Option<JoinHandle<()>>>,
}

impl WindowBuffer {
    /// Builds a windowing buffer from its validated configuration section
    /// and spawns its timeout-queuer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &WindowBufferConfig, clock: Clock) -> Result<Arc<Self>, Error> {
        if config.timeout.is_zero() {
            return Err(Error::Configuration {
                details: "timeout must be positive".to_owned(),
            });
        }
        let size = chrono::Duration::from_std(config.timeout).map_err(|e| Error::Configuration {
            details: format!("timeout out of range: {e}"),
        })?;

        let timestamp_mapping =
            Expr::parse(&config.timestamp_mapping).map_err(|e| Error::Configuration {
                details: format!("timestamp_mapping: {e}"),
            })?;
        let key_mapping = Template::parse(&config.key_mapping).map_err(|e| Error::Configuration {
            details: format!("key_mapping: {e}"),
        })?;
        let length_mapping = config
            .length_mapping
            .as_deref()
            .map(Template::parse)
            .transpose()
            .map_err(|e| Error::Configuration {
                details: format!("length_mapping: {e}"),
            })?;
        let check = config
            .check
            .as_deref()
            .map(Expr::parse)
            .transpose()
            .map_err(|e| Error::Configuration {
                details: format!("check: {e}"),
            })?;

        let (completion_tx, completion_rx) =
            mpmc::Channel::new(NonZeroUsize::MIN);

        let inner = Arc::new(Inner {
            size,
            half_size: (config.timeout / 2).max(Duration::from_millis(1)),
            timestamp_mapping,
            key_mapping,
            length_mapping,
            check,
            clock,
            store: WindowStore::new(config.max_pending_keys),
            completion_tx,
            completion_rx,
            refresh: Notify::new(),
            end_of_input: CancellationToken::new(),
        });

        let queuer = tokio::spawn(run_timeout_queuer(inner.clone()));

        Ok(Arc::new(WindowBuffer {
            inner,
            queuer: Mutex::new(Some(queuer)),
        }))
    }

    /// Number of pending windows currently held.
    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.inner.store.lock().size()
    }

    /// Kicks the timeout queuer ahead of its next scheduled wake-up.
    pub fn refresh(&self) {
        self.inner.refresh.notify_one();
    }

    fn flush(&self, key: &str) -> Option<(MessageBatch, BatchAck)> {
        let window = self.inner.store.lock().remove(key)?;

        let mut batch = MessageBatch::with_capacity(window.messages.len());
        let mut acks = Vec::with_capacity(window.messages.len());
        for pending in window.messages {
            batch.push(pending.message);
            acks.push(pending.ack);
        }
        tracing::debug!(key = %key, len = batch.len(), "flushing window");

        let ack: BatchAck = Box::new(move |error: Option<Error>| {
            for ack in acks {
                ack.done(error.clone());
            }
        });
        Some((batch, ack))
    }

    fn drain(&self) -> Error {
        let windows = self.inner.store.lock().drain();
        let mut nacked = 0usize;
        for (_, window) in windows {
            for pending in window.messages {
                pending.ack.done(Some(Error::WindowClosed));
                nacked += 1;
            }
        }
        if nacked > 0 {
            tracing::debug!(messages = nacked, "nacked pending windows at end of input");
        }
        Error::EndOfBuffer
    }
}

#[async_trait]
impl Buffer for WindowBuffer {
    async fn write_batch(
        &self,
        batch: MessageBatch,
        upstream_ack: UpstreamAck,
    ) -> Result<(), Error> {
        let inner = &self.inner;
        let acker = BatchAcker::new(upstream_ack);

        if inner.end_of_input.is_cancelled() {
            let err = Error::ChannelClosed {
                details: "write after end of input".to_owned(),
            };
            acker.fail(err.clone());
            return Err(err);
        }

        let clock = inner.clock.clone();
        let now_fn = move || clock.now();

        for (index, mut message) in batch.into_iter().enumerate() {
            let ctx = EvalContext {
                payload: message.payload(),
                metadata: message.metadata(),
                batch_index: index,
                now: &now_fn,
            };

            let timestamp = match inner.timestamp_mapping.eval(&ctx) {
                Ok(value) => match resolve_timestamp(&value) {
                    Ok(timestamp) => timestamp,
                    Err(err) => {
                        acker.fail(err.clone());
                        return Err(err);
                    }
                },
                Err(e) => {
                    let err = Error::BadTimestamp {
                        details: e.to_string(),
                    };
                    acker.fail(err.clone());
                    return Err(err);
                }
            };

            let key = match inner.key_mapping.eval(&ctx) {
                Ok(key) => key,
                Err(e) => {
                    let err = Error::BadKey {
                        details: e.to_string(),
                    };
                    acker.fail(err.clone());
                    return Err(err);
                }
            };

            // Unparseable lengths degrade silently to zero.
            let expected_length = match &inner.length_mapping {
                Some(mapping) => mapping
                    .eval(&ctx)
                    .ok()
                    .and_then(|raw| raw.trim().parse::<usize>().ok())
                    .unwrap_or(0),
                None => 0,
            };

            message.set_metadata(METADATA_BATCH_KEY, key.as_str());
            message.set_metadata(METADATA_BATCH_EXPECTED_LENGTH, expected_length.to_string());

            let should_enqueue = {
                let mut windows = inner.store.lock();
                if !windows.can_admit(&key) {
                    let err = Error::Saturated {
                        max_pending_keys: windows.max_pending_keys(),
                    };
                    drop(windows);
                    acker.fail(err.clone());
                    return Err(err);
                }
                let (window, created) = windows
                    .get_or_create(&key, timestamp + inner.size, expected_length)
                    .expect("admission just checked under the same lock");
                if created {
                    tracing::debug!(key = %key, expiry = %window.expiry, "opened window");
                }

                message.set_metadata(
                    METADATA_BATCH_LENGTH,
                    (window.messages.len() + 1).to_string(),
                );

                let derived = match acker.derive() {
                    Ok(derived) => derived,
                    Err(err) => {
                        drop(windows);
                        acker.fail(err.clone());
                        return Err(err);
                    }
                };
                window.messages.push(PendingMessage {
                    message,
                    ack: derived,
                });

                // The queued flag is observed and set under the store lock,
                // so the check path and the timeout scan together enqueue a
                // window at most once.
                match &inner.check {
                    Some(check) if !window.queued => {
                        let newest = window
                            .messages
                            .last()
                            .expect("window message just appended");
                        let check_ctx = EvalContext {
                            payload: newest.message.payload(),
                            metadata: newest.message.metadata(),
                            batch_index: window.messages.len() - 1,
                            now: &now_fn,
                        };
                        // Erroring or non-boolean checks do not close the
                        // window.
                        let passes = check
                            .eval(&check_ctx)
                            .ok()
                            .and_then(|value| value.as_bool())
                            .unwrap_or(false);
                        if passes {
                            window.passes_check = true;
                            window.queued = true;
                        }
                        passes
                    }
                    _ => false,
                }
            };

            if should_enqueue {
                tracing::debug!(key = %key, "check predicate closed window");
                spawn_enqueue(inner, key);
            }
        }

        acker.seal();
        Ok(())
    }

    async fn read_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(MessageBatch, BatchAck), Error> {
        loop {
            tokio::select! {
                received = self.inner.completion_rx.recv() => {
                    match received {
                        Ok(key) => {
                            // The key may have been flushed by another
                            // reader or drained already.
                            if let Some(flushed) = self.flush(&key) {
                                return Ok(flushed);
                            }
                        }
                        Err(_) => return Err(self.drain()),
                    }
                }
                _ = cancel.cancelled() => {
                    self.end_of_input();
                    return Err(Error::Cancelled);
                }
                _ = self.inner.end_of_input.cancelled() => {
                    return Err(self.drain());
                }
            }
        }
    }

    fn end_of_input(&self) {
        self.inner.end_of_input.cancel();
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.completion_tx.close();
        if let Some(queuer) = self.queuer.lock().take() {
            queuer.abort();
        }
        Ok(())
    }
}

/// The single long-lived timeout-queuer task.
///
/// Polling at half the window length bounds the worst-case expiry detection
/// lag to `size / 2` without per-window timers; the refresh signal lets the
/// check path and tests shorten the wait.
async fn run_timeout_queuer(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(inner.half_size) => {}
            _ = inner.refresh.notified() => {}
            _ = inner.end_of_input.cancelled() => break,
        }

        let now = inner.clock.now();
        let expired: Vec<String> = {
            let mut windows = inner.store.lock();
            let mut expired = Vec::new();
            for (key, window) in windows.iter_mut() {
                if !window.queued && now > window.expiry {
                    window.queued = true;
                    expired.push(key.clone());
                }
            }
            expired
        };

        for key in expired {
            tracing::debug!(key = %key, "window expired");
            spawn_enqueue(&inner, key);
        }
    }
}

/// Hands a key to the completion queue from its own task so the sender's
/// rendezvous with a reader never blocks the caller.
fn spawn_enqueue(inner: &Arc<Inner>, key: String) {
    let tx = inner.completion_tx.clone();
    _ = tokio::spawn(async move {
        if tx.send_async(key).await.is_err() {
            tracing::debug!("completion queue closed before enqueue");
        }
    });
}

/// Interprets a timestamp mapping result as an instant: fractional unix
/// seconds, or an ISO-8601 string.
fn resolve_timestamp(value: &Value) -> Result<DateTime<Utc>, Error> {
    let bad = |details: String| Error::BadTimestamp { details };
    match value {
        Value::Int(secs) => DateTime::from_timestamp(*secs, 0)
            .ok_or_else(|| bad(format!("unix seconds out of range: {secs}"))),
        Value::Float(secs) => DateTime::from_timestamp_micros((secs * 1_000_000.0) as i64)
            .ok_or_else(|| bad(format!("unix seconds out of range: {secs}"))),
        Value::Str(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.with_timezone(&Utc));
            }
            if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Ok(parsed.and_utc());
            }
            if let Ok(secs) = text.trim().parse::<f64>() {
                return DateTime::from_timestamp_micros((secs * 1_000_000.0) as i64)
                    .ok_or_else(|| bad(format!("unix seconds out of range: {secs}")));
            }
            Err(bad(format!(
                "`{text}` is neither unix seconds nor ISO-8601"
            )))
        }
        other => Err(bad(format!("non-temporal mapping result: {other:?}"))),
    }
}

/// Register factory for the keyed windowing buffer.
#[allow(unsafe_code)]
#[distributed_slice(BUFFER_FACTORIES)]
pub static WINDOW_BUFFER_FACTORY: BufferFactory = BufferFactory {
    urn: WINDOW_BUFFER_URN,
    create: |cfg, clock| {
        let config: WindowBufferConfig =
            serde_json::from_value(cfg.clone()).map_err(|e| Error::Configuration {
                details: e.to_string(),
            })?;
        let buffer: Arc<dyn Buffer> = WindowBuffer::from_config(&config, clock)?;
        Ok(buffer)
    },
};
