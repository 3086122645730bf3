// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Message and batch definitions for the buffer engine.

use bytes::Bytes;
use std::collections::BTreeMap;

/// A single message traversing the pipeline: an opaque payload plus string
/// metadata.
///
/// The windowing buffer emits three metadata keys on every message it
/// stages: `batch_key` (the grouping key), `batch_expected_length` (the
/// parsed length hint, `0` when absent), and `batch_length` (the running
/// count of messages in the window when this message was appended).
#[derive(Debug, Clone, Default)]
pub struct Message {
    payload: Bytes,
    metadata: BTreeMap<String, String>,
}

impl Message {
    /// Creates a message from a payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Message {
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style metadata attachment.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Returns a metadata value by key.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Sets a metadata value, replacing any previous value for the key.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        _ = self.metadata.insert(key.into(), value.into());
    }
}

/// An ordered batch of messages.
#[derive(Debug, Clone, Default)]
pub struct MessageBatch(Vec<Message>);

impl MessageBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        MessageBatch(Vec::new())
    }

    /// Creates a batch with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        MessageBatch(Vec::with_capacity(capacity))
    }

    /// Appends a message to the batch.
    pub fn push(&mut self, message: Message) {
        self.0.push(message);
    }

    /// Returns the number of messages in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the batch holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the message at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.0.get(index)
    }

    /// Iterates over the messages in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }
}

impl From<Vec<Message>> for MessageBatch {
    fn from(messages: Vec<Message>) -> Self {
        MessageBatch(messages)
    }
}

impl IntoIterator for MessageBatch {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageBatch {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
