// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! The window store: per-key pending windows behind a single mutex.
//!
//! Every access to a window's fields (`queued`, `passes_check`, `expiry`,
//! the message vector) happens while holding the store lock. Windows are
//! only destroyed by [`Windows::remove`] (the flush path) or
//! [`Windows::drain`] (the end-of-input nack path).

use crate::acker::DerivedAck;
use crate::error::Error;
use crate::message::Message;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

/// A message staged in a window together with its derived acknowledgement.
pub(crate) struct PendingMessage {
    /// The staged message, already augmented with batch metadata.
    pub message: Message,
    /// The derived acknowledgement resolved when the window is flushed or
    /// nacked.
    pub ack: DerivedAck,
}

/// A per-key accumulator of messages plus an absolute expiry instant.
pub(crate) struct Window {
    /// Staged messages in arrival order.
    pub messages: Vec<PendingMessage>,
    /// First-message timestamp plus the window length. Never shrinks.
    pub expiry: DateTime<Utc>,
    /// Set once the window is committed to flushing; guards the at-most-once
    /// enqueue on the completion queue.
    pub queued: bool,
    /// Set when the check predicate has closed the window.
    pub passes_check: bool,
}

impl Window {
    fn new(expiry: DateTime<Utc>, expected_length: usize) -> Self {
        Window {
            messages: Vec::with_capacity(expected_length),
            expiry,
            queued: false,
            passes_check: false,
        }
    }
}

/// The key-to-window mapping. Obtained through [`WindowStore::lock`].
pub(crate) struct Windows {
    max_pending_keys: usize,
    map: HashMap<String, Window>,
}

impl Windows {
    /// Whether an arrival for `key` can currently be admitted: the key is
    /// already live, or creation stays within `max_pending_keys`.
    pub fn can_admit(&self, key: &str) -> bool {
        self.map.contains_key(key)
            || self.max_pending_keys == 0
            || self.map.len() < self.max_pending_keys
    }

    /// The configured admission limit (zero is unbounded).
    pub fn max_pending_keys(&self) -> usize {
        self.max_pending_keys
    }

    /// Finds the window for `key`, creating it when absent.
    ///
    /// On creation the expiry is fixed to `expiry` and the message vector is
    /// pre-allocated to `expected_length`. Creation fails with
    /// [`Error::Saturated`] when it would push the store past
    /// `max_pending_keys` (a bound of zero is unbounded).
    pub fn get_or_create(
        &mut self,
        key: &str,
        expiry: DateTime<Utc>,
        expected_length: usize,
    ) -> Result<(&mut Window, bool), Error> {
        if self.map.contains_key(key) {
            let window = self.map.get_mut(key).expect("window present");
            return Ok((window, false));
        }

        if self.max_pending_keys > 0 && self.map.len() >= self.max_pending_keys {
            return Err(Error::Saturated {
                max_pending_keys: self.max_pending_keys,
            });
        }

        _ = self
            .map
            .insert(key.to_owned(), Window::new(expiry, expected_length));
        let window = self.map.get_mut(key).expect("window just inserted");
        Ok((window, true))
    }

    /// Number of pending windows.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Removes and returns the window for `key`.
    pub fn remove(&mut self, key: &str) -> Option<Window> {
        self.map.remove(key)
    }

    /// Iterates mutably over every pending window with its key.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Window)> {
        self.map.iter_mut()
    }

    /// Removes and returns every pending window.
    pub fn drain(&mut self) -> Vec<(String, Window)> {
        self.map.drain().collect()
    }
}

/// Mutex owner of the window mapping.
pub(crate) struct WindowStore {
    inner: Mutex<Windows>,
}

impl WindowStore {
    pub fn new(max_pending_keys: usize) -> Self {
        WindowStore {
            inner: Mutex::new(Windows {
                max_pending_keys,
                map: HashMap::new(),
            }),
        }
    }

    /// Acquires the store lock.
    pub fn lock(&self) -> MutexGuard<'_, Windows> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acker::{BatchAcker, UpstreamAck};
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 12, 0, secs).unwrap()
    }

    fn derived() -> DerivedAck {
        let upstream: UpstreamAck = Box::new(|_| {});
        BatchAcker::new(upstream).derive().expect("fresh acker")
    }

    #[test]
    fn test_get_or_create_and_size() {
        let store = WindowStore::new(0);
        let mut windows = store.lock();

        let (_, created) = windows.get_or_create("a", at(1), 0).unwrap();
        assert!(created);
        let (_, created) = windows.get_or_create("a", at(30), 0).unwrap();
        assert!(!created, "second arrival joins the existing window");
        let (_, created) = windows.get_or_create("b", at(2), 0).unwrap();
        assert!(created);
        assert_eq!(windows.size(), 2);
    }

    #[test]
    fn test_expiry_fixed_at_creation() {
        let store = WindowStore::new(0);
        let mut windows = store.lock();

        _ = windows.get_or_create("a", at(5), 0).unwrap();
        // A later arrival must not move the expiry.
        let (window, _) = windows.get_or_create("a", at(50), 0).unwrap();
        assert_eq!(window.expiry, at(5));
    }

    #[test]
    fn test_saturation() {
        let store = WindowStore::new(2);
        let mut windows = store.lock();

        _ = windows.get_or_create("a", at(1), 0).unwrap();
        _ = windows.get_or_create("b", at(1), 0).unwrap();
        let err = match windows.get_or_create("c", at(1), 0) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert_eq!(err, Error::Saturated {
            max_pending_keys: 2
        });
        assert!(!windows.can_admit("c"));

        // Existing keys keep admitting.
        assert!(windows.can_admit("a"));
        assert!(windows.get_or_create("a", at(1), 0).is_ok());
        assert_eq!(windows.size(), 2);
    }

    #[test]
    fn test_unbounded_when_zero() {
        let store = WindowStore::new(0);
        let mut windows = store.lock();
        for i in 0..500 {
            _ = windows.get_or_create(&format!("k{i}"), at(1), 0).unwrap();
        }
        assert_eq!(windows.size(), 500);
    }

    #[test]
    fn test_preallocation_hint() {
        let store = WindowStore::new(0);
        let mut windows = store.lock();
        let (window, _) = windows.get_or_create("a", at(1), 16).unwrap();
        assert!(window.messages.capacity() >= 16);
    }

    #[test]
    fn test_remove_and_drain() {
        let store = WindowStore::new(0);
        let mut windows = store.lock();

        let (window, _) = windows.get_or_create("a", at(1), 0).unwrap();
        window.messages.push(PendingMessage {
            message: Message::new("m"),
            ack: derived(),
        });
        _ = windows.get_or_create("b", at(2), 0).unwrap();

        let removed = windows.remove("a").expect("window a");
        assert_eq!(removed.messages.len(), 1);
        assert!(windows.remove("a").is_none());

        let drained = windows.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(windows.size(), 0);
    }
}
