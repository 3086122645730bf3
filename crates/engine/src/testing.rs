// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Common testing utilities for buffer components.
//!
//! This module provides shared constructs used across buffer tests:
//!
//! - [`AckTracker`] for asserting the exactly-once upstream acknowledgement
//!   contract and inspecting recorded errors
//! - [`ManualClock`] for driving window expiry deterministically
//! - message builders matching the JSON fixtures the windowing scenarios use

use crate::acker::UpstreamAck;
use crate::clock::Clock;
use crate::error::Error;
use crate::message::Message;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Records every invocation of the upstream acknowledgements it hands out.
#[derive(Clone, Default)]
pub struct AckTracker {
    results: Arc<Mutex<Vec<Option<Error>>>>,
}

impl AckTracker {
    /// Creates a tracker with no recorded acknowledgements.
    #[must_use]
    pub fn new() -> Self {
        AckTracker::default()
    }

    /// Hands out an upstream acknowledgement callback that records its
    /// outcome in this tracker.
    #[must_use]
    pub fn upstream_ack(&self) -> UpstreamAck {
        let results = self.results.clone();
        Box::new(move |error| results.lock().push(error))
    }

    /// Total number of acknowledgements recorded, acks and nacks alike.
    #[must_use]
    pub fn count(&self) -> usize {
        self.results.lock().len()
    }

    /// Number of successful acknowledgements recorded.
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.results.lock().iter().filter(|r| r.is_none()).count()
    }

    /// Number of failed acknowledgements recorded.
    #[must_use]
    pub fn nack_count(&self) -> usize {
        self.results.lock().iter().filter(|r| r.is_some()).count()
    }

    /// Snapshot of the recorded outcomes, in invocation order.
    #[must_use]
    pub fn errors(&self) -> Vec<Option<Error>> {
        self.results.lock().clone()
    }
}

/// A clock that only moves when the test advances it.
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a manual clock pinned to `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Advances the clock by `step`.
    pub fn advance(&self, step: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(step).expect("test step fits a chrono duration");
    }

    /// Returns the current instant without advancing.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    /// A [`Clock`] capability reading this manual clock.
    #[must_use]
    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Clock::from_fn(move || *now.lock())
    }
}

/// Builds the JSON fixture message the windowing scenarios use:
/// `{"sequence": <key>, "length": <length>}`.
#[must_use]
pub fn windowed_message(key: &str, length: usize) -> Message {
    Message::new(format!(r#"{{"sequence":"{key}","length":{length}}}"#))
}
