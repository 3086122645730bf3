// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Injected clock capability.
//!
//! The buffer core never reads the process clock directly; a [`Clock`] is
//! handed in at construction so tests can drive expiry deterministically.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// A shareable `now()` capability returning the current UTC instant.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>);

impl Clock {
    /// The system clock.
    #[must_use]
    pub fn system() -> Self {
        Clock(Arc::new(Utc::now))
    }

    /// A clock pinned to a fixed instant.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Clock(Arc::new(move || at))
    }

    /// A clock backed by an arbitrary function.
    pub fn from_fn(f: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Clock(Arc::new(f))
    }

    /// Returns the current instant.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").field(&self.now()).finish()
    }
}
