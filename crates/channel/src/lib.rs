// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded async channels shared by the buffer engine.
//!
//! Both flavours are usable from `Send` contexts: writer tasks, reader tasks,
//! and the timeout queuer may live on different threads. Closing is explicit
//! (`Sender::close`) in addition to last-endpoint-drop, and receivers drain
//! buffered values before observing `Closed`.

pub mod error;
pub mod mpmc;
pub mod mpsc;
