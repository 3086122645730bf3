// SPDX-License-Identifier: Apache-2.0

//! Multiple-producer, single-consumer bounded channel.
//!
//! Endpoints are `Send` and may be used from different tasks and threads; the
//! channel state sits behind a single mutex that is only held for queue
//! bookkeeping, never across an await point.

use crate::error::{RecvError, SendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct ChannelState<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    is_closed: bool,
    senders: usize,
    has_receiver: bool,
    receiver_waker: Option<Waker>,
    sender_wakers: VecDeque<Waker>,
}

/// A bounded MPSC channel.
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
}

impl<T> Channel<T> {
    /// Creates a new channel with the given capacity.
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new(capacity: usize) -> (Sender<T>, Receiver<T>) {
        let channel = Arc::new(Channel {
            state: Mutex::new(ChannelState {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                is_closed: false,
                senders: 1,
                has_receiver: true,
                receiver_waker: None,
                sender_wakers: VecDeque::new(),
            }),
        });

        (
            Sender {
                channel: channel.clone(),
            },
            Receiver { channel },
        )
    }
}

/// A sender for the channel.
pub struct Sender<T> {
    channel: Arc<Channel<T>>,
}

/// The single receiver for the channel.
pub struct Receiver<T> {
    channel: Arc<Channel<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        {
            let mut state = self.channel.state.lock();
            state.senders += 1;
        }
        Sender {
            channel: self.channel.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let waker = {
            let mut state = self.channel.state.lock();
            state.senders -= 1;
            if state.senders == 0 {
                state.is_closed = true;
                state.receiver_waker.take()
            } else {
                None
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let wakers = {
            let mut state = self.channel.state.lock();
            state.has_receiver = false;
            state.is_closed = true;
            std::mem::take(&mut state.sender_wakers)
        };
        // Wake all senders to handle the closure.
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Sender<T> {
    /// Sends a value without waiting for capacity.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let waker = {
            let mut state = self.channel.state.lock();

            if state.is_closed || !state.has_receiver {
                return Err(SendError::Closed(value));
            }

            if state.buffer.len() >= state.capacity {
                return Err(SendError::Full(value));
            }

            state.buffer.push_back(value);
            state.receiver_waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Sends a value, waiting for capacity when the channel is full.
    pub async fn send_async(&self, value: T) -> Result<(), SendError<T>> {
        SendFuture {
            sender: self,
            value: Some(value),
        }
        .await
    }

    /// Closes the channel. Buffered values remain receivable.
    pub fn close(&self) {
        let (receiver_waker, sender_wakers) = {
            let mut state = self.channel.state.lock();
            state.is_closed = true;
            (
                state.receiver_waker.take(),
                std::mem::take(&mut state.sender_wakers),
            )
        };
        if let Some(waker) = receiver_waker {
            waker.wake();
        }
        for waker in sender_wakers {
            waker.wake();
        }
    }
}

impl<T> Receiver<T> {
    /// Tries to receive a value without waiting.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        let (result, waker) = {
            let mut state = self.channel.state.lock();
            if let Some(value) = state.buffer.pop_front() {
                // Wake one sender now that a slot is free.
                (Ok(value), state.sender_wakers.pop_front())
            } else if state.is_closed {
                (Err(RecvError::Closed), None)
            } else {
                (Err(RecvError::Empty), None)
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        result
    }

    /// Receives a value, waiting until one is available or the channel closes.
    pub async fn recv(&self) -> Result<T, RecvError> {
        RecvFuture { receiver: self }.await
    }
}

struct SendFuture<'a, T> {
    sender: &'a Sender<T>,
    value: Option<T>,
}

impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let value = self
            .value
            .take()
            .expect("SendFuture polled after completion");

        // The full check and the waker registration happen under one lock
        // acquisition so a concurrent receive cannot slip between them.
        let waker = {
            let mut state = self.sender.channel.state.lock();

            if state.is_closed || !state.has_receiver {
                return Poll::Ready(Err(SendError::Closed(value)));
            }

            if state.buffer.len() >= state.capacity {
                self.value = Some(value);
                state.sender_wakers.push_back(cx.waker().clone());
                return Poll::Pending;
            }

            state.buffer.push_back(value);
            state.receiver_waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

struct RecvFuture<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T, RecvError>> {
        let (result, waker) = {
            let mut state = self.receiver.channel.state.lock();
            if let Some(value) = state.buffer.pop_front() {
                (Poll::Ready(Ok(value)), state.sender_wakers.pop_front())
            } else if state.is_closed {
                (Poll::Ready(Err(RecvError::Closed)), None)
            } else {
                state.receiver_waker = Some(cx.waker().clone());
                (Poll::Pending, None)
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        result
    }
}
