// Copyright The Weir Authors
// SPDX-License-Identifier: Apache-2.0

//! Aggregated acknowledgement fan-out.
//!
//! A [`BatchAcker`] turns one upstream acknowledgement callback into any
//! number of derived acknowledgements, one per message staged from the
//! batch. The upstream callback fires exactly once: when the acker has been
//! sealed (no further derivations) and every issued derivation has
//! completed, or immediately through [`BatchAcker::fail`] on a per-batch
//! fatal path. The first non-`None` error reported by a derivation wins.

use crate::error::Error;
use parking_lot::Mutex;
use std::sync::Arc;

/// The acknowledgement callback an upstream source attaches to a batch.
///
/// Invoked exactly once per batch with `None` on success or the winning
/// error on failure.
pub type UpstreamAck = Box<dyn FnOnce(Option<Error>) + Send>;

struct AckerState {
    upstream: Option<UpstreamAck>,
    outstanding: usize,
    sealed: bool,
    fired: bool,
    first_error: Option<Error>,
}

/// Fans a single upstream acknowledgement into per-message derived
/// acknowledgements.
///
/// Tolerates interleaved issuance and completion: a derivation may complete
/// before the last derivation is issued, and the upstream only fires once
/// both the seal and the zero-outstanding condition hold.
pub struct BatchAcker {
    state: Mutex<AckerState>,
}

impl BatchAcker {
    /// Creates an acker around the upstream callback.
    pub fn new(upstream: UpstreamAck) -> Arc<Self> {
        Arc::new(BatchAcker {
            state: Mutex::new(AckerState {
                upstream: Some(upstream),
                outstanding: 0,
                sealed: false,
                fired: false,
                first_error: None,
            }),
        })
    }

    /// Issues a new derived acknowledgement.
    ///
    /// Fails with [`Error::AckerClosed`] once the upstream has fired.
    pub fn derive(self: &Arc<Self>) -> Result<DerivedAck, Error> {
        let mut state = self.state.lock();
        if state.fired {
            return Err(Error::AckerClosed);
        }
        state.outstanding += 1;
        drop(state);
        Ok(DerivedAck {
            acker: self.clone(),
        })
    }

    /// Seals the acker: no further derivations will be issued. The upstream
    /// fires as soon as every outstanding derivation has completed, which
    /// may be immediately.
    pub fn seal(&self) {
        let upstream = {
            let mut state = self.state.lock();
            state.sealed = true;
            take_if_ready(&mut state)
        };
        if let Some((upstream, error)) = upstream {
            upstream(error);
        }
    }

    /// Fires the upstream immediately with `error`, bypassing outstanding
    /// derivations. Used by per-batch fatal paths (mapping failure,
    /// saturation); later completions of already-issued derivations become
    /// no-ops.
    pub fn fail(&self, error: Error) {
        let upstream = {
            let mut state = self.state.lock();
            if state.fired {
                None
            } else {
                state.fired = true;
                state.upstream.take()
            }
        };
        if let Some(upstream) = upstream {
            upstream(Some(error));
        }
    }

    fn complete(&self, error: Option<Error>) {
        let upstream = {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.first_error.is_none() {
                state.first_error = error;
            }
            take_if_ready(&mut state)
        };
        if let Some((upstream, error)) = upstream {
            upstream(error);
        }
    }
}

fn take_if_ready(state: &mut AckerState) -> Option<(UpstreamAck, Option<Error>)> {
    if state.sealed && state.outstanding == 0 && !state.fired {
        state.fired = true;
        state
            .upstream
            .take()
            .map(|upstream| (upstream, state.first_error.take()))
    } else {
        None
    }
}

/// A derived acknowledgement for one staged message.
///
/// Consuming [`DerivedAck::done`] makes double-invocation unrepresentable:
/// exactly one completion is reported per derivation over its lifetime.
pub struct DerivedAck {
    acker: Arc<BatchAcker>,
}

impl DerivedAck {
    /// Reports this derivation as resolved, with `None` on success or the
    /// downstream error on failure.
    pub fn done(self, error: Option<Error>) {
        self.acker.complete(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn tracking_upstream() -> (UpstreamAck, Arc<Mutex<Vec<Option<Error>>>>) {
        let calls: Arc<Mutex<Vec<Option<Error>>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let upstream: UpstreamAck = Box::new(move |err| recorded.lock().push(err));
        (upstream, calls)
    }

    #[test]
    fn test_upstream_fires_once_after_all_derivations() {
        let (upstream, calls) = tracking_upstream();
        let acker = BatchAcker::new(upstream);

        let a = acker.derive().unwrap();
        let b = acker.derive().unwrap();
        let c = acker.derive().unwrap();
        acker.seal();

        a.done(None);
        b.done(None);
        assert!(calls.lock().is_empty(), "must wait for every derivation");
        c.done(None);

        assert_eq!(calls.lock().as_slice(), &[None]);
    }

    #[test]
    fn test_interleaved_issue_and_complete() {
        let (upstream, calls) = tracking_upstream();
        let acker = BatchAcker::new(upstream);

        // A derivation completes before the next is issued; the unsealed
        // acker must not fire in between.
        let a = acker.derive().unwrap();
        a.done(None);
        assert!(calls.lock().is_empty());

        let b = acker.derive().unwrap();
        b.done(None);
        assert!(calls.lock().is_empty());

        acker.seal();
        assert_eq!(calls.lock().as_slice(), &[None]);
    }

    #[test]
    fn test_first_error_wins() {
        let (upstream, calls) = tracking_upstream();
        let acker = BatchAcker::new(upstream);

        let a = acker.derive().unwrap();
        let b = acker.derive().unwrap();
        let c = acker.derive().unwrap();
        acker.seal();

        a.done(None);
        b.done(Some(Error::WindowClosed));
        c.done(Some(Error::Cancelled));

        assert_eq!(calls.lock().as_slice(), &[Some(Error::WindowClosed)]);
    }

    #[test]
    fn test_seal_with_no_derivations_fires_immediately() {
        let (upstream, calls) = tracking_upstream();
        let acker = BatchAcker::new(upstream);
        acker.seal();
        assert_eq!(calls.lock().as_slice(), &[None]);
    }

    #[test]
    fn test_derive_after_fire_fails() {
        let (upstream, calls) = tracking_upstream();
        let acker = BatchAcker::new(upstream);
        acker.seal();
        assert_eq!(calls.lock().len(), 1);

        assert!(matches!(acker.derive(), Err(Error::AckerClosed)));
    }

    #[test]
    fn test_fail_fires_immediately_and_suppresses_late_completions() {
        let (upstream, calls) = tracking_upstream();
        let acker = BatchAcker::new(upstream);

        let a = acker.derive().unwrap();
        acker.fail(Error::Saturated {
            max_pending_keys: 2,
        });
        assert_eq!(
            calls.lock().as_slice(),
            &[Some(Error::Saturated {
                max_pending_keys: 2
            })]
        );

        // The dangling derivation resolving later is a no-op.
        a.done(None);
        acker.seal();
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_fail_is_idempotent() {
        let (upstream, calls) = tracking_upstream();
        let acker = BatchAcker::new(upstream);
        acker.fail(Error::WindowClosed);
        acker.fail(Error::Cancelled);
        assert_eq!(calls.lock().as_slice(), &[Some(Error::WindowClosed)]);
    }

    #[test]
    fn test_concurrent_completions_fire_once() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();
        rt.block_on(async {
            let fired = Arc::new(Mutex::new(0usize));
            let fired_clone = fired.clone();
            let upstream: UpstreamAck = Box::new(move |_| *fired_clone.lock() += 1);
            let acker = BatchAcker::new(upstream);

            let mut handles = Vec::new();
            for _ in 0..32 {
                let derived = acker.derive().unwrap();
                handles.push(tokio::spawn(async move {
                    derived.done(None);
                }));
            }
            acker.seal();
            for handle in handles {
                handle.await.unwrap();
            }
            assert_eq!(*fired.lock(), 1);
        });
    }
}
