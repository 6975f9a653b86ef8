//! Payload arities a bus can carry, and how each one is matched against a
//! listener's capabilities.

use crate::error::{panic_message, Fault};
use crate::listener::Listener;
use anyhow::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Arguments carried by an [`EventBus`](crate::EventBus).
///
/// Implemented for `()`, `(A,)`, `(A, B)` and `(A, B, C)`. A multi-argument
/// payload is delivered to the listener's handler for the whole tuple and to
/// its single-value handler for each position, every one that exists firing.
pub trait Payload: sealed::Sealed + Clone + Send + Sync + 'static {}

impl<P: sealed::Sealed + Clone + Send + Sync + 'static> Payload for P {}

/// Notification of one listener during one raise.
pub struct Dispatch<'a> {
    bus: &'a str,
    listener: &'a Listener,
    fired: usize,
    faults: usize,
}

impl<'a> Dispatch<'a> {
    pub(crate) fn new(bus: &'a str, listener: &'a Listener) -> Self {
        Self {
            bus,
            listener,
            fired: 0,
            faults: 0,
        }
    }

    /// Handlers invoked so far, faulted or not.
    pub(crate) fn fired(&self) -> usize {
        self.fired
    }

    pub(crate) fn faults(&self) -> usize {
        self.faults
    }

    /// Call one handler with the fault isolated to it.
    pub(crate) fn invoke(&mut self, capability: &'static str, call: impl FnOnce() -> Result<()>) {
        self.fired += 1;
        let source = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => return,
            Ok(Err(source)) => source,
            Err(payload) => anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())),
        };

        self.faults += 1;
        let fault = Fault::Listener {
            bus: self.bus.to_string(),
            listener: self.listener.name().to_string(),
            source,
        };
        error!(
            bus = %self.bus,
            listener = %self.listener.name(),
            capability,
            error = %fault,
            "listener faulted"
        );
    }
}

pub(crate) mod sealed {
    use super::Dispatch;
    use crate::listener::Listener;

    pub trait Sealed {
        fn deliver(&self, listener: &Listener, dispatch: &mut Dispatch<'_>);
    }

    impl Sealed for () {
        fn deliver(&self, _listener: &Listener, _dispatch: &mut Dispatch<'_>) {}
    }

    impl<A> Sealed for (A,)
    where
        A: Clone + Send + Sync + 'static,
    {
        fn deliver(&self, listener: &Listener, dispatch: &mut Dispatch<'_>) {
            if let Some(handler) = listener.single::<A>() {
                dispatch.invoke("single", || handler(&self.0));
            }
        }
    }

    impl<A, B> Sealed for (A, B)
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        fn deliver(&self, listener: &Listener, dispatch: &mut Dispatch<'_>) {
            if let Some(handler) = listener.pair::<A, B>() {
                dispatch.invoke("pair", || handler(&self.0, &self.1));
            }
            if let Some(handler) = listener.single::<A>() {
                dispatch.invoke("first", || handler(&self.0));
            }
            if let Some(handler) = listener.single::<B>() {
                dispatch.invoke("second", || handler(&self.1));
            }
        }
    }

    impl<A, B, C> Sealed for (A, B, C)
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        fn deliver(&self, listener: &Listener, dispatch: &mut Dispatch<'_>) {
            if let Some(handler) = listener.triple::<A, B, C>() {
                dispatch.invoke("triple", || handler(&self.0, &self.1, &self.2));
            }
            if let Some(handler) = listener.single::<A>() {
                dispatch.invoke("first", || handler(&self.0));
            }
            if let Some(handler) = listener.single::<B>() {
                dispatch.invoke("second", || handler(&self.1));
            }
            if let Some(handler) = listener.single::<C>() {
                dispatch.invoke("third", || handler(&self.2));
            }
        }
    }
}
