//! Synchronous, typed publish/subscribe.

use crate::listener::Listener;
use crate::payload::{sealed::Sealed, Dispatch, Payload};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A bus that carries no arguments.
pub type SignalBus = EventBus<()>;

/// An ordered set of listeners that can be raised with a payload `P`.
///
/// Raising is synchronous and never fails: each listener's handlers are
/// called in turn, faults are logged and isolated to the listener that
/// produced them.
///
/// # Dispatch order
///
/// A raise notifies the listeners present when it starts, most recently
/// subscribed first. Listeners may subscribe, unsubscribe or clear the bus
/// from inside their handlers; that only affects later raises.
///
/// # Example
///
/// ```ignore
/// let score = EventBus::<(u32,)>::named("score");
/// let hud = Listener::builder("hud")
///     .on::<u32, _>(|points| {
///         println!("score is now {points}");
///         Ok(())
///     })
///     .build();
///
/// score.subscribe(&hud);
/// score.raise_value(10);
/// ```
pub struct EventBus<P: Payload = ()> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    name: Cow<'static, str>,
    listeners: Mutex<Vec<Arc<Listener>>>,
    last: Mutex<Option<P>>,
}

impl<P: Payload> EventBus<P> {
    pub fn new() -> Self {
        Self::named("bus")
    }

    /// Create a bus with a name used in logs and faults.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                listeners: Mutex::new(Vec::new()),
                last: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identity shared by all clones of this bus.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Append `listener`. Subscribing the same listener twice means it is
    /// notified twice per raise.
    pub fn subscribe(&self, listener: &Arc<Listener>) {
        self.inner.listeners.lock().push(listener.clone());
        debug!(bus = %self.name(), listener = %listener.name(), "subscribed");
    }

    /// Remove the earliest subscription of `listener`. Returns `false` if it
    /// was not subscribed.
    pub fn unsubscribe(&self, listener: &Arc<Listener>) -> bool {
        let removed = {
            let mut listeners = self.inner.listeners.lock();
            match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
                Some(index) => {
                    listeners.remove(index);
                    true
                }
                None => false,
            }
        };

        if removed {
            debug!(bus = %self.name(), listener = %listener.name(), "unsubscribed");
        }
        removed
    }

    /// Drop every subscription. A raise already in progress still finishes
    /// over the listeners it started with.
    pub fn remove_all_listeners(&self) {
        let removed = std::mem::take(&mut *self.inner.listeners.lock());
        debug!(bus = %self.name(), count = removed.len(), "removed all listeners");
    }

    /// Snapshot of the current subscribers, in subscription order.
    pub fn listeners(&self) -> Vec<Arc<Listener>> {
        self.inner.listeners.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn contains(&self, listener: &Arc<Listener>) -> bool {
        self.inner
            .listeners
            .lock()
            .iter()
            .any(|l| Arc::ptr_eq(l, listener))
    }

    /// The payload of the most recent raise, if any.
    pub fn last_raised(&self) -> Option<P> {
        self.inner.last.lock().clone()
    }

    /// Notify every current listener with `payload` and remember it as the
    /// last raised value.
    pub fn raise(&self, payload: P) {
        *self.inner.last.lock() = Some(payload.clone());
        self.dispatch(&payload);
    }

    /// Raise the last raised payload again. Returns `false`, notifying no
    /// one, when the bus has never been raised.
    pub fn replay(&self) -> bool {
        let last = self.inner.last.lock().clone();
        match last {
            Some(payload) => {
                self.dispatch(&payload);
                true
            }
            None => {
                debug!(bus = %self.name(), "nothing to replay");
                false
            }
        }
    }

    fn dispatch(&self, payload: &P) {
        let snapshot: SmallVec<[Arc<Listener>; 8]> =
            self.inner.listeners.lock().iter().cloned().collect();
        trace!(bus = %self.name(), listeners = snapshot.len(), "raising");

        for listener in snapshot.iter().rev() {
            let mut dispatch = Dispatch::new(&self.inner.name, listener);
            Sealed::deliver(payload, listener, &mut dispatch);

            if dispatch.fired() == 0 {
                match listener.signal_handler() {
                    Some(signal) => dispatch.invoke("signal", || signal()),
                    None => {
                        trace!(bus = %self.name(), listener = %listener.name(), "no matching capability")
                    }
                }
            }
        }
    }
}

impl EventBus<()> {
    /// Raise a zero-argument notification.
    pub fn signal(&self) {
        self.raise(());
    }
}

impl<T> EventBus<(T,)>
where
    T: Clone + Send + Sync + 'static,
{
    /// Raise a one-argument bus without spelling out the tuple.
    pub fn raise_value(&self, value: T) {
        self.raise((value,));
    }
}

impl<P: Payload> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Payload> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.inner.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
