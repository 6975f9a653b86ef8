//! An explicitly owned record of which listener is bound to which bus.
//!
//! Lifecycle managers use it to put subscriptions back after a reload has
//! cleared buses, without any process-wide state: create one registry, hand
//! it to the components that bind listeners, and call
//! [`ListenerRegistry::rebuild`] when the reload is done.

use crate::bus::EventBus;
use crate::listener::Listener;
use crate::payload::Payload;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

struct Binding {
    bus_id: usize,
    bus_name: String,
    listener: Arc<Listener>,
    is_attached: Box<dyn Fn(&Arc<Listener>) -> bool + Send + Sync>,
    attach: Box<dyn Fn(&Arc<Listener>) + Send + Sync>,
    detach: Box<dyn Fn(&Arc<Listener>) -> bool + Send + Sync>,
}

/// Bindings of listeners to buses, in the order they were made.
///
/// The registry holds clones of the buses it has bindings for, keeping them
/// alive until the bindings are removed.
#[derive(Default)]
pub struct ListenerRegistry {
    bindings: Mutex<Vec<Binding>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to `bus` and remember the binding.
    pub fn bind<P: Payload>(&self, bus: &EventBus<P>, listener: &Arc<Listener>) {
        bus.subscribe(listener);

        let (probe, attach, detach) = (bus.clone(), bus.clone(), bus.clone());
        self.bindings.lock().push(Binding {
            bus_id: bus.id(),
            bus_name: bus.name().to_string(),
            listener: listener.clone(),
            is_attached: Box::new(move |l: &Arc<Listener>| probe.contains(l)),
            attach: Box::new(move |l: &Arc<Listener>| attach.subscribe(l)),
            detach: Box::new(move |l: &Arc<Listener>| detach.unsubscribe(l)),
        });
    }

    /// Unsubscribe `listener` from `bus` and forget the binding. Returns
    /// `false` if no such binding was recorded.
    pub fn unbind<P: Payload>(&self, bus: &EventBus<P>, listener: &Arc<Listener>) -> bool {
        let binding = {
            let mut bindings = self.bindings.lock();
            let index = bindings
                .iter()
                .position(|b| b.bus_id == bus.id() && Arc::ptr_eq(&b.listener, listener));
            index.map(|index| bindings.remove(index))
        };

        match binding {
            Some(binding) => {
                (binding.detach)(&binding.listener);
                true
            }
            None => false,
        }
    }

    /// Re-subscribe every recorded binding whose listener is no longer on its
    /// bus, in binding order. Returns how many were re-attached.
    pub fn rebuild(&self) -> usize {
        let bindings = self.bindings.lock();
        let mut attached = 0;
        for binding in bindings.iter() {
            if !(binding.is_attached)(&binding.listener) {
                (binding.attach)(&binding.listener);
                attached += 1;
            }
        }

        debug!(attached, total = bindings.len(), "listener registry rebuilt");
        attached
    }

    /// Unsubscribe every binding but keep the records, ready for
    /// [`rebuild`](ListenerRegistry::rebuild).
    pub fn detach_all(&self) -> usize {
        let bindings = self.bindings.lock();
        bindings
            .iter()
            .filter(|binding| (binding.detach)(&binding.listener))
            .count()
    }

    /// Unsubscribe and forget every binding.
    pub fn clear(&self) {
        let bindings = std::mem::take(&mut *self.bindings.lock());
        for binding in &bindings {
            (binding.detach)(&binding.listener);
        }
    }

    /// `(bus name, listener)` for every binding, in binding order.
    pub fn bindings(&self) -> Vec<(String, Arc<Listener>)> {
        self.bindings
            .lock()
            .iter()
            .map(|b| (b.bus_name.clone(), b.listener.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("bindings", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SignalBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(name: &'static str) -> (Arc<Listener>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener = Listener::signal(name, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (listener, hits)
    }

    #[test]
    fn test_rebuild_after_reload_restores_subscriptions() {
        let registry = ListenerRegistry::new();
        let bus = SignalBus::named("scene-loaded");
        let (a, a_hits) = counting("a");
        let (b, b_hits) = counting("b");
        registry.bind(&bus, &a);
        registry.bind(&bus, &b);

        // A reload wipes the bus.
        bus.remove_all_listeners();
        bus.signal();
        assert_eq!(a_hits.load(Ordering::SeqCst), 0);

        assert_eq!(registry.rebuild(), 2);
        assert_eq!(bus.listener_count(), 2);
        bus.signal();
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);

        // Nothing to do when everything is still attached.
        assert_eq!(registry.rebuild(), 0);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn test_rebuild_keeps_binding_order() {
        let registry = ListenerRegistry::new();
        let bus = SignalBus::new();
        let (a, _) = counting("a");
        let (b, _) = counting("b");
        registry.bind(&bus, &a);
        registry.bind(&bus, &b);

        registry.detach_all();
        assert_eq!(bus.listener_count(), 0);
        registry.rebuild();

        let names: Vec<_> = bus.listeners().iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_unbind_forgets_only_that_binding() {
        let registry = ListenerRegistry::new();
        let first = SignalBus::named("first");
        let second = EventBus::<(u32,)>::named("second");
        let (a, _) = counting("a");
        registry.bind(&first, &a);
        registry.bind(&second, &a);

        assert!(registry.unbind(&first, &a));
        assert!(!registry.unbind(&first, &a));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.listener_count(), 0);
        assert_eq!(second.listener_count(), 1);
        assert_eq!(registry.bindings()[0].0, "second");

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(second.listener_count(), 0);
    }
}
