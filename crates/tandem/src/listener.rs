//! Listeners: event sinks with an explicit capability table.
//!
//! A [`Listener`] carries at most one zero-argument handler plus any number of
//! typed handlers, each registered up front through [`ListenerBuilder`]. When a
//! bus raises a payload it asks the listener which of its capabilities match;
//! if none match and a zero-argument handler exists, that one runs instead.

use crate::command::{run_execute, Command};
use crate::invoker::Invoker;
use anyhow::Result;
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::error;

type SignalHandler = Box<dyn Fn() -> Result<()> + Send + Sync>;
pub(crate) type Handler<T> = Box<dyn Fn(&T) -> Result<()> + Send + Sync>;
pub(crate) type PairHandler<A, B> = Box<dyn Fn(&A, &B) -> Result<()> + Send + Sync>;
pub(crate) type TripleHandler<A, B, C> = Box<dyn Fn(&A, &B, &C) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Capability {
    Single(TypeId),
    Pair(TypeId),
    Triple(TypeId),
}

/// An event sink. Subscribe it to buses through an `Arc<Listener>`; the
/// allocation is its identity, so the same `Arc` can be subscribed to many
/// buses and unsubscribed from each of them.
pub struct Listener {
    name: Cow<'static, str>,
    signal: Option<SignalHandler>,
    typed: HashMap<Capability, Box<dyn Any + Send + Sync>>,
}

impl Listener {
    /// Start building a listener.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> ListenerBuilder {
        ListenerBuilder {
            listener: Listener {
                name: name.into(),
                signal: None,
                typed: HashMap::new(),
            },
        }
    }

    /// A listener with only a zero-argument handler.
    ///
    /// Because of the fallback rule it reacts to every raise on every bus it
    /// is subscribed to, whatever the payload.
    pub fn signal<F>(name: impl Into<Cow<'static, str>>, handler: F) -> Arc<Self>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Self::builder(name).on_signal(handler).build()
    }

    /// A listener that executes `command` on every notification.
    ///
    /// The command runs on its own spawned task, outside of any invoker, so
    /// it does not land in an undo history. Failures are logged.
    pub fn from_command(command: Arc<dyn Command>) -> Arc<Self> {
        let name = format!("run:{}", command.name());
        Self::signal(name, move || {
            let runtime = tokio::runtime::Handle::try_current()?;
            let command = command.clone();
            runtime.spawn(async move {
                if let Err(fault) = run_execute(command.as_ref()).await {
                    error!(command = %command.name(), error = %fault, "listener-triggered command failed");
                }
            });
            Ok(())
        })
    }

    /// A listener that enqueues `command` on `invoker` on every notification.
    ///
    /// Unlike [`Listener::from_command`] the command goes through the invoker,
    /// so it is serialized with everything else there and becomes undoable.
    pub fn enqueue_on(invoker: &Invoker, command: Arc<dyn Command>) -> Arc<Self> {
        let name = format!("enqueue:{}", command.name());
        let invoker = invoker.clone();
        Self::signal(name, move || {
            // The handle is detached; the outcome is logged by the drain loop.
            drop(invoker.enqueue_shared(command.clone()));
            Ok(())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a zero-argument handler is registered.
    pub fn has_signal(&self) -> bool {
        self.signal.is_some()
    }

    /// Whether a handler for a single value of type `T` is registered.
    pub fn accepts<T: 'static>(&self) -> bool {
        self.typed
            .contains_key(&Capability::Single(TypeId::of::<T>()))
    }

    /// Number of typed handlers registered.
    pub fn typed_handler_count(&self) -> usize {
        self.typed.len()
    }

    pub(crate) fn signal_handler(&self) -> Option<&SignalHandler> {
        self.signal.as_ref()
    }

    pub(crate) fn single<T: 'static>(&self) -> Option<&Handler<T>> {
        self.typed
            .get(&Capability::Single(TypeId::of::<T>()))
            .and_then(|h| h.downcast_ref::<Handler<T>>())
    }

    pub(crate) fn pair<A: 'static, B: 'static>(&self) -> Option<&PairHandler<A, B>> {
        self.typed
            .get(&Capability::Pair(TypeId::of::<(A, B)>()))
            .and_then(|h| h.downcast_ref::<PairHandler<A, B>>())
    }

    pub(crate) fn triple<A: 'static, B: 'static, C: 'static>(
        &self,
    ) -> Option<&TripleHandler<A, B, C>> {
        self.typed
            .get(&Capability::Triple(TypeId::of::<(A, B, C)>()))
            .and_then(|h| h.downcast_ref::<TripleHandler<A, B, C>>())
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("signal", &self.signal.is_some())
            .field("typed", &self.typed.len())
            .finish()
    }
}

/// Builder for [`Listener`]. Registering a second handler for the same
/// capability replaces the first.
pub struct ListenerBuilder {
    listener: Listener,
}

impl ListenerBuilder {
    /// Handler for zero-argument notifications, and the fallback when no
    /// typed handler matches a payload.
    pub fn on_signal<F>(mut self, handler: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.listener.signal = Some(Box::new(handler));
        self
    }

    /// Handler for a single value of type `T`.
    ///
    /// It fires for a one-argument bus of `T`, and also for multi-argument
    /// buses where any position carries a `T`.
    pub fn on<T, F>(mut self, handler: F) -> Self
    where
        T: 'static,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        let handler: Handler<T> = Box::new(handler);
        self.listener
            .typed
            .insert(Capability::Single(TypeId::of::<T>()), Box::new(handler));
        self
    }

    /// Handler for a two-argument bus of `(A, B)`.
    pub fn on_pair<A, B, F>(mut self, handler: F) -> Self
    where
        A: 'static,
        B: 'static,
        F: Fn(&A, &B) -> Result<()> + Send + Sync + 'static,
    {
        let handler: PairHandler<A, B> = Box::new(handler);
        self.listener
            .typed
            .insert(Capability::Pair(TypeId::of::<(A, B)>()), Box::new(handler));
        self
    }

    /// Handler for a three-argument bus of `(A, B, C)`.
    pub fn on_triple<A, B, C, F>(mut self, handler: F) -> Self
    where
        A: 'static,
        B: 'static,
        C: 'static,
        F: Fn(&A, &B, &C) -> Result<()> + Send + Sync + 'static,
    {
        let handler: TripleHandler<A, B, C> = Box::new(handler);
        self.listener.typed.insert(
            Capability::Triple(TypeId::of::<(A, B, C)>()),
            Box::new(handler),
        );
        self
    }

    pub fn build(self) -> Arc<Listener> {
        Arc::new(self.listener)
    }
}
