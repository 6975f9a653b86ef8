//! The invoker: a FIFO command queue drained one command at a time, with a
//! LIFO undo history of the commands that succeeded.
//!
//! ```text
//! enqueue() ──► pending (FIFO) ──► drain task ──► execute()
//!                                      │             │
//!                                      │        ok ──┴── fault
//!                                      │        │          │
//!                                      │   history.push   log
//!                                      │        │          │
//!                                      │        └─► handle resolves
//!                                      ▼
//!                                 yield_now() and repeat until empty
//! ```

use crate::command::{run_execute, run_undo, Command};
use crate::config::InvokerConfig;
use crate::error::Fault;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, warn};

/// Runs commands strictly one after another and remembers the successful
/// ones so they can be undone.
///
/// `Invoker` is a cheap handle; clones share the same queue and history.
///
/// The first [`enqueue`](Invoker::enqueue) on an idle invoker spawns a drain
/// task on the current tokio runtime. The task keeps going while the queue is
/// non-empty, including commands enqueued while it runs, then goes idle.
/// All queue, history and flag changes happen under one mutex, so enqueueing
/// from any task or thread is safe and never starts a second drain task.
#[derive(Clone)]
pub struct Invoker {
    inner: Arc<Inner>,
}

struct Inner {
    config: InvokerConfig,
    state: Mutex<State>,
    processing: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Pending>,
    history: Vec<HistoryEntry>,
    current: Option<Arc<dyn Command>>,
    processing: bool,
    stopped: bool,
}

struct Pending {
    command: Arc<dyn Command>,
    done: oneshot::Sender<Result<(), Fault>>,
}

/// A command that completed successfully, as kept in the undo history.
#[derive(Clone)]
pub struct HistoryEntry {
    command: Arc<dyn Command>,
    completed_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn command(&self) -> &Arc<dyn Command> {
        &self.command
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

impl fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("command", &self.command.name())
            .field("completed_at", &self.completed_at)
            .finish()
    }
}

impl Invoker {
    pub fn new() -> Self {
        Self::with_config(InvokerConfig::default())
    }

    pub fn builder() -> InvokerBuilder {
        InvokerBuilder::new()
    }

    pub fn with_config(config: InvokerConfig) -> Self {
        let (processing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                processing,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.inner.config
    }

    /// Queue `command` behind everything already pending.
    ///
    /// The returned handle resolves once this command has run: `Ok(())` when
    /// it succeeded, the [`Fault`] otherwise. Dropping the handle does not
    /// cancel the command.
    pub fn enqueue<C: Command>(&self, command: C) -> CommandHandle {
        self.enqueue_shared(Arc::new(command))
    }

    /// [`enqueue`](Invoker::enqueue) for a command that is already shared.
    pub fn enqueue_shared(&self, command: Arc<dyn Command>) -> CommandHandle {
        let name = command.name().to_string();
        let (done, rx) = oneshot::channel();

        let runtime = self.runtime();
        let start = {
            let mut state = self.inner.state.lock();
            state.pending.push_back(Pending { command, done });
            runtime.is_some() && self.inner.begin_processing(&mut state)
        };

        debug!(invoker = %self.name(), command = %name, "enqueued");
        if let Some(runtime) = runtime.filter(|_| start) {
            runtime.spawn(drain(DrainGuard::new(&self.inner)));
        }

        CommandHandle {
            command: name,
            state: HandleState::Waiting(rx),
        }
    }

    /// Enqueue a command that may be absent. An absent command is a no-op and
    /// its handle is already resolved with `Ok(())`.
    pub fn enqueue_optional(&self, command: Option<Arc<dyn Command>>) -> CommandHandle {
        match command {
            Some(command) => self.enqueue_shared(command),
            None => {
                debug!(invoker = %self.name(), "ignoring absent command");
                CommandHandle::ready(Ok(()))
            }
        }
    }

    /// Enqueue `command` and wait for its outcome.
    pub async fn invoke<C: Command>(&self, command: C) -> Result<(), Fault> {
        self.enqueue(command).await
    }

    /// Undo the most recently completed command.
    ///
    /// Returns `false` if the history was empty. A failing undo is logged and
    /// the entry is still removed from the history.
    pub async fn undo_last(&self) -> bool {
        let entry = self.inner.state.lock().history.pop();
        match entry {
            Some(entry) => {
                self.inner.undo(&entry).await;
                true
            }
            None => false,
        }
    }

    /// Undo the whole history, most recent first, yielding between undos.
    ///
    /// Failing undos are logged and skipped over. Returns how many entries
    /// were undone (successfully or not).
    pub async fn undo_all(&self) -> usize {
        let mut undone = 0;
        loop {
            let entry = self.inner.state.lock().history.pop();
            let Some(entry) = entry else {
                break;
            };

            self.inner.undo(&entry).await;
            undone += 1;

            if self.inner.config.yield_between_undos {
                tokio::task::yield_now().await;
            }
        }

        debug!(invoker = %self.name(), undone, "undo all finished");
        undone
    }

    /// Stop before the next queued command starts. The command currently
    /// executing, if any, runs to completion; pending commands stay queued.
    pub fn stop(&self) {
        self.inner.state.lock().stopped = true;
        debug!(invoker = %self.name(), "stop requested");
    }

    /// Undo a [`stop`](Invoker::stop) and resume draining pending commands.
    pub fn resume(&self) {
        let runtime = self.runtime();
        let start = {
            let mut state = self.inner.state.lock();
            state.stopped = false;
            runtime.is_some()
                && !state.pending.is_empty()
                && self.inner.begin_processing(&mut state)
        };

        debug!(invoker = %self.name(), "resumed");
        if let Some(runtime) = runtime.filter(|_| start) {
            runtime.spawn(drain(DrainGuard::new(&self.inner)));
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().processing
    }

    /// Wait until the drain task has gone idle.
    pub async fn wait_idle(&self) {
        let mut processing = self.inner.processing.subscribe();
        let _ = processing.wait_for(|busy| !*busy).await;
    }

    /// The command executing right now.
    pub fn current(&self) -> Option<Arc<dyn Command>> {
        self.inner.state.lock().current.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.inner.state.lock().history.len()
    }

    /// Completed commands, most recent first.
    pub fn history(&self) -> Vec<Arc<dyn Command>> {
        self.inner
            .state
            .lock()
            .history
            .iter()
            .rev()
            .map(|entry| entry.command.clone())
            .collect()
    }

    /// History entries with their completion times, most recent first.
    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.inner.state.lock().history.iter().rev().cloned().collect()
    }

    /// Forget the undo history without undoing anything.
    pub fn clear_history(&self) -> usize {
        let cleared = std::mem::take(&mut self.inner.state.lock().history);
        debug!(invoker = %self.name(), count = cleared.len(), "history cleared");
        cleared.len()
    }

    /// Drop every command that has not started yet. Their handles resolve
    /// with [`Fault::Abandoned`].
    pub fn clear_pending(&self) -> usize {
        let cleared = std::mem::take(&mut self.inner.state.lock().pending);
        debug!(invoker = %self.name(), count = cleared.len(), "pending cleared");
        cleared.len()
    }

    /// The runtime to drain on. Without one the invoker never claims the
    /// processing flag, so commands stay queued until an enqueue or resume
    /// from inside a runtime picks them up.
    fn runtime(&self) -> Option<Handle> {
        match Handle::try_current() {
            Ok(runtime) => Some(runtime),
            Err(_) => {
                warn!(
                    invoker = %self.name(),
                    "no async runtime; commands stay queued until the next enqueue or resume"
                );
                None
            }
        }
    }
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Invoker")
            .field("name", &self.inner.config.name)
            .field("pending", &state.pending.len())
            .field("history", &state.history.len())
            .field("processing", &state.processing)
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl Inner {
    /// Flip to processing if idle and not stopped. Returns whether the caller
    /// must spawn the drain task.
    fn begin_processing(&self, state: &mut State) -> bool {
        if state.processing || state.stopped {
            return false;
        }
        state.processing = true;
        self.processing.send_replace(true);
        true
    }

    /// Take the next command, or go idle if there is none (or a stop was
    /// requested).
    fn next(&self) -> Option<Pending> {
        let mut state = self.state.lock();
        let next = if state.stopped {
            None
        } else {
            state.pending.pop_front()
        };

        match &next {
            Some(pending) => state.current = Some(pending.command.clone()),
            None => {
                state.processing = false;
                self.processing.send_replace(false);
            }
        }
        next
    }

    fn finish(&self, command: &Arc<dyn Command>, succeeded: bool) {
        let mut state = self.state.lock();
        state.current = None;
        if succeeded {
            state.history.push(HistoryEntry {
                command: command.clone(),
                completed_at: Utc::now(),
            });
        }
    }

    async fn undo(&self, entry: &HistoryEntry) {
        let name = entry.command.name();
        match run_undo(entry.command.as_ref()).await {
            Ok(()) => debug!(invoker = %self.config.name, command = %name, "undone"),
            Err(fault) => warn!(invoker = %self.config.name, command = %name, error = %fault, "undo failed"),
        }
    }
}

/// Resets the invoker to idle if the drain task is dropped before it
/// finishes, which happens when its runtime shuts down. Built at spawn time
/// so it also covers a task that was never polled.
struct DrainGuard {
    inner: Arc<Inner>,
    finished: bool,
}

impl DrainGuard {
    fn new(inner: &Arc<Inner>) -> Self {
        Self {
            inner: inner.clone(),
            finished: false,
        }
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.inner.state.lock();
        state.current = None;
        state.processing = false;
        self.inner.processing.send_replace(false);
        warn!(
            invoker = %self.inner.config.name,
            pending = state.pending.len(),
            "drain task dropped; the running command was abandoned"
        );
    }
}

async fn drain(mut guard: DrainGuard) {
    let inner = guard.inner.clone();
    debug!(invoker = %inner.config.name, "processing started");

    while let Some(Pending { command, done }) = inner.next() {
        let outcome = run_execute(command.as_ref()).await;
        inner.finish(&command, outcome.is_ok());

        match &outcome {
            Ok(()) => debug!(invoker = %inner.config.name, command = %command.name(), "completed"),
            Err(fault) => error!(
                invoker = %inner.config.name,
                command = %command.name(),
                error = %fault,
                "command failed"
            ),
        }

        // Nobody may be waiting on the handle any more.
        let _ = done.send(outcome);

        if inner.config.yield_between_commands {
            tokio::task::yield_now().await;
        }
    }

    // `next` already went idle under the lock; a later drain may own the
    // flag by now.
    guard.finished = true;
    debug!(invoker = %inner.config.name, "processing finished");
}

/// Resolves with the outcome of one enqueued command.
pub struct CommandHandle {
    command: String,
    state: HandleState,
}

enum HandleState {
    Ready(Option<Result<(), Fault>>),
    Waiting(oneshot::Receiver<Result<(), Fault>>),
}

impl CommandHandle {
    fn ready(outcome: Result<(), Fault>) -> Self {
        Self {
            command: String::new(),
            state: HandleState::Ready(Some(outcome)),
        }
    }

    /// Name of the command this handle waits on; empty for an absent command.
    pub fn command_name(&self) -> &str {
        &self.command
    }
}

impl Future for CommandHandle {
    type Output = Result<(), Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match &mut this.state {
            HandleState::Ready(outcome) => Poll::Ready(outcome.take().unwrap_or(Ok(()))),
            HandleState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Err(Fault::Abandoned {
                    command: this.command.clone(),
                })),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("command", &self.command)
            .finish()
    }
}

/// Builder for [`Invoker`].
#[derive(Debug, Clone, Default)]
pub struct InvokerBuilder {
    config: InvokerConfig,
}

impl InvokerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: InvokerConfig) -> Self {
        Self { config }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// On by default. Turning it off lets a run of commands that never await
    /// starve other tasks on the same thread until the queue is empty.
    pub fn yield_between_commands(mut self, enabled: bool) -> Self {
        self.config.yield_between_commands = enabled;
        self
    }

    pub fn yield_between_undos(mut self, enabled: bool) -> Self {
        self.config.yield_between_undos = enabled;
        self
    }

    pub fn build(self) -> Invoker {
        Invoker::with_config(self.config)
    }
}
