//! Testing utilities for Tandem.
//!
//! - [`Journal`] - an ordered, shareable log that commands and listeners write to
//! - [`ScriptedCommand`] - a command whose behavior (fail, panic, yield) is set up front
//! - [`ConcurrencyProbe`] - tracks how many commands were executing at once
//!
//! ```ignore
//! let journal = Journal::new();
//! let invoker = Invoker::new();
//!
//! invoker.enqueue(ScriptedCommand::new("c1", &journal));
//! invoker.enqueue(ScriptedCommand::new("c2", &journal).failing());
//! invoker.wait_idle().await;
//!
//! assert_eq!(journal.entries(), ["c1:execute", "c2:execute"]);
//! assert_eq!(history_names(&invoker), ["c1"]);
//! ```

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tandem_core::{Command, Invoker, Listener};

/// An ordered log shared between the pieces under test.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries starting with `prefix`, in order.
    pub fn filtered(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// A listener that records `label` on zero-argument notifications and,
    /// through the fallback rule, on any raise it has no typed handler for.
    pub fn signal_listener(&self, label: &str) -> Arc<Listener> {
        let journal = self.clone();
        let entry = label.to_string();
        Listener::signal(label.to_string(), move || {
            journal.record(entry.clone());
            Ok(())
        })
    }

    /// A listener that records `label:{value:?}` for every `T` it receives.
    pub fn value_listener<T>(&self, label: &str) -> Arc<Listener>
    where
        T: Debug + 'static,
    {
        let journal = self.clone();
        let label_owned = label.to_string();
        Listener::builder(label.to_string())
            .on::<T, _>(move |value| {
                journal.record(format!("{label_owned}:{value:?}"));
                Ok(())
            })
            .build()
    }
}

/// Tracks the number of commands executing at the same time.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of overlapping executions seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeed,
    Fail,
    Panic,
}

/// A command whose behavior is scripted when it is built.
///
/// It records `{label}:execute` when execution starts and `{label}:undo` when
/// undone (in both cases before any scripted failure).
#[derive(Debug)]
pub struct ScriptedCommand {
    label: String,
    journal: Journal,
    execute: Outcome,
    undo: Outcome,
    yields: usize,
    probe: Option<ConcurrencyProbe>,
}

impl ScriptedCommand {
    pub fn new(label: impl Into<String>, journal: &Journal) -> Self {
        Self {
            label: label.into(),
            journal: journal.clone(),
            execute: Outcome::Succeed,
            undo: Outcome::Succeed,
            yields: 0,
            probe: None,
        }
    }

    /// `execute` returns an error.
    pub fn failing(mut self) -> Self {
        self.execute = Outcome::Fail;
        self
    }

    /// `execute` panics.
    pub fn panicking(mut self) -> Self {
        self.execute = Outcome::Panic;
        self
    }

    /// `undo` returns an error.
    pub fn failing_undo(mut self) -> Self {
        self.undo = Outcome::Fail;
        self
    }

    /// `undo` panics.
    pub fn panicking_undo(mut self) -> Self {
        self.undo = Outcome::Panic;
        self
    }

    /// Yield `yields` times in the middle of `execute`.
    pub fn yielding(mut self, yields: usize) -> Self {
        self.yields = yields;
        self
    }

    pub fn probed(mut self, probe: &ConcurrencyProbe) -> Self {
        self.probe = Some(probe.clone());
        self
    }

    pub fn shared(self) -> Arc<dyn Command> {
        Arc::new(self)
    }
}

#[async_trait]
impl Command for ScriptedCommand {
    async fn execute(&self) -> Result<()> {
        self.journal.record(format!("{}:execute", self.label));
        if let Some(probe) = &self.probe {
            probe.enter();
        }

        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }

        if let Some(probe) = &self.probe {
            probe.exit();
        }

        match self.execute {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => anyhow::bail!("{} failed", self.label),
            Outcome::Panic => panic!("{} panicked", self.label),
        }
    }

    async fn undo(&self) -> Result<()> {
        self.journal.record(format!("{}:undo", self.label));
        match self.undo {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => anyhow::bail!("{} could not be undone", self.label),
            Outcome::Panic => panic!("{} panicked while undoing", self.label),
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Names of the invoker's history, most recent first.
pub fn history_names(invoker: &Invoker) -> Vec<String> {
    invoker
        .history()
        .iter()
        .map(|command| command.name().to_string())
        .collect()
}
