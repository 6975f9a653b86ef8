//! Commands made of other commands.

use crate::command::{run_execute, run_undo, Command};
use crate::error::Fault;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Runs its children concurrently and completes when all of them have.
///
/// A failing child does not cut the others short. Once every child has
/// finished, the composite fails with [`Fault::Composite`] if any of them
/// failed, which keeps it out of the invoker's undo history.
///
/// Undo walks the children in reverse order, one at a time, yielding between
/// them and carrying on past children whose undo fails.
pub struct CompositeCommand {
    name: String,
    commands: Vec<Arc<dyn Command>>,
}

impl CompositeCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
        }
    }

    pub fn from_commands(name: impl Into<String>, commands: Vec<Arc<dyn Command>>) -> Self {
        Self {
            name: name.into(),
            commands,
        }
    }

    pub fn with<C: Command>(self, command: C) -> Self {
        self.with_shared(Arc::new(command))
    }

    pub fn with_shared(mut self, command: Arc<dyn Command>) -> Self {
        self.commands.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[async_trait]
impl Command for CompositeCommand {
    async fn execute(&self) -> Result<()> {
        let outcomes = join_all(self.commands.iter().map(|c| run_execute(c.as_ref()))).await;

        let mut failed = 0;
        for fault in outcomes.iter().filter_map(|outcome| outcome.as_ref().err()) {
            failed += 1;
            warn!(composite = %self.name, error = %fault, "child command failed");
        }

        if failed > 0 {
            return Err(Fault::Composite {
                command: self.name.clone(),
                failed,
                total: self.commands.len(),
            }
            .into());
        }
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        undo_in_reverse(&self.name, &self.commands).await;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs its children one after another, stopping at the first failure.
///
/// Undo reverts only the children that completed in the last run, most recent
/// first. A failed run is not rolled back automatically.
pub struct SequenceCommand {
    name: String,
    commands: Vec<Arc<dyn Command>>,
    completed: Mutex<usize>,
}

impl SequenceCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_commands(name, Vec::new())
    }

    pub fn from_commands(name: impl Into<String>, commands: Vec<Arc<dyn Command>>) -> Self {
        Self {
            name: name.into(),
            commands,
            completed: Mutex::new(0),
        }
    }

    pub fn with<C: Command>(self, command: C) -> Self {
        self.with_shared(Arc::new(command))
    }

    pub fn with_shared(mut self, command: Arc<dyn Command>) -> Self {
        self.commands.push(command);
        self
    }

    /// Children that completed in the most recent run.
    pub fn completed(&self) -> usize {
        *self.completed.lock()
    }
}

#[async_trait]
impl Command for SequenceCommand {
    async fn execute(&self) -> Result<()> {
        *self.completed.lock() = 0;
        for command in &self.commands {
            run_execute(command.as_ref()).await?;
            *self.completed.lock() += 1;
        }
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        let completed = std::mem::take(&mut *self.completed.lock());
        undo_in_reverse(&self.name, &self.commands[..completed]).await;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn undo_in_reverse(owner: &str, commands: &[Arc<dyn Command>]) {
    for command in commands.iter().rev() {
        if let Err(fault) = run_undo(command.as_ref()).await {
            warn!(composite = %owner, error = %fault, "child undo failed");
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Child {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        yields: usize,
        fail: bool,
        fail_undo: bool,
    }

    impl Child {
        fn new(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                label,
                log: log.clone(),
                yields: 0,
                fail: false,
                fail_undo: false,
            }
        }
    }

    #[async_trait]
    impl Command for Child {
        async fn execute(&self) -> Result<()> {
            self.log.lock().push(format!("{}:start", self.label));
            for _ in 0..self.yields {
                tokio::task::yield_now().await;
            }
            self.log.lock().push(format!("{}:end", self.label));
            if self.fail {
                anyhow::bail!("{} failed", self.label);
            }
            Ok(())
        }

        async fn undo(&self) -> Result<()> {
            self.log.lock().push(format!("{}:undo", self.label));
            if self.fail_undo {
                anyhow::bail!("{} cannot undo", self.label);
            }
            Ok(())
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    #[tokio::test]
    async fn test_composite_children_interleave() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let composite = CompositeCommand::new("both")
            .with(Child { yields: 2, ..Child::new("a", &log) })
            .with(Child { yields: 2, ..Child::new("b", &log) });

        composite.execute().await.unwrap();

        let log = log.lock();
        assert_eq!(&log[..2], ["a:start", "b:start"]);
        assert_eq!(log.len(), 4);
    }

    #[tokio::test]
    async fn test_composite_waits_for_all_before_failing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let composite = CompositeCommand::new("join")
            .with(Child { yields: 5, ..Child::new("slow", &log) })
            .with(Child { fail: true, ..Child::new("broken", &log) });

        let err = composite.execute().await.unwrap_err();

        assert!(log.lock().contains(&"slow:end".to_string()));
        let fault = err.downcast_ref::<Fault>().unwrap();
        assert!(matches!(fault, Fault::Composite { failed: 1, total: 2, .. }));
    }

    #[tokio::test]
    async fn test_composite_undo_is_reverse_and_continues_past_faults() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let composite = CompositeCommand::new("undo")
            .with(Child::new("a", &log))
            .with(Child { fail_undo: true, ..Child::new("b", &log) })
            .with(Child::new("c", &log));

        composite.undo().await.unwrap();

        assert_eq!(*log.lock(), vec!["c:undo", "b:undo", "a:undo"]);
    }

    #[tokio::test]
    async fn test_empty_composite_succeeds() {
        let composite = CompositeCommand::new("empty");
        assert!(composite.is_empty());
        composite.execute().await.unwrap();
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sequence = SequenceCommand::new("steps")
            .with(Child::new("a", &log))
            .with(Child { fail: true, ..Child::new("b", &log) })
            .with(Child::new("c", &log));

        assert!(sequence.execute().await.is_err());
        assert_eq!(sequence.completed(), 1);

        sequence.undo().await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["a:start", "a:end", "b:start", "b:end", "a:undo"]
        );
    }

    #[tokio::test]
    async fn test_sequence_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sequence = SequenceCommand::new("ordered")
            .with(Child { yields: 3, ..Child::new("a", &log) })
            .with(Child::new("b", &log));

        sequence.execute().await.unwrap();
        sequence.undo().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["a:start", "a:end", "b:start", "b:end", "b:undo", "a:undo"]
        );
    }
}
