//! Commands that bridge into and out of event buses.

use crate::bus::{EventBus, SignalBus};
use crate::command::Command;
use crate::listener::Listener;
use crate::payload::Payload;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type Callback = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// Fires a zero-argument notification and completes at once.
///
/// Execution runs the attached callback, if any, then signals the attached
/// bus, if any. It does not wait for anything the listeners start.
pub struct EventCommand {
    name: String,
    callback: Option<Callback>,
    bus: Option<SignalBus>,
}

impl EventCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            callback: None,
            bus: None,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn with_bus(mut self, bus: &SignalBus) -> Self {
        self.bus = Some(bus.clone());
        self
    }
}

#[async_trait]
impl Command for EventCommand {
    async fn execute(&self) -> Result<()> {
        if let Some(callback) = &self.callback {
            callback()?;
        }
        if let Some(bus) = &self.bus {
            bus.signal();
        }
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Raises a typed payload on a bus when executed, and optionally an inverse
/// payload when undone.
pub struct RaiseCommand<P: Payload> {
    name: String,
    bus: EventBus<P>,
    payload: P,
    undo_payload: Option<P>,
}

impl<P: Payload> RaiseCommand<P> {
    pub fn new(bus: &EventBus<P>, payload: P) -> Self {
        Self {
            name: format!("raise:{}", bus.name()),
            bus: bus.clone(),
            payload,
            undo_payload: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_undo_payload(mut self, payload: P) -> Self {
        self.undo_payload = Some(payload);
        self
    }
}

#[async_trait]
impl<P: Payload> Command for RaiseCommand<P> {
    async fn execute(&self) -> Result<()> {
        self.bus.raise(self.payload.clone());
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        if let Some(payload) = &self.undo_payload {
            self.bus.raise(payload.clone());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Waits until a bus has been raised a given number of times.
///
/// Each execution subscribes a fresh counting listener, then polls the count,
/// yielding once per check (or sleeping for the poll interval, if one is
/// set). Completion therefore lags the final raise by up to one poll. The
/// listener is unsubscribed when the wait ends or the execution is dropped.
pub struct MessageWaitCommand<P: Payload> {
    name: String,
    bus: EventBus<P>,
    threshold: usize,
    poll_interval: Option<Duration>,
}

impl<P: Payload> MessageWaitCommand<P> {
    pub fn new(bus: &EventBus<P>, threshold: usize) -> Self {
        Self {
            name: format!("wait:{}", bus.name()),
            bus: bus.clone(),
            threshold,
            poll_interval: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep between checks instead of yielding.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

#[async_trait]
impl<P: Payload> Command for MessageWaitCommand<P> {
    async fn execute(&self) -> Result<()> {
        if self.threshold == 0 {
            return Ok(());
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let listener = Listener::signal(format!("{}:counter", self.name), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let _subscription = Subscription::new(&self.bus, listener);

        while seen.load(Ordering::SeqCst) < self.threshold {
            match self.poll_interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => tokio::task::yield_now().await,
            }
        }

        debug!(command = %self.name, observed = seen.load(Ordering::SeqCst), "wait satisfied");
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Unsubscribes its listener when dropped.
struct Subscription<'a, P: Payload> {
    bus: &'a EventBus<P>,
    listener: Arc<Listener>,
}

impl<'a, P: Payload> Subscription<'a, P> {
    fn new(bus: &'a EventBus<P>, listener: Arc<Listener>) -> Self {
        bus.subscribe(&listener);
        Self { bus, listener }
    }
}

impl<P: Payload> Drop for Subscription<'_, P> {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.listener);
    }
}

/// Waits for a fixed duration. Nothing to undo.
pub struct DelayCommand {
    name: String,
    duration: Duration,
}

impl DelayCommand {
    pub fn new(duration: Duration) -> Self {
        Self {
            name: format!("delay:{}ms", duration.as_millis()),
            duration,
        }
    }
}

#[async_trait]
impl Command for DelayCommand {
    async fn execute(&self) -> Result<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_event_command_runs_callback_then_signals() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = SignalBus::named("done");

        let listener_log = log.clone();
        bus.subscribe(&Listener::signal("observer", move || {
            listener_log.lock().push("signal");
            Ok(())
        }));

        let callback_log = log.clone();
        let command = EventCommand::new("finish")
            .with_callback(move || {
                callback_log.lock().push("callback");
                Ok(())
            })
            .with_bus(&bus);

        command.execute().await.unwrap();
        assert_eq!(*log.lock(), vec!["callback", "signal"]);
        assert_eq!(command.name(), "finish");
    }

    #[tokio::test]
    async fn test_event_command_callback_error_fails_execute() {
        let command = EventCommand::new("broken").with_callback(|| anyhow::bail!("no"));
        assert!(command.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_raise_command_raises_payload_and_inverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::<(i64,)>::named("gold");
        let listener_log = log.clone();
        bus.subscribe(
            &Listener::builder("wallet")
                .on::<i64, _>(move |delta| {
                    listener_log.lock().push(*delta);
                    Ok(())
                })
                .build(),
        );

        let command = RaiseCommand::new(&bus, (25,)).with_undo_payload((-25,));
        command.execute().await.unwrap();
        command.undo().await.unwrap();

        assert_eq!(*log.lock(), vec![25, -25]);
        assert_eq!(command.name(), "raise:gold");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_message_wait_completes_after_threshold() {
        let bus = EventBus::<(u8,)>::named("ticks");
        let command = Arc::new(MessageWaitCommand::new(&bus, 3));

        let waiter = {
            let command = command.clone();
            tokio::spawn(async move { command.execute().await })
        };

        while bus.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        for tick in 0..3 {
            assert!(!waiter.is_finished());
            bus.raise_value(tick);
        }

        waiter.await.unwrap().unwrap();
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_message_wait_with_zero_threshold_returns_immediately() {
        let bus = SignalBus::new();
        MessageWaitCommand::new(&bus, 0).execute().await.unwrap();
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_wait_unsubscribes() {
        let bus = SignalBus::named("never");
        let command = MessageWaitCommand::new(&bus, 1).poll_interval(Duration::from_millis(1));

        let outcome = tokio::time::timeout(Duration::from_millis(20), command.execute()).await;

        assert!(outcome.is_err());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_delay_command_waits() {
        let start = tokio::time::Instant::now();
        let delay = DelayCommand::new(Duration::from_millis(15));
        delay.execute().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(delay.name(), "delay:15ms");
    }
}
