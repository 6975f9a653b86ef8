//! # Tandem
//!
//! A typed event bus paired with a sequential command invoker that keeps an
//! undo history.
//!
//! ## Core Concepts
//!
//! Tandem couples two things:
//! - [`EventBus`] = notifications (something happened, tell whoever listens)
//! - [`Command`] = work (do something, and know how to take it back)
//!
//! Commands raise buses, and bus listeners can run or enqueue commands. Both
//! sides stay up when the other misbehaves: a faulting listener never stops a
//! raise, a faulting command never stops the invoker.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!     │
//!     ▼ enqueue()
//! Invoker ── pending (FIFO) ──► drain task
//!     ▲                             │
//!     │                             ▼ execute()
//!     │                         Command ───── raise() ─────┐
//!     │                             │                      │
//!     │                   ok: history.push (LIFO)          ▼
//!     │                   err: log + handle Err       EventBus
//!     │                                                    │
//!     │                                  newest listener first, synchronously
//!     │                                                    │
//!     └──── Listener::enqueue_on ◄── Listener ◄────────────┘
//!                                        │
//!                                        └─► Listener::from_command (spawned)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One command at a time** - An invoker never overlaps two executions
//! 2. **FIFO in, LIFO out** - Commands run in enqueue order and are undone in reverse completion order
//! 3. **Only successes are undoable** - A failed command never enters the history
//! 4. **Snapshot dispatch** - A raise notifies the listeners present when it began, newest first
//! 5. **Faults stay local** - Listener and command faults are logged; only the failing command's handle sees them
//! 6. **Stop between commands** - Nothing interrupts a running `execute`
//!
//! ## Scheduling
//!
//! Everything is cooperative. The invoker yields after every command,
//! `undo_all` after every undo, and [`MessageWaitCommand`] on every poll.
//! [`EventBus::raise`] never suspends. Shared state sits behind short-lived
//! mutexes that are never held across an await or a listener call, so
//! multi-threaded runtimes are fine too.
//!
//! ## Example
//!
//! ```ignore
//! use tandem_core::{async_trait, Command, EventBus, Invoker, Listener};
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! // 1. A bus for balance changes
//! let balance = EventBus::<(i64,)>::named("balance");
//! let hud = Listener::builder("hud")
//!     .on::<i64, _>(|gold| {
//!         println!("gold: {gold}");
//!         Ok(())
//!     })
//!     .build();
//! balance.subscribe(&hud);
//!
//! // 2. A command that changes it
//! struct Earn {
//!     wallet: Arc<AtomicI64>,
//!     bus: EventBus<(i64,)>,
//!     amount: i64,
//! }
//!
//! #[async_trait]
//! impl Command for Earn {
//!     async fn execute(&self) -> anyhow::Result<()> {
//!         let now = self.wallet.fetch_add(self.amount, Ordering::SeqCst) + self.amount;
//!         self.bus.raise_value(now);
//!         Ok(())
//!     }
//!
//!     async fn undo(&self) -> anyhow::Result<()> {
//!         let now = self.wallet.fetch_sub(self.amount, Ordering::SeqCst) - self.amount;
//!         self.bus.raise_value(now);
//!         Ok(())
//!     }
//! }
//!
//! // 3. Run it, then take it back
//! let invoker = Invoker::new();
//! invoker.invoke(Earn { wallet, bus: balance.clone(), amount: 50 }).await?;
//! invoker.undo_last().await;
//! ```
//!
//! ## What This Is Not
//!
//! Tandem does **not** persist anything: queues and histories live in memory
//! and are gone when the process exits. It does not cancel commands midway,
//! and it does not bind handlers by name or reflection.

// Core modules
mod bridge;
mod bus;
mod command;
mod composite;
mod config;
mod error;
mod invoker;
mod listener;
mod lookup;
mod payload;
mod registry;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export command types
pub use command::Command;

// Re-export bus types
pub use bus::{EventBus, SignalBus};
pub use listener::{Listener, ListenerBuilder};
pub use payload::Payload;

// Re-export invoker types
pub use config::InvokerConfig;
pub use invoker::{CommandHandle, HistoryEntry, Invoker, InvokerBuilder};

// Re-export composite and bus-bound commands
pub use bridge::{DelayCommand, EventCommand, MessageWaitCommand, RaiseCommand};
pub use composite::{CompositeCommand, SequenceCommand};

// Re-export registries
pub use lookup::{Object, ObjectLookup, ObjectLookupExt, ObjectRegistry};
pub use registry::ListenerRegistry;

// Re-export error types
pub use error::{Error, Fault};

// Re-export commonly used external types
pub use async_trait::async_trait;
