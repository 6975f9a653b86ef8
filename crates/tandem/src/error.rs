//! Error types for Tandem.
//!
//! Faults raised by listeners and commands never escape through
//! [`EventBus::raise`](crate::EventBus::raise) or the invoker's drain loop.
//! They are logged where they happen and, for commands, handed back through
//! the [`CommandHandle`](crate::CommandHandle) of the command that failed.

use std::any::Any;
use thiserror::Error;

/// A failure observed while dispatching an event or running a command.
#[derive(Debug, Error)]
pub enum Fault {
    /// A listener returned an error (or panicked) while being notified.
    #[error("listener `{listener}` faulted on bus `{bus}`: {source}")]
    Listener {
        bus: String,
        listener: String,
        #[source]
        source: anyhow::Error,
    },

    /// A command's `execute` returned an error.
    #[error("command `{command}` failed: {source}")]
    Execution {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    /// A command's `execute` panicked.
    #[error("command `{command}` panicked: {message}")]
    Panicked { command: String, message: String },

    /// A command's `undo` returned an error or panicked.
    #[error("undo of command `{command}` failed: {source}")]
    Undo {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    /// One or more children of a composite command failed.
    #[error("{failed} of {total} commands in `{command}` failed")]
    Composite {
        command: String,
        failed: usize,
        total: usize,
    },

    /// The command was removed from the queue, or the invoker went away,
    /// before it produced an outcome.
    #[error("command `{command}` was abandoned before it completed")]
    Abandoned { command: String },
}

impl Fault {
    /// Name of the command this fault belongs to, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            Fault::Listener { .. } => None,
            Fault::Execution { command, .. }
            | Fault::Panicked { command, .. }
            | Fault::Undo { command, .. }
            | Fault::Composite { command, .. }
            | Fault::Abandoned { command } => Some(command),
        }
    }

    /// Whether the fault came from a panic rather than a returned error.
    pub fn is_panic(&self) -> bool {
        matches!(self, Fault::Panicked { .. })
    }
}

/// Errors returned by Tandem's own APIs (as opposed to faults raised by user code).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_fault_command_name() {
        let fault = Fault::Abandoned {
            command: "save".to_string(),
        };
        assert_eq!(fault.command(), Some("save"));
        assert!(!fault.is_panic());

        let fault = Fault::Listener {
            bus: "score".to_string(),
            listener: "hud".to_string(),
            source: anyhow::anyhow!("nope"),
        };
        assert_eq!(fault.command(), None);
        assert!(fault.to_string().contains("hud"));
    }
}
