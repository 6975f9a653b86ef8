//! Invoker configuration.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Settings for an [`Invoker`](crate::Invoker).
///
/// Every field has a default, so a host can load a partial JSON document:
///
/// ```ignore
/// let config = InvokerConfig::from_json(r#"{ "name": "scene" }"#)?;
/// let invoker = InvokerBuilder::from_config(config).build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Name used in logs.
    pub name: String,

    /// Yield to the scheduler after each command the drain loop finishes.
    ///
    /// This is the only suspension point the drain loop adds on its own.
    /// With it off, a queue of commands that never await holds the thread
    /// until the queue is empty, and other tasks on a current-thread runtime
    /// do not run in between.
    pub yield_between_commands: bool,

    /// Yield to the scheduler after each undo in `undo_all`. Turning it off
    /// has the same cost as for `yield_between_commands`.
    pub yield_between_undos: bool,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            name: "invoker".to_string(),
            yield_between_commands: true,
            yield_between_undos: true,
        }
    }
}

impl InvokerConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}
