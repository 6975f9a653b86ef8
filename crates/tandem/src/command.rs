//! The [`Command`] trait and the guarded runners the invoker uses to call it.

use crate::error::{panic_message, Fault};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// One unit of asynchronous work together with its inverse.
///
/// `undo` is deliberately required: a command with no meaningful inverse
/// still states so by returning `Ok(())`.
///
/// Commands are shared as `Arc<dyn Command>`, so both methods take `&self`.
/// Commands that need per-run state keep it behind interior mutability; reusing
/// such a command across invokers is the author's call.
///
/// # Example
///
/// ```ignore
/// use tandem_core::{async_trait, Command};
/// use std::sync::atomic::{AtomicI64, Ordering};
///
/// struct AddGold {
///     wallet: Arc<AtomicI64>,
///     amount: i64,
/// }
///
/// #[async_trait]
/// impl Command for AddGold {
///     async fn execute(&self) -> anyhow::Result<()> {
///         self.wallet.fetch_add(self.amount, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn undo(&self) -> anyhow::Result<()> {
///         self.wallet.fetch_sub(self.amount, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Command: Send + Sync + 'static {
    /// Perform the work. Errors become [`Fault::Execution`].
    async fn execute(&self) -> anyhow::Result<()>;

    /// Revert what `execute` did.
    async fn undo(&self) -> anyhow::Result<()>;

    /// Name used in logs and faults.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Run `execute`, turning errors and panics into a [`Fault`].
pub(crate) async fn run_execute(command: &dyn Command) -> Result<(), Fault> {
    match AssertUnwindSafe(command.execute()).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(Fault::Execution {
            command: command.name().to_string(),
            source,
        }),
        Err(payload) => Err(Fault::Panicked {
            command: command.name().to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Run `undo`, turning errors and panics into [`Fault::Undo`].
pub(crate) async fn run_undo(command: &dyn Command) -> Result<(), Fault> {
    let source = match AssertUnwindSafe(command.undo()).catch_unwind().await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(source)) => source,
        Err(payload) => anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())),
    };

    Err(Fault::Undo {
        command: command.name().to_string(),
        source,
    })
}
