//! Expiration Timer Task
//!
//! One-shot background timer that hands a table's expiration check to the
//! blocking pool once the next known deadline has passed.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Spawns a one-shot timer that runs `check` after `delay`.
///
/// The check itself runs on the blocking pool, concurrently with whatever
/// callers are doing to the table, since it may block on the table lock and
/// invokes user callbacks.
///
/// # Arguments
/// * `runtime` - Runtime the timer is spawned on
/// * `delay` - How long to wait before running the check
/// * `check` - The expiration pass to run
///
/// # Returns
/// A JoinHandle for the timer. Aborting it before it fires cancels the check;
/// aborting it afterwards has no effect on a check already started.
pub fn spawn_expiration_timer<F>(runtime: &Handle, delay: Duration, check: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        trace!(?delay, "expiration timer fired");
        tokio::task::spawn_blocking(check);
    })
}
