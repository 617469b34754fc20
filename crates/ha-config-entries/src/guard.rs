//! Boundary around integration code
//!
//! Every call into an integration or platform runs with a timeout and with
//! panics caught, so a hung or crashing driver only affects its own entry.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;

/// Why a guarded call produced no result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("panicked: {0}")]
    Panicked(String),
}

/// Run `fut` to completion, bounded by `timeout`, converting panics
pub async fn guarded<F>(timeout: Duration, fut: F) -> Result<F::Output, CallFailure>
where
    F: Future,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Err(_) => Err(CallFailure::TimedOut(timeout)),
        Ok(Err(payload)) => Err(CallFailure::Panicked(panic_message(payload.as_ref()))),
        Ok(Ok(output)) => Ok(output),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
