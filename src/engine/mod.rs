//! Core engine — signal queue → execution coordinator → broker, plus the
//! self-driving auto-trade session and the account poller.

pub mod backoff;
pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod session;

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::types::PipelineError;

/// Held by whichever task is talking to the broker. Trade attempts from the
/// queue, session iterations and account refreshes never overlap.
pub type BrokerLock = Arc<tokio::sync::Mutex<()>>;

pub fn broker_lock() -> BrokerLock {
    Arc::new(tokio::sync::Mutex::new(()))
}

/// Drive `fut` to completion unless `token` is cancelled first.
pub(crate) async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Run `fut`, turning a panic inside it into [`PipelineError::Unexpected`].
///
/// Long-running tasks wrap each unit of work with this so one faulty broker
/// call cannot take the whole task down.
pub(crate) async fn catch_fault<F: Future>(fut: F) -> Result<F::Output, PipelineError> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| PipelineError::Unexpected(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catch_fault_passes_output_through() {
        assert_eq!(catch_fault(async { 7 }).await.ok(), Some(7));
    }

    #[tokio::test]
    async fn test_catch_fault_reports_panic_message() {
        let caught = catch_fault(async {
            if true {
                panic!("adapter blew up");
            }
        })
        .await;
        match caught {
            Err(PipelineError::Unexpected(message)) => assert_eq!(message, "adapter blew up"),
            other => panic!("expected a caught fault, got {other:?}"),
        }
    }
}
