//! Background task plumbing
//!
//! Timers and generation calls run as tokio tasks that report back through
//! an unbounded channel. Sends are `let _ =`: a closed channel means the
//! engine is gone and nobody wants the result.

use super::messages::EngineMessage;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc::UnboundedSender;

pub(crate) fn spawn_background<F>(tx: UnboundedSender<EngineMessage>, task_name: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(task = task_name, "no async runtime available; task not started");
        return;
    };

    handle.spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            let detail = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            let _ = tx.send(EngineMessage::TaskCrashed {
                task: task_name,
                detail,
            });
        }
    });
}
