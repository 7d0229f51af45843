//! Handler invocation.
//!
//! Each handler call is isolated: an error or a panic in one handler becomes
//! an [`EngineError`] for that tag only. With a timeout, the handler runs on
//! its own thread and is abandoned (left to finish in the background) once
//! the deadline passes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::attributes::Attributes;
use crate::error::{EngineError, HandlerError};
use crate::registry::Handler;

/// Calls `handler` for one tag occurrence.
pub(crate) fn invoke(
    handler: &Arc<dyn Handler>,
    attrs: Attributes,
    content: Option<&str>,
    tag: &str,
    timeout: Option<Duration>,
) -> Result<String, EngineError> {
    let result = match timeout {
        None => call(handler.as_ref(), &attrs, content, tag),
        Some(after) => return call_with_timeout(handler, attrs, content, tag, after),
    };
    result.map_err(|source| EngineError::Handler {
        tag: tag.to_string(),
        source,
    })
}

fn call(
    handler: &dyn Handler,
    attrs: &Attributes,
    content: Option<&str>,
    tag: &str,
) -> Result<String, HandlerError> {
    panic::catch_unwind(AssertUnwindSafe(|| handler.render(attrs, content, tag)))
        .unwrap_or_else(|payload| Err(HandlerError::new(panic_message(payload.as_ref()))))
}

fn call_with_timeout(
    handler: &Arc<dyn Handler>,
    attrs: Attributes,
    content: Option<&str>,
    tag: &str,
    after: Duration,
) -> Result<String, EngineError> {
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(handler);
    let content = content.map(str::to_string);
    let name = tag.to_string();

    let spawned = thread::Builder::new()
        .name(format!("bbcodes-{}", tag))
        .spawn(move || {
            let result = call(worker.as_ref(), &attrs, content.as_deref(), &name);
            // The receiver is gone if the call already timed out.
            let _ = tx.send(result);
        });

    let failed = |source: HandlerError| EngineError::Handler {
        tag: tag.to_string(),
        source,
    };

    if let Err(err) = spawned {
        return Err(failed(HandlerError::with_source(
            "could not start handler thread",
            err,
        )));
    }

    match rx.recv_timeout(after) {
        Ok(result) => result.map_err(failed),
        Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout {
            tag: tag.to_string(),
            after,
        }),
        Err(RecvTimeoutError::Disconnected) => {
            Err(failed(HandlerError::new("handler thread exited without a result")))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("handler panicked: {}", detail)
}
