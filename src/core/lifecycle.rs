//! Shutdown protocol for a unit.
//!
//! Handlers are registered as either [`ShutdownHandler::Sync`] (run to
//! completion inside `close`) or [`ShutdownHandler::Async`] (handed a [`Done`]
//! they must call once their teardown is finished). `close` only hands back a
//! [`Closing`] future when at least one asynchronous handler is registered.

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Why a unit is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseReason {
    /// The unit is stopped but will come back (e.g. a redeploy).
    #[default]
    Redeploy,
    /// The unit is gone for good.
    Removed,
}

impl CloseReason {
    pub fn is_removal(&self) -> bool {
        matches!(self, CloseReason::Removed)
    }
}

impl From<bool> for CloseReason {
    fn from(removed: bool) -> Self {
        if removed {
            CloseReason::Removed
        } else {
            CloseReason::Redeploy
        }
    }
}

type SyncHandler = Arc<dyn Fn(CloseReason) + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(CloseReason, Done) + Send + Sync>;

/// A callback registered for a unit's close event.
#[derive(Clone)]
pub enum ShutdownHandler {
    /// Fire-and-forget: finished when the call returns.
    Sync(SyncHandler),
    /// Must call [`Done::done`] when its teardown completes.
    Async(AsyncHandler),
}

impl ShutdownHandler {
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(CloseReason) + Send + Sync + 'static,
    {
        ShutdownHandler::Sync(Arc::new(handler))
    }

    pub fn with_done<F>(handler: F) -> Self
    where
        F: Fn(CloseReason, Done) + Send + Sync + 'static,
    {
        ShutdownHandler::Async(Arc::new(handler))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, ShutdownHandler::Async(_))
    }
}

impl fmt::Debug for ShutdownHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownHandler::Sync(_) => f.write_str("ShutdownHandler::Sync"),
            ShutdownHandler::Async(_) => f.write_str("ShutdownHandler::Async"),
        }
    }
}

/// Completion callback handed to an asynchronous shutdown handler.
///
/// Dropping it without calling [`done`](Done::done) leaves the unit's
/// [`Closing`] pending forever.
pub struct Done {
    unit_id: String,
    signal: Option<oneshot::Sender<()>>,
}

impl Done {
    /// Signals that this handler has finished tearing down.
    pub fn done(mut self) {
        if let Some(signal) = self.signal.take() {
            // The receiver may already be gone if nobody awaits the close.
            let _ = signal.send(());
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if self.signal.is_some() {
            log::warn!(
                "Close handler of unit {} dropped its completion callback without calling it; the close will never settle.",
                self.unit_id
            );
        }
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("unit_id", &self.unit_id)
            .field("signalled", &self.signal.is_none())
            .finish()
    }
}

/// Resolves once every asynchronous shutdown handler of a `close` call has
/// called its [`Done`].
#[must_use = "a Closing does nothing unless awaited"]
pub struct Closing {
    inner: BoxFuture<'static, ()>,
}

impl Future for Closing {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Closing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closing")
    }
}

/// Runs `handlers` in registration order and aggregates the asynchronous ones.
pub(crate) fn run_shutdown(
    unit_id: &str,
    handlers: &[ShutdownHandler],
    reason: CloseReason,
) -> Option<Closing> {
    let mut pending = Vec::new();

    for handler in handlers {
        match handler {
            ShutdownHandler::Sync(handler) => handler(reason),
            ShutdownHandler::Async(handler) => {
                let (signal, settled) = oneshot::channel();
                pending.push(settled);
                handler(
                    reason,
                    Done {
                        unit_id: unit_id.to_string(),
                        signal: Some(signal),
                    },
                );
            }
        }
    }

    if pending.is_empty() {
        return None;
    }

    log::debug!(
        "Unit {} waiting on {} asynchronous close handler(s)",
        unit_id,
        pending.len()
    );

    let all_done = future::join_all(pending.into_iter().map(|settled| async move {
        // A cancelled sender means the Done was dropped unsignalled.
        if settled.await.is_err() {
            future::pending::<()>().await;
        }
    }));

    Some(Closing {
        inner: all_done.map(|_| ()).boxed(),
    })
}
