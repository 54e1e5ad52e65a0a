//! Background loops driving periodic cache passes.
//!
//! A [`Worker`] owns at most one spawned task. Each loop iteration first
//! checks for a stop signal, then runs one full pass, then sleeps for the
//! configured period. A stop request during the sleep ends the loop at once;
//! a pass already underway runs to completion.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::WorkerKind;
use crate::{Result, TollgateError};

struct RunningTask {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Start/stop guard around one background loop.
pub(crate) struct Worker {
    kind: WorkerKind,
    running: AtomicBool,
    task: Mutex<Option<RunningTask>>,
}

impl Worker {
    pub(crate) fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the loop. Fails if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start<F, Fut>(&self, period: Duration, pass: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TollgateError::WorkerAlreadyRunning(self.kind))?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let kind = self.kind;
        let task = tokio::spawn(async move {
            debug!(worker = %kind, ?period, "cache worker started");
            loop {
                if !matches!(stop_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                    break;
                }
                pass().await;
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            debug!(worker = %kind, "cache worker stopped");
        });

        *slot = Some(RunningTask { stop_tx, task });
        Ok(())
    }

    /// Signal the loop to stop and wait for it to exit.
    pub(crate) async fn stop(&self) -> Result<()> {
        self.running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TollgateError::WorkerNotRunning(self.kind))?;

        let running = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(RunningTask { stop_tx, task }) = running {
            // the receiver is gone only if the task already exited
            let _ = stop_tx.send(());
            if let Err(e) = task.await {
                warn!(worker = %self.kind, error = %e, "cache worker ended abnormally");
            }
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let slot = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = slot.take() {
            running.task.abort();
        }
    }
}
