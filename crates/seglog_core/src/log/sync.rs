//! Periodic background sync.

use crate::error::CoreResult;
use crate::log::LogInner;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to the thread that syncs the active segment every interval.
///
/// The thread waits on a shutdown channel with a timeout, so a stop request
/// is observed within one wait and ends the loop without further I/O.
pub(crate) struct SyncTask {
    shutdown: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl SyncTask {
    /// Spawns the sync thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub(crate) fn spawn(inner: Arc<LogInner>, interval: Duration) -> CoreResult<Self> {
        let (shutdown, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("seglog-sync".to_string())
            .spawn(move || sync_loop(&inner, interval, &rx))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit.
    pub(crate) fn stop(mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("background sync thread panicked");
            }
        }
    }
}

fn sync_loop(inner: &LogInner, interval: Duration, rx: &mpsc::Receiver<()>) {
    loop {
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if let Err(e) = inner.sync_if_due(interval) {
                    tracing::error!(error = %e, "background sync failed");
                }
            }
        }
    }
    tracing::debug!("background sync stopped");
}
