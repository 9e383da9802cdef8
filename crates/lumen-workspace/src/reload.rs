use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};

/// Handle for asking the reload worker to run.
///
/// The queue holds a single pending request: asking again while one is pending folds into it.
#[derive(Debug, Clone)]
pub(crate) struct ReloadQueue {
    tx: Sender<()>,
}

impl ReloadQueue {
    /// Returns `false` only once the worker has stopped.
    pub(crate) fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::trace!(target = "lumen.workspace", "reload already pending");
                true
            }
            Err(TrySendError::Disconnected(())) => false,
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// A dedicated thread running one reload at a time. Dropping it waits for the reload in flight.
#[derive(Debug)]
pub(crate) struct ReloadWorker {
    queue: ReloadQueue,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ReloadWorker {
    pub(crate) fn spawn(reload: impl Fn() + Send + 'static) -> std::io::Result<Self> {
        let (tx, requests) = crossbeam_channel::bounded(1);
        let (shutdown_tx, shutdown) = crossbeam_channel::bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("lumen-reload".to_string())
            .spawn(move || loop {
                crossbeam_channel::select! {
                    recv(requests) -> msg => match msg {
                        Ok(()) => reload(),
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                }
            })?;

        Ok(Self {
            queue: ReloadQueue { tx },
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub(crate) fn queue(&self) -> &ReloadQueue {
        &self.queue
    }
}

impl Drop for ReloadWorker {
    fn drop(&mut self) {
        // Disconnecting the shutdown channel wakes the worker even while other queue handles live.
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(target = "lumen.workspace", "reload worker panicked");
            }
        }
    }
}
