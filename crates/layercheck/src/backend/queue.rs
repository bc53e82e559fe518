//! In-order command queue backed by a dedicated worker thread.
//!
//! Devices with asynchronous execution submit kernels and copies here. Work
//! runs in submission order; [`CommandQueue::finish`] is the blocking point
//! that waits for everything submitted so far and surfaces the first failure.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::spec::{BackendError, BackendResult};

type Job = Box<dyn FnOnce() -> BackendResult<()> + Send>;

enum Command {
    Run(Job),
    Fence(Sender<Option<BackendError>>),
}

struct QueueInner {
    name: String,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain pending commands and exit.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = worker.join();
        }
    }
}

#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    pub fn new(name: impl Into<String>) -> BackendResult<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(format!("{name}-queue"))
            .spawn(move || run_worker(receiver))
            .map_err(|err| {
                BackendError::execution(format!("failed to spawn queue worker: {err}"))
            })?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                name,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submits `job` after all previously submitted work. Does not block.
    pub fn enqueue<F>(&self, job: F) -> BackendResult<()>
    where
        F: FnOnce() -> BackendResult<()> + Send + 'static,
    {
        self.send(Command::Run(Box::new(job)))
    }

    /// Submits `job` and blocks until it has run, returning its result.
    ///
    /// Work submitted earlier runs first, so the job observes every
    /// preceding write. Failures of earlier jobs are left for [`finish`].
    ///
    /// [`finish`]: CommandQueue::finish
    pub fn submit_and_wait<R, F>(&self, job: F) -> BackendResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> BackendResult<R> + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        self.enqueue(move || {
            let _ = result_tx.send(job());
            Ok(())
        })?;
        result_rx.recv().map_err(|_| {
            BackendError::execution(format!("queue '{}' dropped a pending job", self.name()))
        })?
    }

    /// Blocks until every submitted job has run.
    pub fn finish(&self) -> BackendResult<()> {
        let (fence_tx, fence_rx) = mpsc::channel();
        self.send(Command::Fence(fence_tx))?;
        match fence_rx.recv() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(BackendError::execution(format!(
                "queue '{}' worker exited before the fence",
                self.name()
            ))),
        }
    }

    /// Returns `true` when both handles drive the same worker.
    pub fn ptr_eq(&self, other: &CommandQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn send(&self, command: Command) -> BackendResult<()> {
        let guard = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or_else(|| {
            BackendError::execution(format!("queue '{}' is shut down", self.inner.name))
        })?;
        sender.send(command).map_err(|_| {
            BackendError::execution(format!("queue '{}' worker is gone", self.inner.name))
        })
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.inner.name)
            .finish()
    }
}

fn run_worker(receiver: Receiver<Command>) {
    let mut first_error: Option<BackendError> = None;
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Run(job) => {
                if let Err(err) = job() {
                    first_error.get_or_insert(err);
                }
            }
            Command::Fence(reply) => {
                let _ = reply.send(first_error.take());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_in_submission_order() {
        let queue = CommandQueue::new("order").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for idx in 0..16 {
            let log = Arc::clone(&log);
            queue
                .enqueue(move || {
                    log.lock().unwrap().push(idx);
                    Ok(())
                })
                .unwrap();
        }
        queue.finish().unwrap();
        assert_eq!(*log.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn submit_and_wait_observes_earlier_jobs() {
        let queue = CommandQueue::new("observe").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            queue
                .enqueue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        let seen = {
            let counter = Arc::clone(&counter);
            queue
                .submit_and_wait(move || Ok(counter.load(Ordering::SeqCst)))
                .unwrap()
        };
        assert_eq!(seen, 8);
    }

    #[test]
    fn finish_reports_first_failure_once() {
        let queue = CommandQueue::new("failure").unwrap();
        queue
            .enqueue(|| Err(BackendError::execution("first")))
            .unwrap();
        queue
            .enqueue(|| Err(BackendError::execution("second")))
            .unwrap();
        assert_eq!(queue.finish(), Err(BackendError::execution("first")));
        assert_eq!(queue.finish(), Ok(()));
    }
}
