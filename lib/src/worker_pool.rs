use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};

use crate::error::{ExecError, UserFnError};

/// Completion report for one submitted task.
#[derive(Debug)]
pub struct Completion {
    pub id: String,
    pub error: Option<UserFnError>,
}

struct Job {
    id: String,
    thunk: Box<dyn FnOnce() -> Option<UserFnError> + Send>,
}

/// Bounded pool of named worker threads.
///
/// Jobs are handed to the workers over a channel and report back on a shared
/// completion channel, which [`WorkerPool::wait_any`] drains. Dropping the
/// pool closes the job channel and joins every worker, so in-flight jobs run
/// to completion; they are never killed.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    completion_rx: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `max_workers` threads named `{name_prefix}-worker-{i}`.
    pub fn new(max_workers: usize, name_prefix: &str) -> Result<Self, ExecError> {
        if max_workers == 0 {
            return Err(ExecError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let (job_tx, job_rx) = unbounded::<Job>();
        let (completion_tx, completion_rx) = unbounded::<Completion>();
        let mut workers = Vec::with_capacity(max_workers);

        for i in 0..max_workers {
            let job_rx = job_rx.clone();
            let completion_tx = completion_tx.clone();
            let name = if name_prefix.is_empty() {
                format!("worker-{i}")
            } else {
                format!("{name_prefix}-worker-{i}")
            };
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(&job_rx, &completion_tx))
                .map_err(|e| {
                    ExecError::Configuration(format!("failed to spawn worker thread: {e}"))
                })?;
            workers.push(handle);
        }

        Ok(Self {
            job_tx: Some(job_tx),
            completion_rx,
            workers,
        })
    }

    pub fn submit<F>(&self, id: String, thunk: F) -> Result<(), ExecError>
    where
        F: FnOnce() -> Option<UserFnError> + Send + 'static,
    {
        let job = Job {
            id,
            thunk: Box::new(thunk),
        };
        match &self.job_tx {
            Some(job_tx) if job_tx.send(job).is_ok() => Ok(()),
            _ => Err(ExecError::Configuration(
                "worker pool has shut down".to_string(),
            )),
        }
    }

    /// Blocks until at least one submission completes or `timeout` elapses,
    /// then drains every completion already available. The returned vec is
    /// empty iff the timeout was hit.
    pub fn wait_any(&self, timeout: Option<Duration>) -> Vec<Completion> {
        let first = match timeout {
            Some(timeout) => match self.completion_rx.recv_timeout(timeout) {
                Ok(completion) => completion,
                Err(RecvTimeoutError::Timeout) => return Vec::new(),
                Err(RecvTimeoutError::Disconnected) => {
                    error!("The completion channel is disconnected.");
                    return Vec::new();
                }
            },
            None => match self.completion_rx.recv() {
                Ok(completion) => completion,
                Err(_) => {
                    error!("The completion channel is disconnected.");
                    return Vec::new();
                }
            },
        };

        let mut completed = vec![first];
        while let Ok(completion) = self.completion_rx.try_recv() {
            completed.push(completion);
        }
        completed
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the job channel lets the workers drain and exit.
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("A worker thread panicked during shutdown.");
            }
        }
    }
}

fn worker_loop(job_rx: &Receiver<Job>, completion_tx: &Sender<Completion>) {
    while let Ok(Job { id, thunk }) = job_rx.recv() {
        debug!("run task {id}");
        let error = match panic::catch_unwind(AssertUnwindSafe(thunk)) {
            Ok(error) => error,
            Err(payload) => Some(panic_to_error(payload)),
        };
        if completion_tx.send(Completion { id, error }).is_err() {
            break;
        }
    }
}

fn panic_to_error(payload: Box<dyn std::any::Any + Send>) -> UserFnError {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    };
    UserFnError::from(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_new_zero_workers_is_rejected() {
        assert!(matches!(
            WorkerPool::new(0, ""),
            Err(ExecError::Configuration(_))
        ));
    }

    #[test]
    fn test_submit_runs_job_and_reports_completion() {
        let pool = WorkerPool::new(2, "test").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_in_job = Arc::clone(&counter);

        pool.submit("n0".to_string(), move || {
            counter_in_job.fetch_add(1, Ordering::SeqCst);
            None
        })
        .unwrap();

        let completed = pool.wait_any(Some(Duration::from_secs(1)));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "n0");
        assert!(completed[0].error.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_job_error_is_surfaced() {
        let pool = WorkerPool::new(1, "test").unwrap();
        pool.submit("n0".to_string(), || Some(UserFnError::from("boom")))
            .unwrap();

        let completed = pool.wait_any(None);
        assert_eq!(completed[0].error.as_ref().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_job_panic_is_captured() {
        let pool = WorkerPool::new(1, "test").unwrap();
        pool.submit("n0".to_string(), || panic!("blew up"))
            .unwrap();

        let completed = pool.wait_any(None);
        assert!(completed[0]
            .error
            .as_ref()
            .unwrap()
            .to_string()
            .contains("blew up"));
    }

    #[test]
    fn test_wait_any_timeout_returns_empty() {
        let pool = WorkerPool::new(1, "test").unwrap();
        pool.submit("slow".to_string(), || {
            thread::sleep(Duration::from_millis(200));
            None
        })
        .unwrap();

        let completed = pool.wait_any(Some(Duration::from_millis(10)));
        assert!(completed.is_empty());
    }

    #[test]
    fn test_wait_any_drains_all_available_completions() {
        let pool = WorkerPool::new(2, "test").unwrap();
        pool.submit("n0".to_string(), || None).unwrap();
        pool.submit("n1".to_string(), || None).unwrap();
        thread::sleep(Duration::from_millis(100));

        let completed = pool.wait_any(Some(Duration::from_secs(1)));
        assert_eq!(completed.len(), 2);
    }

    #[test]
    fn test_worker_threads_carry_name_prefix() {
        let pool = WorkerPool::new(1, "invoke42").unwrap();
        let (name_tx, name_rx) = unbounded();
        pool.submit("n0".to_string(), move || {
            let name = thread::current().name().unwrap_or("").to_string();
            name_tx.send(name).ok();
            None
        })
        .unwrap();

        pool.wait_any(None);
        assert!(name_rx.recv().unwrap().starts_with("invoke42-worker-"));
    }

    #[test]
    fn test_drop_joins_in_flight_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(1, "test").unwrap();
            let counter_in_job = Arc::clone(&counter);
            pool.submit("slow".to_string(), move || {
                thread::sleep(Duration::from_millis(100));
                counter_in_job.fetch_add(1, Ordering::SeqCst);
                None
            })
            .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
