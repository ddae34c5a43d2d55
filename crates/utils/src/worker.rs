use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};
use thiserror::Error;

/// A unit of work that is invoked over and over by a [`WorkerLoop`].
///
/// `work` must be safe to call forever. Returning an error ends the loop; the
/// error is handed back through [`WorkerHandle::join`] untouched.
pub trait Worker: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name used for the thread and for log lines.
    fn name(&self) -> &str;

    fn work(&mut self) -> Result<(), Self::Error>;
}

/// Cloneable cancellation flag. Waiting on it wakes up as soon as `stop` is
/// called, so idle intervals never delay shutdown.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `timeout` unless a stop is requested first.
    /// Returns `true` when the token has been stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[derive(Error, Debug)]
pub enum WorkerError<E>
where
    E: std::error::Error + 'static,
{
    #[error("worker `{name}` failed")]
    Failed {
        name: String,
        #[source]
        source: E,
    },

    #[error("worker `{0}` panicked")]
    Panicked(String),
}

/// Paces a [`Worker`] on its own thread: call `work`, idle for `wait_time`,
/// repeat until stopped. Scheduling is best effort; `wait_time` is only a lower
/// bound on the gap between two invocations.
pub struct WorkerLoop<W: Worker> {
    worker: W,
    wait_time: Duration,
    stop: StopToken,
}

impl<W: Worker> WorkerLoop<W> {
    pub fn new(worker: W, wait_time: Duration) -> Self {
        Self {
            worker,
            wait_time,
            stop: StopToken::new(),
        }
    }

    /// Share a token with other loops so one `stop` shuts them all down.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn start(self) -> std::io::Result<WorkerHandle<W::Error>> {
        let name = self.worker.name().to_string();
        let stop = self.stop.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(self.worker, self.wait_time, self.stop))?;

        Ok(WorkerHandle { name, stop, thread })
    }
}

fn run<W: Worker>(mut worker: W, wait_time: Duration, stop: StopToken) -> Result<(), W::Error> {
    info!("[{}] start.", worker.name());
    while !stop.is_stopped() {
        if let Err(e) = worker.work() {
            error!("[{}] stopped on error: {}", worker.name(), e);
            return Err(e);
        }
        if stop.wait(wait_time) {
            break;
        }
    }
    info!("[{}] stop.", worker.name());
    Ok(())
}

pub struct WorkerHandle<E> {
    name: String,
    stop: StopToken,
    thread: JoinHandle<Result<(), E>>,
}

impl<E> WorkerHandle<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// True once the loop has exited, either after a stop or on error.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the loop thread. Does not request a stop by itself.
    pub fn join(self) -> Result<(), WorkerError<E>> {
        match self.thread.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(WorkerError::Failed {
                name: self.name,
                source,
            }),
            Err(_) => Err(WorkerError::Panicked(self.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Debug, Error)]
    #[error("boom at call {0}")]
    struct Boom(usize);

    struct Counter {
        calls: Arc<AtomicUsize>,
        fail_at: Option<usize>,
    }

    impl Worker for Counter {
        type Error = Boom;

        fn name(&self) -> &str {
            "counter"
        }

        fn work(&mut self) -> Result<(), Boom> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_at {
                Some(at) if at == n => Err(Boom(n)),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_runs_until_stopped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = WorkerLoop::new(
            Counter {
                calls: Arc::clone(&calls),
                fail_at: None,
            },
            Duration::from_millis(1),
        )
        .start()
        .unwrap();

        while calls.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        handle.stop();
        handle.join().unwrap();

        let after_join = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), after_join);
    }

    #[test]
    fn test_error_ends_loop_and_surfaces_on_join() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = WorkerLoop::new(
            Counter {
                calls: Arc::clone(&calls),
                fail_at: Some(2),
            },
            Duration::from_millis(1),
        )
        .start()
        .unwrap();

        match handle.join() {
            Err(WorkerError::Failed { name, source }) => {
                assert_eq!(name, "counter");
                assert_eq!(source.0, 2);
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_interrupts_long_wait() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = WorkerLoop::new(
            Counter {
                calls: Arc::clone(&calls),
                fail_at: None,
            },
            Duration::from_secs(3600),
        )
        .start()
        .unwrap();

        while calls.load(Ordering::SeqCst) < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        let started = Instant::now();
        handle.stop();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_token_stops_every_loop() {
        let token = StopToken::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let ha = WorkerLoop::new(
            Counter {
                calls: Arc::clone(&a),
                fail_at: None,
            },
            Duration::from_millis(1),
        )
        .with_stop_token(token.clone())
        .start()
        .unwrap();
        let hb = WorkerLoop::new(
            Counter {
                calls: Arc::clone(&b),
                fail_at: None,
            },
            Duration::from_millis(1),
        )
        .with_stop_token(token.clone())
        .start()
        .unwrap();

        token.stop();
        ha.join().unwrap();
        hb.join().unwrap();
        assert!(token.is_stopped());
    }

    #[test]
    fn test_wait_respects_lower_bound() {
        let token = StopToken::new();
        let started = Instant::now();
        assert!(!token.wait(Duration::from_millis(15)));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
