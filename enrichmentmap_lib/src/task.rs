//! Plumbing shared by the similarity engines: cancellation, progress
//! reporting and the worker pool used by post-analysis.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::{Error, Result};

/// Cooperative cancellation flag shared between a caller and an engine run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How a cancellable run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The run was cancelled and its partial results discarded.
    Cancelled,
}

impl<T> TaskOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            TaskOutcome::Cancelled => None,
        }
    }
}

/// Write-only sink for progress updates.
pub trait ProgressMonitor: Send + Sync {
    fn set_title(&self, title: &str);
    /// Fraction of the work done, in `[0, 1]`.
    fn set_progress(&self, progress: f64);
    fn set_status_message(&self, message: &str);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl ProgressMonitor for NullMonitor {
    fn set_title(&self, _title: &str) {}
    fn set_progress(&self, _progress: f64) {}
    fn set_status_message(&self, _message: &str) {}
}

/// Forwards titles and status messages to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMonitor;

impl ProgressMonitor for LogMonitor {
    fn set_title(&self, title: &str) {
        log::info!("{title}");
    }

    fn set_progress(&self, progress: f64) {
        log::trace!("progress {:.1}%", progress * 100.0);
    }

    fn set_status_message(&self, message: &str) {
        log::debug!("{message}");
    }
}

/// Counts finished units of work and reports them as a fraction of `total`.
///
/// Increments may come from several threads. Updates are forwarded to the
/// monitor under a high-water mark, so the monitor never sees the count go
/// backwards; an increment overtaken by a larger one is not reported.
pub struct DiscreteProgress<'a> {
    monitor: &'a dyn ProgressMonitor,
    total: usize,
    current: AtomicUsize,
    reported: Mutex<usize>,
    unit: &'static str,
}

impl<'a> DiscreteProgress<'a> {
    pub fn new(monitor: &'a dyn ProgressMonitor, title: &str, total: usize, unit: &'static str) -> Self {
        monitor.set_title(title);
        monitor.set_progress(0.0);
        DiscreteProgress {
            monitor,
            total,
            current: AtomicUsize::new(0),
            reported: Mutex::new(0),
            unit,
        }
    }

    pub fn inc(&self) {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(mut reported) = self.reported.lock() else {
            return;
        };
        if current <= *reported {
            return;
        }
        *reported = current;
        let fraction = if self.total == 0 {
            1.0
        } else {
            (current as f64 / self.total as f64).min(1.0)
        };
        self.monitor.set_progress(fraction);
        self.monitor.set_status_message(&format!(
            "Computing geneset similarity: {} of {} {}",
            current, self.total, self.unit
        ));
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

/// Runs one unit of work per item on a fixed size pool.
///
/// A watchdog thread polls the caller's [`CancellationToken`] every
/// `poll_interval` and raises the shared interrupt flag once it is set, or
/// once `timeout` has elapsed. Workers receive the interrupt flag and are
/// expected to check it in their innermost loop. The first error returned by
/// a worker also raises the flag and is returned from [`run`](Self::run).
#[derive(Debug, Clone)]
pub struct ParallelCoordinator {
    pub threads: usize,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ParallelCoordinator {
    fn default() -> Self {
        ParallelCoordinator {
            threads: num_cpus::get(),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl ParallelCoordinator {
    /// Processes every item with `work` and blocks until all units finished,
    /// the run was cancelled, or the timeout elapsed.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] when the bound elapsed before the work finished,
    /// [`Error::ThreadPool`] when the pool cannot be built, or the first error
    /// a worker returned.
    pub fn run<T, F>(&self, items: &[T], token: &CancellationToken, work: F) -> Result<TaskOutcome<()>>
    where
        T: Sync,
        F: Fn(&T, &AtomicBool) -> Result<()> + Sync,
    {
        if token.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads.max(1))
            .thread_name(|i| format!("em-similarity-{}", i))
            .build()?;

        let interrupted = AtomicBool::new(false);
        let timed_out = AtomicBool::new(false);
        let failure: Mutex<Option<Error>> = Mutex::new(None);
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let started = Instant::now();

        std::thread::scope(|scope| {
            let interrupt = &interrupted;
            let timeout_flag = &timed_out;
            scope.spawn(move || loop {
                match done_rx.recv_timeout(self.poll_interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if token.is_cancelled() {
                            log::debug!("cancellation requested, interrupting workers");
                            interrupt.store(true, Ordering::SeqCst);
                        }
                        if started.elapsed() >= self.timeout {
                            log::warn!("similarity workers exceeded {:?}", self.timeout);
                            timeout_flag.store(true, Ordering::SeqCst);
                            interrupt.store(true, Ordering::SeqCst);
                        }
                    }
                    _ => break,
                }
            });

            pool.install(|| {
                items.par_iter().with_max_len(1).for_each(|item| {
                    if interrupted.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Err(err) = work(item, &interrupted) {
                        interrupted.store(true, Ordering::SeqCst);
                        if let Ok(mut failure) = failure.lock() {
                            failure.get_or_insert(err);
                        }
                    }
                });
            });
            let _ = done_tx.send(());
        });

        if let Some(err) = failure.into_inner().ok().flatten() {
            return Err(err);
        }
        if timed_out.load(Ordering::SeqCst) {
            return Err(Error::Timeout(self.timeout));
        }
        if token.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }
        Ok(TaskOutcome::Completed(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(timeout: Duration) -> ParallelCoordinator {
        ParallelCoordinator {
            threads: 2,
            poll_interval: Duration::from_millis(5),
            timeout,
        }
    }

    #[test]
    fn runs_every_item() {
        let seen = Mutex::new(Vec::new());
        let items: Vec<usize> = (0..10).collect();
        let outcome = coordinator(Duration::from_secs(60))
            .run(&items, &CancellationToken::new(), |i, _| {
                seen.lock().unwrap().push(*i);
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Completed(()));
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, items);
    }

    #[test]
    fn pre_cancelled_does_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let count = AtomicUsize::new(0);
        let outcome = coordinator(Duration::from_secs(60))
            .run(&[1, 2, 3], &token, |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_interrupts_workers() {
        let token = CancellationToken::new();
        let items: Vec<usize> = (0..4).collect();
        let outcome = coordinator(Duration::from_secs(60))
            .run(&items, &token, |_, interrupted| {
                token.cancel();
                while !interrupted.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn timeout_is_an_error() {
        let result = coordinator(Duration::from_millis(20)).run(&[0], &CancellationToken::new(), |_, interrupted| {
            while !interrupted.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn worker_error_is_returned() {
        let items: Vec<usize> = (0..8).collect();
        let result = coordinator(Duration::from_secs(60)).run(&items, &CancellationToken::new(), |i, _| {
            if *i == 3 {
                Err(Error::InvalidArgument("bad item".to_owned()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn discrete_progress_counts() {
        let progress = DiscreteProgress::new(&NullMonitor, "test", 2, "tasks");
        progress.inc();
        progress.inc();
        assert_eq!(progress.current(), 2);
    }

    #[derive(Default)]
    struct RecordingMonitor {
        progress: Mutex<Vec<f64>>,
        messages: Mutex<Vec<String>>,
    }

    impl ProgressMonitor for RecordingMonitor {
        fn set_title(&self, _title: &str) {}

        fn set_progress(&self, progress: f64) {
            self.progress.lock().unwrap().push(progress);
        }

        fn set_status_message(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_owned());
        }
    }

    #[test]
    fn concurrent_progress_never_goes_backwards() {
        let monitor = RecordingMonitor::default();
        let items: Vec<usize> = (0..2000).collect();
        let progress = DiscreteProgress::new(&monitor, "test", items.len(), "tasks");
        let coordinator = ParallelCoordinator {
            threads: 8,
            ..coordinator(Duration::from_secs(60))
        };
        let outcome = coordinator
            .run(&items, &CancellationToken::new(), |_, _| {
                progress.inc();
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Completed(()));
        assert_eq!(progress.current(), items.len());

        let reported = monitor.progress.into_inner().unwrap();
        assert!(reported.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(reported.last().copied(), Some(1.0));
        let messages = monitor.messages.into_inner().unwrap();
        assert_eq!(
            messages.last().map(String::as_str),
            Some("Computing geneset similarity: 2000 of 2000 tasks")
        );
    }
}
