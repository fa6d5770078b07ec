//! Periodic background tasks with cooperative shutdown.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

// Granularity for noticing a stop request while sleeping between ticks.
const STOP_POLL: Duration = Duration::from_millis(100);

/// A unit of periodic work owned by one worker thread.
///
/// State machines live inside the task and only change inside `tick`.
pub trait Task: Send + 'static {
    fn name(&self) -> &str;

    /// Time between the start of two ticks.
    fn period(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn tick(&mut self);

    /// Called once on the worker thread after the last tick.
    fn shutdown(&mut self) {}
}

pub struct Worker {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start `task` on a dedicated named thread.
    pub fn spawn<T: Task>(mut task: T) -> io::Result<Self> {
        let name = task.name().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            info!("{} started", task.name());
            while !stop_for_thread.load(Ordering::SeqCst) {
                let started = Instant::now();
                task.tick();
                let deadline = started + task.period();
                while !stop_for_thread.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::sleep((deadline - now).min(STOP_POLL));
                }
            }
            task.shutdown();
            info!("{} stopped", task.name());
        })?;
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the task to stop after its current tick.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and join, giving up after `timeout`. Returns whether the thread ended.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.request_stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("{} did not stop within {:?}, detaching", self.name, timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        if handle.join().is_err() {
            warn!("{} panicked", self.name);
        } else {
            debug!("{} joined", self.name);
        }
        true
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        ticks: Arc<AtomicUsize>,
        shut_down: Arc<AtomicBool>,
    }

    impl Task for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn period(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn tick(&mut self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn shutdown(&mut self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let shut_down = Arc::new(AtomicBool::new(false));
        let worker = Worker::spawn(Counter {
            ticks: Arc::clone(&ticks),
            shut_down: Arc::clone(&shut_down),
        })
        .unwrap();
        assert_eq!(worker.name(), "counter");

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.stop(Duration::from_secs(2)));
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert!(shut_down.load(Ordering::SeqCst));
    }

    struct Stuck;

    impl Task for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        fn tick(&mut self) {
            thread::sleep(Duration::from_millis(500));
        }
    }

    #[test]
    fn bounded_join_gives_up() {
        let worker = Worker::spawn(Stuck).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!worker.stop(Duration::from_millis(50)));
    }
}
