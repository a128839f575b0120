use std::thread;
use std::time::{Duration, Instant};

/// Time source for every blocking wait in the agent.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, dur: Duration);

    /// Sleep for exact milliseconds.
    fn sleep_ms(&self, ms: u64) {
        self.sleep(Duration::from_millis(ms));
    }
}

/// Wall clock backed by `thread::sleep`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) {
        thread::sleep(dur);
    }
}

/// Clock whose sleeps return immediately and advance virtual time.
#[cfg(test)]
pub struct ManualClock {
    start: Instant,
    elapsed: std::sync::Mutex<Duration>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: std::sync::Mutex::new(Duration::ZERO),
            sleeps: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    fn sleep(&self, dur: Duration) {
        *self.elapsed.lock().unwrap() += dur;
        self.sleeps.lock().unwrap().push(dur);
    }
}
