//! Blocking primitives used by the dispatcher and the worker
//!
//! Both primitives return [`WaitResult::TimedOut`] from a bounded wait instead
//! of blocking forever, and recover from lock poisoning: a panicking callback
//! on one thread must not wedge every other thread of the component.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How long a wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Block until woken
    Infinite,

    /// Give up after this long
    After(Duration),
}

impl WaitTimeout {
    /// Build from an optional millisecond count (`None` = infinite)
    pub fn from_millis(ms: Option<u64>) -> Self {
        match ms {
            Some(ms) => WaitTimeout::After(Duration::from_millis(ms)),
            None => WaitTimeout::Infinite,
        }
    }
}

/// Outcome of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

impl WaitResult {
    pub fn is_timeout(self) -> bool {
        self == WaitResult::TimedOut
    }
}

/// Lock a mutex, taking the data even if another thread panicked with it
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Block on `condvar` until `ready` holds or the timeout expires
fn wait_until<'a, T, F>(
    condvar: &Condvar,
    mut guard: MutexGuard<'a, T>,
    timeout: WaitTimeout,
    mut ready: F,
) -> (MutexGuard<'a, T>, WaitResult)
where
    F: FnMut(&T) -> bool,
{
    match timeout {
        WaitTimeout::Infinite => {
            while !ready(&*guard) {
                guard = condvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
            (guard, WaitResult::Signaled)
        }
        WaitTimeout::After(duration) => {
            let deadline = Instant::now() + duration;
            while !ready(&*guard) {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return (guard, WaitResult::TimedOut);
                }
                guard = condvar
                    .wait_timeout(guard, left)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            (guard, WaitResult::Signaled)
        }
    }
}

/// Counting semaphore
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    /// Create with an initial count
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            condvar: Condvar::new(),
        }
    }

    /// Decrement, blocking while the count is zero
    pub fn wait(&self, timeout: WaitTimeout) -> WaitResult {
        let guard = lock(&self.count);
        let (mut guard, result) = wait_until(&self.condvar, guard, timeout, |count| *count > 0);
        if result == WaitResult::Signaled {
            *guard -= 1;
        }
        result
    }

    /// Block until the count is positive, leaving it unchanged
    ///
    /// Lets a consumer take the permit later together with the item it
    /// guards, via [`Semaphore::try_wait`].
    pub fn wait_available(&self, timeout: WaitTimeout) -> WaitResult {
        let guard = lock(&self.count);
        wait_until(&self.condvar, guard, timeout, |count| *count > 0).1
    }

    /// Decrement if possible without blocking
    pub fn try_wait(&self) -> bool {
        let mut count = lock(&self.count);
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Increment and wake one waiter
    pub fn post(&self) {
        *lock(&self.count) += 1;
        self.condvar.notify_one();
    }

    /// Current count
    pub fn count(&self) -> usize {
        *lock(&self.count)
    }

    /// Force the count to zero without waking anyone
    pub fn reset(&self) {
        *lock(&self.count) = 0;
    }
}

/// Manual-reset signal
///
/// Stays set, releasing every waiter, until explicitly reset.
#[derive(Debug, Default)]
pub struct Signal {
    set: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    /// Create in the given state
    pub fn new(set: bool) -> Self {
        Self {
            set: Mutex::new(set),
            condvar: Condvar::new(),
        }
    }

    /// Set and wake all waiters
    pub fn set(&self) {
        *lock(&self.set) = true;
        self.condvar.notify_all();
    }

    /// Clear
    pub fn reset(&self) {
        *lock(&self.set) = false;
    }

    /// Whether currently set
    pub fn is_set(&self) -> bool {
        *lock(&self.set)
    }

    /// Block until set
    pub fn wait(&self, timeout: WaitTimeout) -> WaitResult {
        let guard = lock(&self.set);
        wait_until(&self.condvar, guard, timeout, |set| *set).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_semaphore_counts_posts() {
        let sem = Semaphore::new(0);
        sem.post();
        sem.post();
        assert_eq!(sem.count(), 2);
        assert_eq!(sem.wait(WaitTimeout::Infinite), WaitResult::Signaled);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_semaphore_wait_times_out() {
        let sem = Semaphore::new(0);
        let start = Instant::now();
        let result = sem.wait(WaitTimeout::After(Duration::from_millis(30)));
        assert!(result.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_semaphore_wakes_blocked_thread() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait(WaitTimeout::After(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        sem.post();
        assert_eq!(waiter.join().unwrap(), WaitResult::Signaled);
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_wait_available_leaves_the_permit() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait_available(WaitTimeout::After(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        sem.post();
        assert_eq!(waiter.join().unwrap(), WaitResult::Signaled);
        assert_eq!(sem.count(), 1);
        assert!(sem.try_wait());
        assert!(sem
            .wait_available(WaitTimeout::After(Duration::from_millis(10)))
            .is_timeout());
    }

    #[test]
    fn test_signal_is_manual_reset() {
        let signal = Signal::new(false);
        signal.set();
        assert_eq!(signal.wait(WaitTimeout::Infinite), WaitResult::Signaled);
        // Still set for the next waiter
        assert_eq!(signal.wait(WaitTimeout::Infinite), WaitResult::Signaled);

        signal.reset();
        assert!(signal
            .wait(WaitTimeout::After(Duration::from_millis(10)))
            .is_timeout());
    }

    #[test]
    fn test_signal_releases_all_waiters() {
        let signal = Arc::new(Signal::new(false));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait(WaitTimeout::After(Duration::from_secs(5))))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        signal.set();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), WaitResult::Signaled);
        }
    }

    #[test]
    fn test_wait_timeout_from_millis() {
        assert_eq!(WaitTimeout::from_millis(None), WaitTimeout::Infinite);
        assert_eq!(
            WaitTimeout::from_millis(Some(5)),
            WaitTimeout::After(Duration::from_millis(5))
        );
    }
}
