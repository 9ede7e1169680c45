use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Locks a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Handler panics are caught on the delivery thread, so state behind these
/// mutexes is never left half-updated by user code.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitError {
    Cancelled,
    TimedOut,
}

enum Slot<T> {
    Pending,
    Ready(T),
    Cancelled,
}

/// A single-fire result slot that a waiting thread can block on.
///
/// Completed at most once, either with a value or by cancellation.
pub(crate) struct Completion<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            cond: Condvar::new(),
        }
    }

    /// Returns false if the slot was already completed or cancelled.
    pub(crate) fn complete(&self, value: T) -> bool {
        let mut slot = lock(&self.slot);
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Ready(value);
        self.cond.notify_all();
        true
    }

    pub(crate) fn cancel(&self) {
        let mut slot = lock(&self.slot);
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Cancelled;
            self.cond.notify_all();
        }
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<T, WaitError> {
        let guard = lock(&self.slot);
        let pending = |s: &mut Slot<T>| matches!(s, Slot::Pending);

        let mut guard = match timeout {
            Some(timeout) => {
                self.cond
                    .wait_timeout_while(guard, timeout, pending)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .cond
                .wait_while(guard, pending)
                .unwrap_or_else(PoisonError::into_inner),
        };

        match std::mem::replace(&mut *guard, Slot::Cancelled) {
            Slot::Ready(value) => Ok(value),
            Slot::Cancelled => Err(WaitError::Cancelled),
            Slot::Pending => {
                // leave it pending so a late completion is not mistaken for a cancel
                *guard = Slot::Pending;
                Err(WaitError::TimedOut)
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SignalError {
    Busy,
    TimedOut,
    Closed,
}

#[derive(Default)]
struct SignalState {
    unclaimed: u64,
    waiting: bool,
    closed: bool,
}

/// Counts delivered messages so that one waiter at a time can block until
/// the next one arrives. Closing releases the waiter for good.
#[derive(Default)]
pub(crate) struct MessageSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl MessageSignal {
    pub(crate) fn notify(&self) {
        let mut state = lock(&self.state);
        state.unclaimed += 1;
        self.cond.notify_all();
    }

    pub(crate) fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<(), SignalError> {
        let mut state = lock(&self.state);
        if state.waiting {
            return Err(SignalError::Busy);
        }

        let blocked = |s: &mut SignalState| s.unclaimed == 0 && !s.closed;
        if timeout.is_some_and(|t| t.is_zero()) {
            return Self::claim(&mut state);
        }
        state.waiting = true;

        let mut state = match timeout {
            Some(timeout) => {
                self.cond
                    .wait_timeout_while(state, timeout, blocked)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .cond
                .wait_while(state, blocked)
                .unwrap_or_else(PoisonError::into_inner),
        };
        state.waiting = false;
        Self::claim(&mut state)
    }

    fn claim(state: &mut SignalState) -> Result<(), SignalError> {
        // messages delivered before the close can still be claimed
        if state.unclaimed > 0 {
            state.unclaimed -= 1;
            Ok(())
        } else if state.closed {
            Err(SignalError::Closed)
        } else {
            Err(SignalError::TimedOut)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn completion_hands_value_to_waiter() {
        let completion = Arc::new(Completion::new());
        let c = completion.clone();
        let handle = thread::spawn(move || c.wait(Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(20));
        assert!(completion.complete(7));
        assert_eq!(handle.join().unwrap(), Ok(7));
    }

    #[test]
    fn completion_fires_once() {
        let completion = Completion::new();
        assert!(completion.complete(1));
        assert!(!completion.complete(2));
        assert_eq!(completion.wait(None), Ok(1));
    }

    #[test]
    fn completion_times_out() {
        let completion: Completion<()> = Completion::new();
        let start = Instant::now();
        assert_eq!(
            completion.wait(Some(Duration::from_millis(30))),
            Err(WaitError::TimedOut)
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
        // still usable after a timeout
        assert!(completion.complete(()));
    }

    #[test]
    fn cancel_releases_waiter() {
        let completion: Arc<Completion<()>> = Arc::new(Completion::new());
        let c = completion.clone();
        let handle = thread::spawn(move || c.wait(None));
        thread::sleep(Duration::from_millis(20));
        completion.cancel();
        assert_eq!(handle.join().unwrap(), Err(WaitError::Cancelled));
        assert!(!completion.complete(()));
    }

    #[test]
    fn signal_counts_messages_delivered_before_wait() {
        let signal = MessageSignal::default();
        signal.notify();
        signal.notify();
        assert_eq!(signal.wait(Some(Duration::ZERO)), Ok(()));
        assert_eq!(signal.wait(Some(Duration::ZERO)), Ok(()));
        assert_eq!(
            signal.wait(Some(Duration::from_millis(10))),
            Err(SignalError::TimedOut)
        );
    }

    #[test]
    fn signal_allows_single_waiter() {
        let signal = Arc::new(MessageSignal::default());
        let s = signal.clone();
        let handle = thread::spawn(move || s.wait(None));
        // poll until the spawned thread holds the wait
        loop {
            match signal.wait(Some(Duration::ZERO)) {
                Err(SignalError::Busy) => break,
                Err(SignalError::TimedOut) => thread::sleep(Duration::from_millis(5)),
                other => panic!("unexpected {:?}", other),
            }
        }
        signal.notify();
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn signal_close_unblocks_waiter() {
        let signal = Arc::new(MessageSignal::default());
        let s = signal.clone();
        let handle = thread::spawn(move || s.wait(None));
        thread::sleep(Duration::from_millis(20));
        signal.close();
        assert_eq!(handle.join().unwrap(), Err(SignalError::Closed));
        assert_eq!(signal.wait(None), Err(SignalError::Closed));
    }
}
