//! Reliability layer: message-ID keyed ACK waiters and the retry loop.
//!
//! The ACK path (`MessageID`) and the file-offer response path (`FileID`)
//! are the same shape — register a single-shot signal, send, block up to a
//! deadline, remove — so both are built on one generic `WaiterRegistry`
//! rather than duplicated.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const RETRY_COUNT: u32 = 3;
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);
pub const FILE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaiterOutcome<T> {
    Signaled(T),
    TimedOut,
}

struct Signal<T> {
    value: Mutex<Option<T>>,
    condvar: Condvar,
}

impl<T> Signal<T> {
    fn new() -> Self {
        Signal {
            value: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    fn wait(&self, timeout: Duration) -> Option<T>
    where
        T: Clone,
    {
        let mut guard = self.value.lock().unwrap();
        let deadline = Instant::now() + timeout;
        while guard.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (new_guard, result) = self
                .condvar
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = new_guard;
            if result.timed_out() && guard.is_none() {
                return None;
            }
        }
        guard.clone()
    }

    fn signal(&self, value: T) {
        let mut guard = self.value.lock().unwrap();
        *guard = Some(value);
        self.condvar.notify_all();
    }
}

/// A registry of single-shot waiters keyed by a correlation id. Used both
/// for ACK waiters (key = MessageID) and file-offer response waiters
/// (key = FileID).
pub struct WaiterRegistry<T> {
    waiters: Mutex<HashMap<String, Arc<Signal<T>>>>,
}

impl<T: Clone> Default for WaiterRegistry<T> {
    fn default() -> Self {
        WaiterRegistry {
            waiters: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> WaiterRegistry<T> {
    pub fn new() -> Self {
        WaiterRegistry::default()
    }

    /// Installs a waiter for `key`. Must be called before the corresponding
    /// frame is sent so an ACK arriving immediately cannot race ahead of
    /// registration.
    pub fn register(&self, key: &str) {
        self.waiters
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Signal::new()));
    }

    /// Signals the waiter for `key`, if one is registered. Returns `false`
    /// (and logs nothing itself — the caller logs) for an unmatched key.
    pub fn signal(&self, key: &str, value: T) -> bool {
        let waiters = self.waiters.lock().unwrap();
        if let Some(signal) = waiters.get(key) {
            signal.signal(value);
            true
        } else {
            false
        }
    }

    /// Blocks up to `timeout` for `key` to be signaled, then removes the
    /// waiter regardless of outcome — bounded waiters never leak.
    pub fn wait(&self, key: &str, timeout: Duration) -> WaiterOutcome<T> {
        let signal = {
            let waiters = self.waiters.lock().unwrap();
            waiters.get(key).cloned()
        };

        let outcome = match signal {
            Some(signal) => match signal.wait(timeout) {
                Some(value) => WaiterOutcome::Signaled(value),
                None => WaiterOutcome::TimedOut,
            },
            None => WaiterOutcome::TimedOut,
        };

        self.waiters.lock().unwrap().remove(key);
        outcome
    }

    pub fn remove(&self, key: &str) {
        self.waiters.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs the standard register → send → wait, up to `retry_count` times.
/// `send` is called once per attempt; `registry.wait` blocks `retry_interval`
/// each time. Returns `true` on ACK, `false` on retry exhaustion.
pub fn send_with_retry<T, F>(
    registry: &WaiterRegistry<T>,
    message_id: &str,
    retry_count: u32,
    retry_interval: Duration,
    mut send: F,
) -> bool
where
    T: Clone,
    F: FnMut(),
{
    registry.register(message_id);
    for _ in 0..retry_count {
        send();
        match registry.wait(message_id, retry_interval) {
            WaiterOutcome::Signaled(_) => return true,
            WaiterOutcome::TimedOut => {
                registry.register(message_id);
            }
        }
    }
    registry.remove(message_id);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signaled_waiter_returns_immediately() {
        let registry: WaiterRegistry<String> = WaiterRegistry::new();
        registry.register("msg-1");

        assert!(registry.signal("msg-1", "RECEIVED".to_string()));
        let outcome = registry.wait("msg-1", Duration::from_millis(100));
        assert_eq!(outcome, WaiterOutcome::Signaled("RECEIVED".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn unmatched_signal_returns_false() {
        let registry: WaiterRegistry<String> = WaiterRegistry::new();
        assert!(!registry.signal("nonexistent", "x".to_string()));
    }

    #[test]
    fn wait_times_out_and_removes_waiter() {
        let registry: WaiterRegistry<String> = WaiterRegistry::new();
        registry.register("msg-2");
        let outcome = registry.wait("msg-2", Duration::from_millis(50));
        assert_eq!(outcome, WaiterOutcome::TimedOut);
        assert!(registry.is_empty());
    }

    #[test]
    fn send_with_retry_succeeds_when_signaled_from_another_thread() {
        let registry: Arc<WaiterRegistry<String>> = Arc::new(WaiterRegistry::new());
        let registry_clone = registry.clone();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            registry_clone.signal("msg-3", "RECEIVED".to_string());
        });

        let mut attempts = 0;
        let result = send_with_retry(&registry, "msg-3", RETRY_COUNT, RETRY_INTERVAL, || {
            attempts += 1;
        });

        assert!(result);
        assert_eq!(attempts, 1);
    }

    #[test]
    fn send_with_retry_exhausts_and_removes_waiter() {
        let registry: WaiterRegistry<String> = WaiterRegistry::new();
        let mut attempts = 0;
        let result = send_with_retry(&registry, "msg-4", RETRY_COUNT, RETRY_INTERVAL, || {
            attempts += 1;
        });

        assert!(!result);
        assert_eq!(attempts, RETRY_COUNT);
        assert!(registry.is_empty());
    }
}
