//! Per-key coalescing of in-flight loads.
//!
//! The first caller for a key becomes the leader and runs the load; callers
//! arriving while it is in flight park on a oneshot channel and receive a
//! clone of the leader's result. The record is removed from the map before
//! any waiter is woken, so a call that begins strictly after the leader
//! finishes always runs the load again.
//!
//! If the leader's future is dropped at an await point (caller cancelled),
//! its guard tears the record down; orphaned waiters see their channel close
//! and loop back, and one of them becomes the new leader.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Per-key single-flight coalescer.
pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Vec<oneshot::Sender<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make()` for `key`, unless a call for the same key is already in
    /// flight, in which case wait for and return that call's result.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let waiter = {
                let mut calls = self.calls.lock();
                match calls.get_mut(key) {
                    Some(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Some(rx)
                    }
                    None => {
                        calls.insert(key.to_string(), Vec::new());
                        None
                    }
                }
            };

            match waiter {
                Some(rx) => match rx.await {
                    Ok(value) => return value,
                    // Leader cancelled mid-flight; take another lap.
                    Err(_) => continue,
                },
                None => {
                    let mut guard = LeaderGuard {
                        flight: self,
                        key,
                        armed: true,
                    };
                    let value = make().await;
                    guard.armed = false;
                    let waiters = self.calls.lock().remove(key).unwrap_or_default();
                    for tx in waiters {
                        let _ = tx.send(value.clone());
                    }
                    return value;
                }
            }
        }
    }

    /// Number of keys currently in flight.
    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight record if the leader never completed.
struct LeaderGuard<'a, T> {
    flight: &'a SingleFlight<T>,
    key: &'a str,
    armed: bool,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.flight.calls.lock().remove(self.key);
        }
    }
}
