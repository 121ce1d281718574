//! Per-key single-flight coordination
//!
//! The first caller to miss on a key becomes the leader and runs the
//! expensive work; concurrent callers for the same key subscribe to the
//! leader's result instead of starting their own. If the leader is dropped
//! before completing (cancelled, panicked), waiters observe a closed
//! channel and fall back to doing the work themselves.

use crate::error::{CacheError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Result shared with waiters; errors are flattened to their message
pub type FlightResult<T> = std::result::Result<T, String>;

type FlightMap<T> = HashMap<String, broadcast::Sender<FlightResult<T>>>;

/// Registry of in-flight keys
pub struct SingleFlight<T> {
    flights: Arc<Mutex<FlightMap<T>>>,
}

/// Role assigned to a caller by [`SingleFlight::acquire`]
pub enum Flight<T> {
    /// This caller must do the work and then call [`FlightGuard::complete`]
    Leader(FlightGuard<T>),

    /// Another caller is already working on the key
    Follower(FlightWaiter<T>),
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Become the leader for `key`, or subscribe to the current leader
    pub fn acquire(&self, key: &str) -> Flight<T> {
        let mut flights = lock(&self.flights);

        if let Some(sender) = flights.get(key) {
            return Flight::Follower(FlightWaiter {
                receiver: sender.subscribe(),
            });
        }

        let (sender, _) = broadcast::channel(1);
        flights.insert(key.to_string(), sender);

        Flight::Leader(FlightGuard {
            flights: Arc::clone(&self.flights),
            key: key.to_string(),
            completed: false,
        })
    }

    /// Number of keys currently being worked on
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the leader; releases the key when completed or dropped
pub struct FlightGuard<T> {
    flights: Arc<Mutex<FlightMap<T>>>,
    key: String,
    completed: bool,
}

impl<T: Clone> FlightGuard<T> {
    /// Publish the result to every waiter and release the key.
    ///
    /// The key is removed before sending so that a caller arriving later
    /// starts a fresh lookup instead of subscribing to a finished flight.
    pub fn complete(mut self, result: FlightResult<T>) {
        self.completed = true;
        let sender = lock(&self.flights).remove(&self.key);
        if let Some(sender) = sender {
            // No receivers is fine
            let _ = sender.send(result);
        }
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if !self.completed {
            lock(&self.flights).remove(&self.key);
        }
    }
}

/// Held by a follower
pub struct FlightWaiter<T> {
    receiver: broadcast::Receiver<FlightResult<T>>,
}

impl<T: Clone> FlightWaiter<T> {
    /// Wait for the leader. `None` means the leader gave up without a result.
    pub async fn wait(mut self) -> Option<FlightResult<T>> {
        self.receiver.recv().await.ok()
    }
}

fn lock<T>(flights: &Mutex<FlightMap<T>>) -> MutexGuard<'_, FlightMap<T>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a generator future, bounded by an optional timeout, mapping its
/// failure into a [`CacheError`] for `key`
pub(crate) async fn run_generator<T, Fut>(
    key: &str,
    timeout: Option<Duration>,
    generation: Fut,
) -> Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, generation).await.map_err(|_| {
            CacheError::GenerationTimeout {
                key: key.to_string(),
                timeout_ms: limit.as_millis() as u64,
            }
        })?,
        None => generation.await,
    };

    outcome.map_err(|source| CacheError::GenerationFailed {
        key: key.to_string(),
        source,
    })
}
