//! Keyed single-flight execution
//!
//! Concurrent callers asking for the same key share one in-flight task and
//! all observe its output. The work runs as its own tokio task, so it finishes
//! even when every caller stops waiting. The entry is removed when that task
//! ends, so the next call after completion starts a fresh flight.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

/// The shared task panicked or was cancelled before producing a value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("shared task did not complete: {0}")]
pub struct FlightAborted(String);

type Flight<V> = Shared<BoxFuture<'static, Result<V, FlightAborted>>>;
type Flights<K, V> = Arc<Mutex<HashMap<K, Flight<V>>>>;

pub struct SingleFlight<K, V>
where
    V: Clone,
{
    calls: Flights<K, V>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, or start one with `make` if none is running.
    ///
    /// `make` is only invoked by the caller that starts the flight. Must be
    /// called from within a tokio runtime.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<V, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            match calls.get(&key) {
                Some(flight) => flight.clone(),
                None => {
                    // Landing blocks on `calls` until the insert below is done.
                    let landing = Landing {
                        calls: Arc::clone(&self.calls),
                        key: key.clone(),
                    };
                    let work = make();
                    let task = tokio::spawn(async move {
                        let _landing = landing;
                        work.await
                    });
                    let flight = async move { task.await.map_err(|e| FlightAborted(e.to_string())) }
                        .boxed()
                        .shared();
                    calls.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Number of flights currently running
    pub fn in_flight(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Removes the flight entry when its task ends, including by panic.
struct Landing<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    calls: Flights<K, V>,
    key: K,
}

impl<K, V> Drop for Landing<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
