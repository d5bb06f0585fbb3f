//! Per-session memoization of async lookups.

use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// A map of lazily computed values where concurrent requests for the same key
/// share one in-flight computation.
///
/// Failed computations are not cached; the next request retries.
#[derive(Debug)]
pub struct OnceMap<V> {
    cells: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
}

impl<V> Default for OnceMap<V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> OnceMap<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value for `key`, computing it with `init` if no other
    /// request has.
    pub async fn get_or_try_init<F, Fut>(&self, key: &str, init: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key.to_string()).or_default())
        };
        cell.get_or_try_init(init).await.cloned()
    }

    /// The value for `key` if it has been computed.
    pub async fn get(&self, key: &str) -> Option<V> {
        let cell = {
            let cells = self.cells.lock().await;
            cells.get(key).cloned()
        };
        cell.and_then(|c| c.get().cloned())
    }
}
