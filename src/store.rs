//! ==============================================================================
//! store.rs - shared latest-reading cell
//! ==============================================================================
//!
//! this struct holds the latest reading shared between:
//! - the sampler (the only writer)
//! - the metrics handler (any number of concurrent readers)
//!
//! we use arc<rwlock<>> for thread-safe sharing:
//! - arc: reference-counted pointer for sharing across tasks
//! - rwlock: multiple readers OR one writer
//!
//! the reading is Copy, so both sides only hold the lock for a single copy
//! and never across any other await point.
//!
//! ==============================================================================

use crate::domain::Reading;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct ReadingsStore {
    inner: Arc<RwLock<Reading>>,
}

impl ReadingsStore {
    /// a store holding the "never sampled" reading
    pub fn new() -> Self {
        Self::default()
    }

    /// replace the stored reading as a whole
    pub async fn write(&self, reading: Reading) {
        *self.inner.write().await = reading;
    }

    /// consistent snapshot of the latest reading
    pub async fn read(&self) -> Reading {
        *self.inner.read().await
    }
}
