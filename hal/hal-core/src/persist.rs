//! Calibration persistence callbacks.

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::Result;

/// Storage for calibration blobs, keyed by resource id.
///
/// The engine decides *when* to save and load; the implementor owns the
/// path and format. Resource ids are stable strings derived from the
/// sensor identity (e.g. `"accel_bias_module1"`).
pub trait BiasStore: Send + Sync {
    /// Persists a blob under the given resource id.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write; the
    /// engine logs it and continues.
    fn save(&self, resource_id: &str, data: &[u8]) -> Result<()>;

    /// Loads the blob stored under the given resource id, if any.
    fn load(&self, resource_id: &str) -> Option<Vec<u8>>;
}

/// In-memory store for tests and stateless deployments.
#[derive(Debug, Default)]
pub struct MemoryBiasStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBiasStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Checks whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BiasStore for MemoryBiasStore {
    fn save(&self, resource_id: &str, data: &[u8]) -> Result<()> {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(resource_id.to_owned(), data.to_vec());
        }
        Ok(())
    }

    fn load(&self, resource_id: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(resource_id).cloned()
    }
}
