//! The registry mapping loader definitions to their batching caches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::batch::Batcher;
use crate::loader::{Loader, LoaderId};

/// Maps each loader definition, by identity, to its singleton [`Batcher`].
///
/// The registry is an explicit object rather than a hidden process-wide
/// singleton so that embedders (and tests) can hold one per scope and tear
/// it down at will. In practice an application holds a single registry for
/// the life of the process; entries accumulate per distinct loader
/// definition, of which there are expected to be few, not per request.
#[derive(Default)]
pub struct Registry {
    batchers: Mutex<HashMap<LoaderId, Arc<Batcher>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Get the batching cache for a loader definition, creating it on first
    /// resolution. Later resolutions of the same definition return the same
    /// instance: no new cache, no new batching window. Structurally
    /// identical but distinct definitions get independent instances.
    pub fn resolve(&self, loader: &Loader) -> Arc<Batcher> {
        let mut batchers = self.batchers.lock().unwrap();
        Arc::clone(batchers.entry(loader.id()).or_insert_with(|| {
            debug!("creating batcher for {:?}", loader.id());
            Arc::new(Batcher::new(loader))
        }))
    }

    /// Number of loader definitions resolved so far.
    pub fn len(&self) -> usize {
        self.batchers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every batcher and its cache. Futures already holding a batch
    /// keep it alive until they resolve; new loads start fresh.
    pub fn clear(&self) {
        self.batchers.lock().unwrap().clear();
    }
}
