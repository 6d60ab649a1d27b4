//! Error types surfaced by load requests.

use std::error::Error;
use std::sync::Arc;

/// The error type returned by batch fetch functions. Anything that can be
/// boxed works; `?` and `"message".into()` both produce it.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A failed load request. One batch failure is distributed to every pending
/// request in that batch, so the error is cheaply cloneable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The batch fetch function returned an error. Every request pending in
    /// that batch receives this same error; no partial success is
    /// synthesized.
    #[error("batch fetch failed: {0}")]
    BatchFetch(#[source] Arc<dyn Error + Send + Sync>),

    /// The batch fetch function returned a result sequence whose length
    /// differs from the number of dispatched keys. Results correspond to
    /// keys by index, so a mismatch rejects the whole batch rather than
    /// silently misaligning values.
    #[error("batch fetch returned {got} results for {want} keys")]
    LengthMismatch { want: usize, got: usize },

    /// The forward-key could not be canonically serialized. Affects only the
    /// one request that submitted the key.
    #[error("forward props cannot be serialized: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),
}
