//! Loader definitions: a batch fetch function paired with the list of
//! property names it is keyed by.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BoxError;
use crate::props::Props;

/// Number of resolved keys remembered per loader before the least recently
/// used entry is dropped.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub(crate) type BatchResult = Result<Vec<Props>, BoxError>;
pub(crate) type BatchFn = dyn Fn(Vec<Props>) -> BoxFuture<BatchResult> + Send + Sync;

/// Identity token for a [`Loader`].
///
/// A registry keys its caches by this token, never by the loader's contents:
/// two loaders built from identical parts are still distinct definitions and
/// never share a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(u64);

impl LoaderId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        LoaderId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A loader definition: the immutable pairing of a batch fetch function with
/// the ordered list of property names forwarded to it as the key.
///
/// The batch function receives every forward-key submitted within one
/// batching window, in submission order, and must resolve to one result per
/// key, index for index. Create one definition per logical data source, once,
/// for the life of the process:
///
/// ```
/// use sectionloader::{props, BoxError, Loader, Props};
///
/// let user_names = Loader::new(["user_id"], |keys: Vec<Props>| async move {
///     let names: Vec<Props> = keys
///         .iter()
///         .map(|key| props! { "name": format!("user-{}", key["user_id"]) })
///         .collect();
///     Ok::<_, BoxError>(names)
/// });
/// assert_eq!(user_names.forward_props(), ["user_id"]);
/// ```
pub struct Loader {
    id: LoaderId,
    forward_props: Vec<String>,
    batch: Arc<BatchFn>,
    cache_capacity: NonZeroUsize,
    max_batch_size: Option<NonZeroUsize>,
}

impl Loader {
    pub fn new<I, S, F, Fut>(forward_props: I, batch: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Vec<Props>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Props>, BoxError>> + Send + 'static,
    {
        let batch: Arc<BatchFn> =
            Arc::new(move |keys: Vec<Props>| -> BoxFuture<BatchResult> { Box::pin(batch(keys)) });

        Loader {
            id: LoaderId::next(),
            forward_props: forward_props.into_iter().map(Into::into).collect(),
            batch,
            cache_capacity: NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap(),
            max_batch_size: None,
        }
    }

    /// Replace the bounded cache capacity, which defaults to
    /// [`DEFAULT_CACHE_CAPACITY`].
    pub fn cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Dispatch a batch as soon as it holds this many unique keys, without
    /// waiting for the batching window to close.
    pub fn max_batch_size(mut self, limit: NonZeroUsize) -> Self {
        self.max_batch_size = Some(limit);
        self
    }

    pub fn id(&self) -> LoaderId {
        self.id
    }

    /// The property names forwarded to the batch function as the key.
    pub fn forward_props(&self) -> &[String] {
        &self.forward_props
    }

    pub(crate) fn batch_fn(&self) -> &Arc<BatchFn> {
        &self.batch
    }

    pub(crate) fn capacity(&self) -> NonZeroUsize {
        self.cache_capacity
    }

    pub(crate) fn max_batch(&self) -> Option<NonZeroUsize> {
        self.max_batch_size
    }
}

impl Debug for Loader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("id", &self.id)
            .field("forward_props", &self.forward_props)
            .field("batch", &"<closure>")
            .field("cache_capacity", &self.cache_capacity)
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}
