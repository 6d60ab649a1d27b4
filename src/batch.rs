//! The per-loader batching cache: coalesces concurrent load requests into
//! single batch calls and memoizes settled results by canonical key.

use std::future::Future;
use std::mem;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use log::debug;
use lru::LruCache;

use crate::error::LoadError;
use crate::loader::{BatchFn, BatchResult, BoxFuture, Loader};
use crate::props::{canonical_key, Props};
use crate::wakerset::{WakerSet, WakerToken};

/// The batching cache instance for one loader definition.
///
/// Holds a bounded least-recently-used map from canonical key to the shared
/// slot that will (or did) resolve that key, plus the batch currently
/// accumulating keys. All loads issued before the current task yields are
/// collected into one call of the loader's batch function; identical
/// canonical keys share a single slot, within a window and across later
/// ones, until the entry is evicted.
///
/// Instances are created and shared by [`Registry::resolve`]; one exists per
/// loader definition for as long as the registry keeps it.
///
/// [`Registry::resolve`]: crate::Registry::resolve
pub struct Batcher {
    batch: Arc<BatchFn>,
    max_batch: Option<NonZeroUsize>,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    cache: LruCache<String, CacheEntry>,
    // The batch currently accepting keys, if any. Weak so that a batch whose
    // entries were all evicted and whose futures are gone can disappear.
    current: Weak<Shared>,
}

struct CacheEntry {
    shared: Arc<Shared>,
    index: usize,
}

/// One batch, shared between every future interested in one of its keys.
struct Shared {
    // Handle back to the owning cache, for eviction of failed keys.
    owner: Weak<Mutex<Inner>>,
    state: Mutex<State>,
}

enum State {
    Accumulating(Accumulating),
    Fetching(Fetching),
    Done(Result<Vec<Props>, LoadError>),
}

struct Accumulating {
    batch: Arc<BatchFn>,
    keys: Vec<Props>,
    canon: Vec<String>,
    // Key count observed by the most recent poll. The window closes when a
    // poll finds it unchanged: every task scheduled before that poll has had
    // its chance to add a key.
    seen: Option<usize>,
    // Set when the key limit is reached; the next poll dispatches.
    closed: bool,
    wakers: WakerSet,
}

struct Fetching {
    fut: BoxFuture<BatchResult>,
    canon: Vec<String>,
    wakers: WakerSet,
}

impl Batcher {
    pub(crate) fn new(loader: &Loader) -> Self {
        Batcher {
            batch: Arc::clone(loader.batch_fn()),
            max_batch: loader.max_batch(),
            inner: Arc::new(Mutex::new(Inner {
                cache: LruCache::new(loader.capacity()),
                current: Weak::new(),
            })),
        }
    }

    /// Request the value for one forward-key.
    ///
    /// If the canonical key is cached, the returned future resolves from the
    /// existing slot, settled or not, without a new fetch. Otherwise the key
    /// joins the currently accumulating batch (or starts a new one) and is
    /// dispatched with it when the batching window closes.
    pub fn load(&self, key: Props) -> LoadFuture {
        let canon = match canonical_key(&key) {
            Ok(canon) => canon,
            Err(err) => return LoadFuture::failed(err),
        };

        let mut inner = self.inner.lock().unwrap();

        // get (not peek) so a hit refreshes the entry's recency.
        if let Some(entry) = inner.cache.get(&canon) {
            return LoadFuture::attached(Arc::clone(&entry.shared), entry.index);
        }

        if let Some(shared) = inner.current.upgrade() {
            let mut state = shared.state.lock().unwrap();
            if let State::Accumulating(acc) = &mut *state {
                if !acc.closed {
                    // The entry may have been evicted while its batch is
                    // still open; reattach to the existing slot rather than
                    // dispatching a duplicate key.
                    let index = match acc.canon.iter().position(|c| *c == canon) {
                        Some(index) => index,
                        None => {
                            acc.keys.push(key);
                            acc.canon.push(canon.clone());
                            acc.canon.len() - 1
                        }
                    };

                    let full = self
                        .max_batch
                        .map_or(false, |max| acc.keys.len() >= max.get());
                    if full {
                        acc.closed = true;
                        acc.wakers.wake_driver();
                    }
                    drop(state);

                    if full {
                        inner.current = Weak::new();
                    }
                    inner.cache.put(
                        canon,
                        CacheEntry {
                            shared: Arc::clone(&shared),
                            index,
                        },
                    );
                    return LoadFuture::attached(shared, index);
                }
            }
        }

        // No open batch; start accumulating a new one.
        let closed = self.max_batch.map_or(false, |max| max.get() <= 1);
        let shared = Arc::new(Shared {
            owner: Arc::downgrade(&self.inner),
            state: Mutex::new(State::Accumulating(Accumulating {
                batch: Arc::clone(&self.batch),
                keys: vec![key],
                canon: vec![canon.clone()],
                seen: None,
                closed,
                wakers: WakerSet::default(),
            })),
        });
        if !closed {
            inner.current = Arc::downgrade(&shared);
        }
        inner.cache.put(
            canon,
            CacheEntry {
                shared: Arc::clone(&shared),
                index: 0,
            },
        );
        LoadFuture::attached(shared, 0)
    }

    /// Whether a settled or in-flight entry exists for this forward-key.
    /// Does not refresh the entry's recency.
    pub fn contains(&self, key: &Props) -> bool {
        match canonical_key(key) {
            Ok(canon) => self.inner.lock().unwrap().cache.peek(&canon).is_some(),
            Err(_) => false,
        }
    }

    /// Drop the cache entry for one forward-key, so the next request for it
    /// issues a new fetch. An in-flight fetch is unaffected; futures already
    /// holding the slot still resolve. Returns whether an entry was removed.
    pub fn evict(&self, key: &Props) -> bool {
        match canonical_key(key) {
            Ok(canon) => self.inner.lock().unwrap().cache.pop(&canon).is_some(),
            Err(_) => false,
        }
    }

    /// Drop every cache entry.
    pub fn clear(&self) {
        self.inner.lock().unwrap().cache.clear();
    }
}

/// Remove a failed batch's keys from the cache, so a transient fetch failure
/// is not memoized for the entry's LRU lifetime. Entries that were already
/// replaced by a newer batch are left alone.
fn evict_failed(shared: &Arc<Shared>, canon_keys: &[String]) {
    let Some(inner) = shared.owner.upgrade() else {
        return;
    };
    let mut inner = inner.lock().unwrap();
    debug!("evicting {} failed keys from cache", canon_keys.len());
    for canon in canon_keys {
        let stale = inner
            .cache
            .peek(canon)
            .map_or(false, |entry| Arc::ptr_eq(&entry.shared, shared));
        if stale {
            inner.cache.pop(canon);
        }
    }
}

/// A pending load request, created by [`Batcher::load`].
///
/// Resolves to the value the batch function produced for this future's key,
/// or to the batch's shared error. All of the asynchronous work is driven by
/// polling these futures; the batch function is never scheduled on a
/// runtime in the background.
pub struct LoadFuture {
    inner: FutureInner,
}

enum FutureInner {
    // Failed before a batch was ever involved (key serialization).
    Failed(Option<LoadError>),
    Attached {
        shared: Option<Arc<Shared>>,
        index: usize,
        waker: Option<WakerToken>,
    },
}

impl LoadFuture {
    fn failed(err: LoadError) -> Self {
        LoadFuture {
            inner: FutureInner::Failed(Some(err)),
        }
    }

    fn attached(shared: Arc<Shared>, index: usize) -> Self {
        LoadFuture {
            inner: FutureInner::Attached {
                shared: Some(shared),
                index,
                waker: None,
            },
        }
    }
}

fn upsert_waker(wakers: &mut WakerSet, slot: &mut Option<WakerToken>, ctx: &Context<'_>) {
    match slot {
        Some(token) => wakers.update(token, ctx.waker()),
        None => *slot = Some(wakers.register(ctx.waker())),
    }
}

impl Future for LoadFuture {
    type Output = Result<Props, LoadError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (shared, index, waker) = match &mut this.inner {
            FutureInner::Failed(slot) => {
                let err = slot.take().expect("polled a completed LoadFuture");
                return Poll::Ready(Err(err));
            }
            FutureInner::Attached {
                shared,
                index,
                waker,
            } => (shared, *index, waker),
        };

        let handle = Arc::clone(shared.as_ref().expect("polled a completed LoadFuture"));

        // The lock is only held within a single poll, never across one, so
        // holding it in an async context is fine.
        let mut state = handle.state.lock().unwrap();

        let mut failed_keys = Vec::new();

        if let State::Accumulating(acc) = &mut *state {
            let pending_keys = acc.keys.len();
            if !acc.closed && acc.seen != Some(pending_keys) {
                // Keys arrived since the last poll (or this is the first):
                // keep the window open for one more scheduling round and ask
                // to be re-polled immediately.
                acc.seen = Some(pending_keys);
                ctx.waker().wake_by_ref();
                upsert_waker(&mut acc.wakers, waker, ctx);
                return Poll::Pending;
            }

            // Window closed; dispatch the accumulated batch.
            let keys = mem::take(&mut acc.keys);
            let canon = mem::take(&mut acc.canon);
            let wakers = mem::take(&mut acc.wakers);
            let batch = Arc::clone(&acc.batch);
            debug!("dispatching batch of {} keys", keys.len());
            let fut = batch(keys);
            *state = State::Fetching(Fetching { fut, canon, wakers });
        }

        if let State::Fetching(fetch) = &mut *state {
            let result = match fetch.fut.as_mut().poll(ctx) {
                Poll::Pending => {
                    upsert_waker(&mut fetch.wakers, waker, ctx);
                    return Poll::Pending;
                }
                Poll::Ready(result) => result,
            };

            let want = fetch.canon.len();
            let outcome = match result {
                Ok(values) if values.len() == want => Ok(values),
                Ok(values) => Err(LoadError::LengthMismatch {
                    want,
                    got: values.len(),
                }),
                Err(err) => Err(LoadError::BatchFetch(Arc::from(err))),
            };

            if outcome.is_err() {
                failed_keys = mem::take(&mut fetch.canon);
            }

            // Signal every other waiting future; each extracts its own value
            // when it is next polled. This future takes its result directly
            // below, so its own waker is skipped.
            mem::take(&mut fetch.wakers).wake_all_except(waker.as_ref());

            *state = State::Done(outcome);
        }

        let output = match &*state {
            State::Done(Ok(values)) => match values.get(index) {
                Some(value) => Ok(value.clone()),
                None => {
                    drop(state);
                    panic!("no value associated with batch slot {}", index);
                }
            },
            State::Done(Err(err)) => Err(err.clone()),
            State::Accumulating(_) | State::Fetching(_) => {
                unreachable!("LoadFuture settled in a non-terminal state")
            }
        };

        drop(state);
        waker.take();
        *shared = None;
        if !failed_keys.is_empty() {
            evict_failed(&handle, &failed_keys);
        }
        Poll::Ready(output)
    }
}

impl Drop for LoadFuture {
    fn drop(&mut self) {
        // The shared batch is only ever driven by a single task, so a
        // dropped future must hand the driver role to another waiter. The
        // key itself stays in the batch: cancellation is not supported, a
        // submitted load always runs to completion.
        if let FutureInner::Attached {
            shared: Some(shared),
            waker,
            ..
        } = &mut self.inner
        {
            if let Some(token) = waker.take() {
                if let Ok(mut state) = shared.state.lock() {
                    match &mut *state {
                        State::Accumulating(acc) => acc.wakers.forget_and_wake_next(token),
                        State::Fetching(fetch) => fetch.wakers.forget_and_wake_next(token),
                        State::Done(_) => {}
                    }
                }
            }
        }
    }
}
