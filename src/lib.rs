//! Sectionloader batches and caches the data fetches made by independently
//! rendered page sections, in the manner of the
//! [dataloader pattern](https://github.com/graphql/dataloader) originally
//! created by Facebook. Many sections rendered concurrently in one
//! server-side pass each need a slice of data keyed by a subset of their own
//! properties; naively each would issue its own fetch. Sectionloader
//! collects every fetch issued before the scheduler yields into a single
//! batched call, deduplicates identical keys, and memoizes settled results
//! in a bounded per-loader cache.
//!
//! ## Overview
//!
//! A data source is described by a [`Loader`]: the pairing of a batch fetch
//! function with the list of property names that form its key. The batch
//! function takes every forward-key collected in one batching window, in
//! submission order, and must resolve to exactly one result per key, index
//! for index:
//!
//! ```
//! use sectionloader::{props, BoxError, Loader, Props};
//!
//! let display_names = Loader::new(["user_id"], |keys: Vec<Props>| async move {
//!     // one backend call, however many sections asked
//!     let names: Vec<Props> = keys
//!         .iter()
//!         .map(|key| props! { "display_name": format!("user-{}", key["user_id"]) })
//!         .collect();
//!     Ok::<_, BoxError>(names)
//! });
//! ```
//!
//! A [`Registry`] hands out the singleton batching cache for each loader
//! definition. The registry keys by definition *identity*, not contents:
//! create one `Loader` per logical data source, once, and logically distinct
//! loaders can never share a cache. A [`Section`] binds a registry, a
//! loader, and a plain component into a render function that performs the
//! whole filter/load/merge sequence:
//!
//! ```
//! use std::sync::Arc;
//! use futures::executor::block_on;
//! use futures::future::join_all;
//! use sectionloader::{props, BoxError, Loader, Props, Registry, Section};
//!
//! let display_names = Arc::new(Loader::new(["user_id"], |keys: Vec<Props>| async move {
//!     let names: Vec<Props> = keys
//!         .iter()
//!         .map(|key| props! { "display_name": format!("user-{}", key["user_id"]) })
//!         .collect();
//!     Ok::<_, BoxError>(names)
//! }));
//!
//! let registry = Arc::new(Registry::new());
//! let profile = Section::new(registry, display_names, |props: Props| {
//!     format!("<h1>{}</h1>", props["display_name"].as_str().unwrap())
//! });
//!
//! // Rendered concurrently: both fetches coalesce into one batch call.
//! let pages = block_on(join_all(vec![
//!     profile.render(props! { "user_id": 1, "theme": "dark" }),
//!     profile.render(props! { "user_id": 2, "theme": "light" }),
//! ]));
//!
//! assert_eq!(pages[0].as_deref().unwrap(), "<h1>user-1</h1>");
//! assert_eq!(pages[1].as_deref().unwrap(), "<h1>user-2</h1>");
//! ```
//!
//! Each section's component receives its full property bag overlaid with
//! whatever the loader provided, the loader winning on key collisions. The
//! loader itself only ever sees the allow-listed subset, so sections stay
//! isolated from each other's properties.
//!
//! ## Design notes
//!
//! ### Canonical keys
//!
//! Two forward-keys that serialize identically are the same request: they
//! share one slot in the dispatched batch and one entry in the cache.
//! [`Props`] uses a sorted map, so the canonical form does not depend on the
//! order properties were inserted in. Serialization happens once, at
//! [`load`], and a key that cannot be serialized fails only its own request.
//!
//! ### The batching window
//!
//! All loads issued before the cooperative scheduler yields are collected
//! into one batch. With no microtask queue to lean on, the accumulating
//! batch instead dispatches when a poll observes that no new keys have
//! arrived since the previous poll; until then every pending poll requests
//! an immediate re-poll. Under a round-robin executor this closes the window
//! exactly after every already-scheduled task has had its chance to add a
//! key.
//!
//! ### Caching failures
//!
//! A batch that fails (the fetch function errored, or returned the wrong
//! number of results) rejects every request pending in it with the same
//! error, and its keys are evicted from the cache immediately. Memoizing a
//! transient backend failure for the lifetime of an LRU entry would turn one
//! hiccup into a long-lived outage; the next request simply fetches again.
//! Settled successes stay cached until evicted by capacity, [`evict`], or
//! [`clear`].
//!
//! ### Poll-driven design
//!
//! In keeping with Rust's polling async model, all of the asynchronous work
//! is driven by polling [`LoadFuture`]; the batch function is never spawned
//! onto a runtime. Only a single future needs to drive the shared batch
//! forward, so the batch tracks one driving task and notifies the rest only
//! when the result is available, or when the driver is dropped and another
//! future must take over. Dropping a pending future never cancels anything:
//! a submitted key always runs to completion with its batch.
//!
//! [`load`]: Batcher::load
//! [`evict`]: Batcher::evict
//! [`clear`]: Batcher::clear

mod batch;
mod error;
mod loader;
mod props;
mod registry;
mod section;
mod wakerset;

pub use batch::{Batcher, LoadFuture};
pub use error::{BoxError, LoadError};
pub use loader::{Loader, LoaderId, DEFAULT_CACHE_CAPACITY};
pub use props::{canonical_key, filter_props, merge_props, Props};
pub use registry::Registry;
pub use section::{invoke, Section};

#[doc(hidden)]
pub mod __private {
    pub use serde_json::{json, Value};
}
