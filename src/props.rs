//! Property bags, the key filter, and canonical cache keys.
//!
//! Every section carries a string-keyed bag of JSON values. A loader only
//! ever sees the subset of that bag named by its allow-list (the
//! "forward props"), and two forward-key bags that serialize identically are
//! the same request as far as batching and caching are concerned.

use std::sync::Arc;

use serde_json::Value;

use crate::error::LoadError;

/// A string-keyed bag of JSON values.
///
/// This is `serde_json`'s map type with its default (sorted) backing store,
/// which makes [`canonical_key`] independent of the order properties were
/// inserted in: `{a, b}` and `{b, a}` serialize to the same string, so they
/// deduplicate against each other.
pub type Props = serde_json::Map<String, Value>;

/// Build a [`Props`] bag with JSON object syntax:
///
/// ```
/// use sectionloader::{props, Props};
///
/// let bag: Props = props! { "user_id": 7, "theme": "dark" };
/// assert_eq!(bag["user_id"], 7);
/// ```
#[macro_export]
macro_rules! props {
    ($($body:tt)*) => {
        match $crate::__private::json!({ $($body)* }) {
            $crate::__private::Value::Object(map) => map,
            _ => unreachable!(),
        }
    };
}

/// Extract the subset of `full` named by `allow`, cloning values. Names
/// absent from `full` are skipped; this is not an error.
pub fn filter_props<S: AsRef<str>>(full: &Props, allow: &[S]) -> Props {
    allow
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            full.get(name).map(|value| (name.to_owned(), value.clone()))
        })
        .collect()
}

/// Overlay `overlay` onto `base`. On a key collision the overlay value wins,
/// so loader-provided properties shadow the section's own.
pub fn merge_props(mut base: Props, overlay: Props) -> Props {
    for (name, value) in overlay {
        base.insert(name, value);
    }
    base
}

/// Serialize a forward-key bag to its canonical string form, used for
/// deduplication and as the cache key.
pub fn canonical_key(props: &Props) -> Result<String, LoadError> {
    serde_json::to_string(props).map_err(|err| LoadError::Serialization(Arc::new(err)))
}
