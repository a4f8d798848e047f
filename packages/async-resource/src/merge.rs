//! Shallow merge for SUCCESS actions that carry the merge directive.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use serde_json::Value;

/// Combine a partial payload into the previous value.
///
/// The merge is shallow: top-level entries of `patch` overwrite entries of
/// `self`, and nothing below the top level is merged.
pub trait Merge: Sized {
    fn merge(self, patch: Self) -> Self;
}

/// Objects merge key by key. Any other combination is replaced by `patch`.
impl Merge for Value {
    fn merge(self, patch: Self) -> Self {
        match (self, patch) {
            (Value::Object(mut base), Value::Object(patch)) => {
                base.extend(patch);
                Value::Object(base)
            }
            (_, patch) => patch,
        }
    }
}

impl<K: Ord, V> Merge for BTreeMap<K, V> {
    fn merge(mut self, patch: Self) -> Self {
        self.extend(patch);
        self
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> Merge for HashMap<K, V, S> {
    fn merge(mut self, patch: Self) -> Self {
        self.extend(patch);
        self
    }
}
