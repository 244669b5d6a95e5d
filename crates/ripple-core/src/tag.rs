//! Write-once tagging shared by events and actions.
//!
//! A [`TagStore`] maps `namespace -> name -> value`. Each `(namespace, name)`
//! pair can be set once; a second attempt fails with
//! [`CoreError::DuplicateTag`]. Tags are how independent components leave marks
//! on an event while it travels through dispatch, without coordinating with each
//! other.
//!
//! ```rust,ignore
//! event.tag("auth", "checked", None)?;
//! event.tag("auth", "level", Some(json!(100)))?;
//!
//! assert!(event.check_tag("auth", "checked", None));
//! assert!(event.check_tag("auth", "level", Some(&json!(100))));
//! ```

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

type Namespace = HashMap<String, Option<Value>>;

/// Interior-mutable, write-once tag storage.
///
/// The map is allocated lazily on the first write since most events are never
/// tagged.
#[derive(Debug, Default)]
pub struct TagStore {
    inner: Mutex<Option<HashMap<String, Namespace>>>,
}

impl TagStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` in `namespace`. A `None` value makes the tag a bare marker.
    pub fn set(&self, namespace: &str, name: &str, value: Option<Value>) -> CoreResult<()> {
        let mut guard = self.inner.lock();
        let space = guard
            .get_or_insert_with(HashMap::new)
            .entry(namespace.to_string())
            .or_default();
        if space.contains_key(name) {
            return Err(CoreError::duplicate_tag(namespace, name));
        }
        space.insert(name.to_string(), value);
        Ok(())
    }

    /// Checks a tag against an expected value.
    ///
    /// Returns `false` when the tag is missing. With `expected == None` the
    /// tag only matches if it was set without a value; otherwise the stored
    /// value must compare equal.
    pub fn check(&self, namespace: &str, name: &str, expected: Option<&Value>) -> bool {
        let guard = self.inner.lock();
        let Some(stored) = guard
            .as_ref()
            .and_then(|spaces| spaces.get(namespace))
            .and_then(|space| space.get(name))
        else {
            return false;
        };
        stored.as_ref() == expected
    }

    /// Returns `true` if the tag exists, whatever its value.
    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.inner
            .lock()
            .as_ref()
            .and_then(|spaces| spaces.get(namespace))
            .is_some_and(|space| space.contains_key(name))
    }

    /// Returns a copy of the value of a tag.
    ///
    /// The outer `Option` is the tag's presence, the inner one its value.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Option<Value>> {
        self.inner
            .lock()
            .as_ref()
            .and_then(|spaces| spaces.get(namespace))
            .and_then(|space| space.get(name))
            .cloned()
    }
}

/// Capability of carrying a [`TagStore`].
///
/// Implementors only expose their store; the tagging API comes for free.
pub trait Taggable {
    /// Returns the tag store composed into this object.
    fn tags(&self) -> &TagStore;

    /// Marks this object. Fails if the pair is already set.
    fn tag(&self, namespace: &str, name: &str, value: Option<Value>) -> CoreResult<()> {
        self.tags().set(namespace, name, value)
    }

    /// Checks a mark. See [`TagStore::check`].
    fn check_tag(&self, namespace: &str, name: &str, value: Option<&Value>) -> bool {
        self.tags().check(namespace, name, value)
    }

    /// Returns whether a mark is present.
    fn has_tag(&self, namespace: &str, name: &str) -> bool {
        self.tags().contains(namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_tag_rejected() {
        let store = TagStore::new();
        store.set("ns", "flag", None).unwrap();

        let err = store.set("ns", "flag", Some(json!(1))).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTag { .. }));
    }

    #[test]
    fn test_distinct_names_and_namespaces() {
        let store = TagStore::new();
        store.set("a", "x", None).unwrap();
        store.set("a", "y", None).unwrap();
        store.set("b", "x", Some(json!("v"))).unwrap();

        assert!(store.contains("a", "x"));
        assert!(store.contains("b", "x"));
        assert!(!store.contains("c", "x"));
    }

    #[test]
    fn test_check_semantics() {
        let store = TagStore::new();
        store.set("ns", "marker", None).unwrap();
        store.set("ns", "level", Some(json!(100))).unwrap();

        assert!(store.check("ns", "marker", None));
        assert!(!store.check("ns", "marker", Some(&json!(true))));

        assert!(store.check("ns", "level", Some(&json!(100))));
        assert!(!store.check("ns", "level", Some(&json!(10))));
        assert!(!store.check("ns", "level", None));

        assert!(!store.check("ns", "missing", None));
        assert!(!store.check("other", "marker", None));
    }

    #[test]
    fn test_get_distinguishes_absent_and_valueless() {
        let store = TagStore::new();
        store.set("ns", "marker", None).unwrap();

        assert_eq!(store.get("ns", "marker"), Some(None));
        assert_eq!(store.get("ns", "nope"), None);
    }
}
