//! Label sets identifying a single KPI
//!
//! A [`LabelSet`] is an unordered mapping of label keys to label values.
//! Two label sets are the same KPI when they hold the same pairs, whatever
//! order the pairs were inserted in. Serialization always emits keys in
//! sorted order so files written from equal label sets are byte-identical.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize, Serializer};

/// Key under which a monitored resource type is recorded when label
/// namespaces are unioned.
pub const RESOURCE_TYPE_KEY: &str = "resource_type";

/// Errors produced by [`LabelSet`]
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Two label namespaces disagree on the value of the same key.
    #[error("label {key:?} has conflicting values {first:?} and {second:?}")]
    Conflict {
        /// The label key present in more than one namespace
        key: String,
        /// Value seen first
        first: String,
        /// Value seen second
        second: String,
    },
}

/// An unordered set of `key=value` labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    inner: FxHashMap<String, String>,
}

impl LabelSet {
    /// Create an empty [`LabelSet`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Union several label namespaces into one set.
    ///
    /// Resource-level labels, metric-level labels and the literal resource
    /// type all take part in a KPI's identity. The resource type, when
    /// present, is stored under [`RESOURCE_TYPE_KEY`]. A key repeated across
    /// namespaces with the same value is harmless; with different values it
    /// is an error, the caller cannot tell which one identifies the KPI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the namespaces disagree on a key.
    pub fn from_namespaces<'a, I>(namespaces: I, resource_type: Option<&str>) -> Result<Self, Error>
    where
        I: IntoIterator<Item = &'a FxHashMap<String, String>>,
    {
        let mut labels = Self::new();
        for namespace in namespaces {
            for (key, value) in namespace {
                labels.insert_unique(key, value)?;
            }
        }
        if let Some(resource_type) = resource_type {
            labels.insert_unique(RESOURCE_TYPE_KEY, resource_type)?;
        }
        Ok(labels)
    }

    fn insert_unique(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match self.inner.get(key) {
            Some(existing) if existing != value => Err(Error::Conflict {
                key: key.to_string(),
                first: existing.clone(),
                second: value.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.inner.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    /// Insert a label, returning the previous value for `key` if any.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.insert(key.into(), value.into())
    }

    /// Look up the value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether there are no labels at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Labels in key order.
    #[must_use]
    pub fn sorted(&self) -> BTreeMap<&str, &str> {
        self.inner
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Iterate over the label keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Serialize for LabelSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.sorted().serialize(serializer)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.sorted() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}
