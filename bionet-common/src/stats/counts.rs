//! Keyed count maps with a defined merge
//!
//! Merging is a union of keys with summed values. A key missing from one
//! side counts as zero, never as missing data. Both maps are ordered so a
//! serialized summary is byte-stable for the same input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts per key (species name, usually)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountMap(BTreeMap<String, u64>);

impl CountMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation of `key`
    pub fn increment(&mut self, key: &str) {
        self.add(key, 1);
    }

    /// Add `count` observations of `key`
    pub fn add(&mut self, key: &str, count: u64) {
        if let Some(existing) = self.0.get_mut(key) {
            *existing += count;
        } else {
            self.0.insert(key.to_string(), count);
        }
    }

    /// Union-and-sum `other` into `self`
    pub fn merge(&mut self, other: &CountMap) {
        for (key, &count) in &other.0 {
            self.add(key, count);
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.values().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for CountMap {
    fn from_iter<T: IntoIterator<Item = (K, u64)>>(iter: T) -> Self {
        let mut map = CountMap::new();
        for (key, count) in iter {
            let key: String = key.into();
            map.add(&key, count);
        }
        map
    }
}

/// Counts per outer key per inner key (location → species → count)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestedCountMap(BTreeMap<String, CountMap>);

impl NestedCountMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation of `inner` at `outer`
    pub fn increment(&mut self, outer: &str, inner: &str) {
        self.entry(outer).increment(inner);
    }

    /// Add `count` observations of `inner` at `outer`
    pub fn add(&mut self, outer: &str, inner: &str, count: u64) {
        self.entry(outer).add(inner, count);
    }

    /// Union-and-sum at both levels
    pub fn merge(&mut self, other: &NestedCountMap) {
        for (outer, counts) in &other.0 {
            self.entry(outer).merge(counts);
        }
    }

    pub fn get(&self, outer: &str) -> Option<&CountMap> {
        self.0.get(outer)
    }

    /// Sum over every inner count
    pub fn total(&self) -> u64 {
        self.0.values().map(CountMap::total).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CountMap)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn entry(&mut self, outer: &str) -> &mut CountMap {
        self.0.entry(outer.to_string()).or_default()
    }
}
