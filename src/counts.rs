//! Word-frequency map that remembers first-insertion order.
//!
//! Order matters for the on-disk JSON and for breaking ties in
//! [`WordCounts::most_common`].

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct WordCounts {
    order: Vec<String>,
    counts: HashMap<String, u64>,
}

impl WordCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, word: &str) -> Option<u64> {
        self.counts.get(word).copied()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.counts.contains_key(word)
    }

    /// Adds `n` to `word`, appending it to the order if unseen.
    pub fn add(&mut self, word: &str, n: u64) {
        match self.counts.get_mut(word) {
            Some(count) => *count += n,
            None => {
                self.order.push(word.to_string());
                self.counts.insert(word.to_string(), n);
            }
        }
    }

    /// Key-wise sum of `other` into `self`.
    pub fn merge(&mut self, other: &WordCounts) {
        for (word, n) in other.iter() {
            self.add(word, n);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.order
            .iter()
            .map(|word| (word.as_str(), self.counts.get(word).copied().unwrap_or(0)))
    }

    /// The `n` highest counts; equal counts keep insertion order.
    pub fn most_common(&self, n: usize) -> WordCounts {
        let mut entries: Vec<(&str, u64)> = self.iter().collect();
        // sort_by is stable
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.into_iter().take(n).map(|(w, c)| (w.to_string(), c)).collect()
    }
}

impl PartialEq for WordCounts {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
    }
}

impl Eq for WordCounts {}

impl FromIterator<(String, u64)> for WordCounts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut counts = WordCounts::new();
        for (word, n) in iter {
            counts.add(&word, n);
        }
        counts
    }
}

impl Serialize for WordCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (word, n) in self.iter() {
            map.serialize_entry(word, &n)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WordCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = WordCounts;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of word to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<WordCounts, A::Error> {
                let mut counts = WordCounts::new();
                while let Some((word, n)) = access.next_entry::<String, u64>()? {
                    counts.add(&word, n);
                }
                Ok(counts)
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}
