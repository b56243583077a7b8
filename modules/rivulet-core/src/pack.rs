//! Record batches flowing between operators.

use serde_json::Value;

/// One keyed, versioned record. A deleted entry is a tombstone and its
/// value is always `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackEntry {
    pub key: String,
    pub value: Value,
    pub version: u64,
    pub deleted: bool,
    pub no_effect: bool,
}

impl PackEntry {
    pub fn active(key: impl Into<String>, value: Value, version: u64) -> Self {
        Self {
            key: key.into(),
            value,
            version,
            deleted: false,
            no_effect: false,
        }
    }

    pub fn deleted(key: impl Into<String>, version: u64) -> Self {
        Self {
            key: key.into(),
            value: Value::Null,
            version,
            deleted: true,
            no_effect: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Active and allowed to trigger side effects.
    pub fn is_effective(&self) -> bool {
        !self.deleted && !self.no_effect
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn mark_deleted(mut self) -> Self {
        self.deleted = true;
        self.value = Value::Null;
        self
    }

    /// Turns a tombstone into a present entry with a `Null` value.
    pub fn mark_active(mut self) -> Self {
        self.deleted = false;
        self
    }

    pub fn mark_no_effect(mut self) -> Self {
        self.no_effect = true;
        self
    }
}

/// Ordered batch of entries. Concatenation is the only composition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pack {
    entries: Vec<PackEntry>,
}

impl Pack {
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per event, all sharing `key` and `version`.
    pub fn from_events(
        key: &str,
        events: impl IntoIterator<Item = Value>,
        version: u64,
        no_effect: bool,
    ) -> Self {
        events
            .into_iter()
            .map(|event| {
                let entry = PackEntry::active(key, event, version);
                if no_effect {
                    entry.mark_no_effect()
                } else {
                    entry
                }
            })
            .collect()
    }

    pub fn single(entry: PackEntry) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PackEntry> {
        self.entries.iter()
    }

    pub fn push(&mut self, entry: PackEntry) {
        self.entries.push(entry);
    }

    pub fn concat(mut self, other: Pack) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn into_entries(self) -> Vec<PackEntry> {
        self.entries
    }

    pub fn first(&self) -> Option<&PackEntry> {
        self.entries.first()
    }

    /// Entries that are not tombstones.
    pub fn filter_active(&self) -> Pack {
        self.iter().filter(|e| e.is_active()).cloned().collect()
    }

    /// Values of the active entries, in order.
    pub fn active_values(&self) -> Vec<Value> {
        self.iter()
            .filter(|e| e.is_active())
            .map(|e| e.value.clone())
            .collect()
    }

    pub fn max_version(&self) -> u64 {
        self.iter().map(|e| e.version).max().unwrap_or(0)
    }

    pub fn increment_version(self) -> Self {
        self.into_iter()
            .map(|mut e| {
                e.version += 1;
                e
            })
            .collect()
    }

    pub fn map_entries(self, f: impl FnMut(PackEntry) -> PackEntry) -> Self {
        self.into_iter().map(f).collect()
    }
}

impl FromIterator<PackEntry> for Pack {
    fn from_iter<I: IntoIterator<Item = PackEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Pack {
    type Item = PackEntry;
    type IntoIter = std::vec::IntoIter<PackEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Pack {
    type Item = &'a PackEntry;
    type IntoIter = std::slice::Iter<'a, PackEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Extend<PackEntry> for Pack {
    fn extend<I: IntoIterator<Item = PackEntry>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl From<Vec<PackEntry>> for Pack {
    fn from(entries: Vec<PackEntry>) -> Self {
        Self { entries }
    }
}
