use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCount {
    pub label: String,
    pub count: u64,
}

impl TypeCount {
    pub fn new(label: impl Into<String>, count: u64) -> Self {
        Self {
            label: label.into(),
            count,
        }
    }
}

/// Ordered label -> count mapping.
///
/// Entry order is part of the value: it is fixed when the distribution is
/// aggregated and carried unchanged through storage, JSON and rendering.
/// JSON encodes it as an object whose keys appear in entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDistribution {
    entries: Vec<TypeCount>,
}

impl TypeDistribution {
    pub fn from_entries(entries: Vec<TypeCount>) -> Result<Self, &'static str> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.count == 0 {
                return Err("distribution counts must be positive");
            }
            if !seen.insert(entry.label.as_str()) {
                return Err("distribution labels must be unique");
            }
        }
        Ok(Self { entries })
    }

    /// Count `labels`, ordered by descending count; equal counts keep the
    /// order in which their label first appeared.
    pub fn tally<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let mut slots: HashMap<&str, usize> = HashMap::new();
        let mut entries: Vec<TypeCount> = Vec::new();
        for label in labels {
            match slots.get(label) {
                Some(&slot) => entries[slot].count += 1,
                None => {
                    slots.insert(label, entries.len());
                    entries.push(TypeCount::new(label, 1));
                }
            }
        }
        // Stable sort.
        entries.sort_by(|a, b| b.count.cmp(&a.count));
        Self { entries }
    }

    pub fn entries(&self) -> &[TypeCount] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|e| (e.label.as_str(), e.count))
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }
}

impl Serialize for TypeDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.label, &entry.count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TypeDistribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DistributionVisitor)
    }
}

struct DistributionVisitor;

impl<'de> Visitor<'de> for DistributionVisitor {
    type Value = TypeDistribution;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object of label -> count or a list of {label, count}")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((label, count)) = access.next_entry::<String, u64>()? {
            entries.push(TypeCount { label, count });
        }
        TypeDistribution::from_entries(entries).map_err(serde::de::Error::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(entry) = access.next_element::<TypeCount>()? {
            entries.push(entry);
        }
        TypeDistribution::from_entries(entries).map_err(serde::de::Error::custom)
    }
}
