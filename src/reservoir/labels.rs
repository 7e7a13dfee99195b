use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DoserLabel {
    pub id: u32,
    pub label: String,
}

/// Nutrient label per doser id, iterated in id order.
///
/// Serialized as a list of `{ id, label }` entries since TOML tables cannot
/// have integer keys.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(from = "Vec<DoserLabel>", into = "Vec<DoserLabel>")]
pub struct DoserLabels(BTreeMap<u32, String>);

impl DoserLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.0.get(&id).map(String::as_str)
    }

    /// Label for display, falling back to `Doser <id>`.
    pub fn display_name(&self, id: u32) -> String {
        self.get(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Doser {}", id))
    }

    pub fn set(&mut self, id: u32, label: impl Into<String>) -> Option<String> {
        self.0.insert(id, label.into())
    }

    pub fn remove(&mut self, id: u32) -> Option<String> {
        self.0.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.0.iter().map(|(id, label)| (*id, label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<DoserLabel>> for DoserLabels {
    fn from(entries: Vec<DoserLabel>) -> Self {
        Self(entries.into_iter().map(|e| (e.id, e.label)).collect())
    }
}

impl From<DoserLabels> for Vec<DoserLabel> {
    fn from(labels: DoserLabels) -> Self {
        labels
            .0
            .into_iter()
            .map(|(id, label)| DoserLabel { id, label })
            .collect()
    }
}

impl FromIterator<(u32, String)> for DoserLabels {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
