//! Baseline plus insertion-ordered overlay.

use std::collections::HashMap;

use super::model::{BaselineSnapshot, InterfaceId, InterfaceValue, OverlayEntry, ViewFilter};

/// Insertion-ordered map of overrides.
///
/// Re-applying an existing identity updates it in place and keeps its
/// original position, so replay order is first-edit order.
#[derive(Debug, Clone, Default)]
pub struct SessionOverlay {
    entries: Vec<(InterfaceId, OverlayEntry)>,
    index: HashMap<InterfaceId, usize>,
}

impl SessionOverlay {
    /// Insert or update one override.
    pub fn upsert(&mut self, id: InterfaceId, entry: OverlayEntry) {
        if let Some(&slot) = self.index.get(&id) {
            self.entries[slot].1 = entry;
        } else {
            self.index.insert(id.clone(), self.entries.len());
            self.entries.push((id, entry));
        }
    }

    /// Override for `id`, if any.
    #[must_use]
    pub fn get(&self, id: &InterfaceId) -> Option<&OverlayEntry> {
        self.index.get(id).map(|&slot| &self.entries[slot].1)
    }

    /// Remove every override. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.index.clear();
        removed
    }

    /// Number of overrides.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no overrides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overrides in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&InterfaceId, &OverlayEntry)> {
        self.entries.iter().map(|(id, entry)| (id, entry))
    }
}

/// Baseline dataset with the session overlay layered on top.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    baseline: Vec<InterfaceValue>,
    baseline_index: HashMap<InterfaceId, usize>,
    modules: Vec<String>,
    overlay: SessionOverlay,
}

impl SessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay value if present, else the baseline value.
    #[must_use]
    pub fn effective_value(&self, id: &InterfaceId) -> Option<&str> {
        if let Some(entry) = self.overlay.get(id) {
            return Some(entry.value.as_str());
        }
        self.baseline_value(id).map(|row| row.value.as_str())
    }

    /// Declared type of a known value: the override's if present, else the
    /// baseline row's.
    #[must_use]
    pub fn value_type(&self, id: &InterfaceId) -> Option<&str> {
        if let Some(entry) = self.overlay.get(id) {
            return Some(entry.value_type.as_str());
        }
        self.baseline_value(id).map(|row| row.value_type.as_str())
    }

    /// Upsert an override. Never touches the baseline.
    pub fn apply(&mut self, id: InterfaceId, value_type: &str, value: &str) {
        self.overlay.upsert(
            id,
            OverlayEntry {
                value_type: value_type.to_owned(),
                value: value.to_owned(),
            },
        );
    }

    /// Drop every override. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        self.overlay.clear()
    }

    /// Swap in a freshly loaded baseline. The overlay is kept.
    ///
    /// Duplicate identities keep the first row seen.
    pub fn replace_baseline(&mut self, snapshot: BaselineSnapshot) {
        let mut rows = Vec::with_capacity(snapshot.rows.len());
        let mut index = HashMap::with_capacity(snapshot.rows.len());
        for row in snapshot.rows {
            if index.contains_key(&row.id) {
                continue;
            }
            index.insert(row.id.clone(), rows.len());
            rows.push(row);
        }
        self.baseline = rows;
        self.baseline_index = index;
        self.modules = snapshot.modules;
    }

    /// Baseline rows merged with overrides, filtered. Overrides for
    /// identities the baseline does not know are appended at the end.
    #[must_use]
    pub fn effective_rows(&self, filter: &ViewFilter) -> Vec<InterfaceValue> {
        let mut rows: Vec<InterfaceValue> = self
            .baseline
            .iter()
            .filter(|row| filter.matches(&row.id))
            .map(|row| match self.overlay.get(&row.id) {
                Some(entry) => InterfaceValue {
                    id: row.id.clone(),
                    value_type: entry.value_type.clone(),
                    value: entry.value.clone(),
                },
                None => row.clone(),
            })
            .collect();

        rows.extend(
            self.overlay
                .iter()
                .filter(|(id, _)| !self.baseline_index.contains_key(*id) && filter.matches(id))
                .map(|(id, entry)| InterfaceValue {
                    id: id.clone(),
                    value_type: entry.value_type.clone(),
                    value: entry.value.clone(),
                }),
        );
        rows
    }

    /// Owned copy of the overlay in insertion order, for replay.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InterfaceValue> {
        self.overlay
            .iter()
            .map(|(id, entry)| InterfaceValue {
                id: id.clone(),
                value_type: entry.value_type.clone(),
                value: entry.value.clone(),
            })
            .collect()
    }

    /// Module names from the last baseline load.
    #[must_use]
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Number of baseline rows.
    #[must_use]
    pub fn baseline_len(&self) -> usize {
        self.baseline.len()
    }

    /// The overlay.
    #[must_use]
    pub fn overlay(&self) -> &SessionOverlay {
        &self.overlay
    }

    fn baseline_value(&self, id: &InterfaceId) -> Option<&InterfaceValue> {
        self.baseline_index.get(id).map(|&slot| &self.baseline[slot])
    }
}
