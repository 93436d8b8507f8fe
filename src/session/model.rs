//! Interface value records.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identity of an interface value: the definition file it came from plus
/// its name. Unique within the baseline and within the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId {
    /// Definition file (screen/module) the value belongs to.
    pub source_file: String,
    /// Value name within that file.
    pub name: String,
}

impl InterfaceId {
    /// Build an identity from its parts.
    #[must_use]
    pub fn new(source_file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            name: name.into(),
        }
    }
}

impl Display for InterfaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source_file, self.name)
    }
}

/// One typed interface value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceValue {
    /// Identity.
    #[serde(flatten)]
    pub id: InterfaceId,
    /// Declared type (`string`, `int`, `float`, `bool`, ...).
    #[serde(rename = "type")]
    pub value_type: String,
    /// Current value as text.
    pub value: String,
}

impl InterfaceValue {
    /// Build a value record.
    #[must_use]
    pub fn new(
        source_file: impl Into<String>,
        name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: InterfaceId::new(source_file, name),
            value_type: value_type.into(),
            value: value.into(),
        }
    }
}

/// Type and value stored in the overlay for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    /// Declared type.
    #[serde(rename = "type")]
    pub value_type: String,
    /// Overriding value.
    pub value: String,
}

/// Result of one baseline load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineSnapshot {
    /// All values, in loader order.
    pub rows: Vec<InterfaceValue>,
    /// Distinct module (source file) names, in first-seen order.
    pub modules: Vec<String>,
    /// Non-fatal problems hit while loading.
    pub warnings: Vec<String>,
}

/// Row selection used when listing effective values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    /// Only rows from this source file.
    #[serde(default)]
    pub module: Option<String>,
    /// Only rows whose name contains this text (case-insensitive).
    #[serde(default)]
    pub name_contains: Option<String>,
}

impl ViewFilter {
    /// Whether `id` passes the filter.
    #[must_use]
    pub fn matches(&self, id: &InterfaceId) -> bool {
        let module_ok = self
            .module
            .as_deref()
            .is_none_or(|module| module == id.source_file);
        let name_ok = self.name_contains.as_deref().is_none_or(|needle| {
            id.name
                .to_lowercase()
                .contains(&needle.to_lowercase())
        });
        module_ok && name_ok
    }
}
