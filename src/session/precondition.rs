//! Scripted batches of value edits.
//!
//! A precondition script is a JSON array of
//! `{"file": ..., "name": ..., "type": ..., "value": ...}` objects. Playing a
//! script applies each step to the overlay and sends it to the client.
//! Element-per-step XML scripts are recognised and refused with a pointer to
//! the JSON shape.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::model::InterfaceValue;
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
struct Step {
    file: String,
    name: String,
    #[serde(rename = "type")]
    value_type: String,
    value: String,
}

/// A loaded precondition script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreconditionScript {
    /// Where the script was read from.
    pub path: PathBuf,
    /// Steps in file order.
    pub steps: Vec<InterfaceValue>,
}

impl PreconditionScript {
    /// Read and parse a script file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Loader` if the file is unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Loader(format!("cannot read precondition {}: {err}", path.display()))
        })?;
        Self::from_json_str(path, &raw)
    }

    /// Parse a script from text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Loader` if the JSON does not match the script shape.
    pub fn from_json_str(path: impl Into<PathBuf>, raw: &str) -> Result<Self> {
        let path = path.into();
        if raw.trim_start().starts_with('<') {
            return Err(AppError::Loader(format!(
                "precondition {} is XML; expected a JSON array of \
                 {{\"file\", \"name\", \"type\", \"value\"}} objects",
                path.display()
            )));
        }
        let steps: Vec<Step> = serde_json::from_str(raw).map_err(|err| {
            AppError::Loader(format!("invalid precondition {}: {err}", path.display()))
        })?;
        Ok(Self {
            path,
            steps: steps
                .into_iter()
                .map(|step| InterfaceValue::new(step.file, step.name, step.value_type, step.value))
                .collect(),
        })
    }

    /// Resolve `name` against `dir` unless it is already a path to a file.
    /// A missing `.json` extension is added.
    #[must_use]
    pub fn resolve(dir: &Path, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.is_absolute() || candidate.exists() {
            return candidate.to_path_buf();
        }
        let mut path = dir.join(candidate);
        if path.extension().is_none() {
            path.set_extension("json");
        }
        path
    }

    /// Script files available in `dir`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Loader` if the directory cannot be listed.
    pub fn list(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|err| {
            AppError::Loader(format!("cannot list preconditions in {}: {err}", dir.display()))
        })?;
        let mut scripts: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        scripts.sort();
        Ok(scripts)
    }
}
