//! Baseline dataset loading.
//!
//! Interface definitions are flattened into rows by an external tool; the
//! harness only consumes the flattened form through [`BaselineLoader`].

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::session::{BaselineSnapshot, InterfaceValue};
use crate::{AppError, Result};

/// Source of the baseline dataset.
pub trait BaselineLoader: Send + Sync {
    /// Load every row under `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Loader` when the directory itself is unusable.
    /// Problems with individual files are reported as snapshot warnings.
    fn load_baseline(&self, dir: &Path) -> Result<BaselineSnapshot>;
}

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    rows: Vec<DefinitionRow>,
}

#[derive(Debug, Deserialize)]
struct DefinitionRow {
    name: String,
    #[serde(rename = "type", default = "default_type")]
    value_type: String,
    #[serde(default)]
    value: String,
}

fn default_type() -> String {
    "string".into()
}

/// Loads `*.json` definition files, one module per file.
///
/// Each file holds `{"file": "<module>", "rows": [{"name", "type", "value"}]}`.
/// When `file` is omitted the file stem is used as the module name.
#[derive(Debug, Clone, Default)]
pub struct JsonBaselineLoader;

impl BaselineLoader for JsonBaselineLoader {
    fn load_baseline(&self, dir: &Path) -> Result<BaselineSnapshot> {
        if !dir.is_dir() {
            return Err(AppError::Loader(format!(
                "interface directory not found: {}",
                dir.display()
            )));
        }

        let pattern = dir.join("*.json");
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|err| AppError::Loader(format!("bad interface pattern: {err}")))?;

        let mut snapshot = BaselineSnapshot::default();
        let mut seen_modules = HashSet::new();

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    snapshot.warnings.push(format!("unreadable entry: {err}"));
                    continue;
                }
            };

            let parsed = fs::read_to_string(&path)
                .map_err(|err| err.to_string())
                .and_then(|raw| {
                    serde_json::from_str::<DefinitionFile>(&raw).map_err(|err| err.to_string())
                });
            let definition = match parsed {
                Ok(definition) => definition,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping interface file");
                    snapshot
                        .warnings
                        .push(format!("{}: {err}", path.display()));
                    continue;
                }
            };

            let module = definition.file.unwrap_or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            debug!(module, rows = definition.rows.len(), "interface file loaded");

            if seen_modules.insert(module.clone()) {
                snapshot.modules.push(module.clone());
            }
            snapshot.rows.extend(definition.rows.into_iter().map(|row| {
                InterfaceValue::new(module.clone(), row.name, row.value_type, row.value)
            }));
        }

        info!(
            dir = %dir.display(),
            rows = snapshot.rows.len(),
            modules = snapshot.modules.len(),
            warnings = snapshot.warnings.len(),
            "baseline loaded"
        );
        Ok(snapshot)
    }
}
