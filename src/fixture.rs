use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::{Error, Result};

/// Named, read-only JSON payloads. Loaded once (from a directory of
/// `*.json` files, or registered in-memory) and shared by any number of
/// intercept rules afterwards.
#[derive(Debug, Default)]
pub struct FixtureStore {
    entries: HashMap<String, Value>,
}

impl FixtureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    /// Loads every `*.json` file in `dir`, keyed by file stem. Returns the
    /// number of fixtures loaded.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|err| Error::Io(format!("{}: {err}", dir.display())))?;
        let mut loaded = 0usize;
        for entry in entries {
            let entry = entry.map_err(|err| Error::Io(format!("{}: {err}", dir.display())))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)
                .map_err(|err| Error::Io(format!("{}: {err}", path.display())))?;
            let value: Value = serde_json::from_str(&raw).map_err(|err| Error::Fixture {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
            self.entries.insert(name.to_string(), value);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.entries.get(name).ok_or_else(|| Error::Fixture {
            name: name.to_string(),
            reason: "not loaded".into(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
