use std::{fs, io, path::Path};

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::{error::ServiceError, labels::NUM_CLASSES};

/// Free-form per-class records read from `plant_disease.json`.
#[derive(Debug, Clone, Default)]
pub struct DiseaseCatalog {
    records: Vec<Value>,
}

impl DiseaseCatalog {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }

    /// Loads the catalog, falling back to an empty one when the file is
    /// missing or malformed.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => {
                info!(path = %path.display(), records = catalog.len(), "loaded disease catalog");
                catalog
            }
            Err(ServiceError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "disease catalog not found, using empty records");
                Self::default()
            }
            Err(err) => {
                error!(path = %path.display(), %err, "failed to load disease catalog, using empty records");
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let raw = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::Other(format!("invalid disease catalog: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ServiceError> {
        match value {
            Value::Array(records) => Ok(Self::new(records)),
            Value::Object(map) => Self::from_indexed_map(map),
            _ => Err(ServiceError::Other(
                "disease catalog must be a JSON array or an object keyed by class index".into(),
            )),
        }
    }

    // {"0": {...}, "3": {...}} -> dense vector, holes filled with {}
    fn from_indexed_map(map: Map<String, Value>) -> Result<Self, ServiceError> {
        let mut indexed = Vec::with_capacity(map.len());
        for (key, record) in map {
            let idx = key
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|idx| *idx < NUM_CLASSES)
                .ok_or_else(|| {
                    ServiceError::Other(format!(
                        "disease catalog key '{key}' is not a class index"
                    ))
                })?;
            indexed.push((idx, record));
        }

        let len = indexed.iter().map(|(idx, _)| idx + 1).max().unwrap_or(0);
        let mut records = vec![Value::Object(Map::new()); len];
        for (idx, record) in indexed {
            records[idx] = record;
        }
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record for `index`, or `{}` past the end of the table.
    pub fn record(&self, index: usize) -> Value {
        self.records
            .get(index)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}
