use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::table_order::EntityType;

#[derive(Debug, Error)]
pub enum ImportBundleError {
    #[error("failed to read bundle {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse bundle: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bundle must be a json object")]
    NotAnObject,
    #[error("export wrapper `db` contains no bundle")]
    EmptyExport,
    #[error("data.{entity} must be an array of rows, found {found}")]
    InvalidRows {
        entity: EntityType,
        found: &'static str,
    },
}

/// Raw export payload. `meta` stays untyped until the envelope validator has
/// looked at it so that a malformed header is reported as such.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ImportBundle {
    pub fn from_value(value: Value) -> Result<Self, ImportBundleError> {
        let Value::Object(mut root) = value else {
            return Err(ImportBundleError::NotAnObject);
        };

        // Full exports wrap the envelope as {"db": [{meta, data}]}.
        if !root.contains_key("meta") && !root.contains_key("data") {
            if let Some(Value::Array(entries)) = root.remove("db") {
                let first = entries
                    .into_iter()
                    .next()
                    .ok_or(ImportBundleError::EmptyExport)?;
                return Self::from_value(first);
            }
        }

        Ok(serde_json::from_value(Value::Object(root))?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ImportBundleError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImportBundleError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ImportBundleError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn version(&self) -> Option<&Value> {
        self.meta.as_ref().and_then(|meta| meta.get("version"))
    }

    /// Rows for one entity type, in bundle order. Absent keys yield no rows.
    pub fn rows(&self, entity: EntityType) -> Result<Vec<Value>, ImportBundleError> {
        match self.data.get(entity.as_str()) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(other) => Err(ImportBundleError::InvalidRows {
                entity,
                found: json_kind(other),
            }),
        }
    }

    /// `data` keys that no importer consumes.
    pub fn unknown_data_keys(&self) -> impl Iterator<Item = &str> {
        self.data
            .keys()
            .map(String::as_str)
            .filter(|key| key.parse::<EntityType>().is_err())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
