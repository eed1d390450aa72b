use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::bundle::ImportBundle;
use super::importer::Problem;
use super::registry::Registry;
use super::ImportOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Rows created per entity type. Empty unless imported data was requested.
    pub data: BTreeMap<String, Vec<Value>>,
    pub original_data: Map<String, Value>,
    pub problems: Vec<Problem>,
}

/// Assemble the caller-visible result of a committed import.
pub fn build_report(registry: &Registry, bundle: &ImportBundle, options: &ImportOptions) -> ImportReport {
    let data: BTreeMap<String, Vec<Value>> = if options.return_imported_data {
        registry
            .iter()
            .map(|importer| {
                (
                    importer.data_key_to_import().to_string(),
                    importer.imported_data_to_return().to_vec(),
                )
            })
            .collect()
    } else {
        BTreeMap::new()
    };

    ImportReport {
        data,
        original_data: bundle.data.clone(),
        problems: registry.problems(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    bundle_path: String,
    #[serde(flatten)]
    report: &'a ImportReport,
}

pub fn write_import_report(
    reports_dir: &Path,
    bundle_path: &Path,
    report: &ImportReport,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let path = reports_dir.join(now.format("import-%Y%m%d-%H%M%S.json").to_string());
    let payload = ImportReportFile {
        generated_at: now.to_rfc3339(),
        bundle_path: bundle_path.display().to_string(),
        report,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    Ok(path)
}
