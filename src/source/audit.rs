//! Post-extraction data checks and the audit report
//!
//! Checks annotate raw records with `warnings`; they never change migrated
//! data. The report summarizes each collection with its warning count, and
//! the workbook lists every record, one worksheet per collection.

use crate::error::Result;
use crate::graph::schema::source;
use crate::graph::RawGraph;
use crate::record::Record;
use regex::Regex;
use rust_xlsxwriter::{Workbook, Worksheet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// Whether a name can be used as an environment variable name
pub fn is_valid_env_var_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Annotate records with audit warnings
pub fn check(graph: &mut RawGraph) {
    info!("Start checking data");

    check_collection(graph, source::AGENT_POOLS, |pool| {
        let mut warnings = Vec::new();
        if pool.get("attributes.agent-count").and_then(|v| v.as_u64()) == Some(0) {
            warnings.push("No agents");
        }
        warnings
    });

    check_collection(graph, source::MODULES, |module| {
        let mut warnings = Vec::new();
        if module.get_str("attributes.status") != Some("setup_complete") {
            warnings.push("Setup incomplete");
        }
        warnings
    });

    // Older Terraform Enterprise versions only supported Sentinel policies
    check_collection(graph, source::POLICIES, |policy| {
        let mut warnings = Vec::new();
        match policy.get_str("attributes.kind") {
            None | Some("") | Some("sentinel") => warnings.push("Sentinel policy"),
            _ => {}
        }
        warnings
    });

    check_collection(graph, source::WORKSPACES, |workspace| {
        let mut warnings = Vec::new();
        if workspace.get("attributes.resource-count").and_then(|v| v.as_u64()) == Some(0) {
            warnings.push("No resources");
        }
        if !workspace.has("attributes.vcs-repo.service-provider") {
            warnings.push("No VCS configuration");
        }
        warnings
    });

    for collection in [source::WORKSPACE_VARIABLES, source::VARIABLE_SET_VARIABLES] {
        check_collection(graph, collection, |variable| {
            let mut warnings = Vec::new();
            if !is_valid_env_var_name(variable.get_str("attributes.key").unwrap_or_default()) {
                warnings.push("Key is an invalid env var name");
            }
            warnings
        });
    }

    info!("Stop checking data");
}

fn check_collection<F>(graph: &mut RawGraph, collection: &str, rule: F)
where
    F: Fn(&Record) -> Vec<&'static str>,
{
    if !graph.contains(collection) {
        return;
    }
    for record in graph.collection_mut(collection).iter_mut() {
        for warning in rule(record) {
            record.add_warning(warning);
        }
    }
}

/// Per-collection counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub collection: String,
    pub count: usize,
    pub with_warnings: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub collections: Vec<CollectionSummary>,
}

impl AuditReport {
    pub fn from_graph(graph: &RawGraph) -> Self {
        let collections = graph
            .iter()
            .map(|(name, records)| CollectionSummary {
                collection: name.to_string(),
                count: records.len(),
                with_warnings: records.iter().filter(|r| !r.warnings().is_empty()).count(),
            })
            .collect();
        Self { collections }
    }

    /// Human readable lines, one per collection
    pub fn lines(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|summary| {
                let title = title_case(&summary.collection);
                if summary.with_warnings > 0 {
                    format!(
                        "{title}: {} (including {} with warnings)",
                        summary.count, summary.with_warnings
                    )
                } else {
                    format!("{title}: {}", summary.count)
                }
            })
            .collect()
    }
}

// =============================================================================
// Workbook
// =============================================================================

/// Worksheet names are capped by the file format
const MAX_SHEET_NAME: usize = 31;

/// Write every record of the raw graph to an xlsx workbook
///
/// Each collection gets a worksheet titled like the report lines. Nested
/// attributes are flattened to dotted column headers, sorted, and each record
/// takes one row.
pub fn save_workbook(graph: &RawGraph, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut workbook = Workbook::new();
    for (collection, records) in graph.iter() {
        let name: String = title_case(collection).chars().take(MAX_SHEET_NAME).collect();
        let worksheet = workbook.add_worksheet().set_name(name)?;
        write_records(worksheet, records)?;
    }
    workbook.save(path)?;
    info!(path = %path.display(), "Saved audit workbook");
    Ok(())
}

fn write_records(worksheet: &mut Worksheet, records: &[Record]) -> Result<()> {
    let rows: Vec<BTreeMap<String, &Value>> =
        records.iter().map(|record| flatten(record.as_map())).collect();
    let columns: BTreeSet<&str> =
        rows.iter().flat_map(|row| row.keys().map(String::as_str)).collect();

    for (column, key) in (0u16..).zip(&columns) {
        worksheet.write_string(0, column, *key)?;
        for (row, values) in (1u32..).zip(&rows) {
            let Some(value) = values.get(*key) else { continue };
            match value {
                Value::Null => {}
                Value::Bool(flag) => {
                    worksheet.write_boolean(row, column, *flag)?;
                }
                Value::Number(number) => match number.as_f64() {
                    Some(number) => {
                        worksheet.write_number(row, column, number)?;
                    }
                    None => {
                        worksheet.write_string(row, column, number.to_string())?;
                    }
                },
                other => {
                    worksheet.write_string(row, column, cell_text(other))?;
                }
            }
        }
    }
    Ok(())
}

/// Nested objects become dotted keys; arrays stay whole
fn flatten(map: &Map<String, Value>) -> BTreeMap<String, &Value> {
    fn walk<'a>(prefix: &str, map: &'a Map<String, Value>, out: &mut BTreeMap<String, &'a Value>) {
        for (key, value) in map {
            let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
            match value {
                Value::Object(inner) if !inner.is_empty() => walk(&path, inner, out),
                _ => {
                    out.insert(path, value);
                }
            }
        }
    }

    let mut out = BTreeMap::new();
    walk("", map, &mut out);
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

fn title_case(collection: &str) -> String {
    collection
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
