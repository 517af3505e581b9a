//! Tabular and JSON outputs for inventory records.

mod summary;

pub use summary::InventorySummary;

use inventory_core::{FailureReport, ResourceKind, ResourceRecord, TagValue};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Columns every report starts with, before the tag columns.
pub const IDENTITY_COLUMNS: [&str; 13] = [
    "Profile",
    "AccountId",
    "Region",
    "ResourceType",
    "ResourceId",
    "ARN",
    "Engine",
    "EngineVersion",
    "CreationTime",
    "NodeTypes",
    "NumNodes",
    "AtRestEncryptionEnabled",
    "TransitEncryptionEnabled",
];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report is missing column {0}")]
    MissingColumn(&'static str),
    #[error("invalid {column} value {value:?} on row {row}")]
    InvalidValue { column: &'static str, value: String, row: usize },
}

pub fn columns(tags: &[String]) -> Vec<String> {
    IDENTITY_COLUMNS.iter().map(|c| c.to_string()).chain(tags.iter().cloned()).collect()
}

fn render_bool(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn row(rec: &ResourceRecord, tags: &[String]) -> Vec<String> {
    let mut out = vec![
        rec.profile.clone(),
        rec.account_id.clone(),
        rec.region.clone(),
        rec.kind.to_string(),
        rec.resource_id.clone(),
        rec.arn.clone(),
        rec.engine.clone(),
        rec.engine_version.clone(),
        rec.creation_time.clone(),
        rec.node_types_joined(),
        rec.num_nodes.to_string(),
        render_bool(rec.at_rest_encryption).to_string(),
        render_bool(rec.transit_encryption).to_string(),
    ];
    out.extend(tags.iter().map(|k| rec.tag(k).unwrap_or(&TagValue::NotFound).to_string()));
    out
}

pub fn write_csv(path: &Path, records: &[ResourceRecord], tags: &[String]) -> Result<(), ReportError> {
    let mut wtr = csv::Writer::from_writer(File::create(path)?);
    wtr.write_record(columns(tags))?;
    for rec in records {
        wtr.write_record(row(rec, tags))?;
    }
    wtr.flush()?;
    info!(path = %path.display(), rows = records.len(), "wrote CSV");
    Ok(())
}

/// Records replayed from a previously written report, plus the tag keys
/// found in its header (every column after the identity columns).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    pub tags: Vec<String>,
    pub records: Vec<ResourceRecord>,
}

pub fn read_csv(path: &Path) -> Result<Replay, ReportError> {
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();
    let mut idx = [0usize; IDENTITY_COLUMNS.len()];
    for (slot, name) in idx.iter_mut().zip(IDENTITY_COLUMNS) {
        *slot = headers.iter().position(|h| h == name).ok_or(ReportError::MissingColumn(name))?;
    }
    let identity: BTreeSet<&str> = IDENTITY_COLUMNS.into_iter().collect();
    let tag_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !identity.contains(h))
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut records = Vec::new();
    for (n, result) in rdr.records().enumerate() {
        let line = result?;
        let field = |col: usize| line.get(idx[col]).unwrap_or_default().to_string();
        let kind_text = field(3);
        let kind: ResourceKind = kind_text.parse().map_err(|_| ReportError::InvalidValue {
            column: IDENTITY_COLUMNS[3],
            value: kind_text.clone(),
            row: n + 1,
        })?;
        let nodes_text = field(10);
        let num_nodes = if nodes_text.trim().is_empty() {
            0
        } else {
            nodes_text.trim().parse().map_err(|_| ReportError::InvalidValue {
                column: IDENTITY_COLUMNS[10],
                value: nodes_text.clone(),
                row: n + 1,
            })?
        };
        let node_types = field(9).split(';').filter(|s| !s.is_empty()).map(str::to_string).collect();
        let tags = tag_cols
            .iter()
            .map(|(i, k)| (k.clone(), TagValue::from_rendered(line.get(*i).unwrap_or_default())))
            .collect();
        records.push(ResourceRecord {
            profile: field(0),
            account_id: field(1),
            region: field(2),
            kind,
            resource_id: field(4),
            arn: field(5),
            engine: field(6),
            engine_version: field(7),
            creation_time: field(8),
            node_types,
            num_nodes,
            at_rest_encryption: parse_bool(&field(11)),
            transit_encryption: parse_bool(&field(12)),
            tags,
        });
    }
    info!(path = %path.display(), rows = records.len(), "loaded sample report");
    Ok(Replay { tags: tag_cols.into_iter().map(|(_, k)| k).collect(), records })
}

fn json_row(rec: &ResourceRecord, tags: &[String]) -> Value {
    let mut obj = Map::new();
    obj.insert("Profile".into(), rec.profile.clone().into());
    obj.insert("AccountId".into(), rec.account_id.clone().into());
    obj.insert("Region".into(), rec.region.clone().into());
    obj.insert("ResourceType".into(), rec.kind.as_str().into());
    obj.insert("ResourceId".into(), rec.resource_id.clone().into());
    obj.insert("ARN".into(), rec.arn.clone().into());
    obj.insert("Engine".into(), rec.engine.clone().into());
    obj.insert("EngineVersion".into(), rec.engine_version.clone().into());
    obj.insert("CreationTime".into(), rec.creation_time.clone().into());
    obj.insert("NodeTypes".into(), rec.node_types_joined().into());
    obj.insert("NumNodes".into(), rec.num_nodes.into());
    obj.insert("AtRestEncryptionEnabled".into(), rec.at_rest_encryption.into());
    obj.insert("TransitEncryptionEnabled".into(), rec.transit_encryption.into());
    for k in tags {
        obj.insert(k.clone(), rec.tag(k).unwrap_or(&TagValue::NotFound).to_string().into());
    }
    Value::Object(obj)
}

/// One JSON object per line, keyed by column name.
pub fn write_jsonl(path: &Path, records: &[ResourceRecord], tags: &[String]) -> Result<(), ReportError> {
    let mut w = BufWriter::new(File::create(path)?);
    for rec in records {
        serde_json::to_writer(&mut w, &json_row(rec, tags))?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    info!(path = %path.display(), rows = records.len(), "wrote JSONL");
    Ok(())
}

/// Writes the failure summary only when something failed. Returns whether a
/// file was written.
pub fn write_failures(path: &Path, failures: &FailureReport) -> Result<bool, ReportError> {
    if failures.is_empty() {
        return Ok(false);
    }
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, failures)?;
    w.write_all(b"\n")?;
    w.flush()?;
    info!(path = %path.display(), profiles = failures.len(), "wrote failures summary");
    Ok(true)
}
