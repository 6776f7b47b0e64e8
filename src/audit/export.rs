use rusqlite::Connection;
use serde::Serialize;

use super::DecisionRecord;
use crate::error::Result;

#[derive(Debug, Serialize)]
struct ExportEntry {
    id: i64,
    timestamp: String,
    tenant_id: String,
    correlation_id: String,
    checkpoint: String,
    policy_name: String,
    verdict: String,
    reason: String,
    details: String,
}

impl From<&DecisionRecord> for ExportEntry {
    fn from(record: &DecisionRecord) -> Self {
        ExportEntry {
            id: record.id.unwrap_or(0),
            timestamp: record.timestamp.clone(),
            tenant_id: record.tenant_id.clone(),
            correlation_id: record.correlation_id.clone(),
            checkpoint: record.checkpoint.clone(),
            policy_name: record.policy_name.clone(),
            verdict: record.verdict.clone(),
            reason: record.reason.clone(),
            details: record.details.clone(),
        }
    }
}

/// Export all decision records as a JSON string.
pub fn export_json(conn: &Connection) -> Result<String> {
    let records = super::query_recent(conn, usize::MAX)?;
    let entries: Vec<ExportEntry> = records.iter().map(ExportEntry::from).collect();
    let json = serde_json::to_string_pretty(&entries)?;
    Ok(json)
}

/// Export all decision records as a CSV string.
pub fn export_csv(conn: &Connection) -> Result<String> {
    let records = super::query_recent(conn, usize::MAX)?;
    let mut output = String::from(
        "id,timestamp,tenant_id,correlation_id,checkpoint,policy_name,verdict,reason,details\n",
    );
    for record in &records {
        output.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            record.id.unwrap_or(0),
            record.timestamp,
            record.tenant_id,
            record.correlation_id,
            record.checkpoint,
            record.policy_name,
            record.verdict,
            record.reason,
            record.details.replace(',', ";"),
        ));
    }
    Ok(output)
}
