//! SQLite-backed decision auditing.
//!
//! Every composite decision is written to a SQLite database with its
//! timestamp, tenant, correlation id, checkpoint, policy, verdict, reason,
//! and details. The database is accessed through an [`r2d2`] connection pool
//! ([`DbPool`]) for thread-safe concurrent writes from async tasks, and each
//! insert is broadcast to live subscribers via a `tokio::sync::broadcast`
//! channel.
//!
//! The [`export`] submodule provides JSON and CSV export of all records.

pub mod export;

use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{GateError, Result};
use crate::policy::Decision;

/// SQLite connection pool type alias (r2d2 + r2d2-sqlite).
pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

/// Emit the canonical audit line for a decision:
/// `[Decision][<correlation_id>][<VERDICT>][<checkpoint>] <reason>: <details>`
pub fn log_line(decision: &Decision) {
    info!(
        "[Decision][{}][{}][{}] {}: {}",
        decision.correlation_id,
        decision.verdict,
        decision.checkpoint,
        decision.reason,
        decision.details
    );
}

/// A persisted decision record in the `decisions` table.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    /// Auto-incremented row ID (`None` before insert).
    pub id: Option<i64>,
    pub timestamp: String,
    pub tenant_id: String,
    pub correlation_id: String,
    pub checkpoint: String,
    pub policy_name: String,
    pub verdict: String,
    pub reason: String,
    pub details: String,
}

impl DecisionRecord {
    pub fn from_decision(tenant_id: &str, decision: &Decision) -> Self {
        Self {
            id: None,
            timestamp: decision.timestamp.clone(),
            tenant_id: tenant_id.to_string(),
            correlation_id: decision.correlation_id.clone(),
            checkpoint: decision.checkpoint.to_string(),
            policy_name: decision.policy_name.clone(),
            verdict: decision.verdict.to_string(),
            reason: decision.reason.to_string(),
            details: decision.details.clone(),
        }
    }
}

/// A real-time decision event broadcast to subscribers.
///
/// Subscribers that lag behind automatically skip missed events.
#[derive(Debug, Clone)]
pub struct DecisionEvent {
    pub timestamp: String,
    pub tenant_id: String,
    pub correlation_id: String,
    pub checkpoint: String,
    pub verdict: String,
    pub details: String,
}

/// Handle bundling the connection pool and the live event channel.
#[derive(Clone)]
pub struct AuditLog {
    pool: DbPool,
    event_tx: broadcast::Sender<DecisionEvent>,
}

impl AuditLog {
    /// Open an audit log at the given database file path.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self::from_pool(open_pool(path)?))
    }

    /// Open an in-memory audit log (for testing).
    pub fn open_memory() -> Result<Self> {
        Ok(Self::from_pool(open_memory_pool()?))
    }

    fn from_pool(pool: DbPool) -> Self {
        let (event_tx, _rx) = broadcast::channel(64);
        Self { pool, event_tx }
    }

    /// Subscribe to live decision events.
    pub fn subscribe(&self) -> broadcast::Receiver<DecisionEvent> {
        self.event_tx.subscribe()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Persist a composite decision and broadcast it. A failed write is
    /// logged and swallowed: auditing must never turn an allow into an
    /// error path.
    pub fn record(&self, tenant_id: &str, decision: &Decision) {
        log_line(decision);
        let record = DecisionRecord::from_decision(tenant_id, decision);
        match self.pool.get() {
            Ok(conn) => {
                if let Err(e) = insert_decision(&conn, &record) {
                    warn!("failed to write audit record: {}", e);
                }
            }
            Err(e) => warn!("audit pool unavailable: {}", e),
        }
        let _ = self.event_tx.send(DecisionEvent {
            timestamp: record.timestamp,
            tenant_id: record.tenant_id,
            correlation_id: record.correlation_id,
            checkpoint: record.checkpoint,
            verdict: record.verdict,
            details: record.details,
        });
    }
}

/// Open a connection pool for the given database file path.
///
/// Creates the database and `decisions` table if they don't exist.
pub fn open_pool(path: &std::path::Path) -> Result<DbPool> {
    let manager = r2d2_sqlite::SqliteConnectionManager::file(path);
    let pool = r2d2::Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| GateError::Proxy(e.to_string()))?;
    let conn = pool.get().map_err(|e| GateError::Proxy(e.to_string()))?;
    init_db(&conn)?;
    Ok(pool)
}

/// Open an in-memory connection pool (for testing).
pub fn open_memory_pool() -> Result<DbPool> {
    let manager = r2d2_sqlite::SqliteConnectionManager::memory();
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| GateError::Proxy(e.to_string()))?;
    let conn = pool.get().map_err(|e| GateError::Proxy(e.to_string()))?;
    init_db(&conn)?;
    Ok(pool)
}

/// Initialize the SQLite database and create the decisions table.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS decisions (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp      TEXT NOT NULL,
            tenant_id      TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            checkpoint     TEXT NOT NULL,
            policy_name    TEXT NOT NULL,
            verdict        TEXT NOT NULL,
            reason         TEXT NOT NULL,
            details        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_decisions_timestamp ON decisions(timestamp);
        CREATE INDEX IF NOT EXISTS idx_decisions_correlation ON decisions(correlation_id);",
    )?;
    Ok(())
}

/// Insert a decision record.
pub fn insert_decision(conn: &Connection, record: &DecisionRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO decisions
            (timestamp, tenant_id, correlation_id, checkpoint, policy_name, verdict, reason, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            record.timestamp,
            record.tenant_id,
            record.correlation_id,
            record.checkpoint,
            record.policy_name,
            record.verdict,
            record.reason,
            record.details,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Query the most recent N decision records.
pub fn query_recent(conn: &Connection, limit: usize) -> Result<Vec<DecisionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, tenant_id, correlation_id, checkpoint, policy_name, verdict, reason, details
         FROM decisions ORDER BY id DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        Ok(DecisionRecord {
            id: Some(row.get(0)?),
            timestamp: row.get(1)?,
            tenant_id: row.get(2)?,
            correlation_id: row.get(3)?,
            checkpoint: row.get(4)?,
            policy_name: row.get(5)?,
            verdict: row.get(6)?,
            reason: row.get(7)?,
            details: row.get(8)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Aggregated decision counts from the `decisions` table.
#[derive(Debug, Clone, Default)]
pub struct DecisionStats {
    pub total: usize,
    pub allowed: usize,
    pub logged: usize,
    pub confirmed: usize,
    pub blocked: usize,
}

/// Query aggregated decision counts grouped by verdict.
pub fn query_stats(conn: &Connection) -> Result<DecisionStats> {
    let mut stmt = conn.prepare("SELECT verdict, COUNT(*) FROM decisions GROUP BY verdict")?;
    let rows = stmt.query_map([], |row| {
        let verdict: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((verdict, count as usize))
    })?;

    let mut stats = DecisionStats::default();
    for row in rows {
        let (verdict, count) = row?;
        stats.total += count;
        match verdict.as_str() {
            "ALLOW" => stats.allowed = count,
            "LOG" => stats.logged = count,
            "CONFIRM" => stats.confirmed = count,
            "BLOCK" => stats.blocked = count,
            _ => {} // unknown verdicts still count in total
        }
    }
    Ok(stats)
}
