//! SQLite-backed lead index.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;
use tracing::debug;

use super::{Business, Lead, LeadStatus};
use crate::error::{EngineError, Result};
use crate::phase::TargetCriteria;

const LEAD_COLUMNS: &str = "id, dedup_key, provider_id, name, industry, address, city, state, \
     phone, email, rating, review_count, has_website, website_url, status, created_at, \
     contacted_at, responded_at, converted_at, attempts, last_error";

/// Async-safe handle to the lead store.
///
/// Wraps [`LeadStore`] behind `Arc<Mutex>` and runs every access on tokio's
/// blocking pool, so SQLite I/O never occupies an async worker. The mutex
/// also makes the store single-writer.
#[derive(Clone)]
pub struct LeadStoreHandle {
    inner: Arc<std::sync::Mutex<LeadStore>>,
}

impl LeadStoreHandle {
    pub fn new(store: LeadStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LeadStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| EngineError::store(format!("lead store lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| EngineError::store(format!("lead store task panicked: {}", e)))?
    }

    /// Acquire the store synchronously. For CLI commands and tests only,
    /// never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, LeadStore>> {
        self.inner
            .lock()
            .map_err(|e| EngineError::store(format!("lead store lock poisoned: {}", e)))
    }
}

/// Result of [`LeadStore::insert`].
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub lead: Lead,
    /// False when the business merged into an existing lead.
    pub is_new: bool,
}

/// Number of leads in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeadCounts {
    pub new: u64,
    pub contacted: u64,
    pub responded: u64,
    pub converted: u64,
}

impl LeadCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.new + self.contacted + self.responded + self.converted
    }
}

impl ToSql for LeadStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LeadStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        dedup_key: row.get(1)?,
        provider_id: row.get(2)?,
        name: row.get(3)?,
        industry: row.get(4)?,
        address: row.get(5)?,
        city: row.get(6)?,
        state: row.get(7)?,
        phone: row.get(8)?,
        email: row.get(9)?,
        rating: row.get(10)?,
        review_count: row.get(11)?,
        has_website: row.get(12)?,
        website_url: row.get(13)?,
        status: row.get(14)?,
        created_at: from_millis(row.get(15)?),
        contacted_at: row.get::<_, Option<i64>>(16)?.map(from_millis),
        responded_at: row.get::<_, Option<i64>>(17)?.map(from_millis),
        converted_at: row.get::<_, Option<i64>>(18)?.map(from_millis),
        attempts: row.get(19)?,
        last_error: row.get(20)?,
    })
}

/// Deduplicated, status-tracked lead index.
pub struct LeadStore {
    conn: Connection,
}

impl LeadStore {
    /// Open (or create) the lead database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing and dry inspection).
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dedup_key TEXT NOT NULL UNIQUE,
                provider_id TEXT,
                name TEXT NOT NULL,
                industry TEXT NOT NULL DEFAULT '',
                address TEXT,
                city TEXT NOT NULL,
                state TEXT NOT NULL,
                phone TEXT,
                email TEXT,
                rating REAL,
                review_count INTEGER NOT NULL DEFAULT 0,
                has_website INTEGER NOT NULL DEFAULT 0,
                website_url TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                created_at INTEGER NOT NULL,
                contacted_at INTEGER,
                responded_at INTEGER,
                converted_at INTEGER,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_leads_status_created ON leads(status, created_at, id);
            CREATE INDEX IF NOT EXISTS idx_leads_contacted ON leads(contacted_at);
            ",
        )?;
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Insert a discovered business, merging into an existing lead when the
    /// dedup key is already known.
    ///
    /// Merging fills in newly supplied descriptive fields and never touches
    /// status or timestamps.
    pub fn insert(&self, business: &Business, now: DateTime<Utc>) -> Result<InsertOutcome> {
        let key = business.dedup_key();
        let tx = self.conn.unchecked_transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM leads WHERE dedup_key = ?1)",
            params![key],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO leads (dedup_key, provider_id, name, industry, address, city, state,
                                phone, email, rating, review_count, has_website, website_url,
                                status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'new', ?14)
             ON CONFLICT(dedup_key) DO UPDATE SET
                provider_id = COALESCE(excluded.provider_id, leads.provider_id),
                industry = CASE WHEN excluded.industry <> '' THEN excluded.industry ELSE leads.industry END,
                address = COALESCE(excluded.address, leads.address),
                phone = COALESCE(excluded.phone, leads.phone),
                email = COALESCE(excluded.email, leads.email),
                rating = COALESCE(excluded.rating, leads.rating),
                review_count = MAX(excluded.review_count, leads.review_count),
                has_website = MAX(excluded.has_website, leads.has_website),
                website_url = COALESCE(excluded.website_url, leads.website_url)",
            params![
                key,
                non_empty(&business.provider_id),
                business.name.trim(),
                business.industry.trim(),
                non_empty(&business.address),
                business.city.trim(),
                business.state.trim(),
                non_empty(&business.phone),
                non_empty(&business.email),
                business.rating,
                business.review_count,
                business.has_website || non_empty(&business.website_url).is_some(),
                non_empty(&business.website_url),
                to_millis(now),
            ],
        )?;

        let lead = Self::get_in(&tx, &key)?
            .ok_or_else(|| EngineError::store(format!("lead {} missing after upsert", key)))?;
        tx.commit()?;

        if exists {
            debug!("Merged duplicate business '{}' into lead {}", business.name, lead.id);
        }
        Ok(InsertOutcome {
            lead,
            is_new: !exists,
        })
    }

    /// Mark a lead contacted. Returns `true` when the status changed.
    ///
    /// Already contacted (or further along) is a no-op, and `contacted_at`
    /// keeps its first value.
    pub fn mark_contacted(&self, dedup_key: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE leads SET status = 'contacted', contacted_at = ?2
             WHERE dedup_key = ?1 AND status = 'new'",
            params![dedup_key, to_millis(now)],
        )?;
        self.changed_or_known(dedup_key, changed)
    }

    /// Record a reply from the lead.
    pub fn mark_responded(&self, dedup_key: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE leads SET status = 'responded',
                    contacted_at = COALESCE(contacted_at, ?2),
                    responded_at = ?2
             WHERE dedup_key = ?1 AND status IN ('new', 'contacted')",
            params![dedup_key, to_millis(now)],
        )?;
        self.changed_or_known(dedup_key, changed)
    }

    /// Record that the lead became a paying customer.
    pub fn mark_converted(&self, dedup_key: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE leads SET status = 'converted',
                    contacted_at = COALESCE(contacted_at, ?2),
                    responded_at = COALESCE(responded_at, ?2),
                    converted_at = ?2
             WHERE dedup_key = ?1 AND status <> 'converted'",
            params![dedup_key, to_millis(now)],
        )?;
        self.changed_or_known(dedup_key, changed)
    }

    /// Record a failed pipeline attempt. The lead stays eligible.
    pub fn record_failure(&self, dedup_key: &str, error: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE leads SET attempts = attempts + 1, last_error = ?2 WHERE dedup_key = ?1",
            params![dedup_key, error],
        )?;
        if changed == 0 {
            return Err(EngineError::LeadNotFound {
                dedup_key: dedup_key.to_string(),
            });
        }
        Ok(())
    }

    fn changed_or_known(&self, dedup_key: &str, changed: usize) -> Result<bool> {
        if changed > 0 {
            return Ok(true);
        }
        if self.get(dedup_key)?.is_none() {
            return Err(EngineError::LeadNotFound {
                dedup_key: dedup_key.to_string(),
            });
        }
        Ok(false)
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get(&self, dedup_key: &str) -> Result<Option<Lead>> {
        Self::get_in(&self.conn, dedup_key)
    }

    fn get_in(conn: &Connection, dedup_key: &str) -> Result<Option<Lead>> {
        let sql = format!("SELECT {} FROM leads WHERE dedup_key = ?1", LEAD_COLUMNS);
        Ok(conn
            .query_row(&sql, params![dedup_key], lead_from_row)
            .optional()?)
    }

    /// Up to `limit` uncontacted leads, oldest first.
    pub fn get_uncontacted_batch(&self, limit: usize) -> Result<Vec<Lead>> {
        self.get_uncontacted_batch_matching(limit, &TargetCriteria::default())
    }

    /// Up to `limit` uncontacted leads matching `criteria`, oldest first.
    pub fn get_uncontacted_batch_matching(
        &self,
        limit: usize,
        criteria: &TargetCriteria,
    ) -> Result<Vec<Lead>> {
        let sql = format!(
            "SELECT {} FROM leads
             WHERE status = 'new'
               AND (?2 IS NULL OR has_website = ?2)
               AND (?3 IS NULL OR rating >= ?3)
               AND (?4 IS NULL OR review_count >= ?4)
             ORDER BY created_at, id
             LIMIT ?1",
            LEAD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                limit as i64,
                criteria.website.required_has_website(),
                criteria.min_rating,
                criteria.min_reviews,
            ],
            lead_from_row,
        )?;
        let leads = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(leads)
    }

    /// All leads (any status) matching a phase's target criteria.
    pub fn filter_by_phase_criteria(&self, criteria: &TargetCriteria) -> Result<Vec<Lead>> {
        self.filter(|lead| criteria.matches(lead))
    }

    /// All leads satisfying an arbitrary predicate, oldest first.
    pub fn filter(&self, predicate: impl Fn(&Lead) -> bool) -> Result<Vec<Lead>> {
        let sql = format!("SELECT {} FROM leads ORDER BY created_at, id", LEAD_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], lead_from_row)?;
        let mut leads = Vec::new();
        for row in rows {
            let lead = row?;
            if predicate(&lead) {
                leads.push(lead);
            }
        }
        Ok(leads)
    }

    /// Leads in creation order, optionally restricted to one status.
    pub fn list(&self, status: Option<LeadStatus>, limit: usize) -> Result<Vec<Lead>> {
        let sql = format!(
            "SELECT {} FROM leads WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at, id LIMIT ?2",
            LEAD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status, limit as i64], lead_from_row)?;
        let leads = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(leads)
    }

    pub fn counts(&self) -> Result<LeadCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM leads GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, LeadStatus>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = LeadCounts::default();
        for row in rows {
            let (status, n) = row?;
            let n = n.max(0) as u64;
            match status {
                LeadStatus::New => counts.new = n,
                LeadStatus::Contacted => counts.contacted = n,
                LeadStatus::Responded => counts.responded = n,
                LeadStatus::Converted => counts.converted = n,
            }
        }
        Ok(counts)
    }

    /// Creation time of the oldest lead still waiting for contact.
    pub fn oldest_uncontacted_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.timestamp("SELECT MIN(created_at) FROM leads WHERE status = 'new'")
    }

    /// Creation time of the most recently discovered lead.
    pub fn last_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.timestamp("SELECT MAX(created_at) FROM leads")
    }

    /// Time of the most recent first contact.
    pub fn last_contacted_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.timestamp("SELECT MAX(contacted_at) FROM leads")
    }

    /// Leads first contacted at or after `since`.
    pub fn contacted_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM leads WHERE contacted_at >= ?1",
            params![to_millis(since)],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    /// Paying customers, the input to phase selection.
    pub fn customer_count(&self) -> Result<u64> {
        Ok(self.counts()?.converted)
    }

    fn timestamp(&self, sql: &str) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(ms.map(from_millis))
    }
}
