//! SQLite store backed by sqlx.
//!
//! The linkage compare-and-swap is a guarded `UPDATE ... WHERE
//! assigned_advisor_id IS ?` whose `rows_affected()` decides the winner,
//! and counter updates run as single-statement read-modify-writes
//! (`MAX(0, total_assigned + ?)`), so no lost updates under concurrency.
//! Specialties, contact methods and audit events are stored as JSON text.
//!
//! Listing paths decode rows leniently: a row that fails to decode is
//! logged and skipped so statistics degrade to partial results instead of
//! failing the whole report. Point lookups stay strict.

use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use laborline_consult_core::{
    Advisor, AdvisorFilter, AdvisorId, AuditEvent, AuditEventKind, ConsultError,
    ConsultationRequest, ContactMethod, Region, RequestFilter, RequestId, RequestStatus,
    ServiceCategory,
};

use crate::error::{EngineError, Result};
use crate::store::{AdvisorStore, LifecycleOutcome, LifecyclePatch, RequestStore, StatusCounts};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS advisors (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        phone TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE COLLATE NOCASE,
        messenger TEXT,
        region TEXT NOT NULL,
        notes TEXT NOT NULL DEFAULT '',
        specialties TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        total_assigned INTEGER NOT NULL DEFAULT 0,
        total_completed INTEGER NOT NULL DEFAULT 0,
        timed_completions INTEGER NOT NULL DEFAULT 0,
        avg_completion_time_hours REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS requests (
        id TEXT PRIMARY KEY,
        requester_name TEXT NOT NULL,
        phone TEXT NOT NULL,
        email TEXT,
        messenger TEXT,
        details TEXT NOT NULL,
        contact_methods TEXT NOT NULL,
        preferred_time TEXT,
        region TEXT,
        service_type TEXT NOT NULL,
        status TEXT NOT NULL,
        assigned_advisor_id TEXT,
        assigned_at TEXT,
        processed_by TEXT,
        processed_at TEXT,
        completed_at TEXT,
        response_time_minutes INTEGER,
        completion_time_hours REAL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status)",
    "CREATE INDEX IF NOT EXISTS idx_requests_advisor ON requests(assigned_advisor_id)",
    "CREATE INDEX IF NOT EXISTS idx_requests_region ON requests(region)",
    "CREATE TABLE IF NOT EXISTS request_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        event TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_request ON request_events(request_id)",
];

/// Durable store on a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating tables as needed). In-memory databases are pinned to
    /// a single connection so every query sees the same database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(EngineError::database)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(EngineError::database)?;
        }
        info!("📦 SQLite store ready at {url}");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn map_db_err(err: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
            return ConsultError::DuplicateContact.into();
        }
    }
    EngineError::database(err)
}

fn decode_advisor(row: &SqliteRow) -> std::result::Result<Advisor, String> {
    let region: String = row.try_get("region").map_err(|e| e.to_string())?;
    let specialties: String = row.try_get("specialties").map_err(|e| e.to_string())?;
    Ok(Advisor {
        id: AdvisorId(row.try_get("id").map_err(|e| e.to_string())?),
        name: row.try_get("name").map_err(|e| e.to_string())?,
        phone: row.try_get("phone").map_err(|e| e.to_string())?,
        email: row.try_get("email").map_err(|e| e.to_string())?,
        messenger: row.try_get("messenger").map_err(|e| e.to_string())?,
        region: Region::from_str(&region)?,
        notes: row.try_get("notes").map_err(|e| e.to_string())?,
        specialties: serde_json::from_str::<BTreeSet<ServiceCategory>>(&specialties)
            .map_err(|e| e.to_string())?,
        is_active: row.try_get("is_active").map_err(|e| e.to_string())?,
        total_assigned: row.try_get::<i64, _>("total_assigned").map_err(|e| e.to_string())? as u32,
        total_completed: row
            .try_get::<i64, _>("total_completed")
            .map_err(|e| e.to_string())? as u32,
        timed_completions: row
            .try_get::<i64, _>("timed_completions")
            .map_err(|e| e.to_string())? as u32,
        avg_completion_time_hours: row
            .try_get("avg_completion_time_hours")
            .map_err(|e| e.to_string())?,
        created_at: row.try_get("created_at").map_err(|e| e.to_string())?,
        updated_at: row.try_get("updated_at").map_err(|e| e.to_string())?,
    })
}

fn decode_request(row: &SqliteRow) -> std::result::Result<ConsultationRequest, String> {
    let contact_methods: String = row.try_get("contact_methods").map_err(|e| e.to_string())?;
    let region: Option<String> = row.try_get("region").map_err(|e| e.to_string())?;
    let service_type: String = row.try_get("service_type").map_err(|e| e.to_string())?;
    let status: String = row.try_get("status").map_err(|e| e.to_string())?;
    let advisor: Option<String> = row
        .try_get("assigned_advisor_id")
        .map_err(|e| e.to_string())?;
    Ok(ConsultationRequest {
        id: RequestId(row.try_get("id").map_err(|e| e.to_string())?),
        requester_name: row.try_get("requester_name").map_err(|e| e.to_string())?,
        phone: row.try_get("phone").map_err(|e| e.to_string())?,
        email: row.try_get("email").map_err(|e| e.to_string())?,
        messenger: row.try_get("messenger").map_err(|e| e.to_string())?,
        details: row.try_get("details").map_err(|e| e.to_string())?,
        contact_methods: serde_json::from_str::<BTreeSet<ContactMethod>>(&contact_methods)
            .map_err(|e| e.to_string())?,
        preferred_time: row.try_get("preferred_time").map_err(|e| e.to_string())?,
        region: region.as_deref().map(Region::from_str).transpose()?,
        service_type: ServiceCategory::from_str(&service_type)?,
        status: RequestStatus::from_str(&status)?,
        assigned_advisor_id: advisor.map(AdvisorId),
        assigned_at: row.try_get("assigned_at").map_err(|e| e.to_string())?,
        processed_by: row.try_get("processed_by").map_err(|e| e.to_string())?,
        processed_at: row.try_get("processed_at").map_err(|e| e.to_string())?,
        completed_at: row.try_get("completed_at").map_err(|e| e.to_string())?,
        response_time_minutes: row
            .try_get("response_time_minutes")
            .map_err(|e| e.to_string())?,
        completion_time_hours: row
            .try_get("completion_time_hours")
            .map_err(|e| e.to_string())?,
        created_at: row.try_get("created_at").map_err(|e| e.to_string())?,
        updated_at: row.try_get("updated_at").map_err(|e| e.to_string())?,
        events: Vec::new(),
    })
}

fn encode_event(event: &AuditEvent) -> Result<String> {
    serde_json::to_string(event).map_err(EngineError::database)
}

impl SqliteStore {
    async fn load_events(&self, id: &RequestId) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query("SELECT event FROM request_events WHERE request_id = ? ORDER BY id")
            .bind(&id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::database)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("event").map_err(EngineError::database)?;
            match serde_json::from_str::<AuditEvent>(&raw) {
                Ok(event) => events.push(event),
                Err(err) => warn!(request_id = %id, %err, "skipping undecodable audit event"),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl RequestStore for SqliteStore {
    async fn insert(&self, request: ConsultationRequest) -> Result<()> {
        let contact_methods =
            serde_json::to_string(&request.contact_methods).map_err(EngineError::database)?;
        let mut tx = self.pool.begin().await.map_err(EngineError::database)?;

        sqlx::query(
            "INSERT INTO requests (id, requester_name, phone, email, messenger, details,
                contact_methods, preferred_time, region, service_type, status,
                assigned_advisor_id, assigned_at, processed_by, processed_at, completed_at,
                response_time_minutes, completion_time_hours, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.requester_name)
        .bind(&request.phone)
        .bind(&request.email)
        .bind(&request.messenger)
        .bind(&request.details)
        .bind(&contact_methods)
        .bind(&request.preferred_time)
        .bind(request.region.map(|r| r.as_str()))
        .bind(request.service_type.as_str())
        .bind(request.status.as_str())
        .bind(request.assigned_advisor_id.as_ref().map(|a| a.0.as_str()))
        .bind(request.assigned_at)
        .bind(&request.processed_by)
        .bind(request.processed_at)
        .bind(request.completed_at)
        .bind(request.response_time_minutes)
        .bind(request.completion_time_hours)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(EngineError::database)?;

        for event in &request.events {
            sqlx::query("INSERT INTO request_events (request_id, timestamp, event) VALUES (?, ?, ?)")
                .bind(&request.id.0)
                .bind(event.timestamp)
                .bind(encode_event(event)?)
                .execute(&mut *tx)
                .await
                .map_err(EngineError::database)?;
        }

        tx.commit().await.map_err(EngineError::database)?;
        Ok(())
    }

    async fn get(&self, id: &RequestId) -> Result<Option<ConsultationRequest>> {
        let Some(row) = sqlx::query("SELECT * FROM requests WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::database)?
        else {
            return Ok(None);
        };

        let mut request = decode_request(&row).map_err(EngineError::Database)?;
        request.events = self.load_events(id).await?;
        Ok(Some(request))
    }

    async fn apply_lifecycle(
        &self,
        id: &RequestId,
        patch: LifecyclePatch,
        event: AuditEvent,
    ) -> Result<Option<LifecycleOutcome>> {
        let mut tx = self.pool.begin().await.map_err(EngineError::database)?;

        // A timing reset overwrites everything; any other patch leaves
        // the set-once timing fields to the writer that stamped them.
        let result = if patch.clear_timing {
            sqlx::query(
                "UPDATE requests SET status = ?, processed_by = ?, processed_at = ?,
                    completed_at = ?, response_time_minutes = ?, completion_time_hours = ?,
                    updated_at = ?
                 WHERE id = ?",
            )
            .bind(patch.status.as_str())
            .bind(&patch.processed_by)
            .bind(patch.processed_at)
            .bind(patch.completed_at)
            .bind(patch.response_time_minutes)
            .bind(patch.completion_time_hours)
            .bind(patch.updated_at)
            .bind(&id.0)
        } else {
            sqlx::query(
                "UPDATE requests SET status = ?,
                    processed_by = COALESCE(processed_by, ?),
                    processed_at = COALESCE(processed_at, ?),
                    response_time_minutes = COALESCE(response_time_minutes, ?),
                    updated_at = ?
                 WHERE id = ?",
            )
            .bind(patch.status.as_str())
            .bind(&patch.processed_by)
            .bind(patch.processed_at)
            .bind(patch.response_time_minutes)
            .bind(patch.updated_at)
            .bind(&id.0)
        }
        .execute(&mut *tx)
        .await
        .map_err(EngineError::database)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(EngineError::database)?;
            return Ok(None);
        }

        // First writer wins the completion stamp; the guard makes the
        // losing racers report `first_completion = false`.
        let mut first_completion = false;
        if !patch.clear_timing {
            if let Some(completed_at) = patch.completed_at {
                let stamped = sqlx::query(
                    "UPDATE requests SET completed_at = ?, completion_time_hours = ?
                     WHERE id = ? AND completed_at IS NULL",
                )
                .bind(completed_at)
                .bind(patch.completion_time_hours)
                .bind(&id.0)
                .execute(&mut *tx)
                .await
                .map_err(EngineError::database)?;
                first_completion = stamped.rows_affected() > 0;
            }
        }

        sqlx::query("INSERT INTO request_events (request_id, timestamp, event) VALUES (?, ?, ?)")
            .bind(&id.0)
            .bind(event.timestamp)
            .bind(encode_event(&event)?)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::database)?;

        tx.commit().await.map_err(EngineError::database)?;
        Ok(Some(LifecycleOutcome { first_completion }))
    }

    async fn append_event(&self, id: &RequestId, event: AuditEvent) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM requests WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::database)?
            .is_some();
        if !exists {
            return Ok(false);
        }

        sqlx::query("INSERT INTO request_events (request_id, timestamp, event) VALUES (?, ?, ?)")
            .bind(&id.0)
            .bind(event.timestamp)
            .bind(encode_event(&event)?)
            .execute(&self.pool)
            .await
            .map_err(EngineError::database)?;
        Ok(true)
    }

    async fn try_link_advisor(
        &self,
        id: &RequestId,
        expected: Option<&AdvisorId>,
        advisor: &AdvisorId,
        assigned_at: DateTime<Utc>,
        events: Vec<AuditEvent>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(EngineError::database)?;

        // Guarded update: only the writer that still sees the expected
        // linkage gets a row; rows_affected decides the race.
        let result = sqlx::query(
            "UPDATE requests SET assigned_advisor_id = ?, assigned_at = ?, updated_at = ?
             WHERE id = ? AND assigned_advisor_id IS ?",
        )
        .bind(&advisor.0)
        .bind(assigned_at)
        .bind(assigned_at)
        .bind(&id.0)
        .bind(expected.map(|a| a.0.as_str()))
        .execute(&mut *tx)
        .await
        .map_err(EngineError::database)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(EngineError::database)?;
            debug!(request_id = %id, "linkage CAS lost: advisor changed underneath");
            return Ok(false);
        }

        for event in &events {
            sqlx::query("INSERT INTO request_events (request_id, timestamp, event) VALUES (?, ?, ?)")
                .bind(&id.0)
                .bind(event.timestamp)
                .bind(encode_event(event)?)
                .execute(&mut *tx)
                .await
                .map_err(EngineError::database)?;
        }

        tx.commit().await.map_err(EngineError::database)?;
        Ok(true)
    }

    async fn unlink_advisor(&self, id: &RequestId, event: AuditEvent) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(EngineError::database)?;

        let result = sqlx::query(
            "UPDATE requests SET assigned_advisor_id = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(event.timestamp)
        .bind(&id.0)
        .execute(&mut *tx)
        .await
        .map_err(EngineError::database)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(EngineError::database)?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO request_events (request_id, timestamp, event) VALUES (?, ?, ?)")
            .bind(&id.0)
            .bind(event.timestamp)
            .bind(encode_event(&event)?)
            .execute(&mut *tx)
            .await
            .map_err(EngineError::database)?;

        tx.commit().await.map_err(EngineError::database)?;
        Ok(true)
    }

    async fn list(&self, filter: &RequestFilter) -> Result<(Vec<ConsultationRequest>, u64)> {
        fn push_conditions<'a>(
            builder: &mut sqlx::QueryBuilder<'a, sqlx::Sqlite>,
            filter: &'a RequestFilter,
        ) {
            if let Some(status) = filter.status {
                builder.push(" AND status = ").push_bind(status.as_str());
            }
            if let Some(region) = filter.region {
                builder.push(" AND region = ").push_bind(region.as_str());
            }
            if let Some(service_type) = filter.service_type {
                builder
                    .push(" AND service_type = ")
                    .push_bind(service_type.as_str());
            }
            if let Some(advisor) = &filter.assigned_advisor_id {
                builder
                    .push(" AND assigned_advisor_id = ")
                    .push_bind(advisor.0.as_str());
            }
            if let Some(search) = &filter.search {
                let pattern = format!("%{search}%");
                builder
                    .push(" AND (requester_name LIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR phone LIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
            if let Some(from) = filter.created_from {
                builder.push(" AND created_at >= ").push_bind(from);
            }
            if let Some(to) = filter.created_to {
                builder.push(" AND created_at < ").push_bind(to);
            }
        }

        let mut count_query =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM requests WHERE 1 = 1");
        push_conditions(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(EngineError::database)?;

        let mut select_query = sqlx::QueryBuilder::new("SELECT * FROM requests WHERE 1 = 1");
        push_conditions(&mut select_query, filter);
        select_query.push(" ORDER BY created_at DESC");
        select_query
            .push(" LIMIT ")
            .push_bind(filter.limit.map(i64::from).unwrap_or(-1));
        select_query
            .push(" OFFSET ")
            .push_bind(filter.offset.map(i64::from).unwrap_or(0));

        let rows = select_query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::database)?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_request(row) {
                Ok(request) => requests.push(request),
                Err(err) => warn!(%err, "skipping undecodable request row"),
            }
        }
        Ok((requests, total as u64))
    }

    async fn count_by_status(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<StatusCounts> {
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT status, COUNT(*) AS n FROM requests WHERE 1 = 1",
        );
        if let Some(from) = from {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = to {
            builder.push(" AND created_at < ").push_bind(to);
        }
        builder.push(" GROUP BY status");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::database)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(EngineError::database)?;
            let n: i64 = row.try_get("n").map_err(EngineError::database)?;
            match RequestStatus::from_str(&status) {
                Ok(status) => match status {
                    RequestStatus::Pending => counts.pending = n as u64,
                    RequestStatus::Processing => counts.processing = n as u64,
                    RequestStatus::Completed => counts.completed = n as u64,
                    RequestStatus::Cancelled => counts.cancelled = n as u64,
                },
                Err(err) => warn!(%err, "skipping unknown status bucket"),
            }
        }
        Ok(counts)
    }

    async fn count_active_for(&self, advisor: &AdvisorId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM requests
             WHERE assigned_advisor_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(&advisor.0)
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::database)?;
        Ok(count as u64)
    }

    async fn sever_advisor(
        &self,
        advisor: &AdvisorId,
        now: DateTime<Utc>,
        note: &str,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(EngineError::database)?;

        let rows = sqlx::query("SELECT id FROM requests WHERE assigned_advisor_id = ?")
            .bind(&advisor.0)
            .fetch_all(&mut *tx)
            .await
            .map_err(EngineError::database)?;

        let event = AuditEvent::new(
            AuditEventKind::Unassigned {
                advisor_id: advisor.clone(),
            },
            now,
        )
        .with_note(Some(note));
        let encoded = encode_event(&event)?;

        for row in &rows {
            let id: String = row.try_get("id").map_err(EngineError::database)?;
            sqlx::query("INSERT INTO request_events (request_id, timestamp, event) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(now)
                .bind(&encoded)
                .execute(&mut *tx)
                .await
                .map_err(EngineError::database)?;
        }

        let result = sqlx::query(
            "UPDATE requests SET assigned_advisor_id = NULL, updated_at = ?
             WHERE assigned_advisor_id = ?",
        )
        .bind(now)
        .bind(&advisor.0)
        .execute(&mut *tx)
        .await
        .map_err(EngineError::database)?;

        tx.commit().await.map_err(EngineError::database)?;
        Ok(result.rows_affected())
    }

    async fn assigned_counts_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(AdvisorId, u64)>> {
        let rows = sqlx::query(
            "SELECT assigned_advisor_id AS advisor, COUNT(*) AS n FROM requests
             WHERE assigned_advisor_id IS NOT NULL AND assigned_at >= ? AND assigned_at < ?
             GROUP BY assigned_advisor_id",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::database)?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let advisor: String = row.try_get("advisor").map_err(EngineError::database)?;
            let n: i64 = row.try_get("n").map_err(EngineError::database)?;
            counts.push((AdvisorId(advisor), n as u64));
        }
        Ok(counts)
    }
}

#[async_trait]
impl AdvisorStore for SqliteStore {
    async fn insert(&self, advisor: Advisor) -> Result<()> {
        let specialties =
            serde_json::to_string(&advisor.specialties).map_err(EngineError::database)?;

        sqlx::query(
            "INSERT INTO advisors (id, name, phone, email, messenger, region, notes,
                specialties, is_active, total_assigned, total_completed,
                timed_completions, avg_completion_time_hours, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&advisor.id.0)
        .bind(&advisor.name)
        .bind(&advisor.phone)
        .bind(&advisor.email)
        .bind(&advisor.messenger)
        .bind(advisor.region.as_str())
        .bind(&advisor.notes)
        .bind(&specialties)
        .bind(advisor.is_active)
        .bind(advisor.total_assigned as i64)
        .bind(advisor.total_completed as i64)
        .bind(advisor.timed_completions as i64)
        .bind(advisor.avg_completion_time_hours)
        .bind(advisor.created_at)
        .bind(advisor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get(&self, id: &AdvisorId) -> Result<Option<Advisor>> {
        let Some(row) = sqlx::query("SELECT * FROM advisors WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::database)?
        else {
            return Ok(None);
        };
        Ok(Some(decode_advisor(&row).map_err(EngineError::Database)?))
    }

    async fn update_profile(&self, advisor: &Advisor) -> Result<()> {
        // Email must stay unique against all *other* advisors
        let collision: Option<String> = sqlx::query_scalar(
            "SELECT id FROM advisors WHERE email = ? COLLATE NOCASE AND id != ?",
        )
        .bind(&advisor.email)
        .bind(&advisor.id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::database)?;
        if collision.is_some() {
            return Err(ConsultError::DuplicateContact.into());
        }

        let specialties =
            serde_json::to_string(&advisor.specialties).map_err(EngineError::database)?;
        let result = sqlx::query(
            "UPDATE advisors SET name = ?, phone = ?, email = ?, messenger = ?, region = ?,
                notes = ?, specialties = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&advisor.name)
        .bind(&advisor.phone)
        .bind(&advisor.email)
        .bind(&advisor.messenger)
        .bind(advisor.region.as_str())
        .bind(&advisor.notes)
        .bind(&specialties)
        .bind(advisor.is_active)
        .bind(advisor.updated_at)
        .bind(&advisor.id.0)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(ConsultError::NotFound(format!("advisor {}", advisor.id)).into());
        }
        Ok(())
    }

    async fn set_active(&self, id: &AdvisorId, active: bool, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE advisors SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now)
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(EngineError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &AdvisorId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM advisors WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(EngineError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn adjust_assigned(&self, id: &AdvisorId, delta: i64, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE advisors SET total_assigned = MAX(0, total_assigned + ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(delta)
        .bind(now)
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(EngineError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_completion(
        &self,
        id: &AdvisorId,
        hours: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE advisors SET
                avg_completion_time_hours = CASE WHEN ? IS NULL
                    THEN avg_completion_time_hours
                    ELSE (avg_completion_time_hours * timed_completions + ?)
                         / (timed_completions + 1)
                END,
                timed_completions = timed_completions + (? IS NOT NULL),
                total_completed = total_completed + 1,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(hours)
        .bind(hours)
        .bind(hours)
        .bind(now)
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(EngineError::database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn search(&self, filter: &AdvisorFilter) -> Result<(Vec<Advisor>, u64)> {
        fn push_conditions<'a>(
            builder: &mut sqlx::QueryBuilder<'a, sqlx::Sqlite>,
            filter: &'a AdvisorFilter,
        ) {
            if let Some(region) = filter.region {
                builder.push(" AND region = ").push_bind(region.as_str());
            }
            if let Some(specialty) = filter.specialty {
                // Specialties are a JSON array of category strings
                let pattern = format!("%\"{}\"%", specialty.as_str());
                builder.push(" AND specialties LIKE ").push_bind(pattern);
            }
            if let Some(active) = filter.active {
                builder.push(" AND is_active = ").push_bind(active);
            }
            if let Some(search) = &filter.search {
                let pattern = format!("%{search}%");
                builder
                    .push(" AND (name LIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR phone LIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR email LIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
        }

        let mut count_query =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM advisors WHERE 1 = 1");
        push_conditions(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(EngineError::database)?;

        let mut select_query = sqlx::QueryBuilder::new("SELECT * FROM advisors WHERE 1 = 1");
        push_conditions(&mut select_query, filter);
        select_query.push(" ORDER BY created_at DESC");
        select_query
            .push(" LIMIT ")
            .push_bind(filter.limit.map(i64::from).unwrap_or(-1));
        select_query
            .push(" OFFSET ")
            .push_bind(filter.offset.map(i64::from).unwrap_or(0));

        let rows = select_query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::database)?;

        let mut advisors = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_advisor(row) {
                Ok(advisor) => advisors.push(advisor),
                Err(err) => warn!(%err, "skipping undecodable advisor row"),
            }
        }
        Ok((advisors, total as u64))
    }

    async fn list_all(&self) -> Result<Vec<Advisor>> {
        let rows = sqlx::query("SELECT * FROM advisors ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::database)?;

        let mut advisors = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_advisor(row) {
                Ok(advisor) => advisors.push(advisor),
                Err(err) => warn!(%err, "skipping undecodable advisor row"),
            }
        }
        Ok(advisors)
    }
}
