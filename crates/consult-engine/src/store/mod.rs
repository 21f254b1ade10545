//! Storage layer.
//!
//! The engine talks to repositories through these traits so it stays
//! storage-agnostic: [`MemoryStore`] backs tests and small deployments,
//! [`SqliteStore`] backs durable ones. Both expose the same atomic
//! primitives the assignment path depends on:
//!
//! - `try_link_advisor` is a compare-and-swap on the request/advisor
//!   linkage. Two operators racing to assign the same request resolve to
//!   exactly one winner; the loser sees `false` and reports a definitive
//!   failure, never a silent overwrite.
//! - `adjust_assigned` / `record_completion` are atomic read-modify-write
//!   counter updates, so concurrent assignments against one advisor never
//!   lose increments.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use laborline_consult_core::{
    Advisor, AdvisorFilter, AdvisorId, AuditEvent, ConsultationRequest, RequestFilter, RequestId,
    RequestStatus,
};

use crate::error::Result;

/// Counts of requests per lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.cancelled
    }

    pub fn bump(&mut self, status: RequestStatus) {
        match status {
            RequestStatus::Pending => self.pending += 1,
            RequestStatus::Processing => self.processing += 1,
            RequestStatus::Completed => self.completed += 1,
            RequestStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Lifecycle-owned fields written back after a state-machine operation.
///
/// Restricting the write set keeps a transition from clobbering an
/// assignment that landed concurrently. Timing fields are set-once in
/// the store: a patch built from a stale read can never clear
/// `processed_at` or `completed_at` once another writer stamped them.
/// `clear_timing` is the one sanctioned exception, used by the admin
/// timing reset.
#[derive(Debug, Clone)]
pub struct LifecyclePatch {
    pub status: RequestStatus,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub response_time_minutes: Option<i64>,
    pub completion_time_hours: Option<f64>,
    pub updated_at: DateTime<Utc>,
    pub clear_timing: bool,
}

impl LifecyclePatch {
    pub fn from_request(request: &ConsultationRequest) -> Self {
        Self {
            status: request.status,
            processed_by: request.processed_by.clone(),
            processed_at: request.processed_at,
            completed_at: request.completed_at,
            response_time_minutes: request.response_time_minutes,
            completion_time_hours: request.completion_time_hours,
            updated_at: request.updated_at,
            clear_timing: false,
        }
    }

    /// Marks the patch as a timing reset, allowing it to overwrite the
    /// otherwise set-once timing fields.
    pub fn clearing_timing(mut self) -> Self {
        self.clear_timing = true;
        self
    }
}

/// What a lifecycle write actually did once it reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOutcome {
    /// This write was the one that stamped `completed_at`. Only the
    /// first of several racing completion writes gets `true`, so the
    /// caller can credit the advisor exactly once.
    pub first_completion: bool,
}

/// Repository for consultation requests
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, request: ConsultationRequest) -> Result<()>;

    async fn get(&self, id: &RequestId) -> Result<Option<ConsultationRequest>>;

    /// Write lifecycle fields and append the audit event atomically.
    ///
    /// Timing fields are first-writer-wins unless the patch clears
    /// timing: once `completed_at` is stamped, later patches leave it
    /// and `completion_time_hours` untouched. Returns `None` for an
    /// unknown id.
    async fn apply_lifecycle(
        &self,
        id: &RequestId,
        patch: LifecyclePatch,
        event: AuditEvent,
    ) -> Result<Option<LifecycleOutcome>>;

    /// Append an audit event. Returns `false` for an unknown id.
    async fn append_event(&self, id: &RequestId, event: AuditEvent) -> Result<bool>;

    /// Compare-and-swap the advisor linkage: succeeds only when the stored
    /// `assigned_advisor_id` still equals `expected`, setting the new
    /// advisor, `assigned_at`, and appending `events` in one atomic step.
    async fn try_link_advisor(
        &self,
        id: &RequestId,
        expected: Option<&AdvisorId>,
        advisor: &AdvisorId,
        assigned_at: DateTime<Utc>,
        events: Vec<AuditEvent>,
    ) -> Result<bool>;

    /// Clear the advisor linkage unconditionally, appending the event.
    async fn unlink_advisor(&self, id: &RequestId, event: AuditEvent) -> Result<bool>;

    /// Filtered listing, most recent first; returns the page and the total
    /// match count before pagination.
    async fn list(&self, filter: &RequestFilter) -> Result<(Vec<ConsultationRequest>, u64)>;

    /// Per-status counts, optionally restricted to a creation-date range
    async fn count_by_status(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<StatusCounts>;

    /// Number of PENDING/PROCESSING requests linked to an advisor
    async fn count_active_for(&self, advisor: &AdvisorId) -> Result<u64>;

    /// Clear a deleted advisor's id from every request that still holds it,
    /// appending an unassignment note to each. Returns the number severed.
    async fn sever_advisor(
        &self,
        advisor: &AdvisorId,
        now: DateTime<Utc>,
        note: &str,
    ) -> Result<u64>;

    /// Per-advisor counts of requests assigned within `[from, to)`
    async fn assigned_counts_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(AdvisorId, u64)>>;
}

/// Repository for advisors
#[async_trait]
pub trait AdvisorStore: Send + Sync {
    /// Insert a new advisor; fails with `DuplicateContact` when the email
    /// is already taken.
    async fn insert(&self, advisor: Advisor) -> Result<()>;

    async fn get(&self, id: &AdvisorId) -> Result<Option<Advisor>>;

    /// Overwrite profile fields; re-validates email uniqueness against all
    /// *other* advisors. Counters are not written through this path.
    async fn update_profile(&self, advisor: &Advisor) -> Result<()>;

    /// Returns `false` for an unknown id
    async fn set_active(&self, id: &AdvisorId, active: bool, now: DateTime<Utc>) -> Result<bool>;

    /// Returns `false` for an unknown id. Callers are responsible for the
    /// active-assignment guard; the store just removes the record.
    async fn delete(&self, id: &AdvisorId) -> Result<bool>;

    /// Atomically add `delta` to `total_assigned`, floored at zero.
    /// Returns `false` for an unknown id.
    async fn adjust_assigned(&self, id: &AdvisorId, delta: i64, now: DateTime<Utc>) -> Result<bool>;

    /// Atomically increment `total_completed` and fold `hours` (when
    /// known) into the running completion-time average.
    async fn record_completion(
        &self,
        id: &AdvisorId,
        hours: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Filtered search, most recent first; returns the page and the total
    /// match count before pagination.
    async fn search(&self, filter: &AdvisorFilter) -> Result<(Vec<Advisor>, u64)>;

    async fn list_all(&self) -> Result<Vec<Advisor>>;
}
