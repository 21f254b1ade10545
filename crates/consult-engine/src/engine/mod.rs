//! Assignment engine and lifecycle orchestration.
//!
//! Every assignment attempt funnels through one store-level
//! compare-and-swap on the request's advisor linkage, so two operators
//! racing for the same request see exactly one winner; the loser gets
//! `AlreadyAssigned`. Advisor counters then move through the store's
//! atomic operations, with a compensating unlink if the counter step
//! finds the advisor gone.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use laborline_consult_core::{
    lifecycle, validation, Advisor, AdvisorFilter, AdvisorId, AdvisorSummary, AuditEvent,
    AuditEventKind, ConsultError, ConsultationRequest, NewConsultationRequest, RequestFilter,
    RequestId, RequestStatus,
};

use crate::config::ConsultCenterConfig;
use crate::error::Result;
use crate::registry::AdvisorRegistry;
use crate::stats::StatisticsAggregator;
use crate::store::{AdvisorStore, LifecyclePatch, MemoryStore, RequestStore, SqliteStore, StatusCounts};

/// One page of a request listing, with the status breakdown for the same
/// date range
#[derive(Debug, Clone, Serialize)]
pub struct RequestPage {
    pub items: Vec<ConsultationRequest>,
    pub total: u64,
    pub counts: StatusCounts,
}

/// Reconstructed assignment history for one request
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentHistory {
    /// Snapshot of the currently linked advisor, when it still exists
    pub current_advisor: Option<AdvisorSummary>,
    /// Assignment, auto-assignment and unassignment events, oldest first
    pub assignments: Vec<AuditEvent>,
    /// Status-change and cancellation events, oldest first
    pub status_changes: Vec<AuditEvent>,
}

/// Rank assignment candidates: lightest workload first, then fastest
/// average completion, then most completed cases.
fn rank_candidates(candidates: &mut [Advisor]) {
    candidates.sort_by(|a, b| {
        a.workload()
            .cmp(&b.workload())
            .then(
                a.avg_completion_time_hours
                    .partial_cmp(&b.avg_completion_time_hours)
                    .unwrap_or(Ordering::Equal),
            )
            .then(b.total_completed.cmp(&a.total_completed))
    });
}

/// Central orchestrator for consultation requests and advisor assignment
pub struct ConsultEngine {
    config: ConsultCenterConfig,
    requests: Arc<dyn RequestStore>,
    advisors: Arc<dyn AdvisorStore>,
    registry: AdvisorRegistry,
    stats: StatisticsAggregator,
}

impl ConsultEngine {
    /// Create an engine backed by the configured store: SQLite when a
    /// database path is set, the in-memory store otherwise.
    pub async fn new(config: ConsultCenterConfig) -> Result<Arc<Self>> {
        match config.database.database_path.clone() {
            Some(path) => {
                let url = format!("sqlite://{path}?mode=rwc");
                let store =
                    Arc::new(SqliteStore::connect(&url, config.database.max_connections).await?);
                Ok(Self::with_stores(config, store.clone(), store))
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                Ok(Self::with_stores(config, store.clone(), store))
            }
        }
    }

    /// Wire an engine onto explicit store implementations
    pub fn with_stores(
        config: ConsultCenterConfig,
        requests: Arc<dyn RequestStore>,
        advisors: Arc<dyn AdvisorStore>,
    ) -> Arc<Self> {
        let registry = AdvisorRegistry::new(advisors.clone(), requests.clone());
        let stats = StatisticsAggregator::new(requests.clone(), advisors.clone());
        info!(
            "🏢 Consultation engine ready (service: {})",
            config.general.service_name
        );
        Arc::new(Self {
            config,
            requests,
            advisors,
            registry,
            stats,
        })
    }

    pub fn config(&self) -> &ConsultCenterConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdvisorRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatisticsAggregator {
        &self.stats
    }

    // ========================================================================
    // Consultation request lifecycle
    // ========================================================================

    /// Intake a new consultation request in PENDING state
    pub async fn create_request(&self, new: NewConsultationRequest) -> Result<ConsultationRequest> {
        validation::validate_new_request(&new)?;
        let request = ConsultationRequest::from_intake(new, Utc::now());
        self.requests.insert(request.clone()).await?;
        info!(
            "📋 New consultation request {} ({}) from {}",
            request.id, request.service_type, request.requester_name
        );
        Ok(request)
    }

    pub async fn get_request(&self, id: &RequestId) -> Result<ConsultationRequest> {
        self.requests
            .get(id)
            .await?
            .ok_or_else(|| ConsultError::NotFound(format!("request {id}")).into())
    }

    /// Filtered listing with the status breakdown over the same date range.
    /// The configured page size applies when the filter does not set one.
    pub async fn list_requests(&self, mut filter: RequestFilter) -> Result<RequestPage> {
        if filter.limit.is_none() {
            filter.limit = Some(self.config.assignment.default_page_size);
        }
        let counts = self
            .requests
            .count_by_status(filter.created_from, filter.created_to)
            .await?;
        let (items, total) = self.requests.list(&filter).await?;
        Ok(RequestPage {
            items,
            total,
            counts,
        })
    }

    /// Move a request through the status graph (or past it, when `forced`).
    ///
    /// The first transition into COMPLETED also folds the request's
    /// completion time into the linked advisor's running average.
    pub async fn transition(
        &self,
        id: &RequestId,
        new_status: RequestStatus,
        actor: Option<&str>,
        note: Option<&str>,
        forced: bool,
    ) -> Result<ConsultationRequest> {
        let mut request = self.get_request(id).await?;
        let now = Utc::now();

        let event = lifecycle::apply_transition(&mut request, new_status, actor, note, forced, now)?;
        let Some(outcome) = self
            .requests
            .apply_lifecycle(id, LifecyclePatch::from_request(&request), event)
            .await?
        else {
            return Err(ConsultError::NotFound(format!("request {id}")).into());
        };

        // Only the write that actually stamped `completed_at` credits
        // the advisor; racing duplicates see `first_completion = false`.
        if outcome.first_completion {
            if let Some(advisor_id) = &request.assigned_advisor_id {
                let recorded = self
                    .advisors
                    .record_completion(advisor_id, request.completion_time_hours, now)
                    .await?;
                if !recorded {
                    warn!(
                        request_id = %id, advisor_id = %advisor_id,
                        "completed request linked to a missing advisor; completion not counted"
                    );
                }
            }
        }

        info!("🔄 Request {id} is now {new_status}");
        // Re-read so the caller sees what actually landed, not this
        // writer's local view of a racing update.
        self.get_request(id).await
    }

    /// Cancel a PENDING or PROCESSING request. Advisor counters are left
    /// untouched.
    pub async fn cancel(
        &self,
        id: &RequestId,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<ConsultationRequest> {
        let mut request = self.get_request(id).await?;
        let event = lifecycle::apply_cancel(&mut request, reason, actor, Utc::now())?;
        if self
            .requests
            .apply_lifecycle(id, LifecyclePatch::from_request(&request), event)
            .await?
            .is_none()
        {
            return Err(ConsultError::NotFound(format!("request {id}")).into());
        }
        info!("🚫 Request {id} cancelled: {reason}");
        self.get_request(id).await
    }

    /// Administrative reset of a request's timing stamps and derived
    /// metrics
    pub async fn reset_timing(
        &self,
        id: &RequestId,
        actor: Option<&str>,
        note: Option<&str>,
    ) -> Result<ConsultationRequest> {
        let mut request = self.get_request(id).await?;
        let event = lifecycle::apply_timing_reset(&mut request, actor, note, Utc::now());
        let patch = LifecyclePatch::from_request(&request).clearing_timing();
        if self.requests.apply_lifecycle(id, patch, event).await?.is_none() {
            return Err(ConsultError::NotFound(format!("request {id}")).into());
        }
        info!("🧹 Timing metrics reset on request {id}");
        Ok(request)
    }

    /// Append a free-form administrative note to a request's audit log
    pub async fn append_note(
        &self,
        id: &RequestId,
        note: &str,
        actor: Option<&str>,
    ) -> Result<()> {
        let event = AuditEvent::new(AuditEventKind::Note, Utc::now())
            .with_actor(actor)
            .with_note(Some(note));
        if !self.requests.append_event(id, event).await? {
            return Err(ConsultError::NotFound(format!("request {id}")).into());
        }
        Ok(())
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Manually assign (or reassign) a request to an advisor.
    ///
    /// The linkage write is a compare-and-swap against the advisor link
    /// observed at load time; a concurrent assignment makes this attempt
    /// fail with `AlreadyAssigned` and changes nothing.
    pub async fn assign(
        &self,
        request_id: &RequestId,
        advisor_id: &AdvisorId,
        note: Option<&str>,
        actor: Option<&str>,
    ) -> Result<ConsultationRequest> {
        let request = self.get_request(request_id).await?;
        let advisor = self.registry.get(advisor_id).await?;
        if !advisor.is_active {
            return Err(ConsultError::Inactive(advisor_id.clone()).into());
        }
        if !self.config.assignment.capacity.can_accept(&advisor) {
            return Err(ConsultError::Overloaded(advisor_id.clone()).into());
        }

        let previous = request.assigned_advisor_id.clone();
        let now = Utc::now();
        let mut events = Vec::new();
        if let Some(prev) = &previous {
            events.push(
                AuditEvent::new(
                    AuditEventKind::Unassigned {
                        advisor_id: prev.clone(),
                    },
                    now,
                )
                .with_actor(actor)
                .with_note(Some("reassigned")),
            );
        }
        events.push(
            AuditEvent::new(
                AuditEventKind::Assigned {
                    advisor_id: advisor_id.clone(),
                },
                now,
            )
            .with_actor(actor)
            .with_note(note),
        );

        self.link_and_count(request_id, previous.as_ref(), advisor_id, events)
            .await?;
        info!(
            "🔗 Request {request_id} assigned to advisor {} ({})",
            advisor.name, advisor.id
        );
        self.get_request(request_id).await
    }

    /// Automatically assign an unlinked request to the best-matching
    /// advisor in its region.
    ///
    /// Candidates are active advisors covering the request's region whose
    /// specialties include its service type; they are ranked by workload
    /// tier, then average completion time, then completed-case count, and
    /// the first one the capacity policy accepts wins.
    pub async fn auto_assign(
        &self,
        request_id: &RequestId,
        actor: Option<&str>,
    ) -> Result<ConsultationRequest> {
        let request = self.get_request(request_id).await?;
        if request.assigned_advisor_id.is_some() {
            return Err(ConsultError::AlreadyAssigned.into());
        }
        let region = request.region.ok_or(ConsultError::MissingRegion)?;

        let filter = AdvisorFilter {
            region: Some(region),
            specialty: Some(request.service_type),
            active: Some(true),
            ..Default::default()
        };
        let (mut candidates, _) = self.advisors.search(&filter).await?;
        rank_candidates(&mut candidates);

        let chosen = candidates
            .into_iter()
            .find(|advisor| self.config.assignment.capacity.can_accept(advisor))
            .ok_or(ConsultError::NoAvailableAdvisor)?;

        let now = Utc::now();
        let note = format!("best match in {region} for {}", request.service_type);
        let events = vec![AuditEvent::new(
            AuditEventKind::AutoAssigned {
                advisor_id: chosen.id.clone(),
            },
            now,
        )
        .with_actor(actor)
        .with_note(Some(note.as_str()))];

        self.link_and_count(request_id, None, &chosen.id, events)
            .await?;
        info!(
            "🤖 Request {request_id} auto-assigned to advisor {} ({})",
            chosen.name, chosen.id
        );
        self.get_request(request_id).await
    }

    /// Link the request to `advisor_id` via the store CAS, then move the
    /// counters. Everything after a won CAS is compensated on failure so a
    /// failed attempt leaves no partial state.
    async fn link_and_count(
        &self,
        request_id: &RequestId,
        previous: Option<&AdvisorId>,
        advisor_id: &AdvisorId,
        events: Vec<AuditEvent>,
    ) -> Result<()> {
        let now = Utc::now();
        let linked = self
            .requests
            .try_link_advisor(request_id, previous, advisor_id, now, events)
            .await?;
        if !linked {
            return Err(ConsultError::AlreadyAssigned.into());
        }

        // Reassignment to the same advisor decrements then increments:
        // net zero, as it should be.
        if let Some(prev) = previous {
            if !self.advisors.adjust_assigned(prev, -1, now).await? {
                warn!(
                    advisor_id = %prev,
                    "previous advisor no longer exists; skipping decrement"
                );
            }
        }

        if !self.advisors.adjust_assigned(advisor_id, 1, now).await? {
            // Advisor deleted between the capacity check and the counter
            // write. Roll the linkage back so nothing points at a ghost.
            let rollback = AuditEvent::new(
                AuditEventKind::Unassigned {
                    advisor_id: advisor_id.clone(),
                },
                Utc::now(),
            )
            .with_note(Some("assignment rolled back: advisor no longer exists"));
            if let Err(err) = self.requests.unlink_advisor(request_id, rollback).await {
                warn!(request_id = %request_id, %err, "rollback unlink failed");
            }
            if let Some(prev) = previous {
                let _ = self.advisors.adjust_assigned(prev, 1, now).await;
            }
            return Err(ConsultError::NotFound(format!("advisor {advisor_id}")).into());
        }
        Ok(())
    }

    /// Reconstruct a request's assignment history from its audit log
    pub async fn assignment_history(&self, request_id: &RequestId) -> Result<AssignmentHistory> {
        let request = self.get_request(request_id).await?;

        let current_advisor = match &request.assigned_advisor_id {
            Some(id) => self.advisors.get(id).await?.map(|advisor| advisor.summary()),
            None => None,
        };

        let mut assignments = Vec::new();
        let mut status_changes = Vec::new();
        for event in &request.events {
            match event.kind {
                AuditEventKind::Assigned { .. }
                | AuditEventKind::AutoAssigned { .. }
                | AuditEventKind::Unassigned { .. } => assignments.push(event.clone()),
                AuditEventKind::StatusChanged { .. } | AuditEventKind::Cancelled { .. } => {
                    status_changes.push(event.clone())
                }
                AuditEventKind::TimingReset | AuditEventKind::Note => {}
            }
        }

        Ok(AssignmentHistory {
            current_advisor,
            assignments,
            status_changes,
        })
    }
}
