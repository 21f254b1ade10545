//! In-memory store backed by `DashMap`.
//!
//! Per-entry exclusive access (`get_mut` holds the shard lock) gives the
//! linkage compare-and-swap and the counter updates their atomicity; no
//! further locking is needed. Email uniqueness is enforced through a
//! secondary index keyed by the lowercased address.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

use async_trait::async_trait;
use laborline_consult_core::{
    Advisor, AdvisorFilter, AdvisorId, AuditEvent, AuditEventKind, ConsultError,
    ConsultationRequest, RequestFilter, RequestId, RequestStatus,
};
use tracing::debug;

use crate::error::Result;
use crate::store::{AdvisorStore, LifecycleOutcome, LifecyclePatch, RequestStore, StatusCounts};

/// In-memory request/advisor store
#[derive(Default)]
pub struct MemoryStore {
    requests: DashMap<RequestId, ConsultationRequest>,
    advisors: DashMap<AdvisorId, Advisor>,
    email_index: DashMap<String, AdvisorId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_request(request: &ConsultationRequest, filter: &RequestFilter) -> bool {
    if let Some(status) = filter.status {
        if request.status != status {
            return false;
        }
    }
    if let Some(region) = filter.region {
        if request.region != Some(region) {
            return false;
        }
    }
    if let Some(service_type) = filter.service_type {
        if request.service_type != service_type {
            return false;
        }
    }
    if let Some(advisor) = &filter.assigned_advisor_id {
        if request.assigned_advisor_id.as_ref() != Some(advisor) {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !request.requester_name.to_lowercase().contains(&needle)
            && !request.phone.contains(&needle)
        {
            return false;
        }
    }
    if let Some(from) = filter.created_from {
        if request.created_at < from {
            return false;
        }
    }
    if let Some(to) = filter.created_to {
        if request.created_at >= to {
            return false;
        }
    }
    true
}

fn matches_advisor(advisor: &Advisor, filter: &AdvisorFilter) -> bool {
    if let Some(region) = filter.region {
        if advisor.region != region {
            return false;
        }
    }
    if let Some(specialty) = filter.specialty {
        if !advisor.specialties.contains(&specialty) {
            return false;
        }
    }
    if let Some(active) = filter.active {
        if advisor.is_active != active {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !advisor.name.to_lowercase().contains(&needle)
            && !advisor.phone.contains(&needle)
            && !advisor.email.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

fn paginate<T>(mut items: Vec<T>, limit: Option<u32>, offset: Option<u32>) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let offset = offset.unwrap_or(0) as usize;
    if offset >= items.len() {
        return (Vec::new(), total);
    }
    items.drain(..offset);
    if let Some(limit) = limit {
        items.truncate(limit as usize);
    }
    (items, total)
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert(&self, request: ConsultationRequest) -> Result<()> {
        self.requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get(&self, id: &RequestId) -> Result<Option<ConsultationRequest>> {
        Ok(self.requests.get(id).map(|entry| entry.clone()))
    }

    async fn apply_lifecycle(
        &self,
        id: &RequestId,
        patch: LifecyclePatch,
        event: AuditEvent,
    ) -> Result<Option<LifecycleOutcome>> {
        let Some(mut entry) = self.requests.get_mut(id) else {
            return Ok(None);
        };
        let mut first_completion = false;
        if patch.clear_timing {
            entry.processed_by = patch.processed_by;
            entry.processed_at = patch.processed_at;
            entry.completed_at = patch.completed_at;
            entry.response_time_minutes = patch.response_time_minutes;
            entry.completion_time_hours = patch.completion_time_hours;
        } else {
            // Timing fields are first-writer-wins: a patch built from a
            // stale read must neither clear nor overwrite them.
            if entry.processed_at.is_none() {
                entry.processed_by = patch.processed_by;
                entry.processed_at = patch.processed_at;
                entry.response_time_minutes = patch.response_time_minutes;
            }
            if entry.completed_at.is_none() {
                if let Some(completed_at) = patch.completed_at {
                    entry.completed_at = Some(completed_at);
                    entry.completion_time_hours = patch.completion_time_hours;
                    first_completion = true;
                }
            }
        }
        entry.status = patch.status;
        entry.updated_at = patch.updated_at;
        entry.events.push(event);
        Ok(Some(LifecycleOutcome { first_completion }))
    }

    async fn append_event(&self, id: &RequestId, event: AuditEvent) -> Result<bool> {
        let Some(mut entry) = self.requests.get_mut(id) else {
            return Ok(false);
        };
        entry.events.push(event);
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
        let Some(mut entry) = self.requests.get_mut(id) else {
            return Ok(false);
        };
        if entry.assigned_advisor_id.as_ref() != expected {
            debug!(request_id = %id, "linkage CAS lost: advisor changed underneath");
            return Ok(false);
        }
        entry.assigned_advisor_id = Some(advisor.clone());
        entry.assigned_at = Some(assigned_at);
        entry.updated_at = assigned_at;
        entry.events.extend(events);
        Ok(true)
    }

    async fn unlink_advisor(&self, id: &RequestId, event: AuditEvent) -> Result<bool> {
        let Some(mut entry) = self.requests.get_mut(id) else {
            return Ok(false);
        };
        entry.assigned_advisor_id = None;
        entry.updated_at = event.timestamp;
        entry.events.push(event);
        Ok(true)
    }

    async fn list(&self, filter: &RequestFilter) -> Result<(Vec<ConsultationRequest>, u64)> {
        let mut matched: Vec<ConsultationRequest> = self
            .requests
            .iter()
            .filter(|entry| matches_request(entry.value(), filter))
            .map(|entry| entry.clone())
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matched, filter.limit, filter.offset))
    }

    async fn count_by_status(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for entry in self.requests.iter() {
            if let Some(from) = from {
                if entry.created_at < from {
                    continue;
                }
            }
            if let Some(to) = to {
                if entry.created_at >= to {
                    continue;
                }
            }
            counts.bump(entry.status);
        }
        Ok(counts)
    }

    async fn count_active_for(&self, advisor: &AdvisorId) -> Result<u64> {
        let count = self
            .requests
            .iter()
            .filter(|entry| {
                entry.assigned_advisor_id.as_ref() == Some(advisor)
                    && matches!(
                        entry.status,
                        RequestStatus::Pending | RequestStatus::Processing
                    )
            })
            .count();
        Ok(count as u64)
    }

    async fn sever_advisor(
        &self,
        advisor: &AdvisorId,
        now: DateTime<Utc>,
        note: &str,
    ) -> Result<u64> {
        let ids: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|entry| entry.assigned_advisor_id.as_ref() == Some(advisor))
            .map(|entry| entry.key().clone())
            .collect();

        let mut severed = 0;
        for id in ids {
            if let Some(mut entry) = self.requests.get_mut(&id) {
                if entry.assigned_advisor_id.as_ref() != Some(advisor) {
                    continue;
                }
                entry.assigned_advisor_id = None;
                entry.updated_at = now;
                entry.events.push(
                    AuditEvent::new(
                        AuditEventKind::Unassigned {
                            advisor_id: advisor.clone(),
                        },
                        now,
                    )
                    .with_note(Some(note)),
                );
                severed += 1;
            }
        }
        Ok(severed)
    }

    async fn assigned_counts_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(AdvisorId, u64)>> {
        let mut counts: HashMap<AdvisorId, u64> = HashMap::new();
        for entry in self.requests.iter() {
            let (Some(advisor), Some(assigned_at)) =
                (&entry.assigned_advisor_id, entry.assigned_at)
            else {
                continue;
            };
            if assigned_at >= from && assigned_at < to {
                *counts.entry(advisor.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait]
impl AdvisorStore for MemoryStore {
    async fn insert(&self, advisor: Advisor) -> Result<()> {
        let email_key = advisor.email.to_lowercase();
        match self.email_index.entry(email_key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ConsultError::DuplicateContact.into());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(advisor.id.clone());
            }
        }
        self.advisors.insert(advisor.id.clone(), advisor);
        Ok(())
    }

    async fn get(&self, id: &AdvisorId) -> Result<Option<Advisor>> {
        Ok(self.advisors.get(id).map(|entry| entry.clone()))
    }

    async fn update_profile(&self, advisor: &Advisor) -> Result<()> {
        let email_key = advisor.email.to_lowercase();
        // Claim the new address through the index entry first, so two
        // racing updates cannot both pass the uniqueness check.
        let claimed = match self.email_index.entry(email_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(slot) => {
                if *slot.get() != advisor.id {
                    return Err(ConsultError::DuplicateContact.into());
                }
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(advisor.id.clone());
                true
            }
        };

        let Some(mut entry) = self.advisors.get_mut(&advisor.id) else {
            if claimed {
                self.email_index.remove(&email_key);
            }
            return Err(ConsultError::NotFound(format!("advisor {}", advisor.id)).into());
        };

        let old_email_key = entry.email.to_lowercase();
        if old_email_key != email_key {
            self.email_index.remove(&old_email_key);
        }

        entry.name = advisor.name.clone();
        entry.phone = advisor.phone.clone();
        entry.email = advisor.email.clone();
        entry.messenger = advisor.messenger.clone();
        entry.region = advisor.region;
        entry.notes = advisor.notes.clone();
        entry.specialties = advisor.specialties.clone();
        entry.is_active = advisor.is_active;
        entry.updated_at = advisor.updated_at;
        Ok(())
    }

    async fn set_active(&self, id: &AdvisorId, active: bool, now: DateTime<Utc>) -> Result<bool> {
        let Some(mut entry) = self.advisors.get_mut(id) else {
            return Ok(false);
        };
        entry.is_active = active;
        entry.updated_at = now;
        Ok(true)
    }

    async fn delete(&self, id: &AdvisorId) -> Result<bool> {
        let Some((_, advisor)) = self.advisors.remove(id) else {
            return Ok(false);
        };
        self.email_index.remove(&advisor.email.to_lowercase());
        Ok(true)
    }

    async fn adjust_assigned(&self, id: &AdvisorId, delta: i64, now: DateTime<Utc>) -> Result<bool> {
        let Some(mut entry) = self.advisors.get_mut(id) else {
            return Ok(false);
        };
        entry.total_assigned = (entry.total_assigned as i64 + delta).max(0) as u32;
        entry.updated_at = now;
        Ok(true)
    }

    async fn record_completion(
        &self,
        id: &AdvisorId,
        hours: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut entry) = self.advisors.get_mut(id) else {
            return Ok(false);
        };
        if let Some(hours) = hours {
            // Only completions with a known duration feed the average;
            // the others must not dilute it.
            let timed = entry.timed_completions as f64;
            entry.avg_completion_time_hours =
                (entry.avg_completion_time_hours * timed + hours) / (timed + 1.0);
            entry.timed_completions += 1;
        }
        entry.total_completed += 1;
        entry.updated_at = now;
        Ok(true)
    }

    async fn search(&self, filter: &AdvisorFilter) -> Result<(Vec<Advisor>, u64)> {
        let mut matched: Vec<Advisor> = self
            .advisors
            .iter()
            .filter(|entry| matches_advisor(entry.value(), filter))
            .map(|entry| entry.clone())
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matched, filter.limit, filter.offset))
    }

    async fn list_all(&self) -> Result<Vec<Advisor>> {
        Ok(self.advisors.iter().map(|entry| entry.clone()).collect())
    }
}
