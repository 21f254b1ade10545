//! Core types for the consultation platform

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workload::WorkloadTier;

/// Opaque consultation request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a fresh request id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque advisor identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdvisorId(pub String);

impl AdvisorId {
    /// Generate a fresh advisor id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for AdvisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consultation category; advisors declare specialties from the same set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Contract,
    Compensation,
    Termination,
    WorkplaceSafety,
    Discrimination,
    Other,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Contract => "contract",
            ServiceCategory::Compensation => "compensation",
            ServiceCategory::Termination => "termination",
            ServiceCategory::WorkplaceSafety => "workplace_safety",
            ServiceCategory::Discrimination => "discrimination",
            ServiceCategory::Other => "other",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contract" => Ok(ServiceCategory::Contract),
            "compensation" => Ok(ServiceCategory::Compensation),
            "termination" => Ok(ServiceCategory::Termination),
            "workplace_safety" => Ok(ServiceCategory::WorkplaceSafety),
            "discrimination" => Ok(ServiceCategory::Discrimination),
            "other" => Ok(ServiceCategory::Other),
            other => Err(format!("unknown service category: {other}")),
        }
    }
}

/// Advisor coverage region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Seoul,
    Gyeonggi,
    Incheon,
    Busan,
    Daegu,
    Gwangju,
    Daejeon,
    Other,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Seoul => "seoul",
            Region::Gyeonggi => "gyeonggi",
            Region::Incheon => "incheon",
            Region::Busan => "busan",
            Region::Daegu => "daegu",
            Region::Gwangju => "gwangju",
            Region::Daejeon => "daejeon",
            Region::Other => "other",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seoul" => Ok(Region::Seoul),
            "gyeonggi" => Ok(Region::Gyeonggi),
            "incheon" => Ok(Region::Incheon),
            "busan" => Ok(Region::Busan),
            "daegu" => Ok(Region::Daegu),
            "gwangju" => Ok(Region::Gwangju),
            "daejeon" => Ok(Region::Daejeon),
            "other" => Ok(Region::Other),
            other => Err(format!("unknown region: {other}")),
        }
    }
}

/// Consultation request lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable from this one without the forced path
    pub fn allowed_next(&self) -> &'static [RequestStatus] {
        match self {
            RequestStatus::Pending => &[RequestStatus::Processing, RequestStatus::Cancelled],
            RequestStatus::Processing => &[RequestStatus::Completed, RequestStatus::Cancelled],
            RequestStatus::Completed | RequestStatus::Cancelled => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// How the requester prefers to be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Phone,
    Email,
    Messenger,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactMethod::Phone => "phone",
            ContactMethod::Email => "email",
            ContactMethod::Messenger => "messenger",
        }
    }
}

impl fmt::Display for ContactMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a request's append-only audit log.
///
/// The audit log is the source of truth for assignment and status history;
/// human-readable notes are rendered from it, never parsed back out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AuditEventKind,
    pub actor: Option<String>,
    pub note: Option<String>,
}

/// What happened, as structured data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Manual assignment to an advisor
    Assigned { advisor_id: AdvisorId },
    /// Automatic best-match assignment
    AutoAssigned { advisor_id: AdvisorId },
    /// Advisor link removed (reassignment or advisor deletion)
    Unassigned { advisor_id: AdvisorId },
    /// Status moved through (or past, when forced) the transition graph
    StatusChanged {
        from: RequestStatus,
        to: RequestStatus,
        forced: bool,
    },
    /// Request cancelled with a reason
    Cancelled { reason: String },
    /// Administrative reset of timing metrics
    TimingReset,
    /// Free-form administrative note
    Note,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind,
            actor: None,
            note: None,
        }
    }

    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    pub fn with_note(mut self, note: Option<&str>) -> Self {
        self.note = note.map(str::to_string);
        self
    }

    /// Render the event as a single human-readable line.
    ///
    /// This is a view over the structured data; nothing ever parses these
    /// strings back.
    pub fn render(&self) -> String {
        let body = match &self.kind {
            AuditEventKind::Assigned { advisor_id } => {
                format!("assigned to advisor {advisor_id}")
            }
            AuditEventKind::AutoAssigned { advisor_id } => {
                format!("auto-assigned to advisor {advisor_id}")
            }
            AuditEventKind::Unassigned { advisor_id } => {
                format!("unassigned from advisor {advisor_id}")
            }
            AuditEventKind::StatusChanged { from, to, forced } => {
                if *forced {
                    format!("[forced] status changed from {from} to {to}")
                } else {
                    format!("status changed from {from} to {to}")
                }
            }
            AuditEventKind::Cancelled { reason } => format!("cancelled: {reason}"),
            AuditEventKind::TimingReset => "timing metrics reset".to_string(),
            AuditEventKind::Note => "note".to_string(),
        };

        let mut line = format!("{} {body}", self.timestamp.format("%Y-%m-%d %H:%M:%S"));
        if let Some(actor) = &self.actor {
            line.push_str(&format!(" (by {actor})"));
        }
        if let Some(note) = &self.note {
            line.push_str(&format!(" - {note}"));
        }
        line
    }
}

/// A labor-law consultation request and its full lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationRequest {
    pub id: RequestId,
    pub requester_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub messenger: Option<String>,
    pub details: String,
    pub contact_methods: BTreeSet<ContactMethod>,
    pub preferred_time: Option<String>,
    pub region: Option<Region>,
    pub service_type: ServiceCategory,
    pub status: RequestStatus,
    /// Weak reference; the advisor registry owns the advisor's lifetime
    pub assigned_advisor_id: Option<AdvisorId>,
    /// Set on every successful assignment; basis for monthly statistics
    pub assigned_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Minutes from creation to first processing action; set at most once
    pub response_time_minutes: Option<i64>,
    /// Hours from first processing to completion; set at most once
    pub completion_time_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only audit log
    pub events: Vec<AuditEvent>,
}

impl ConsultationRequest {
    /// Build a fresh PENDING request from validated intake fields
    pub fn from_intake(intake: NewConsultationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: RequestId::generate(),
            requester_name: intake.requester_name,
            phone: intake.phone,
            email: intake.email,
            messenger: intake.messenger,
            details: intake.details,
            contact_methods: intake.contact_methods,
            preferred_time: intake.preferred_time,
            region: intake.region,
            service_type: intake.service_type,
            status: RequestStatus::Pending,
            assigned_advisor_id: None,
            assigned_at: None,
            processed_by: None,
            processed_at: None,
            completed_at: None,
            response_time_minutes: None,
            completion_time_hours: None,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        }
    }

    /// Render the audit log as human-readable lines, oldest first
    pub fn audit_notes(&self) -> Vec<String> {
        self.events.iter().map(AuditEvent::render).collect()
    }
}

/// Intake payload for a new consultation request
#[derive(Debug, Clone, Deserialize)]
pub struct NewConsultationRequest {
    pub requester_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub messenger: Option<String>,
    pub details: String,
    pub contact_methods: BTreeSet<ContactMethod>,
    pub preferred_time: Option<String>,
    pub region: Option<Region>,
    pub service_type: ServiceCategory,
}

/// A human labor-law consultant available for assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisor {
    pub id: AdvisorId,
    pub name: String,
    pub phone: String,
    /// Globally unique across advisors
    pub email: String,
    pub messenger: Option<String>,
    pub region: Region,
    pub notes: String,
    /// Non-empty; drawn from the same categories as request service types
    pub specialties: BTreeSet<ServiceCategory>,
    pub is_active: bool,
    pub total_assigned: u32,
    pub total_completed: u32,
    /// Completions with a known duration; the weight behind the running
    /// average, since duration-less completions do not feed it
    pub timed_completions: u32,
    /// Running average over completions with a known duration
    pub avg_completion_time_hours: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Advisor {
    /// Build a fresh active advisor from validated fields
    pub fn from_new(new: NewAdvisor, now: DateTime<Utc>) -> Self {
        Self {
            id: AdvisorId::generate(),
            name: new.name,
            phone: new.phone,
            email: new.email,
            messenger: new.messenger,
            region: new.region,
            notes: new.notes.unwrap_or_default(),
            specialties: new.specialties,
            is_active: true,
            total_assigned: 0,
            total_completed: 0,
            timed_completions: 0,
            avg_completion_time_hours: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Workload tier, always derived from the assigned-case count.
    /// Never stored, so it cannot drift from `total_assigned`.
    pub fn workload(&self) -> WorkloadTier {
        WorkloadTier::classify(self.total_assigned)
    }

    pub fn summary(&self) -> AdvisorSummary {
        AdvisorSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            region: self.region,
            workload: self.workload(),
        }
    }
}

/// Lightweight advisor view for statistics and history output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorSummary {
    pub id: AdvisorId,
    pub name: String,
    pub region: Region,
    pub workload: WorkloadTier,
}

/// Payload for creating an advisor
#[derive(Debug, Clone, Deserialize)]
pub struct NewAdvisor {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub messenger: Option<String>,
    pub region: Region,
    pub notes: Option<String>,
    pub specialties: BTreeSet<ServiceCategory>,
}

/// Payload for updating an advisor; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAdvisor {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub messenger: Option<Option<String>>,
    pub region: Option<Region>,
    pub notes: Option<String>,
    pub specialties: Option<BTreeSet<ServiceCategory>>,
}

/// Filter for advisor search; most-recent-first unless stated otherwise
#[derive(Debug, Clone, Default)]
pub struct AdvisorFilter {
    pub region: Option<Region>,
    pub specialty: Option<ServiceCategory>,
    pub active: Option<bool>,
    /// Substring match over name, phone and email
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Filter for consultation request listings
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub region: Option<Region>,
    pub service_type: Option<ServiceCategory>,
    pub assigned_advisor_id: Option<AdvisorId>,
    /// Substring match over requester name and phone
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
