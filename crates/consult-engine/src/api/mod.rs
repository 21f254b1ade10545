//! Role-scoped facades over the engine.
//!
//! Transport layers (an HTTP gateway, an ops CLI) hold one of these
//! instead of the engine itself, so each role only sees the operations it
//! is allowed to perform. Both are cheap to clone.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use laborline_consult_core::{
    Advisor, AdvisorFilter, AdvisorId, ConsultationRequest, NewAdvisor, NewConsultationRequest,
    RequestFilter, RequestId, RequestStatus, UpdateAdvisor,
};

use crate::engine::{AssignmentHistory, ConsultEngine, RequestPage};
use crate::error::Result;
use crate::stats::{
    EfficiencyEntry, MonthlyAssignmentEntry, RegionStats, StatsOverview, WorkloadBucket,
};

/// Administrative operations: advisor management and request correction
#[derive(Clone)]
pub struct AdminApi {
    engine: Arc<ConsultEngine>,
}

impl AdminApi {
    pub fn new(engine: Arc<ConsultEngine>) -> Self {
        Self { engine }
    }

    // Advisor management

    pub async fn create_advisor(&self, new: NewAdvisor) -> Result<Advisor> {
        self.engine.registry().create(new).await
    }

    pub async fn update_advisor(&self, id: &AdvisorId, update: UpdateAdvisor) -> Result<Advisor> {
        self.engine.registry().update(id, update).await
    }

    pub async fn set_advisor_active(&self, id: &AdvisorId, active: bool) -> Result<Advisor> {
        self.engine.registry().set_active(id, active).await
    }

    /// Delete an advisor with no active assignments; returns the number
    /// of historical links severed
    pub async fn delete_advisor(&self, id: &AdvisorId) -> Result<u64> {
        self.engine.registry().delete(id).await
    }

    // Request correction

    /// Status change, including the forced path past terminal states
    pub async fn update_request_status(
        &self,
        id: &RequestId,
        new_status: RequestStatus,
        actor: Option<&str>,
        note: Option<&str>,
        forced: bool,
    ) -> Result<ConsultationRequest> {
        self.engine
            .transition(id, new_status, actor, note, forced)
            .await
    }

    pub async fn cancel_request(
        &self,
        id: &RequestId,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<ConsultationRequest> {
        self.engine.cancel(id, reason, actor).await
    }

    pub async fn reset_request_timing(
        &self,
        id: &RequestId,
        actor: Option<&str>,
        note: Option<&str>,
    ) -> Result<ConsultationRequest> {
        self.engine.reset_timing(id, actor, note).await
    }

    pub async fn add_request_note(
        &self,
        id: &RequestId,
        note: &str,
        actor: Option<&str>,
    ) -> Result<()> {
        self.engine.append_note(id, note, actor).await
    }
}

/// Supervisor operations: intake, assignment and reporting
#[derive(Clone)]
pub struct SupervisorApi {
    engine: Arc<ConsultEngine>,
}

impl SupervisorApi {
    pub fn new(engine: Arc<ConsultEngine>) -> Self {
        Self { engine }
    }

    // Intake and lifecycle

    pub async fn create_request(&self, new: NewConsultationRequest) -> Result<ConsultationRequest> {
        self.engine.create_request(new).await
    }

    pub async fn get_request(&self, id: &RequestId) -> Result<ConsultationRequest> {
        self.engine.get_request(id).await
    }

    pub async fn list_requests(&self, filter: RequestFilter) -> Result<RequestPage> {
        self.engine.list_requests(filter).await
    }

    pub async fn update_request_status(
        &self,
        id: &RequestId,
        new_status: RequestStatus,
        actor: Option<&str>,
        note: Option<&str>,
    ) -> Result<ConsultationRequest> {
        // Supervisors never bypass the transition graph
        self.engine.transition(id, new_status, actor, note, false).await
    }

    // Assignment

    pub async fn assign(
        &self,
        request_id: &RequestId,
        advisor_id: &AdvisorId,
        note: Option<&str>,
        actor: Option<&str>,
    ) -> Result<ConsultationRequest> {
        self.engine.assign(request_id, advisor_id, note, actor).await
    }

    pub async fn auto_assign(
        &self,
        request_id: &RequestId,
        actor: Option<&str>,
    ) -> Result<ConsultationRequest> {
        self.engine.auto_assign(request_id, actor).await
    }

    pub async fn assignment_history(&self, request_id: &RequestId) -> Result<AssignmentHistory> {
        self.engine.assignment_history(request_id).await
    }

    pub async fn search_advisors(&self, filter: &AdvisorFilter) -> Result<(Vec<Advisor>, u64)> {
        self.engine.registry().search(filter).await
    }

    // Reporting

    pub async fn statistics_overview(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<StatsOverview> {
        self.engine.stats().overview(from, to).await
    }

    pub async fn region_distribution(&self) -> Result<Vec<RegionStats>> {
        self.engine.stats().region_distribution().await
    }

    pub async fn workload_distribution(&self) -> Result<Vec<WorkloadBucket>> {
        self.engine.stats().workload_distribution().await
    }

    pub async fn efficiency_ranking(&self) -> Result<Vec<EfficiencyEntry>> {
        let top_n = self.engine.config().assignment.ranking_top_n;
        self.engine.stats().efficiency_ranking(top_n).await
    }

    pub async fn monthly_assignments(&self) -> Result<Vec<MonthlyAssignmentEntry>> {
        let top_n = self.engine.config().assignment.ranking_top_n;
        self.engine.stats().monthly_assignments(top_n, Utc::now()).await
    }
}
