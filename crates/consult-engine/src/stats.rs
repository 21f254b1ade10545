//! Read-only statistics over the request and advisor stores.
//!
//! Every view is computed fresh from current store state; nothing is
//! rolled up or cached. Statistics are diagnostic, not transactional:
//! a record that cannot be resolved is logged and skipped so one bad row
//! never fails a whole report.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;

use laborline_consult_core::{AdvisorId, AdvisorSummary, Region, WorkloadTier};

use crate::error::Result;
use crate::store::{AdvisorStore, RequestStore, StatusCounts};

/// Status breakdown over an optional creation-date range
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsOverview {
    pub counts: StatusCounts,
    pub total: u64,
}

/// Advisor statistics for one region
#[derive(Debug, Clone, Serialize)]
pub struct RegionStats {
    pub region: Region,
    pub advisor_count: u64,
    /// Weighted by each advisor's completed-case count; 0.0 when the
    /// region has no completions yet
    pub avg_completion_time_hours: f64,
    pub total_completed: u64,
}

/// Advisors grouped into one workload tier
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadBucket {
    pub tier: WorkloadTier,
    pub advisor_count: u64,
    pub members: Vec<AdvisorSummary>,
}

/// One row of the efficiency ranking
#[derive(Debug, Clone, Serialize)]
pub struct EfficiencyEntry {
    pub advisor: AdvisorSummary,
    pub avg_completion_time_hours: f64,
    pub total_completed: u64,
}

/// Per-advisor assignment count for the current calendar month
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyAssignmentEntry {
    pub advisor_id: AdvisorId,
    pub name: String,
    pub assigned_count: u64,
}

/// Midnight UTC on the first of the month. UTC has no gaps or ambiguous
/// instants, so this always resolves.
fn first_of_month(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month at midnight UTC")
}

/// `[start, end)` bounds of the calendar month containing `now`
fn month_range(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (year, month) = (now.year(), now.month());
    let start = first_of_month(year, month);
    let end = if month == 12 {
        first_of_month(year + 1, 1)
    } else {
        first_of_month(year, month + 1)
    };
    (start, end)
}

/// Computes the reporting views over the live stores
pub struct StatisticsAggregator {
    requests: Arc<dyn RequestStore>,
    advisors: Arc<dyn AdvisorStore>,
}

impl StatisticsAggregator {
    pub fn new(requests: Arc<dyn RequestStore>, advisors: Arc<dyn AdvisorStore>) -> Self {
        Self { requests, advisors }
    }

    /// Request counts per status, optionally restricted to a
    /// creation-date range
    pub async fn overview(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<StatsOverview> {
        let counts = self.requests.count_by_status(from, to).await?;
        Ok(StatsOverview {
            counts,
            total: counts.total(),
        })
    }

    /// Advisor count, completion volume and weighted average completion
    /// time per region. Regions with no advisors are omitted.
    pub async fn region_distribution(&self) -> Result<Vec<RegionStats>> {
        let advisors = self.advisors.list_all().await?;

        let mut by_region: BTreeMap<Region, (u64, u64, f64)> = BTreeMap::new();
        for advisor in &advisors {
            let entry = by_region.entry(advisor.region).or_default();
            entry.0 += 1;
            entry.1 += u64::from(advisor.total_completed);
            entry.2 += advisor.avg_completion_time_hours * f64::from(advisor.total_completed);
        }

        Ok(by_region
            .into_iter()
            .map(|(region, (advisor_count, completed, weighted_sum))| RegionStats {
                region,
                advisor_count,
                avg_completion_time_hours: if completed > 0 {
                    weighted_sum / completed as f64
                } else {
                    0.0
                },
                total_completed: completed,
            })
            .collect())
    }

    /// Every advisor bucketed by workload tier. All three tiers are
    /// always present, lightest first.
    pub async fn workload_distribution(&self) -> Result<Vec<WorkloadBucket>> {
        let advisors = self.advisors.list_all().await?;

        let mut buckets: Vec<WorkloadBucket> =
            [WorkloadTier::Light, WorkloadTier::Normal, WorkloadTier::Heavy]
                .into_iter()
                .map(|tier| WorkloadBucket {
                    tier,
                    advisor_count: 0,
                    members: Vec::new(),
                })
                .collect();

        for advisor in &advisors {
            let bucket = &mut buckets[advisor.workload() as usize];
            bucket.advisor_count += 1;
            bucket.members.push(advisor.summary());
        }
        for bucket in &mut buckets {
            bucket.members.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(buckets)
    }

    /// Active advisors with at least one completed case, fastest average
    /// completion first, top `top_n`
    pub async fn efficiency_ranking(&self, top_n: usize) -> Result<Vec<EfficiencyEntry>> {
        let advisors = self.advisors.list_all().await?;

        let mut ranked: Vec<EfficiencyEntry> = advisors
            .into_iter()
            .filter(|advisor| advisor.is_active && advisor.total_completed > 0)
            .map(|advisor| EfficiencyEntry {
                avg_completion_time_hours: advisor.avg_completion_time_hours,
                total_completed: u64::from(advisor.total_completed),
                advisor: advisor.summary(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.avg_completion_time_hours
                .partial_cmp(&b.avg_completion_time_hours)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.total_completed.cmp(&a.total_completed))
        });
        ranked.truncate(top_n);
        Ok(ranked)
    }

    /// Per-advisor counts of requests assigned within the calendar month
    /// containing `now`, busiest first, top `top_n`. Counts pointing at
    /// advisors that no longer exist are skipped with a warning.
    pub async fn monthly_assignments(
        &self,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<MonthlyAssignmentEntry>> {
        let (start, end) = month_range(now);
        let counts = self.requests.assigned_counts_in_range(start, end).await?;

        let mut entries = Vec::with_capacity(counts.len());
        for (advisor_id, assigned_count) in counts {
            match self.advisors.get(&advisor_id).await? {
                Some(advisor) => entries.push(MonthlyAssignmentEntry {
                    advisor_id,
                    name: advisor.name,
                    assigned_count,
                }),
                None => {
                    warn!(advisor_id = %advisor_id, "monthly count for a missing advisor; skipping");
                }
            }
        }

        entries.sort_by(|a, b| {
            b.assigned_count
                .cmp(&a.assigned_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        entries.truncate(top_n);
        Ok(entries)
    }
}
