//! Workload classification and the capacity policy gating new assignments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Advisor;

/// Derived classification of an advisor's current case count.
///
/// Ordered: `Light < Normal < Heavy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadTier {
    Light,
    Normal,
    Heavy,
}

impl WorkloadTier {
    /// Upper bound of the light tier (inclusive)
    pub const LIGHT_MAX: u32 = 5;
    /// Upper bound of the normal tier (inclusive)
    pub const NORMAL_MAX: u32 = 15;

    /// Classify an assigned-case count. Pure and stateless; callers
    /// recompute it whenever the count changes.
    pub fn classify(total_assigned: u32) -> Self {
        if total_assigned <= Self::LIGHT_MAX {
            WorkloadTier::Light
        } else if total_assigned <= Self::NORMAL_MAX {
            WorkloadTier::Normal
        } else {
            WorkloadTier::Heavy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadTier::Light => "light",
            WorkloadTier::Normal => "normal",
            WorkloadTier::Heavy => "heavy",
        }
    }
}

impl fmt::Display for WorkloadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rule deciding whether an advisor can take another case.
///
/// The cutoff is a configurable policy, not a hard-coded business rule:
/// the default admits everyone below the heavy tier, and `max_cases` can
/// impose an absolute ceiling on top of that.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityPolicy {
    /// Highest tier still allowed to receive new cases
    pub max_tier: WorkloadTier,
    /// Optional absolute cap on assigned cases
    pub max_cases: Option<u32>,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            max_tier: WorkloadTier::Normal,
            max_cases: None,
        }
    }
}

impl CapacityPolicy {
    /// Predicate gating automatic (and manual) assignment
    pub fn can_accept(&self, advisor: &Advisor) -> bool {
        if advisor.workload() > self.max_tier {
            return false;
        }
        match self.max_cases {
            Some(cap) => advisor.total_assigned < cap,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdvisorId, Region, ServiceCategory};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn advisor_with_load(total_assigned: u32) -> Advisor {
        let now = Utc::now();
        Advisor {
            id: AdvisorId("adv-1".into()),
            name: "Test Advisor".into(),
            phone: "010-0000-0000".into(),
            email: "advisor@example.com".into(),
            messenger: None,
            region: Region::Seoul,
            notes: String::new(),
            specialties: BTreeSet::from([ServiceCategory::Contract]),
            is_active: true,
            total_assigned,
            total_completed: 0,
            timed_completions: 0,
            avg_completion_time_hours: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn classify_tier_boundaries() {
        assert_eq!(WorkloadTier::classify(0), WorkloadTier::Light);
        assert_eq!(WorkloadTier::classify(5), WorkloadTier::Light);
        assert_eq!(WorkloadTier::classify(6), WorkloadTier::Normal);
        assert_eq!(WorkloadTier::classify(15), WorkloadTier::Normal);
        assert_eq!(WorkloadTier::classify(16), WorkloadTier::Heavy);
        assert_eq!(WorkloadTier::classify(100), WorkloadTier::Heavy);
    }

    #[test]
    fn workload_always_matches_count() {
        for count in [0, 3, 5, 6, 12, 15, 16, 40] {
            let advisor = advisor_with_load(count);
            assert_eq!(advisor.workload(), WorkloadTier::classify(count));
        }
    }

    #[test]
    fn default_policy_rejects_only_heavy() {
        let policy = CapacityPolicy::default();
        assert!(policy.can_accept(&advisor_with_load(0)));
        assert!(policy.can_accept(&advisor_with_load(15)));
        assert!(!policy.can_accept(&advisor_with_load(16)));
    }

    #[test]
    fn absolute_cap_tightens_policy() {
        let policy = CapacityPolicy {
            max_tier: WorkloadTier::Normal,
            max_cases: Some(10),
        };
        assert!(policy.can_accept(&advisor_with_load(9)));
        assert!(!policy.can_accept(&advisor_with_load(10)));
    }
}
