//! Consultation request state machine.
//!
//! Transition graph:
//!
//! ```text
//!   PENDING ──► PROCESSING ──► COMPLETED
//!      │             │
//!      └──────►──────┴──────►  CANCELLED
//! ```
//!
//! Nothing leaves a terminal state except the explicit forced path, and
//! every forced change is marked as such in the audit log. Timing metrics
//! (`response_time_minutes`, `completion_time_hours`) are derived once and
//! never recomputed; re-entering the current status is a no-op on them.
//!
//! All operations take the current instant as a parameter so the engine can
//! inject `Utc::now()` while tests inject fixed clocks.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{ConsultError, Result};
use crate::types::{AuditEvent, AuditEventKind, ConsultationRequest, RequestStatus};

/// Round a duration to whole minutes
fn round_minutes(seconds: i64) -> i64 {
    (seconds as f64 / 60.0).round() as i64
}

/// Round hours to one decimal place
fn round_hours_1dp(seconds: i64) -> f64 {
    (seconds as f64 / 3600.0 * 10.0).round() / 10.0
}

/// Move a request to `new_status`.
///
/// Without `forced` the change must follow the transition graph; a
/// same-status call is always permitted and never touches timing metrics.
/// The first call carrying an actor stamps `processed_by`/`processed_at`
/// and derives the response time, exactly once per request. Completion
/// stamps `completed_at` once and, when processing has been recorded,
/// derives the completion time.
///
/// Returns the audit event appended to the request's log so callers can
/// persist the delta alongside the field changes.
pub fn apply_transition(
    request: &mut ConsultationRequest,
    new_status: RequestStatus,
    actor: Option<&str>,
    note: Option<&str>,
    forced: bool,
    now: DateTime<Utc>,
) -> Result<AuditEvent> {
    let from = request.status;

    let permitted = new_status == from || from.allowed_next().contains(&new_status);
    if !permitted && !forced {
        return Err(ConsultError::InvalidTransition {
            from,
            to: new_status,
        });
    }

    // First processing action, regardless of which status change carries it
    if let Some(actor) = actor {
        if request.processed_at.is_none() {
            request.processed_by = Some(actor.to_string());
            request.processed_at = Some(now);
            let elapsed = (now - request.created_at).num_seconds();
            request.response_time_minutes = Some(round_minutes(elapsed));
            debug!(
                request_id = %request.id,
                response_time_minutes = request.response_time_minutes,
                "first processing action recorded"
            );
        }
    }

    if new_status == RequestStatus::Completed && request.completed_at.is_none() {
        request.completed_at = Some(now);
        if let Some(processed_at) = request.processed_at {
            let elapsed = (now - processed_at).num_seconds();
            request.completion_time_hours = Some(round_hours_1dp(elapsed));
        }
    }

    request.status = new_status;
    request.updated_at = now;

    let event = AuditEvent::new(
        AuditEventKind::StatusChanged {
            from,
            to: new_status,
            forced,
        },
        now,
    )
    .with_actor(actor)
    .with_note(note);
    request.events.push(event.clone());

    Ok(event)
}

/// Cancel a request with a reason. Permitted only from PENDING or
/// PROCESSING; advisor counters are never touched by cancellation.
pub fn apply_cancel(
    request: &mut ConsultationRequest,
    reason: &str,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuditEvent> {
    if !matches!(
        request.status,
        RequestStatus::Pending | RequestStatus::Processing
    ) {
        return Err(ConsultError::InvalidState(request.status));
    }

    request.status = RequestStatus::Cancelled;
    request.updated_at = now;

    let event = AuditEvent::new(
        AuditEventKind::Cancelled {
            reason: reason.to_string(),
        },
        now,
    )
    .with_actor(actor);
    request.events.push(event.clone());

    Ok(event)
}

/// Explicit administrative reset of the processing/completion stamps and
/// their derived metrics. This is the only way they are ever cleared.
pub fn apply_timing_reset(
    request: &mut ConsultationRequest,
    actor: Option<&str>,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> AuditEvent {
    request.processed_by = None;
    request.processed_at = None;
    request.completed_at = None;
    request.response_time_minutes = None;
    request.completion_time_hours = None;
    request.updated_at = now;

    let event = AuditEvent::new(AuditEventKind::TimingReset, now)
        .with_actor(actor)
        .with_note(note);
    request.events.push(event.clone());
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContactMethod, NewConsultationRequest, Region, ServiceCategory};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;

    fn request_created_at(created: DateTime<Utc>) -> ConsultationRequest {
        ConsultationRequest::from_intake(
            NewConsultationRequest {
                requester_name: "Kim Min-ji".into(),
                phone: "010-1234-5678".into(),
                email: Some("minji@example.com".into()),
                messenger: None,
                details: "Unpaid overtime for three months".into(),
                contact_methods: BTreeSet::from([ContactMethod::Phone]),
                preferred_time: None,
                region: Some(Region::Seoul),
                service_type: ServiceCategory::Compensation,
            },
            created,
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap()
    }

    #[test]
    fn response_and_completion_metrics() {
        // Created 30 minutes before first processing, completed 2h after.
        let created = t0() - Duration::minutes(30);
        let mut request = request_created_at(created);

        apply_transition(
            &mut request,
            RequestStatus::Processing,
            Some("operator-1"),
            None,
            false,
            t0(),
        )
        .unwrap();

        assert_eq!(request.status, RequestStatus::Processing);
        assert_eq!(request.processed_by.as_deref(), Some("operator-1"));
        assert_eq!(request.response_time_minutes, Some(30));
        assert!(request.completed_at.is_none());

        let completion = t0() + Duration::hours(2);
        apply_transition(
            &mut request,
            RequestStatus::Completed,
            Some("operator-1"),
            None,
            false,
            completion,
        )
        .unwrap();

        assert_eq!(request.status, RequestStatus::Completed);
        assert_eq!(request.completed_at, Some(completion));
        assert_eq!(request.completion_time_hours, Some(2.0));
    }

    #[test]
    fn metrics_set_at_most_once() {
        let created = t0() - Duration::minutes(10);
        let mut request = request_created_at(created);

        apply_transition(
            &mut request,
            RequestStatus::Processing,
            Some("operator-1"),
            None,
            false,
            t0(),
        )
        .unwrap();
        let first_processed_at = request.processed_at;
        let first_response = request.response_time_minutes;

        // Same-status call an hour later: permitted, but a no-op on metrics.
        apply_transition(
            &mut request,
            RequestStatus::Processing,
            Some("operator-2"),
            Some("second look"),
            false,
            t0() + Duration::hours(1),
        )
        .unwrap();

        assert_eq!(request.processed_at, first_processed_at);
        assert_eq!(request.processed_by.as_deref(), Some("operator-1"));
        assert_eq!(request.response_time_minutes, first_response);
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mut request = request_created_at(t0());

        let err = apply_transition(
            &mut request,
            RequestStatus::Completed,
            None,
            None,
            false,
            t0(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConsultError::InvalidTransition {
                from: RequestStatus::Pending,
                to: RequestStatus::Completed,
            }
        );
        // Failed transition left the record untouched
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.events.is_empty());
    }

    #[test]
    fn forced_path_escapes_terminal_state_with_marker() {
        let mut request = request_created_at(t0());
        apply_transition(
            &mut request,
            RequestStatus::Processing,
            Some("operator-1"),
            None,
            false,
            t0(),
        )
        .unwrap();
        apply_transition(
            &mut request,
            RequestStatus::Completed,
            None,
            None,
            false,
            t0() + Duration::hours(1),
        )
        .unwrap();

        // Out of COMPLETED only via force
        let err = apply_transition(
            &mut request,
            RequestStatus::Processing,
            None,
            None,
            false,
            t0() + Duration::hours(2),
        )
        .unwrap_err();
        assert!(matches!(err, ConsultError::InvalidTransition { .. }));

        let event = apply_transition(
            &mut request,
            RequestStatus::Processing,
            Some("admin-1"),
            Some("correction"),
            true,
            t0() + Duration::hours(2),
        )
        .unwrap();
        assert!(event.render().contains("[forced]"));
        assert_eq!(request.status, RequestStatus::Processing);
        // The one-shot metrics survive the forced reopen
        assert!(request.completed_at.is_some());
        assert!(request.completion_time_hours.is_some());
    }

    #[test]
    fn cancel_only_from_pending_or_processing() {
        let mut request = request_created_at(t0());
        apply_cancel(&mut request, "duplicate request", None, t0()).unwrap();
        assert_eq!(request.status, RequestStatus::Cancelled);
        assert!(request
            .audit_notes()
            .iter()
            .any(|line| line.contains("duplicate request")));

        let err = apply_cancel(&mut request, "again", None, t0()).unwrap_err();
        assert_eq!(err, ConsultError::InvalidState(RequestStatus::Cancelled));
    }

    #[test]
    fn timing_reset_clears_metrics_and_logs() {
        let mut request = request_created_at(t0());
        apply_transition(
            &mut request,
            RequestStatus::Processing,
            Some("operator-1"),
            None,
            false,
            t0() + Duration::minutes(5),
        )
        .unwrap();
        assert!(request.processed_at.is_some());

        apply_timing_reset(
            &mut request,
            Some("admin-1"),
            Some("entered against wrong ticket"),
            t0() + Duration::hours(1),
        );
        assert!(request.processed_at.is_none());
        assert!(request.processed_by.is_none());
        assert!(request.response_time_minutes.is_none());
        assert!(request
            .audit_notes()
            .iter()
            .any(|line| line.contains("timing metrics reset")));
    }

    #[test]
    fn rounding_of_metrics() {
        // 29m40s rounds to 30 minutes; 1h51m rounds to 1.9 hours.
        let created = t0() - Duration::seconds(29 * 60 + 40);
        let mut request = request_created_at(created);
        apply_transition(
            &mut request,
            RequestStatus::Processing,
            Some("op"),
            None,
            false,
            t0(),
        )
        .unwrap();
        assert_eq!(request.response_time_minutes, Some(30));

        apply_transition(
            &mut request,
            RequestStatus::Completed,
            None,
            None,
            false,
            t0() + Duration::minutes(111),
        )
        .unwrap();
        assert_eq!(request.completion_time_hours, Some(1.9));
    }
}
