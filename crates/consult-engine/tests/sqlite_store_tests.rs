//! SQLite store tests: schema bootstrap, CAS linkage, atomic counters and
//! the engine running on a real database file.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serial_test::serial;
use tempfile::TempDir;

use laborline_consult_core::{
    Advisor, AdvisorId, AuditEvent, AuditEventKind, ConsultError, ConsultationRequest,
    ContactMethod, NewAdvisor, NewConsultationRequest, Region, RequestFilter, RequestStatus,
    ServiceCategory,
};
use laborline_consult_engine::store::{AdvisorStore, LifecyclePatch, RequestStore, SqliteStore};
use laborline_consult_engine::{ConsultCenterConfig, ConsultEngine, DatabaseConfig};

async fn test_store() -> (SqliteStore, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}/consult.db?mode=rwc", dir.path().display());
    let store = SqliteStore::connect(&url, 5).await.expect("store should open");
    (store, dir)
}

fn advisor(email: &str) -> Advisor {
    Advisor::from_new(
        NewAdvisor {
            name: "Choi Su-bin".into(),
            phone: "010-2222-3333".into(),
            email: email.into(),
            messenger: Some("@subin".into()),
            region: Region::Seoul,
            notes: Some("night shifts preferred".into()),
            specialties: BTreeSet::from([ServiceCategory::Contract, ServiceCategory::Termination]),
        },
        Utc::now(),
    )
}

fn request() -> ConsultationRequest {
    ConsultationRequest::from_intake(
        NewConsultationRequest {
            requester_name: "Jang Woo-jin".into(),
            phone: "010-4444-5555".into(),
            email: None,
            messenger: None,
            details: "Contract renewal dispute".into(),
            contact_methods: BTreeSet::from([ContactMethod::Phone]),
            preferred_time: None,
            region: Some(Region::Seoul),
            service_type: ServiceCategory::Contract,
        },
        Utc::now(),
    )
}

#[tokio::test]
#[serial]
async fn advisor_round_trip_preserves_fields() {
    let (store, _dir) = test_store().await;
    let original = advisor("subin@laborline.example");
    AdvisorStore::insert(&store, original.clone()).await.unwrap();

    let stored = AdvisorStore::get(&store, &original.id).await.unwrap().unwrap();
    assert_eq!(stored.id, original.id);
    assert_eq!(stored.name, original.name);
    assert_eq!(stored.email, original.email);
    assert_eq!(stored.messenger, original.messenger);
    assert_eq!(stored.region, original.region);
    assert_eq!(stored.notes, original.notes);
    assert_eq!(stored.specialties, original.specialties);
    assert!(stored.is_active);
    assert_eq!(stored.total_assigned, 0);
}

#[tokio::test]
#[serial]
async fn duplicate_email_maps_to_domain_error() {
    let (store, _dir) = test_store().await;
    AdvisorStore::insert(&store, advisor("same@laborline.example")).await.unwrap();

    let err = AdvisorStore::insert(&store, advisor("SAME@laborline.example"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_domain(),
        Some(ConsultError::DuplicateContact)
    ));
}

#[tokio::test]
#[serial]
async fn request_round_trip_with_events() {
    let (store, _dir) = test_store().await;
    let mut original = request();
    original.events.push(
        AuditEvent::new(AuditEventKind::Note, original.created_at).with_note(Some("intake checked")),
    );
    RequestStore::insert(&store, original.clone()).await.unwrap();

    let stored = RequestStore::get(&store, &original.id).await.unwrap().unwrap();
    assert_eq!(stored.requester_name, original.requester_name);
    assert_eq!(stored.contact_methods, original.contact_methods);
    assert_eq!(stored.status, RequestStatus::Pending);
    assert_eq!(stored.events.len(), 1);
    assert_eq!(stored.events[0].note.as_deref(), Some("intake checked"));
}

#[tokio::test]
#[serial]
async fn lifecycle_patch_persists_with_event() {
    let (store, _dir) = test_store().await;
    let original = request();
    RequestStore::insert(&store, original.clone()).await.unwrap();

    let now = Utc::now();
    let patch = LifecyclePatch {
        status: RequestStatus::Processing,
        processed_by: Some("op-1".into()),
        processed_at: Some(now),
        completed_at: None,
        response_time_minutes: Some(12),
        completion_time_hours: None,
        updated_at: now,
        clear_timing: false,
    };
    let event = AuditEvent::new(
        AuditEventKind::StatusChanged {
            from: RequestStatus::Pending,
            to: RequestStatus::Processing,
            forced: false,
        },
        now,
    )
    .with_actor(Some("op-1"));

    let outcome = store
        .apply_lifecycle(&original.id, patch, event)
        .await
        .unwrap()
        .expect("request exists");
    assert!(!outcome.first_completion);

    let stored = RequestStore::get(&store, &original.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Processing);
    assert_eq!(stored.processed_by.as_deref(), Some("op-1"));
    assert_eq!(stored.response_time_minutes, Some(12));
    assert_eq!(stored.events.len(), 1);
}

#[tokio::test]
#[serial]
async fn guarded_linkage_update_has_one_winner() {
    let (store, _dir) = test_store().await;
    let original = request();
    RequestStore::insert(&store, original.clone()).await.unwrap();

    let a = AdvisorId("adv-a".into());
    let b = AdvisorId("adv-b".into());
    let now = Utc::now();

    assert!(store
        .try_link_advisor(&original.id, None, &a, now, Vec::new())
        .await
        .unwrap());
    // Second writer expected an unlinked request and must lose
    assert!(!store
        .try_link_advisor(&original.id, None, &b, now, Vec::new())
        .await
        .unwrap());
    // A reassignment that saw the current linkage succeeds
    assert!(store
        .try_link_advisor(&original.id, Some(&a), &b, now, Vec::new())
        .await
        .unwrap());

    let stored = RequestStore::get(&store, &original.id).await.unwrap().unwrap();
    assert_eq!(stored.assigned_advisor_id, Some(b));
}

#[tokio::test]
#[serial]
async fn completion_stamp_has_one_winner() {
    let (store, _dir) = test_store().await;
    let original = request();
    RequestStore::insert(&store, original.clone()).await.unwrap();

    let now = Utc::now();
    let completion = |hours: f64| LifecyclePatch {
        status: RequestStatus::Completed,
        processed_by: Some("op-1".into()),
        processed_at: Some(now),
        completed_at: Some(now),
        response_time_minutes: Some(5),
        completion_time_hours: Some(hours),
        updated_at: now,
        clear_timing: false,
    };
    let event = || {
        AuditEvent::new(
            AuditEventKind::StatusChanged {
                from: RequestStatus::Processing,
                to: RequestStatus::Completed,
                forced: false,
            },
            now,
        )
    };

    let first = store
        .apply_lifecycle(&original.id, completion(2.0), event())
        .await
        .unwrap()
        .expect("request exists");
    assert!(first.first_completion);

    let second = store
        .apply_lifecycle(&original.id, completion(9.0), event())
        .await
        .unwrap()
        .expect("request exists");
    assert!(!second.first_completion);

    // A patch built from a read taken before the completion landed must
    // not clear the stamp either.
    let stale_cancel = LifecyclePatch {
        status: RequestStatus::Cancelled,
        processed_by: Some("op-1".into()),
        processed_at: Some(now),
        completed_at: None,
        response_time_minutes: Some(5),
        completion_time_hours: None,
        updated_at: now,
        clear_timing: false,
    };
    store
        .apply_lifecycle(
            &original.id,
            stale_cancel,
            AuditEvent::new(
                AuditEventKind::Cancelled {
                    reason: "requester withdrew".into(),
                },
                now,
            ),
        )
        .await
        .unwrap()
        .expect("request exists");

    let stored = RequestStore::get(&store, &original.id).await.unwrap().unwrap();
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.completion_time_hours, Some(2.0));
}

#[tokio::test]
#[serial]
async fn counters_are_floored_and_averaged() {
    let (store, _dir) = test_store().await;
    let original = advisor("counters@laborline.example");
    AdvisorStore::insert(&store, original.clone()).await.unwrap();

    let now = Utc::now();
    store.adjust_assigned(&original.id, -3, now).await.unwrap();
    let stored = AdvisorStore::get(&store, &original.id).await.unwrap().unwrap();
    assert_eq!(stored.total_assigned, 0);

    // A completion with no known duration counts toward the total but
    // must not weigh down the average of the timed ones.
    store.record_completion(&original.id, None, now).await.unwrap();
    store.record_completion(&original.id, Some(2.0), now).await.unwrap();
    store.record_completion(&original.id, Some(4.0), now).await.unwrap();

    let stored = AdvisorStore::get(&store, &original.id).await.unwrap().unwrap();
    assert_eq!(stored.total_completed, 3);
    assert_eq!(stored.timed_completions, 2);
    assert!((stored.avg_completion_time_hours - 3.0).abs() < 1e-9);
}

#[tokio::test]
#[serial]
async fn sever_and_active_count() {
    let (store, _dir) = test_store().await;
    let advisor_id = AdvisorId("adv-x".into());
    let now = Utc::now();

    let mut active = request();
    active.assigned_advisor_id = Some(advisor_id.clone());
    active.assigned_at = Some(now);
    let mut done = request();
    done.assigned_advisor_id = Some(advisor_id.clone());
    done.assigned_at = Some(now);
    done.status = RequestStatus::Completed;
    RequestStore::insert(&store, active.clone()).await.unwrap();
    RequestStore::insert(&store, done.clone()).await.unwrap();

    assert_eq!(store.count_active_for(&advisor_id).await.unwrap(), 1);

    let severed = store.sever_advisor(&advisor_id, now, "advisor removed").await.unwrap();
    assert_eq!(severed, 2);

    let stored = RequestStore::get(&store, &active.id).await.unwrap().unwrap();
    assert_eq!(stored.assigned_advisor_id, None);
    assert!(stored.events.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::Unassigned { advisor_id: id } if *id == advisor_id
    )));
}

#[tokio::test]
#[serial]
async fn listing_filters_and_ranges() {
    let (store, _dir) = test_store().await;
    let advisor_id = AdvisorId("adv-y".into());
    let now = Utc::now();

    for i in 0..3 {
        let mut r = request();
        if i == 0 {
            r.status = RequestStatus::Cancelled;
        } else {
            r.assigned_advisor_id = Some(advisor_id.clone());
            r.assigned_at = Some(now);
        }
        RequestStore::insert(&store, r).await.unwrap();
    }

    let (pending, total) = store
        .list(&RequestFilter {
            status: Some(RequestStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(pending.len(), 2);

    let (page, total) = store
        .list(&RequestFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 1);

    let counts = store
        .assigned_counts_in_range(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(counts, vec![(advisor_id.clone(), 2)]);

    let counts = store
        .assigned_counts_in_range(now + Duration::hours(1), now + Duration::hours(2))
        .await
        .unwrap();
    assert!(counts.is_empty());
}

#[tokio::test]
#[serial]
async fn engine_runs_on_a_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConsultCenterConfig {
        database: DatabaseConfig {
            database_path: Some(format!("{}/engine.db", dir.path().display())),
            max_connections: 5,
        },
        ..Default::default()
    };
    let engine: Arc<ConsultEngine> = ConsultEngine::new(config).await.unwrap();

    let advisor = engine
        .registry()
        .create(NewAdvisor {
            name: "Durable Advisor".into(),
            phone: "010-7777-8888".into(),
            email: "durable@laborline.example".into(),
            messenger: None,
            region: Region::Seoul,
            notes: None,
            specialties: BTreeSet::from([ServiceCategory::Contract]),
        })
        .await
        .unwrap();

    let created = engine
        .create_request(NewConsultationRequest {
            requester_name: "Jang Woo-jin".into(),
            phone: "010-4444-5555".into(),
            email: None,
            messenger: None,
            details: "Contract renewal dispute".into(),
            contact_methods: BTreeSet::from([ContactMethod::Phone]),
            preferred_time: None,
            region: Some(Region::Seoul),
            service_type: ServiceCategory::Contract,
        })
        .await
        .unwrap();

    engine.auto_assign(&created.id, Some("dispatcher")).await.unwrap();
    engine
        .transition(&created.id, RequestStatus::Processing, Some("op-1"), None, false)
        .await
        .unwrap();
    let completed = engine
        .transition(&created.id, RequestStatus::Completed, Some("op-1"), None, false)
        .await
        .unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);

    let stored_advisor = engine.registry().get(&advisor.id).await.unwrap();
    assert_eq!(stored_advisor.total_assigned, 1);
    assert_eq!(stored_advisor.total_completed, 1);

    let history = engine.assignment_history(&created.id).await.unwrap();
    assert_eq!(history.current_advisor.unwrap().id, advisor.id);
    assert_eq!(history.assignments.len(), 1);
    assert_eq!(history.status_changes.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_completions_credit_the_advisor_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConsultCenterConfig {
        database: DatabaseConfig {
            database_path: Some(format!("{}/races.db", dir.path().display())),
            max_connections: 5,
        },
        ..Default::default()
    };
    let engine: Arc<ConsultEngine> = ConsultEngine::new(config).await.unwrap();

    let advisor = engine
        .registry()
        .create(NewAdvisor {
            name: "Raced Advisor".into(),
            phone: "010-9999-0000".into(),
            email: "raced@laborline.example".into(),
            messenger: None,
            region: Region::Seoul,
            notes: None,
            specialties: BTreeSet::from([ServiceCategory::Contract]),
        })
        .await
        .unwrap();
    let created = engine
        .create_request(NewConsultationRequest {
            requester_name: "Jang Woo-jin".into(),
            phone: "010-4444-5555".into(),
            email: None,
            messenger: None,
            details: "Contract renewal dispute".into(),
            contact_methods: BTreeSet::from([ContactMethod::Phone]),
            preferred_time: None,
            region: Some(Region::Seoul),
            service_type: ServiceCategory::Contract,
        })
        .await
        .unwrap();
    engine.assign(&created.id, &advisor.id, None, Some("dispatcher")).await.unwrap();
    engine
        .transition(&created.id, RequestStatus::Processing, Some("op-1"), None, false)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..4 {
        let engine = Arc::clone(&engine);
        let id = created.id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .transition(&id, RequestStatus::Completed, Some(&format!("op-{n}")), None, false)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // However many writers raced, the advisor is credited exactly once.
    let stored_advisor = engine.registry().get(&advisor.id).await.unwrap();
    assert_eq!(stored_advisor.total_completed, 1);

    let stored = engine.get_request(&created.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Completed);
    assert!(stored.completed_at.is_some());
}
