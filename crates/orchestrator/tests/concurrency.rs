//! Mutual exclusion and at-least-once delivery properties.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use ccf_core::change::{ChangeKind, ChangeRecord};
use ccf_core::completion::{TerminalEvent, TerminalOutcome};
use ccf_core::error::CoreError;
use ccf_core::status::{ConnectorStatus, JobStatus};
use ccf_db::MetadataStore;
use common::{drain, Harness};

#[tokio::test]
async fn two_concurrent_starts_exactly_one_conflicts() {
    let h = Harness::new();
    let connector = h.create_connector("crm").await;
    let admission = &h.orchestrator.admission;

    let (a, b) = tokio::join!(
        admission.start_job(&connector.connector_id, Vec::new()),
        admission.start_job(&connector.connector_id, Vec::new()),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(CoreError::Conflict(_))))
        .count();
    assert_eq!(conflicts, 1);
    h.assert_exclusive(&connector.connector_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_parallel_starts_admit_exactly_one_job() {
    let h = Harness::new();
    let connector = h.create_connector("crm").await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let admission = Arc::clone(&h.orchestrator.admission);
        let connector_id = connector.connector_id.clone();
        tasks.push(tokio::spawn(async move {
            admission.start_job(&connector_id, Vec::new()).await
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(e) => assert_matches!(e, CoreError::Conflict(_) | CoreError::TransientStore(_)),
        }
    }
    assert_eq!(admitted, 1);
    h.assert_exclusive(&connector.connector_id).await;
}

#[tokio::test]
async fn redelivered_started_notification_submits_once() {
    let h = Harness::new();
    let connector = h.create_connector("crm").await;
    let mut changes = h.store.subscribe();
    h.orchestrator
        .admission
        .start_job(&connector.connector_id, Vec::new())
        .await
        .unwrap();

    let insert = drain(&mut changes)
        .into_iter()
        .find(|c| matches!(c, ChangeRecord::Job(job) if job.kind == ChangeKind::Insert))
        .expect("job insert should be published");

    let dispatch = &h.orchestrator.dispatch;
    dispatch.handle_change(&insert).await.unwrap();
    dispatch.handle_change(&insert).await.unwrap();

    assert_eq!(h.backend.submissions().await.len(), 1);
}

#[tokio::test]
async fn overlapping_deliveries_submit_once() {
    let h = Harness::new();
    let connector = h.create_connector("crm").await;
    let mut changes = h.store.subscribe();
    let job = h
        .orchestrator
        .admission
        .start_job(&connector.connector_id, Vec::new())
        .await
        .unwrap();
    let insert = drain(&mut changes)
        .into_iter()
        .find(|c| matches!(c, ChangeRecord::Job(_)))
        .unwrap();

    // Hold the first submission open so the second delivery overlaps it.
    h.backend.hold_submissions();
    let spawn_delivery = || {
        let dispatch = Arc::clone(&h.orchestrator.dispatch);
        let change = insert.clone();
        tokio::spawn(async move { dispatch.handle_change(&change).await })
    };
    let first = spawn_delivery();
    while h.job(&job.job_id).await.dispatch_claimed_at.is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let second = spawn_delivery();
    second.await.unwrap().unwrap();

    h.backend.release_submissions();
    first.await.unwrap().unwrap();

    assert_eq!(h.backend.submissions().await.len(), 1);
    assert_eq!(h.job(&job.job_id).await.status, JobStatus::Running);
}

#[tokio::test]
async fn redelivered_terminal_event_flips_connector_once() {
    let h = Harness::new();
    let connector = h.create_connector("crm").await;
    let job = h.running_job(&connector.connector_id).await;
    let mut changes = h.store.subscribe();

    let event = TerminalEvent {
        correlation_id: job.job_id.clone(),
        outcome: TerminalOutcome::Succeeded,
        reason: None,
    };
    let completion = &h.orchestrator.completion;
    assert!(completion.handle_event(&event).await.unwrap().is_some());
    assert!(completion.handle_event(&event).await.unwrap().is_none());

    let changes = drain(&mut changes);
    let connector_flips = changes
        .iter()
        .filter(|c| {
            matches!(c, ChangeRecord::Connector(change)
                if change.new_image.status == ConnectorStatus::Available)
        })
        .count();
    let completed_writes = changes
        .iter()
        .filter(|c| {
            matches!(c, ChangeRecord::Job(change)
                if change.new_image.completed_at.is_some())
        })
        .count();
    assert_eq!(connector_flips, 1);
    assert_eq!(completed_writes, 1);
}

#[tokio::test]
async fn concurrent_terminal_events_apply_once() {
    let h = Harness::new();
    let connector = h.create_connector("crm").await;
    let job = h.running_job(&connector.connector_id).await;

    let succeeded = TerminalEvent {
        correlation_id: job.job_id.clone(),
        outcome: TerminalOutcome::Succeeded,
        reason: None,
    };
    let failed = TerminalEvent {
        outcome: TerminalOutcome::Failed,
        ..succeeded.clone()
    };
    let completion = &h.orchestrator.completion;
    let (a, b) = tokio::join!(
        completion.handle_event(&succeeded),
        completion.handle_event(&failed)
    );

    let applied = [a.unwrap(), b.unwrap()];
    assert_eq!(applied.iter().filter(|j| j.is_some()).count(), 1);
    assert!(h.job(&job.job_id).await.is_terminal());
    h.assert_exclusive(&connector.connector_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exclusivity_holds_across_full_lifecycles() {
    let h = Harness::new();
    let reconcilers = h.orchestrator.spawn_reconcilers(&h.inbox);
    let mut connectors = Vec::new();
    for i in 0..3 {
        connectors.push(h.create_connector(&format!("crm-{i}")).await);
    }

    for round in 0..3 {
        for connector in &connectors {
            let job = h
                .orchestrator
                .admission
                .start_job(&connector.connector_id, Vec::new())
                .await
                .unwrap();
            assert_matches!(
                h.orchestrator
                    .admission
                    .start_job(&connector.connector_id, Vec::new())
                    .await,
                Err(CoreError::Conflict(_))
            );

            let running = h.wait_for_status(&job.job_id, JobStatus::Running).await;
            h.assert_exclusive(&connector.connector_id).await;

            let outcome = if round % 2 == 0 {
                TerminalOutcome::Succeeded
            } else {
                TerminalOutcome::Failed
            };
            h.backend
                .complete(running.backend_job_id.as_deref().unwrap(), outcome, None)
                .await;
            let done = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let job = h.job(&job.job_id).await;
                    if job.is_terminal() {
                        return job;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("job should finish");
            assert!(done.is_terminal());
        }
    }

    for connector in &connectors {
        assert_eq!(
            h.connector(&connector.connector_id).await.status,
            ConnectorStatus::Available
        );
        h.assert_exclusive(&connector.connector_id).await;
    }
    assert_eq!(h.backend.submissions().await.len(), 9);
    reconcilers.shutdown(Duration::from_secs(5)).await;
}
