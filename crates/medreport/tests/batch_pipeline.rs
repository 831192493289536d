//! Batch behaviour end to end: isolation, retries, batch-fatal errors,
//! cancellation, halting and record store write-back.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{
    ids, patient, CollectingProgress, PatientBuilder, ScriptedGenerator, TestHarness,
    ThreadRecordingStore,
};

use medreport::ai::GenerationError;
use medreport::email::DeliveryError;
use medreport::pipeline::{
    BatchController, BatchError, BatchRun, CancelHandle, ItemOutcome, ItemTracker, PipelineItemStatus, RunWarning,
    Stage, StopSignal,
};
use medreport::records::ReportStatus;

fn assert_counts_reconcile(run: &BatchRun) {
    assert_eq!(
        run.succeeded + run.failed + run.skipped,
        run.total(),
        "counts must add up to the submitted set"
    );
}

fn failure(run: &BatchRun, id: &str) -> (Stage, String) {
    match run.status(id) {
        Some(PipelineItemStatus::Failed { stage, code, .. }) => (*stage, code.clone()),
        other => panic!("expected {} to have failed, got {:?}", id, other),
    }
}

#[tokio::test]
async fn test_oversized_history_fails_only_that_item() {
    let oversized = PatientBuilder::new("P-2")
        .medical_history(&"chronic condition ".repeat(40))
        .build();
    let harness = TestHarness::new(vec![patient("P-1"), oversized, patient("P-3")])
        .max_summary_chars(200);

    let (result, _) = harness.run(&ids(&["P-1", "P-2", "P-3"])).await;
    let run = result.unwrap();

    assert_eq!(
        failure(&run, "P-2"),
        (Stage::Generate, "invalid-input".to_string())
    );
    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Sent));
    assert_eq!(run.status("P-3"), Some(&PipelineItemStatus::Sent));

    let summary = run.summary();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_by_stage.get("generate"), Some(&1));
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].patient_id, "P-2");

    // The oversized summary is rejected before the service is called.
    assert_eq!(harness.generator.calls("P-2"), 0);
    assert_counts_reconcile(&run);
}

#[tokio::test]
async fn test_quota_twice_then_success_is_sent() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    let quota = || GenerationError::QuotaExceeded {
        retry_after: Some(Duration::from_millis(5)),
        message: "RESOURCE_EXHAUSTED".to_string(),
    };
    harness.generator.script(
        "P-1",
        vec![Err(quota()), Err(quota()), Ok("Report text".to_string())],
    );

    let (result, _) = harness.run(&ids(&["P-1"])).await;
    let run = result.unwrap();

    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Sent));
    assert_eq!(harness.generator.calls("P-1"), 3);
    assert!(run.summary().failures.is_empty());

    let stored = harness.stored("P-1");
    assert_eq!(stored.report_status, ReportStatus::Sent);
    assert_eq!(stored.last_error, None);
    assert!(stored.last_message_id.is_some());
}

#[tokio::test]
async fn test_quota_exhausted_fails_after_all_attempts() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    harness.generator.script(
        "P-1",
        (0..3)
            .map(|_| {
                Err(GenerationError::QuotaExceeded {
                    retry_after: None,
                    message: "quota".to_string(),
                })
            })
            .collect(),
    );

    let (result, _) = harness.run(&ids(&["P-1"])).await;
    let run = result.unwrap();

    assert_eq!(
        failure(&run, "P-1"),
        (Stage::Generate, "quota-exceeded".to_string())
    );
    assert_eq!(harness.generator.calls("P-1"), 3);
    assert_eq!(harness.stored("P-1").report_status, ReportStatus::Failed);
}

#[tokio::test]
async fn test_mail_auth_failure_aborts_the_batch() {
    let harness = TestHarness::new(vec![patient("P-1"), patient("P-2"), patient("P-3")])
        .concurrency(1);
    harness
        .mailer
        .fail_always(DeliveryError::Auth("535 5.7.8 bad credentials".to_string()));

    let (result, _) = harness.run(&ids(&["P-1", "P-2", "P-3"])).await;

    let (message, run) = match result {
        Err(BatchError::DeliveryAuth { message, run }) => (message, run),
        other => panic!("expected a batch-fatal auth error, got {:?}", other.map(|r| r.summary())),
    };
    assert!(message.contains("535"));

    for (id, status) in run.items() {
        assert!(!status.is_terminal(), "{} ended {}", id, status);
    }
    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Sending));
    assert_eq!(run.succeeded, 0);
    assert_eq!(run.failed, 0);
    assert_eq!(run.skipped, 3);
    assert!(run.halted);

    // Auth errors are never retried and nothing is recorded as failed.
    assert_eq!(harness.mailer.attempts("p-1@example.com"), 1);
    assert_eq!(harness.mailer.attempts("p-2@example.com"), 0);
    assert_eq!(harness.stored("P-1").report_status, ReportStatus::Pending);
}

#[tokio::test]
async fn test_transient_delivery_retried_then_sent_once() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    harness.mailer.script(
        "p-1@example.com",
        vec![
            DeliveryError::Transient("421 4.7.0 try again later".to_string()),
            DeliveryError::Transient("connection reset".to_string()),
        ],
    );

    let (result, _) = harness.run(&ids(&["P-1"])).await;
    let run = result.unwrap();

    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Sent));
    assert_eq!(harness.mailer.attempts("p-1@example.com"), 3);
    assert_eq!(harness.mailer.delivered_to("p-1@example.com"), 1);
}

#[tokio::test]
async fn test_transient_delivery_exhausted_fails_without_sending() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    harness.mailer.script(
        "p-1@example.com",
        (0..3)
            .map(|_| DeliveryError::Transient("421 busy".to_string()))
            .collect(),
    );

    let (result, _) = harness.run(&ids(&["P-1"])).await;
    let run = result.unwrap();

    assert_eq!(failure(&run, "P-1"), (Stage::Send, "transient".to_string()));
    assert_eq!(harness.mailer.delivered_to("p-1@example.com"), 0);

    let stored = harness.stored("P-1");
    assert_eq!(stored.report_status, ReportStatus::Failed);
    assert!(stored.last_error.unwrap().contains("421 busy"));
}

#[tokio::test]
async fn test_unconfirmed_delivery_is_not_resent() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    harness.mailer.script(
        "p-1@example.com",
        vec![DeliveryError::Unconfirmed("timed out after 60s".to_string())],
    );

    let (result, _) = harness.run(&ids(&["P-1"])).await;
    let run = result.unwrap();

    assert_eq!(failure(&run, "P-1"), (Stage::Send, "unconfirmed".to_string()));
    assert_eq!(harness.mailer.attempts("p-1@example.com"), 1);
}

#[tokio::test]
async fn test_recipient_rejected_is_isolated() {
    let harness = TestHarness::new(vec![patient("P-1"), patient("P-2")]);
    harness.mailer.script(
        "p-1@example.com",
        vec![DeliveryError::RecipientRejected {
            code: Some(550),
            message: "mailbox unavailable".to_string(),
        }],
    );

    let (result, _) = harness.run(&ids(&["P-1", "P-2"])).await;
    let run = result.unwrap();

    assert_eq!(
        failure(&run, "P-1"),
        (Stage::Send, "recipient-rejected".to_string())
    );
    assert_eq!(harness.mailer.attempts("p-1@example.com"), 1);
    assert_eq!(run.status("P-2"), Some(&PipelineItemStatus::Sent));
}

#[tokio::test]
async fn test_terminal_generation_error_does_not_touch_siblings() {
    let harness = TestHarness::new(vec![patient("P-1"), patient("P-2"), patient("P-3")]);
    harness.generator.script(
        "P-2",
        vec![Err(GenerationError::InvalidInput(
            "prompt blocked: SAFETY".to_string(),
        ))],
    );

    let (result, _) = harness.run(&ids(&["P-1", "P-2", "P-3"])).await;
    let run = result.unwrap();

    assert_eq!(
        failure(&run, "P-2"),
        (Stage::Generate, "invalid-input".to_string())
    );
    assert_eq!(harness.generator.calls("P-2"), 1);
    assert_eq!(harness.generator.calls("P-1"), 1);
    assert_eq!(harness.generator.calls("P-3"), 1);
    assert_eq!(run.succeeded, 2);
}

#[tokio::test]
async fn test_invalid_email_fails_validation_before_generation() {
    let bad = PatientBuilder::new("P-2").email("not-an-address").build();
    let harness = TestHarness::new(vec![patient("P-1"), bad]);

    let (result, _) = harness.run(&ids(&["P-1", "P-2"])).await;
    let run = result.unwrap();

    assert_eq!(
        failure(&run, "P-2"),
        (Stage::Validate, "invalid-email".to_string())
    );
    assert_eq!(harness.generator.calls("P-2"), 0);
    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Sent));
}

#[tokio::test]
async fn test_cancel_after_first_item_started() {
    let harness = TestHarness::with_generator(
        vec![patient("P-1"), patient("P-2"), patient("P-3")],
        ScriptedGenerator::with_delay(Duration::from_millis(20)),
    )
    .concurrency(1);
    let cancel = CancelHandle::new();
    let progress =
        CollectingProgress::cancel_after(PipelineItemStatus::Generating, 1, cancel.clone());

    let run = harness
        .run_with(&ids(&["P-1", "P-2", "P-3"]), &progress, &cancel)
        .await
        .unwrap();

    assert!(run.cancelled);
    // The in-flight generation finishes; nothing after it starts.
    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Generated));
    assert_eq!(run.status("P-2"), Some(&PipelineItemStatus::Pending));
    assert_eq!(run.status("P-3"), Some(&PipelineItemStatus::Pending));
    assert!(harness.mailer.delivered().is_empty());
    assert_counts_reconcile(&run);
}

#[tokio::test]
async fn test_cancel_before_start_leaves_everything_pending() {
    let harness = TestHarness::new(vec![patient("P-1"), patient("P-2")]);
    let cancel = CancelHandle::new();
    cancel.cancel();

    let run = harness
        .run_with(&ids(&["P-1", "P-2"]), &CollectingProgress::new(), &cancel)
        .await
        .unwrap();

    assert!(run.cancelled);
    assert_eq!(run.skipped, 2);
    assert_eq!(harness.generator.total_calls(), 0);
    assert_counts_reconcile(&run);
}

#[tokio::test]
async fn test_halt_on_first_failure_stops_remaining_items() {
    let bad = PatientBuilder::new("P-1").medical_history("").symptoms("").build();
    let harness = TestHarness::new(vec![bad, patient("P-2"), patient("P-3")])
        .concurrency(1)
        .halt_on_first_failure();

    let (result, _) = harness.run(&ids(&["P-1", "P-2", "P-3"])).await;
    let run = result.unwrap();

    assert!(run.halted);
    assert!(!run.cancelled);
    assert_eq!(run.failed, 1);
    assert_eq!(run.skipped, 2);
    assert_eq!(run.status("P-2"), Some(&PipelineItemStatus::Pending));
    assert_eq!(harness.generator.calls("P-2"), 0);
    assert_counts_reconcile(&run);
}

#[tokio::test]
async fn test_failures_do_not_halt_by_default() {
    let bad = PatientBuilder::new("P-1").medical_history("").symptoms("").build();
    let harness = TestHarness::new(vec![bad, patient("P-2")]).concurrency(1);

    let (result, _) = harness.run(&ids(&["P-1", "P-2"])).await;
    let run = result.unwrap();

    assert!(!run.halted);
    assert_eq!(run.status("P-2"), Some(&PipelineItemStatus::Sent));
}

#[tokio::test]
async fn test_store_write_failures_are_warnings() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    harness.store.set_fail_writes(true);

    let (result, _) = harness.run(&ids(&["P-1"])).await;
    let run = result.unwrap();

    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Sent));
    assert!(matches!(
        run.warnings.as_slice(),
        [RunWarning::StoreWriteFailed { patient_id, .. }] if patient_id == "P-1"
    ));
    assert_eq!(run.summary().warnings, 1);
    assert_eq!(harness.stored("P-1").report_status, ReportStatus::Pending);
}

#[tokio::test]
async fn test_unresolvable_ids_fail_validation() {
    let harness = TestHarness::new(vec![patient("P-1")]);

    let (result, _) = harness.run(&ids(&["P-1", "P-404"])).await;
    let run = result.unwrap();

    assert_eq!(
        failure(&run, "P-404"),
        (Stage::Validate, "not-found".to_string())
    );
    assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Sent));
    assert_counts_reconcile(&run);
}

#[tokio::test]
async fn test_batch_preconditions() {
    let harness = TestHarness::new(vec![patient("P-1")]);

    let (result, _) = harness.run(&[]).await;
    assert!(matches!(result, Err(BatchError::EmptyBatch)));

    let (result, _) = harness.run(&ids(&["  ", ""])).await;
    assert!(matches!(result, Err(BatchError::EmptyBatch)));

    let (result, _) = harness.run(&ids(&["P-8", "P-9"])).await;
    assert!(matches!(
        result,
        Err(BatchError::NoResolvablePatients { requested: 2 })
    ));

    let harness = TestHarness::new(vec![patient("P-1")]).concurrency(0);
    let (result, _) = harness.run(&ids(&["P-1"])).await;
    assert!(matches!(result, Err(BatchError::InvalidConfig(_))));

    let harness = TestHarness::new(vec![patient("P-1")]).concurrency(33);
    let (result, _) = harness.run(&ids(&["P-1"])).await;
    assert!(matches!(result, Err(BatchError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_duplicate_ids_are_processed_once() {
    let harness = TestHarness::new(vec![patient("P-1"), patient("P-2")]);

    let (result, _) = harness.run(&ids(&["P-1", "P-2", "P-1"])).await;
    let run = result.unwrap();

    assert_eq!(run.patient_ids, ids(&["P-1", "P-2"]));
    assert_eq!(harness.mailer.delivered_to("p-1@example.com"), 1);
    assert_eq!(harness.generator.calls("P-1"), 1);
}

#[tokio::test]
async fn test_progress_events_are_sequenced_and_linear() {
    let patients: Vec<_> = (1..=5).map(|i| patient(&format!("P-{}", i))).collect();
    let submitted: Vec<String> = patients.iter().map(|p| p.id.clone()).collect();
    let harness = TestHarness::new(patients).concurrency(3);

    let (result, progress) = harness.run(&submitted).await;
    let run = result.unwrap();
    let events = progress.events();

    // One event per transition: six per sent item.
    assert_eq!(events.len(), 5 * 6);
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.seq, index as u64 + 1);
        assert_eq!(event.run_id, run.run_id);
    }

    let mut last: HashMap<String, PipelineItemStatus> = HashMap::new();
    for event in &events {
        let previous = last
            .get(&event.patient_id)
            .cloned()
            .unwrap_or(PipelineItemStatus::Pending);
        assert_eq!(event.previous, previous);
        assert!(previous.can_transition_to(&event.new));
        last.insert(event.patient_id.clone(), event.new.clone());
    }
    assert!(last.values().all(|s| s == &PipelineItemStatus::Sent));
}

#[tokio::test]
async fn test_failed_event_carries_reason() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    harness.generator.script(
        "P-1",
        vec![Err(GenerationError::Unauthorized("API key not valid".to_string()))],
    );

    let (_, progress) = harness.run(&ids(&["P-1"])).await;
    let events = progress.events_for("P-1");
    let last = events.last().unwrap();

    assert!(last.new.is_failed());
    assert!(last.error.as_deref().unwrap().contains("API key not valid"));
}

#[tokio::test]
async fn test_email_has_report_attachment() {
    let harness = TestHarness::new(vec![PatientBuilder::new("P-1").name("Jane Doe").build()]);

    let (result, _) = harness.run(&ids(&["P-1"])).await;
    result.unwrap();

    let delivered = harness.mailer.delivered();
    assert_eq!(delivered.len(), 1);
    let message = &delivered[0];
    assert_eq!(message.subject, "Health Report - Jane Doe");
    assert!(message.body.starts_with("Dear Jane Doe,"));
    assert_eq!(message.attachment.filename, "Health_Report_P-1.pdf");
    assert!(message.attachment.bytes.starts_with(b"%PDF-"));
}

#[tokio::test]
async fn test_archive_dir_receives_rendered_pdfs() {
    let mut harness = TestHarness::new(vec![patient("P-1"), patient("P-2")]);
    let archive = harness.enable_archive();

    let (result, _) = harness.run(&ids(&["P-1", "P-2"])).await;
    result.unwrap();

    for id in ["P-1", "P-2"] {
        let bytes = std::fs::read(archive.join(format!("Health_Report_{}.pdf", id))).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_workers_run_items_concurrently() {
    let patients: Vec<_> = (1..=6).map(|i| patient(&format!("P-{}", i))).collect();
    let submitted: Vec<String> = patients.iter().map(|p| p.id.clone()).collect();
    let harness = TestHarness::with_generator(
        patients,
        ScriptedGenerator::with_delay(Duration::from_millis(50)),
    )
    .concurrency(3);

    let started = tokio::time::Instant::now();
    let (result, _) = harness.run(&submitted).await;
    let run = result.unwrap();

    assert_eq!(run.succeeded, 6);
    // Two rounds of three, not six sequential calls.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150));
}

#[tokio::test]
async fn test_preview_generates_and_renders_without_sending() {
    let harness = TestHarness::new(vec![patient("P-1")]);

    let artifact = harness.pipeline().preview(&patient("P-1")).await.unwrap();

    assert_eq!(artifact.patient_id, "P-1");
    assert!(artifact.report_text.contains("Patient P-1"));
    assert!(artifact.pdf.unwrap().starts_with(b"%PDF-"));
    assert_eq!(harness.generator.calls("P-1"), 1);
    assert_eq!(harness.mailer.attempts("p-1@example.com"), 0);
}

#[tokio::test]
async fn test_preview_surfaces_generation_errors() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    harness.generator.script(
        "P-1",
        vec![Err(GenerationError::InvalidInput("blocked".to_string()))],
    );

    let error = harness.pipeline().preview(&patient("P-1")).await.unwrap_err();

    assert_eq!(error.stage(), Stage::Generate);
    assert_eq!(error.code(), "invalid-input");
}

#[tokio::test]
async fn test_auth_failure_halts_before_the_next_item() {
    let harness = TestHarness::new(vec![patient("P-1"), patient("P-2")]);
    harness
        .mailer
        .fail_always(DeliveryError::Auth("535 5.7.8 bad credentials".to_string()));
    let pipeline = harness.pipeline();
    let stop = StopSignal::new(CancelHandle::new());

    let mut first = ItemTracker::detached("P-1");
    let outcome = pipeline.run_item(&patient("P-1"), &mut first, &stop).await;
    assert!(matches!(outcome, ItemOutcome::Fatal(DeliveryError::Auth(_))));
    assert!(stop.is_halted());
    assert_eq!(first.status(), &PipelineItemStatus::Sending);

    // A sibling sharing the signal never reaches the mail server.
    let mut second = ItemTracker::detached("P-2");
    let outcome = pipeline.run_item(&patient("P-2"), &mut second, &stop).await;
    assert!(matches!(outcome, ItemOutcome::Stopped));
    assert_eq!(second.status(), &PipelineItemStatus::Pending);
    assert_eq!(harness.mailer.attempts("p-2@example.com"), 0);
}

#[tokio::test]
async fn test_settled_item_runs_no_stage() {
    let harness = TestHarness::new(vec![patient("P-1")]);
    let mut tracker = ItemTracker::detached("P-1");
    for status in [
        PipelineItemStatus::Generating,
        PipelineItemStatus::Generated,
        PipelineItemStatus::Rendering,
        PipelineItemStatus::Rendered,
        PipelineItemStatus::Sending,
        PipelineItemStatus::Sent,
    ] {
        assert!(tracker.advance(status));
    }

    let outcome = harness
        .pipeline()
        .run_item(&patient("P-1"), &mut tracker, &StopSignal::new(CancelHandle::new()))
        .await;

    assert!(matches!(outcome, ItemOutcome::Stopped));
    assert_eq!(tracker.status(), &PipelineItemStatus::Sent);
    assert_eq!(harness.generator.calls("P-1"), 0);
    assert_eq!(harness.mailer.attempts("p-1@example.com"), 0);
}

#[tokio::test]
async fn test_store_calls_leave_the_runtime_thread() {
    let harness = TestHarness::new(Vec::new());
    harness.mailer.script(
        "p-2@example.com",
        vec![DeliveryError::RecipientRejected {
            code: Some(550),
            message: "mailbox unavailable".to_string(),
        }],
    );
    let store = Arc::new(ThreadRecordingStore::new(vec![patient("P-1"), patient("P-2")]));
    let controller = BatchController::new(
        Arc::new(harness.pipeline()),
        store.clone(),
        harness.config.clone(),
    );

    let run = controller
        .run_batch(&ids(&["P-1", "P-2"]), &CollectingProgress::new(), &CancelHandle::new())
        .await
        .unwrap();
    assert_eq!(run.succeeded, 1);
    assert_eq!(run.failed, 1);

    // Two lookups, one delivery and one failure write.
    let runtime_thread = std::thread::current().id();
    let threads = store.threads();
    assert_eq!(threads.len(), 4);
    assert!(threads.iter().all(|id| *id != runtime_thread));
}
