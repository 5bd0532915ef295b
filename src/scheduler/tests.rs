use super::*;
use crate::checkpoint::{CheckpointJournal, ContentHashSnapshotStore};
use crate::test_utils::{EchoTool, RecordingHooks};
use crate::tools::{ConfirmationDetails, ConfirmationKind};
use crate::types::ToolResult;
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn scheduler_with(tools: Vec<Arc<EchoTool>>, hooks: Arc<RecordingHooks>) -> ToolScheduler {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_arc(tool);
    }
    ToolScheduler::new(Arc::new(registry), hooks)
}

fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequestInfo {
    ToolCallRequestInfo::model(id, name, args)
}

fn output(record: &ToolCallRecord) -> Option<&str> {
    match &record.state {
        ToolCallState::Success { result, .. } => Some(result.llm_content.as_str()),
        _ => None,
    }
}

fn error_message(record: &ToolCallRecord) -> Option<&str> {
    match &record.state {
        ToolCallState::Error { message } => Some(message.as_str()),
        _ => None,
    }
}

fn cancel_reason(record: &ToolCallRecord) -> Option<&str> {
    match &record.state {
        ToolCallState::Cancelled { reason } => Some(reason.as_str()),
        _ => None,
    }
}

// ===================
// State Ordering
// ===================

fn arbitrary_state(choice: u8) -> ToolCallState {
    match choice % 6 {
        0 => ToolCallState::Validating,
        1 => ToolCallState::AwaitingApproval {
            details: ConfirmationDetails::new(ConfirmationKind::Exec, "Run", "ls"),
        },
        2 => ToolCallState::Executing,
        3 => ToolCallState::Success {
            result: ToolResult::new("ok"),
            duration_ms: 1,
        },
        4 => ToolCallState::Error {
            message: "boom".into(),
        },
        _ => ToolCallState::Cancelled {
            reason: CANCELLED_BY_TOKEN.into(),
        },
    }
}

proptest! {
    #[test]
    fn prop_position_strictly_increases(choices in prop::collection::vec(any::<u8>(), 0..32)) {
        let mut record = ToolCallRecord::new(call("c1", "shell", json!({})));
        for choice in choices {
            let before = record.clone();
            match record.transition(arbitrary_state(choice)) {
                Ok(()) => prop_assert!(record.position() > before.position()),
                Err(_) => prop_assert_eq!(&record, &before),
            }
        }
    }
}

// ===================
// Dispatch
// ===================

#[tokio::test]
async fn test_unknown_tool_errors() {
    let hooks = Arc::new(RecordingHooks::default());
    let scheduler = scheduler_with(vec![], hooks);

    let batch = scheduler
        .schedule(vec![call("c1", "nope", json!({}))], &[], &CancellationToken::new())
        .await;

    assert_eq!(
        error_message(&batch.records[0]),
        Some("Tool \"nope\" not found in registry.")
    );
    assert_eq!(
        batch.response_parts(),
        vec![Part::FunctionResponse {
            id: "c1".into(),
            name: "nope".into(),
            response: json!({ "error": "Tool \"nope\" not found in registry." }),
        }]
    );
}

#[tokio::test]
async fn test_duplicate_call_id_errors_second_only() {
    let tool = Arc::new(EchoTool::new("ls"));
    let scheduler = scheduler_with(vec![tool.clone()], Arc::new(RecordingHooks::default()));

    let batch = scheduler
        .schedule(
            vec![call("c1", "ls", json!({})), call("c1", "ls", json!({}))],
            &[],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(output(&batch.records[0]), Some("ls {}"));
    assert_eq!(
        error_message(&batch.records[1]),
        Some("Duplicate call id \"c1\" in batch")
    );
    assert_eq!(tool.executions(), 1);
}

#[tokio::test]
async fn test_invalid_args_error_without_execution() {
    let tool = Arc::new(EchoTool::new("ls"));
    let scheduler = scheduler_with(vec![tool.clone()], Arc::new(RecordingHooks::default()));

    let batch = scheduler
        .schedule(vec![call("c1", "ls", json!("not an object"))], &[], &CancellationToken::new())
        .await;

    assert_eq!(error_message(&batch.records[0]), Some("arguments must be an object"));
    assert_eq!(tool.executions(), 0);
}

#[tokio::test]
async fn test_failing_tool_does_not_affect_siblings() {
    let broken = Arc::new(EchoTool::new("broken").failing());
    let fine = Arc::new(EchoTool::new("fine"));
    let scheduler = scheduler_with(vec![broken, fine], Arc::new(RecordingHooks::default()));

    let batch = scheduler
        .schedule(
            vec![call("c1", "broken", json!({})), call("c2", "fine", json!({ "x": 1 }))],
            &[],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(error_message(&batch.records[0]), Some("broken failed"));
    assert_eq!(output(&batch.records[1]), Some("fine {\"x\":1}"));
    assert!(!batch.all_cancelled());
}

// ===================
// Confirmation
// ===================

#[tokio::test]
async fn test_denied_call_is_cancelled_and_not_run() {
    let tool = Arc::new(EchoTool::new("rm").confirming());
    let hooks = Arc::new(RecordingHooks::with_outcomes(vec![ConfirmationOutcome::Cancel]));
    let scheduler = scheduler_with(vec![tool.clone()], hooks.clone());

    let batch = scheduler
        .schedule(vec![call("c1", "rm", json!({}))], &[], &CancellationToken::new())
        .await;

    assert_eq!(cancel_reason(&batch.records[0]), Some(CANCELLED_BY_OPERATOR));
    assert!(batch.all_cancelled());
    assert_eq!(tool.executions(), 0);
    assert_eq!(hooks.confirmations().len(), 1);
    assert_eq!(
        batch.response_message(),
        Message::user_parts(vec![Part::FunctionResponse {
            id: "c1".into(),
            name: "rm".into(),
            response: json!({ "error": CANCELLED_BY_OPERATOR }),
        }])
    );
}

#[tokio::test]
async fn test_approved_call_runs() {
    let tool = Arc::new(EchoTool::new("rm").confirming());
    let hooks = Arc::new(RecordingHooks::with_outcomes(vec![ConfirmationOutcome::ProceedOnce]));
    let scheduler = scheduler_with(vec![tool.clone()], hooks.clone());

    let batch = scheduler
        .schedule(vec![call("c1", "rm", json!({ "path": "a" }))], &[], &CancellationToken::new())
        .await;

    assert_eq!(output(&batch.records[0]), Some("rm {\"path\":\"a\"}"));
    assert!(matches!(
        hooks.confirmations()[0].state,
        ToolCallState::AwaitingApproval { .. }
    ));
}

#[tokio::test]
async fn test_modified_args_are_revalidated_and_used() {
    let tool = Arc::new(EchoTool::new("rm").confirming());
    let hooks = Arc::new(RecordingHooks::with_outcomes(vec![
        ConfirmationOutcome::ModifyWithArgs(json!({ "path": "b" })),
        ConfirmationOutcome::ProceedOnce,
    ]));
    let scheduler = scheduler_with(vec![tool], hooks.clone());

    let batch = scheduler
        .schedule(vec![call("c1", "rm", json!({ "path": "a" }))], &[], &CancellationToken::new())
        .await;

    let record = &batch.records[0];
    assert_eq!(output(record), Some("rm {\"path\":\"b\"}"));
    assert_eq!(record.attempt, 1);
    assert_eq!(hooks.confirmations().len(), 2);
}

#[tokio::test]
async fn test_modified_args_that_fail_validation_error() {
    let tool = Arc::new(EchoTool::new("rm").confirming());
    let hooks = Arc::new(RecordingHooks::with_outcomes(vec![
        ConfirmationOutcome::ModifyWithArgs(json!([1, 2])),
    ]));
    let scheduler = scheduler_with(vec![tool.clone()], hooks);

    let batch = scheduler
        .schedule(vec![call("c1", "rm", json!({}))], &[], &CancellationToken::new())
        .await;

    assert_eq!(error_message(&batch.records[0]), Some("arguments must be an object"));
    assert_eq!(tool.executions(), 0);
}

#[tokio::test]
async fn test_proceed_always_skips_later_confirmations() {
    let tool = Arc::new(EchoTool::new("edit").confirming());
    let hooks = Arc::new(RecordingHooks::with_outcomes(vec![
        ConfirmationOutcome::ProceedAlways,
        ConfirmationOutcome::Cancel,
    ]));
    let scheduler = scheduler_with(vec![tool.clone()], hooks.clone());
    let cancel = CancellationToken::new();

    let first = scheduler
        .schedule(vec![call("c1", "edit", json!({}))], &[], &cancel)
        .await;
    let second = scheduler
        .schedule(vec![call("c2", "edit", json!({}))], &[], &cancel)
        .await;

    assert!(output(&first.records[0]).is_some());
    assert!(output(&second.records[0]).is_some());
    assert_eq!(hooks.confirmations().len(), 1);
    assert_eq!(tool.executions(), 2);
}

// ===================
// Cancellation
// ===================

#[tokio::test(start_paused = true)]
async fn test_cancel_during_execution() {
    let slow = Arc::new(EchoTool::new("slow").with_delay(Duration::from_secs(30)));
    let scheduler = scheduler_with(vec![slow.clone()], Arc::new(RecordingHooks::default()));
    let cancel = CancellationToken::new();

    let (batch, ()) = tokio::join!(
        scheduler.schedule(vec![call("c1", "slow", json!({}))], &[], &cancel),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    );

    assert_eq!(cancel_reason(&batch.records[0]), Some(CANCELLED_BY_TOKEN));
    assert_eq!(slow.executions(), 1);
    assert!(batch.all_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_abandons_pending_confirmation() {
    let tool = Arc::new(EchoTool::new("rm").confirming());
    let fine = Arc::new(EchoTool::new("ls"));
    let hooks = Arc::new(RecordingHooks::unresponsive());
    let scheduler = scheduler_with(vec![tool.clone(), fine], hooks.clone());
    let cancel = CancellationToken::new();

    let (batch, ()) = tokio::join!(
        scheduler.schedule(
            vec![call("c1", "rm", json!({})), call("c2", "ls", json!({}))],
            &[],
            &cancel
        ),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        }
    );

    assert_eq!(cancel_reason(&batch.records[0]), Some(CANCELLED_BY_TOKEN));
    assert_eq!(output(&batch.records[1]), Some("ls {}"));
    assert!(!batch.all_cancelled());
    assert_eq!(tool.executions(), 0);
    assert_eq!(hooks.confirmations().len(), 1);
}

#[tokio::test]
async fn test_already_cancelled_token_cancels_everything() {
    let tool = Arc::new(EchoTool::new("ls"));
    let scheduler = scheduler_with(vec![tool.clone()], Arc::new(RecordingHooks::default()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let batch = scheduler
        .schedule(
            vec![call("c1", "ls", json!({})), call("c2", "ls", json!({}))],
            &[],
            &cancel,
        )
        .await;

    assert!(batch.all_cancelled());
    assert_eq!(tool.executions(), 0);
}

#[test]
fn test_empty_batch_is_not_all_cancelled() {
    assert!(!CompletedBatch { records: vec![] }.all_cancelled());
}

// ===================
// Hooks and Checkpoints
// ===================

#[tokio::test]
async fn test_hooks_see_every_state_and_final_batch() {
    let hooks = Arc::new(RecordingHooks::default());
    let scheduler = scheduler_with(vec![Arc::new(EchoTool::new("ls"))], hooks.clone());

    let batch = scheduler
        .schedule(vec![call("c1", "ls", json!({}))], &[], &CancellationToken::new())
        .await;

    let states: Vec<&'static str> = hooks
        .updates()
        .iter()
        .map(|snapshot| snapshot[0].state.name())
        .collect();
    assert_eq!(states, vec!["validating", "executing", "success"]);
    assert_eq!(hooks.batches(), vec![batch]);
}

#[tokio::test]
async fn test_restorable_tool_is_checkpointed_before_running() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "before")?;

    let journal = CheckpointJournal::new(dir.path().join("checkpoints"));
    let store = Arc::new(ContentHashSnapshotStore::new(dir.path().join("snapshots")));
    let scheduler = scheduler_with(
        vec![Arc::new(EchoTool::new("write_file").restorable())],
        Arc::new(RecordingHooks::default()),
    )
    .with_checkpointer(Checkpointer::new(journal.clone(), store));
    let history = vec![Message::user("edit notes"), Message::model("on it")];

    let batch = scheduler
        .schedule(
            vec![call(
                "c1",
                "write_file",
                json!({ "file_path": file.display().to_string() }),
            )],
            &history,
            &CancellationToken::new(),
        )
        .await;

    assert!(output(&batch.records[0]).is_some());
    let names = journal.list().await?;
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("-notes.txt-write_file"));

    let checkpoint = journal.load(&names[0]).await?;
    assert_eq!(checkpoint.history, history);
    assert_eq!(checkpoint.tool_call.name, "write_file");
    assert_eq!(checkpoint.file_path, file.display().to_string());
    Ok(())
}

#[tokio::test]
async fn test_plain_tool_is_not_checkpointed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let journal = CheckpointJournal::new(dir.path().join("checkpoints"));
    let store = Arc::new(ContentHashSnapshotStore::new(dir.path().join("snapshots")));
    let scheduler = scheduler_with(
        vec![Arc::new(EchoTool::new("read_file"))],
        Arc::new(RecordingHooks::default()),
    )
    .with_checkpointer(Checkpointer::new(journal.clone(), store));

    scheduler
        .schedule(
            vec![call("c1", "read_file", json!({ "file_path": "x" }))],
            &[],
            &CancellationToken::new(),
        )
        .await;

    assert!(journal.list().await?.is_empty());
    Ok(())
}
