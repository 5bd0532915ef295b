use super::*;
use crate::checkpoint::ContentHashSnapshotStore;
use crate::events::ToolCallOrigin;
use crate::hooks::ConfirmationOutcome;
use crate::providers::FileCreationIntentExtractor;
use crate::scheduler::{CANCELLED_BY_OPERATOR, CANCELLED_BY_TOKEN, ToolCallState};
use crate::test_utils::{EchoTool, MockProvider, MockReply, RecordingHooks, collect_events};
use serde_json::json;
use std::time::Duration;

fn registry(tools: Vec<Arc<EchoTool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_arc(tool);
    }
    registry
}

fn builder(provider: &Arc<MockProvider>) -> AgentClientBuilder<Arc<dyn LlmProvider>> {
    AgentClient::builder()
        .shared_provider(provider.clone())
        .retry(RetryConfig::no_retry())
}

fn function_call(id: &str, name: &str, args: Value) -> Message {
    Message::model_parts(vec![Part::FunctionCall {
        id: Some(id.to_owned()),
        name: name.to_owned(),
        args,
    }])
}

fn function_response(id: &str, name: &str, response: Value) -> Message {
    Message::user_parts(vec![Part::FunctionResponse {
        id: id.to_owned(),
        name: name.to_owned(),
        response,
    }])
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            StreamEvent::Content { .. } => "content",
            StreamEvent::Thought { .. } => "thought",
            StreamEvent::ToolCallRequest(_) => "tool_call_request",
            StreamEvent::UsageMetadata { .. } => "usage",
            StreamEvent::ChatCompressed(_) => "compressed",
            StreamEvent::UserCancelled => "cancelled",
            StreamEvent::Error { .. } => "error",
        })
        .collect()
}

// ===================
// Tool Loop
// ===================

#[tokio::test]
async fn test_tool_call_continues_automatically() -> anyhow::Result<()> {
    let provider = Arc::new(
        MockProvider::new()
            .with_reply(MockReply::call("c1", "list_files", json!({})))
            .with_reply(MockReply::text("Here are the files")),
    );
    let client = builder(&provider)
        .tools(registry(vec![Arc::new(EchoTool::new("list_files"))]))
        .build();

    let events = collect_events(
        client.send_message_stream(vec![Part::text("list files")], CancellationToken::new()),
    )
    .await?;

    assert_eq!(
        kinds(&events),
        vec!["tool_call_request", "usage", "content", "usage"]
    );
    assert_eq!(
        client.history(false),
        vec![
            Message::user("list files"),
            function_call("c1", "list_files", json!({})),
            function_response("c1", "list_files", json!({ "output": "list_files {}" })),
            Message::model("Here are the files"),
        ]
    );
    assert_eq!(provider.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_denied_call_records_ack_without_continuation() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new().with_reply(MockReply::call(
        "c1",
        "delete_file",
        json!({ "file_path": "X" }),
    )));
    let tool = Arc::new(EchoTool::new("delete_file").confirming());
    let hooks = Arc::new(RecordingHooks::with_outcomes(vec![ConfirmationOutcome::Cancel]));
    let client = builder(&provider)
        .tools(registry(vec![tool.clone()]))
        .shared_hooks(hooks.clone())
        .build();

    let events = collect_events(
        client.send_message_stream(vec![Part::text("delete file X")], CancellationToken::new()),
    )
    .await?;

    assert_eq!(kinds(&events), vec!["tool_call_request", "usage"]);
    assert_eq!(
        client.history(false),
        vec![
            Message::user("delete file X"),
            function_call("c1", "delete_file", json!({ "file_path": "X" })),
            function_response("c1", "delete_file", json!({ "error": CANCELLED_BY_OPERATOR })),
        ]
    );
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(tool.executions(), 0);
    assert_eq!(hooks.confirmations().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_partially_denied_batch_still_continues() -> anyhow::Result<()> {
    let provider = Arc::new(
        MockProvider::new()
            .with_reply(MockReply::chunks(vec![
                crate::test_utils::call_chunk(Some("c1"), "rm", json!({})),
                crate::test_utils::call_chunk(Some("c2"), "ls", json!({})),
            ]))
            .with_reply(MockReply::text("Listed, not removed")),
    );
    let hooks = Arc::new(RecordingHooks::with_outcomes(vec![ConfirmationOutcome::Cancel]));
    let client = builder(&provider)
        .tools(registry(vec![
            Arc::new(EchoTool::new("rm").confirming()),
            Arc::new(EchoTool::new("ls")),
        ]))
        .shared_hooks(hooks)
        .build();

    collect_events(client.send_message_stream(vec![Part::text("tidy")], CancellationToken::new()))
        .await?;

    let history = client.history(false);
    assert_eq!(history.len(), 4);
    assert_eq!(
        history[2],
        Message::user_parts(vec![
            Part::FunctionResponse {
                id: "c1".into(),
                name: "rm".into(),
                response: json!({ "error": CANCELLED_BY_OPERATOR }),
            },
            Part::FunctionResponse {
                id: "c2".into(),
                name: "ls".into(),
                response: json!({ "output": "ls {}" }),
            },
        ])
    );
    assert_eq!(history[3], Message::model("Listed, not removed"));
    Ok(())
}

#[tokio::test]
async fn test_max_session_turns_ends_with_error() -> anyhow::Result<()> {
    let provider = Arc::new(
        MockProvider::new()
            .with_reply(MockReply::call("c1", "ls", json!({})))
            .with_reply(MockReply::call("c2", "ls", json!({})))
            .with_reply(MockReply::text("never sent")),
    );
    let client = builder(&provider)
        .tools(registry(vec![Arc::new(EchoTool::new("ls"))]))
        .config(ClientConfig::default().with_max_session_turns(2))
        .build();

    let events = collect_events(
        client.send_message_stream(vec![Part::text("loop")], CancellationToken::new()),
    )
    .await?;

    assert_eq!(
        events.last(),
        Some(&StreamEvent::error("Maximum session turns (2) reached", None))
    );
    assert_eq!(provider.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_intent_calls_on_backend_without_function_calling() -> anyhow::Result<()> {
    let provider = Arc::new(
        MockProvider::new()
            .without_function_calling()
            .with_reply(MockReply::text(
                "Create file `notes.txt` with:\n```\nremember\n```\n",
            ))
            .with_reply(MockReply::text("Saved")),
    );
    let client = builder(&provider)
        .tools(registry(vec![Arc::new(EchoTool::new("write_file"))]))
        .intent_extractor(Arc::new(FileCreationIntentExtractor::new("write_file")?))
        .build();

    let events = collect_events(
        client.send_message_stream(vec![Part::text("save a note")], CancellationToken::new()),
    )
    .await?;

    assert_eq!(
        kinds(&events),
        vec!["content", "tool_call_request", "usage", "content", "usage"]
    );
    let history = client.history(false);
    assert_eq!(history.len(), 4);
    assert!(matches!(
        history[2].parts.as_slice(),
        [Part::FunctionResponse { name, .. }] if name == "write_file"
    ));
    assert_eq!(history[3], Message::model("Saved"));
    Ok(())
}

// ===================
// Cancellation and Errors
// ===================

#[tokio::test]
async fn test_cancel_mid_stream_stops_the_loop() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new().with_reply(MockReply::chunks(vec![
        crate::test_utils::text_chunk("one"),
        crate::test_utils::text_chunk("two"),
    ])));
    let client = builder(&provider).build();
    let cancel = CancellationToken::new();

    let mut events = Vec::new();
    let mut stream = Box::pin(client.send_message_stream(vec![Part::text("go")], cancel.clone()));
    while let Some(event) = stream.next().await {
        let event = event?;
        if matches!(event, StreamEvent::Content { .. }) {
            cancel.cancel();
        }
        events.push(event);
    }
    drop(stream);

    assert_eq!(kinds(&events), vec!["content", "cancelled"]);
    assert_eq!(client.history(false), vec![Message::user("go")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_tools_acknowledges_calls() -> anyhow::Result<()> {
    let provider = Arc::new(
        MockProvider::new()
            .with_reply(MockReply::call("c1", "build", json!({})))
            .with_reply(MockReply::text("never sent")),
    );
    let client = builder(&provider)
        .tools(registry(vec![Arc::new(
            EchoTool::new("build").with_delay(Duration::from_secs(60)),
        )]))
        .build();
    let cancel = CancellationToken::new();

    let (events, ()) = tokio::join!(
        collect_events(client.send_message_stream(vec![Part::text("build it")], cancel.clone())),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    );
    let events = events?;

    assert_eq!(kinds(&events), vec!["tool_call_request", "usage", "cancelled"]);
    assert_eq!(
        client.history(false).last(),
        Some(&function_response(
            "c1",
            "build",
            json!({ "error": CANCELLED_BY_TOKEN })
        ))
    );
    assert_eq!(provider.requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_authentication_error_is_rethrown() {
    let provider = Arc::new(MockProvider::new().with_reply(MockReply::Reject(
        ProviderError::from_status(403, "permission denied", None),
    )));
    let client = builder(&provider).build();

    let result =
        collect_events(client.send_message_stream(vec![Part::text("hi")], CancellationToken::new()))
            .await;

    assert!(matches!(result, Err(e) if e.is_authentication()));
}

#[tokio::test]
async fn test_backend_error_ends_with_error_event() -> anyhow::Result<()> {
    let provider = Arc::new(MockProvider::new().with_reply(MockReply::Reject(
        ProviderError::from_status(400, "bad request", None),
    )));
    let client = builder(&provider).build();

    let events = collect_events(
        client.send_message_stream(vec![Part::text("hi")], CancellationToken::new()),
    )
    .await?;

    assert_eq!(kinds(&events), vec!["error"]);
    assert!(client.history(false).is_empty());
    Ok(())
}

// ===================
// Compression
// ===================

#[tokio::test]
async fn test_compresses_before_turn_when_near_limit() -> anyhow::Result<()> {
    let provider = Arc::new(
        MockProvider::new()
            .with_token_counts(vec![990, 40])
            .with_reply(MockReply::text("We talked about parsers."))
            .with_reply(MockReply::text("Sure")),
    );
    let client = builder(&provider)
        .compression(CompressionConfig::default().with_token_limit(1000))
        .history(vec![Message::user("earlier"), Message::model("reply")])
        .build();

    let events = collect_events(
        client.send_message_stream(vec![Part::text("go on")], CancellationToken::new()),
    )
    .await?;

    assert_eq!(
        events[0],
        StreamEvent::ChatCompressed(ChatCompressionInfo {
            original_token_count: 990,
            new_token_count: 40,
        })
    );
    assert_eq!(kinds(&events), vec!["compressed", "content", "usage"]);

    let history = client.history(false);
    assert_eq!(history.len(), 4);
    assert_eq!(history[1], Message::model("We talked about parsers."));
    assert_eq!(history[3], Message::model("Sure"));
    Ok(())
}

// ===================
// Client Tools and Checkpoints
// ===================

#[tokio::test]
async fn test_client_tool_runs_without_model() {
    let provider = Arc::new(MockProvider::new());
    let client = builder(&provider)
        .tools(registry(vec![Arc::new(EchoTool::new("ls"))]))
        .build();

    let batch = client
        .run_client_tool("ls", json!({}), &CancellationToken::new())
        .await;

    let record = &batch.records[0];
    assert_eq!(record.request.origin, ToolCallOrigin::ClientInitiated);
    assert!(record.call_id().starts_with("ls-"));
    assert!(matches!(record.state, ToolCallState::Success { .. }));
    assert!(client.history(false).is_empty());
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn test_checkpoint_restores_files_and_history() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}")?;
    let args = json!({ "file_path": file.display().to_string() });

    let provider = Arc::new(
        MockProvider::new()
            .with_reply(MockReply::call("c1", "write_file", args.clone()))
            .with_reply(MockReply::text("Done")),
    );
    let client = builder(&provider)
        .tools(registry(vec![Arc::new(EchoTool::new("write_file").restorable())]))
        .checkpointing(
            CheckpointJournal::new(dir.path().join("checkpoints")),
            Arc::new(ContentHashSnapshotStore::new(dir.path().join("snapshots"))),
        )
        .build();

    collect_events(client.send_message_stream(vec![Part::text("edit")], CancellationToken::new()))
        .await?;
    std::fs::write(&file, "fn main() { broken }")?;

    let names = client.list_checkpoints().await?;
    assert_eq!(names.len(), 1);
    let checkpoint = client.restore_checkpoint(&names[0]).await?;

    assert_eq!(std::fs::read_to_string(&file)?, "fn main() {}");
    assert_eq!(checkpoint.tool_call.args, args);
    assert_eq!(
        client.history(false),
        vec![Message::user("edit"), function_call("c1", "write_file", args)]
    );
    Ok(())
}

#[tokio::test]
async fn test_restore_without_checkpointing_is_not_found() {
    let provider = Arc::new(MockProvider::new());
    let client = builder(&provider).build();

    assert!(client.list_checkpoints().await.is_ok_and(|n| n.is_empty()));
    assert!(matches!(
        client.restore_checkpoint("anything").await,
        Err(CheckpointError::NotFound(_))
    ));
}
