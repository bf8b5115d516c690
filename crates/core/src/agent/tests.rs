use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colloquy_model::{
    ErrorKind, Message, ModelCapabilities, Part, Role, ToolCallRequest, ToolOutput,
};
use colloquy_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::prompts::{CONTINUE_PROMPT, SNAPSHOT_PREAMBLE};
use crate::tool::{Tool, ToolResult, ToolSet, parameter_schema_for};
use crate::{
    AgentBuilder, AgentConfig, AgentEvent, AuthType, EnvironmentContext,
    RetryOptions, ToolCallResponse, TurnOutcome,
};

#[derive(Deserialize, JsonSchema)]
struct ListFilesInput {
    /// Directory to list.
    #[allow(dead_code)]
    path: String,
}

#[derive(Clone)]
struct ListFilesTool {
    parameter_schema: Value,
    calls: Arc<AtomicUsize>,
}

impl ListFilesTool {
    fn new() -> Self {
        Self {
            parameter_schema: parameter_schema_for::<ListFilesInput>(),
            calls: Arc::default(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for ListFilesTool {
    type Input = ListFilesInput;

    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "Lists files in a directory."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async { Ok("a.txt\nb.txt".into()) }
    }
}

/// Never finishes unless cancelled.
#[derive(Clone)]
struct HangingTool {
    calls: Arc<AtomicUsize>,
}

impl HangingTool {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

static EMPTY_SCHEMA: Value = Value::Null;

impl Tool for HangingTool {
    type Input = Value;

    fn name(&self) -> &str {
        "build"
    }

    fn description(&self) -> &str {
        "Builds the project."
    }

    fn parameter_schema(&self) -> &Value {
        &EMPTY_SCHEMA
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pending()
    }
}

fn call(id: &str, name: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        args: json!({ "path": "." }).as_object().cloned().unwrap(),
    }
}

fn fast_retry(max_attempts: u32) -> RetryOptions {
    RetryOptions {
        max_attempts,
        base_delay_ms: 10,
        max_delay_ms: 100,
        jitter: 0.0,
    }
}

#[tokio::test]
async fn test_simple_message() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("4"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone()).build();
    let mut events = vec![];
    let outcome = agent
        .send_message("What is 2+2?", &CancellationToken::new(), |event| {
            events.push(event)
        })
        .await;

    assert!(outcome.is_completed());
    assert_eq!(events, vec![AgentEvent::Content("4".to_owned())]);
    assert_eq!(agent.transcript().messages(), &[
        Message::user_text("What is 2+2?"),
        Message::model_text("4"),
    ]);
    assert_eq!(model_provider.requests().len(), 1);
}

#[tokio::test]
async fn test_tool_round_trip() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([PresetEvent::ToolCall(
        call("call_1", "list_files"),
    )]));
    model_provider.add_response(PresetResponse::with_text("There are a.txt and b.txt."));
    let tool = ListFilesTool::new();

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(tool.clone())
        .build();
    let mut events = vec![];
    let outcome = agent
        .send_message("list files", &CancellationToken::new(), |event| {
            events.push(event)
        })
        .await;

    assert!(outcome.is_completed());
    assert_eq!(tool.calls(), 1);
    assert_eq!(events, vec![
        AgentEvent::ToolCallRequest(call("call_1", "list_files")),
        AgentEvent::ToolCallResponse(ToolCallResponse {
            id: "call_1".to_owned(),
            name: "list_files".to_owned(),
            result_display: "a.txt\nb.txt".to_owned(),
            error: None,
        }),
        AgentEvent::Content("There are a.txt and b.txt.".to_owned()),
    ]);

    let messages = agent.transcript().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].role, Role::Model);
    assert_eq!(messages[1].tool_calls().count(), 1);
    assert_eq!(messages[2].role, Role::User);
    let result = messages[2].tool_results().next().unwrap();
    assert_eq!(result.tool_call_id, "call_1");
    assert_eq!(result.output, ToolOutput::Success("a.txt\nb.txt".to_owned()));
    assert_eq!(messages[3], Message::model_text("There are a.txt and b.txt."));

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "list_files");
    assert_eq!(requests[1].messages.len(), 3);
}

#[tokio::test]
async fn test_tool_failure_is_reported_to_model() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([PresetEvent::ToolCall(
        call("call_1", "delete_everything"),
    )]));
    model_provider.add_response(PresetResponse::with_text("I can't do that."));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(ListFilesTool::new())
        .build();
    let mut events = vec![];
    let outcome = agent
        .send_message("clean up", &CancellationToken::new(), |event| {
            events.push(event)
        })
        .await;

    assert!(outcome.is_completed());
    let AgentEvent::ToolCallResponse(response) = &events[1] else {
        panic!("unexpected event: {:?}", events[1]);
    };
    assert!(response.error.is_some());
    let result = agent.transcript().messages()[2].tool_results().next().unwrap();
    assert!(result.output.is_error());
}

#[tokio::test]
async fn test_iteration_limit() {
    let model_provider = TestModelProvider::default();
    for i in 0..11 {
        model_provider.add_response(PresetResponse::with_events([PresetEvent::ToolCall(
            call(&format!("call_{i}"), "list_files"),
        )]));
    }
    let tool = ListFilesTool::new();

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_config(AgentConfig {
            max_tool_iterations: 10,
            ..Default::default()
        })
        .with_tool(tool.clone())
        .build();
    let outcome = agent
        .send_message("loop forever", &CancellationToken::new(), |_| {})
        .await;

    assert!(matches!(outcome, TurnOutcome::IterationLimitReached));
    assert_eq!(tool.calls(), 10);
    assert_eq!(model_provider.requests().len(), 10);
    assert_eq!(model_provider.remaining_responses(), 1);
    // Every call is answered, so the next message starts from a valid state.
    assert_eq!(agent.transcript().len(), 21);
}

#[tokio::test(start_paused = true)]
async fn test_retry_transient_failures() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(
        PresetResponse::with_text("4")
            .with_failures(3)
            .with_failure_kind(ErrorKind::Transport),
    );

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone()).build();
    let mut events = vec![];
    let outcome = agent
        .send_message("What is 2+2?", &CancellationToken::new(), |event| {
            events.push(event)
        })
        .await;

    assert!(outcome.is_completed());
    assert_eq!(events, vec![AgentEvent::Content("4".to_owned())]);
    assert_eq!(model_provider.requests().len(), 4);
}

#[tokio::test]
async fn test_non_retryable_failure() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(
        PresetResponse::with_text("never")
            .with_failures(0)
            .with_failure_kind(ErrorKind::Authentication),
    );

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone()).build();
    let mut events = vec![];
    let outcome = agent
        .send_message("Hello", &CancellationToken::new(), |event| events.push(event))
        .await;

    let TurnOutcome::Failed(err) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(err.kind(), Some(ErrorKind::Authentication));
    assert!(matches!(events.as_slice(), [AgentEvent::Error(_)]));
    assert_eq!(model_provider.requests().len(), 1);
    assert_eq!(agent.transcript().messages(), &[Message::user_text("Hello")]);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_on_persistent_rate_limit() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("4").with_failures(2));
    let asked = Arc::new(Mutex::new(vec![]));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_config(AgentConfig {
            auth_type: AuthType::Interactive,
            retry: fast_retry(2),
            ..Default::default()
        })
        .on_fallback({
            let asked = asked.clone();
            move |current, fallback| {
                asked
                    .lock()
                    .unwrap()
                    .push((current.to_owned(), fallback.to_owned()));
                true
            }
        })
        .build();
    let outcome = agent
        .send_message("What is 2+2?", &CancellationToken::new(), |_| {})
        .await;

    assert!(outcome.is_completed());
    assert_eq!(agent.model(), "gemini-2.5-flash");
    assert_eq!(*asked.lock().unwrap(), vec![(
        "gemini-2.5-pro".to_owned(),
        "gemini-2.5-flash".to_owned()
    )]);
    let models: Vec<_> = model_provider
        .requests()
        .into_iter()
        .map(|req| req.model)
        .collect();
    assert_eq!(models, vec![
        "gemini-2.5-pro",
        "gemini-2.5-pro",
        "gemini-2.5-flash"
    ]);

    agent.reset();
    assert_eq!(agent.model(), "gemini-2.5-pro");
}

#[tokio::test(start_paused = true)]
async fn test_no_fallback_with_api_key() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("4").with_failures(2));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_config(AgentConfig {
            auth_type: AuthType::ApiKey,
            retry: fast_retry(2),
            ..Default::default()
        })
        .on_fallback(|_, _| panic!("fallback must not be offered"))
        .build();
    let outcome = agent
        .send_message("What is 2+2?", &CancellationToken::new(), |_| {})
        .await;

    let TurnOutcome::Failed(err) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(err.kind(), Some(ErrorKind::RateLimitExceeded));
    assert_eq!(agent.model(), "gemini-2.5-pro");
    assert_eq!(model_provider.requests().len(), 2);
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([PresetEvent::ToolCall(
        call("call_1", "list_files"),
    )]));
    model_provider.add_response(PresetResponse::with_text("Hi again."));
    let tool = ListFilesTool::new();

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(tool.clone())
        .build();
    let cancel = CancellationToken::new();
    let mut events = vec![];
    let outcome = agent
        .send_message("list files", &cancel, |event| {
            if matches!(event, AgentEvent::ToolCallRequest(_)) {
                cancel.cancel();
            }
            events.push(event);
        })
        .await;

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert_eq!(tool.calls(), 0);
    assert_eq!(events, vec![
        AgentEvent::ToolCallRequest(call("call_1", "list_files")),
        AgentEvent::ToolCallResponse(ToolCallResponse {
            id: "call_1".to_owned(),
            name: "list_files".to_owned(),
            result_display: "Cancelled".to_owned(),
            error: Some("Cancelled".to_owned()),
        }),
        AgentEvent::UserCancelled,
    ]);

    // The session is still usable.
    let outcome = agent
        .send_message("hello?", &CancellationToken::new(), |_| {})
        .await;
    assert!(outcome.is_completed());
    assert_eq!(
        agent.transcript().last_model_message(),
        Some(&Message::model_text("Hi again."))
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_tool_execution() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::ToolCall(call("call_1", "build")),
        PresetEvent::ToolCall(call("call_2", "build")),
    ]));
    let tool = HangingTool {
        calls: Arc::default(),
    };

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(tool.clone())
        .build();
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    });

    let mut events = vec![];
    let outcome = agent
        .send_message("build it", &cancel, |event| events.push(event))
        .await;

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert_eq!(tool.calls(), 1);
    assert_eq!(events.len(), 5);
    assert!(matches!(&events[2], AgentEvent::ToolCallResponse(resp) if resp.error.is_some()));
    assert!(matches!(&events[3], AgentEvent::ToolCallResponse(resp) if resp.id == "call_2"));
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == AgentEvent::UserCancelled)
            .count(),
        1
    );

    // Both calls are answered.
    let messages = agent.transcript().messages();
    assert_eq!(messages.len(), 3);
    let results: Vec<_> = messages[2].tool_results().collect();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.output.is_error()));
}

#[tokio::test]
async fn test_every_request_answered_on_cancel() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::ToolCall(call("call_1", "list_files")),
        PresetEvent::ToolCall(call("call_2", "list_files")),
    ]));
    let tool = ListFilesTool::new();

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(tool.clone())
        .build();
    let cancel = CancellationToken::new();
    let mut events = vec![];
    let outcome = agent
        .send_message("list files twice", &cancel, |event| {
            if matches!(event, AgentEvent::ToolCallResponse(_)) {
                cancel.cancel();
            }
            events.push(event);
        })
        .await;

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert_eq!(tool.calls(), 1);
    let requests: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::ToolCallRequest(call) => Some(call.id.as_str()),
            _ => None,
        })
        .collect();
    let responses: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            AgentEvent::ToolCallResponse(resp) => Some(resp.id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(requests, vec!["call_1", "call_2"]);
    assert_eq!(responses, requests);
    assert!(matches!(
        &events[3],
        AgentEvent::ToolCallResponse(resp) if resp.error.as_deref() == Some("Cancelled")
    ));
    assert_eq!(events.last(), Some(&AgentEvent::UserCancelled));
}

#[tokio::test]
async fn test_cancel_mid_stream_answers_announced_calls() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::ToolCall(call("call_1", "list_files")),
        PresetEvent::TextDelta("and more".to_owned()),
    ]));
    let tool = ListFilesTool::new();

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(tool.clone())
        .build();
    let cancel = CancellationToken::new();
    let mut events = vec![];
    let outcome = agent
        .send_message("list files", &cancel, |event| {
            if matches!(event, AgentEvent::ToolCallRequest(_)) {
                cancel.cancel();
            }
            events.push(event);
        })
        .await;

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert_eq!(tool.calls(), 0);
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[1], AgentEvent::ToolCallResponse(resp) if resp.id == "call_1"));
    // The unfinished response is not recorded.
    assert_eq!(agent.transcript().messages(), &[Message::user_text("list files")]);
}

#[tokio::test]
async fn test_session_turn_limit() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("Hi."));
    model_provider.add_response(PresetResponse::with_text("Hi again."));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_config(AgentConfig {
            max_session_turns: 1,
            ..Default::default()
        })
        .build();
    let outcome = agent
        .send_message("Hello", &CancellationToken::new(), |_| {})
        .await;
    assert!(outcome.is_completed());
    assert_eq!(agent.session_turns_left(), 0);

    let mut events = vec![];
    let outcome = agent
        .send_message("Hello?", &CancellationToken::new(), |event| events.push(event))
        .await;
    assert!(matches!(outcome, TurnOutcome::SessionLimitReached));
    assert_eq!(events, vec![AgentEvent::MaxSessionTurnsReached]);
    assert_eq!(model_provider.requests().len(), 1);

    agent.reset();
    assert_eq!(agent.session_turns_left(), 1);
    assert!(agent.transcript().is_empty());
    let outcome = agent
        .send_message("Hello", &CancellationToken::new(), |_| {})
        .await;
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn test_next_speaker_continues() {
    let mut model_provider = TestModelProvider::default();
    model_provider.set_capabilities(ModelCapabilities {
        structured_output: true,
        ..Default::default()
    });
    model_provider.add_response(PresetResponse::with_text("Next, I will check the tests."));
    model_provider.add_response(PresetResponse::with_text("All tests pass."));
    model_provider.add_json_response(json!({
        "reasoning": "The model announced its next action.",
        "next_speaker": "model"
    }));
    model_provider.add_json_response(json!({
        "reasoning": "The task is done.",
        "next_speaker": "user"
    }));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone()).build();
    let mut events = vec![];
    let outcome = agent
        .send_message("Fix the tests", &CancellationToken::new(), |event| {
            events.push(event)
        })
        .await;

    assert!(outcome.is_completed());
    assert_eq!(events, vec![
        AgentEvent::Content("Next, I will check the tests.".to_owned()),
        AgentEvent::Content("All tests pass.".to_owned()),
    ]);
    assert_eq!(agent.transcript().messages(), &[
        Message::user_text("Fix the tests"),
        Message::model_text("Next, I will check the tests."),
        Message::user_text(CONTINUE_PROMPT),
        Message::model_text("All tests pass."),
    ]);
    assert_eq!(model_provider.generate_requests().len(), 2);
}

#[tokio::test]
async fn test_forced_compression() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("Noted."));
    model_provider.add_generate_response("<state_snapshot>goal</state_snapshot>");
    model_provider.add_generate_response("y".repeat(1_000));

    let mut agent = AgentBuilder::with_model_provider(model_provider).build();
    agent
        .send_message("x".repeat(4_000), &CancellationToken::new(), |_| {})
        .await;

    let cancel = CancellationToken::new();
    let record = agent.try_compress(true, &cancel).await.unwrap().unwrap();
    assert!(record.new_token_count < record.original_token_count);
    assert_eq!(record.original_token_count, agent_tokens_before());
    let messages = agent.transcript().messages().to_vec();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text(), SNAPSHOT_PREAMBLE);

    // A snapshot longer than the transcript is discarded.
    let record = agent.try_compress(true, &cancel).await.unwrap();
    assert!(record.is_none());
    assert_eq!(agent.transcript().messages(), messages.as_slice());
}

// "x" * 4000 and "Noted."
fn agent_tokens_before() -> u64 {
    (4_000u64 + 6).div_ceil(4)
}

#[tokio::test]
async fn test_automatic_compression() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("ok"));
    model_provider.add_response(PresetResponse::with_text("done"));
    model_provider.add_generate_response("<state_snapshot>x</state_snapshot>");

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_config(AgentConfig {
            context_window: Some(100),
            compression_threshold: 0.5,
            ..Default::default()
        })
        .build();
    agent
        .send_message("x".repeat(400), &CancellationToken::new(), |_| {})
        .await;

    let mut events = vec![];
    let outcome = agent
        .send_message("next", &CancellationToken::new(), |event| events.push(event))
        .await;
    assert!(outcome.is_completed());
    assert!(matches!(events[0], AgentEvent::ChatCompressed(record)
        if record.new_token_count < record.original_token_count));
    assert_eq!(events[1], AgentEvent::Content("done".to_owned()));

    let messages = agent.transcript().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2], Message::user_text("next"));
}

#[tokio::test]
async fn test_environment_preamble() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("Hi."));
    let environment = EnvironmentContext {
        working_dir: "/work".into(),
        date: "Monday, October 19, 2026".to_owned(),
        platform: "linux".to_owned(),
        full_context: None,
    };

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_environment(environment)
        .build();
    assert_eq!(agent.transcript().len(), 2);
    agent
        .send_message("x".repeat(2_000), &CancellationToken::new(), |_| {})
        .await;

    let request = &model_provider.requests()[0];
    assert_eq!(request.messages.len(), 3);
    assert!(request.messages[0].text().contains("/work"));

    // Compression keeps the environment.
    model_provider.add_generate_response("<state_snapshot>goal</state_snapshot>");
    let record = agent
        .try_compress(true, &CancellationToken::new())
        .await
        .unwrap();
    assert!(record.is_some());
    let messages = agent.transcript().messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].text().contains("/work"));
    assert!(messages[0].text().ends_with(SNAPSHOT_PREAMBLE));

    agent.reset();
    assert_eq!(agent.transcript().len(), 2);
}

#[tokio::test]
async fn test_empty_response() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([]));

    let mut agent = AgentBuilder::with_model_provider(model_provider).build();
    let mut events = vec![];
    let outcome = agent
        .send_message("...", &CancellationToken::new(), |event| events.push(event))
        .await;

    assert!(outcome.is_completed());
    assert!(events.is_empty());
    assert_eq!(
        agent.transcript().messages().last().map(|msg| msg.parts.clone()),
        Some(vec![Part::Text("...".to_owned())])
    );
}

#[tokio::test]
async fn test_tool_registry_overrides_tools() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([PresetEvent::ToolCall(
        call("call_1", "list_files"),
    )]));
    model_provider.add_response(PresetResponse::with_text("Done."));
    let registered = ListFilesTool::new();
    let ignored = ListFilesTool::new();

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(ignored.clone())
        .with_tool_registry(ToolSet::new().with_tool(registered.clone()))
        .with_span(tracing::info_span!("registry test"))
        .build();
    let outcome = agent
        .send_message("list files", &CancellationToken::new(), |_| {})
        .await;

    assert!(outcome.is_completed());
    assert_eq!(registered.calls(), 1);
    assert_eq!(ignored.calls(), 0);
    let requests = model_provider.requests();
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "list_files");
}

#[tokio::test]
async fn test_failed_compression_is_skipped() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("ok"));
    model_provider.add_response(PresetResponse::with_text("done"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_config(AgentConfig {
            context_window: Some(100),
            retry: fast_retry(1),
            ..Default::default()
        })
        .build();
    agent
        .send_message("x".repeat(400), &CancellationToken::new(), |_| {})
        .await;

    // No snapshot is scripted, so the summary call fails.
    let mut events = vec![];
    let outcome = agent
        .send_message("next", &CancellationToken::new(), |event| events.push(event))
        .await;
    assert!(outcome.is_completed());
    assert_eq!(events, vec![AgentEvent::Content("done".to_owned())]);
    assert_eq!(model_provider.generate_requests().len(), 1);
    assert_eq!(agent.transcript().len(), 4);
}

#[tokio::test]
async fn test_stream_error_after_content() {
    let model_provider = TestModelProvider::default();
    model_provider.add_response(
        PresetResponse::with_text("The answer").interrupted_by(ErrorKind::Transport),
    );

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone()).build();
    let mut events = vec![];
    let outcome = agent
        .send_message("What is 2+2?", &CancellationToken::new(), |event| {
            events.push(event)
        })
        .await;

    let TurnOutcome::Failed(err) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(err.kind(), Some(ErrorKind::Transport));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], AgentEvent::Content("The answer".to_owned()));
    assert!(matches!(&events[1], AgentEvent::Error(_)));
    assert_eq!(model_provider.requests().len(), 1);
    // The partial response is not recorded.
    assert_eq!(agent.transcript().messages(), &[Message::user_text("What is 2+2?")]);
}
