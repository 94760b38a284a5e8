//! End-to-end exchanges against a scripted model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipeline_agent::actions::ActionExecutor;
use pipeline_agent::agent::{ExchangeCallbacks, Status};
use pipeline_agent::llm::{
    LlmClient, LlmError, Message, ModelRequest, ModelResponse, Role, ToolCall, ToolDefinition,
};
use pipeline_agent::pipeline::{Artifact, PipelineSchemaValidator, StepGraphCompiler};
use pipeline_agent::tools::{ChatNote, OutputPayload};
use pipeline_agent::{
    AgentError, AgentOptions, AgentSnapshot, ControlRequest, ConversationHandle,
    InMemorySnapshotStore, Phase, PipelineAgent, SnapshotStore, StatusKind,
};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

struct Script {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl Script {
    fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for Script {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".into()))
    }
}

/// Answers every request with a one-step pipeline for the URL in the prompt.
struct UrlEcho;

#[async_trait]
impl LlmClient for UrlEcho {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .find_map(|m| match m {
                Message::Text {
                    role: Role::User,
                    content,
                } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_default();
        tokio::task::yield_now().await;
        Ok(answer(&goto_pipeline(&prompt).to_string()))
    }
}

struct FakeBrowser;

#[async_trait]
impl ActionExecutor for FakeBrowser {
    fn actions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "goto".into(),
            description: "Navigate to a URL and return the page title".into(),
            parameters: json!({"type": "object", "properties": {"url": {"type": "string"}}}),
        }]
    }

    async fn execute(
        &self,
        action: &str,
        arguments: Value,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        match action {
            "goto" => Ok(json!({"url": arguments["url"], "title": "Example Domain"})),
            other => anyhow::bail!("unsupported action {}", other),
        }
    }
}

/// Browser whose actions only acknowledge.
struct AckBrowser;

#[async_trait]
impl ActionExecutor for AckBrowser {
    fn actions(&self) -> Vec<ToolDefinition> {
        FakeBrowser.actions()
    }

    async fn execute(
        &self,
        _action: &str,
        _arguments: Value,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        Ok(json!({"ok": true}))
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    updates: Mutex<Vec<Artifact>>,
    statuses: Mutex<Vec<Status>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn last_status(&self) -> Status {
        self.statuses.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ExchangeCallbacks for Recorder {
    async fn on_raw_messages(&self, _id: Uuid, _messages: &[Message]) {
        self.events.lock().unwrap().push("raw_messages".into());
    }

    async fn on_chat(&self, _id: Uuid, note: &ChatNote) {
        self.events.lock().unwrap().push(format!("chat:{}", note.message));
    }

    async fn on_output(&self, _id: Uuid, _output: &OutputPayload) {
        self.events.lock().unwrap().push("output".into());
    }

    async fn on_artifact_update(&self, _id: Uuid, artifact: &Artifact) {
        self.events.lock().unwrap().push("artifact_update".into());
        self.updates.lock().unwrap().push(artifact.clone());
    }

    async fn on_status(&self, _id: Uuid, status: &Status) {
        self.events.lock().unwrap().push("status".into());
        self.statuses.lock().unwrap().push(status.clone());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn answer(text: &str) -> ModelResponse {
    ModelResponse {
        items: vec![Message::assistant(text)],
        usage: None,
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ModelResponse {
    ModelResponse {
        items: vec![Message::ToolCall(ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        })],
        usage: None,
    }
}

fn goto_pipeline(url: &str) -> Value {
    json!({
        "goto1": {
            "node": "page::goto",
            "inputs": { "url": { "type": "constant", "value": url } },
            "outputs": {},
            "dependsOn": []
        },
        "title": {
            "node": "page::title",
            "inputs": {},
            "outputs": { "title": {} },
            "dependsOn": ["goto1"]
        }
    })
}

fn agent(client: Arc<dyn LlmClient>, recorder: Arc<Recorder>) -> PipelineAgent {
    PipelineAgent::new(
        client,
        Arc::new(FakeBrowser),
        Arc::new(PipelineSchemaValidator::new()),
        Arc::new(StepGraphCompiler::strict()),
        AgentOptions::default(),
    )
    .with_callbacks(recorder)
}

fn tool_results(messages: &[Message]) -> Vec<(String, bool)> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { name, is_error, .. } => Some((name.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn example_com_title_pipeline() {
    let pipeline = goto_pipeline("https://example.com");
    let script = Script::new(vec![
        call("c1", "goto", json!({"url": "https://example.com"})),
        call("c2", "chat", json!({"message": "Found the page"})),
        call("c3", "validate_artifact", json!({"candidate": pipeline.clone(), "dry_run": true})),
        call("c4", "emit_artifact", json!({"candidate": pipeline.to_string()})),
    ]);
    let recorder = Arc::new(Recorder::default());
    let agent = agent(script.clone(), recorder.clone());

    let handle = assert_ok!(
        agent
            .start_exchange(
                "Get the title of https://example.com",
                None,
                &[],
                CancellationToken::new()
            )
            .await
    );

    let snapshot = &handle.snapshot;
    assert_eq!(snapshot.phase, Phase::Complete);
    let artifact = snapshot.artifact.as_ref().unwrap();
    assert_eq!(artifact.raw, pipeline);
    assert_eq!(artifact.compiled["order"], json!(["goto1", "title"]));
    assert_eq!(snapshot.status.as_ref().unwrap().kind, StatusKind::Updated);
    assert_eq!(script.request_count(), 4);

    assert_eq!(
        recorder.events(),
        vec!["raw_messages", "chat:Found the page", "artifact_update", "status"]
    );
    assert_eq!(recorder.updates.lock().unwrap().len(), 1);

    let history = snapshot.agent_state.as_ref().unwrap();
    assert_eq!(
        tool_results(history),
        vec![
            ("goto".to_string(), false),
            ("chat".to_string(), false),
            ("validate_artifact".to_string(), false),
            ("emit_artifact".to_string(), false),
        ]
    );

    // The snapshot survives a JSON round trip.
    let restored: ConversationHandle =
        serde_json::from_str(&serde_json::to_string(&handle).unwrap()).unwrap();
    assert_eq!(restored, handle);
}

#[tokio::test]
async fn unknown_tools_are_reported_to_the_model() {
    let script = Script::new(vec![
        call("c1", "teleport", json!({})),
        answer(&goto_pipeline("https://example.com").to_string()),
    ]);
    let recorder = Arc::new(Recorder::default());
    let agent = agent(script.clone(), recorder);

    let handle = assert_ok!(
        agent
            .start_exchange("x", None, &[], CancellationToken::new())
            .await
    );
    assert_eq!(handle.snapshot.phase, Phase::Complete);
    let history = handle.snapshot.agent_state.unwrap();
    assert!(history.iter().any(|m| matches!(m,
        Message::ToolResult { output, is_error: true, .. } if output == "Error: unknown tool: teleport")));
}

#[tokio::test]
async fn resuming_an_unmodified_snapshot_reproduces_it() {
    let script = Script::new(vec![call(
        "c1",
        "request_user_input",
        json!({"question": "Which page should I open?", "urgency": "normal"}),
    )]);
    let recorder = Arc::new(Recorder::default());
    let agent = agent(script.clone(), recorder.clone());
    let store = InMemorySnapshotStore::new();

    let handle = assert_ok!(
        agent
            .start_exchange("Get a page title", None, &[], CancellationToken::new())
            .await
    );
    assert_eq!(handle.snapshot.phase, Phase::AwaitingUser);
    assert_ok!(store.save(&handle).await);
    recorder.clear();

    let loaded = assert_ok!(store.load(handle.id).await);
    let resumed = assert_ok!(
        agent
            .resume_exchange(loaded, None, &[], CancellationToken::new())
            .await
    );
    assert_eq!(resumed.snapshot, handle.snapshot);
    assert_eq!(script.request_count(), 1);
    assert_eq!(recorder.events(), vec!["status"]);
    let status = recorder.last_status();
    assert_eq!(status.kind, StatusKind::Question);
    assert_eq!(status.message, "Which page should I open?");
}

#[tokio::test]
async fn add_instructions_reruns_from_every_phase() {
    for phase in [
        Phase::Idle,
        Phase::Acting,
        Phase::AwaitingUser,
        Phase::Paused,
        Phase::Complete,
        Phase::Error,
    ] {
        let script = Script::new(vec![answer(
            &goto_pipeline("https://example.org").to_string(),
        )]);
        let agent = agent(script.clone(), Arc::new(Recorder::default()));
        let snapshot = AgentSnapshot {
            phase,
            agent_state: Some(vec![Message::user("stale")]),
            ..AgentSnapshot::new("Get the title")
        };
        let handle = ConversationHandle::new(snapshot);

        let handle = assert_ok!(
            agent
                .resume_exchange(
                    handle,
                    None,
                    &[ControlRequest::AddInstructions {
                        text: "use example.org".into()
                    }],
                    CancellationToken::new(),
                )
                .await
        );
        assert_eq!(handle.snapshot.phase, Phase::Complete, "from {}", phase);
        assert_eq!(handle.snapshot.instructions, vec!["use example.org".to_string()]);

        // The stale history was discarded in favour of a fresh prompt.
        let requests = script.requests.lock().unwrap();
        let user_turn = requests[0].messages.iter().find_map(|m| match m {
            Message::Text {
                role: Role::User,
                content,
            } => Some(content.clone()),
            _ => None,
        });
        assert_eq!(
            user_turn.as_deref(),
            Some("Get the title\n\nAdditional instructions:\n- use example.org")
        );
    }
}

#[tokio::test]
async fn pause_and_resume() {
    let script = Script::new(vec![answer(
        &goto_pipeline("https://example.com").to_string(),
    )]);
    let recorder = Arc::new(Recorder::default());
    let agent = agent(script.clone(), recorder.clone());

    let paused = assert_ok!(
        agent
            .start_exchange(
                "Get the title",
                None,
                &[ControlRequest::Pause {
                    reason: Some("waiting for login".into())
                }],
                CancellationToken::new(),
            )
            .await
    );
    assert_eq!(paused.snapshot.phase, Phase::Paused);
    assert_eq!(paused.snapshot.resume_phase, Some(Phase::Idle));
    assert_eq!(script.request_count(), 0);
    assert_eq!(recorder.last_status().kind, StatusKind::Paused);
    assert_eq!(recorder.last_status().message, "waiting for login");

    let resumed = assert_ok!(
        agent
            .resume_exchange(paused, None, &[ControlRequest::Resume], CancellationToken::new())
            .await
    );
    assert_eq!(resumed.snapshot.phase, Phase::Complete);
    assert!(resumed.snapshot.pause_reason.is_none());
    assert!(resumed.snapshot.paused_at.is_none());
    assert_eq!(script.request_count(), 1);
}

#[tokio::test]
async fn identical_pipeline_is_reported_unchanged() {
    let reordered: Value = serde_json::from_str(
        r#"{"title": {"dependsOn": ["goto1"], "outputs": {"title": {}}, "inputs": {}, "node": "page::title"},
            "goto1": {"dependsOn": [], "outputs": {}, "node": "page::goto",
                      "inputs": {"url": {"value": "https://example.com", "type": "constant"}}}}"#,
    )
    .unwrap();
    let script = Script::new(vec![
        call("c1", "emit_artifact", json!({"candidate": goto_pipeline("https://example.com")})),
        call("c2", "emit_artifact", json!({"candidate": goto_pipeline("https://example.com")})),
    ]);
    let recorder = Arc::new(Recorder::default());
    let agent = agent(script.clone(), recorder.clone());

    let first = assert_ok!(
        agent
            .start_exchange("x", None, &[], CancellationToken::new())
            .await
    );
    assert_eq!(first.snapshot.status.as_ref().unwrap().kind, StatusKind::Updated);

    let second = assert_ok!(
        agent
            .start_exchange("x", Some(reordered), &[], CancellationToken::new())
            .await
    );
    assert_eq!(second.snapshot.phase, Phase::Complete);
    assert_eq!(second.snapshot.status.as_ref().unwrap().kind, StatusKind::Unchanged);
    assert_eq!(recorder.updates.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_exchange_leaves_stored_snapshot_alone() {
    let script = Script::new(vec![answer("never")]);
    let agent = agent(script.clone(), Arc::new(Recorder::default()));
    let store = InMemorySnapshotStore::new();
    let handle = ConversationHandle::new(AgentSnapshot::new("x"));
    assert_ok!(store.save(&handle).await);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = assert_err!(
        agent
            .resume_exchange(handle.clone(), None, &[], cancel)
            .await
    );
    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(script.request_count(), 0);
    assert_eq!(assert_ok!(store.load(handle.id).await), handle);
}

#[tokio::test]
async fn independent_handles_run_concurrently() {
    let agent = Arc::new(agent(Arc::new(UrlEcho), Arc::new(Recorder::default())));
    let urls = ["https://a.example", "https://b.example", "https://c.example"];

    let tasks = urls.iter().map(|url| {
        let agent = Arc::clone(&agent);
        let url = url.to_string();
        tokio::spawn(async move {
            agent
                .start_exchange(&url, None, &[], CancellationToken::new())
                .await
        })
    });
    let handles: Vec<ConversationHandle> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    for (handle, url) in handles.iter().zip(urls) {
        assert_eq!(handle.snapshot.phase, Phase::Complete);
        let raw = &handle.snapshot.artifact.as_ref().unwrap().raw;
        assert_eq!(raw["goto1"]["inputs"]["url"]["value"], url);
    }
    assert_ne!(handles[0].id, handles[1].id);
}

#[tokio::test]
async fn terminal_answer_after_browsing_is_validated_and_compiled() {
    let pipeline = json!({
        "goto1": {
            "node": "page::goto",
            "inputs": { "url": { "type": "constant", "value": "https://example.com" } },
            "outputs": {},
            "dependsOn": []
        }
    });
    let script = Script::new(vec![
        call("c1", "goto", json!({"url": "https://example.com"})),
        answer(&pipeline.to_string()),
    ]);
    let recorder = Arc::new(Recorder::default());
    let agent = PipelineAgent::new(
        script.clone(),
        Arc::new(AckBrowser),
        Arc::new(PipelineSchemaValidator::new()),
        Arc::new(StepGraphCompiler::strict()),
        AgentOptions::default(),
    )
    .with_callbacks(recorder.clone());

    let handle = assert_ok!(
        agent
            .start_exchange(
                "Open https://example.com",
                None,
                &[],
                CancellationToken::new()
            )
            .await
    );

    let snapshot = &handle.snapshot;
    assert_eq!(snapshot.phase, Phase::Complete);
    assert_eq!(snapshot.attempts, 1);
    assert_eq!(snapshot.status.as_ref().unwrap().kind, StatusKind::Updated);
    let artifact = snapshot.artifact.as_ref().unwrap();
    assert_eq!(artifact.raw, pipeline);
    assert_eq!(artifact.compiled["order"], json!(["goto1"]));
    assert_eq!(script.request_count(), 2);

    assert_eq!(recorder.events(), vec!["raw_messages", "artifact_update", "status"]);
    assert_eq!(recorder.updates.lock().unwrap().len(), 1);

    let history = snapshot.agent_state.as_ref().unwrap();
    assert!(history.iter().any(|m| matches!(m,
        Message::ToolResult { name, output, is_error: false, .. }
            if name == "goto" && serde_json::from_str::<Value>(output).ok() == Some(json!({"ok": true})))));
}

#[tokio::test]
async fn concurrent_exchanges_on_one_handle_keep_the_last_save() {
    let agent = Arc::new(agent(Arc::new(UrlEcho), Arc::new(Recorder::default())));
    let store = InMemorySnapshotStore::new();
    let saved: Arc<tokio::sync::Mutex<Vec<ConversationHandle>>> = Arc::default();
    let handle = ConversationHandle::new(AgentSnapshot::new("https://example.com"));

    let tasks = ["use a.example", "use b.example"].into_iter().map(|text| {
        let agent = Arc::clone(&agent);
        let store = store.clone();
        let saved = Arc::clone(&saved);
        let handle = handle.clone();
        tokio::spawn(async move {
            let controls = [ControlRequest::AddInstructions { text: text.into() }];
            let done = agent
                .resume_exchange(handle, None, &controls, CancellationToken::new())
                .await
                .unwrap();
            // Hold the log while saving so its order matches the store's.
            let mut saved = saved.lock().await;
            store.save(&done).await.unwrap();
            saved.push(done);
        })
    });
    for joined in futures::future::join_all(tasks).await {
        joined.unwrap();
    }

    let saved = saved.lock().await;
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|h| h.id == handle.id && h.snapshot.phase == Phase::Complete));
    assert_ne!(saved[0].snapshot, saved[1].snapshot);

    // Neither exchange sees the other; the store keeps whichever saved last.
    let stored = assert_ok!(store.load(handle.id).await);
    assert_eq!(&stored, saved.last().unwrap());
    assert_eq!(assert_ok!(store.list().await), vec![handle.id]);
}
