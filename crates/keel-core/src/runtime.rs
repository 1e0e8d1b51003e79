// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use keel_config::{AgentMode, LlmConfig, SharedConfig};
use keel_model::{ModelClient, ModelProfile};
use keel_snapshot::SnapshotStore;
use keel_store::{AttachmentRow, LlmCallRecord, Store};
use keel_tools::ToolDispatcher;

use crate::annotate::{ContextAnnotator, NoopAnnotator};
use crate::context::{build_history, maybe_compress, CompressorInputs, TruncationConfig};
use crate::events::{AgentStep, StepKind};
use crate::react::{CallRecorder, ReactAgent, ReactRun};
use crate::stop::StopRegistry;

/// Best-effort bound on the title-generation call.
const TITLE_TIMEOUT: Duration = Duration::from_secs(15);
/// Provisional titles take the head of the first user message.
const PROVISIONAL_TITLE_CHARS: usize = 30;

/// One pre-processed image attachment accompanying a user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInput {
    pub filename: String,
    pub media_type: String,
    pub width: i64,
    pub height: i64,
    pub byte_size: i64,
    /// Base64 payload after re-encoding.
    pub data: String,
}

/// One incoming user turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub message: String,
    pub session_id: Option<String>,
    pub config_id: Option<String>,
    pub work_path: Option<String>,
    pub agent_mode: AgentMode,
    pub shell_unrestricted: bool,
    pub attachments: Vec<AttachmentInput>,
}

/// Events a turn produces, in order: `Started` once, then steps, then either
/// `Done` (normal completion or clean cancellation) or `Error`.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Started {
        session_id: String,
        user_message_id: i64,
        assistant_message_id: i64,
        user_attachments: Vec<AttachmentRow>,
    },
    Step(AgentStep),
    Done {
        session_id: String,
    },
    Error {
        message: String,
    },
}

/// Result descriptor of a rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub session_id: String,
    pub deleted_messages: usize,
    pub snapshot_restored: bool,
}

type ModelFactory =
    Box<dyn Fn(&ModelProfile, &LlmConfig) -> anyhow::Result<Arc<dyn ModelClient>> + Send + Sync>;

/// Per-turn orchestrator: snapshot → compress → build history → run the loop
/// → persist steps → finalize.
///
/// Turns of the same session are serialized by an in-memory per-session lock;
/// different sessions run fully independently.
pub struct SessionRuntime {
    store: Arc<Store>,
    snapshots: Arc<SnapshotStore>,
    config: SharedConfig,
    dispatcher: Arc<ToolDispatcher>,
    stops: Arc<StopRegistry>,
    annotator: Arc<dyn ContextAnnotator>,
    model_factory: ModelFactory,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionRuntime {
    pub fn new(
        store: Arc<Store>,
        snapshots: Arc<SnapshotStore>,
        config: SharedConfig,
        dispatcher: Arc<ToolDispatcher>,
        stops: Arc<StopRegistry>,
    ) -> Self {
        Self {
            store,
            snapshots,
            config,
            dispatcher,
            stops,
            annotator: Arc::new(NoopAnnotator),
            model_factory: Box::new(|profile, llm| keel_model::from_profile(profile, llm)),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn ContextAnnotator>) -> Self {
        self.annotator = annotator;
        self
    }

    /// Override how model clients are constructed (used by tests to inject
    /// scripted mocks).
    pub fn with_model_factory(mut self, factory: ModelFactory) -> Self {
        self.model_factory = factory;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn stops(&self) -> &Arc<StopRegistry> {
        &self.stops
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .expect("session lock map poisoned")
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Set the stop signal for the turn owning `assistant_message_id`.
    pub fn stop_turn(&self, assistant_message_id: i64) -> bool {
        self.stops.stop(assistant_message_id)
    }

    /// Run one user turn, emitting [`TurnEvent`]s through `tx`.
    ///
    /// Failures surface as an `Error` event rather than an `Err` return —
    /// a broken turn must never take the process down.
    pub async fn run_turn(&self, request: TurnRequest, tx: mpsc::Sender<TurnEvent>) {
        // Resolve the model configuration first; without one there is
        // nothing to run.
        let config_row = match request
            .config_id
            .as_deref()
            .map(|id| self.store.get_config(id))
            .unwrap_or_else(|| self.store.get_default_config())
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: "no model configuration available".into(),
                    })
                    .await;
                return;
            }
            Err(e) => {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: format!("config lookup failed: {e}"),
                    })
                    .await;
                return;
            }
        };
        let cfg = self.config.snapshot();
        let model = match (self.model_factory)(&config_row.to_profile(), &cfg.llm) {
            Ok(m) => m,
            Err(e) => {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: format!("model client construction failed: {e}"),
                    })
                    .await;
                return;
            }
        };

        let text = preprocess_user_text(&request.message);

        // Resolve or create the session.
        let session = match self.resolve_session(&request, &text, &config_row.id) {
            Ok(s) => s,
            Err(e) => {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: format!("session setup failed: {e}"),
                    })
                    .await;
                return;
            }
        };
        let first_turn = session.message_count == 0;

        // Serialize turns per session: message-id assignment and step
        // persistence must not interleave.
        let lock = self.session_lock(&session.id);
        let _guard = lock.lock().await;

        let setup = (|| -> anyhow::Result<(i64, i64, Vec<AttachmentRow>)> {
            let user_msg = self.store.create_message(&session.id, "user", &text)?;
            for att in &request.attachments {
                self.store.create_attachment(
                    user_msg.id,
                    &att.filename,
                    &att.media_type,
                    att.width,
                    att.height,
                    att.byte_size,
                    &att.data,
                )?;
            }
            let attachments = self.store.attachments_for_message(user_msg.id)?;
            let assistant_msg = self.store.create_message(&session.id, "assistant", "")?;
            Ok((user_msg.id, assistant_msg.id, attachments))
        })();
        let (user_message_id, assistant_message_id, user_attachments) = match setup {
            Ok(v) => v,
            Err(e) => {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: format!("message persistence failed: {e}"),
                    })
                    .await;
                return;
            }
        };

        let stop = self.stops.create(assistant_message_id);
        let _ = tx
            .send(TurnEvent::Started {
                session_id: session.id.clone(),
                user_message_id,
                assistant_message_id,
                user_attachments,
            })
            .await;

        let work_path: Option<PathBuf> = request
            .work_path
            .clone()
            .or_else(|| session.work_path.clone())
            .map(PathBuf::from);

        // A snapshot must exist before anything can mutate the workspace;
        // on failure the turn aborts before the first model call.
        if let Some(wp) = &work_path {
            if let Err(e) = self
                .snapshots
                .ensure_snapshot(&session.id, assistant_message_id, wp)
                .await
            {
                warn!("snapshot failed, aborting turn: {e}");
                let _ = tx
                    .send(TurnEvent::Error {
                        message: format!("workspace snapshot failed: {e}"),
                    })
                    .await;
                self.stops.clear(assistant_message_id);
                return;
            }
        }

        // Context compression, persisted on the session only on success.
        let mut summary = session.context_summary.clone();
        let mut boundary_message_id = match session.last_compressed_call_id {
            0 => None,
            id => self
                .store
                .message_id_for_llm_call(&session.id, id)
                .ok()
                .flatten(),
        };
        let max_context_tokens = config_row.max_context_tokens.max(0) as usize;
        if cfg.context.compression_enabled && max_context_tokens > 0 {
            match maybe_compress(
                &self.store,
                &cfg.context,
                model.clone(),
                CompressorInputs {
                    session_id: &session.id,
                    max_context_tokens,
                    current_summary: &summary,
                    last_compressed_call_id: session.last_compressed_call_id,
                    current_user_message_id: Some(user_message_id),
                    current_user_text: &text,
                },
            )
            .await
            {
                Ok(outcome) if outcome.did_compress => {
                    if let Err(e) = self.store.update_session_compression(
                        &session.id,
                        &outcome.summary,
                        outcome.boundary_call_id,
                    ) {
                        warn!("failed to persist compression outcome: {e}");
                    }
                    info!(
                        boundary = outcome.boundary_call_id,
                        "context compressed before turn"
                    );
                    summary = outcome.summary;
                    boundary_message_id = outcome.boundary_message_id;
                }
                Ok(outcome) => {
                    boundary_message_id = outcome.boundary_message_id.or(boundary_message_id);
                }
                Err(e) => warn!("compression failed, continuing uncompressed: {e}"),
            }
        }

        let trunc = TruncationConfig::from(&cfg.context);
        let code_map = self
            .annotator
            .annotate(&session.id, work_path.as_deref())
            .await;
        let history = match build_history(
            &self.store,
            &session.id,
            boundary_message_id,
            Some(user_message_id),
            &summary,
            code_map.as_deref(),
            &trunc,
        ) {
            Ok(h) => h,
            Err(e) => {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: format!("history assembly failed: {e}"),
                    })
                    .await;
                self.stops.clear(assistant_message_id);
                return;
            }
        };

        // Every model invocation of the loop is recorded as an LLM call row.
        let recorder: CallRecorder = {
            let store = self.store.clone();
            let session_id = session.id.clone();
            let profile = config_row.name.clone();
            let api_format = config_row.api_format.clone();
            Arc::new(move |iteration, req, response_text| {
                let record = LlmCallRecord {
                    session_id: session_id.clone(),
                    message_id: Some(assistant_message_id),
                    iteration: iteration as i64,
                    streaming: true,
                    profile: profile.clone(),
                    api_format: api_format.clone(),
                    request_payload: serde_json::to_string(&req.messages).unwrap_or_default(),
                    response_payload: None,
                    response_text: response_text.to_string(),
                    processed_text: response_text.trim().to_string(),
                };
                if let Err(e) = store.save_llm_call(&record) {
                    warn!("failed to record llm call: {e}");
                }
            })
        };

        let tool_ctx = self.dispatcher.make_context(
            work_path
                .clone()
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from(".")),
            request.agent_mode,
            request.shell_unrestricted,
            Some(session.id.clone()),
        );

        let agent = ReactAgent::new(cfg.agent.react_max_iterations);
        let run = ReactRun {
            user_input: text.clone(),
            history,
            base_prompt: cfg.agent.base_system_prompt.clone(),
            model: model.clone(),
            dispatcher: self.dispatcher.clone(),
            tool_ctx,
            stop: stop.clone(),
            native_tools: true,
            call_recorder: Some(recorder),
        };

        let (step_tx, mut step_rx) = mpsc::channel::<AgentStep>(64);
        let loop_handle = tokio::spawn(async move { agent.run(run, step_tx).await });

        let mut sequence: i64 = 0;
        let mut pending_tool_rows: Vec<(String, i64)> = Vec::new();
        let mut partial_text = String::new();
        let mut answered = false;
        let mut fatal_error = false;

        while let Some(step) = step_rx.recv().await {
            if step.kind == StepKind::ContentDelta {
                partial_text.push_str(&step.content);
            }
            if !step.kind.is_delta() {
                if let Err(e) = self.store.save_agent_step(
                    assistant_message_id,
                    step.kind.as_str(),
                    &step.content,
                    &step.metadata,
                    sequence,
                ) {
                    // Repository failure aborts the turn with a best-effort
                    // error event.
                    warn!("step persistence failed: {e}");
                    let _ = tx
                        .send(TurnEvent::Error {
                            message: format!("step persistence failed: {e}"),
                        })
                        .await;
                    fatal_error = true;
                    break;
                }
                sequence += 1;

                match step.kind {
                    StepKind::Action => {
                        let tool = step.metadata["tool"].as_str().unwrap_or_default().to_string();
                        let input = step.metadata["input"].as_str().unwrap_or_default();
                        match self.store.save_tool_call(assistant_message_id, &tool, input) {
                            Ok(row_id) => pending_tool_rows.push((tool, row_id)),
                            Err(e) => warn!("tool call persistence failed: {e}"),
                        }
                    }
                    StepKind::Observation => {
                        let tool = step.metadata["tool"].as_str().unwrap_or_default();
                        if let Some(pos) =
                            pending_tool_rows.iter().position(|(name, _)| name == tool)
                        {
                            let (_, row_id) = pending_tool_rows.remove(pos);
                            if let Err(e) =
                                self.store.update_tool_call_output(row_id, &step.content)
                            {
                                warn!("tool output persistence failed: {e}");
                            }
                        }
                    }
                    StepKind::Answer => {
                        answered = true;
                        if let Err(e) = self
                            .store
                            .update_message_content(assistant_message_id, &step.content)
                        {
                            warn!("answer persistence failed: {e}");
                        }
                        if first_turn {
                            self.spawn_title_generation(&session.id, &text, model.clone());
                        }
                    }
                    _ => {}
                }
            }
            let _ = tx.send(TurnEvent::Step(step)).await;
        }

        if let Err(e) = loop_handle.await {
            warn!("agent loop task failed: {e}");
        }

        // Preserve partial assistant output when the turn did not reach an
        // answer (stop or error).
        if !answered && !partial_text.is_empty() {
            let content = format!("{partial_text}\n[interrupted]");
            if let Err(e) = self
                .store
                .update_message_content(assistant_message_id, &content)
            {
                warn!("partial content persistence failed: {e}");
            }
        }

        self.stops.clear(assistant_message_id);
        if !fatal_error {
            let _ = tx
                .send(TurnEvent::Done {
                    session_id: session.id.clone(),
                })
                .await;
        }
        debug!(session = %session.id, steps = sequence, "turn complete");
    }

    fn resolve_session(
        &self,
        request: &TurnRequest,
        text: &str,
        config_id: &str,
    ) -> anyhow::Result<keel_store::SessionRow> {
        if let Some(id) = &request.session_id {
            if let Some(existing) = self.store.get_session(id)? {
                return Ok(existing);
            }
        }
        self.store.create_session(
            &provisional_title(text),
            config_id,
            request.work_path.as_deref(),
        )
    }

    /// Replace the provisional title with a model-generated one; bounded and
    /// best-effort, never blocking the turn.
    fn spawn_title_generation(&self, session_id: &str, user_text: &str, model: Arc<dyn ModelClient>) {
        let store = self.store.clone();
        let session_id = session_id.to_string();
        let prompt = format!(
            "Generate a short title (at most 10 words) for a conversation that \
             starts with the following message. Output only the title.\n\n{user_text}"
        );
        tokio::spawn(async move {
            let request = keel_model::CompletionRequest {
                messages: vec![keel_model::Message::user(prompt)],
                stream: false,
                ..Default::default()
            };
            match tokio::time::timeout(TITLE_TIMEOUT, model.complete_text(request)).await {
                Ok(Ok(title)) => {
                    let title = title.trim().trim_matches('"').to_string();
                    if !title.is_empty() {
                        if let Err(e) = store.update_session_title(&session_id, &title) {
                            warn!("title update failed: {e}");
                        }
                    }
                }
                Ok(Err(e)) => debug!("title generation failed: {e}"),
                Err(_) => debug!("title generation timed out"),
            }
        });
    }

    /// Roll the session back to the state before `message_id` was processed.
    ///
    /// Sequencing: the workspace snapshot is restored first; if that fails
    /// the dialogue is left untouched and the error propagates.  Only after
    /// a successful (or unnecessary) restore are messages at and after the
    /// target deleted.
    pub async fn rollback(&self, message_id: i64) -> anyhow::Result<RollbackReport> {
        let message = self
            .store
            .get_message(message_id)?
            .ok_or_else(|| anyhow::anyhow!("message {message_id} not found"))?;
        let session_id = message.session_id;

        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;

        let snapshot_restored = self.snapshots.restore_at(&session_id, message_id).await?;
        let deleted_messages = self.store.delete_messages_from(&session_id, message_id)?;
        self.store.delete_llm_calls_from(&session_id, message_id)?;

        // A compression boundary pointing into the deleted range is void.
        if let Some(session) = self.store.get_session(&session_id)? {
            if session.last_compressed_call_id > 0 {
                let boundary_alive = self
                    .store
                    .message_id_for_llm_call(&session_id, session.last_compressed_call_id)?
                    .map(|mid| mid < message_id)
                    .unwrap_or(false);
                if !boundary_alive {
                    self.store.update_session_compression(&session_id, "", 0)?;
                }
            }
        }

        info!(
            session = %session_id,
            message_id,
            deleted_messages,
            snapshot_restored,
            "rollback complete"
        );
        Ok(RollbackReport {
            session_id,
            deleted_messages,
            snapshot_restored,
        })
    }
}

/// Trim and collapse runs of three or more newlines into two.
pub fn preprocess_user_text(text: &str) -> String {
    static COLLAPSE: OnceLock<Regex> = OnceLock::new();
    let re = COLLAPSE.get_or_init(|| Regex::new(r"\n{3,}").expect("regex"));
    re.replace_all(text.trim(), "\n\n").to_string()
}

fn provisional_title(text: &str) -> String {
    let title: String = text.chars().take(PROVISIONAL_TITLE_CHARS).collect();
    if title.is_empty() {
        "New chat".to_string()
    } else {
        title
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::Config;
    use keel_model::{ResponseEvent, ScriptedMockClient};
    use keel_snapshot::WorkspaceArchiver;
    use keel_store::ConfigUpsert;
    use keel_tools::{Tool, ToolError, ToolInput, ToolRegistry};

    struct CalcTool;

    #[async_trait::async_trait]
    impl Tool for CalcTool {
        fn name(&self) -> &str {
            "calc"
        }
        fn description(&self) -> &str {
            "evaluates arithmetic"
        }
        fn parameters(&self) -> Vec<keel_tools::ToolParameter> {
            vec![keel_tools::ToolParameter::required(
                "expression",
                "string",
                "expression",
            )]
        }
        async fn execute(
            &self,
            input: &ToolInput,
            _ctx: &keel_tools::ToolContext,
        ) -> Result<String, ToolError> {
            Ok(match input.str_arg_or_raw("expression").as_deref() {
                Some("2+2") => "4".into(),
                other => format!("eval({other:?})"),
            })
        }
    }

    struct Fixture {
        runtime: SessionRuntime,
        _snapshot_base: tempfile::TempDir,
    }

    fn fixture(scripts: Vec<Vec<ResponseEvent>>) -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .create_config(&ConfigUpsert {
                name: "default".into(),
                api_key: "k".into(),
                model: "m".into(),
                is_default: true,
                ..ConfigUpsert::default()
            })
            .unwrap();
        let snapshot_base = tempfile::tempdir().unwrap();
        let snapshots = Arc::new(SnapshotStore::new(
            store.clone(),
            WorkspaceArchiver::new(snapshot_base.path().to_path_buf()),
        ));
        let shared = SharedConfig::new(Config::default());
        let mut registry = ToolRegistry::new();
        registry.register(CalcTool);
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(registry), None, shared.clone()));
        let model = Arc::new(ScriptedMockClient::new(scripts));
        let runtime = SessionRuntime::new(
            store,
            snapshots,
            shared,
            dispatcher,
            Arc::new(StopRegistry::new()),
        )
        .with_model_factory(Box::new(move |_profile, _llm| {
            Ok(model.clone() as Arc<dyn ModelClient>)
        }));
        Fixture {
            runtime,
            _snapshot_base: snapshot_base,
        }
    }

    async fn run_and_collect(runtime: &SessionRuntime, request: TurnRequest) -> Vec<TurnEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        let run = runtime.run_turn(request, tx);
        let collector = async {
            let mut events = Vec::new();
            while let Some(ev) = rx.recv().await {
                events.push(ev);
            }
            events
        };
        let ((), events) = tokio::join!(run, collector);
        events
    }

    // ── Text preprocessing ───────────────────────────────────────────────────

    #[test]
    fn preprocess_trims_and_collapses_newlines() {
        assert_eq!(preprocess_user_text("  hi  "), "hi");
        assert_eq!(preprocess_user_text("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(preprocess_user_text("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn provisional_title_takes_head_of_text() {
        assert_eq!(provisional_title("short"), "short");
        let long = "x".repeat(100);
        assert_eq!(provisional_title(&long).chars().count(), 30);
        assert_eq!(provisional_title(""), "New chat");
    }

    // ── End-to-end turn ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_turn_persists_steps_calls_and_answer() {
        let f = fixture(vec![
            vec![
                ResponseEvent::TextDelta(
                    "Thought: need math\nAction: calc\nAction Input: 2+2".into(),
                ),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta("Final Answer: 4".into()),
                ResponseEvent::Done,
            ],
        ]);
        let events = run_and_collect(
            &f.runtime,
            TurnRequest {
                message: "what is 2+2?".into(),
                ..TurnRequest::default()
            },
        )
        .await;

        // Started first, Done last.
        let (session_id, assistant_id) = match &events[0] {
            TurnEvent::Started {
                session_id,
                assistant_message_id,
                user_message_id,
                ..
            } => {
                assert!(user_message_id < assistant_message_id);
                (session_id.clone(), *assistant_message_id)
            }
            other => panic!("first event must be Started, got {other:?}"),
        };
        assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));

        // Non-delta step order and dense sequences.
        let store = f.runtime.store();
        let steps = store.agent_steps_for_message(assistant_id).unwrap();
        let kinds: Vec<&str> = steps.iter().map(|s| s.step_type.as_str()).collect();
        assert_eq!(kinds, vec!["thought", "action", "observation", "answer"]);
        let seqs: Vec<i64> = steps.iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);

        // Tool call row exists with paired output.
        let calls = store.tool_calls_for_message(assistant_id).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "calc");
        assert_eq!(calls[0].tool_input, "2+2");
        assert_eq!(calls[0].tool_output, "4");

        // Assistant message finalized with the answer.
        let assistant = store.get_message(assistant_id).unwrap().unwrap();
        assert_eq!(assistant.content, "4");

        // The loop's model invocations were recorded.
        let llm_calls = store.llm_call_metas_after(&session_id, 0).unwrap();
        assert_eq!(llm_calls.len(), 2);
    }

    #[tokio::test]
    async fn plain_turn_reuses_session_and_keeps_ordering() {
        let f = fixture(vec![
            vec![ResponseEvent::TextDelta("Hello.".into()), ResponseEvent::Done],
            vec![ResponseEvent::TextDelta("Again.".into()), ResponseEvent::Done],
        ]);
        let events = run_and_collect(
            &f.runtime,
            TurnRequest {
                message: "hi".into(),
                ..TurnRequest::default()
            },
        )
        .await;
        let session_id = match &events[0] {
            TurnEvent::Started { session_id, .. } => session_id.clone(),
            other => panic!("expected Started, got {other:?}"),
        };

        let events2 = run_and_collect(
            &f.runtime,
            TurnRequest {
                message: "again".into(),
                session_id: Some(session_id.clone()),
                ..TurnRequest::default()
            },
        )
        .await;
        match &events2[0] {
            TurnEvent::Started { session_id: sid, .. } => assert_eq!(sid, &session_id),
            other => panic!("expected Started, got {other:?}"),
        }
        let session = f.runtime.store().get_session(&session_id).unwrap().unwrap();
        assert_eq!(session.message_count, 4);
    }

    #[tokio::test]
    async fn missing_config_yields_error_event() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let snapshot_base = tempfile::tempdir().unwrap();
        let snapshots = Arc::new(SnapshotStore::new(
            store.clone(),
            WorkspaceArchiver::new(snapshot_base.path().to_path_buf()),
        ));
        let shared = SharedConfig::new(Config::default());
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::new(ToolRegistry::new()),
            None,
            shared.clone(),
        ));
        let runtime = SessionRuntime::new(
            store,
            snapshots,
            shared,
            dispatcher,
            Arc::new(StopRegistry::new()),
        );
        let events = run_and_collect(
            &runtime,
            TurnRequest {
                message: "hi".into(),
                ..TurnRequest::default()
            },
        )
        .await;
        assert!(matches!(
            events.as_slice(),
            [TurnEvent::Error { message }] if message.contains("no model configuration")
        ));
    }

    // ── Rollback ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rollback_restores_workspace_then_deletes_dialogue() {
        let f = fixture(vec![]);
        let store = f.runtime.store().clone();
        let work = tempfile::tempdir().unwrap();
        let session = store
            .create_session("t", "c", Some(&work.path().display().to_string()))
            .unwrap();

        // Turn 1: m1 user, m2 assistant — writes file A during the turn.
        let _m1 = store.create_message(&session.id, "user", "write A").unwrap();
        let m2 = store.create_message(&session.id, "assistant", "done").unwrap();
        f.runtime
            .snapshots
            .ensure_snapshot(&session.id, m2.id, work.path())
            .await
            .unwrap();
        std::fs::write(work.path().join("a.txt"), "v1").unwrap();

        // Turn 2: m3 user, m4 assistant — modifies file A during the turn.
        let m3 = store.create_message(&session.id, "user", "change A").unwrap();
        let m4 = store.create_message(&session.id, "assistant", "changed").unwrap();
        f.runtime
            .snapshots
            .ensure_snapshot(&session.id, m4.id, work.path())
            .await
            .unwrap();
        std::fs::write(work.path().join("a.txt"), "v2").unwrap();

        let report = f.runtime.rollback(m3.id).await.unwrap();
        assert!(report.snapshot_restored);
        assert_eq!(report.deleted_messages, 2);
        assert_eq!(report.session_id, session.id);

        // File A reverts to its state when m3 began processing.
        assert_eq!(
            std::fs::read_to_string(work.path().join("a.txt")).unwrap(),
            "v1"
        );
        // Dialogue shrinks to the first turn.
        let rest = store.session_messages(&session.id).unwrap();
        assert_eq!(rest.len(), 2);
        // Later snapshots are gone.
        assert!(store.get_snapshot(&session.id, m4.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn rollback_unknown_message_errors() {
        let f = fixture(vec![]);
        assert!(f.runtime.rollback(424242).await.is_err());
    }

    #[tokio::test]
    async fn rollback_without_snapshot_still_deletes_dialogue() {
        let f = fixture(vec![]);
        let store = f.runtime.store().clone();
        let session = store.create_session("t", "c", None).unwrap();
        let m1 = store.create_message(&session.id, "user", "q").unwrap();
        store.create_message(&session.id, "assistant", "a").unwrap();

        let report = f.runtime.rollback(m1.id).await.unwrap();
        assert!(!report.snapshot_restored);
        assert_eq!(report.deleted_messages, 2);
        assert!(store.session_messages(&session.id).unwrap().is_empty());
    }
}
