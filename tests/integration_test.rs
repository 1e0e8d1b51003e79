// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end turns through the session runtime with the real built-in tools,
//! an in-memory store, and a scripted model — no network, no real LLM.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use keel_config::{Config, SharedConfig};
use keel_core::{
    SessionRuntime, StepKind, StopRegistry, TurnEvent, TurnRequest,
};
use keel_model::{ModelClient, ResponseEvent, ScriptedMockClient};
use keel_snapshot::{SnapshotStore, WorkspaceArchiver};
use keel_store::{ConfigUpsert, PermissionBroker, PermissionStatus, Store};
use keel_tools::{builtin::register_builtins, ToolDispatcher, ToolRegistry};

struct Harness {
    runtime: SessionRuntime,
    store: Arc<Store>,
    broker: Arc<PermissionBroker>,
    shared: SharedConfig,
    _snapshot_base: tempfile::TempDir,
}

fn harness(config: Config, scripts: Vec<Vec<ResponseEvent>>) -> Harness {
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
    let shared = SharedConfig::new(config);
    let broker = Arc::new(PermissionBroker::new(store.clone()));
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry);
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(registry),
        Some(broker.clone()),
        shared.clone(),
    ));
    let model = Arc::new(ScriptedMockClient::new(scripts));
    let runtime = SessionRuntime::new(
        store.clone(),
        snapshots,
        shared.clone(),
        dispatcher,
        Arc::new(StopRegistry::new()),
    )
    .with_model_factory(Box::new(move |_profile, _llm| {
        Ok(model.clone() as Arc<dyn ModelClient>)
    }));
    Harness {
        runtime,
        store,
        broker,
        shared,
        _snapshot_base: snapshot_base,
    }
}

async fn run_turn(h: &Harness, request: TurnRequest) -> Vec<TurnEvent> {
    let (tx, mut rx) = mpsc::channel(128);
    let run = h.runtime.run_turn(request, tx);
    let collect = async {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    };
    let ((), events) = tokio::join!(run, collect);
    events
}

fn steps_of(events: &[TurnEvent]) -> Vec<&keel_core::AgentStep> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Step(s) => Some(s),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn shell_command_blocked_until_approved_then_learns_allowlist() {
    let work = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.shell.allowlist.clear();
    config.shell.permission_timeout_sec = 10.0;

    let h = harness(
        config,
        vec![
            vec![
                ResponseEvent::TextDelta(
                    "Thought: run it\nAction: run_shell\nAction Input: echo integration-ok".into(),
                ),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta("Final Answer: ran the command".into()),
                ResponseEvent::Done,
            ],
        ],
    );

    // Out-of-band approver: watches the queue and approves the first request.
    let store = h.store.clone();
    let broker = h.broker.clone();
    let approver = tokio::spawn(async move {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            let pending = store.pending_permission_requests().unwrap();
            if let Some(row) = pending.first() {
                assert_eq!(row.tool_name, "run_shell");
                assert!(row.reason.contains("not in allowlist"));
                broker.update(row.id, PermissionStatus::Approved).unwrap();
                return row.id;
            }
        }
        panic!("no permission request appeared");
    });

    let events = run_turn(
        &h,
        TurnRequest {
            message: "echo something".into(),
            work_path: Some(work.path().display().to_string()),
            ..TurnRequest::default()
        },
    )
    .await;

    let request_id = approver.await.unwrap();
    assert_eq!(
        h.broker.get(request_id).unwrap().unwrap().status,
        PermissionStatus::Approved
    );

    // The observation carries the executed command's output.
    let steps = steps_of(&events);
    let observation = steps
        .iter()
        .find(|s| s.kind == StepKind::Observation)
        .expect("observation step");
    assert!(observation.content.starts_with("[exit_code=0]"), "{}", observation.content);
    assert!(observation.content.contains("integration-ok"));

    // The approved basename was appended to the allowlist.
    assert!(h.shared.snapshot().shell.allows("echo"));
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
}

#[tokio::test]
async fn denied_shell_command_reports_canonical_observation() {
    let work = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.shell.allowlist.clear();
    config.shell.permission_timeout_sec = 10.0;

    let h = harness(
        config,
        vec![
            vec![
                ResponseEvent::TextDelta(
                    "Thought: try\nAction: run_shell\nAction Input: echo nope".into(),
                ),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta("Final Answer: could not run it".into()),
                ResponseEvent::Done,
            ],
        ],
    );

    let store = h.store.clone();
    let broker = h.broker.clone();
    tokio::spawn(async move {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            if let Some(row) = store.pending_permission_requests().unwrap().first() {
                broker.update(row.id, PermissionStatus::Denied).unwrap();
                return;
            }
        }
    });

    let events = run_turn(
        &h,
        TurnRequest {
            message: "try a command".into(),
            work_path: Some(work.path().display().to_string()),
            ..TurnRequest::default()
        },
    )
    .await;

    let steps = steps_of(&events);
    let observation = steps
        .iter()
        .find(|s| s.kind == StepKind::Observation)
        .expect("observation step");
    assert_eq!(observation.content, "Permission denied.");
    // A denial never teaches the allowlist.
    assert!(!h.shared.snapshot().shell.allows("echo"));
}

#[tokio::test]
async fn file_tools_round_trip_inside_work_path() {
    let work = tempfile::tempdir().unwrap();
    let h = harness(
        Config::default(),
        vec![
            vec![
                ResponseEvent::TextDelta(
                    "Thought: write it\nAction: write_file\nAction Input: \
                     {\"path\": \"notes.txt\", \"content\": \"remember this\"}"
                        .into(),
                ),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta(
                    "Thought: read it back\nAction: read_file\nAction Input: notes.txt".into(),
                ),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta("Final Answer: stored and verified".into()),
                ResponseEvent::Done,
            ],
        ],
    );

    let events = run_turn(
        &h,
        TurnRequest {
            message: "take a note".into(),
            work_path: Some(work.path().display().to_string()),
            ..TurnRequest::default()
        },
    )
    .await;

    assert_eq!(
        std::fs::read_to_string(work.path().join("notes.txt")).unwrap(),
        "remember this"
    );
    let steps = steps_of(&events);
    let observations: Vec<_> = steps
        .iter()
        .filter(|s| s.kind == StepKind::Observation)
        .collect();
    assert_eq!(observations.len(), 2);
    assert!(observations[0].content.contains("wrote 13 chars"));
    assert!(observations[1].content.contains("remember this"));

    // A snapshot was taken before the turn could touch the workspace.
    let started = events.iter().find_map(|e| match e {
        TurnEvent::Started {
            session_id,
            assistant_message_id,
            ..
        } => Some((session_id.clone(), *assistant_message_id)),
        _ => None,
    });
    let (session_id, assistant_id) = started.unwrap();
    assert!(h
        .store
        .get_snapshot(&session_id, assistant_id)
        .unwrap()
        .is_some());
}
