//! Session registry wired to scripted processes.

use std::sync::Arc;

use agent_desk_core::config::WorkerVariant;
use desk_workers::collaborators::{JsonFileSessionStore, MemoryConfigStore, StaticPermissions};
use desk_workers::config::WorkerConfig;
use desk_workers::environment::{EnvironmentResolver, StaticProbe, Version};
use desk_workers::events::{ChannelSink, WorkerEvent};
use desk_workers::registry::keys;
use desk_workers::{ConfiguredWorkerFactory, MockLauncher, MockLauncherHandle, MockScript, SessionRegistry};
use serde_json::json;
use tempfile::TempDir;

struct Harness {
    registry: Arc<SessionRegistry>,
    handle: MockLauncherHandle,
    _workdir: TempDir,
    _history: TempDir,
}

fn harness(variant: &str, script: MockScript) -> Harness {
    let workdir = TempDir::new().unwrap();
    let history = TempDir::new().unwrap();

    let store = MemoryConfigStore::new();
    store.insert(keys::VARIANT, variant);

    let probe = StaticProbe::new()
        .with_runtime("/opt/node/bin/node", Version::new(22, 1, 0))
        .with_executable("claude", "/opt/bin/claude");
    let resolver = EnvironmentResolver::new(Arc::new(probe), Vec::new(), Vec::new());
    let (launcher, handle) = MockLauncher::new(script);

    let factory = ConfiguredWorkerFactory::new(Arc::new(store), WorkerConfig::default())
        .with_permissions(Arc::new(StaticPermissions::new(vec![workdir.path().to_path_buf()], Vec::new())))
        .with_session_store(Arc::new(JsonFileSessionStore::new(history.path())))
        .with_resolver(Arc::new(resolver))
        .with_launcher(Arc::new(launcher));

    Harness {
        registry: Arc::new(SessionRegistry::new(Arc::new(factory))),
        handle,
        _workdir: workdir,
        _history: history,
    }
}

fn answer_script(text: &str) -> MockScript {
    MockScript::lines([
        json!({"type": "system", "subtype": "init", "session_id": "s-1"}).to_string(),
        json!({"type": "result", "subtype": "success", "is_error": false, "result": text}).to_string(),
    ])
}

#[tokio::test]
async fn every_observer_sees_the_answer() {
    let h = harness("cli", answer_script("Shared answer"));
    let (first, mut first_rx) = ChannelSink::new();
    let (second, mut second_rx) = ChannelSink::new();
    h.registry.register_observer("room", first.clone());
    h.registry.register_observer("room", first);

    let worker = h.registry.get_or_create_worker("room").unwrap();
    assert_eq!(worker.variant(), WorkerVariant::Cli);
    h.registry.register_observer("room", second);

    worker.process_user_message("question".into()).await.unwrap();

    for rx in [&mut first_rx, &mut second_rx] {
        let mut completes = 0;
        while let Ok(event) = rx.try_recv() {
            if event == WorkerEvent::Complete {
                completes += 1;
            }
        }
        assert_eq!(completes, 1, "duplicate registration must not duplicate events");
    }
    assert_eq!(worker.history()[1].text(), "Shared answer");
}

#[tokio::test]
async fn history_survives_worker_recreation() {
    let h = harness("cli", answer_script("Remembered"));
    let (sink, _rx) = ChannelSink::new();
    h.registry.register_observer("persisted", sink);

    let worker = h.registry.get_or_create_worker("persisted").unwrap();
    worker.process_user_message("note this".into()).await.unwrap();
    h.registry.destroy_worker("persisted").await;
    assert_eq!(h.registry.worker_count(), 0);

    let fresh = h.registry.get_or_create_worker("persisted").unwrap();
    fresh.initialize().await.unwrap();
    let history = fresh.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text(), "note this");
    assert_eq!(history[1].text(), "Remembered");
}

#[tokio::test]
async fn destroy_all_aborts_running_requests() {
    let h = harness("cli", MockScript::lines(Vec::<String>::new()).held_open());
    let (sink, _rx) = ChannelSink::new();
    h.registry.register_observer("busy", sink);
    let worker = h.registry.get_or_create_worker("busy").unwrap();

    let task = tokio::spawn({
        let worker = worker.clone();
        async move { worker.process_user_message("work forever".into()).await }
    });
    while h.handle.launch_count() == 0 {
        tokio::task::yield_now().await;
    }

    h.registry.destroy_all().await;
    task.await.unwrap().unwrap();

    assert!(h.handle.was_killed());
    assert!(!worker.is_processing());
    assert_eq!(h.registry.worker_count(), 0);
    assert_eq!(h.registry.session_ids(), vec!["busy".to_string()]);
}

#[tokio::test]
async fn confirmation_is_routed_through_registry() {
    let permission = json!({
        "type": "control_request",
        "request_id": "r-1",
        "request": {"subtype": "can_use_tool", "tool_name": "Bash", "input": {"command": "cargo fmt"}}
    })
    .to_string();
    let script = MockScript::lines([permission]).then_after_release([json!({
        "type": "result",
        "is_error": false,
        "result": "Formatted."
    })
    .to_string()]);
    let h = harness("sdk", script);
    let (sink, mut rx) = ChannelSink::new();
    h.registry.register_observer("confirm", sink);
    let worker = h.registry.get_or_create_worker("confirm").unwrap();

    let task = tokio::spawn({
        let worker = worker.clone();
        async move { worker.process_user_message("format the code".into()).await }
    });
    let id = loop {
        if let WorkerEvent::ConfirmRequest { id, .. } = rx.recv().await.unwrap() {
            break id;
        }
    };

    assert!(!h.registry.handle_confirm_response("other-session", &id, true));
    assert!(h.registry.handle_confirm_response("confirm", &id, false));
    h.handle.wait_for_stdin("\"behavior\":\"deny\"").await;
    assert!(h.handle.stdin_text().contains("The user declined this action."));
    h.handle.release();
    task.await.unwrap().unwrap();

    assert_eq!(worker.history()[1].text(), "Formatted.");
}
