//! End-to-end orchestration over in-process fake runtimes.
//!
//! Each fake runtime sits on the far side of a connection's channel pair,
//! asserts on the code text it receives, and answers with scripted tagged
//! responses.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::{Mutex, mpsc};

use replink::{
    ActionCtx, ChannelPair, ClientConfig, Connection, ConnectionConfig, ConnectionRegistry,
    Connections, Dialect, HookName, HookSpec, Orchestrator, Sexp, SourceLocation, UiSink,
    manifest::ManifestCache,
};

#[derive(Debug, Clone, PartialEq)]
enum UiEvent {
    Out(String, String),
    Err(String, String),
    Location(String, SourceLocation),
    Completions(String, String),
}

#[derive(Default)]
struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingUi {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn events(&self) -> Vec<UiEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl UiSink for RecordingUi {
    async fn out(&self, tag: &str, text: &str) {
        self.events
            .lock()
            .await
            .push(UiEvent::Out(tag.to_string(), text.to_string()));
    }

    async fn err(&self, tag: &str, text: &str) {
        self.events
            .lock()
            .await
            .push(UiEvent::Err(tag.to_string(), text.to_string()));
    }

    async fn location(&self, tag: &str, location: &SourceLocation) {
        self.events
            .lock()
            .await
            .push(UiEvent::Location(tag.to_string(), location.clone()));
    }

    async fn completions(&self, tag: &str, candidates: &Sexp) {
        self.events
            .lock()
            .await
            .push(UiEvent::Completions(tag.to_string(), candidates.to_code(false)));
    }
}

struct Peer {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

impl Peer {
    async fn recv(&mut self) -> String {
        self.from_client.recv().await.expect("a submission")
    }

    async fn respond(&self, raw: &str) {
        self.to_client.send(raw.to_string()).await.expect("send");
    }

    fn assert_quiet(&mut self) {
        assert!(self.from_client.try_recv().is_err(), "unexpected submission");
    }
}

fn connection_with(
    tag: &str,
    dialect: Dialect,
    hooks: HashMap<HookName, HookSpec>,
) -> (Arc<Connection>, Peer) {
    let (out_tx, out_rx) = mpsc::channel(8);
    let (in_tx, in_rx) = mpsc::channel(8);
    let config = ConnectionConfig {
        tag: tag.to_string(),
        dialect,
        host: "127.0.0.1".to_string(),
        port: 5885,
        extensions: Vec::new(),
        enabled: true,
        hooks,
        dirs: Vec::new(),
    };
    (
        Arc::new(Connection::new(config, ChannelPair::new(out_tx, in_rx))),
        Peer {
            from_client: out_rx,
            to_client: in_tx,
        },
    )
}

fn connection(tag: &str, dialect: Dialect) -> (Arc<Connection>, Peer) {
    connection_with(tag, dialect, HashMap::new())
}

fn orchestrator_for(
    connections: Vec<Arc<Connection>>,
    ui: Arc<RecordingUi>,
    config: &ClientConfig,
) -> Orchestrator {
    let registry = Arc::new(Connections::new());
    for connection in connections {
        registry.insert(connection);
    }
    Orchestrator::new(
        registry as Arc<dyn ConnectionRegistry>,
        ui as Arc<dyn UiSink>,
        Arc::new(ManifestCache::new()),
        config,
    )
}

fn user_ctx() -> ActionCtx {
    ActionCtx {
        ns: Some("user".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn clj_evaluation_round_trips_once() {
    let (connection, mut peer) = connection("jvm", Dialect::Clj);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let submission = peer.recv().await;
        assert!(submission.contains("(+ 1 2)"));
        assert!(submission.contains("(ns user)"));
        peer.respond("[:ok 3]").await;
        peer
    });

    orchestrator
        .evaluate(user_ctx(), "(+ 1 2)".to_string())
        .await
        .unwrap();

    let mut peer = runtime.await.unwrap();
    peer.assert_quiet();
    assert_eq!(
        ui.events().await,
        vec![UiEvent::Out("jvm".to_string(), "3".to_string())]
    );
}

#[tokio::test]
async fn cljs_evaluation_wraps_and_reads_twice() {
    let (connection, mut peer) = connection("js", Dialect::Cljs);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let submission = peer.recv().await;
        // One submission carrying the namespace switch and exactly one
        // wrapped compound form.
        assert!(submission.starts_with("(in-ns (quote user))"));
        assert!(submission.contains("(do (+ 1 2) (+ 3 4))"));
        peer.respond("[:ok nil]").await;
        peer.respond("[:ok 7]").await;
        peer
    });

    orchestrator
        .evaluate(user_ctx(), "(+ 1 2) (+ 3 4)".to_string())
        .await
        .unwrap();

    let mut peer = runtime.await.unwrap();
    peer.assert_quiet();
    assert_eq!(
        ui.events().await,
        vec![UiEvent::Out("js".to_string(), "7".to_string())]
    );
}

#[tokio::test]
async fn eval_hook_rewrites_code_before_submission() {
    let mut hooks = HashMap::new();
    hooks.insert(HookName::Eval, HookSpec::new("dev/rewrite"));
    let (connection, mut peer) = connection_with("jvm", Dialect::Clj, hooks);
    let ui = RecordingUi::new();

    let mut config = ClientConfig::default();
    // A competing global hook must lose to the connection-tag hook.
    config
        .hooks
        .insert(HookName::Eval, HookSpec::new("global/rewrite"));
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &config);

    let runtime = tokio::spawn(async move {
        let hook_submission = peer.recv().await;
        assert!(hook_submission.contains("dev/rewrite"));
        assert!(!hook_submission.contains("global/rewrite"));
        assert!(hook_submission.contains("(replink hook eval)"));
        peer.respond("[:ok \"(+ 40 2)\"]").await;

        let eval_submission = peer.recv().await;
        assert!(eval_submission.contains("(+ 40 2)"));
        assert!(!eval_submission.contains("(+ 1 2)"));
        peer.respond("[:ok 42]").await;
        peer
    });

    orchestrator
        .evaluate(user_ctx(), "(+ 1 2)".to_string())
        .await
        .unwrap();

    runtime.await.unwrap();
    assert_eq!(
        ui.events().await,
        vec![UiEvent::Out("jvm".to_string(), "42".to_string())]
    );
}

#[tokio::test]
async fn result_hook_fires_after_success_and_is_discarded() {
    let mut hooks = HashMap::new();
    hooks.insert(HookName::Result, HookSpec::new("user/on-result"));
    let (connection, mut peer) = connection_with("jvm", Dialect::Clj, hooks);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let eval_submission = peer.recv().await;
        assert!(eval_submission.contains("(+ 1 2)"));
        peer.respond("[:ok 3]").await;

        let hook_submission = peer.recv().await;
        assert!(hook_submission.contains("user/on-result"));
        assert!(hook_submission.contains(":code"));
        assert!(hook_submission.contains(":value 3"));
        // Even an exceptional response here stays off the UI.
        peer.respond("[:exception {:cause \"log sink down\"}]").await;
        peer
    });

    orchestrator
        .evaluate(user_ctx(), "(+ 1 2)".to_string())
        .await
        .unwrap();

    let mut peer = runtime.await.unwrap();
    peer.assert_quiet();
    assert_eq!(
        ui.events().await,
        vec![UiEvent::Out("jvm".to_string(), "3".to_string())]
    );
}

#[tokio::test]
async fn exceptional_evaluation_is_surfaced_as_an_error() {
    let (connection, mut peer) = connection("jvm", Dialect::Clj);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        peer.recv().await;
        peer.respond("[:exception {:cause \"Divide by zero\"}]").await;
        peer
    });

    orchestrator
        .evaluate(user_ctx(), "(/ 1 0)".to_string())
        .await
        .unwrap();

    runtime.await.unwrap();
    let events = ui.events().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        UiEvent::Err(tag, text) => {
            assert_eq!(tag, "jvm");
            assert!(text.contains("Divide by zero"));
        }
        other => panic!("expected an error event, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_connection_set_reports_unless_passive() {
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(Vec::new(), ui.clone(), &ClientConfig::default());

    orchestrator
        .evaluate(user_ctx(), "(+ 1 2)".to_string())
        .await
        .unwrap();
    assert_eq!(
        ui.events().await,
        vec![UiEvent::Err(
            "replink".to_string(),
            "no matching connections".to_string()
        )]
    );

    let quiet_ui = RecordingUi::new();
    let orchestrator = orchestrator_for(Vec::new(), quiet_ui.clone(), &ClientConfig::default());
    orchestrator
        .completions(user_ctx(), "ma".to_string(), None)
        .await
        .unwrap();
    assert!(quiet_ui.events().await.is_empty());
}

#[tokio::test]
async fn actions_fan_out_over_connections_in_tag_order() {
    let (jvm, mut jvm_peer) = connection("a-jvm", Dialect::Clj);
    let (js, mut js_peer) = connection("b-js", Dialect::Cljs);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![js, jvm], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        // Connections are visited sequentially in tag order within the
        // action, so the clj submission must arrive first.
        let first = jvm_peer.recv().await;
        assert!(first.contains("(ns user)"));
        jvm_peer.respond("[:ok 3]").await;

        let second = js_peer.recv().await;
        assert!(second.contains("in-ns"));
        js_peer.respond("[:ok nil]").await;
        js_peer.respond("[:ok 3]").await;
    });

    orchestrator
        .evaluate(user_ctx(), "(+ 1 2)".to_string())
        .await
        .unwrap();

    runtime.await.unwrap();
    assert_eq!(
        ui.events().await,
        vec![
            UiEvent::Out("a-jvm".to_string(), "3".to_string()),
            UiEvent::Out("b-js".to_string(), "3".to_string()),
        ]
    );
}

#[tokio::test]
async fn doc_lookup_shows_text_and_swallows_misses() {
    let (connection, mut peer) = connection("jvm", Dialect::Clj);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let submission = peer.recv().await;
        assert!(submission.contains("clojure.repl/doc"));
        peer.respond("[:ok \"-------------------------\\nclojure.core/conj\\n\"]")
            .await;

        // Second lookup misses: empty doc text shows nothing.
        peer.recv().await;
        peer.respond("[:ok \"\"]").await;
        peer
    });

    orchestrator
        .doc(user_ctx(), "conj".to_string(), false)
        .await
        .unwrap();
    orchestrator
        .doc(user_ctx(), "nonsense".to_string(), true)
        .await
        .unwrap();

    runtime.await.unwrap();
    let events = ui.events().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        UiEvent::Out(tag, text) => {
            assert_eq!(tag, "jvm");
            assert!(text.contains("clojure.core/conj"));
        }
        other => panic!("expected doc text, got {other:?}"),
    }
}

#[tokio::test]
async fn definition_lookup_normalizes_the_reported_location() {
    let (connection, mut peer) = connection("jvm", Dialect::Clj);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let submission = peer.recv().await;
        assert!(submission.contains("(resolve s)"));
        peer.respond("[:ok [\"zip:file:/repo.jar!/ns/core.clj\" 10 5]]")
            .await;

        peer.recv().await;
        peer.respond("[:ok [\"NO_SOURCE_PATH\" 1 1]]").await;
        peer
    });

    orchestrator
        .definition(user_ctx(), "ns/thing".to_string())
        .await
        .unwrap();
    orchestrator
        .definition(user_ctx(), "compiled".to_string())
        .await
        .unwrap();

    runtime.await.unwrap();
    assert_eq!(
        ui.events().await,
        vec![
            UiEvent::Location(
                "jvm".to_string(),
                SourceLocation {
                    path: "/repo.jar::ns/core.clj".to_string(),
                    line: 10,
                    column: 4,
                }
            ),
            UiEvent::Err("jvm".to_string(), "no definition for compiled".to_string()),
        ]
    );
}

#[tokio::test]
async fn completions_deliver_raw_candidates() {
    let (connection, mut peer) = connection("jvm", Dialect::Clj);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let submission = peer.recv().await;
        assert!(submission.contains("completions \"ma\""));
        assert!(submission.contains("(find-ns (quote user))"));
        peer.respond("[:ok ({:candidate \"map\"} {:candidate \"mapv\"})]")
            .await;
    });

    orchestrator
        .completions(user_ctx(), "ma".to_string(), Some("(__prefix__ coll)".to_string()))
        .await
        .unwrap();

    runtime.await.unwrap();
    let events = ui.events().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        UiEvent::Completions(tag, candidates) => {
            assert_eq!(tag, "jvm");
            assert!(candidates.contains("mapv"));
        }
        other => panic!("expected completions, got {other:?}"),
    }
}

#[tokio::test]
async fn run_tests_defaults_to_the_paired_namespace() {
    let (connection, mut peer) = connection("jvm", Dialect::Clj);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![connection], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let submission = peer.recv().await;
        assert!(submission.contains("(quote app.core)"));
        assert!(submission.contains("(quote app.core-test)"));
        peer.respond("[:ok \"Ran 4 tests containing 9 assertions.\"]")
            .await;
    });

    let ctx = ActionCtx {
        ns: Some("app.core".to_string()),
        ..Default::default()
    };
    orchestrator.run_tests(ctx, Vec::new()).await.unwrap();

    runtime.await.unwrap();
    assert_eq!(
        ui.events().await,
        vec![UiEvent::Out(
            "jvm".to_string(),
            "Ran 4 tests containing 9 assertions.".to_string()
        )]
    );
}

#[tokio::test]
async fn bring_up_probes_then_injects_missing_support() {
    let mut hooks = HashMap::new();
    hooks.insert(HookName::Connect, HookSpec::new("user/on-connect"));
    let (connection, mut peer) = connection_with("jvm", Dialect::Clj, hooks);
    let ui = RecordingUi::new();
    let orchestrator =
        orchestrator_for(vec![connection.clone()], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let connect = peer.recv().await;
        assert!(connect.contains("user/on-connect"));
        assert!(connect.contains(":port 5885"));
        peer.respond("[:ok nil]").await;

        let probe = peer.recv().await;
        assert!(probe.contains("all-ns"));
        peer.respond("[:ok []]").await;

        let inject = peer.recv().await;
        assert!(inject.contains("(load \"/replink/internal/compliment/utils\""));
        peer.respond("[:ok nil]").await;
        peer
    });

    orchestrator.bring_up(vec![connection]).await.unwrap();

    let mut peer = runtime.await.unwrap();
    peer.assert_quiet();
    assert!(ui.events().await.is_empty());
}

#[tokio::test]
async fn refresh_is_commanded_on_clj_and_skipped_on_cljs() {
    let (jvm, mut jvm_peer) = connection("jvm", Dialect::Clj);
    let (js, mut js_peer) = connection("zjs", Dialect::Cljs);
    let ui = RecordingUi::new();
    let orchestrator = orchestrator_for(vec![jvm, js], ui.clone(), &ClientConfig::default());

    let runtime = tokio::spawn(async move {
        let submission = jvm_peer.recv().await;
        assert!(submission.contains("clojure.tools.namespace.repl/refresh"));
        jvm_peer.respond("[:ok :ok]").await;
        (jvm_peer, js_peer)
    });

    orchestrator
        .refresh(user_ctx(), replink::RefreshMode::Changed)
        .await
        .unwrap();

    let (mut jvm_peer, mut js_peer) = runtime.await.unwrap();
    jvm_peer.assert_quiet();
    js_peer.assert_quiet();
    assert_eq!(
        ui.events().await,
        vec![UiEvent::Out("jvm".to_string(), ":ok".to_string())]
    );
}
