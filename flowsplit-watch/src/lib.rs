//! # flowsplit-watch
//!
//! The watch orchestrator: composes a remote poller and a filesystem watcher into one
//! serialized reaction loop that keeps a directory tree and a remote document endpoint
//! in continuous bidirectional sync.
//!
//! Two producers — [`poller`] and [`fswatch`] — feed a single mailbox. Exactly one
//! reaction runs at a time; the poller and filesystem watcher never touch shared state
//! themselves, they only enqueue: an mpsc-fed message loop with periodic background
//! tasks as producers, nothing but the loop itself mutating engine state.

pub mod commands;
mod cycle;
mod fswatch;
mod poller;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowsplit_core::{Document, Fingerprint, FlowsplitConfig, FlowsplitError, NodeId};
use flowsplit_explode::ExplodeEngine;
use flowsplit_plugins::PluginHost;
use flowsplit_rebuild::RebuildEngine;
use flowsplit_remote::{Credential, FetchOutcome, RemoteClient};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use commands::{CommandAck, OperatorCommand, StatusSnapshot};
pub use cycle::CycleWindow;

/// Reason the orchestrator stopped reacting to new events. Cleared only by an
/// explicit operator `resume`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PauseReason {
    Conflict,
    Oscillation { cycles: usize, plugins: Vec<String> },
    ErrorCap,
    /// An operator issued `pause` directly; no automatic condition triggered it.
    Manual,
}

impl PauseReason {
    fn describe(&self) -> String {
        match self {
            PauseReason::Conflict => "conflict".to_string(),
            PauseReason::Oscillation { cycles, plugins } => {
                format!("oscillation: {cycles} cycles, implicating {plugins:?}")
            }
            PauseReason::ErrorCap => "error-cap".to_string(),
            PauseReason::Manual => "manual".to_string(),
        }
    }
}

enum MailboxEvent {
    RemoteTick,
    LocalEdit,
    Command(OperatorCommand, oneshot::Sender<CommandAck>),
}

/// A handle the embedding process uses to send operator commands and request
/// shutdown. Cloning is cheap; every clone talks to the same running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<(OperatorCommand, oneshot::Sender<CommandAck>)>,
    shutdown: CancellationToken,
}

impl OrchestratorHandle {
    pub async fn send(&self, command: OperatorCommand) -> Result<CommandAck, FlowsplitError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send((command, tx))
            .await
            .map_err(|_| FlowsplitError::Config("orchestrator mailbox closed".into()))?;
        rx.await.map_err(|_| FlowsplitError::Config("orchestrator dropped the command reply".into()))
    }

    /// Cancels the poller, the filesystem watcher, and drains the reaction loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Builds a [`PluginHost`] from scratch — invoked at startup and again on
/// `reload-plugins`, so plugin selection can be re-read from whatever config source
/// the embedder uses.
pub type HostFactory = Arc<dyn Fn() -> PluginHost + Send + Sync>;

pub struct WatchOrchestrator {
    remote: Arc<RemoteClient>,
    config: FlowsplitConfig,
    tree_root: PathBuf,
    document_path: PathBuf,
}

struct ReactionState {
    paused: Option<PauseReason>,
    current_etag: Option<String>,
    current_revision: Option<String>,
    /// `LocalEdit` events observed before this instant are the tree's own writes
    /// settling (debounced by the filesystem watcher) and are dropped, not acted on —
    /// the gate that keeps an explode's own writes from self-triggering a push.
    quiet_until: Option<Instant>,
    consecutive_failures: usize,
    cycles: CycleWindow,
    last_fetched: Option<Document>,
}

impl ReactionState {
    fn new(config: &FlowsplitConfig) -> Self {
        Self {
            paused: None,
            current_etag: None,
            current_revision: None,
            quiet_until: None,
            consecutive_failures: 0,
            cycles: CycleWindow::new(config.oscillation_window, config.oscillation_cycle_threshold),
            last_fetched: None,
        }
    }

    fn snapshot(&mut self) -> StatusSnapshot {
        StatusSnapshot {
            paused: self.paused.as_ref().map(PauseReason::describe),
            current_etag: self.current_etag.clone(),
            current_revision: self.current_revision.clone(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}

impl WatchOrchestrator {
    pub fn new(
        base_url: impl Into<String>,
        credential: Credential,
        tree_root: impl Into<PathBuf>,
        document_path: impl Into<PathBuf>,
        config: FlowsplitConfig,
    ) -> Result<Self, FlowsplitError> {
        let remote = Arc::new(RemoteClient::new(base_url, credential, &config)?);
        Ok(Self { remote, config, tree_root: tree_root.into(), document_path: document_path.into() })
    }

    /// Spawns the poller and filesystem-watcher producer tasks and runs the serial
    /// reaction loop until `handle.shutdown()` is called. `host_factory` builds the
    /// initial plugin host and is invoked again on every `reload-plugins` command.
    pub fn run(
        self,
        host_factory: HostFactory,
    ) -> (OrchestratorHandle, tokio::task::JoinHandle<Result<(), FlowsplitError>>) {
        let shutdown = CancellationToken::new();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::channel(16);

        // Remote poller: a producer, never touches shared state itself.
        {
            let (tick_tx, mut tick_rx) = mpsc::channel(4);
            let mailbox = mailbox_tx.clone();
            tokio::spawn(async move {
                while tick_rx.recv().await.is_some() {
                    if mailbox.send(MailboxEvent::RemoteTick).await.is_err() {
                        return;
                    }
                }
            });
            tokio::spawn(poller::run(self.config.poll_interval, tick_tx, shutdown.clone()));
        }

        // Filesystem watcher: same pattern, debounced at the source.
        {
            let (edit_tx, mut edit_rx) = mpsc::channel(4);
            let (fs_shutdown_tx, fs_shutdown_rx) = oneshot::channel();
            let mailbox = mailbox_tx.clone();
            tokio::spawn(async move {
                while edit_rx.recv().await.is_some() {
                    if mailbox.send(MailboxEvent::LocalEdit).await.is_err() {
                        return;
                    }
                }
            });
            let tree_root = self.tree_root.clone();
            let debounce = self.config.debounce_window;
            tokio::spawn(async move {
                if let Err(e) = fswatch::run(tree_root, debounce, edit_tx, fs_shutdown_rx).await {
                    warn!(error = %e, "filesystem watcher stopped");
                }
            });
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                let _ = fs_shutdown_tx.send(());
            });
        }

        // Command forwarder: bridges the public `commands` channel into the mailbox so
        // commands interleave with ticks in strict arrival order.
        {
            let mailbox = mailbox_tx.clone();
            let mut command_rx = command_rx;
            tokio::spawn(async move {
                while let Some((cmd, reply)) = command_rx.recv().await {
                    if mailbox.send(MailboxEvent::Command(cmd, reply)).await.is_err() {
                        return;
                    }
                }
            });
        }

        let handle = OrchestratorHandle { commands: command_tx, shutdown: shutdown.clone() };
        let join = tokio::spawn(self.reaction_loop(mailbox_rx, host_factory, shutdown));
        (handle, join)
    }

    async fn reaction_loop(
        self,
        mut mailbox_rx: mpsc::Receiver<MailboxEvent>,
        host_factory: HostFactory,
        shutdown: CancellationToken,
    ) -> Result<(), FlowsplitError> {
        let mut host = Arc::new(host_factory());
        let mut state = ReactionState::new(&self.config);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("watch orchestrator shutting down");
                    return Ok(());
                }
                event = mailbox_rx.recv() => {
                    let Some(event) = event else { return Ok(()) };
                    match event {
                        MailboxEvent::RemoteTick => {
                            self.on_remote_tick(&mut state, &host).await;
                        }
                        MailboxEvent::LocalEdit => {
                            self.on_local_edit(&mut state, &host).await;
                        }
                        MailboxEvent::Command(cmd, reply) => {
                            let ack = self.on_command(&mut state, &mut host, cmd, &host_factory).await;
                            let _ = reply.send(ack);
                        }
                    }
                }
            }
        }
    }

    async fn on_remote_tick(&self, state: &mut ReactionState, host: &Arc<PluginHost>) {
        if state.paused.is_some() {
            return;
        }
        match self.remote.fetch(state.current_etag.as_deref()).await {
            Ok(FetchOutcome::Unchanged) => {}
            Ok(FetchOutcome::Fresh { document, etag, revision }) => {
                self.apply_remote_update(state, host, document, etag, revision).await;
            }
            Err(FlowsplitError::RemoteTransient(_)) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.consecutive_failure_cap {
                    warn!("consecutive remote failures hit the cap; pausing");
                    state.paused = Some(PauseReason::ErrorCap);
                }
            }
            Err(e) => warn!(error = %e, "remote poll failed"),
        }
    }

    async fn apply_remote_update(
        &self,
        state: &mut ReactionState,
        host: &Arc<PluginHost>,
        document: Document,
        etag: Option<String>,
        revision: Option<String>,
    ) {
        state.consecutive_failures = 0;

        let engine = ExplodeEngine::new((**host).clone(), self.config.clone());
        let report = match engine.explode(document.clone(), &self.tree_root, &self.document_path).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "explode failed while applying remote update");
                return;
            }
        };

        // Any filesystem event our own write triggers is debounced by the watcher and
        // delivered up to `debounce_window` later; until then, ignore `LocalEdit`.
        state.quiet_until = Some(Instant::now() + self.config.debounce_window);

        let needs_push = report.pre_explode_modified
            || report.post_explode_modified
            || !report.unstable_nodes.is_empty();

        state.current_etag = etag;
        state.current_revision = revision;
        state.last_fetched = Some(document);

        if needs_push {
            info!(
                unstable = report.unstable_nodes.len(),
                modified_by = ?report.modified_by,
                "remote update requires a push back; enqueuing synthetic local edit"
            );
            if state.cycles.record_and_check() {
                let cycles = state.cycles.len();
                state.paused = Some(PauseReason::Oscillation { cycles, plugins: report.modified_by });
                warn!(cycles, "oscillation detected, pausing");
                return;
            }
            self.push_tree(state, host).await;
        }
    }

    async fn on_local_edit(&self, state: &mut ReactionState, host: &Arc<PluginHost>) {
        if let Some(quiet_until) = state.quiet_until {
            if Instant::now() < quiet_until {
                return;
            }
            state.quiet_until = None;
        }
        if state.paused.is_some() {
            return;
        }
        self.push_tree(state, host).await;
    }

    async fn push_tree(&self, state: &mut ReactionState, host: &Arc<PluginHost>) {
        let engine = RebuildEngine::new((**host).clone(), self.config.clone());
        let report = match engine.rebuild(&self.tree_root, &self.document_path, false).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "rebuild failed, cannot push");
                return;
            }
        };

        match self.remote.push(&report.document, state.current_revision.as_deref()).await {
            Ok(outcome) => {
                state.current_revision = Some(outcome.new_revision);
                // Any successful push forces the next fetch to be unconditional, so
                // server-applied mutations (if any) become visible.
                state.current_etag = None;
                state.consecutive_failures = 0;
            }
            Err(FlowsplitError::RemoteConflict) => {
                warn!("push conflict, pausing until operator resumes");
                state.paused = Some(PauseReason::Conflict);
            }
            Err(FlowsplitError::RateLimited { retry_after_secs }) => {
                warn!(retry_after_secs, "push rate limited, backing off");
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                if let Ok(outcome) = self.remote.push(&report.document, state.current_revision.as_deref()).await {
                    state.current_revision = Some(outcome.new_revision);
                    state.current_etag = None;
                }
            }
            Err(FlowsplitError::RemoteTransient(_)) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.consecutive_failure_cap {
                    state.paused = Some(PauseReason::ErrorCap);
                }
            }
            Err(e) => warn!(error = %e, "push failed"),
        }
    }

    async fn on_command(
        &self,
        state: &mut ReactionState,
        host: &mut Arc<PluginHost>,
        command: OperatorCommand,
        host_factory: &HostFactory,
    ) -> CommandAck {
        match command {
            OperatorCommand::Download => {
                self.clear_pause(state);
                state.current_etag = None;
                match self.remote.fetch(None).await {
                    Ok(FetchOutcome::Fresh { document, etag, revision }) => {
                        self.apply_remote_update(state, host, document, etag, revision).await;
                        CommandAck::Ok
                    }
                    Ok(FetchOutcome::Unchanged) => CommandAck::Ok,
                    Err(e) => CommandAck::Error(e.to_string()),
                }
            }
            OperatorCommand::Upload => {
                self.clear_pause(state);
                self.push_tree(state, host).await;
                CommandAck::Ok
            }
            OperatorCommand::Check => {
                let engine = RebuildEngine::new((**host).clone(), self.config.clone());
                match engine.rebuild(&self.tree_root, &self.document_path, false).await {
                    Ok(report) => {
                        let mut changed: Vec<NodeId> = report.new_nodes.clone();
                        changed.extend(report.missing_nodes.clone());
                        let matches = match &state.last_fetched {
                            Some(last) => Fingerprint::of_document(last) == Fingerprint::of_document(&report.document),
                            None => false,
                        };
                        CommandAck::CheckResult { matches, unstable_or_changed: changed }
                    }
                    Err(e) => CommandAck::Error(e.to_string()),
                }
            }
            OperatorCommand::Status => CommandAck::Status(state.snapshot()),
            OperatorCommand::Pause => {
                if state.paused.is_none() {
                    state.paused = Some(PauseReason::Manual);
                }
                CommandAck::Ok
            }
            OperatorCommand::Resume => {
                self.clear_pause(state);
                CommandAck::Ok
            }
            OperatorCommand::ReloadPlugins => {
                *host = Arc::new(host_factory());
                info!("plugin host reloaded");
                CommandAck::Ok
            }
            OperatorCommand::Quit => CommandAck::Ok,
        }
    }

    /// Clears `paused` along with the counters that fed the decision to pause, per
    /// `resume`/`download`/`upload` all being documented as pause-clearing commands.
    fn clear_pause(&self, state: &mut ReactionState) {
        state.paused = None;
        state.consecutive_failures = 0;
        state.cycles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowsplit_plugins::builtin::default_plugins;
    use flowsplit_plugins::{PluginDescriptor, PluginHook, PluginSelection};
    use serde_json::json;
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stable_flow_body() -> serde_json::Value {
        json!([
            {"id": "t1", "type": "tab", "label": "Flow 1"},
            {"id": "n1", "type": "function", "z": "t1", "x": 10, "y": 20, "wires": [[]], "func": "return msg;"},
        ])
    }

    fn default_host_factory() -> HostFactory {
        Arc::new(|| PluginHost::new(default_plugins(), &PluginSelection::all()))
    }

    fn fast_config() -> FlowsplitConfig {
        let mut cfg = FlowsplitConfig::default();
        cfg.poll_interval = Duration::from_secs(3600); // tests drive reactions via commands, not the timer
        cfg.debounce_window = Duration::from_millis(80);
        cfg
    }

    async fn orchestrator(server: &MockServer, dir: &Path, config: FlowsplitConfig) -> WatchOrchestrator {
        WatchOrchestrator::new(server.uri(), Credential::None, dir, dir.join("flow.json"), config).unwrap()
    }

    #[tokio::test]
    async fn stable_remote_update_does_not_push_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/flows")).respond_with(
            ResponseTemplate::new(200).insert_header("etag", "e1").insert_header("x-flow-revision", "r1").set_body_json(stable_flow_body()),
        ).mount(&server).await;
        Mock::given(method("POST")).and(path("/flows")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"rev": "r2"})))
            .expect(0)
            .mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = orchestrator(&server, dir.path(), fast_config()).await.run(default_host_factory());

        let ack = handle.send(OperatorCommand::Download).await.unwrap();
        assert_eq!(ack, CommandAck::Ok);

        handle.shutdown();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn local_edit_rebuild_is_pushed_on_upload() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/flows")).respond_with(
            ResponseTemplate::new(200).insert_header("etag", "e1").insert_header("x-flow-revision", "r1").set_body_json(stable_flow_body()),
        ).mount(&server).await;
        Mock::given(method("POST")).and(path("/flows")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"rev": "r2"})))
            .expect(1)
            .mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = orchestrator(&server, dir.path(), fast_config()).await.run(default_host_factory());

        handle.send(OperatorCommand::Download).await.unwrap();

        let residual = dir.path().join("t1").join("n1").join("n1.json");
        let mut content: serde_json::Value = serde_json::from_slice(&std::fs::read(&residual).unwrap()).unwrap();
        content["x"] = json!(99);
        std::fs::write(&residual, serde_json::to_vec(&content).unwrap()).unwrap();

        let ack = handle.send(OperatorCommand::Upload).await.unwrap();
        assert_eq!(ack, CommandAck::Ok);

        handle.shutdown();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn push_conflict_pauses_until_resume() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/flows")).respond_with(
            ResponseTemplate::new(200).insert_header("etag", "e1").insert_header("x-flow-revision", "r1").set_body_json(stable_flow_body()),
        ).mount(&server).await;
        Mock::given(method("POST")).and(path("/flows")).respond_with(ResponseTemplate::new(409)).mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = orchestrator(&server, dir.path(), fast_config()).await.run(default_host_factory());

        handle.send(OperatorCommand::Download).await.unwrap();
        handle.send(OperatorCommand::Upload).await.unwrap();

        match handle.send(OperatorCommand::Status).await.unwrap() {
            CommandAck::Status(snapshot) => assert_eq!(snapshot.paused.as_deref(), Some("conflict")),
            other => panic!("expected Status, got {other:?}"),
        }

        handle.send(OperatorCommand::Resume).await.unwrap();
        match handle.send(OperatorCommand::Status).await.unwrap() {
            CommandAck::Status(snapshot) => assert!(snapshot.paused.is_none()),
            other => panic!("expected Status, got {other:?}"),
        }

        handle.shutdown();
        join.await.unwrap().unwrap();
    }

    struct AlwaysModifiesPostExplode;

    #[async_trait]
    impl flowsplit_plugins::PostExplodePlugin for AlwaysModifiesPostExplode {
        async fn run(&self, _tree_root: &Path, _document_path: &Path) -> Result<bool, FlowsplitError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn non_converging_plugin_trips_oscillation_pause() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/flows")).respond_with(
            ResponseTemplate::new(200).insert_header("etag", "e1").insert_header("x-flow-revision", "r1").set_body_json(stable_flow_body()),
        ).mount(&server).await;
        Mock::given(method("POST")).and(path("/flows")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"rev": "r2"})))
            .mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = fast_config();
        config.poll_interval = Duration::from_millis(15);
        config.oscillation_window = Duration::from_secs(60);
        config.oscillation_cycle_threshold = 5;

        let host_factory: HostFactory = Arc::new(|| {
            let mut descriptors = default_plugins();
            descriptors.push(PluginDescriptor::new(
                "always-modifies",
                900,
                PluginHook::PostExplode(Arc::new(AlwaysModifiesPostExplode)),
            ));
            PluginHost::new(descriptors, &PluginSelection::all())
        });

        // Real poll ticks drive this one: oscillation only trips on the automatic
        // RemoteTick path, since `download`/`upload` explicitly clear the pause state
        // (and the cycle window with it) on every call.
        let (handle, join) = orchestrator(&server, dir.path(), config).await.run(host_factory);

        tokio::time::sleep(Duration::from_millis(400)).await;

        match handle.send(OperatorCommand::Status).await.unwrap() {
            CommandAck::Status(snapshot) => {
                assert!(snapshot.paused.as_deref().unwrap_or("").starts_with("oscillation"))
            }
            other => panic!("expected Status, got {other:?}"),
        }

        let posts_at_pause = server.received_requests().await.unwrap().into_iter().filter(|r| r.method.as_str() == "POST").count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let posts_after_wait = server.received_requests().await.unwrap().into_iter().filter(|r| r.method.as_str() == "POST").count();
        assert_eq!(posts_at_pause, posts_after_wait, "no further pushes once oscillation trips");

        handle.shutdown();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn own_tree_write_does_not_self_trigger_a_push() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/flows")).respond_with(
            ResponseTemplate::new(200).insert_header("etag", "e1").insert_header("x-flow-revision", "r1").set_body_json(stable_flow_body()),
        ).mount(&server).await;
        Mock::given(method("POST")).and(path("/flows")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"rev": "r2"})))
            .expect(0)
            .mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = orchestrator(&server, dir.path(), fast_config()).await.run(default_host_factory());

        handle.send(OperatorCommand::Download).await.unwrap();
        // The explode just written triggers notify events of its own; give the
        // filesystem watcher's debounce window time to fire and reach the mailbox.
        tokio::time::sleep(Duration::from_millis(400)).await;

        handle.shutdown();
        join.await.unwrap().unwrap();
    }
}
