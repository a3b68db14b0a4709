//! The engine that powers sandrun.
//!
//! One engine serves the whole process. Each submission gets its own spawned
//! task that drives the execution state machine end-to-end: workspace
//! materialization, sandbox creation, output drain under a deadline, outcome
//! classification, and unconditional teardown. Events flow to the caller
//! through a bounded channel; the channel closing is the end-of-stream
//! signal.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt as _;
use sandrun_config::Config;
use sandrun_docker::Container;
use sandrun_docker::Docker;
use sandrun_docker::sandbox_name;
use sandrun_events::Event;
use sandrun_languages::LanguageRegistry;
use sandrun_languages::LanguageSpec;
use sandrun_languages::LanguageTag;
use sandrun_languages::WORKSPACE_DIR;
use sandrun_languages::detect;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

pub mod active;
pub mod command;
pub mod state;
pub mod submission;
pub mod workspace;

pub use active::ActiveExecutions;
pub use state::State;
pub use submission::Submission;

use crate::command::INSTALL_TIMEOUT_MULTIPLIER;
use crate::command::LineKind;
use crate::workspace::Workspace;

/// The capacity for the events channel.
///
/// This is the number of events to buffer before the engine task awaits the
/// consumer. The value of `100` was chosen simply as a reasonable default.
const EVENTS_CHANNEL_CAPACITY: usize = 100;

/// The capacity for the output-line channel bridging the log stream reader to
/// the engine task.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the exit code after the output stream ends.
///
/// The stream closing almost always means the container has exited; this
/// bounds the pathological case where output closes but the process lingers.
const EXIT_CODE_TIMEOUT: Duration = Duration::from_secs(5);

/// An error encountered while driving an execution.
///
/// The `Display` renditions are the exact messages surfaced to clients in
/// `error` events.
#[derive(Debug, Error)]
enum ExecutionError {
    /// The image could not be ensured or the container could not be created.
    #[error("Failed to create Docker container")]
    CreateFailed(#[source] sandrun_docker::Error),
    /// The container was created but refused to start.
    #[error("Failed to start container")]
    StartFailed(#[source] sandrun_docker::Error),
    /// Anything else.
    #[error("Execution error: {0}")]
    Internal(String),
}

/// Generates a process-unique execution id.
pub fn generate_execution_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("exec_{}", &hex[..12])
}

/// A handle to one spawned execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    /// The execution id, for cancellation.
    id: String,

    /// The event receiver; closes when the execution is over.
    events: mpsc::Receiver<Event>,
}

impl ExecutionHandle {
    /// Gets the execution id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receives the next event, or `None` once the execution is over.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }
}

/// Sends events to the consumer, tolerating its disappearance.
///
/// A gone consumer must not abort the execution: teardown still has to run,
/// and cancellation arrives separately through the registry.
struct Emitter {
    /// The sending half of the events channel.
    tx: mpsc::Sender<Event>,
}

impl Emitter {
    /// Emits one event.
    async fn emit(&self, event: Event) {
        let _ = self.tx.send(event).await;
    }
}

/// Logs and performs a state transition.
fn advance(id: &str, state: &mut State, next: State) {
    debug!("execution `{id}`: {state} -> {next}");
    *state = next;
}

/// The sandboxed execution engine.
#[derive(Clone, Debug)]
pub struct Engine {
    /// The sandbox driver.
    docker: Docker,

    /// The language registry.
    languages: Arc<LanguageRegistry>,

    /// The engine configuration.
    config: Arc<Config>,

    /// The active-execution registry.
    active: ActiveExecutions,
}

impl Engine {
    /// Constructs a new engine.
    pub fn new(docker: Docker, languages: Arc<LanguageRegistry>, config: Arc<Config>) -> Self {
        Self {
            docker,
            languages,
            config,
            active: ActiveExecutions::new(),
        }
    }

    /// Gets the language registry.
    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    /// Gets the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the active-execution registry.
    pub fn active(&self) -> &ActiveExecutions {
        &self.active
    }

    /// Spawns an execution for a submission and returns its handle.
    ///
    /// The spawned task always runs to terminal cleanup, even when the
    /// handle is dropped early.
    pub fn submit(&self, submission: Submission) -> ExecutionHandle {
        let id = generate_execution_id();
        let (tx, events) = mpsc::channel(EVENTS_CHANNEL_CAPACITY);

        let engine = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move { engine.run(task_id, submission, tx).await });

        ExecutionHandle { id, events }
    }

    /// Cancels an execution by id.
    ///
    /// Stops and removes its container and drops the registry entry; the
    /// draining engine task observes stream termination and proceeds to its
    /// own terminal cleanup. Idempotent: returns `false` if the id is not
    /// registered.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.active.remove(id) {
            Some(container) => {
                debug!("canceling execution `{id}`");
                let _ = container.stop(self.config.stop_grace_secs()).await;
                let _ = container.force_remove().await;
                true
            }
            None => false,
        }
    }

    /// Removes containers orphaned by a previous process crash.
    pub async fn sweep_orphans(&self) -> sandrun_docker::Result<usize> {
        self.docker
            .sweep_orphans(self.config.container_prefix())
            .await
    }

    /// Ensures every registry image is present locally.
    ///
    /// Pull failures are logged and skipped: a missing image surfaces again,
    /// as an error, when a submission actually needs it.
    pub async fn pull_images(&self) {
        for image in self.languages.images() {
            if let Err(e) = self.docker.ensure_image(image).await {
                warn!("failed to pre-pull image `{image}`: {e}");
            }
        }
    }

    /// Drives one execution end-to-end and then cleans up.
    async fn run(self, id: String, submission: Submission, tx: mpsc::Sender<Event>) {
        let emitter = Emitter { tx };

        // The preview language bypasses the sandbox entirely.
        if submission.language == LanguageTag::Html {
            emitter.emit(Event::status("Rendering HTML preview...")).await;
            emitter.emit(Event::html_preview(submission.code.clone())).await;
            emitter.emit(Event::complete("HTML rendered successfully")).await;
            return;
        }

        if let Err(e) = submission.validate() {
            debug!("execution `{id}` rejected: {e}");
            emitter.emit(Event::error(e.to_string())).await;
            return;
        }

        let mut state = State::Pending;

        if let Err(e) = self.execute(&id, &submission, &emitter, &mut state).await {
            debug!("execution `{id}` failed: {e}");
            advance(&id, &mut state, State::Failed);
            emitter.emit(Event::error(e.to_string())).await;
        }

        // Terminal cleanup, on every exit path. Failures here are logged and
        // swallowed; the orphan sweep at next startup is the backstop.
        if let Some(container) = self.active.remove(&id) {
            if let Err(e) = container.stop(self.config.stop_grace_secs()).await {
                debug!("cleanup stop failed for `{id}`: {e}");
            }

            if let Err(e) = container.force_remove().await {
                debug!("cleanup remove failed for `{id}`: {e}");
            }
        }

        debug!("execution `{id}` finished in state `{state}`");
    }

    /// The state machine proper: everything between validation and cleanup.
    ///
    /// Emits all progress and terminal events except for setup errors, which
    /// are returned and rendered by [`run`](Self::run). The temporary
    /// workspace lives on this function's stack and is removed on return.
    async fn execute(
        &self,
        id: &str,
        submission: &Submission,
        emitter: &Emitter,
        state: &mut State,
    ) -> Result<(), ExecutionError> {
        let spec = self.languages.get(submission.language);
        let install_path = command::uses_install_path(submission, spec);

        if !submission.install_packages.is_empty() && !install_path {
            debug!(
                "execution `{id}`: `{}` does not support installs; running without the prelude",
                spec.tag()
            );
        }

        if install_path {
            emitter
                .emit(Event::install_start(submission.install_packages.clone()))
                .await;
        } else {
            emitter.emit(Event::status("Starting execution...")).await;
        }

        advance(id, state, State::Preparing);

        let workspace = Workspace::materialize(submission, spec)
            .map_err(|e| ExecutionError::Internal(e.to_string()))?;
        let archive = workspace
            .archive()
            .map_err(|e| ExecutionError::Internal(e.to_string()))?;
        let command = command::compose(submission, spec, &workspace);

        let network_enabled = install_path || spec.network_allowed_for_exec();
        let container = self
            .create_container(id, spec, command, network_enabled)
            .await
            .map_err(ExecutionError::CreateFailed)?;

        self.active.insert(id, container.clone());

        container
            .upload_archive(WORKSPACE_DIR, archive)
            .await
            .map_err(|e| ExecutionError::Internal(e.to_string()))?;

        container
            .start()
            .await
            .map_err(ExecutionError::StartFailed)?;

        advance(id, state, State::Running);
        emitter.emit(Event::status("Running...")).await;

        advance(id, state, State::Draining);
        let timeout_secs = if install_path {
            self.config.execution_timeout_secs() * INSTALL_TIMEOUT_MULTIPLIER
        } else {
            self.config.execution_timeout_secs()
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);

        let mut lines = spawn_line_reader(container.output_stream());
        let mut buffer = String::new();
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, lines.recv()).await {
                Ok(Some(line)) => {
                    buffer.push_str(&line);

                    let event = match command::classify_line(&line) {
                        LineKind::InstallComplete => Event::install_complete(line),
                        LineKind::InstallError => Event::install_error(line),
                        LineKind::Stdout => Event::stdout(line),
                    };

                    emitter.emit(event).await;
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            advance(id, state, State::TimedOut);
            let _ = container.stop(self.config.stop_grace_secs()).await;

            emitter
                .emit(Event::error(format!(
                    "Execution timed out after {timeout_secs} seconds"
                )))
                .await;
            emitter.emit(Event::complete("Execution timed out")).await;
            return Ok(());
        }

        // Stream EOF with the registry entry gone means the execution was
        // canceled from outside; the peer is gone, so no terminal event.
        if !self.active.contains(id) {
            advance(id, state, State::Canceled);
            return Ok(());
        }

        let exit_code = match tokio::time::timeout(EXIT_CODE_TIMEOUT, container.wait_exit_code())
            .await
        {
            Ok(result) => result.map_err(|e| ExecutionError::Internal(e.to_string()))?,
            Err(_) => -1,
        };

        if exit_code == 0 {
            advance(id, state, State::Complete);
            emitter
                .emit(Event::complete("Execution completed successfully"))
                .await;
        } else {
            advance(id, state, State::Failed);

            // The install path reports failures through its sentinel; the
            // detector only runs on plain executions.
            if !install_path {
                if let Some(dep) = detect::first_missing_dependency(spec, &buffer) {
                    let install = spec
                        .install_command(dep.package_manager, &dep.package_name)
                        .expect("detected dependencies have install templates");

                    emitter
                        .emit(Event::dependency(
                            dep.package_manager.to_string(),
                            dep.package_name,
                            install,
                        ))
                        .await;
                }
            }

            emitter
                .emit(Event::complete(format!(
                    "Execution failed with exit code {exit_code}"
                )))
                .await;
        }

        Ok(())
    }

    /// Ensures the image and creates the sandbox container.
    ///
    /// Fails closed: no handle is returned unless the image is present.
    async fn create_container(
        &self,
        id: &str,
        spec: &LanguageSpec,
        command: Vec<String>,
        network_enabled: bool,
    ) -> sandrun_docker::Result<Container> {
        let image = spec
            .image()
            .ok_or_else(|| sandrun_docker::Error::Message(String::from("language has no image")))?;

        self.docker.ensure_image(image).await?;

        let memory = self
            .config
            .memory_limit_bytes()
            .map_err(|e| sandrun_docker::Error::Message(e.to_string()))?;

        let name = sandbox_name(self.config.container_prefix(), spec.tag().as_str(), id);

        self.docker
            .container_builder()
            .image(image)
            .command(command)
            .work_dir(WORKSPACE_DIR)
            .memory(memory)
            .cpu_quota(self.config.cpu_quota())
            .cpu_period(self.config.cpu_period())
            .network_enabled(network_enabled)
            .try_create(&name)
            .await
    }
}

/// Bridges a chunked output stream into a bounded channel of whole lines.
///
/// One spawned task reads the stream, maintains a partial-line buffer, and
/// pushes decoded lines (newline included) into the channel. Dropping the
/// sender closes the channel, which is the EOF signal the engine drains
/// against.
fn spawn_line_reader(
    stream: impl Stream<Item = sandrun_docker::Result<Bytes>> + Send + 'static,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        let mut partial: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("output stream ended with an error: {e}");
                    break;
                }
            };

            partial.extend_from_slice(&bytes);

            while let Some(pos) = partial.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = partial.drain(..=pos).collect();

                if tx
                    .send(String::from_utf8_lossy(&line).into_owned())
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        if !partial.is_empty() {
            let _ = tx
                .send(String::from_utf8_lossy(&partial).into_owned())
                .await;
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use sandrun_events::EventKind;

    use super::*;

    /// An engine over a lazily-connected client; tests below never touch the
    /// daemon.
    fn engine() -> Engine {
        Engine::new(
            Docker::with_socket_defaults().expect("client should construct"),
            Arc::new(LanguageRegistry::new()),
            Arc::new(Config::default()),
        )
    }

    /// Collects every event of an execution.
    async fn collect(mut handle: ExecutionHandle) -> Vec<Event> {
        let mut events = Vec::new();

        while let Some(event) = handle.next_event().await {
            events.push(event);
        }

        events
    }

    #[test]
    fn execution_ids_are_short_opaque_tokens() {
        let id = generate_execution_id();

        assert!(id.starts_with("exec_"));
        assert_eq!(id.len(), "exec_".len() + 12);
        assert!(id["exec_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_execution_id());
    }

    #[tokio::test]
    async fn html_bypasses_the_sandbox() {
        let engine = engine();
        let handle = engine.submit(Submission {
            language: LanguageTag::Html,
            code: String::from("<p>hi</p>"),
            stdin: None,
            files: Vec::new(),
            install_packages: Vec::new(),
        });

        let events = collect(handle).await;
        let kinds: Vec<_> = events.iter().map(|event| event.kind).collect();

        assert_eq!(
            kinds,
            [EventKind::Status, EventKind::HtmlPreview, EventKind::Complete]
        );
        assert_eq!(events[1].content, "<p>hi</p>");
        assert_eq!(events[2].content, "HTML rendered successfully");
        assert!(engine.active().is_empty());
    }

    #[tokio::test]
    async fn validation_failures_emit_a_single_error() {
        let engine = engine();
        let handle = engine.submit(Submission {
            language: LanguageTag::Python,
            code: String::from("   "),
            stdin: None,
            files: Vec::new(),
            install_packages: Vec::new(),
        });

        let events = collect(handle).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
        assert_eq!(events[0].content, "Code cannot be empty");
        assert!(engine.active().is_empty());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_unknown_ids() {
        let engine = engine();

        assert!(!engine.cancel("exec_000000000000").await);
        assert!(!engine.cancel("exec_000000000000").await);
    }

    #[tokio::test]
    async fn line_reader_reassembles_lines_across_chunks() {
        let chunks: Vec<sandrun_docker::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"Hel")),
            Ok(Bytes::from_static(b"lo\nwor")),
            Ok(Bytes::from_static(b"ld\ntail")),
        ];

        let mut lines = spawn_line_reader(futures::stream::iter(chunks));
        let mut collected = Vec::new();

        while let Some(line) = lines.recv().await {
            collected.push(line);
        }

        assert_eq!(collected, ["Hello\n", "world\n", "tail"]);
    }
}
