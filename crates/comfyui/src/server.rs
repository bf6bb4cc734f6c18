//! Readiness gate for the ComfyUI server.
//!
//! [`ServerGate`] owns the one ComfyUI instance an adapter process talks
//! to. The first call to [`ServerGate::ensure_ready`] launches the
//! server (when managed) and waits for `/system_stats` to answer; every
//! later call returns immediately. Concurrent first calls share a single
//! startup. A failed startup leaves the gate in
//! [`GateState::NotStarted`], so the next job tries again.
//!
//! A server that crashes after becoming ready is not detected here;
//! subsequent API calls fail and surface as job errors.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::api::ComfyUIApi;

/// Tracing target for lines forwarded from the ComfyUI process.
const SERVER_LOG_TARGET: &str = "comfyui";

/// How to launch a local ComfyUI process.
#[derive(Debug, Clone)]
pub struct ServerLaunch {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl ServerLaunch {
    /// `python main.py --listen 127.0.0.1 --port <port>` inside `comfyui_path`.
    pub fn comfyui(python: &str, comfyui_path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            program: python.to_string(),
            args: vec![
                "main.py".to_string(),
                "--listen".to_string(),
                "127.0.0.1".to_string(),
                "--port".to_string(),
                port.to_string(),
            ],
            working_dir: comfyui_path.into(),
        }
    }

    fn spawn(&self) -> Result<Child, ServerError> {
        tracing::info!(
            program = %self.program,
            args = ?self.args,
            working_dir = %self.working_dir.display(),
            "Starting ComfyUI server",
        );

        // `kill_on_drop(true)` ties the server's lifetime to the gate.
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        Ok(child)
    }
}

/// Bounds on the readiness wait.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Total time allowed for the server to start answering.
    pub timeout: Duration,
    /// Delay between probes.
    pub interval: Duration,
    /// Per-probe HTTP timeout.
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Observable lifecycle of a [`ServerGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NotStarted,
    Ready,
}

/// A server that has passed the readiness probe.
struct RunningServer {
    /// `None` for externally managed servers.
    child: Option<Mutex<Child>>,
}

/// Lazily started, process-wide handle on the ComfyUI server.
pub struct ServerGate {
    api: ComfyUIApi,
    launch: Option<ServerLaunch>,
    readiness: ReadinessConfig,
    running: OnceCell<RunningServer>,
}

impl ServerGate {
    /// A gate that launches ComfyUI itself on first use.
    pub fn managed(api: ComfyUIApi, launch: ServerLaunch, readiness: ReadinessConfig) -> Self {
        Self {
            api,
            launch: Some(launch),
            readiness,
            running: OnceCell::new(),
        }
    }

    /// A gate for a server started elsewhere; it only waits for the probe.
    pub fn external(api: ComfyUIApi, readiness: ReadinessConfig) -> Self {
        Self {
            api,
            launch: None,
            readiness,
            running: OnceCell::new(),
        }
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn state(&self) -> GateState {
        if self.running.initialized() {
            GateState::Ready
        } else {
            GateState::NotStarted
        }
    }

    /// Make sure the server is up, starting it on the first call.
    pub async fn ensure_ready(&self) -> Result<(), ServerError> {
        self.running.get_or_try_init(|| self.start()).await?;
        Ok(())
    }

    /// Kill a managed server process, if one is running.
    pub fn shutdown(&self) {
        let Some(child) = self.running.get().and_then(|r| r.child.as_ref()) else {
            return;
        };
        if let Ok(mut child) = child.lock() {
            tracing::info!(pid = ?child.id(), "Stopping ComfyUI server");
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "Failed to signal ComfyUI server");
            }
        }
    }

    // ---- private helpers ----

    async fn start(&self) -> Result<RunningServer, ServerError> {
        let mut child = match &self.launch {
            Some(launch) => Some(launch.spawn()?),
            None => None,
        };

        // On error `child` is dropped here, which kills the process.
        self.wait_ready(&mut child).await?;

        Ok(RunningServer {
            child: child.map(Mutex::new),
        })
    }

    async fn wait_ready(&self, child: &mut Option<Child>) -> Result<(), ServerError> {
        let started = Instant::now();
        let deadline = started + self.readiness.timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if let Some(child) = child.as_mut() {
                if let Some(status) = child.try_wait().map_err(ServerError::Wait)? {
                    return Err(ServerError::Exited {
                        status: status.to_string(),
                    });
                }
            }

            match self.api.system_stats(self.readiness.probe_timeout).await {
                Ok(()) => {
                    tracing::info!(
                        api_url = %self.api.api_url(),
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "ComfyUI server is ready",
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "ComfyUI not ready yet");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ServerError::ReadinessTimeout {
                    timeout_secs: self.readiness.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.readiness.interval.min(deadline - now)).await;
        }
    }
}

/// Forward each line of a child output stream to tracing.
async fn forward_output<R: AsyncRead + Unpin>(stream: R, stream_name: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: SERVER_LOG_TARGET, stream = stream_name, "{line}");
    }
}

/// Errors from starting or waiting on the ComfyUI server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The process could not be spawned.
    #[error("Failed to start ComfyUI ({program}): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Querying the child's exit status failed.
    #[error("Failed to check ComfyUI process status: {0}")]
    Wait(#[source] std::io::Error),

    /// The process exited before it became ready.
    #[error("ComfyUI server exited before becoming ready ({status})")]
    Exited { status: String },

    /// The readiness probe never succeeded within the bound.
    #[error("ComfyUI server failed to start within {timeout_secs} seconds")]
    ReadinessTimeout { timeout_secs: u64 },
}
