use std::path::PathBuf;
use std::time::Duration;

use seamloop_comfyui::poll::PollPolicy;
use seamloop_comfyui::server::{ReadinessConfig, ServerLaunch};

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults matching the stock container layout
/// (`/workspace/ComfyUI`, `/workspace/workflow_api.json`).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address for the job endpoint (default: `0.0.0.0`).
    pub host: String,
    /// Bind port for the job endpoint (default: `8000`).
    pub port: u16,
    /// ComfyUI installation directory.
    pub comfyui_path: PathBuf,
    /// Port ComfyUI listens on.
    pub comfyui_port: u16,
    /// Python interpreter used to launch ComfyUI.
    pub comfyui_python: String,
    /// Whether this process launches ComfyUI itself.
    pub comfyui_managed: bool,
    /// Base URL of the ComfyUI HTTP API.
    pub comfyui_url: String,
    /// Workflow template, re-read for every job.
    pub workflow_path: PathBuf,
    /// Optional role-binding overrides for the template.
    pub bindings_path: Option<PathBuf>,
    /// Directory ComfyUI loads input images from.
    pub input_dir: PathBuf,
    /// Root of ComfyUI's output tree.
    pub output_dir: PathBuf,
    /// Seconds to wait for ComfyUI to answer its readiness probe.
    pub ready_timeout_secs: u64,
    /// Seconds to wait for a queued prompt to complete.
    pub poll_timeout_secs: u64,
}

/// Errors from parsing configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                          |
    /// |----------------------|----------------------------------|
    /// | `HOST`               | `0.0.0.0`                        |
    /// | `PORT`               | `8000`                           |
    /// | `COMFYUI_PATH`       | `/workspace/ComfyUI`             |
    /// | `COMFYUI_PORT`       | `8188`                           |
    /// | `COMFYUI_PYTHON`     | `python3`                        |
    /// | `COMFYUI_MANAGED`    | `true`                           |
    /// | `COMFYUI_URL`        | `http://127.0.0.1:<COMFYUI_PORT>`|
    /// | `WORKFLOW_PATH`      | `/workspace/workflow_api.json`   |
    /// | `BINDINGS_PATH`      | unset                            |
    /// | `INPUT_DIR`          | `<COMFYUI_PATH>/input`           |
    /// | `OUTPUT_DIR`         | `<COMFYUI_PATH>/output`          |
    /// | `READY_TIMEOUT_SECS` | `120`                            |
    /// | `POLL_TIMEOUT_SECS`  | `600`                            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "PORT", 8000u16, "a valid u16")?;

        let comfyui_path: PathBuf = lookup("COMFYUI_PATH")
            .unwrap_or_else(|| "/workspace/ComfyUI".into())
            .into();
        let comfyui_port = parse_or(&lookup, "COMFYUI_PORT", 8188u16, "a valid u16")?;
        let comfyui_python = lookup("COMFYUI_PYTHON").unwrap_or_else(|| "python3".into());
        let comfyui_managed = parse_bool(&lookup, "COMFYUI_MANAGED", true)?;
        let comfyui_url = lookup("COMFYUI_URL")
            .unwrap_or_else(|| format!("http://127.0.0.1:{comfyui_port}"));

        let workflow_path = lookup("WORKFLOW_PATH")
            .unwrap_or_else(|| "/workspace/workflow_api.json".into())
            .into();
        let bindings_path = lookup("BINDINGS_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let input_dir = lookup("INPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| comfyui_path.join("input"));
        let output_dir = lookup("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| comfyui_path.join("output"));

        let ready_timeout_secs = parse_or(&lookup, "READY_TIMEOUT_SECS", 120u64, "a valid u64")?;
        let poll_timeout_secs = parse_or(&lookup, "POLL_TIMEOUT_SECS", 600u64, "a valid u64")?;

        Ok(Self {
            host,
            port,
            comfyui_path,
            comfyui_port,
            comfyui_python,
            comfyui_managed,
            comfyui_url,
            workflow_path,
            bindings_path,
            input_dir,
            output_dir,
            ready_timeout_secs,
            poll_timeout_secs,
        })
    }

    pub fn server_launch(&self) -> ServerLaunch {
        ServerLaunch::comfyui(&self.comfyui_python, &self.comfyui_path, self.comfyui_port)
    }

    pub fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig {
            timeout: Duration::from_secs(self.ready_timeout_secs),
            ..Default::default()
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            timeout: Duration::from_secs(self.poll_timeout_secs),
            ..Default::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value,
        }),
    }
}

fn parse_bool<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                expected: "a boolean",
                value,
            }),
        },
    }
}
