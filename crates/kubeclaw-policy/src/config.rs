use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 10;
pub const DEFAULT_KUBE_CONTEXT: &str = "kind-kubeclaw";
pub const DEFAULT_KUBE_NAMESPACE: &str = "demo";
pub const DEFAULT_DENY_NAMESPACES: &str = "kube-system,kube-public,kube-node-lease";
pub const DEFAULT_REPORTS_DIR: &str = "reports";
pub const DEFAULT_SNAPSHOTS_DIR: &str = "snapshots";

pub const ENV_CMD_TIMEOUT_SECONDS: &str = "KUBECLAW_CMD_TIMEOUT_SECONDS";
pub const ENV_MAX_TOOL_CALLS: &str = "KUBECLAW_MAX_TOOL_CALLS";
pub const ENV_ALLOW_UNSAFE_CLUSTER: &str = "KUBECLAW_ALLOW_UNSAFE_CLUSTER";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be an integer, got '{raw}'")]
    InvalidInteger { name: String, raw: String },
    #[error("{name} must be >= {minimum}, got {value}")]
    BelowMinimum {
        name: String,
        minimum: i64,
        value: i64,
    },
}

/// Global safety knobs.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SafetyConfig {
    pub command_timeout_seconds: u64,
    pub max_tool_calls_per_run: u32,
    pub allow_unsafe_cluster: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            command_timeout_seconds: DEFAULT_COMMAND_TIMEOUT_SECONDS,
            max_tool_calls_per_run: DEFAULT_MAX_TOOL_CALLS,
            allow_unsafe_cluster: false,
        }
    }
}

impl SafetyConfig {
    /// Build the config from a variable lookup.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when an integer knob is malformed or below 1.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout = read_int(&lookup, ENV_CMD_TIMEOUT_SECONDS, 10, 1)?;
        let max_calls = read_int(&lookup, ENV_MAX_TOOL_CALLS, 10, 1)?;
        Ok(Self {
            command_timeout_seconds: u64::try_from(timeout).unwrap_or(u64::MAX),
            max_tool_calls_per_run: u32::try_from(max_calls).unwrap_or(u32::MAX),
            allow_unsafe_cluster: read_bool(&lookup, ENV_ALLOW_UNSAFE_CLUSTER, false),
        })
    }

    /// # Errors
    /// Returns [`ConfigError`] when an integer knob is malformed or below 1.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

/// Where the gate gets its knobs from. Implementations may re-read on every
/// call, so a changed environment takes effect at the next check.
#[allow(clippy::missing_errors_doc)]
pub trait SafetyConfigSource {
    fn load(&self) -> Result<SafetyConfig, ConfigError>;
}

/// Reads the process environment on every [`SafetyConfigSource::load`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSafetyConfig;

impl SafetyConfigSource for EnvSafetyConfig {
    fn load(&self) -> Result<SafetyConfig, ConfigError> {
        SafetyConfig::from_env()
    }
}

impl SafetyConfigSource for SafetyConfig {
    fn load(&self) -> Result<SafetyConfig, ConfigError> {
        Ok(*self)
    }
}

/// Run-level settings for the triage agent.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AgentConfig {
    pub kube_context: String,
    pub kube_namespace: String,
    pub allow_write_actions: bool,
    pub deny_namespaces: Vec<String>,
    pub reports_dir: PathBuf,
    pub snapshots_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AgentConfig {
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let deny_raw = lookup("DENY_NAMESPACES").unwrap_or_else(|| DEFAULT_DENY_NAMESPACES.into());
        Self {
            kube_context: text("KUBE_CONTEXT", DEFAULT_KUBE_CONTEXT),
            kube_namespace: text("KUBE_NAMESPACE", DEFAULT_KUBE_NAMESPACE),
            allow_write_actions: read_bool(&lookup, "ALLOW_WRITE_ACTIONS", false),
            deny_namespaces: deny_raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            reports_dir: PathBuf::from(text("REPORTS_DIR", DEFAULT_REPORTS_DIR)),
            snapshots_dir: PathBuf::from(text("SNAPSHOTS_DIR", DEFAULT_SNAPSHOTS_DIR)),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

fn read_int<F>(lookup: &F, name: &str, default: i64, minimum: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    let raw = raw.trim();
    let value = raw
        .parse::<i64>()
        .map_err(|_| ConfigError::InvalidInteger {
            name: name.to_string(),
            raw: raw.to_string(),
        })?;
    if value < minimum {
        return Err(ConfigError::BelowMinimum {
            name: name.to_string(),
            minimum,
            value,
        });
    }
    Ok(value)
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => parse_flag(&raw),
        _ => default,
    }
}

/// `1`, `true`, `yes` and `on` (any case) are truthy.
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
