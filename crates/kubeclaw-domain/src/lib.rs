#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub type DateTimeUtc = OffsetDateTime;

/// The only binary the gate lets through.
pub const TARGET_BINARY: &str = "kubectl";

/// Exit code carried by a [`ToolResult`] whose command hit its deadline.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code carried by a [`ToolResult`] whose binary could not be spawned.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Literal stand-in for a tool call that produced neither stdout nor stderr.
pub const NO_OUTPUT_MARKER: &str = "no output";

/// One inspection request as an argv list. The first token names the
/// target-control binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct Command(Vec<String>);

impl Command {
    #[must_use]
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        Self(tokens)
    }

    /// Build a `kubectl <args...>` command.
    pub fn kubectl<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tokens = vec![TARGET_BINARY.to_string()];
        tokens.extend(args.into_iter().map(Into::into));
        Self(tokens)
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn binary(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Everything after the binary.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Outcome of exactly one command execution, live or replayed.
///
/// This is also the on-disk snapshot payload: `{stdout, stderr, exit_code}`,
/// plus `timed_out` when the executor gave up on the command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ToolResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl ToolResult {
    #[must_use]
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            timed_out: false,
        }
    }

    #[must_use]
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::new(
                String::new(),
                format!("command timed out after {}s", timeout.as_secs()),
                TIMEOUT_EXIT_CODE,
            )
        }
    }

    /// Rewrite both streams, keeping the exit code and timeout flag.
    #[must_use]
    pub fn map_streams<F>(self, f: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        Self {
            stdout: f(&self.stdout),
            stderr: f(&self.stderr),
            ..self
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }

    /// Trimmed stdout, falling back to trimmed stderr, falling back to the
    /// [`NO_OUTPUT_MARKER`].
    #[must_use]
    pub fn body(&self) -> &str {
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout;
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr;
        }
        NO_OUTPUT_MARKER
    }
}

/// Executes one command against the target and reports what happened.
///
/// Implementations never fail for a failing remote command: a non-zero exit,
/// a timeout or a spawn failure are all encoded in the returned [`ToolResult`].
pub trait ToolExecutor {
    fn run(&self, command: &Command, timeout: Duration) -> ToolResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SafetyDecision {
    pub allowed: bool,
    pub reason: String,
}

impl SafetyDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: "allowed".to_string(),
        }
    }

    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Crashloop,
    Imagepull,
    Pending,
    ServiceUnreachable,
    Oom,
    Generic,
}

impl IncidentType {
    /// Signal categories in tie-break priority order. `Generic` is never a
    /// signal category.
    pub const SIGNALS: [Self; 5] = [
        Self::Crashloop,
        Self::Imagepull,
        Self::Pending,
        Self::ServiceUnreachable,
        Self::Oom,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crashloop => "crashloop",
            Self::Imagepull => "imagepull",
            Self::Pending => "pending",
            Self::ServiceUnreachable => "service_unreachable",
            Self::Oom => "oom",
            Self::Generic => "generic",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "crashloop" => Some(Self::Crashloop),
            "imagepull" => Some(Self::Imagepull),
            "pending" => Some(Self::Pending),
            "service_unreachable" => Some(Self::ServiceUnreachable),
            "oom" => Some(Self::Oom),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(source, exit_code, text)` tuple handed to the fact engine.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RawResult {
    pub source: String,
    pub exit_code: i32,
    pub text: String,
}

impl RawResult {
    #[must_use]
    pub fn new(source: impl Into<String>, exit_code: i32, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            exit_code,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct GoldenFact {
    pub source: String,
    pub text: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<DateTimeUtc>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FactBundle {
    pub facts: Vec<GoldenFact>,
    pub excluded_stale_count: usize,
    pub tool_failures: usize,
    pub classification: IncidentType,
    pub insufficient_evidence: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    Live,
    Record,
    Replay,
}

impl ReplayMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Record => "record",
            Self::Replay => "replay",
        }
    }
}

/// A single allowlisted tool invocation as planned and as recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// A planned step the policy gate refused to run.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StepRejection {
    pub tool: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedCall {
    pub index: usize,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    pub snapshot: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_sha256: Option<String>,
}

/// A planned step the policy gate refused while recording. `after_calls`
/// is the number of calls recorded before it; `halted` marks the rejection
/// that ended the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedRejection {
    pub after_calls: usize,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    pub reason: String,
    #[serde(default)]
    pub halted: bool,
    pub timestamp: String,
}

/// Session manifest persisted as `metadata.json` next to the snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplaySession {
    pub session_id: String,
    pub mode: ReplayMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub calls: Vec<RecordedCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<RecordedRejection>,
}

#[must_use]
pub fn now_utc() -> DateTimeUtc {
    OffsetDateTime::now_utc()
}

/// Format an instant as RFC 3339 in UTC.
///
/// # Errors
/// Returns an error if the instant cannot be represented.
pub fn format_rfc3339(value: DateTimeUtc) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|err| anyhow!("failed to format RFC3339 timestamp: {err}"))
}

/// Parse an RFC 3339 instant and normalize it to UTC.
///
/// # Errors
/// Returns an error when the input is not valid RFC 3339.
pub fn parse_rfc3339_utc(input: &str) -> Result<DateTimeUtc> {
    OffsetDateTime::parse(input, &Rfc3339)
        .map(|value| value.to_offset(UtcOffset::UTC))
        .map_err(|err| anyhow!("invalid RFC3339 timestamp '{input}': {err}"))
}

/// `YYYYMMDDTHHMMSSZ`, used in session ids and report file names.
///
/// # Errors
/// Returns an error if the instant cannot be formatted.
pub fn compact_stamp(value: DateTimeUtc) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]Z"
        ))
        .map_err(|err| anyhow!("failed to format timestamp: {err}"))
}

/// `YYYYMMDDTHHMMSSffffffZ`, used in snapshot file names.
///
/// # Errors
/// Returns an error if the instant cannot be formatted.
pub fn compact_stamp_micros(value: DateTimeUtc) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year][month][day]T[hour][minute][second][subsecond digits:6]Z"
        ))
        .map_err(|err| anyhow!("failed to format timestamp: {err}"))
}

#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
