#![forbid(unsafe_code)]

//! The closed set of read-only inspection tools and the runner that pushes
//! each call through the policy gate.

use kubeclaw_domain::{Command, ToolResult};
use kubeclaw_policy::{verify_namespace_allowed, verify_read_only, PolicyGate, SafetyViolation};
use kubeclaw_redaction::redact_text;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub mod inspect;
pub mod process;
pub mod scripted;

pub use inspect::DirectInspector;
pub use process::KubectlExecutor;
pub use scripted::ScriptedExecutor;

pub const DEFAULT_EVENTS_LIMIT: i64 = 30;
pub const DEFAULT_LOG_TAIL: i64 = 200;
pub const METRICS_UNAVAILABLE_NOTICE: &str =
    "metrics-server is unavailable; skipping pod top output.";

/// `get_yaml` short kinds and the resource each one reads.
pub const GET_YAML_KINDS: [(&str, &str); 5] = [
    ("cm", "configmap"),
    ("deploy", "deployment"),
    ("ep", "endpoints"),
    ("pod", "pod"),
    ("svc", "service"),
];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ToolError {
    #[error("tool '{name}' is not allowlisted. allowed: {allowed}")]
    NotAllowlisted { name: String, allowed: String },
    #[error("invalid arguments for tool '{tool}': {detail}")]
    InvalidArguments { tool: String, detail: String },
    #[error("unsupported kind '{kind}'. allowed: {allowed}")]
    UnsupportedKind { kind: String, allowed: String },
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ToolName {
    EventsTail,
    DescribePod,
    DescribeDeploy,
    Logs,
    GetYaml,
    TopPod,
}

impl ToolName {
    pub const ALL: [Self; 6] = [
        Self::EventsTail,
        Self::DescribePod,
        Self::DescribeDeploy,
        Self::Logs,
        Self::GetYaml,
        Self::TopPod,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EventsTail => "events_tail",
            Self::DescribePod => "describe_pod",
            Self::DescribeDeploy => "describe_deploy",
            Self::Logs => "logs",
            Self::GetYaml => "get_yaml",
            Self::TopPod => "top_pod",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == value)
    }

    /// Resolve a tool name against the allowlist.
    ///
    /// # Errors
    /// Returns [`ToolError::NotAllowlisted`] for any name outside the registry.
    pub fn lookup(value: &str) -> Result<Self, ToolError> {
        Self::parse(value).ok_or_else(|| {
            let mut names: Vec<&str> = Self::ALL.iter().map(|tool| tool.as_str()).collect();
            names.sort_unstable();
            ToolError::NotAllowlisted {
                name: value.to_string(),
                allowed: names.join(", "),
            }
        })
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments accepted by the tools. Each tool reads the subset it needs.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolArgs {
    pub ns: String,
    pub pod: Option<String>,
    pub deploy: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub container: Option<String>,
    #[serde(default)]
    pub previous: bool,
    pub tail: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub allow_system: bool,
    #[serde(default)]
    pub allow_unsafe_cluster: bool,
}

impl ToolArgs {
    /// # Errors
    /// Returns [`ToolError::InvalidArguments`] when `value` does not fit the tool.
    pub fn from_value(tool: ToolName, value: &Value) -> Result<Self, ToolError> {
        Self::deserialize(value).map_err(|err| ToolError::InvalidArguments {
            tool: tool.as_str().to_string(),
            detail: err.to_string(),
        })
    }
}

/// Build the `kubectl` argv for one tool call.
///
/// # Errors
/// Returns [`ToolError`] when a required argument is missing or a `get_yaml`
/// kind is not supported.
pub fn build_command(tool: ToolName, args: &ToolArgs) -> Result<Command, ToolError> {
    let ns = args.ns.as_str();
    let command = match tool {
        ToolName::EventsTail => Command::kubectl([
            "get",
            "events",
            "-n",
            ns,
            "--sort-by=.metadata.creationTimestamp",
            "--field-selector=type!=Normal",
        ]),
        ToolName::DescribePod => {
            Command::kubectl(["describe", "pod", required(tool, "pod", &args.pod)?, "-n", ns])
        }
        ToolName::DescribeDeploy => Command::kubectl([
            "describe",
            "deployment",
            required(tool, "deploy", &args.deploy)?,
            "-n",
            ns,
        ]),
        ToolName::Logs => {
            let tail = format!("--tail={}", args.tail.unwrap_or(DEFAULT_LOG_TAIL).max(1));
            let mut tokens = vec![
                "logs".to_string(),
                required(tool, "pod", &args.pod)?.to_string(),
                "-n".to_string(),
                ns.to_string(),
                tail,
            ];
            if let Some(container) = args.container.as_deref().filter(|c| !c.is_empty()) {
                tokens.push("-c".to_string());
                tokens.push(container.to_string());
            }
            if args.previous {
                tokens.push("--previous".to_string());
            }
            Command::kubectl(tokens)
        }
        ToolName::GetYaml => {
            let kind = required(tool, "kind", &args.kind)?;
            let resource = resolve_kind(kind)?;
            let name = required(tool, "name", &args.name)?;
            Command::kubectl(["get", resource, name, "-n", ns, "-o", "yaml"])
        }
        ToolName::TopPod => Command::kubectl(["top", "pod", "-n", ns]),
    };
    Ok(command)
}

fn required<'a>(
    tool: ToolName,
    field: &str,
    value: &'a Option<String>,
) -> Result<&'a str, ToolError> {
    value
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.as_str().to_string(),
            detail: format!("missing required argument '{field}'"),
        })
}

/// Map a `get_yaml` short kind to its resource name.
///
/// # Errors
/// Returns [`ToolError::UnsupportedKind`] for kinds outside [`GET_YAML_KINDS`].
pub fn resolve_kind(kind: &str) -> Result<&'static str, ToolError> {
    GET_YAML_KINDS
        .iter()
        .find(|(short, _)| *short == kind)
        .map(|(_, resource)| *resource)
        .ok_or_else(|| ToolError::UnsupportedKind {
            kind: kind.to_string(),
            allowed: GET_YAML_KINDS
                .iter()
                .map(|(short, _)| *short)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Runs allowlisted tool calls through the full gate sequence.
pub struct SafeToolRunner<'a> {
    gate: &'a PolicyGate<'a>,
}

impl<'a> SafeToolRunner<'a> {
    #[must_use]
    pub fn new(gate: &'a PolicyGate<'a>) -> Self {
        Self { gate }
    }

    /// Start a fresh run: the call budget goes back to zero.
    pub fn reset(&self) {
        self.gate.budget().reset();
    }

    /// Execute one tool call: budget, context, namespace and verb checks,
    /// then a bounded `kubectl` run with redacted output.
    ///
    /// # Errors
    /// Returns [`ToolError`] when the call is not allowlisted, malformed, or
    /// rejected by the policy gate. A failing `kubectl` is not an error.
    pub fn run_call(&self, name: &str, args: &Value) -> Result<ToolResult, ToolError> {
        let tool = ToolName::lookup(name)?;
        let args = ToolArgs::from_value(tool, args)?;
        let command = build_command(tool, &args)?;

        // Fallible setup comes first so a broken config never spends budget.
        let timeout = self.gate.safety_config()?.command_timeout();
        self.gate.register_call()?;
        self.gate.verify_safe_context(args.allow_unsafe_cluster)?;
        verify_namespace_allowed(&args.ns, args.allow_system)?;
        verify_read_only(&command)?;

        debug!(tool = %tool, command = %command, "running tool");
        let redacted = self.gate.executor().run(&command, timeout).map_streams(redact_text);
        Ok(post_process(tool, &args, redacted))
    }
}

fn post_process(tool: ToolName, args: &ToolArgs, result: ToolResult) -> ToolResult {
    match tool {
        ToolName::EventsTail => tail_events(result, args.limit.unwrap_or(DEFAULT_EVENTS_LIMIT)),
        ToolName::TopPod => explain_missing_metrics(result),
        _ => result,
    }
}

/// Keep the table header plus the newest `limit` rows.
fn tail_events(result: ToolResult, limit: i64) -> ToolResult {
    if !result.is_success() || result.stdout.trim().is_empty() {
        return result;
    }
    let trimmed = {
        let lines: Vec<&str> = result.stdout.lines().collect();
        match lines.split_first() {
            Some((header, body)) if !body.is_empty() => {
                let keep = usize::try_from(limit.max(1)).unwrap_or(usize::MAX);
                let start = body.len().saturating_sub(keep);
                let mut kept = vec![*header];
                kept.extend_from_slice(&body[start..]);
                Some(kept.join("\n"))
            }
            _ => None,
        }
    };
    match trimmed {
        Some(stdout) => ToolResult::new(stdout, result.stderr, result.exit_code),
        None => result,
    }
}

fn explain_missing_metrics(result: ToolResult) -> ToolResult {
    let combined = format!("{}\n{}", result.stdout, result.stderr).to_lowercase();
    if combined.contains("metrics api not available") {
        return ToolResult::new(METRICS_UNAVAILABLE_NOTICE, result.stderr, 0);
    }
    result
}
