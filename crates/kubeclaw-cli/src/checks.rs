use std::fs;
use std::io;
use std::path::Path;

use kubeclaw_domain::{Command, ReplayMode, ToolResult};
use kubeclaw_policy::{verify_namespace_allowed, verify_read_only, CallBudget, PolicyGate};
use kubeclaw_redaction::redact_text;
use kubeclaw_replay::{ReplayError, ReplayHarness};
use serde_json::json;
use tracing::warn;
use ulid::Ulid;

const SECRET_SAMPLE: &str =
    "kind: Secret\ndata:\n  token: abc\nstringData:\n  password: p4ss\n";
const SELF_CHECK_SESSION: &str = "selfcheck";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckOutcome {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn line(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        format!("[{status}] {}: {}", self.name, self.detail)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelfCheckOptions<'a> {
    pub namespace: &'a str,
    pub allow_system: bool,
    pub allow_unsafe_cluster: bool,
}

/// Local safety and plumbing checks, in a fixed order. Never fails as a
/// whole; each check reports its own outcome.
#[must_use]
pub fn run_self_check(gate: &PolicyGate<'_>, options: &SelfCheckOptions<'_>) -> Vec<CheckOutcome> {
    let mut checks = Vec::with_capacity(6);

    checks.push(match gate.verify_safe_context(options.allow_unsafe_cluster) {
        Ok(()) => CheckOutcome::pass("safe_context", "context and server are safe"),
        Err(err) => CheckOutcome::fail("safe_context", err.to_string()),
    });

    checks.push(
        match verify_namespace_allowed(options.namespace, options.allow_system) {
            Ok(()) => CheckOutcome::pass(
                "namespace_guard",
                format!("namespace '{}' allowed", options.namespace),
            ),
            Err(err) => CheckOutcome::fail("namespace_guard", err.to_string()),
        },
    );

    checks.push(
        match verify_read_only(&Command::kubectl(["delete", "pod", "x", "-n", "demo"])) {
            Ok(()) => CheckOutcome::fail("write_verb_block", "delete unexpectedly allowed"),
            Err(_) => CheckOutcome::pass("write_verb_block", "mutating verb blocked"),
        },
    );

    let redacted = redact_text(SECRET_SAMPLE);
    checks.push(if redacted.contains("abc") || redacted.contains("p4ss") {
        CheckOutcome::fail("redaction", "secret values still present")
    } else {
        CheckOutcome::pass("redaction", "secret values removed")
    });

    checks.push(match record_replay_round_trip() {
        Ok(true) => CheckOutcome::pass("record_replay", "record/replay round trip works"),
        Ok(false) => CheckOutcome::fail("record_replay", "unexpected replay result"),
        Err(err) => CheckOutcome::fail("record_replay", err.to_string()),
    });

    checks.push(call_budget_check());

    gate.budget().reset();
    checks
}

fn record_replay_round_trip() -> Result<bool, ReplayError> {
    let root = std::env::temp_dir().join(format!("kubeclaw-selfcheck-{}", Ulid::new()));
    let outcome = round_trip_in(&root);
    if let Err(err) = remove_scratch(&root) {
        warn!(path = %root.display(), error = %err, "failed to remove self-check scratch directory");
    }
    outcome
}

/// Remove a scratch directory; one that is already gone is fine.
fn remove_scratch(root: &Path) -> io::Result<()> {
    match fs::remove_dir_all(root) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn round_trip_in(root: &Path) -> Result<bool, ReplayError> {
    let args = json!({"ns": "demo"});
    let mut recorder =
        ReplayHarness::new(root, ReplayMode::Record, Some(SELF_CHECK_SESSION.to_string()))?;
    recorder.execute("events_tail", &args, || {
        Ok::<_, ReplayError>(ToolResult::new("ok", "", 0))
    })?;
    let mut replayer =
        ReplayHarness::new(root, ReplayMode::Replay, Some(SELF_CHECK_SESSION.to_string()))?;
    let out = replayer.execute("events_tail", &args, || {
        Ok::<_, ReplayError>(ToolResult::new("wrong", "", 1))
    })?;
    Ok(out.stdout == "ok" && out.exit_code == 0)
}

fn call_budget_check() -> CheckOutcome {
    let budget = CallBudget::new();
    let first = budget.try_register(1);
    let second = budget.try_register(1);
    match (first, second) {
        (Ok(1), Err(_)) if budget.used() == 1 => {
            CheckOutcome::pass("call_budget", "call budget enforced")
        }
        _ => CheckOutcome::fail("call_budget", "call budget allowed an extra call"),
    }
}
