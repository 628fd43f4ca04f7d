use kubeclaw_domain::Command;
use kubeclaw_policy::{AgentConfig, AssessOptions, PolicyGate};
use kubeclaw_redaction::redact_text;

use crate::DEFAULT_LOG_TAIL;

/// Single-command wrappers for ad hoc inspection outside a triage plan.
///
/// Every command goes through [`PolicyGate::assess`]; a rejection is reported
/// as `blocked: <reason>` text rather than an error.
pub struct DirectInspector<'a> {
    gate: &'a PolicyGate<'a>,
    allow_write_actions: bool,
    deny_namespaces: Vec<String>,
}

impl<'a> DirectInspector<'a> {
    #[must_use]
    pub fn new(gate: &'a PolicyGate<'a>, config: &AgentConfig) -> Self {
        Self {
            gate,
            allow_write_actions: config.allow_write_actions,
            deny_namespaces: config.deny_namespaces.clone(),
        }
    }

    #[must_use]
    pub fn describe(&self, resource: &str, name: &str, namespace: &str) -> String {
        self.run(
            &Command::kubectl(["describe", resource, name, "-n", namespace]),
            namespace,
        )
    }

    #[must_use]
    pub fn logs(&self, pod: &str, namespace: &str, container: Option<&str>) -> String {
        let mut args = vec![
            "logs".to_string(),
            pod.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            format!("--tail={DEFAULT_LOG_TAIL}"),
        ];
        if let Some(container) = container.filter(|c| !c.is_empty()) {
            args.push("-c".to_string());
            args.push(container.to_string());
        }
        self.run(&Command::kubectl(args), namespace)
    }

    #[must_use]
    pub fn top(&self, namespace: &str) -> String {
        self.run(&Command::kubectl(["top", "pod", "-n", namespace]), namespace)
    }

    fn run(&self, command: &Command, namespace: &str) -> String {
        let options = AssessOptions {
            allow_write_actions: self.allow_write_actions,
            deny_namespaces: self.deny_namespaces.clone(),
            default_namespace: namespace.to_string(),
        };
        let decision = self.gate.assess(command, &options);
        if !decision.allowed {
            return format!("blocked: {}", decision.reason);
        }
        let timeout = match self.gate.safety_config() {
            Ok(config) => config.command_timeout(),
            Err(err) => return format!("blocked: {err}"),
        };
        let result = self.gate.executor().run(command, timeout);
        if result.is_timeout() {
            return "blocked: kubectl command timed out".to_string();
        }
        let output = if result.stdout.is_empty() {
            &result.stderr
        } else {
            &result.stdout
        };
        redact_text(output)
    }
}
