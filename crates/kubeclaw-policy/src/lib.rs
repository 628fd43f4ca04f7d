#![forbid(unsafe_code)]

//! The policy gate every outbound `kubectl` command passes before it runs.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use kubeclaw_domain::{Command, SafetyDecision, ToolExecutor, TARGET_BINARY};
use tracing::{debug, warn};

pub mod config;

pub use config::{
    AgentConfig, ConfigError, EnvSafetyConfig, SafetyConfig, SafetyConfigSource,
};

pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Verbs rejected as the first positional token in read-only mode.
pub const DISALLOWED_VERBS: [&str; 13] = [
    "apply",
    "patch",
    "delete",
    "edit",
    "exec",
    "port-forward",
    "scale",
    "drain",
    "cordon",
    "uncordon",
    "taint",
    "label",
    "annotate",
];

/// Any of these tokens anywhere in a command makes it write-shaped.
pub const WRITE_KEYWORDS: [&str; 8] = [
    "apply", "create", "delete", "edit", "patch", "replace", "scale", "rollout",
];

/// Global flags whose next token is a value, not a verb.
const VALUE_FLAGS: [&str; 11] = [
    "-n",
    "--namespace",
    "--context",
    "--cluster",
    "--kubeconfig",
    "--user",
    "-s",
    "--server",
    "--as",
    "--token",
    "--request-timeout",
];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SafetyViolation {
    #[error("command is empty")]
    EmptyCommand,
    #[error("only kubectl commands are allowed")]
    NotKubectl,
    #[error("kubectl command is missing a verb")]
    MissingVerb,
    #[error("disallowed kubectl verb in read-only mode: '{0}'")]
    DisallowedVerb(String),
    #[error("disallowed kubectl operation in read-only mode: 'rollout restart'")]
    RolloutRestart,
    #[error("namespace is required")]
    NamespaceRequired,
    #[error("namespace 'kube-system' is blocked unless allow_system=True")]
    SystemNamespaceBlocked,
    #[error("namespace '{0}' is denied by policy")]
    NamespaceDenied(String),
    #[error("write actions are disabled")]
    WriteActionsDisabled,
    #[error("tool call limit exceeded: max {0} calls per run")]
    CallLimitExceeded(u32),
    #[error("kubectl config check timed out; refusing to run commands")]
    ConfigCheckTimedOut,
    #[error("failed to read kube config: {0}")]
    ConfigReadFailed(String),
    #[error("kubectl config returned empty output")]
    ConfigEmpty,
    #[error("unsafe cluster context '{current}'; expected '{expected}'")]
    UnsafeContext { current: String, expected: String },
    #[error(
        "unsafe cluster server URL '{0}'. Expected a local/kind endpoint. Set --allow-unsafe-cluster (dev only) to override."
    )]
    UnsafeServer(String),
    #[error("invalid safety configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Per-run tool call counter. Check-and-increment is a single atomic step,
/// and the count never goes down until [`CallBudget::reset`].
#[derive(Debug, Default)]
pub struct CallBudget {
    used: AtomicU32,
}

impl CallBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }

    #[must_use]
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_capacity(&self, max_calls: u32) -> bool {
        self.used() < max_calls
    }

    /// Take one slot if fewer than `max_calls` are in use.
    ///
    /// # Errors
    /// Returns [`SafetyViolation::CallLimitExceeded`] once the budget is spent.
    pub fn try_register(&self, max_calls: u32) -> Result<u32, SafetyViolation> {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < max_calls).then_some(used + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| SafetyViolation::CallLimitExceeded(max_calls))
    }
}

/// Inputs for [`PolicyGate::assess`].
#[derive(Debug, Clone, Default)]
pub struct AssessOptions {
    pub allow_write_actions: bool,
    pub deny_namespaces: Vec<String>,
    pub default_namespace: String,
}

pub struct PolicyGate<'a> {
    executor: &'a dyn ToolExecutor,
    config: &'a dyn SafetyConfigSource,
    budget: &'a CallBudget,
    expected_context: String,
}

impl<'a> PolicyGate<'a> {
    #[must_use]
    pub fn new(
        executor: &'a dyn ToolExecutor,
        config: &'a dyn SafetyConfigSource,
        budget: &'a CallBudget,
        expected_context: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            config,
            budget,
            expected_context: expected_context.into(),
        }
    }

    #[must_use]
    pub fn budget(&self) -> &CallBudget {
        self.budget
    }

    #[must_use]
    pub fn executor(&self) -> &dyn ToolExecutor {
        self.executor
    }

    /// Current safety knobs, read fresh from the source.
    ///
    /// # Errors
    /// Returns [`SafetyViolation::Config`] when the source is misconfigured.
    pub fn safety_config(&self) -> Result<SafetyConfig, SafetyViolation> {
        Ok(self.config.load()?)
    }

    /// Require the expected kube context and a local cluster endpoint.
    ///
    /// # Errors
    /// Returns a [`SafetyViolation`] describing the first failed check.
    pub fn verify_safe_context(&self, allow_unsafe_cluster: bool) -> Result<(), SafetyViolation> {
        let config = self.safety_config()?;
        let current = self.read_kube_config(&config, &["current-context"])?;
        if current != self.expected_context {
            return Err(SafetyViolation::UnsafeContext {
                current,
                expected: self.expected_context.clone(),
            });
        }

        let server = self.read_kube_config(
            &config,
            &[
                "view",
                "--minify",
                "-o",
                "jsonpath={.clusters[0].cluster.server}",
            ],
        )?;
        let override_enabled = allow_unsafe_cluster || config.allow_unsafe_cluster;
        if !server_is_local(&server) && !override_enabled {
            return Err(SafetyViolation::UnsafeServer(server));
        }
        Ok(())
    }

    /// Count one call against the per-run budget.
    ///
    /// # Errors
    /// Returns [`SafetyViolation::CallLimitExceeded`] once the budget is spent.
    pub fn register_call(&self) -> Result<(), SafetyViolation> {
        let config = self.safety_config()?;
        let used = self.budget.try_register(config.max_tool_calls_per_run)?;
        debug!(used, max = config.max_tool_calls_per_run, "tool call registered");
        Ok(())
    }

    /// Composite gate for ad hoc commands.
    ///
    /// A rejected command consumes no budget.
    #[must_use]
    pub fn assess(&self, command: &Command, options: &AssessOptions) -> SafetyDecision {
        match self.assess_inner(command, options) {
            Ok(()) => {
                debug!(command = %command, "command allowed");
                SafetyDecision::allow()
            }
            Err(violation) => {
                warn!(command = %command, reason = %violation, "command rejected");
                SafetyDecision::reject(violation.to_string())
            }
        }
    }

    fn assess_inner(&self, command: &Command, options: &AssessOptions) -> Result<(), SafetyViolation> {
        let config = self.safety_config()?;
        if !self.budget.has_capacity(config.max_tool_calls_per_run) {
            return Err(SafetyViolation::CallLimitExceeded(
                config.max_tool_calls_per_run,
            ));
        }
        self.verify_safe_context(false)?;
        verify_read_only(command)?;
        let namespace = namespace_from_command(command, &options.default_namespace);
        verify_namespace_allowed(&namespace, false)?;
        if options.deny_namespaces.iter().any(|denied| denied == &namespace) {
            return Err(SafetyViolation::NamespaceDenied(namespace));
        }
        if is_write_command(command) && !options.allow_write_actions {
            return Err(SafetyViolation::WriteActionsDisabled);
        }
        self.budget.try_register(config.max_tool_calls_per_run)?;
        Ok(())
    }

    fn read_kube_config(
        &self,
        config: &SafetyConfig,
        args: &[&str],
    ) -> Result<String, SafetyViolation> {
        let command = Command::kubectl(std::iter::once("config").chain(args.iter().copied()));
        let result = self.executor.run(&command, config.command_timeout());
        if result.is_timeout() {
            return Err(SafetyViolation::ConfigCheckTimedOut);
        }
        if !result.is_success() {
            let stderr = result.stderr.trim();
            let detail = if stderr.is_empty() {
                result.stdout.trim()
            } else {
                stderr
            };
            let detail = if detail.is_empty() {
                "unknown error"
            } else {
                detail
            };
            return Err(SafetyViolation::ConfigReadFailed(detail.to_string()));
        }
        let output = result.stdout.trim();
        if output.is_empty() {
            return Err(SafetyViolation::ConfigEmpty);
        }
        Ok(output.to_string())
    }
}

/// Block empty namespaces and `kube-system` unless explicitly allowed.
///
/// # Errors
/// Returns [`SafetyViolation`] for a blank or protected namespace.
pub fn verify_namespace_allowed(namespace: &str, allow_system: bool) -> Result<(), SafetyViolation> {
    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(SafetyViolation::NamespaceRequired);
    }
    if namespace == SYSTEM_NAMESPACE && !allow_system {
        return Err(SafetyViolation::SystemNamespaceBlocked);
    }
    Ok(())
}

/// Reject mutating or privileged `kubectl` forms.
///
/// The verb is resolved twice: once as the first non-flag token, and once
/// skipping the values of known value-taking global flags. Either resolution
/// naming a disallowed form rejects the command.
///
/// # Errors
/// Returns [`SafetyViolation`] describing the rejected form.
pub fn verify_read_only(command: &Command) -> Result<(), SafetyViolation> {
    let tokens = command.tokens();
    let Some(binary) = command.binary() else {
        return Err(SafetyViolation::EmptyCommand);
    };
    if binary != TARGET_BINARY {
        return Err(SafetyViolation::NotKubectl);
    }

    let naive = first_non_flag(tokens, 1).ok_or(SafetyViolation::MissingVerb)?;
    check_verb(tokens, naive, first_non_flag)?;

    let strict = first_positional(tokens, 1).ok_or(SafetyViolation::MissingVerb)?;
    check_verb(tokens, strict, first_positional)?;
    Ok(())
}

fn check_verb(
    tokens: &[String],
    (index, verb): (usize, &str),
    next: fn(&[String], usize) -> Option<(usize, &str)>,
) -> Result<(), SafetyViolation> {
    let verb = verb.to_ascii_lowercase();
    if DISALLOWED_VERBS.contains(&verb.as_str()) {
        return Err(SafetyViolation::DisallowedVerb(verb));
    }
    if verb == "rollout" {
        if let Some((_, sub)) = next(tokens, index + 1) {
            if sub.eq_ignore_ascii_case("restart") {
                return Err(SafetyViolation::RolloutRestart);
            }
        }
    }
    Ok(())
}

fn first_non_flag(tokens: &[String], start: usize) -> Option<(usize, &str)> {
    tokens
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, token)| !token.starts_with('-'))
        .map(|(index, token)| (index, token.as_str()))
}

fn first_positional(tokens: &[String], start: usize) -> Option<(usize, &str)> {
    let mut index = start;
    while index < tokens.len() {
        let token = tokens[index].as_str();
        if !token.starts_with('-') {
            return Some((index, token));
        }
        index += if VALUE_FLAGS.contains(&token) { 2 } else { 1 };
    }
    None
}

/// True when any token is a write-shaped keyword.
#[must_use]
pub fn is_write_command(command: &Command) -> bool {
    command
        .tokens()
        .iter()
        .any(|token| WRITE_KEYWORDS.contains(&token.as_str()))
}

/// Namespace named by `-n`, `--namespace` or `--namespace=`, else the default.
#[must_use]
pub fn namespace_from_command(command: &Command, default_namespace: &str) -> String {
    let tokens = command.tokens();
    for (index, token) in tokens.iter().enumerate() {
        if token == "-n" || token == "--namespace" {
            if let Some(value) = tokens.get(index + 1) {
                return value.clone();
            }
        }
        if let Some(value) = token.strip_prefix("--namespace=") {
            return value.to_string();
        }
    }
    default_namespace.to_string()
}

/// Local endpoint: host is `localhost`, a loopback address, or contains `kind`.
#[must_use]
pub fn server_is_local(server: &str) -> bool {
    let host = server_host(server).to_ascii_lowercase();
    if host == "localhost" || host.contains("kind") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn server_host(server: &str) -> &str {
    let rest = server
        .trim()
        .split_once("://")
        .map_or(server.trim(), |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    if let Some(bracketed) = authority.strip_prefix('[') {
        return bracketed.split(']').next().unwrap_or_default();
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => authority,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use kubeclaw_domain::ToolResult;

    use super::*;

    /// Answers `kubectl config ...` reads with fixed results and records argv.
    struct FakeConfigExecutor {
        context: ToolResult,
        server: ToolResult,
        seen: RefCell<Vec<String>>,
    }

    impl FakeConfigExecutor {
        fn new(context: &str, server: &str) -> Self {
            Self {
                context: ToolResult::new(format!("{context}\n"), "", 0),
                server: ToolResult::new(server, "", 0),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ToolExecutor for FakeConfigExecutor {
        fn run(&self, command: &Command, _timeout: Duration) -> ToolResult {
            self.seen.borrow_mut().push(command.to_string());
            if command.tokens().iter().any(|token| token == "current-context") {
                self.context.clone()
            } else {
                self.server.clone()
            }
        }
    }

    fn kubectl(args: &[&str]) -> Command {
        Command::kubectl(args.iter().copied())
    }

    fn assess_options() -> AssessOptions {
        AssessOptions {
            allow_write_actions: false,
            deny_namespaces: vec!["kube-public".to_string()],
            default_namespace: "demo".to_string(),
        }
    }

    #[test]
    fn read_only_rejects_disallowed_verbs() {
        for verb in DISALLOWED_VERBS {
            let result = verify_read_only(&kubectl(&[verb, "pod", "x"]));
            assert_eq!(result, Err(SafetyViolation::DisallowedVerb(verb.to_string())));
        }
        assert!(verify_read_only(&kubectl(&["get", "pods"])).is_ok());
        assert!(verify_read_only(&kubectl(&["--context", "kind-kubeclaw", "get", "pods"])).is_ok());
    }

    #[test]
    fn read_only_rejects_rollout_restart_only() {
        assert_eq!(
            verify_read_only(&kubectl(&["rollout", "restart", "deploy/web"])),
            Err(SafetyViolation::RolloutRestart)
        );
        assert!(verify_read_only(&kubectl(&["rollout", "status", "deploy/web"])).is_ok());
    }

    #[test]
    fn read_only_rejects_structural_problems() {
        assert_eq!(
            verify_read_only(&Command::default()),
            Err(SafetyViolation::EmptyCommand)
        );
        assert_eq!(
            verify_read_only(&Command::from_tokens(vec!["helm".into(), "list".into()])),
            Err(SafetyViolation::NotKubectl)
        );
        assert_eq!(
            verify_read_only(&kubectl(&["--all-namespaces"])),
            Err(SafetyViolation::MissingVerb)
        );
    }

    #[test]
    fn flag_value_cannot_smuggle_a_verb() {
        // Naive resolution sees `demo` as the verb; flag-aware resolution sees `delete`.
        let result = verify_read_only(&kubectl(&["-n", "demo", "delete", "pod", "x"]));
        assert_eq!(result, Err(SafetyViolation::DisallowedVerb("delete".into())));

        let result = verify_read_only(&kubectl(&["--context", "exec", "get", "pods"]));
        assert_eq!(result, Err(SafetyViolation::DisallowedVerb("exec".into())));
    }

    #[test]
    fn namespace_guard_blocks_blank_and_system() {
        assert_eq!(
            verify_namespace_allowed("  ", false),
            Err(SafetyViolation::NamespaceRequired)
        );
        assert_eq!(
            verify_namespace_allowed("kube-system", false),
            Err(SafetyViolation::SystemNamespaceBlocked)
        );
        assert!(verify_namespace_allowed("kube-system", true).is_ok());
        assert!(verify_namespace_allowed("demo", false).is_ok());
    }

    #[test]
    fn namespace_resolution_reads_all_flag_shapes() {
        assert_eq!(namespace_from_command(&kubectl(&["get", "pods", "-n", "a"]), "d"), "a");
        assert_eq!(
            namespace_from_command(&kubectl(&["get", "pods", "--namespace", "b"]), "d"),
            "b"
        );
        assert_eq!(
            namespace_from_command(&kubectl(&["get", "pods", "--namespace=c"]), "d"),
            "c"
        );
        assert_eq!(namespace_from_command(&kubectl(&["get", "pods"]), "d"), "d");
    }

    #[test]
    fn server_locality_is_host_based() {
        assert!(server_is_local("https://127.0.0.1:6443"));
        assert!(server_is_local("https://127.4.5.6"));
        assert!(server_is_local("https://localhost:6443/"));
        assert!(server_is_local("https://[::1]:6443"));
        assert!(server_is_local("https://kind-control-plane:6443"));
        assert!(!server_is_local("https://prod.example.com:443"));
        assert!(!server_is_local("https://prod.example.com/kind"));
        assert!(!server_is_local("https://localhost.example.com"));
    }

    #[test]
    fn budget_counts_up_to_the_limit() {
        let budget = CallBudget::new();
        assert_eq!(budget.try_register(2), Ok(1));
        assert_eq!(budget.try_register(2), Ok(2));
        assert_eq!(
            budget.try_register(2),
            Err(SafetyViolation::CallLimitExceeded(2))
        );
        assert_eq!(budget.used(), 2);
        budget.reset();
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn reset_restores_exactly_the_full_budget() {
        const MAX: u32 = 3;
        let budget = CallBudget::new();
        for expected in 1..=MAX {
            assert_eq!(budget.try_register(MAX), Ok(expected));
        }
        budget.reset();
        for expected in 1..=MAX {
            assert_eq!(budget.try_register(MAX), Ok(expected));
        }
        assert_eq!(
            budget.try_register(MAX),
            Err(SafetyViolation::CallLimitExceeded(MAX))
        );
        assert_eq!(budget.used(), MAX);
    }

    #[test]
    fn register_call_reports_the_limit_message() {
        let executor = FakeConfigExecutor::new("kind-kubeclaw", "https://127.0.0.1:6443");
        let config = SafetyConfig {
            max_tool_calls_per_run: 1,
            ..SafetyConfig::default()
        };
        let budget = CallBudget::new();
        let gate = PolicyGate::new(&executor, &config, &budget, "kind-kubeclaw");
        assert!(gate.register_call().is_ok());
        match gate.register_call() {
            Err(err) => assert_eq!(err.to_string(), "tool call limit exceeded: max 1 calls per run"),
            Ok(()) => panic!("second call must exceed the budget"),
        }
    }

    #[test]
    fn safe_context_rejects_wrong_context_and_remote_server() {
        let budget = CallBudget::new();
        let config = SafetyConfig::default();

        let wrong = FakeConfigExecutor::new("prod", "https://127.0.0.1:6443");
        let gate = PolicyGate::new(&wrong, &config, &budget, "kind-kubeclaw");
        match gate.verify_safe_context(false) {
            Err(err) => assert_eq!(
                err.to_string(),
                "unsafe cluster context 'prod'; expected 'kind-kubeclaw'"
            ),
            Ok(()) => panic!("wrong context must be rejected"),
        }

        let remote = FakeConfigExecutor::new("kind-kubeclaw", "https://prod.example.com");
        let gate = PolicyGate::new(&remote, &config, &budget, "kind-kubeclaw");
        match gate.verify_safe_context(false) {
            Err(err) => assert!(err
                .to_string()
                .starts_with("unsafe cluster server URL 'https://prod.example.com'")),
            Ok(()) => panic!("remote server must be rejected"),
        }
        assert!(gate.verify_safe_context(true).is_ok());

        let overridden = SafetyConfig {
            allow_unsafe_cluster: true,
            ..SafetyConfig::default()
        };
        let gate = PolicyGate::new(&remote, &overridden, &budget, "kind-kubeclaw");
        assert!(gate.verify_safe_context(false).is_ok());
    }

    #[test]
    fn safe_context_maps_config_read_failures() {
        let budget = CallBudget::new();
        let config = SafetyConfig::default();

        let mut timed_out = FakeConfigExecutor::new("kind-kubeclaw", "https://127.0.0.1");
        timed_out.context = ToolResult::timed_out(Duration::from_secs(10));
        let gate = PolicyGate::new(&timed_out, &config, &budget, "kind-kubeclaw");
        assert_eq!(
            gate.verify_safe_context(false),
            Err(SafetyViolation::ConfigCheckTimedOut)
        );

        let mut failing = FakeConfigExecutor::new("kind-kubeclaw", "https://127.0.0.1");
        failing.context = ToolResult::new("", "error: no context\n", 1);
        let gate = PolicyGate::new(&failing, &config, &budget, "kind-kubeclaw");
        assert_eq!(
            gate.verify_safe_context(false),
            Err(SafetyViolation::ConfigReadFailed("error: no context".into()))
        );

        let empty = FakeConfigExecutor::new("kind-kubeclaw", "   ");
        let gate = PolicyGate::new(&empty, &config, &budget, "kind-kubeclaw");
        assert_eq!(gate.verify_safe_context(false), Err(SafetyViolation::ConfigEmpty));
    }

    #[test]
    fn assess_allows_read_only_commands_and_counts_them() {
        let executor = FakeConfigExecutor::new("kind-kubeclaw", "https://127.0.0.1:6443");
        let config = SafetyConfig::default();
        let budget = CallBudget::new();
        let gate = PolicyGate::new(&executor, &config, &budget, "kind-kubeclaw");

        let decision = gate.assess(&kubectl(&["get", "pods", "-n", "demo"]), &assess_options());
        assert_eq!(decision, SafetyDecision::allow());
        assert_eq!(budget.used(), 1);
        assert_eq!(executor.seen.borrow().len(), 2);
    }

    #[test]
    fn assess_rejections_consume_no_budget() {
        let executor = FakeConfigExecutor::new("kind-kubeclaw", "https://127.0.0.1:6443");
        let config = SafetyConfig::default();
        let budget = CallBudget::new();
        let gate = PolicyGate::new(&executor, &config, &budget, "kind-kubeclaw");
        let options = assess_options();

        let cases = [
            (kubectl(&["delete", "pod", "x"]), "disallowed kubectl verb in read-only mode: 'delete'"),
            (kubectl(&["get", "pods", "-n", "kube-system"]), "namespace 'kube-system' is blocked unless allow_system=True"),
            (kubectl(&["get", "pods", "-n", "kube-public"]), "namespace 'kube-public' is denied by policy"),
            (kubectl(&["create", "configmap", "x"]), "write actions are disabled"),
        ];
        for (command, reason) in cases {
            let decision = gate.assess(&command, &options);
            assert!(!decision.allowed);
            assert_eq!(decision.reason, reason);
        }
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn assess_checks_budget_before_touching_the_cluster() {
        let executor = FakeConfigExecutor::new("kind-kubeclaw", "https://127.0.0.1:6443");
        let config = SafetyConfig {
            max_tool_calls_per_run: 1,
            ..SafetyConfig::default()
        };
        let budget = CallBudget::new();
        let gate = PolicyGate::new(&executor, &config, &budget, "kind-kubeclaw");
        let options = assess_options();

        assert!(gate.assess(&kubectl(&["get", "pods"]), &options).allowed);
        let seen_before = executor.seen.borrow().len();
        let decision = gate.assess(&kubectl(&["get", "pods"]), &options);
        assert_eq!(decision.reason, "tool call limit exceeded: max 1 calls per run");
        assert_eq!(executor.seen.borrow().len(), seen_before);
    }

    #[test]
    fn assess_write_commands_pass_when_enabled() {
        let executor = FakeConfigExecutor::new("kind-kubeclaw", "https://127.0.0.1:6443");
        let config = SafetyConfig::default();
        let budget = CallBudget::new();
        let gate = PolicyGate::new(&executor, &config, &budget, "kind-kubeclaw");
        let options = AssessOptions {
            allow_write_actions: true,
            ..assess_options()
        };
        assert!(gate.assess(&kubectl(&["create", "configmap", "x"]), &options).allowed);
    }
}
