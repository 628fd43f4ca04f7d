use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use kubeclaw_domain::{Command, ToolExecutor, ToolResult};

/// Deterministic executor: answers `kubectl config` reads from a fixed
/// cluster identity and every other command from a queue of results.
#[derive(Debug)]
pub struct ScriptedExecutor {
    context: String,
    server: String,
    responses: RefCell<VecDeque<ToolResult>>,
    fallback: ToolResult,
    commands: RefCell<Vec<Command>>,
}

impl ScriptedExecutor {
    /// A `kind-kubeclaw` context on a loopback endpoint.
    #[must_use]
    pub fn local() -> Self {
        Self::with_cluster("kind-kubeclaw", "https://127.0.0.1:6443")
    }

    #[must_use]
    pub fn with_cluster(context: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            server: server.into(),
            responses: RefCell::new(VecDeque::new()),
            fallback: ToolResult::new("", "", 0),
            commands: RefCell::new(Vec::new()),
        }
    }

    /// Queue the result for the next non-config command.
    #[must_use]
    pub fn respond(self, result: ToolResult) -> Self {
        self.responses.borrow_mut().push_back(result);
        self
    }

    /// Result used once the queue is empty.
    #[must_use]
    pub fn otherwise(mut self, result: ToolResult) -> Self {
        self.fallback = result;
        self
    }

    /// Non-config commands executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.commands.borrow().clone()
    }
}

impl ToolExecutor for ScriptedExecutor {
    fn run(&self, command: &Command, _timeout: Duration) -> ToolResult {
        let args = command.args();
        if args.first().map(String::as_str) == Some("config") {
            return if args.iter().any(|arg| arg == "current-context") {
                ToolResult::new(format!("{}\n", self.context), "", 0)
            } else {
                ToolResult::new(self.server.clone(), "", 0)
            };
        }
        self.commands.borrow_mut().push(command.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
