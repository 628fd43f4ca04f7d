use kubeclaw_domain::ToolCall;
use kubeclaw_tools::DEFAULT_EVENTS_LIMIT;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Tail length used by planned `logs` steps.
pub const PLANNED_LOG_TAIL: i64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolPlanStep {
    pub call: ToolCall,
    pub expected_information_gain: String,
}

impl ToolPlanStep {
    fn new(name: &str, args: serde_json::Value, gain: &str) -> Self {
        Self {
            call: ToolCall::new(name, args),
            expected_information_gain: gain.to_string(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PlanError {
    #[error("missing expected information gain for tool '{0}'")]
    MissingInformationGain(String),
}

/// Every step must say what it is expected to reveal.
///
/// # Errors
/// Returns [`PlanError::MissingInformationGain`] for a blank rationale.
pub fn ensure_information_gain(step: &ToolPlanStep) -> Result<(), PlanError> {
    if step.expected_information_gain.trim().is_empty() {
        return Err(PlanError::MissingInformationGain(step.call.name.clone()));
    }
    Ok(())
}

/// Deterministic plan: recent events first, then symptom-specific steps.
/// The first matching keyword group wins.
#[must_use]
pub fn build_triage_plan(namespace: &str, symptom: &str) -> Vec<ToolPlanStep> {
    let ns = namespace;
    let normalized = symptom.to_lowercase();
    let mut plan = vec![ToolPlanStep::new(
        "events_tail",
        json!({"ns": ns, "limit": DEFAULT_EVENTS_LIMIT}),
        "Recent warning events reveal immediate failure reasons and timing.",
    )];

    if normalized.contains("crash") {
        plan.extend([
            ToolPlanStep::new(
                "logs",
                json!({"ns": ns, "pod": "deployment/crashloop-demo", "tail": PLANNED_LOG_TAIL}),
                "Container logs expose startup exceptions and missing env/config signals.",
            ),
            ToolPlanStep::new(
                "logs",
                json!({"ns": ns, "pod": "deployment/crashloop-secret-demo", "tail": PLANNED_LOG_TAIL}),
                "Alternate crashloop deployment confirms secret-reference variants.",
            ),
            ToolPlanStep::new(
                "describe_deploy",
                json!({"ns": ns, "deploy": "crashloop-demo"}),
                "Deployment describe provides restart/state transition evidence.",
            ),
            ToolPlanStep::new(
                "describe_deploy",
                json!({"ns": ns, "deploy": "crashloop-secret-demo"}),
                "Cross-namespace secret and env wiring clues appear in deployment details.",
            ),
        ]);
    } else if normalized.contains("image") || normalized.contains("pull") {
        plan.push(ToolPlanStep::new(
            "describe_deploy",
            json!({"ns": ns, "deploy": "imagepull-demo"}),
            "Deployment events show image pull/auth errors with registry details.",
        ));
    } else if normalized.contains("pending") {
        plan.extend([
            ToolPlanStep::new(
                "describe_pod",
                json!({"ns": ns, "pod": "pending-demo"}),
                "Pod describe provides scheduler reason and resource shortage details.",
            ),
            ToolPlanStep::new(
                "describe_pod",
                json!({"ns": ns, "pod": "pending-quota-demo"}),
                "Quota-related pending variant helps disambiguate scheduling vs quota limits.",
            ),
        ]);
    } else if normalized.contains("unreachable") {
        plan.extend([
            ToolPlanStep::new(
                "get_yaml",
                json!({"kind": "svc", "ns": ns, "name": "web-svc"}),
                "Service selector and ports identify routing target configuration.",
            ),
            ToolPlanStep::new(
                "get_yaml",
                json!({"kind": "ep", "ns": ns, "name": "web-svc"}),
                "Endpoints object confirms whether backend addresses are populated.",
            ),
            ToolPlanStep::new(
                "get_yaml",
                json!({"kind": "svc", "ns": ns, "name": "service-500-svc"}),
                "Service 500 lab wiring distinguishes transport from app-level failures.",
            ),
            ToolPlanStep::new(
                "get_yaml",
                json!({"kind": "ep", "ns": ns, "name": "service-500-svc"}),
                "Endpoint status for 500 lab indicates if routing is functioning.",
            ),
        ]);
    } else if normalized.contains("oom") || normalized.contains("137") {
        plan.extend([
            ToolPlanStep::new(
                "describe_pod",
                json!({"ns": ns, "pod": "oom-demo"}),
                "Pod state includes OOMKilled reason, exit code 137, and restart timing.",
            ),
            ToolPlanStep::new(
                "describe_deploy",
                json!({"ns": ns, "deploy": "oom-probe-demo"}),
                "Deployment probe status distinguishes probe failures from OOM side effects.",
            ),
            ToolPlanStep::new(
                "top_pod",
                json!({"ns": ns}),
                "Runtime resource usage validates memory pressure hypothesis.",
            ),
        ]);
    }
    plan
}
