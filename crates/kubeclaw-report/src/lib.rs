#![forbid(unsafe_code)]

use kubeclaw_domain::{format_rfc3339, FactBundle, GoldenFact, IncidentType, StepRejection};
use serde::{Deserialize, Serialize};

/// Upper bound on facts echoed into the report.
pub const MAX_OBSERVED_FACTS: usize = 6;
pub const MAX_HYPOTHESES: usize = 3;

const PATCH_HEADER: &str = "Suggested YAML patch (text only, do not apply automatically):\n";
const NO_TIMESTAMP: &str = "timestamp unavailable";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Plain,
    Json,
}

impl ReportFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Plain => "plain",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "markdown" => Some(Self::Markdown),
            "plain" => Some(Self::Plain),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// File extension used for persisted reports.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Plain => "txt",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hypothesis {
    pub rank: u8,
    pub statement: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub what_would_change_my_mind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageReport {
    pub incident: IncidentType,
    pub insufficient_evidence: bool,
    pub objective: String,
    pub observed_facts: Vec<String>,
    pub interpretation: String,
    pub hypotheses: Vec<Hypothesis>,
    pub next_best_diagnostic: String,
    pub proposed_fix: String,
    pub rollback_plan: String,
    pub safety_notes: Vec<String>,
}

/// Advisory, text-only remediation for one incident class.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SuggestedFix {
    pub incident: IncidentType,
    pub patch_text: String,
    pub rollback_steps: String,
    pub blast_radius: String,
}

/// Everything the report needs beyond the fact bundle.
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs<'a> {
    pub symptom: &'a str,
    pub namespace: &'a str,
    pub action_budget: usize,
    pub executed_actions: usize,
    pub rejections: &'a [StepRejection],
}

#[must_use]
pub fn render_suggested_fix(incident: IncidentType) -> SuggestedFix {
    let (body, rollback, blast) = match incident {
        IncidentType::ServiceUnreachable => (
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: web-svc\nspec:\n  selector:\n    app: web-wrong\n# Validation: kubectl get ep web-svc -n demo -o yaml",
            "Rollback: restore previous Service selector, then verify endpoints and service reachability.",
            "Blast radius: service routing behavior for pods behind this Service.",
        ),
        IncidentType::Pending => (
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: pending-demo\nspec:\n  containers:\n    - name: app\n      resources:\n        requests:\n          cpu: \"250m\"",
            "Rollback: revert CPU request to prior value if workload SLO degrades.",
            "Blast radius: scheduling/placement behavior for the target pod.",
        ),
        IncidentType::Imagepull => (
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: imagepull-demo\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          image: nginx:1.27",
            "Rollback: restore previous image tag if startup regressions appear.",
            "Blast radius: deployment rollout for selected workload only.",
        ),
        IncidentType::Oom => (
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: oom-demo\nspec:\n  containers:\n    - name: app\n      resources:\n        limits:\n          memory: \"256Mi\"",
            "Rollback: restore previous memory limit and monitor restart count.",
            "Blast radius: memory allocation policy for the target pod/container.",
        ),
        IncidentType::Crashloop => (
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: crashloop-demo\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          env:\n            - name: DATABASE_URL\n              valueFrom:\n                secretKeyRef:\n                  name: app-secret\n                  key: DATABASE_URL",
            "Rollback: restore previous environment configuration and verify pod startup events.",
            "Blast radius: startup configuration for the target deployment.",
        ),
        IncidentType::Generic => {
            return SuggestedFix {
                incident,
                patch_text: "Insufficient evidence for a safe config patch recommendation."
                    .to_string(),
                rollback_steps: "No rollback required; no changes proposed.".to_string(),
                blast_radius: "Blast radius: none (advisory only).".to_string(),
            };
        }
    };
    SuggestedFix {
        incident,
        patch_text: format!("{PATCH_HEADER}{body}"),
        rollback_steps: rollback.to_string(),
        blast_radius: blast.to_string(),
    }
}

fn contradiction_markers(incident: IncidentType) -> &'static [&'static str] {
    match incident {
        IncidentType::Crashloop => &["crashloop", "back-off", "database_url"],
        IncidentType::Imagepull => &["imagepull", "failed to pull image", "errimagepull"],
        IncidentType::Pending => &["failedscheduling", "insufficient cpu", "resourcequota"],
        IncidentType::ServiceUnreachable => &["endpoints", "selector", "subsets: []"],
        IncidentType::Oom => &["oomkilled", "exit code: 137"],
        IncidentType::Generic => &[],
    }
}

/// Number of other incident classes with at least one marker in the facts.
#[must_use]
pub fn count_incident_contradictions(facts: &[GoldenFact], primary: IncidentType) -> usize {
    let joined = facts
        .iter()
        .map(|fact| fact.text.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    IncidentType::SIGNALS
        .iter()
        .filter(|incident| **incident != primary)
        .filter(|incident| {
            contradiction_markers(**incident)
                .iter()
                .any(|marker| joined.contains(marker))
        })
        .count()
}

#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn hypothesis_confidence(bundle: &FactBundle, primary: bool, contradictions: usize) -> f64 {
    let coverage = (bundle.facts.len() as f64 / MAX_OBSERVED_FACTS as f64).min(1.0);
    let mut score = 0.35 + 0.4 * coverage;
    if primary {
        score += 0.1;
    }
    score -= 0.08 * bundle.tool_failures as f64;
    score -= 0.1 * contradictions as f64;
    if bundle.insufficient_evidence {
        score -= 0.2;
    }
    score.clamp(0.05, 0.95)
}

/// Next diagnostic command followed by a `Lookahead:` line.
#[must_use]
pub fn next_action(incident: IncidentType, namespace: &str, insufficient: bool) -> String {
    let ns = namespace;
    if insufficient {
        return format!(
            "Need minimum additional data: describe_pod --ns {ns} --pod <affected-pod>\n\
             Lookahead: If pod reason shows FailedScheduling -> run events_tail --ns {ns} --limit 30; \
             if pod reason shows CrashLoopBackOff/ImagePullBackOff -> run logs --ns {ns} --pod <affected-pod> --previous --tail 200."
        );
    }
    let (action, lookahead) = match incident {
        IncidentType::Crashloop => (
            format!("logs --ns {ns} --pod deployment/crashloop-demo --previous --tail 200"),
            format!(
                "If logs show missing env/secret -> inspect describe_deploy --ns {ns} --deploy crashloop-demo; \
                 if logs show runtime exception -> inspect get_yaml --kind deploy --ns {ns} --name crashloop-demo."
            ),
        ),
        IncidentType::Imagepull => (
            format!("describe_deploy --ns {ns} --deploy imagepull-demo"),
            format!(
                "If image tag/auth error appears -> verify image reference; \
                 if no pull error appears -> inspect events_tail --ns {ns} --limit 30."
            ),
        ),
        IncidentType::Pending => (
            format!("describe_pod --ns {ns} --pod pending-demo"),
            "If FailedScheduling mentions cpu -> reduce request; if quota-related -> inspect ResourceQuota usage."
                .to_string(),
        ),
        IncidentType::ServiceUnreachable => (
            format!("get_yaml --kind ep --ns {ns} --name web-svc"),
            "If endpoints empty -> compare selector/labels; if endpoints populated -> investigate app-level 500 path."
                .to_string(),
        ),
        IncidentType::Oom => (
            format!("describe_pod --ns {ns} --pod oom-demo"),
            "If OOMKilled/137 confirmed -> tune memory limits; if not, inspect probe failures and restart patterns."
                .to_string(),
        ),
        IncidentType::Generic => (
            format!("events_tail --ns {ns} --limit 30"),
            "If warning events are present -> follow dominant reason; if no warning events -> request targeted describe/logs for affected workload."
                .to_string(),
        ),
    };
    format!("{action}\nLookahead: {lookahead}")
}

fn interpretation(bundle: &FactBundle) -> String {
    if bundle.insufficient_evidence {
        return "Insufficient evidence to reach a high-confidence diagnosis. \
                Stop condition triggered to prevent low-value diagnostic sprawl."
            .to_string();
    }
    let incident = bundle.classification;
    let suffix = match incident {
        IncidentType::ServiceUnreachable => {
            " Primary signal indicates selector mismatch and/or empty endpoints."
        }
        IncidentType::Pending => " Primary signal indicates FailedScheduling and capacity pressure.",
        IncidentType::Imagepull => " Primary signal indicates failed image pull/registry resolution.",
        IncidentType::Crashloop => " Primary signal indicates CrashLoop/Back-off startup failures.",
        IncidentType::Oom => " Primary signal indicates OOMKilled/exit 137.",
        IncidentType::Generic => "",
    };
    format!(
        "Deterministic classifier selected '{incident}' from golden facts while excluding stale evidence count={}.{suffix}",
        bundle.excluded_stale_count
    )
}

fn observed_line(fact: &GoldenFact) -> String {
    let stamp = fact
        .timestamp
        .and_then(|ts| format_rfc3339(ts).ok())
        .unwrap_or_else(|| NO_TIMESTAMP.to_string());
    format!("{}: {} (evidence_time={stamp})", fact.source, fact.text)
}

fn evidence_slice(facts: &[GoldenFact], start: usize, fallback: &str) -> Vec<String> {
    let picked = facts
        .iter()
        .skip(start)
        .take(2)
        .map(|fact| fact.text.clone())
        .collect::<Vec<_>>();
    if picked.is_empty() {
        vec![fallback.to_string()]
    } else {
        picked
    }
}

fn build_hypotheses(bundle: &FactBundle, namespace: &str) -> Vec<Hypothesis> {
    let incident = bundle.classification;
    let contradictions = count_incident_contradictions(&bundle.facts, incident);
    let primary = hypothesis_confidence(bundle, true, contradictions).clamp(0.05, 0.99);
    let alternative = hypothesis_confidence(bundle, false, contradictions);
    let first_action = next_action(incident, namespace, true);
    let change_mind = first_action.lines().next().unwrap_or_default().to_string();

    let mut hypotheses = vec![
        Hypothesis {
            rank: 1,
            statement: format!("Primary incident class is '{incident}'."),
            confidence: primary,
            evidence: evidence_slice(&bundle.facts, 0, "No direct facts captured."),
            what_would_change_my_mind: change_mind,
        },
        Hypothesis {
            rank: 2,
            statement: "Configuration mismatch is a plausible alternative.".to_string(),
            confidence: (alternative - 0.1).clamp(0.05, 0.85),
            evidence: evidence_slice(&bundle.facts, 2, "Workload metadata should be verified."),
            what_would_change_my_mind: format!(
                "get_yaml --kind deploy --ns {namespace} --name <affected-deploy>"
            ),
        },
        Hypothesis {
            rank: 3,
            statement: "Resource/runtime constraints may be contributing.".to_string(),
            confidence: (alternative - 0.2).clamp(0.05, 0.7),
            evidence: evidence_slice(
                &bundle.facts,
                4,
                "Requests/limits and restart timing should be checked.",
            ),
            what_would_change_my_mind: format!("top_pod --ns {namespace}"),
        },
    ];
    hypotheses.sort_by_key(|hypothesis| hypothesis.rank);
    hypotheses.truncate(MAX_HYPOTHESES);
    hypotheses
}

/// Assemble the eight-section report from a fact bundle.
#[must_use]
pub fn build_report(bundle: &FactBundle, inputs: &ReportInputs<'_>) -> TriageReport {
    let namespace = inputs.namespace;
    let incident = bundle.classification;
    let fix = render_suggested_fix(incident);

    let mut observed_facts = bundle
        .facts
        .iter()
        .take(MAX_OBSERVED_FACTS)
        .map(observed_line)
        .collect::<Vec<_>>();
    if observed_facts.is_empty() {
        observed_facts.push("No tool output captured.".to_string());
    }

    let proposed_fix = if bundle.insufficient_evidence {
        "Insufficient evidence for safe change recommendation; gather minimum additional data first."
            .to_string()
    } else {
        format!("{}\n{}", fix.patch_text, fix.blast_radius)
    };

    let mut safety_notes = vec![
        "Read-only mode enforced; no mutating kubectl verbs executed.".to_string(),
        format!("Namespace scope: {namespace}"),
        format!(
            "Action budget: {}; executed actions: {}",
            inputs.action_budget, inputs.executed_actions
        ),
        format!(
            "Stale evidence ignored by default; excluded count: {}",
            bundle.excluded_stale_count
        ),
        "Tool outputs may be truncated/redacted before persistence.".to_string(),
    ];
    safety_notes.extend(
        inputs
            .rejections
            .iter()
            .map(|rejection| format!("Policy rejected {}: {}", rejection.tool, rejection.reason)),
    );

    TriageReport {
        incident,
        insufficient_evidence: bundle.insufficient_evidence,
        objective: format!("User requested triage for symptom: {}", inputs.symptom),
        observed_facts,
        interpretation: interpretation(bundle),
        hypotheses: build_hypotheses(bundle, namespace),
        next_best_diagnostic: next_action(incident, namespace, bundle.insufficient_evidence),
        proposed_fix,
        rollback_plan: fix.rollback_steps,
        safety_notes,
    }
}

#[must_use]
pub fn format_markdown(report: &TriageReport) -> String {
    let mut lines = vec![
        "# Triage Report".to_string(),
        String::new(),
        "## 1) Objective".to_string(),
        report.objective.clone(),
        String::new(),
        "## 2) Observed facts".to_string(),
    ];
    lines.extend(report.observed_facts.iter().map(|fact| format!("- {fact}")));
    lines.extend([
        String::new(),
        "## 3) Interpretation".to_string(),
        report.interpretation.clone(),
        String::new(),
        "## 4) Hypotheses".to_string(),
    ]);
    for hypothesis in &report.hypotheses {
        lines.push(format!("{}. {}", hypothesis.rank, hypothesis.statement));
        lines.push(format!("   - Confidence: {:.2}", hypothesis.confidence));
        lines.push(format!(
            "   - What would change my mind: {}",
            hypothesis.what_would_change_my_mind
        ));
        lines.push(format!("   - Evidence: {}", hypothesis.evidence.join("; ")));
    }
    lines.extend([
        String::new(),
        "## 5) Next best diagnostic".to_string(),
        format!("`{}`", report.next_best_diagnostic),
        String::new(),
        "## 6) Proposed fix".to_string(),
        report.proposed_fix.clone(),
        String::new(),
        "## 7) Rollback plan".to_string(),
        report.rollback_plan.clone(),
        String::new(),
        "## 8) Safety notes".to_string(),
    ]);
    lines.extend(report.safety_notes.iter().map(|note| format!("- {note}")));
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[must_use]
pub fn format_plain(report: &TriageReport) -> String {
    let mut lines = vec![
        "Triage Report".to_string(),
        String::new(),
        "1) Objective".to_string(),
        report.objective.clone(),
        String::new(),
        "2) Observed facts".to_string(),
    ];
    lines.extend(report.observed_facts.iter().map(|fact| format!("- {fact}")));
    lines.extend([
        String::new(),
        "3) Interpretation".to_string(),
        report.interpretation.clone(),
        String::new(),
        "4) Hypotheses".to_string(),
    ]);
    for hypothesis in &report.hypotheses {
        lines.push(format!("{}. {}", hypothesis.rank, hypothesis.statement));
        lines.push(format!("   Confidence: {:.2}", hypothesis.confidence));
        lines.push(format!(
            "   What would change my mind: {}",
            hypothesis.what_would_change_my_mind
        ));
        lines.push(format!("   Evidence: {}", hypothesis.evidence.join("; ")));
    }
    lines.extend([
        String::new(),
        "5) Next best diagnostic".to_string(),
        report.next_best_diagnostic.clone(),
        String::new(),
        "6) Proposed fix".to_string(),
        report.proposed_fix.clone(),
        String::new(),
        "7) Rollback plan".to_string(),
        report.rollback_plan.clone(),
        String::new(),
        "8) Safety notes".to_string(),
    ]);
    lines.extend(report.safety_notes.iter().map(|note| format!("- {note}")));
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// # Errors
/// Returns an error if the report cannot be serialized.
pub fn format_json(report: &TriageReport) -> Result<String, serde_json::Error> {
    let mut out = serde_json::to_string_pretty(report)?;
    out.push('\n');
    Ok(out)
}

/// # Errors
/// Returns an error only for JSON output that fails to serialize.
pub fn render(report: &TriageReport, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Markdown => Ok(format_markdown(report)),
        ReportFormat::Plain => Ok(format_plain(report)),
        ReportFormat::Json => format_json(report),
    }
}
