#![forbid(unsafe_code)]

mod plan;

use anyhow::{Context, Result};
use kubeclaw_domain::{now_utc, DateTimeUtc, FactBundle, RawResult, StepRejection};
use kubeclaw_facts::{extract_fact_bundle, FactOptions, DEFAULT_STALE_WINDOW_MINUTES};
use kubeclaw_policy::SafetyViolation;
use kubeclaw_redaction::redact_text;
use kubeclaw_replay::{ReplayError, ReplayHarness};
use kubeclaw_report::{build_report, ReportInputs, TriageReport};
use kubeclaw_tools::{SafeToolRunner, ToolError};
use serde_json::Value;
use tracing::{info, warn};

pub use plan::{
    build_triage_plan, ensure_information_gain, PlanError, ToolPlanStep, PLANNED_LOG_TAIL,
};

pub const DEFAULT_ACTION_BUDGET: usize = 6;

#[derive(Debug, Clone)]
pub struct TriageOptions {
    pub symptom: String,
    pub namespace: String,
    pub action_budget: usize,
    pub stale_window_minutes: i64,
    pub include_stale_evidence: bool,
    pub allow_system: bool,
    pub allow_unsafe_cluster: bool,
    /// Reference instant for staleness; the wall clock when `None`.
    pub now: Option<DateTimeUtc>,
}

impl TriageOptions {
    #[must_use]
    pub fn new(symptom: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            symptom: symptom.into(),
            namespace: namespace.into(),
            action_budget: DEFAULT_ACTION_BUDGET,
            stale_window_minutes: DEFAULT_STALE_WINDOW_MINUTES,
            include_stale_evidence: false,
            allow_system: false,
            allow_unsafe_cluster: false,
            now: None,
        }
    }

    /// Budgets below one still allow a single step.
    #[must_use]
    pub fn effective_action_budget(&self) -> usize {
        self.action_budget.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct TriageOutcome {
    pub plan: Vec<ToolPlanStep>,
    pub executed_actions: usize,
    pub raw_results: Vec<RawResult>,
    pub rejections: Vec<StepRejection>,
    pub bundle: FactBundle,
}

impl TriageOutcome {
    #[must_use]
    pub fn report(&self, options: &TriageOptions) -> TriageReport {
        build_report(
            &self.bundle,
            &ReportInputs {
                symptom: &options.symptom,
                namespace: &options.namespace,
                action_budget: options.effective_action_budget(),
                executed_actions: self.executed_actions,
                rejections: &self.rejections,
            },
        )
    }
}

/// Failure of a single planned step, before it is sorted into a rejection or
/// a fatal replay error.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

pub struct TriageOrchestrator<'a> {
    runner: &'a SafeToolRunner<'a>,
}

impl<'a> TriageOrchestrator<'a> {
    #[must_use]
    pub fn new(runner: &'a SafeToolRunner<'a>) -> Self {
        Self { runner }
    }

    /// Walk the plan for `options.symptom`, gather evidence through the
    /// harness, and extract the fact bundle.
    ///
    /// Policy rejections are collected and the walk continues; an exhausted
    /// call budget ends the walk early.
    ///
    /// # Errors
    /// Returns an error for a plan step without rationale or for any replay
    /// integrity failure (missing, exhausted, mismatched, or tampered
    /// recordings, and recording I/O errors).
    pub fn run(&self, harness: &mut ReplayHarness, options: &TriageOptions) -> Result<TriageOutcome> {
        self.runner.reset();
        let plan = build_triage_plan(&options.namespace, &options.symptom);
        let action_budget = options.effective_action_budget();
        info!(
            symptom = %options.symptom,
            namespace = %options.namespace,
            mode = harness.mode().as_str(),
            steps = plan.len(),
            action_budget,
            "starting triage"
        );

        let mut raw_results = Vec::new();
        let mut rejections = Vec::new();
        let mut executed_actions = 0_usize;

        for (index, step) in plan.iter().enumerate() {
            if executed_actions >= action_budget {
                break;
            }
            ensure_information_gain(step)?;

            let name = step.call.name.as_str();
            let args = merged_args(&step.call.args, options);
            let outcome = harness.execute(name, &args, || {
                self.runner.run_call(name, &args).map_err(StepError::from)
            });
            match outcome {
                Ok(result) => {
                    raw_results.push(RawResult::new(
                        name,
                        result.exit_code,
                        redact_text(result.body()),
                    ));
                    executed_actions += 1;
                }
                Err(StepError::Tool(err)) => {
                    let budget_spent = matches!(
                        err,
                        ToolError::Safety(SafetyViolation::CallLimitExceeded(_))
                    );
                    let reason = err.to_string();
                    warn!(tool = name, reason = %reason, "step rejected");
                    harness
                        .record_rejection(name, &args, &reason, budget_spent)
                        .with_context(|| format!("failed to record rejection at step {index} ({name})"))?;
                    rejections.push(StepRejection {
                        tool: name.to_string(),
                        reason,
                    });
                    if budget_spent {
                        break;
                    }
                }
                Err(StepError::Replay(ReplayError::Rejected { reason, halted, .. })) => {
                    warn!(tool = name, reason = %reason, "recorded step rejection");
                    rejections.push(StepRejection {
                        tool: name.to_string(),
                        reason,
                    });
                    if halted {
                        break;
                    }
                }
                Err(StepError::Replay(err)) => {
                    warn!(tool = name, error = %err, "replay integrity failure");
                    return Err(err)
                        .with_context(|| format!("triage aborted at step {index} ({name})"));
                }
            }
        }

        let facts = FactOptions {
            now: options.now.unwrap_or_else(now_utc),
            stale_window_minutes: options.stale_window_minutes.max(1),
            include_stale_evidence: options.include_stale_evidence,
        };
        let bundle = extract_fact_bundle(&raw_results, &options.symptom, &facts);
        info!(
            executed_actions,
            rejected = rejections.len(),
            facts = bundle.facts.len(),
            classification = bundle.classification.as_str(),
            "triage finished"
        );

        Ok(TriageOutcome {
            plan,
            executed_actions,
            raw_results,
            rejections,
            bundle,
        })
    }
}

fn merged_args(args: &Value, options: &TriageOptions) -> Value {
    let mut merged = match args {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.insert("allow_system".to_string(), Value::Bool(options.allow_system));
    merged.insert(
        "allow_unsafe_cluster".to_string(),
        Value::Bool(options.allow_unsafe_cluster),
    );
    Value::Object(merged)
}
