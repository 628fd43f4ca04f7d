#![forbid(unsafe_code)]

mod checks;
mod skills;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use kubeclaw_domain::{compact_stamp, now_utc, ReplayMode};
use kubeclaw_policy::{AgentConfig, CallBudget, EnvSafetyConfig, PolicyGate};
use kubeclaw_replay::ReplayHarness;
use kubeclaw_report::{render, ReportFormat};
use kubeclaw_tools::{DirectInspector, KubectlExecutor, SafeToolRunner};
use kubeclaw_triage::{TriageOptions, TriageOrchestrator, DEFAULT_ACTION_BUDGET};
use tracing_subscriber::EnvFilter;

use crate::checks::{run_self_check, SelfCheckOptions};
use crate::skills::{sync_skills, SkillPaths};

const LOG_ENV: &str = "KUBECLAW_LOG";

#[derive(Debug, Parser)]
#[command(name = "kubeclaw")]
#[command(about = "Guarded read-only Kubernetes triage with recorded evidence")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the deterministic triage plan and print a report.
    Triage(TriageArgs),
    /// Check cluster safety and local plumbing before triage.
    SelfCheck(SelfCheckArgs),
    /// Run a single guarded kubectl read.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct TriageArgs {
    #[arg(long)]
    symptom: String,
    #[arg(long)]
    ns: Option<String>,
    #[arg(long, default_value = "markdown")]
    format: String,
    #[arg(long, default_value_t = false)]
    record: bool,
    #[arg(long, requires = "record")]
    session_id: Option<String>,
    #[arg(long)]
    replay: Option<String>,
    #[arg(long, default_value_t = 30)]
    stale_window_minutes: i64,
    #[arg(long, default_value_t = false)]
    include_stale_evidence: bool,
    #[arg(long, default_value_t = DEFAULT_ACTION_BUDGET)]
    action_budget: usize,
    #[arg(long, default_value_t = false)]
    allow_system: bool,
    #[arg(long, default_value_t = false)]
    allow_unsafe_cluster: bool,
    #[arg(long)]
    snapshots_dir: Option<PathBuf>,
    #[arg(long)]
    reports_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SelfCheckArgs {
    #[arg(long)]
    ns: Option<String>,
    #[arg(long, default_value_t = false)]
    allow_system: bool,
    #[arg(long, default_value_t = false)]
    allow_unsafe_cluster: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    #[command(subcommand)]
    command: InspectSubcommand,
}

#[derive(Debug, Subcommand)]
enum InspectSubcommand {
    Describe {
        resource: String,
        name: String,
        #[arg(long)]
        ns: Option<String>,
    },
    Logs {
        pod: String,
        #[arg(long)]
        ns: Option<String>,
        #[arg(long)]
        container: Option<String>,
    },
    Top {
        #[arg(long)]
        ns: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Triage(args) => triage_command(args),
        Commands::SelfCheck(args) => self_check_command(&args),
        Commands::Inspect(args) => inspect_command(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_skills() -> Result<()> {
    let loaded = sync_skills(&SkillPaths::from_env()).context("skill sync failed")?;
    eprintln!("skills loaded: {}", loaded.loaded_count);
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn triage_command(args: TriageArgs) -> Result<ExitCode> {
    if args.record && args.replay.is_some() {
        bail!("choose either --record or --replay, not both");
    }
    let format = parse_report_format(&args.format)?;
    let agent = AgentConfig::from_env();
    let namespace = args.ns.clone().unwrap_or_else(|| agent.kube_namespace.clone());
    let snapshots_dir = args.snapshots_dir.clone().unwrap_or_else(|| agent.snapshots_dir.clone());
    let reports_dir = args.reports_dir.clone().unwrap_or_else(|| agent.reports_dir.clone());

    load_skills()?;

    let (mode, session_id) = match (&args.replay, args.record) {
        (Some(id), _) => (ReplayMode::Replay, Some(id.clone())),
        (None, true) => (ReplayMode::Record, args.session_id.clone()),
        (None, false) => (ReplayMode::Live, None),
    };

    let executor = KubectlExecutor;
    let safety = EnvSafetyConfig;
    let budget = CallBudget::new();
    let gate = PolicyGate::new(&executor, &safety, &budget, agent.kube_context.clone());
    let runner = SafeToolRunner::new(&gate);
    let mut harness = ReplayHarness::new(&snapshots_dir, mode, session_id)?;

    let options = TriageOptions {
        symptom: args.symptom.clone(),
        namespace,
        action_budget: args.action_budget,
        stale_window_minutes: args.stale_window_minutes,
        include_stale_evidence: args.include_stale_evidence,
        allow_system: args.allow_system,
        allow_unsafe_cluster: args.allow_unsafe_cluster,
        now: None,
    };
    let outcome = TriageOrchestrator::new(&runner).run(&mut harness, &options)?;
    let report = outcome.report(&options);
    let output = render(&report, format)?;
    print!("{output}");

    fs::create_dir_all(&reports_dir)
        .with_context(|| format!("failed to create {}", reports_dir.display()))?;
    let stamp = compact_stamp(now_utc())?;
    let report_path = reports_dir.join(format!("triage-{stamp}.{}", format.extension()));
    fs::write(&report_path, &output)
        .with_context(|| format!("failed to write {}", report_path.display()))?;
    eprintln!("report: {}", report_path.display());
    if mode == ReplayMode::Record {
        eprintln!("recorded_session: {}", harness.session_id());
    }
    Ok(ExitCode::SUCCESS)
}

fn self_check_command(args: &SelfCheckArgs) -> Result<ExitCode> {
    load_skills()?;
    let agent = AgentConfig::from_env();
    let namespace = args.ns.clone().unwrap_or_else(|| agent.kube_namespace.clone());

    let executor = KubectlExecutor;
    let safety = EnvSafetyConfig;
    let budget = CallBudget::new();
    let gate = PolicyGate::new(&executor, &safety, &budget, agent.kube_context.clone());
    let checks = run_self_check(
        &gate,
        &SelfCheckOptions {
            namespace: &namespace,
            allow_system: args.allow_system,
            allow_unsafe_cluster: args.allow_unsafe_cluster,
        },
    );

    for check in &checks {
        println!("{}", check.line());
    }
    if checks.iter().all(|check| check.passed) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn inspect_command(args: InspectArgs) -> Result<ExitCode> {
    let agent = AgentConfig::from_env();
    let executor = KubectlExecutor;
    let safety = EnvSafetyConfig;
    let budget = CallBudget::new();
    let gate = PolicyGate::new(&executor, &safety, &budget, agent.kube_context.clone());
    let inspector = DirectInspector::new(&gate, &agent);
    let namespace =
        |ns: Option<&str>| ns.map_or_else(|| agent.kube_namespace.clone(), str::to_string);

    let output = match &args.command {
        InspectSubcommand::Describe { resource, name, ns } => {
            inspector.describe(resource, name, &namespace(ns.as_deref()))
        }
        InspectSubcommand::Logs { pod, ns, container } => {
            inspector.logs(pod, &namespace(ns.as_deref()), container.as_deref())
        }
        InspectSubcommand::Top { ns } => inspector.top(&namespace(ns.as_deref())),
    };
    println!("{output}");
    if output.starts_with("blocked: ") {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn parse_report_format(input: &str) -> Result<ReportFormat> {
    ReportFormat::parse(input)
        .ok_or_else(|| anyhow!("invalid format '{input}'; use 'markdown', 'plain' or 'json'"))
}
