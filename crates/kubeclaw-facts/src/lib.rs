#![forbid(unsafe_code)]

//! Golden fact extraction and deterministic incident classification.
//!
//! Everything here is a pure function of its inputs and the supplied `now`.

use std::sync::LazyLock;

use kubeclaw_domain::{
    parse_rfc3339_utc, DateTimeUtc, FactBundle, GoldenFact, IncidentType, RawResult,
    NO_OUTPUT_MARKER,
};
use regex::Regex;
use time::Duration;

pub const DEFAULT_STALE_WINDOW_MINUTES: i64 = 30;

pub const CRASHLOOP_PATTERNS: &[&str] = &["back-off", "crashloopbackoff", "database_url"];
pub const IMAGEPULL_PATTERNS: &[&str] = &[
    "failed to pull image",
    "imagepull",
    "does-not-exist",
    "errimagepull",
];
pub const PENDING_PATTERNS: &[&str] = &[
    "failedscheduling",
    "insufficient cpu",
    "pending",
    "resourcequota",
];
pub const SERVICE_PATTERNS: &[&str] = &[
    "endpoints",
    "selector",
    "subsets: []",
    "service unreachable",
    "500",
];
pub const OOM_PATTERNS: &[&str] = &[
    "oomkilled",
    "exit code: 137",
    "readiness probe failed",
    "memory",
];

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("timestamp pattern literal must compile")
}

static ISO_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z"));

static AGE_TOKEN: LazyLock<Regex> = LazyLock::new(|| compile(r"(\d+)([smhd])"));

/// Keyword group that votes for `incident`. `Generic` has none.
#[must_use]
pub fn signal_patterns(incident: IncidentType) -> &'static [&'static str] {
    match incident {
        IncidentType::Crashloop => CRASHLOOP_PATTERNS,
        IncidentType::Imagepull => IMAGEPULL_PATTERNS,
        IncidentType::Pending => PENDING_PATTERNS,
        IncidentType::ServiceUnreachable => SERVICE_PATTERNS,
        IncidentType::Oom => OOM_PATTERNS,
        IncidentType::Generic => &[],
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FactOptions {
    pub now: DateTimeUtc,
    pub stale_window_minutes: i64,
    pub include_stale_evidence: bool,
}

impl FactOptions {
    /// Default staleness window, stale evidence excluded.
    #[must_use]
    pub fn at(now: DateTimeUtc) -> Self {
        Self {
            now,
            stale_window_minutes: DEFAULT_STALE_WINDOW_MINUTES,
            include_stale_evidence: false,
        }
    }
}

/// Turn raw tool output into a classified, staleness-filtered fact bundle.
#[must_use]
pub fn extract_fact_bundle(
    raw_results: &[RawResult],
    symptom: &str,
    options: &FactOptions,
) -> FactBundle {
    let now = options.now;
    let cutoff = minus_seconds(now, options.stale_window_minutes.max(1), 60);
    let mut facts = Vec::new();
    let mut excluded_stale_count = 0_usize;
    let mut tool_failures = 0_usize;

    for raw in raw_results {
        if raw.exit_code != 0 {
            tool_failures += 1;
        }
        for line in select_lines(&raw.text) {
            let timestamp = parse_timestamp(line, now);
            let stale = match (timestamp, cutoff) {
                (Some(stamp), Some(cutoff)) => stamp < cutoff,
                _ => false,
            };
            if stale && !options.include_stale_evidence {
                excluded_stale_count += 1;
                continue;
            }
            facts.push(GoldenFact {
                source: raw.source.clone(),
                text: line.to_string(),
                timestamp,
                stale,
            });
        }
    }

    let classification = classify_from_facts(&facts, symptom);
    let insufficient_evidence = raw_results.len() < 2
        || facts.len() < 2
        || facts
            .iter()
            .all(|fact| fact.text.trim().eq_ignore_ascii_case(NO_OUTPUT_MARKER));

    FactBundle {
        facts,
        excluded_stale_count,
        tool_failures,
        classification,
        insufficient_evidence,
    }
}

/// Lines matching any keyword group; the first line when none match.
fn select_lines(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let selected: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| is_golden_line(line))
        .collect();
    if selected.is_empty() {
        lines.into_iter().take(1).collect()
    } else {
        selected
    }
}

fn is_golden_line(line: &str) -> bool {
    let lowered = line.to_lowercase();
    IncidentType::SIGNALS
        .iter()
        .any(|incident| matches_any(&lowered, signal_patterns(*incident)))
}

fn matches_any(lowered: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| lowered.contains(pattern))
}

/// Evidence time for one line: an ISO-8601 UTC instant, else a relative age
/// token such as `2h` counted back from `now`.
#[must_use]
pub fn parse_timestamp(line: &str, now: DateTimeUtc) -> Option<DateTimeUtc> {
    if let Some(iso) = ISO_TIMESTAMP.find(line) {
        return parse_rfc3339_utc(iso.as_str()).ok();
    }

    let lowered = line.to_lowercase();
    let captures = AGE_TOKEN
        .captures_iter(&lowered)
        .find(|captures| captures.get(0).is_some_and(|m| is_bounded(&lowered, m.start(), m.end())))?;
    let value = captures.get(1)?.as_str().parse::<i64>().ok()?;
    let unit_seconds = match captures.get(2)?.as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return None,
    };
    minus_seconds(now, value, unit_seconds)
}

/// No word character directly before `start` or at `end`.
fn is_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn minus_seconds(now: DateTimeUtc, value: i64, unit_seconds: i64) -> Option<DateTimeUtc> {
    let seconds = value.checked_mul(unit_seconds)?;
    now.checked_sub(Duration::seconds(seconds))
}

/// Pick the incident class from retained facts, falling back to the symptom.
#[must_use]
pub fn classify_from_facts(facts: &[GoldenFact], symptom: &str) -> IncidentType {
    if !facts.is_empty() {
        let lowered: Vec<String> = facts.iter().map(|fact| fact.text.to_lowercase()).collect();
        let count = |incident: IncidentType| {
            lowered
                .iter()
                .filter(|line| matches_any(line, signal_patterns(incident)))
                .count()
        };
        if count(IncidentType::Oom) > 0 {
            return IncidentType::Oom;
        }
        let mut best: Option<(IncidentType, usize)> = None;
        for incident in IncidentType::SIGNALS {
            let hits = count(incident);
            // Strictly greater keeps the earlier category on ties.
            let leads = match best {
                Some((_, top)) => hits > top,
                None => hits > 0,
            };
            if leads {
                best = Some((incident, hits));
            }
        }
        if let Some((incident, _)) = best {
            return incident;
        }
    }
    classify_symptom(symptom)
}

/// Keyword fallback used when no fact carries a signal.
#[must_use]
pub fn classify_symptom(symptom: &str) -> IncidentType {
    let lowered = symptom.to_lowercase();
    if lowered.contains("crash") {
        IncidentType::Crashloop
    } else if lowered.contains("image") || lowered.contains("pull") {
        IncidentType::Imagepull
    } else if lowered.contains("pending") {
        IncidentType::Pending
    } else if lowered.contains("unreachable") || lowered.contains("service") {
        IncidentType::ServiceUnreachable
    } else if lowered.contains("oom") || lowered.contains("137") {
        IncidentType::Oom
    } else {
        IncidentType::Generic
    }
}
