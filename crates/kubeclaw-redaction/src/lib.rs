#![forbid(unsafe_code)]

//! Secret masking for anything that leaves a `kubectl` call: tool output,
//! recorded snapshots and rendered reports.

use std::sync::LazyLock;

use regex::Regex;

/// Hard limit on redacted output, counted in characters.
pub const MAX_OUTPUT_CHARS: usize = 20_000;
pub const TRUNCATION_MARKER: &str = "[TRUNCATED]";

const MAX_PASSES: usize = 4;

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("redaction pattern literal must compile")
}

static KEY_VALUE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        compile(r"(?i)(token:\s*)(\S+)"),
        compile(r"(?i)(password:\s*)(\S+)"),
        compile(r"(?i)(client-secret:\s*)(\S+)"),
    ]
});

static BEARER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(Bearer)\s+([A-Za-z0-9\-._~+/]+=*)"));

static JWT_LIKE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\beyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b"));

static PEM_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| compile(r"-----BEGIN [A-Z0-9 ]+-----[\s\S]*?-----END [A-Z0-9 ]+-----"));

static SECRET_BLOCK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^(\s*)(data|stringData):\s*$"));

/// Mask secret-shaped content and cap the output length.
///
/// Applying this twice yields the same text as applying it once.
#[must_use]
pub fn redact_text(text: &str) -> String {
    let mut current = redact_once(text);
    // A cut at the size limit can expose a fresh `token: ` prefix; settle it.
    for _ in 0..MAX_PASSES {
        let next = redact_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn redact_once(text: &str) -> String {
    let mut redacted = remove_secret_yaml_blocks(text);
    for pattern in KEY_VALUE_PATTERNS.iter() {
        redacted = pattern.replace_all(&redacted, "${1}[REDACTED]").into_owned();
    }
    redacted = BEARER_TOKEN
        .replace_all(&redacted, "${1} [REDACTED]")
        .into_owned();
    redacted = JWT_LIKE.replace_all(&redacted, "[REDACTED_JWT]").into_owned();
    redacted = PEM_BLOCK.replace_all(&redacted, "[REDACTED_PEM]").into_owned();
    truncate(redacted)
}

/// Collapse `data:` / `stringData:` mappings to a single redacted line.
fn remove_secret_yaml_blocks(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let Some(captures) = SECRET_BLOCK_HEADER.captures(line) else {
            out.push(line.to_string());
            i += 1;
            continue;
        };
        let indent = captures.get(1).map_or(0, |m| m.as_str().len());
        let key = captures.get(2).map_or("data", |m| m.as_str());
        out.push(format!("{}{key}: [REDACTED]", " ".repeat(indent)));
        i += 1;
        while i < lines.len() {
            let next = lines[i];
            if next.trim().is_empty() {
                i += 1;
                continue;
            }
            let next_indent = next.len() - next.trim_start_matches(' ').len();
            if next_indent <= indent {
                break;
            }
            i += 1;
        }
    }
    let mut joined = out.join("\n");
    if text.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

fn truncate(text: String) -> String {
    if text.chars().count() <= MAX_OUTPUT_CHARS {
        return text;
    }
    let keep = MAX_OUTPUT_CHARS.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
