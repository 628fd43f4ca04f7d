#![forbid(unsafe_code)]

//! Live / record / replay execution of tool calls.
//!
//! A recorded session lives in `<root>/<session_id>/`: one JSON snapshot per
//! call plus a `metadata.json` manifest listing the calls in order. Replay
//! consumes that manifest as a strict script and never executes anything.
//! Steps the policy gate refused while recording are kept in the manifest too,
//! so a replayed run is refused at the same points.

use std::fs;
use std::path::{Path, PathBuf};

use kubeclaw_domain::{
    compact_stamp, compact_stamp_micros, format_rfc3339, hash_bytes, now_utc, RecordedCall,
    RecordedRejection, ReplayMode, ReplaySession, ToolResult,
};
use kubeclaw_redaction::redact_text;
use serde_json::Value;
use tracing::{debug, info, warn};
use ulid::Ulid;

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay metadata not found: {0}")]
    ManifestMissing(PathBuf),
    #[error("replay exhausted: no more recorded tool calls")]
    Exhausted,
    #[error("replay mismatch: expected tool '{expected}' but got '{actual}'")]
    Mismatch { expected: String, actual: String },
    #[error("replay integrity: snapshot '{snapshot}' has sha256 {actual}, manifest expects {expected}")]
    DigestMismatch {
        snapshot: String,
        expected: String,
        actual: String,
    },
    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),
    #[error("invalid snapshot name '{0}' in manifest")]
    InvalidSnapshotName(String),
    #[error("replay i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("replay json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to stamp recording: {0}")]
    Timestamp(String),
    /// Not a failure of the recording: the step was refused when it was
    /// recorded and is refused again.
    #[error("recorded rejection of '{tool}': {reason}")]
    Rejected {
        tool: String,
        reason: String,
        halted: bool,
    },
}

/// `YYYYMMDDTHHMMSSZ-xxxx` with a random 16-bit hex suffix.
///
/// # Errors
/// Returns [`ReplayError::Timestamp`] if the clock cannot be formatted.
pub fn generate_session_id() -> Result<String, ReplayError> {
    let stamp = compact_stamp(now_utc()).map_err(|err| ReplayError::Timestamp(err.to_string()))?;
    let suffix = u16::try_from(Ulid::new().random() & 0xffff).unwrap_or_default();
    Ok(format!("{stamp}-{suffix:04x}"))
}

#[derive(Debug)]
pub struct ReplayHarness {
    root: PathBuf,
    mode: ReplayMode,
    session: ReplaySession,
    cursor: usize,
    rejection_cursor: usize,
}

impl ReplayHarness {
    /// Open a harness. Record mode creates the session directory and an empty
    /// manifest; replay mode loads the existing manifest.
    ///
    /// # Errors
    /// Returns [`ReplayError`] when the session id is unusable, the manifest
    /// is missing or malformed, or the session directory cannot be written.
    pub fn new(
        root: impl Into<PathBuf>,
        mode: ReplayMode,
        session_id: Option<String>,
    ) -> Result<Self, ReplayError> {
        let session_id = match session_id {
            Some(id) => id,
            None => generate_session_id()?,
        };
        if !is_plain_name(&session_id) {
            return Err(ReplayError::InvalidSessionId(session_id));
        }

        let mut harness = Self {
            root: root.into(),
            mode,
            session: ReplaySession {
                session_id,
                mode,
                created_at: None,
                calls: Vec::new(),
                rejections: Vec::new(),
            },
            cursor: 0,
            rejection_cursor: 0,
        };

        match mode {
            ReplayMode::Live => {}
            ReplayMode::Record => {
                harness.session.created_at = Some(
                    format_rfc3339(now_utc()).map_err(|err| ReplayError::Timestamp(err.to_string()))?,
                );
                create_dir(&harness.session_dir())?;
                harness.write_manifest()?;
                info!(session_id = %harness.session.session_id, "recording session");
            }
            ReplayMode::Replay => {
                // The directory name is the session identity; the id stored in
                // the manifest is informational and never resolves a path.
                let manifest = load_manifest(&harness.metadata_path())?;
                if manifest.session_id != harness.session.session_id {
                    debug!(
                        requested = %harness.session.session_id,
                        stored = %manifest.session_id,
                        "manifest session id differs from its directory"
                    );
                }
                harness.session.created_at = manifest.created_at;
                harness.session.calls = manifest.calls;
                harness.session.rejections = manifest.rejections;
                debug!(
                    session_id = %harness.session.session_id,
                    calls = harness.session.calls.len(),
                    rejections = harness.session.rejections.len(),
                    "replaying session"
                );
            }
        }
        Ok(harness)
    }

    #[must_use]
    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    #[must_use]
    pub fn session(&self) -> &ReplaySession {
        &self.session
    }

    #[must_use]
    pub fn session_dir(&self) -> PathBuf {
        self.root.join(&self.session.session_id)
    }

    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.session_dir().join(METADATA_FILE)
    }

    /// Run one tool call in the harness mode.
    ///
    /// `live` is invoked in live and record modes only. Record mode returns
    /// the redacted result it persisted.
    ///
    /// # Errors
    /// Propagates errors from `live`, and [`ReplayError`]s converted into `E`.
    pub fn execute<F, E>(&mut self, tool: &str, args: &Value, live: F) -> Result<ToolResult, E>
    where
        F: FnOnce() -> Result<ToolResult, E>,
        E: From<ReplayError>,
    {
        match self.mode {
            ReplayMode::Live => live(),
            ReplayMode::Record => {
                let result = live()?;
                Ok(self.record(tool, args, &result)?)
            }
            ReplayMode::Replay => Ok(self.replay(tool)?),
        }
    }

    /// Persist a step the policy gate refused. Only record mode keeps it.
    ///
    /// # Errors
    /// Returns [`ReplayError`] when the manifest cannot be rewritten.
    pub fn record_rejection(
        &mut self,
        tool: &str,
        args: &Value,
        reason: &str,
        halted: bool,
    ) -> Result<(), ReplayError> {
        if self.mode != ReplayMode::Record {
            return Ok(());
        }
        let timestamp =
            format_rfc3339(now_utc()).map_err(|err| ReplayError::Timestamp(err.to_string()))?;
        let after_calls = self.session.calls.len();
        self.session.rejections.push(RecordedRejection {
            after_calls,
            tool: tool.to_string(),
            args: args.clone(),
            reason: redact_text(reason),
            halted,
            timestamp,
        });
        self.write_manifest()?;
        info!(after_calls, tool, halted, "recorded step rejection");
        Ok(())
    }

    fn record(&mut self, tool: &str, args: &Value, result: &ToolResult) -> Result<ToolResult, ReplayError> {
        let now = now_utc();
        let stamp = compact_stamp_micros(now).map_err(|err| ReplayError::Timestamp(err.to_string()))?;
        let timestamp = format_rfc3339(now).map_err(|err| ReplayError::Timestamp(err.to_string()))?;
        let index = self.session.calls.len();
        let snapshot = format!("{index:03}_{}_{stamp}.json", file_safe(tool));

        let redacted = result.clone().map_streams(redact_text);
        let path = self.session_dir().join(&snapshot);
        let bytes = serde_json::to_vec_pretty(&redacted).map_err(|source| ReplayError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, &bytes).map_err(|source| ReplayError::Io {
            path: path.clone(),
            source,
        })?;

        self.session.calls.push(RecordedCall {
            index,
            tool: tool.to_string(),
            args: args.clone(),
            snapshot: snapshot.clone(),
            timestamp,
            snapshot_sha256: Some(hash_bytes(&bytes)),
        });
        self.write_manifest()?;
        info!(index, tool, snapshot = %snapshot, "recorded tool call");
        Ok(redacted)
    }

    fn replay(&mut self, tool: &str) -> Result<ToolResult, ReplayError> {
        if let Some(rejection) = self
            .session
            .rejections
            .get(self.rejection_cursor)
            .filter(|rejection| rejection.after_calls == self.cursor)
        {
            if rejection.tool != tool {
                return Err(ReplayError::Mismatch {
                    expected: rejection.tool.clone(),
                    actual: tool.to_string(),
                });
            }
            let rejected = ReplayError::Rejected {
                tool: rejection.tool.clone(),
                reason: rejection.reason.clone(),
                halted: rejection.halted,
            };
            self.rejection_cursor += 1;
            debug!(tool, "replayed step rejection");
            return Err(rejected);
        }

        let Some(call) = self.session.calls.get(self.cursor) else {
            return Err(ReplayError::Exhausted);
        };
        if call.tool != tool {
            return Err(ReplayError::Mismatch {
                expected: call.tool.clone(),
                actual: tool.to_string(),
            });
        }
        if !is_plain_name(&call.snapshot) {
            return Err(ReplayError::InvalidSnapshotName(call.snapshot.clone()));
        }

        let path = self.session_dir().join(&call.snapshot);
        let bytes = fs::read(&path).map_err(|source| ReplayError::Io {
            path: path.clone(),
            source,
        })?;
        if let Some(expected) = &call.snapshot_sha256 {
            let actual = hash_bytes(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                warn!(snapshot = %call.snapshot, "snapshot digest mismatch");
                return Err(ReplayError::DigestMismatch {
                    snapshot: call.snapshot.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        let result: ToolResult =
            serde_json::from_slice(&bytes).map_err(|source| ReplayError::Json { path, source })?;
        self.cursor += 1;
        debug!(index = call.index, tool, "replayed tool call");
        Ok(result)
    }

    /// Rewrite `metadata.json` through a temporary file and a rename.
    fn write_manifest(&self) -> Result<(), ReplayError> {
        let path = self.metadata_path();
        let tmp = self.session_dir().join(format!("{METADATA_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(&self.session).map_err(|source| ReplayError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, bytes).map_err(|source| ReplayError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| ReplayError::Io { path, source })
    }
}

/// Read a session manifest from disk.
///
/// # Errors
/// Returns [`ReplayError::ManifestMissing`] when the file does not exist and
/// I/O or JSON errors otherwise.
pub fn load_manifest(path: &Path) -> Result<ReplaySession, ReplayError> {
    if !path.exists() {
        return Err(ReplayError::ManifestMissing(path.to_path_buf()));
    }
    let body = fs::read(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|source| ReplayError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir(path: &Path) -> Result<(), ReplayError> {
    fs::create_dir_all(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// A single path component: no separators, not `.` or `..`.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

fn file_safe(tool: &str) -> String {
    tool.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn temp_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kubeclaw-replay-{label}-{}", Ulid::new()))
    }

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn live_ok(stdout: &str) -> impl FnOnce() -> Result<ToolResult, ReplayError> + '_ {
        move || Ok(ToolResult::new(stdout, "", 0))
    }

    #[test]
    fn record_writes_redacted_snapshot_and_manifest() {
        let root = temp_root("record");
        let mut harness = must_ok(ReplayHarness::new(
            &root,
            ReplayMode::Record,
            Some("sess-a".to_string()),
        ));
        let result = must_ok(harness.execute("events_tail", &json!({"ns": "demo"}), live_ok("token: abc")));
        assert_eq!(result.stdout, "token: [REDACTED]");

        let session = must_ok(load_manifest(&root.join("sess-a").join(METADATA_FILE)));
        assert_eq!(session.mode, ReplayMode::Record);
        assert!(session.created_at.is_some());
        assert_eq!(session.calls.len(), 1);
        let call = &session.calls[0];
        assert!(call.snapshot.starts_with("000_events_tail_"));
        assert!(call.snapshot.ends_with(".json"));

        let bytes = must_ok(fs::read(root.join("sess-a").join(&call.snapshot)));
        assert_eq!(call.snapshot_sha256.as_deref(), Some(hash_bytes(&bytes).as_str()));
        let payload: ToolResult = must_ok(serde_json::from_slice(&bytes));
        assert!(!payload.stdout.contains("abc"));
        assert!(!root.join("sess-a").join("metadata.json.tmp").exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn replay_returns_recorded_output_without_running_live() {
        let root = temp_root("roundtrip");
        let mut recorder = must_ok(ReplayHarness::new(&root, ReplayMode::Record, Some("sess-b".into())));
        must_ok(recorder.execute("events_tail", &json!({"ns": "demo"}), live_ok("ok")));
        must_ok(recorder.execute("describe_pod", &json!({"ns": "demo", "pod": "x"}), live_ok("Reason: OOMKilled")));

        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("sess-b".into())));
        let first = must_ok(replay.execute("events_tail", &json!({"ns": "other"}), || -> Result<ToolResult, ReplayError> {
            panic!("replay must not execute live")
        }));
        assert_eq!(first, ToolResult::new("ok", "", 0));
        let second = must_ok(replay.execute("describe_pod", &json!({}), live_ok("wrong")));
        assert_eq!(second.stdout, "Reason: OOMKilled");

        let exhausted = replay.execute("top_pod", &json!({}), live_ok("wrong"));
        assert!(matches!(exhausted, Err(ReplayError::Exhausted)));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn mismatch_does_not_advance_the_cursor() {
        let root = temp_root("mismatch");
        let mut recorder = must_ok(ReplayHarness::new(&root, ReplayMode::Record, Some("sess-c".into())));
        must_ok(recorder.execute("events_tail", &json!({}), live_ok("ok")));

        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("sess-c".into())));
        match replay.execute("logs", &json!({}), live_ok("wrong")) {
            Err(err) => assert_eq!(
                err.to_string(),
                "replay mismatch: expected tool 'events_tail' but got 'logs'"
            ),
            Ok(_) => panic!("expected mismatch"),
        }
        assert!(replay.execute("events_tail", &json!({}), live_ok("wrong")).is_ok());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn tampered_snapshot_fails_integrity_check() {
        let root = temp_root("tamper");
        let mut recorder = must_ok(ReplayHarness::new(&root, ReplayMode::Record, Some("sess-d".into())));
        must_ok(recorder.execute("events_tail", &json!({}), live_ok("ok")));
        let snapshot = recorder.session().calls[0].snapshot.clone();
        must_ok(fs::write(
            root.join("sess-d").join(snapshot),
            r#"{"stdout":"forged","stderr":"","exit_code":0}"#,
        ));

        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("sess-d".into())));
        let result = replay.execute("events_tail", &json!({}), live_ok("wrong"));
        assert!(matches!(result, Err(ReplayError::DigestMismatch { .. })));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let root = temp_root("missing");
        match ReplayHarness::new(&root, ReplayMode::Replay, Some("nope".into())) {
            Err(err) => assert!(err.to_string().starts_with("replay metadata not found: ")),
            Ok(_) => panic!("expected missing manifest"),
        }
    }

    #[test]
    fn live_mode_persists_nothing() {
        let root = temp_root("live");
        let mut harness = must_ok(ReplayHarness::new(&root, ReplayMode::Live, None));
        let result = must_ok(harness.execute("events_tail", &json!({}), live_ok("token: raw")));
        assert_eq!(result.stdout, "token: raw");
        assert!(!root.exists());
    }

    #[test]
    fn session_ids_are_generated_and_validated() {
        let id = must_ok(generate_session_id());
        let (stamp, suffix) = id.split_once('-').unwrap_or_else(|| panic!("bad id {id}"));
        assert_eq!(stamp.len(), 16);
        assert!(stamp.ends_with('Z'));
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let root = temp_root("badid");
        let result = ReplayHarness::new(&root, ReplayMode::Record, Some("../escape".into()));
        assert!(matches!(result, Err(ReplayError::InvalidSessionId(_))));
    }

    #[test]
    fn manifest_without_digests_still_replays() {
        let root = temp_root("legacy");
        let dir = root.join("legacy");
        must_ok(fs::create_dir_all(&dir));
        must_ok(fs::write(dir.join("000_logs.json"), r#"{"stdout":"old"}"#));
        must_ok(fs::write(
            dir.join(METADATA_FILE),
            r#"{"session_id":"legacy","mode":"record","calls":[
                {"index":0,"tool":"logs","args":{},"snapshot":"000_logs.json","timestamp":"2026-01-01T00:00:00Z"}]}"#,
        ));
        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("legacy".into())));
        let result = must_ok(replay.execute("logs", &json!({}), live_ok("wrong")));
        assert_eq!(result, ToolResult::new("old", "", 0));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn renamed_session_directory_replays_under_its_new_name() {
        let root = temp_root("renamed");
        let mut recorder = must_ok(ReplayHarness::new(&root, ReplayMode::Record, Some("orig".into())));
        must_ok(recorder.execute("events_tail", &json!({}), live_ok("recorded")));
        must_ok(fs::rename(root.join("orig"), root.join("fixture")));

        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("fixture".into())));
        assert_eq!(replay.session_id(), "fixture");
        assert_eq!(replay.session_dir(), root.join("fixture"));
        let result = must_ok(replay.execute("events_tail", &json!({}), live_ok("wrong")));
        assert_eq!(result.stdout, "recorded");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn manifest_session_id_never_leaves_the_snapshots_root() {
        let base = temp_root("escape");
        let root = base.join("snap");
        let inside = root.join("fixture");
        let outside = base.join("outside");
        must_ok(fs::create_dir_all(&inside));
        must_ok(fs::create_dir_all(&outside));
        must_ok(fs::write(inside.join("000_logs.json"), r#"{"stdout":"inside"}"#));
        must_ok(fs::write(outside.join("000_logs.json"), r#"{"stdout":"outside"}"#));
        must_ok(fs::write(
            inside.join(METADATA_FILE),
            r#"{"session_id":"../outside","mode":"record","calls":[
                {"index":0,"tool":"logs","args":{},"snapshot":"000_logs.json","timestamp":"2026-01-01T00:00:00Z"}]}"#,
        ));

        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("fixture".into())));
        assert_eq!(replay.session_dir(), inside);
        let result = must_ok(replay.execute("logs", &json!({}), live_ok("wrong")));
        assert_eq!(result.stdout, "inside");
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn recorded_rejections_replay_in_order() {
        let root = temp_root("rejections");
        let mut recorder = must_ok(ReplayHarness::new(&root, ReplayMode::Record, Some("sess-r".into())));
        must_ok(recorder.execute("events_tail", &json!({}), live_ok("ok")));
        must_ok(recorder.record_rejection("logs", &json!({}), "tool call limit exceeded: max 1 calls per run", true));

        let manifest = must_ok(load_manifest(&root.join("sess-r").join(METADATA_FILE)));
        assert_eq!(manifest.rejections.len(), 1);
        assert_eq!(manifest.rejections[0].after_calls, 1);
        assert!(manifest.rejections[0].halted);

        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("sess-r".into())));
        must_ok(replay.execute("events_tail", &json!({}), live_ok("wrong")));
        match replay.execute("logs", &json!({}), live_ok("wrong")) {
            Err(ReplayError::Rejected { tool, reason, halted }) => {
                assert_eq!(tool, "logs");
                assert_eq!(reason, "tool call limit exceeded: max 1 calls per run");
                assert!(halted);
            }
            other => panic!("expected a recorded rejection, got {other:?}"),
        }
        assert!(matches!(
            replay.execute("logs", &json!({}), live_ok("wrong")),
            Err(ReplayError::Exhausted)
        ));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn rejection_for_a_different_tool_is_a_mismatch() {
        let root = temp_root("rejection-mismatch");
        let mut recorder = must_ok(ReplayHarness::new(&root, ReplayMode::Record, Some("sess-m".into())));
        must_ok(recorder.record_rejection("describe_pod", &json!({}), "namespace is required", false));
        must_ok(recorder.execute("events_tail", &json!({}), live_ok("ok")));

        let mut replay = must_ok(ReplayHarness::new(&root, ReplayMode::Replay, Some("sess-m".into())));
        match replay.execute("events_tail", &json!({}), live_ok("wrong")) {
            Err(err) => assert_eq!(
                err.to_string(),
                "replay mismatch: expected tool 'describe_pod' but got 'events_tail'"
            ),
            Ok(_) => panic!("expected mismatch"),
        }
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn live_mode_ignores_rejections() {
        let root = temp_root("live-rejection");
        let mut harness = must_ok(ReplayHarness::new(&root, ReplayMode::Live, None));
        must_ok(harness.record_rejection("logs", &json!({}), "namespace is required", false));
        assert!(harness.session().rejections.is_empty());
        assert!(!root.exists());
    }
}
