use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{bail, Context, Result};
use kubeclaw_domain::hash_bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const SKILLS_INDEX_FILE: &str = ".skills-index.json";
pub const ENV_SKILLS_DIR: &str = "KUBECLAW_SKILLS_DIR";
pub const ENV_RUNTIME_SKILLS_DIR: &str = "KUBECLAW_RUNTIME_SKILLS_DIR";
const DEFAULT_SKILLS_DIR: &str = "skills";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillPaths {
    pub source_dir: PathBuf,
    pub runtime_dir: PathBuf,
}

impl SkillPaths {
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let source_dir = non_empty(ENV_SKILLS_DIR).unwrap_or_else(|| DEFAULT_SKILLS_DIR.to_string());
        let runtime_dir = match non_empty(ENV_RUNTIME_SKILLS_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => non_empty("HOME")
                .map_or_else(|| PathBuf::from(".kubeclaw"), |home| Path::new(&home).join(".kubeclaw"))
                .join("skills"),
        };
        Self {
            source_dir: PathBuf::from(source_dir),
            runtime_dir,
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillLoadResult {
    pub loaded_count: usize,
    pub copied_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SkillIndexEntry {
    sha256: String,
    mtime: f64,
}

/// Mirror `*.md` skills into the runtime directory, re-copying drifted files
/// and verifying each copy by digest.
///
/// # Errors
/// Returns an error when a file cannot be read or written, or when a copy
/// does not match its source digest.
pub fn sync_skills(paths: &SkillPaths) -> Result<SkillLoadResult> {
    if !paths.source_dir.is_dir() {
        debug!(source = %paths.source_dir.display(), "no skills directory");
        return Ok(SkillLoadResult {
            loaded_count: 0,
            copied_count: 0,
        });
    }
    fs::create_dir_all(&paths.runtime_dir)
        .with_context(|| format!("failed to create {}", paths.runtime_dir.display()))?;

    let index_path = paths.runtime_dir.join(SKILLS_INDEX_FILE);
    let prior = read_index(&index_path);
    let mut current = BTreeMap::new();
    let mut copied_count = 0;

    for source in markdown_files(&paths.source_dir)? {
        let Some(name) = source.file_name().and_then(|name| name.to_str()).map(str::to_string)
        else {
            continue;
        };
        let source_hash = hash_file(&source)?;
        let source_mtime = modified_seconds(&source)?;
        let target = paths.runtime_dir.join(&name);

        let drifted = match prior.get(&name) {
            Some(entry) => entry.sha256 != source_hash || entry.mtime < source_mtime,
            None => true,
        };
        if drifted || !target.exists() {
            fs::copy(&source, &target).with_context(|| {
                format!("failed to copy {} to {}", source.display(), target.display())
            })?;
            copied_count += 1;
        }
        if hash_file(&target)? != source_hash {
            bail!("skill checksum mismatch after copy: {name}");
        }
        current.insert(
            name,
            SkillIndexEntry {
                sha256: source_hash,
                mtime: source_mtime,
            },
        );
    }

    let body = serde_json::to_string_pretty(&current)?;
    fs::write(&index_path, body)
        .with_context(|| format!("failed to write {}", index_path.display()))?;
    Ok(SkillLoadResult {
        loaded_count: current.len(),
        copied_count,
    })
}

fn read_index(path: &Path) -> BTreeMap<String, SkillIndexEntry> {
    let Ok(body) = fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str(&body) {
        Ok(index) => index,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable skills index");
            BTreeMap::new()
        }
    }
}

fn markdown_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hash_bytes(&bytes))
}

fn modified_seconds(path: &Path) -> Result<f64> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn temp_paths() -> (PathBuf, SkillPaths) {
        let root = std::env::temp_dir().join(format!("kubeclaw-skills-{}", Ulid::new()));
        let paths = SkillPaths {
            source_dir: root.join("src"),
            runtime_dir: root.join("dst"),
        };
        (root, paths)
    }

    #[test]
    fn copies_then_skips_unchanged_skills() {
        let (root, paths) = temp_paths();
        must_ok(fs::create_dir_all(&paths.source_dir));
        must_ok(fs::write(paths.source_dir.join("01_test.md"), "# one\n"));
        must_ok(fs::write(paths.source_dir.join("02_test.md"), "# two\n"));
        must_ok(fs::write(paths.source_dir.join("notes.txt"), "ignored"));

        let first = must_ok(sync_skills(&paths));
        assert_eq!(first, SkillLoadResult { loaded_count: 2, copied_count: 2 });
        assert!(paths.runtime_dir.join("01_test.md").exists());
        assert!(!paths.runtime_dir.join("notes.txt").exists());

        let second = must_ok(sync_skills(&paths));
        assert_eq!(second, SkillLoadResult { loaded_count: 2, copied_count: 0 });

        let index: serde_json::Value = must_ok(serde_json::from_str(&must_ok(
            fs::read_to_string(paths.runtime_dir.join(SKILLS_INDEX_FILE)),
        )));
        assert_eq!(
            index["01_test.md"]["sha256"],
            serde_json::json!(hash_bytes(b"# one\n"))
        );

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn edited_skill_is_recopied() {
        let (root, paths) = temp_paths();
        must_ok(fs::create_dir_all(&paths.source_dir));
        must_ok(fs::write(paths.source_dir.join("triage.md"), "v1"));
        must_ok(sync_skills(&paths));

        must_ok(fs::write(paths.source_dir.join("triage.md"), "v2"));
        let result = must_ok(sync_skills(&paths));
        assert_eq!(result.copied_count, 1);
        assert_eq!(
            must_ok(fs::read_to_string(paths.runtime_dir.join("triage.md"))),
            "v2"
        );

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_source_loads_nothing() {
        let (root, paths) = temp_paths();
        let result = must_ok(sync_skills(&paths));
        assert_eq!(result, SkillLoadResult { loaded_count: 0, copied_count: 0 });
        assert!(!root.exists());
    }

    #[test]
    fn runtime_dir_prefers_override_then_home() {
        let paths = SkillPaths::from_lookup(|name| match name {
            ENV_RUNTIME_SKILLS_DIR => Some("/tmp/runtime".to_string()),
            _ => None,
        });
        assert_eq!(paths.runtime_dir, PathBuf::from("/tmp/runtime"));
        assert_eq!(paths.source_dir, PathBuf::from("skills"));

        let paths = SkillPaths::from_lookup(|name| match name {
            "HOME" => Some("/home/op".to_string()),
            ENV_SKILLS_DIR => Some("/opt/skills".to_string()),
            _ => None,
        });
        assert_eq!(paths.runtime_dir, PathBuf::from("/home/op/.kubeclaw/skills"));
        assert_eq!(paths.source_dir, PathBuf::from("/opt/skills"));
    }
}
