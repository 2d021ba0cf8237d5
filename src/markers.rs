//! `<output>.done.json` sidecars recording that a pipeline step finished.
//!
//! A marker names the step, a fingerprint of what produced the output (the
//! command line and the content of every input file it read) and the sha256
//! of the output itself. The step is reused only while all three still match,
//! so a changed registrar, transform or input, or a replaced output, runs the
//! step again.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::tools::ToolInvocation;
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

const MARKER_SUFFIX: &str = ".done.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionMarker {
    pub step: String,
    pub fingerprint: String,
    pub output: String,
    pub sha256: String,
    pub completed_at: String,
}

pub fn marker_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(MARKER_SUFFIX);
    output.with_file_name(name)
}

pub fn read_marker(output: &Path) -> Option<CompletionMarker> {
    let raw = fs::read(marker_path(output)).ok()?;
    serde_json::from_slice(&raw).ok()
}

pub fn fingerprint<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update([0_u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a tool call: its rendered command line plus the sha256 of
/// every argument that names an existing file other than `output`.
pub fn invocation_fingerprint(invocation: &ToolInvocation, output: &Path) -> Result<String> {
    let mut parts = vec![invocation.render()];
    for arg in &invocation.args {
        let path = Path::new(arg);
        if path == output || !path.is_file() {
            continue;
        }
        let digest = sha256_file(path)
            .with_context(|| format!("failed to hash input {}", path.display()))?;
        parts.push(format!("{}={digest}", path.display()));
    }
    Ok(fingerprint(&parts))
}

pub fn is_complete(step: &str, fingerprint: &str, output: &Path) -> bool {
    let Some(marker) = read_marker(output) else {
        return false;
    };
    if marker.step != step || marker.fingerprint != fingerprint {
        debug!(path = %output.display(), step, recorded = %marker.step, "marker is for another invocation");
        return false;
    }
    if !output.is_file() {
        return false;
    }

    match sha256_file(output) {
        Ok(actual) if actual == marker.sha256 => true,
        Ok(_) => {
            debug!(path = %output.display(), step, "marker hash is stale");
            false
        }
        Err(_) => false,
    }
}

pub fn mark_complete(step: &str, fingerprint: &str, output: &Path) -> Result<CompletionMarker> {
    let marker = CompletionMarker {
        step: step.to_string(),
        fingerprint: fingerprint.to_string(),
        output: output.display().to_string(),
        sha256: sha256_file(output)?,
        completed_at: now_utc_string(),
    };
    write_json_pretty(&marker_path(output), &marker)?;
    Ok(marker)
}

/// Removes every marker below `root`; returns how many were removed.
pub fn clear_markers(root: &Path) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))? {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", root.display()))?
            .path();
        if path.is_dir() {
            removed += clear_markers(&path)?;
            continue;
        }
        let is_marker = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(MARKER_SUFFIX));
        if is_marker {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove marker {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
