//! Per-build bookkeeping: errors, outputs and references of one compile.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::paths::resolve;

/// Inputs to one compile operation.
///
/// On the wire this is the `BuildRequest` payload; `via_channel` is not
/// transmitted and is set by whoever builds the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub source_path: PathBuf,
    /// Target artifact path without the worker-specific extension.
    pub target_path: PathBuf,
    #[serde(default)]
    pub platform: String,
    #[serde(skip)]
    pub via_channel: bool,
}

impl BuildRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            platform: platform.into(),
            via_channel: false,
        }
    }

    /// Best-effort request from a payload that failed to decode.
    ///
    /// Missing or non-string fields become empty, so a failed build can
    /// still be opened and answered.
    pub fn from_partial(payload: &serde_json::Value) -> Self {
        Self::new(
            text_field(payload, "sourcePath"),
            text_field(payload, "targetPath"),
            text_field(payload, "platform"),
        )
    }

    /// Same request, marked as received over the IPC channel.
    pub fn over_channel(self) -> Self {
        Self {
            via_channel: true,
            ..self
        }
    }

    /// Empty or `generic` platform means a platform-agnostic build.
    pub fn is_generic(&self) -> bool {
        self.platform.is_empty() || self.platform == "generic"
    }
}

/// Snapshot of a closed [`BuildState`], sent back to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub platform: String,
    pub success: bool,
    pub errors: Vec<String>,
    pub outputs: Vec<PathBuf>,
    pub references: Vec<PathBuf>,
}

/// Accumulator for a single build.
///
/// `success` starts true and is cleared for good by the first error. Output
/// and reference paths are absolute and kept in insertion order without
/// duplicates.
#[derive(Debug)]
pub struct BuildState {
    success: bool,
    source_path: PathBuf,
    target_path: PathBuf,
    platform: String,
    reply_pending: bool,
    errors: Vec<String>,
    outputs: IndexSet<PathBuf>,
    references: IndexSet<PathBuf>,
}

impl BuildState {
    /// Start a build, resolving the request paths against `working_dir`.
    pub fn open(request: BuildRequest, working_dir: &Path) -> Self {
        Self {
            success: true,
            source_path: resolve(working_dir, &request.source_path),
            target_path: resolve(working_dir, &request.target_path),
            platform: request.platform,
            reply_pending: request.via_channel,
            errors: Vec::new(),
            outputs: IndexSet::new(),
            references: IndexSet::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn reply_pending(&self) -> bool {
        self.reply_pending
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn outputs(&self) -> impl ExactSizeIterator<Item = &Path> {
        self.outputs.iter().map(PathBuf::as_path)
    }

    pub fn references(&self) -> impl ExactSizeIterator<Item = &Path> {
        self.references.iter().map(PathBuf::as_path)
    }

    /// Record an error. The build can no longer succeed.
    pub fn add_error(&mut self, error: impl Display) {
        self.success = false;
        self.errors.push(error.to_string());
    }

    /// Record an output file, relative to the target's directory.
    ///
    /// Returns the absolute path; adding a path twice keeps the first entry.
    pub fn add_output(&mut self, path: impl AsRef<Path>) -> PathBuf {
        let dir = self.target_path.parent().unwrap_or(self.target_path.as_path());
        insert_resolved(&mut self.outputs, resolve(dir, path.as_ref()))
    }

    /// Record an input file, relative to the source's directory.
    ///
    /// The cache invalidates this build when any reference changes.
    pub fn add_reference(&mut self, path: impl AsRef<Path>) -> PathBuf {
        let dir = self.source_path.parent().unwrap_or(self.source_path.as_path());
        insert_resolved(&mut self.references, resolve(dir, path.as_ref()))
    }

    /// Finish the build.
    ///
    /// Returns the result to send to the cache the first time it is called on
    /// a channel build; `None` afterwards and for command-line builds.
    pub fn close(&mut self) -> Option<BuildResult> {
        if !std::mem::take(&mut self.reply_pending) {
            return None;
        }
        Some(self.snapshot())
    }

    /// Current state as a [`BuildResult`], without consuming the reply.
    pub fn snapshot(&self) -> BuildResult {
        BuildResult {
            source_path: self.source_path.clone(),
            target_path: self.target_path.clone(),
            platform: self.platform.clone(),
            success: self.success,
            errors: self.errors.clone(),
            outputs: self.outputs.iter().cloned().collect(),
            references: self.references.iter().cloned().collect(),
        }
    }
}

fn text_field<'a>(payload: &'a serde_json::Value, name: &str) -> &'a str {
    payload.get(name).and_then(serde_json::Value::as_str).unwrap_or_default()
}

fn insert_resolved(set: &mut IndexSet<PathBuf>, path: PathBuf) -> PathBuf {
    let (index, _) = set.insert_full(path);
    set[index].clone()
}
