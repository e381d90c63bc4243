//! Compiler capability supplied by each worker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::build_state::BuildState;

/// Version reported to the cache by a compiler that does not override
/// [`Compiler::version`].
pub const DEFAULT_COMPILER_VERSION: u32 = 1;

/// Errors raised while resolving attributes or compiling.
///
/// None of these escape a build: the orchestrator records them on the
/// [`BuildState`] and the build is reported as failed.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("malformed attributes in {}: {source}", path.display())]
    Attributes {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {name} attribute: {message}")]
    InvalidAttribute { name: String, message: String },

    #[error("{0}")]
    Failed(String),
}

impl CompileError {
    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_attribute(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// What a successful compile produced.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Written next to the target when [`Compiler::metadata_extension`] is set.
    pub metadata: serde_json::Value,
    /// Files written, relative paths are taken from the target's directory.
    pub outputs: Vec<PathBuf>,
    /// Extra inputs consulted, relative paths are taken from the source's directory.
    pub references: Vec<PathBuf>,
}

/// Worker-specific compile capability.
///
/// One instance is handed to the [`Orchestrator`](crate::Orchestrator) at
/// startup and shared, read-only, by every build the worker runs.
pub trait Compiler: Send + Sync + 'static {
    /// Short worker name, used in logs.
    fn name(&self) -> &str;

    /// Version number the cache uses to detect stale compiled output.
    fn version(&self) -> u32 {
        DEFAULT_COMPILER_VERSION
    }

    /// Extension given to the default one-shot output path.
    fn output_extension(&self) -> &str;

    /// Extension of the metadata descriptor written next to the target.
    fn metadata_extension(&self) -> Option<&str> {
        None
    }

    /// Derive the compile attributes for the build's source file.
    ///
    /// Every file read here must be recorded with [`BuildState::add_reference`].
    fn attributes(&self, state: &mut BuildState) -> Result<serde_json::Value, CompileError>;

    /// Run the transformation.
    fn compile(&self, attributes: serde_json::Value) -> Result<CompileOutput, CompileError>;
}

/// Write `metadata` as tab-indented JSON with a trailing newline.
pub fn write_metadata(path: &Path, metadata: &impl Serialize) -> Result<(), CompileError> {
    let mut json = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut json, PrettyFormatter::with_indent(b"\t"));
    metadata
        .serialize(&mut serializer)
        .map_err(|e| CompileError::write(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
    json.push(b'\n');

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| CompileError::write(parent, e))?;
    }
    fs::write(path, json).map_err(|e| CompileError::write(path, e))
}
