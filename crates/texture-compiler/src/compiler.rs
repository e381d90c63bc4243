//! Texture worker: carries source pixels to the target and describes them.

use std::io;
use std::path::PathBuf;

use datacompiler::{BuildState, CompileError, CompileOutput, Compiler, copy_file, is_file};
use serde_json::Value;

use crate::attributes::resolve_attributes;
use crate::defaults::TextureDefaults;

/// Texture worker.
///
/// Pixel processing is left to the runtime loader: the source image is
/// carried to the target unchanged and the resolved attributes are written
/// next to it as the `.texture` descriptor.
#[derive(Debug, Clone, Default)]
pub struct TextureCompiler {
    defaults: TextureDefaults,
}

impl TextureCompiler {
    pub const VERSION: u32 = 1;

    pub fn new(defaults: TextureDefaults) -> Self {
        Self { defaults }
    }
}

impl Compiler for TextureCompiler {
    fn name(&self) -> &str {
        "texture"
    }

    fn version(&self) -> u32 {
        Self::VERSION
    }

    fn output_extension(&self) -> &str {
        "pixels"
    }

    fn metadata_extension(&self) -> Option<&str> {
        Some("texture")
    }

    fn attributes(&self, state: &mut BuildState) -> Result<Value, CompileError> {
        resolve_attributes(&self.defaults, state)
    }

    fn compile(&self, attributes: Value) -> Result<CompileOutput, CompileError> {
        let source = path_attribute(&attributes, "sourcePath")?;
        let target = path_attribute(&attributes, "targetPath")?;

        if !is_file(&source) {
            return Err(CompileError::read(
                source,
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }
        let bytes = copy_file(&source, &target).map_err(|e| CompileError::write(&target, e))?;
        tracing::debug!(
            source_path = %source.display(),
            target_path = %target.display(),
            bytes,
            "Wrote texture pixels"
        );

        Ok(CompileOutput {
            metadata: attributes,
            outputs: vec![target],
            references: Vec::new(),
        })
    }
}

fn path_attribute(attributes: &Value, name: &str) -> Result<PathBuf, CompileError> {
    attributes
        .get(name)
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| CompileError::invalid_attribute(name, "expected a path"))
}
