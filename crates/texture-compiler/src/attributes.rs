//! Texture attribute resolution.
//!
//! A build source is either an image, compiled with the defaults, or a JSON
//! attribute document naming the image in its `sourcePath` field.

use std::fs;
use std::path::Path;

use datacompiler::{BuildState, CompileError, is_file, parse_resource_path};
use serde_json::{Map, Value};

use crate::defaults::TextureDefaults;

/// Resource types read directly as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["psd", "png", "jpg", "jpeg", "tga", "bmp", "gif", "hdr", "pic"];

pub fn is_image(path: &Path) -> bool {
    if path.extension().is_none() {
        return false;
    }
    let resource_type = parse_resource_path(&path.to_string_lossy())
        .resource_type
        .to_lowercase();
    IMAGE_EXTENSIONS.contains(&resource_type.as_str())
}

/// Resolve the attributes for the build's source, recording the image it
/// reads as a reference.
pub fn resolve_attributes(
    defaults: &TextureDefaults,
    state: &mut BuildState,
) -> Result<Value, CompileError> {
    let source = state.source_path().to_path_buf();
    let mut attributes = if is_image(&source) {
        let mut attributes = defaults.to_attributes();
        let image = state.add_reference(&source);
        attributes.insert("sourcePath".into(), path_value(&image));
        attributes
    } else {
        let mut attributes = read_document(&source)?;
        for (name, value) in defaults.to_attributes() {
            attributes.entry(name).or_insert(value);
        }
        let image = match attributes.get("sourcePath").and_then(Value::as_str) {
            Some(image) => state.add_reference(image),
            None => {
                return Err(CompileError::invalid_attribute(
                    "sourcePath",
                    format!("missing from {}", source.display()),
                ));
            }
        };
        if !is_file(&image) {
            return Err(CompileError::invalid_attribute(
                "sourcePath",
                format!("{} is not a file", image.display()),
            ));
        }
        attributes.insert("sourcePath".into(), path_value(&image));
        attributes
    };

    let build_mipmaps = attributes
        .get("buildMipmaps")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    attributes.insert("targetPath".into(), path_value(state.target_path()));
    attributes
        .entry("levelCount")
        .or_insert(Value::from(if build_mipmaps { 0 } else { 1 }));
    attributes.entry("targetWidth").or_insert(Value::from(0));
    attributes.entry("targetHeight").or_insert(Value::from(0));

    Ok(Value::Object(attributes))
}

fn read_document(path: &Path) -> Result<Map<String, Value>, CompileError> {
    let json = fs::read_to_string(path).map_err(|e| CompileError::read(path, e))?;
    serde_json::from_str(&json).map_err(|source| CompileError::Attributes {
        path: path.to_path_buf(),
        source,
    })
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}
