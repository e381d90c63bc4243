//! Texture data compiler.
//!
//! Resolves texture attributes from an image or a JSON attribute document,
//! carries the pixels to the build target and writes a `.texture` descriptor.

mod attributes;
mod compiler;
mod defaults;

pub use attributes::{IMAGE_EXTENSIONS, is_image, resolve_attributes};
pub use compiler::TextureCompiler;
pub use defaults::{DEFAULTS_FILENAME, DefaultsError, TextureDefaults};
