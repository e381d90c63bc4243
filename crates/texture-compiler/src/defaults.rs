//! Texture attribute defaults, loaded once at startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Defaults file looked up in the working directory.
pub const DEFAULTS_FILENAME: &str = "texture_defaults.json";

#[derive(Debug, thiserror::Error)]
pub enum DefaultsError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Attribute values applied to any texture that does not set them.
///
/// Fields missing from a defaults file keep their built-in value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextureDefaults {
    #[serde(rename = "type")]
    pub texture_type: String,
    pub format: String,
    pub target: String,
    pub wrap_mode_s: String,
    pub wrap_mode_t: String,
    pub minify_filter: String,
    pub magnify_filter: String,
    pub border_mode: String,
    pub premultiplied_alpha: bool,
    pub force_power_of_two: bool,
    pub flip_y: bool,
    pub build_mipmaps: bool,
}

impl Default for TextureDefaults {
    fn default() -> Self {
        Self {
            texture_type: "COLOR".to_string(),
            format: "RGB".to_string(),
            target: "TEXTURE_2D".to_string(),
            wrap_mode_s: "CLAMP_TO_EDGE".to_string(),
            wrap_mode_t: "CLAMP_TO_EDGE".to_string(),
            minify_filter: "LINEAR".to_string(),
            magnify_filter: "LINEAR".to_string(),
            border_mode: "CLAMP".to_string(),
            premultiplied_alpha: false,
            force_power_of_two: false,
            flip_y: true,
            build_mipmaps: false,
        }
    }
}

impl TextureDefaults {
    /// Read a defaults file.
    pub fn read(path: &Path) -> Result<Self, DefaultsError> {
        let json = fs::read_to_string(path).map_err(|source| DefaultsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| DefaultsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read a defaults file, falling back to the built-ins if it cannot be used.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(defaults) => {
                tracing::debug!(path = %path.display(), "Loaded texture defaults");
                defaults
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load texture defaults, using built-ins");
                Self::default()
            }
        }
    }

    /// Defaults as a JSON object, keyed by attribute name.
    pub fn to_attributes(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}
