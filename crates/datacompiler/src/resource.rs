//! Resource path convention.
//!
//! Source files carry their resource type in the final extension and an
//! optional property list in the dot-separated segments before it:
//! `model.diffuse.normal.png` is a `png` resource with properties
//! `["diffuse", "normal"]`.

use serde::{Deserialize, Serialize};

/// Resource type and property list extracted from a filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub resource_type: String,
    /// Never empty: a name without properties yields `[""]`.
    pub properties: Vec<String>,
}

/// Parse the base name of `path` into a [`ResourceDescriptor`].
pub fn parse_resource_path(path: &str) -> ResourceDescriptor {
    let base = match path.rfind(std::path::is_separator) {
        Some(sep) => &path[sep + 1..],
        None => path,
    };

    let (Some(first), Some(last)) = (base.find('.'), base.rfind('.')) else {
        return ResourceDescriptor {
            resource_type: base.to_string(),
            properties: vec![String::new()],
        };
    };

    let properties = if first == last {
        vec![String::new()]
    } else {
        base[first + 1..last].split('.').map(str::to_string).collect()
    };

    ResourceDescriptor {
        resource_type: base[last + 1..].to_string(),
        properties,
    }
}
