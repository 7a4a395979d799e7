use std::path::PathBuf;

use crate::error::{Error, Result};

/// Component manifest shipped with the binary.
pub const EMBEDDED_TEMPLATE: &str = include_str!("../../resources/keda.yaml");

/// Sample configuration resource shipped with the binary.
pub const EMBEDDED_CONTROLLER: &str = include_str!("../../resources/kedacontroller.yaml");

/// Where a manifest template is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    File(PathBuf),
    Embedded,
    Inline(String),
}

impl TemplateSource {
    pub fn read(&self) -> Result<String> {
        match self {
            Self::File(path) => std::fs::read_to_string(path)
                .map_err(|e| Error::template(format!("cannot read {}: {}", path.display(), e))),
            Self::Embedded => Ok(EMBEDDED_TEMPLATE.to_string()),
            Self::Inline(content) => Ok(content.clone()),
        }
    }
}

impl Default for TemplateSource {
    fn default() -> Self {
        Self::Embedded
    }
}

impl std::fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Embedded => f.write_str("<embedded>"),
            Self::Inline(_) => f.write_str("<inline>"),
        }
    }
}
