//! Module configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, HarnessResult};

/// Options that must be present before the module can initialize
const REQUIRED_FIELDS: &[&str] = &["container"];

/// Configuration of the functional-test module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Container source, relative to the project directory
    #[serde(default)]
    pub container: Option<String>,

    /// Directory the container source is resolved against
    #[serde(default)]
    pub project_dir: Option<PathBuf>,

    /// Follow redirect responses automatically
    #[serde(default)]
    pub follow_redirects: bool,

    /// Maximum redirects followed for a single request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_max_redirects() -> usize {
    5
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            container: None,
            project_dir: None,
            follow_redirects: false,
            max_redirects: default_max_redirects(),
        }
    }
}

impl ModuleConfig {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: Some(container.into()),
            ..Default::default()
        }
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        serde_yaml::from_str(yaml).map_err(HarnessError::from)
    }

    /// Load configuration from a YAML file. A missing or relative
    /// `project_dir` is resolved against the file's directory.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Configuration(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_yaml(&content)?;

        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.project_dir = Some(match config.project_dir.take() {
            Some(dir) if dir.is_relative() => base.join(dir),
            Some(dir) => dir,
            None => base,
        });

        Ok(config)
    }

    /// Check required options are set
    pub fn validate(&self) -> HarnessResult<()> {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| match *field {
                "container" => self.container.as_deref().map_or(true, str::is_empty),
                _ => false,
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Configuration(format!(
                "Options: {} are required; update the module configuration",
                missing.join(", ")
            )))
        }
    }

    /// The configured container source
    pub fn container_locator(&self) -> HarnessResult<&str> {
        self.validate()?;
        Ok(self.container.as_deref().unwrap_or_default())
    }

    pub fn project_dir(&self) -> PathBuf {
        self.project_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
