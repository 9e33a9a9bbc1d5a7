//! Container resolution

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use routeprobe_common::SharedContainer;

use crate::error::{HarnessError, HarnessResult};
use crate::manifest::ManifestLoader;

/// Whatever a loader produced; expected to be a [`SharedContainer`]
pub type Loaded = Box<dyn Any + Send + Sync>;

/// Produces a container value from a source location
pub trait ContainerLoader: Send + Sync {
    fn load(&self, path: &Path) -> HarnessResult<Loaded>;
}

impl<F> ContainerLoader for F
where
    F: Fn(&Path) -> HarnessResult<Loaded> + Send + Sync,
{
    fn load(&self, path: &Path) -> HarnessResult<Loaded> {
        self(path)
    }
}

/// Resolves the suite's container from the configured locator
pub struct ContainerGateway {
    project_dir: PathBuf,
    loader: Arc<dyn ContainerLoader>,
}

impl ContainerGateway {
    /// Gateway loading YAML container manifests
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self::with_loader(project_dir, Arc::new(ManifestLoader))
    }

    pub fn with_loader(project_dir: impl Into<PathBuf>, loader: Arc<dyn ContainerLoader>) -> Self {
        Self {
            project_dir: project_dir.into(),
            loader,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Load the container behind `locator`, relative to the project directory
    pub fn resolve(&self, locator: &str) -> HarnessResult<SharedContainer> {
        let path = self.project_dir.join(locator);
        debug!("Loading container from {}", path.display());

        let loaded = self.loader.load(&path).map_err(|e| {
            HarnessError::Configuration(format!(
                "Failed to load a container from '{}': {}",
                locator, e
            ))
        })?;

        match loaded.downcast::<SharedContainer>() {
            Ok(container) => {
                info!("Container resolved from '{}'", locator);
                Ok(*container)
            }
            Err(_) => Err(HarnessError::Configuration(format!(
                "Failed to get a container from '{}'",
                locator
            ))),
        }
    }
}

impl std::fmt::Debug for ContainerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerGateway")
            .field("project_dir", &self.project_dir)
            .finish_non_exhaustive()
    }
}
