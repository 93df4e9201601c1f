use std::sync::Arc;

use lattice_core::PluginId;

use super::Plugin;
use super::version::{Version, VersionReq};

/// A declared dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: PluginId,
    pub version_req: VersionReq,
}

impl Dependency {
    /// Depends on any version of `id`.
    pub fn new(id: impl Into<PluginId>) -> Self {
        Self {
            id: id.into(),
            version_req: VersionReq::Any,
        }
    }

    pub fn with_version(mut self, req: VersionReq) -> Self {
        self.version_req = req;
        self
    }
}

/// Static description of a plugin: identity, version, dependencies and entry
/// point.
///
/// ```rust,ignore
/// let desc = PluginDescriptor::new("weather", Version::new(1, 0, 0), WeatherPlugin)
///     .depends_on("http")
///     .depends_on_version("geo", "^2.1".parse()?);
/// ```
#[derive(Clone)]
pub struct PluginDescriptor {
    id: PluginId,
    version: Version,
    dependencies: Vec<Dependency>,
    entry: Arc<dyn Plugin>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<PluginId>, version: Version, entry: impl Plugin) -> Self {
        Self {
            id: id.into(),
            version,
            dependencies: Vec::new(),
            entry: Arc::new(entry),
        }
    }

    pub fn depends_on(self, id: impl Into<PluginId>) -> Self {
        self.dependency(Dependency::new(id))
    }

    pub fn depends_on_version(self, id: impl Into<PluginId>, req: VersionReq) -> Self {
        self.dependency(Dependency::new(id).with_version(req))
    }

    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn depends_on_id(&self, id: &PluginId) -> bool {
        self.dependencies.iter().any(|d| &d.id == id)
    }

    pub(crate) fn entry(&self) -> &Arc<dyn Plugin> {
        &self.entry
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
