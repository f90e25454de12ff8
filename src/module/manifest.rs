//! Module manifest and capability declarations.

use std::collections::HashSet;

/// Semantic version representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVer {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl SemVer {
    /// Creates a new semantic version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for SemVer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What a module provides.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Accepts TCP connections.
    TcpListener,

    /// Terminates TLS.
    TlsTermination,

    /// Chooses a certificate from the client's SNI.
    SniRouting,

    /// Speaks HTTP.
    HttpProtocol,

    /// Applies new configuration without a restart.
    HotReload,

    /// Exports metrics.
    Metrics,
}

/// Identity and capabilities of a module.
#[derive(Debug, Clone)]
pub struct ModuleManifest {
    /// Unique name of the module.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// Module version.
    pub version: SemVer,

    /// Capabilities provided by this module.
    pub capabilities: HashSet<Capability>,
}

impl ModuleManifest {
    /// Creates a new module manifest builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModuleManifestBuilder {
        ModuleManifestBuilder {
            manifest: ModuleManifest {
                name: name.into(),
                description: String::new(),
                version: SemVer::new(0, 1, 0),
                capabilities: HashSet::new(),
            },
        }
    }

    /// Checks if the module has a specific capability.
    #[must_use]
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

impl std::fmt::Display for ModuleManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Builder for [`ModuleManifest`].
#[derive(Debug)]
pub struct ModuleManifestBuilder {
    manifest: ModuleManifest,
}

impl ModuleManifestBuilder {
    /// Sets the module description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.manifest.description = description.into();
        self
    }

    /// Sets the module version.
    #[must_use]
    pub fn version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.manifest.version = SemVer::new(major, minor, patch);
        self
    }

    /// Adds capabilities.
    #[must_use]
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.manifest.capabilities.extend(capabilities);
        self
    }

    /// Builds the manifest.
    #[must_use]
    pub fn build(self) -> ModuleManifest {
        self.manifest
    }
}
