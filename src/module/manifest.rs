//! Component identity and capability declarations.

use std::collections::HashSet;

/// Capabilities a component advertises.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Accepts HTTP or HTTPS requests and evaluates listener rules.
    HttpListener,

    /// Accepts TCP or TLS connections.
    TcpListener,

    /// Accepts UDP datagrams.
    UdpListener,

    /// Terminates TLS with ALPN negotiation.
    TlsTermination,

    /// Selects targets from target groups.
    LoadBalancing,

    /// Runs active health checks against targets.
    HealthChecks,

    /// Accepts rule and target mutations without restart.
    DynamicConfiguration,

    /// Authenticates users against an OIDC identity provider.
    Authentication,
}

/// Identity of a component.
#[derive(Debug, Clone)]
pub struct ModuleManifest {
    /// Component name.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// Version as `(major, minor, patch)`.
    pub version: (u32, u32, u32),

    /// Advertised capabilities.
    pub capabilities: HashSet<Capability>,
}

impl ModuleManifest {
    /// Starts building a manifest.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModuleManifestBuilder {
        ModuleManifestBuilder {
            manifest: ModuleManifest {
                name: name.into(),
                description: String::new(),
                version: (0, 1, 0),
                capabilities: HashSet::new(),
            },
        }
    }

    /// Checks for a capability.
    #[must_use]
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Builder for [`ModuleManifest`].
#[derive(Debug)]
pub struct ModuleManifestBuilder {
    manifest: ModuleManifest,
}

impl ModuleManifestBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.manifest.description = description.into();
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.manifest.version = (major, minor, patch);
        self
    }

    /// Adds a capability.
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.manifest.capabilities.insert(capability);
        self
    }

    /// Finishes the manifest.
    #[must_use]
    pub fn build(self) -> ModuleManifest {
        self.manifest
    }
}
