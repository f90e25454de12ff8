//! The module lifecycle trait.

use std::collections::HashMap;

use super::{ModuleConfig, ModuleManifest, ModuleResult, ModuleStatus};

/// Metrics reported by a module.
#[derive(Debug, Clone, Default)]
pub struct MetricsPayload {
    /// Counter metrics (monotonically increasing).
    pub counters: HashMap<String, u64>,

    /// Gauge metrics (can go up and down).
    pub gauges: HashMap<String, f64>,
}

impl MetricsPayload {
    /// Creates a new empty metrics payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a counter metric.
    pub fn counter(&mut self, name: impl Into<String>, value: u64) {
        self.counters.insert(name.into(), value);
    }

    /// Adds a gauge metric.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.insert(name.into(), value);
    }

    /// Formats metrics in Prometheus text format, sorted by name.
    #[must_use]
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let mut lines: Vec<String> = self
            .counters
            .iter()
            .map(|(name, value)| format!("{prefix}_{name} {value}"))
            .chain(
                self.gauges
                    .iter()
                    .map(|(name, value)| format!("{prefix}_{name} {value}")),
            )
            .collect();
        lines.sort();

        let mut output = lines.join("\n");
        output.push('\n');
        output
    }
}

/// Lifecycle contract of a server module.
///
/// # Lifecycle
///
/// 1. `manifest()` - Identity and capabilities
/// 2. `init()` - Validate configuration and build state
/// 3. `start()` - Begin serving
/// 4. `reload()` - Apply new configuration while running
/// 5. `status()` / `metrics()` - Monitoring
/// 6. `stop()` - Shut down
pub trait ModuleContract: Send + Sync {
    /// Returns the module's manifest.
    fn manifest(&self) -> ModuleManifest;

    /// Initializes the module with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::ConfigError` if the configuration is invalid.
    /// Returns `ModuleError::InitializationFailed` for other initialization failures.
    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()>;

    /// Starts serving.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::StartFailed` if the module cannot start.
    /// Returns `ModuleError::InvalidState` if called before `init()` or while running.
    fn start(&mut self) -> ModuleResult<()>;

    /// Stops serving.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidState` if the module is not running.
    fn stop(&mut self) -> ModuleResult<()>;

    /// Applies a new configuration without restarting.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::ConfigError` if the new configuration is invalid.
    fn reload(&mut self, config: ModuleConfig) -> ModuleResult<()>;

    /// Returns the current status of the module.
    fn status(&self) -> ModuleStatus;

    /// Returns the current metrics from the module.
    fn metrics(&self) -> MetricsPayload;

    /// Liveness check; `true` while the module is serving.
    fn heartbeat(&self) -> bool {
        self.status().is_healthy()
    }
}
