//! Configuration validation system.

use std::collections::HashMap;

use super::types::AppConfig;

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
    /// Severity level.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// Create a new error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid.
    Error,
    /// Warning - configuration may have issues.
    Warning,
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if the validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .errors
            .iter()
            .any(|e| e.severity == ValidationSeverity::Error)
    }

    /// Get all validation errors.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get only errors (not warnings).
    #[must_use]
    pub fn errors_only(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .collect()
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }

    /// Merge another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &AppConfig) -> ValidationResult;
}

/// Built-in validator for basic configuration checks.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.server.name.is_empty() {
            result.add_error(ValidationError::error(
                "server.name",
                "Server name cannot be empty",
            ));
        }

        if config.https.listeners.is_empty() {
            result.add_error(ValidationError::error(
                "https.listeners",
                "At least one listener is required",
            ));
        }

        if config.https.connection.max_connections == 0 {
            result.add_error(ValidationError::error(
                "https.connection.max_connections",
                "Max connections cannot be 0",
            ));
        }

        if config.https.connection.read_buffer_size == 0 {
            result.add_error(ValidationError::error(
                "https.connection.read_buffer_size",
                "Read buffer size cannot be 0",
            ));
        }

        result
    }
}

/// Validator that checks for listeners bound to the same address.
#[derive(Debug, Default)]
pub struct PortConflictValidator;

impl PortConflictValidator {
    /// Create a new port conflict validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for PortConflictValidator {
    fn validate(&self, config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut used: HashMap<std::net::SocketAddr, usize> = HashMap::new();

        for (index, listener) in config.https.listeners.iter().enumerate() {
            let addr = listener.socket_addr();
            // Port 0 asks the OS for an ephemeral port and never conflicts
            if addr.port() == 0 {
                continue;
            }
            if let Some(existing) = used.get(&addr) {
                result.add_error(ValidationError::error(
                    format!("https.listeners[{index}]"),
                    format!("Address {addr} conflicts with https.listeners[{existing}]"),
                ));
            } else {
                used.insert(addr, index);
            }
        }

        result
    }
}

/// Validator for the certificate list.
#[derive(Debug, Default)]
pub struct CertificateValidator;

impl CertificateValidator {
    /// Create a new certificate validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for CertificateValidator {
    fn validate(&self, config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let https = &config.https;

        if https.listeners.iter().any(|l| l.tls) && https.certificates.is_empty() {
            result.add_error(ValidationError::error(
                "https.certificates",
                "TLS listeners require at least one certificate",
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        let mut served: HashMap<String, &str> = HashMap::new();
        for cert in &https.certificates {
            let field = format!("https.certificates.{}", cert.name);

            if !seen_names.insert(&cert.name) {
                result.add_error(ValidationError::error(
                    &field,
                    format!("Duplicate certificate name: {}", cert.name),
                ));
            }

            if cert.hostnames.is_empty() {
                result.add_error(ValidationError::error(
                    format!("{field}.hostnames"),
                    "Certificate must serve at least one hostname",
                ));
            }

            for hostname in &cert.hostnames {
                let key = hostname.to_ascii_lowercase();
                match served.get(&key) {
                    Some(owner) => result.add_error(ValidationError::warning(
                        format!("{field}.hostnames"),
                        format!("Hostname {hostname} is already served by '{owner}'"),
                    )),
                    None => {
                        served.insert(key, &cert.name);
                    },
                }
            }

            let paths = [
                ("cert_path", Some(&cert.cert_path)),
                ("key_path", Some(&cert.key_path)),
                ("chain_path", cert.chain_path.as_ref()),
            ];
            for (label, path) in paths {
                let Some(path) = path else { continue };
                if !path.exists() {
                    result.add_error(ValidationError::error(
                        format!("{field}.{label}"),
                        format!("File not found: {}", path.display()),
                    ));
                }
            }
        }

        result
    }
}
