//! Cipher policy profiles.
//!
//! Strings follow the OpenSSL cipher-list format from Mozilla's server side
//! TLS guidelines. They only govern TLS 1.2 and below; TLS 1.3 suites are
//! always enabled by the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::TlsError;

/// Modern compatibility.
pub const MODERN_COMPATIBILITY: &str = "ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES256-SHA384:ECDHE-RSA-AES256-SHA384:ECDHE-ECDSA-AES128-SHA256:ECDHE-RSA-AES128-SHA256";

/// Intermediate compatibility.
pub const INTERMEDIATE_COMPATIBILITY: &str = "ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:DHE-RSA-AES128-GCM-SHA256:DHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES128-SHA256:ECDHE-RSA-AES128-SHA256:ECDHE-ECDSA-AES128-SHA:ECDHE-RSA-AES256-SHA384:ECDHE-RSA-AES128-SHA:ECDHE-ECDSA-AES256-SHA384:ECDHE-ECDSA-AES256-SHA:ECDHE-RSA-AES256-SHA:DHE-RSA-AES128-SHA256:DHE-RSA-AES128-SHA:DHE-RSA-AES256-SHA256:DHE-RSA-AES256-SHA:ECDHE-ECDSA-DES-CBC3-SHA:ECDHE-RSA-DES-CBC3-SHA:EDH-RSA-DES-CBC3-SHA:AES128-GCM-SHA256:AES256-GCM-SHA384:AES128-SHA256:AES256-SHA256:AES128-SHA:AES256-SHA:DES-CBC3-SHA:!DSS";

/// Backward compatibility.
pub const BACKWARD_COMPATIBILITY: &str = "ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES256-GCM-SHA384:DHE-RSA-AES128-GCM-SHA256:DHE-DSS-AES128-GCM-SHA256:kEDH+AESGCM:ECDHE-RSA-AES128-SHA256:ECDHE-ECDSA-AES128-SHA256:ECDHE-RSA-AES128-SHA:ECDHE-ECDSA-AES128-SHA:ECDHE-RSA-AES256-SHA384:ECDHE-ECDSA-AES256-SHA384:ECDHE-RSA-AES256-SHA:ECDHE-ECDSA-AES256-SHA:DHE-RSA-AES128-SHA256:DHE-RSA-AES128-SHA:DHE-DSS-AES128-SHA256:DHE-RSA-AES256-SHA256:DHE-DSS-AES256-SHA:DHE-RSA-AES256-SHA:ECDHE-RSA-DES-CBC3-SHA:ECDHE-ECDSA-DES-CBC3-SHA:EDH-RSA-DES-CBC3-SHA:AES128-GCM-SHA256:AES256-GCM-SHA384:AES128-SHA256:AES256-SHA256:AES128-SHA:AES256-SHA:AES:DES-CBC3-SHA:HIGH:SEED:!aNULL:!eNULL:!EXPORT:!DES:!RC4:!MD5:!PSK:!RSAPSK:!aDH:!aECDH:!EDH-DSS-DES-CBC3-SHA:!KRB5-DES-CBC3-SHA:!SRP";

/// Fastest suite only, which is still considered secure.
pub const FAST_NOT_VERY_SECURE: &str = "AES128-SHA";

/// A named cipher-suite preference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherPolicy {
    /// High security, narrow client support.
    Modern,
    /// Balanced; the usual choice for real deployments.
    Intermediate,
    /// Broad legacy client support.
    Backward,
    /// Single fast AES128 suite; TLS 1.2 clients get the ECDHE AES128-GCM pair.
    #[default]
    FastNotVerySecure,
}

impl CipherPolicy {
    /// All policies, strongest first.
    pub const ALL: [Self; 4] = [
        Self::Modern,
        Self::Intermediate,
        Self::Backward,
        Self::FastNotVerySecure,
    ];

    /// The OpenSSL-format cipher list for this policy.
    #[must_use]
    pub const fn cipher_list(self) -> &'static str {
        match self {
            Self::Modern => MODERN_COMPATIBILITY,
            Self::Intermediate => INTERMEDIATE_COMPATIBILITY,
            Self::Backward => BACKWARD_COMPATIBILITY,
            Self::FastNotVerySecure => FAST_NOT_VERY_SECURE,
        }
    }

    /// Enabled cipher names in preference order.
    ///
    /// Exclusions (`!NAME`) are dropped; group aliases such as `HIGH` are
    /// returned as-is and left to the engine to interpret.
    pub fn ciphers(self) -> impl Iterator<Item = &'static str> {
        self.cipher_list()
            .split(':')
            .filter(|name| !name.is_empty() && !name.starts_with('!'))
    }

    /// Configuration name of the policy.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Modern => "modern",
            Self::Intermediate => "intermediate",
            Self::Backward => "backward",
            Self::FastNotVerySecure => "fast_not_very_secure",
        }
    }
}

impl fmt::Display for CipherPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherPolicy {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "modern" => Ok(Self::Modern),
            "intermediate" => Ok(Self::Intermediate),
            "backward" => Ok(Self::Backward),
            "fast_not_very_secure" | "fast" => Ok(Self::FastNotVerySecure),
            other => Err(TlsError::ConfigError {
                message: format!("unknown cipher policy '{other}'"),
            }),
        }
    }
}
