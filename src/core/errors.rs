//! DLB-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LobbyError>;

/// Top-level error type for drive_lobby.
#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("[DLB-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DLB-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DLB-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DLB-2001] remote discovery failed: {details}")]
    Discovery { details: String },

    #[error("[DLB-2002] probe failed for remote {remote}: {details}")]
    Probe { remote: String, details: String },

    #[error("[DLB-2003] probe for remote {remote} timed out after {timeout_ms} ms")]
    ProbeTimeout { remote: String, timeout_ms: u64 },

    #[error("[DLB-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DLB-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DLB-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DLB-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LobbyError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DLB-1001",
            Self::MissingConfig { .. } => "DLB-1002",
            Self::ConfigParse { .. } => "DLB-1003",
            Self::Discovery { .. } => "DLB-2001",
            Self::Probe { .. } => "DLB-2002",
            Self::ProbeTimeout { .. } => "DLB-2003",
            Self::Serialization { .. } => "DLB-2101",
            Self::Io { .. } => "DLB-3002",
            Self::ChannelClosed { .. } => "DLB-3003",
            Self::Runtime { .. } => "DLB-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a per-remote probe failure.
    #[must_use]
    pub fn probe(remote: &str, details: impl Into<String>) -> Self {
        Self::Probe {
            remote: remote.to_string(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for LobbyError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LobbyError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_unique() {
        let errors: Vec<LobbyError> = vec![
            LobbyError::InvalidConfig {
                details: String::new(),
            },
            LobbyError::MissingConfig {
                path: PathBuf::new(),
            },
            LobbyError::ConfigParse {
                context: "",
                details: String::new(),
            },
            LobbyError::Discovery {
                details: String::new(),
            },
            LobbyError::probe("", ""),
            LobbyError::ProbeTimeout {
                remote: String::new(),
                timeout_ms: 0,
            },
            LobbyError::Serialization {
                context: "",
                details: String::new(),
            },
            LobbyError::io("", std::io::Error::other("test")),
            LobbyError::ChannelClosed { component: "" },
            LobbyError::Runtime {
                details: String::new(),
            },
        ];

        let codes: Vec<&str> = errors.iter().map(LobbyError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_carries_code_prefix() {
        let err = LobbyError::probe("gdrive:", "exit status 1");
        let msg = err.to_string();
        assert!(msg.starts_with("[DLB-2002]"), "{msg}");
        assert!(msg.contains("gdrive:"));
    }

    #[test]
    fn json_error_converts_to_serialization() {
        let err: LobbyError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.code(), "DLB-2101");
    }
}
