//! Error types shared by the registry, masking, invoker and diagnostics layers.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reading, validating or writing the persisted registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config file {path}: `mcpServers` must be an object")]
    InvalidShape { path: PathBuf },

    #[error("server names must not be empty")]
    EmptyName,

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server '{0}' already exists")]
    Duplicate(String),

    #[error("server '{0}' not found in configuration")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum CmcpError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build command for '{name}': {reason}")]
    Build { name: String, reason: String },

    #[error("{message}")]
    Invocation { message: String },

    #[error("server '{0}' is not registered in Claude")]
    NotRegistered(String),

    #[error("{message}")]
    VerificationFailed { message: String },

    #[error("{message}")]
    VerificationTimeout { message: String },

    /// A diagnostics report shown in place of the original failure.
    #[error("{report}")]
    Diagnosed { report: String },

    #[error("errors stopping servers: {}", .0.join("; "))]
    Bulk(Vec<String>),

    #[error("failed to parse JSON for masking: {0}")]
    Mask(#[from] serde_json::Error),
}

impl CmcpError {
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
        }
    }
}

pub type Result<T, E = CmcpError> = std::result::Result<T, E>;
