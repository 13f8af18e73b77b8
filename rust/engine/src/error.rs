// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine error types and version-mismatch detection.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error text fragments (lowercase) raised when an engine build and an asset
/// disagree on the binary interface. Matching is case-insensitive.
pub const VERSION_MISMATCH_SIGNATURES: &[&str] = &[
    "linkerror",
    "import signature",
    "function import requires a callable",
    "import #",
    "schema mismatch",
    "incompatible engine version",
    "engine initialization failed",
];

/// True if `message` carries one of [`VERSION_MISMATCH_SIGNATURES`]
pub fn is_version_mismatch(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    VERSION_MISMATCH_SIGNATURES
        .iter()
        .any(|signature| lower.contains(signature))
}

/// Errors raised by engine initialization, parsing and registry setup
#[derive(Error, Debug)]
pub enum Error {
    #[error("engine initialization failed for '{candidate}': {message}")]
    Initialization { candidate: String, message: String },

    #[error("LinkError: import signature mismatch: asset schema {found} is not linked by engine '{engine}' (links {linked})")]
    SchemaMismatch {
        engine: String,
        found: String,
        linked: String,
    },

    #[error("asset is not ISO-10303-21 data: {0}")]
    NotStep(String),

    #[error("asset is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("entity #{0} not found")]
    EntityNotFound(u32),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("invalid engine registry: {0}")]
    Registry(String),

    #[error("invalid engine registry JSON: {0}")]
    RegistryJson(#[from] serde_json::Error),
}

impl Error {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub fn geometry(message: impl Into<String>) -> Self {
        Self::Geometry(message.into())
    }

    /// True when this error means the engine build does not match the asset.
    ///
    /// Decided by variant only. Parse and decode errors echo asset text, so
    /// their messages are never matched against the signatures.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            Error::Initialization { .. } | Error::SchemaMismatch { .. }
        )
    }
}
