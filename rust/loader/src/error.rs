// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use thiserror::Error;

/// Errors produced while transferring an asset
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} fetching {url}")]
    Status { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid asset URL '{0}'")]
    InvalidUrl(String),

    #[error("unsupported URL scheme in '{0}'")]
    UnsupportedScheme(String),

    #[error("transfer ended before the asset was complete")]
    Incomplete,
}

/// Stable classification of a terminal load failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Every engine candidate refused the asset
    VersionMismatch,
    /// Parsed, but nothing drawable
    EmptyGeometry,
    /// Network error, malformed data, or anything unrecognized
    NetworkOrParseOther,
    /// The watchdog fired and the single recovery attempt failed
    TimeoutExhausted,
}

impl FailureKind {
    /// Classify a typed engine error by variant
    pub fn of_engine_error(error: &planview_engine::Error) -> Self {
        if error.is_version_mismatch() {
            FailureKind::VersionMismatch
        } else {
            FailureKind::NetworkOrParseOther
        }
    }

    /// Classify free-form engine runtime text, such as a panic message.
    /// Only version-mismatch signatures are recognized; everything else is
    /// [`FailureKind::NetworkOrParseOther`].
    pub fn classify(message: &str) -> Self {
        if planview_engine::is_version_mismatch(message) {
            FailureKind::VersionMismatch
        } else {
            FailureKind::NetworkOrParseOther
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::VersionMismatch => "version_mismatch",
            FailureKind::EmptyGeometry => "empty_geometry",
            FailureKind::NetworkOrParseOther => "network_or_parse",
            FailureKind::TimeoutExhausted => "timeout_exhausted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a load session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct LoadFailure {
    pub kind: FailureKind,
    /// Human readable reason
    pub message: String,
    pub asset_url: String,
}

impl LoadFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, asset_url: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            asset_url: asset_url.into(),
        }
    }
}
