// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine initialization and the single-use parse handle.
//!
//! A handle is consumed by [`EngineHandle::parse`]; retrying an asset always
//! goes back through [`EngineLoader::initialize`].

use planview_core::SceneNode;

use crate::error::{Error, Result};
use crate::registry::EngineCandidate;
use crate::step::{Schema, StepEngine};

/// Address prefix of engines compiled into this crate
pub const BUILTIN_STEP_PREFIX: &str = "builtin:step/";

/// Loads engine builds by candidate address
pub trait EngineLoader: Send + Sync {
    /// Load the candidate's runtime. A failure here means the build cannot
    /// be used at all and is reported as [`Error::Initialization`].
    fn initialize(&self, candidate: &EngineCandidate) -> Result<Box<dyn EngineHandle>>;
}

/// An initialized engine, good for one buffer
pub trait EngineHandle: Send {
    fn candidate(&self) -> &EngineCandidate;

    fn parse(self: Box<Self>, buffer: &[u8]) -> Result<SceneNode>;
}

/// Loader for `builtin:step/<SCHEMA>[+<SCHEMA>...]` addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEngineLoader;

impl BuiltinEngineLoader {
    pub fn new() -> Self {
        Self
    }

    /// Schemas named by a builtin address
    pub fn resolve(address: &str) -> std::result::Result<Vec<Schema>, String> {
        let schemas_part = address
            .strip_prefix(BUILTIN_STEP_PREFIX)
            .ok_or_else(|| format!("no runtime module at '{}'", address))?;

        let schemas = schemas_part
            .split('+')
            .map(|name| {
                name.parse::<Schema>()
                    .map_err(|unknown| format!("no runtime module for schema '{}'", unknown))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if schemas.is_empty() {
            return Err(format!("'{}' links no schema", address));
        }
        Ok(schemas)
    }
}

impl EngineLoader for BuiltinEngineLoader {
    fn initialize(&self, candidate: &EngineCandidate) -> Result<Box<dyn EngineHandle>> {
        let schemas =
            Self::resolve(&candidate.address).map_err(|message| Error::Initialization {
                candidate: candidate.identifier.clone(),
                message,
            })?;

        tracing::debug!(
            candidate = %candidate.identifier,
            address = %candidate.address,
            "initialized builtin engine"
        );
        Ok(Box::new(StepHandle {
            candidate: candidate.clone(),
            engine: StepEngine::new(candidate.identifier.clone(), schemas),
        }))
    }
}

struct StepHandle {
    candidate: EngineCandidate,
    engine: StepEngine,
}

impl EngineHandle for StepHandle {
    fn candidate(&self) -> &EngineCandidate {
        &self.candidate
    }

    fn parse(self: Box<Self>, buffer: &[u8]) -> Result<SceneNode> {
        self.engine.parse(buffer)
    }
}
