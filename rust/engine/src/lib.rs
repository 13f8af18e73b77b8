// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Planview Engine
//!
//! Versioned parsing engines that turn a fetched model buffer into a
//! [`planview_core::SceneNode`] tree.
//!
//! - [`EngineRegistry`]: ordered engine builds to try, newest first
//! - [`EngineLoader`] / [`EngineHandle`]: initialize a build, parse once
//! - [`step`]: the built-in ISO-10303-21 engine for IFC2X3, IFC4 and IFC4X3
//!
//! ```rust,ignore
//! use planview_engine::{BuiltinEngineLoader, EngineLoader, EngineRegistry};
//!
//! let registry = EngineRegistry::builtin();
//! let handle = BuiltinEngineLoader::new().initialize(&registry.candidates()[0])?;
//! let model = handle.parse(&bytes)?;
//! ```

pub mod adapter;
pub mod error;
pub mod registry;
pub mod step;

pub use adapter::{BuiltinEngineLoader, EngineHandle, EngineLoader, BUILTIN_STEP_PREFIX};
pub use error::{is_version_mismatch, Error, Result, VERSION_MISMATCH_SIGNATURES};
pub use registry::{EngineCandidate, EngineRegistry};
