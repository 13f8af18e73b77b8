// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Planview Loader
//!
//! Drives one asset from URL to a framed, attached scene model:
//! fetch with progress, parse through an ordered list of engine candidates,
//! validate the geometry, render, and recover once when the watchdog fires.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use planview_core::{Camera, Scene};
//! use planview_engine::EngineRegistry;
//! use planview_loader::{LoadController, LoaderConfig, TracingEvents};
//!
//! let controller = LoadController::new(
//!     LoaderConfig::from_env(),
//!     EngineRegistry::builtin(),
//!     Arc::new(Mutex::new(Scene::new())),
//!     Arc::new(Mutex::new(Camera::default())),
//!     Arc::new(TracingEvents),
//! );
//! controller.load_asset(Some("https://example.com/model.ifc".into()));
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod fetch;
pub mod progress;
pub mod session;
pub mod watchdog;

pub use config::{registry_from_env, LoaderConfig};
pub use controller::LoadController;
pub use error::{FailureKind, FetchError, LoadFailure};
pub use events::{TracingEvents, ViewerEvents};
pub use fetch::{AssetFetcher, FetchEvent, FetchStream, FileFetcher, HttpFetcher, SchemeFetcher};
pub use progress::{Progress, ProgressTracker, FETCH_PROGRESS_CAP};
pub use session::{Effect, Event, LoadSession, Phase, SessionId};
pub use watchdog::Watchdog;
