// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notifications sent to the viewer shell. Fire-and-forget: they are called
//! on the controller's driver task and must not block.

use crate::error::LoadFailure;
use crate::progress::Progress;
use crate::session::Phase;

pub trait ViewerEvents: Send + Sync {
    fn on_phase_changed(&self, _phase: Phase) {}

    fn on_progress(&self, _progress: Progress) {}

    fn on_success(&self) {}

    fn on_error(&self, _failure: &LoadFailure) {}
}

/// Logs every notification with `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl ViewerEvents for TracingEvents {
    fn on_phase_changed(&self, phase: Phase) {
        tracing::info!(phase = %phase, "load phase changed");
    }

    fn on_progress(&self, progress: Progress) {
        match progress {
            Progress::Percent(percent) => tracing::debug!(percent, "load progress"),
            Progress::Indeterminate => tracing::debug!("load progress indeterminate"),
        }
    }

    fn on_success(&self) {
        tracing::info!("model ready");
    }

    fn on_error(&self, failure: &LoadFailure) {
        tracing::error!(
            kind = %failure.kind,
            url = %failure.asset_url,
            "load failed: {}",
            failure.message
        );
    }
}
