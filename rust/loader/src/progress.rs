// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Load progress as reported to the viewer.

/// Highest percentage reported before the load succeeds
pub const FETCH_PROGRESS_CAP: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// 0-100; 100 only once the model is on screen
    Percent(u8),
    /// Transfer size unknown
    Indeterminate,
}

impl Progress {
    /// Transfer progress, capped at [`FETCH_PROGRESS_CAP`]
    pub fn of_transfer(loaded: u64, total: Option<u64>) -> Self {
        match total {
            Some(total) if total > 0 => {
                let percent = (loaded as u128 * 100 / total as u128).min(FETCH_PROGRESS_CAP as u128);
                Progress::Percent(percent as u8)
            }
            _ => Progress::Indeterminate,
        }
    }
}

/// Per-attempt progress that never moves backwards
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    current: u8,
    indeterminate: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart at 0 for a new attempt
    pub fn reset(&mut self) -> Progress {
        self.current = 0;
        self.indeterminate = false;
        Progress::Percent(0)
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Fold a transfer update in; returns the value to report, if any
    pub fn observe(&mut self, loaded: u64, total: Option<u64>) -> Option<Progress> {
        match Progress::of_transfer(loaded, total) {
            Progress::Percent(percent) if percent > self.current => {
                self.current = percent;
                Some(Progress::Percent(percent))
            }
            Progress::Percent(_) => None,
            Progress::Indeterminate if !self.indeterminate => {
                self.indeterminate = true;
                Some(Progress::Indeterminate)
            }
            Progress::Indeterminate => None,
        }
    }

    /// Mark the load complete
    pub fn complete(&mut self) -> Progress {
        self.current = 100;
        Progress::Percent(100)
    }
}
