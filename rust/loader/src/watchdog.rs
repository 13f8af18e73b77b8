// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-session load deadline.
//!
//! The watchdog only tracks the deadline; the controller driver sleeps until
//! it. It fires at most once in its lifetime.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Watchdog {
    duration: Duration,
    deadline: Option<Instant>,
    fired: bool,
}

impl Watchdog {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
            fired: false,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Arm relative to `now`. Returns the deadline, or `None` when the
    /// watchdog is already armed or has fired.
    pub fn arm(&mut self, now: Instant) -> Option<Instant> {
        if self.fired || self.deadline.is_some() {
            return None;
        }
        let deadline = now + self.duration;
        self.deadline = Some(deadline);
        Some(deadline)
    }

    /// Disarm; true if it was armed
    pub fn disarm(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Consume the deadline; true only for the first firing of an armed watchdog
    pub fn fire(&mut self) -> bool {
        if self.fired || self.deadline.take().is_none() {
            return false;
        }
        self.fired = true;
        true
    }
}
