// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Load session state machine.
//!
//! [`LoadSession::handle`] is pure: it maps the current phase and an
//! [`Event`] to the next phase plus the [`Effect`]s the controller driver
//! must carry out. All retry bookkeeping (attempted candidates, the attempt
//! counter, the watchdog) lives on the session.
//!
//! ```text
//! Idle -> Fetching -> Parsing -> Validating -> Rendering -> Success
//!            ^           |           |
//!            +-cascade---+           +--> Failed (EmptyGeometry)
//!
//! any non-terminal --watchdog--> TimeoutRetry -> Rendering | Failed
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use planview_core::{has_renderable_geometry, NodeKey, SceneNode};
use planview_engine::EngineRegistry;
use tokio::time::Instant;

use crate::error::{FailureKind, LoadFailure};
use crate::progress::{Progress, ProgressTracker};
use crate::watchdog::Watchdog;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Fetching,
    Parsing,
    Validating,
    Rendering,
    Success,
    Failed,
    TimeoutRetry,
}

impl Phase {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Success | Phase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Fetching => "fetching",
            Phase::Parsing => "parsing",
            Phase::Validating => "validating",
            Phase::Rendering => "rendering",
            Phase::Success => "success",
            Phase::Failed => "failed",
            Phase::TimeoutRetry => "timeout_retry",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine. Worker results carry the attempt they
/// belong to; results of a superseded attempt are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Leave `Idle`
    Start { now: Instant },
    Progress {
        attempt: u32,
        loaded: u64,
        total: Option<u64>,
    },
    Fetched { attempt: u32 },
    FetchFailed { attempt: u32, message: String },
    Parsed { attempt: u32, model: Arc<SceneNode> },
    /// Classified where the typed engine error was still available
    ParseFailed {
        attempt: u32,
        kind: FailureKind,
        message: String,
    },
    /// The model is attached under `key` and the camera is framed
    Rendered { attempt: u32, key: NodeKey },
    WatchdogFired,
    RecoveryFailed { attempt: u32, message: String },
    /// Superseded or torn down
    Cancel,
}

impl Event {
    fn attempt(&self) -> Option<u32> {
        match self {
            Event::Progress { attempt, .. }
            | Event::Fetched { attempt }
            | Event::FetchFailed { attempt, .. }
            | Event::Parsed { attempt, .. }
            | Event::ParseFailed { attempt, .. }
            | Event::Rendered { attempt, .. }
            | Event::RecoveryFailed { attempt, .. } => Some(*attempt),
            Event::Start { .. } | Event::WatchdogFired | Event::Cancel => None,
        }
    }
}

/// Side effects requested by a transition, in execution order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    NotifyPhase(Phase),
    NotifyProgress(Progress),
    NotifySuccess,
    NotifyFailure(LoadFailure),
    ArmWatchdog(Instant),
    DisarmWatchdog,
    /// Fetch the asset and parse it with the given registry candidate
    StartAttempt { attempt: u32, candidate: usize },
    /// Single full-buffer fetch+parse after the watchdog fired
    StartRecovery { attempt: u32, candidate: usize },
    /// Abandon whatever work is running for this session
    CancelInFlight,
    /// Attach the model and frame the camera, then report [`Event::Rendered`]
    Render { attempt: u32, model: Arc<SceneNode> },
    Detach(NodeKey),
}

/// One load of one asset URL
#[derive(Debug)]
pub struct LoadSession {
    id: SessionId,
    asset_url: String,
    registry: Arc<EngineRegistry>,
    phase: Phase,
    progress: ProgressTracker,
    active_candidate: Option<usize>,
    attempted: BTreeSet<usize>,
    attempt: u32,
    failures: Vec<String>,
    model: Option<Arc<SceneNode>>,
    attached: Option<NodeKey>,
    watchdog: Watchdog,
    cancelled: bool,
}

impl LoadSession {
    pub fn new(
        id: SessionId,
        asset_url: impl Into<String>,
        registry: Arc<EngineRegistry>,
        watchdog: Duration,
    ) -> Self {
        Self {
            id,
            asset_url: asset_url.into(),
            registry,
            phase: Phase::Idle,
            progress: ProgressTracker::new(),
            active_candidate: None,
            attempted: BTreeSet::new(),
            attempt: 0,
            failures: Vec::new(),
            model: None,
            attached: None,
            watchdog: Watchdog::new(watchdog),
            cancelled: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn asset_url(&self) -> &str {
        &self.asset_url
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress.current()
    }

    pub fn active_candidate(&self) -> Option<usize> {
        self.active_candidate
    }

    pub fn attempted(&self) -> &BTreeSet<usize> {
        &self.attempted
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The parsed model, owned by the session
    pub fn model(&self) -> Option<&Arc<SceneNode>> {
        self.model.as_ref()
    }

    pub fn attached(&self) -> Option<NodeKey> {
        self.attached
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog.deadline()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Apply an event and return the effects to execute
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        if self.cancelled {
            return Vec::new();
        }

        if let Some(attempt) = event.attempt() {
            if attempt != self.attempt {
                tracing::trace!(
                    session = self.id,
                    attempt,
                    current = self.attempt,
                    "dropping stale attempt event"
                );
                return Vec::new();
            }
        }

        match event {
            Event::Start { now } => self.start(now),
            Event::Progress { loaded, total, .. } if self.phase == Phase::Fetching => self
                .progress
                .observe(loaded, total)
                .map(|p| vec![Effect::NotifyProgress(p)])
                .unwrap_or_default(),
            Event::Fetched { .. } if self.phase == Phase::Fetching => {
                self.phase = Phase::Parsing;
                vec![Effect::NotifyPhase(Phase::Parsing)]
            }
            Event::FetchFailed { message, .. } if self.phase == Phase::Fetching => self.fail(
                FailureKind::NetworkOrParseOther,
                format!("fetch failed: {}", message),
            ),
            Event::Parsed { attempt, model } => self.parsed(attempt, model),
            Event::ParseFailed { kind, message, .. } if self.phase == Phase::Parsing => match kind {
                FailureKind::VersionMismatch => self.cascade(message),
                kind => self.fail(kind, message),
            },
            Event::Rendered { key, .. } if self.phase == Phase::Rendering => self.rendered(key),
            Event::WatchdogFired => self.watchdog_fired(),
            Event::RecoveryFailed { message, .. } if self.phase == Phase::TimeoutRetry => self
                .fail(
                    FailureKind::TimeoutExhausted,
                    format!("timed out, recovery failed: {}", message),
                ),
            Event::Cancel => self.cancel(),
            other => {
                tracing::trace!(session = self.id, phase = %self.phase, event = ?other, "ignoring event");
                Vec::new()
            }
        }
    }

    fn start(&mut self, now: Instant) -> Vec<Effect> {
        if self.phase != Phase::Idle || self.asset_url.trim().is_empty() {
            return Vec::new();
        }

        let Some(candidate) = self.registry.first_untried(&self.attempted) else {
            return self.fail(FailureKind::VersionMismatch, "no engine candidates configured");
        };

        self.active_candidate = Some(candidate);
        self.attempt = 1;
        self.phase = Phase::Fetching;

        let mut effects = vec![
            Effect::NotifyPhase(Phase::Fetching),
            Effect::NotifyProgress(self.progress.reset()),
        ];
        if let Some(deadline) = self.watchdog.arm(now) {
            effects.push(Effect::ArmWatchdog(deadline));
        }
        effects.push(Effect::StartAttempt {
            attempt: self.attempt,
            candidate,
        });
        effects
    }

    fn parsed(&mut self, attempt: u32, model: Arc<SceneNode>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.phase {
            Phase::Parsing => {
                self.phase = Phase::Validating;
                effects.push(Effect::NotifyPhase(Phase::Validating));
            }
            // Recovery goes straight to rendering once validated
            Phase::TimeoutRetry => {}
            _ => return effects,
        }

        if !has_renderable_geometry(&model) {
            effects.extend(self.fail(
                FailureKind::EmptyGeometry,
                "model contains no renderable geometry",
            ));
            return effects;
        }

        self.phase = Phase::Rendering;
        self.model = Some(model.clone());
        effects.push(Effect::NotifyPhase(Phase::Rendering));
        effects.push(Effect::Render { attempt, model });
        effects
    }

    /// Version mismatch: try the next untried candidate or give up
    fn cascade(&mut self, message: String) -> Vec<Effect> {
        if let Some(current) = self.active_candidate {
            self.attempted.insert(current);
            let identifier = self
                .registry
                .get(current)
                .map(|c| c.identifier.as_str())
                .unwrap_or("?");
            tracing::warn!(
                session = self.id,
                candidate = identifier,
                error = %message,
                "engine version mismatch"
            );
            self.failures.push(format!("{} ({})", identifier, message));
        }

        match self.registry.first_untried(&self.attempted) {
            Some(next) => {
                self.active_candidate = Some(next);
                self.attempt += 1;
                self.phase = Phase::Fetching;
                vec![
                    Effect::NotifyPhase(Phase::Fetching),
                    Effect::NotifyProgress(self.progress.reset()),
                    Effect::StartAttempt {
                        attempt: self.attempt,
                        candidate: next,
                    },
                ]
            }
            None => {
                let message = format!(
                    "no compatible parsing engine; attempted {}",
                    self.failures.join(", ")
                );
                self.fail(FailureKind::VersionMismatch, message)
            }
        }
    }

    fn rendered(&mut self, key: NodeKey) -> Vec<Effect> {
        self.attached = Some(key);
        self.phase = Phase::Success;

        let mut effects = Vec::new();
        if self.watchdog.disarm() {
            effects.push(Effect::DisarmWatchdog);
        }
        effects.push(Effect::NotifyProgress(self.progress.complete()));
        effects.push(Effect::NotifyPhase(Phase::Success));
        effects.push(Effect::NotifySuccess);
        effects
    }

    fn watchdog_fired(&mut self) -> Vec<Effect> {
        if matches!(
            self.phase,
            Phase::Idle | Phase::Rendering | Phase::TimeoutRetry | Phase::Success | Phase::Failed
        ) || !self.watchdog.fire()
        {
            return Vec::new();
        }

        let Some(candidate) = self
            .active_candidate
            .or_else(|| self.registry.first_untried(&self.attempted))
        else {
            return self.fail(FailureKind::TimeoutExhausted, "timed out, no engine to recover with");
        };

        tracing::warn!(
            session = self.id,
            url = %self.asset_url,
            phase = %self.phase,
            "load watchdog fired"
        );
        self.phase = Phase::TimeoutRetry;
        self.attempt += 1;
        vec![
            Effect::CancelInFlight,
            Effect::NotifyPhase(Phase::TimeoutRetry),
            Effect::NotifyProgress(Progress::Indeterminate),
            Effect::StartRecovery {
                attempt: self.attempt,
                candidate,
            },
        ]
    }

    fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> Vec<Effect> {
        let failure = LoadFailure::new(kind, message, self.asset_url.clone());
        tracing::warn!(
            session = self.id,
            kind = %kind,
            "load failed: {}",
            failure.message
        );

        self.phase = Phase::Failed;
        self.model = None;

        let mut effects = Vec::new();
        if self.watchdog.disarm() {
            effects.push(Effect::DisarmWatchdog);
        }
        effects.push(Effect::NotifyPhase(Phase::Failed));
        effects.push(Effect::NotifyFailure(failure));
        effects
    }

    fn cancel(&mut self) -> Vec<Effect> {
        self.cancelled = true;
        self.model = None;

        let mut effects = Vec::new();
        if self.watchdog.disarm() {
            effects.push(Effect::DisarmWatchdog);
        }
        effects.push(Effect::CancelInFlight);
        if let Some(key) = self.attached.take() {
            effects.push(Effect::Detach(key));
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planview_core::{Mesh, Point3, Scene, Vector3};
    use planview_engine::EngineCandidate;

    const LINK_ERROR: &str = "LinkError: import signature mismatch: asset schema IFC2X3";

    fn registry(n: usize) -> Arc<EngineRegistry> {
        let candidates = (0..n)
            .map(|i| EngineCandidate::new(format!("c{}", i), format!("builtin:step/IFC4#{}", i)))
            .collect();
        Arc::new(EngineRegistry::new(candidates).unwrap())
    }

    fn session(n: usize) -> LoadSession {
        LoadSession::new(1, "http://localhost:8000/download/a.ifc", registry(n), Duration::from_secs(12))
    }

    fn model(renderable: bool) -> Arc<SceneNode> {
        let mut root = SceneNode::group("project", "IFCPROJECT");
        if renderable {
            let mut mesh = Mesh::new();
            for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
                mesh.add_vertex(Point3::new(p[0], p[1], p[2]), Vector3::z());
            }
            mesh.add_triangle(0, 1, 2);
            root.push_child(SceneNode::leaf("slab", "IFCSLAB", mesh));
        }
        Arc::new(root)
    }

    fn link_failure(attempt: u32) -> Event {
        Event::ParseFailed {
            attempt,
            kind: FailureKind::VersionMismatch,
            message: LINK_ERROR.to_string(),
        }
    }

    fn key_for(node: &Arc<SceneNode>) -> NodeKey {
        Scene::new().attach(node)
    }

    fn failure(effects: &[Effect]) -> Option<&LoadFailure> {
        effects.iter().find_map(|e| match e {
            Effect::NotifyFailure(f) => Some(f),
            _ => None,
        })
    }

    #[test]
    fn test_happy_path() {
        let mut s = session(3);
        let now = Instant::now();
        let effects = s.handle(Event::Start { now });
        assert_eq!(
            effects,
            vec![
                Effect::NotifyPhase(Phase::Fetching),
                Effect::NotifyProgress(Progress::Percent(0)),
                Effect::ArmWatchdog(now + Duration::from_secs(12)),
                Effect::StartAttempt { attempt: 1, candidate: 0 },
            ]
        );

        assert_eq!(
            s.handle(Event::Progress { attempt: 1, loaded: 50, total: Some(100) }),
            vec![Effect::NotifyProgress(Progress::Percent(50))]
        );
        assert_eq!(
            s.handle(Event::Fetched { attempt: 1 }),
            vec![Effect::NotifyPhase(Phase::Parsing)]
        );

        let node = model(true);
        let effects = s.handle(Event::Parsed { attempt: 1, model: node.clone() });
        assert_eq!(
            effects,
            vec![
                Effect::NotifyPhase(Phase::Validating),
                Effect::NotifyPhase(Phase::Rendering),
                Effect::Render { attempt: 1, model: node.clone() },
            ]
        );

        let key = key_for(&node);
        let effects = s.handle(Event::Rendered { attempt: 1, key });
        assert_eq!(
            effects,
            vec![
                Effect::DisarmWatchdog,
                Effect::NotifyProgress(Progress::Percent(100)),
                Effect::NotifyPhase(Phase::Success),
                Effect::NotifySuccess,
            ]
        );
        assert_eq!(s.phase(), Phase::Success);
        assert_eq!(s.attached(), Some(key));
        assert_eq!(s.watchdog_deadline(), None);

        // Terminal: nothing moves it any more
        assert!(s.handle(Event::WatchdogFired).is_empty());
        assert!(s.handle(Event::Start { now }).is_empty());
    }

    #[test]
    fn test_cascade_exhausts_all_candidates() {
        let mut s = session(3);
        s.handle(Event::Start { now: Instant::now() });

        for attempt in 1..=3 {
            s.handle(Event::Fetched { attempt });
            let effects = s.handle(link_failure(attempt));
            if attempt < 3 {
                assert!(effects.contains(&Effect::StartAttempt {
                    attempt: attempt + 1,
                    candidate: attempt as usize,
                }));
                assert_eq!(s.phase(), Phase::Fetching);
            } else {
                let failure = failure(&effects).unwrap();
                assert_eq!(failure.kind, FailureKind::VersionMismatch);
                for id in ["c0", "c1", "c2"] {
                    assert!(failure.message.contains(id), "{}", failure.message);
                }
            }
        }
        assert_eq!(s.phase(), Phase::Failed);
        assert_eq!(s.attempted().len(), 3);
    }

    #[test]
    fn test_cascade_stops_at_first_success() {
        let mut s = session(3);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::Fetched { attempt: 1 });
        s.handle(link_failure(1));

        assert_eq!(s.active_candidate(), Some(1));
        s.handle(Event::Fetched { attempt: 2 });
        let node = model(true);
        s.handle(Event::Parsed { attempt: 2, model: node.clone() });
        s.handle(Event::Rendered { attempt: 2, key: key_for(&node) });

        assert_eq!(s.phase(), Phase::Success);
        assert_eq!(s.active_candidate(), Some(1));
        assert!(!s.attempted().contains(&2));
    }

    #[test]
    fn test_progress_resets_on_cascade() {
        let mut s = session(2);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::Progress { attempt: 1, loaded: 90, total: Some(100) });
        s.handle(Event::Fetched { attempt: 1 });
        let effects = s.handle(link_failure(1));
        assert!(effects.contains(&Effect::NotifyProgress(Progress::Percent(0))));
        assert_eq!(s.progress(), 0);
    }

    #[test]
    fn test_empty_geometry_never_cascades() {
        let mut s = session(3);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::Fetched { attempt: 1 });
        let effects = s.handle(Event::Parsed { attempt: 1, model: model(false) });

        assert_eq!(failure(&effects).unwrap().kind, FailureKind::EmptyGeometry);
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartAttempt { .. })));
        assert_eq!(s.phase(), Phase::Failed);
        assert!(s.model().is_none());
    }

    #[test]
    fn test_other_parse_failure_is_terminal() {
        let mut s = session(3);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::Fetched { attempt: 1 });
        // The message echoes asset text that looks like a link error
        let effects = s.handle(Event::ParseFailed {
            attempt: 1,
            kind: FailureKind::NetworkOrParseOther,
            message: "Parse error at position 139: #100: malformed entity record: 'Import #2 column'"
                .to_string(),
        });
        assert_eq!(failure(&effects).unwrap().kind, FailureKind::NetworkOrParseOther);
        assert!(effects.contains(&Effect::DisarmWatchdog));
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartAttempt { .. })));
        assert_eq!(s.attempted().len(), 0);
    }

    #[test]
    fn test_stale_attempt_events_are_dropped() {
        let mut s = session(3);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::Fetched { attempt: 1 });
        s.handle(link_failure(1));

        assert!(s.handle(Event::Fetched { attempt: 1 }).is_empty());
        assert!(s
            .handle(Event::Parsed { attempt: 1, model: model(true) })
            .is_empty());
        assert_eq!(s.phase(), Phase::Fetching);
    }

    #[test]
    fn test_watchdog_excursion() {
        let mut s = session(3);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::Fetched { attempt: 1 });

        let effects = s.handle(Event::WatchdogFired);
        assert_eq!(effects[0], Effect::CancelInFlight);
        assert!(effects.contains(&Effect::StartRecovery { attempt: 2, candidate: 0 }));
        assert_eq!(s.phase(), Phase::TimeoutRetry);

        // Never twice per session
        assert!(s.handle(Event::WatchdogFired).is_empty());
        // The cancelled attempt can no longer report
        assert!(s
            .handle(link_failure(1))
            .is_empty());

        let effects = s.handle(Event::RecoveryFailed {
            attempt: 2,
            message: "HTTP 503".to_string(),
        });
        let failure = failure(&effects).unwrap();
        assert_eq!(failure.kind, FailureKind::TimeoutExhausted);
        assert!(failure.message.starts_with("timed out, recovery failed"));
    }

    #[test]
    fn test_watchdog_recovery_success() {
        let mut s = session(1);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::WatchdogFired);

        let node = model(true);
        let effects = s.handle(Event::Parsed { attempt: 2, model: node.clone() });
        assert_eq!(
            effects,
            vec![
                Effect::NotifyPhase(Phase::Rendering),
                Effect::Render { attempt: 2, model: node.clone() },
            ]
        );
        let effects = s.handle(Event::Rendered { attempt: 2, key: key_for(&node) });
        assert!(effects.contains(&Effect::NotifySuccess));
        // The watchdog was consumed when it fired
        assert!(!effects.contains(&Effect::DisarmWatchdog));
    }

    #[test]
    fn test_cancel_detaches_and_silences() {
        let mut s = session(1);
        s.handle(Event::Start { now: Instant::now() });
        s.handle(Event::Fetched { attempt: 1 });
        let node = model(true);
        s.handle(Event::Parsed { attempt: 1, model: node.clone() });
        let key = key_for(&node);
        s.handle(Event::Rendered { attempt: 1, key });

        let effects = s.handle(Event::Cancel);
        assert_eq!(effects, vec![Effect::CancelInFlight, Effect::Detach(key)]);
        assert!(s.is_cancelled());
        assert!(s.handle(Event::Cancel).is_empty());
    }

    #[test]
    fn test_empty_url_stays_idle() {
        let mut s = LoadSession::new(2, "  ", registry(1), Duration::from_secs(12));
        assert!(s.handle(Event::Start { now: Instant::now() }).is_empty());
        assert_eq!(s.phase(), Phase::Idle);
    }
}
