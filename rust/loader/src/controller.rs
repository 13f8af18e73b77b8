// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Load controller: the single task that owns the current [`LoadSession`].
//!
//! Commands from the viewer and results from fetch/parse workers arrive on
//! channels and are applied one at a time, so phase transitions and scene or
//! camera mutations never interleave. Worker results are tagged with the
//! session id and attempt; anything from a superseded session or attempt is
//! dropped without notifying the viewer.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use planview_core::{BoundingVolume, Camera, CameraFramer, Scene, SceneNode};
use planview_engine::{BuiltinEngineLoader, EngineCandidate, EngineLoader, EngineRegistry};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::LoaderConfig;
use crate::error::FailureKind;
use crate::events::ViewerEvents;
use crate::fetch::{AssetFetcher, FetchEvent, SchemeFetcher};
use crate::session::{Effect, Event, LoadSession, Phase, SessionId};

enum Command {
    Load(Option<String>),
    Shutdown(Option<oneshot::Sender<()>>),
}

type WorkerMessage = (SessionId, Event);

/// Handle to the controller driver task.
///
/// Must be created inside a tokio runtime. Dropping the handle tears the
/// viewer down like [`LoadController::shutdown`], without waiting.
pub struct LoadController {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl LoadController {
    /// Controller with the built-in engines and the scheme-dispatching fetcher
    pub fn new(
        config: LoaderConfig,
        registry: EngineRegistry,
        scene: Arc<Mutex<Scene>>,
        camera: Arc<Mutex<Camera>>,
        events: Arc<dyn ViewerEvents>,
    ) -> Self {
        Self::with_components(
            config,
            registry,
            Arc::new(SchemeFetcher::new()),
            Arc::new(BuiltinEngineLoader::new()),
            scene,
            camera,
            events,
        )
    }

    pub fn with_components(
        config: LoaderConfig,
        registry: EngineRegistry,
        fetcher: Arc<dyn AssetFetcher>,
        engines: Arc<dyn EngineLoader>,
        scene: Arc<Mutex<Scene>>,
        camera: Arc<Mutex<Camera>>,
        events: Arc<dyn ViewerEvents>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            framer: CameraFramer::new(config.framing_multiplier),
            config,
            registry: Arc::new(registry),
            fetcher,
            engines,
            scene,
            camera,
            events,
            worker_tx,
            next_session: 1,
            current: None,
        };
        let task = tokio::spawn(driver.run(command_rx, worker_rx));

        Self {
            commands: command_tx,
            task: Some(task),
        }
    }

    /// Present a new asset URL. `None` or an empty string clears the viewer.
    pub fn load_asset(&self, url: Option<String>) {
        if self.commands.send(Command::Load(url)).is_err() {
            tracing::warn!("load requested after the controller stopped");
        }
    }

    /// Detach the current model, cancel in-flight work and stop the driver
    pub async fn shutdown(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(Some(ack_tx))).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LoadController {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(Command::Shutdown(None));
        }
    }
}

struct Active {
    session: LoadSession,
    /// Cancels everything spawned for the session
    cancel: CancellationToken,
    /// Cancels the running attempt only
    attempt_cancel: CancellationToken,
    /// Fetched buffer kept for cascade retries when enabled
    buffer: Option<Arc<Mutex<Option<Bytes>>>>,
}

struct Driver {
    config: LoaderConfig,
    registry: Arc<EngineRegistry>,
    fetcher: Arc<dyn AssetFetcher>,
    engines: Arc<dyn EngineLoader>,
    scene: Arc<Mutex<Scene>>,
    camera: Arc<Mutex<Camera>>,
    events: Arc<dyn ViewerEvents>,
    framer: CameraFramer,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
    next_session: SessionId,
    current: Option<Active>,
}

async fn watchdog_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut workers: mpsc::UnboundedReceiver<WorkerMessage>,
    ) {
        loop {
            let deadline = self
                .current
                .as_ref()
                .and_then(|active| active.session.watchdog_deadline());

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Load(url)) => self.load(url),
                    Some(Command::Shutdown(ack)) => {
                        self.teardown();
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        break;
                    }
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some((session, event)) = workers.recv() => {
                    let is_current = self
                        .current
                        .as_ref()
                        .is_some_and(|active| active.session.id() == session);
                    if is_current {
                        self.apply(event);
                    } else {
                        tracing::trace!(session, "dropping message from superseded session");
                    }
                }
                _ = watchdog_sleep(deadline) => self.apply(Event::WatchdogFired),
            }
        }
        tracing::debug!("load controller stopped");
    }

    fn load(&mut self, url: Option<String>) {
        let url = url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        if let (Some(url), Some(active)) = (&url, &self.current) {
            if active.session.asset_url() == url && !active.session.phase().is_terminal() {
                tracing::debug!(url = %url, "asset already loading");
                return;
            }
        }

        // Supersede: the previous model leaves the scene in this same step
        self.teardown();

        let Some(url) = url else {
            self.events.on_phase_changed(Phase::Idle);
            return;
        };

        let id = self.next_session;
        self.next_session += 1;
        tracing::info!(session = id, url = %url, "starting load session");

        let cancel = CancellationToken::new();
        self.current = Some(Active {
            session: LoadSession::new(id, url, self.registry.clone(), self.config.watchdog),
            attempt_cancel: cancel.child_token(),
            cancel,
            buffer: self
                .config
                .reuse_fetched_buffer
                .then(|| Arc::new(Mutex::new(None))),
        });
        self.apply(Event::Start { now: Instant::now() });
    }

    /// Cancel and discard the current session, if any
    fn teardown(&mut self) {
        if self.current.is_some() {
            self.apply(Event::Cancel);
            if let Some(active) = self.current.take() {
                active.cancel.cancel();
            }
        }
    }

    /// Feed an event to the current session and run the resulting effects,
    /// including any follow-up events they produce
    fn apply(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let Some(active) = self.current.as_mut() else {
                return;
            };
            for effect in active.session.handle(event) {
                if let Some(next) = self.execute(effect) {
                    queue.push_back(next);
                }
            }
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::NotifyPhase(phase) => self.events.on_phase_changed(phase),
            Effect::NotifyProgress(progress) => self.events.on_progress(progress),
            Effect::NotifySuccess => self.events.on_success(),
            Effect::NotifyFailure(failure) => self.events.on_error(&failure),
            Effect::ArmWatchdog(deadline) => {
                tracing::debug!(in_ms = ?deadline.saturating_duration_since(Instant::now()).as_millis(), "watchdog armed");
            }
            Effect::DisarmWatchdog => tracing::debug!("watchdog disarmed"),
            Effect::StartAttempt { attempt, candidate } => self.spawn_attempt(attempt, candidate),
            Effect::StartRecovery { attempt, candidate } => self.spawn_recovery(attempt, candidate),
            Effect::CancelInFlight => {
                if let Some(active) = self.current.as_mut() {
                    active.attempt_cancel.cancel();
                    active.attempt_cancel = active.cancel.child_token();
                }
            }
            Effect::Render { attempt, model } => return Some(self.render(attempt, model)),
            Effect::Detach(key) => {
                if self.scene.lock().detach(key) {
                    tracing::debug!("detached previous model");
                }
            }
        }
        None
    }

    fn render(&mut self, attempt: u32, model: Arc<SceneNode>) -> Event {
        let key = self.scene.lock().attach(&model);
        let volume = BoundingVolume::of_node(&model);
        let framing = self.framer.frame(&mut self.camera.lock(), &volume);
        tracing::info!(
            nodes = model.node_count(),
            meshes = model.mesh_count(),
            distance = framing.distance,
            "model attached and framed"
        );
        Event::Rendered { attempt, key }
    }

    fn candidate(&self, index: usize) -> Option<EngineCandidate> {
        self.registry.get(index).cloned()
    }

    fn spawn_attempt(&mut self, attempt: u32, candidate_index: usize) {
        let Some(active) = self.current.as_ref() else {
            return;
        };
        let Some(candidate) = self.candidate(candidate_index) else {
            return;
        };

        let session = active.session.id();
        let url = active.session.asset_url().to_string();
        let token = active.attempt_cancel.clone();
        let cached = active.buffer.clone();
        let fetcher = self.fetcher.clone();
        let engines = self.engines.clone();
        let tx = self.worker_tx.clone();
        let send = move |event: Event| {
            let _ = tx.send((session, event));
        };

        tracing::debug!(session, attempt, candidate = %candidate.identifier, "starting attempt");
        tokio::spawn(async move {
            let reused = cached.as_ref().and_then(|slot| slot.lock().clone());
            let buffer = match reused {
                Some(buffer) => buffer,
                None => {
                    let mut transfer = fetcher.fetch(&url);
                    loop {
                        let item = tokio::select! {
                            _ = token.cancelled() => return,
                            item = transfer.next() => item,
                        };
                        match item {
                            Some(Ok(FetchEvent::Progress { loaded, total })) => {
                                send(Event::Progress { attempt, loaded, total })
                            }
                            Some(Ok(FetchEvent::Complete(bytes))) => break bytes,
                            Some(Err(e)) => {
                                send(Event::FetchFailed { attempt, message: e.to_string() });
                                return;
                            }
                            None => {
                                send(Event::FetchFailed {
                                    attempt,
                                    message: "transfer ended before the asset was complete".into(),
                                });
                                return;
                            }
                        }
                    }
                }
            };

            if let Some(slot) = &cached {
                *slot.lock() = Some(buffer.clone());
            }
            send(Event::Fetched { attempt });

            let parsed = parse_blocking(engines, candidate, buffer).await;
            if token.is_cancelled() {
                return;
            }
            match parsed {
                Ok(model) => send(Event::Parsed { attempt, model }),
                Err((kind, message)) => send(Event::ParseFailed { attempt, kind, message }),
            }
        });
    }

    fn spawn_recovery(&mut self, attempt: u32, candidate_index: usize) {
        let Some(active) = self.current.as_ref() else {
            return;
        };
        let session = active.session.id();
        let url = active.session.asset_url().to_string();
        let token = active.attempt_cancel.clone();
        let fetcher = self.fetcher.clone();
        let engines = self.engines.clone();
        let tx = self.worker_tx.clone();
        let limit = self.config.recovery_timeout;
        let candidate = self.candidate(candidate_index);

        tracing::info!(session, attempt, limit_ms = limit.as_millis() as u64, "starting timeout recovery");
        tokio::spawn(async move {
            let recovery = async {
                let candidate = candidate.ok_or_else(|| "no engine candidate selected".to_string())?;
                let buffer = fetcher.fetch_all(&url).await.map_err(|e| e.to_string())?;
                parse_blocking(engines, candidate, buffer)
                    .await
                    .map_err(|(_, message)| message)
            };

            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = tokio::time::timeout(limit, recovery) => outcome,
            };
            let event = match outcome {
                Ok(Ok(model)) => Event::Parsed { attempt, model },
                Ok(Err(message)) => Event::RecoveryFailed { attempt, message },
                Err(_) => Event::RecoveryFailed {
                    attempt,
                    message: format!("recovery exceeded {} ms", limit.as_millis()),
                },
            };
            let _ = tx.send((session, event));
        });
    }
}

/// Initialize a fresh engine handle and parse off the async runtime.
///
/// Failures are classified here, while the typed engine error is at hand.
async fn parse_blocking(
    engines: Arc<dyn EngineLoader>,
    candidate: EngineCandidate,
    buffer: Bytes,
) -> Result<Arc<SceneNode>, (FailureKind, String)> {
    let joined = tokio::task::spawn_blocking(move || {
        let handle = engines.initialize(&candidate)?;
        handle.parse(&buffer)
    })
    .await;

    match joined {
        Ok(Ok(model)) => Ok(Arc::new(model)),
        Ok(Err(e)) => Err((FailureKind::of_engine_error(&e), e.to_string())),
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "engine panicked".to_string());
            Err((
                FailureKind::classify(&message),
                format!("engine task failed: {}", message),
            ))
        }
        Err(e) => Err((
            FailureKind::NetworkOrParseOther,
            format!("engine task failed: {}", e),
        )),
    }
}
