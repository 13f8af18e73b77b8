// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end controller runs against scripted fetchers and engines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use planview_core::{Camera, Mesh, Point3, Scene, SceneNode, Vector3};
use planview_engine::{
    BuiltinEngineLoader, EngineCandidate, EngineHandle, EngineLoader, EngineRegistry, Error,
};
use planview_loader::{
    AssetFetcher, FailureKind, FetchError, FetchEvent, FetchStream, LoadController, LoadFailure,
    LoaderConfig, Phase, Progress, ViewerEvents,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
enum Note {
    Phase(Phase),
    Progress(Progress),
    Success,
    Error(LoadFailure),
}

struct Recorder {
    tx: mpsc::UnboundedSender<Note>,
}

impl ViewerEvents for Recorder {
    fn on_phase_changed(&self, phase: Phase) {
        let _ = self.tx.send(Note::Phase(phase));
    }

    fn on_progress(&self, progress: Progress) {
        let _ = self.tx.send(Note::Progress(progress));
    }

    fn on_success(&self) {
        let _ = self.tx.send(Note::Success);
    }

    fn on_error(&self, failure: &LoadFailure) {
        let _ = self.tx.send(Note::Error(failure.clone()));
    }
}

/// Serves the URL itself (or a fixed body) as the asset, pausing
/// mid-transfer for the delay scripted for that call
struct ScriptedFetcher {
    delays: Vec<Duration>,
    body: Option<Bytes>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(delays: Vec<Duration>) -> Arc<Self> {
        Arc::new(Self {
            delays,
            body: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn serving(body: &str) -> Arc<Self> {
        Arc::new(Self {
            delays: vec![Duration::ZERO],
            body: Some(Bytes::from(body.to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    fn instant() -> Arc<Self> {
        Self::new(vec![Duration::ZERO])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn scripted_stream(
    body: Bytes,
    delay: Duration,
) -> impl Stream<Item = Result<FetchEvent, FetchError>> + Send + 'static {
    stream! {
        let total = body.len() as u64;
        yield Ok(FetchEvent::Progress { loaded: 0, total: Some(total) });
        tokio::time::sleep(delay).await;
        yield Ok(FetchEvent::Progress { loaded: total / 2, total: Some(total) });
        yield Ok(FetchEvent::Progress { loaded: total, total: Some(total) });
        yield Ok(FetchEvent::Complete(body));
    }
}

impl AssetFetcher for ScriptedFetcher {
    fn fetch(&self, url: &str) -> FetchStream {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .delays
            .get(call)
            .or(self.delays.last())
            .copied()
            .unwrap_or_default();
        let body = self
            .body
            .clone()
            .unwrap_or_else(|| Bytes::from(url.to_string()));
        scripted_stream(body, delay).boxed()
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Model,
    Empty,
    Mismatch,
    Broken,
}

struct ScriptedLoader {
    outcomes: HashMap<String, Outcome>,
}

impl ScriptedLoader {
    fn new(outcomes: &[(&str, Outcome)]) -> Arc<Self> {
        Arc::new(Self {
            outcomes: outcomes
                .iter()
                .map(|(id, outcome)| (id.to_string(), *outcome))
                .collect(),
        })
    }
}

struct ScriptedHandle {
    candidate: EngineCandidate,
    outcome: Outcome,
}

impl EngineLoader for ScriptedLoader {
    fn initialize(&self, candidate: &EngineCandidate) -> planview_engine::Result<Box<dyn EngineHandle>> {
        let outcome = self.outcomes.get(&candidate.identifier).copied().ok_or_else(|| {
            Error::Initialization {
                candidate: candidate.identifier.clone(),
                message: "not scripted".into(),
            }
        })?;
        Ok(Box::new(ScriptedHandle {
            candidate: candidate.clone(),
            outcome,
        }))
    }
}

impl EngineHandle for ScriptedHandle {
    fn candidate(&self) -> &EngineCandidate {
        &self.candidate
    }

    fn parse(self: Box<Self>, buffer: &[u8]) -> planview_engine::Result<SceneNode> {
        let name = String::from_utf8_lossy(buffer).into_owned();
        match self.outcome {
            Outcome::Model => {
                let mut mesh = Mesh::new();
                let n = Vector3::z();
                let a = mesh.add_vertex(Point3::new(0.0, 0.0, 0.0), n);
                let b = mesh.add_vertex(Point3::new(4.0, 0.0, 0.0), n);
                let c = mesh.add_vertex(Point3::new(0.0, 2.0, 0.0), n);
                mesh.add_triangle(a, b, c);
                let mut root = SceneNode::group(name, "IfcProject");
                root.push_child(SceneNode::leaf("Slab", "IfcSlab", mesh));
                Ok(root)
            }
            Outcome::Empty => Ok(SceneNode::group(name, "IfcProject")),
            Outcome::Mismatch => Err(Error::SchemaMismatch {
                engine: self.candidate.identifier.clone(),
                found: "IFC4X3".into(),
                linked: "IFC2X3".into(),
            }),
            Outcome::Broken => Err(Error::parse(12, "unterminated entity record")),
        }
    }
}

fn registry(ids: &[&str]) -> EngineRegistry {
    EngineRegistry::new(
        ids.iter()
            .map(|id| EngineCandidate::new(*id, format!("scripted:{}", id)))
            .collect(),
    )
    .unwrap()
}

fn config(watchdog_ms: u64, recovery_ms: u64) -> LoaderConfig {
    LoaderConfig {
        watchdog: Duration::from_millis(watchdog_ms),
        recovery_timeout: Duration::from_millis(recovery_ms),
        ..LoaderConfig::default()
    }
}

struct Harness {
    controller: LoadController,
    scene: Arc<Mutex<Scene>>,
    camera: Arc<Mutex<Camera>>,
    notes: mpsc::UnboundedReceiver<Note>,
}

fn harness(
    config: LoaderConfig,
    ids: &[&str],
    fetcher: Arc<ScriptedFetcher>,
    loader: Arc<ScriptedLoader>,
) -> Harness {
    harness_with(config, registry(ids), fetcher, loader)
}

fn harness_with(
    config: LoaderConfig,
    registry: EngineRegistry,
    fetcher: Arc<ScriptedFetcher>,
    loader: Arc<dyn EngineLoader>,
) -> Harness {
    let (tx, notes) = mpsc::unbounded_channel();
    let scene = Arc::new(Mutex::new(Scene::new()));
    let camera = Arc::new(Mutex::new(Camera::default()));
    let controller = LoadController::with_components(
        config,
        registry,
        fetcher,
        loader,
        scene.clone(),
        camera.clone(),
        Arc::new(Recorder { tx }),
    );
    Harness {
        controller,
        scene,
        camera,
        notes,
    }
}

/// Notifications up to and including the first success or failure
async fn settle(notes: &mut mpsc::UnboundedReceiver<Note>) -> Vec<Note> {
    let mut seen = Vec::new();
    let collect = async {
        while let Some(note) = notes.recv().await {
            let done = matches!(note, Note::Success | Note::Error(_));
            seen.push(note);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("load did not settle");
    seen
}

fn phases(notes: &[Note]) -> Vec<Phase> {
    notes
        .iter()
        .filter_map(|n| match n {
            Note::Phase(p) => Some(*p),
            _ => None,
        })
        .collect()
}

fn failure(notes: &[Note]) -> LoadFailure {
    notes
        .iter()
        .find_map(|n| match n {
            Note::Error(f) => Some(f.clone()),
            _ => None,
        })
        .expect("no failure reported")
}

#[tokio::test]
async fn test_successful_load_attaches_and_frames() {
    let mut h = harness(
        config(5_000, 1_000),
        &["a"],
        ScriptedFetcher::instant(),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("site.ifc".into()));
    let notes = settle(&mut h.notes).await;

    assert_eq!(
        phases(&notes),
        vec![
            Phase::Fetching,
            Phase::Parsing,
            Phase::Validating,
            Phase::Rendering,
            Phase::Success
        ]
    );

    let live = h.scene.lock().live_nodes();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].1.name, "site.ifc");

    let camera = h.camera.lock().clone();
    assert_ne!(camera.position, Camera::default().position);
    assert!((camera.target.x - 2.0).abs() < 1e-9);
    assert!((camera.target.y - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes_on_success() {
    let mut h = harness(
        config(5_000, 1_000),
        &["a"],
        ScriptedFetcher::instant(),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("progress.ifc".into()));
    let notes = settle(&mut h.notes).await;

    let percents: Vec<u8> = notes
        .iter()
        .filter_map(|n| match n {
            Note::Progress(Progress::Percent(p)) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert!(percents[..percents.len() - 1].iter().all(|p| *p <= 99));
}

#[tokio::test]
async fn test_cascade_falls_through_to_compatible_engine() {
    let fetcher = ScriptedFetcher::instant();
    let mut h = harness(
        config(5_000, 1_000),
        &["old", "new"],
        fetcher.clone(),
        ScriptedLoader::new(&[("old", Outcome::Mismatch), ("new", Outcome::Model)]),
    );
    h.controller.load_asset(Some("tower.ifc".into()));
    let notes = settle(&mut h.notes).await;

    assert_eq!(notes.last(), Some(&Note::Success));
    assert_eq!(
        phases(&notes),
        vec![
            Phase::Fetching,
            Phase::Parsing,
            Phase::Fetching,
            Phase::Parsing,
            Phase::Validating,
            Phase::Rendering,
            Phase::Success
        ]
    );
    // Each cascade attempt refetches
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(h.scene.lock().len(), 1);
}

#[tokio::test]
async fn test_cascade_can_reuse_fetched_buffer() {
    let fetcher = ScriptedFetcher::instant();
    let mut h = harness(
        LoaderConfig {
            reuse_fetched_buffer: true,
            ..config(5_000, 1_000)
        },
        &["old", "new"],
        fetcher.clone(),
        ScriptedLoader::new(&[("old", Outcome::Mismatch), ("new", Outcome::Model)]),
    );
    h.controller.load_asset(Some("tower.ifc".into()));
    let notes = settle(&mut h.notes).await;

    assert_eq!(notes.last(), Some(&Note::Success));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_cascade_exhaustion_names_every_candidate() {
    let mut h = harness(
        config(5_000, 1_000),
        &["c0", "c1"],
        ScriptedFetcher::instant(),
        ScriptedLoader::new(&[("c0", Outcome::Mismatch)]),
    );
    h.controller.load_asset(Some("legacy.ifc".into()));
    let notes = settle(&mut h.notes).await;

    let failure = failure(&notes);
    assert_eq!(failure.kind, FailureKind::VersionMismatch);
    assert_eq!(failure.asset_url, "legacy.ifc");
    assert!(failure.message.contains("c0"));
    assert!(failure.message.contains("c1"));
    assert_eq!(phases(&notes).last(), Some(&Phase::Failed));
    assert!(h.scene.lock().is_empty());
}

#[tokio::test]
async fn test_empty_geometry_fails_without_rendering() {
    let mut h = harness(
        config(5_000, 1_000),
        &["a", "b"],
        ScriptedFetcher::instant(),
        ScriptedLoader::new(&[("a", Outcome::Empty), ("b", Outcome::Model)]),
    );
    h.controller.load_asset(Some("empty.ifc".into()));
    let notes = settle(&mut h.notes).await;

    assert_eq!(failure(&notes).kind, FailureKind::EmptyGeometry);
    assert!(!phases(&notes).contains(&Phase::Rendering));
    assert!(h.scene.lock().is_empty());
}

#[tokio::test]
async fn test_other_parse_error_does_not_cascade() {
    let fetcher = ScriptedFetcher::instant();
    let mut h = harness(
        config(5_000, 1_000),
        &["a", "b"],
        fetcher.clone(),
        ScriptedLoader::new(&[("a", Outcome::Broken), ("b", Outcome::Model)]),
    );
    h.controller.load_asset(Some("broken.ifc".into()));
    let notes = settle(&mut h.notes).await;

    assert_eq!(failure(&notes).kind, FailureKind::NetworkOrParseOther);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_watchdog_recovery_success() {
    let mut h = harness(
        config(100, 2_000),
        &["a"],
        ScriptedFetcher::new(vec![Duration::from_secs(30), Duration::ZERO]),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("slow.ifc".into()));
    let notes = settle(&mut h.notes).await;

    assert_eq!(
        phases(&notes),
        vec![
            Phase::Fetching,
            Phase::TimeoutRetry,
            Phase::Rendering,
            Phase::Success
        ]
    );
    assert!(notes.contains(&Note::Progress(Progress::Indeterminate)));
    assert_eq!(h.scene.lock().len(), 1);
}

#[tokio::test]
async fn test_watchdog_recovery_timeout_is_terminal() {
    let mut h = harness(
        config(100, 100),
        &["a"],
        ScriptedFetcher::new(vec![Duration::from_secs(30)]),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("stuck.ifc".into()));
    let notes = settle(&mut h.notes).await;

    assert_eq!(
        phases(&notes),
        vec![Phase::Fetching, Phase::TimeoutRetry, Phase::Failed]
    );
    assert_eq!(failure(&notes).kind, FailureKind::TimeoutExhausted);

    // Fires once per session
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.notes.try_recv().is_err());
}

#[tokio::test]
async fn test_new_url_supersedes_in_flight_load() {
    let mut h = harness(
        config(5_000, 1_000),
        &["a"],
        ScriptedFetcher::new(vec![Duration::from_millis(300), Duration::ZERO]),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("first.ifc".into()));
    h.controller.load_asset(Some("second.ifc".into()));
    let notes = settle(&mut h.notes).await;
    assert_eq!(notes.last(), Some(&Note::Success));

    // Let the first transfer's delay run out; nothing of it may surface
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(h.notes.try_recv().is_err());

    let live = h.scene.lock().live_nodes();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].1.name, "second.ifc");
}

#[tokio::test]
async fn test_clearing_detaches_model() {
    let mut h = harness(
        config(5_000, 1_000),
        &["a"],
        ScriptedFetcher::instant(),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("site.ifc".into()));
    settle(&mut h.notes).await;
    assert_eq!(h.scene.lock().len(), 1);

    h.controller.load_asset(None);
    let idle = tokio::time::timeout(Duration::from_secs(5), h.notes.recv())
        .await
        .unwrap();
    assert_eq!(idle, Some(Note::Phase(Phase::Idle)));
    assert!(h.scene.lock().is_empty());
}

#[tokio::test]
async fn test_shutdown_detaches_model() {
    let mut h = harness(
        config(5_000, 1_000),
        &["a"],
        ScriptedFetcher::instant(),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("site.ifc".into()));
    settle(&mut h.notes).await;

    let scene = h.scene.clone();
    h.controller.shutdown().await;
    assert!(scene.lock().is_empty());
}

#[tokio::test]
async fn test_superseding_a_finished_load_detaches_it() {
    let mut h = harness(
        config(5_000, 1_000),
        &["a"],
        ScriptedFetcher::instant(),
        ScriptedLoader::new(&[("a", Outcome::Model)]),
    );
    h.controller.load_asset(Some("first.ifc".into()));
    assert_eq!(settle(&mut h.notes).await.last(), Some(&Note::Success));
    let first_key = h.scene.lock().live_nodes()[0].0;

    h.controller.load_asset(Some("second.ifc".into()));
    assert_eq!(settle(&mut h.notes).await.last(), Some(&Note::Success));

    let scene = h.scene.lock();
    assert_eq!(scene.len(), 1);
    assert!(!scene.contains(first_key));
    assert_eq!(scene.live_nodes()[0].1.name, "second.ifc");
}

/// Builtin-engine asset whose only product record is malformed, with text
/// that resembles a link error
const MALFORMED_IFC: &str = "ISO-10303-21;
HEADER;
FILE_DESCRIPTION(('ViewDefinition [CoordinationView]'),'2;1');
FILE_NAME('broken.ifc','2024-05-01T10:00:00',(''),(''),'IfcOpenShell 0.7.0','IfcOpenShell 0.7.0','Nobody');
FILE_SCHEMA(('IFC4'));
ENDSEC;
DATA;
#1=IFCPROJECT('0YvctVUKr0kugbFTf53O9L',$,'Broken Project',$,$,$,$,$,$);
#100=IFCCOLUMN('g' $,'Import #2 column',$,$,$,$,$,$);
ENDSEC;
END-ISO-10303-21;
";

#[tokio::test]
async fn test_malformed_asset_fails_without_cascading() {
    let fetcher = ScriptedFetcher::serving(MALFORMED_IFC);
    let mut h = harness_with(
        config(5_000, 1_000),
        EngineRegistry::builtin(),
        fetcher.clone(),
        Arc::new(BuiltinEngineLoader::new()),
    );
    h.controller.load_asset(Some("broken.ifc".into()));
    let notes = settle(&mut h.notes).await;

    let failure = failure(&notes);
    assert_eq!(failure.kind, FailureKind::NetworkOrParseOther);
    assert!(failure.message.contains("Import #2"), "{}", failure.message);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(
        phases(&notes),
        vec![Phase::Fetching, Phase::Parsing, Phase::Failed]
    );
}
