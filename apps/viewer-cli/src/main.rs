// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planview - headless viewer shell.
//!
//! Loads one IFC asset through the load controller, then prints a JSON
//! summary of the attached scene and the framed camera.
//!
//! ```text
//! planview <asset-url> [--backend <url>] [--watchdog-secs <n>]
//!          [--multiplier <k>] [--engines <json>]
//! ```
//!
//! Relative asset paths such as `/download/plan.ifc` are joined onto the
//! backend base URL (`--backend` or `PLANVIEW_BACKEND_URL`).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use parking_lot::Mutex;
use planview_core::{count_renderable, BoundingVolume, Camera, Scene};
use planview_engine::EngineRegistry;
use planview_loader::{
    registry_from_env, LoadController, LoadFailure, LoaderConfig, Phase, Progress, TracingEvents,
    ViewerEvents,
};
use reqwest::Url;
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: planview <asset-url> [--backend <url>] [--watchdog-secs <n>] [--multiplier <k>] [--engines <json>]";

#[derive(Debug, Default)]
struct Args {
    asset: String,
    backend: Option<String>,
    watchdog_secs: Option<u64>,
    multiplier: Option<f64>,
    engines: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Args::default();
        let mut asset = None;

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| args.next().with_context(|| format!("{} needs a value", flag));
            match arg.as_str() {
                "--backend" => parsed.backend = Some(value("--backend")?),
                "--watchdog-secs" => {
                    parsed.watchdog_secs = Some(value("--watchdog-secs")?.parse().context("invalid --watchdog-secs")?)
                }
                "--multiplier" => {
                    parsed.multiplier = Some(value("--multiplier")?.parse().context("invalid --multiplier")?)
                }
                "--engines" => parsed.engines = Some(value("--engines")?),
                "-h" | "--help" => bail!(USAGE),
                flag if flag.starts_with("--") => bail!("unknown option {}\n{}", flag, USAGE),
                _ if asset.is_none() => asset = Some(arg),
                _ => bail!("unexpected argument {}\n{}", arg, USAGE),
            }
        }

        parsed.asset = asset.context(USAGE)?;
        Ok(parsed)
    }
}

/// Absolute URLs pass through, relative paths join the backend base when
/// one is configured, and anything else is a local path
fn resolve_asset_url(asset: &str, backend: Option<&str>) -> anyhow::Result<String> {
    if asset.contains("://") || asset.starts_with("file:") {
        return Ok(asset.to_string());
    }
    match backend {
        Some(base) => {
            let base = Url::parse(base).with_context(|| format!("invalid backend URL {}", base))?;
            let joined = base
                .join(asset)
                .with_context(|| format!("cannot join {} onto {}", asset, base))?;
            Ok(joined.to_string())
        }
        None => Ok(asset.to_string()),
    }
}

/// Logs through [`TracingEvents`] and reports phases back to `main`
struct ShellEvents {
    log: TracingEvents,
    phases: mpsc::UnboundedSender<Phase>,
    failure: Mutex<Option<LoadFailure>>,
}

impl ViewerEvents for ShellEvents {
    fn on_phase_changed(&self, phase: Phase) {
        self.log.on_phase_changed(phase);
        let _ = self.phases.send(phase);
    }

    fn on_progress(&self, progress: Progress) {
        self.log.on_progress(progress);
    }

    fn on_success(&self) {
        self.log.on_success();
    }

    fn on_error(&self, failure: &LoadFailure) {
        self.log.on_error(failure);
        *self.failure.lock() = Some(failure.clone());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,planview_loader=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    let mut config = LoaderConfig::from_env();
    if let Some(secs) = args.watchdog_secs {
        config.watchdog = LoaderConfig::clamp_watchdog(secs);
    }
    if let Some(multiplier) = args.multiplier {
        config.framing_multiplier = LoaderConfig::clamp_multiplier(multiplier);
    }

    let registry = match &args.engines {
        Some(json) => EngineRegistry::from_json(json).context("invalid --engines")?,
        None => registry_from_env().context("invalid PLANVIEW_ENGINES")?,
    };

    let backend = args
        .backend
        .clone()
        .or_else(|| std::env::var("PLANVIEW_BACKEND_URL").ok());
    let url = resolve_asset_url(&args.asset, backend.as_deref())?;

    tracing::info!(
        url = %url,
        watchdog_secs = config.watchdog.as_secs(),
        multiplier = config.framing_multiplier,
        engines = registry.len(),
        "Starting planview"
    );

    // Upper bound on one session: watchdog, then one bounded recovery
    let limit = config.watchdog + config.recovery_timeout + Duration::from_secs(5);

    let scene = Arc::new(Mutex::new(Scene::new()));
    let camera = Arc::new(Mutex::new(Camera::default()));
    let (phase_tx, mut phase_rx) = mpsc::unbounded_channel();
    let events = Arc::new(ShellEvents {
        log: TracingEvents,
        phases: phase_tx,
        failure: Mutex::new(None),
    });

    let controller = LoadController::new(config, registry, scene.clone(), camera.clone(), events.clone());
    controller.load_asset(Some(url.clone()));

    let settled = tokio::time::timeout(limit, async {
        while let Some(phase) = phase_rx.recv().await {
            if phase.is_terminal() {
                return Some(phase);
            }
        }
        None
    })
    .await;

    let phase = match settled {
        Ok(Some(phase)) => phase,
        Ok(None) => bail!("load controller stopped unexpectedly"),
        Err(_) => bail!("load did not settle within {} s", limit.as_secs()),
    };

    let summary = {
        let scene = scene.lock();
        let camera = camera.lock();
        let models = scene.live_nodes();
        let nodes: usize = models.iter().map(|(_, m)| m.node_count()).sum();
        let renderable: usize = models.iter().map(|(_, m)| count_renderable(m)).sum();
        let bounds = models.first().map(|(_, m)| BoundingVolume::of_node(m));
        let failure = events.failure.lock().clone();

        json!({
            "url": url,
            "phase": phase.as_str(),
            "nodes": nodes,
            "renderable_meshes": renderable,
            "bounds": bounds.filter(|b| b.is_valid()).map(|b| json!({
                "min": [b.min.x, b.min.y, b.min.z],
                "max": [b.max.x, b.max.y, b.max.z],
            })),
            "camera": {
                "position": [camera.position.x, camera.position.y, camera.position.z],
                "target": [camera.target.x, camera.target.y, camera.target.z],
                "near": camera.near,
                "far": camera.far,
            },
            "error": failure.map(|f| json!({ "kind": f.kind.as_str(), "message": f.message })),
        })
    };

    controller.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(if phase == Phase::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        Args::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["plan.ifc", "--watchdog-secs", "14", "--multiplier", "2.2"]).unwrap();
        assert_eq!(parsed.asset, "plan.ifc");
        assert_eq!(parsed.watchdog_secs, Some(14));
        assert_eq!(parsed.multiplier, Some(2.2));
        assert!(parsed.backend.is_none());
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(args(&[]).is_err());
        assert!(args(&["a.ifc", "b.ifc"]).is_err());
        assert!(args(&["a.ifc", "--watchdog-secs"]).is_err());
        assert!(args(&["a.ifc", "--colour", "red"]).is_err());
    }

    #[test]
    fn test_resolve_relative_against_backend() {
        let url = resolve_asset_url("/download/plan.ifc", Some("http://localhost:8000/api/")).unwrap();
        assert_eq!(url, "http://localhost:8000/download/plan.ifc");

        let url = resolve_asset_url("download/plan.ifc", Some("http://localhost:8000/api/")).unwrap();
        assert_eq!(url, "http://localhost:8000/api/download/plan.ifc");
    }

    #[test]
    fn test_resolve_passthrough() {
        assert_eq!(
            resolve_asset_url("https://cdn.example.com/a.ifc", Some("http://localhost:8000")).unwrap(),
            "https://cdn.example.com/a.ifc"
        );
        assert_eq!(resolve_asset_url("models/a.ifc", None).unwrap(), "models/a.ifc");
    }
}
