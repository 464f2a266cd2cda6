//! Scroll Journey
//!
//! Builds a journey of mock scenes along the loading axis and drives the
//! progressive loader from a simulated scroll, logging progress as it goes.
//!
//! Run with: cargo run -p scroll-journey [config.json]
//!
//! The config path may also be given in `SCROLL_JOURNEY_CONFIG`. Set
//! `RUST_LOG=debug` to see individual scheduling decisions.

use glam::Vec3;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use void_asset::resources::PlaceholderResource;
use void_asset::{AssetDescriptor, AssetKind, AssetPriority, ProduceError, Resource};
use void_streaming::{
    LoadingAxis, LoadingProgress, ProgressiveLoader, QualityHint, SceneRegistration,
    StreamingConfig, StreamingEvent,
};

/// Scroll distance covered by the whole journey
const JOURNEY_LENGTH: f32 = 160.0;
const FRAMES: u32 = 240;
const FRAME: Duration = Duration::from_millis(16);

/// Scene names and their anchors on the loading axis
const SCENES: [(&str, f32); 4] = [
    ("intro", 0.0),
    ("lab", 45.0),
    ("hologram", 90.0),
    ("finale", 140.0),
];

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        log::error!("Journey aborted: {}", e);
        std::process::exit(1);
    }
}

fn load_config() -> StreamingConfig {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SCROLL_JOURNEY_CONFIG").ok());
    let Some(path) = path else {
        return StreamingConfig::default();
    };

    let loaded = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|json| StreamingConfig::from_json(&json).map_err(|e| e.to_string()));
    match loaded {
        Ok(config) => {
            log::info!("Loaded streaming config from {}", path);
            config
        }
        Err(e) => {
            log::warn!("Ignoring config {}: {}", path, e);
            StreamingConfig::default()
        }
    }
}

async fn run(config: StreamingConfig) -> void_streaming::Result<()> {
    let loader = ProgressiveLoader::new(config, Handle::current())?;
    for (name, anchor) in SCENES {
        loader.register_scene(build_scene(name, anchor))?;
    }

    let summary = loader.preload_critical_assets().await;
    log::info!(
        "Critical preload: {} loaded, {} failed",
        summary.loaded.len(),
        summary.failed.len()
    );

    let axis = LoadingAxis::default();
    let mut ticker = tokio::time::interval(FRAME);
    for frame in 0..=FRAMES {
        ticker.tick().await;

        // Simulate the device dropping to medium quality halfway through
        if frame == FRAMES / 2 {
            loader.set_quality(QualityHint::Medium);
        }

        let scroll = frame as f32 / FRAMES as f32;
        let camera = axis.point_at(scroll * JOURNEY_LENGTH) + Vec3::Y * 2.0;
        loader.update_camera(&axis, camera);

        for event in loader.drain_events() {
            log_event(&event);
        }
        if frame % 30 == 0 {
            log_progress(scroll, &loader.get_loading_progress());
        }
    }

    // Let in-flight loads land before tearing down
    tokio::time::sleep(Duration::from_millis(200)).await;
    for event in loader.drain_events() {
        log_event(&event);
    }

    let stats = loader.stats();
    log::info!(
        "Scenes [unloaded, loading, active] = {:?}; {} resident, {} disposed, peak {} in flight",
        stats.scenes_by_state,
        stats.resident_resources,
        stats.disposed_resources,
        stats.peak_in_flight
    );
    log::info!("Health: {:?}", loader.health_status());

    let released: usize = loader.shutdown().iter().map(|r| r.released()).sum();
    log::info!("Shutdown released {} resources", released);
    Ok(())
}

fn build_scene(name: &str, anchor: f32) -> SceneRegistration {
    let albedo = format!("{name}/albedo");
    let mut scene = SceneRegistration::new(name, 15.0, 25.0)
        .with_anchor(anchor)
        .with_asset(mock(format!("{name}/hero"), AssetKind::Geometry, 8).with_priority(AssetPriority::Critical))
        .with_asset(mock(albedo.clone(), AssetKind::Texture, 6).with_priority(AssetPriority::High))
        .with_asset(
            mock(format!("{name}/material"), AssetKind::Material, 2)
                .with_priority(AssetPriority::High)
                .with_dependency(albedo),
        )
        .with_asset(mock(format!("{name}/props"), AssetKind::Composite, 4).with_priority(AssetPriority::Low));

    if name == "hologram" {
        scene = scene.with_asset(broken(format!("{name}/shader"), 3));
    }
    scene
}

/// Descriptor whose producer takes time proportional to its size
fn mock(id: String, kind: AssetKind, size: u64) -> AssetDescriptor {
    let label = id.clone();
    AssetDescriptor::new(id, kind, move || {
        let label = label.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(size * 12)).await;
            Ok::<Resource, ProduceError>(Arc::new(PlaceholderResource::new(label, kind, size * 1024)))
        }
    })
    .with_size(size)
}

fn broken(id: String, size: u64) -> AssetDescriptor {
    AssetDescriptor::new(id, AssetKind::Material, move || async move {
        tokio::time::sleep(Duration::from_millis(size * 12)).await;
        Err::<Resource, ProduceError>(ProduceError::from("shader failed to compile"))
    })
    .with_size(size)
}

fn log_event(event: &StreamingEvent) {
    match event {
        StreamingEvent::SceneEntered(scene) => log::info!("-> {} entered", scene),
        StreamingEvent::SceneActivated { scene, degraded } if degraded.is_empty() => {
            log::info!("** {} active", scene)
        }
        StreamingEvent::SceneActivated { scene, degraded } => {
            log::warn!("** {} active without {:?}", scene, degraded)
        }
        StreamingEvent::SceneEvicted { scene, disposed } => {
            log::info!("<- {} evicted ({} resources)", scene, disposed)
        }
        StreamingEvent::AssetFailed(id, e) => log::warn!("!! {}: {}", id, e),
        StreamingEvent::AssetLoaded(id) => log::debug!("   {} loaded", id),
        StreamingEvent::ResourceDisposed(id) => log::debug!("   {} disposed", id),
    }
}

fn log_progress(scroll: f32, progress: &LoadingProgress) {
    let eta = progress
        .estimated_time_remaining
        .map(|d| format!("{:.1}s", d.as_secs_f32()))
        .unwrap_or_else(|| "?".to_string());
    log::info!(
        "scroll {:>3.0}% | settled {}/{} ({:.0}%) | eta {}",
        scroll * 100.0,
        progress.loaded,
        progress.total,
        progress.fraction_complete * 100.0,
        eta
    );
    if let Some(e) = &progress.last_error {
        log::debug!("last error: {}", e);
    }
}
