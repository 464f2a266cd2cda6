//! Progressive Loader
//!
//! Wires the window tracker, the load queue and the memory manager together.
//! `update_position` is the only input that drives scheduling:
//!
//! - scenes that enter their preload window get their assets requested in
//!   priority order, and are activated once every asset has settled
//! - scenes that move past their unload distance are evicted synchronously;
//!   pending loads are cancelled and resident resources disposed
//!
//! Nothing here returns an error from the per-frame path. Asset failures are
//! recorded per id and surface through [`LoadingProgress::last_error`].

use crate::config::{QualityHint, StreamingConfig};
use crate::error::{ConfigError, Result};
use crate::events::StreamingEvent;
use crate::memory::{Deactivation, DisposalReport, MemoryEvent, MemoryManager};
use crate::progress::LoadingProgress;
use crate::scene::{SceneId, SceneRegistration, SceneState};
use crate::window::{LoadingAxis, SceneWindow, WindowTracker, WindowTransitions};
use futures_util::future;
use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use void_asset::{
    AssetDescriptor, AssetId, AssetPriority, AssetRegistry, LoadError, LoadFuture, LoadQueue,
    LoadResult, LoadedAsset, QueueEvent, ResidencySink,
};

/// Failed assets at which health is reported critical
const CRITICAL_FAILURE_THRESHOLD: u32 = 5;

/// Outcome of a batch of loads
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadSummary {
    pub loaded: Vec<AssetId>,
    pub failed: Vec<(AssetId, LoadError)>,
}

impl LoadSummary {
    fn collect(ids: Vec<AssetId>, results: Vec<LoadResult<LoadedAsset>>) -> Self {
        let mut summary = Self::default();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(_) => summary.loaded.push(id),
                Err(e) => summary.failed.push((id, e)),
            }
        }
        summary
    }

    /// Check if nothing failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Health status of the loader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamingHealthStatus {
    /// No failed assets
    Healthy,
    /// Some assets failed; scenes run degraded
    Degraded { failed_assets: u32 },
    /// A critical asset failed, or too many assets did
    Critical { failed_assets: u32 },
}

/// Loader statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    pub total_scenes: usize,
    /// [unloaded, loading, active]
    pub scenes_by_state: [u32; 3],
    pub queued_loads: usize,
    pub loading_assets: usize,
    pub loaded_assets: usize,
    pub failed_assets: usize,
    pub peak_in_flight: usize,
    pub resident_resources: usize,
    pub disposed_resources: u64,
}

struct SceneRecord {
    window: SceneWindow,
    /// Assets in authoring order
    assets: Vec<(AssetId, AssetPriority)>,
    state: SceneState,
    /// Bumped on every enter/exit so stale completions are ignored
    generation: u64,
}

impl SceneRecord {
    fn asset_ids(&self) -> Vec<AssetId> {
        self.assets.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Highest priority first, authoring order within a class
    fn load_order(&self) -> Vec<AssetId> {
        let mut assets = self.assets.clone();
        assets.sort_by(|a, b| b.1.cmp(&a.1));
        assets.into_iter().map(|(id, _)| id).collect()
    }
}

struct LoaderState {
    scenes: HashMap<SceneId, SceneRecord>,
    order: Vec<SceneId>,
    tracker: WindowTracker,
    quality: QualityHint,
    /// Activations taken through [`ProgressiveLoader::activate_scene`]
    external_holds: HashMap<SceneId, u32>,
    events: Vec<StreamingEvent>,
}

struct Eviction {
    scene: SceneId,
    previous: SceneState,
    assets: Vec<AssetId>,
}

struct SceneLoad {
    scene: SceneId,
    generation: u64,
    assets: Vec<AssetId>,
}

#[derive(Default)]
struct LoadPlan {
    evict: Vec<Eviction>,
    load: Vec<SceneLoad>,
}

/// Routes finished loads into the owning scene's handle list
struct SceneResidency {
    owners: Arc<RwLock<HashMap<AssetId, SceneId>>>,
    memory: Arc<MemoryManager>,
}

impl ResidencySink for SceneResidency {
    fn on_loaded(&self, asset: &LoadedAsset) {
        let owner = self.owners.read().get(&asset.id).cloned();
        let Some(scene) = owner else {
            return;
        };
        if let Err(e) = self.memory.register_scene_assets(&scene, [asset.clone()]) {
            log::warn!("Could not track {} for scene {}: {}", asset.id, scene, e);
        }
    }

    fn dispose_orphan(&self, asset: LoadedAsset) {
        self.memory.dispose_orphan(asset);
    }
}

struct LoaderShared {
    config: StreamingConfig,
    runtime: Handle,
    queue: LoadQueue,
    memory: Arc<MemoryManager>,
    owners: Arc<RwLock<HashMap<AssetId, SceneId>>>,
    state: Mutex<LoaderState>,
}

/// Scroll-driven progressive loader
///
/// Cheap to clone; clones drive the same journey. Construct one per journey
/// and pass it to whoever needs it.
#[derive(Clone)]
pub struct ProgressiveLoader {
    inner: Arc<LoaderShared>,
}

impl ProgressiveLoader {
    /// Create a loader that spawns its background work on `runtime`
    pub fn new(config: StreamingConfig, runtime: Handle) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(RwLock::new(AssetRegistry::new()));
        let queue = LoadQueue::new(config.queue_config(), registry, runtime.clone());
        let memory = Arc::new(MemoryManager::new());
        let owners = Arc::new(RwLock::new(HashMap::new()));
        queue.set_sink(Arc::new(SceneResidency {
            owners: owners.clone(),
            memory: memory.clone(),
        }));

        let state = LoaderState {
            scenes: HashMap::new(),
            order: Vec::new(),
            tracker: WindowTracker::with_distance_scale(config.distance_scale()),
            quality: config.quality,
            external_holds: HashMap::new(),
            events: Vec::new(),
        };

        Ok(Self {
            inner: Arc::new(LoaderShared {
                config,
                runtime,
                queue,
                memory,
                owners,
                state: Mutex::new(state),
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &StreamingConfig {
        &self.inner.config
    }

    /// The underlying load queue
    pub fn queue(&self) -> &LoadQueue {
        &self.inner.queue
    }

    /// The memory manager owning every scene's resources
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.inner.memory
    }

    /// Register a scene and evaluate it against the last known position
    ///
    /// Registering an identical scene twice is a no-op; the same id with
    /// different bounds or assets is an error.
    pub fn register_scene(&self, registration: SceneRegistration) -> Result<()> {
        registration.validate()?;
        let window = registration.window();

        let mut assets: Vec<(AssetId, AssetPriority)> = Vec::new();
        for descriptor in &registration.assets {
            match assets.iter_mut().find(|(id, _)| *id == descriptor.id) {
                Some(slot) => slot.1 = descriptor.priority,
                None => assets.push((descriptor.id.clone(), descriptor.priority)),
            }
        }

        let plan = {
            let mut state = self.inner.state.lock();
            if let Some(existing) = state.scenes.get(&registration.id) {
                if existing.window == window && existing.assets == assets {
                    log::debug!("Scene {} already registered", registration.id);
                    return Ok(());
                }
                return Err(ConfigError::ConflictingScene(registration.id));
            }

            {
                let owners = self.inner.owners.read();
                for (asset, _) in &assets {
                    if let Some(owner) = owners.get(asset) {
                        return Err(ConfigError::AssetOwned {
                            asset: asset.clone(),
                            owner: owner.clone(),
                        });
                    }
                }
            }

            self.register_descriptors(&registration.assets)?;

            let id = registration.id;
            {
                let mut owners = self.inner.owners.write();
                for (asset, _) in &assets {
                    owners.insert(asset.clone(), id.clone());
                }
            }

            log::info!(
                "Registered scene {} ({} assets, window {}..{} around {})",
                id,
                assets.len(),
                window.preload_distance,
                window.unload_distance,
                window.anchor
            );
            state.scenes.insert(
                id.clone(),
                SceneRecord {
                    window,
                    assets,
                    state: SceneState::Unloaded,
                    generation: 0,
                },
            );
            state.order.push(id.clone());
            let transitions = state.tracker.insert(id, window);
            self.plan(&mut state, transitions)
        };

        self.execute(plan);
        Ok(())
    }

    /// Remove a scene, cancelling its loads and disposing what it holds
    pub fn unregister_scene(&self, scene: &SceneId) -> Result<DisposalReport> {
        let record = {
            let mut state = self.inner.state.lock();
            let record = state
                .scenes
                .remove(scene)
                .ok_or_else(|| ConfigError::SceneNotFound(scene.clone()))?;
            state.order.retain(|id| id != scene);
            state.tracker.remove(scene);
            state.external_holds.remove(scene);
            record
        };
        let assets = record.asset_ids();

        for id in &assets {
            self.inner.queue.cancel(id);
        }
        {
            let mut owners = self.inner.owners.write();
            for id in &assets {
                owners.remove(id);
            }
        }

        let report = self.inner.memory.remove_scene(scene).unwrap_or_else(|| DisposalReport {
            scene: Some(scene.clone()),
            ..DisposalReport::default()
        });
        let released: HashSet<&AssetId> = report.asset_ids().collect();

        // Anything the queue still caches was never tracked; release it here
        for id in &assets {
            if let Some(asset) = self.inner.queue.forget(id) {
                if !released.contains(&asset.id) {
                    let _ = self.inner.memory.dispose_detached(asset);
                }
            }
        }
        self.release_stray_dependencies(scene, &assets);
        for id in &assets {
            self.inner.queue.remove(id);
        }

        log::info!("Unregistered scene {} ({} resources released)", scene, report.released());
        Ok(report)
    }

    /// Drive scheduling from the tracked scalar position
    ///
    /// Safe to call every frame; never suspends and never fails.
    pub fn update_position(&self, position: f32) {
        if !position.is_finite() {
            log::warn!("Ignoring non-finite position {}", position);
            return;
        }
        let plan = {
            let mut state = self.inner.state.lock();
            let transitions = state.tracker.update(position);
            self.plan(&mut state, transitions)
        };
        self.execute(plan);
    }

    /// Drive scheduling from a 3D camera position
    pub fn update_camera(&self, axis: &LoadingAxis, camera: Vec3) {
        self.update_position(axis.project(camera));
    }

    /// Change the quality hint, re-evaluating every window
    pub fn set_quality(&self, quality: QualityHint) {
        let plan = {
            let mut state = self.inner.state.lock();
            if state.quality == quality {
                return;
            }
            state.quality = quality;
            let scale = self.inner.config.quality_scales.scale_for(quality);
            log::info!("Quality set to {:?} (distance scale {})", quality, scale);
            let transitions = state.tracker.set_distance_scale(scale);
            self.plan(&mut state, transitions)
        };
        self.execute(plan);
    }

    /// Current quality hint
    pub fn quality(&self) -> QualityHint {
        self.inner.state.lock().quality
    }

    /// Load every critical asset across all scenes
    ///
    /// Requests are issued before this returns. The future resolves once all
    /// of them settled; one failure does not abort the others.
    pub fn preload_critical_assets(&self) -> impl Future<Output = LoadSummary> + Send + 'static {
        let ids: Vec<AssetId> = {
            let state = self.inner.state.lock();
            state
                .order
                .iter()
                .filter_map(|scene| state.scenes.get(scene))
                .flat_map(|record| {
                    record
                        .assets
                        .iter()
                        .filter(|(_, priority)| *priority == AssetPriority::Critical)
                        .map(|(id, _)| id.clone())
                })
                .collect()
        };
        log::info!("Preloading {} critical assets", ids.len());
        self.request_all(ids)
    }

    /// Load an asset outside the scene window model
    pub fn load_asset_by_id(&self, id: &AssetId) -> LoadFuture {
        self.inner.queue.request_load(id)
    }

    /// Check if an asset is loaded
    pub fn is_asset_loaded(&self, id: &AssetId) -> bool {
        self.inner.queue.is_loaded(id)
    }

    /// Get a loaded asset
    pub fn get_asset(&self, id: &AssetId) -> Option<LoadedAsset> {
        self.inner.queue.get(id)
    }

    /// Clear a failed asset and load it again
    ///
    /// If its scene is already active the resource becomes visible as soon
    /// as it loads.
    pub fn retry(&self, id: &AssetId) -> LoadFuture {
        self.inner.queue.retry(id)
    }

    /// Retry every failed asset
    pub fn retry_failed(&self) -> impl Future<Output = LoadSummary> + Send + 'static {
        let (ids, requests): (Vec<AssetId>, Vec<LoadFuture>) =
            self.inner.queue.retry_failed().into_iter().unzip();
        async move { LoadSummary::collect(ids, future::join_all(requests).await) }
    }

    /// Snapshot of loading progress; a pure read
    pub fn get_loading_progress(&self) -> LoadingProgress {
        LoadingProgress::from_queue(&self.inner.queue.progress())
    }

    /// Activate a scene on behalf of an external consumer
    ///
    /// Returns the scene's total activation count, which includes the
    /// loader's own hold while the scene is active.
    pub fn activate_scene(&self, scene: &SceneId) -> u32 {
        let activation = {
            let mut state = self.inner.state.lock();
            *state.external_holds.entry(scene.clone()).or_insert(0) += 1;
            self.inner.memory.acquire(scene)
        };
        activation.apply()
    }

    /// Release an external consumer's hold on a scene
    ///
    /// Only holds taken through [`ProgressiveLoader::activate_scene`] can be
    /// released here; anything else is logged and ignored. A scene inside
    /// its window keeps its resources. Otherwise the last hold disposes them
    /// and drops them from the load cache so a later request produces them
    /// again.
    pub fn deactivate_scene(&self, scene: &SceneId) -> Deactivation {
        let (release, assets) = {
            let mut state = self.inner.state.lock();
            let holds = state.external_holds.get(scene).copied().unwrap_or(0);
            if holds == 0 {
                log::warn!("External deactivation of {} without matching activation ignored", scene);
                return Deactivation::Unmatched;
            }
            if holds == 1 {
                state.external_holds.remove(scene);
            } else {
                state.external_holds.insert(scene.clone(), holds - 1);
            }
            let assets = state.scenes.get(scene).map(SceneRecord::asset_ids).unwrap_or_default();
            (self.inner.memory.release(scene), assets)
        };

        let outcome = self.inner.memory.settle(scene, release);
        if let Deactivation::Disposed(report) = &outcome {
            self.forget_released(report);
            self.release_stray_dependencies(scene, &assets);
        }
        outcome
    }

    /// Holds taken through [`ProgressiveLoader::activate_scene`]
    pub fn external_holds(&self, scene: &SceneId) -> u32 {
        self.inner.state.lock().external_holds.get(scene).copied().unwrap_or(0)
    }

    /// State of a registered scene
    pub fn scene_state(&self, scene: &SceneId) -> Option<SceneState> {
        self.inner.state.lock().scenes.get(scene).map(|r| r.state)
    }

    /// Registered scenes in registration order
    pub fn scene_ids(&self) -> Vec<SceneId> {
        self.inner.state.lock().order.clone()
    }

    /// Last position passed to [`ProgressiveLoader::update_position`]
    pub fn last_position(&self) -> Option<f32> {
        self.inner.state.lock().tracker.last_position()
    }

    /// Get loader statistics
    pub fn stats(&self) -> StreamingStats {
        let state = self.inner.state.lock();
        let mut scenes_by_state = [0u32; 3];
        for record in state.scenes.values() {
            let idx = match record.state {
                SceneState::Unloaded => 0,
                SceneState::Loading => 1,
                SceneState::Active => 2,
            };
            scenes_by_state[idx] += 1;
        }

        let queue = self.inner.queue.stats();
        StreamingStats {
            total_scenes: state.scenes.len(),
            scenes_by_state,
            queued_loads: queue.queued,
            loading_assets: queue.loading,
            loaded_assets: queue.loaded,
            failed_assets: queue.failed,
            peak_in_flight: queue.peak_in_flight,
            resident_resources: self.inner.memory.resident_count(),
            disposed_resources: self.inner.memory.disposed_total(),
        }
    }

    /// Get the health status of the loader
    pub fn health_status(&self) -> StreamingHealthStatus {
        let failed = self.inner.queue.failed_ids();
        if failed.is_empty() {
            return StreamingHealthStatus::Healthy;
        }

        let failed_assets = failed.len() as u32;
        let critical_failed = {
            let registry = self.inner.queue.registry().read();
            failed.iter().any(|id| {
                registry
                    .get(id)
                    .map(|d| d.priority == AssetPriority::Critical)
                    .unwrap_or(false)
            })
        };

        if critical_failed || failed_assets >= CRITICAL_FAILURE_THRESHOLD {
            StreamingHealthStatus::Critical { failed_assets }
        } else {
            StreamingHealthStatus::Degraded { failed_assets }
        }
    }

    /// Drain events
    ///
    /// Scene events come first, then asset events, then disposals; each
    /// group is in the order it happened.
    pub fn drain_events(&self) -> Vec<StreamingEvent> {
        let mut events = std::mem::take(&mut self.inner.state.lock().events);
        for event in self.inner.queue.drain_events() {
            match event {
                QueueEvent::Loaded(id) => events.push(StreamingEvent::AssetLoaded(id)),
                QueueEvent::Failed(id, e) => events.push(StreamingEvent::AssetFailed(id, e)),
                QueueEvent::Cancelled(_) | QueueEvent::Forgotten(_) => {}
            }
        }
        for event in self.inner.memory.drain_events() {
            if let MemoryEvent::Disposed(id) = event {
                events.push(StreamingEvent::ResourceDisposed(id));
            }
        }
        events
    }

    /// Dispose everything and reset every scene
    ///
    /// Scenes stay registered; the next position update loads them again.
    pub fn shutdown(&self) -> Vec<DisposalReport> {
        {
            let mut state = self.inner.state.lock();
            for record in state.scenes.values_mut() {
                record.state = SceneState::Unloaded;
                record.generation += 1;
            }
            state.tracker.clear_wanted();
            state.external_holds.clear();
        }

        let reports = self.inner.memory.global_cleanup();
        let released: HashSet<&AssetId> = reports.iter().flat_map(|r| r.asset_ids()).collect();
        for asset in self.inner.queue.clear() {
            if !released.contains(&asset.id) {
                let _ = self.inner.memory.dispose_detached(asset);
            }
        }
        log::info!("Progressive loader shut down");
        reports
    }

    fn register_descriptors(&self, descriptors: &[AssetDescriptor]) -> Result<()> {
        let mut registry = self.inner.queue.registry().write();
        let mut added: Vec<AssetId> = Vec::new();
        for descriptor in descriptors {
            let is_new = !registry.contains(&descriptor.id);
            if let Err(e) = registry.register(descriptor.clone()) {
                // All or nothing
                for id in &added {
                    registry.remove(id);
                }
                return Err(e.into());
            }
            if is_new {
                added.push(descriptor.id.clone());
            }
        }
        Ok(())
    }

    fn plan(&self, state: &mut LoaderState, transitions: WindowTransitions) -> LoadPlan {
        let mut plan = LoadPlan::default();
        for scene in transitions.exited {
            let Some(record) = state.scenes.get_mut(&scene) else {
                continue;
            };
            self.inner.memory.set_pinned(&scene, false);
            let previous = std::mem::replace(&mut record.state, SceneState::Unloaded);
            record.generation += 1;
            plan.evict.push(Eviction {
                assets: record.asset_ids(),
                scene,
                previous,
            });
        }
        for scene in transitions.entered {
            let Some(record) = state.scenes.get_mut(&scene) else {
                continue;
            };
            self.inner.memory.set_pinned(&scene, true);
            record.state = SceneState::Loading;
            record.generation += 1;
            plan.load.push(SceneLoad {
                assets: record.load_order(),
                generation: record.generation,
                scene: scene.clone(),
            });
            state.events.push(StreamingEvent::SceneEntered(scene));
        }
        plan
    }

    fn execute(&self, plan: LoadPlan) {
        // Free memory before issuing new loads
        for eviction in plan.evict {
            self.evict(eviction);
        }
        for load in plan.load {
            self.begin_load(load);
        }
    }

    fn evict(&self, eviction: Eviction) {
        let Eviction { scene, previous, assets } = eviction;
        for id in &assets {
            self.inner.queue.cancel(id);
        }

        let report = match previous {
            SceneState::Active => match self.inner.memory.deactivate_scene(&scene) {
                Deactivation::Disposed(report) => Some(report),
                Deactivation::StillActive(holds) => {
                    log::debug!("Scene {} out of range but still held by {} consumers", scene, holds);
                    None
                }
                Deactivation::Unmatched | Deactivation::Retained => None,
            },
            SceneState::Loading | SceneState::Unloaded => self.inner.memory.purge_scene(&scene),
        };

        let mut disposed = match &report {
            Some(report) => {
                self.forget_released(report);
                report.released()
            }
            None => 0,
        };
        disposed += self.release_stray_dependencies(&scene, &assets);
        log::info!("Evicted scene {} ({} resources released)", scene, disposed);
        self.inner
            .state
            .lock()
            .events
            .push(StreamingEvent::SceneEvicted { scene, disposed });
    }

    fn begin_load(&self, load: SceneLoad) {
        let SceneLoad { scene, generation, assets } = load;
        log::debug!("Scene {} entered its window, requesting {} assets", scene, assets.len());

        let requests: Vec<LoadFuture> = assets
            .iter()
            .map(|id| self.inner.queue.request_load(id))
            .collect();
        let loader = self.clone();
        self.inner.runtime.spawn(async move {
            let results = future::join_all(requests).await;
            loader.finish_scene_load(&scene, generation, &assets, &results);
        });
    }

    fn finish_scene_load(
        &self,
        scene: &SceneId,
        generation: u64,
        assets: &[AssetId],
        results: &[LoadResult<LoadedAsset>],
    ) {
        let activation = {
            let mut state = self.inner.state.lock();
            let Some(record) = state.scenes.get_mut(scene) else {
                return;
            };
            if record.generation != generation || record.state != SceneState::Loading {
                log::debug!("Discarding stale load of scene {}", scene);
                return;
            }
            record.state = SceneState::Active;

            let degraded: Vec<AssetId> = assets
                .iter()
                .zip(results)
                .filter(|(_, result)| result.is_err())
                .map(|(id, _)| id.clone())
                .collect();

            if degraded.is_empty() {
                log::info!("Scene {} activated", scene);
            } else {
                log::warn!("Scene {} activated with {} failed assets", scene, degraded.len());
            }
            state.events.push(StreamingEvent::SceneActivated {
                scene: scene.clone(),
                degraded,
            });
            // Count taken under the loader lock so an eviction cannot slip in between
            self.inner.memory.acquire(scene)
        };
        activation.apply();
    }

    /// Release dependencies loaded for `scene` that belong to scenes nobody wants
    ///
    /// A dependency owned by another scene is tracked under its owner. If
    /// that owner is out of range and no wanted scene still depends on it,
    /// nothing else would ever release it. Returns the number released.
    fn release_stray_dependencies(&self, scene: &SceneId, assets: &[AssetId]) -> usize {
        let stray: Vec<AssetId> = {
            let state = self.inner.state.lock();
            let registry = self.inner.queue.registry().read();
            let owners = self.inner.owners.read();

            // Scenes in range, and scenes a consumer still holds
            let wanted_assets = state
                .scenes
                .iter()
                .filter(|(id, record)| record.state != SceneState::Unloaded || self.inner.memory.is_active(id))
                .flat_map(|(_, record)| record.assets.iter().map(|(id, _)| id));
            let still_needed = dependency_closure(&registry, wanted_assets);

            dependency_closure(&registry, assets.iter())
                .into_iter()
                .filter(|dep| !still_needed.contains(dep))
                .filter(|dep| match owners.get(dep) {
                    Some(owner) if owner != scene => state
                        .scenes
                        .get(owner)
                        .map(|record| record.state == SceneState::Unloaded)
                        .unwrap_or(true),
                    _ => false,
                })
                .filter(|dep| {
                    owners
                        .get(dep)
                        .map(|owner| !self.inner.memory.is_active(owner))
                        .unwrap_or(false)
                })
                .collect()
        };

        let mut released = 0;
        for dep in &stray {
            self.inner.queue.cancel(dep);
            if let Some(asset) = self.inner.queue.forget(dep) {
                log::debug!("Releasing dependency {} no wanted scene uses", dep);
                // Failure already logged per resource
                let _ = self.inner.memory.dispose_detached(asset);
                released += 1;
            }
        }
        released
    }

    fn forget_released(&self, report: &DisposalReport) {
        for id in report.asset_ids() {
            self.inner.queue.forget(id);
        }
    }

    fn request_all(&self, ids: Vec<AssetId>) -> impl Future<Output = LoadSummary> + Send + 'static {
        let requests: Vec<LoadFuture> = ids.iter().map(|id| self.inner.queue.request_load(id)).collect();
        async move { LoadSummary::collect(ids, future::join_all(requests).await) }
    }
}

/// Every dependency reachable from `roots`
fn dependency_closure<'a>(
    registry: &AssetRegistry,
    roots: impl Iterator<Item = &'a AssetId>,
) -> HashSet<AssetId> {
    let mut seen: HashSet<AssetId> = HashSet::new();
    let mut stack: Vec<AssetId> = Vec::new();
    for root in roots {
        if let Ok(descriptor) = registry.get(root) {
            stack.extend(descriptor.dependencies.iter().cloned());
        }
    }
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Ok(descriptor) = registry.get(&id) {
            stack.extend(descriptor.dependencies.iter().cloned());
        }
    }
    seen
}

impl std::fmt::Debug for ProgressiveLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveLoader")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
