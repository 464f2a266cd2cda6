//! Memory / Cleanup Manager
//!
//! Single owner of native-resource disposal. Each scene has a handle list of
//! live resources and an activation count. Resources are disposed exactly
//! once, in reverse registration order, when the count drops to zero.
//!
//! A scene can also be pinned while it is inside its window. A pinned scene
//! whose count drops to zero keeps its resources hidden instead of
//! disposing them.
//!
//! Disposal and visibility changes call foreign code, so they never run
//! while the internal lock is held.

use crate::error::MemoryError;
use crate::scene::SceneId;
use parking_lot::Mutex;
use std::collections::HashMap;
use void_asset::{dispose_logged, AssetId, DisposeError, LoadedAsset, ResidencySink};

/// Event recorded by the memory manager
#[derive(Clone, Debug, PartialEq)]
pub enum MemoryEvent {
    /// Scene went from inactive to active
    Activated(SceneId),
    /// Scene's activation count reached zero
    Deactivated(SceneId),
    /// A resource was released
    Disposed(AssetId),
    /// A resource's dispose call failed
    DisposeFailed(AssetId, DisposeError),
}

/// Outcome of disposing one scene's handle list
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisposalReport {
    pub scene: Option<SceneId>,
    /// Disposed successfully, in disposal order
    pub disposed: Vec<AssetId>,
    /// Dispose calls that failed; these resources are no longer tracked either
    pub failed: Vec<(AssetId, DisposeError)>,
}

impl DisposalReport {
    /// Number of resources that left the handle list
    pub fn released(&self) -> usize {
        self.disposed.len() + self.failed.len()
    }

    /// Every asset that left the handle list
    pub fn asset_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.disposed.iter().chain(self.failed.iter().map(|(id, _)| id))
    }
}

/// Result of [`MemoryManager::deactivate_scene`]
#[derive(Clone, Debug, PartialEq)]
pub enum Deactivation {
    /// No matching activation; ignored
    Unmatched,
    /// Other consumers still hold the scene
    StillActive(u32),
    /// Count reached zero while pinned; resources hidden and kept
    Retained,
    /// Count reached zero and the handle list was released
    Disposed(DisposalReport),
}

/// A count increment whose visibility change has not run yet
#[must_use]
pub(crate) struct Activation {
    count: u32,
    reveal: Vec<LoadedAsset>,
}

impl Activation {
    /// Make resources visible; call with no lock held
    pub(crate) fn apply(self) -> u32 {
        for asset in &self.reveal {
            asset.resource.set_visible(true);
        }
        self.count
    }
}

/// A count decrement whose side effects have not run yet
#[must_use]
pub(crate) enum Release {
    Unmatched,
    StillActive(u32),
    Retained(Vec<LoadedAsset>),
    Dispose(Vec<LoadedAsset>),
}

#[derive(Default)]
struct SceneHandle {
    resources: Vec<LoadedAsset>,
    active_count: u32,
    pinned: bool,
}

#[derive(Default)]
struct MemoryState {
    scenes: HashMap<SceneId, SceneHandle>,
    owners: HashMap<AssetId, SceneId>,
    events: Vec<MemoryEvent>,
    disposed_total: u64,
}

/// Scene-to-resource ownership and reference-counted disposal
#[derive(Default)]
pub struct MemoryManager {
    state: Mutex<MemoryState>,
}

impl MemoryManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Append resources to a scene's handle list
    ///
    /// Safe to call repeatedly; ids already tracked for this scene are
    /// skipped. The batch is rejected if any id belongs to another scene.
    /// Returns the number of resources added.
    pub fn register_scene_assets(
        &self,
        scene: &SceneId,
        assets: impl IntoIterator<Item = LoadedAsset>,
    ) -> Result<usize, MemoryError> {
        let assets: Vec<LoadedAsset> = assets.into_iter().collect();
        let mut state = self.state.lock();

        for asset in &assets {
            if let Some(owner) = state.owners.get(&asset.id) {
                if owner != scene {
                    return Err(MemoryError::AssetOwned {
                        asset: asset.id.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }

        let mut added = Vec::new();
        for asset in assets {
            if state.owners.contains_key(&asset.id) || added.iter().any(|a: &LoadedAsset| a.id == asset.id) {
                continue;
            }
            added.push(asset);
        }

        let handle = state.scenes.entry(scene.clone()).or_default();
        let visible = handle.active_count > 0;
        handle.resources.extend(added.iter().cloned());
        for asset in &added {
            state.owners.insert(asset.id.clone(), scene.clone());
        }
        drop(state);

        if visible {
            for asset in &added {
                asset.resource.set_visible(true);
            }
        }
        log::trace!("Scene {} tracks {} new resources", scene, added.len());
        Ok(added.len())
    }

    /// Increment the activation count; returns the new count
    ///
    /// The first activation makes the scene's resources visible.
    pub fn activate_scene(&self, scene: &SceneId) -> u32 {
        self.acquire(scene).apply()
    }

    /// Decrement the activation count
    ///
    /// At zero, every tracked resource is disposed once, in reverse
    /// registration order, unless the scene is pinned. A call without a
    /// matching activation is logged and ignored.
    pub fn deactivate_scene(&self, scene: &SceneId) -> Deactivation {
        let release = self.release(scene);
        self.settle(scene, release)
    }

    /// Mark a scene as inside its window
    ///
    /// Pinned scenes are never disposed by a deactivation or a purge.
    pub fn set_pinned(&self, scene: &SceneId, pinned: bool) {
        let mut state = self.state.lock();
        if pinned {
            state.scenes.entry(scene.clone()).or_default().pinned = true;
        } else if let Some(handle) = state.scenes.get_mut(scene) {
            handle.pinned = false;
        }
    }

    /// Check if a scene is pinned
    pub fn is_pinned(&self, scene: &SceneId) -> bool {
        self.state.lock().scenes.get(scene).map(|h| h.pinned).unwrap_or(false)
    }

    /// Increment the count, deferring the visibility change to the caller
    pub(crate) fn acquire(&self, scene: &SceneId) -> Activation {
        let mut state = self.state.lock();
        let handle = state.scenes.entry(scene.clone()).or_default();
        handle.active_count += 1;
        let count = handle.active_count;
        let mut reveal = Vec::new();
        if count == 1 {
            reveal = handle.resources.clone();
            state.events.push(MemoryEvent::Activated(scene.clone()));
            log::debug!("Scene {} activated", scene);
        }
        Activation { count, reveal }
    }

    /// Decrement the count; pass the result to [`MemoryManager::settle`]
    pub(crate) fn release(&self, scene: &SceneId) -> Release {
        let mut state = self.state.lock();
        let Some(handle) = state.scenes.get_mut(scene).filter(|h| h.active_count > 0) else {
            log::warn!("Deactivation of {} without matching activation ignored", scene);
            return Release::Unmatched;
        };
        handle.active_count -= 1;
        if handle.active_count > 0 {
            return Release::StillActive(handle.active_count);
        }
        if handle.pinned {
            let hidden = handle.resources.clone();
            state.events.push(MemoryEvent::Deactivated(scene.clone()));
            log::debug!("Scene {} inactive but in range, keeping {} resources", scene, hidden.len());
            return Release::Retained(hidden);
        }
        let resources = std::mem::take(&mut handle.resources);
        Self::release_owners(&mut state, &resources);
        state.events.push(MemoryEvent::Deactivated(scene.clone()));
        Release::Dispose(resources)
    }

    /// Run the side effects of a release; call with no lock held
    pub(crate) fn settle(&self, scene: &SceneId, release: Release) -> Deactivation {
        match release {
            Release::Unmatched => Deactivation::Unmatched,
            Release::StillActive(count) => Deactivation::StillActive(count),
            Release::Retained(hidden) => {
                for asset in &hidden {
                    asset.resource.set_visible(false);
                }
                Deactivation::Retained
            }
            Release::Dispose(resources) => Deactivation::Disposed(self.dispose_all(Some(scene), resources)),
        }
    }

    /// Dispose a scene's resources if nothing holds it
    ///
    /// Used when a scene is evicted before it was ever activated. Active
    /// and pinned scenes are skipped.
    pub fn purge_scene(&self, scene: &SceneId) -> Option<DisposalReport> {
        let resources = {
            let mut state = self.state.lock();
            let handle = state.scenes.get_mut(scene)?;
            if handle.active_count > 0 || handle.pinned {
                log::debug!("Scene {} still held, purge skipped", scene);
                return None;
            }
            let resources = std::mem::take(&mut handle.resources);
            Self::release_owners(&mut state, &resources);
            resources
        };
        Some(self.dispose_all(Some(scene), resources))
    }

    /// Dispose and forget a scene unconditionally
    pub fn remove_scene(&self, scene: &SceneId) -> Option<DisposalReport> {
        let resources = {
            let mut state = self.state.lock();
            let handle = state.scenes.remove(scene)?;
            Self::release_owners(&mut state, &handle.resources);
            handle.resources
        };
        Some(self.dispose_all(Some(scene), resources))
    }

    /// Dispose every tracked scene, active or not
    ///
    /// For full teardown. Scenes that were never activated are fine.
    pub fn global_cleanup(&self) -> Vec<DisposalReport> {
        let scenes: Vec<(SceneId, Vec<LoadedAsset>)> = {
            let mut state = self.state.lock();
            state.owners.clear();
            let mut scenes: Vec<_> = state
                .scenes
                .drain()
                .map(|(id, handle)| (id, handle.resources))
                .collect();
            scenes.sort_by(|a, b| a.0.cmp(&b.0));
            scenes
        };

        let reports: Vec<DisposalReport> = scenes
            .into_iter()
            .map(|(scene, resources)| self.dispose_all(Some(&scene), resources))
            .collect();
        log::info!(
            "Global cleanup released {} resources",
            reports.iter().map(DisposalReport::released).sum::<usize>()
        );
        reports
    }

    /// Dispose a resource no scene wants anymore
    pub fn dispose_detached(&self, asset: LoadedAsset) -> Result<(), DisposeError> {
        {
            let mut state = self.state.lock();
            if let Some(owner) = state.owners.remove(&asset.id) {
                if let Some(handle) = state.scenes.get_mut(&owner) {
                    handle.resources.retain(|r| r.id != asset.id);
                }
            }
        }
        let report = self.dispose_all(None, vec![asset]);
        match report.failed.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    /// Current activation count
    pub fn active_count(&self, scene: &SceneId) -> u32 {
        self.state.lock().scenes.get(scene).map(|h| h.active_count).unwrap_or(0)
    }

    /// Check if a scene is active
    pub fn is_active(&self, scene: &SceneId) -> bool {
        self.active_count(scene) > 0
    }

    /// Number of resources tracked for a scene
    pub fn resource_count(&self, scene: &SceneId) -> usize {
        self.state.lock().scenes.get(scene).map(|h| h.resources.len()).unwrap_or(0)
    }

    /// Ids tracked for a scene, in registration order
    pub fn scene_assets(&self, scene: &SceneId) -> Vec<AssetId> {
        self.state
            .lock()
            .scenes
            .get(scene)
            .map(|h| h.resources.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Scene that owns a tracked resource
    pub fn owner_of(&self, asset: &AssetId) -> Option<SceneId> {
        self.state.lock().owners.get(asset).cloned()
    }

    /// Total resources tracked across scenes
    pub fn resident_count(&self) -> usize {
        self.state.lock().owners.len()
    }

    /// Total resources released since creation
    pub fn disposed_total(&self) -> u64 {
        self.state.lock().disposed_total
    }

    /// Drain events
    pub fn drain_events(&self) -> Vec<MemoryEvent> {
        self.state.lock().events.drain(..).collect()
    }

    fn release_owners(state: &mut MemoryState, resources: &[LoadedAsset]) {
        for asset in resources {
            state.owners.remove(&asset.id);
        }
    }

    fn dispose_all(&self, scene: Option<&SceneId>, resources: Vec<LoadedAsset>) -> DisposalReport {
        let mut report = DisposalReport {
            scene: scene.cloned(),
            ..DisposalReport::default()
        };
        // Dependents were registered after what they reference
        for asset in resources.into_iter().rev() {
            asset.resource.set_visible(false);
            match dispose_logged(&asset) {
                Ok(()) => report.disposed.push(asset.id),
                Err(e) => report.failed.push((asset.id, e)),
            }
        }

        let mut state = self.state.lock();
        state.disposed_total += report.released() as u64;
        for id in &report.disposed {
            state.events.push(MemoryEvent::Disposed(id.clone()));
        }
        for (id, e) in &report.failed {
            state.events.push(MemoryEvent::DisposeFailed(id.clone(), e.clone()));
        }
        if let Some(scene) = scene {
            if report.released() > 0 {
                log::debug!("Scene {} released {} resources", scene, report.released());
            }
        }
        report
    }
}

impl ResidencySink for MemoryManager {
    fn dispose_orphan(&self, asset: LoadedAsset) {
        // Failure already logged per resource
        let _ = self.dispose_detached(asset);
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryManager")
            .field("scenes", &state.scenes.len())
            .field("resident", &state.owners.len())
            .field("disposed_total", &state.disposed_total)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use void_asset::{AssetKind, GpuResource};

    #[derive(Default)]
    struct Tracked {
        disposed: AtomicUsize,
        visible: AtomicBool,
        log: Option<(AssetId, Arc<PlMutex<Vec<AssetId>>>)>,
        fail: bool,
    }

    impl GpuResource for Tracked {
        fn dispose(&self) -> Result<(), DisposeError> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            if let Some((id, log)) = &self.log {
                log.lock().push(id.clone());
            }
            if self.fail {
                return Err(DisposeError::Native("device lost".into()));
            }
            Ok(())
        }

        fn set_visible(&self, visible: bool) {
            self.visible.store(visible, Ordering::SeqCst);
        }
    }

    fn asset(id: &str) -> (LoadedAsset, Arc<Tracked>) {
        let tracked = Arc::new(Tracked::default());
        let loaded = LoadedAsset {
            id: AssetId::new(id),
            kind: AssetKind::Geometry,
            resource: tracked.clone(),
        };
        (loaded, tracked)
    }

    #[test]
    fn test_reference_counting() {
        let memory = MemoryManager::new();
        let scene = SceneId::new("x");
        let (mesh, tracked) = asset("x/mesh");
        memory.register_scene_assets(&scene, [mesh]).unwrap();

        assert_eq!(memory.activate_scene(&scene), 1);
        assert_eq!(memory.activate_scene(&scene), 2);
        assert!(tracked.visible.load(Ordering::SeqCst));

        assert_eq!(memory.deactivate_scene(&scene), Deactivation::StillActive(1));
        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 0);

        match memory.deactivate_scene(&scene) {
            Deactivation::Disposed(report) => assert_eq!(report.disposed, vec![AssetId::new("x/mesh")]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 1);
        assert!(!tracked.visible.load(Ordering::SeqCst));
        assert_eq!(memory.resource_count(&scene), 0);
    }

    #[test]
    fn test_idempotent_teardown() {
        let memory = MemoryManager::new();
        let scene = SceneId::new("empty");

        assert_eq!(memory.deactivate_scene(&scene), Deactivation::Unmatched);

        let (mesh, tracked) = asset("empty/mesh");
        memory.register_scene_assets(&scene, [mesh]).unwrap();
        memory.activate_scene(&scene);
        assert!(matches!(memory.deactivate_scene(&scene), Deactivation::Disposed(_)));
        assert_eq!(memory.deactivate_scene(&scene), Deactivation::Unmatched);
        assert_eq!(memory.deactivate_scene(&scene), Deactivation::Unmatched);

        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(memory.active_count(&scene), 0);
    }

    #[test]
    fn test_reverse_disposal_order() {
        let memory = MemoryManager::new();
        let scene = SceneId::new("lab");
        let log = Arc::new(PlMutex::new(Vec::new()));

        let assets: Vec<LoadedAsset> = ["lab/texture", "lab/material", "lab/mesh"]
            .iter()
            .map(|id| LoadedAsset {
                id: AssetId::new(*id),
                kind: AssetKind::Material,
                resource: Arc::new(Tracked {
                    log: Some((AssetId::new(*id), log.clone())),
                    ..Default::default()
                }),
            })
            .collect();

        // Incremental registration keeps overall order
        memory.register_scene_assets(&scene, assets[..1].to_vec()).unwrap();
        memory.register_scene_assets(&scene, assets[1..].to_vec()).unwrap();
        memory.register_scene_assets(&scene, assets[..1].to_vec()).unwrap();
        assert_eq!(memory.resource_count(&scene), 3);

        memory.activate_scene(&scene);
        memory.deactivate_scene(&scene);

        let order: Vec<_> = log.lock().iter().map(|id| id.as_str().to_string()).collect();
        assert_eq!(order, vec!["lab/mesh", "lab/material", "lab/texture"]);
    }

    #[test]
    fn test_dispose_failure_does_not_leak_scene() {
        let memory = MemoryManager::new();
        let scene = SceneId::new("s");
        let (good_a, a) = asset("s/a");
        let bad = Arc::new(Tracked { fail: true, ..Default::default() });
        let bad_asset = LoadedAsset {
            id: AssetId::new("s/bad"),
            kind: AssetKind::Texture,
            resource: bad.clone(),
        };
        let (good_b, b) = asset("s/b");
        memory.register_scene_assets(&scene, [good_a, bad_asset, good_b]).unwrap();

        memory.activate_scene(&scene);
        let Deactivation::Disposed(report) = memory.deactivate_scene(&scene) else {
            panic!("expected disposal");
        };
        assert_eq!(report.disposed.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(a.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(b.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(bad.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(memory.resident_count(), 0);
        assert!(memory
            .drain_events()
            .iter()
            .any(|e| matches!(e, MemoryEvent::DisposeFailed(id, _) if id.as_str() == "s/bad")));
    }

    #[test]
    fn test_exclusive_ownership() {
        let memory = MemoryManager::new();
        let (shared, _) = asset("shared");
        memory.register_scene_assets(&SceneId::new("a"), [shared.clone()]).unwrap();

        let (other, _) = asset("b/own");
        let err = memory
            .register_scene_assets(&SceneId::new("b"), [other, shared])
            .unwrap_err();
        assert_eq!(
            err,
            MemoryError::AssetOwned {
                asset: AssetId::new("shared"),
                owner: SceneId::new("a"),
            }
        );
        // Whole batch rejected
        assert_eq!(memory.resource_count(&SceneId::new("b")), 0);
        assert_eq!(memory.owner_of(&AssetId::new("shared")), Some(SceneId::new("a")));
    }

    #[test]
    fn test_late_registration_into_active_scene_is_visible() {
        let memory = MemoryManager::new();
        let scene = SceneId::new("s");
        memory.activate_scene(&scene);

        let (late, tracked) = asset("s/late");
        assert_eq!(memory.register_scene_assets(&scene, [late]).unwrap(), 1);
        assert!(tracked.visible.load(Ordering::SeqCst));
    }

    #[test]
    fn test_purge_respects_activation() {
        let memory = MemoryManager::new();
        let scene = SceneId::new("s");
        let (mesh, tracked) = asset("s/mesh");
        memory.register_scene_assets(&scene, [mesh]).unwrap();

        memory.activate_scene(&scene);
        assert!(memory.purge_scene(&scene).is_none());
        memory.deactivate_scene(&scene);
        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 1);

        let (mesh, tracked) = asset("s/mesh");
        memory.register_scene_assets(&scene, [mesh]).unwrap();
        let report = memory.purge_scene(&scene).unwrap();
        assert_eq!(report.released(), 1);
        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pinned_scene_keeps_resources_at_zero() {
        let memory = MemoryManager::new();
        let scene = SceneId::new("s");
        let (mesh, tracked) = asset("s/mesh");
        memory.register_scene_assets(&scene, [mesh]).unwrap();
        memory.set_pinned(&scene, true);

        memory.activate_scene(&scene);
        assert_eq!(memory.deactivate_scene(&scene), Deactivation::Retained);
        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 0);
        assert!(!tracked.visible.load(Ordering::SeqCst));
        assert_eq!(memory.resource_count(&scene), 1);
        assert!(memory.purge_scene(&scene).is_none());

        // Reactivation shows the kept resources again
        memory.activate_scene(&scene);
        assert!(tracked.visible.load(Ordering::SeqCst));

        memory.set_pinned(&scene, false);
        assert!(matches!(memory.deactivate_scene(&scene), Deactivation::Disposed(_)));
        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_visibility_changes_run_without_lock() {
        // A resource that inspects the manager from set_visible would deadlock
        // if the manager's lock were held
        struct Reentrant {
            memory: Arc<MemoryManager>,
            seen: AtomicUsize,
        }

        impl GpuResource for Reentrant {
            fn dispose(&self) -> Result<(), DisposeError> {
                self.memory.resident_count();
                Ok(())
            }

            fn set_visible(&self, _visible: bool) {
                self.seen.fetch_add(self.memory.resident_count(), Ordering::SeqCst);
            }
        }

        let memory = Arc::new(MemoryManager::new());
        let scene = SceneId::new("s");
        let resource = Arc::new(Reentrant { memory: memory.clone(), seen: AtomicUsize::new(0) });
        let loaded = LoadedAsset { id: AssetId::new("s/r"), kind: AssetKind::Composite, resource: resource.clone() };

        memory.activate_scene(&scene);
        memory.register_scene_assets(&scene, [loaded]).unwrap();
        memory.deactivate_scene(&scene);
        memory.activate_scene(&scene);
        assert_eq!(resource.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_cleanup_includes_inactive_scenes() {
        let memory = MemoryManager::new();
        let (a, ta) = asset("a/mesh");
        let (b, tb) = asset("b/mesh");
        memory.register_scene_assets(&SceneId::new("a"), [a]).unwrap();
        memory.register_scene_assets(&SceneId::new("b"), [b]).unwrap();
        memory.activate_scene(&SceneId::new("a"));

        let reports = memory.global_cleanup();
        assert_eq!(reports.len(), 2);
        assert_eq!(ta.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(tb.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(memory.resident_count(), 0);
        assert!(memory.global_cleanup().is_empty());
    }

    #[test]
    fn test_orphan_disposal() {
        let memory = MemoryManager::new();
        let (orphan, tracked) = asset("orphan");
        memory.dispose_orphan(orphan);
        assert_eq!(tracked.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(memory.disposed_total(), 1);
    }
}
