//! Load Queue - bounded-concurrency, priority-ordered asset loading
//!
//! Every id maps to at most one task. Concurrent requests for the same id
//! share that task's future (single flight) and observe the same result.
//!
//! Dispatch is deferred to a pump task spawned on the runtime, so requests
//! issued in the same synchronous turn are ordered by priority before any
//! concurrency slot is taken. Dependencies are awaited outside of a slot so a
//! small ceiling can never deadlock on a dependency chain.

use crate::handle::{AssetId, AssetPriority, LoadState};
use crate::loader::{
    dispose_logged, LoadError, LoadResult, LoadedAsset, ProduceError, Resource, ResidencySink,
};
use crate::registry::{AssetDescriptor, AssetRegistry};
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Future shared by every waiter of one task
pub type LoadFuture = Shared<BoxFuture<'static, LoadResult<LoadedAsset>>>;

/// Load queue configuration
#[derive(Clone, Debug)]
pub struct LoadQueueConfig {
    /// Maximum concurrent producer invocations
    pub max_concurrent_loads: usize,
    /// Number of recent completions kept for throughput estimates
    pub throughput_window: usize,
}

impl Default for LoadQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 4,
            throughput_window: 16,
        }
    }
}

/// Event from the load queue
#[derive(Clone, Debug, PartialEq)]
pub enum QueueEvent {
    /// Asset finished loading
    Loaded(AssetId),
    /// Asset failed to load
    Failed(AssetId, LoadError),
    /// Load was cancelled; any produced resource went to disposal
    Cancelled(AssetId),
    /// Loaded result was dropped from the cache
    Forgotten(AssetId),
}

/// A settled load, used for throughput estimates
#[derive(Clone, Debug)]
pub struct CompletedLoad {
    /// Asset that settled
    pub id: AssetId,
    /// Its estimated size
    pub weight: u64,
    /// When it settled
    pub at: Instant,
}

/// Weighted progress inputs derived from task states
#[derive(Clone, Debug)]
pub struct QueueProgress {
    /// Sum of estimated sizes over all registered descriptors
    pub total_weight: u64,
    /// Sum over descriptors that have settled at least once
    pub settled_weight: u64,
    /// Recent completions, oldest first
    pub recent: Vec<CompletedLoad>,
    /// Most recent load failure
    pub last_error: Option<LoadError>,
}

/// Load queue statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub loading: usize,
    pub loaded: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

struct LoadTask {
    descriptor: Arc<AssetDescriptor>,
    seq: u64,
    state: LoadState,
    waiters: LoadFuture,
    sender: Option<oneshot::Sender<LoadResult<LoadedAsset>>>,
    loaded: Option<LoadedAsset>,
    error: Option<LoadError>,
    /// Owner no longer wants the result; dispose it on completion
    cancel_pending: bool,
}

impl LoadTask {
    fn resolve(&mut self, result: LoadResult<LoadedAsset>) {
        if let Some(sender) = self.sender.take() {
            // Nobody may be listening anymore
            let _ = sender.send(result);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingLoad {
    priority: AssetPriority,
    seq: u64,
    id: AssetId,
}

impl Ord for PendingLoad {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier registration
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingLoad {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<AssetId, LoadTask>,
    pending: BinaryHeap<PendingLoad>,
    in_flight: usize,
    peak_in_flight: usize,
    pump_scheduled: bool,
    /// Ids that settled at least once; keeps progress monotonic across evictions
    settled: HashSet<AssetId>,
    completions: VecDeque<CompletedLoad>,
    last_error: Option<LoadError>,
    events: Vec<QueueEvent>,
}

struct QueueShared {
    config: LoadQueueConfig,
    registry: Arc<RwLock<AssetRegistry>>,
    runtime: Handle,
    state: Mutex<QueueState>,
    sink: RwLock<Option<Arc<dyn ResidencySink>>>,
}

/// Priority load queue
///
/// Cheap to clone; clones share the same tasks.
#[derive(Clone)]
pub struct LoadQueue {
    inner: Arc<QueueShared>,
}

impl LoadQueue {
    /// Create a new load queue spawning its work on `runtime`
    pub fn new(config: LoadQueueConfig, registry: Arc<RwLock<AssetRegistry>>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(QueueShared {
                config,
                registry,
                runtime,
                state: Mutex::new(QueueState::default()),
                sink: RwLock::new(None),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &LoadQueueConfig {
        &self.inner.config
    }

    /// Get the shared registry
    pub fn registry(&self) -> &Arc<RwLock<AssetRegistry>> {
        &self.inner.registry
    }

    /// Install the sink that receives loaded and orphaned resources
    pub fn set_sink(&self, sink: Arc<dyn ResidencySink>) {
        *self.inner.sink.write() = Some(sink);
    }

    /// Request an asset
    ///
    /// Returns the existing task's future if one is queued, loading, loaded
    /// or failed. A failed task stays failed until [`LoadQueue::retry`].
    pub fn request_load(&self, id: &AssetId) -> LoadFuture {
        let mut state = self.inner.state.lock();
        self.request_locked(&mut state, id)
    }

    /// Clear a failed task and request it again
    ///
    /// Failed dependencies on the way are cleared too, so a dependent that
    /// failed because of them is not held back by the cached failure.
    pub fn retry(&self, id: &AssetId) -> LoadFuture {
        let mut state = self.inner.state.lock();
        Self::clear_failed(&mut state, id, &mut HashSet::new());
        self.request_locked(&mut state, id)
    }

    /// Clear every failed task, then request each of them again
    ///
    /// Returns the retried ids, sorted, with their futures.
    pub fn retry_failed(&self) -> Vec<(AssetId, LoadFuture)> {
        let mut state = self.inner.state.lock();
        let mut failed: Vec<AssetId> = state
            .tasks
            .iter()
            .filter(|(_, t)| t.state == LoadState::Failed)
            .map(|(id, _)| id.clone())
            .collect();
        failed.sort();

        let mut cleared = HashSet::new();
        for id in &failed {
            Self::clear_failed(&mut state, id, &mut cleared);
        }
        failed
            .into_iter()
            .map(|id| {
                let waiters = self.request_locked(&mut state, &id);
                (id, waiters)
            })
            .collect()
    }

    /// Cancel a pending load
    ///
    /// A queued task is dropped immediately. A loading task keeps running;
    /// its resource is handed to the sink for disposal when it completes.
    /// Returns false if the task was not pending.
    pub fn cancel(&self, id: &AssetId) -> bool {
        let mut state = self.inner.state.lock();
        match state.tasks.get(id).map(|t| t.state) {
            Some(LoadState::Loading) => {
                log::debug!("Load of {} marked cancel-pending", id);
                if let Some(task) = state.tasks.get_mut(id) {
                    task.cancel_pending = true;
                }
                true
            }
            Some(LoadState::Queued) => {
                Self::drop_cancelled(&mut state, id);
                true
            }
            _ => false,
        }
    }

    /// Drop a settled result (loaded or failed) from the cache
    ///
    /// Called once the resource has been disposed elsewhere; a later request
    /// produces it again. Pending tasks are left alone.
    pub fn forget(&self, id: &AssetId) -> Option<LoadedAsset> {
        let mut state = self.inner.state.lock();
        if !state.tasks.get(id).map(|t| t.state.is_settled()).unwrap_or(false) {
            return None;
        }
        let task = state.tasks.remove(id)?;
        state.events.push(QueueEvent::Forgotten(id.clone()));
        task.loaded
    }

    /// Drop every loaded result and cancel every pending task
    pub fn clear(&self) -> Vec<LoadedAsset> {
        let mut state = self.inner.state.lock();
        let ids: Vec<AssetId> = state.tasks.keys().cloned().collect();
        let mut loaded = Vec::new();
        for id in ids {
            let Some(task_state) = state.tasks.get(&id).map(|t| t.state) else {
                continue;
            };
            match task_state {
                LoadState::Loaded => {
                    if let Some(asset) = state.tasks.remove(&id).and_then(|t| t.loaded) {
                        loaded.push(asset);
                    }
                }
                LoadState::Queued => Self::drop_cancelled(&mut state, &id),
                LoadState::Loading => {
                    if let Some(task) = state.tasks.get_mut(&id) {
                        task.cancel_pending = true;
                    }
                }
                LoadState::Failed => {
                    state.tasks.remove(&id);
                }
            }
        }
        loaded
    }

    /// Drop a descriptor together with its progress history
    ///
    /// Pending loads should be cancelled first. A descriptor registered
    /// later under the same id starts out unsettled.
    pub fn remove(&self, id: &AssetId) -> Option<Arc<AssetDescriptor>> {
        let mut state = self.inner.state.lock();
        state.settled.remove(id);
        state.completions.retain(|c| &c.id != id);
        if state.tasks.get(id).map(|t| t.state.is_settled()).unwrap_or(false) {
            state.tasks.remove(id);
        }
        self.inner.registry.write().remove(id)
    }

    /// Get the state of a task
    pub fn state(&self, id: &AssetId) -> Option<LoadState> {
        self.inner.state.lock().tasks.get(id).map(|t| t.state)
    }

    /// Check if an asset is loaded
    pub fn is_loaded(&self, id: &AssetId) -> bool {
        self.state(id) == Some(LoadState::Loaded)
    }

    /// Check if a loading task will be disposed on completion
    pub fn is_cancel_pending(&self, id: &AssetId) -> bool {
        self.inner
            .state
            .lock()
            .tasks
            .get(id)
            .map(|t| t.cancel_pending)
            .unwrap_or(false)
    }

    /// Get a loaded asset
    pub fn get(&self, id: &AssetId) -> Option<LoadedAsset> {
        self.inner.state.lock().tasks.get(id).and_then(|t| t.loaded.clone())
    }

    /// Get the cached error of a failed task
    pub fn error(&self, id: &AssetId) -> Option<LoadError> {
        self.inner.state.lock().tasks.get(id).and_then(|t| t.error.clone())
    }

    /// Ids of every failed task
    pub fn failed_ids(&self) -> Vec<AssetId> {
        self.inner
            .state
            .lock()
            .tasks
            .iter()
            .filter(|(_, t)| t.state == LoadState::Failed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Most recent load failure
    pub fn last_error(&self) -> Option<LoadError> {
        self.inner.state.lock().last_error.clone()
    }

    /// Weighted progress inputs
    pub fn progress(&self) -> QueueProgress {
        let state = self.inner.state.lock();
        let registry = self.inner.registry.read();
        let mut total_weight = 0;
        let mut settled_weight = 0;
        for descriptor in registry.all() {
            total_weight += descriptor.estimated_size;
            if state.settled.contains(&descriptor.id) {
                settled_weight += descriptor.estimated_size;
            }
        }
        QueueProgress {
            total_weight,
            settled_weight,
            recent: state.completions.iter().cloned().collect(),
            last_error: state.last_error.clone(),
        }
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let mut stats = QueueStats {
            in_flight: state.in_flight,
            peak_in_flight: state.peak_in_flight,
            ..QueueStats::default()
        };
        for task in state.tasks.values() {
            match task.state {
                LoadState::Queued => stats.queued += 1,
                LoadState::Loading => stats.loading += 1,
                LoadState::Loaded => stats.loaded += 1,
                LoadState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Drain events
    pub fn drain_events(&self) -> Vec<QueueEvent> {
        self.inner.state.lock().events.drain(..).collect()
    }

    fn request_locked(&self, state: &mut QueueState, id: &AssetId) -> LoadFuture {
        if let Some(task) = state.tasks.get_mut(id) {
            if task.cancel_pending {
                log::debug!("Load of {} requested again before completion", id);
                task.cancel_pending = false;
            }
            return task.waiters.clone();
        }

        let (descriptor, seq) = {
            let mut registry = self.inner.registry.write();
            let descriptor = match registry.get(id) {
                Ok(descriptor) => descriptor,
                Err(_) => {
                    log::warn!("Requested unregistered asset {}", id);
                    return future::ready(Err(LoadError::NotFound(id.clone())))
                        .boxed()
                        .shared();
                }
            };
            let seq = registry.sequence(id).unwrap_or(u64::MAX);
            registry.seal(id);
            (descriptor, seq)
        };

        let (sender, receiver) = oneshot::channel();
        let dropped_id = id.clone();
        let waiters = receiver
            .map(move |r| r.unwrap_or_else(|_| Err(LoadError::Cancelled(dropped_id))))
            .boxed()
            .shared();

        state.tasks.insert(
            id.clone(),
            LoadTask {
                descriptor: descriptor.clone(),
                seq,
                state: LoadState::Queued,
                waiters: waiters.clone(),
                sender: Some(sender),
                loaded: None,
                error: None,
                cancel_pending: false,
            },
        );

        if descriptor.dependencies.is_empty() {
            self.enqueue_ready(state, id);
        } else {
            self.await_dependencies(state, id, &descriptor);
        }
        waiters
    }

    fn await_dependencies(&self, state: &mut QueueState, id: &AssetId, descriptor: &AssetDescriptor) {
        let deps: Vec<LoadFuture> = descriptor
            .dependencies
            .iter()
            .map(|dep| self.request_locked(state, dep))
            .collect();

        let queue = self.clone();
        let id = id.clone();
        self.inner.runtime.spawn(async move {
            let results = future::join_all(deps).await;
            queue.dependencies_resolved(&id, results);
        });
    }

    fn dependencies_resolved(&self, id: &AssetId, results: Vec<LoadResult<LoadedAsset>>) {
        let mut state = self.inner.state.lock();
        let Some(task) = state.tasks.get(id) else {
            return;
        };
        if task.state != LoadState::Queued {
            return;
        }
        let descriptor = task.descriptor.clone();

        let mut cancelled_dep = false;
        let mut failed_dep = None;
        for result in &results {
            match result {
                Err(LoadError::Cancelled(_)) => cancelled_dep = true,
                Err(e) => {
                    failed_dep.get_or_insert_with(|| e.asset().clone());
                }
                Ok(_) => {}
            }
        }

        if let Some(dependency) = failed_dep {
            let err = LoadError::DependencyFailed { asset: id.clone(), dependency };
            self.settle_failure(&mut state, id, err);
        } else if cancelled_dep {
            // A dependency's own owner gave it up; ask for it again on our behalf
            log::debug!("Dependency of {} was cancelled, re-requesting", id);
            self.await_dependencies(&mut state, id, &descriptor);
        } else {
            self.enqueue_ready(&mut state, id);
        }
    }

    fn enqueue_ready(&self, state: &mut QueueState, id: &AssetId) {
        let Some(task) = state.tasks.get(id) else {
            return;
        };
        let entry = PendingLoad {
            priority: task.descriptor.priority,
            seq: task.seq,
            id: id.clone(),
        };
        state.pending.push(entry);
        self.schedule_pump(state);
    }

    fn schedule_pump(&self, state: &mut QueueState) {
        if state.pump_scheduled {
            return;
        }
        state.pump_scheduled = true;
        let queue = self.clone();
        self.inner.runtime.spawn(async move {
            queue.pump();
        });
    }

    fn pump(&self) {
        let max = self.inner.config.max_concurrent_loads.max(1);
        let mut dispatch = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.pump_scheduled = false;
            while state.in_flight < max {
                let Some(next) = state.pending.pop() else {
                    break;
                };
                let Some(task) = state.tasks.get_mut(&next.id) else {
                    continue;
                };
                if task.state != LoadState::Queued {
                    continue;
                }
                task.state = LoadState::Loading;
                dispatch.push(task.descriptor.clone());
                state.in_flight += 1;
                state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            }
        }

        // Producers run outside the lock; they are foreign code
        for descriptor in dispatch {
            log::debug!("Loading {} ({:?})", descriptor.id, descriptor.priority);
            let produce = descriptor.producer.produce();
            let queue = self.clone();
            self.inner.runtime.spawn(async move {
                let result = produce.await;
                queue.complete(&descriptor, result);
            });
        }
    }

    fn complete(&self, descriptor: &AssetDescriptor, result: Result<Resource, ProduceError>) {
        let id = &descriptor.id;
        let mut loaded = None;
        let mut orphan = None;
        {
            let mut state = self.inner.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            let cancel_pending = state.tasks.get(id).map(|t| t.cancel_pending);

            match (result, cancel_pending) {
                (Ok(resource), Some(false)) => {
                    let asset = LoadedAsset { id: id.clone(), kind: descriptor.kind, resource };
                    if let Some(task) = state.tasks.get_mut(id) {
                        task.state = LoadState::Loaded;
                        task.loaded = Some(asset.clone());
                        task.resolve(Ok(asset.clone()));
                    }
                    self.record_settled(&mut state, id, descriptor.estimated_size);
                    state.events.push(QueueEvent::Loaded(id.clone()));
                    log::debug!("Loaded {}", id);
                    loaded = Some(asset);
                }
                (Ok(resource), cancelled) => {
                    if cancelled.is_some() {
                        Self::drop_cancelled(&mut state, id);
                    }
                    log::debug!("Load of {} finished after cancellation, disposing", id);
                    orphan = Some(LoadedAsset { id: id.clone(), kind: descriptor.kind, resource });
                }
                (Err(e), Some(false)) => {
                    let err = LoadError::ProduceFailed { asset: id.clone(), reason: e.0 };
                    self.settle_failure(&mut state, id, err);
                }
                (Err(e), cancelled) => {
                    // Nobody wants the result; do not cache the failure
                    if cancelled.is_some() {
                        Self::drop_cancelled(&mut state, id);
                    }
                    log::debug!("Cancelled load of {} failed: {}", id, e);
                }
            }
        }

        let sink = self.inner.sink.read().clone();
        if let Some(asset) = loaded {
            if let Some(sink) = &sink {
                sink.on_loaded(&asset);
            }
        }
        if let Some(asset) = orphan {
            match sink {
                Some(sink) => sink.dispose_orphan(asset),
                None => {
                    let _ = dispose_logged(&asset);
                }
            }
        }

        self.pump();
    }

    fn settle_failure(&self, state: &mut QueueState, id: &AssetId, err: LoadError) {
        log::warn!("{}", err);
        let mut weight = 0;
        if let Some(task) = state.tasks.get_mut(id) {
            task.state = LoadState::Failed;
            task.error = Some(err.clone());
            task.resolve(Err(err.clone()));
            weight = task.descriptor.estimated_size;
        }
        // Failures count as settled for progress and throughput
        self.record_settled(state, id, weight);
        state.last_error = Some(err.clone());
        state.events.push(QueueEvent::Failed(id.clone(), err));
    }

    fn record_settled(&self, state: &mut QueueState, id: &AssetId, weight: u64) {
        state.settled.insert(id.clone());
        state.completions.push_back(CompletedLoad { id: id.clone(), weight, at: Instant::now() });
        while state.completions.len() > self.inner.config.throughput_window.max(1) {
            state.completions.pop_front();
        }
    }

    fn clear_failed(state: &mut QueueState, id: &AssetId, cleared: &mut HashSet<AssetId>) {
        if !cleared.insert(id.clone()) {
            return;
        }
        if state.tasks.get(id).map(|t| t.state) != Some(LoadState::Failed) {
            return;
        }
        let Some(task) = state.tasks.remove(id) else {
            return;
        };
        log::info!("Retrying {}", id);
        if state.last_error.as_ref().map(|e| e.asset()) == Some(id) {
            state.last_error = None;
        }
        for dep in &task.descriptor.dependencies {
            Self::clear_failed(state, dep, cleared);
        }
    }

    fn drop_cancelled(state: &mut QueueState, id: &AssetId) {
        if let Some(mut task) = state.tasks.remove(id) {
            task.resolve(Err(LoadError::Cancelled(id.clone())));
            state.events.push(QueueEvent::Cancelled(id.clone()));
        }
    }
}

impl std::fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadQueue")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::AssetKind;
    use crate::loader::{DisposeError, GpuResource};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct MockResource {
        disposed: AtomicUsize,
    }

    impl GpuResource for MockResource {
        fn dispose(&self) -> Result<(), DisposeError> {
            self.disposed.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    fn setup(max_concurrent_loads: usize) -> (LoadQueue, Arc<RwLock<AssetRegistry>>) {
        let registry = Arc::new(RwLock::new(AssetRegistry::new()));
        let config = LoadQueueConfig { max_concurrent_loads, ..LoadQueueConfig::default() };
        let queue = LoadQueue::new(config, registry.clone(), Handle::current());
        (queue, registry)
    }

    /// Descriptor whose producer appends its id to `log` when it finishes
    fn logged(id: &str, priority: AssetPriority, log: &Arc<Mutex<Vec<String>>>) -> AssetDescriptor {
        let log = log.clone();
        let name = id.to_string();
        AssetDescriptor::new(id, AssetKind::Geometry, move || {
            let log = log.clone();
            let name = name.clone();
            async move {
                tokio::task::yield_now().await;
                log.lock().push(name);
                Ok::<Resource, ProduceError>(Arc::new(MockResource::default()))
            }
        })
        .with_priority(priority)
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (queue, registry) = setup(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .write()
            .register(AssetDescriptor::new("mesh", AssetKind::Geometry, move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                async {
                    tokio::task::yield_now().await;
                    Ok::<Resource, ProduceError>(Arc::new(MockResource::default()))
                }
            }))
            .unwrap();

        let id = AssetId::new("mesh");
        let waiters: Vec<_> = (0..5).map(|_| queue.request_load(&id)).collect();
        let results = future::join_all(waiters).await;

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(result.as_ref().unwrap().same_resource(first));
        }

        // A later request is served from the cache
        let again = queue.request_load(&id).await.unwrap();
        assert!(again.same_resource(first));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert!(queue.is_loaded(&id));
    }

    #[tokio::test]
    async fn test_single_flight_shares_errors() {
        let (queue, registry) = setup(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .write()
            .register(AssetDescriptor::new("broken", AssetKind::Texture, move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                async { Err::<Resource, ProduceError>(ProduceError::from("corrupt")) }
            }))
            .unwrap();

        let id = AssetId::new("broken");
        let results = future::join_all((0..3).map(|_| queue.request_load(&id))).await;
        let expected = LoadError::ProduceFailed { asset: id.clone(), reason: "corrupt".into() };
        for result in results {
            assert_eq!(result.unwrap_err(), expected);
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_priority_order_with_single_slot() {
        let (queue, registry) = setup(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = registry.write();
            registry.register(logged("low", AssetPriority::Low, &log)).unwrap();
            registry.register(logged("critical", AssetPriority::Critical, &log)).unwrap();
            registry.register(logged("high", AssetPriority::High, &log)).unwrap();
        }

        let futures: Vec<_> = ["low", "critical", "high"]
            .iter()
            .map(|id| queue.request_load(&AssetId::new(*id)))
            .collect();
        future::join_all(futures).await;

        assert_eq!(*log.lock(), vec!["critical", "high", "low"]);
        assert_eq!(queue.stats().peak_in_flight, 1);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let (queue, registry) = setup(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = registry.write();
            for id in ["first", "second", "third"] {
                registry.register(logged(id, AssetPriority::Medium, &log)).unwrap();
            }
        }

        // Request order differs from registration order
        let futures: Vec<_> = ["third", "first", "second"]
            .iter()
            .map(|id| queue.request_load(&AssetId::new(*id)))
            .collect();
        future::join_all(futures).await;

        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_dependency_loads_first() {
        let (queue, registry) = setup(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = registry.write();
            registry.register(logged("texture", AssetPriority::Low, &log)).unwrap();
            registry
                .register(logged("material", AssetPriority::Critical, &log).with_dependency("texture"))
                .unwrap();
        }

        let material = queue.request_load(&AssetId::new("material")).await;
        assert!(material.is_ok());
        assert_eq!(*log.lock(), vec!["texture", "material"]);
        assert!(queue.is_loaded(&AssetId::new("texture")));
    }

    #[tokio::test]
    async fn test_dependency_failure_propagates() {
        let (queue, registry) = setup(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = registry.write();
            registry
                .register(AssetDescriptor::new("texture", AssetKind::Texture, || async {
                    Err::<Resource, ProduceError>(ProduceError::from("404"))
                }))
                .unwrap();
            registry
                .register(logged("material", AssetPriority::High, &log).with_dependency("texture"))
                .unwrap();
        }

        let err = queue.request_load(&AssetId::new("material")).await.unwrap_err();
        assert_eq!(
            err,
            LoadError::DependencyFailed {
                asset: AssetId::new("material"),
                dependency: AssetId::new("texture"),
            }
        );
        // The dependent producer never ran
        assert!(log.lock().is_empty());
        assert_eq!(queue.state(&AssetId::new("material")), Some(LoadState::Failed));
    }

    #[tokio::test]
    async fn test_failure_cached_until_retry() {
        let (queue, registry) = setup(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .write()
            .register(AssetDescriptor::new("flaky", AssetKind::Geometry, move || {
                let attempt = counter.fetch_add(1, AtomicOrdering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(ProduceError::from("timeout"))
                    } else {
                        Ok::<Resource, ProduceError>(Arc::new(MockResource::default()))
                    }
                }
            }))
            .unwrap();

        let id = AssetId::new("flaky");
        assert!(queue.request_load(&id).await.is_err());
        assert!(queue.request_load(&id).await.is_err());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(queue.last_error().map(|e| e.asset().clone()), Some(id.clone()));
        assert_eq!(queue.failed_ids(), vec![id.clone()]);

        assert!(queue.retry(&id).await.is_ok());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
        assert!(queue.last_error().is_none());
        assert!(queue.is_loaded(&id));
    }

    /// Producer that fails on its first attempt only
    fn fails_once(id: &str, calls: &Arc<AtomicUsize>) -> AssetDescriptor {
        let calls = calls.clone();
        AssetDescriptor::new(id, AssetKind::Texture, move || {
            let attempt = calls.fetch_add(1, AtomicOrdering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ProduceError::from("decoder busy"))
                } else {
                    Ok::<Resource, ProduceError>(Arc::new(MockResource::default()))
                }
            }
        })
    }

    #[tokio::test]
    async fn test_retry_clears_failed_dependency() {
        let (queue, registry) = setup(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = registry.write();
            registry.register(fails_once("lab/texture", &calls)).unwrap();
            registry
                .register(logged("lab/material", AssetPriority::High, &log).with_dependency("lab/texture"))
                .unwrap();
        }

        let material = AssetId::new("lab/material");
        assert!(queue.request_load(&material).await.is_err());
        assert_eq!(queue.state(&AssetId::new("lab/texture")), Some(LoadState::Failed));

        // Retrying the dependent alone reaches the failed dependency
        assert!(queue.retry(&material).await.is_ok());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
        assert!(queue.is_loaded(&AssetId::new("lab/texture")));
        assert_eq!(*log.lock(), vec!["lab/material"]);
    }

    #[tokio::test]
    async fn test_retry_failed_ignores_id_order() {
        let (queue, registry) = setup(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = registry.write();
            // The dependent sorts before its dependency
            registry.register(fails_once("lab/texture", &calls)).unwrap();
            registry
                .register(logged("lab/material", AssetPriority::High, &log).with_dependency("lab/texture"))
                .unwrap();
        }
        assert!(queue.request_load(&AssetId::new("lab/material")).await.is_err());
        assert_eq!(queue.failed_ids().len(), 2);

        let retried = queue.retry_failed();
        let ids: Vec<_> = retried.iter().map(|(id, _)| id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["lab/material", "lab/texture"]);
        let results = future::join_all(retried.into_iter().map(|(_, f)| f)).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!(queue.failed_ids().is_empty());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remove_resets_progress_history() {
        let (queue, registry) = setup(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.write().register(logged("prop", AssetPriority::Low, &log).with_size(2)).unwrap();

        let id = AssetId::new("prop");
        queue.request_load(&id).await.unwrap();
        assert_eq!(queue.progress().settled_weight, 2);

        assert!(queue.remove(&id).is_some());
        assert!(queue.state(&id).is_none());
        assert_eq!(queue.progress().total_weight, 0);

        // Same id registered again counts as unsettled until it loads
        registry.write().register(logged("prop", AssetPriority::Low, &log).with_size(2)).unwrap();
        let progress = queue.progress();
        assert_eq!((progress.settled_weight, progress.total_weight), (0, 2));
        assert!(progress.recent.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_load_is_disposed() {
        let (queue, registry) = setup(1);
        let gate = Arc::new(Notify::new());
        let resource = Arc::new(MockResource::default());
        {
            let gate = gate.clone();
            let resource = resource.clone();
            registry
                .write()
                .register(AssetDescriptor::new("hologram", AssetKind::Composite, move || {
                    let gate = gate.clone();
                    let resource = resource.clone();
                    async move {
                        gate.notified().await;
                        Ok::<Resource, ProduceError>(resource)
                    }
                }))
                .unwrap();
        }

        let id = AssetId::new("hologram");
        let waiter = queue.request_load(&id);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.state(&id), Some(LoadState::Loading));

        assert!(queue.cancel(&id));
        assert!(queue.is_cancel_pending(&id));
        gate.notify_one();

        assert_eq!(waiter.await.unwrap_err(), LoadError::Cancelled(id.clone()));
        assert_eq!(resource.disposed.load(AtomicOrdering::SeqCst), 1);
        assert!(!queue.is_loaded(&id));
        assert!(queue.drain_events().contains(&QueueEvent::Cancelled(id)));
    }

    #[tokio::test]
    async fn test_cancelled_queued_load_never_runs() {
        let (queue, registry) = setup(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.write().register(logged("skybox", AssetPriority::Low, &log)).unwrap();

        let id = AssetId::new("skybox");
        let waiter = queue.request_load(&id);
        assert!(queue.cancel(&id));
        assert_eq!(waiter.await.unwrap_err(), LoadError::Cancelled(id.clone()));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(log.lock().is_empty());
        assert!(queue.state(&id).is_none());
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let (queue, registry) = setup(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = registry.write();
            for i in 0..6 {
                let active = active.clone();
                let peak = peak.clone();
                registry
                    .register(AssetDescriptor::new(format!("chunk{i}"), AssetKind::Geometry, move || {
                        let active = active.clone();
                        let peak = peak.clone();
                        async move {
                            let now = active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                            peak.fetch_max(now, AtomicOrdering::SeqCst);
                            for _ in 0..3 {
                                tokio::task::yield_now().await;
                            }
                            active.fetch_sub(1, AtomicOrdering::SeqCst);
                            Ok::<Resource, ProduceError>(Arc::new(MockResource::default()))
                        }
                    }))
                    .unwrap();
            }
        }

        let futures: Vec<_> = (0..6)
            .map(|i| queue.request_load(&AssetId::new(format!("chunk{i}"))))
            .collect();
        let results = future::join_all(futures).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(queue.stats().loaded, 6);
        assert_eq!(queue.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_unknown_asset() {
        let (queue, _registry) = setup(1);
        let id = AssetId::new("missing");
        assert_eq!(queue.request_load(&id).await.unwrap_err(), LoadError::NotFound(id.clone()));
        assert!(queue.state(&id).is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_across_forget() {
        let (queue, registry) = setup(2);
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = registry.write();
            registry.register(logged("a", AssetPriority::High, &log).with_size(3)).unwrap();
            registry.register(logged("b", AssetPriority::Low, &log).with_size(1)).unwrap();
        }

        assert_eq!(queue.progress().settled_weight, 0);
        queue.request_load(&AssetId::new("a")).await.unwrap();
        assert_eq!(queue.progress().settled_weight, 3);

        assert!(queue.forget(&AssetId::new("a")).is_some());
        assert!(!queue.is_loaded(&AssetId::new("a")));
        assert_eq!(queue.progress().settled_weight, 3);

        queue.request_load(&AssetId::new("b")).await.unwrap();
        let progress = queue.progress();
        assert_eq!(progress.settled_weight, progress.total_weight);
    }

    #[test]
    fn test_pending_order() {
        let mut heap = BinaryHeap::new();
        heap.push(PendingLoad { priority: AssetPriority::Low, seq: 0, id: "l".into() });
        heap.push(PendingLoad { priority: AssetPriority::High, seq: 2, id: "h2".into() });
        heap.push(PendingLoad { priority: AssetPriority::High, seq: 1, id: "h1".into() });

        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|p| p.id).collect();
        assert_eq!(order, vec![AssetId::new("h1"), AssetId::new("h2"), AssetId::new("l")]);
    }
}
