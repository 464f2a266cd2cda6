//! # void_asset - Progressive Asset Loading
//!
//! Asset catalogue and load scheduling with:
//! - Descriptors carrying priority, estimated cost and dependencies
//! - Single-flight loading (one producer call per id, shared results)
//! - Priority-ordered dispatch under a concurrency ceiling
//! - Cancel-then-dispose for loads nobody wants anymore
//!
//! ## Example
//!
//! ```ignore
//! use void_asset::prelude::*;
//!
//! let registry = Arc::new(RwLock::new(AssetRegistry::new()));
//! registry.write().register(
//!     AssetDescriptor::new("hero/mesh", AssetKind::Geometry, build_hero_mesh)
//!         .with_priority(AssetPriority::Critical)
//!         .with_size(40),
//! )?;
//!
//! let queue = LoadQueue::new(LoadQueueConfig::default(), registry, Handle::current());
//! let mesh = queue.request_load(&AssetId::new("hero/mesh")).await?;
//! ```

pub mod handle;
pub mod loader;
pub mod queue;
pub mod registry;

pub use handle::{AssetId, AssetKind, AssetPriority, LoadState};
pub use loader::{
    dispose_logged, AssetProducer, DisposeError, GpuResource, LoadError, LoadResult, LoadedAsset,
    ProduceError, Resource, ResidencySink,
};
pub use queue::{
    CompletedLoad, LoadFuture, LoadQueue, LoadQueueConfig, QueueEvent, QueueProgress, QueueStats,
};
pub use registry::{AssetDescriptor, AssetRegistry, RegistryError};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::handle::{AssetId, AssetKind, AssetPriority, LoadState};
    pub use crate::loader::{GpuResource, LoadError, LoadResult, LoadedAsset, ProduceError, Resource};
    pub use crate::queue::{LoadQueue, LoadQueueConfig};
    pub use crate::registry::{AssetDescriptor, AssetRegistry};
}

/// Built-in resources for placeholder content and tooling
pub mod resources {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// CPU-side stand-in for a native allocation
    ///
    /// Tracks its byte budget, visibility and whether it was released.
    /// Disposing twice reports [`DisposeError::AlreadyDisposed`].
    #[derive(Debug)]
    pub struct PlaceholderResource {
        /// Label for logs
        pub label: String,
        /// Resource kind
        pub kind: AssetKind,
        /// Bytes this resource would occupy
        pub bytes: u64,
        visible: AtomicBool,
        disposed: AtomicBool,
    }

    impl PlaceholderResource {
        /// Create a placeholder
        pub fn new(label: impl Into<String>, kind: AssetKind, bytes: u64) -> Self {
            Self {
                label: label.into(),
                kind,
                bytes,
                visible: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }
        }

        /// Check if visible in the render graph
        pub fn is_visible(&self) -> bool {
            self.visible.load(Ordering::Acquire)
        }

        /// Check if released
        pub fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::Acquire)
        }
    }

    impl GpuResource for PlaceholderResource {
        fn dispose(&self) -> Result<(), DisposeError> {
            if self.disposed.swap(true, Ordering::AcqRel) {
                return Err(DisposeError::AlreadyDisposed);
            }
            self.visible.store(false, Ordering::Release);
            log::trace!("Released {} ({} bytes)", self.label, self.bytes);
            Ok(())
        }

        fn set_visible(&self, visible: bool) {
            self.visible.store(visible, Ordering::Release);
        }
    }
}
