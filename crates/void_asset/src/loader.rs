//! Asset Loader - producers, resources and load errors
//!
//! Producers are async factories supplied by scene-authoring code. They turn
//! a descriptor into a live native resource and have no other side effects.

use crate::handle::{AssetId, AssetKind};
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error during asset loading
///
/// Cloned to every waiter of a single-flight task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No descriptor registered under this id
    #[error("Asset not registered: {0}")]
    NotFound(AssetId),

    /// The producer rejected
    #[error("Failed to produce {asset}: {reason}")]
    ProduceFailed { asset: AssetId, reason: String },

    /// A dependency failed, so the producer never ran
    #[error("Dependency {dependency} of {asset} failed to load")]
    DependencyFailed { asset: AssetId, dependency: AssetId },

    /// The owning scene left its window before the load finished
    #[error("Load of {0} was cancelled")]
    Cancelled(AssetId),
}

impl LoadError {
    /// The asset this error belongs to
    pub fn asset(&self) -> &AssetId {
        match self {
            Self::NotFound(id) | Self::Cancelled(id) => id,
            Self::ProduceFailed { asset, .. } | Self::DependencyFailed { asset, .. } => asset,
        }
    }

    /// Whether the error is permanent until an explicit retry
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Cancelled(_))
    }
}

/// Result type for asset loading
pub type LoadResult<T> = Result<T, LoadError>;

/// Error returned by a producer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProduceError(pub String);

impl From<String> for ProduceError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for ProduceError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Error returned by a native dispose call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisposeError {
    /// Resource was already released
    #[error("Resource already disposed")]
    AlreadyDisposed,

    /// The native call reported a failure
    #[error("Dispose failed: {0}")]
    Native(String),

    /// The native call panicked
    #[error("Dispose panicked for {0}")]
    Panicked(AssetId),
}

/// A live native resource (GPU geometry, material, texture, object graph)
pub trait GpuResource: Send + Sync {
    /// Release the native allocation
    fn dispose(&self) -> Result<(), DisposeError>;

    /// Toggle visibility in the render graph
    fn set_visible(&self, _visible: bool) {}
}

/// Shared pointer to a produced resource
pub type Resource = Arc<dyn GpuResource>;

/// A produced resource together with its identity
#[derive(Clone)]
pub struct LoadedAsset {
    /// Descriptor id
    pub id: AssetId,
    /// Descriptor kind
    pub kind: AssetKind,
    /// The live resource
    pub resource: Resource,
}

impl LoadedAsset {
    /// Check if two loaded assets share the same resource allocation
    pub fn same_resource(&self, other: &LoadedAsset) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }
}

impl fmt::Debug for LoadedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedAsset")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Trait for asset producers
pub trait AssetProducer: Send + Sync {
    /// Start producing the resource
    fn produce(&self) -> BoxFuture<'static, Result<Resource, ProduceError>>;
}

impl<F, Fut> AssetProducer for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resource, ProduceError>> + Send + 'static,
{
    fn produce(&self) -> BoxFuture<'static, Result<Resource, ProduceError>> {
        Box::pin((self)())
    }
}

/// Sink for resources whose owner no longer wants them
///
/// The queue hands finished-but-cancelled loads here instead of caching them.
pub trait ResidencySink: Send + Sync {
    /// A load finished and its result was cached
    fn on_loaded(&self, _asset: &LoadedAsset) {}

    /// A load finished after it was cancelled; the resource must be released
    fn dispose_orphan(&self, asset: LoadedAsset);
}

/// Dispose a single resource, logging instead of propagating failures
pub fn dispose_logged(asset: &LoadedAsset) -> Result<(), DisposeError> {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        asset.resource.dispose()
    }))
    .unwrap_or_else(|_| Err(DisposeError::Panicked(asset.id.clone())));

    if let Err(e) = &outcome {
        log::error!("Failed to dispose {}: {}", asset.id, e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl GpuResource for Counting {
        fn dispose(&self) -> Result<(), DisposeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Exploding;

    impl GpuResource for Exploding {
        fn dispose(&self) -> Result<(), DisposeError> {
            panic!("driver lost");
        }
    }

    #[test]
    fn test_load_error_asset() {
        let err = LoadError::ProduceFailed {
            asset: AssetId::new("tex"),
            reason: "decode".into(),
        };
        assert_eq!(err.asset().as_str(), "tex");
        assert!(err.is_permanent());
        assert!(!LoadError::Cancelled(AssetId::new("tex")).is_permanent());
    }

    #[tokio::test]
    async fn test_closure_producer() {
        let producer = || async {
            Ok::<Resource, ProduceError>(Arc::new(Counting(AtomicUsize::new(0))))
        };
        let resource = AssetProducer::produce(&producer).await;
        assert!(resource.is_ok());
    }

    #[test]
    fn test_dispose_logged_catches_panic() {
        let asset = LoadedAsset {
            id: AssetId::new("bad"),
            kind: AssetKind::Texture,
            resource: Arc::new(Exploding),
        };
        assert_eq!(
            dispose_logged(&asset),
            Err(DisposeError::Panicked(AssetId::new("bad")))
        );
    }

    #[test]
    fn test_same_resource() {
        let resource: Resource = Arc::new(Counting(AtomicUsize::new(0)));
        let a = LoadedAsset { id: "a".into(), kind: AssetKind::Geometry, resource: resource.clone() };
        let b = a.clone();
        let c = LoadedAsset {
            id: "a".into(),
            kind: AssetKind::Geometry,
            resource: Arc::new(Counting(AtomicUsize::new(0))),
        };
        assert!(a.same_resource(&b));
        assert!(!a.same_resource(&c));
    }
}
