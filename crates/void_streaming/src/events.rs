//! Streaming events

use crate::scene::SceneId;
use void_asset::{AssetId, LoadError};

/// Event from the progressive loader
#[derive(Clone, Debug, PartialEq)]
pub enum StreamingEvent {
    /// Scene entered its preload window and its loads were issued
    SceneEntered(SceneId),
    /// Every asset of the scene settled and it was activated
    SceneActivated {
        scene: SceneId,
        /// Assets that failed; the scene runs without them
        degraded: Vec<AssetId>,
    },
    /// Scene moved past its unload distance
    SceneEvicted {
        scene: SceneId,
        /// Resources released by this eviction
        disposed: usize,
    },
    /// Asset finished loading
    AssetLoaded(AssetId),
    /// Asset failed to load
    AssetFailed(AssetId, LoadError),
    /// A native resource was released
    ResourceDisposed(AssetId),
}

impl StreamingEvent {
    /// Scene this event concerns, if any
    pub fn scene(&self) -> Option<&SceneId> {
        match self {
            Self::SceneEntered(scene)
            | Self::SceneActivated { scene, .. }
            | Self::SceneEvicted { scene, .. } => Some(scene),
            _ => None,
        }
    }
}
