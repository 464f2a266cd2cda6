//! Asset identity - ids, kinds, priorities and load states
//!
//! Identity types shared by the registry, the load queue and everything
//! downstream that tracks what is resident.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for an asset descriptor
///
/// Stable for the lifetime of the descriptor. Cloning is cheap.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(Arc<str>);

impl AssetId {
    /// Create a new asset ID
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Get the raw ID value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AssetId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl Borrow<str> for AssetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What an asset turns into once produced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Vertex/index data
    Geometry,
    /// Shader parameters, usually referencing textures
    Material,
    /// Image data
    Texture,
    /// An object graph assembled from other assets
    Composite,
}

/// Load priority
///
/// Determines queue ordering only, never correctness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AssetPriority {
    /// Background content
    Low = 0,
    /// Regular content
    #[default]
    Medium = 1,
    /// Content needed shortly
    High = 2,
    /// First-paint content
    Critical = 3,
}

impl AssetPriority {
    /// All priorities, highest first
    pub const ALL: [AssetPriority; 4] = [
        AssetPriority::Critical,
        AssetPriority::High,
        AssetPriority::Medium,
        AssetPriority::Low,
    ];
}

/// Load state of a task in the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    /// Waiting for a concurrency slot or for dependencies
    Queued = 0,
    /// Producer is running
    Loading = 1,
    /// Loaded and cached
    Loaded = 2,
    /// Producer failed; cached until retried
    Failed = 3,
}

impl LoadState {
    /// Check if the task has not produced a result yet
    pub fn is_pending(&self) -> bool {
        matches!(self, LoadState::Queued | LoadState::Loading)
    }

    /// Check if the task reached a final state
    pub fn is_settled(&self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed)
    }
}
