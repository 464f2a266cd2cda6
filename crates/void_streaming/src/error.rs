//! Error types for scene streaming

use crate::scene::SceneId;
use thiserror::Error;
use void_asset::{AssetId, RegistryError};

/// Configuration errors, raised synchronously at registration time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The hysteresis band is empty or inverted
    #[error("Scene {scene}: unload distance {unload} must be greater than preload distance {preload}")]
    InvalidWindow {
        scene: SceneId,
        preload: f32,
        unload: f32,
    },

    /// Same scene id registered again with different bounds or assets
    #[error("Scene {0} is already registered with different bounds")]
    ConflictingScene(SceneId),

    /// An asset id is claimed by two scenes
    #[error("Asset {asset} already belongs to scene {owner}")]
    AssetOwned { asset: AssetId, owner: SceneId },

    /// Scene not registered
    #[error("Scene not found: {0}")]
    SceneNotFound(SceneId),

    /// Descriptor registration failed (cycle, sealed descriptor)
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Invalid streaming configuration
    #[error("Invalid streaming configuration: {0}")]
    InvalidConfig(String),
}

/// Memory manager errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// A resource may only appear in one scene's handle list
    #[error("Asset {asset} is already tracked by scene {owner}")]
    AssetOwned { asset: AssetId, owner: SceneId },
}

/// Result type for streaming configuration
pub type Result<T> = std::result::Result<T, ConfigError>;
