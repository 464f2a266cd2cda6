//! Scene registrations
//!
//! A scene is a group of assets that becomes resident together when the
//! tracked position comes within its preload distance.

use crate::error::{ConfigError, Result};
use crate::window::SceneWindow;
use std::fmt;
use std::sync::Arc;
use void_asset::{AssetDescriptor, AssetId, AssetPriority};

/// Unique scene identifier
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SceneId(Arc<str>);

impl SceneId {
    /// Create a new scene ID
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Get the raw ID value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SceneId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SceneId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Residency state of a scene as seen by the loader
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SceneState {
    /// Not wanted; nothing requested on its behalf
    #[default]
    Unloaded,
    /// Inside its preload window, assets in flight
    Loading,
    /// Every asset settled and the scene was activated
    Active,
}

/// A scene and the assets it owns
#[derive(Clone, Debug)]
pub struct SceneRegistration {
    /// Unique identity
    pub id: SceneId,
    /// Reference point on the loading axis
    pub anchor: f32,
    /// Distance at which loading begins
    pub preload_distance: f32,
    /// Distance beyond which the scene is evicted
    pub unload_distance: f32,
    /// Assets in authoring order
    pub assets: Vec<AssetDescriptor>,
}

impl SceneRegistration {
    /// Create a scene anchored at the axis origin
    pub fn new(id: impl Into<SceneId>, preload_distance: f32, unload_distance: f32) -> Self {
        Self {
            id: id.into(),
            anchor: 0.0,
            preload_distance,
            unload_distance,
            assets: Vec::new(),
        }
    }

    /// Set the reference point on the loading axis
    pub fn with_anchor(mut self, anchor: f32) -> Self {
        self.anchor = anchor;
        self
    }

    /// Add an asset
    pub fn with_asset(mut self, descriptor: AssetDescriptor) -> Self {
        self.assets.push(descriptor);
        self
    }

    /// Add several assets
    pub fn with_assets(mut self, descriptors: impl IntoIterator<Item = AssetDescriptor>) -> Self {
        self.assets.extend(descriptors);
        self
    }

    /// Check the distance window
    pub fn validate(&self) -> Result<()> {
        let valid = self.anchor.is_finite()
            && self.preload_distance.is_finite()
            && self.preload_distance >= 0.0
            && self.unload_distance > self.preload_distance;
        if !valid {
            return Err(ConfigError::InvalidWindow {
                scene: self.id.clone(),
                preload: self.preload_distance,
                unload: self.unload_distance,
            });
        }
        Ok(())
    }

    /// The scene's distance window
    pub fn window(&self) -> SceneWindow {
        SceneWindow {
            anchor: self.anchor,
            preload_distance: self.preload_distance,
            unload_distance: self.unload_distance,
        }
    }

    /// Asset ids, duplicates removed, in authoring order
    pub fn asset_ids(&self) -> Vec<AssetId> {
        let mut ids: Vec<AssetId> = Vec::with_capacity(self.assets.len());
        for descriptor in &self.assets {
            if !ids.contains(&descriptor.id) {
                ids.push(descriptor.id.clone());
            }
        }
        ids
    }

    /// Ids of assets with the given priority
    pub fn assets_with_priority(&self, priority: AssetPriority) -> impl Iterator<Item = &AssetId> {
        self.assets
            .iter()
            .filter(move |d| d.priority == priority)
            .map(|d| &d.id)
    }
}
