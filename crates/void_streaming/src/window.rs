//! Scene Window Tracker
//!
//! Three bands per scene, measured as the distance from the tracked position
//! to the scene's anchor:
//!
//! ```text
//!   |<-- load -->|<----- hold ----->|<-- unload ...
//!   0        preload             unload
//! ```
//!
//! A scene in the hold band keeps whatever state it already had, so a
//! position oscillating around one threshold never thrashes.

use crate::scene::SceneId;
use glam::Vec3;
use std::collections::HashSet;

/// Which band a position falls in for one scene
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowBand {
    /// Within the preload distance
    Load,
    /// Between preload and unload distance
    Hold,
    /// Beyond the unload distance
    Unload,
}

/// Distance window of a scene
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneWindow {
    pub anchor: f32,
    pub preload_distance: f32,
    pub unload_distance: f32,
}

impl SceneWindow {
    /// Distance from `position` to the anchor
    pub fn distance(&self, position: f32) -> f32 {
        (position - self.anchor).abs()
    }

    /// Band for `position` with both distances multiplied by `scale`
    pub fn band(&self, position: f32, scale: f32) -> WindowBand {
        let distance = self.distance(position);
        if distance <= self.preload_distance * scale {
            WindowBand::Load
        } else if distance > self.unload_distance * scale {
            WindowBand::Unload
        } else {
            WindowBand::Hold
        }
    }
}

/// Scenes that should be resident and scenes that should be evicted
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowSets {
    pub should_load: Vec<SceneId>,
    pub should_unload: Vec<SceneId>,
}

/// Classify every window for a position
///
/// Pure; hold-band scenes appear in neither set.
pub fn evaluate<'a, I>(position: f32, windows: I, scale: f32) -> WindowSets
where
    I: IntoIterator<Item = (&'a SceneId, &'a SceneWindow)>,
{
    let mut sets = WindowSets::default();
    for (id, window) in windows {
        match window.band(position, scale) {
            WindowBand::Load => sets.should_load.push(id.clone()),
            WindowBand::Unload => sets.should_unload.push(id.clone()),
            WindowBand::Hold => {}
        }
    }
    sets
}

/// Changes since the previous evaluation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowTransitions {
    /// Scenes that became wanted
    pub entered: Vec<SceneId>,
    /// Wanted scenes that moved past their unload distance
    pub exited: Vec<SceneId>,
}

impl WindowTransitions {
    /// Check if nothing changed
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.exited.is_empty()
    }
}

/// Stateful tracker that diffs consecutive evaluations
#[derive(Clone, Debug)]
pub struct WindowTracker {
    /// Windows in registration order
    windows: Vec<(SceneId, SceneWindow)>,
    /// Scenes currently wanted resident
    wanted: HashSet<SceneId>,
    distance_scale: f32,
    last_position: Option<f32>,
}

impl Default for WindowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowTracker {
    /// Create an empty tracker with unit distance scale
    pub fn new() -> Self {
        Self::with_distance_scale(1.0)
    }

    /// Create an empty tracker with a distance multiplier
    pub fn with_distance_scale(distance_scale: f32) -> Self {
        Self {
            windows: Vec::new(),
            wanted: HashSet::new(),
            distance_scale,
            last_position: None,
        }
    }

    /// Add or replace a window and evaluate it against the last position
    pub fn insert(&mut self, id: SceneId, window: SceneWindow) -> WindowTransitions {
        match self.windows.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, slot)) => *slot = window,
            None => self.windows.push((id, window)),
        }
        self.reevaluate()
    }

    /// Remove a window; returns whether it was tracked
    pub fn remove(&mut self, id: &SceneId) -> bool {
        self.wanted.remove(id);
        let before = self.windows.len();
        self.windows.retain(|(existing, _)| existing != id);
        self.windows.len() != before
    }

    /// Move the tracked position
    pub fn update(&mut self, position: f32) -> WindowTransitions {
        self.last_position = Some(position);
        self.reevaluate()
    }

    /// Change the distance multiplier and re-evaluate
    pub fn set_distance_scale(&mut self, distance_scale: f32) -> WindowTransitions {
        self.distance_scale = distance_scale;
        self.reevaluate()
    }

    /// Forget which scenes are wanted; the next update re-enters them
    pub fn clear_wanted(&mut self) {
        self.wanted.clear();
    }

    /// Check if a scene is currently wanted
    pub fn is_wanted(&self, id: &SceneId) -> bool {
        self.wanted.contains(id)
    }

    /// Last position passed to [`WindowTracker::update`]
    pub fn last_position(&self) -> Option<f32> {
        self.last_position
    }

    /// Current distance multiplier
    pub fn distance_scale(&self) -> f32 {
        self.distance_scale
    }

    /// Number of tracked windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Check if no windows are tracked
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn reevaluate(&mut self) -> WindowTransitions {
        let Some(position) = self.last_position else {
            return WindowTransitions::default();
        };
        let sets = evaluate(
            position,
            self.windows.iter().map(|(id, window)| (id, window)),
            self.distance_scale,
        );

        let mut transitions = WindowTransitions::default();
        for id in sets.should_load {
            if self.wanted.insert(id.clone()) {
                transitions.entered.push(id);
            }
        }
        for id in sets.should_unload {
            if self.wanted.remove(&id) {
                transitions.exited.push(id);
            }
        }
        transitions
    }
}

/// Projects 3D camera positions onto the scalar loading axis
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadingAxis {
    pub origin: Vec3,
    /// Unit direction of travel
    pub direction: Vec3,
}

impl Default for LoadingAxis {
    fn default() -> Self {
        // Camera flies into the screen
        Self::new(Vec3::ZERO, Vec3::NEG_Z)
    }
}

impl LoadingAxis {
    /// Create an axis; `direction` is normalized
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Signed distance of `point` along the axis
    pub fn project(&self, point: Vec3) -> f32 {
        (point - self.origin).dot(self.direction)
    }

    /// Point on the axis at signed distance `t`
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}
