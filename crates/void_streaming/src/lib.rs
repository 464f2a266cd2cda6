//! # void_streaming - Scroll-Driven Scene Streaming
//!
//! Loads and evicts groups of GPU assets as a camera travels along a
//! journey:
//!
//! - **Window tracking**: per-scene preload/unload distances with a hold band
//!   in between, so oscillating positions never thrash
//! - **Progressive loading**: priority-ordered, single-flight loads through
//!   [`void_asset::LoadQueue`], scene activation once every asset settled
//! - **Residency**: reference-counted activation and ordered, exactly-once
//!   disposal of native resources
//! - **Progress**: weighted fraction complete and time-remaining estimate
//!
//! ## Example
//!
//! ```ignore
//! use void_streaming::prelude::*;
//!
//! let loader = ProgressiveLoader::new(StreamingConfig::default(), Handle::current())?;
//! loader.register_scene(
//!     SceneRegistration::new("hero", 15.0, 25.0)
//!         .with_asset(hero_mesh_descriptor())
//!         .with_asset(hero_backdrop_descriptor()),
//! )?;
//!
//! loader.preload_critical_assets().await;
//!
//! // Every frame
//! loader.update_position(scroll_progress * JOURNEY_LENGTH);
//! let progress = loader.get_loading_progress();
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod memory;
pub mod progress;
pub mod scene;
pub mod window;

pub use config::{QualityHint, QualityScales, StreamingConfig};
pub use error::{ConfigError, MemoryError, Result};
pub use events::StreamingEvent;
pub use loader::{LoadSummary, ProgressiveLoader, StreamingHealthStatus, StreamingStats};
pub use memory::{Deactivation, DisposalReport, MemoryEvent, MemoryManager};
pub use progress::LoadingProgress;
pub use scene::{SceneId, SceneRegistration, SceneState};
pub use window::{evaluate, LoadingAxis, SceneWindow, WindowBand, WindowSets, WindowTracker, WindowTransitions};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::config::{QualityHint, StreamingConfig};
    pub use crate::events::StreamingEvent;
    pub use crate::loader::ProgressiveLoader;
    pub use crate::progress::LoadingProgress;
    pub use crate::scene::{SceneId, SceneRegistration};
    pub use void_asset::prelude::*;
}
