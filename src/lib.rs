//! Sunlit Tiles
//!
//! Streams photorealistic 3D map tiles through an external tile engine,
//! normalizes their materials, synthesizes ground-plane shadow receivers
//! under buildings and keeps shadow intensity in step with the sun.

use std::sync::Arc;

use bevy::prelude::*;

pub mod config;
pub mod demo;
pub mod error;
pub mod materials;
pub mod shadows;
pub mod stream;
pub mod tags;
pub mod url_session;

pub use config::{AppConfig, ConfigPlugin};
pub use error::{SunPositionError, TileStreamError};
pub use shadows::ShadowsPlugin;
pub use stream::{TileEngineFactory, TileStreamCommand, TileStreamEngine, TileStreamPlugin};

// =============================================================================
// Constants - All magic numbers centralized here
// =============================================================================

pub mod constants {
    // URL query parameters understood by the tile service
    pub const API_KEY_PARAM: &str = "key";
    pub const SESSION_PARAM: &str = "session";

    // Building classification (strict greater-than thresholds, scene units)
    pub const MIN_BUILDING_HEIGHT: f32 = 5.0;
    pub const MIN_BUILDING_EXTENT: f32 = 3.0;
    pub const MIN_FOOTPRINT_AREA: f32 = 10.0;

    // Shadow receiver synthesis
    pub const RECEIVER_BATCH_SIZE: usize = 20;
    pub const RECEIVER_BATCH_DELAY_MS: u64 = 50;
    pub const BUILDING_SCAN_INTERVAL_SECS: f32 = 2.0;
    pub const RECEIVER_BUFFER_FACTOR: f32 = 1.3;
    pub const RECEIVER_GROUND_OFFSET: f32 = 0.05;

    // Shadow opacity
    pub const DEFAULT_SHADOW_OPACITY: f32 = 0.5;
    pub const MAX_SHADOW_OPACITY: f32 = 0.6;
    pub const FULL_SHADOW_ELEVATION_DEG: f32 = 30.0;
    pub const OPACITY_UPDATE_INTERVAL_SECS: f32 = 1.0;
    pub const SHADOW_MAP_SIZE: usize = 4096;

    // Tile stream housekeeping
    pub const MATERIAL_REFRESH_INTERVAL_SECS: f32 = 2.0;
    pub const STATS_EVERY_FRAMES: u64 = 100;
    pub const ATTRIBUTION_INTERVAL_SECS: f32 = 10.0;
    pub const LOAD_TIMEOUT_SECS: f32 = 60.0;
    /// Upper bound for any configured interval or timeout (one day)
    pub const MAX_INTERVAL_SECS: f32 = 86_400.0;

    // Canonical tile material
    pub const CANONICAL_ROUGHNESS: f32 = 0.9;
    pub const CANONICAL_METALLIC: f32 = 0.0;

    // Default view location (Cologne cathedral square)
    pub const DEFAULT_LATITUDE: f64 = 50.9413;
    pub const DEFAULT_LONGITUDE: f64 = 6.9583;
}

/// Everything needed for a 3D tile view: streaming, materials and shadows.
///
/// Add [`ConfigPlugin`] first so the tile and shadow settings are picked up.
pub struct SunlitTilesPlugin {
    factory: Arc<dyn TileEngineFactory>,
}

impl SunlitTilesPlugin {
    pub fn new(factory: impl TileEngineFactory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }
}

impl Plugin for SunlitTilesPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((
            TileStreamPlugin::from_shared(Arc::clone(&self.factory)),
            ShadowsPlugin,
        ));
    }
}
