//! Dynamic shadows for streamed tiles: shadow mapping, building shadow
//! receivers and sun-driven shadow opacity.

pub mod buildings;
pub mod opacity;
pub mod sun;

use bevy::camera::visibility::VisibilitySystems;
use bevy::prelude::*;
use bevy::transform::TransformSystems;

use crate::config::{AppConfig, ShadowConfig};
use crate::tags::TileTags;

pub use buildings::{
    BuildingHeuristic, BuildingShadowSynthesizer, ScanPhase, ShadowReceiver, ShadowReceiverAssets,
    ShadowReceiverGroup, WorldBounds,
};
pub use opacity::{ShadowOpacitySynchronizer, SunPosition};
pub use sun::{ApproximateSun, SceneClock, SunLight, ViewLocation};

/// Shadow settings in effect for this app.
#[derive(Resource, Debug, Clone)]
pub struct ShadowSettings(pub ShadowConfig);

pub struct ShadowsPlugin;

impl Plugin for ShadowsPlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world()
            .get_resource::<AppConfig>()
            .cloned()
            .unwrap_or_default();

        app.insert_resource(ShadowSettings(config.shadows.clone()))
            .insert_resource(BuildingShadowSynthesizer::new(&config.shadows))
            .insert_resource(ShadowOpacitySynchronizer::new(
                ApproximateSun::from(&config.location),
                config.shadows.opacity_interval_secs,
            ))
            .insert_resource(ViewLocation::from(&config.location))
            .init_resource::<SceneClock>()
            .init_resource::<TileTags>()
            .add_systems(Startup, buildings::setup_shadow_receivers)
            .add_systems(
                Update,
                (
                    opacity::enable_shadow_mapping,
                    sun::advance_scene_clock,
                    (sun::orient_sun_light, opacity::sync_shadow_opacity)
                        .after(sun::advance_scene_clock),
                ),
            )
            // Tile bounds and world transforms are only final once PostUpdate
            // has propagated them
            .add_systems(
                PostUpdate,
                (
                    buildings::scan_for_buildings,
                    buildings::spawn_shadow_receivers,
                    buildings::sweep_orphaned_receivers,
                )
                    .chain()
                    .after(TransformSystems::Propagate)
                    .after(VisibilitySystems::CalculateBounds),
            );
    }
}
