use bevy::light::DirectionalLightShadowMap;
use bevy::prelude::*;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::buildings::{ShadowReceiverAssets, ShadowReceiverGroup};
use super::sun::{SceneClock, ViewLocation};
use super::ShadowSettings;
use crate::config::clamp_secs;
use crate::constants;
use crate::error::SunPositionError;

/// Opacity below which receivers are hidden entirely
const HIDDEN_OPACITY: f32 = 0.001;

/// Maps a point in time to a shadow opacity in [0, 1].
///
/// The shape of the mapping (how high the sun is vs. how dark shadows get)
/// belongs entirely to the implementation.
pub trait SunPosition: Send + Sync + 'static {
    fn shadow_opacity_for(&self, time: DateTime<Utc>) -> Result<f32, SunPositionError>;

    /// Move the observer. Location-independent models can ignore this.
    fn set_location(&mut self, _latitude: f64, _longitude: f64) {}
}

/// Holds the latest shadow opacity derived from a [`SunPosition`].
#[derive(Resource)]
pub struct ShadowOpacitySynchronizer {
    sun: Box<dyn SunPosition>,
    opacity: f32,
    timer: Timer,
}

impl ShadowOpacitySynchronizer {
    pub fn new(sun: impl SunPosition, interval_secs: f32) -> Self {
        Self {
            sun: Box::new(sun),
            opacity: constants::DEFAULT_SHADOW_OPACITY,
            timer: Timer::from_seconds(clamp_secs(interval_secs), TimerMode::Repeating),
        }
    }

    /// Recompute the opacity for `time`.
    ///
    /// A failing collaborator leaves the last known opacity in place.
    pub fn update_for_time(&mut self, time: DateTime<Utc>) -> f32 {
        match self.sun.shadow_opacity_for(time) {
            Ok(value) if value.is_finite() => {
                self.opacity = value.clamp(0.0, 1.0);
            }
            Ok(_) => {
                warn!("Sun model failed: {}, keeping opacity {:.2}", SunPositionError::NonFinite, self.opacity);
            }
            Err(e) => {
                warn!("Sun model failed: {}, keeping opacity {:.2}", e, self.opacity);
            }
        }
        self.opacity
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_location(&mut self, latitude: f64, longitude: f64) {
        self.sun.set_location(latitude, longitude);
    }

    pub fn set_sun_model(&mut self, sun: impl SunPosition) {
        self.sun = Box::new(sun);
    }

    /// Returns true when the update cadence has elapsed.
    pub fn tick(&mut self, delta: Duration) -> bool {
        self.timer.tick(delta);
        self.timer.just_finished()
    }
}

/// Turn on directional shadow maps. Safe to run every frame: state is only
/// written when it differs from the configured one.
pub fn enable_shadow_mapping(
    mut commands: Commands,
    settings: Res<ShadowSettings>,
    shadow_map: Option<Res<DirectionalLightShadowMap>>,
    mut lights: Query<&mut DirectionalLight>,
) {
    let size = settings.0.shadow_map_size;
    if shadow_map.is_none_or(|map| map.size != size) {
        commands.insert_resource(DirectionalLightShadowMap { size });
        info!("Directional shadow map enabled ({}px)", size);
    }

    for mut light in lights.iter_mut() {
        if !light.shadows_enabled {
            light.shadows_enabled = true;
        }
    }
}

/// Recompute shadow opacity from the scene clock and push it into the shared
/// receiver material.
pub fn sync_shadow_opacity(
    time: Res<Time>,
    clock: Res<SceneClock>,
    location: Res<ViewLocation>,
    mut synchronizer: ResMut<ShadowOpacitySynchronizer>,
    receiver_assets: Option<Res<ShadowReceiverAssets>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut groups: Query<&mut Visibility, With<ShadowReceiverGroup>>,
) {
    if location.is_changed() {
        synchronizer.set_location(location.latitude, location.longitude);
    }

    let due = synchronizer.tick(time.delta()) || clock.is_changed() || location.is_changed();
    if !due {
        return;
    }

    let previous = synchronizer.opacity();
    let opacity = synchronizer.update_for_time(clock.current_datetime());

    if let Some(assets) = receiver_assets {
        let stale = materials
            .get(&assets.material)
            .is_some_and(|material| (material.base_color.alpha() - opacity).abs() > f32::EPSILON);
        if stale {
            if let Some(mut material) = materials.get_mut(&assets.material) {
                material.base_color = material.base_color.with_alpha(opacity);
            }
        }
    }

    let visibility = if opacity > HIDDEN_OPACITY {
        Visibility::Inherited
    } else {
        Visibility::Hidden
    };
    for mut group_visibility in groups.iter_mut() {
        if *group_visibility != visibility {
            *group_visibility = visibility;
        }
    }

    if (previous - opacity).abs() > 0.01 {
        debug!("Shadow opacity {:.2} -> {:.2}", previous, opacity);
    }
}
