//! Time of day and the approximate sun model.
//!
//! Sun position is computed from the scene clock (live wall-clock time or a
//! manual override) and the view's geographic coordinates.

use bevy::prelude::*;
use chrono::{DateTime, NaiveTime, TimeZone, Timelike, Utc};
use std::time::Duration;

use super::opacity::SunPosition;
use crate::config::LocationConfig;
use crate::error::SunPositionError;

/// Geographic position the 3D view is centered on.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct ViewLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&LocationConfig> for ViewLocation {
    fn from(config: &LocationConfig) -> Self {
        Self {
            latitude: config.latitude,
            longitude: config.longitude,
        }
    }
}

/// Scene time used for the sun. Live by default; a manual override advances
/// with virtual time scaled by `time_scale`.
#[derive(Resource, Debug, Clone)]
pub struct SceneClock {
    manual: Option<DateTime<Utc>>,
    pub time_scale: f32,
    /// Offset used when setting the local hour of day
    pub utc_offset_hours: f32,
}

impl Default for SceneClock {
    fn default() -> Self {
        Self {
            manual: None,
            time_scale: 1.0,
            utc_offset_hours: 0.0,
        }
    }
}

impl SceneClock {
    pub fn is_manual(&self) -> bool {
        self.manual.is_some()
    }

    pub fn current_datetime(&self) -> DateTime<Utc> {
        self.manual.unwrap_or_else(Utc::now)
    }

    pub fn set_manual(&mut self, time: DateTime<Utc>) {
        self.manual = Some(time);
    }

    pub fn reset_to_live(&mut self) {
        self.manual = None;
    }

    /// Pin the clock to `hour` (0..24, local to `utc_offset_hours`) on the
    /// current scene date.
    pub fn set_hour(&mut self, hour: f32) {
        let offset = self.offset();
        let local_now = self.current_datetime() + offset;
        let midnight = local_now.date_naive().and_time(NaiveTime::MIN);
        let since_midnight = chrono::Duration::seconds((hour.clamp(0.0, 24.0) * 3600.0) as i64);
        let local = midnight + since_midnight;
        self.manual = Some(Utc.from_utc_datetime(&(local - offset)));
    }

    /// Fractional hour of day local to `utc_offset_hours`.
    pub fn local_hour(&self) -> f32 {
        let local = self.current_datetime() + self.offset();
        local.hour() as f32 + local.minute() as f32 / 60.0 + local.second() as f32 / 3600.0
    }

    fn offset(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.utc_offset_hours * 3600.0).round() as i64)
    }

    /// Advance a manual override. Live time needs no advancing.
    pub fn advance(&mut self, delta: Duration) {
        let Some(manual) = self.manual else {
            return;
        };
        let scaled = delta.mul_f32(self.time_scale.max(0.0));
        let step = chrono::Duration::from_std(scaled).unwrap_or(chrono::Duration::zero());
        self.manual = Some(manual + step);
    }
}

pub fn advance_scene_clock(time: Res<Time>, mut clock: ResMut<SceneClock>) {
    if clock.is_manual() {
        clock.advance(time.delta());
    }
}

/// Compute sun elevation and azimuth (degrees) at `time` for a geographic
/// position. Uses a simplified solar position algorithm accurate to ~1 degree.
pub fn solar_position(time: DateTime<Utc>, latitude: f64, longitude: f64) -> (f32, f32) {
    let total_secs = time.timestamp_millis() as f64 / 1000.0;

    // Days since J2000.0 epoch (2000-01-01 12:00 UTC)
    let j2000_epoch = 946728000.0;
    let days = (total_secs - j2000_epoch) / 86400.0;

    // Solar mean longitude and anomaly
    let mean_lon = (280.460 + 0.9856474 * days).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 0.9856003 * days).rem_euclid(360.0).to_radians();
    let ecliptic_lon =
        (mean_lon + 1.915 * mean_anomaly.sin() + 0.020 * (2.0 * mean_anomaly).sin()).to_radians();
    let obliquity = 23.439_f64.to_radians();

    let declination = (obliquity.sin() * ecliptic_lon.sin()).asin();

    let utc_hours = total_secs.rem_euclid(86400.0) / 3600.0;
    let hour_angle = ((utc_hours - 12.0 + longitude / 15.0) * 15.0).to_radians();

    let lat_rad = latitude.to_radians();

    let sin_elevation =
        lat_rad.sin() * declination.sin() + lat_rad.cos() * declination.cos() * hour_angle.cos();
    let elevation = sin_elevation.clamp(-1.0, 1.0).asin();

    let cos_azimuth =
        (declination.sin() - lat_rad.sin() * sin_elevation) / (lat_rad.cos() * elevation.cos());
    let mut azimuth = cos_azimuth.clamp(-1.0, 1.0).acos();
    if hour_angle.sin() > 0.0 {
        azimuth = std::f64::consts::TAU - azimuth;
    }

    (elevation.to_degrees() as f32, azimuth.to_degrees() as f32)
}

/// Map sun elevation to shadow opacity: zero at or below the horizon,
/// rising linearly to `max_opacity` at `full_elevation_deg`.
pub fn opacity_for_elevation(elevation_deg: f32, max_opacity: f32, full_elevation_deg: f32) -> f32 {
    if elevation_deg <= 0.0 {
        return 0.0;
    }
    let t = (elevation_deg / full_elevation_deg.max(f32::EPSILON)).min(1.0);
    (max_opacity * t).clamp(0.0, 1.0)
}

/// Default [`SunPosition`] collaborator built on [`solar_position`].
#[derive(Debug, Clone)]
pub struct ApproximateSun {
    pub latitude: f64,
    pub longitude: f64,
    pub max_opacity: f32,
    pub full_elevation_deg: f32,
}

impl From<&LocationConfig> for ApproximateSun {
    fn from(config: &LocationConfig) -> Self {
        Self {
            latitude: config.latitude,
            longitude: config.longitude,
            max_opacity: config.max_opacity,
            full_elevation_deg: config.full_elevation_deg,
        }
    }
}

impl SunPosition for ApproximateSun {
    fn shadow_opacity_for(&self, time: DateTime<Utc>) -> Result<f32, SunPositionError> {
        let valid = self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0;
        if !valid {
            return Err(SunPositionError::InvalidLocation {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        let (elevation, _) = solar_position(time, self.latitude, self.longitude);
        Ok(opacity_for_elevation(elevation, self.max_opacity, self.full_elevation_deg))
    }

    fn set_location(&mut self, latitude: f64, longitude: f64) {
        self.latitude = latitude;
        self.longitude = longitude;
    }
}

/// Marker for the directional light used as the sun
#[derive(Component)]
pub struct SunLight;

/// Point the sun light along the current sun direction and scale its
/// illuminance with elevation.
pub fn orient_sun_light(
    clock: Res<SceneClock>,
    location: Res<ViewLocation>,
    mut sun_query: Query<(&mut DirectionalLight, &mut Transform), With<SunLight>>,
) {
    let (elevation, azimuth) =
        solar_position(clock.current_datetime(), location.latitude, location.longitude);

    // X = east, Y = up, -Z = north
    let elev_rad = elevation.to_radians();
    let azim_rad = azimuth.to_radians();
    let to_sun = Vec3::new(
        azim_rad.sin() * elev_rad.cos(),
        elev_rad.sin(),
        -azim_rad.cos() * elev_rad.cos(),
    );

    for (mut light, mut transform) in sun_query.iter_mut() {
        *transform = Transform::from_translation(to_sun * 1000.0).looking_at(Vec3::ZERO, Vec3::Y);
        light.illuminance = if elevation > 0.0 {
            let factor = (elevation / 90.0).clamp(0.0, 1.0);
            10_000.0 * factor.sqrt()
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cologne() -> ApproximateSun {
        ApproximateSun::from(&LocationConfig::default())
    }

    #[test]
    fn test_summer_noon_is_high_and_midnight_is_below_horizon() {
        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 11, 30, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 6, 21, 23, 30, 0).unwrap();
        let (noon_elev, _) = solar_position(noon, 50.94, 6.96);
        let (night_elev, _) = solar_position(midnight, 50.94, 6.96);
        assert!(noon_elev > 55.0 && noon_elev < 66.0, "noon elevation {noon_elev}");
        assert!(night_elev < 0.0, "midnight elevation {night_elev}");
    }

    #[test]
    fn test_morning_sun_is_in_the_east() {
        let morning = Utc.with_ymd_and_hms(2024, 3, 20, 7, 0, 0).unwrap();
        let (_, azimuth) = solar_position(morning, 50.94, 6.96);
        assert!(azimuth > 60.0 && azimuth < 150.0, "morning azimuth {azimuth}");
    }

    #[test]
    fn test_opacity_is_monotonic_in_elevation() {
        let samples: Vec<f32> = [-10.0, 0.0, 5.0, 15.0, 30.0, 60.0]
            .iter()
            .map(|&e| opacity_for_elevation(e, 0.6, 30.0))
            .collect();
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.0);
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
        assert!((samples[4] - 0.6).abs() < 1e-6);
        assert!((samples[5] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_approximate_sun_opacity() {
        let sun = cologne();
        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 11, 30, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 6, 21, 23, 30, 0).unwrap();
        assert!((sun.shadow_opacity_for(noon).unwrap() - sun.max_opacity).abs() < 1e-6);
        assert_eq!(sun.shadow_opacity_for(midnight).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_location_is_an_error() {
        let mut sun = cologne();
        sun.set_location(f64::NAN, 0.0);
        assert!(matches!(
            sun.shadow_opacity_for(Utc::now()),
            Err(SunPositionError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn test_set_hour_pins_local_time() {
        let mut clock = SceneClock::default();
        clock.set_manual(Utc.with_ymd_and_hms(2024, 6, 21, 3, 0, 0).unwrap());
        clock.utc_offset_hours = 2.0;
        clock.set_hour(14.5);
        assert_eq!(
            clock.current_datetime(),
            Utc.with_ymd_and_hms(2024, 6, 21, 12, 30, 0).unwrap()
        );
        assert!((clock.local_hour() - 14.5).abs() < 1e-4);
    }

    #[test]
    fn test_manual_clock_advances_with_time_scale() {
        let start = Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap();
        let mut clock = SceneClock::default();
        clock.set_manual(start);
        clock.time_scale = 60.0;
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.current_datetime(), start + chrono::Duration::minutes(2));

        clock.reset_to_live();
        assert!(!clock.is_manual());
    }
}
