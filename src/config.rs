use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;

const CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR_NAME: &str = "sunlit-tiles";
const API_KEY_ENV: &str = "SUNLIT_TILES_API_KEY";

#[derive(Resource, Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    pub tiles: TilesConfig,
    pub shadows: ShadowConfig,
    pub location: LocationConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TilesConfig {
    pub root_endpoint: String,
    pub api_key: String,
    pub use_normalized_material: bool,
    pub load_timeout_secs: f32,
    pub material_refresh_secs: f32,
    pub stats_every_frames: u64,
    pub attribution_interval_secs: f32,
    pub material: CanonicalMaterial,
}

/// Parameters of the single material every tile mesh is normalized to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CanonicalMaterial {
    pub roughness: f32,
    pub metallic: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ShadowConfig {
    pub min_building_height: f32,
    pub min_building_extent: f32,
    pub min_footprint_area: f32,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub scan_interval_secs: f32,
    pub buffer_factor: f32,
    pub ground_offset: f32,
    /// Despawn receivers whose source tile no longer exists
    pub sweep_orphans: bool,
    pub shadow_map_size: usize,
    pub opacity_interval_secs: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub max_opacity: f32,
    pub full_elevation_deg: f32,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self {
            root_endpoint: "https://tile.googleapis.com/v1/3dtiles/root.json".to_string(),
            api_key: String::new(),
            use_normalized_material: true,
            load_timeout_secs: constants::LOAD_TIMEOUT_SECS,
            material_refresh_secs: constants::MATERIAL_REFRESH_INTERVAL_SECS,
            stats_every_frames: constants::STATS_EVERY_FRAMES,
            attribution_interval_secs: constants::ATTRIBUTION_INTERVAL_SECS,
            material: CanonicalMaterial::default(),
        }
    }
}

impl Default for CanonicalMaterial {
    fn default() -> Self {
        Self {
            roughness: constants::CANONICAL_ROUGHNESS,
            metallic: constants::CANONICAL_METALLIC,
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            min_building_height: constants::MIN_BUILDING_HEIGHT,
            min_building_extent: constants::MIN_BUILDING_EXTENT,
            min_footprint_area: constants::MIN_FOOTPRINT_AREA,
            batch_size: constants::RECEIVER_BATCH_SIZE,
            batch_delay_ms: constants::RECEIVER_BATCH_DELAY_MS,
            scan_interval_secs: constants::BUILDING_SCAN_INTERVAL_SECS,
            buffer_factor: constants::RECEIVER_BUFFER_FACTOR,
            ground_offset: constants::RECEIVER_GROUND_OFFSET,
            sweep_orphans: true,
            shadow_map_size: constants::SHADOW_MAP_SIZE,
            opacity_interval_secs: constants::OPACITY_UPDATE_INTERVAL_SECS,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: constants::DEFAULT_LATITUDE,
            longitude: constants::DEFAULT_LONGITUDE,
            max_opacity: constants::MAX_SHADOW_OPACITY,
            full_elevation_deg: constants::FULL_SHADOW_ELEVATION_DEG,
        }
    }
}

impl AppConfig {
    /// Clamp every interval and timeout into a range timers can hold.
    pub fn sanitized(mut self) -> Self {
        self.tiles.load_timeout_secs = clamp_secs(self.tiles.load_timeout_secs);
        self.tiles.material_refresh_secs = clamp_secs(self.tiles.material_refresh_secs);
        self.tiles.attribution_interval_secs = clamp_secs(self.tiles.attribution_interval_secs);
        self.shadows.scan_interval_secs = clamp_secs(self.shadows.scan_interval_secs);
        self.shadows.opacity_interval_secs = clamp_secs(self.shadows.opacity_interval_secs);
        self
    }
}

/// Finite, non-negative seconds no larger than [`constants::MAX_INTERVAL_SECS`].
/// NaN maps to zero.
pub fn clamp_secs(secs: f32) -> f32 {
    if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, constants::MAX_INTERVAL_SECS)
    }
}

/// Inserts [`AppConfig`] loaded from disk.
pub struct ConfigPlugin;

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(load_config());
    }
}

fn config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_default()
        .join(CONFIG_FILE)
}

/// Per-user config location, consulted when the working directory has none.
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE))
}

pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str::<AppConfig>(contents).map(AppConfig::sanitized)
}

pub fn load_config() -> AppConfig {
    let candidates: Vec<PathBuf> = std::iter::once(config_path()).chain(user_config_path()).collect();
    apply_env_overrides(load_config_from(&candidates, &config_path()))
}

/// First config among `candidates` that parses. Defaults are written to
/// `target` only when none of the candidates exists, so a broken file is
/// never overwritten.
fn load_config_from(candidates: &[PathBuf], target: &Path) -> AppConfig {
    let mut found = false;
    for path in candidates {
        if !path.exists() {
            continue;
        }
        found = true;
        match fs::read_to_string(path) {
            Ok(contents) => match parse_config(&contents) {
                Ok(config) => {
                    info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    warn!("Failed to parse config {:?}: {}, using defaults", path, e);
                }
            },
            Err(e) => {
                warn!("Failed to read config {:?}: {}, using defaults", path, e);
            }
        }
    }

    let config = AppConfig::default();
    if !found {
        save_config_to(&config, target);
    }
    config
}

fn apply_env_overrides(mut config: AppConfig) -> AppConfig {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            config.tiles.api_key = key.trim().to_string();
        }
    }
    config
}

pub fn save_config(config: &AppConfig) {
    save_config_to(config, &config_path());
}

fn save_config_to(config: &AppConfig, path: &Path) {
    match toml::to_string_pretty(config) {
        Ok(contents) => {
            if let Err(e) = fs::write(path, contents) {
                error!("Failed to write config: {}", e);
            } else {
                info!("Saved config to {:?}", path);
            }
        }
        Err(e) => {
            error!("Failed to serialize config: {}", e);
        }
    }
}
