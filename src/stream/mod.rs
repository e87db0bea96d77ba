//! Tile stream orchestration.
//!
//! [`TileStreamSession`] owns the external streaming engine and wires the URL
//! resolver, the material normalizer and progress polling around it.
//! [`run_tile_stream`] drives the session once per frame and turns its
//! notices into messages.

mod attribution;
pub mod engine;
pub mod session;

use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;

use bevy::prelude::*;

use crate::config::{AppConfig, TilesConfig};
use crate::error::TileStreamError;
use crate::shadows::ViewLocation;
use crate::tags::TileTags;

pub use attribution::join_attributions;
pub use engine::{
    Attribution, CameraView, EngineEvent, EngineInit, PayloadPlugin, TileEngineFactory,
    TileStreamEngine,
};
pub use session::{StreamNotice, TileStreamSession};

/// Marker for the scene entity all streamed tiles live under
#[derive(Component)]
pub struct TileGroup;

/// Systems that advance the tile stream
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileStreamSet;

#[derive(Message, Debug, Clone, PartialEq)]
pub struct TileLoadFailed(pub TileStreamError);

/// Root tile set load progress, 0-100
#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLoadProgress(pub u8);

#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLoadComplete;

#[derive(Message, Debug, Clone, PartialEq, Eq)]
pub struct TileAttributionsChanged(pub String);

#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCountChanged(pub usize);

/// Control requests for the tile stream.
#[derive(Message, Debug, Clone, PartialEq)]
pub enum TileStreamCommand {
    Initialize { root_endpoint: String, api_key: String },
    SetLatLon { latitude: f64, longitude: f64 },
    SetUseNormalizedMaterial(bool),
    ForceUpdateMaterials,
    Dispose,
}

impl TileStreamCommand {
    pub fn initialize_from(config: &TilesConfig) -> Self {
        Self::Initialize {
            root_endpoint: config.root_endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

pub struct TileStreamPlugin {
    factory: Arc<dyn TileEngineFactory>,
}

impl TileStreamPlugin {
    pub fn new(factory: impl TileEngineFactory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub fn from_shared(factory: Arc<dyn TileEngineFactory>) -> Self {
        Self { factory }
    }
}

impl Plugin for TileStreamPlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world()
            .get_resource::<AppConfig>()
            .map(|config| config.tiles.clone())
            .unwrap_or_default();

        app.add_message::<TileStreamCommand>()
            .add_message::<TileLoadFailed>()
            .add_message::<TileLoadProgress>()
            .add_message::<TileLoadComplete>()
            .add_message::<TileAttributionsChanged>()
            .add_message::<TileCountChanged>()
            .init_resource::<TileTags>()
            .insert_resource(TileStreamSession::new(Arc::clone(&self.factory), config))
            .add_systems(Update, run_tile_stream.in_set(TileStreamSet));
    }
}

/// Apply pending commands, advance the session one frame and publish what it
/// reported.
pub fn run_tile_stream(world: &mut World) {
    if !world.contains_resource::<TileStreamSession>() {
        return;
    }

    let commands: Vec<TileStreamCommand> = world
        .get_resource_mut::<Messages<TileStreamCommand>>()
        .map(|mut messages| messages.drain().collect())
        .unwrap_or_default();

    let delta = world
        .get_resource::<Time>()
        .map(|time| time.delta())
        .unwrap_or_default();
    let camera = first_camera_view(world);

    let notices = world.resource_scope(|world, mut session: Mut<TileStreamSession>| {
        for command in commands {
            apply_command(world, &mut session, command);
        }
        session.update(world, delta, camera);
        session.take_notices()
    });

    for notice in notices {
        match notice {
            StreamNotice::LoadFailed(e) => {
                world.write_message(TileLoadFailed(e));
            }
            StreamNotice::Progress(percent) => {
                world.write_message(TileLoadProgress(percent));
            }
            StreamNotice::Complete => {
                world.write_message(TileLoadComplete);
            }
            StreamNotice::Attributions(text) => {
                world.write_message(TileAttributionsChanged(text));
            }
            StreamNotice::TileCount(count) => {
                world.write_message(TileCountChanged(count));
            }
        }
    }
}

fn apply_command(world: &mut World, session: &mut TileStreamSession, command: TileStreamCommand) {
    match command {
        TileStreamCommand::Initialize { root_endpoint, api_key } => {
            if let Err(e) = session.initialize(world, &root_endpoint, &api_key) {
                error!("Failed to start tile stream: {}", e);
                world.write_message(TileLoadFailed(e));
            }
        }
        TileStreamCommand::SetLatLon { latitude, longitude } => {
            session.set_lat_lon_position(latitude, longitude);
            if let Some(mut location) = world.get_resource_mut::<ViewLocation>() {
                location.latitude = latitude;
                location.longitude = longitude;
            }
        }
        TileStreamCommand::SetUseNormalizedMaterial(enabled) => {
            session.set_use_normalized_material(world, enabled);
        }
        TileStreamCommand::ForceUpdateMaterials => {
            session.force_update_materials(world);
        }
        TileStreamCommand::Dispose => {
            session.dispose(world);
        }
    }
}

fn first_camera_view(world: &mut World) -> Option<CameraView> {
    let mut cameras = world.query_filtered::<(&GlobalTransform, Option<&Projection>), With<Camera3d>>();
    cameras.iter(world).next().map(|(transform, projection)| CameraView {
        transform: *transform,
        fov_y: match projection {
            Some(Projection::Perspective(perspective)) => perspective.fov,
            _ => FRAC_PI_4,
        },
    })
}
