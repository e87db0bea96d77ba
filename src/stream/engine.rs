use bevy::prelude::*;

use crate::error::TileStreamError;
use crate::url_session::UrlPreprocessor;

/// Payload decoders the engine must have before it can parse tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadPlugin {
    /// glTF extension handling (mesh quantization, texture transforms)
    GltfExtensions,
    DracoCompression,
    /// Compressed textures and tile content
    TileCompression,
}

impl PayloadPlugin {
    pub const ALL: [PayloadPlugin; 3] = [
        PayloadPlugin::GltfExtensions,
        PayloadPlugin::DracoCompression,
        PayloadPlugin::TileCompression,
    ];
}

/// Everything an engine needs to start streaming.
#[derive(Debug, Clone)]
pub struct EngineInit {
    pub root_endpoint: String,
    pub api_key: String,
    /// Scene entity the engine must parent every tile under
    pub group: Entity,
}

/// Notifications produced by an engine during [`TileStreamEngine::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A tile root was spawned (with its meshes) under the group.
    TileLoaded(Entity),
    /// A tile root was about to be despawned, or already has been.
    TileUnloaded(Entity),
    /// A tile set (root or nested) finished loading.
    TileSetLoaded,
    LoadError(TileStreamError),
}

/// Camera state handed to the engine for LOD and culling.
#[derive(Debug, Clone, Copy)]
pub struct CameraView {
    pub transform: GlobalTransform,
    /// Vertical field of view, radians
    pub fov_y: f32,
}

/// Copyright notice attached to tile content. The value is either plain text
/// or a JSON array of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub value: String,
}

impl Attribution {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

/// A hierarchical 3D tile streaming engine.
///
/// Engines own their fetching, LOD and culling. They add and remove entities
/// under the group given in [`EngineInit`], report what they did through
/// [`drain_events`](Self::drain_events), and must route every URL they fetch
/// through the `urls` hook passed to `update`. Meshes are classified for
/// building shadows once Bevy has computed their `Aabb`.
pub trait TileStreamEngine: Send + Sync + 'static {
    fn register_plugin(&mut self, plugin: PayloadPlugin);

    fn set_lat_lon_position(&mut self, latitude: f64, longitude: f64);

    fn update(&mut self, world: &mut World, camera: Option<&CameraView>, urls: &mut dyn UrlPreprocessor);

    fn drain_events(&mut self) -> Vec<EngineEvent>;

    fn root_tile_set_ready(&self) -> bool;

    /// Fraction of outstanding work loaded, in [0, 1].
    fn load_progress(&self) -> f32;

    fn attributions(&self) -> Vec<Attribution>;

    /// Release engine resources. The group entity is despawned by the caller.
    fn dispose(&mut self, _world: &mut World) {}
}

/// Builds engines for new streaming sessions.
pub trait TileEngineFactory: Send + Sync + 'static {
    fn create(&self, init: &EngineInit) -> Result<Box<dyn TileStreamEngine>, TileStreamError>;
}

impl<F> TileEngineFactory for F
where
    F: Fn(&EngineInit) -> Result<Box<dyn TileStreamEngine>, TileStreamError> + Send + Sync + 'static,
{
    fn create(&self, init: &EngineInit) -> Result<Box<dyn TileStreamEngine>, TileStreamError> {
        self(init)
    }
}
