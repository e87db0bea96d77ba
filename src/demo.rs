//! A procedural stand-in for a real tile service.
//!
//! [`ProceduralCityEngine`] streams a grid of city blocks around the camera.
//! Each block is one tile: a root entity with a ground slab and a handful of
//! box buildings, all carrying explicit `Aabb`s. It behaves like a remote
//! engine from the session's point of view: every block is "fetched" through
//! the URL hook, the first response carries a session token, and blocks that
//! fall out of view are unloaded.

use std::collections::HashMap;

use bevy::camera::primitives::Aabb;
use bevy::light::{NotShadowCaster, NotShadowReceiver};
use bevy::prelude::*;

use crate::error::TileStreamError;
use crate::stream::{
    Attribution, CameraView, EngineEvent, EngineInit, PayloadPlugin, TileEngineFactory, TileStreamEngine,
};
use crate::url_session::UrlPreprocessor;

const BLOCK_SIZE: f32 = 60.0;
/// Blocks kept loaded in each direction from the camera's block
const VIEW_RADIUS_BLOCKS: i32 = 2;
const LOAD_EVERY_FRAMES: u64 = 4;
const STREET_WIDTH: f32 = 8.0;
const MAX_BUILDING_HEIGHT: f32 = 45.0;
const DEMO_SESSION_TOKEN: &str = "procedural-city";

/// Muted photogrammetry-like colors
const FACADE_COLORS: [(f32, f32, f32); 5] = [
    (0.55, 0.50, 0.45),
    (0.62, 0.58, 0.52),
    (0.45, 0.42, 0.40),
    (0.70, 0.64, 0.55),
    (0.38, 0.40, 0.42),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockCoord {
    x: i32,
    z: i32,
}

impl BlockCoord {
    fn containing(position: Vec3) -> Self {
        Self {
            x: (position.x / BLOCK_SIZE).round() as i32,
            z: (position.z / BLOCK_SIZE).round() as i32,
        }
    }

    fn center(&self) -> Vec3 {
        Vec3::new(self.x as f32 * BLOCK_SIZE, 0.0, self.z as f32 * BLOCK_SIZE)
    }

    fn distance(&self, other: &BlockCoord) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

pub struct ProceduralCityFactory;

impl TileEngineFactory for ProceduralCityFactory {
    fn create(&self, init: &EngineInit) -> Result<Box<dyn TileStreamEngine>, TileStreamError> {
        if init.root_endpoint.trim().is_empty() {
            return Err(TileStreamError::EngineStart("empty root endpoint".to_string()));
        }
        Ok(Box::new(ProceduralCityEngine::new(init)))
    }
}

pub struct ProceduralCityEngine {
    group: Entity,
    root_endpoint: String,
    plugins: Vec<PayloadPlugin>,
    seed: u32,
    frame: u64,
    root_loaded: bool,
    ready: bool,
    regenerate: bool,
    session_issued: bool,
    blocks: HashMap<BlockCoord, Entity>,
    wanted: usize,
    assets: Option<(Handle<Mesh>, Handle<Mesh>)>,
    events: Vec<EngineEvent>,
}

impl ProceduralCityEngine {
    pub fn new(init: &EngineInit) -> Self {
        Self {
            group: init.group,
            root_endpoint: init.root_endpoint.clone(),
            plugins: Vec::new(),
            seed: 0,
            frame: 0,
            root_loaded: false,
            ready: false,
            regenerate: false,
            session_issued: false,
            blocks: HashMap::new(),
            wanted: 0,
            assets: None,
            events: Vec::new(),
        }
    }

    pub fn loaded_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn base_url(&self) -> &str {
        let endpoint = self.root_endpoint.split(['?', '#']).next().unwrap_or("");
        endpoint.rsplit_once('/').map_or(endpoint, |(base, _)| base)
    }

    /// URL the root tile set lists for a block. The first listed block
    /// carries the session token the service hands out.
    fn block_url(&mut self, coord: BlockCoord) -> String {
        let url = format!("{}/blocks/{}_{}.glb", self.base_url(), coord.x, coord.z);
        if self.session_issued {
            url
        } else {
            self.session_issued = true;
            format!("{url}?session={DEMO_SESSION_TOKEN}")
        }
    }

    fn shared_meshes(&mut self, world: &mut World) -> Option<(Handle<Mesh>, Handle<Mesh>)> {
        if self.assets.is_none() {
            let mut meshes = world.get_resource_mut::<Assets<Mesh>>()?;
            let building = meshes.add(Cuboid::new(1.0, 1.0, 1.0));
            let ground = meshes.add(Cuboid::new(1.0, 1.0, 1.0));
            self.assets = Some((building, ground));
        }
        self.assets.clone()
    }

    fn spawn_block(&mut self, world: &mut World, coord: BlockCoord, url: &str) -> Result<Entity, TileStreamError> {
        let Some((building_mesh, ground_mesh)) = self.shared_meshes(world) else {
            return Err(TileStreamError::Load {
                url: url.to_string(),
                reason: "mesh assets unavailable".to_string(),
            });
        };

        let center = coord.center();
        let block_transform = Transform::from_translation(center);
        let tile = world
            .spawn((
                Name::new(format!("Block {} {}", coord.x, coord.z)),
                block_transform,
                GlobalTransform::from(block_transform),
                Visibility::default(),
                ChildOf(self.group),
            ))
            .id();

        let ground = Transform::from_xyz(0.0, -0.25, 0.0).with_scale(Vec3::new(BLOCK_SIZE, 0.5, BLOCK_SIZE));
        self.spawn_part(world, tile, block_transform, ground, ground_mesh, (0.32, 0.34, 0.30));

        // Lots on a 3x3 grid, some left empty
        let lot = (BLOCK_SIZE - STREET_WIDTH) / 3.0;
        for i in 0..3 {
            for j in 0..3 {
                let h = pseudo_hash(self.seed ^ block_seed(coord) ^ (i * 3 + j));
                if h % 5 == 0 {
                    continue;
                }
                let height = 4.0 + (h % 1000) as f32 / 1000.0 * MAX_BUILDING_HEIGHT;
                let footprint = lot * (0.55 + ((h >> 10) % 100) as f32 / 100.0 * 0.35);
                let x = (i as f32 - 1.0) * lot;
                let z = (j as f32 - 1.0) * lot;
                let local = Transform::from_xyz(x, height * 0.5, z)
                    .with_scale(Vec3::new(footprint, height, footprint));
                let color = FACADE_COLORS[(h >> 20) as usize % FACADE_COLORS.len()];
                self.spawn_part(world, tile, block_transform, local, building_mesh.clone(), color);
            }
        }

        Ok(tile)
    }

    fn spawn_part(
        &self,
        world: &mut World,
        tile: Entity,
        tile_transform: Transform,
        local: Transform,
        mesh: Handle<Mesh>,
        (r, g, b): (f32, f32, f32),
    ) {
        let material = world
            .get_resource_mut::<Assets<StandardMaterial>>()
            .map(|mut materials| {
                materials.add(StandardMaterial {
                    base_color: Color::srgb(r, g, b),
                    perceptual_roughness: 0.7,
                    ..default()
                })
            })
            .unwrap_or_default();

        world.spawn((
            Mesh3d(mesh),
            MeshMaterial3d(material),
            local,
            GlobalTransform::from(tile_transform * local),
            Aabb::from_min_max(Vec3::splat(-0.5), Vec3::splat(0.5)),
            NotShadowCaster,
            NotShadowReceiver,
            ChildOf(tile),
        ));
    }

    fn unload_block(&mut self, world: &mut World, coord: BlockCoord) {
        if let Some(tile) = self.blocks.remove(&coord) {
            self.events.push(EngineEvent::TileUnloaded(tile));
            if let Ok(entity) = world.get_entity_mut(tile) {
                entity.despawn();
            }
        }
    }
}

impl TileStreamEngine for ProceduralCityEngine {
    fn register_plugin(&mut self, plugin: PayloadPlugin) {
        if !self.plugins.contains(&plugin) {
            debug!("Procedural city engine registered {:?}", plugin);
            self.plugins.push(plugin);
        }
    }

    fn set_lat_lon_position(&mut self, latitude: f64, longitude: f64) {
        let seed = ((latitude * 1e4) as i64 as u32) ^ ((longitude * 1e4) as i64 as u32).rotate_left(16);
        if seed != self.seed {
            self.seed = seed;
            self.regenerate = true;
        }
    }

    fn update(&mut self, world: &mut World, camera: Option<&CameraView>, urls: &mut dyn UrlPreprocessor) {
        self.frame += 1;

        if !self.root_loaded {
            let url = urls.preprocess(&self.root_endpoint);
            debug!("Fetching root tile set {}", url);
            self.root_loaded = true;
        }

        let focus = BlockCoord::containing(camera.map_or(Vec3::ZERO, |c| c.transform.translation()));

        let stale: Vec<BlockCoord> = self
            .blocks
            .keys()
            .filter(|coord| self.regenerate || coord.distance(&focus) > VIEW_RADIUS_BLOCKS + 1)
            .copied()
            .collect();
        self.regenerate = false;
        for coord in stale {
            self.unload_block(world, coord);
        }

        let mut missing: Vec<BlockCoord> = (-VIEW_RADIUS_BLOCKS..=VIEW_RADIUS_BLOCKS)
            .flat_map(|dx| {
                (-VIEW_RADIUS_BLOCKS..=VIEW_RADIUS_BLOCKS).map(move |dz| BlockCoord {
                    x: focus.x + dx,
                    z: focus.z + dz,
                })
            })
            .filter(|coord| !self.blocks.contains_key(coord))
            .collect();
        self.wanted = self.blocks.len() + missing.len();
        missing.sort_by_key(|coord| coord.distance(&focus));

        if self.frame % LOAD_EVERY_FRAMES == 0 {
            if let Some(&coord) = missing.first() {
                let raw = self.block_url(coord);
                let url = urls.preprocess(&raw);
                match self.spawn_block(world, coord, &url) {
                    Ok(tile) => {
                        self.blocks.insert(coord, tile);
                        self.events.push(EngineEvent::TileLoaded(tile));
                    }
                    Err(e) => self.events.push(EngineEvent::LoadError(e)),
                }
                if missing.len() == 1 && !self.ready {
                    self.ready = true;
                    self.events.push(EngineEvent::TileSetLoaded);
                }
            }
        }
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn root_tile_set_ready(&self) -> bool {
        self.ready
    }

    fn load_progress(&self) -> f32 {
        if self.wanted == 0 {
            return 0.0;
        }
        self.blocks.len() as f32 / self.wanted as f32
    }

    fn attributions(&self) -> Vec<Attribution> {
        vec![
            Attribution::new("Procedural City"),
            Attribution::new(r#"["Sunlit Tiles demo", "Procedural City"]"#),
        ]
    }

    fn dispose(&mut self, _world: &mut World) {
        self.blocks.clear();
        self.events.clear();
        self.ready = false;
    }
}

fn block_seed(coord: BlockCoord) -> u32 {
    (coord.x as u32).wrapping_mul(73_856_093) ^ (coord.z as u32).wrapping_mul(19_349_663)
}

fn pseudo_hash(seed: u32) -> u32 {
    let mut h = seed.wrapping_mul(2654435761);
    h ^= h >> 16;
    h = h.wrapping_mul(2246822507);
    h ^= h >> 13;
    h
}
