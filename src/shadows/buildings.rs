//! Building shadow receivers.
//!
//! The tile stream carries no semantic labels, so buildings are picked out of
//! the mesh soup by bounding-box shape: tall enough and wide enough on both
//! horizontal axes. Every qualifying mesh gets a flat, opacity-tinted plane
//! slightly larger than its footprint placed at its base.
//!
//! Work is spread over frames: a scan tags and classifies every node once,
//! then receivers are spawned in fixed-size batches separated by a short
//! delay. The scan repeats on a timer because the engine keeps streaming
//! tiles in at its own pace.
//!
//! Receivers live under their own group at scene root, not under the source
//! tile, so unloading a tile does not take its receiver with it. With
//! `sweep_orphans` enabled those receivers are removed on the next scan.

use bevy::camera::primitives::Aabb;
use bevy::light::NotShadowCaster;
use bevy::prelude::*;
use std::collections::VecDeque;
use std::time::Duration;

use super::opacity::ShadowOpacitySynchronizer;
use crate::config::{clamp_secs, ShadowConfig};
use crate::stream::TileGroup;
use crate::tags::{Stage, TileTags};

/// Marker for the scene-root parent of all shadow receivers
#[derive(Component)]
pub struct ShadowReceiverGroup;

/// A synthesized ground plane under a building.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct ShadowReceiver {
    /// Tile mesh the receiver was created for (not owned)
    pub source: Entity,
    /// Plane size on X and Z after the buffer factor
    pub footprint: Vec2,
}

/// Mesh and material shared by every receiver.
#[derive(Resource)]
pub struct ShadowReceiverAssets {
    pub mesh: Handle<Mesh>,
    pub material: Handle<StandardMaterial>,
}

/// Axis-aligned world-space bounds of a tile mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub center: Vec3,
    pub size: Vec3,
}

impl WorldBounds {
    pub fn from_aabb(aabb: &Aabb, transform: &GlobalTransform) -> Self {
        let affine = transform.affine();
        let center = affine.transform_point3a(aabb.center);
        let m = affine.matrix3;
        let half = m.x_axis.abs() * aabb.half_extents.x
            + m.y_axis.abs() * aabb.half_extents.y
            + m.z_axis.abs() * aabb.half_extents.z;
        Self {
            center: Vec3::from(center),
            size: Vec3::from(half * 2.0),
        }
    }

    pub fn min_y(&self) -> f32 {
        self.center.y - self.size.y * 0.5
    }
}

/// Bounding-box shape test for "this mesh is a building". Both thresholds
/// are strict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildingHeuristic {
    pub min_height: f32,
    pub min_extent: f32,
}

impl BuildingHeuristic {
    pub fn is_building(&self, size: Vec3) -> bool {
        size.y > self.min_height && size.x > self.min_extent && size.z > self.min_extent
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildingCandidate {
    pub source: Entity,
    pub bounds: WorldBounds,
}

/// Where and how large a receiver should be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiverPlacement {
    pub source: Entity,
    pub translation: Vec3,
    pub footprint: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Idle,
    Scanning,
    BatchProcessing,
}

/// What a timer tick asks the systems to do this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTick {
    pub rescan: bool,
    pub sweep: bool,
}

#[derive(Resource)]
pub struct BuildingShadowSynthesizer {
    heuristic: BuildingHeuristic,
    min_footprint_area: f32,
    batch_size: usize,
    buffer_factor: f32,
    ground_offset: f32,
    sweep_orphans: bool,
    phase: ScanPhase,
    queue: VecDeque<BuildingCandidate>,
    scan_timer: Timer,
    batch_timer: Timer,
    batch_ready: bool,
    scan_requested: bool,
    sweep_due: bool,
    running: bool,
    watched_group: Option<Entity>,
    receiver_group: Option<Entity>,
    created: usize,
}

impl BuildingShadowSynthesizer {
    pub fn new(config: &ShadowConfig) -> Self {
        Self {
            heuristic: BuildingHeuristic {
                min_height: config.min_building_height,
                min_extent: config.min_building_extent,
            },
            min_footprint_area: config.min_footprint_area,
            batch_size: config.batch_size.max(1),
            buffer_factor: config.buffer_factor,
            ground_offset: config.ground_offset,
            sweep_orphans: config.sweep_orphans,
            phase: ScanPhase::Idle,
            queue: VecDeque::new(),
            scan_timer: Timer::from_seconds(clamp_secs(config.scan_interval_secs), TimerMode::Repeating),
            batch_timer: Timer::new(Duration::from_millis(config.batch_delay_ms), TimerMode::Once),
            batch_ready: false,
            scan_requested: false,
            sweep_due: false,
            running: false,
            watched_group: None,
            receiver_group: None,
            created: 0,
        }
    }

    pub fn heuristic(&self) -> BuildingHeuristic {
        self.heuristic
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn watched_group(&self) -> Option<Entity> {
        self.watched_group
    }

    pub fn receiver_group(&self) -> Option<Entity> {
        self.receiver_group
    }

    pub fn set_receiver_group(&mut self, group: Entity) {
        self.receiver_group = Some(group);
    }

    /// Follow the current tile group. A different group restarts the cycle
    /// with an immediate scan; `None` parks the synthesizer.
    pub fn watch(&mut self, group: Option<Entity>) -> bool {
        if group == self.watched_group {
            return false;
        }
        self.watched_group = group;
        self.queue.clear();
        self.phase = ScanPhase::Idle;
        self.batch_ready = false;
        self.scan_timer.reset();
        self.running = group.is_some();
        self.scan_requested = self.running;
        if let Some(group) = group {
            info!("Building shadow scan watching tile group {:?}", group);
        }
        true
    }

    pub fn request_scan(&mut self) {
        self.scan_requested = true;
    }

    /// Advance the scan and batch timers.
    pub fn tick(&mut self, delta: Duration) -> ScanTick {
        if !self.running {
            return ScanTick::default();
        }
        self.scan_timer.tick(delta);
        let rescan = self.scan_requested || self.scan_timer.just_finished();
        self.scan_requested = false;

        if self.phase == ScanPhase::BatchProcessing && !self.batch_ready {
            self.batch_timer.tick(delta);
            if self.batch_timer.just_finished() {
                self.batch_ready = true;
            }
        }

        let sweep = rescan && self.sweep_orphans;
        self.sweep_due |= sweep;
        ScanTick { rescan, sweep }
    }

    /// Classify not-yet-visited nodes. Every visited node is tagged whether or
    /// not it qualifies, so each node is classified once in its lifetime.
    /// Returns the number of new candidates.
    pub fn scan(
        &mut self,
        nodes: impl IntoIterator<Item = (Entity, Option<WorldBounds>)>,
        tags: &mut TileTags,
    ) -> usize {
        if !self.running {
            return 0;
        }
        let resume_batches = self.phase == ScanPhase::BatchProcessing;
        self.phase = ScanPhase::Scanning;

        let mut found = 0;
        for (entity, bounds) in nodes {
            if !tags.mark(entity, Stage::Shadow) {
                continue;
            }
            let Some(bounds) = bounds else {
                continue;
            };
            if self.heuristic.is_building(bounds.size) {
                self.queue.push_back(BuildingCandidate { source: entity, bounds });
                found += 1;
            }
        }

        if self.queue.is_empty() {
            self.phase = ScanPhase::Idle;
        } else {
            self.phase = ScanPhase::BatchProcessing;
            if !resume_batches {
                self.batch_ready = true;
            }
        }
        found
    }

    /// Take the next batch if one is due. Leftovers wait for the batch delay.
    pub fn take_batch(&mut self) -> Vec<BuildingCandidate> {
        if self.phase != ScanPhase::BatchProcessing || !self.batch_ready {
            return Vec::new();
        }
        let count = self.batch_size.min(self.queue.len());
        let batch: Vec<_> = self.queue.drain(..count).collect();

        self.batch_ready = false;
        if self.queue.is_empty() {
            self.phase = ScanPhase::Idle;
        } else {
            self.batch_timer.reset();
        }
        batch
    }

    /// Receiver geometry for a candidate, or `None` when its footprint is too
    /// small to be worth a receiver.
    pub fn receiver_for(&self, candidate: &BuildingCandidate) -> Option<ReceiverPlacement> {
        let footprint = Vec2::new(candidate.bounds.size.x, candidate.bounds.size.z);
        if footprint.x * footprint.y <= self.min_footprint_area {
            return None;
        }
        let center = candidate.bounds.center;
        Some(ReceiverPlacement {
            source: candidate.source,
            translation: Vec3::new(center.x, candidate.bounds.min_y() + self.ground_offset, center.z),
            footprint: footprint * self.buffer_factor,
        })
    }

    pub fn record_created(&mut self, count: usize) {
        self.created += count;
    }

    /// Consume a pending orphan sweep request.
    pub fn take_sweep_due(&mut self) -> bool {
        std::mem::take(&mut self.sweep_due)
    }

    /// Halt timers and drop pending work. Returns the receiver group so the
    /// caller can tear it down.
    pub fn stop(&mut self) -> Option<Entity> {
        self.running = false;
        self.queue.clear();
        self.phase = ScanPhase::Idle;
        self.batch_ready = false;
        self.scan_requested = false;
        self.sweep_due = false;
        self.watched_group = None;
        self.scan_timer.reset();
        self.batch_timer.reset();
        self.receiver_group.take()
    }
}

/// Stop the synthesizer and despawn its receiver group, if any.
pub fn stop_building_shadows(world: &mut World) {
    let receivers = world
        .get_resource_mut::<BuildingShadowSynthesizer>()
        .and_then(|mut synthesizer| synthesizer.stop());
    if let Some(receivers) = receivers {
        if let Ok(entity) = world.get_entity_mut(receivers) {
            entity.despawn();
        }
        debug!("Shadow receivers torn down");
    }
}

/// Create the mesh and material shared by every receiver.
pub fn setup_shadow_receivers(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    synchronizer: Res<ShadowOpacitySynchronizer>,
) {
    // Unit plane, scaled per receiver
    let mesh = meshes.add(Plane3d::new(Vec3::Y, Vec2::splat(0.5)));
    let material = materials.add(StandardMaterial {
        base_color: Color::BLACK.with_alpha(synchronizer.opacity()),
        alpha_mode: AlphaMode::Blend,
        unlit: true,
        perceptual_roughness: 1.0,
        reflectance: 0.0,
        ..default()
    });
    commands.insert_resource(ShadowReceiverAssets { mesh, material });
}

/// Classify newly streamed tile meshes whenever a scan is due.
///
/// Meshes whose `Aabb` has not been computed yet are left untagged so a later
/// scan classifies them once their bounds exist.
pub fn scan_for_buildings(
    time: Res<Time>,
    mut synthesizer: ResMut<BuildingShadowSynthesizer>,
    mut tags: ResMut<TileTags>,
    tile_groups: Query<Entity, With<TileGroup>>,
    children: Query<&Children>,
    bounds: Query<(&Aabb, &GlobalTransform)>,
    meshes: Query<(), With<Mesh3d>>,
) {
    synthesizer.watch(tile_groups.iter().next());
    let tick = synthesizer.tick(time.delta());
    if !tick.rescan {
        return;
    }
    let Some(group) = synthesizer.watched_group() else {
        return;
    };

    let mut nodes = Vec::new();
    let mut stack = vec![group];
    while let Some(entity) = stack.pop() {
        if entity != group {
            let node_bounds = bounds
                .get(entity)
                .ok()
                .map(|(aabb, transform)| WorldBounds::from_aabb(aabb, transform));
            if node_bounds.is_some() || !meshes.contains(entity) {
                nodes.push((entity, node_bounds));
            }
        }
        if let Ok(node_children) = children.get(entity) {
            stack.extend(node_children.iter());
        }
    }

    let found = synthesizer.scan(nodes, &mut tags);
    if found > 0 {
        debug!("Building scan found {} candidate(s), {} queued", found, synthesizer.queued());
    }
}

/// Spawn receivers for the next due batch of candidates.
pub fn spawn_shadow_receivers(
    mut commands: Commands,
    mut synthesizer: ResMut<BuildingShadowSynthesizer>,
    assets: Option<Res<ShadowReceiverAssets>>,
) {
    let Some(assets) = assets else {
        return;
    };
    let batch = synthesizer.take_batch();
    if batch.is_empty() {
        return;
    }

    let group = match synthesizer.receiver_group() {
        Some(group) => group,
        None => {
            let group = commands
                .spawn((
                    Name::new("Shadow Receivers"),
                    ShadowReceiverGroup,
                    Transform::default(),
                    Visibility::default(),
                ))
                .id();
            synthesizer.set_receiver_group(group);
            group
        }
    };

    let mut spawned = 0;
    for candidate in &batch {
        let Some(placement) = synthesizer.receiver_for(candidate) else {
            continue;
        };
        commands.spawn((
            Name::new("Shadow Receiver"),
            ShadowReceiver {
                source: placement.source,
                footprint: placement.footprint,
            },
            Mesh3d(assets.mesh.clone()),
            MeshMaterial3d(assets.material.clone()),
            Transform::from_translation(placement.translation)
                .with_scale(Vec3::new(placement.footprint.x, 1.0, placement.footprint.y)),
            NotShadowCaster,
            ChildOf(group),
        ));
        spawned += 1;
    }

    synthesizer.record_created(spawned);
    debug!(
        "Spawned {} shadow receiver(s) from a batch of {}, {} still queued",
        spawned,
        batch.len(),
        synthesizer.queued()
    );
}

/// Remove receivers whose source tile mesh has been despawned.
pub fn sweep_orphaned_receivers(
    mut commands: Commands,
    mut synthesizer: ResMut<BuildingShadowSynthesizer>,
    receivers: Query<(Entity, &ShadowReceiver)>,
    live: Query<Entity>,
) {
    if !synthesizer.take_sweep_due() {
        return;
    }
    let mut removed = 0;
    for (entity, receiver) in receivers.iter() {
        if !live.contains(receiver.source) {
            commands.entity(entity).despawn();
            removed += 1;
        }
    }
    if removed > 0 {
        debug!("Swept {} orphaned shadow receiver(s)", removed);
    }
}
