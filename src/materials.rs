//! Material normalization for streamed tile meshes.
//!
//! Tiles arrive with heterogeneous photogrammetry materials. When the
//! normalized look is enabled every mesh under a tile gets one freshly
//! allocated canonical material per material slot and is switched to cast and
//! receive shadows. Each mesh is handled once; see [`TileTags`].

use bevy::light::{NotShadowCaster, NotShadowReceiver};
use bevy::prelude::*;

use crate::config::CanonicalMaterial;
use crate::tags::{Stage, TileTags};

pub struct MaterialNormalizer {
    material: CanonicalMaterial,
}

impl MaterialNormalizer {
    pub fn new(material: CanonicalMaterial) -> Self {
        Self { material }
    }

    /// The canonical material: double-sided, unculled, opaque white.
    pub fn canonical_material(&self) -> StandardMaterial {
        StandardMaterial {
            base_color: Color::WHITE,
            perceptual_roughness: self.material.roughness,
            metallic: self.material.metallic,
            double_sided: true,
            cull_mode: None,
            alpha_mode: AlphaMode::Opaque,
            ..default()
        }
    }

    /// Normalize every untagged mesh under `root`, then tag `root` itself.
    ///
    /// Does nothing if `root` is already tagged, so meshes streamed in under
    /// a tagged root are only picked up by [`Self::refresh`].
    /// Returns the number of meshes normalized.
    pub fn normalize(&self, world: &mut World, tags: &mut TileTags, root: Entity) -> usize {
        if tags.is_processed(root, Stage::Material) {
            return 0;
        }
        let count = self.normalize_meshes(world, tags, root);
        tags.mark(root, Stage::Material);
        count
    }

    /// Catch-up pass over all meshes under `root`, ignoring the root's tag.
    pub fn refresh(&self, world: &mut World, tags: &mut TileTags, root: Entity) -> usize {
        self.normalize_meshes(world, tags, root)
    }

    /// Clear the material tag for the whole subtree and normalize it again.
    pub fn reset_and_renormalize(&self, world: &mut World, tags: &mut TileTags, root: Entity) -> usize {
        for entity in subtree(world, root) {
            tags.clear_stage(entity, Stage::Material);
        }
        self.normalize(world, tags, root)
    }

    fn normalize_meshes(&self, world: &mut World, tags: &mut TileTags, root: Entity) -> usize {
        let pending: Vec<Entity> = subtree(world, root)
            .into_iter()
            .filter(|&entity| {
                world.get::<Mesh3d>(entity).is_some() && !tags.is_processed(entity, Stage::Material)
            })
            .collect();

        let mut count = 0;
        for entity in pending {
            let has_slot = world.get::<MeshMaterial3d<StandardMaterial>>(entity).is_some();
            let handle = if has_slot {
                let Some(mut materials) = world.get_resource_mut::<Assets<StandardMaterial>>() else {
                    warn!("StandardMaterial assets missing, skipping material normalization");
                    return count;
                };
                Some(materials.add(self.canonical_material()))
            } else {
                None
            };

            let Ok(mut node) = world.get_entity_mut(entity) else {
                debug!("Tile mesh {:?} vanished before normalization", entity);
                continue;
            };
            // Replacing the slot drops the previous handle.
            if let Some(handle) = handle {
                node.insert(MeshMaterial3d(handle));
            }
            node.remove::<(NotShadowCaster, NotShadowReceiver)>();

            tags.mark(entity, Stage::Material);
            count += 1;
        }

        if count > 0 {
            debug!("Normalized {} tile mesh(es) under {:?}", count, root);
        }
        count
    }
}

/// `root` and all of its descendants, depth-first.
pub(crate) fn subtree(world: &World, root: Entity) -> Vec<Entity> {
    let mut visited = Vec::new();
    let mut stack = vec![root];
    while let Some(entity) = stack.pop() {
        if world.get_entity(entity).is_err() {
            continue;
        }
        visited.push(entity);
        if let Some(children) = world.get::<Children>(entity) {
            stack.extend(children.iter());
        }
    }
    visited
}
