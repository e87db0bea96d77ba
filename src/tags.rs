use std::collections::HashMap;

use bevy::prelude::*;

/// Processing stages a tile node can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Material replaced with the canonical material
    Material,
    /// Visited by the building classifier
    Shadow,
}

/// Per-node processing flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileFlags {
    pub material: bool,
    pub shadow: bool,
}

impl TileFlags {
    fn get(&self, stage: Stage) -> bool {
        match stage {
            Stage::Material => self.material,
            Stage::Shadow => self.shadow,
        }
    }

    fn set(&mut self, stage: Stage, value: bool) {
        match stage {
            Stage::Material => self.material = value,
            Stage::Shadow => self.shadow = value,
        }
    }

    fn is_empty(&self) -> bool {
        !self.material && !self.shadow
    }
}

/// Side table of processing state keyed by tile entity.
///
/// Tile entities belong to the streaming engine, so their processing state
/// is kept here instead of on the entities themselves. A stage set for a node
/// is never run again for that node until it is explicitly cleared.
#[derive(Resource, Debug, Default)]
pub struct TileTags {
    flags: HashMap<Entity, TileFlags>,
}

impl TileTags {
    pub fn is_processed(&self, entity: Entity, stage: Stage) -> bool {
        self.flags.get(&entity).is_some_and(|flags| flags.get(stage))
    }

    /// Tag `entity` for `stage`. Returns `false` if it was already tagged.
    pub fn mark(&mut self, entity: Entity, stage: Stage) -> bool {
        let flags = self.flags.entry(entity).or_default();
        let was_set = flags.get(stage);
        flags.set(stage, true);
        !was_set
    }

    pub fn clear_stage(&mut self, entity: Entity, stage: Stage) {
        if let Some(flags) = self.flags.get_mut(&entity) {
            flags.set(stage, false);
            if flags.is_empty() {
                self.flags.remove(&entity);
            }
        }
    }

    pub fn flags(&self, entity: Entity) -> TileFlags {
        self.flags.get(&entity).copied().unwrap_or_default()
    }

    pub fn forget(&mut self, entity: Entity) {
        self.flags.remove(&entity);
    }

    /// Drop entries for which `is_live` returns false.
    pub fn retain_live(&mut self, mut is_live: impl FnMut(Entity) -> bool) -> usize {
        let before = self.flags.len();
        self.flags.retain(|entity, _| is_live(*entity));
        before - self.flags.len()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}
