//! The host surface the story drives: scene entities, materials and sounds.
//!
//! The story never knows how an entity is drawn. It toggles entities, reads
//! and writes transforms, and sets material opacity through [`Stage`].

use crate::gfx::math::{Transform, TransformPatch, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

macro_rules! name_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

name_id!(EntityId);
name_id!(MaterialId);
name_id!(SoundId);

pub trait Stage {
    fn has_entity(&self, id: &EntityId) -> bool {
        self.local_transform(id).is_some()
    }

    fn set_enabled(&mut self, id: &EntityId, enabled: bool);

    fn local_transform(&self, id: &EntityId) -> Option<Transform>;

    fn set_local_transform(&mut self, id: &EntityId, patch: TransformPatch);

    fn world_position(&self, id: &EntityId) -> Option<Vec3>;

    fn set_world_position(&mut self, id: &EntityId, position: Vec3);

    fn alpha(&self, id: &MaterialId) -> Option<f32>;

    fn set_alpha(&mut self, id: &MaterialId, alpha: f32);

    /// `loops < 0` loops forever.
    fn play_sound(&mut self, id: &SoundId, loops: i32);

    /// Replaces the caption text.
    fn set_text(&mut self, text: &str);

    fn set_interactable(&mut self, id: &EntityId, interactable: bool);

    /// Pauses or resumes any baked animation players under the entity.
    fn set_animations_paused(&mut self, id: &EntityId, paused: bool);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub enabled: bool,
    pub transform: Transform,
    /// World position of the parent; world = origin + local position.
    pub origin: Vec3,
    pub interactable: bool,
    pub animations_paused: bool,
}

/// In-memory scene. Backs the headless driver and the tests.
#[derive(Debug, Default)]
pub struct MemoryStage {
    nodes: HashMap<EntityId, Node>,
    materials: HashMap<MaterialId, f32>,
    sounds: Vec<(SoundId, i32)>,
    captions: Vec<String>,
    text: String,
}

impl MemoryStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(self, id: impl Into<EntityId>, transform: Transform) -> Self {
        self.with_entity_under(id, Vec3::ZERO, transform)
    }

    pub fn with_entity_under(mut self, id: impl Into<EntityId>, origin: Vec3, transform: Transform) -> Self {
        self.nodes.insert(
            id.into(),
            Node {
                enabled: true,
                transform,
                origin,
                interactable: true,
                animations_paused: false,
            },
        );
        self
    }

    pub fn with_material(mut self, id: impl Into<MaterialId>, alpha: f32) -> Self {
        self.materials.insert(id.into(), alpha);
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(&EntityId::from(id))
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.node(id).map(|n| n.enabled).unwrap_or(false)
    }

    pub fn material_alpha(&self, id: &str) -> Option<f32> {
        self.materials.get(&MaterialId::from(id)).copied()
    }

    pub fn sounds(&self) -> &[(SoundId, i32)] {
        &self.sounds
    }

    pub fn played(&self, id: &str) -> usize {
        self.sounds.iter().filter(|(s, _)| s.0 == id).count()
    }

    /// Every caption ever set, oldest first.
    pub fn captions(&self) -> &[String] {
        &self.captions
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Stage for MemoryStage {
    fn has_entity(&self, id: &EntityId) -> bool {
        self.nodes.contains_key(id)
    }

    fn set_enabled(&mut self, id: &EntityId, enabled: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.enabled = enabled;
        }
    }

    fn local_transform(&self, id: &EntityId) -> Option<Transform> {
        self.nodes.get(id).map(|n| n.transform)
    }

    fn set_local_transform(&mut self, id: &EntityId, patch: TransformPatch) {
        if let Some(node) = self.nodes.get_mut(id) {
            patch.apply_to(&mut node.transform);
        }
    }

    fn world_position(&self, id: &EntityId) -> Option<Vec3> {
        self.nodes.get(id).map(|n| n.origin + n.transform.position)
    }

    fn set_world_position(&mut self, id: &EntityId, position: Vec3) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.transform.position = position - node.origin;
        }
    }

    fn alpha(&self, id: &MaterialId) -> Option<f32> {
        self.materials.get(id).copied()
    }

    fn set_alpha(&mut self, id: &MaterialId, alpha: f32) {
        if let Some(a) = self.materials.get_mut(id) {
            *a = alpha;
        }
    }

    fn play_sound(&mut self, id: &SoundId, loops: i32) {
        debug!("sound {} (loops {})", id, loops);
        self.sounds.push((id.clone(), loops));
    }

    fn set_text(&mut self, text: &str) {
        debug!("caption: {:?}", text);
        self.text = text.to_string();
        self.captions.push(self.text.clone());
    }

    fn set_interactable(&mut self, id: &EntityId, interactable: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.interactable = interactable;
        }
    }

    fn set_animations_paused(&mut self, id: &EntityId, paused: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.animations_paused = paused;
        }
    }
}
