//! GameObject identity and component storage

use super::component::{Component, ComponentKind, ComponentVariant};
use super::Transform;
use crate::render::graveyard::ResourceGraveyard;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a GameObject, generated once and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
struct ComponentSlot {
    component: Component,
    started: bool,
}

/// A named node of the scene graph
///
/// Created through the `GameObjectManager` factories; holds at most one
/// component per [`ComponentKind`].
#[derive(Debug)]
pub struct GameObject {
    id: ObjectId,
    name: String,
    pub transform: Transform,
    components: Vec<ComponentSlot>,
    creation_index: u64,
}

impl GameObject {
    pub(crate) fn new(id: ObjectId, name: &str, creation_index: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            transform: Transform::default(),
            components: Vec::new(),
            creation_index,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Order in which the manager created this object
    pub fn creation_index(&self) -> u64 {
        self.creation_index
    }

    pub(crate) fn set_creation_index(&mut self, index: u64) {
        self.creation_index = index;
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().map(|slot| &slot.component)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn has_component(&self, kind: ComponentKind) -> bool {
        self.components.iter().any(|s| s.component.kind() == kind)
    }

    pub fn get_component<T: ComponentVariant>(&self) -> Option<&T> {
        self.components
            .iter()
            .find_map(|s| T::from_component(&s.component))
    }

    pub fn get_component_mut<T: ComponentVariant>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|s| T::from_component_mut(&mut s.component))
    }

    /// Attach a component. Rejected when one of the same kind is already present.
    pub fn add_component(&mut self, component: impl Into<Component>) -> bool {
        let component = component.into();
        if self.has_component(component.kind()) {
            log::warn!(
                "{} already has a {} component",
                self.name,
                component.kind().type_name()
            );
            return false;
        }
        self.components.push(ComponentSlot {
            component,
            started: false,
        });
        true
    }

    /// Detach the component of `kind`, running its teardown hook
    pub fn remove_component(
        &mut self,
        kind: ComponentKind,
        graveyard: &mut ResourceGraveyard,
    ) -> Option<Component> {
        let index = self
            .components
            .iter()
            .position(|s| s.component.kind() == kind)?;
        let mut slot = self.components.remove(index);
        slot.component.on_destroy(graveyard);
        Some(slot.component)
    }

    /// Run `start` on new components, then `update` on all of them
    pub fn update(&mut self, dt: f32) {
        let id = self.id;
        for slot in &mut self.components {
            if !slot.started {
                slot.component.start(id);
                slot.started = true;
            }
            slot.component.update(id, dt);
        }
    }

    pub(crate) fn destroy(&mut self, graveyard: &mut ResourceGraveyard) {
        for slot in &mut self.components {
            slot.component.on_destroy(graveyard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Light, MeshRenderer};

    #[test]
    fn duplicate_component_kind_is_rejected() {
        let mut object = GameObject::new(ObjectId::new(), "lamp", 0);
        assert!(object.add_component(Light::default()));
        assert!(!object.add_component(Light::point(glam::Vec3::X, 5.0, 1.0)));
        assert_eq!(object.component_count(), 1);
        assert_eq!(object.get_component::<Light>().unwrap().intensity, 100.0);

        assert!(object.add_component(MeshRenderer::cube()));
        assert_eq!(object.component_count(), 2);
    }

    #[test]
    fn remove_component_returns_it() {
        let mut object = GameObject::new(ObjectId::new(), "lamp", 0);
        object.add_component(Light::default());
        let mut graveyard = ResourceGraveyard::new();
        let removed = object.remove_component(ComponentKind::Light, &mut graveyard);
        assert!(matches!(removed, Some(Component::Light(_))));
        assert!(object.remove_component(ComponentKind::Light, &mut graveyard).is_none());
    }
}
