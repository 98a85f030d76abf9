//! GameObjectManager: owns the scene's objects and notifies observers

use super::component::{Component, ComponentKind, ComponentVariant};
use super::game_object::{GameObject, ObjectId};
use super::light::Light;
use super::mesh_renderer::MeshRenderer;
use crate::render::graveyard::ResourceGraveyard;

/// Change notification raised by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    Added(ObjectId),
    Removed(ObjectId),
    Changed(ObjectId),
    HierarchyChanged(ObjectId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&SceneEvent)>;

/// Ordered collection of GameObjects
///
/// List order is the display order of the hierarchy view and is changed only
/// through [`move_before`](Self::move_before) / [`move_after`](Self::move_after).
pub struct GameObjectManager {
    objects: Vec<GameObject>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    next_creation: u64,
    graveyard: ResourceGraveyard,
}

impl Default for GameObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GameObjectManager {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
            next_creation: 0,
            graveyard: ResourceGraveyard::new(),
        }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&SceneEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(s, _)| *s != id);
        self.subscribers.len() != before
    }

    pub(crate) fn emit(&mut self, event: SceneEvent) {
        log::trace!("Scene event {:?}", event);
        for (_, callback) in &mut self.subscribers {
            callback(&event);
        }
    }

    /// Create an empty object with a fresh id
    pub fn create_game_object(&mut self, name: &str) -> ObjectId {
        let id = ObjectId::new();
        self.insert_object(id, name);
        id
    }

    /// Create an object with a known id, as scene loading does.
    /// Returns `None` when the id is already taken.
    pub fn create_game_object_with_id(&mut self, name: &str, id: ObjectId) -> Option<ObjectId> {
        if self.index_of(id).is_some() {
            log::warn!("GameObject id {} is already in use", id);
            return None;
        }
        self.insert_object(id, name);
        Some(id)
    }

    fn insert_object(&mut self, id: ObjectId, name: &str) {
        let object = GameObject::new(id, name, self.next_creation);
        self.next_creation += 1;
        self.objects.push(object);
        self.emit(SceneEvent::Added(id));
    }

    /// Give a loaded object the creation index it was saved with.
    /// Later objects are numbered after the highest restored index.
    pub(crate) fn restore_creation_index(&mut self, id: ObjectId, index: u64) -> bool {
        let Some(object) = self.get_mut(id) else {
            return false;
        };
        object.set_creation_index(index);
        self.next_creation = self.next_creation.max(index + 1);
        true
    }

    /// Create a "Cube" object rendering the built-in cube mesh
    pub fn create_cube(&mut self) -> ObjectId {
        let id = self.create_game_object("Cube");
        self.add_component(id, MeshRenderer::cube());
        id
    }

    /// Create an object carrying `light`
    pub fn create_light(&mut self, name: &str, light: Light) -> ObjectId {
        let id = self.create_game_object(name);
        self.add_component(id, light);
        id
    }

    /// Remove an object, tearing down its components. Children become roots.
    pub fn remove_game_object(&mut self, id: ObjectId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let mut object = self.objects.remove(index);
        object.destroy(&mut self.graveyard);

        let orphans: Vec<ObjectId> = self
            .objects
            .iter_mut()
            .filter(|o| o.transform.parent == Some(id))
            .map(|o| {
                o.transform.parent = None;
                o.id()
            })
            .collect();

        self.emit(SceneEvent::Removed(id));
        for orphan in orphans {
            self.emit(SceneEvent::HierarchyChanged(orphan));
        }
        true
    }

    pub fn rename_game_object(&mut self, id: ObjectId, name: &str) -> bool {
        let Some(object) = self.get_mut(id) else {
            return false;
        };
        object.set_name(name);
        self.emit(SceneEvent::Changed(id));
        true
    }

    /// Move `target` directly in front of `anchor` in the list
    pub fn move_before(&mut self, target: ObjectId, anchor: ObjectId) -> bool {
        self.reorder(target, anchor, 0)
    }

    /// Move `target` directly behind `anchor` in the list
    pub fn move_after(&mut self, target: ObjectId, anchor: ObjectId) -> bool {
        self.reorder(target, anchor, 1)
    }

    fn reorder(&mut self, target: ObjectId, anchor: ObjectId, offset: usize) -> bool {
        if target == anchor {
            return false;
        }
        let (Some(from), Some(_)) = (self.index_of(target), self.index_of(anchor)) else {
            return false;
        };
        let object = self.objects.remove(from);
        // anchor index shifts once the target has been taken out
        let Some(anchor_index) = self.index_of(anchor) else {
            self.objects.insert(from, object);
            return false;
        };
        self.objects.insert(anchor_index + offset, object);
        self.emit(SceneEvent::HierarchyChanged(target));
        true
    }

    /// Attach a component; rejected when the object already has one of that kind
    pub fn add_component(&mut self, id: ObjectId, component: impl Into<Component>) -> bool {
        let Some(object) = self.get_mut(id) else {
            return false;
        };
        if !object.add_component(component) {
            return false;
        }
        self.emit(SceneEvent::Changed(id));
        true
    }

    pub fn remove_component(&mut self, id: ObjectId, kind: ComponentKind) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let removed = self.objects[index]
            .remove_component(kind, &mut self.graveyard)
            .is_some();
        if removed {
            self.emit(SceneEvent::Changed(id));
        }
        removed
    }

    /// Mutate an object and raise `Changed` for it
    pub fn modify<R>(&mut self, id: ObjectId, f: impl FnOnce(&mut GameObject) -> R) -> Option<R> {
        let result = f(self.get_mut(id)?);
        self.emit(SceneEvent::Changed(id));
        Some(result)
    }

    pub fn try_get_from_guid(&self, id: ObjectId) -> Option<&GameObject> {
        self.get(id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&GameObject> {
        self.objects.iter().find(|o| o.id() == id)
    }

    /// Direct mutable access. No notification is raised; see [`modify`](Self::modify).
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut GameObject> {
        self.objects.iter_mut().find(|o| o.id() == id)
    }

    pub fn index_of(&self, id: ObjectId) -> Option<usize> {
        self.objects.iter().position(|o| o.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut GameObject> {
        self.objects.iter_mut()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.iter().map(|o| o.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Every component of type `T`, at most one per object, in list order
    pub fn get_all_components<T: ComponentVariant>(&self) -> Vec<(ObjectId, &T)> {
        self.objects
            .iter()
            .filter_map(|o| o.get_component::<T>().map(|c| (o.id(), c)))
            .collect()
    }

    /// Directional lights ordered by the creation order of their objects
    pub fn directional_lights(&self) -> Vec<(ObjectId, &Light)> {
        let mut lights: Vec<(u64, ObjectId, &Light)> = self
            .objects
            .iter()
            .filter_map(|o| {
                o.get_component::<Light>()
                    .filter(|l| l.is_directional())
                    .map(|l| (o.creation_index(), o.id(), l))
            })
            .collect();
        lights.sort_by_key(|(order, _, _)| *order);
        lights.into_iter().map(|(_, id, l)| (id, l)).collect()
    }

    /// Drive component lifecycles for one tick
    pub fn update(&mut self, dt: f32) {
        for object in &mut self.objects {
            object.update(dt);
        }
    }

    /// Remove every object
    pub fn clear(&mut self) {
        let ids = self.ids();
        for object in &mut self.objects {
            object.destroy(&mut self.graveyard);
        }
        self.objects.clear();
        for id in ids {
            self.emit(SceneEvent::Removed(id));
        }
    }

    pub(crate) fn graveyard_mut(&mut self) -> &mut ResourceGraveyard {
        &mut self.graveyard
    }

    /// Hand over the GPU handles released by removed components
    pub fn take_released(&mut self) -> ResourceGraveyard {
        std::mem::take(&mut self.graveyard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn names(manager: &GameObjectManager) -> Vec<String> {
        manager.iter().map(|o| o.name().to_string()).collect()
    }

    fn three() -> (GameObjectManager, ObjectId, ObjectId, ObjectId) {
        let mut manager = GameObjectManager::new();
        let a = manager.create_game_object("a");
        let b = manager.create_game_object("b");
        let c = manager.create_game_object("c");
        (manager, a, b, c)
    }

    #[test]
    fn move_before_and_after_reorder() {
        let (mut manager, a, _b, c) = three();
        assert!(manager.move_before(c, a));
        assert_eq!(names(&manager), ["c", "a", "b"]);
        assert!(manager.move_after(c, a));
        assert_eq!(names(&manager), ["a", "c", "b"]);
    }

    #[test]
    fn invalid_moves_leave_order_unchanged() {
        let (mut manager, a, b, _c) = three();
        let mut other = GameObjectManager::new();
        let stranger = other.create_game_object("x");

        assert!(!manager.move_before(a, a));
        assert!(!manager.move_after(b, b));
        assert!(!manager.move_before(a, stranger));
        assert!(!manager.move_before(stranger, a));
        assert_eq!(names(&manager), ["a", "b", "c"]);
    }

    #[test]
    fn events_are_delivered() {
        let mut manager = GameObjectManager::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let subscription = manager.subscribe(move |e| sink.borrow_mut().push(*e));

        let id = manager.create_game_object("obj");
        manager.rename_game_object(id, "renamed");
        manager.remove_game_object(id);
        assert_eq!(
            *seen.borrow(),
            vec![
                SceneEvent::Added(id),
                SceneEvent::Changed(id),
                SceneEvent::Removed(id)
            ]
        );

        assert!(manager.unsubscribe(subscription));
        manager.create_game_object("quiet");
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn duplicate_add_is_rejected_without_event() {
        let mut manager = GameObjectManager::new();
        let id = manager.create_cube();
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        manager.subscribe(move |_| *sink.borrow_mut() += 1);

        assert!(!manager.add_component(id, MeshRenderer::cube()));
        assert_eq!(*count.borrow(), 0);
        assert_eq!(manager.get(id).unwrap().component_count(), 1);
    }

    #[test]
    fn directional_lights_follow_creation_order() {
        let mut manager = GameObjectManager::new();
        let first = manager.create_light("sun", Light::directional(Vec3::ONE, 100.0));
        manager.create_light("bulb", Light::default());
        let second = manager.create_light("moon", Light::directional(Vec3::ONE, 10.0));
        manager.move_before(second, first);

        let ids: Vec<ObjectId> = manager.directional_lights().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(manager.get_all_components::<Light>().len(), 3);
    }

    #[test]
    fn id_collision_is_rejected() {
        let mut manager = GameObjectManager::new();
        let id = manager.create_game_object("a");
        assert!(manager.create_game_object_with_id("b", id).is_none());
        assert_eq!(manager.len(), 1);
    }
}
