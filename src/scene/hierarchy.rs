//! World-space derivation over the parent chain
//!
//! `world = parent_world * local`, applied recursively to the root. Setting a
//! world value back-solves the local one against the parent's world state.
//! Scale conversion divides componentwise and ignores shear.

use super::game_object::ObjectId;
use super::manager::{GameObjectManager, SceneEvent};
use crate::error::HierarchyError;
use glam::{Mat4, Quat, Vec3};

impl GameObjectManager {
    /// Ancestors of `id`, nearest first. Dangling parent links end the chain.
    pub fn ancestors(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|o| o.transform.parent);
        while let Some(parent) = current {
            if chain.contains(&parent) || parent == id {
                log::error!("Parent cycle detected above {}", id);
                break;
            }
            chain.push(parent);
            current = self.get(parent).and_then(|o| o.transform.parent);
        }
        chain
    }

    pub fn world_matrix(&self, id: ObjectId) -> Option<Mat4> {
        let local = self.get(id)?.transform.local_matrix();
        Some(self.parent_world_matrix(id) * local)
    }

    /// World matrix of the parent, identity for roots
    pub fn parent_world_matrix(&self, id: ObjectId) -> Mat4 {
        self.ancestors(id)
            .iter()
            .filter_map(|a| self.get(*a))
            .fold(Mat4::IDENTITY, |acc, ancestor| {
                ancestor.transform.local_matrix() * acc
            })
    }

    fn parent_world_rotation(&self, id: ObjectId) -> Quat {
        self.ancestors(id)
            .iter()
            .filter_map(|a| self.get(*a))
            .fold(Quat::IDENTITY, |acc, ancestor| {
                ancestor.transform.local_rotation * acc
            })
    }

    fn parent_world_scale(&self, id: ObjectId) -> Vec3 {
        self.ancestors(id)
            .iter()
            .filter_map(|a| self.get(*a))
            .fold(Vec3::ONE, |acc, ancestor| ancestor.transform.local_scale * acc)
    }

    pub fn world_position(&self, id: ObjectId) -> Option<Vec3> {
        let local = self.get(id)?.transform.local_position;
        Some(self.parent_world_matrix(id).transform_point3(local))
    }

    pub fn world_rotation(&self, id: ObjectId) -> Option<Quat> {
        let local = self.get(id)?.transform.local_rotation;
        Some((self.parent_world_rotation(id) * local).normalize())
    }

    pub fn world_scale(&self, id: ObjectId) -> Option<Vec3> {
        let local = self.get(id)?.transform.local_scale;
        Some(self.parent_world_scale(id) * local)
    }

    /// Fails without touching the transform when an ancestor collapses an
    /// axis (zero scale), since no local position maps onto `position`.
    pub fn set_world_position(&mut self, id: ObjectId, position: Vec3) -> bool {
        let parent = self.parent_world_matrix(id);
        if parent.determinant().abs() <= f32::EPSILON {
            log::warn!("Cannot set world position of {}: parent transform is singular", id);
            return false;
        }
        let local = parent.inverse().transform_point3(position);
        self.modify(id, |o| o.transform.local_position = local).is_some()
    }

    pub fn set_world_rotation(&mut self, id: ObjectId, rotation: Quat) -> bool {
        if !rotation.is_finite() || rotation.length_squared() <= f32::EPSILON {
            return false;
        }
        let local = (self.parent_world_rotation(id).inverse() * rotation).normalize();
        self.modify(id, |o| o.transform.local_rotation = local).is_some()
    }

    pub fn set_world_scale(&mut self, id: ObjectId, scale: Vec3) -> bool {
        let parent = self.parent_world_scale(id);
        let divide = |s: f32, p: f32| if p == 0.0 { s } else { s / p };
        let local = Vec3::new(
            divide(scale.x, parent.x),
            divide(scale.y, parent.y),
            divide(scale.z, parent.z),
        );
        self.modify(id, |o| o.transform.local_scale = local).is_some()
    }

    /// Reparent `child`. World pose is not preserved.
    pub fn set_parent(
        &mut self,
        child: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<(), HierarchyError> {
        if self.get(child).is_none() {
            return Err(HierarchyError::MissingObject);
        }
        if let Some(parent) = parent {
            if parent == child {
                return Err(HierarchyError::SelfParent);
            }
            if self.get(parent).is_none() {
                return Err(HierarchyError::MissingObject);
            }
            if self.ancestors(parent).contains(&child) {
                return Err(HierarchyError::Cycle);
            }
        }
        if let Some(object) = self.get_mut(child) {
            object.transform.parent = parent;
        }
        self.emit(SceneEvent::HierarchyChanged(child));
        Ok(())
    }

    /// Direct children of `id`, in list order
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.iter()
            .filter(|o| o.transform.parent == Some(id))
            .map(|o| o.id())
            .collect()
    }

    /// Objects without a parent, in list order
    pub fn root_objects(&self) -> Vec<ObjectId> {
        self.iter()
            .filter(|o| o.transform.parent.is_none())
            .map(|o| o.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn chain(depth: usize) -> (GameObjectManager, Vec<ObjectId>) {
        let mut manager = GameObjectManager::new();
        let mut ids = Vec::new();
        for i in 0..depth {
            let id = manager.create_game_object(&format!("node{i}"));
            let transform = &mut manager.get_mut(id).unwrap().transform;
            transform.local_position = Vec3::new(i as f32 + 1.0, -(i as f32), 0.5);
            transform.local_rotation = Quat::from_rotation_y(0.3 * (i as f32 + 1.0));
            transform.local_scale = Vec3::splat(1.0 + 0.5 * i as f32);
            if let Some(parent) = ids.last() {
                manager.set_parent(id, Some(*parent)).unwrap();
            }
            ids.push(id);
        }
        (manager, ids)
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    fn world_matrix_composes_with_parent(#[case] depth: usize) {
        let (manager, ids) = chain(depth);
        for window in ids.windows(2) {
            let (parent, child) = (window[0], window[1]);
            let local = manager.get(child).unwrap().transform.local_matrix();
            let expected = manager.world_matrix(parent).unwrap() * local;
            assert!(manager.world_matrix(child).unwrap().abs_diff_eq(expected, 1e-4));
        }
        let root = ids[0];
        assert_eq!(
            manager.world_matrix(root).unwrap(),
            manager.get(root).unwrap().transform.local_matrix()
        );
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    fn world_position_round_trips(#[case] depth: usize) {
        let (mut manager, ids) = chain(depth);
        let leaf = *ids.last().unwrap();
        let target = Vec3::new(3.0, -2.0, 7.5);
        assert!(manager.set_world_position(leaf, target));
        assert!(manager.world_position(leaf).unwrap().abs_diff_eq(target, 1e-4));
    }

    #[test]
    fn world_rotation_and_scale_round_trip() {
        let (mut manager, ids) = chain(3);
        let leaf = ids[2];
        let rotation = Quat::from_rotation_x(0.7) * Quat::from_rotation_z(-0.2);
        manager.set_world_rotation(leaf, rotation);
        assert!(manager.world_rotation(leaf).unwrap().abs_diff_eq(rotation, 1e-4));

        manager.set_world_scale(leaf, Vec3::new(2.0, 3.0, 4.0));
        assert!(manager
            .world_scale(leaf)
            .unwrap()
            .abs_diff_eq(Vec3::new(2.0, 3.0, 4.0), 1e-4));
    }

    #[test]
    fn world_setters_refuse_a_flattened_parent() {
        let (mut manager, ids) = chain(2);
        let (parent, child) = (ids[0], ids[1]);
        manager.get_mut(parent).unwrap().transform.local_scale = Vec3::new(0.0, 1.0, 1.0);
        let before = manager.get(child).unwrap().transform.local_position;

        assert!(!manager.set_world_position(child, Vec3::new(1.0, 2.0, 3.0)));
        let after = manager.get(child).unwrap().transform.local_position;
        assert!(after.is_finite());
        assert_eq!(after, before);

        assert!(!manager.set_world_rotation(child, Quat::from_xyzw(0.0, 0.0, 0.0, 0.0)));
        assert!(manager.get(child).unwrap().transform.local_rotation.is_finite());
    }

    #[test]
    fn cycles_are_rejected() {
        let (mut manager, ids) = chain(3);
        assert_eq!(manager.set_parent(ids[0], Some(ids[2])), Err(HierarchyError::Cycle));
        assert_eq!(manager.set_parent(ids[1], Some(ids[1])), Err(HierarchyError::SelfParent));
        assert_eq!(manager.get(ids[0]).unwrap().transform.parent(), None);
    }

    #[test]
    fn removing_parent_orphans_children() {
        let (mut manager, ids) = chain(3);
        assert!(manager.remove_game_object(ids[1]));
        assert_eq!(manager.get(ids[2]).unwrap().transform.parent(), None);
        assert_eq!(manager.root_objects(), vec![ids[0], ids[2]]);
        assert!(manager.children(ids[0]).is_empty());
    }
}
