//! Scene file format
//!
//! ```json
//! { "settings": { "ambientLightIntensity": 0.2, ... },
//!   "objects": [ { "id": "...", "name": "Cube", "parent": "...",
//!                  "transform": { "position": [0,0,0], "rotation": [0,0,0,1], "scale": [1,1,1] },
//!                  "components": [ { "type": "MeshRenderer", "fields": { ... } } ] } ] }
//! ```
//!
//! Rotations are written as quaternions (xyzw). Three-element rotations are
//! read as XYZ euler angles in degrees.

use super::component::{Component, ComponentRecord};
use super::{GameObjectManager, ObjectId, Scene, Transform};
use crate::error::{EngineError, EngineResult};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub settings: Scene,
    #[serde(default)]
    pub objects: Vec<GameObjectRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObjectRecord {
    pub id: ObjectId,
    pub name: String,
    /// Creation order in the saved manager; missing means list order
    #[serde(rename = "creationIndex", default, skip_serializing_if = "Option::is_none")]
    pub creation_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ObjectId>,
    #[serde(default)]
    pub transform: TransformRecord,
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub position: [f32; 3],
    pub rotation: RotationRecord,
    pub scale: [f32; 3],
}

impl Default for TransformRecord {
    fn default() -> Self {
        TransformRecord::from(&Transform::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RotationRecord {
    Quaternion([f32; 4]),
    EulerDegrees([f32; 3]),
}

impl RotationRecord {
    pub fn to_quat(self) -> Quat {
        match self {
            RotationRecord::Quaternion(q) => Quat::from_array(q).normalize(),
            RotationRecord::EulerDegrees(e) => {
                let mut t = Transform::new();
                t.set_local_euler_degrees(Vec3::from_array(e));
                t.local_rotation
            }
        }
    }
}

impl From<&Transform> for TransformRecord {
    fn from(t: &Transform) -> Self {
        Self {
            position: t.local_position.to_array(),
            rotation: RotationRecord::Quaternion(t.local_rotation.to_array()),
            scale: t.local_scale.to_array(),
        }
    }
}

impl TransformRecord {
    fn apply(&self, transform: &mut Transform) {
        transform.local_position = Vec3::from_array(self.position);
        transform.local_rotation = self.rotation.to_quat();
        transform.local_scale = Vec3::from_array(self.scale);
    }
}

impl SceneFile {
    /// Snapshot settings and objects, in list order
    pub fn capture(settings: &Scene, manager: &GameObjectManager) -> EngineResult<Self> {
        let objects = manager
            .iter()
            .map(|object| {
                Ok(GameObjectRecord {
                    id: object.id(),
                    name: object.name().to_string(),
                    creation_index: Some(object.creation_index()),
                    parent: object.transform.parent(),
                    transform: TransformRecord::from(&object.transform),
                    components: object
                        .components()
                        .map(Component::to_record)
                        .collect::<EngineResult<Vec<_>>>()?,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            settings: settings.clone(),
            objects,
        })
    }

    /// Build a fresh manager from the records. Any invalid record fails the whole load.
    pub fn instantiate(&self) -> EngineResult<(Scene, GameObjectManager)> {
        let mut manager = GameObjectManager::new();
        for record in &self.objects {
            let id = manager
                .create_game_object_with_id(&record.name, record.id)
                .ok_or_else(|| {
                    EngineError::InvalidScene(format!("duplicate object id {}", record.id))
                })?;
            if let Some(index) = record.creation_index {
                manager.restore_creation_index(id, index);
            }
            let object = manager
                .get_mut(id)
                .ok_or_else(|| EngineError::InvalidScene(format!("lost object {}", id)))?;
            record.transform.apply(&mut object.transform);
            for component in &record.components {
                let component = Component::from_record(component)?;
                let kind = component.kind();
                if !object.add_component(component) {
                    return Err(EngineError::InvalidScene(format!(
                        "{} has two {} components",
                        record.name,
                        kind.type_name()
                    )));
                }
            }
        }
        // parents are linked once every object exists
        for record in &self.objects {
            if let Some(parent) = record.parent {
                manager.set_parent(record.id, Some(parent)).map_err(|e| {
                    EngineError::InvalidScene(format!("{}: bad parent {}: {}", record.name, parent, e))
                })?;
            }
        }
        Ok((self.settings.clone(), manager))
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Write `settings` and every object of `manager` to `path`
pub fn save_scene(
    path: impl AsRef<Path>,
    settings: &Scene,
    manager: &GameObjectManager,
) -> EngineResult<()> {
    let path = path.as_ref();
    let json = SceneFile::capture(settings, manager)?.to_json()?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, json)?;
    log::info!("Saved scene with {} objects to {}", manager.len(), path.display());
    Ok(())
}

pub fn load_scene(path: impl AsRef<Path>) -> EngineResult<(Scene, GameObjectManager)> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let loaded = SceneFile::from_json(&text)?.instantiate()?;
    log::info!("Loaded scene {} ({} objects)", path.display(), loaded.1.len());
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Light, MeshRenderer};

    #[test]
    fn euler_rotation_is_accepted() {
        let json = r#"{ "objects": [ { "id": "6f1c1a3e-2b9b-4f59-9a59-0c8f3e1d2a10", "name": "tilted",
            "transform": { "position": [1, 2, 3], "rotation": [0, 90, 0], "scale": [1, 1, 1] } } ] }"#;
        let (_, manager) = SceneFile::from_json(json).unwrap().instantiate().unwrap();
        let object = manager.iter().next().unwrap();
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        assert!(object.transform.local_rotation.abs_diff_eq(expected, 1e-5));
        assert_eq!(object.transform.local_position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn unknown_component_fails_load() {
        let json = r#"{ "objects": [ { "id": "6f1c1a3e-2b9b-4f59-9a59-0c8f3e1d2a10", "name": "a",
            "components": [ { "type": "AudioSource", "fields": {} } ] } ] }"#;
        let result = SceneFile::from_json(json).unwrap().instantiate();
        assert!(matches!(result, Err(EngineError::UnknownComponent(_))));
    }

    #[test]
    fn dangling_parent_fails_load() {
        let json = r#"{ "objects": [ { "id": "6f1c1a3e-2b9b-4f59-9a59-0c8f3e1d2a10", "name": "a",
            "parent": "00000000-0000-0000-0000-000000000001" } ] }"#;
        let result = SceneFile::from_json(json).unwrap().instantiate();
        assert!(matches!(result, Err(EngineError::InvalidScene(_))));
    }

    #[test]
    fn corrupt_json_is_an_error() {
        assert!(matches!(
            SceneFile::from_json("{ \"objects\": [ "),
            Err(EngineError::Json(_))
        ));
    }

    #[test]
    fn capture_keeps_parent_links() {
        let mut manager = GameObjectManager::new();
        let parent = manager.create_cube();
        let child = manager.create_light("lamp", Light::default());
        manager.set_parent(child, Some(parent)).unwrap();
        manager.add_component(child, MeshRenderer::default());

        let file = SceneFile::capture(&Scene::default(), &manager).unwrap();
        assert_eq!(file.objects[1].parent, Some(parent));
        assert_eq!(file.objects[1].components.len(), 2);

        let (_, restored) = file.instantiate().unwrap();
        assert_eq!(restored.get(child).unwrap().transform.parent(), Some(parent));
    }
}
