//! Components attached to GameObjects
//!
//! Components are a closed set of variants. Each variant is listed once in
//! [`COMPONENT_REGISTRY`], which is how scene files map type names to
//! constructors and field records.

use super::light::{Light, LightRecord};
use super::mesh_renderer::{MeshRenderer, MeshRendererRecord};
use super::ObjectId;
use crate::error::{EngineError, EngineResult};
use crate::render::graveyard::ResourceGraveyard;
use serde::{Deserialize, Serialize};

/// Discriminant of a [`Component`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    MeshRenderer,
    Light,
}

impl ComponentKind {
    /// Name used in scene files
    pub fn type_name(self) -> &'static str {
        registration(self).type_name
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        COMPONENT_REGISTRY
            .iter()
            .find(|r| r.type_name == name)
            .map(|r| r.kind)
    }
}

/// Behavior attached to a GameObject
#[derive(Debug)]
pub enum Component {
    MeshRenderer(MeshRenderer),
    Light(Light),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::MeshRenderer(_) => ComponentKind::MeshRenderer,
            Component::Light(_) => ComponentKind::Light,
        }
    }

    /// Called once, on the first update after the component was attached
    pub fn start(&mut self, owner: ObjectId) {
        log::trace!("Starting {} on {}", self.kind().type_name(), owner);
    }

    /// Called every tick after `start`
    pub fn update(&mut self, _owner: ObjectId, _dt: f32) {}

    /// Teardown hook. GPU handles owned by the component are handed to `graveyard`.
    pub fn on_destroy(&mut self, graveyard: &mut ResourceGraveyard) {
        if let Component::MeshRenderer(renderer) = self {
            renderer.release_gpu(graveyard);
        }
    }

    pub fn to_record(&self) -> EngineResult<ComponentRecord> {
        let registration = registration(self.kind());
        Ok(ComponentRecord {
            type_name: registration.type_name.to_string(),
            fields: (registration.to_fields)(self)?,
        })
    }

    /// Build a component from its record; unknown type names are an error
    pub fn from_record(record: &ComponentRecord) -> EngineResult<Self> {
        let registration = COMPONENT_REGISTRY
            .iter()
            .find(|r| r.type_name == record.type_name)
            .ok_or_else(|| EngineError::UnknownComponent(record.type_name.clone()))?;
        (registration.from_fields)(record.fields.clone())
    }
}

impl From<MeshRenderer> for Component {
    fn from(renderer: MeshRenderer) -> Self {
        Component::MeshRenderer(renderer)
    }
}

impl From<Light> for Component {
    fn from(light: Light) -> Self {
        Component::Light(light)
    }
}

/// Typed access to one [`Component`] variant
pub trait ComponentVariant: Sized {
    const KIND: ComponentKind;

    fn from_component(component: &Component) -> Option<&Self>;
    fn from_component_mut(component: &mut Component) -> Option<&mut Self>;
}

impl ComponentVariant for MeshRenderer {
    const KIND: ComponentKind = ComponentKind::MeshRenderer;

    fn from_component(component: &Component) -> Option<&Self> {
        match component {
            Component::MeshRenderer(r) => Some(r),
            _ => None,
        }
    }

    fn from_component_mut(component: &mut Component) -> Option<&mut Self> {
        match component {
            Component::MeshRenderer(r) => Some(r),
            _ => None,
        }
    }
}

impl ComponentVariant for Light {
    const KIND: ComponentKind = ComponentKind::Light;

    fn from_component(component: &Component) -> Option<&Self> {
        match component {
            Component::Light(l) => Some(l),
            _ => None,
        }
    }

    fn from_component_mut(component: &mut Component) -> Option<&mut Self> {
        match component {
            Component::Light(l) => Some(l),
            _ => None,
        }
    }
}

/// Serialized component: a type name plus its field record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Construction and serialization entry points for one component kind
pub struct ComponentRegistration {
    pub kind: ComponentKind,
    pub type_name: &'static str,
    pub construct: fn() -> Component,
    pub to_fields: fn(&Component) -> EngineResult<serde_json::Value>,
    pub from_fields: fn(serde_json::Value) -> EngineResult<Component>,
}

pub static COMPONENT_REGISTRY: &[ComponentRegistration] = &[
    ComponentRegistration {
        kind: ComponentKind::MeshRenderer,
        type_name: "MeshRenderer",
        construct: default_mesh_renderer,
        to_fields: mesh_renderer_fields,
        from_fields: mesh_renderer_from_fields,
    },
    ComponentRegistration {
        kind: ComponentKind::Light,
        type_name: "Light",
        construct: default_light,
        to_fields: light_fields,
        from_fields: light_from_fields,
    },
];

fn default_mesh_renderer() -> Component {
    Component::MeshRenderer(MeshRenderer::default())
}

fn mesh_renderer_fields(component: &Component) -> EngineResult<serde_json::Value> {
    match component {
        Component::MeshRenderer(r) => Ok(serde_json::to_value(MeshRendererRecord::from(r))?),
        other => Err(EngineError::UnknownComponent(format!("{:?}", other.kind()))),
    }
}

fn mesh_renderer_from_fields(value: serde_json::Value) -> EngineResult<Component> {
    let record: MeshRendererRecord = decode_fields(value)?;
    Ok(Component::MeshRenderer(record.into()))
}

fn default_light() -> Component {
    Component::Light(Light::default())
}

fn light_fields(component: &Component) -> EngineResult<serde_json::Value> {
    match component {
        Component::Light(l) => Ok(serde_json::to_value(LightRecord::from(l))?),
        other => Err(EngineError::UnknownComponent(format!("{:?}", other.kind()))),
    }
}

fn light_from_fields(value: serde_json::Value) -> EngineResult<Component> {
    let record: LightRecord = decode_fields(value)?;
    Ok(Component::Light(record.into()))
}

/// Absent or null fields decode to the record's defaults
fn decode_fields<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> EngineResult<T> {
    let value = if value.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        value
    };
    Ok(serde_json::from_value(value)?)
}

pub fn registration(kind: ComponentKind) -> &'static ComponentRegistration {
    match kind {
        ComponentKind::MeshRenderer => &COMPONENT_REGISTRY[0],
        ComponentKind::Light => &COMPONENT_REGISTRY[1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn registry_is_consistent() {
        for entry in COMPONENT_REGISTRY {
            assert_eq!(registration(entry.kind).type_name, entry.type_name);
            assert_eq!((entry.construct)().kind(), entry.kind);
            assert_eq!(ComponentKind::from_type_name(entry.type_name), Some(entry.kind));
        }
    }

    #[test]
    fn record_keeps_light_fields() {
        let light = Light::point(Vec3::new(0.2, 0.4, 0.6), 42.0, 3.0);
        let record = Component::from(light.clone()).to_record().unwrap();
        assert_eq!(record.type_name, "Light");
        match Component::from_record(&record).unwrap() {
            Component::Light(restored) => assert_eq!(restored, light),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let record = ComponentRecord {
            type_name: "Rigidbody".into(),
            fields: serde_json::Value::Null,
        };
        assert!(matches!(
            Component::from_record(&record),
            Err(EngineError::UnknownComponent(name)) if name == "Rigidbody"
        ));
    }
}
