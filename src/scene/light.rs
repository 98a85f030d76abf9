//! Light component

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Light kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightType {
    #[default]
    Point,
    Directional,
}

/// Light component
/// Position and direction come from the owning GameObject's world transform
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub light_type: LightType,
    pub color: Vec3,
    /// Editor-facing intensity; the GPU record stores `intensity / 100`
    pub intensity: f32,
    pub radius: f32,
    pub specular_strength: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            light_type: LightType::Point,
            color: Vec3::ONE,
            intensity: 100.0,
            radius: 10.0,
            specular_strength: 0.5,
        }
    }
}

impl Light {
    pub fn point(color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            light_type: LightType::Point,
            color,
            intensity,
            radius,
            ..Default::default()
        }
    }

    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn is_directional(&self) -> bool {
        self.light_type == LightType::Directional
    }

    /// Direction the light shines in, given the owner's world rotation
    pub fn direction(world_rotation: Quat) -> Vec3 {
        super::transform::forward(world_rotation)
    }

    /// Convert to the packed GPU record
    pub fn to_gpu(&self, world_position: Vec3) -> GpuLight {
        GpuLight {
            position: world_position.to_array(),
            intensity: self.intensity / 100.0,
            color: self.color.to_array(),
            radius: self.radius,
        }
    }
}

/// Packed light record, 32 bytes, matching the WGSL `Light` struct
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    pub radius: f32,
}

/// Serialized field subset of a [`Light`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LightRecord {
    #[serde(rename = "type")]
    pub light_type: LightType,
    pub color: [f32; 3],
    pub intensity: f32,
    pub radius: f32,
    pub specular_strength: f32,
}

impl Default for LightRecord {
    fn default() -> Self {
        LightRecord::from(&Light::default())
    }
}

impl From<&Light> for LightRecord {
    fn from(light: &Light) -> Self {
        Self {
            light_type: light.light_type,
            color: light.color.to_array(),
            intensity: light.intensity,
            radius: light.radius,
            specular_strength: light.specular_strength,
        }
    }
}

impl From<LightRecord> for Light {
    fn from(record: LightRecord) -> Self {
        Self {
            light_type: record.light_type,
            color: Vec3::from_array(record.color),
            intensity: record.intensity,
            radius: record.radius,
            specular_strength: record.specular_strength,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_record_scales_intensity() {
        let light = Light::point(Vec3::new(1.0, 0.5, 0.25), 250.0, 4.0);
        let gpu = light.to_gpu(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(gpu.position, [1.0, 2.0, 3.0]);
        assert_eq!(gpu.intensity, 2.5);
        assert_eq!(gpu.color, [1.0, 0.5, 0.25]);
        assert_eq!(gpu.radius, 4.0);
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
    }

    #[test]
    fn record_fills_missing_fields() {
        let record: LightRecord = serde_json::from_str(r#"{"type":"Directional"}"#).unwrap();
        let light = Light::from(record);
        assert!(light.is_directional());
        assert_eq!(light.intensity, 100.0);
    }
}
