//! Mesh data, primitive generators, glTF decoding and the mesh cache

use crate::assets::{Asset, AssetDatabase};
use crate::backend::types::Vertex;
use crate::error::{EngineError, EngineResult};
use glam::{Vec2, Vec3, Vec4};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;
use uuid::Uuid;

/// GUID the built-in unit cube resolves from
pub const BUILTIN_CUBE_GUID: Uuid = Uuid::from_u128(0x5cf0_0000_0000_4000_8000_0000_0000_0001);

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Corner positions of the 36 triangle-list vertices of a unit cube, for position-only passes
    pub fn cube_positions() -> Vec<Vec3> {
        let cube = Self::cube();
        cube.indices
            .iter()
            .map(|&i| cube.vertices[i as usize].position)
            .collect()
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        // Define cube vertices with normals and UVs
        let positions = [
            // Front face
            (Vec3::new(-0.5, -0.5, 0.5), Vec3::Z, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.5), Vec3::Z, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, 0.5), Vec3::Z, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, 0.5), Vec3::Z, Vec2::new(0.0, 0.0)),
            // Back face
            (Vec3::new(0.5, -0.5, -0.5), -Vec3::Z, Vec2::new(0.0, 1.0)),
            (Vec3::new(-0.5, -0.5, -0.5), -Vec3::Z, Vec2::new(1.0, 1.0)),
            (Vec3::new(-0.5, 0.5, -0.5), -Vec3::Z, Vec2::new(1.0, 0.0)),
            (Vec3::new(0.5, 0.5, -0.5), -Vec3::Z, Vec2::new(0.0, 0.0)),
            // Right face
            (Vec3::new(0.5, -0.5, 0.5), Vec3::X, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, -0.5), Vec3::X, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, -0.5), Vec3::X, Vec2::new(1.0, 0.0)),
            (Vec3::new(0.5, 0.5, 0.5), Vec3::X, Vec2::new(0.0, 0.0)),
            // Left face
            (Vec3::new(-0.5, -0.5, -0.5), -Vec3::X, Vec2::new(0.0, 1.0)),
            (Vec3::new(-0.5, -0.5, 0.5), -Vec3::X, Vec2::new(1.0, 1.0)),
            (Vec3::new(-0.5, 0.5, 0.5), -Vec3::X, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, -0.5), -Vec3::X, Vec2::new(0.0, 0.0)),
            // Top face
            (Vec3::new(-0.5, 0.5, 0.5), Vec3::Y, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, 0.5, 0.5), Vec3::Y, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, -0.5), Vec3::Y, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, -0.5), Vec3::Y, Vec2::new(0.0, 0.0)),
            // Bottom face
            (Vec3::new(-0.5, -0.5, -0.5), -Vec3::Y, Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, -0.5), -Vec3::Y, Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.5), -Vec3::Y, Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, -0.5, 0.5), -Vec3::Y, Vec2::new(0.0, 0.0)),
        ];

        for (position, normal, uv) in positions {
            // Calculate tangent (pointing along U direction)
            let tangent = if normal.abs().y > 0.9 {
                Vec4::new(1.0, 0.0, 0.0, 1.0)
            } else {
                let right = Vec3::Y.cross(normal).normalize();
                right.extend(1.0)
            };

            mesh.vertices.push(Vertex {
                position,
                normal,
                uv,
                tangent,
            });
        }

        // Define indices (two triangles per face)
        for face in 0..6 {
            let base = face * 4;
            mesh.indices.extend_from_slice(&[
                base,
                base + 1,
                base + 2,
                base,
                base + 2,
                base + 3,
            ]);
        }

        mesh
    }
}

impl Mesh {
    /// Decode every triangle primitive of a glTF/GLB file into one mesh
    ///
    /// Node transforms are not applied; primitives are merged in document order.
    pub fn from_gltf(path: &Path) -> EngineResult<Self> {
        let (document, buffers, _images) = gltf::import(path)?;
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("mesh");
        let mut mesh = Mesh::new(name);

        for primitive in document.meshes().flat_map(|m| m.primitives()) {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!("{}: skipping non-triangle primitive", path.display());
                continue;
            }
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            let positions: Vec<[f32; 3]> = positions.collect();
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|n| n.collect())
                .unwrap_or_default();
            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|t| t.into_f32().collect())
                .unwrap_or_default();
            let tangents: Vec<[f32; 4]> = reader
                .read_tangents()
                .map(|t| t.collect())
                .unwrap_or_default();

            let base = mesh.vertices.len() as u32;
            for (i, position) in positions.iter().enumerate() {
                mesh.vertices.push(Vertex {
                    position: Vec3::from_array(*position),
                    normal: normals.get(i).map_or(Vec3::Y, |n| Vec3::from_array(*n)),
                    uv: uvs.get(i).map_or(Vec2::ZERO, |t| Vec2::from_array(*t)),
                    tangent: tangents
                        .get(i)
                        .map_or(Vec4::new(1.0, 0.0, 0.0, 1.0), |t| Vec4::from_array(*t)),
                });
            }
            match reader.read_indices() {
                Some(indices) => mesh
                    .indices
                    .extend(indices.into_u32().map(|i| base + i)),
                None => mesh.indices.extend(base..base + positions.len() as u32),
            }
        }

        if mesh.vertices.is_empty() {
            return Err(EngineError::AssetNotFound(format!(
                "{} contains no triangle meshes",
                path.display()
            )));
        }
        Ok(mesh)
    }
}

impl Asset for Mesh {
    fn load(path: &Path) -> EngineResult<Self> {
        Mesh::from_gltf(path)
    }
}

/// GUID-keyed mesh cache
#[derive(Default)]
pub struct MeshManager {
    cache: HashMap<Uuid, Rc<Mesh>>,
    missing: HashSet<Uuid>,
}

impl MeshManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a mesh; `None` when the GUID is unknown or the file cannot be decoded
    pub fn get(&mut self, assets: &AssetDatabase, guid: Uuid) -> Option<Rc<Mesh>> {
        if let Some(mesh) = self.cache.get(&guid) {
            return Some(mesh.clone());
        }
        if self.missing.contains(&guid) {
            return None;
        }
        let mesh = if guid == BUILTIN_CUBE_GUID {
            Some(Mesh::cube())
        } else {
            assets.try_load::<Mesh>(guid)
        };
        match mesh {
            Some(mesh) => {
                log::debug!("Loaded mesh {} ({} vertices)", mesh.name, mesh.vertex_count());
                let mesh = Rc::new(mesh);
                self.cache.insert(guid, mesh.clone());
                Some(mesh)
            }
            None => {
                log::warn!("Mesh {} could not be resolved", guid);
                self.missing.insert(guid);
                None
            }
        }
    }

    /// Forget cached entries so the next lookup reads from disk again
    pub fn clear(&mut self) {
        self.cache.clear();
        self.missing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_six_quads() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert_eq!(Mesh::cube_positions().len(), 36);
    }

    #[test]
    fn builtin_cube_resolves_without_assets() {
        let assets = AssetDatabase::new("/nonexistent");
        let mut meshes = MeshManager::new();
        let cube = meshes.get(&assets, BUILTIN_CUBE_GUID).unwrap();
        assert_eq!(cube.name, "cube");
        assert!(meshes.get(&assets, Uuid::new_v4()).is_none());
    }
}
