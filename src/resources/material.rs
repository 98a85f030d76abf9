//! Materials: texture references, UV transform and the material cache

use super::texture::ColorSpace;
use crate::assets::{Asset, AssetDatabase};
use crate::error::EngineResult;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use uuid::Uuid;

/// Color space tag for each texture channel of a material
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaterialColorSpaces {
    pub diffuse: ColorSpace,
    pub specular: ColorSpace,
    pub metallic_roughness: ColorSpace,
    pub ao: ColorSpace,
    pub normal: ColorSpace,
}

impl Default for MaterialColorSpaces {
    fn default() -> Self {
        Self {
            diffuse: ColorSpace::Srgb,
            specular: ColorSpace::Srgb,
            metallic_roughness: ColorSpace::Linear,
            ao: ColorSpace::Linear,
            normal: ColorSpace::Linear,
        }
    }
}

/// Surface description referenced by MeshRenderers
///
/// Texture references are asset-root-relative paths. A `None` reference binds
/// the matching built-in texture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Material {
    pub diffuse_tex: Option<String>,
    /// Kept for the inspector; the forward shader has no specular slot
    pub specular_tex: Option<String>,
    pub metallic_roughness_tex: Option<String>,
    pub metallic_tex: Option<String>,
    pub roughness_tex: Option<String>,
    pub ao_tex: Option<String>,
    pub normal_tex: Option<String>,
    pub uv_tiling: Vec2,
    pub uv_offset: Vec2,
    pub color_spaces: MaterialColorSpaces,
    /// Sample metallic (B) and roughness (G) from `metallic_roughness_tex`
    #[serde(rename = "useCombinedMR")]
    pub use_combined_mr: bool,
    /// File the material was read from; `None` for the default material
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse_tex: None,
            specular_tex: None,
            metallic_roughness_tex: None,
            metallic_tex: None,
            roughness_tex: None,
            ao_tex: None,
            normal_tex: None,
            uv_tiling: Vec2::ONE,
            uv_offset: Vec2::ZERO,
            color_spaces: MaterialColorSpaces::default(),
            use_combined_mr: false,
            source: None,
        }
    }
}

impl Material {
    pub fn load_file(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut material: Material = serde_json::from_str(&text)?;
        material.source = Some(path.to_path_buf());
        Ok(material)
    }

    pub fn save_file(&self, path: &Path) -> EngineResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Cache key used by the renderer for this material's bind group
    pub fn cache_key(&self) -> String {
        self.source
            .as_ref()
            .map_or_else(|| "<default>".to_string(), |p| p.display().to_string())
    }
}

impl Asset for Material {
    fn load(path: &Path) -> EngineResult<Self> {
        Material::load_file(path)
    }
}

/// Resolve-and-cache map from material files to shared [`Material`]s
pub struct MaterialManager {
    cache: HashMap<PathBuf, Rc<Material>>,
    default: Rc<Material>,
    warned: HashSet<String>,
}

impl Default for MaterialManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialManager {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            default: Rc::new(Material::default()),
            warned: HashSet::new(),
        }
    }

    pub fn default_material(&self) -> Rc<Material> {
        self.default.clone()
    }

    fn warn_once(&mut self, key: String, message: impl FnOnce() -> String) {
        if self.warned.insert(key) {
            log::warn!("{}", message());
        }
    }

    /// Material behind `guid`; the default material when unset or unresolvable
    pub fn get(&mut self, assets: &AssetDatabase, guid: Option<Uuid>) -> Rc<Material> {
        let Some(guid) = guid else {
            return self.default_material();
        };
        match assets.path_for_guid(guid) {
            Some(path) => self.get_by_path(path),
            None => {
                self.warn_once(guid.to_string(), || {
                    format!("Unknown material GUID {}, using default material", guid)
                });
                self.default_material()
            }
        }
    }

    /// Material file at `path`; the default material when it cannot be read
    pub fn get_by_path(&mut self, path: &Path) -> Rc<Material> {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(material) = self.cache.get(&key) {
            return material.clone();
        }
        match Material::load_file(&key) {
            Ok(material) => {
                log::debug!("Loaded material {}", key.display());
                let material = Rc::new(material);
                self.cache.insert(key, material.clone());
                material
            }
            Err(e) => {
                self.warn_once(key.display().to_string(), || {
                    format!("Material {} unavailable ({}), using default", key.display(), e)
                });
                self.default_material()
            }
        }
    }

    /// Write `material` to `path` and refresh the cached entry
    pub fn save(&mut self, path: &Path, material: &Material) -> EngineResult<Rc<Material>> {
        material.save_file(path)?;
        let key = std::fs::canonicalize(path)?;
        let mut stored = material.clone();
        stored.source = Some(key.clone());
        let stored = Rc::new(stored);
        self.cache.insert(key, stored.clone());
        self.warned.clear();
        Ok(stored)
    }

    /// Forget a cached file so the next lookup reads it again
    pub fn invalidate(&mut self, path: &Path) {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.cache.remove(&key);
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn unknown_guid_returns_default_instance() {
        let assets = AssetDatabase::new("/nonexistent");
        let mut materials = MaterialManager::new();
        let resolved = materials.get(&assets, Some(Uuid::new_v4()));
        assert!(Rc::ptr_eq(&resolved, &materials.default_material()));
        assert!(Rc::ptr_eq(
            &materials.get(&assets, None),
            &materials.default_material()
        ));
    }

    #[test]
    fn file_is_cached_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brick.mat.json");
        std::fs::write(
            &path,
            r#"{ "diffuseTex": "Textures/brick.png", "uvTiling": [2, 3], "useCombinedMR": true }"#,
        )
        .unwrap();

        let assets = AssetDatabase::scan(dir.path()).unwrap();
        let guid = assets.guid_for_path(&path).unwrap();
        let mut materials = MaterialManager::new();
        let first = materials.get(&assets, Some(guid));
        let second = materials.get_by_path(&path);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.diffuse_tex.as_deref(), Some("Textures/brick.png"));
        assert_eq!(first.uv_tiling, Vec2::new(2.0, 3.0));
        assert!(first.use_combined_mr);
        assert_eq!(first.color_spaces.normal, ColorSpace::Linear);
    }

    #[test]
    fn corrupt_file_errors_on_direct_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mat.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Material::load_file(&path), Err(EngineError::Json(_))));

        let mut materials = MaterialManager::new();
        assert!(Rc::ptr_eq(
            &materials.get_by_path(&path),
            &materials.default_material()
        ));
    }

    #[test]
    fn save_refreshes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.mat.json");
        let mut materials = MaterialManager::new();
        let mut material = Material::default();
        material.normal_tex = Some("n.png".into());
        materials.save(&path, &material).unwrap();

        let loaded = materials.get_by_path(&path);
        assert_eq!(loaded.normal_tex.as_deref(), Some("n.png"));
        assert_eq!(Material::load_file(&path).unwrap().normal_tex, loaded.normal_tex);
    }
}
