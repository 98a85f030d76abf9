//! Texture decoding, GPU upload and the path-keyed texture cache

use crate::assets::Asset;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::EngineResult;
use crate::render::graveyard::{GpuResource, ResourceGraveyard};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// How the texels of a color texture are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

impl ColorSpace {
    pub fn format(self) -> TextureFormat {
        match self {
            ColorSpace::Srgb => TextureFormat::Rgba8UnormSrgb,
            ColorSpace::Linear => TextureFormat::Rgba8Unorm,
        }
    }
}

/// Solid 1x1 textures used when a reference is absent or unreadable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTexture {
    White,
    Grey,
    Black,
    FlatNormal,
}

impl BuiltinTexture {
    pub fn texel(self) -> [u8; 4] {
        match self {
            BuiltinTexture::White => [255, 255, 255, 255],
            BuiltinTexture::Grey => [128, 128, 128, 255],
            BuiltinTexture::Black => [0, 0, 0, 255],
            // tangent-space +Z
            BuiltinTexture::FlatNormal => [128, 128, 255, 255],
        }
    }

    fn name(self) -> &'static str {
        match self {
            BuiltinTexture::White => "builtin_white",
            BuiltinTexture::Grey => "builtin_grey",
            BuiltinTexture::Black => "builtin_black",
            BuiltinTexture::FlatNormal => "builtin_flat_normal",
        }
    }
}

/// Loaded texture data
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

impl TextureData {
    /// Decode an LDR image as 8-bit RGBA in the given color space
    pub fn from_file(path: &Path, color_space: ColorSpace) -> EngineResult<Self> {
        let img = image::open(path)?;
        Ok(Self::from_image(img, &file_name(path), color_space))
    }

    /// Load texture from bytes
    pub fn from_bytes(bytes: &[u8], name: &str, color_space: ColorSpace) -> EngineResult<Self> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img, name, color_space))
    }

    fn from_image(img: DynamicImage, name: &str, color_space: ColorSpace) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: color_space.format(),
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// Decode a (typically equirectangular HDR) image as 32-bit float RGBA
    pub fn from_hdr_file(path: &Path) -> EngineResult<Self> {
        let img = image::open(path)?;
        let (width, height) = img.dimensions();
        let texels = img.to_rgba32f().into_raw();
        Ok(Self {
            width,
            height,
            format: TextureFormat::Rgba32Float,
            data: bytemuck::cast_slice(&texels).to_vec(),
            name: file_name(path),
        })
    }

    pub fn solid_color(color: [u8; 4], name: &str, format: TextureFormat) -> Self {
        Self {
            width: 1,
            height: 1,
            format,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Built-ins are linear so grey samples as 0.5 in every slot
    pub fn builtin(kind: BuiltinTexture) -> Self {
        Self::solid_color(kind.texel(), kind.name(), TextureFormat::Rgba8Unorm)
    }
}

impl Asset for TextureData {
    fn load(path: &Path) -> EngineResult<Self> {
        TextureData::from_file(path, ColorSpace::Srgb)
    }
}

/// Texture uploaded to the GPU, with its default view
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub name: String,
}

impl GpuTexture {
    /// Create and upload texture to GPU
    pub fn create<B: GraphicsBackend>(backend: &mut B, data: &TextureData) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            mip_levels: 1,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;

        let view = backend.create_texture_view(handle)?;
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self {
            handle,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
            name: data.name.clone(),
        })
    }

    pub fn release(&self, graveyard: &mut ResourceGraveyard) {
        graveyard.bury(GpuResource::TextureView(self.view));
        graveyard.bury(GpuResource::Texture(self.handle));
    }
}

/// Resolve-and-cache map from (path, color space) to GPU textures
///
/// Paths are canonicalized when they exist so different spellings share an
/// entry. Unreadable files resolve to the caller's fallback and warn once; they
/// are read again once the file appears or its modification time changes.
#[derive(Default)]
pub struct TextureManager {
    cache: HashMap<(PathBuf, ColorSpace), GpuTexture>,
    environments: HashMap<PathBuf, GpuTexture>,
    builtins: HashMap<BuiltinTexture, GpuTexture>,
    failed: HashMap<PathBuf, Option<SystemTime>>,
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl TextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        kind: BuiltinTexture,
    ) -> BackendResult<GpuTexture> {
        if let Some(texture) = self.builtins.get(&kind) {
            return Ok(texture.clone());
        }
        let texture = GpuTexture::create(backend, &TextureData::builtin(kind))?;
        self.builtins.insert(kind, texture.clone());
        Ok(texture)
    }

    /// Texture at `path`, or the `fallback` built-in when it is absent or unreadable
    pub fn get_or<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        path: Option<&Path>,
        color_space: ColorSpace,
        fallback: BuiltinTexture,
    ) -> BackendResult<GpuTexture> {
        let Some(path) = path else {
            return self.builtin(backend, fallback);
        };
        let key = (canonical(path), color_space);
        if let Some(texture) = self.cache.get(&key) {
            return Ok(texture.clone());
        }
        if self.still_failing(&key.0) {
            return self.builtin(backend, fallback);
        }
        match TextureData::from_file(&key.0, color_space) {
            Ok(data) => {
                log::debug!("Loaded texture {} ({}x{})", key.0.display(), data.width, data.height);
                self.failed.remove(&key.0);
                let texture = GpuTexture::create(backend, &data)?;
                self.cache.insert(key, texture.clone());
                Ok(texture)
            }
            Err(e) => {
                if self.mark_failed(&key.0) {
                    log::warn!("Texture {} unavailable ({}), using {:?}", key.0.display(), e, fallback);
                }
                self.builtin(backend, fallback)
            }
        }
    }

    /// Float environment map, `None` when the file cannot be decoded
    pub fn environment<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        path: &Path,
    ) -> BackendResult<Option<GpuTexture>> {
        let key = canonical(path);
        if let Some(texture) = self.environments.get(&key) {
            return Ok(Some(texture.clone()));
        }
        if self.still_failing(&key) {
            return Ok(None);
        }
        match TextureData::from_hdr_file(&key) {
            Ok(data) => {
                log::info!("Loaded environment {} ({}x{})", key.display(), data.width, data.height);
                self.failed.remove(&key);
                let texture = GpuTexture::create(backend, &data)?;
                self.environments.insert(key, texture.clone());
                Ok(Some(texture))
            }
            Err(e) => {
                if self.mark_failed(&key) {
                    log::warn!("Environment map {} unavailable: {}", key.display(), e);
                }
                Ok(None)
            }
        }
    }

    /// A failed path stays on its fallback until the file on disk changes
    fn still_failing(&self, path: &Path) -> bool {
        self.failed
            .get(path)
            .is_some_and(|stamp| *stamp == modified(path))
    }

    /// Remember a failed read. Returns true the first time a path fails.
    fn mark_failed(&mut self, path: &Path) -> bool {
        self.failed.insert(path.to_path_buf(), modified(path)).is_none()
    }

    /// Forget everything cached for `path` so the next lookup reads it again.
    /// The GPU objects go to `graveyard`.
    pub fn invalidate(&mut self, path: &Path, graveyard: &mut ResourceGraveyard) {
        let key = canonical(path);
        self.failed.remove(&key);
        self.failed.remove(path);
        self.cache.retain(|(cached, _), texture| {
            let keep = *cached != key;
            if !keep {
                texture.release(graveyard);
            }
            keep
        });
        if let Some(texture) = self.environments.remove(&key) {
            texture.release(graveyard);
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len() + self.environments.len()
    }

    /// Drop every cached texture, handing the GPU objects to `graveyard`
    pub fn dispose(&mut self, graveyard: &mut ResourceGraveyard) {
        for texture in self
            .cache
            .values()
            .chain(self.environments.values())
            .chain(self.builtins.values())
        {
            texture.release(graveyard);
        }
        self.cache.clear();
        self.environments.clear();
        self.builtins.clear();
        self.failed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn missing_file_falls_back_once() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut textures = TextureManager::new();
        let white = textures.builtin(&mut backend, BuiltinTexture::White).unwrap();
        let first = textures
            .get_or(
                &mut backend,
                Some(Path::new("/no/such/texture.png")),
                ColorSpace::Srgb,
                BuiltinTexture::White,
            )
            .unwrap();
        assert_eq!(first.view, white.view);
        assert_eq!(backend.texture_data(first.handle).unwrap(), &[255, 255, 255, 255]);
        assert_eq!(textures.cached_count(), 0);
    }

    #[test]
    fn texture_imported_after_a_miss_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.png");
        let mut backend = HeadlessBackend::new(4, 4);
        let mut textures = TextureManager::new();

        let missing = textures
            .get_or(&mut backend, Some(&path), ColorSpace::Linear, BuiltinTexture::Grey)
            .unwrap();
        assert_eq!((missing.width, missing.height), (1, 1));

        image::RgbaImage::from_pixel(4, 2, image::Rgba([200, 100, 50, 255]))
            .save(&path)
            .unwrap();
        let loaded = textures
            .get_or(&mut backend, Some(&path), ColorSpace::Linear, BuiltinTexture::Grey)
            .unwrap();
        assert_eq!((loaded.width, loaded.height), (4, 2));
        assert_eq!(textures.cached_count(), 1);
    }

    #[test]
    fn invalidate_rereads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("albedo.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        let mut backend = HeadlessBackend::new(4, 4);
        let mut textures = TextureManager::new();
        let mut graveyard = ResourceGraveyard::new();

        let first = textures
            .get_or(&mut backend, Some(&path), ColorSpace::Linear, BuiltinTexture::White)
            .unwrap();
        image::RgbaImage::from_pixel(8, 8, image::Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();
        textures.invalidate(&path, &mut graveyard);
        assert_eq!(textures.cached_count(), 0);
        assert!(!graveyard.is_empty());

        let second = textures
            .get_or(&mut backend, Some(&path), ColorSpace::Linear, BuiltinTexture::White)
            .unwrap();
        assert_ne!(first.handle, second.handle);
        assert_eq!((second.width, second.height), (8, 8));
    }

    #[test]
    fn color_space_selects_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let mut backend = HeadlessBackend::new(4, 4);
        let mut textures = TextureManager::new();
        let srgb = textures
            .get_or(&mut backend, Some(&path), ColorSpace::Srgb, BuiltinTexture::White)
            .unwrap();
        let linear = textures
            .get_or(&mut backend, Some(&path), ColorSpace::Linear, BuiltinTexture::White)
            .unwrap();
        assert_eq!(srgb.format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(linear.format, TextureFormat::Rgba8Unorm);
        assert_ne!(srgb.handle, linear.handle);
        assert_eq!(textures.cached_count(), 2);

        let mut graveyard = ResourceGraveyard::new();
        textures.dispose(&mut graveyard);
        graveyard.release(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn builtins_are_linear() {
        let data = TextureData::builtin(BuiltinTexture::FlatNormal);
        assert_eq!(data.data, vec![128, 128, 255, 255]);
        assert_eq!(data.format, TextureFormat::Rgba8Unorm);
    }
}
