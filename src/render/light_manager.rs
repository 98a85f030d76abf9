//! Fixed-capacity light buffer rebuilt every frame

use crate::backend::*;
use crate::render::graveyard::{GpuResource, ResourceGraveyard};
use crate::scene::{GameObjectManager, GpuLight, Light};
use glam::Vec3;

/// Number of light records the GPU buffer holds
pub const MAX_LIGHTS: usize = 256;

/// Packs every Light component into one storage buffer
///
/// When the scene holds more lights than the buffer can take, the ones
/// nearest to the camera are kept; ties keep creation order.
pub struct LightManager {
    capacity: usize,
    buffer: Option<BufferHandle>,
    records: Vec<GpuLight>,
    overflow_warned: bool,
}

impl LightManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: None,
            records: Vec::new(),
            overflow_warned: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> u64 {
        (self.capacity * std::mem::size_of::<GpuLight>()) as u64
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Records written by the last upload
    pub fn records(&self) -> &[GpuLight] {
        &self.records
    }

    pub fn count(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn ensure_buffer<B: GraphicsBackend>(&mut self, backend: &mut B) -> BackendResult<BufferHandle> {
        if let Some(buffer) = self.buffer {
            return Ok(buffer);
        }
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Light Buffer".into()),
            size: self.buffer_size(),
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        })?;
        self.buffer = Some(buffer);
        Ok(buffer)
    }

    /// Snapshot all lights in list order, trimmed to capacity
    pub fn collect(&mut self, objects: &GameObjectManager, camera_position: Vec3) -> Vec<GpuLight> {
        let mut lights: Vec<(u64, GpuLight)> = objects
            .iter()
            .filter_map(|o| {
                let light = o.get_component::<Light>()?;
                let position = objects.world_position(o.id())?;
                Some((o.creation_index(), light.to_gpu(position)))
            })
            .collect();

        if lights.len() > self.capacity {
            if !self.overflow_warned {
                log::warn!(
                    "{} lights in scene, keeping the {} nearest the camera",
                    lights.len(),
                    self.capacity
                );
                self.overflow_warned = true;
            }
            lights.sort_by_key(|(order, _)| *order);
            let distance = |l: &GpuLight| Vec3::from_array(l.position).distance_squared(camera_position);
            lights.sort_by(|(_, a), (_, b)| distance(a).total_cmp(&distance(b)));
            lights.truncate(self.capacity);
        } else {
            self.overflow_warned = false;
        }
        lights.into_iter().map(|(_, l)| l).collect()
    }

    /// Rebuild the buffer from the scene and upload it. Returns the light count.
    pub fn upload<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        objects: &GameObjectManager,
        camera_position: Vec3,
    ) -> BackendResult<u32> {
        let buffer = self.ensure_buffer(backend)?;
        self.records = self.collect(objects, camera_position);

        let mut packed = vec![GpuLight::default(); self.capacity];
        packed[..self.records.len()].copy_from_slice(&self.records);
        backend.write_buffer(buffer, 0, bytemuck::cast_slice(&packed));
        log::trace!("Uploaded {} lights", self.records.len());
        Ok(self.count())
    }

    pub fn dispose(&mut self, graveyard: &mut ResourceGraveyard) {
        if let Some(buffer) = self.buffer.take() {
            graveyard.bury(GpuResource::Buffer(buffer));
        }
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(7)]
    #[case(256)]
    fn upload_writes_one_record_per_light(#[case] n: usize) {
        let mut objects = GameObjectManager::new();
        for i in 0..n {
            let id = objects.create_light(
                &format!("light{i}"),
                Light::point(Vec3::new(1.0, 0.5, i as f32 / 256.0), 100.0 + i as f32, 2.0),
            );
            objects.get_mut(id).unwrap().transform.local_position = Vec3::new(i as f32, 1.0, -2.0);
        }
        let mut backend = HeadlessBackend::new(8, 8);
        let mut lights = LightManager::new(MAX_LIGHTS);
        assert_eq!(lights.upload(&mut backend, &objects, Vec3::ZERO).unwrap(), n as u32);

        let data = backend.buffer_data(lights.buffer().unwrap()).unwrap();
        let records: &[GpuLight] = bytemuck::cast_slice(data);
        assert_eq!(records.len(), MAX_LIGHTS);
        for i in 0..n {
            assert_eq!(records[i].position, [i as f32, 1.0, -2.0]);
            assert_eq!(records[i].intensity, (100.0 + i as f32) / 100.0);
            assert_eq!(records[i].color, [1.0, 0.5, i as f32 / 256.0]);
            assert_eq!(records[i].radius, 2.0);
        }
        assert!(records[n..].iter().all(|r| *r == GpuLight::default()));
    }

    #[test]
    fn overflow_keeps_nearest() {
        let mut objects = GameObjectManager::new();
        for i in 0..5 {
            let id = objects.create_light("l", Light::default());
            objects.get_mut(id).unwrap().transform.local_position = Vec3::new(10.0 - i as f32, 0.0, 0.0);
        }
        let mut lights = LightManager::new(2);
        let kept = lights.collect(&objects, Vec3::ZERO);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].position[0], 6.0);
        assert_eq!(kept[1].position[0], 7.0);
    }
}
