//! Recording backend for scene tests

use std::collections::HashSet;

use super::backend::{Color, CompositeOp, CompositeRequest, RenderBackend, ResourceHandle};
use super::error::{ResourceCreationError, ResourceKind, SceneError};
use crate::effects::ShaderKind;
use crate::shared::{Geometry, PixelFormat, PixelStorage, Region, WindowId, WindowSnapshot};

pub fn window(id: u32, width: u32, height: u32) -> WindowSnapshot {
    WindowSnapshot::new(
        WindowId(id),
        Geometry::new(0, 0, width, height),
        PixelFormat::new(1, 24, false),
        PixelStorage(id),
    )
}

#[derive(Debug, Clone)]
pub struct RecordedComposite {
    pub op: CompositeOp,
    pub source: ResourceHandle,
    pub mask: Option<ResourceHandle>,
    pub target: ResourceHandle,
    pub scale: f32,
    pub clip: Region,
    pub shader: Option<ShaderKind>,
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    next_id: u32,
    failing: HashSet<PixelStorage>,
    pub shaders: Vec<ShaderKind>,
    pub resources: Vec<(PixelStorage, ResourceHandle)>,
    pub masks: Vec<(u32, u32, f32)>,
    pub buffers: Vec<(u32, u32)>,
    pub released: Vec<ResourceHandle>,
    pub fills: Vec<(ResourceHandle, Color, Region)>,
    pub composites: Vec<RecordedComposite>,
    pub presents: Vec<(ResourceHandle, ResourceHandle, Region)>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn with_shaders(shaders: &[ShaderKind]) -> Self {
        Self {
            shaders: shaders.to_vec(),
            ..Self::new()
        }
    }

    pub fn fail_storage(&mut self, storage: PixelStorage) {
        self.failing.insert(storage);
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    pub fn created_resources(&self) -> usize {
        self.resources.len()
    }

    pub fn created_for(&self, storage: PixelStorage) -> usize {
        self.resources.iter().filter(|(s, _)| *s == storage).count()
    }

    pub fn composited_sources(&self) -> Vec<ResourceHandle> {
        self.composites.iter().map(|c| c.source).collect()
    }

    fn allocate(&mut self) -> ResourceHandle {
        let handle = ResourceHandle(self.next_id);
        self.next_id += 1;
        handle
    }
}

impl RenderBackend for FakeBackend {
    fn create_resource(
        &mut self,
        storage: PixelStorage,
        _format: PixelFormat,
    ) -> Result<ResourceHandle, ResourceCreationError> {
        if self.failing.contains(&storage) {
            return Err(ResourceCreationError::new(ResourceKind::WindowPicture, "window is gone"));
        }
        let handle = self.allocate();
        self.resources.push((storage, handle));
        Ok(handle)
    }

    fn create_mask(
        &mut self,
        width: u32,
        height: u32,
        opacity: f32,
    ) -> Result<ResourceHandle, ResourceCreationError> {
        self.masks.push((width, height, opacity));
        Ok(self.allocate())
    }

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<ResourceHandle, ResourceCreationError> {
        self.buffers.push((width, height));
        Ok(self.allocate())
    }

    fn create_front(&mut self) -> Result<ResourceHandle, ResourceCreationError> {
        Ok(self.allocate())
    }

    fn release_resource(&mut self, handle: ResourceHandle) {
        self.released.push(handle);
    }

    fn fill(&mut self, target: ResourceHandle, color: Color, region: &Region) -> Result<(), SceneError> {
        self.fills.push((target, color, region.clone()));
        Ok(())
    }

    fn composite(&mut self, request: &CompositeRequest<'_>) -> Result<(), SceneError> {
        self.composites.push(RecordedComposite {
            op: request.op,
            source: request.source,
            mask: request.mask,
            target: request.target,
            scale: request.scale,
            clip: request.clip.clone(),
            shader: request.shader,
        });
        Ok(())
    }

    fn present(&mut self, buffer: ResourceHandle, front: ResourceHandle, region: &Region) -> Result<(), SceneError> {
        self.presents.push((buffer, front, region.clone()));
        Ok(())
    }

    fn supports_shader(&self, shader: ShaderKind) -> bool {
        self.shaders.contains(&shader)
    }
}
