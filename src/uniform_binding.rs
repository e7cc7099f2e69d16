//! # Uniform Binding
//!
//! `UniformBinding` owns the single uniform buffer of the renderer together with the bind group
//! layout describing it and the bind group pointing into it.
//!
//! ## Bindings
//!
//! | Binding | Block            | Offset                | Dynamic | Visibility |
//! |---------|------------------|-----------------------|---------|------------|
//! | 0       | `FrameUniforms`  | 0                     | no      | vertex     |
//! | 1       | `ObjectUniforms` | start of record area  | yes     | vertex     |
//!
//! The same [`layout_entries`] feed the bind group layout (and through it the pipeline layout) and
//! decide which entries the bind group carries, so the two cannot drift apart.
//!
//! ## Updating
//!
//! Both blocks are rewritten every frame with queue writes: the frame block once, and one
//! object record per drawn instance at [`UniformLayout::record_offset`].

use std::num::NonZeroU64;

use crate::allocator::{Allocator, GpuBuffer, UniformLayout};
use crate::backend::{BindGroupEntry, BindGroupId, BindGroupLayoutId, DeviceId, GpuBackend, GpuHandle};
use crate::error::InitError;
use crate::uniform_buffer::{FrameUniforms, ObjectUniforms};

pub const FRAME_BINDING: u32 = 0;
pub const OBJECT_BINDING: u32 = 1;

/// Bind group layout entries for the frame block and the dynamic object records.
pub fn layout_entries(layout: &UniformLayout) -> [wgpu::BindGroupLayoutEntry; 2] {
    [
        wgpu::BindGroupLayoutEntry {
            binding: FRAME_BINDING,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(layout.constant_size),
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: OBJECT_BINDING,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(layout.dynamic_size),
            },
            count: None,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBinding {
    pub layout: UniformLayout,
    pub buffer: GpuBuffer,
    pub bind_group_layout: BindGroupLayoutId,
    pub bind_group: BindGroupId,
}

impl UniformBinding {
    pub fn new<B: GpuBackend>(
        backend: &mut B,
        device: DeviceId,
        allocator: &Allocator,
        layout: UniformLayout,
    ) -> Result<Self, InitError> {
        let buffer = allocator.create_buffer(
            backend,
            "Uniform Buffer",
            layout.total_size(),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )?;

        let Some(bind_group_layout) = backend.create_bind_group_layout(
            device,
            Some("Uniform Bind Group Layout"),
            &layout_entries(&layout),
        ) else {
            buffer.release(backend);
            return Err(InitError::ResourceCreation("bind group layout"));
        };

        let entries = [
            BindGroupEntry {
                binding: FRAME_BINDING,
                buffer: buffer.id,
                offset: 0,
                size: layout.constant_size,
            },
            BindGroupEntry {
                binding: OBJECT_BINDING,
                buffer: buffer.id,
                offset: layout.dynamic_region_offset(),
                size: layout.dynamic_size,
            },
        ];
        let Some(bind_group) = backend.create_bind_group(
            device,
            Some("Uniform Bind Group"),
            bind_group_layout,
            &entries,
        ) else {
            backend.release(GpuHandle::BindGroupLayout(bind_group_layout));
            buffer.release(backend);
            return Err(InitError::ResourceCreation("bind group"));
        };

        log::debug!(
            "Uniform buffer: {} bytes, record stride {}",
            layout.total_size(),
            layout.dynamic_stride()
        );
        Ok(Self {
            layout,
            buffer,
            bind_group_layout,
            bind_group,
        })
    }

    pub fn write_frame<B: GpuBackend>(
        &self,
        backend: &mut B,
        allocator: &Allocator,
        uniforms: &FrameUniforms,
    ) {
        allocator.write(backend, &self.buffer, 0, bytemuck::bytes_of(uniforms));
    }

    /// Writes the record of instance `index`. Indices past the reserved records are dropped.
    pub fn write_object<B: GpuBackend>(
        &self,
        backend: &mut B,
        allocator: &Allocator,
        index: u32,
        uniforms: &ObjectUniforms,
    ) {
        if index >= self.layout.max_records {
            log::warn!(
                "Object record {index} is outside the {} reserved records",
                self.layout.max_records
            );
            return;
        }
        allocator.write(
            backend,
            &self.buffer,
            self.layout.record_offset(index),
            bytemuck::bytes_of(uniforms),
        );
    }

    pub fn dynamic_offset(&self, index: u32) -> u32 {
        self.layout.dynamic_offset(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;

    fn binding(backend: &mut RecordingBackend) -> (UniformBinding, Allocator) {
        let (device, queue) = backend.bootstrap_device();
        let allocator = Allocator::new(device, queue);
        let layout = UniformLayout::new(FrameUniforms::SIZE, ObjectUniforms::SIZE, 256, 4);
        let binding = UniformBinding::new(backend, device, &allocator, layout).unwrap();
        (binding, allocator)
    }

    #[test]
    fn test_layout_entry_flags() {
        let layout = UniformLayout::new(144, 80, 256, 2);
        let [frame, object] = layout_entries(&layout);
        assert_eq!(frame.binding, 0);
        assert_eq!(object.binding, 1);
        assert!(matches!(
            frame.ty,
            wgpu::BindingType::Buffer {
                has_dynamic_offset: false,
                ..
            }
        ));
        assert!(matches!(
            object.ty,
            wgpu::BindingType::Buffer {
                has_dynamic_offset: true,
                ..
            }
        ));
        assert_eq!(frame.visibility, wgpu::ShaderStages::VERTEX);
        assert_eq!(object.visibility, wgpu::ShaderStages::VERTEX);
    }

    #[test]
    fn test_bind_group_matches_layout() {
        let mut backend = RecordingBackend::default();
        let (binding, _) = binding(&mut backend);

        let declared = backend
            .bind_group_layout_entries(binding.bind_group_layout)
            .unwrap()
            .to_vec();
        let bound = backend.bind_group_entries(binding.bind_group).unwrap();
        assert_eq!(declared.len(), bound.len());
        for (declared, bound) in declared.iter().zip(bound) {
            assert_eq!(declared.binding, bound.binding);
        }
        assert_eq!(bound[1].offset, 256);
        assert_eq!(backend.buffer_size(binding.buffer.id), Some(256 + 256 * 4));
        assert!(backend.errors().is_empty());
    }

    #[test]
    fn test_object_records_land_at_stride() {
        let mut backend = RecordingBackend::default();
        let (binding, allocator) = binding(&mut backend);

        let uniforms = ObjectUniforms {
            color: nalgebra_glm::vec4(0.25, 0.5, 0.75, 1.0),
            ..Default::default()
        };
        binding.write_object(&mut backend, &allocator, 2, &uniforms);

        let contents = backend.buffer_contents(binding.buffer.id).unwrap();
        let start = (256 + 2 * 256) as usize;
        assert_eq!(
            &contents[start..start + 80],
            bytemuck::bytes_of(&uniforms)
        );
    }

    #[test]
    fn test_out_of_range_record_is_dropped() {
        let mut backend = RecordingBackend::default();
        let (binding, allocator) = binding(&mut backend);
        backend.clear_calls();

        binding.write_object(&mut backend, &allocator, 4, &ObjectUniforms::default());

        assert!(backend.calls().is_empty());
    }
}
