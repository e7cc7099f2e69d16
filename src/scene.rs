//! # Scene
//!
//! The `Scene` knows what is drawn: the camera, the object instances and how each instance
//! moves over time. It does not own GPU objects itself; the mesh lives in [`MeshBuffers`] and the
//! uniforms in a [`UniformBinding`], both owned by the renderer.
//!
//! Each frame the scene:
//!
//! 1. writes the frame block (camera and time) once,
//! 2. writes one object record per instance at that instance's record offset,
//! 3. records the draw commands, binding the uniform bind group with the instance's dynamic
//!    offset before each indexed draw.
//!
//! Every record is rewritten every frame. Nothing tracks which instances changed.

use nalgebra_glm as glm;

use crate::allocator::{Allocator, GpuBuffer};
use crate::backend::{GpuBackend, RenderCommand, RenderPipelineId};
use crate::error::InitError;
use crate::math;
use crate::mesh::Mesh;
use crate::settings::{InstanceSettings, Settings};
use crate::uniform_binding::UniformBinding;
use crate::uniform_buffer::{FrameUniforms, ObjectUniforms};

/// Radians per second each instance turns around its vertical axis.
pub const SPIN_RATE: f32 = 0.5;

/// Vertex and index buffers of the uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vertex: GpuBuffer,
    pub index: GpuBuffer,
    pub index_format: wgpu::IndexFormat,
    pub index_count: u32,
}

impl MeshBuffers {
    /// Uploads `mesh` through staging buffers.
    pub fn upload<B: GpuBackend>(
        backend: &mut B,
        allocator: &Allocator,
        mesh: &Mesh,
    ) -> Result<Self, InitError> {
        let vertex = allocator.create_buffer_init(
            backend,
            "Vertex Buffer",
            mesh.vertex_bytes(),
            wgpu::BufferUsages::VERTEX,
        )?;
        let index = match allocator.create_buffer_init(
            backend,
            "Index Buffer",
            mesh.index_bytes(),
            wgpu::BufferUsages::INDEX,
        ) {
            Ok(index) => index,
            Err(err) => {
                vertex.release(backend);
                return Err(err);
            }
        };
        Ok(Self {
            vertex,
            index,
            index_format: mesh.index_format(),
            index_count: mesh.index_count(),
        })
    }
}

pub struct Scene {
    pub projection: glm::Mat4,
    pub view: glm::Mat4,
    pub instances: Vec<InstanceSettings>,
}

impl Scene {
    pub fn new(settings: &Settings) -> Self {
        Self {
            projection: math::projection(settings.width, settings.height),
            view: math::view(),
            instances: settings.instances.clone(),
        }
    }

    pub fn frame_uniforms(&self, time: f32) -> FrameUniforms {
        FrameUniforms {
            projection: self.projection,
            view: self.view,
            time,
            ..Default::default()
        }
    }

    pub fn object_uniforms(&self, instance: &InstanceSettings, time: f32) -> ObjectUniforms {
        ObjectUniforms {
            model: instance.model(time * SPIN_RATE),
            color: instance.color,
        }
    }

    /// Rewrites the frame block and every instance record.
    pub fn update<B: GpuBackend>(
        &self,
        backend: &mut B,
        allocator: &Allocator,
        uniforms: &UniformBinding,
        time: f32,
    ) {
        uniforms.write_frame(backend, allocator, &self.frame_uniforms(time));
        for (index, instance) in self.instances.iter().enumerate() {
            uniforms.write_object(
                backend,
                allocator,
                index as u32,
                &self.object_uniforms(instance, time),
            );
        }
    }

    /// Draw commands for one frame: shared state once, then a bind and a draw per instance.
    pub fn record(
        &self,
        pipeline: RenderPipelineId,
        mesh: &MeshBuffers,
        uniforms: &UniformBinding,
    ) -> Vec<RenderCommand> {
        let mut commands = vec![
            RenderCommand::SetPipeline(pipeline),
            RenderCommand::SetVertexBuffer {
                slot: 0,
                buffer: mesh.vertex.id,
            },
            RenderCommand::SetIndexBuffer {
                buffer: mesh.index.id,
                format: mesh.index_format,
            },
        ];
        for index in 0..self.instances.len() as u32 {
            commands.push(RenderCommand::SetBindGroup {
                index: 0,
                bind_group: uniforms.bind_group,
                dynamic_offsets: vec![uniforms.dynamic_offset(index)],
            });
            commands.push(RenderCommand::DrawIndexed {
                indices: 0..mesh.index_count,
                base_vertex: 0,
                instances: 0..1,
            });
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;

    #[test]
    fn test_pyramid_upload_sizes() {
        let mut backend = RecordingBackend::default();
        let (device, queue) = backend.bootstrap_device();
        let allocator = Allocator::new(device, queue);

        let mesh = MeshBuffers::upload(&mut backend, &allocator, &Mesh::pyramid()).unwrap();

        assert_eq!(backend.buffer_size(mesh.vertex.id), Some(120));
        assert_eq!(backend.buffer_size(mesh.index.id), Some(36));
        assert_eq!(mesh.index_format, wgpu::IndexFormat::Uint16);
        assert_eq!(mesh.index_count, 18);
    }

    #[test]
    fn test_instances_start_at_their_translation() {
        let scene = Scene::new(&Settings::default());
        let first = scene.object_uniforms(&scene.instances[0], 0.0);
        assert_eq!(
            first.model,
            glm::translation(&glm::vec3(-0.5, -0.5, -0.25))
        );
        let second = scene.object_uniforms(&scene.instances[1], 0.0);
        assert_eq!(
            second.model,
            glm::translation(&glm::vec3(0.5, 0.5, -0.25))
        );
    }

    #[test]
    fn test_frame_uniforms_carry_time() {
        let scene = Scene::new(&Settings::default());
        assert_eq!(scene.frame_uniforms(1.5).time, 1.5);
    }
}
