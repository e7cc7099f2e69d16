//! # Pipeline Builder
//!
//! Assembles the render pipeline the scene draws with, and the depth target paired with it.
//!
//! [`PipelineBuilder::build`] runs these steps, and gives up on the first one the backend
//! refuses:
//!
//! 1. compile the WGSL shader module,
//! 2. combine the bind group layouts into a pipeline layout,
//! 3. create the pipeline with a triangle list, counter-clockwise front faces, a
//!    `Less`-compared and written depth buffer, opaque `REPLACE` blending and one sample per
//!    pixel.
//!
//! Objects created before a failing step are released before the error is returned.

use crate::backend::{
    BindGroupLayoutId, DepthAttachment, DeviceId, GpuBackend, GpuHandle, PipelineLayoutId,
    RenderPipelineDescriptor, RenderPipelineId, ShaderModuleDescriptor, ShaderModuleId,
    TextureDescriptor, TextureId, TextureViewDescriptor, TextureViewId, VertexBufferLayout,
};
use crate::error::InitError;

/// Depth buffer format used unless configured otherwise.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Objects making up a built pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineObjects {
    pub shader: ShaderModuleId,
    pub layout: PipelineLayoutId,
    pub pipeline: RenderPipelineId,
}

/// Description of the render pipeline to build.
#[derive(Debug, Clone)]
pub struct PipelineBuilder<'a> {
    pub label: &'a str,
    pub shader_source: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub vertex_layout: VertexBufferLayout,
    pub bind_group_layouts: &'a [BindGroupLayoutId],
    pub color_format: wgpu::TextureFormat,
    pub depth_format: wgpu::TextureFormat,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(
        shader_source: &'a str,
        vertex_layout: VertexBufferLayout,
        bind_group_layouts: &'a [BindGroupLayoutId],
        color_format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            label: "Render Pipeline",
            shader_source,
            vertex_entry: "vertex_main",
            fragment_entry: "fragment_main",
            vertex_layout,
            bind_group_layouts,
            color_format,
            depth_format: DEPTH_FORMAT,
        }
    }

    pub fn with_depth_format(mut self, depth_format: wgpu::TextureFormat) -> Self {
        self.depth_format = depth_format;
        self
    }

    pub fn build<B: GpuBackend>(
        &self,
        backend: &mut B,
        device: DeviceId,
    ) -> Result<PipelineObjects, InitError> {
        let shader = backend
            .create_shader_module(
                device,
                &ShaderModuleDescriptor {
                    label: Some("Shader Module"),
                    wgsl_source: self.shader_source,
                },
            )
            .ok_or_else(|| {
                InitError::ShaderCompilation(format!("{} failed to compile", self.label))
            })?;

        let Some(layout) =
            backend.create_pipeline_layout(device, Some("Pipeline Layout"), self.bind_group_layouts)
        else {
            backend.release(GpuHandle::ShaderModule(shader));
            return Err(InitError::ResourceCreation("pipeline layout"));
        };

        let vertex_buffers = [self.vertex_layout.clone()];
        let color_targets = [wgpu::ColorTargetState {
            format: self.color_format,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        }];
        let descriptor = RenderPipelineDescriptor {
            label: Some(self.label),
            layout,
            shader,
            vertex_entry: self.vertex_entry,
            fragment_entry: self.fragment_entry,
            vertex_buffers: &vertex_buffers,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // Loaded meshes do not promise a consistent winding.
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: self.depth_format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                // Zero masks: the stencil aspect, when present, is never read or written.
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            color_targets: &color_targets,
        };

        let Some(pipeline) = backend.create_render_pipeline(device, &descriptor) else {
            backend.release(GpuHandle::PipelineLayout(layout));
            backend.release(GpuHandle::ShaderModule(shader));
            return Err(InitError::PipelineCreation);
        };
        log::info!("Render pipeline: {pipeline:?}");

        Ok(PipelineObjects {
            shader,
            layout,
            pipeline,
        })
    }
}

/// Depth texture and its view, sized to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthTarget {
    pub texture: TextureId,
    pub view: TextureViewId,
    pub format: wgpu::TextureFormat,
}

impl DepthTarget {
    pub fn new<B: GpuBackend>(
        backend: &mut B,
        device: DeviceId,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<Self, InitError> {
        let texture = backend
            .create_texture(
                device,
                &TextureDescriptor {
                    label: Some("Depth Texture"),
                    width,
                    height,
                    format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                },
            )
            .ok_or(InitError::ResourceCreation("depth texture"))?;
        let Some(view) = backend.create_texture_view(
            texture,
            &TextureViewDescriptor {
                label: Some("Depth Texture View"),
                format: Some(format),
                aspect: wgpu::TextureAspect::All,
            },
        ) else {
            backend.release(GpuHandle::Texture(texture));
            return Err(InitError::ResourceCreation("depth texture view"));
        };
        Ok(Self {
            texture,
            view,
            format,
        })
    }

    /// Clears depth to the far plane; clears the stencil only when the format has one.
    pub fn attachment(&self) -> DepthAttachment {
        DepthAttachment {
            view: self.view,
            clear_depth: 1.0,
            clear_stencil: self.format.has_stencil_aspect().then_some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordingBackend, RecordingConfig};
    use crate::vertex::Vertex;

    const SHADER: &str = "fn vertex_main() {} fn fragment_main() {}";

    fn layout(backend: &mut RecordingBackend, device: DeviceId) -> BindGroupLayoutId {
        backend
            .create_bind_group_layout(device, Some("Test Layout"), &[])
            .unwrap()
    }

    #[test]
    fn test_build_creates_all_objects() {
        let mut backend = RecordingBackend::default();
        let (device, _) = backend.bootstrap_device();
        let layouts = [layout(&mut backend, device)];

        let objects = PipelineBuilder::new(
            SHADER,
            Vertex::layout(),
            &layouts,
            wgpu::TextureFormat::Bgra8Unorm,
        )
        .build(&mut backend, device)
        .unwrap();

        assert!(backend.is_live(GpuHandle::RenderPipeline(objects.pipeline)));
        assert!(backend.is_live(GpuHandle::PipelineLayout(objects.layout)));
        assert!(backend.is_live(GpuHandle::ShaderModule(objects.shader)));
    }

    #[test]
    fn test_shader_failure_is_fatal() {
        let mut backend = RecordingBackend::new(RecordingConfig {
            shader_error_marker: Some("broken".to_string()),
            ..Default::default()
        });
        let (device, _) = backend.bootstrap_device();
        let layouts = [layout(&mut backend, device)];

        let result = PipelineBuilder::new(
            "broken fn vertex_main() {}",
            Vertex::layout(),
            &layouts,
            wgpu::TextureFormat::Bgra8Unorm,
        )
        .build(&mut backend, device);

        assert!(matches!(result, Err(InitError::ShaderCompilation(_))));
    }

    #[test]
    fn test_missing_entry_point_releases_partial_objects() {
        let mut backend = RecordingBackend::default();
        let (device, _) = backend.bootstrap_device();
        let layouts = [layout(&mut backend, device)];

        let result = PipelineBuilder::new(
            "fn vertex_main() {}",
            Vertex::layout(),
            &layouts,
            wgpu::TextureFormat::Bgra8Unorm,
        )
        .build(&mut backend, device);

        assert_eq!(result, Err(InitError::PipelineCreation));
        assert_eq!(backend.live_objects_of_kind("shader module"), 0);
        assert_eq!(backend.live_objects_of_kind("pipeline layout"), 0);
    }

    #[test]
    fn test_depth_attachment_stencil_follows_format() {
        let mut backend = RecordingBackend::default();
        let (device, _) = backend.bootstrap_device();

        let depth = DepthTarget::new(&mut backend, device, 640, 480, DEPTH_FORMAT).unwrap();
        assert_eq!(depth.attachment().clear_stencil, None);
        assert_eq!(depth.attachment().clear_depth, 1.0);

        let depth_stencil = DepthTarget::new(
            &mut backend,
            device,
            640,
            480,
            wgpu::TextureFormat::Depth24PlusStencil8,
        )
        .unwrap();
        assert_eq!(depth_stencil.attachment().clear_stencil, Some(0));
    }
}
