//! # Renderer
//!
//! The `Renderer` is the root object of the application. It owns the [`Gpu`] context and every
//! resource built on top of it: the uniform binding, the pipeline, the depth target and the mesh
//! buffers. Nothing here is global; the window event loop holds one `Renderer` and calls into it.
//!
//! ## Frame
//!
//! [`Renderer::render_frame`] runs one iteration:
//!
//! 1. Acquire the surface texture. Anything but success skips the frame.
//! 2. Create a view of it.
//! 3. Update the uniforms and encode one render pass that clears color and depth and draws every
//!    instance.
//! 4. Submit the command buffer, then present.
//! 5. Release the view and the surface texture, each at the point the backend allows.
//!
//! Skipping a frame never touches the encoder or the queue, so the next iteration starts clean.

use crate::allocator::{Allocator, UniformLayout};
use crate::backend::{
    AcquireStatus, ColorAttachment, GpuBackend, GpuHandle, Presentation, RenderPassDescriptor,
    SurfaceTextureRelease, TextureViewDescriptor,
};
use crate::error::InitError;
use crate::gpu::Gpu;
use crate::mesh::Mesh;
use crate::pipeline::{DepthTarget, PipelineBuilder, PipelineObjects};
use crate::scene::{MeshBuffers, Scene};
use crate::settings::Settings;
use crate::uniform_binding::UniformBinding;
use crate::uniform_buffer::{FrameUniforms, ObjectUniforms};
use crate::vertex::Vertex;
use crate::SHADER_SOURCE;

/// What happened to one call of [`Renderer::render_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The surface texture could not be acquired; nothing was encoded.
    Skipped(AcquireStatus),
    Presented,
}

/// Owns the GPU context and everything drawn with it.
///
/// Resources are `None` until [`Renderer::initialize`] creates them and again after
/// [`Renderer::terminate`] releases them.
pub struct Renderer<B: GpuBackend> {
    /// Backend and top-level handles.
    pub gpu: Gpu<B>,
    /// The settings the renderer was built with. Changing them after initialization has no
    /// effect on resources that already exist.
    pub settings: Settings,
    /// Instances, camera and the per-frame uniform values.
    pub scene: Scene,
    pub(crate) allocator: Option<Allocator>,
    pub(crate) uniforms: Option<UniformBinding>,
    pub(crate) pipeline: Option<PipelineObjects>,
    pub(crate) depth: Option<DepthTarget>,
    pub(crate) mesh: Option<MeshBuffers>,
    pub(crate) terminated: bool,
}

impl<B: GpuBackend> Renderer<B> {
    /// Creates a renderer around `backend`. No GPU object exists until [`Renderer::initialize`].
    pub fn new(backend: B, settings: Settings) -> Self {
        Self {
            gpu: Gpu::new(backend),
            scene: Scene::new(&settings),
            settings,
            allocator: None,
            uniforms: None,
            pipeline: None,
            depth: None,
            mesh: None,
            terminated: false,
        }
    }

    /// Brings up the GPU and every resource a frame needs.
    ///
    /// # Parameters
    ///
    /// - `target`: Passed on to the backend to create the surface.
    /// - `mesh`: The model to draw, or `None` for the built-in pyramid.
    ///
    /// # Returns
    ///
    /// `Ok(())` when frames can be drawn. On error, whatever was created stays owned by the
    /// renderer and is released by [`Renderer::terminate`].
    pub async fn initialize(
        &mut self,
        target: B::SurfaceTarget,
        mesh: Option<Mesh>,
    ) -> Result<(), InitError> {
        self.settings.validate()?;
        self.gpu.initialize(target, &self.settings).await?;

        let device = self.gpu.device()?;
        let allocator = Allocator::new(device, self.gpu.queue()?);
        self.allocator = Some(allocator);

        let layout = UniformLayout::new(
            FrameUniforms::SIZE,
            ObjectUniforms::SIZE,
            self.gpu.uniform_alignment()?,
            self.settings.max_instances,
        );
        let uniforms = UniformBinding::new(&mut self.gpu.backend, device, &allocator, layout)?;
        self.uniforms = Some(uniforms);

        let bind_group_layouts = [uniforms.bind_group_layout];
        let pipeline = PipelineBuilder::new(
            SHADER_SOURCE,
            Vertex::layout(),
            &bind_group_layouts,
            self.gpu.surface_format()?,
        )
        .with_depth_format(self.settings.depth_format)
        .build(&mut self.gpu.backend, device)?;
        self.pipeline = Some(pipeline);

        let depth = DepthTarget::new(
            &mut self.gpu.backend,
            device,
            self.settings.width,
            self.settings.height,
            self.settings.depth_format,
        )?;
        self.depth = Some(depth);

        let mesh = mesh.unwrap_or_else(Mesh::pyramid);
        let buffers = MeshBuffers::upload(&mut self.gpu.backend, &allocator, &mesh)?;
        self.mesh = Some(buffers);

        log::info!(
            "Renderer ready: {} indices, {} instances",
            buffers.index_count,
            self.scene.instances.len()
        );
        Ok(())
    }

    /// Whether [`Renderer::render_frame`] can draw.
    pub fn is_initialized(&self) -> bool {
        !self.terminated && self.mesh.is_some()
    }

    /// The uniform buffer and its bind group, once created.
    pub fn uniforms(&self) -> Option<&UniformBinding> {
        self.uniforms.as_ref()
    }

    pub fn pipeline(&self) -> Option<&PipelineObjects> {
        self.pipeline.as_ref()
    }

    pub fn depth(&self) -> Option<&DepthTarget> {
        self.depth.as_ref()
    }

    pub fn mesh(&self) -> Option<&MeshBuffers> {
        self.mesh.as_ref()
    }

    /// Draws one frame at `time` seconds since startup.
    ///
    /// # Returns
    ///
    /// [`FrameOutcome::Skipped`] when no surface texture could be acquired, which is not an
    /// error; the next call tries again. [`InitError::NotInitialized`] before initialization
    /// and after termination.
    pub fn render_frame(&mut self, time: f32) -> Result<FrameOutcome, InitError> {
        let (Some(allocator), Some(uniforms), Some(pipeline), Some(depth), Some(mesh)) = (
            self.allocator,
            self.uniforms,
            self.pipeline,
            self.depth,
            self.mesh,
        ) else {
            return Err(InitError::NotInitialized);
        };
        if self.terminated {
            return Err(InitError::NotInitialized);
        }
        let surface = self.gpu.surface.ok_or(InitError::NotInitialized)?;
        let device = self.gpu.device()?;
        let queue = self.gpu.queue()?;
        let format = self.gpu.surface_format()?;
        let backend = &mut self.gpu.backend;

        let acquired = backend.current_surface_texture(surface);
        let texture = match (acquired.status, acquired.texture) {
            (AcquireStatus::Success, Some(texture)) => texture,
            (status, _) => {
                log::debug!("Skipping frame: surface texture unavailable ({status:?})");
                return Ok(FrameOutcome::Skipped(status));
            }
        };

        let release = backend.surface_texture_release();
        let Some(view) = backend.create_texture_view(
            texture,
            &TextureViewDescriptor {
                label: Some("Surface Texture View"),
                format: Some(format),
                aspect: wgpu::TextureAspect::All,
            },
        ) else {
            backend.release(GpuHandle::Texture(texture));
            log::warn!("Skipping frame: could not create the surface texture view");
            return Ok(FrameOutcome::Skipped(AcquireStatus::Other));
        };
        if release == SurfaceTextureRelease::AfterViewCreation {
            backend.release(GpuHandle::Texture(texture));
        }

        self.scene.update(backend, &allocator, &uniforms, time);
        let commands = self.scene.record(pipeline.pipeline, &mesh, &uniforms);

        if let Some(encoder) = backend.create_command_encoder(device, Some("Render Encoder")) {
            backend.insert_debug_marker(encoder, "Render scene");
            backend.encode_render_pass(
                encoder,
                &RenderPassDescriptor {
                    label: Some("Render Pass"),
                    color: ColorAttachment {
                        view,
                        clear_color: self.settings.clear_color,
                    },
                    depth: Some(depth.attachment()),
                },
                &commands,
            );
            if let Some(command_buffer) = backend.finish_encoder(encoder) {
                backend.submit(queue, &[command_buffer]);
                backend.release(GpuHandle::CommandBuffer(command_buffer));
            }
            backend.release(GpuHandle::CommandEncoder(encoder));
        } else {
            log::error!("Could not create a command encoder; presenting an unrendered frame");
        }

        if backend.presentation() == Presentation::Explicit {
            backend.present(surface);
        }
        backend.release(GpuHandle::TextureView(view));
        if release == SurfaceTextureRelease::AfterPresent {
            backend.release(GpuHandle::Texture(texture));
        }
        // Lets callbacks such as device-lost notifications fire between frames.
        backend.poll();

        Ok(FrameOutcome::Presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Call, RecordingBackend, RecordingConfig};
    use crate::negotiator::WaitStrategy;
    use std::time::Duration;

    fn renderer(config: RecordingConfig) -> Renderer<RecordingBackend> {
        let settings = Settings {
            wait_strategy: WaitStrategy::Sleep(Duration::ZERO),
            ..Settings::default()
        };
        let mut renderer = Renderer::new(RecordingBackend::new(config), settings);
        pollster::block_on(renderer.initialize((), None)).unwrap();
        renderer.gpu.backend.clear_calls();
        renderer
    }

    #[test]
    fn test_frame_draws_every_instance() {
        let mut renderer = renderer(RecordingConfig::default());

        assert_eq!(renderer.render_frame(0.0), Ok(FrameOutcome::Presented));

        let backend = &renderer.gpu.backend;
        assert!(backend.errors().is_empty(), "{:?}", backend.errors());
        let draws = backend.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].dynamic_offsets, vec![0]);
        assert_eq!(draws[1].dynamic_offsets, vec![256]);
        assert_eq!(draws[0].indices, 0..18);
        assert_eq!(backend.count_calls(|call| matches!(call, Call::Present)), 1);
    }

    #[test]
    fn test_failed_acquire_skips_frame() {
        let mut renderer = renderer(RecordingConfig {
            acquire_script: [AcquireStatus::Timeout].into(),
            ..Default::default()
        });

        assert_eq!(
            renderer.render_frame(0.0),
            Ok(FrameOutcome::Skipped(AcquireStatus::Timeout))
        );
        let backend = &renderer.gpu.backend;
        assert_eq!(backend.calls(), &[Call::AcquireTexture(AcquireStatus::Timeout)]);

        assert_eq!(renderer.render_frame(0.1), Ok(FrameOutcome::Presented));
    }

    #[test]
    fn test_uninitialized_renderer_refuses_to_draw() {
        let mut renderer = Renderer::new(RecordingBackend::default(), Settings::default());
        assert_eq!(renderer.render_frame(0.0), Err(InitError::NotInitialized));
    }
}
