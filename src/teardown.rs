//! Teardown of everything the [`Renderer`] owns.
//!
//! Objects go in reverse dependency order: pending GPU work is drained first, then buffers,
//! the pipeline and its layouts, the bind group, the depth target and finally the GPU context
//! (surface, queue, device, adapter, instance). The window is dropped by its owner afterwards.
//!
//! Every handle is taken out of its `Option` as it is released, so teardown after a partial
//! initialization skips what was never created and a second call releases nothing.

use crate::backend::{GpuBackend, GpuHandle};
use crate::renderer::Renderer;

impl<B: GpuBackend> Renderer<B> {
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        log::info!("Releasing GPU resources");

        self.drain_submitted_work();
        let backend = &mut self.gpu.backend;

        if let Some(mesh) = self.mesh.take() {
            mesh.vertex.release(backend);
            mesh.index.release(backend);
        }
        let uniforms = self.uniforms.take();
        if let Some(uniforms) = uniforms {
            uniforms.buffer.release(backend);
        }
        let pipeline = self.pipeline.take();
        if let Some(pipeline) = pipeline {
            backend.release(GpuHandle::RenderPipeline(pipeline.pipeline));
            backend.release(GpuHandle::PipelineLayout(pipeline.layout));
        }
        if let Some(uniforms) = uniforms {
            backend.release(GpuHandle::BindGroupLayout(uniforms.bind_group_layout));
        }
        if let Some(pipeline) = pipeline {
            backend.release(GpuHandle::ShaderModule(pipeline.shader));
        }
        if let Some(uniforms) = uniforms {
            backend.release(GpuHandle::BindGroup(uniforms.bind_group));
        }
        if let Some(depth) = self.depth.take() {
            backend.release(GpuHandle::TextureView(depth.view));
            backend.release(GpuHandle::Texture(depth.texture));
        }
        self.allocator = None;

        self.gpu.release();
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn drain_submitted_work(&mut self) {
        if let Some(queue) = self.gpu.queue {
            pollster::block_on(crate::negotiator::wait_for_submitted_work(
                &mut self.gpu.backend,
                queue,
                self.settings.wait_strategy,
            ));
        }
    }

    // The browser cannot block; the queue finishes on its own once its objects are dropped.
    #[cfg(target_arch = "wasm32")]
    fn drain_submitted_work(&mut self) {
        self.gpu.backend.poll();
    }
}

impl<B: GpuBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.terminate();
    }
}
