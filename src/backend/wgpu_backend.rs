//! # `wgpu` Backend
//!
//! [`WgpuBackend`] implements [`GpuBackend`] on top of the `wgpu` crate. Real driver objects
//! live in one `slotmap` arena per kind; the rest of the application only ever sees the keys.
//!
//! ## Asynchronous requests
//!
//! `wgpu` exposes adapter and device requests as futures. The backend keeps each future next
//! to its [`Completion`] and polls it with a no-op waker from [`GpuBackend::poll`], calling the
//! completion once the future resolves. Natively the futures are ready on the first poll; on the
//! web they resolve once the browser has answered the promise.
//!
//! ## Null handles
//!
//! `wgpu` never returns null objects: invalid descriptors produce an invalid object and a
//! validation error. Natively, creation calls are therefore wrapped in a validation error scope,
//! and an error caught by the scope is turned into `None`. Browser scopes resolve asynchronously,
//! so there the error goes to the device's uncaptured-error handler instead.
//!
//! ## Surface textures
//!
//! `wgpu::SurfaceTexture::present` consumes the frame, and dropping it before presenting
//! discards the frame, so this backend reports [`SurfaceTextureRelease::AfterPresent`].
//! Browser WebGPU hands the canvas texture to the compositor on its own once the task returns,
//! so an adapter on that backend reports [`Presentation::Implicit`]; WebGL still presents.

use std::borrow::Cow;
use std::future::Future;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use slotmap::{SecondaryMap, SlotMap};

use super::{
    AcquireStatus, AcquiredTexture, AdapterId, AdapterOptions, BackendError, BindGroupEntry,
    BindGroupId, BindGroupLayoutId, BufferDescriptor, BufferId, CommandBufferId,
    CommandEncoderId, Completion, DeviceDescriptor, DeviceId, DeviceLost, DeviceLostHandler,
    ErrorHandler, ErrorKind, GpuBackend, GpuHandle, InstanceId, PipelineLayoutId, Presentation,
    QueueId, RenderCommand, RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineId,
    ShaderModuleDescriptor, ShaderModuleId, SurfaceConfig, SurfaceId, SurfaceTextureRelease,
    TextureDescriptor, TextureId, TextureViewDescriptor, TextureViewId,
};

type LocalFuture<T> = Pin<Box<dyn Future<Output = T>>>;

struct PendingAdapter {
    future: LocalFuture<Option<wgpu::Adapter>>,
    on_complete: Completion<AdapterId>,
}

struct PendingDevice {
    future: LocalFuture<Result<(wgpu::Device, wgpu::Queue), wgpu::RequestDeviceError>>,
    on_complete: Completion<DeviceId>,
}

enum TextureSlot {
    Owned(wgpu::Texture),
    Surface(wgpu::SurfaceTexture),
    /// The surface texture was consumed by `present` and only the handle remains.
    Presented,
}

/// A [`GpuBackend`] driving a real GPU through `wgpu`.
#[derive(Default)]
pub struct WgpuBackend {
    instances: SlotMap<InstanceId, wgpu::Instance>,
    surfaces: SlotMap<SurfaceId, wgpu::Surface<'static>>,
    adapters: SlotMap<AdapterId, wgpu::Adapter>,
    devices: SlotMap<DeviceId, wgpu::Device>,
    unclaimed_queues: SecondaryMap<DeviceId, wgpu::Queue>,
    queues: SlotMap<QueueId, wgpu::Queue>,
    buffers: SlotMap<BufferId, wgpu::Buffer>,
    textures: SlotMap<TextureId, TextureSlot>,
    texture_views: SlotMap<TextureViewId, wgpu::TextureView>,
    shader_modules: SlotMap<ShaderModuleId, wgpu::ShaderModule>,
    bind_group_layouts: SlotMap<BindGroupLayoutId, wgpu::BindGroupLayout>,
    pipeline_layouts: SlotMap<PipelineLayoutId, wgpu::PipelineLayout>,
    render_pipelines: SlotMap<RenderPipelineId, wgpu::RenderPipeline>,
    bind_groups: SlotMap<BindGroupId, wgpu::BindGroup>,
    encoders: SlotMap<CommandEncoderId, Option<wgpu::CommandEncoder>>,
    command_buffers: SlotMap<CommandBufferId, Option<wgpu::CommandBuffer>>,
    acquired: SecondaryMap<SurfaceId, TextureId>,
    pending_adapters: Vec<PendingAdapter>,
    pending_devices: Vec<PendingDevice>,
    adapter_backend: Option<wgpu::Backend>,
}

impl WgpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `create` inside a validation error scope, returning `None` if the scope caught an
    /// error.
    ///
    /// In the browser the scope only resolves after a round trip to the GPU process, so no scope
    /// is pushed there: the object is kept and a validation error reaches the uncaptured-error
    /// handler installed on the device.
    fn scoped<T>(device: &wgpu::Device, what: &str, create: impl FnOnce() -> T) -> Option<T> {
        if cfg!(target_arch = "wasm32") {
            return Some(create());
        }
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        scope_outcome(value, device.pop_error_scope().now_or_never(), what)
    }
}

/// Keeps `value` unless the popped scope holds an error.
fn scope_outcome<T>(value: T, popped: Option<Option<wgpu::Error>>, what: &str) -> Option<T> {
    match popped {
        Some(Some(error)) => {
            log::error!("Failed to create {what}: {error}");
            None
        }
        Some(None) => Some(value),
        None => {
            log::warn!("Error scope for {what} did not resolve; keeping the object");
            Some(value)
        }
    }
}

/// Whether frames on `backend` reach the screen without an explicit present.
fn presentation_for(backend: Option<wgpu::Backend>) -> Presentation {
    match backend {
        Some(wgpu::Backend::BrowserWebGpu) => Presentation::Implicit,
        _ => Presentation::Explicit,
    }
}

fn to_backend_error(error: wgpu::Error) -> BackendError {
    let kind = match &error {
        wgpu::Error::OutOfMemory { .. } => ErrorKind::OutOfMemory,
        wgpu::Error::Validation { .. } => ErrorKind::Validation,
        _ => ErrorKind::Internal,
    };
    BackendError {
        kind,
        message: error.to_string(),
    }
}

impl GpuBackend for WgpuBackend {
    type SurfaceTarget = Arc<winit::window::Window>;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn surface_texture_release(&self) -> SurfaceTextureRelease {
        SurfaceTextureRelease::AfterPresent
    }

    fn presentation(&self) -> Presentation {
        presentation_for(self.adapter_backend)
    }

    fn create_instance(&mut self) -> Option<InstanceId> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        Some(self.instances.insert(instance))
    }

    fn create_surface(
        &mut self,
        instance: InstanceId,
        target: Self::SurfaceTarget,
    ) -> Option<SurfaceId> {
        let instance = self.instances.get(instance)?;
        match instance.create_surface(target) {
            Ok(surface) => Some(self.surfaces.insert(surface)),
            Err(error) => {
                log::error!("Could not create surface: {error}");
                None
            }
        }
    }

    fn request_adapter(
        &mut self,
        instance: InstanceId,
        options: &AdapterOptions,
        on_complete: Completion<AdapterId>,
    ) {
        let Some(instance) = self.instances.get(instance) else {
            on_complete(Err("unknown instance".to_string()));
            return;
        };
        let compatible_surface = options
            .compatible_surface
            .and_then(|surface| self.surfaces.get(surface));
        let future = instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: options.power_preference,
            force_fallback_adapter: options.force_fallback_adapter,
            compatible_surface,
        });
        self.pending_adapters.push(PendingAdapter {
            future: Box::pin(future),
            on_complete,
        });
    }

    fn adapter_info(&self, adapter: AdapterId) -> Option<wgpu::AdapterInfo> {
        self.adapters.get(adapter).map(wgpu::Adapter::get_info)
    }

    fn adapter_features(&self, adapter: AdapterId) -> wgpu::Features {
        self.adapters
            .get(adapter)
            .map(wgpu::Adapter::features)
            .unwrap_or_default()
    }

    fn adapter_limits(&self, adapter: AdapterId) -> Option<wgpu::Limits> {
        self.adapters.get(adapter).map(wgpu::Adapter::limits)
    }

    fn request_device(
        &mut self,
        adapter: AdapterId,
        descriptor: &DeviceDescriptor<'_>,
        on_complete: Completion<DeviceId>,
    ) {
        let Some(adapter) = self.adapters.get(adapter) else {
            on_complete(Err("unknown adapter".to_string()));
            return;
        };
        let future = adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: descriptor.label,
                required_features: descriptor.required_features,
                required_limits: descriptor.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        );
        self.pending_devices.push(PendingDevice {
            future: Box::pin(future),
            on_complete,
        });
    }

    fn set_device_callbacks(
        &mut self,
        device: DeviceId,
        on_error: ErrorHandler,
        on_lost: DeviceLostHandler,
    ) {
        let Some(device) = self.devices.get(device) else {
            return;
        };
        device.on_uncaptured_error(Box::new(move |error| on_error(to_backend_error(error))));
        device.set_device_lost_callback(move |reason, message| {
            on_lost(DeviceLost {
                reason: format!("{reason:?}"),
                message,
            })
        });
    }

    fn device_features(&self, device: DeviceId) -> wgpu::Features {
        self.devices
            .get(device)
            .map(wgpu::Device::features)
            .unwrap_or_default()
    }

    fn device_limits(&self, device: DeviceId) -> Option<wgpu::Limits> {
        self.devices.get(device).map(wgpu::Device::limits)
    }

    fn get_queue(&mut self, device: DeviceId) -> Option<QueueId> {
        let queue = self.unclaimed_queues.remove(device)?;
        Some(self.queues.insert(queue))
    }

    fn surface_capabilities(
        &self,
        surface: SurfaceId,
        adapter: AdapterId,
    ) -> wgpu::SurfaceCapabilities {
        match (self.surfaces.get(surface), self.adapters.get(adapter)) {
            (Some(surface), Some(adapter)) => surface.get_capabilities(adapter),
            _ => wgpu::SurfaceCapabilities::default(),
        }
    }

    fn configure_surface(&mut self, surface: SurfaceId, device: DeviceId, config: &SurfaceConfig) {
        let (Some(surface), Some(device)) = (self.surfaces.get(surface), self.devices.get(device))
        else {
            log::error!("Cannot configure surface: unknown surface or device");
            return;
        };
        surface.configure(
            device,
            &wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format: config.format,
                width: config.width,
                height: config.height,
                present_mode: config.present_mode,
                alpha_mode: config.alpha_mode,
                view_formats: vec![],
                desired_maximum_frame_latency: 2,
            },
        );
    }

    fn create_buffer(
        &mut self,
        device: DeviceId,
        descriptor: &BufferDescriptor<'_>,
    ) -> Option<BufferId> {
        let device = self.devices.get(device)?;
        let buffer = Self::scoped(device, "buffer", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: descriptor.label,
                size: descriptor.size,
                usage: descriptor.usage,
                mapped_at_creation: descriptor.mapped_at_creation,
            })
        })?;
        Some(self.buffers.insert(buffer))
    }

    fn write_mapped(&mut self, buffer: BufferId, offset: wgpu::BufferAddress, data: &[u8]) {
        let Some(buffer) = self.buffers.get(buffer) else {
            log::error!("Mapped write into unknown buffer");
            return;
        };
        let mut view = buffer.slice(..).get_mapped_range_mut();
        let start = offset as usize;
        let Some(target) = view.get_mut(start..start + data.len()) else {
            log::error!(
                "Mapped write of {} bytes at offset {offset} overruns buffer of {} bytes",
                data.len(),
                buffer.size()
            );
            return;
        };
        target.copy_from_slice(data);
    }

    fn unmap(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.get(buffer) {
            buffer.unmap();
        }
    }

    fn write_buffer(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        offset: wgpu::BufferAddress,
        data: &[u8],
    ) {
        if let (Some(queue), Some(buffer)) = (self.queues.get(queue), self.buffers.get(buffer)) {
            queue.write_buffer(buffer, offset, data);
        }
    }

    fn create_texture(
        &mut self,
        device: DeviceId,
        descriptor: &TextureDescriptor<'_>,
    ) -> Option<TextureId> {
        let device = self.devices.get(device)?;
        let texture = Self::scoped(device, "texture", || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: descriptor.label,
                size: wgpu::Extent3d {
                    width: descriptor.width,
                    height: descriptor.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: descriptor.format,
                usage: descriptor.usage,
                view_formats: &[],
            })
        })?;
        Some(self.textures.insert(TextureSlot::Owned(texture)))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        descriptor: &TextureViewDescriptor<'_>,
    ) -> Option<TextureViewId> {
        let texture = match self.textures.get(texture)? {
            TextureSlot::Owned(texture) => texture,
            TextureSlot::Surface(frame) => &frame.texture,
            TextureSlot::Presented => return None,
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: descriptor.label,
            format: descriptor.format,
            dimension: Some(wgpu::TextureViewDimension::D2),
            usage: None,
            aspect: descriptor.aspect,
            base_mip_level: 0,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(1),
        });
        Some(self.texture_views.insert(view))
    }

    fn create_shader_module(
        &mut self,
        device: DeviceId,
        descriptor: &ShaderModuleDescriptor<'_>,
    ) -> Option<ShaderModuleId> {
        let device = self.devices.get(device)?;
        let module = Self::scoped(device, "shader module", || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: descriptor.label,
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(descriptor.wgsl_source)),
            })
        })?;
        Some(self.shader_modules.insert(module))
    }

    fn create_bind_group_layout(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Option<BindGroupLayoutId> {
        let device = self.devices.get(device)?;
        let layout = Self::scoped(device, "bind group layout", || {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label, entries })
        })?;
        Some(self.bind_group_layouts.insert(layout))
    }

    fn create_pipeline_layout(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Option<PipelineLayoutId> {
        let device = self.devices.get(device)?;
        let layouts = bind_group_layouts
            .iter()
            .map(|id| self.bind_group_layouts.get(*id))
            .collect::<Option<Vec<_>>>()?;
        let layout = Self::scoped(device, "pipeline layout", || {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            })
        })?;
        Some(self.pipeline_layouts.insert(layout))
    }

    fn create_render_pipeline(
        &mut self,
        device: DeviceId,
        descriptor: &RenderPipelineDescriptor<'_>,
    ) -> Option<RenderPipelineId> {
        let device = self.devices.get(device)?;
        let layout = self.pipeline_layouts.get(descriptor.layout)?;
        let module = self.shader_modules.get(descriptor.shader)?;
        let vertex_buffers = descriptor
            .vertex_buffers
            .iter()
            .map(|layout| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: layout.step_mode,
                attributes: &layout.attributes,
            })
            .collect::<Vec<_>>();
        let targets = descriptor
            .color_targets
            .iter()
            .cloned()
            .map(Some)
            .collect::<Vec<_>>();
        let pipeline = Self::scoped(device, "render pipeline", || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: descriptor.label,
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some(descriptor.vertex_entry),
                    buffers: &vertex_buffers,
                    compilation_options: Default::default(),
                },
                primitive: descriptor.primitive,
                depth_stencil: descriptor.depth_stencil.clone(),
                multisample: descriptor.multisample,
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(descriptor.fragment_entry),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                multiview: None,
                cache: None,
            })
        })?;
        Some(self.render_pipelines.insert(pipeline))
    }

    fn create_bind_group(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        layout: BindGroupLayoutId,
        entries: &[BindGroupEntry],
    ) -> Option<BindGroupId> {
        let device = self.devices.get(device)?;
        let layout = self.bind_group_layouts.get(layout)?;
        let entries = entries
            .iter()
            .map(|entry| {
                let buffer = self.buffers.get(entry.buffer)?;
                Some(wgpu::BindGroupEntry {
                    binding: entry.binding,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: entry.offset,
                        size: NonZeroU64::new(entry.size),
                    }),
                })
            })
            .collect::<Option<Vec<_>>>()?;
        let bind_group = Self::scoped(device, "bind group", || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label,
                layout,
                entries: &entries,
            })
        })?;
        Some(self.bind_groups.insert(bind_group))
    }

    fn current_surface_texture(&mut self, surface_id: SurfaceId) -> AcquiredTexture {
        let Some(surface) = self.surfaces.get(surface_id) else {
            return AcquiredTexture {
                status: AcquireStatus::Other,
                texture: None,
            };
        };
        let status = match surface.get_current_texture() {
            Ok(frame) => {
                let texture = self.textures.insert(TextureSlot::Surface(frame));
                self.acquired.insert(surface_id, texture);
                return AcquiredTexture {
                    status: AcquireStatus::Success,
                    texture: Some(texture),
                };
            }
            Err(wgpu::SurfaceError::Timeout) => AcquireStatus::Timeout,
            Err(wgpu::SurfaceError::Outdated) => AcquireStatus::Outdated,
            Err(wgpu::SurfaceError::Lost) => AcquireStatus::Lost,
            Err(wgpu::SurfaceError::OutOfMemory) => AcquireStatus::OutOfMemory,
            Err(_) => AcquireStatus::Other,
        };
        AcquiredTexture {
            status,
            texture: None,
        }
    }

    fn create_command_encoder(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
    ) -> Option<CommandEncoderId> {
        let device = self.devices.get(device)?;
        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label });
        Some(self.encoders.insert(Some(encoder)))
    }

    fn copy_buffer_to_buffer(
        &mut self,
        encoder: CommandEncoderId,
        source: BufferId,
        source_offset: wgpu::BufferAddress,
        destination: BufferId,
        destination_offset: wgpu::BufferAddress,
        size: wgpu::BufferAddress,
    ) {
        let (Some(Some(encoder)), Some(source), Some(destination)) = (
            self.encoders.get_mut(encoder),
            self.buffers.get(source),
            self.buffers.get(destination),
        ) else {
            log::error!("Buffer copy references a released object");
            return;
        };
        encoder.copy_buffer_to_buffer(source, source_offset, destination, destination_offset, size);
    }

    fn insert_debug_marker(&mut self, encoder: CommandEncoderId, label: &str) {
        if let Some(Some(encoder)) = self.encoders.get_mut(encoder) {
            encoder.insert_debug_marker(label);
        }
    }

    fn encode_render_pass(
        &mut self,
        encoder: CommandEncoderId,
        descriptor: &RenderPassDescriptor<'_>,
        commands: &[RenderCommand],
    ) {
        let Self {
            encoders,
            texture_views,
            render_pipelines,
            buffers,
            bind_groups,
            ..
        } = self;
        let Some(Some(encoder)) = encoders.get_mut(encoder) else {
            log::error!("Render pass on unknown or finished encoder");
            return;
        };
        let Some(color_view) = texture_views.get(descriptor.color.view) else {
            log::error!("Render pass color attachment was released");
            return;
        };
        let depth = match descriptor.depth {
            Some(depth) => match texture_views.get(depth.view) {
                Some(view) => Some((depth, view)),
                None => {
                    log::error!("Render pass depth attachment was released");
                    return;
                }
            },
            None => None,
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: descriptor.label,
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(descriptor.color.clear_color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth.map(|(depth, view)| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(depth.clear_depth),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: depth.clear_stencil.map(|stencil| wgpu::Operations {
                        load: wgpu::LoadOp::Clear(stencil),
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for command in commands {
            match command {
                RenderCommand::SetPipeline(id) => match render_pipelines.get(*id) {
                    Some(pipeline) => render_pass.set_pipeline(pipeline),
                    None => log::error!("set_pipeline: pipeline was released"),
                },
                RenderCommand::SetVertexBuffer { slot, buffer } => match buffers.get(*buffer) {
                    Some(buffer) => render_pass.set_vertex_buffer(*slot, buffer.slice(..)),
                    None => log::error!("set_vertex_buffer: buffer was released"),
                },
                RenderCommand::SetIndexBuffer { buffer, format } => match buffers.get(*buffer) {
                    Some(buffer) => render_pass.set_index_buffer(buffer.slice(..), *format),
                    None => log::error!("set_index_buffer: buffer was released"),
                },
                RenderCommand::SetBindGroup {
                    index,
                    bind_group,
                    dynamic_offsets,
                } => match bind_groups.get(*bind_group) {
                    Some(bind_group) => render_pass.set_bind_group(*index, bind_group, dynamic_offsets),
                    None => log::error!("set_bind_group: bind group was released"),
                },
                RenderCommand::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                } => render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
            }
        }
    }

    fn finish_encoder(&mut self, encoder: CommandEncoderId) -> Option<CommandBufferId> {
        let encoder = self.encoders.get_mut(encoder)?.take()?;
        Some(self.command_buffers.insert(Some(encoder.finish())))
    }

    fn submit(&mut self, queue: QueueId, command_buffers: &[CommandBufferId]) {
        let Some(queue) = self.queues.get(queue) else {
            log::error!("Submit to unknown queue");
            return;
        };
        let buffers = command_buffers
            .iter()
            .filter_map(|id| self.command_buffers.get_mut(*id).and_then(Option::take))
            .collect::<Vec<_>>();
        queue.submit(buffers);
    }

    fn on_submitted_work_done(&mut self, queue: QueueId, on_complete: Completion<()>) {
        match self.queues.get(queue) {
            Some(queue) => queue.on_submitted_work_done(move || on_complete(Ok(()))),
            None => on_complete(Err("unknown queue".to_string())),
        }
    }

    fn present(&mut self, surface: SurfaceId) {
        let Some(texture) = self.acquired.remove(surface) else {
            log::warn!("Present without an acquired surface texture");
            return;
        };
        let Some(slot) = self.textures.get_mut(texture) else {
            log::warn!("Surface texture released before present; frame discarded");
            return;
        };
        match std::mem::replace(slot, TextureSlot::Presented) {
            TextureSlot::Surface(frame) => frame.present(),
            other => *slot = other,
        }
    }

    fn poll(&mut self) {
        let waker = futures::task::noop_waker();
        let mut context = Context::from_waker(&waker);

        for mut pending in std::mem::take(&mut self.pending_adapters) {
            match pending.future.poll_unpin(&mut context) {
                Poll::Ready(Some(adapter)) => {
                    self.adapter_backend = Some(adapter.get_info().backend);
                    let id = self.adapters.insert(adapter);
                    (pending.on_complete)(Ok(id));
                }
                Poll::Ready(None) => {
                    (pending.on_complete)(Err("no compatible adapter found".to_string()));
                }
                Poll::Pending => self.pending_adapters.push(pending),
            }
        }

        for mut pending in std::mem::take(&mut self.pending_devices) {
            match pending.future.poll_unpin(&mut context) {
                Poll::Ready(Ok((device, queue))) => {
                    let id = self.devices.insert(device);
                    self.unclaimed_queues.insert(id, queue);
                    (pending.on_complete)(Ok(id));
                }
                Poll::Ready(Err(error)) => (pending.on_complete)(Err(error.to_string())),
                Poll::Pending => self.pending_devices.push(pending),
            }
        }

        for device in self.devices.values() {
            let _ = device.poll(wgpu::Maintain::Poll);
        }
    }

    fn release(&mut self, handle: GpuHandle) {
        let released = match handle {
            GpuHandle::Instance(id) => self.instances.remove(id).is_some(),
            GpuHandle::Surface(id) => {
                self.acquired.remove(id);
                self.surfaces.remove(id).is_some()
            }
            GpuHandle::Adapter(id) => self.adapters.remove(id).is_some(),
            GpuHandle::Device(id) => {
                self.unclaimed_queues.remove(id);
                self.devices.remove(id).is_some()
            }
            GpuHandle::Queue(id) => self.queues.remove(id).is_some(),
            GpuHandle::Buffer(id) => self.buffers.remove(id).map(|buffer| buffer.destroy()).is_some(),
            GpuHandle::Texture(id) => match self.textures.remove(id) {
                Some(TextureSlot::Owned(texture)) => {
                    texture.destroy();
                    true
                }
                Some(TextureSlot::Surface(_)) => {
                    log::debug!("Surface texture released without being presented");
                    true
                }
                Some(TextureSlot::Presented) => true,
                None => false,
            },
            GpuHandle::TextureView(id) => self.texture_views.remove(id).is_some(),
            GpuHandle::ShaderModule(id) => self.shader_modules.remove(id).is_some(),
            GpuHandle::BindGroupLayout(id) => self.bind_group_layouts.remove(id).is_some(),
            GpuHandle::PipelineLayout(id) => self.pipeline_layouts.remove(id).is_some(),
            GpuHandle::RenderPipeline(id) => self.render_pipelines.remove(id).is_some(),
            GpuHandle::BindGroup(id) => self.bind_groups.remove(id).is_some(),
            GpuHandle::CommandEncoder(id) => self.encoders.remove(id).is_some(),
            GpuHandle::CommandBuffer(id) => self.command_buffers.remove(id).is_some(),
        };
        if !released {
            log::warn!("Ignoring release of unknown {}", handle.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validation_error() -> wgpu::Error {
        wgpu::Error::Validation {
            source: Box::new(std::io::Error::other("bad descriptor")),
            description: "bad descriptor".to_string(),
        }
    }

    #[test]
    fn test_scoped_error_becomes_null_handle() {
        assert_eq!(scope_outcome(5, Some(Some(validation_error())), "buffer"), None);
    }

    #[test]
    fn test_clean_scope_keeps_object() {
        assert_eq!(scope_outcome(5, Some(None), "buffer"), Some(5));
    }

    #[test]
    fn test_unresolved_scope_keeps_object() {
        assert_eq!(scope_outcome(5, None, "buffer"), Some(5));
    }

    #[test]
    fn test_browser_webgpu_presents_implicitly() {
        assert_eq!(
            presentation_for(Some(wgpu::Backend::BrowserWebGpu)),
            Presentation::Implicit
        );
        assert_eq!(presentation_for(Some(wgpu::Backend::Gl)), Presentation::Explicit);
        assert_eq!(presentation_for(Some(wgpu::Backend::Vulkan)), Presentation::Explicit);
    }

    #[test]
    fn test_backend_without_adapter_presents_explicitly() {
        let backend = WgpuBackend::new();
        assert_eq!(backend.presentation(), Presentation::Explicit);
        assert_eq!(
            backend.surface_texture_release(),
            SurfaceTextureRelease::AfterPresent
        );
    }
}
