//! # Backend Interface
//!
//! The `backend` module defines the single seam between the renderer and the graphics driver.
//! Every GPU object the application touches (instance, surface, adapter, device, queue,
//! buffers, textures, pipelines, bind groups, encoders) is created, used and released through
//! the [`GpuBackend`] trait, and referred to by a small typed handle rather than by the driver
//! object itself.
//!
//! ## Overview
//!
//! - **Typed handles**: each kind of object gets its own `slotmap` key type ([`BufferId`],
//!   [`RenderPipelineId`], ...). Backends keep the real objects in arenas and hand out keys.
//! - **Callback-driven requests**: adapter, device and submitted-work-done requests accept a
//!   [`Completion`] closure and return immediately. The closure may run during a later
//!   [`GpuBackend::poll`] call or on a backend-owned thread.
//! - **Null handles**: creation calls return `Option`. `None` is how a backend reports that
//!   the object could not be created; callers turn it into an [`InitError`](crate::InitError).
//! - **Recorded render passes**: a render pass is described by a [`RenderPassDescriptor`] plus a
//!   list of [`RenderCommand`]s, which keeps the trait object-safe and lets a backend replay the
//!   list against its own pass encoder.
//!
//! Plain-data types that are already backend-neutral (texture formats, usage flags, limits,
//! adapter info, primitive and depth-stencil state) are reused from `wgpu` directly.
//!
//! ## Implementations
//!
//! - [`wgpu_backend::WgpuBackend`]: drives a real GPU through `wgpu`.
//! - [`recording::RecordingBackend`]: a software backend that records and validates every call.

pub mod recording;
pub mod wgpu_backend;

use std::ops::Range;

use slotmap::{new_key_type, Key, KeyData};

new_key_type! {
    /// Handle to the driver entry point.
    pub struct InstanceId;
    /// Handle to a presentable surface bound to one window.
    pub struct SurfaceId;
    /// Handle to a physical or virtual GPU.
    pub struct AdapterId;
    /// Handle to the logical device.
    pub struct DeviceId;
    /// Handle to the device's submission queue.
    pub struct QueueId;
    pub struct BufferId;
    pub struct TextureId;
    pub struct TextureViewId;
    pub struct ShaderModuleId;
    pub struct BindGroupLayoutId;
    pub struct PipelineLayoutId;
    pub struct RenderPipelineId;
    pub struct BindGroupId;
    pub struct CommandEncoderId;
    pub struct CommandBufferId;
}

/// Any handle a backend can release.
///
/// Releasing goes through one entry point so the teardown sequence can be expressed (and
/// recorded) as a flat list of handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuHandle {
    Instance(InstanceId),
    Surface(SurfaceId),
    Adapter(AdapterId),
    Device(DeviceId),
    Queue(QueueId),
    Buffer(BufferId),
    Texture(TextureId),
    TextureView(TextureViewId),
    ShaderModule(ShaderModuleId),
    BindGroupLayout(BindGroupLayoutId),
    PipelineLayout(PipelineLayoutId),
    RenderPipeline(RenderPipelineId),
    BindGroup(BindGroupId),
    CommandEncoder(CommandEncoderId),
    CommandBuffer(CommandBufferId),
}

impl GpuHandle {
    /// Raw slot data of the wrapped key, independent of its type.
    pub fn key_data(&self) -> KeyData {
        match self {
            Self::Instance(id) => id.data(),
            Self::Surface(id) => id.data(),
            Self::Adapter(id) => id.data(),
            Self::Device(id) => id.data(),
            Self::Queue(id) => id.data(),
            Self::Buffer(id) => id.data(),
            Self::Texture(id) => id.data(),
            Self::TextureView(id) => id.data(),
            Self::ShaderModule(id) => id.data(),
            Self::BindGroupLayout(id) => id.data(),
            Self::PipelineLayout(id) => id.data(),
            Self::RenderPipeline(id) => id.data(),
            Self::BindGroup(id) => id.data(),
            Self::CommandEncoder(id) => id.data(),
            Self::CommandBuffer(id) => id.data(),
        }
    }

    /// Short name of the handle kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Instance(_) => "instance",
            Self::Surface(_) => "surface",
            Self::Adapter(_) => "adapter",
            Self::Device(_) => "device",
            Self::Queue(_) => "queue",
            Self::Buffer(_) => "buffer",
            Self::Texture(_) => "texture",
            Self::TextureView(_) => "texture view",
            Self::ShaderModule(_) => "shader module",
            Self::BindGroupLayout(_) => "bind group layout",
            Self::PipelineLayout(_) => "pipeline layout",
            Self::RenderPipeline(_) => "render pipeline",
            Self::BindGroup(_) => "bind group",
            Self::CommandEncoder(_) => "command encoder",
            Self::CommandBuffer(_) => "command buffer",
        }
    }
}

/// Completion handler for an asynchronous backend request.
///
/// `Ok` carries the produced value, `Err` the backend's diagnostic message. The handler must be
/// callable from a backend-owned thread, hence `Send`.
pub type Completion<T> = Box<dyn FnOnce(Result<T, String>) + Send + 'static>;

/// Broad category of an error reported outside of any request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    OutOfMemory,
    Internal,
}

/// An error the backend raised asynchronously (an "uncaptured" error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Notification that the logical device is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLost {
    pub reason: String,
    pub message: String,
}

pub type ErrorHandler = Box<dyn Fn(BackendError) + Send + 'static>;
pub type DeviceLostHandler = Box<dyn Fn(DeviceLost) + Send + 'static>;

/// Options for the adapter request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterOptions {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    pub compatible_surface: Option<SurfaceId>,
}

/// Descriptor for the device request.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor<'a> {
    pub label: Option<&'a str>,
    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,
}

/// How a surface is configured before images can be acquired from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub present_mode: wgpu::PresentMode,
    pub alpha_mode: wgpu::CompositeAlphaMode,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: Option<&'a str>,
    pub size: wgpu::BufferAddress,
    pub usage: wgpu::BufferUsages,
    pub mapped_at_creation: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureViewDescriptor<'a> {
    pub label: Option<&'a str>,
    pub format: Option<wgpu::TextureFormat>,
    pub aspect: wgpu::TextureAspect,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: Option<&'a str>,
    pub wgsl_source: &'a str,
}

/// One buffer range bound to one slot of a bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub buffer: BufferId,
    pub offset: wgpu::BufferAddress,
    pub size: wgpu::BufferAddress,
}

/// Layout of one vertex buffer slot.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferLayout {
    pub array_stride: wgpu::BufferAddress,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

/// Everything needed to assemble an immutable render pipeline.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: PipelineLayoutId,
    pub shader: ShaderModuleId,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub vertex_buffers: &'a [VertexBufferLayout],
    pub primitive: wgpu::PrimitiveState,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub multisample: wgpu::MultisampleState,
    pub color_targets: &'a [wgpu::ColorTargetState],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub view: TextureViewId,
    pub clear_color: wgpu::Color,
}

/// Depth attachment, cleared at the start of the pass and stored at the end.
///
/// `clear_stencil` is `Some` only for formats carrying a stencil aspect; the stencil is then
/// cleared and stored but otherwise unused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub view: TextureViewId,
    pub clear_depth: f32,
    pub clear_stencil: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassDescriptor<'a> {
    pub label: Option<&'a str>,
    pub color: ColorAttachment,
    pub depth: Option<DepthAttachment>,
}

/// A command recorded inside a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCommand {
    SetPipeline(RenderPipelineId),
    SetVertexBuffer {
        slot: u32,
        buffer: BufferId,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: wgpu::IndexFormat,
    },
    SetBindGroup {
        index: u32,
        bind_group: BindGroupId,
        dynamic_offsets: Vec<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

/// Result of asking the surface for its next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Success,
    Timeout,
    Outdated,
    Lost,
    OutOfMemory,
    Other,
}

/// The surface image for one frame.
///
/// `texture` is `Some` exactly when `status` is [`AcquireStatus::Success`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredTexture {
    pub status: AcquireStatus,
    pub texture: Option<TextureId>,
}

/// Point in the frame at which the acquired surface texture may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceTextureRelease {
    /// Release right after its view exists; the view keeps the image alive until present.
    AfterViewCreation,
    /// Release only once the image has been presented.
    AfterPresent,
}

/// Whether the application must ask the surface to present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Explicit,
    /// The host presents on its own once control returns to it (browser-style embedding).
    Implicit,
}

/// A graphics backend.
///
/// All methods are called from the single application thread. Requests that complete
/// asynchronously take a [`Completion`], and only make progress when [`poll`](Self::poll) is
/// called or when a backend thread runs them.
pub trait GpuBackend {
    /// What the backend needs to build a surface (a window for real backends).
    type SurfaceTarget;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// When an acquired surface texture may be released within a frame.
    fn surface_texture_release(&self) -> SurfaceTextureRelease;

    /// Whether [`present`](Self::present) must be called after submitting a frame.
    fn presentation(&self) -> Presentation;

    /// Creates the entry point every other object hangs off. `None` if the driver is missing.
    fn create_instance(&mut self) -> Option<InstanceId>;

    /// Creates a presentable surface for `target`.
    fn create_surface(
        &mut self,
        instance: InstanceId,
        target: Self::SurfaceTarget,
    ) -> Option<SurfaceId>;

    /// Starts an adapter request.
    ///
    /// # Parameters
    ///
    /// - `instance`: The instance to enumerate adapters from.
    /// - `options`: Power preference, fallback policy and the surface the adapter must be able
    ///   to present to.
    /// - `on_complete`: Called exactly once with the adapter or the reason there is none, either
    ///   from [`poll`](Self::poll) or from a backend thread.
    fn request_adapter(
        &mut self,
        instance: InstanceId,
        options: &AdapterOptions,
        on_complete: Completion<AdapterId>,
    );

    /// Vendor, device, driver and backend of `adapter`, if the backend can report them.
    fn adapter_info(&self, adapter: AdapterId) -> Option<wgpu::AdapterInfo>;

    fn adapter_features(&self, adapter: AdapterId) -> wgpu::Features;

    /// The best limits `adapter` supports, or `None` for an unknown adapter.
    fn adapter_limits(&self, adapter: AdapterId) -> Option<wgpu::Limits>;

    /// Starts a device request on `adapter`; `on_complete` follows the same rules as for
    /// [`request_adapter`](Self::request_adapter).
    fn request_device(
        &mut self,
        adapter: AdapterId,
        descriptor: &DeviceDescriptor<'_>,
        on_complete: Completion<DeviceId>,
    );

    /// Installs the uncaptured-error and device-lost handlers.
    fn set_device_callbacks(
        &mut self,
        device: DeviceId,
        on_error: ErrorHandler,
        on_lost: DeviceLostHandler,
    );

    fn device_features(&self, device: DeviceId) -> wgpu::Features;

    /// The limits the device was created with.
    fn device_limits(&self, device: DeviceId) -> Option<wgpu::Limits>;

    /// Hands out the device's queue. A device has one queue and it can only be taken once.
    fn get_queue(&mut self, device: DeviceId) -> Option<QueueId>;

    /// Formats, present modes and alpha modes `surface` supports with `adapter`.
    fn surface_capabilities(
        &self,
        surface: SurfaceId,
        adapter: AdapterId,
    ) -> wgpu::SurfaceCapabilities;

    fn configure_surface(&mut self, surface: SurfaceId, device: DeviceId, config: &SurfaceConfig);

    /// Creates a buffer. `None` stands for a null handle, for example when the size or usage
    /// flags are invalid.
    fn create_buffer(
        &mut self,
        device: DeviceId,
        descriptor: &BufferDescriptor<'_>,
    ) -> Option<BufferId>;

    /// Copies `data` into a buffer created with `mapped_at_creation`, starting at `offset`.
    fn write_mapped(&mut self, buffer: BufferId, offset: wgpu::BufferAddress, data: &[u8]);

    /// Ends the mapping started by `mapped_at_creation`; the buffer is usable by the GPU after.
    fn unmap(&mut self, buffer: BufferId);

    /// Enqueues a CPU to GPU copy without an explicit encoder.
    fn write_buffer(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        offset: wgpu::BufferAddress,
        data: &[u8],
    );

    fn create_texture(
        &mut self,
        device: DeviceId,
        descriptor: &TextureDescriptor<'_>,
    ) -> Option<TextureId>;

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        descriptor: &TextureViewDescriptor<'_>,
    ) -> Option<TextureViewId>;

    fn create_shader_module(
        &mut self,
        device: DeviceId,
        descriptor: &ShaderModuleDescriptor<'_>,
    ) -> Option<ShaderModuleId>;

    fn create_bind_group_layout(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Option<BindGroupLayoutId>;

    fn create_pipeline_layout(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Option<PipelineLayoutId>;

    fn create_render_pipeline(
        &mut self,
        device: DeviceId,
        descriptor: &RenderPipelineDescriptor<'_>,
    ) -> Option<RenderPipelineId>;

    fn create_bind_group(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        layout: BindGroupLayoutId,
        entries: &[BindGroupEntry],
    ) -> Option<BindGroupId>;

    /// Acquires the texture to draw the next frame into.
    ///
    /// # Returns
    ///
    /// The acquire status, and a texture only when the status is [`AcquireStatus::Success`].
    /// The texture must be released once per frame at the point given by
    /// [`surface_texture_release`](Self::surface_texture_release).
    fn current_surface_texture(&mut self, surface: SurfaceId) -> AcquiredTexture;

    fn create_command_encoder(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
    ) -> Option<CommandEncoderId>;

    /// Records a copy of `size` bytes between two buffers.
    fn copy_buffer_to_buffer(
        &mut self,
        encoder: CommandEncoderId,
        source: BufferId,
        source_offset: wgpu::BufferAddress,
        destination: BufferId,
        destination_offset: wgpu::BufferAddress,
        size: wgpu::BufferAddress,
    );

    fn insert_debug_marker(&mut self, encoder: CommandEncoderId, label: &str);

    /// Begins a render pass on `encoder`, replays `commands` into it and ends it.
    fn encode_render_pass(
        &mut self,
        encoder: CommandEncoderId,
        descriptor: &RenderPassDescriptor<'_>,
        commands: &[RenderCommand],
    );

    /// Finishes the encoder. The encoder handle stays allocated until released.
    fn finish_encoder(&mut self, encoder: CommandEncoderId) -> Option<CommandBufferId>;

    fn submit(&mut self, queue: QueueId, command_buffers: &[CommandBufferId]);

    /// Calls `on_complete` once everything submitted to `queue` so far has finished.
    fn on_submitted_work_done(&mut self, queue: QueueId, on_complete: Completion<()>);

    /// Shows the frame drawn into the surface's current texture.
    fn present(&mut self, surface: SurfaceId);

    /// Pumps pending callbacks.
    fn poll(&mut self);

    /// Releases one object. Releasing an unknown or already released handle is a no-op.
    fn release(&mut self, handle: GpuHandle);
}
