//! # Recording Backend
//!
//! [`RecordingBackend`] is a software implementation of [`GpuBackend`]. It never talks to a GPU;
//! instead it keeps a bookkeeping entry for every object, appends every call to a log of
//! [`Call`]s and checks calls the way a validating driver would:
//!
//! - buffer usage flags must cover every operation performed on the buffer,
//! - dynamic offsets must be aligned to `min_uniform_buffer_offset_alignment` and stay in bounds,
//! - bound bind groups must use the layout the pipeline was built with,
//! - a surface texture must be released before the next one is acquired.
//!
//! Violations are reported through the uncaptured-error handler, exactly like a real backend
//! reports them, and are also kept for inspection.
//!
//! Asynchronous requests are completed after a configurable number of [`GpuBackend::poll`]
//! calls, or from a separate thread after a delay, which makes the wait loop in
//! [`negotiator`](crate::negotiator) observable.

use std::collections::VecDeque;
use std::ops::Range;
use std::time::Duration;

use slotmap::{Key, KeyData, SlotMap};

use super::{
    AcquireStatus, AcquiredTexture, AdapterId, AdapterOptions, BackendError, BindGroupEntry,
    BindGroupId, BindGroupLayoutId, BufferDescriptor, BufferId, CommandBufferId,
    CommandEncoderId, Completion, DeviceDescriptor, DeviceId, DeviceLost, DeviceLostHandler,
    ErrorHandler, ErrorKind, GpuBackend, GpuHandle, InstanceId, PipelineLayoutId, Presentation,
    QueueId, RenderCommand, RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineId,
    ShaderModuleDescriptor, ShaderModuleId, SurfaceConfig, SurfaceId, SurfaceTextureRelease,
    TextureDescriptor, TextureId, TextureViewDescriptor, TextureViewId,
};

/// Knobs controlling how the recording backend answers requests.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Number of `poll` calls before the adapter request completes. Zero completes inline.
    pub adapter_ready_after_polls: u32,
    pub device_ready_after_polls: u32,
    pub work_done_after_polls: u32,
    /// When set, requests complete on a spawned thread after this delay instead of during `poll`.
    pub complete_on_thread: Option<Duration>,
    pub instance_available: bool,
    pub surface_available: bool,
    pub queue_available: bool,
    pub adapter_failure: Option<String>,
    pub device_failure: Option<String>,
    /// Shader modules whose source contains this marker fail to compile.
    pub shader_error_marker: Option<String>,
    pub adapter_info: wgpu::AdapterInfo,
    pub features: wgpu::Features,
    pub limits: wgpu::Limits,
    pub surface_formats: Vec<wgpu::TextureFormat>,
    /// Statuses returned by successive acquires before falling back to success.
    pub acquire_script: VecDeque<AcquireStatus>,
    pub surface_texture_release: SurfaceTextureRelease,
    pub presentation: Presentation,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            adapter_ready_after_polls: 1,
            device_ready_after_polls: 1,
            work_done_after_polls: 1,
            complete_on_thread: None,
            instance_available: true,
            surface_available: true,
            queue_available: true,
            adapter_failure: None,
            device_failure: None,
            shader_error_marker: None,
            adapter_info: wgpu::AdapterInfo {
                name: "Recording Adapter".to_string(),
                vendor: 0,
                device: 0,
                device_type: wgpu::DeviceType::Cpu,
                driver: "recording".to_string(),
                driver_info: String::new(),
                backend: wgpu::Backend::Empty,
            },
            features: wgpu::Features::empty(),
            limits: wgpu::Limits::default(),
            surface_formats: vec![wgpu::TextureFormat::Bgra8Unorm],
            acquire_script: VecDeque::new(),
            surface_texture_release: SurfaceTextureRelease::AfterPresent,
            presentation: Presentation::Explicit,
        }
    }
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateInstance,
    CreateSurface,
    RequestAdapter,
    RequestDevice,
    GetQueue,
    ConfigureSurface(SurfaceConfig),
    CreateBuffer {
        buffer: BufferId,
        size: wgpu::BufferAddress,
        usage: wgpu::BufferUsages,
        mapped_at_creation: bool,
    },
    WriteMapped {
        buffer: BufferId,
        offset: wgpu::BufferAddress,
        size: wgpu::BufferAddress,
    },
    Unmap(BufferId),
    WriteBuffer {
        buffer: BufferId,
        offset: wgpu::BufferAddress,
        size: wgpu::BufferAddress,
    },
    CreateTexture {
        texture: TextureId,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    },
    CreateTextureView(TextureViewId),
    CreateShaderModule,
    CreateBindGroupLayout(BindGroupLayoutId),
    CreatePipelineLayout(PipelineLayoutId),
    CreateRenderPipeline(RenderPipelineId),
    CreateBindGroup(BindGroupId),
    AcquireTexture(AcquireStatus),
    CreateCommandEncoder(CommandEncoderId),
    CopyBufferToBuffer {
        source: BufferId,
        destination: BufferId,
        size: wgpu::BufferAddress,
    },
    DebugMarker(String),
    BeginRenderPass {
        color: TextureViewId,
        depth: Option<TextureViewId>,
    },
    Command(RenderCommand),
    EndRenderPass,
    FinishEncoder(CommandEncoderId),
    Submit(Vec<CommandBufferId>),
    OnSubmittedWorkDone,
    Present,
    Release(GpuHandle),
}

/// An indexed draw as seen by the backend, with the state bound at the time of the draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub indices: Range<u32>,
    pub pipeline: Option<RenderPipelineId>,
    pub bind_group: Option<BindGroupId>,
    pub dynamic_offsets: Vec<u32>,
}

#[derive(Debug)]
enum Detail {
    Plain,
    Buffer {
        size: wgpu::BufferAddress,
        usage: wgpu::BufferUsages,
        mapped: bool,
        contents: Vec<u8>,
    },
    Texture {
        surface: bool,
    },
    Surface {
        configured: Option<SurfaceConfig>,
        acquired: Option<TextureId>,
    },
    ShaderModule {
        source: String,
    },
    BindGroupLayout {
        entries: Vec<wgpu::BindGroupLayoutEntry>,
    },
    PipelineLayout {
        bind_group_layouts: Vec<BindGroupLayoutId>,
    },
    RenderPipeline {
        layout: PipelineLayoutId,
    },
    BindGroup {
        layout: BindGroupLayoutId,
        entries: Vec<BindGroupEntry>,
    },
    Encoder {
        finished: bool,
    },
    CommandBuffer {
        submitted: bool,
    },
}

#[derive(Debug)]
struct Object {
    kind: &'static str,
    label: Option<String>,
    detail: Detail,
}

slotmap::new_key_type! {
    struct ObjectKey;
}

struct Pending {
    remaining: u32,
    fire: Box<dyn FnOnce() + Send>,
}

/// A [`GpuBackend`] that records calls instead of rendering.
pub struct RecordingBackend {
    config: RecordingConfig,
    objects: SlotMap<ObjectKey, Object>,
    calls: Vec<Call>,
    pending: Vec<Pending>,
    polls: u32,
    double_releases: usize,
    errors: Vec<BackendError>,
    error_handler: Option<ErrorHandler>,
    lost_handler: Option<DeviceLostHandler>,
}

fn key<K: Key>(id: K) -> ObjectKey {
    ObjectKey::from(id.data())
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(RecordingConfig::default())
    }
}

impl RecordingBackend {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            config,
            objects: SlotMap::with_key(),
            calls: Vec::new(),
            pending: Vec::new(),
            polls: 0,
            double_releases: 0,
            errors: Vec::new(),
            error_handler: None,
            lost_handler: None,
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of `poll` calls so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Number of requests whose completion has not run yet.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn double_releases(&self) -> usize {
        self.double_releases
    }

    /// Errors raised so far, in order.
    pub fn errors(&self) -> &[BackendError] {
        &self.errors
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn live_objects_of_kind(&self, kind: &str) -> usize {
        self.objects.values().filter(|object| object.kind == kind).count()
    }

    pub fn is_live(&self, handle: GpuHandle) -> bool {
        self.objects.contains_key(ObjectKey::from(handle.key_data()))
    }

    pub fn label_of(&self, handle: GpuHandle) -> Option<&str> {
        self.objects
            .get(ObjectKey::from(handle.key_data()))
            .and_then(|object| object.label.as_deref())
    }

    pub fn buffer_size(&self, buffer: BufferId) -> Option<wgpu::BufferAddress> {
        match self.objects.get(key(buffer)).map(|object| &object.detail) {
            Some(Detail::Buffer { size, .. }) => Some(*size),
            _ => None,
        }
    }

    /// Current bytes of a buffer, as last written by a mapped write, queue write or copy.
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        match self.objects.get(key(buffer)).map(|object| &object.detail) {
            Some(Detail::Buffer { contents, .. }) => Some(contents.as_slice()),
            _ => None,
        }
    }

    /// Layout entries a bind group layout was created with.
    pub fn bind_group_layout_entries(
        &self,
        layout: BindGroupLayoutId,
    ) -> Option<&[wgpu::BindGroupLayoutEntry]> {
        match self.objects.get(key(layout)).map(|object| &object.detail) {
            Some(Detail::BindGroupLayout { entries }) => Some(entries.as_slice()),
            _ => None,
        }
    }

    pub fn bind_group_entries(&self, bind_group: BindGroupId) -> Option<&[BindGroupEntry]> {
        match self.objects.get(key(bind_group)).map(|object| &object.detail) {
            Some(Detail::BindGroup { entries, .. }) => Some(entries.as_slice()),
            _ => None,
        }
    }

    /// Handles released so far, in release order.
    pub fn released(&self) -> Vec<GpuHandle> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Release(handle) => Some(*handle),
                _ => None,
            })
            .collect()
    }

    /// Every indexed draw recorded so far with the state bound when it was issued.
    pub fn draws(&self) -> Vec<DrawRecord> {
        let mut pipeline = None;
        let mut bind_group = None;
        let mut dynamic_offsets = Vec::new();
        let mut draws = Vec::new();
        for call in &self.calls {
            match call {
                Call::BeginRenderPass { .. } => {
                    pipeline = None;
                    bind_group = None;
                    dynamic_offsets.clear();
                }
                Call::Command(RenderCommand::SetPipeline(id)) => pipeline = Some(*id),
                Call::Command(RenderCommand::SetBindGroup {
                    bind_group: id,
                    dynamic_offsets: offsets,
                    ..
                }) => {
                    bind_group = Some(*id);
                    dynamic_offsets.clone_from(offsets);
                }
                Call::Command(RenderCommand::DrawIndexed { indices, .. }) => {
                    draws.push(DrawRecord {
                        indices: indices.clone(),
                        pipeline,
                        bind_group,
                        dynamic_offsets: dynamic_offsets.clone(),
                    })
                }
                _ => {}
            }
        }
        draws
    }

    /// Counts calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Creates a device and its queue directly, skipping the request protocol.
    ///
    /// Meant for exercising code that only needs a working device.
    pub fn bootstrap_device(&mut self) -> (DeviceId, QueueId) {
        self.insert::<InstanceId>("instance", None, Detail::Plain);
        self.insert::<AdapterId>("adapter", None, Detail::Plain);
        let device = self.insert("device", None, Detail::Plain);
        let queue = self.insert("queue", None, Detail::Plain);
        (device, queue)
    }

    /// Fires the device-lost handler as if the driver had lost the device.
    pub fn simulate_device_lost(&mut self, message: &str) {
        if let Some(handler) = &self.lost_handler {
            handler(DeviceLost {
                reason: "Unknown".to_string(),
                message: message.to_string(),
            });
        }
    }

    fn insert<K: From<KeyData>>(
        &mut self,
        kind: &'static str,
        label: Option<&str>,
        detail: Detail,
    ) -> K {
        let object_key = self.objects.insert(Object {
            kind,
            label: label.map(str::to_string),
            detail,
        });
        K::from(object_key.data())
    }

    fn exists<K: Key>(&self, id: K) -> bool {
        self.objects.contains_key(key(id))
    }

    fn detail<K: Key>(&self, id: K) -> Option<&Detail> {
        self.objects.get(key(id)).map(|object| &object.detail)
    }

    fn detail_mut<K: Key>(&mut self, id: K) -> Option<&mut Detail> {
        self.objects.get_mut(key(id)).map(|object| &mut object.detail)
    }

    fn validation_error(&mut self, message: String) {
        let error = BackendError {
            kind: ErrorKind::Validation,
            message,
        };
        match &self.error_handler {
            Some(handler) => handler(error.clone()),
            None => log::error!("Uncaptured validation error: {}", error.message),
        }
        self.errors.push(error);
    }

    fn schedule<T: Send + 'static>(
        &mut self,
        after_polls: u32,
        result: Result<T, String>,
        on_complete: Completion<T>,
    ) {
        let fire = move || on_complete(result);
        if let Some(delay) = self.config.complete_on_thread {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                fire();
            });
        } else if after_polls == 0 {
            fire();
        } else {
            self.pending.push(Pending {
                remaining: after_polls,
                fire: Box::new(fire),
            });
        }
    }

    fn buffer_check(
        &self,
        buffer: BufferId,
        required: wgpu::BufferUsages,
        range: Option<(wgpu::BufferAddress, wgpu::BufferAddress)>,
        operation: &str,
    ) -> Result<(), String> {
        let Some(Detail::Buffer {
            size,
            usage,
            mapped,
            ..
        }) = self.detail(buffer)
        else {
            return Err(format!("{operation}: buffer does not exist"));
        };
        if !usage.contains(required) {
            return Err(format!(
                "{operation}: buffer usage {usage:?} is missing {required:?}"
            ));
        }
        if *mapped {
            return Err(format!("{operation}: buffer is still mapped"));
        }
        if let Some((offset, length)) = range {
            if offset + length > *size {
                return Err(format!(
                    "{operation}: range {offset}..{} exceeds buffer size {size}",
                    offset + length
                ));
            }
        }
        Ok(())
    }

    fn write_contents(
        &mut self,
        buffer: BufferId,
        offset: wgpu::BufferAddress,
        data: &[u8],
    ) {
        if let Some(Detail::Buffer { contents, .. }) = self.detail_mut(buffer) {
            let start = offset as usize;
            if let Some(target) = contents.get_mut(start..start + data.len()) {
                target.copy_from_slice(data);
            }
        }
    }

    fn check_render_pass(
        &self,
        descriptor: &RenderPassDescriptor<'_>,
        commands: &[RenderCommand],
    ) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.exists(descriptor.color.view) {
            problems.push("render pass: color attachment view does not exist".to_string());
        }
        if let Some(depth) = descriptor.depth {
            if !self.exists(depth.view) {
                problems.push("render pass: depth attachment view does not exist".to_string());
            }
        }

        let alignment = u64::from(self.config.limits.min_uniform_buffer_offset_alignment);
        let mut pipeline_layouts: Vec<BindGroupLayoutId> = Vec::new();
        let mut bound_groups: Vec<Option<BindGroupId>> = Vec::new();
        let mut pipeline_bound = false;
        let mut vertex_bound = false;
        let mut index_bound = false;

        for command in commands {
            match command {
                RenderCommand::SetPipeline(pipeline) => {
                    let layouts = match self.detail(*pipeline) {
                        Some(Detail::RenderPipeline { layout }) => match self.detail(*layout) {
                            Some(Detail::PipelineLayout { bind_group_layouts }) => {
                                bind_group_layouts.clone()
                            }
                            _ => Vec::new(),
                        },
                        _ => {
                            problems.push("set_pipeline: pipeline does not exist".to_string());
                            Vec::new()
                        }
                    };
                    bound_groups = vec![None; layouts.len()];
                    pipeline_layouts = layouts;
                    pipeline_bound = true;
                }
                RenderCommand::SetVertexBuffer { buffer, .. } => {
                    if let Err(problem) =
                        self.buffer_check(*buffer, wgpu::BufferUsages::VERTEX, None, "set_vertex_buffer")
                    {
                        problems.push(problem);
                    }
                    vertex_bound = true;
                }
                RenderCommand::SetIndexBuffer { buffer, .. } => {
                    if let Err(problem) =
                        self.buffer_check(*buffer, wgpu::BufferUsages::INDEX, None, "set_index_buffer")
                    {
                        problems.push(problem);
                    }
                    index_bound = true;
                }
                RenderCommand::SetBindGroup {
                    index,
                    bind_group,
                    dynamic_offsets,
                } => {
                    let Some(Detail::BindGroup { layout, entries }) = self.detail(*bind_group) else {
                        problems.push("set_bind_group: bind group does not exist".to_string());
                        continue;
                    };
                    let slot = *index as usize;
                    if pipeline_layouts.get(slot) != Some(layout) {
                        problems.push(format!(
                            "set_bind_group: group {index} layout does not match the pipeline layout"
                        ));
                    }
                    let layout_entries = match self.detail(*layout) {
                        Some(Detail::BindGroupLayout { entries }) => entries.as_slice(),
                        _ => &[][..],
                    };
                    let dynamic_bindings = layout_entries
                        .iter()
                        .filter(|entry| {
                            matches!(
                                entry.ty,
                                wgpu::BindingType::Buffer {
                                    has_dynamic_offset: true,
                                    ..
                                }
                            )
                        })
                        .map(|entry| entry.binding)
                        .collect::<Vec<_>>();
                    if dynamic_bindings.len() != dynamic_offsets.len() {
                        problems.push(format!(
                            "set_bind_group: {} dynamic offsets given, layout has {} dynamic bindings",
                            dynamic_offsets.len(),
                            dynamic_bindings.len()
                        ));
                    }
                    for (binding, offset) in dynamic_bindings.iter().zip(dynamic_offsets) {
                        let offset = u64::from(*offset);
                        if offset % alignment != 0 {
                            problems.push(format!(
                                "set_bind_group: dynamic offset {offset} is not a multiple of {alignment}"
                            ));
                        }
                        if let Some(entry) = entries.iter().find(|entry| entry.binding == *binding) {
                            let end = entry.offset + offset + entry.size;
                            if self.buffer_size(entry.buffer).is_some_and(|size| end > size) {
                                problems.push(format!(
                                    "set_bind_group: dynamic binding {binding} reads past the end of its buffer"
                                ));
                            }
                        }
                    }
                    if let Some(bound) = bound_groups.get_mut(slot) {
                        *bound = Some(*bind_group);
                    }
                }
                RenderCommand::DrawIndexed { .. } => {
                    if !pipeline_bound {
                        problems.push("draw_indexed: no pipeline bound".to_string());
                    }
                    if !vertex_bound || !index_bound {
                        problems.push("draw_indexed: vertex or index buffer not bound".to_string());
                    }
                    if bound_groups.iter().any(Option::is_none) {
                        problems.push("draw_indexed: a bind group slot is empty".to_string());
                    }
                }
            }
        }
        problems
    }
}

impl GpuBackend for RecordingBackend {
    type SurfaceTarget = ();

    fn name(&self) -> &'static str {
        "recording"
    }

    fn surface_texture_release(&self) -> SurfaceTextureRelease {
        self.config.surface_texture_release
    }

    fn presentation(&self) -> Presentation {
        self.config.presentation
    }

    fn create_instance(&mut self) -> Option<InstanceId> {
        self.calls.push(Call::CreateInstance);
        self.config
            .instance_available
            .then(|| self.insert("instance", None, Detail::Plain))
    }

    fn create_surface(&mut self, instance: InstanceId, _target: ()) -> Option<SurfaceId> {
        self.calls.push(Call::CreateSurface);
        if !self.exists(instance) || !self.config.surface_available {
            return None;
        }
        Some(self.insert(
            "surface",
            None,
            Detail::Surface {
                configured: None,
                acquired: None,
            },
        ))
    }

    fn request_adapter(
        &mut self,
        instance: InstanceId,
        options: &AdapterOptions,
        on_complete: Completion<AdapterId>,
    ) {
        self.calls.push(Call::RequestAdapter);
        let result = if !self.exists(instance) {
            Err("unknown instance".to_string())
        } else if options
            .compatible_surface
            .is_some_and(|surface| !self.exists(surface))
        {
            Err("compatible surface does not exist".to_string())
        } else if let Some(message) = self.config.adapter_failure.clone() {
            Err(message)
        } else {
            Ok(self.insert("adapter", None, Detail::Plain))
        };
        self.schedule(self.config.adapter_ready_after_polls, result, on_complete);
    }

    fn adapter_info(&self, adapter: AdapterId) -> Option<wgpu::AdapterInfo> {
        self.exists(adapter).then(|| self.config.adapter_info.clone())
    }

    fn adapter_features(&self, adapter: AdapterId) -> wgpu::Features {
        if self.exists(adapter) {
            self.config.features
        } else {
            wgpu::Features::empty()
        }
    }

    fn adapter_limits(&self, adapter: AdapterId) -> Option<wgpu::Limits> {
        self.exists(adapter).then(|| self.config.limits.clone())
    }

    fn request_device(
        &mut self,
        adapter: AdapterId,
        descriptor: &DeviceDescriptor<'_>,
        on_complete: Completion<DeviceId>,
    ) {
        self.calls.push(Call::RequestDevice);
        let result = if !self.exists(adapter) {
            Err("unknown adapter".to_string())
        } else if !self.config.features.contains(descriptor.required_features) {
            Err(format!(
                "unsupported features requested: {:?}",
                descriptor.required_features - self.config.features
            ))
        } else if let Some(message) = self.config.device_failure.clone() {
            Err(message)
        } else {
            Ok(self.insert("device", descriptor.label, Detail::Plain))
        };
        self.schedule(self.config.device_ready_after_polls, result, on_complete);
    }

    fn set_device_callbacks(
        &mut self,
        _device: DeviceId,
        on_error: ErrorHandler,
        on_lost: DeviceLostHandler,
    ) {
        self.error_handler = Some(on_error);
        self.lost_handler = Some(on_lost);
    }

    fn device_features(&self, device: DeviceId) -> wgpu::Features {
        if self.exists(device) {
            self.config.features
        } else {
            wgpu::Features::empty()
        }
    }

    fn device_limits(&self, device: DeviceId) -> Option<wgpu::Limits> {
        self.exists(device).then(|| self.config.limits.clone())
    }

    fn get_queue(&mut self, device: DeviceId) -> Option<QueueId> {
        self.calls.push(Call::GetQueue);
        (self.exists(device) && self.config.queue_available)
            .then(|| self.insert("queue", None, Detail::Plain))
    }

    fn surface_capabilities(
        &self,
        surface: SurfaceId,
        adapter: AdapterId,
    ) -> wgpu::SurfaceCapabilities {
        if !self.exists(surface) || !self.exists(adapter) {
            return wgpu::SurfaceCapabilities::default();
        }
        wgpu::SurfaceCapabilities {
            formats: self.config.surface_formats.clone(),
            present_modes: vec![wgpu::PresentMode::Fifo],
            alpha_modes: vec![wgpu::CompositeAlphaMode::Opaque, wgpu::CompositeAlphaMode::Auto],
            usages: wgpu::TextureUsages::RENDER_ATTACHMENT,
        }
    }

    fn configure_surface(&mut self, surface: SurfaceId, device: DeviceId, config: &SurfaceConfig) {
        self.calls.push(Call::ConfigureSurface(*config));
        if !self.exists(device) {
            self.validation_error("configure_surface: device does not exist".to_string());
            return;
        }
        if !self.config.surface_formats.contains(&config.format) {
            self.validation_error(format!(
                "configure_surface: format {:?} is not supported",
                config.format
            ));
        }
        match self.detail_mut(surface) {
            Some(Detail::Surface { configured, .. }) => *configured = Some(*config),
            _ => self.validation_error("configure_surface: surface does not exist".to_string()),
        }
    }

    fn create_buffer(
        &mut self,
        device: DeviceId,
        descriptor: &BufferDescriptor<'_>,
    ) -> Option<BufferId> {
        if !self.exists(device) {
            return None;
        }
        if descriptor.mapped_at_creation && descriptor.size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            self.validation_error(format!(
                "create_buffer: mapped buffer size {} is not a multiple of {}",
                descriptor.size,
                wgpu::COPY_BUFFER_ALIGNMENT
            ));
            return None;
        }
        let buffer: BufferId = self.insert(
            "buffer",
            descriptor.label,
            Detail::Buffer {
                size: descriptor.size,
                usage: descriptor.usage,
                mapped: descriptor.mapped_at_creation,
                contents: vec![0; descriptor.size as usize],
            },
        );
        self.calls.push(Call::CreateBuffer {
            buffer,
            size: descriptor.size,
            usage: descriptor.usage,
            mapped_at_creation: descriptor.mapped_at_creation,
        });
        Some(buffer)
    }

    fn write_mapped(&mut self, buffer: BufferId, offset: wgpu::BufferAddress, data: &[u8]) {
        self.calls.push(Call::WriteMapped {
            buffer,
            offset,
            size: data.len() as wgpu::BufferAddress,
        });
        let mapped_size = match self.detail(buffer) {
            Some(Detail::Buffer {
                mapped: true, size, ..
            }) => Some(*size),
            _ => None,
        };
        match mapped_size {
            Some(size) if offset + data.len() as wgpu::BufferAddress <= size => {
                self.write_contents(buffer, offset, data)
            }
            Some(_) => self.validation_error("write_mapped: write exceeds buffer size".to_string()),
            None => self.validation_error("write_mapped: buffer is not mapped".to_string()),
        }
    }

    fn unmap(&mut self, buffer: BufferId) {
        self.calls.push(Call::Unmap(buffer));
        if let Some(Detail::Buffer { mapped, .. }) = self.detail_mut(buffer) {
            *mapped = false;
        }
    }

    fn write_buffer(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        offset: wgpu::BufferAddress,
        data: &[u8],
    ) {
        let size = data.len() as wgpu::BufferAddress;
        self.calls.push(Call::WriteBuffer {
            buffer,
            offset,
            size,
        });
        if !self.exists(queue) {
            self.validation_error("write_buffer: queue does not exist".to_string());
            return;
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            self.validation_error(format!(
                "write_buffer: offset {offset} and size {size} must be multiples of {}",
                wgpu::COPY_BUFFER_ALIGNMENT
            ));
            return;
        }
        match self.buffer_check(
            buffer,
            wgpu::BufferUsages::COPY_DST,
            Some((offset, size)),
            "write_buffer",
        ) {
            Ok(()) => self.write_contents(buffer, offset, data),
            Err(problem) => self.validation_error(problem),
        }
    }

    fn create_texture(
        &mut self,
        device: DeviceId,
        descriptor: &TextureDescriptor<'_>,
    ) -> Option<TextureId> {
        if !self.exists(device) {
            return None;
        }
        let max = self.config.limits.max_texture_dimension_2d;
        if descriptor.width == 0
            || descriptor.height == 0
            || descriptor.width > max
            || descriptor.height > max
        {
            self.validation_error(format!(
                "create_texture: size {}x{} is outside 1..={max}",
                descriptor.width, descriptor.height
            ));
            return None;
        }
        let texture: TextureId =
            self.insert("texture", descriptor.label, Detail::Texture { surface: false });
        self.calls.push(Call::CreateTexture {
            texture,
            format: descriptor.format,
            width: descriptor.width,
            height: descriptor.height,
        });
        Some(texture)
    }

    fn create_texture_view(
        &mut self,
        texture: TextureId,
        descriptor: &TextureViewDescriptor<'_>,
    ) -> Option<TextureViewId> {
        if !self.exists(texture) {
            return None;
        }
        let view: TextureViewId = self.insert("texture view", descriptor.label, Detail::Plain);
        self.calls.push(Call::CreateTextureView(view));
        Some(view)
    }

    fn create_shader_module(
        &mut self,
        device: DeviceId,
        descriptor: &ShaderModuleDescriptor<'_>,
    ) -> Option<ShaderModuleId> {
        self.calls.push(Call::CreateShaderModule);
        if !self.exists(device) {
            return None;
        }
        if let Some(marker) = &self.config.shader_error_marker {
            if descriptor.wgsl_source.contains(marker.as_str()) {
                log::error!("Shader compilation failed: found `{marker}`");
                return None;
            }
        }
        Some(self.insert(
            "shader module",
            descriptor.label,
            Detail::ShaderModule {
                source: descriptor.wgsl_source.to_string(),
            },
        ))
    }

    fn create_bind_group_layout(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Option<BindGroupLayoutId> {
        if !self.exists(device) {
            return None;
        }
        let layout: BindGroupLayoutId = self.insert(
            "bind group layout",
            label,
            Detail::BindGroupLayout {
                entries: entries.to_vec(),
            },
        );
        self.calls.push(Call::CreateBindGroupLayout(layout));
        Some(layout)
    }

    fn create_pipeline_layout(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> Option<PipelineLayoutId> {
        if !self.exists(device) || !bind_group_layouts.iter().all(|layout| self.exists(*layout)) {
            return None;
        }
        let layout: PipelineLayoutId = self.insert(
            "pipeline layout",
            label,
            Detail::PipelineLayout {
                bind_group_layouts: bind_group_layouts.to_vec(),
            },
        );
        self.calls.push(Call::CreatePipelineLayout(layout));
        Some(layout)
    }

    fn create_render_pipeline(
        &mut self,
        device: DeviceId,
        descriptor: &RenderPipelineDescriptor<'_>,
    ) -> Option<RenderPipelineId> {
        if !self.exists(device) || !self.exists(descriptor.layout) {
            return None;
        }
        let Some(Detail::ShaderModule { source }) = self.detail(descriptor.shader) else {
            return None;
        };
        for entry in [descriptor.vertex_entry, descriptor.fragment_entry] {
            if !source.contains(&format!("fn {entry}(")) {
                log::error!("Render pipeline: shader has no entry point `{entry}`");
                return None;
            }
        }
        let attribute_count: usize = descriptor
            .vertex_buffers
            .iter()
            .map(|layout| layout.attributes.len())
            .sum();
        if attribute_count > self.config.limits.max_vertex_attributes as usize {
            log::error!("Render pipeline: {attribute_count} vertex attributes exceed the limit");
            return None;
        }
        let pipeline: RenderPipelineId = self.insert(
            "render pipeline",
            descriptor.label,
            Detail::RenderPipeline {
                layout: descriptor.layout,
            },
        );
        self.calls.push(Call::CreateRenderPipeline(pipeline));
        Some(pipeline)
    }

    fn create_bind_group(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
        layout: BindGroupLayoutId,
        entries: &[BindGroupEntry],
    ) -> Option<BindGroupId> {
        if !self.exists(device) {
            return None;
        }
        let Some(Detail::BindGroupLayout {
            entries: layout_entries,
        }) = self.detail(layout)
        else {
            return None;
        };
        let mut problems = Vec::new();
        if layout_entries.len() != entries.len() {
            problems.push(format!(
                "create_bind_group: {} entries given, layout declares {}",
                entries.len(),
                layout_entries.len()
            ));
        }
        for entry in entries {
            let Some(declared) = layout_entries
                .iter()
                .find(|declared| declared.binding == entry.binding)
            else {
                problems.push(format!(
                    "create_bind_group: binding {} is not in the layout",
                    entry.binding
                ));
                continue;
            };
            if let wgpu::BindingType::Buffer {
                min_binding_size: Some(min),
                ..
            } = declared.ty
            {
                if entry.size < min.get() {
                    problems.push(format!(
                        "create_bind_group: binding {} is smaller than its minimum size",
                        entry.binding
                    ));
                }
            }
            if let Err(problem) = self.buffer_check(
                entry.buffer,
                wgpu::BufferUsages::UNIFORM,
                Some((entry.offset, entry.size)),
                "create_bind_group",
            ) {
                problems.push(problem);
            }
        }
        if !problems.is_empty() {
            for problem in problems {
                self.validation_error(problem);
            }
            return None;
        }
        let bind_group: BindGroupId = self.insert(
            "bind group",
            label,
            Detail::BindGroup {
                layout,
                entries: entries.to_vec(),
            },
        );
        self.calls.push(Call::CreateBindGroup(bind_group));
        Some(bind_group)
    }

    fn current_surface_texture(&mut self, surface: SurfaceId) -> AcquiredTexture {
        let status = self
            .config
            .acquire_script
            .pop_front()
            .unwrap_or(AcquireStatus::Success);
        self.calls.push(Call::AcquireTexture(status));

        let previous = match self.detail(surface) {
            Some(Detail::Surface {
                configured: Some(_),
                acquired,
            }) => *acquired,
            _ => {
                self.validation_error("acquire: surface is not configured".to_string());
                return AcquiredTexture {
                    status: AcquireStatus::Other,
                    texture: None,
                };
            }
        };
        if previous.is_some_and(|texture| self.exists(texture)) {
            self.validation_error(
                "acquire: previous surface texture was never released".to_string(),
            );
        }
        if status != AcquireStatus::Success {
            return AcquiredTexture {
                status,
                texture: None,
            };
        }
        let texture: TextureId =
            self.insert("texture", Some("surface texture"), Detail::Texture { surface: true });
        if let Some(Detail::Surface { acquired, .. }) = self.detail_mut(surface) {
            *acquired = Some(texture);
        }
        AcquiredTexture {
            status,
            texture: Some(texture),
        }
    }

    fn create_command_encoder(
        &mut self,
        device: DeviceId,
        label: Option<&str>,
    ) -> Option<CommandEncoderId> {
        if !self.exists(device) {
            return None;
        }
        let encoder: CommandEncoderId =
            self.insert("command encoder", label, Detail::Encoder { finished: false });
        self.calls.push(Call::CreateCommandEncoder(encoder));
        Some(encoder)
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
        self.calls.push(Call::CopyBufferToBuffer {
            source,
            destination,
            size,
        });
        if !matches!(self.detail(encoder), Some(Detail::Encoder { finished: false })) {
            self.validation_error("copy_buffer_to_buffer: encoder is not recording".to_string());
            return;
        }
        let checks = [
            self.buffer_check(
                source,
                wgpu::BufferUsages::COPY_SRC,
                Some((source_offset, size)),
                "copy_buffer_to_buffer source",
            ),
            self.buffer_check(
                destination,
                wgpu::BufferUsages::COPY_DST,
                Some((destination_offset, size)),
                "copy_buffer_to_buffer destination",
            ),
        ];
        let mut valid = true;
        for check in checks {
            if let Err(problem) = check {
                self.validation_error(problem);
                valid = false;
            }
        }
        if size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            self.validation_error(format!(
                "copy_buffer_to_buffer: size {size} is not a multiple of {}",
                wgpu::COPY_BUFFER_ALIGNMENT
            ));
            valid = false;
        }
        if valid {
            // Copies land when recorded; nothing reads the destination before submission.
            let start = source_offset as usize;
            let data = self
                .buffer_contents(source)
                .and_then(|contents| contents.get(start..start + size as usize))
                .map(<[u8]>::to_vec);
            if let Some(data) = data {
                self.write_contents(destination, destination_offset, &data);
            }
        }
    }

    fn insert_debug_marker(&mut self, _encoder: CommandEncoderId, label: &str) {
        self.calls.push(Call::DebugMarker(label.to_string()));
    }

    fn encode_render_pass(
        &mut self,
        encoder: CommandEncoderId,
        descriptor: &RenderPassDescriptor<'_>,
        commands: &[RenderCommand],
    ) {
        self.calls.push(Call::BeginRenderPass {
            color: descriptor.color.view,
            depth: descriptor.depth.map(|depth| depth.view),
        });
        self.calls
            .extend(commands.iter().cloned().map(Call::Command));
        self.calls.push(Call::EndRenderPass);

        if !matches!(self.detail(encoder), Some(Detail::Encoder { finished: false })) {
            self.validation_error("render pass: encoder is not recording".to_string());
        }
        for problem in self.check_render_pass(descriptor, commands) {
            self.validation_error(problem);
        }
    }

    fn finish_encoder(&mut self, encoder: CommandEncoderId) -> Option<CommandBufferId> {
        self.calls.push(Call::FinishEncoder(encoder));
        match self.detail_mut(encoder) {
            Some(Detail::Encoder { finished }) if !*finished => *finished = true,
            _ => return None,
        }
        Some(self.insert(
            "command buffer",
            None,
            Detail::CommandBuffer { submitted: false },
        ))
    }

    fn submit(&mut self, queue: QueueId, command_buffers: &[CommandBufferId]) {
        self.calls.push(Call::Submit(command_buffers.to_vec()));
        if !self.exists(queue) {
            self.validation_error("submit: queue does not exist".to_string());
            return;
        }
        for command_buffer in command_buffers {
            match self.detail_mut(*command_buffer) {
                Some(Detail::CommandBuffer { submitted }) if !*submitted => *submitted = true,
                _ => self.validation_error(
                    "submit: command buffer is invalid or was already submitted".to_string(),
                ),
            }
        }
    }

    fn on_submitted_work_done(&mut self, queue: QueueId, on_complete: Completion<()>) {
        self.calls.push(Call::OnSubmittedWorkDone);
        let result = if self.exists(queue) {
            Ok(())
        } else {
            Err("unknown queue".to_string())
        };
        self.schedule(self.config.work_done_after_polls, result, on_complete);
    }

    fn present(&mut self, surface: SurfaceId) {
        self.calls.push(Call::Present);
        let acquired = match self.detail_mut(surface) {
            Some(Detail::Surface { acquired, .. }) => acquired.take(),
            _ => None,
        };
        match acquired {
            None => self.validation_error("present: no surface texture was acquired".to_string()),
            Some(texture) => {
                if self.config.surface_texture_release == SurfaceTextureRelease::AfterPresent
                    && !self.exists(texture)
                {
                    self.validation_error(
                        "present: surface texture was released before present".to_string(),
                    );
                }
                // Keep tracking the texture so a missing release is still caught at next acquire.
                if let Some(Detail::Surface { acquired, .. }) = self.detail_mut(surface) {
                    *acquired = Some(texture);
                }
            }
        }
    }

    fn poll(&mut self) {
        self.polls += 1;
        let mut ready = Vec::new();
        for mut pending in std::mem::take(&mut self.pending) {
            pending.remaining = pending.remaining.saturating_sub(1);
            if pending.remaining == 0 {
                ready.push(pending.fire);
            } else {
                self.pending.push(pending);
            }
        }
        for fire in ready {
            fire();
        }
    }

    fn release(&mut self, handle: GpuHandle) {
        self.calls.push(Call::Release(handle));
        match self.objects.remove(ObjectKey::from(handle.key_data())) {
            Some(object) => {
                if let Detail::Buffer { mapped: true, .. } = object.detail {
                    log::debug!("Released {} while still mapped", object.kind);
                }
            }
            None => {
                self.double_releases += 1;
                log::warn!("Release of unknown or already released {}", handle.kind());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_complete_after_configured_polls() {
        let mut backend = RecordingBackend::new(RecordingConfig {
            adapter_ready_after_polls: 3,
            ..Default::default()
        });
        let instance = backend.create_instance().unwrap();
        let (sender, receiver) = std::sync::mpsc::channel();
        backend.request_adapter(
            instance,
            &AdapterOptions::default(),
            Box::new(move |result| sender.send(result).unwrap()),
        );
        backend.poll();
        backend.poll();
        assert!(receiver.try_recv().is_err());
        backend.poll();
        assert!(receiver.try_recv().unwrap().is_ok());
        assert_eq!(backend.pending_requests(), 0);
    }

    #[test]
    fn test_write_without_copy_dst_is_a_validation_error() {
        let mut backend = RecordingBackend::default();
        let (device, queue) = backend.bootstrap_device();
        let buffer = backend
            .create_buffer(
                device,
                &BufferDescriptor {
                    label: None,
                    size: 16,
                    usage: wgpu::BufferUsages::VERTEX,
                    mapped_at_creation: false,
                },
            )
            .unwrap();
        backend.write_buffer(queue, buffer, 0, &[0; 16]);
        assert_eq!(backend.errors().len(), 1);
        assert_eq!(backend.errors()[0].kind, ErrorKind::Validation);
    }

    #[test]
    fn test_releasing_twice_is_counted_not_fatal() {
        let mut backend = RecordingBackend::default();
        let instance = backend.create_instance().unwrap();
        backend.release(GpuHandle::Instance(instance));
        backend.release(GpuHandle::Instance(instance));
        assert_eq!(backend.double_releases(), 1);
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn test_unaligned_dynamic_offset_is_reported() {
        let mut backend = RecordingBackend::default();
        let (device, _queue) = backend.bootstrap_device();
        let buffer = backend
            .create_buffer(
                device,
                &BufferDescriptor {
                    label: None,
                    size: 1024,
                    usage: wgpu::BufferUsages::UNIFORM,
                    mapped_at_creation: false,
                },
            )
            .unwrap();
        let layout = backend
            .create_bind_group_layout(
                device,
                None,
                &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            )
            .unwrap();
        let bind_group = backend
            .create_bind_group(
                device,
                None,
                layout,
                &[BindGroupEntry {
                    binding: 0,
                    buffer,
                    offset: 0,
                    size: 64,
                }],
            )
            .unwrap();
        let problems = backend.check_render_pass(
            &RenderPassDescriptor {
                label: None,
                color: super::super::ColorAttachment {
                    view: TextureViewId::null(),
                    clear_color: wgpu::Color::BLACK,
                },
                depth: None,
            },
            &[RenderCommand::SetBindGroup {
                index: 0,
                bind_group,
                dynamic_offsets: vec![64],
            }],
        );
        assert!(problems
            .iter()
            .any(|problem| problem.contains("is not a multiple of 256")));
    }
}
