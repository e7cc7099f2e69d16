//! # Resource Allocation
//!
//! Buffer creation and upload, plus the alignment arithmetic behind dynamic uniform records.
//!
//! ## Upload Paths
//!
//! - **Staging upload**: GPU-only buffers (vertex, index, ...) with initial contents are filled
//!   through a temporary `MAP_WRITE | COPY_SRC` buffer. The staging buffer is mapped at creation,
//!   written, unmapped, copied into the destination by a one-off command buffer and released as
//!   soon as the copy is submitted. The destination automatically gains `COPY_DST`.
//! - **Mapped at creation**: buffers that are themselves `MAP_WRITE` are written in place.
//! - **Queue write**: small buffers rewritten every frame (uniforms) go through
//!   [`GpuBackend::write_buffer`], see [`Allocator::write`].
//!
//! ## Dynamic Uniform Records
//!
//! A buffer holding several records addressed by dynamic offsets must space them by
//! `round_up_to_multiple(record_size, min_uniform_buffer_offset_alignment)`.
//! [`UniformLayout`] computes that stride and the size of the whole buffer.

use crate::backend::{BufferDescriptor, BufferId, DeviceId, GpuBackend, GpuHandle, QueueId};
use crate::error::InitError;

/// Smallest multiple of `step` that is greater than or equal to `value`.
///
/// `step` must be nonzero.
pub fn round_up_to_multiple(value: u64, step: u64) -> u64 {
    debug_assert!(step != 0, "alignment step must be nonzero");
    step * (value / step + u64::from(value % step != 0))
}

/// Placement of the per-frame block and the per-draw records inside one uniform buffer.
///
/// ```text
/// | constant block | pad | record 0 | pad | record 1 | pad | ... | record max-1 | pad |
/// 0                constant_stride   +dynamic_stride
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLayout {
    /// Size of the per-frame block in bytes.
    pub constant_size: u64,
    /// Size of one per-draw record in bytes.
    pub dynamic_size: u64,
    /// The device's `min_uniform_buffer_offset_alignment`.
    pub alignment: u64,
    pub max_records: u32,
}

impl UniformLayout {
    /// Describes a buffer holding one constant block and up to `max_records` dynamic records.
    ///
    /// # Parameters
    ///
    /// - `constant_size`: Bytes in the block bound at a fixed offset (the frame uniforms).
    /// - `dynamic_size`: Bytes in one record bound with a dynamic offset (the object uniforms).
    /// - `alignment`: Alignment both regions are padded to; must be nonzero.
    /// - `max_records`: How many records the dynamic region has room for.
    pub fn new(constant_size: u64, dynamic_size: u64, alignment: u64, max_records: u32) -> Self {
        Self {
            constant_size,
            dynamic_size,
            alignment,
            max_records,
        }
    }

    /// Space the constant block takes, padded to the alignment.
    pub fn constant_stride(&self) -> u64 {
        round_up_to_multiple(self.constant_size, self.alignment)
    }

    /// Byte distance between two consecutive dynamic records.
    pub fn dynamic_stride(&self) -> u64 {
        round_up_to_multiple(self.dynamic_size, self.alignment)
    }

    /// Where the first dynamic record starts in the buffer.
    pub fn dynamic_region_offset(&self) -> u64 {
        self.constant_stride()
    }

    /// Bytes covered by all `max_records` records.
    pub fn dynamic_region_size(&self) -> u64 {
        self.dynamic_stride() * u64::from(self.max_records)
    }

    /// Size of the whole uniform buffer.
    ///
    /// # Returns
    ///
    /// `constant_stride + dynamic_stride * max_records`, which is always a multiple of the
    /// alignment.
    pub fn total_size(&self) -> u64 {
        self.dynamic_region_offset() + self.dynamic_region_size()
    }

    /// Dynamic offset passed when binding record `index`, relative to the region start.
    pub fn dynamic_offset(&self, index: u32) -> u32 {
        (u64::from(index) * self.dynamic_stride()) as u32
    }

    /// Absolute byte offset of record `index` in the buffer.
    pub fn record_offset(&self, index: u32) -> u64 {
        self.dynamic_region_offset() + u64::from(self.dynamic_offset(index))
    }
}

/// A created buffer together with what it was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    pub id: BufferId,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

impl GpuBuffer {
    pub fn release<B: GpuBackend>(self, backend: &mut B) {
        backend.release(GpuHandle::Buffer(self.id));
    }
}

/// Creates and fills buffers on one device.
#[derive(Debug, Clone, Copy)]
pub struct Allocator {
    device: DeviceId,
    queue: QueueId,
}

impl Allocator {
    pub fn new(device: DeviceId, queue: QueueId) -> Self {
        Self { device, queue }
    }

    /// Creates an uninitialized buffer.
    ///
    /// The size is padded to [`wgpu::COPY_BUFFER_ALIGNMENT`] so the buffer can take part in
    /// copies and queue writes.
    pub fn create_buffer<B: GpuBackend>(
        &self,
        backend: &mut B,
        label: &'static str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<GpuBuffer, InitError> {
        let size = round_up_to_multiple(size, wgpu::COPY_BUFFER_ALIGNMENT);
        let id = backend
            .create_buffer(
                self.device,
                &BufferDescriptor {
                    label: Some(label),
                    size,
                    usage,
                    mapped_at_creation: false,
                },
            )
            .ok_or(InitError::ResourceCreation(label))?;
        log::debug!("Created {label}: {size} bytes, {usage:?}");
        Ok(GpuBuffer { id, size, usage })
    }

    /// Creates a buffer holding `contents`, padded with zeros to a multiple of four bytes.
    pub fn create_buffer_init<B: GpuBackend>(
        &self,
        backend: &mut B,
        label: &'static str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<GpuBuffer, InitError> {
        let size = round_up_to_multiple(contents.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        let mut padded = contents.to_vec();
        padded.resize(size as usize, 0);

        if usage.contains(wgpu::BufferUsages::MAP_WRITE) {
            let id = backend
                .create_buffer(
                    self.device,
                    &BufferDescriptor {
                        label: Some(label),
                        size,
                        usage,
                        mapped_at_creation: true,
                    },
                )
                .ok_or(InitError::ResourceCreation(label))?;
            backend.write_mapped(id, 0, &padded);
            backend.unmap(id);
            log::debug!("Created {label}: {size} bytes, written in place");
            return Ok(GpuBuffer { id, size, usage });
        }

        let usage = usage | wgpu::BufferUsages::COPY_DST;
        let destination = self.create_buffer(backend, label, size, usage)?;
        if let Err(err) = self.stage(backend, destination, &padded) {
            destination.release(backend);
            return Err(err);
        }
        Ok(destination)
    }

    /// Copies `data` into `destination` through a temporary staging buffer.
    fn stage<B: GpuBackend>(
        &self,
        backend: &mut B,
        destination: GpuBuffer,
        data: &[u8],
    ) -> Result<(), InitError> {
        let size = data.len() as u64;
        let staging = backend
            .create_buffer(
                self.device,
                &BufferDescriptor {
                    label: Some("Staging Buffer"),
                    size,
                    usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: true,
                },
            )
            .ok_or(InitError::ResourceCreation("staging buffer"))?;
        backend.write_mapped(staging, 0, data);
        backend.unmap(staging);

        let Some(encoder) = backend.create_command_encoder(self.device, Some("Upload Encoder"))
        else {
            backend.release(GpuHandle::Buffer(staging));
            return Err(InitError::ResourceCreation("upload command encoder"));
        };
        backend.copy_buffer_to_buffer(encoder, staging, 0, destination.id, 0, size);
        let command_buffer = backend.finish_encoder(encoder);
        if let Some(command_buffer) = command_buffer {
            backend.submit(self.queue, &[command_buffer]);
            backend.release(GpuHandle::CommandBuffer(command_buffer));
        }
        backend.release(GpuHandle::CommandEncoder(encoder));
        // The queue keeps the staging memory alive until the copy has executed.
        backend.release(GpuHandle::Buffer(staging));

        match command_buffer {
            Some(_) => {
                log::debug!("Uploaded {size} bytes through a staging buffer");
                Ok(())
            }
            None => Err(InitError::ResourceCreation("upload command buffer")),
        }
    }

    /// Enqueues a direct write of `data` at `offset`.
    pub fn write<B: GpuBackend>(&self, backend: &mut B, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        backend.write_buffer(self.queue, buffer.id, offset, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Call, RecordingBackend};

    #[test]
    fn test_round_up_is_smallest_multiple() {
        for alignment in [1, 2, 4, 16, 64, 256, 512] {
            for value in 0..=1100 {
                let rounded = round_up_to_multiple(value, alignment);
                assert_eq!(rounded % alignment, 0);
                assert!(rounded >= value);
                assert!(rounded - value < alignment);
            }
        }
    }

    #[test]
    fn test_round_up_known_values() {
        assert_eq!(round_up_to_multiple(0, 256), 0);
        assert_eq!(round_up_to_multiple(80, 256), 256);
        assert_eq!(round_up_to_multiple(256, 256), 256);
        assert_eq!(round_up_to_multiple(257, 256), 512);
        assert_eq!(round_up_to_multiple(36, 4), 36);
        assert_eq!(round_up_to_multiple(30, 4), 32);
    }

    #[test]
    fn test_uniform_layout_sizes() {
        let layout = UniformLayout::new(144, 80, 256, 8);
        assert_eq!(layout.constant_stride(), 256);
        assert_eq!(layout.dynamic_stride(), 256);
        assert_eq!(layout.dynamic_region_size(), 256 * 8);
        assert_eq!(layout.total_size(), 256 + 256 * 8);
        assert_eq!(layout.dynamic_offset(0), 0);
        assert_eq!(layout.dynamic_offset(3), 768);
        assert_eq!(layout.record_offset(1), 512);
    }

    #[test]
    fn test_dynamic_stride_covers_block_and_alignment() {
        for alignment in [16, 64, 256] {
            for block in [1, 64, 80, 255, 256, 300] {
                let layout = UniformLayout::new(144, block, alignment, 4);
                assert!(layout.dynamic_stride() >= block.max(alignment));
                assert_eq!(layout.dynamic_region_size(), layout.dynamic_stride() * 4);
            }
        }
    }

    #[test]
    fn test_staging_upload_sequence() {
        let mut backend = RecordingBackend::default();
        let (device, queue) = backend.bootstrap_device();
        let allocator = Allocator::new(device, queue);
        backend.clear_calls();

        let data = [1u8, 2, 3, 4, 5, 6];
        let buffer = allocator
            .create_buffer_init(&mut backend, "Vertex Buffer", &data, wgpu::BufferUsages::VERTEX)
            .unwrap();

        assert_eq!(buffer.size, 8);
        assert!(buffer
            .usage
            .contains(wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST));
        assert_eq!(
            backend.buffer_contents(buffer.id),
            Some(&[1u8, 2, 3, 4, 5, 6, 0, 0][..])
        );
        assert!(backend.errors().is_empty());
        // Only the destination survives.
        assert_eq!(backend.live_objects_of_kind("buffer"), 1);
        assert_eq!(backend.live_objects_of_kind("command encoder"), 0);
        assert_eq!(backend.live_objects_of_kind("command buffer"), 0);

        let order: Vec<&str> = backend
            .calls()
            .iter()
            .map(|call| match call {
                Call::CreateBuffer { .. } => "create",
                Call::WriteMapped { .. } => "write",
                Call::Unmap(_) => "unmap",
                Call::CreateCommandEncoder(_) => "encoder",
                Call::CopyBufferToBuffer { .. } => "copy",
                Call::FinishEncoder(_) => "finish",
                Call::Submit(_) => "submit",
                Call::Release(_) => "release",
                _ => "other",
            })
            .collect();
        assert_eq!(
            order,
            [
                "create", "create", "write", "unmap", "encoder", "copy", "finish", "submit",
                "release", "release", "release"
            ]
        );
    }

    #[test]
    fn test_mappable_buffer_written_in_place() {
        let mut backend = RecordingBackend::default();
        let (device, queue) = backend.bootstrap_device();
        let allocator = Allocator::new(device, queue);

        let buffer = allocator
            .create_buffer_init(
                &mut backend,
                "Readback Source",
                &[7; 12],
                wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            )
            .unwrap();

        assert_eq!(backend.buffer_contents(buffer.id), Some(&[7u8; 12][..]));
        assert_eq!(
            backend.count_calls(|call| matches!(call, Call::CopyBufferToBuffer { .. })),
            0
        );
    }

    #[test]
    fn test_queue_write_updates_range() {
        let mut backend = RecordingBackend::default();
        let (device, queue) = backend.bootstrap_device();
        let allocator = Allocator::new(device, queue);

        let buffer = allocator
            .create_buffer(
                &mut backend,
                "Uniform Buffer",
                16,
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            )
            .unwrap();
        allocator.write(&mut backend, &buffer, 8, &[9, 9, 9, 9]);

        assert_eq!(
            backend.buffer_contents(buffer.id),
            Some(&[0u8, 0, 0, 0, 0, 0, 0, 0, 9, 9, 9, 9, 0, 0, 0, 0][..])
        );
        assert!(backend.errors().is_empty());
    }

    #[test]
    fn test_write_without_copy_dst_raises_validation_error() {
        let mut backend = RecordingBackend::default();
        let (device, queue) = backend.bootstrap_device();
        let allocator = Allocator::new(device, queue);

        let buffer = allocator
            .create_buffer(&mut backend, "Uniform Buffer", 16, wgpu::BufferUsages::UNIFORM)
            .unwrap();
        allocator.write(&mut backend, &buffer, 0, &[0; 16]);

        assert_eq!(backend.errors().len(), 1);
    }
}
