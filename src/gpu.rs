//! # GPU Context
//!
//! `Gpu` owns the backend together with the handles every other component needs: instance,
//! surface, adapter, device and queue. It replaces any global state; components receive the
//! context (or the ids it hands out) explicitly.
//!
//! ## Initialization Order
//!
//! 1. Instance.
//! 2. Surface for the window, so the adapter can be picked for it.
//! 3. Adapter, waited on through the negotiator. Its properties, features and limits are logged.
//! 4. Device, requested with the configured features and limits clamped to the adapter's
//!    texture resolution. The uncaptured-error and device-lost handlers are installed right
//!    away, then the device's capabilities are logged and cached.
//! 5. Queue.
//! 6. Surface configuration: the first reported format, `RENDER_ATTACHMENT` usage, the configured
//!    present mode (falling back to `Fifo`), automatic alpha compositing and the window size.
//!
//! Each handle is stored as soon as it exists, so a failure at any step leaves everything acquired
//! so far in place for [`Gpu::release`].

use crate::backend::{
    AdapterId, AdapterOptions, BackendError, DeviceDescriptor, DeviceId, DeviceLost, GpuBackend,
    GpuHandle, InstanceId, QueueId, SurfaceConfig, SurfaceId,
};
use crate::error::InitError;
use crate::negotiator::{self, Capabilities};
use crate::settings::Settings;

/// The backend plus every top-level handle acquired from it.
///
/// Each handle is `None` until its step of [`Gpu::initialize`] succeeds and again after
/// [`Gpu::release`].
pub struct Gpu<B: GpuBackend> {
    /// The driver all ids below belong to.
    pub backend: B,
    pub instance: Option<InstanceId>,
    /// Surface of the window the renderer draws into.
    pub surface: Option<SurfaceId>,
    pub adapter: Option<AdapterId>,
    pub device: Option<DeviceId>,
    /// The device's only queue; every submit and buffer write goes through it.
    pub queue: Option<QueueId>,
    /// The configuration last applied to `surface`.
    pub surface_config: Option<SurfaceConfig>,
    /// What the adapter offered, as logged during initialization.
    pub adapter_capabilities: Option<Capabilities>,
    /// What the device actually grants. Uniform offsets are aligned to these limits.
    pub device_capabilities: Option<Capabilities>,
}

fn log_uncaptured_error(error: BackendError) {
    log::error!(
        "Uncaptured device error: type {:?} ({})",
        error.kind,
        error.message
    );
}

fn log_device_lost(lost: DeviceLost) {
    if lost.reason == "Destroyed" {
        log::info!("Device released: {}", lost.message);
    } else {
        log::error!("Device lost: reason {} ({})", lost.reason, lost.message);
    }
}

impl<B: GpuBackend> Gpu<B> {
    /// Wraps `backend` without touching it. Nothing is acquired until [`Gpu::initialize`].
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            instance: None,
            surface: None,
            adapter: None,
            device: None,
            queue: None,
            surface_config: None,
            adapter_capabilities: None,
            device_capabilities: None,
        }
    }

    /// Acquires instance, surface, adapter, device and queue, then configures the surface.
    ///
    /// # Parameters
    ///
    /// - `target`: What the surface is created for; the window in the application, `()` for the
    ///   recording backend.
    /// - `settings`: Power preference, required features and limits, surface size and present
    ///   mode, and how to wait on the adapter and device requests.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the surface is configured. On error the handles acquired so far stay in
    /// place for [`Gpu::release`].
    pub async fn initialize(
        &mut self,
        target: B::SurfaceTarget,
        settings: &Settings,
    ) -> Result<(), InitError> {
        let instance = self
            .backend
            .create_instance()
            .ok_or(InitError::InstanceCreation)?;
        self.instance = Some(instance);
        log::info!("Using {} backend", self.backend.name());

        let surface = self
            .backend
            .create_surface(instance, target)
            .ok_or(InitError::SurfaceCreation)?;
        self.surface = Some(surface);

        let adapter = negotiator::acquire_adapter(
            &mut self.backend,
            instance,
            &AdapterOptions {
                power_preference: settings.power_preference,
                force_fallback_adapter: false,
                compatible_surface: Some(surface),
            },
            settings.wait_strategy,
        )
        .await?;
        self.adapter = Some(adapter);

        let adapter_capabilities = Capabilities::of_adapter(&self.backend, adapter)
            .ok_or_else(|| InitError::AdapterRequest("adapter reported no limits".to_string()))?;
        adapter_capabilities.log("Adapter");

        let required_limits = settings
            .required_limits
            .clone()
            .using_resolution(adapter_capabilities.limits.clone());
        self.adapter_capabilities = Some(adapter_capabilities);

        let device = negotiator::acquire_device(
            &mut self.backend,
            adapter,
            &DeviceDescriptor {
                label: Some("Main Device"),
                required_features: settings.required_features,
                required_limits,
            },
            settings.wait_strategy,
        )
        .await?;
        self.device = Some(device);
        self.backend.set_device_callbacks(
            device,
            Box::new(log_uncaptured_error),
            Box::new(log_device_lost),
        );

        let device_capabilities = Capabilities::of_device(&self.backend, device)
            .ok_or_else(|| InitError::DeviceRequest("device reported no limits".to_string()))?;
        device_capabilities.log("Device");
        self.device_capabilities = Some(device_capabilities);

        let queue = self
            .backend
            .get_queue(device)
            .ok_or(InitError::QueueUnavailable)?;
        self.queue = Some(queue);

        let capabilities = self.backend.surface_capabilities(surface, adapter);
        let format = *capabilities
            .formats
            .first()
            .ok_or(InitError::ResourceCreation("surface configuration"))?;
        let present_mode = if capabilities.present_modes.contains(&settings.present_mode) {
            settings.present_mode
        } else {
            wgpu::PresentMode::Fifo
        };
        let config = SurfaceConfig {
            width: settings.width,
            height: settings.height,
            format,
            present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
        };
        self.backend.configure_surface(surface, device, &config);
        self.surface_config = Some(config);
        log::info!("Surface configured: {format:?}, {present_mode:?}");

        Ok(())
    }

    /// The device, or [`InitError::NotInitialized`] before it exists.
    pub fn device(&self) -> Result<DeviceId, InitError> {
        self.device.ok_or(InitError::NotInitialized)
    }

    /// The queue, or [`InitError::NotInitialized`] before it exists.
    pub fn queue(&self) -> Result<QueueId, InitError> {
        self.queue.ok_or(InitError::NotInitialized)
    }

    /// Format of the configured surface, which the pipeline's color target must match.
    pub fn surface_format(&self) -> Result<wgpu::TextureFormat, InitError> {
        self.surface_config
            .map(|config| config.format)
            .ok_or(InitError::NotInitialized)
    }

    /// Minimum dynamic uniform offset alignment, as reported by the device.
    pub fn uniform_alignment(&self) -> Result<u64, InitError> {
        self.device_capabilities
            .as_ref()
            .map(Capabilities::uniform_alignment)
            .ok_or(InitError::NotInitialized)
    }

    /// Releases surface, queue, device, adapter and instance, in that order.
    ///
    /// Handles already released are skipped, so calling this again does nothing.
    pub fn release(&mut self) {
        self.surface_config = None;
        if let Some(surface) = self.surface.take() {
            self.backend.release(GpuHandle::Surface(surface));
        }
        if let Some(queue) = self.queue.take() {
            self.backend.release(GpuHandle::Queue(queue));
        }
        if let Some(device) = self.device.take() {
            self.backend.release(GpuHandle::Device(device));
        }
        if let Some(adapter) = self.adapter.take() {
            self.backend.release(GpuHandle::Adapter(adapter));
        }
        if let Some(instance) = self.instance.take() {
            self.backend.release(GpuHandle::Instance(instance));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordingBackend, RecordingConfig};
    use crate::negotiator::WaitStrategy;
    use std::time::Duration;

    fn settings() -> Settings {
        Settings {
            wait_strategy: WaitStrategy::Sleep(Duration::ZERO),
            ..Settings::default()
        }
    }

    #[test]
    fn test_initialize_acquires_everything() {
        let mut gpu = Gpu::new(RecordingBackend::default());
        pollster::block_on(gpu.initialize((), &settings())).unwrap();

        assert!(gpu.queue.is_some());
        assert_eq!(gpu.uniform_alignment(), Ok(256));
        let config = gpu.surface_config.unwrap();
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.format, wgpu::TextureFormat::Bgra8Unorm);
        assert_eq!(config.present_mode, wgpu::PresentMode::Fifo);
    }

    // The backend lists `Opaque` first; the surface still asks for the automatic mode.
    #[test]
    fn test_surface_uses_automatic_alpha_mode() {
        let mut gpu = Gpu::new(RecordingBackend::default());
        pollster::block_on(gpu.initialize((), &settings())).unwrap();

        let surface = gpu.surface.unwrap();
        let adapter = gpu.adapter.unwrap();
        let offered = gpu.backend.surface_capabilities(surface, adapter).alpha_modes;
        assert_eq!(offered.first(), Some(&wgpu::CompositeAlphaMode::Opaque));
        assert_eq!(
            gpu.surface_config.unwrap().alpha_mode,
            wgpu::CompositeAlphaMode::Auto
        );
    }

    #[test]
    fn test_missing_queue_keeps_earlier_handles() {
        let mut gpu = Gpu::new(RecordingBackend::new(RecordingConfig {
            queue_available: false,
            ..Default::default()
        }));
        let result = pollster::block_on(gpu.initialize((), &settings()));

        assert_eq!(result, Err(InitError::QueueUnavailable));
        assert!(gpu.device.is_some());
        assert!(gpu.queue.is_none());

        gpu.release();
        assert_eq!(gpu.backend.live_objects(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut gpu = Gpu::new(RecordingBackend::default());
        pollster::block_on(gpu.initialize((), &settings())).unwrap();

        gpu.release();
        gpu.release();

        assert_eq!(gpu.backend.double_releases(), 0);
        assert_eq!(gpu.device(), Err(InitError::NotInitialized));
    }

    #[test]
    fn test_device_lost_is_only_logged() {
        let mut gpu = Gpu::new(RecordingBackend::default());
        pollster::block_on(gpu.initialize((), &settings())).unwrap();

        gpu.backend.simulate_device_lost("driver reset");

        assert!(gpu.device.is_some());
    }
}
