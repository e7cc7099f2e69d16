//! # Backend Capability Negotiation
//!
//! Adapter, device and submitted-work-done requests are callback driven: the backend takes a
//! [`Completion`] and returns immediately. This module turns them into plain `async fn`s that
//! only resolve once the backend has answered.
//!
//! ## The Wait Loop
//!
//! [`wait_for_completion`] owns the receiving half of a `futures` oneshot channel whose sender
//! is captured by the completion closure. Each iteration it:
//!
//! 1. pumps the backend with [`GpuBackend::poll`],
//! 2. checks the channel without blocking,
//! 3. pauses according to the [`WaitStrategy`].
//!
//! The channel gives the happens-before edge between a completion running on a backend thread
//! and the loop observing it. There is no timeout: a request the backend never answers keeps the
//! loop spinning. A completion that is dropped without being called ends the loop with an error.
//!
//! On native targets the futures are driven with `pollster::block_on`, which makes them blocking
//! calls for the caller. Under a single-threaded host (the browser) the loop must hand control
//! back on every iteration, which is what [`WaitStrategy::Yield`] does. Handing back means a full
//! macrotask: in the browser the loop awaits a `setTimeout(0)` promise, so callbacks queued by the
//! event loop run before the next check.

#[cfg(not(target_arch = "wasm32"))]
use std::future::Future;
#[cfg(not(target_arch = "wasm32"))]
use std::pin::Pin;
#[cfg(not(target_arch = "wasm32"))]
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;

use crate::backend::{
    AdapterId, AdapterOptions, Completion, DeviceDescriptor, DeviceId, GpuBackend, InstanceId,
    QueueId,
};
use crate::error::InitError;

/// How the wait loop pauses between two checks of the completion cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Put the thread to sleep. Only valid where blocking the thread is allowed.
    Sleep(Duration),
    /// Suspend the future until the host has run its own event loop once.
    Yield,
}

impl Default for WaitStrategy {
    fn default() -> Self {
        if cfg!(target_arch = "wasm32") {
            Self::Yield
        } else {
            Self::Sleep(Duration::from_millis(10))
        }
    }
}

impl WaitStrategy {
    async fn pause(self) {
        match self {
            Self::Sleep(duration) => std::thread::sleep(duration),
            Self::Yield => next_host_turn().await,
        }
    }
}

/// Delay before a native host turn wakes the waiting task again.
#[cfg(not(target_arch = "wasm32"))]
const HOST_TURN: Duration = Duration::from_millis(1);

/// Suspends until the host has had a turn of its own.
///
/// Waking the task from inside `poll` is not enough: browser executors run such a wake as a
/// microtask, so the event loop never gets to deliver the adapter or device callback. The task
/// is instead woken from outside the executor, so the executor sees it idle first.
#[cfg(not(target_arch = "wasm32"))]
fn next_host_turn() -> HostTurn {
    HostTurn::default()
}

/// Future that stays pending until a helper thread wakes it.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Default)]
struct HostTurn {
    scheduled: bool,
}

#[cfg(not(target_arch = "wasm32"))]
impl Future for HostTurn {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.scheduled {
            return Poll::Ready(());
        }
        self.scheduled = true;
        let waker = cx.waker().clone();
        std::thread::spawn(move || {
            std::thread::sleep(HOST_TURN);
            waker.wake();
        });
        Poll::Pending
    }
}

/// Awaits a `setTimeout(0)` promise, which resolves as a macrotask after the browser has run
/// its pending events.
#[cfg(target_arch = "wasm32")]
async fn next_host_turn() {
    use wasm_bindgen::{JsCast, JsValue};

    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let global = js_sys::global();
        let set_timeout = js_sys::Reflect::get(&global, &JsValue::from_str("setTimeout"))
            .ok()
            .and_then(|value| value.dyn_into::<js_sys::Function>().ok());
        let scheduled = match set_timeout {
            Some(set_timeout) => set_timeout.call2(&global, &resolve, &JsValue::from(0)),
            None => Err(JsValue::from_str("setTimeout is not available")),
        };
        if let Err(err) = scheduled {
            log::warn!("Could not schedule a host turn: {err:?}");
            if let Err(err) = resolve.call0(&JsValue::UNDEFINED) {
                log::error!("Could not resume the wait loop: {err:?}");
            }
        }
    });
    if let Err(err) = wasm_bindgen_futures::JsFuture::from(promise).await {
        log::warn!("Host turn rejected: {err:?}");
    }
}

/// Receiving side of a completion cell.
pub type CompletionReceiver<T> = oneshot::Receiver<Result<T, String>>;

/// Creates a completion closure and the receiver that observes it.
pub fn completion_cell<T: Send + 'static>() -> (Completion<T>, CompletionReceiver<T>) {
    let (sender, receiver) = oneshot::channel();
    let completion: Completion<T> = Box::new(move |result| {
        if sender.send(result).is_err() {
            log::trace!("Completion arrived after its waiter went away");
        }
    });
    (completion, receiver)
}

/// Pumps `backend` until `receiver` holds a result.
///
/// `what` names the request in log messages.
pub async fn wait_for_completion<B: GpuBackend, T>(
    backend: &mut B,
    mut receiver: CompletionReceiver<T>,
    strategy: WaitStrategy,
    what: &str,
) -> Result<T, String> {
    let mut spins: u64 = 0;
    loop {
        backend.poll();
        match receiver.try_recv() {
            Ok(Some(result)) => {
                log::trace!("{what} completed after {spins} waits");
                return result;
            }
            Ok(None) => {}
            Err(oneshot::Canceled) => {
                return Err(format!("{what} was dropped without completing"));
            }
        }
        spins += 1;
        strategy.pause().await;
    }
}

/// Requests an adapter and waits for it.
pub async fn acquire_adapter<B: GpuBackend>(
    backend: &mut B,
    instance: InstanceId,
    options: &AdapterOptions,
    strategy: WaitStrategy,
) -> Result<AdapterId, InitError> {
    log::info!("Requesting adapter...");
    let (on_complete, receiver) = completion_cell();
    backend.request_adapter(instance, options, on_complete);
    match wait_for_completion(backend, receiver, strategy, "adapter request").await {
        Ok(adapter) => {
            log::info!("Got adapter: {adapter:?}");
            Ok(adapter)
        }
        Err(message) => {
            log::error!("Could not get adapter: {message}");
            Err(InitError::AdapterRequest(message))
        }
    }
}

/// Requests a device from `adapter` and waits for it.
pub async fn acquire_device<B: GpuBackend>(
    backend: &mut B,
    adapter: AdapterId,
    descriptor: &DeviceDescriptor<'_>,
    strategy: WaitStrategy,
) -> Result<DeviceId, InitError> {
    log::info!("Requesting device...");
    let (on_complete, receiver) = completion_cell();
    backend.request_device(adapter, descriptor, on_complete);
    match wait_for_completion(backend, receiver, strategy, "device request").await {
        Ok(device) => {
            log::info!("Got device: {device:?}");
            Ok(device)
        }
        Err(message) => {
            log::error!("Could not get device: {message}");
            Err(InitError::DeviceRequest(message))
        }
    }
}

/// Waits until the queue has finished everything submitted so far.
///
/// Failures are logged and otherwise ignored; this only runs on the way out.
pub async fn wait_for_submitted_work<B: GpuBackend>(
    backend: &mut B,
    queue: QueueId,
    strategy: WaitStrategy,
) {
    let (on_complete, receiver) = completion_cell();
    backend.on_submitted_work_done(queue, on_complete);
    match wait_for_completion(backend, receiver, strategy, "submitted work").await {
        Ok(()) => log::debug!("Queued work finished"),
        Err(message) => log::warn!("Could not wait for queued work: {message}"),
    }
}

/// What an adapter or device reports it can do.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub info: Option<wgpu::AdapterInfo>,
    pub features: wgpu::Features,
    pub limits: wgpu::Limits,
}

impl Capabilities {
    pub fn of_adapter<B: GpuBackend>(backend: &B, adapter: AdapterId) -> Option<Self> {
        Some(Self {
            info: backend.adapter_info(adapter),
            features: backend.adapter_features(adapter),
            limits: backend.adapter_limits(adapter)?,
        })
    }

    pub fn of_device<B: GpuBackend>(backend: &B, device: DeviceId) -> Option<Self> {
        Some(Self {
            info: None,
            features: backend.device_features(device),
            limits: backend.device_limits(device)?,
        })
    }

    /// Alignment every dynamic uniform offset must respect.
    pub fn uniform_alignment(&self) -> u64 {
        u64::from(self.limits.min_uniform_buffer_offset_alignment)
    }

    /// Dumps properties, features and the limits the renderer depends on.
    pub fn log(&self, owner: &str) {
        if let Some(info) = &self.info {
            log::info!("{owner} properties:");
            log::info!(" - vendorID: {}", info.vendor);
            log::info!(" - deviceID: {}", info.device);
            log::info!(" - name: {}", info.name);
            log::info!(" - driver: {} {}", info.driver, info.driver_info);
            log::info!(" - adapterType: {:?}", info.device_type);
            log::info!(" - backendType: {:?}", info.backend);
        }
        log::info!("{owner} features:");
        for feature in self.features.iter() {
            log::info!(" - {feature:?}");
        }
        let limits = &self.limits;
        log::info!("{owner} limits:");
        log::info!(" - maxTextureDimension1D: {}", limits.max_texture_dimension_1d);
        log::info!(" - maxTextureDimension2D: {}", limits.max_texture_dimension_2d);
        log::info!(" - maxTextureDimension3D: {}", limits.max_texture_dimension_3d);
        log::info!(" - maxTextureArrayLayers: {}", limits.max_texture_array_layers);
        log::info!(" - maxVertexAttributes: {}", limits.max_vertex_attributes);
        log::info!(" - maxVertexBuffers: {}", limits.max_vertex_buffers);
        log::info!(
            " - maxDynamicUniformBuffersPerPipelineLayout: {}",
            limits.max_dynamic_uniform_buffers_per_pipeline_layout
        );
        log::info!(
            " - minUniformBufferOffsetAlignment: {}",
            limits.min_uniform_buffer_offset_alignment
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordingBackend, RecordingConfig};
    use crate::backend::GpuHandle;

    const NO_WAIT: WaitStrategy = WaitStrategy::Sleep(Duration::ZERO);

    fn device_descriptor() -> DeviceDescriptor<'static> {
        DeviceDescriptor {
            label: Some("Test Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        }
    }

    #[test]
    fn test_adapter_waits_for_delayed_completion() {
        let mut backend = RecordingBackend::new(RecordingConfig {
            adapter_ready_after_polls: 5,
            ..Default::default()
        });
        let instance = backend.create_instance().unwrap();

        let adapter = pollster::block_on(acquire_adapter(
            &mut backend,
            instance,
            &AdapterOptions::default(),
            NO_WAIT,
        ))
        .unwrap();

        assert_eq!(backend.polls(), 5);
        assert!(backend.is_live(GpuHandle::Adapter(adapter)));
    }

    #[test]
    fn test_yield_strategy_reaches_completion() {
        let mut backend = RecordingBackend::new(RecordingConfig {
            adapter_ready_after_polls: 3,
            device_ready_after_polls: 4,
            ..Default::default()
        });
        let instance = backend.create_instance().unwrap();

        let device = pollster::block_on(async {
            let adapter = acquire_adapter(
                &mut backend,
                instance,
                &AdapterOptions::default(),
                WaitStrategy::Yield,
            )
            .await?;
            acquire_device(
                &mut backend,
                adapter,
                &device_descriptor(),
                WaitStrategy::Yield,
            )
            .await
        })
        .unwrap();

        assert_eq!(backend.polls(), 7);
        assert_eq!(backend.label_of(GpuHandle::Device(device)), Some("Test Device"));
    }

    // The completion only arrives once the executor has nothing left to run.
    #[test]
    fn test_yield_lets_the_host_run_between_waits() {
        use futures::executor::LocalPool;
        use futures::task::LocalSpawnExt;
        use std::cell::RefCell;
        use std::rc::Rc;

        let (on_complete, receiver) = completion_cell::<u32>();
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);
        let mut pool = LocalPool::new();
        pool.spawner()
            .spawn_local(async move {
                let mut backend = RecordingBackend::default();
                let value =
                    wait_for_completion(&mut backend, receiver, WaitStrategy::Yield, "host answer")
                        .await;
                *slot.borrow_mut() = Some(value);
            })
            .unwrap();

        pool.run_until_stalled();
        assert!(result.borrow().is_none());

        on_complete(Ok(7));
        for _ in 0..200 {
            pool.run_until_stalled();
            if result.borrow().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*result.borrow(), Some(Ok(7)));
    }

    #[test]
    fn test_completion_from_backend_thread() {
        let mut backend = RecordingBackend::new(RecordingConfig {
            complete_on_thread: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let instance = backend.create_instance().unwrap();

        let adapter = pollster::block_on(acquire_adapter(
            &mut backend,
            instance,
            &AdapterOptions::default(),
            WaitStrategy::Sleep(Duration::from_millis(1)),
        ));

        assert!(adapter.is_ok());
        assert!(backend.polls() >= 1);
    }

    #[test]
    fn test_adapter_failure_is_reported() {
        let mut backend = RecordingBackend::new(RecordingConfig {
            adapter_failure: Some("no compatible adapter".to_string()),
            ..Default::default()
        });
        let instance = backend.create_instance().unwrap();

        let result = pollster::block_on(acquire_adapter(
            &mut backend,
            instance,
            &AdapterOptions::default(),
            NO_WAIT,
        ));

        assert_eq!(
            result,
            Err(InitError::AdapterRequest("no compatible adapter".to_string()))
        );
    }

    #[test]
    fn test_device_failure_is_reported() {
        let mut backend = RecordingBackend::new(RecordingConfig {
            device_failure: Some("device lost during creation".to_string()),
            ..Default::default()
        });
        let instance = backend.create_instance().unwrap();

        let result = pollster::block_on(async {
            let adapter =
                acquire_adapter(&mut backend, instance, &AdapterOptions::default(), NO_WAIT)
                    .await?;
            acquire_device(&mut backend, adapter, &device_descriptor(), NO_WAIT).await
        });

        assert!(matches!(result, Err(InitError::DeviceRequest(_))));
    }

    // A backend that never answers would spin forever; a dropped completion must not.
    #[test]
    fn test_dropped_completion_ends_wait() {
        let mut backend = RecordingBackend::default();
        let (completion, receiver) = completion_cell::<u32>();
        drop(completion);

        let result = pollster::block_on(wait_for_completion(
            &mut backend,
            receiver,
            NO_WAIT,
            "test request",
        ));

        assert!(result.is_err());
        assert_eq!(backend.polls(), 1);
    }

    #[test]
    fn test_capabilities_expose_uniform_alignment() {
        let mut backend = RecordingBackend::default();
        let instance = backend.create_instance().unwrap();
        let adapter = pollster::block_on(acquire_adapter(
            &mut backend,
            instance,
            &AdapterOptions::default(),
            NO_WAIT,
        ))
        .unwrap();

        let capabilities = Capabilities::of_adapter(&backend, adapter).unwrap();
        assert_eq!(capabilities.uniform_alignment(), 256);
        assert_eq!(
            capabilities.info.map(|info| info.name),
            Some("Recording Adapter".to_string())
        );
    }
}
