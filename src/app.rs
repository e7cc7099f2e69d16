//! # Application
//!
//! The `App` ties the window event loop to the [`Renderer`]. It implements winit's
//! `ApplicationHandler`:
//!
//! - `resumed` creates the window (fixed 640x480 by default, not resizable) and initializes the
//!   renderer. Desktop builds block on initialization with `pollster`; WebAssembly builds spawn it
//!   with `wasm_bindgen_futures::spawn_local` and pick the renderer up from a `oneshot` channel.
//! - `window_event` draws a frame on every redraw request and shuts down on a close request or
//!   the Escape key.
//! - `about_to_wait` requests the next redraw, so the loop keeps drawing while the window is open.
//!
//! Shutdown always terminates the renderer before the window is dropped, because the surface
//! borrows the window.

use std::sync::Arc;

use web_time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::backend::wgpu_backend::WgpuBackend;
use crate::error::InitError;
use crate::mesh::{Mesh, ObjModelLoader};
use crate::renderer::{FrameOutcome, Renderer};
use crate::settings::Settings;

type AppRenderer = Renderer<WgpuBackend>;

pub struct App {
    settings: Settings,
    window: Option<Arc<Window>>,
    renderer: Option<AppRenderer>,
    #[cfg(target_arch = "wasm32")]
    renderer_receiver: Option<futures::channel::oneshot::Receiver<Result<AppRenderer, InitError>>>,
    start_time: Instant,
    failure: Option<InitError>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            window: None,
            renderer: None,
            #[cfg(target_arch = "wasm32")]
            renderer_receiver: None,
            start_time: Instant::now(),
            failure: None,
        }
    }

    /// The initialization error that ended the run, if any.
    pub fn failure(&self) -> Option<&InitError> {
        self.failure.as_ref()
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.terminate();
        }
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: InitError) {
        log::error!("Initialization failed: {error}");
        self.failure = Some(error);
        self.shutdown(event_loop);
    }

    #[cfg(target_arch = "wasm32")]
    fn receive_renderer(&mut self, event_loop: &ActiveEventLoop) {
        let Some(receiver) = self.renderer_receiver.as_mut() else {
            return;
        };
        match receiver.try_recv() {
            Ok(Some(Ok(renderer))) => {
                self.renderer = Some(renderer);
                self.renderer_receiver = None;
            }
            Ok(Some(Err(error))) => {
                self.renderer_receiver = None;
                self.fail(event_loop, error);
            }
            Ok(None) => {}
            Err(futures::channel::oneshot::Canceled) => {
                self.renderer_receiver = None;
                self.fail(event_loop, InitError::NotInitialized);
            }
        }
    }
}

/// Loads the configured OBJ file, or `None` to draw the built-in pyramid.
async fn load_mesh(settings: &Settings) -> Result<Option<Mesh>, InitError> {
    let Some(path) = settings.mesh_path.as_ref() else {
        return Ok(None);
    };
    let model = ObjModelLoader::new(path)
        .load()
        .await
        .ok_or(InitError::MeshUnavailable)?;
    Mesh::from_model(&model)
        .map(Some)
        .ok_or(InitError::MeshUnavailable)
}

/// Builds a renderer for `window`. A renderer that fails halfway is dropped, which tears down
/// whatever it had acquired.
async fn create_renderer(
    window: Arc<Window>,
    settings: Settings,
) -> Result<AppRenderer, InitError> {
    let mesh = load_mesh(&settings).await?;
    let mut renderer = Renderer::new(WgpuBackend::new(), settings);
    renderer.initialize(window, mesh).await?;
    Ok(renderer)
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(self.settings.title.clone())
            .with_inner_size(PhysicalSize::new(self.settings.width, self.settings.height))
            .with_resizable(self.settings.resizable);

        #[cfg(target_arch = "wasm32")]
        let attributes = {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            let canvas = wgpu::web_sys::window()
                .and_then(|window| window.document())
                .and_then(|document| document.get_element_by_id("canvas"))
                .and_then(|element| element.dyn_into::<wgpu::web_sys::HtmlCanvasElement>().ok());
            if let Some(canvas) = canvas {
                canvas.set_width(self.settings.width);
                canvas.set_height(self.settings.height);
                attributes.with_canvas(Some(canvas))
            } else {
                log::warn!("No #canvas element found; winit will create one");
                attributes
            }
        };

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Could not open window: {err}");
                self.fail(event_loop, InitError::SurfaceCreation);
                return;
            }
        };
        self.window = Some(window.clone());

        #[cfg(not(target_arch = "wasm32"))]
        {
            match pollster::block_on(create_renderer(window, self.settings.clone())) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(error) => {
                    self.fail(event_loop, error);
                    return;
                }
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let (sender, receiver) = futures::channel::oneshot::channel();
            self.renderer_receiver = Some(receiver);
            let settings = self.settings.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let result = create_renderer(window, settings).await;
                if sender.send(result).is_err() {
                    log::error!("Renderer finished initializing after the app shut down");
                }
            });
        }

        self.start_time = Instant::now();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        #[cfg(target_arch = "wasm32")]
        self.receive_renderer(event_loop);

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested. Exiting...");
                self.shutdown(event_loop);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => {
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                let time = self.start_time.elapsed().as_secs_f32();
                match renderer.render_frame(time) {
                    Ok(FrameOutcome::Presented | FrameOutcome::Skipped(_)) => {}
                    Err(error) => log::warn!("Frame not drawn: {error}"),
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}
