//! # Pyramid Renderer Library
//!
//! A small GPU renderer that manages the full lifecycle of its resources: it negotiates an
//! adapter and device, uploads a mesh and per-instance uniforms, builds one render pipeline,
//! draws one frame per redraw and tears everything down in dependency order on exit.
//!
//! ## Modules
//!
//! - [`backend`]: the [`GpuBackend`] seam, with a `wgpu` implementation and a recording one.
//! - [`negotiator`]: waits on asynchronous adapter, device and queue requests, and reports
//!   capabilities.
//! - [`gpu`]: the [`Gpu`] context holding instance, surface, adapter, device and queue.
//! - [`allocator`]: buffer creation, staging uploads and the uniform buffer layout.
//! - [`uniform_buffer`] and [`uniform_binding`]: the uniform blocks and the bind group over them.
//! - [`pipeline`]: the [`PipelineBuilder`] and the depth target.
//! - [`vertex`], [`mesh`] and [`math`]: vertex format, meshes (built-in or OBJ) and transforms.
//! - [`scene`]: per-frame uniform updates and draw recording.
//! - [`renderer`]: the [`Renderer`] root object and its frame loop.
//! - `teardown`: [`Renderer::terminate`].
//! - [`app`]: the winit event loop.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pyramid_core::{App, Settings};
//!
//! let event_loop = winit::event_loop::EventLoop::new()?;
//! let mut app = App::new(Settings::from_env());
//! event_loop.run_app(&mut app)?;
//! ```

pub mod allocator;
pub mod app;
pub mod backend;
pub mod error;
pub mod gpu;
pub mod math;
pub mod mesh;
pub mod negotiator;
pub mod pipeline;
pub mod renderer;
pub mod scene;
pub mod settings;
mod teardown;
pub mod uniform_binding;
pub mod uniform_buffer;
pub mod vertex;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub use crate::allocator::{round_up_to_multiple, Allocator, GpuBuffer, UniformLayout};
pub use crate::app::App;
pub use crate::backend::GpuBackend;
pub use crate::error::InitError;
pub use crate::gpu::Gpu;
pub use crate::mesh::{Mesh, ObjModelLoader};
pub use crate::negotiator::{Capabilities, WaitStrategy};
pub use crate::pipeline::{DepthTarget, PipelineBuilder};
pub use crate::renderer::{FrameOutcome, Renderer};
pub use crate::scene::Scene;
pub use crate::settings::Settings;
pub use crate::uniform_binding::UniformBinding;
pub use crate::uniform_buffer::{FrameUniforms, ObjectUniforms};
pub use crate::vertex::{Vertex, PYRAMID_INDICES, PYRAMID_VERTICES};

/// WGSL source of the render pipeline.
///
/// Binding 0 of group 0 holds [`FrameUniforms`] (camera and time), binding 1 the
/// [`ObjectUniforms`] record selected by the dynamic offset. The vertex stage reads
/// `@location(0)` position and `@location(1)` color; the fragment stage outputs the vertex color
/// tinted by the instance color.
pub const SHADER_SOURCE: &str = include_str!("shader_source.wgsl");

/// Browser entry point.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start_app() -> Result<(), JsValue> {
    use winit::platform::web::EventLoopExtWebSys;

    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    console_log::init_with_level(log::Level::Info)
        .map_err(|err| JsValue::from_str(&err.to_string()))?;

    let event_loop =
        winit::event_loop::EventLoop::new().map_err(|err| JsValue::from_str(&err.to_string()))?;
    event_loop.spawn_app(App::new(Settings::default()));
    Ok(())
}
