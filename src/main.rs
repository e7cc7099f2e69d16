use std::process::ExitCode;

#[cfg(not(target_arch = "wasm32"))]
fn main() -> ExitCode {
    env_logger::init();

    let event_loop = match winit::event_loop::EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            log::error!("Could not create the event loop: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut app = pyramid_core::App::new(pyramid_core::Settings::from_env());
    if let Err(err) = event_loop.run_app(&mut app) {
        log::error!("Event loop stopped: {err}");
        return ExitCode::FAILURE;
    }
    match app.failure() {
        Some(_) => ExitCode::FAILURE,
        None => ExitCode::SUCCESS,
    }
}

// The browser build starts from `pyramid_core::start_app`.
#[cfg(target_arch = "wasm32")]
fn main() -> ExitCode {
    ExitCode::SUCCESS
}
