use std::time::Duration;

use pyramid_core::backend::recording::{Call, RecordingBackend, RecordingConfig};
use pyramid_core::{InitError, Renderer, Settings, WaitStrategy};

fn settings() -> Settings {
    Settings {
        wait_strategy: WaitStrategy::Sleep(Duration::ZERO),
        ..Settings::default()
    }
}

fn failing_init(config: RecordingConfig) -> (Renderer<RecordingBackend>, InitError) {
    let mut renderer = Renderer::new(RecordingBackend::new(config), settings());
    let error = pollster::block_on(renderer.initialize((), None)).unwrap_err();
    (renderer, error)
}

fn assert_fully_released(renderer: &Renderer<RecordingBackend>) {
    let backend = &renderer.gpu.backend;
    assert_eq!(backend.live_objects(), 0);
    assert_eq!(backend.double_releases(), 0);
}

#[test]
fn test_teardown_after_frames_drains_work_first() {
    let mut renderer = Renderer::new(RecordingBackend::default(), settings());
    pollster::block_on(renderer.initialize((), None)).unwrap();
    for frame in 0..3 {
        renderer.render_frame(frame as f32).unwrap();
    }
    renderer.gpu.backend.clear_calls();

    renderer.terminate();

    let calls = renderer.gpu.backend.calls();
    assert_eq!(calls.first(), Some(&Call::OnSubmittedWorkDone));
    assert!(matches!(calls.get(1), Some(Call::Release(_))));
    assert_fully_released(&renderer);
}

#[test]
fn test_adapter_failure_releases_instance_and_surface() {
    let (mut renderer, error) = failing_init(RecordingConfig {
        adapter_failure: Some("no adapter".to_string()),
        ..Default::default()
    });
    assert_eq!(error, InitError::AdapterRequest("no adapter".to_string()));

    renderer.terminate();
    assert_fully_released(&renderer);
}

#[test]
fn test_device_failure_releases_adapter() {
    let (mut renderer, error) = failing_init(RecordingConfig {
        device_failure: Some("limits too high".to_string()),
        ..Default::default()
    });
    assert!(matches!(error, InitError::DeviceRequest(_)));

    renderer.terminate();
    assert_fully_released(&renderer);
}

#[test]
fn test_missing_surface_is_fatal() {
    let (mut renderer, error) = failing_init(RecordingConfig {
        surface_available: false,
        ..Default::default()
    });
    assert_eq!(error, InitError::SurfaceCreation);

    renderer.terminate();
    assert_fully_released(&renderer);
}

#[test]
fn test_invalid_settings_touch_nothing() {
    let mut renderer = Renderer::new(
        RecordingBackend::default(),
        Settings {
            max_instances: 1,
            ..settings()
        },
    );
    let error = pollster::block_on(renderer.initialize((), None)).unwrap_err();
    assert!(matches!(error, InitError::InvalidSettings(_)));
    assert!(renderer.gpu.backend.calls().is_empty());

    renderer.terminate();
    assert_fully_released(&renderer);
}

#[test]
fn test_terminate_is_idempotent_after_partial_init() {
    let (mut renderer, _) = failing_init(RecordingConfig {
        queue_available: false,
        ..Default::default()
    });

    renderer.terminate();
    renderer.terminate();

    assert_fully_released(&renderer);
}
