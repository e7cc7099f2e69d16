use std::time::Duration;

use pyramid_core::backend::recording::{Call, RecordingBackend, RecordingConfig};
use pyramid_core::backend::{AcquireStatus, GpuHandle, Presentation, SurfaceTextureRelease};
use pyramid_core::mesh::parse_obj;
use pyramid_core::{FrameOutcome, Mesh, Renderer, Settings, WaitStrategy};

fn settings() -> Settings {
    Settings {
        wait_strategy: WaitStrategy::Sleep(Duration::ZERO),
        ..Settings::default()
    }
}

fn initialized(config: RecordingConfig) -> Renderer<RecordingBackend> {
    let mut renderer = Renderer::new(RecordingBackend::new(config), settings());
    pollster::block_on(renderer.initialize((), None)).unwrap();
    renderer
}

fn position(calls: &[Call], predicate: impl Fn(&Call) -> bool) -> usize {
    calls.iter().position(predicate).unwrap()
}

#[test]
fn test_two_frames_draw_both_instances_with_their_offsets() {
    let mut renderer = initialized(RecordingConfig::default());
    renderer.gpu.backend.clear_calls();

    assert_eq!(renderer.render_frame(0.0), Ok(FrameOutcome::Presented));
    assert_eq!(renderer.render_frame(1.0), Ok(FrameOutcome::Presented));

    let backend = &renderer.gpu.backend;
    assert!(backend.errors().is_empty(), "{:?}", backend.errors());

    let offsets: Vec<Vec<u32>> = backend
        .draws()
        .into_iter()
        .map(|draw| draw.dynamic_offsets)
        .collect();
    assert_eq!(offsets, [vec![0], vec![256], vec![0], vec![256]]);

    let uniforms = *renderer.uniforms().unwrap();
    let frame_writes = backend.count_calls(|call| {
        matches!(call, Call::WriteBuffer { buffer, offset: 0, .. } if *buffer == uniforms.buffer.id)
    });
    assert_eq!(frame_writes, 2);

    let contents = backend.buffer_contents(uniforms.buffer.id).unwrap();
    assert_eq!(&contents[128..132], &1.0f32.to_le_bytes());
    assert_eq!(backend.count_calls(|call| matches!(call, Call::Present)), 2);
}

#[test]
fn test_frame_clears_color_and_depth_in_one_pass() {
    let mut renderer = initialized(RecordingConfig::default());
    renderer.gpu.backend.clear_calls();

    renderer.render_frame(0.0).unwrap();

    let depth_view = renderer.depth().unwrap().view;
    let calls = renderer.gpu.backend.calls();
    let passes: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            Call::BeginRenderPass { depth, .. } => Some(*depth),
            _ => None,
        })
        .collect();
    assert_eq!(passes, [Some(depth_view)]);
    assert!(calls.contains(&Call::DebugMarker("Render scene".to_string())));

    let submit = position(calls, |call| matches!(call, Call::Submit(_)));
    let present = position(calls, |call| matches!(call, Call::Present));
    assert!(submit < present);
}

#[test]
fn test_failed_acquire_leaves_nothing_behind() {
    let mut renderer = initialized(RecordingConfig {
        acquire_script: [AcquireStatus::Outdated, AcquireStatus::Lost].into(),
        ..Default::default()
    });
    renderer.gpu.backend.clear_calls();

    assert_eq!(
        renderer.render_frame(0.0),
        Ok(FrameOutcome::Skipped(AcquireStatus::Outdated))
    );
    assert_eq!(
        renderer.render_frame(0.0),
        Ok(FrameOutcome::Skipped(AcquireStatus::Lost))
    );

    let backend = &renderer.gpu.backend;
    assert_eq!(
        backend.count_calls(|call| matches!(
            call,
            Call::CreateCommandEncoder(_) | Call::Submit(_) | Call::Present
        )),
        0
    );
    // Only the depth view remains.
    assert_eq!(backend.live_objects_of_kind("texture view"), 1);

    assert_eq!(renderer.render_frame(0.1), Ok(FrameOutcome::Presented));
    assert!(renderer.gpu.backend.errors().is_empty());
}

#[test]
fn test_surface_texture_released_after_view_creation() {
    let mut renderer = initialized(RecordingConfig {
        surface_texture_release: SurfaceTextureRelease::AfterViewCreation,
        ..Default::default()
    });
    renderer.gpu.backend.clear_calls();

    renderer.render_frame(0.0).unwrap();
    renderer.render_frame(0.5).unwrap();

    let backend = &renderer.gpu.backend;
    assert!(backend.errors().is_empty(), "{:?}", backend.errors());
    let calls = backend.calls();
    let texture_release = position(calls, |call| {
        matches!(call, Call::Release(GpuHandle::Texture(_)))
    });
    let encoder = position(calls, |call| matches!(call, Call::CreateCommandEncoder(_)));
    assert!(texture_release < encoder);
}

#[test]
fn test_surface_texture_released_after_present() {
    let mut renderer = initialized(RecordingConfig::default());
    renderer.gpu.backend.clear_calls();

    renderer.render_frame(0.0).unwrap();

    let calls = renderer.gpu.backend.calls();
    let present = position(calls, |call| matches!(call, Call::Present));
    let texture_release = position(calls, |call| {
        matches!(call, Call::Release(GpuHandle::Texture(_)))
    });
    assert!(present < texture_release);
    assert_eq!(renderer.gpu.backend.live_objects_of_kind("texture"), 1);
}

#[test]
fn test_implicit_presentation_never_presents() {
    let mut renderer = initialized(RecordingConfig {
        presentation: Presentation::Implicit,
        ..Default::default()
    });
    renderer.gpu.backend.clear_calls();

    for frame in 0..3 {
        let outcome = renderer.render_frame(frame as f32 * 0.016);
        assert_eq!(outcome, Ok(FrameOutcome::Presented));
    }

    let backend = &renderer.gpu.backend;
    assert_eq!(backend.count_calls(|call| matches!(call, Call::Present)), 0);
    assert_eq!(backend.count_calls(|call| matches!(call, Call::Submit(_))), 3);
    assert!(backend.errors().is_empty(), "{:?}", backend.errors());
}

#[test]
fn test_threaded_completions_initialize() {
    let renderer = initialized(RecordingConfig {
        complete_on_thread: Some(Duration::from_millis(5)),
        ..Default::default()
    });
    assert!(renderer.is_initialized());
}

#[test]
fn test_loaded_mesh_is_drawn() {
    let model = parse_obj(
        "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n",
    )
    .unwrap();
    let mesh = Mesh::from_model(&model).unwrap();

    let mut renderer = Renderer::new(RecordingBackend::default(), settings());
    pollster::block_on(renderer.initialize((), Some(mesh))).unwrap();
    renderer.render_frame(0.0).unwrap();

    let draws = renderer.gpu.backend.draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].indices, 0..6);
    assert_eq!(renderer.mesh().unwrap().index_format, wgpu::IndexFormat::Uint16);
}

#[test]
fn test_device_lost_does_not_stop_frames() {
    let mut renderer = initialized(RecordingConfig::default());

    renderer.gpu.backend.simulate_device_lost("driver reset");

    assert_eq!(renderer.render_frame(0.0), Ok(FrameOutcome::Presented));
}
