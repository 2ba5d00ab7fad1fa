//! Integration tests for frame pacing, pipeline caching and hot reload.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lumen_renderer::{FramePacer, PipelineCache, ShaderWatcher};
use lumen_rhi::backend::null::NullBackend;
use lumen_rhi::{
    BlendState, Counter, CullMode, DepthStencilState, Device, DeviceSettings, Format,
    PipelineState, PolygonMode, RasterizerState, Shader, ShaderReflection, ShaderStage,
    Swapchain,
};

const SPIRV_STUB: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0, 0, 1, 0];

fn load_vertex(device: &Arc<Device<NullBackend>>, path: &Path) -> Arc<Shader<NullBackend>> {
    Arc::new(
        Shader::from_spirv_file(device.clone(), path, ShaderStage::VERTEX, ShaderReflection::new("main"))
            .expect("vertex shader"),
    )
}

fn present_state(
    device: &Arc<Device<NullBackend>>,
    swapchain: &Arc<Swapchain<NullBackend>>,
    vertex: Arc<Shader<NullBackend>>,
) -> PipelineState<NullBackend> {
    let mut pso = PipelineState::new("present");
    pso.shader_vertex = Some(vertex);
    pso.shader_pixel = Some(Arc::new(
        Shader::from_spirv_bytes(
            device.clone(),
            &SPIRV_STUB,
            ShaderStage::PIXEL,
            ShaderReflection::new("main"),
            "present_ps",
        )
        .expect("pixel shader"),
    ));
    pso.rasterizer_state = Some(Arc::new(RasterizerState::new(CullMode::None, PolygonMode::Solid)));
    pso.blend_state = Some(Arc::new(BlendState::disabled()));
    pso.depth_stencil_state = Some(Arc::new(DepthStencilState::disabled()));
    pso.render_target_swapchain = Some(swapchain.clone());
    pso.is_fullscreen_triangle = true;
    pso.clear_color[0] = Some(glam::Vec4::new(0.1, 0.1, 0.1, 1.0));
    pso
}

#[test]
fn test_frame_loop_with_cached_pipeline() {
    let device = Device::new(NullBackend::new(), DeviceSettings::default());
    let swapchain = Arc::new(
        Swapchain::new(device.clone(), 320, 240, Format::B8R8G8A8Unorm, 2, "swapchain")
            .expect("swapchain"),
    );
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("fullscreen.vert.spv");
    fs::write(&path, SPIRV_STUB).expect("write shader");

    let mut cache = PipelineCache::new(device.clone());
    let mut pacer = FramePacer::new(device.clone(), 2).expect("pacer");
    let pso = present_state(&device, &swapchain, load_vertex(&device, &path));

    for _ in 0..4 {
        swapchain.acquire_next_image();
        let pipeline = cache.get_or_create(&pso).expect("pipeline");
        let cmd = pacer.begin_frame().expect("begin frame");
        cmd.set_pipeline_state(&pso, &pipeline);
        cmd.draw(3, 0);
        let stats = pacer.end_frame().expect("end frame");
        assert_eq!(stats.counters.get(Counter::Draw), 1);
        assert_eq!(stats.counters.get(Counter::PipelineBind), 1);
    }

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats(), (3, 1));
    pacer.wait_idle().expect("idle");
}

#[test]
fn test_reloaded_shader_replaces_pipeline() {
    let device = Device::new(NullBackend::new(), DeviceSettings::default());
    let swapchain = Arc::new(
        Swapchain::new(device.clone(), 64, 64, Format::R8G8B8A8Unorm, 2, "swapchain")
            .expect("swapchain"),
    );
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("mesh.vert.spv");
    fs::write(&path, SPIRV_STUB).expect("write shader");

    let mut cache = PipelineCache::new(device.clone());
    let old_shader = load_vertex(&device, &path);
    let old = cache
        .get_or_create(&present_state(&device, &swapchain, old_shader.clone()))
        .expect("pipeline");
    let old_handle = old.handle();
    drop(old);

    let new_shader = load_vertex(&device, &path);
    assert_eq!(cache.invalidate_shader(old_shader.id()), 1);
    drop(old_shader);
    let new = cache
        .get_or_create(&present_state(&device, &swapchain, new_shader))
        .expect("pipeline");

    assert_ne!(new.handle(), old_handle);
    device.collect_garbage();
    assert!(!device.backend().is_live(old_handle));
    assert!(device.backend().is_live(new.handle()));
}

#[test]
fn test_watcher_reports_written_shader() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut watcher =
        ShaderWatcher::new(dir.path(), Duration::from_millis(50)).expect("watcher");

    let path = dir.path().join("blur.comp.spv");
    fs::write(&path, SPIRV_STUB).expect("write shader");
    fs::write(dir.path().join("notes.txt"), "ignored").expect("write notes");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut reported = Vec::new();
    while reported.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
        reported = watcher.poll(Instant::now());
    }

    let names: Vec<_> = reported
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["blur.comp.spv".to_string()]);
}
