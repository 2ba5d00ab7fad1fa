//! Lumen - headless RHI demo.
//!
//! Drives a fixed number of frames through the RHI: each frame clears an
//! offscreen target, blits it into the swapchain and records GPU timings.
//! With `--watch`, compiled shaders in the directory are loaded and a
//! fullscreen pass drawn with them through the pipeline cache. Changed
//! shaders are reloaded, evicting the pipelines built from them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use glam::Vec4;
use tracing::{debug, error, info, warn};

use lumen_core::FrameTimer;
use lumen_renderer::{FramePacer, PipelineCache, RendererSettings, ShaderWatcher};
use lumen_rhi::backend::Backend;
use lumen_rhi::backend::null::NullBackend;
use lumen_rhi::{
    BlendState, ClearValue, Counter, CullMode, DepthStencilState, Device, DeviceSettings, Format,
    PipelineState, PolygonMode, RasterizerState, Shader, ShaderReflection, ShaderStage, Swapchain,
    Texture, TextureDesc, TextureFlags,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// In-memory recorder, no GPU required
    Null,
    /// Vulkan 1.3 through ash
    #[cfg(feature = "vulkan")]
    Vulkan,
}

#[derive(Debug, Parser)]
#[command(name = "lumen", version, about = "Headless frame loop over the Lumen RHI")]
struct Args {
    /// Graphics backend to run on
    #[arg(long, value_enum, default_value_t = BackendKind::Null)]
    backend: BackendKind,

    /// Number of frames to render before exiting
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Command lists recorded ahead of the GPU
    #[arg(long, default_value_t = 2)]
    frames_in_flight: usize,

    /// Enable API validation layers
    #[arg(long)]
    validation: bool,

    /// Directory of compiled shaders to hot reload
    #[arg(long)]
    watch: Option<PathBuf>,

    /// Render target width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Render target height
    #[arg(long, default_value_t = 720)]
    height: u32,
}

fn main() -> Result<()> {
    lumen_core::init_logging();
    let args = Args::parse();
    info!("Starting Lumen with {:?} backend", args.backend);

    let device_settings = DeviceSettings {
        validation: args.validation,
        ..Default::default()
    };

    match args.backend {
        BackendKind::Null => run(NullBackend::new(), device_settings, &args).map(drop),
        #[cfg(feature = "vulkan")]
        BackendKind::Vulkan => {
            use anyhow::Context;
            let backend = lumen_rhi::VulkanBackend::new(args.validation)
                .context("failed to initialize the Vulkan backend")?;
            run(backend, device_settings, &args).map(drop)
        }
    }
}

/// Totals of one demo run.
#[derive(Debug)]
struct RunSummary {
    frames: u64,
    draws: u64,
    pipelines: usize,
}

fn run<B: Backend>(backend: B, device_settings: DeviceSettings, args: &Args) -> Result<RunSummary> {
    let settings = RendererSettings {
        frames_in_flight: args.frames_in_flight,
        shader_watch_dir: args.watch.clone(),
        ..Default::default()
    };
    settings.validate()?;

    let device = Device::new(backend, device_settings);
    let swapchain = Swapchain::new(
        device.clone(),
        args.width,
        args.height,
        Format::B8R8G8A8Unorm,
        3,
        "swapchain",
    )?;
    let scene = Arc::new(Texture::new(
        device.clone(),
        TextureDesc::render_target(args.width, args.height, Format::R8G8B8A8Unorm, "scene")
            .with_flags(TextureFlags::CLEAR_BLIT),
    )?);
    let pass = FullscreenPass::new(scene.clone());

    let mut pacer = FramePacer::new(device.clone(), settings.frames_in_flight)?;
    let mut cache = PipelineCache::new(device.clone());
    let mut shaders = ShaderSet::default();
    let mut watcher = match &settings.shader_watch_dir {
        Some(dir) => {
            shaders.load_dir(&device, dir);
            Some(ShaderWatcher::new(dir, settings.hot_reload_debounce)?)
        }
        None => None,
    };

    let mut timer = FrameTimer::new();
    let mut draws = 0;
    for frame in 0..args.frames {
        if let Some(watcher) = watcher.as_mut() {
            for path in watcher.poll(Instant::now()) {
                shaders.reload(&device, &mut cache, &path);
            }
        }

        // Resolved before recording so a failed compile leaves no open frame.
        let fullscreen = match pass.state(&shaders) {
            Some(pso) => {
                let pipeline = cache.get_or_create(&pso)?;
                Some((pso, pipeline))
            }
            None => None,
        };

        swapchain.acquire_next_image();
        let cmd = pacer.begin_frame()?;

        cmd.begin_timeblock("clear", true, true);
        cmd.clear_render_target(&scene, ClearValue::Color(frame_color(frame)));
        cmd.end_timeblock();

        if let Some((pso, pipeline)) = &fullscreen {
            cmd.begin_timeblock("fullscreen", true, true);
            cmd.set_pipeline_state(pso, pipeline);
            cmd.draw(3, 0);
            cmd.end_timeblock();
        }

        cmd.begin_timeblock("present", true, true);
        cmd.blit_to_swapchain(&scene, &swapchain);
        cmd.end_timeblock();

        let stats = pacer.end_frame()?;
        let delta = timer.tick();
        draws += stats.counters.get(Counter::Draw);

        if frame % 60 == 0 {
            info!(
                "Frame {}: {:.2} ms, {} draw(s), {} barrier(s), {} handle(s) released",
                stats.frame,
                delta.as_secs_f64() * 1000.0,
                stats.counters.get(Counter::Draw),
                stats.counters.get(Counter::Barrier),
                stats.released
            );
        }
    }

    for timing in pacer.last_frame_timings()? {
        info!("GPU '{}': {:.3} ms", timing.name, timing.duration_ms);
    }
    pacer.wait_idle()?;
    let (hits, misses) = cache.stats();
    info!(
        "Rendered {} frame(s), average {:.2} ms, {} cached pipeline(s), {} hit(s), {} miss(es)",
        timer.frame_count(),
        timer.average_frame_ms(),
        cache.len(),
        hits,
        misses
    );

    Ok(RunSummary {
        frames: timer.frame_count(),
        draws,
        pipelines: cache.len(),
    })
}

/// Fixed states of the fullscreen pass drawn into the scene target.
struct FullscreenPass<B: Backend> {
    target: Arc<Texture<B>>,
    rasterizer: Arc<RasterizerState>,
    blend: Arc<BlendState>,
    depth_stencil: Arc<DepthStencilState>,
}

impl<B: Backend> FullscreenPass<B> {
    fn new(target: Arc<Texture<B>>) -> Self {
        Self {
            target,
            rasterizer: Arc::new(RasterizerState::new(CullMode::None, PolygonMode::Solid)),
            blend: Arc::new(BlendState::alpha()),
            depth_stencil: Arc::new(DepthStencilState::disabled()),
        }
    }

    /// Pipeline state over the current shaders, or `None` without a vertex
    /// shader.
    fn state(&self, shaders: &ShaderSet<B>) -> Option<PipelineState<B>> {
        let mut pso = PipelineState::new("fullscreen");
        pso.shader_vertex = Some(shaders.first(ShaderStage::VERTEX)?);
        pso.shader_pixel = shaders.first(ShaderStage::PIXEL);
        pso.rasterizer_state = Some(self.rasterizer.clone());
        pso.blend_state = Some(self.blend.clone());
        pso.depth_stencil_state = Some(self.depth_stencil.clone());
        pso.render_target_color_textures[0] = Some(self.target.clone());
        pso.is_fullscreen_triangle = true;
        Some(pso)
    }
}

/// Slowly cycling clear color.
fn frame_color(frame: u64) -> Vec4 {
    let t = (frame % 360) as f32 / 360.0 * std::f32::consts::TAU;
    Vec4::new(
        0.5 + 0.5 * t.sin(),
        0.5 + 0.5 * (t + 2.0).sin(),
        0.5 + 0.5 * (t + 4.0).sin(),
        1.0,
    )
}

/// Stage from a `name.<stage>.spv` file name.
fn stage_from_path(path: &Path) -> Option<ShaderStage> {
    let stem = path.file_stem()?.to_str()?;
    match Path::new(stem).extension()?.to_str()? {
        "vert" | "vs" => Some(ShaderStage::VERTEX),
        "frag" | "ps" => Some(ShaderStage::PIXEL),
        "comp" | "cs" => Some(ShaderStage::COMPUTE),
        _ => None,
    }
}

/// Loaded shader modules by path.
struct ShaderSet<B: Backend> {
    shaders: BTreeMap<PathBuf, Arc<Shader<B>>>,
}

impl<B: Backend> Default for ShaderSet<B> {
    fn default() -> Self {
        Self {
            shaders: BTreeMap::new(),
        }
    }
}

impl<B: Backend> ShaderSet<B> {
    /// The first module of `stage`, by path.
    fn first(&self, stage: ShaderStage) -> Option<Arc<Shader<B>>> {
        self.shaders
            .values()
            .find(|shader| shader.stage() == stage)
            .cloned()
    }

    fn load(device: &Arc<Device<B>>, path: &Path) -> Option<Arc<Shader<B>>> {
        let stage = stage_from_path(path)?;
        match Shader::from_spirv_file(device.clone(), path, stage, ShaderReflection::new("main")) {
            Ok(shader) => Some(Arc::new(shader)),
            Err(e) => {
                error!("Failed to load shader {}: {}", path.display(), e);
                None
            }
        }
    }

    fn load_dir(&mut self, device: &Arc<Device<B>>, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read shader directory {}: {}", dir.display(), e);
                return;
            }
        };
        for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
            if path.extension().is_some_and(|ext| ext == "spv")
                && let Some(shader) = Self::load(device, &path)
            {
                self.shaders.insert(path, shader);
            }
        }
        info!("Loaded {} shader(s) from {}", self.shaders.len(), dir.display());
    }

    /// Recompiles `path` and evicts pipelines built from the old module. A
    /// failed reload keeps the old module.
    fn reload(&mut self, device: &Arc<Device<B>>, cache: &mut PipelineCache<B>, path: &Path) {
        let Some(shader) = Self::load(device, path) else {
            debug!("Ignoring change to {}", path.display());
            return;
        };
        if let Some(old) = self.shaders.insert(path.to_path_buf(), shader) {
            let evicted = cache.invalidate_shader(old.id());
            info!("Reloaded {} ({} pipeline(s) evicted)", path.display(), evicted);
        } else {
            info!("Loaded new shader {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_path() {
        assert_eq!(stage_from_path(Path::new("mesh.vert.spv")), Some(ShaderStage::VERTEX));
        assert_eq!(stage_from_path(Path::new("mesh.frag.spv")), Some(ShaderStage::PIXEL));
        assert_eq!(stage_from_path(Path::new("blur.comp.spv")), Some(ShaderStage::COMPUTE));
        assert_eq!(stage_from_path(Path::new("mesh.spv")), None);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["lumen", "--backend", "null", "--frames", "3"]);
        assert_eq!(args.backend, BackendKind::Null);
        assert_eq!(args.frames, 3);
        assert!(args.watch.is_none());
    }

    #[test]
    fn test_null_run_completes() {
        let args = Args::parse_from(["lumen", "--frames", "5", "--width", "64", "--height", "32"]);
        let summary = run(NullBackend::new(), DeviceSettings::default(), &args).unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.draws, 0);
        assert_eq!(summary.pipelines, 0);
    }

    const SPIRV_STUB: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0, 0, 1, 0];

    fn shader_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fullscreen.vert.spv"), SPIRV_STUB).unwrap();
        std::fs::write(dir.path().join("tint.frag.spv"), SPIRV_STUB).unwrap();
        dir
    }

    #[test]
    fn test_watched_shaders_draw_through_the_cache() {
        let dir = shader_dir();
        let watch = dir.path().to_string_lossy().into_owned();
        let args = Args::parse_from(["lumen", "--frames", "4", "--watch", &watch]);

        let summary = run(NullBackend::new(), DeviceSettings::default(), &args).unwrap();
        assert_eq!(summary.draws, 4);
        assert_eq!(summary.pipelines, 1);
    }

    #[test]
    fn test_reload_evicts_and_rebuilds_the_pipeline() {
        let dir = shader_dir();
        let device = Device::new(NullBackend::new(), DeviceSettings::default());
        let target = Arc::new(
            Texture::new(
                device.clone(),
                TextureDesc::render_target(32, 32, Format::R8G8B8A8Unorm, "scene"),
            )
            .unwrap(),
        );
        let pass = FullscreenPass::new(target);
        let mut cache = PipelineCache::new(device.clone());
        let mut shaders = ShaderSet::default();
        shaders.load_dir(&device, dir.path());

        let old = cache.get_or_create(&pass.state(&shaders).unwrap()).unwrap();
        shaders.reload(&device, &mut cache, &dir.path().join("fullscreen.vert.spv"));
        assert!(cache.is_empty());

        let new = cache.get_or_create(&pass.state(&shaders).unwrap()).unwrap();
        assert_ne!(old.id(), new.id());
        assert_eq!(cache.stats(), (0, 2));
    }

    #[test]
    fn test_no_vertex_shader_no_pass() {
        let device = Device::new(NullBackend::new(), DeviceSettings::default());
        let target = Arc::new(
            Texture::new(
                device.clone(),
                TextureDesc::render_target(32, 32, Format::R8G8B8A8Unorm, "scene"),
            )
            .unwrap(),
        );
        let pass = FullscreenPass::new(target);
        assert!(pass.state(&ShaderSet::default()).is_none());
    }
}
