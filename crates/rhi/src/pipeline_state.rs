//! Pipeline state descriptors.
//!
//! A [`PipelineState`] describes everything a pipeline is compiled from plus
//! the per-pass data a command list needs to start rendering with it (clear
//! values and the pass name). Only the compiled part takes part in hashing and
//! equality, so two passes that differ only in clear values share a pipeline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::backend::Backend;
//! use lumen_rhi::{BlendState, DepthStencilState, PipelineState, RasterizerState, Shader, Texture};
//! use lumen_rhi::{CullMode, PolygonMode};
//!
//! # fn example<B: Backend>(vs: Arc<Shader<B>>, ps: Arc<Shader<B>>, target: Arc<Texture<B>>) {
//! let mut pso = PipelineState::new("gbuffer");
//! pso.shader_vertex = Some(vs);
//! pso.shader_pixel = Some(ps);
//! pso.rasterizer_state = Some(Arc::new(RasterizerState::new(CullMode::Back, PolygonMode::Solid)));
//! pso.blend_state = Some(Arc::new(BlendState::disabled()));
//! pso.depth_stencil_state = Some(Arc::new(DepthStencilState::disabled()));
//! pso.render_target_color_textures[0] = Some(target);
//! pso.clear_color[0] = Some(glam::Vec4::ZERO);
//! assert!(pso.is_valid());
//! # }
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use glam::Vec4;

use crate::backend::Backend;
use crate::definitions::{MAX_RENDER_TARGET_COUNT, ObjectId, PipelineKind, PrimitiveTopology};
use crate::shader::Shader;
use crate::state::{BlendState, DepthStencilState, RasterizerState};
use crate::swapchain::Swapchain;
use crate::texture::Texture;

pub struct PipelineState<B: Backend> {
    pub shader_vertex: Option<Arc<Shader<B>>>,
    pub shader_pixel: Option<Arc<Shader<B>>>,
    pub shader_compute: Option<Arc<Shader<B>>>,

    pub rasterizer_state: Option<Arc<RasterizerState>>,
    pub blend_state: Option<Arc<BlendState>>,
    pub depth_stencil_state: Option<Arc<DepthStencilState>>,

    /// Render into the swapchain's current image. Excludes color textures.
    pub render_target_swapchain: Option<Arc<Swapchain<B>>>,
    pub render_target_color_textures: [Option<Arc<Texture<B>>>; MAX_RENDER_TARGET_COUNT],
    pub render_target_depth_texture: Option<Arc<Texture<B>>>,
    /// Bind the depth texture for testing only; it stays sampleable.
    pub render_target_depth_texture_read_only: bool,

    pub primitive_topology: PrimitiveTopology,
    /// Adds a per-instance transform stream at binding 1.
    pub instancing: bool,
    pub dynamic_scissor: bool,
    /// Vertices come from the vertex index; no vertex input.
    pub is_fullscreen_triangle: bool,

    /// `None` loads the existing contents.
    pub clear_color: [Option<Vec4>; MAX_RENDER_TARGET_COUNT],
    pub clear_depth: Option<f32>,
    pub clear_stencil: Option<u32>,

    pub name: String,
}

impl<B: Backend> PipelineState<B> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_graphics(&self) -> bool {
        self.shader_vertex.is_some() && self.shader_compute.is_none()
    }

    #[inline]
    pub fn is_compute(&self) -> bool {
        self.shader_compute.is_some() && self.shader_vertex.is_none() && self.shader_pixel.is_none()
    }

    pub fn kind(&self) -> Option<PipelineKind> {
        if !self.is_valid() {
            None
        } else if self.is_graphics() {
            Some(PipelineKind::Graphics)
        } else {
            Some(PipelineKind::Compute)
        }
    }

    /// True when exactly one of graphics or compute is described, the
    /// swapchain is not combined with color textures, and a graphics state has
    /// all three fixed-function states.
    pub fn is_valid(&self) -> bool {
        let has_graphics = self.shader_vertex.is_some() || self.shader_pixel.is_some();
        let has_compute = self.shader_compute.is_some();
        if has_graphics == has_compute {
            return false;
        }

        if self.render_target_swapchain.is_some() && self.has_color_textures() {
            return false;
        }

        if has_graphics {
            return self.shader_vertex.is_some()
                && self.rasterizer_state.is_some()
                && self.blend_state.is_some()
                && self.depth_stencil_state.is_some();
        }

        true
    }

    pub fn has_color_textures(&self) -> bool {
        self.render_target_color_textures.iter().any(Option::is_some)
    }

    /// Color textures in slot order, up to the first empty slot.
    pub fn color_textures(&self) -> impl Iterator<Item = &Arc<Texture<B>>> {
        self.render_target_color_textures
            .iter()
            .map_while(Option::as_ref)
    }

    pub fn has_clear_values(&self) -> bool {
        self.clear_color.iter().any(Option::is_some)
            || self.clear_depth.is_some()
            || self.clear_stencil.is_some()
    }

    /// Render-target extent: swapchain, first color texture, then depth.
    pub fn width(&self) -> u32 {
        self.extent().0
    }

    pub fn height(&self) -> u32 {
        self.extent().1
    }

    fn extent(&self) -> (u32, u32) {
        if let Some(swapchain) = &self.render_target_swapchain {
            (swapchain.width(), swapchain.height())
        } else if let Some(texture) = self.color_textures().next() {
            (texture.width(), texture.height())
        } else if let Some(depth) = &self.render_target_depth_texture {
            (depth.width(), depth.height())
        } else {
            (0, 0)
        }
    }

    /// Content hash over everything that affects compilation.
    pub fn hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.key().hash(&mut hasher);
        hasher.finish()
    }

    fn key(&self) -> PipelineKey {
        let id = |shader: &Option<Arc<Shader<B>>>| shader.as_ref().map(|s| s.id());
        PipelineKey {
            shaders: [
                id(&self.shader_vertex),
                id(&self.shader_pixel),
                id(&self.shader_compute),
            ],
            rasterizer: self.rasterizer_state.as_ref().map(|s| s.hash()),
            blend: self.blend_state.as_ref().map(|s| s.hash()),
            depth_stencil: self.depth_stencil_state.as_ref().map(|s| s.hash()),
            swapchain: self.render_target_swapchain.as_ref().map(|s| s.id()),
            color_textures: std::array::from_fn(|i| {
                self.render_target_color_textures[i].as_ref().map(|t| t.id())
            }),
            depth_texture: self.render_target_depth_texture.as_ref().map(|t| t.id()),
            depth_read_only: self.render_target_depth_texture_read_only,
            topology: self.primitive_topology,
            instancing: self.instancing,
            dynamic_scissor: self.dynamic_scissor,
            fullscreen_triangle: self.is_fullscreen_triangle,
        }
    }

    /// True if the state references the shader.
    pub fn uses_shader(&self, id: ObjectId) -> bool {
        [&self.shader_vertex, &self.shader_pixel, &self.shader_compute]
            .into_iter()
            .flatten()
            .any(|shader| shader.id() == id)
    }
}

#[derive(PartialEq, Eq, Hash)]
struct PipelineKey {
    shaders: [Option<ObjectId>; 3],
    rasterizer: Option<u64>,
    blend: Option<u64>,
    depth_stencil: Option<u64>,
    swapchain: Option<ObjectId>,
    color_textures: [Option<ObjectId>; MAX_RENDER_TARGET_COUNT],
    depth_texture: Option<ObjectId>,
    depth_read_only: bool,
    topology: PrimitiveTopology,
    instancing: bool,
    dynamic_scissor: bool,
    fullscreen_triangle: bool,
}

impl<B: Backend> Default for PipelineState<B> {
    fn default() -> Self {
        Self {
            shader_vertex: None,
            shader_pixel: None,
            shader_compute: None,
            rasterizer_state: None,
            blend_state: None,
            depth_stencil_state: None,
            render_target_swapchain: None,
            render_target_color_textures: Default::default(),
            render_target_depth_texture: None,
            render_target_depth_texture_read_only: false,
            primitive_topology: PrimitiveTopology::TriangleList,
            instancing: false,
            dynamic_scissor: false,
            is_fullscreen_triangle: false,
            clear_color: [None; MAX_RENDER_TARGET_COUNT],
            clear_depth: None,
            clear_stencil: None,
            name: String::new(),
        }
    }
}

impl<B: Backend> Clone for PipelineState<B> {
    fn clone(&self) -> Self {
        Self {
            shader_vertex: self.shader_vertex.clone(),
            shader_pixel: self.shader_pixel.clone(),
            shader_compute: self.shader_compute.clone(),
            rasterizer_state: self.rasterizer_state.clone(),
            blend_state: self.blend_state.clone(),
            depth_stencil_state: self.depth_stencil_state.clone(),
            render_target_swapchain: self.render_target_swapchain.clone(),
            render_target_color_textures: self.render_target_color_textures.clone(),
            render_target_depth_texture: self.render_target_depth_texture.clone(),
            render_target_depth_texture_read_only: self.render_target_depth_texture_read_only,
            primitive_topology: self.primitive_topology,
            instancing: self.instancing,
            dynamic_scissor: self.dynamic_scissor,
            is_fullscreen_triangle: self.is_fullscreen_triangle,
            clear_color: self.clear_color,
            clear_depth: self.clear_depth,
            clear_stencil: self.clear_stencil,
            name: self.name.clone(),
        }
    }
}

impl<B: Backend> PartialEq for PipelineState<B> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<B: Backend> Eq for PipelineState<B> {}

impl<B: Backend> Hash for PipelineState<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl<B: Backend> std::fmt::Debug for PipelineState<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("color_targets", &self.color_textures().count())
            .field("swapchain", &self.render_target_swapchain.is_some())
            .field("depth", &self.render_target_depth_texture.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::definitions::{CullMode, Format, PolygonMode, ShaderStage};
    use crate::device::{Device, DeviceSettings};
    use crate::shader::ShaderReflection;
    use crate::texture::TextureDesc;

    struct Fixture {
        device: Arc<Device<NullBackend>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                device: Device::new(NullBackend::new(), DeviceSettings::default()),
            }
        }

        fn shader(&self, stage: ShaderStage) -> Arc<Shader<NullBackend>> {
            Arc::new(
                Shader::from_spirv_bytes(
                    self.device.clone(),
                    &[0u8; 4],
                    stage,
                    ShaderReflection::new("main"),
                    stage.name(),
                )
                .unwrap(),
            )
        }

        fn target(&self) -> Arc<Texture<NullBackend>> {
            Arc::new(
                Texture::new(
                    self.device.clone(),
                    TextureDesc::render_target(8, 8, Format::R8G8B8A8Unorm, "rt"),
                )
                .unwrap(),
            )
        }

        fn graphics(&self) -> PipelineState<NullBackend> {
            let mut pso = PipelineState::new("graphics");
            pso.shader_vertex = Some(self.shader(ShaderStage::VERTEX));
            pso.shader_pixel = Some(self.shader(ShaderStage::PIXEL));
            pso.rasterizer_state = Some(Arc::new(RasterizerState::new(CullMode::Back, PolygonMode::Solid)));
            pso.blend_state = Some(Arc::new(BlendState::disabled()));
            pso.depth_stencil_state = Some(Arc::new(DepthStencilState::disabled()));
            pso
        }
    }

    #[test]
    fn test_graphics_and_compute_together_is_invalid() {
        let fixture = Fixture::new();
        let mut pso = fixture.graphics();
        assert!(pso.is_valid());

        pso.shader_compute = Some(fixture.shader(ShaderStage::COMPUTE));
        assert!(!pso.is_valid());
        assert_eq!(pso.kind(), None);
    }

    #[test]
    fn test_neither_graphics_nor_compute_is_invalid() {
        let pso = PipelineState::<NullBackend>::new("empty");
        assert!(!pso.is_valid());
    }

    #[test]
    fn test_compute_only_is_valid() {
        let fixture = Fixture::new();
        let mut pso = PipelineState::new("compute");
        pso.shader_compute = Some(fixture.shader(ShaderStage::COMPUTE));
        assert!(pso.is_valid());
        assert_eq!(pso.kind(), Some(PipelineKind::Compute));
    }

    #[test]
    fn test_pixel_without_vertex_is_invalid() {
        let fixture = Fixture::new();
        let mut pso = fixture.graphics();
        pso.shader_vertex = None;
        assert!(!pso.is_valid());
    }

    #[test]
    fn test_graphics_requires_fixed_function_states() {
        let fixture = Fixture::new();
        let mut pso = fixture.graphics();
        pso.blend_state = None;
        assert!(!pso.is_valid());
    }

    #[test]
    fn test_swapchain_excludes_color_textures() {
        let fixture = Fixture::new();
        let swapchain = Arc::new(
            Swapchain::new(fixture.device.clone(), 8, 8, Format::B8R8G8A8Unorm, 2, "sc").unwrap(),
        );
        let mut pso = fixture.graphics();
        pso.render_target_swapchain = Some(swapchain);
        assert!(pso.is_valid());
        assert_eq!(pso.width(), 8);

        pso.render_target_color_textures[0] = Some(fixture.target());
        assert!(!pso.is_valid());
    }

    #[test]
    fn test_hash_ignores_clear_values_and_name() {
        let fixture = Fixture::new();
        let target = fixture.target();
        let mut a = fixture.graphics();
        a.render_target_color_textures[0] = Some(target);
        let mut b = a.clone();
        b.name = "other".to_string();
        b.clear_color[0] = Some(Vec4::ONE);
        b.clear_depth = Some(0.0);

        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);

        b.instancing = true;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_uses_state_content() {
        let fixture = Fixture::new();
        let a = fixture.graphics();
        let mut b = a.clone();
        b.rasterizer_state = Some(Arc::new(RasterizerState::new(CullMode::Back, PolygonMode::Solid)));
        assert_eq!(a.hash(), b.hash());

        b.rasterizer_state = Some(Arc::new(RasterizerState::new(CullMode::None, PolygonMode::Solid)));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_color_textures_stop_at_first_gap() {
        let fixture = Fixture::new();
        let mut pso = fixture.graphics();
        pso.render_target_color_textures[0] = Some(fixture.target());
        pso.render_target_color_textures[2] = Some(fixture.target());
        assert_eq!(pso.color_textures().count(), 1);
    }

    #[test]
    fn test_uses_shader() {
        let fixture = Fixture::new();
        let pso = fixture.graphics();
        let vs = pso.shader_vertex.as_ref().unwrap().id();
        assert!(pso.uses_shader(vs));
        assert!(!pso.uses_shader(ObjectId::next()));
    }
}
