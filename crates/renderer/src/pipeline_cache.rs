//! Compiled pipelines keyed by pipeline state hash.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::{debug, info};

use lumen_rhi::backend::Backend;
use lumen_rhi::{DescriptorSetLayout, Device, ObjectId, Pipeline, PipelineState, RhiResult, Shader};

/// Maps a [`PipelineState`] to its compiled [`Pipeline`].
///
/// Two states with equal hashes share a pipeline. Render targets take part in
/// the hash, so the same shaders drawn into different targets compile twice.
pub struct PipelineCache<B: Backend> {
    device: Arc<Device<B>>,
    pipelines: HashMap<u64, Arc<Pipeline<B>>>,
    hits: u64,
    misses: u64,
}

impl<B: Backend> PipelineCache<B> {
    pub fn new(device: Arc<Device<B>>) -> Self {
        Self {
            device,
            pipelines: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached pipeline for `state`, compiling it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the backend error when layout or pipeline creation fails.
    /// Nothing is cached in that case.
    pub fn get_or_create(&mut self, state: &PipelineState<B>) -> RhiResult<Arc<Pipeline<B>>> {
        let key = state.hash();
        match self.pipelines.entry(key) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                self.misses += 1;
                let shaders: Vec<&Shader<B>> =
                    [&state.shader_vertex, &state.shader_pixel, &state.shader_compute]
                        .into_iter()
                        .flatten()
                        .map(|shader| shader.as_ref())
                        .collect();
                let layout = Arc::new(DescriptorSetLayout::from_shaders(
                    self.device.clone(),
                    &shaders,
                    &state.name,
                )?);
                let pipeline = Arc::new(Pipeline::new(self.device.clone(), state, layout)?);
                debug!("Cached pipeline '{}' under {:#018x}", state.name, key);
                Ok(entry.insert(pipeline).clone())
            }
        }
    }

    /// Evicts every pipeline built from `shader`. Returns how many were
    /// dropped; their handles leave through the deletion queue.
    pub fn invalidate_shader(&mut self, shader: ObjectId) -> usize {
        let before = self.pipelines.len();
        self.pipelines
            .retain(|_, pipeline| !pipeline.state().uses_shader(shader));
        let evicted = before - self.pipelines.len();
        if evicted > 0 {
            info!("Evicted {} pipeline(s) using shader {:?}", evicted, shader);
        }
        evicted
    }

    pub fn clear(&mut self) {
        if !self.pipelines.is_empty() {
            info!("Clearing {} cached pipeline(s)", self.pipelines.len());
        }
        self.pipelines.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_rhi::backend::null::NullBackend;
    use lumen_rhi::{
        BlendState, CullMode, DepthStencilState, DeviceSettings, Format, PolygonMode,
        RasterizerState, ShaderReflection, ShaderStage, Texture, TextureDesc,
    };

    fn device() -> Arc<Device<NullBackend>> {
        Device::new(NullBackend::new(), DeviceSettings::default())
    }

    fn shader(device: &Arc<Device<NullBackend>>, stage: ShaderStage) -> Arc<Shader<NullBackend>> {
        Arc::new(
            Shader::from_spirv_bytes(device.clone(), &[0u8; 4], stage, ShaderReflection::new("main"), "test")
                .unwrap(),
        )
    }

    fn state(device: &Arc<Device<NullBackend>>, vertex: Arc<Shader<NullBackend>>) -> PipelineState<NullBackend> {
        let mut pso = PipelineState::new("cached");
        pso.shader_vertex = Some(vertex);
        pso.shader_pixel = Some(shader(device, ShaderStage::PIXEL));
        pso.rasterizer_state = Some(Arc::new(RasterizerState::new(CullMode::Back, PolygonMode::Solid)));
        pso.blend_state = Some(Arc::new(BlendState::disabled()));
        pso.depth_stencil_state = Some(Arc::new(DepthStencilState::read_write()));
        pso.render_target_color_textures[0] = Some(Arc::new(
            Texture::new(device.clone(), TextureDesc::render_target(8, 8, Format::R8G8B8A8Unorm, "rt")).unwrap(),
        ));
        pso
    }

    #[test]
    fn test_same_state_hits_cache() {
        let device = device();
        let mut cache = PipelineCache::new(device.clone());
        let pso = state(&device, shader(&device, ShaderStage::VERTEX));

        let first = cache.get_or_create(&pso).unwrap();
        let second = cache.get_or_create(&pso).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_invalidate_shader_evicts_users_only() {
        let device = device();
        let mut cache = PipelineCache::new(device.clone());
        let reloaded = shader(&device, ShaderStage::VERTEX);
        let stable = shader(&device, ShaderStage::VERTEX);
        cache.get_or_create(&state(&device, reloaded.clone())).unwrap();
        cache.get_or_create(&state(&device, stable)).unwrap();
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.invalidate_shader(reloaded.id()), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_shader(reloaded.id()), 0);
    }

    #[test]
    fn test_clear_routes_pipelines_through_deletion_queue() {
        let device = device();
        let mut cache = PipelineCache::new(device.clone());
        let pipeline = cache
            .get_or_create(&state(&device, shader(&device, ShaderStage::VERTEX)))
            .unwrap();
        let handle = pipeline.handle();
        drop(pipeline);

        cache.clear();
        assert!(cache.is_empty());
        assert!(device.backend().is_live(handle));
        device.collect_garbage();
        assert!(!device.backend().is_live(handle));
    }
}
