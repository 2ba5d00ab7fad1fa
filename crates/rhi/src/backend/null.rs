//! In-memory backend that records instead of rendering.
//!
//! Every handle is a counter value, every recorded command is appended to a
//! per-command-buffer log, and every release is tallied. Submissions can be
//! completed automatically or held pending until [`NullBackend::complete_submissions`]
//! is called, which makes the blocking rules of `CommandList::begin` observable
//! from tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

use super::{
    Backend, Capabilities, ColorBlendDesc, DepthStencilDesc, DescriptorWrite, GpuHandle,
    GraphicsPipelineDesc, ImageBarrier, PushConstantRange, RasterizerDesc, RenderingInfo,
    Resource, ShaderStageDesc, TextureRegion, VertexAttribute, VertexBinding,
};
use crate::buffer::BufferDesc;
use crate::definitions::{
    ClearValue, Format, ImageAspect, ImageLayout, IndexFormat, PipelineKind, QueueType, Rect,
    ResourceType, ShaderStage, Viewport,
};
use crate::descriptor::Descriptor;
use crate::error::{RhiError, RhiResult};
use crate::sampler::SamplerDesc;
use crate::texture::TextureDesc;

/// Handle type for every null-backend object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NullHandle {
    kind: ResourceType,
    id: u64,
}

impl NullHandle {
    pub const NULL: NullHandle = NullHandle {
        kind: ResourceType::Buffer,
        id: 0,
    };

    pub fn from_raw(kind: ResourceType, id: u64) -> Self {
        Self { kind, id }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> ResourceType {
        self.kind
    }
}

impl GpuHandle for NullHandle {
    fn is_null(&self) -> bool {
        self.id == 0
    }
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum NullCommand {
    BeginRendering {
        width: u32,
        height: u32,
        color_attachments: usize,
        has_depth: bool,
        clears: usize,
    },
    EndRendering,
    BindPipeline {
        pipeline: NullHandle,
        kind: PipelineKind,
    },
    BindDescriptors {
        slots: Vec<u32>,
    },
    PushConstants {
        stages: ShaderStage,
        offset: u32,
        size: u32,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: NullHandle,
    },
    BindIndexBuffer {
        buffer: NullHandle,
        format: IndexFormat,
    },
    SetViewport(Viewport),
    SetScissor(Rect),
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    Barrier {
        texture: NullHandle,
        mip_start: u32,
        mip_range: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    Blit {
        src: NullHandle,
        dst: NullHandle,
        mip: u32,
    },
    Copy {
        src: NullHandle,
        dst: NullHandle,
        mip: u32,
    },
    Clear {
        texture: NullHandle,
        value: ClearValue,
    },
    Timestamp(u32),
    BeginMarker(String),
    EndMarker,
}

/// What a graphics or compute pipeline was compiled from.
#[derive(Clone, Debug)]
pub struct NullPipelineRecord {
    pub kind: PipelineKind,
    pub name: String,
    pub layout: NullHandle,
    pub stages: Vec<ShaderStage>,
    pub vertex_bindings: Vec<VertexBinding>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub rasterizer: Option<RasterizerDesc>,
    pub depth_stencil: Option<DepthStencilDesc>,
    pub blend_attachments: Vec<ColorBlendDesc>,
    pub blend_constants: [f32; 4],
    pub color_formats: Vec<Format>,
    pub depth_format: Format,
    pub stencil_format: Format,
    pub dynamic_scissor: bool,
}

#[derive(Clone, Debug)]
pub struct NullLayoutRecord {
    pub set_layouts: [NullHandle; 3],
    pub push_constant_ranges: Vec<PushConstantRange>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubmissionState {
    Idle,
    Pending,
    Complete,
}

#[derive(Debug)]
struct CommandBufferRecord {
    queue: QueueType,
    submission: SubmissionState,
    commands: Vec<NullCommand>,
    timestamps: HashMap<u32, u64>,
}

#[derive(Default)]
struct NullState {
    live: HashMap<NullHandle, String>,
    release_counts: HashMap<NullHandle, u32>,
    released: Vec<NullHandle>,
    double_releases: usize,
    buffers: HashMap<NullHandle, Vec<u8>>,
    descriptor_layouts: HashMap<NullHandle, Vec<Descriptor>>,
    pipeline_layouts: HashMap<NullHandle, NullLayoutRecord>,
    pipelines: HashMap<NullHandle, NullPipelineRecord>,
    command_buffers: HashMap<NullHandle, CommandBufferRecord>,
    submissions: usize,
}

pub struct NullBackend {
    capabilities: Capabilities,
    next_id: AtomicU64,
    clock: AtomicU64,
    auto_complete: AtomicBool,
    sampler_layouts: [NullHandle; 2],
    state: Mutex<NullState>,
    completion: Condvar,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities {
            device_name: "Null Device".to_string(),
            max_push_constant_size: 128,
            timestamp_period: 1.0,
            timestamps_supported: true,
            max_texture_dimension: 16384,
        })
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let backend = Self {
            capabilities,
            next_id: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            auto_complete: AtomicBool::new(true),
            sampler_layouts: [NullHandle::NULL; 2],
            state: Mutex::new(NullState::default()),
            completion: Condvar::new(),
        };

        let comparison = backend.allocate(ResourceType::DescriptorSetLayout, "comparison_sampler");
        let regular = backend.allocate(ResourceType::DescriptorSetLayout, "regular_samplers");
        Self {
            sampler_layouts: [comparison, regular],
            ..backend
        }
    }

    /// When disabled, submissions stay pending until [`Self::complete_submissions`].
    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::SeqCst);
    }

    /// Signals every pending submission and wakes waiters.
    pub fn complete_submissions(&self) {
        let mut state = self.state.lock();
        for record in state.command_buffers.values_mut() {
            if record.submission == SubmissionState::Pending {
                record.submission = SubmissionState::Complete;
            }
        }
        self.completion.notify_all();
    }

    pub fn pending_submissions(&self) -> usize {
        self.state
            .lock()
            .command_buffers
            .values()
            .filter(|r| r.submission == SubmissionState::Pending)
            .count()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions
    }

    /// Commands recorded into `cmd` since its last begin.
    pub fn commands(&self, cmd: NullHandle) -> Vec<NullCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&cmd)
            .map(|r| r.commands.clone())
            .unwrap_or_default()
    }

    pub fn queue_of(&self, cmd: NullHandle) -> Option<QueueType> {
        self.state.lock().command_buffers.get(&cmd).map(|r| r.queue)
    }

    pub fn pipeline(&self, pipeline: NullHandle) -> Option<NullPipelineRecord> {
        self.state.lock().pipelines.get(&pipeline).cloned()
    }

    pub fn pipeline_layout(&self, layout: NullHandle) -> Option<NullLayoutRecord> {
        self.state.lock().pipeline_layouts.get(&layout).cloned()
    }

    pub fn descriptor_set_layout(&self, layout: NullHandle) -> Option<Vec<Descriptor>> {
        self.state.lock().descriptor_layouts.get(&layout).cloned()
    }

    pub fn buffer_contents(&self, buffer: NullHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).cloned()
    }

    pub fn name_of(&self, handle: NullHandle) -> Option<String> {
        self.state.lock().live.get(&handle).cloned()
    }

    pub fn is_live(&self, handle: NullHandle) -> bool {
        self.state.lock().live.contains_key(&handle)
    }

    pub fn live_count(&self, kind: ResourceType) -> usize {
        self.state
            .lock()
            .live
            .keys()
            .filter(|h| h.kind == kind)
            .count()
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().released.len()
    }

    pub fn released(&self) -> Vec<NullHandle> {
        self.state.lock().released.clone()
    }

    pub fn times_released(&self, handle: NullHandle) -> u32 {
        self.state
            .lock()
            .release_counts
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Releases of handles that were not live at the time.
    pub fn double_releases(&self) -> usize {
        self.state.lock().double_releases
    }

    fn allocate(&self, kind: ResourceType, name: &str) -> NullHandle {
        let handle = NullHandle {
            kind,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        self.state.lock().live.insert(handle, name.to_string());
        trace!("null: created {:?} '{}'", handle, name);
        handle
    }

    fn record(&self, cmd: NullHandle, command: NullCommand) {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&cmd) {
            Some(record) => record.commands.push(command),
            None => error!("null: recording into unknown command buffer {:?}", cmd),
        }
    }

    fn handle_of(resource: &Resource<Self>) -> NullHandle {
        match *resource {
            Resource::Pipeline(h)
            | Resource::PipelineLayout(h)
            | Resource::DescriptorSetLayout(h)
            | Resource::Shader(h)
            | Resource::Sampler(h)
            | Resource::Texture(h)
            | Resource::Buffer(h)
            | Resource::CommandList(h) => h,
        }
    }

    fn wait_until<F>(&self, timeout: Duration, what: &str, mut done: F) -> RhiResult<()>
    where
        F: FnMut(&NullState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !done(&state) {
            let now = Instant::now();
            if now >= deadline {
                return Err(RhiError::Timeout(what.to_string()));
            }
            self.completion.wait_for(&mut state, deadline - now);
        }
        Ok(())
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for NullBackend {
    type ShaderModule = NullHandle;
    type DescriptorSetLayout = NullHandle;
    type PipelineLayout = NullHandle;
    type Pipeline = NullHandle;
    type CommandBuffer = NullHandle;
    type Buffer = NullHandle;
    type Texture = NullHandle;
    type Sampler = NullHandle;

    fn name(&self) -> &'static str {
        "null"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn sampler_set_layouts(&self) -> [NullHandle; 2] {
        self.sampler_layouts
    }

    fn create_shader_module(&self, bytecode: &[u8], name: &str) -> RhiResult<NullHandle> {
        if bytecode.is_empty() {
            return Err(RhiError::ShaderError(format!(
                "Shader '{}' has no bytecode",
                name
            )));
        }
        Ok(self.allocate(ResourceType::Shader, name))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<NullHandle> {
        let handle = self.allocate(ResourceType::Buffer, &desc.name);
        self.state
            .lock()
            .buffers
            .insert(handle, vec![0; desc.size as usize]);
        Ok(handle)
    }

    fn write_buffer(&self, buffer: NullHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut state = self.state.lock();
        let contents = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("Unknown buffer {:?}", buffer)))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc) -> RhiResult<NullHandle> {
        Ok(self.allocate(ResourceType::Texture, &desc.name))
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> RhiResult<NullHandle> {
        Ok(self.allocate(ResourceType::Sampler, "sampler"))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[Descriptor],
        name: &str,
    ) -> RhiResult<NullHandle> {
        let handle = self.allocate(ResourceType::DescriptorSetLayout, name);
        self.state
            .lock()
            .descriptor_layouts
            .insert(handle, bindings.to_vec());
        Ok(handle)
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[NullHandle; 3],
        push_constant_ranges: &[PushConstantRange],
        name: &str,
    ) -> RhiResult<NullHandle> {
        let handle = self.allocate(ResourceType::PipelineLayout, name);
        self.state.lock().pipeline_layouts.insert(
            handle,
            NullLayoutRecord {
                set_layouts: *set_layouts,
                push_constant_ranges: push_constant_ranges.to_vec(),
            },
        );
        Ok(handle)
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_, Self>,
        layout: NullHandle,
    ) -> RhiResult<NullHandle> {
        if desc.stages.is_empty() {
            return Err(RhiError::PipelineError(format!(
                "Pipeline '{}' has no shader stages",
                desc.name
            )));
        }

        let handle = self.allocate(ResourceType::Pipeline, desc.name);
        self.state.lock().pipelines.insert(
            handle,
            NullPipelineRecord {
                kind: PipelineKind::Graphics,
                name: desc.name.to_string(),
                layout,
                stages: desc.stages.iter().map(|s| s.stage).collect(),
                vertex_bindings: desc.vertex_bindings.clone(),
                vertex_attributes: desc.vertex_attributes.clone(),
                rasterizer: Some(desc.rasterizer),
                depth_stencil: Some(desc.depth_stencil),
                blend_attachments: desc.blend_attachments.clone(),
                blend_constants: desc.blend_constants,
                color_formats: desc.color_formats.clone(),
                depth_format: desc.depth_format,
                stencil_format: desc.stencil_format,
                dynamic_scissor: desc.dynamic_scissor,
            },
        );
        Ok(handle)
    }

    fn create_compute_pipeline(
        &self,
        stage: &ShaderStageDesc<'_, Self>,
        layout: NullHandle,
        name: &str,
    ) -> RhiResult<NullHandle> {
        let handle = self.allocate(ResourceType::Pipeline, name);
        self.state.lock().pipelines.insert(
            handle,
            NullPipelineRecord {
                kind: PipelineKind::Compute,
                name: name.to_string(),
                layout,
                stages: vec![stage.stage],
                vertex_bindings: Vec::new(),
                vertex_attributes: Vec::new(),
                rasterizer: None,
                depth_stencil: None,
                blend_attachments: Vec::new(),
                blend_constants: [0.0; 4],
                color_formats: Vec::new(),
                depth_format: Format::Undefined,
                stencil_format: Format::Undefined,
                dynamic_scissor: false,
            },
        );
        Ok(handle)
    }

    fn set_name(&self, resource: Resource<Self>, name: &str) {
        let handle = Self::handle_of(&resource);
        if let Some(entry) = self.state.lock().live.get_mut(&handle) {
            *entry = name.to_string();
        }
    }

    fn release(&self, resource: Resource<Self>) {
        let handle = Self::handle_of(&resource);
        let mut state = self.state.lock();
        if state.live.remove(&handle).is_none() {
            error!("null: release of dead handle {:?}", handle);
            state.double_releases += 1;
        }
        *state.release_counts.entry(handle).or_insert(0) += 1;
        state.released.push(handle);
        state.buffers.remove(&handle);
        state.command_buffers.remove(&handle);
        state.pipelines.remove(&handle);
        state.pipeline_layouts.remove(&handle);
        state.descriptor_layouts.remove(&handle);
    }

    fn create_command_buffer(&self, queue: QueueType, name: &str) -> RhiResult<NullHandle> {
        let handle = self.allocate(ResourceType::CommandList, name);
        self.state.lock().command_buffers.insert(
            handle,
            CommandBufferRecord {
                queue,
                submission: SubmissionState::Idle,
                commands: Vec::new(),
                timestamps: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn submit(&self, cmd: NullHandle, _queue: QueueType) -> RhiResult<()> {
        let auto_complete = self.auto_complete.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        let record = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("Unknown command buffer {:?}", cmd)))?;
        record.submission = if auto_complete {
            SubmissionState::Complete
        } else {
            SubmissionState::Pending
        };
        state.submissions += 1;
        Ok(())
    }

    fn is_complete(&self, cmd: NullHandle) -> RhiResult<bool> {
        Ok(self
            .state
            .lock()
            .command_buffers
            .get(&cmd)
            .is_none_or(|r| r.submission != SubmissionState::Pending))
    }

    fn wait_for_completion(&self, cmd: NullHandle, timeout: Duration) -> RhiResult<()> {
        self.wait_until(timeout, "null command buffer", |state| {
            state
                .command_buffers
                .get(&cmd)
                .is_none_or(|r| r.submission != SubmissionState::Pending)
        })
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.wait_until(Duration::from_secs(10), "null device idle", |state| {
            state
                .command_buffers
                .values()
                .all(|r| r.submission != SubmissionState::Pending)
        })
    }

    fn read_timestamps(&self, cmd: NullHandle, first: u32, count: u32) -> RhiResult<Vec<u64>> {
        let state = self.state.lock();
        let record = state
            .command_buffers
            .get(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("Unknown command buffer {:?}", cmd)))?;
        Ok((first..first + count)
            .map(|i| record.timestamps.get(&i).copied().unwrap_or(0))
            .collect())
    }

    fn begin_command_buffer(&self, cmd: NullHandle) -> RhiResult<()> {
        let mut state = self.state.lock();
        let record = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("Unknown command buffer {:?}", cmd)))?;
        if record.submission == SubmissionState::Pending {
            return Err(RhiError::InvalidHandle(
                "Command buffer reset while still executing".to_string(),
            ));
        }
        record.submission = SubmissionState::Idle;
        record.commands.clear();
        record.timestamps.clear();
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: NullHandle) -> RhiResult<()> {
        Ok(())
    }

    fn cmd_begin_rendering(&self, cmd: NullHandle, info: &RenderingInfo<Self>) {
        let clears = info
            .color_attachments
            .iter()
            .filter(|a| a.clear.is_some())
            .count()
            + info
                .depth_attachment
                .as_ref()
                .map_or(0, |d| usize::from(d.clear_depth.is_some() || d.clear_stencil.is_some()));
        self.record(
            cmd,
            NullCommand::BeginRendering {
                width: info.width,
                height: info.height,
                color_attachments: info.color_attachments.len(),
                has_depth: info.depth_attachment.is_some(),
                clears,
            },
        );
    }

    fn cmd_end_rendering(&self, cmd: NullHandle) {
        self.record(cmd, NullCommand::EndRendering);
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: NullHandle,
        kind: PipelineKind,
        pipeline: NullHandle,
        _layout: NullHandle,
    ) {
        self.record(cmd, NullCommand::BindPipeline { pipeline, kind });
    }

    fn cmd_bind_descriptors(
        &self,
        cmd: NullHandle,
        _kind: PipelineKind,
        _layout: NullHandle,
        writes: &[DescriptorWrite<Self>],
    ) {
        self.record(
            cmd,
            NullCommand::BindDescriptors {
                slots: writes.iter().map(|w| w.slot).collect(),
            },
        );
    }

    fn cmd_push_constants(
        &self,
        cmd: NullHandle,
        _layout: NullHandle,
        stages: ShaderStage,
        offset: u32,
        data: &[u8],
    ) {
        self.record(
            cmd,
            NullCommand::PushConstants {
                stages,
                offset,
                size: data.len() as u32,
            },
        );
    }

    fn cmd_bind_vertex_buffer(&self, cmd: NullHandle, binding: u32, buffer: NullHandle) {
        self.record(cmd, NullCommand::BindVertexBuffer { binding, buffer });
    }

    fn cmd_bind_index_buffer(&self, cmd: NullHandle, buffer: NullHandle, format: IndexFormat) {
        self.record(cmd, NullCommand::BindIndexBuffer { buffer, format });
    }

    fn cmd_set_viewport(&self, cmd: NullHandle, viewport: &Viewport) {
        self.record(cmd, NullCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, cmd: NullHandle, rect: &Rect) {
        self.record(cmd, NullCommand::SetScissor(*rect));
    }

    fn cmd_draw(&self, cmd: NullHandle, vertex_count: u32, first_vertex: u32) {
        self.record(
            cmd,
            NullCommand::Draw {
                vertex_count,
                first_vertex,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        cmd: NullHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
        instance_count: u32,
    ) {
        self.record(
            cmd,
            NullCommand::DrawIndexed {
                index_count,
                first_index,
                vertex_offset,
                instance_count,
            },
        );
    }

    fn cmd_dispatch(&self, cmd: NullHandle, x: u32, y: u32, z: u32) {
        self.record(cmd, NullCommand::Dispatch { x, y, z });
    }

    fn cmd_image_barrier(&self, cmd: NullHandle, barrier: &ImageBarrier<Self>) {
        self.record(
            cmd,
            NullCommand::Barrier {
                texture: barrier.texture,
                mip_start: barrier.mip_start,
                mip_range: barrier.mip_range,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
            },
        );
    }

    fn cmd_blit(&self, cmd: NullHandle, src: &TextureRegion<Self>, dst: &TextureRegion<Self>) {
        self.record(
            cmd,
            NullCommand::Blit {
                src: src.texture,
                dst: dst.texture,
                mip: src.mip,
            },
        );
    }

    fn cmd_copy(&self, cmd: NullHandle, src: &TextureRegion<Self>, dst: &TextureRegion<Self>) {
        self.record(
            cmd,
            NullCommand::Copy {
                src: src.texture,
                dst: dst.texture,
                mip: src.mip,
            },
        );
    }

    fn cmd_clear_texture(
        &self,
        cmd: NullHandle,
        texture: NullHandle,
        _aspect: ImageAspect,
        _layout: ImageLayout,
        value: ClearValue,
    ) {
        self.record(cmd, NullCommand::Clear { texture, value });
    }

    fn cmd_write_timestamp(&self, cmd: NullHandle, index: u32) {
        let tick = self.clock.fetch_add(1_000, Ordering::Relaxed) + 1_000;
        {
            let mut state = self.state.lock();
            if let Some(record) = state.command_buffers.get_mut(&cmd) {
                record.timestamps.insert(index, tick);
            }
        }
        self.record(cmd, NullCommand::Timestamp(index));
    }

    fn cmd_begin_marker(&self, cmd: NullHandle, name: &str) {
        self.record(cmd, NullCommand::BeginMarker(name.to_string()));
    }

    fn cmd_end_marker(&self, cmd: NullHandle) {
        self.record(cmd, NullCommand::EndMarker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_live() {
        let backend = NullBackend::new();
        let a = backend.create_texture(&TextureDesc::render_target(4, 4, Format::R8G8B8A8Unorm, "a")).unwrap();
        let b = backend.create_texture(&TextureDesc::render_target(4, 4, Format::R8G8B8A8Unorm, "b")).unwrap();
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert!(backend.is_live(a));
        assert_eq!(backend.name_of(b).as_deref(), Some("b"));
    }

    #[test]
    fn test_double_release_is_detected() {
        let backend = NullBackend::new();
        let shader = backend.create_shader_module(&[1, 2, 3, 4], "vs").unwrap();
        backend.release(Resource::Shader(shader));
        assert_eq!(backend.double_releases(), 0);
        backend.release(Resource::Shader(shader));
        assert_eq!(backend.double_releases(), 1);
        assert_eq!(backend.times_released(shader), 2);
    }

    #[test]
    fn test_pending_submission_blocks_until_completed() {
        let backend = std::sync::Arc::new(NullBackend::new());
        backend.set_auto_complete(false);
        let cmd = backend.create_command_buffer(QueueType::Graphics, "cmd").unwrap();
        backend.submit(cmd, QueueType::Graphics).unwrap();
        assert!(!backend.is_complete(cmd).unwrap());

        let signaller = {
            let backend = backend.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                backend.complete_submissions();
            })
        };
        backend
            .wait_for_completion(cmd, Duration::from_secs(5))
            .unwrap();
        assert!(backend.is_complete(cmd).unwrap());
        signaller.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let backend = NullBackend::new();
        backend.set_auto_complete(false);
        let cmd = backend.create_command_buffer(QueueType::Compute, "cmd").unwrap();
        backend.submit(cmd, QueueType::Compute).unwrap();
        let result = backend.wait_for_completion(cmd, Duration::from_millis(10));
        assert!(matches!(result, Err(RhiError::Timeout(_))));
    }

    #[test]
    fn test_buffer_writes_are_bounds_checked() {
        let backend = NullBackend::new();
        let desc = BufferDesc {
            usage: crate::buffer::BufferUsage::Constant,
            size: 8,
            stride: 8,
            name: "cb".to_string(),
        };
        let buffer = backend.create_buffer(&desc).unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.buffer_contents(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(backend.write_buffer(buffer, 6, &[1, 2, 3]).is_err());
    }
}
