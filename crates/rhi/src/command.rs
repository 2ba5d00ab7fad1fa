//! Command lists.
//!
//! # Overview
//!
//! A [`CommandList`] records GPU work into one backend command buffer and
//! validates every call against its state machine:
//!
//! ```text
//! Idle --begin--> Recording --end--> Ended --submit--> Submitted
//!  ^                                                       |
//!  +------- wait_for_execution / is_executing / begin -----+
//! ```
//!
//! Recording calls outside `Recording` are contract violations and panic.
//! Backend failures surface as [`RhiError`](crate::RhiError) from `begin`,
//! `end`, `submit` and the wait calls.
//!
//! Binding a graphics pipeline starts a render pass on its render targets.
//! Calls that need a layout transition in the middle of a pass (binding a
//! texture for sampling, barriers, blits) suspend the pass; the next draw
//! resumes it with load operations.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::backend::Backend;
//! use lumen_rhi::{Buffer, CommandList, Device, Pipeline, PipelineState, QueueType};
//!
//! # fn example<B: Backend>(
//! #     device: Arc<Device<B>>,
//! #     pso: PipelineState<B>,
//! #     pipeline: Arc<Pipeline<B>>,
//! #     vertices: Buffer<B>,
//! # ) -> lumen_rhi::RhiResult<()> {
//! let mut cmd = CommandList::new(device, QueueType::Graphics, "frame")?;
//! cmd.begin()?;
//! cmd.set_pipeline_state(&pso, &pipeline);
//! cmd.set_buffer_vertex(&vertices);
//! cmd.draw(3, 0);
//! cmd.end()?;
//! cmd.submit()?;
//! cmd.wait_for_execution()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::{debug, error, trace, warn};

use crate::backend::{
    Backend, ColorAttachment, DepthAttachment, DescriptorResource, DescriptorWrite, GpuHandle,
    ImageBarrier, RenderingInfo, Resource, TextureRegion,
};
use crate::buffer::{Buffer, BufferUsage};
use crate::counters::Counter;
use crate::definitions::{
    ClearValue, ImageAspect, ImageLayout, MAX_TIMESTAMPS, ObjectId, PipelineKind, QueueType, Rect,
    Viewport,
};
use crate::device::Device;
use crate::error::RhiResult;
use crate::pipeline::{INSTANCE_BINDING, Pipeline};
use crate::pipeline_state::PipelineState;
use crate::sampler::Sampler;
use crate::swapchain::Swapchain;
use crate::texture::{Texture, TextureFlags};

/// Timestamp slots used by `begin_timestamp` / `end_timestamp`.
const FRAME_TIMESTAMP_SLOTS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandListState {
    Idle,
    Recording,
    Ended,
    Submitted,
}

/// GPU duration of one completed timeblock.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuTiming {
    pub name: String,
    pub duration_ms: f32,
}

#[derive(Debug)]
enum Scope {
    Timestamp,
    Timeblock {
        marker: bool,
        timing: Option<usize>,
    },
    Marker,
}

struct Timeblock {
    name: String,
    first_slot: u32,
}

/// The render targets of the current graphics pipeline.
struct RenderPass<B: Backend> {
    colors: Vec<Arc<Texture<B>>>,
    depth: Option<Arc<Texture<B>>>,
    depth_read_only: bool,
    width: u32,
    height: u32,
    /// Set while the backend is inside dynamic rendering.
    active: bool,
}

impl<B: Backend> RenderPass<B> {
    fn contains(&self, texture: &Texture<B>) -> bool {
        self.colors.iter().any(|t| t.id() == texture.id())
            || self.depth.as_ref().is_some_and(|t| t.id() == texture.id())
    }

    fn depth_layout(&self, texture: &Texture<B>) -> ImageLayout {
        if self.depth_read_only {
            ImageLayout::DepthStencilReadOnly
        } else if texture.format().is_stencil() {
            ImageLayout::DepthStencilAttachment
        } else {
            ImageLayout::DepthAttachment
        }
    }
}

pub struct CommandList<B: Backend> {
    device: Arc<Device<B>>,
    id: ObjectId,
    handle: B::CommandBuffer,
    queue: QueueType,
    name: String,
    state: CommandListState,
    ticket: Option<u64>,

    pipeline: Option<Arc<Pipeline<B>>>,
    render_pass: Option<RenderPass<B>>,
    /// Swapchain image rendered to since `begin`; presented layout at `end`.
    swapchain_image: Option<Arc<Texture<B>>>,

    vertex_buffer_id: Option<ObjectId>,
    instance_buffer_id: Option<ObjectId>,
    index_buffer_id: Option<ObjectId>,
    descriptors: BTreeMap<u32, DescriptorResource<B>>,
    descriptors_dirty: bool,

    scopes: Vec<Scope>,
    timeblocks: Vec<Timeblock>,
    next_timestamp: u32,
}

impl<B: Backend> CommandList<B> {
    pub fn new(device: Arc<Device<B>>, queue: QueueType, name: &str) -> RhiResult<Self> {
        let handle = device.backend().create_command_buffer(queue, name)?;
        device.set_name(Resource::CommandList(handle), name);
        debug!("Created {} command list '{}'", queue.name(), name);

        Ok(Self {
            device,
            id: ObjectId::next(),
            handle,
            queue,
            name: name.to_string(),
            state: CommandListState::Idle,
            ticket: None,
            pipeline: None,
            render_pass: None,
            swapchain_image: None,
            vertex_buffer_id: None,
            instance_buffer_id: None,
            index_buffer_id: None,
            descriptors: BTreeMap::new(),
            descriptors_dirty: false,
            scopes: Vec::new(),
            timeblocks: Vec::new(),
            next_timestamp: FRAME_TIMESTAMP_SLOTS,
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> B::CommandBuffer {
        self.handle
    }

    #[inline]
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    #[inline]
    pub fn state(&self) -> CommandListState {
        self.state
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_render_pass_active(&self) -> bool {
        self.render_pass.as_ref().is_some_and(|pass| pass.active)
    }

    #[inline]
    pub fn pipeline(&self) -> Option<&Arc<Pipeline<B>>> {
        self.pipeline.as_ref()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts recording.
    ///
    /// A list that was submitted first waits for that submission to complete;
    /// this is the only blocking point of recording.
    ///
    /// # Panics
    ///
    /// Panics unless the list is idle (after the wait) and has a backend
    /// command buffer.
    pub fn begin(&mut self) -> RhiResult<()> {
        if self.state == CommandListState::Submitted {
            self.wait_for_execution()?;
        }

        assert_eq!(
            self.state,
            CommandListState::Idle,
            "command list '{}' cannot begin while {:?}",
            self.name,
            self.state
        );
        assert!(
            !self.handle.is_null(),
            "command list '{}' has no backend command buffer",
            self.name
        );

        self.device.backend().begin_command_buffer(self.handle)?;
        self.ticket = Some(self.device.open_ticket());
        self.reset_recording_state();
        self.state = CommandListState::Recording;
        trace!("Command list '{}' recording", self.name);
        Ok(())
    }

    /// Finishes recording. Ends an active render pass and moves a rendered
    /// swapchain image to its present layout.
    pub fn end(&mut self) -> RhiResult<()> {
        self.assert_recording("end");
        assert!(
            self.scopes.is_empty(),
            "command list '{}' ended with {} open scope(s): {:?}",
            self.name,
            self.scopes.len(),
            self.scopes
        );

        self.suspend_render_pass();
        self.render_pass = None;
        if let Some(image) = self.swapchain_image.take() {
            self.transition(&image, 0, 1, ImageLayout::PresentSrc);
        }

        self.device.backend().end_command_buffer(self.handle)?;
        self.state = CommandListState::Ended;
        Ok(())
    }

    /// Submits to the queue of the list's type.
    pub fn submit(&mut self) -> RhiResult<()> {
        assert_eq!(
            self.state,
            CommandListState::Ended,
            "command list '{}' must be ended before submit, but is {:?}",
            self.name,
            self.state
        );

        self.device.backend().submit(self.handle, self.queue)?;
        if let Some(ticket) = self.ticket {
            self.device.mark_submitted(ticket);
        }
        self.device.counters().increment(Counter::Submission);
        self.state = CommandListState::Submitted;
        trace!("Command list '{}' submitted to {} queue", self.name, self.queue.name());
        Ok(())
    }

    /// Blocks until the last submission completes. No-op unless submitted.
    pub fn wait_for_execution(&mut self) -> RhiResult<()> {
        if self.state != CommandListState::Submitted {
            return Ok(());
        }

        let timeout = self.device.settings().wait_timeout;
        self.device
            .backend()
            .wait_for_completion(self.handle, timeout)?;
        self.retire();
        Ok(())
    }

    /// Polls the last submission. Becomes idle once it has completed.
    pub fn is_executing(&mut self) -> RhiResult<bool> {
        if self.state != CommandListState::Submitted {
            return Ok(false);
        }

        if self.device.backend().is_complete(self.handle)? {
            self.retire();
            return Ok(false);
        }
        Ok(true)
    }

    fn retire(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.device.retire_ticket(ticket);
        }
        self.state = CommandListState::Idle;
    }

    fn reset_recording_state(&mut self) {
        self.pipeline = None;
        self.render_pass = None;
        self.swapchain_image = None;
        self.vertex_buffer_id = None;
        self.instance_buffer_id = None;
        self.index_buffer_id = None;
        self.descriptors.clear();
        self.descriptors_dirty = false;
        self.scopes.clear();
        self.timeblocks.clear();
        self.next_timestamp = FRAME_TIMESTAMP_SLOTS;
    }

    #[track_caller]
    fn assert_recording(&self, operation: &str) {
        assert_eq!(
            self.state,
            CommandListState::Recording,
            "command list '{}': {} requires the recording state, but the list is {:?}",
            self.name,
            operation,
            self.state
        );
    }

    // =========================================================================
    // Pipeline and render pass
    // =========================================================================

    /// Binds a pipeline. `pso` supplies the per-pass data (clear values) and
    /// must describe the same configuration the pipeline was compiled from.
    ///
    /// Rebinding the bound pipeline without clear values is elided. Otherwise
    /// the active render pass ends, bound descriptors are invalidated and a
    /// graphics pipeline begins a new pass on its render targets.
    pub fn set_pipeline_state(&mut self, pso: &PipelineState<B>, pipeline: &Arc<Pipeline<B>>) {
        self.assert_recording("set_pipeline_state");
        assert!(
            pipeline.state() == pso,
            "pipeline '{}' was not compiled from pipeline state '{}'",
            pipeline.name(),
            pso.name
        );

        let same = self.pipeline.as_ref().is_some_and(|p| p.id() == pipeline.id());
        if same && !pso.has_clear_values() {
            return;
        }

        self.suspend_render_pass();
        self.render_pass = None;

        self.device.backend().cmd_bind_pipeline(
            self.handle,
            pipeline.kind(),
            pipeline.handle(),
            pipeline.layout_handle(),
        );
        self.device.counters().increment(Counter::PipelineBind);
        self.descriptors.clear();
        self.descriptors_dirty = false;
        self.pipeline = Some(pipeline.clone());

        if pipeline.kind() == PipelineKind::Graphics {
            self.begin_render_pass(pso);
        }
    }

    fn begin_render_pass(&mut self, pso: &PipelineState<B>) {
        let colors: Vec<Arc<Texture<B>>> = match &pso.render_target_swapchain {
            Some(swapchain) => {
                let image = swapchain.current_image();
                self.swapchain_image = Some(image.clone());
                vec![image]
            }
            None => pso.color_textures().cloned().collect(),
        };

        let pass = RenderPass {
            colors,
            depth: pso.render_target_depth_texture.clone(),
            depth_read_only: pso.render_target_depth_texture_read_only,
            width: pso.width(),
            height: pso.height(),
            active: false,
        };

        let clears = PassClears {
            colors: &pso.clear_color,
            depth: pso.clear_depth,
            stencil: pso.clear_stencil,
        };
        self.start_rendering(pass, Some(clears));

        let (width, height) = (pso.width(), pso.height());
        self.set_viewport(&Viewport::new(width as f32, height as f32));
        self.set_scissor_rectangle(&Rect::new(0, 0, width, height));
    }

    fn start_rendering(&mut self, mut pass: RenderPass<B>, clears: Option<PassClears<'_>>) {
        for color in &pass.colors {
            self.transition(color, 0, 1, ImageLayout::ColorAttachment);
        }
        if let Some(depth) = &pass.depth {
            self.transition(depth, 0, 1, pass.depth_layout(depth));
        }

        let info = RenderingInfo {
            width: pass.width,
            height: pass.height,
            color_attachments: pass
                .colors
                .iter()
                .enumerate()
                .map(|(i, texture)| ColorAttachment {
                    texture: texture.handle(),
                    clear: clears.as_ref().and_then(|c| c.colors[i]),
                })
                .collect(),
            depth_attachment: pass.depth.as_ref().map(|depth| DepthAttachment {
                texture: depth.handle(),
                aspect: depth.aspect(),
                clear_depth: clears.as_ref().and_then(|c| c.depth),
                clear_stencil: clears
                    .as_ref()
                    .and_then(|c| c.stencil)
                    .filter(|_| depth.format().is_stencil()),
                read_only: pass.depth_read_only,
            }),
        };

        self.device.backend().cmd_begin_rendering(self.handle, &info);
        self.device.counters().increment(Counter::RenderPass);
        pass.active = true;
        self.render_pass = Some(pass);
    }

    /// Leaves dynamic rendering so transitions can be recorded. The next draw
    /// resumes the pass.
    fn suspend_render_pass(&mut self) {
        if let Some(pass) = self.render_pass.as_mut().filter(|pass| pass.active) {
            pass.active = false;
            self.device.backend().cmd_end_rendering(self.handle);
        }
    }

    fn resume_render_pass(&mut self) {
        if let Some(pass) = self.render_pass.take() {
            if pass.active {
                self.render_pass = Some(pass);
            } else {
                self.start_rendering(pass, None);
            }
        }
    }

    // =========================================================================
    // Resource binding
    // =========================================================================

    pub fn set_buffer_vertex(&mut self, buffer: &Buffer<B>) {
        self.assert_recording("set_buffer_vertex");
        assert_eq!(
            buffer.usage(),
            BufferUsage::Vertex,
            "buffer '{}' is not a vertex buffer",
            buffer.name()
        );

        if self.vertex_buffer_id == Some(buffer.id()) {
            return;
        }

        self.device
            .backend()
            .cmd_bind_vertex_buffer(self.handle, 0, buffer.handle());
        self.vertex_buffer_id = Some(buffer.id());
        self.device.counters().increment(Counter::VertexBufferBind);
    }

    /// Binds the per-instance transform stream of an instancing pipeline.
    pub fn set_buffer_instance(&mut self, buffer: &Buffer<B>) {
        self.assert_recording("set_buffer_instance");
        assert_eq!(
            buffer.usage(),
            BufferUsage::Vertex,
            "buffer '{}' is not a vertex buffer",
            buffer.name()
        );

        if self.instance_buffer_id == Some(buffer.id()) {
            return;
        }

        self.device
            .backend()
            .cmd_bind_vertex_buffer(self.handle, INSTANCE_BINDING, buffer.handle());
        self.instance_buffer_id = Some(buffer.id());
        self.device.counters().increment(Counter::VertexBufferBind);
    }

    pub fn set_buffer_index(&mut self, buffer: &Buffer<B>) {
        self.assert_recording("set_buffer_index");
        assert_eq!(
            buffer.usage(),
            BufferUsage::Index,
            "buffer '{}' is not an index buffer",
            buffer.name()
        );

        if self.index_buffer_id == Some(buffer.id()) {
            return;
        }

        self.device.backend().cmd_bind_index_buffer(
            self.handle,
            buffer.handle(),
            buffer.index_format(),
        );
        self.index_buffer_id = Some(buffer.id());
        self.device.counters().increment(Counter::IndexBufferBind);
    }

    pub fn set_constant_buffer(&mut self, slot: u32, buffer: &Buffer<B>) {
        self.assert_recording("set_constant_buffer");
        self.write_descriptor(slot, DescriptorResource::ConstantBuffer(buffer.handle()));
    }

    pub fn set_structured_buffer(&mut self, slot: u32, buffer: &Buffer<B>) {
        self.assert_recording("set_structured_buffer");
        self.write_descriptor(slot, DescriptorResource::StructuredBuffer(buffer.handle()));
    }

    /// Binds a texture for sampling, transitioning every mip to a read-only
    /// layout first.
    ///
    /// # Panics
    ///
    /// Panics if the texture is a writable attachment of the current pass.
    pub fn set_texture(&mut self, slot: u32, texture: &Texture<B>) {
        self.assert_recording("set_texture");

        let layout = if texture.format().is_depth() {
            ImageLayout::DepthStencilReadOnly
        } else {
            ImageLayout::ShaderReadOnly
        };

        if let Some(pass) = &self.render_pass {
            let read_only_depth = pass.depth_read_only
                && pass.depth.as_ref().is_some_and(|d| d.id() == texture.id());
            assert!(
                !pass.contains(texture) || read_only_depth,
                "texture '{}' is sampled while bound as a render target",
                texture.name()
            );
        }

        self.transition(texture, 0, texture.mip_count(), layout);
        self.write_descriptor(
            slot,
            DescriptorResource::Texture {
                texture: texture.handle(),
                layout,
            },
        );
    }

    /// Binds a texture for storage access. `mip` selects a single level,
    /// `None` binds all levels.
    pub fn set_texture_storage(&mut self, slot: u32, texture: &Texture<B>, mip: Option<u32>) {
        self.assert_recording("set_texture_storage");
        assert!(
            texture.has_flags(TextureFlags::UAV),
            "texture '{}' was not created for storage access",
            texture.name()
        );

        let (mip_start, mip_range) = match mip {
            Some(mip) => {
                assert!(
                    mip < texture.mip_count(),
                    "mip {} is out of range for texture '{}' with {} mips",
                    mip,
                    texture.name(),
                    texture.mip_count()
                );
                (mip, 1)
            }
            None => (0, texture.mip_count()),
        };

        self.transition(texture, mip_start, mip_range, ImageLayout::General);
        self.write_descriptor(
            slot,
            DescriptorResource::TextureStorage {
                texture: texture.handle(),
                mip,
            },
        );
    }

    pub fn set_sampler(&mut self, slot: u32, sampler: &Sampler<B>) {
        self.assert_recording("set_sampler");
        self.write_descriptor(slot, DescriptorResource::Sampler(sampler.handle()));
    }

    fn write_descriptor(&mut self, slot: u32, resource: DescriptorResource<B>) {
        let Some(pipeline) = &self.pipeline else {
            panic!(
                "command list '{}': descriptors require a bound pipeline",
                self.name
            );
        };

        let Some(binding) = pipeline.descriptor_set_layout().binding(slot) else {
            trace!(
                "Pipeline '{}' has no binding at slot {}, ignoring {:?}",
                pipeline.name(),
                slot,
                resource.descriptor_type()
            );
            return;
        };

        assert!(
            binding.descriptor_type == resource.descriptor_type(),
            "slot {} of pipeline '{}' expects {:?}, got {:?}",
            slot,
            pipeline.name(),
            binding.descriptor_type,
            resource.descriptor_type()
        );

        self.descriptors.insert(slot, resource);
        self.descriptors_dirty = true;
    }

    /// Updates push constants at `offset`. The stage mask is taken from the
    /// ranges the update overlaps.
    pub fn push_constants<T: Pod>(&mut self, offset: u32, data: &T) {
        self.assert_recording("push_constants");
        let Some(pipeline) = &self.pipeline else {
            panic!(
                "command list '{}': push constants require a bound pipeline",
                self.name
            );
        };

        let bytes = bytemuck::bytes_of(data);
        let size = bytes.len() as u32;
        let Some(stages) = pipeline
            .descriptor_set_layout()
            .push_constant_stages(offset, size)
        else {
            panic!(
                "push constant update of {} bytes at offset {} is outside the ranges of pipeline '{}'",
                size,
                offset,
                pipeline.name()
            );
        };

        self.device.backend().cmd_push_constants(
            self.handle,
            pipeline.layout_handle(),
            stages,
            offset,
            bytes,
        );
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.assert_recording("set_viewport");
        self.device.backend().cmd_set_viewport(self.handle, viewport);
    }

    pub fn set_scissor_rectangle(&mut self, rect: &Rect) {
        self.assert_recording("set_scissor_rectangle");
        self.device.backend().cmd_set_scissor(self.handle, rect);
    }

    // =========================================================================
    // Draw and dispatch
    // =========================================================================

    pub fn draw(&mut self, vertex_count: u32, vertex_start: u32) {
        self.assert_recording("draw");
        self.on_draw(PipelineKind::Graphics);
        self.device
            .backend()
            .cmd_draw(self.handle, vertex_count, vertex_start);
        self.device.counters().increment(Counter::Draw);
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        index_offset: u32,
        vertex_offset: i32,
        instance_count: u32,
    ) {
        self.assert_recording("draw_indexed");
        assert!(
            self.index_buffer_id.is_some(),
            "command list '{}': draw_indexed without an index buffer",
            self.name
        );
        self.on_draw(PipelineKind::Graphics);
        self.device.backend().cmd_draw_indexed(
            self.handle,
            index_count,
            index_offset,
            vertex_offset,
            instance_count,
        );
        self.device.counters().increment(Counter::Draw);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.assert_recording("dispatch");
        self.on_draw(PipelineKind::Compute);
        self.device.backend().cmd_dispatch(self.handle, x, y, z);
        self.device.counters().increment(Counter::Dispatch);
    }

    /// Validation shared by draws and dispatches, then the descriptor flush.
    fn on_draw(&mut self, kind: PipelineKind) {
        let Some(pipeline) = self.pipeline.clone() else {
            panic!("command list '{}': {:?} work without a pipeline", self.name, kind);
        };
        assert_eq!(
            pipeline.kind(),
            kind,
            "command list '{}': {:?} work with {:?} pipeline '{}'",
            self.name,
            kind,
            pipeline.kind(),
            pipeline.name()
        );

        if let Some(missing) = pipeline
            .descriptor_set_layout()
            .bindings()
            .find(|binding| !self.descriptors.contains_key(&binding.slot))
        {
            panic!(
                "pipeline '{}' expects {:?} '{}' at slot {} but nothing is bound",
                pipeline.name(),
                missing.descriptor_type,
                missing.name,
                missing.slot
            );
        }

        if kind == PipelineKind::Graphics {
            self.resume_render_pass();
            assert!(
                self.is_render_pass_active(),
                "command list '{}': draw outside of a render pass",
                self.name
            );
            let has_targets = self
                .render_pass
                .as_ref()
                .is_some_and(|pass| !pass.colors.is_empty() || pass.depth.is_some());
            assert!(
                has_targets,
                "pipeline '{}' draws with no render targets attached",
                pipeline.name()
            );
        }

        if self.descriptors_dirty {
            let writes: Vec<DescriptorWrite<B>> = self
                .descriptors
                .iter()
                .map(|(slot, resource)| DescriptorWrite {
                    slot: *slot,
                    resource: *resource,
                })
                .collect();
            self.device.backend().cmd_bind_descriptors(
                self.handle,
                kind,
                pipeline.layout_handle(),
                &writes,
            );
            self.descriptors_dirty = false;
            self.device.counters().increment(Counter::DescriptorFlush);
        }
    }

    // =========================================================================
    // Barriers
    // =========================================================================

    /// Records an explicit layout transition and updates the tracked layout.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_memory_barrier_image(
        &mut self,
        texture: &Texture<B>,
        mip_start: u32,
        mip_range: u32,
        array_length: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        self.assert_recording("insert_memory_barrier_image");
        texture.mip_range_end(mip_start, mip_range);

        self.insert_memory_barrier_image_raw(
            texture.handle(),
            texture.aspect(),
            mip_start,
            mip_range,
            array_length,
            old_layout,
            new_layout,
        );
        texture.set_layout(mip_start, mip_range, new_layout);
    }

    /// Transition on a bare backend image. No layout is tracked.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_memory_barrier_image_raw(
        &mut self,
        image: B::Texture,
        aspect: ImageAspect,
        mip_start: u32,
        mip_range: u32,
        array_length: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        self.assert_recording("insert_memory_barrier_image_raw");
        self.suspend_render_pass();

        self.device.backend().cmd_image_barrier(
            self.handle,
            &ImageBarrier {
                texture: image,
                aspect,
                mip_start,
                mip_range,
                array_length,
                old_layout,
                new_layout,
            },
        );
        self.device.counters().increment(Counter::Barrier);
    }

    /// Moves a mip range to `layout`, one barrier per run of equal layouts.
    fn transition(
        &mut self,
        texture: &Texture<B>,
        mip_start: u32,
        mip_range: u32,
        layout: ImageLayout,
    ) {
        let end = texture.mip_range_end(mip_start, mip_range) as u32;
        let mut mip = mip_start;
        while mip < end {
            let old_layout = texture.layout(mip);
            let mut run = 1;
            while mip + run < end && texture.layout(mip + run) == old_layout {
                run += 1;
            }

            if old_layout != layout {
                self.insert_memory_barrier_image(
                    texture,
                    mip,
                    run,
                    texture.array_length(),
                    old_layout,
                    layout,
                );
            }
            mip += run;
        }
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// Scaled copy from `src` into `dst`. With `blit_mips`, every mip level
    /// both textures have is blitted; otherwise only the top level.
    ///
    /// # Panics
    ///
    /// Panics unless `src` allows blits and `dst` is at least as large as
    /// `src` in both dimensions.
    pub fn blit(&mut self, src: &Texture<B>, dst: &Texture<B>, blit_mips: bool) {
        self.assert_recording("blit");
        assert_transferable(src);
        assert!(
            dst.width() >= src.width() && dst.height() >= src.height(),
            "blit destination '{}' ({}x{}) is smaller than source '{}' ({}x{})",
            dst.name(),
            dst.width(),
            dst.height(),
            src.name(),
            src.width(),
            src.height()
        );

        let mip_count = if blit_mips {
            src.mip_count().min(dst.mip_count())
        } else {
            1
        };
        self.transfer(src, dst, mip_count, TransferKind::Blit, None);
    }

    /// Blits `src` into the swapchain's current image, leaving it presentable.
    pub fn blit_to_swapchain(&mut self, src: &Texture<B>, swapchain: &Swapchain<B>) {
        self.assert_recording("blit_to_swapchain");
        let image = swapchain.current_image();
        assert_transferable(src);
        assert!(
            image.width() >= src.width() && image.height() >= src.height(),
            "swapchain ({}x{}) is smaller than blit source '{}' ({}x{})",
            image.width(),
            image.height(),
            src.name(),
            src.width(),
            src.height()
        );
        self.transfer(src, &image, 1, TransferKind::Blit, Some(ImageLayout::PresentSrc));
    }

    /// Exact copy of every mip level. Extents and formats must match.
    pub fn copy(&mut self, src: &Texture<B>, dst: &Texture<B>) {
        self.assert_recording("copy");
        assert_transferable(src);
        assert_copy_compatible(src, dst);

        let mip_count = src.mip_count().min(dst.mip_count());
        self.transfer(src, dst, mip_count, TransferKind::Copy, None);
    }

    /// Copies `src` into the swapchain's current image, leaving it presentable.
    pub fn copy_to_swapchain(&mut self, src: &Texture<B>, swapchain: &Swapchain<B>) {
        self.assert_recording("copy_to_swapchain");
        let image = swapchain.current_image();
        assert_transferable(src);
        assert_copy_compatible(src, &image);
        self.transfer(src, &image, 1, TransferKind::Copy, Some(ImageLayout::PresentSrc));
    }

    fn transfer(
        &mut self,
        src: &Texture<B>,
        dst: &Texture<B>,
        mip_count: u32,
        kind: TransferKind,
        dst_final: Option<ImageLayout>,
    ) {
        let src_layouts: Vec<ImageLayout> = (0..mip_count).map(|mip| src.layout(mip)).collect();
        let dst_layouts: Vec<ImageLayout> = (0..mip_count).map(|mip| dst.layout(mip)).collect();

        self.transition(src, 0, mip_count, ImageLayout::TransferSrc);
        self.transition(dst, 0, mip_count, ImageLayout::TransferDst);

        for mip in 0..mip_count {
            let src_region = region(src, mip, ImageLayout::TransferSrc);
            let dst_region = region(dst, mip, ImageLayout::TransferDst);
            match kind {
                TransferKind::Blit => {
                    self.device
                        .backend()
                        .cmd_blit(self.handle, &src_region, &dst_region)
                }
                TransferKind::Copy => {
                    self.device
                        .backend()
                        .cmd_copy(self.handle, &src_region, &dst_region)
                }
            }
        }

        self.restore_layouts(src, &src_layouts);
        match dst_final {
            Some(layout) => self.transition(dst, 0, mip_count, layout),
            None => self.restore_layouts(dst, &dst_layouts),
        }
    }

    /// Returns each mip to its recorded layout. Mips that had no defined
    /// contents stay where the transfer left them.
    fn restore_layouts(&mut self, texture: &Texture<B>, layouts: &[ImageLayout]) {
        for (mip, layout) in layouts.iter().enumerate() {
            if *layout != ImageLayout::Undefined {
                self.transition(texture, mip as u32, 1, *layout);
            }
        }
    }

    /// Clears a color, depth or storage target outside of a render pass.
    pub fn clear_render_target(&mut self, texture: &Texture<B>, clear: ClearValue) {
        self.assert_recording("clear_render_target");

        match clear {
            ClearValue::Color(_) => assert!(
                !texture.format().is_depth(),
                "color clear on depth texture '{}'",
                texture.name()
            ),
            ClearValue::DepthStencil { .. } => assert!(
                texture.format().is_depth(),
                "depth clear on color texture '{}'",
                texture.name()
            ),
        }
        if let Some(pass) = &self.render_pass {
            assert!(
                !pass.contains(texture) || !pass.active,
                "texture '{}' is cleared while bound as a render target",
                texture.name()
            );
        }

        let layouts: Vec<ImageLayout> = (0..texture.mip_count())
            .map(|mip| texture.layout(mip))
            .collect();
        let layout = if texture.has_flags(TextureFlags::UAV) {
            ImageLayout::General
        } else {
            ImageLayout::TransferDst
        };

        self.transition(texture, 0, texture.mip_count(), layout);
        self.device.backend().cmd_clear_texture(
            self.handle,
            texture.handle(),
            texture.aspect(),
            layout,
            clear,
        );
        self.restore_layouts(texture, &layouts);
    }

    // =========================================================================
    // Profiling
    // =========================================================================

    fn timestamps_enabled(&self) -> bool {
        self.device.settings().timestamps
            && self.device.backend().capabilities().timestamps_supported
    }

    /// Starts the list-wide GPU timer.
    pub fn begin_timestamp(&mut self) {
        self.assert_recording("begin_timestamp");
        self.scopes.push(Scope::Timestamp);
        if self.timestamps_enabled() {
            self.device.backend().cmd_write_timestamp(self.handle, 0);
        }
    }

    pub fn end_timestamp(&mut self) {
        self.assert_recording("end_timestamp");
        match self.scopes.pop() {
            Some(Scope::Timestamp) => {}
            other => panic!(
                "command list '{}': end_timestamp does not match the open scope {:?}",
                self.name, other
            ),
        }
        if self.timestamps_enabled() {
            self.device.backend().cmd_write_timestamp(self.handle, 1);
        }
    }

    /// GPU time between `begin_timestamp` and `end_timestamp` of the last
    /// completed submission.
    pub fn timestamp_duration_ms(&self) -> RhiResult<f32> {
        assert_eq!(
            self.state,
            CommandListState::Idle,
            "command list '{}': timestamps can only be read once execution has completed",
            self.name
        );
        if !self.timestamps_enabled() {
            return Ok(0.0);
        }
        let ticks = self.device.backend().read_timestamps(self.handle, 0, 2)?;
        Ok(self.ticks_to_ms(ticks[0], ticks[1]))
    }

    /// Opens a named timeblock, optionally as a debug marker and with GPU
    /// timing.
    pub fn begin_timeblock(&mut self, name: &str, gpu_marker: bool, gpu_timing: bool) {
        self.assert_recording("begin_timeblock");

        if gpu_marker {
            self.device.backend().cmd_begin_marker(self.handle, name);
        }

        let timing = if gpu_timing && self.timestamps_enabled() {
            if self.next_timestamp + 2 > MAX_TIMESTAMPS {
                warn!(
                    "Command list '{}' ran out of timestamp slots, '{}' is not timed",
                    self.name, name
                );
                None
            } else {
                let first_slot = self.next_timestamp;
                self.next_timestamp += 2;
                self.device
                    .backend()
                    .cmd_write_timestamp(self.handle, first_slot);
                self.timeblocks.push(Timeblock {
                    name: name.to_string(),
                    first_slot,
                });
                Some(self.timeblocks.len() - 1)
            }
        } else {
            None
        };

        self.scopes.push(Scope::Timeblock {
            marker: gpu_marker,
            timing,
        });
    }

    pub fn end_timeblock(&mut self) {
        self.assert_recording("end_timeblock");
        let (marker, timing) = match self.scopes.pop() {
            Some(Scope::Timeblock { marker, timing }) => (marker, timing),
            other => panic!(
                "command list '{}': end_timeblock does not match the open scope {:?}",
                self.name, other
            ),
        };

        if let Some(index) = timing {
            let slot = self.timeblocks[index].first_slot + 1;
            self.device.backend().cmd_write_timestamp(self.handle, slot);
        }
        if marker {
            self.device.backend().cmd_end_marker(self.handle);
        }
    }

    /// Durations of the timed blocks of the last completed submission, in
    /// recording order.
    pub fn gpu_timings(&self) -> RhiResult<Vec<GpuTiming>> {
        assert_eq!(
            self.state,
            CommandListState::Idle,
            "command list '{}': timings can only be read once execution has completed",
            self.name
        );
        if self.timeblocks.is_empty() {
            return Ok(Vec::new());
        }

        let ticks = self.device.backend().read_timestamps(
            self.handle,
            FRAME_TIMESTAMP_SLOTS,
            self.next_timestamp - FRAME_TIMESTAMP_SLOTS,
        )?;
        Ok(self
            .timeblocks
            .iter()
            .map(|block| {
                let start = (block.first_slot - FRAME_TIMESTAMP_SLOTS) as usize;
                GpuTiming {
                    name: block.name.clone(),
                    duration_ms: self.ticks_to_ms(ticks[start], ticks[start + 1]),
                }
            })
            .collect())
    }

    fn ticks_to_ms(&self, start: u64, end: u64) -> f32 {
        let ticks = end.saturating_sub(start) as f64;
        (ticks * f64::from(self.device.timestamp_period()) / 1_000_000.0) as f32
    }

    pub fn begin_marker(&mut self, name: &str) {
        self.assert_recording("begin_marker");
        self.scopes.push(Scope::Marker);
        self.device.backend().cmd_begin_marker(self.handle, name);
    }

    pub fn end_marker(&mut self) {
        self.assert_recording("end_marker");
        match self.scopes.pop() {
            Some(Scope::Marker) => {}
            other => panic!(
                "command list '{}': end_marker does not match the open scope {:?}",
                self.name, other
            ),
        }
        self.device.backend().cmd_end_marker(self.handle);
    }
}

impl<B: Backend> Drop for CommandList<B> {
    fn drop(&mut self) {
        match self.device.wait_idle() {
            Ok(()) => {
                if let Some(ticket) = self.ticket.take() {
                    self.device.retire_ticket(ticket);
                }
                self.device
                    .backend()
                    .release(Resource::CommandList(self.handle));
            }
            Err(e) => {
                error!(
                    "Failed to wait for device idle while dropping command list '{}': {:?}",
                    self.name, e
                );
                self.device
                    .defer_release(Resource::CommandList(self.handle));
                if let Some(ticket) = self.ticket.take() {
                    self.device.retire_ticket(ticket);
                }
            }
        }
        debug!("Command list '{}' destroyed", self.name);
    }
}

struct PassClears<'a> {
    colors: &'a [Option<glam::Vec4>],
    depth: Option<f32>,
    stencil: Option<u32>,
}

#[derive(Clone, Copy)]
enum TransferKind {
    Blit,
    Copy,
}

fn region<B: Backend>(texture: &Texture<B>, mip: u32, layout: ImageLayout) -> TextureRegion<B> {
    let (width, height) = texture.mip_extent(mip);
    TextureRegion {
        texture: texture.handle(),
        aspect: texture.aspect(),
        layout,
        mip,
        array_length: texture.array_length(),
        width,
        height,
    }
}

#[track_caller]
fn assert_transferable<B: Backend>(texture: &Texture<B>) {
    assert!(
        texture.has_flags(TextureFlags::CLEAR_BLIT),
        "texture '{}' was not created with CLEAR_BLIT",
        texture.name()
    );
}

#[track_caller]
fn assert_copy_compatible<B: Backend>(src: &Texture<B>, dst: &Texture<B>) {
    assert!(
        src.width() == dst.width() && src.height() == dst.height(),
        "copy requires equal extents: '{}' is {}x{}, '{}' is {}x{}",
        src.name(),
        src.width(),
        src.height(),
        dst.name(),
        dst.width(),
        dst.height()
    );
    assert_eq!(
        src.format(),
        dst.format(),
        "copy requires equal formats: '{}' and '{}'",
        src.name(),
        dst.name()
    );
}
