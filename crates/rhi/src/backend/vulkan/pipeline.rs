//! Shader modules, layouts and pipeline compilation.
//!
//! Set 0 of every pipeline layout is a push-descriptor set, so per-draw
//! resources are written straight into the command buffer. Sets 1 and 2 hold
//! immutable samplers and are allocated once per backend.

use std::ffi::CString;
use std::io::Cursor;

use ash::vk;
use tracing::debug;

use super::device::LogicalDevice;
use crate::backend::{GraphicsPipelineDesc, PushConstantRange, ShaderStageDesc, StencilFaceDesc};
use crate::definitions::Format;
use crate::descriptor::Descriptor;
use crate::error::{RhiError, RhiResult};

pub fn create_shader_module(device: &LogicalDevice, bytecode: &[u8]) -> RhiResult<vk::ShaderModule> {
    let code = ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|e| RhiError::ShaderError(format!("Invalid SPIR-V: {}", e)))?;
    let info = vk::ShaderModuleCreateInfo::default().code(&code);
    let module = unsafe { device.handle().create_shader_module(&info, None)? };
    Ok(module)
}

/// Push-descriptor layout for the per-pipeline resource set.
pub fn create_resource_set_layout(
    device: &LogicalDevice,
    bindings: &[Descriptor],
) -> RhiResult<vk::DescriptorSetLayout> {
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .filter_map(|descriptor| {
            descriptor.descriptor_type.to_vk().map(|ty| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(descriptor.slot)
                    .descriptor_type(ty)
                    .descriptor_count(descriptor.array_length)
                    .stage_flags(descriptor.stages.to_vk())
            })
        })
        .collect();

    let info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
        .bindings(&vk_bindings);
    let layout = unsafe { device.handle().create_descriptor_set_layout(&info, None)? };
    Ok(layout)
}

/// Layout with one immutable sampler per binding.
pub fn create_sampler_set_layout(
    device: &LogicalDevice,
    samplers: &[vk::Sampler],
) -> RhiResult<vk::DescriptorSetLayout> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = samplers
        .iter()
        .enumerate()
        .map(|(i, sampler)| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(i as u32)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .immutable_samplers(std::slice::from_ref(sampler))
        })
        .collect();

    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    let layout = unsafe { device.handle().create_descriptor_set_layout(&info, None)? };
    Ok(layout)
}

/// Allocates one descriptor set per sampler layout from a dedicated pool.
pub fn allocate_sampler_sets(
    device: &LogicalDevice,
    layouts: &[vk::DescriptorSetLayout; 2],
    sampler_count: u32,
) -> RhiResult<(vk::DescriptorPool, [vk::DescriptorSet; 2])> {
    let pool_sizes = [vk::DescriptorPoolSize::default()
        .ty(vk::DescriptorType::SAMPLER)
        .descriptor_count(sampler_count)];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(2)
        .pool_sizes(&pool_sizes);
    let pool = unsafe { device.handle().create_descriptor_pool(&pool_info, None)? };

    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(layouts);
    let sets = match unsafe { device.handle().allocate_descriptor_sets(&alloc_info) } {
        Ok(sets) => sets,
        Err(e) => {
            unsafe { device.handle().destroy_descriptor_pool(pool, None) };
            return Err(e.into());
        }
    };
    Ok((pool, [sets[0], sets[1]]))
}

pub fn create_pipeline_layout(
    device: &LogicalDevice,
    set_layouts: &[vk::DescriptorSetLayout; 3],
    push_constant_ranges: &[PushConstantRange],
) -> RhiResult<vk::PipelineLayout> {
    let ranges: Vec<vk::PushConstantRange> = push_constant_ranges
        .iter()
        .map(|range| {
            vk::PushConstantRange::default()
                .stage_flags(range.stages.to_vk())
                .offset(range.offset)
                .size(range.size)
        })
        .collect();

    let info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(&ranges);
    let layout = unsafe { device.handle().create_pipeline_layout(&info, None)? };
    Ok(layout)
}

fn entry_point(name: &str) -> RhiResult<CString> {
    CString::new(name)
        .map_err(|_| RhiError::ShaderError(format!("Invalid entry point name '{}'", name)))
}

fn stencil_face(face: &StencilFaceDesc, read_mask: u32, write_mask: u32) -> vk::StencilOpState {
    vk::StencilOpState::default()
        .fail_op(face.fail_op.to_vk())
        .pass_op(face.pass_op.to_vk())
        .depth_fail_op(face.depth_fail_op.to_vk())
        .compare_op(face.compare_op.to_vk())
        .compare_mask(read_mask)
        .write_mask(write_mask)
}

pub fn create_graphics_pipeline(
    device: &LogicalDevice,
    desc: &GraphicsPipelineDesc<'_, super::VulkanBackend>,
    layout: vk::PipelineLayout,
) -> RhiResult<vk::Pipeline> {
    let entry_points = desc
        .stages
        .iter()
        .map(|stage| entry_point(stage.entry_point))
        .collect::<RhiResult<Vec<_>>>()?;
    let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
        .stages
        .iter()
        .zip(&entry_points)
        .map(|(stage, name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage.stage.to_vk())
                .module(stage.module)
                .name(name)
        })
        .collect();

    let bindings: Vec<vk::VertexInputBindingDescription> = desc
        .vertex_bindings
        .iter()
        .map(|b| {
            vk::VertexInputBindingDescription::default()
                .binding(b.binding)
                .stride(b.stride)
                .input_rate(b.rate.to_vk())
        })
        .collect();
    let attributes: Vec<vk::VertexInputAttributeDescription> = desc
        .vertex_attributes
        .iter()
        .map(|a| {
            vk::VertexInputAttributeDescription::default()
                .location(a.location)
                .binding(a.binding)
                .format(a.format.to_vk())
                .offset(a.offset)
        })
        .collect();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly_state =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology.to_vk());

    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: desc.width,
            height: desc.height,
        },
    };
    let mut viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    if !desc.dynamic_scissor {
        viewport_state = viewport_state.scissors(std::slice::from_ref(&scissor));
    }

    let rasterizer = &desc.rasterizer;
    let mut rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(!rasterizer.depth_clip_enabled)
        .polygon_mode(rasterizer.polygon_mode.to_vk())
        .cull_mode(rasterizer.cull_mode.to_vk())
        .front_face(vk::FrontFace::CLOCKWISE)
        .line_width(rasterizer.line_width);
    if let Some(bias) = rasterizer.depth_bias {
        rasterization_state = rasterization_state
            .depth_bias_enable(true)
            .depth_bias_constant_factor(bias.constant_factor)
            .depth_bias_clamp(bias.clamp)
            .depth_bias_slope_factor(bias.slope_factor);
    }

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let ds = &desc.depth_stencil;
    let has_depth = desc.depth_format != Format::Undefined;
    let has_stencil = desc.stencil_format != Format::Undefined;
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(has_depth && ds.depth_test)
        .depth_write_enable(has_depth && ds.depth_write)
        .depth_compare_op(ds.depth_compare.to_vk())
        .stencil_test_enable(has_stencil && ds.stencil_test)
        .front(stencil_face(&ds.front, ds.stencil_read_mask, ds.stencil_write_mask))
        .back(stencil_face(&ds.back, ds.stencil_read_mask, ds.stencil_write_mask))
        .min_depth_bounds(ds.min_depth_bounds)
        .max_depth_bounds(ds.max_depth_bounds);

    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
        .blend_attachments
        .iter()
        .map(|blend| vk::PipelineColorBlendAttachmentState {
            blend_enable: blend.enabled.into(),
            src_color_blend_factor: blend.src_color.to_vk(),
            dst_color_blend_factor: blend.dst_color.to_vk(),
            color_blend_op: blend.color_op.to_vk(),
            src_alpha_blend_factor: blend.src_alpha.to_vk(),
            dst_alpha_blend_factor: blend.dst_alpha.to_vk(),
            alpha_blend_op: blend.alpha_op.to_vk(),
            color_write_mask: vk::ColorComponentFlags::RGBA,
        })
        .collect();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .attachments(&blend_attachments)
        .blend_constants(desc.blend_constants);

    let mut dynamic_states = vec![vk::DynamicState::VIEWPORT];
    if desc.dynamic_scissor {
        dynamic_states.push(vk::DynamicState::SCISSOR);
    }
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats: Vec<vk::Format> = desc.color_formats.iter().map(|f| f.to_vk()).collect();
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(desc.depth_format.to_vk())
        .stencil_attachment_format(desc.stencil_format.to_vk());

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device
            .handle()
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| RhiError::from(e))?
    };
    debug!("Compiled graphics pipeline '{}'", desc.name);
    Ok(pipelines[0])
}

pub fn create_compute_pipeline(
    device: &LogicalDevice,
    stage: &ShaderStageDesc<'_, super::VulkanBackend>,
    layout: vk::PipelineLayout,
    name: &str,
) -> RhiResult<vk::Pipeline> {
    let entry = entry_point(stage.entry_point)?;
    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(stage.module)
        .name(&entry);
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage_info)
        .layout(layout);

    let pipelines = unsafe {
        device
            .handle()
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| RhiError::from(e))?
    };
    debug!("Compiled compute pipeline '{}'", name);
    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_rejects_interior_nul() {
        assert!(entry_point("main").is_ok());
        assert!(matches!(entry_point("ma\0in"), Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_stencil_face_masks() {
        let face = StencilFaceDesc {
            fail_op: crate::definitions::StencilOp::Keep,
            depth_fail_op: crate::definitions::StencilOp::Keep,
            pass_op: crate::definitions::StencilOp::Replace,
            compare_op: crate::definitions::CompareOp::Always,
        };
        let state = stencil_face(&face, 0xF0, 0x0F);
        assert_eq!(state.compare_mask, 0xF0);
        assert_eq!(state.write_mask, 0x0F);
        assert_eq!(state.pass_op, vk::StencilOp::REPLACE);
    }
}
