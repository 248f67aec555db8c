//! Graphics pipeline assembly.
//!
//! Callers supply a small fixed-function state block; stages, vertex input
//! and layouts all come from the shader's reflection. Viewport and scissor
//! are always dynamic so pipelines survive swapchain resizes; line width
//! and the stencil reference are dynamic on request.

use ash::vk;

use crate::error::{GpuError, Result};
use crate::shader::Shader;

/// How a pipeline's color output combines with the attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Disabled,
    /// Classic `src_alpha / one_minus_src_alpha` blending.
    Alpha,
    Additive,
}

/// Constant, clamp and slope factors for rasterizer depth bias.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

/// Per-face stencil op states. Enabling this makes the stencil reference
/// dynamic; set it with `draw_set_stencil_reference`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StencilState {
    pub front: vk::StencilOpState,
    pub back: vk::StencilOpState,
}

/// Fixed-function state for a graphics pipeline.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    /// When set, line width is left to `draw_set_line_width` instead of
    /// being baked in.
    pub dynamic_line_width: bool,
    pub depth_bias: Option<DepthBias>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil: Option<StencilState>,
    /// Per-color-attachment blending; attachments past the end of the
    /// list blend with [`BlendMode::Disabled`].
    pub blend: Vec<BlendMode>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            dynamic_line_width: false,
            depth_bias: None,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            stencil: None,
            blend: Vec::new(),
        }
    }
}

pub(crate) fn blend_attachment(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let base = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .color_blend_op(vk::BlendOp::ADD)
        .alpha_blend_op(vk::BlendOp::ADD);
    match mode {
        BlendMode::Disabled => base.blend_enable(false),
        BlendMode::Alpha => base
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA),
        BlendMode::Additive => base
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE),
    }
}

/// One blend state per color attachment of the target pass.
pub(crate) fn blend_attachments(
    state: &PipelineState,
    color_attachment_count: u32,
) -> Vec<vk::PipelineColorBlendAttachmentState> {
    (0..color_attachment_count as usize)
        .map(|index| blend_attachment(state.blend.get(index).copied().unwrap_or_default()))
        .collect()
}

/// Dynamic state every pipeline carries.
pub(crate) const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Dynamic state list for a pipeline state block.
pub(crate) fn dynamic_states(state: &PipelineState) -> Vec<vk::DynamicState> {
    let mut states = DYNAMIC_STATES.to_vec();
    if state.dynamic_line_width {
        states.push(vk::DynamicState::LINE_WIDTH);
    }
    if state.stencil.is_some() {
        states.push(vk::DynamicState::STENCIL_REFERENCE);
    }
    states
}

/// Build a graphics pipeline against `render_pass`.
///
/// `color_attachment_count` must match the pass's color attachments.
///
/// # Safety
///
/// `device`, the shader's modules and layouts, and `render_pass` must all
/// be live.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) unsafe fn create_pipeline(
    device: &ash::Device,
    shader: &Shader,
    state: &PipelineState,
    render_pass: vk::RenderPass,
    color_attachment_count: u32,
) -> Result<vk::Pipeline> {
    let stages: Vec<vk::PipelineShaderStageCreateInfo> = shader
        .stages
        .iter()
        .map(|stage| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage.stage)
                .module(stage.module)
                .name(&stage.entry_point)
        })
        .collect();

    let bindings = if shader.vertex_attributes.is_empty() {
        Vec::new()
    } else {
        vec![vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(shader.vertex_stride)
            .input_rate(vk::VertexInputRate::VERTEX)]
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&shader.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(state.topology)
        .primitive_restart_enable(state.primitive_restart);

    // Viewport and scissor come from dynamic state; counts still matter.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let bias = state.depth_bias.unwrap_or_default();
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(state.polygon_mode)
        .cull_mode(state.cull_mode)
        .front_face(state.front_face)
        .line_width(state.line_width)
        .depth_bias_enable(state.depth_bias.is_some())
        .depth_bias_constant_factor(bias.constant)
        .depth_bias_clamp(bias.clamp)
        .depth_bias_slope_factor(bias.slope);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let stencil = state.stencil.unwrap_or_default();
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(state.depth_test)
        .depth_write_enable(state.depth_write)
        .depth_compare_op(state.depth_compare)
        .stencil_test_enable(state.stencil.is_some())
        .front(stencil.front)
        .back(stencil.back);

    let attachments = blend_attachments(state, color_attachment_count);
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

    let dynamics = dynamic_states(state);
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamics);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(shader.pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
            .map_err(|(_, err)| GpuError::from(err))?
    };
    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_opaque_depth_tested() {
        let state = PipelineState::default();
        assert!(state.depth_test && state.depth_write);
        assert!(state.blend.is_empty());
        assert!(state.stencil.is_none() && state.depth_bias.is_none());
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
    }

    #[test]
    fn alpha_blend_uses_src_alpha_factors() {
        let attachment = blend_attachment(BlendMode::Alpha);
        assert_eq!(attachment.blend_enable, vk::TRUE);
        assert_eq!(attachment.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            attachment.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }

    #[test]
    fn blend_list_is_per_attachment_with_disabled_tail() {
        let state = PipelineState {
            blend: vec![BlendMode::Alpha, BlendMode::Additive],
            ..PipelineState::default()
        };
        let attachments = blend_attachments(&state, 3);
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(attachments[1].dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(attachments[2].blend_enable, vk::FALSE);
    }

    #[test]
    fn line_width_dynamic_state_is_opt_in() {
        assert!(!dynamic_states(&PipelineState::default())
            .contains(&vk::DynamicState::LINE_WIDTH));
        let wireframe = PipelineState {
            polygon_mode: vk::PolygonMode::LINE,
            dynamic_line_width: true,
            ..PipelineState::default()
        };
        assert!(dynamic_states(&wireframe).contains(&vk::DynamicState::LINE_WIDTH));
    }

    #[test]
    fn stencil_state_makes_the_reference_dynamic() {
        assert!(!dynamic_states(&PipelineState::default())
            .contains(&vk::DynamicState::STENCIL_REFERENCE));
        let outlined = PipelineState {
            stencil: Some(StencilState {
                front: vk::StencilOpState::default()
                    .compare_op(vk::CompareOp::EQUAL)
                    .pass_op(vk::StencilOp::KEEP)
                    .compare_mask(0xff),
                back: vk::StencilOpState::default(),
            }),
            ..PipelineState::default()
        };
        assert!(dynamic_states(&outlined).contains(&vk::DynamicState::STENCIL_REFERENCE));
    }

    #[test]
    fn disabled_blend_still_writes_all_channels() {
        let attachment = blend_attachment(BlendMode::Disabled);
        assert_eq!(attachment.blend_enable, vk::FALSE);
        assert_eq!(attachment.color_write_mask, vk::ColorComponentFlags::RGBA);
    }
}
