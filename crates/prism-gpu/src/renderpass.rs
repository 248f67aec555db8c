//! Render pass derivation.
//!
//! Attachments are described by format, load/store actions and the usage
//! the image comes from, holds inside the pass, and goes to; layouts and
//! the external dependencies are derived, never spelled out by the
//! caller. Description building is kept separate from the Vulkan call so
//! it can be exercised without a device.

use ash::vk;

use crate::error::{GpuError, Result};
use crate::format::format_info;
use crate::usage::ImageUsage;

/// What happens to an attachment's previous contents when a pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentLoad {
    Clear,
    Preserve,
    DontCare,
}

impl AttachmentLoad {
    fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            Self::Clear => vk::AttachmentLoadOp::CLEAR,
            Self::Preserve => vk::AttachmentLoadOp::LOAD,
            Self::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

/// What happens to an attachment's contents when a pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStore {
    Preserve,
    Discard,
}

impl AttachmentStore {
    fn to_vk(self) -> vk::AttachmentStoreOp {
        match self {
            Self::Preserve => vk::AttachmentStoreOp::STORE,
            Self::Discard => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

/// One attachment of a render pass, as described by the caller.
///
/// `previous` is the usage the image was last under before the pass,
/// `usage` what it serves as inside the pass, and `next` the usage it is
/// consumed under afterwards. Stencil actions apply only to formats that
/// carry a stencil aspect.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentSpec {
    pub format: vk::Format,
    pub previous: ImageUsage,
    pub usage: ImageUsage,
    pub next: ImageUsage,
    pub load: AttachmentLoad,
    pub store: AttachmentStore,
    pub stencil_load: AttachmentLoad,
    pub stencil_store: AttachmentStore,
}

impl AttachmentSpec {
    /// A cleared, stored attachment with no surrounding usage.
    pub fn new(format: vk::Format, usage: ImageUsage) -> Self {
        Self {
            format,
            previous: ImageUsage::None,
            usage,
            next: ImageUsage::None,
            load: AttachmentLoad::Clear,
            store: AttachmentStore::Preserve,
            stencil_load: AttachmentLoad::DontCare,
            stencil_store: AttachmentStore::Discard,
        }
    }

    /// Layout the attachment ends the pass in.
    pub fn final_layout(&self) -> Result<vk::ImageLayout> {
        self.validate_usage()?;
        Ok(if self.next == ImageUsage::None {
            self.usage.layout()
        } else {
            self.next.layout()
        })
    }

    fn validate_usage(&self) -> Result<()> {
        if self.usage == ImageUsage::None {
            return Err(GpuError::UnsupportedUsage(
                "attachment needs an in-pass usage".to_string(),
            ));
        }
        Ok(())
    }
}

/// A derived render pass and the specs it was built from.
pub struct RenderPassRecord {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<AttachmentSpec>,
}

/// Split derivation result, pre-Vulkan.
pub(crate) struct DerivedPass {
    pub descriptions: Vec<vk::AttachmentDescription>,
    pub color_refs: Vec<vk::AttachmentReference>,
    pub depth_ref: Option<vk::AttachmentReference>,
    /// EXTERNAL→0 followed by 0→EXTERNAL.
    pub dependencies: [vk::SubpassDependency; 2],
}

/// Derive attachment descriptions, references and dependencies.
///
/// Initial layout comes from `previous`, the subpass reference layout
/// from `usage`, and the final layout from `next` (or the in-pass layout
/// when `next` is `None`). The incoming dependency unions the stages and
/// accesses of every attachment's previous usage against the pass's own;
/// the outgoing one does the reverse. References split color vs depth by
/// format aspect; at most one depth attachment is honoured.
pub(crate) fn derive_attachments(specs: &[AttachmentSpec]) -> Result<DerivedPass> {
    let mut descriptions = Vec::with_capacity(specs.len());
    let mut color_refs = Vec::new();
    let mut depth_ref = None;

    let mut pass_stages = vk::PipelineStageFlags::empty();
    let mut pass_access = vk::AccessFlags::empty();
    let mut before_stages = vk::PipelineStageFlags::empty();
    let mut before_access = vk::AccessFlags::empty();
    let mut after_stages = vk::PipelineStageFlags::empty();
    let mut after_access = vk::AccessFlags::empty();

    for (index, spec) in specs.iter().enumerate() {
        spec.validate_usage()?;
        let info = format_info(spec.format)?;

        pass_stages |= spec.usage.stage();
        pass_access |= spec.usage.access();
        before_stages |= spec.previous.stage();
        before_access |= spec.previous.access();
        if spec.next != ImageUsage::None {
            after_stages |= spec.next.stage();
            after_access |= spec.next.access();
        }

        descriptions.push(
            vk::AttachmentDescription::default()
                .format(spec.format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(spec.load.to_vk())
                .store_op(spec.store.to_vk())
                .stencil_load_op(spec.stencil_load.to_vk())
                .stencil_store_op(spec.stencil_store.to_vk())
                .initial_layout(spec.previous.layout())
                .final_layout(spec.final_layout()?),
        );

        let reference = vk::AttachmentReference::default()
            .attachment(index as u32)
            .layout(spec.usage.layout());
        if info.has_depth {
            if depth_ref.is_none() {
                depth_ref = Some(reference);
            }
        } else {
            color_refs.push(reference);
        }
    }

    if after_stages.is_empty() {
        after_stages = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }

    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(before_stages)
            .src_access_mask(before_access)
            .dst_stage_mask(pass_stages)
            .dst_access_mask(pass_access),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(pass_stages)
            .src_access_mask(pass_access)
            .dst_stage_mask(after_stages)
            .dst_access_mask(after_access),
    ];

    Ok(DerivedPass {
        descriptions,
        color_refs,
        depth_ref,
        dependencies,
    })
}

/// Create a render pass from attachment specs.
///
/// # Safety
///
/// `device` must be a valid device; the returned pass must be destroyed
/// before the device.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) unsafe fn create_render_pass(
    device: &ash::Device,
    specs: &[AttachmentSpec],
) -> Result<vk::RenderPass> {
    let derived = derive_attachments(specs)?;

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&derived.color_refs);
    if let Some(depth) = derived.depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth);
    }
    let subpasses = [subpass];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&derived.descriptions)
        .subpasses(&subpasses)
        .dependencies(&derived.dependencies);

    Ok(unsafe { device.create_render_pass(&create_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(previous: ImageUsage, next: ImageUsage) -> AttachmentSpec {
        AttachmentSpec {
            previous,
            next,
            ..AttachmentSpec::new(vk::Format::R8G8B8A8_UNORM, ImageUsage::ColorAttachment)
        }
    }

    fn depth(previous: ImageUsage, next: ImageUsage) -> AttachmentSpec {
        AttachmentSpec {
            previous,
            next,
            ..AttachmentSpec::new(vk::Format::D32_SFLOAT, ImageUsage::DepthStencilAttachment)
        }
    }

    #[test]
    fn color_then_depth_splits_references() {
        let derived = derive_attachments(&[
            color(ImageUsage::None, ImageUsage::ColorSampled),
            depth(ImageUsage::None, ImageUsage::None),
        ])
        .unwrap();

        assert_eq!(derived.color_refs.len(), 1);
        assert_eq!(derived.color_refs[0].attachment, 0);
        let depth = derived.depth_ref.unwrap();
        assert_eq!(depth.attachment, 1);
        assert_eq!(
            depth.layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn layouts_come_from_surrounding_usage() {
        let derived =
            derive_attachments(&[color(ImageUsage::ColorSampled, ImageUsage::ColorSampled)])
                .unwrap();
        let desc = &derived.descriptions[0];
        assert_eq!(desc.initial_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(desc.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn no_next_usage_keeps_in_pass_layout() {
        let derived = derive_attachments(&[color(ImageUsage::None, ImageUsage::None)]).unwrap();
        let desc = &derived.descriptions[0];
        assert_eq!(desc.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(desc.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn read_only_depth_usage_sets_reference_layout() {
        let derived = derive_attachments(&[AttachmentSpec {
            load: AttachmentLoad::Preserve,
            ..AttachmentSpec::new(vk::Format::D32_SFLOAT, ImageUsage::DepthStencilReadOnly)
        }])
        .unwrap();

        let reference = derived.depth_ref.unwrap();
        assert_eq!(
            reference.layout,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
        // A read-only pass touches only the early tests, never writes.
        let incoming = &derived.dependencies[0];
        assert!(!incoming
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn missing_in_pass_usage_is_rejected() {
        let result = derive_attachments(&[AttachmentSpec {
            usage: ImageUsage::None,
            ..AttachmentSpec::new(vk::Format::R8G8B8A8_UNORM, ImageUsage::ColorAttachment)
        }]);
        assert!(matches!(result, Err(GpuError::UnsupportedUsage(_))));
    }

    #[test]
    fn dependencies_union_attachment_masks() {
        let derived = derive_attachments(&[
            color(ImageUsage::ColorSampled, ImageUsage::ColorSampled),
            AttachmentSpec {
                previous: ImageUsage::DepthStencilAttachment,
                load: AttachmentLoad::Preserve,
                ..AttachmentSpec::new(vk::Format::D32_SFLOAT, ImageUsage::DepthStencilAttachment)
            },
        ])
        .unwrap();

        let incoming = &derived.dependencies[0];
        assert_eq!(incoming.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(incoming
            .src_stage_mask
            .contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(incoming
            .src_stage_mask
            .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(incoming
            .dst_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));

        let outgoing = &derived.dependencies[1];
        assert_eq!(outgoing.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(outgoing
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }

    #[test]
    fn store_and_stencil_actions_follow_the_attachment() {
        let derived = derive_attachments(&[AttachmentSpec {
            store: AttachmentStore::Discard,
            stencil_load: AttachmentLoad::Clear,
            stencil_store: AttachmentStore::Preserve,
            ..AttachmentSpec::new(
                vk::Format::D24_UNORM_S8_UINT,
                ImageUsage::DepthStencilAttachment,
            )
        }])
        .unwrap();
        let desc = &derived.descriptions[0];
        assert_eq!(desc.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(desc.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(desc.stencil_store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let result = derive_attachments(&[AttachmentSpec::new(
            vk::Format::ASTC_4X4_UNORM_BLOCK,
            ImageUsage::ColorAttachment,
        )]);
        assert!(result.is_err());
    }
}
