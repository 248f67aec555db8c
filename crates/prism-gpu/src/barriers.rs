//! Image layout tracking and transition barriers.
//!
//! Every image record carries the layout it will be in at the end of the
//! commands recorded so far. Transitions are requested by target usage;
//! the source masks are recovered from the tracked layout, and a request
//! that matches the current layout records nothing.

use ash::vk;

use crate::store::Image;
use crate::usage::ImageUsage;

const ALL_USAGES: [ImageUsage; 8] = [
    ImageUsage::None,
    ImageUsage::ColorAttachment,
    ImageUsage::DepthStencilAttachment,
    ImageUsage::DepthStencilReadOnly,
    ImageUsage::ColorSampled,
    ImageUsage::DepthSampled,
    ImageUsage::TransferSrc,
    ImageUsage::TransferDst,
];

/// Recover the stage and access masks that last touched an image, from its
/// tracked layout. Unknown layouts fall back to a full-pipeline barrier.
pub(crate) fn masks_for_layout(
    layout: vk::ImageLayout,
) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    for usage in ALL_USAGES {
        if usage.layout() == layout {
            return (usage.stage(), usage.access());
        }
    }
    (
        vk::PipelineStageFlags::ALL_COMMANDS,
        vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
    )
}

/// Record a transition so the image is in the layout `usage` wants, and
/// update the tracked layout. No-op when it already is.
///
/// # Safety
///
/// `command_buffer` must be in the recording state and `image.gpu.image`
/// must be live.
pub(crate) unsafe fn image_should_have_layout(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: &mut Image,
    usage: ImageUsage,
) {
    let target = usage.layout();
    // Nothing ever transitions back to UNDEFINED.
    if target == vk::ImageLayout::UNDEFINED || image.current_layout == target {
        return;
    }
    let (src_stage, src_access) = masks_for_layout(image.current_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(usage.access())
        .old_layout(image.current_layout)
        .new_layout(target)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image.gpu.image)
        .subresource_range(image.full_range());

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            usage.stage(),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    image.current_layout = target;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_round_trip_through_layouts() {
        let (stage, access) = masks_for_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));

        let (stage, access) = masks_for_layout(vk::ImageLayout::UNDEFINED);
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(access, vk::AccessFlags::empty());
    }

    #[test]
    fn unknown_layout_gets_full_barrier() {
        let (stage, _) = masks_for_layout(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }
}
