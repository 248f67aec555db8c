//! Image usage classification.
//!
//! Render-pass attachments and barriers are specified in terms of *usage*,
//! not raw layouts; the layout, pipeline stage, and access mask are all
//! derived from one table here so they can never disagree.

use ash::vk;

use crate::error::{GpuError, Result};

/// How an image is used at a point in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageUsage {
    /// Not yet used; contents undefined.
    #[default]
    None,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ColorSampled,
    DepthSampled,
    TransferSrc,
    TransferDst,
}

impl ImageUsage {
    /// The optimal layout for this usage.
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            Self::None => vk::ImageLayout::UNDEFINED,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::ColorSampled | Self::DepthSampled => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        }
    }

    /// The pipeline stage that touches the image under this usage.
    pub fn stage(self) -> vk::PipelineStageFlags {
        match self {
            Self::None => vk::PipelineStageFlags::TOP_OF_PIPE,
            Self::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthStencilAttachment => {
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            }
            Self::DepthStencilReadOnly => vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            Self::ColorSampled | Self::DepthSampled => vk::PipelineStageFlags::FRAGMENT_SHADER,
            Self::TransferSrc | Self::TransferDst => vk::PipelineStageFlags::TRANSFER,
        }
    }

    /// The access mask for this usage.
    pub fn access(self) -> vk::AccessFlags {
        match self {
            Self::None => vk::AccessFlags::empty(),
            Self::ColorAttachment => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilAttachment => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthStencilReadOnly => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            Self::ColorSampled | Self::DepthSampled => vk::AccessFlags::SHADER_READ,
            Self::TransferSrc => vk::AccessFlags::TRANSFER_READ,
            Self::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
        }
    }

    /// The `vk::ImageUsageFlags` an image needs created with to allow this usage.
    pub fn image_usage_flags(self) -> Result<vk::ImageUsageFlags> {
        Ok(match self {
            Self::None => vk::ImageUsageFlags::empty(),
            Self::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            Self::DepthStencilAttachment | Self::DepthStencilReadOnly => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            }
            Self::ColorSampled | Self::DepthSampled => vk::ImageUsageFlags::SAMPLED,
            Self::TransferSrc => vk::ImageUsageFlags::TRANSFER_SRC,
            Self::TransferDst => vk::ImageUsageFlags::TRANSFER_DST,
        })
    }

    /// Recover the usage behind a tracked layout. `SHADER_READ_ONLY` is
    /// shared by color and depth sampling, so the image's aspect decides.
    pub fn from_layout(layout: vk::ImageLayout, depth: bool) -> Option<Self> {
        Some(match layout {
            vk::ImageLayout::UNDEFINED => Self::None,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => Self::ColorAttachment,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => Self::DepthStencilAttachment,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => Self::DepthStencilReadOnly,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
                if depth {
                    Self::DepthSampled
                } else {
                    Self::ColorSampled
                }
            }
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => Self::TransferSrc,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => Self::TransferDst,
            _ => return None,
        })
    }

    /// Classify the usage an image returns to after a transfer, from its
    /// creation usage flags. Ambiguous or unknown flag sets are rejected.
    pub fn from_image_flags(flags: vk::ImageUsageFlags, depth: bool) -> Result<Self> {
        if flags.contains(vk::ImageUsageFlags::SAMPLED) {
            return Ok(if depth {
                Self::DepthSampled
            } else {
                Self::ColorSampled
            });
        }
        if flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
            return Ok(Self::ColorAttachment);
        }
        if flags.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
            return Ok(Self::DepthStencilAttachment);
        }
        if flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            return Ok(Self::TransferDst);
        }
        if flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            return Ok(Self::TransferSrc);
        }
        Err(GpuError::UnsupportedUsage(format!("{flags:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_table_is_bit_exact() {
        let cases = [
            (
                ImageUsage::ColorAttachment,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
            (
                ImageUsage::DepthStencilAttachment,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            (
                ImageUsage::DepthStencilReadOnly,
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            ),
            (
                ImageUsage::ColorSampled,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_READ,
            ),
            (
                ImageUsage::DepthSampled,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_READ,
            ),
            (
                ImageUsage::TransferSrc,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_READ,
            ),
            (
                ImageUsage::TransferDst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
            (
                ImageUsage::None,
                vk::ImageLayout::UNDEFINED,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::AccessFlags::empty(),
            ),
        ];

        for (usage, layout, stage, access) in cases {
            assert_eq!(usage.layout(), layout, "{usage:?} layout");
            assert_eq!(usage.stage(), stage, "{usage:?} stage");
            assert_eq!(usage.access(), access, "{usage:?} access");
        }
    }

    #[test]
    fn classify_from_creation_flags() {
        assert_eq!(
            ImageUsage::from_image_flags(
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                false
            )
            .unwrap(),
            ImageUsage::ColorSampled
        );
        assert_eq!(
            ImageUsage::from_image_flags(vk::ImageUsageFlags::SAMPLED, true).unwrap(),
            ImageUsage::DepthSampled
        );
        assert!(ImageUsage::from_image_flags(vk::ImageUsageFlags::empty(), false).is_err());
    }
}
