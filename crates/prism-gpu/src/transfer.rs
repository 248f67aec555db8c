//! Host to device transfers.
//!
//! All uploads go through a host-visible staging buffer and are recorded
//! on the current frame's draw command buffer. Matching formats copy
//! straight into the destination image; mismatched formats copy into a
//! staging image first and blit across with format conversion. Staging
//! allocations are handed back to the caller for deferred destruction.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::barriers::image_should_have_layout;
use crate::deferred::DestroyOp;
use crate::error::{GpuError, Result};
use crate::format::format_info;
use crate::memory::{AllocatedBuffer, DeviceAllocator};
use crate::store::{Buffer, BufferKind, Image};
use crate::usage::ImageUsage;

/// A (mip level, array layer) pair naming one image subresource.
#[derive(Debug, Clone, Copy, Default)]
pub struct Subresource {
    pub mip_level: u32,
    pub array_layer: u32,
}

impl Subresource {
    fn layers(self, aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(aspect)
            .mip_level(self.mip_level)
            .base_array_layer(self.array_layer)
            .layer_count(1)
    }
}

/// One image-to-image copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyRegion {
    pub src_subresource: Subresource,
    pub src_offset: vk::Offset3D,
    pub dst_subresource: Subresource,
    pub dst_offset: vk::Offset3D,
    pub extent: vk::Extent3D,
}

/// Stage and access masks for reads of a buffer of this kind, used on
/// both sides of an update copy.
pub(crate) fn buffer_masks(kind: BufferKind) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match kind {
        BufferKind::Vertex => (
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ),
        BufferKind::Index => (
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::INDEX_READ,
        ),
        BufferKind::Uniform => (
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::UNIFORM_READ,
        ),
        BufferKind::Transfer => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
    }
}

/// Bytes an upload of `extent` texels in `format` must provide.
pub(crate) fn expected_upload_size(extent: vk::Extent3D, format: vk::Format) -> Result<usize> {
    let info = format_info(format)?;
    Ok(extent.width as usize
        * extent.height as usize
        * extent.depth.max(1) as usize
        * info.texel_size as usize)
}

/// The usage an image settles back into after a transfer touched it.
///
/// A tracked layout wins; an image that was still `UNDEFINED` falls back
/// to the optimal usage for its creation flags.
pub(crate) fn restore_usage(image: &Image, prior: vk::ImageLayout) -> Result<ImageUsage> {
    let depth = format_info(image.format)?.has_depth;
    match ImageUsage::from_layout(prior, depth) {
        Some(ImageUsage::None) | None => ImageUsage::from_image_flags(image.usage_flags, depth),
        Some(usage) => Ok(usage),
    }
}

/// Create a mapped staging buffer holding `data`.
pub(crate) fn make_staging_buffer(
    allocator: &mut DeviceAllocator,
    data: &[u8],
) -> Result<AllocatedBuffer> {
    let staging = allocator.create_buffer(
        data.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "staging",
    )?;
    staging.write_bytes(0, data)?;
    Ok(staging)
}

/// Record an upload of `data` into `dst` at `offset`, bracketed by
/// buffer barriers against the buffer's consuming stage.
///
/// # Safety
///
/// `command_buffer` must be recording; `dst.gpu.buffer` must be live.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) unsafe fn buffer_upload(
    device: &ash::Device,
    allocator: &mut DeviceAllocator,
    command_buffer: vk::CommandBuffer,
    dst: &Buffer,
    offset: u64,
    data: &[u8],
) -> Result<DestroyOp> {
    if offset + data.len() as u64 > dst.size {
        return Err(GpuError::InvalidState(format!(
            "upload of {} bytes at offset {offset} exceeds buffer size {}",
            data.len(),
            dst.size
        )));
    }
    let staging = make_staging_buffer(allocator, data)?;
    let (use_stage, use_access) = buffer_masks(dst.kind);

    let barrier = |src_stage, src_access, dst_stage, dst_access| {
        (
            src_stage,
            dst_stage,
            [vk::BufferMemoryBarrier::default()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(dst.gpu.buffer)
                .offset(offset)
                .size(data.len() as u64)],
        )
    };

    unsafe {
        let (src, dst_stage, barriers) = barrier(
            use_stage,
            use_access,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        );
        device.cmd_pipeline_barrier(
            command_buffer,
            src,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &barriers,
            &[],
        );

        let region = vk::BufferCopy::default()
            .src_offset(0)
            .dst_offset(offset)
            .size(data.len() as u64);
        device.cmd_copy_buffer(command_buffer, staging.buffer, dst.gpu.buffer, &[region]);

        let (src, dst_stage, barriers) = barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            use_stage,
            use_access,
        );
        device.cmd_pipeline_barrier(
            command_buffer,
            src,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &barriers,
            &[],
        );
    }

    Ok(DestroyOp::StagingBuffer(staging))
}

/// Record an upload of raw texels into one subresource of `dst`.
///
/// With matching formats the staging buffer is copied straight in; with a
/// mismatch the texels go through a staging image of the source format
/// and are blitted across with linear filtering. The destination returns
/// to its prior layout afterwards.
///
/// # Safety
///
/// `command_buffer` must be recording; `dst.gpu.image` must be live.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) unsafe fn image_upload(
    device: &ash::Device,
    allocator: &mut DeviceAllocator,
    command_buffer: vk::CommandBuffer,
    dst: &mut Image,
    subresource: Subresource,
    offset: vk::Offset3D,
    extent: vk::Extent3D,
    data: &[u8],
    src_format: vk::Format,
) -> Result<Vec<DestroyOp>> {
    let expected = expected_upload_size(extent, src_format)?;
    if data.len() != expected {
        return Err(GpuError::InvalidState(format!(
            "image upload supplies {} bytes, extent wants {expected}",
            data.len()
        )));
    }

    let prior = dst.current_layout;
    let restore = restore_usage(dst, prior)?;
    let mut staging_ops = Vec::with_capacity(2);

    let staging = make_staging_buffer(allocator, data)?;

    unsafe {
        image_should_have_layout(device, command_buffer, dst, ImageUsage::TransferDst);

        if src_format == dst.format {
            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .image_subresource(subresource.layers(dst.aspect))
                .image_offset(offset)
                .image_extent(extent);
            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging.buffer,
                dst.gpu.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        } else {
            let create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(src_format)
                .extent(extent)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let staging_image =
                allocator.create_image(&create_info, MemoryLocation::GpuOnly, "staging blit")?;
            let src_aspect = format_info(src_format)?.aspect;

            // Two transitions bracket the staging image: into the copy,
            // then from copy target to blit source.
            let mut tracked = Image {
                gpu: staging_image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: src_format,
                extent,
                mip_levels: 1,
                array_layers: 1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage_flags: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                aspect: src_aspect,
                current_layout: vk::ImageLayout::UNDEFINED,
            };
            image_should_have_layout(device, command_buffer, &mut tracked, ImageUsage::TransferDst);

            let full = Subresource::default().layers(src_aspect);
            let copy = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .image_subresource(full)
                .image_offset(vk::Offset3D::default())
                .image_extent(extent);
            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging.buffer,
                tracked.gpu.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );

            image_should_have_layout(device, command_buffer, &mut tracked, ImageUsage::TransferSrc);

            let far = vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: extent.depth.max(1) as i32,
            };
            let blit = vk::ImageBlit::default()
                .src_subresource(full)
                .src_offsets([vk::Offset3D::default(), far])
                .dst_subresource(subresource.layers(dst.aspect))
                .dst_offsets([
                    offset,
                    vk::Offset3D {
                        x: offset.x + far.x,
                        y: offset.y + far.y,
                        z: offset.z + far.z,
                    },
                ]);
            device.cmd_blit_image(
                command_buffer,
                tracked.gpu.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.gpu.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            staging_ops.push(DestroyOp::StagingImage(tracked.gpu));
        }

        image_should_have_layout(device, command_buffer, dst, restore);
    }

    staging_ops.push(DestroyOp::StagingBuffer(staging));
    Ok(staging_ops)
}

/// Record a copy between two images, returning both to their prior
/// layouts afterwards.
///
/// # Safety
///
/// `command_buffer` must be recording; both images must be live.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) unsafe fn image_copy(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    src: &mut Image,
    dst: &mut Image,
    region: CopyRegion,
) -> Result<()> {
    let src_restore = restore_usage(src, src.current_layout)?;
    let dst_restore = restore_usage(dst, dst.current_layout)?;

    unsafe {
        image_should_have_layout(device, command_buffer, src, ImageUsage::TransferSrc);
        image_should_have_layout(device, command_buffer, dst, ImageUsage::TransferDst);

        let copy = vk::ImageCopy::default()
            .src_subresource(region.src_subresource.layers(src.aspect))
            .src_offset(region.src_offset)
            .dst_subresource(region.dst_subresource.layers(dst.aspect))
            .dst_offset(region.dst_offset)
            .extent(region.extent);
        device.cmd_copy_image(
            command_buffer,
            src.gpu.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst.gpu.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[copy],
        );

        image_should_have_layout(device, command_buffer, src, src_restore);
        image_should_have_layout(device, command_buffer, dst, dst_restore);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AllocatedImage;

    fn image(format: vk::Format, flags: vk::ImageUsageFlags, layout: vk::ImageLayout) -> Image {
        let extent = vk::Extent3D {
            width: 4,
            height: 4,
            depth: 1,
        };
        Image {
            gpu: AllocatedImage {
                image: vk::Image::null(),
                allocation: None,
                format,
                extent,
            },
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            extent,
            mip_levels: 1,
            array_layers: 1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage_flags: flags,
            aspect: vk::ImageAspectFlags::COLOR,
            current_layout: layout,
        }
    }

    #[test]
    fn buffer_masks_follow_kind() {
        assert_eq!(
            buffer_masks(BufferKind::Index),
            (
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::AccessFlags::INDEX_READ
            )
        );
        let (stage, access) = buffer_masks(BufferKind::Uniform);
        assert!(stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert_eq!(access, vk::AccessFlags::UNIFORM_READ);
    }

    #[test]
    fn upload_size_accounts_for_texel_size() {
        let extent = vk::Extent3D {
            width: 2,
            height: 2,
            depth: 1,
        };
        assert_eq!(
            expected_upload_size(extent, vk::Format::R8G8B8A8_SRGB).unwrap(),
            16
        );
        assert_eq!(
            expected_upload_size(extent, vk::Format::R32G32B32A32_SFLOAT).unwrap(),
            64
        );
    }

    #[test]
    fn undefined_prior_layout_restores_to_creation_usage() {
        let img = image(
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageLayout::UNDEFINED,
        );
        assert_eq!(
            restore_usage(&img, vk::ImageLayout::UNDEFINED).unwrap(),
            ImageUsage::ColorSampled
        );
    }

    #[test]
    fn tracked_prior_layout_wins_over_creation_flags() {
        let img = image(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(
            restore_usage(&img, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).unwrap(),
            ImageUsage::ColorAttachment
        );
    }
}
