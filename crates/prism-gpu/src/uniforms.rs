//! Uniform set assembly.
//!
//! A uniform set is an immutable descriptor set: the caller lists what
//! goes at each binding, everything is validated against the shader's
//! reflection, the set is allocated from the signature's pool and written
//! once. Changing a binding means destroying and recreating the set.

use ash::vk;

use crate::descriptors::{DescriptorPools, PoolSignature};
use crate::error::{GpuError, Result};
use crate::shader::{descriptor_type, MergedBinding};
use crate::store::{ResourceId, ResourceStore, UniformSet};
use prism_spirv::DescriptorKind;

/// What to place at one binding of a uniform set.
pub enum UniformBinding {
    UniformBuffer {
        binding: u32,
        buffer: ResourceId,
    },
    CombinedImageSampler {
        binding: u32,
        /// `(image, sampler)` pairs; one per array element.
        entries: Vec<(ResourceId, ResourceId)>,
        /// Defaults to the image's full subresource range.
        range: Option<vk::ImageSubresourceRange>,
    },
}

impl UniformBinding {
    fn binding(&self) -> u32 {
        match self {
            Self::UniformBuffer { binding, .. } | Self::CombinedImageSampler { binding, .. } => {
                *binding
            }
        }
    }

    fn kind(&self) -> DescriptorKind {
        match self {
            Self::UniformBuffer { .. } => DescriptorKind::UniformBuffer,
            Self::CombinedImageSampler { .. } => DescriptorKind::CombinedImageSampler,
        }
    }
}

/// Locate a reflected binding within a merged set.
pub(crate) fn find_binding(set: &[MergedBinding], binding: u32) -> Option<&MergedBinding> {
    set.iter().find(|entry| entry.binding == binding)
}

/// The layout a sampled image is expected in, by aspect.
pub(crate) fn sampled_layout(aspect: vk::ImageAspectFlags) -> vk::ImageLayout {
    if aspect.contains(vk::ImageAspectFlags::DEPTH) {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

/// Validate `bindings` against the shader's reflection, allocate a set
/// and write every descriptor in one update.
///
/// # Safety
///
/// `device` must be valid; every referenced resource must be live.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) unsafe fn create_uniform_set(
    device: &ash::Device,
    pools: &mut DescriptorPools,
    store: &ResourceStore,
    shader_id: ResourceId,
    set_index: u32,
    bindings: &[UniformBinding],
) -> Result<UniformSet> {
    let shader = store.shader(shader_id);
    let reflected = shader.sets.get(set_index as usize).ok_or_else(|| {
        GpuError::NoSuchBinding {
            set: set_index,
            binding: bindings.first().map_or(0, UniformBinding::binding),
        }
    })?;

    // Validate everything before any Vulkan object exists.
    for descriptor in bindings {
        let entry =
            find_binding(reflected, descriptor.binding()).ok_or(GpuError::NoSuchBinding {
                set: set_index,
                binding: descriptor.binding(),
            })?;
        if entry.kind != descriptor.kind() {
            return Err(GpuError::UnsupportedUniform(format!(
                "set {set_index} binding {} is {:?} in the shader, {:?} supplied",
                descriptor.binding(),
                entry.kind,
                descriptor.kind(),
            )));
        }
        if let UniformBinding::CombinedImageSampler { entries, .. } = descriptor {
            if entries.len() as u32 != entry.count {
                return Err(GpuError::UnsupportedUniform(format!(
                    "set {set_index} binding {} wants {} elements, {} supplied",
                    descriptor.binding(),
                    entry.count,
                    entries.len(),
                )));
            }
        }
    }

    let mut owned_views = Vec::new();
    let result = unsafe {
        write_set(
            device,
            pools,
            store,
            shader_id,
            set_index,
            bindings,
            reflected,
            &mut owned_views,
        )
    };
    if result.is_err() {
        for view in owned_views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
unsafe fn write_set(
    device: &ash::Device,
    pools: &mut DescriptorPools,
    store: &ResourceStore,
    shader_id: ResourceId,
    set_index: u32,
    bindings: &[UniformBinding],
    reflected: &[MergedBinding],
    owned_views: &mut Vec<vk::ImageView>,
) -> Result<UniformSet> {
    let shader = store.shader(shader_id);
    let mut images = Vec::new();
    let mut buffers = Vec::new();
    let mut image_infos: Vec<Vec<vk::DescriptorImageInfo>> = Vec::new();
    let mut buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>> = Vec::new();

    for descriptor in bindings {
        match descriptor {
            UniformBinding::UniformBuffer { buffer, .. } => {
                let record = store.buffer(*buffer);
                buffer_infos.push(vec![vk::DescriptorBufferInfo::default()
                    .buffer(record.gpu.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)]);
                buffers.push(*buffer);
            }
            UniformBinding::CombinedImageSampler { entries, range, .. } => {
                let mut infos = Vec::with_capacity(entries.len());
                for (image_id, sampler_id) in entries {
                    let image = store.image(*image_id);
                    let sampler = store.sampler(*sampler_id);
                    let subresource = range.unwrap_or_else(|| image.full_range());
                    let view_info = vk::ImageViewCreateInfo::default()
                        .image(image.gpu.image)
                        .view_type(image.view_type)
                        .format(image.format)
                        .subresource_range(subresource);
                    let view = unsafe { device.create_image_view(&view_info, None)? };
                    owned_views.push(view);
                    infos.push(
                        vk::DescriptorImageInfo::default()
                            .sampler(sampler.sampler)
                            .image_view(view)
                            .image_layout(sampled_layout(image.aspect)),
                    );
                    images.push(*image_id);
                }
                image_infos.push(infos);
            }
        }
    }

    let signature = PoolSignature::from_bindings(reflected);
    let (descriptor_set, pool_index) = unsafe {
        pools.allocate(device, &signature, shader.set_layouts[set_index as usize])?
    };

    let mut writes = Vec::with_capacity(bindings.len());
    let mut next_image = 0;
    let mut next_buffer = 0;
    for descriptor in bindings {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(descriptor_set)
            .dst_binding(descriptor.binding())
            .descriptor_type(descriptor_type(descriptor.kind()));
        writes.push(match descriptor {
            UniformBinding::UniformBuffer { .. } => {
                let infos = &buffer_infos[next_buffer];
                next_buffer += 1;
                write.buffer_info(infos)
            }
            UniformBinding::CombinedImageSampler { .. } => {
                let infos = &image_infos[next_image];
                next_image += 1;
                write.image_info(infos)
            }
        });
    }
    unsafe { device.update_descriptor_sets(&writes, &[]) };

    Ok(UniformSet {
        shader: shader_id,
        set_index,
        descriptor_set,
        pool_signature: signature,
        pool_index,
        images,
        owned_views: std::mem::take(owned_views),
        buffers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_aspect_selects_read_only_layout() {
        assert_eq!(
            sampled_layout(vk::ImageAspectFlags::DEPTH),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            sampled_layout(vk::ImageAspectFlags::COLOR),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            sampled_layout(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn find_binding_matches_exact_index() {
        let set = [
            MergedBinding {
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            },
            MergedBinding {
                binding: 3,
                kind: DescriptorKind::CombinedImageSampler,
                count: 2,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
        ];
        assert_eq!(find_binding(&set, 3).unwrap().count, 2);
        assert!(find_binding(&set, 1).is_none());
    }
}
