//! Resource store.
//!
//! Every externally visible GPU object is an opaque 32-bit id from one
//! shared, monotonically increasing counter. The store owns the records;
//! every cross-resource relation is by id, never by smart pointer.
//!
//! A missing id is a programmer error, not a runtime error: lookups panic.

use ash::vk;
use hashbrown::HashMap;

use crate::descriptors::PoolSignature;
use crate::memory::{AllocatedBuffer, AllocatedImage};
use crate::renderpass::RenderPassRecord;
use crate::shader::Shader;

/// Opaque identifier for a GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a buffer is for; fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Transfer,
}

impl BufferKind {
    /// Creation usage flags; every buffer is a transfer destination so it
    /// can be filled through the staging path.
    pub fn usage_flags(self) -> vk::BufferUsageFlags {
        let base = vk::BufferUsageFlags::TRANSFER_DST;
        match self {
            Self::Vertex => base | vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => base | vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => base | vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Transfer => base | vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }
}

/// Index sub-record for index buffers.
#[derive(Debug, Clone, Copy)]
pub struct IndexBufferInfo {
    pub index_type: vk::IndexType,
    pub count: u32,
}

/// A device-local buffer.
pub struct Buffer {
    pub gpu: AllocatedBuffer,
    pub size: u64,
    pub kind: BufferKind,
    pub index: Option<IndexBufferInfo>,
}

/// An owned image and its tracked layout.
///
/// `current_layout` reflects the layout at the end of the commands recorded
/// so far in the current frame.
pub struct Image {
    pub gpu: AllocatedImage,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub tiling: vk::ImageTiling,
    pub usage_flags: vk::ImageUsageFlags,
    /// Full aspect mask from the format registry.
    pub aspect: vk::ImageAspectFlags,
    pub current_layout: vk::ImageLayout,
}

impl Image {
    /// Subresource range covering every mip and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(self.array_layers)
    }
}

/// An immutable sampler.
pub struct Sampler {
    pub sampler: vk::Sampler,
}

/// A compiled graphics pipeline.
pub struct Pipeline {
    pub shader: ResourceId,
    pub pipeline: vk::Pipeline,
    /// Borrowed from the owning shader.
    pub layout: vk::PipelineLayout,
    pub dynamic_states: Vec<vk::DynamicState>,
    /// `None` when the pipeline targets the swapchain's present pass.
    pub render_pass: Option<ResourceId>,
}

/// A framebuffer and the image views it owns.
pub struct Framebuffer {
    pub framebuffer: vk::Framebuffer,
    pub render_pass: ResourceId,
    pub attachments: Vec<ResourceId>,
    /// Views created at framebuffer creation, destroyed with it.
    pub views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
}

/// An immutable descriptor set plus the resources it references.
pub struct UniformSet {
    pub shader: ResourceId,
    pub set_index: u32,
    pub descriptor_set: vk::DescriptorSet,
    /// Owning pool slot, for returning the set on destruction.
    pub pool_signature: PoolSignature,
    pub pool_index: usize,
    pub images: Vec<ResourceId>,
    /// One view per combined-image-sampler entry, destroyed with the set.
    pub owned_views: Vec<vk::ImageView>,
    pub buffers: Vec<ResourceId>,
}

/// Id-keyed maps for every resource kind.
#[derive(Default)]
pub struct ResourceStore {
    next_id: u32,
    pub buffers: HashMap<ResourceId, Buffer>,
    pub images: HashMap<ResourceId, Image>,
    pub samplers: HashMap<ResourceId, Sampler>,
    pub shaders: HashMap<ResourceId, Shader>,
    pub pipelines: HashMap<ResourceId, Pipeline>,
    pub render_passes: HashMap<ResourceId, RenderPassRecord>,
    pub framebuffers: HashMap<ResourceId, Framebuffer>,
    pub uniform_sets: HashMap<ResourceId, UniformSet>,
}

macro_rules! accessors {
    ($get:ident, $get_mut:ident, $map:ident, $ty:ty, $what:literal) => {
        #[doc = concat!("Look up a ", $what, " by id.")]
        pub fn $get(&self, id: ResourceId) -> &$ty {
            self.$map
                .get(&id)
                .unwrap_or_else(|| panic!(concat!("unknown ", $what, " id {}"), id))
        }

        #[doc = concat!("Mutably look up a ", $what, " by id.")]
        pub fn $get_mut(&mut self, id: ResourceId) -> &mut $ty {
            self.$map
                .get_mut(&id)
                .unwrap_or_else(|| panic!(concat!("unknown ", $what, " id {}"), id))
        }
    };
}

impl ResourceStore {
    /// Issue a fresh id from the shared counter.
    pub fn allocate_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    accessors!(buffer, buffer_mut, buffers, Buffer, "buffer");
    accessors!(image, image_mut, images, Image, "image");
    accessors!(sampler, sampler_mut, samplers, Sampler, "sampler");
    accessors!(shader, shader_mut, shaders, Shader, "shader");
    accessors!(pipeline, pipeline_mut, pipelines, Pipeline, "pipeline");
    accessors!(
        render_pass,
        render_pass_mut,
        render_passes,
        RenderPassRecord,
        "render pass"
    );
    accessors!(
        framebuffer,
        framebuffer_mut,
        framebuffers,
        Framebuffer,
        "framebuffer"
    );
    accessors!(
        uniform_set,
        uniform_set_mut,
        uniform_sets,
        UniformSet,
        "uniform set"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_across_kinds() {
        let mut store = ResourceStore::default();
        let a = store.allocate_id();
        let b = store.allocate_id();
        let c = store.allocate_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn buffer_kinds_imply_transfer_dst() {
        for kind in [
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::Uniform,
            BufferKind::Transfer,
        ] {
            assert!(kind
                .usage_flags()
                .contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
        assert!(BufferKind::Index
            .usage_flags()
            .contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }

    #[test]
    #[should_panic(expected = "unknown buffer id")]
    fn missing_id_panics() {
        let store = ResourceStore::default();
        let _ = store.buffer(ResourceId(7));
    }
}
