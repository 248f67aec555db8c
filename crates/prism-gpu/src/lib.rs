//! Retained-mode Vulkan frontend for the Prism engine.
//!
//! The crate centers on [`GraphicsController`]: it owns the device,
//! swapchain and every GPU resource, hands out opaque [`ResourceId`]s,
//! and records work into a fixed ring of in-flight frames. Image layout
//! transitions, render pass derivation and descriptor pool management
//! all happen behind the controller; callers describe resources and
//! draws in terms of intended usage.

pub mod barriers;
pub mod controller;
pub mod deferred;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod format;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod renderpass;
pub mod shader;
pub mod store;
pub mod surface;
pub mod swapchain;
pub mod transfer;
pub mod uniforms;
pub mod usage;

pub use ash::vk;

pub use controller::{
    GraphicsController, GraphicsControllerBuilder, ImageCreateDesc, PipelineCreateDesc,
    SamplerCreateDesc, StencilFace,
};
pub use descriptors::MAX_SETS_PER_POOL;
pub use device::{DeviceContextBuilder, DeviceInfo};
pub use error::{GpuError, Result};
pub use frame::{FRAMES_IN_FLIGHT, MAX_TIMESTAMP_QUERIES};
pub use pipeline::{BlendMode, DepthBias, PipelineState, StencilState};
pub use renderpass::{AttachmentLoad, AttachmentSpec, AttachmentStore};
pub use store::{BufferKind, ResourceId};
pub use transfer::{CopyRegion, Subresource};
pub use uniforms::UniformBinding;
pub use usage::ImageUsage;
