//! The graphics controller.
//!
//! One value owning the whole GPU side: device, swapchain, resource
//! store, frame ring and descriptor pools. Callers create resources and
//! get back opaque ids, record draws between `draw_begin` and
//! `draw_end`, and call [`GraphicsController::end_frame`] once per
//! frame to submit, present and advance the ring.
//!
//! The controller is single-threaded by design; GPU work overlaps the
//! host but is strictly ordered on the one graphics queue.

use ash::vk;
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::barriers::image_should_have_layout;
use crate::deferred::{self, DeferredQueue, DestroyOp};
use crate::descriptors::DescriptorPools;
use crate::device::{DeviceContext, DeviceContextBuilder, DeviceInfo};
use crate::error::{GpuError, Result};
use crate::format::format_info;
use crate::frame::{Frame, FRAMES_IN_FLIGHT, MAX_TIMESTAMP_QUERIES};
use crate::pipeline::{self, PipelineState};
use crate::renderpass::{self, AttachmentSpec};
use crate::shader;
use crate::store::{
    Buffer, BufferKind, Framebuffer, Image, IndexBufferInfo, Pipeline, ResourceId, ResourceStore,
    Sampler,
};
use crate::surface::SurfaceContext;
use crate::swapchain::Swapchain;
use crate::transfer::{self, CopyRegion, Subresource};
use crate::uniforms::{self, UniformBinding};
use crate::usage::ImageUsage;

/// Everything needed to create an image.
#[derive(Debug, Clone, Copy)]
pub struct ImageCreateDesc {
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

impl Default for ImageCreateDesc {
    fn default() -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        }
    }
}

/// Everything needed to create a sampler.
#[derive(Debug, Clone, Copy)]
pub struct SamplerCreateDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_u: vk::SamplerAddressMode,
    pub address_v: vk::SamplerAddressMode,
    pub address_w: vk::SamplerAddressMode,
    /// `Some(max)` enables anisotropic filtering.
    pub anisotropy: Option<f32>,
    pub compare: Option<vk::CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerCreateDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_u: vk::SamplerAddressMode::REPEAT,
            address_v: vk::SamplerAddressMode::REPEAT,
            address_w: vk::SamplerAddressMode::REPEAT,
            anisotropy: None,
            compare: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        }
    }
}

/// Everything needed to create a graphics pipeline.
pub struct PipelineCreateDesc {
    pub shader: ResourceId,
    pub state: PipelineState,
    /// `None` targets the swapchain's present pass.
    pub render_pass: Option<ResourceId>,
}

/// Which stencil faces a reference update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilFace {
    Front,
    Back,
    FrontAndBack,
}

impl StencilFace {
    fn flags(self) -> vk::StencilFaceFlags {
        match self {
            Self::Front => vk::StencilFaceFlags::FRONT,
            Self::Back => vk::StencilFaceFlags::BACK,
            Self::FrontAndBack => vk::StencilFaceFlags::FRONT_AND_BACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Idle,
    /// Inside `draw_begin` / `draw_end` against an offscreen framebuffer.
    Pass,
    /// Inside `draw_begin_for_screen` / `draw_end_for_screen`.
    ScreenPass,
}

/// Builder for [`GraphicsController`].
pub struct GraphicsControllerBuilder {
    app_name: String,
    enable_validation: bool,
    width: u32,
    height: u32,
}

impl Default for GraphicsControllerBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
            width: 1280,
            height: 720,
        }
    }
}

impl GraphicsControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Initial swapchain extent.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Build the controller against a window.
    pub fn build<W>(self, window: &W) -> Result<GraphicsController>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let (gpu, surface) = DeviceContextBuilder::new()
            .app_name(self.app_name)
            .validation(self.enable_validation)
            .build(window)?;
        let swapchain = unsafe { Swapchain::new(&gpu, &surface, self.width, self.height, None)? };

        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            frames.push(unsafe { Frame::new(gpu.device(), gpu.graphics_queue_family())? });
        }

        let controller = GraphicsController {
            surface,
            swapchain,
            store: ResourceStore::default(),
            pools: DescriptorPools::default(),
            deferred: DeferredQueue::default(),
            frames,
            frame_index: 0,
            frame_number: 1,
            frames_completed: 0,
            pass: PassState::Idle,
            bound_pipeline: None,
            screen_image: None,
            screen_drawn: false,
            swapchain_suboptimal: false,
            timestamp_results: Vec::new(),
            gpu,
        };
        unsafe { controller.begin_frame_buffers(controller.frame_index)? };
        Ok(controller)
    }
}

/// Retained-mode GPU frontend. See the module docs.
pub struct GraphicsController {
    surface: SurfaceContext,
    swapchain: Swapchain,
    store: ResourceStore,
    pools: DescriptorPools,
    deferred: DeferredQueue,
    frames: Vec<Frame>,
    frame_index: usize,
    /// Number of the frame currently being recorded; the first frame is 1.
    frame_number: u64,
    /// Highest frame number whose fence has been observed signalled.
    frames_completed: u64,
    pass: PassState,
    bound_pipeline: Option<ResourceId>,
    /// Swapchain image acquired for this frame, if any.
    screen_image: Option<u32>,
    screen_drawn: bool,
    swapchain_suboptimal: bool,
    /// Last harvested timestamps, already scaled to nanoseconds.
    timestamp_results: Vec<u64>,
    // Dropped last; owns the device everything above hangs off.
    gpu: DeviceContext,
}

impl GraphicsController {
    /// Properties of the selected device.
    pub fn device_info(&self) -> &DeviceInfo {
        self.gpu.info()
    }

    /// Extent of the current swapchain.
    pub fn screen_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Whether the last acquire or present reported the swapchain
    /// suboptimal; cleared by [`Self::screen_resize`].
    pub fn screen_suboptimal(&self) -> bool {
        self.swapchain_suboptimal
    }

    fn frame(&self) -> &Frame {
        &self.frames[self.frame_index]
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        if self.pass == PassState::Idle {
            Ok(())
        } else {
            Err(GpuError::InvalidState(format!(
                "{what} is not allowed inside a pass"
            )))
        }
    }

    fn require_pass(&self, what: &str) -> Result<()> {
        if self.pass == PassState::Idle {
            Err(GpuError::InvalidState(format!(
                "{what} is only allowed inside a pass"
            )))
        } else {
            Ok(())
        }
    }

    unsafe fn begin_frame_buffers(&self, index: usize) -> Result<()> {
        let device = self.gpu.device();
        let frame = &self.frames[index];
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.reset_command_buffer(
                frame.setup_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
            device.reset_command_buffer(frame.draw_buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(frame.setup_buffer, &begin_info)?;
            device.begin_command_buffer(frame.draw_buffer, &begin_info)?;
        }
        Ok(())
    }

    // ---- buffers ------------------------------------------------------

    /// Create a buffer and upload `data` into it through a staging buffer.
    /// Index buffers must state their index type.
    pub fn buffer_create(
        &mut self,
        kind: BufferKind,
        data: &[u8],
        index_type: Option<vk::IndexType>,
    ) -> Result<ResourceId> {
        self.require_idle("buffer_create")?;
        let index = match (kind, index_type) {
            (BufferKind::Index, Some(index_type)) => {
                let index_size = match index_type {
                    vk::IndexType::UINT16 => 2,
                    _ => 4,
                };
                Some(IndexBufferInfo {
                    index_type,
                    count: (data.len() / index_size) as u32,
                })
            }
            (BufferKind::Index, None) => {
                return Err(GpuError::InvalidState(
                    "index buffers need an index type".to_string(),
                ))
            }
            _ => None,
        };

        let mut allocator = self.gpu.allocator().lock();
        let gpu_buffer = allocator.create_buffer(
            data.len() as u64,
            kind.usage_flags(),
            MemoryLocation::GpuOnly,
            "buffer",
        )?;
        let record = Buffer {
            gpu: gpu_buffer,
            size: data.len() as u64,
            kind,
            index,
        };

        let staging = unsafe {
            transfer::buffer_upload(
                self.gpu.device(),
                &mut allocator,
                self.frame().draw_buffer,
                &record,
                0,
                data,
            )?
        };
        drop(allocator);
        self.deferred.push(self.frame_number, staging);

        let id = self.store.allocate_id();
        self.store.buffers.insert(id, record);
        Ok(id)
    }

    /// [`Self::buffer_create`] over a typed slice.
    pub fn buffer_create_typed<T: bytemuck::Pod>(
        &mut self,
        kind: BufferKind,
        data: &[T],
        index_type: Option<vk::IndexType>,
    ) -> Result<ResourceId> {
        self.buffer_create(kind, bytemuck::cast_slice(data), index_type)
    }

    /// Re-upload a buffer's contents, bracketed by barriers against its
    /// consuming stage.
    pub fn buffer_update(&mut self, id: ResourceId, data: &[u8]) -> Result<()> {
        self.require_idle("buffer_update")?;
        let mut allocator = self.gpu.allocator().lock();
        let staging = unsafe {
            transfer::buffer_upload(
                self.gpu.device(),
                &mut allocator,
                self.frame().draw_buffer,
                self.store.buffer(id),
                0,
                data,
            )?
        };
        drop(allocator);
        self.deferred.push(self.frame_number, staging);
        Ok(())
    }

    pub fn buffer_destroy(&mut self, id: ResourceId) {
        debug_assert!(self.store.buffers.contains_key(&id), "unknown buffer {id}");
        self.deferred.push(self.frame_number, DestroyOp::Buffer(id));
    }

    // ---- images -------------------------------------------------------

    /// Create an empty image; fill it with [`Self::image_update`].
    pub fn image_create(&mut self, desc: &ImageCreateDesc) -> Result<ResourceId> {
        self.require_idle("image_create")?;
        let info = format_info(desc.format)?;
        let (image_type, flags) = match desc.view_type {
            vk::ImageViewType::TYPE_1D | vk::ImageViewType::TYPE_1D_ARRAY => {
                (vk::ImageType::TYPE_1D, vk::ImageCreateFlags::empty())
            }
            vk::ImageViewType::TYPE_3D => (vk::ImageType::TYPE_3D, vk::ImageCreateFlags::empty()),
            vk::ImageViewType::CUBE | vk::ImageViewType::CUBE_ARRAY => {
                (vk::ImageType::TYPE_2D, vk::ImageCreateFlags::CUBE_COMPATIBLE)
            }
            _ => (vk::ImageType::TYPE_2D, vk::ImageCreateFlags::empty()),
        };
        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: desc.depth.max(1),
        };

        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(desc.format)
            .extent(extent)
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(desc.array_layers.max(1))
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let gpu_image = self.gpu.allocator().lock().create_image(
            &create_info,
            MemoryLocation::GpuOnly,
            "image",
        )?;

        let id = self.store.allocate_id();
        self.store.images.insert(
            id,
            Image {
                gpu: gpu_image,
                view_type: desc.view_type,
                format: desc.format,
                extent,
                mip_levels: desc.mip_levels.max(1),
                array_layers: desc.array_layers.max(1),
                tiling: desc.tiling,
                usage_flags: desc.usage,
                aspect: info.aspect,
                current_layout: vk::ImageLayout::UNDEFINED,
            },
        );
        Ok(id)
    }

    /// Upload raw texels into one subresource of an image. A source
    /// format differing from the image's goes through a staging image
    /// and a linear blit.
    pub fn image_update(
        &mut self,
        id: ResourceId,
        subresource: Subresource,
        offset: vk::Offset3D,
        extent: vk::Extent3D,
        data: &[u8],
        src_format: vk::Format,
    ) -> Result<()> {
        self.require_idle("image_update")?;
        let mut allocator = self.gpu.allocator().lock();
        let staging_ops = unsafe {
            transfer::image_upload(
                self.gpu.device(),
                &mut allocator,
                self.frames[self.frame_index].draw_buffer,
                self.store.image_mut(id),
                subresource,
                offset,
                extent,
                data,
                src_format,
            )?
        };
        drop(allocator);
        for op in staging_ops {
            self.deferred.push(self.frame_number, op);
        }
        Ok(())
    }

    /// Copy a region between two images, restoring both layouts after.
    pub fn image_copy(
        &mut self,
        src: ResourceId,
        dst: ResourceId,
        region: CopyRegion,
    ) -> Result<()> {
        self.require_idle("image_copy")?;
        if src == dst {
            return Err(GpuError::InvalidState(
                "image_copy source and destination must differ".to_string(),
            ));
        }
        let mut src_record = self
            .store
            .images
            .remove(&src)
            .unwrap_or_else(|| panic!("unknown image {src}"));
        let result = unsafe {
            transfer::image_copy(
                self.gpu.device(),
                self.frames[self.frame_index].draw_buffer,
                &mut src_record,
                self.store.image_mut(dst),
                region,
            )
        };
        self.store.images.insert(src, src_record);
        result
    }

    pub fn image_destroy(&mut self, id: ResourceId) {
        debug_assert!(self.store.images.contains_key(&id), "unknown image {id}");
        self.deferred.push(self.frame_number, DestroyOp::Image(id));
    }

    // ---- samplers -----------------------------------------------------

    pub fn sampler_create(&mut self, desc: &SamplerCreateDesc) -> Result<ResourceId> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_u)
            .address_mode_v(desc.address_v)
            .address_mode_w(desc.address_w)
            .anisotropy_enable(desc.anisotropy.is_some())
            .max_anisotropy(desc.anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare.is_some())
            .compare_op(desc.compare.unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(desc.border_color);
        let sampler = unsafe { self.gpu.device().create_sampler(&create_info, None)? };

        let id = self.store.allocate_id();
        self.store.samplers.insert(id, Sampler { sampler });
        Ok(id)
    }

    pub fn sampler_destroy(&mut self, id: ResourceId) {
        debug_assert!(self.store.samplers.contains_key(&id), "unknown sampler {id}");
        self.deferred.push(self.frame_number, DestroyOp::Sampler(id));
    }

    // ---- shaders and pipelines ---------------------------------------

    /// Reflect and link a shader from per-stage SPIR-V blobs.
    pub fn shader_create(&mut self, stages: &[&[u8]]) -> Result<ResourceId> {
        let record = unsafe { shader::create_shader(self.gpu.device(), stages)? };
        let id = self.store.allocate_id();
        self.store.shaders.insert(id, record);
        Ok(id)
    }

    pub fn shader_destroy(&mut self, id: ResourceId) {
        debug_assert!(self.store.shaders.contains_key(&id), "unknown shader {id}");
        self.deferred.push(self.frame_number, DestroyOp::Shader(id));
    }

    pub fn pipeline_create(&mut self, desc: &PipelineCreateDesc) -> Result<ResourceId> {
        let shader = self.store.shader(desc.shader);
        let (pass, color_count) = match desc.render_pass {
            Some(rp) => {
                let record = self.store.render_pass(rp);
                let mut colors = 0;
                for spec in &record.attachments {
                    if !format_info(spec.format)?.has_depth {
                        colors += 1;
                    }
                }
                (record.render_pass, colors)
            }
            None => (self.swapchain.present_pass, 1),
        };

        let pipeline = unsafe {
            pipeline::create_pipeline(self.gpu.device(), shader, &desc.state, pass, color_count)?
        };

        let layout = shader.pipeline_layout;
        let id = self.store.allocate_id();
        self.store.pipelines.insert(
            id,
            Pipeline {
                shader: desc.shader,
                pipeline,
                layout,
                dynamic_states: pipeline::dynamic_states(&desc.state),
                render_pass: desc.render_pass,
            },
        );
        Ok(id)
    }

    pub fn pipeline_destroy(&mut self, id: ResourceId) {
        debug_assert!(self.store.pipelines.contains_key(&id), "unknown pipeline {id}");
        self.deferred.push(self.frame_number, DestroyOp::Pipeline(id));
    }

    // ---- render passes and framebuffers ------------------------------

    pub fn render_pass_create(&mut self, attachments: &[AttachmentSpec]) -> Result<ResourceId> {
        let render_pass = unsafe { renderpass::create_render_pass(self.gpu.device(), attachments)? };
        let id = self.store.allocate_id();
        self.store.render_passes.insert(
            id,
            renderpass::RenderPassRecord {
                render_pass,
                attachments: attachments.to_vec(),
            },
        );
        Ok(id)
    }

    pub fn render_pass_destroy(&mut self, id: ResourceId) {
        debug_assert!(
            self.store.render_passes.contains_key(&id),
            "unknown render pass {id}"
        );
        self.deferred.push(self.frame_number, DestroyOp::RenderPass(id));
    }

    /// Create a framebuffer over full-range views of the given images.
    /// Every attachment must share the extent of the first.
    pub fn framebuffer_create(
        &mut self,
        render_pass: ResourceId,
        attachments: &[ResourceId],
    ) -> Result<ResourceId> {
        let device = self.gpu.device();
        let pass_record = self.store.render_pass(render_pass);
        if attachments.len() != pass_record.attachments.len() {
            return Err(GpuError::InvalidState(format!(
                "render pass has {} attachments, framebuffer supplies {}",
                pass_record.attachments.len(),
                attachments.len()
            )));
        }
        let first = self.store.image(*attachments.first().ok_or_else(|| {
            GpuError::InvalidState("framebuffer needs at least one attachment".to_string())
        })?);
        let extent = vk::Extent2D {
            width: first.extent.width,
            height: first.extent.height,
        };

        let mut views = Vec::with_capacity(attachments.len());
        let result: Result<vk::Framebuffer> = (|| {
            for &id in attachments {
                let image = self.store.image(id);
                if image.extent.width != extent.width || image.extent.height != extent.height {
                    return Err(GpuError::InvalidState(format!(
                        "attachment {id} extent differs from attachment 0"
                    )));
                }
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image.gpu.image)
                    .view_type(image.view_type)
                    .format(image.format)
                    .subresource_range(image.full_range());
                views.push(unsafe { device.create_image_view(&view_info, None)? });
            }

            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(pass_record.render_pass)
                .attachments(&views)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            Ok(unsafe { device.create_framebuffer(&create_info, None)? })
        })();

        let framebuffer = match result {
            Ok(framebuffer) => framebuffer,
            Err(err) => {
                for view in views {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(err);
            }
        };

        let id = self.store.allocate_id();
        self.store.framebuffers.insert(
            id,
            Framebuffer {
                framebuffer,
                render_pass,
                attachments: attachments.to_vec(),
                views,
                extent,
            },
        );
        Ok(id)
    }

    pub fn framebuffer_destroy(&mut self, id: ResourceId) {
        debug_assert!(
            self.store.framebuffers.contains_key(&id),
            "unknown framebuffer {id}"
        );
        self.deferred.push(self.frame_number, DestroyOp::Framebuffer(id));
    }

    // ---- uniform sets -------------------------------------------------

    /// Create an immutable uniform set for one set index of a shader.
    pub fn uniform_set_create(
        &mut self,
        shader: ResourceId,
        set_index: u32,
        bindings: &[UniformBinding],
    ) -> Result<ResourceId> {
        let record = unsafe {
            uniforms::create_uniform_set(
                self.gpu.device(),
                &mut self.pools,
                &self.store,
                shader,
                set_index,
                bindings,
            )?
        };
        let id = self.store.allocate_id();
        self.store.uniform_sets.insert(id, record);
        Ok(id)
    }

    pub fn uniform_set_destroy(&mut self, id: ResourceId) {
        debug_assert!(
            self.store.uniform_sets.contains_key(&id),
            "unknown uniform set {id}"
        );
        self.deferred.push(self.frame_number, DestroyOp::UniformSet(id));
    }

    // ---- draw recording ----------------------------------------------

    /// Begin an offscreen pass. Attachment layouts are brought to the
    /// pass's initial layouts, then tracked as the layouts the pass
    /// leaves them in, since the pass itself performs that transition.
    pub fn draw_begin(
        &mut self,
        framebuffer: ResourceId,
        clear_values: &[vk::ClearValue],
    ) -> Result<()> {
        self.require_idle("draw_begin")?;
        let device = self.gpu.device();
        let draw_buffer = self.frames[self.frame_index].draw_buffer;

        let fb = self.store.framebuffer(framebuffer);
        let pass = self.store.render_pass(fb.render_pass);
        let handle = pass.render_pass;
        let extent = fb.extent;

        let attachment_plan: Vec<(ResourceId, ImageUsage, vk::ImageLayout)> = fb
            .attachments
            .iter()
            .zip(&pass.attachments)
            .map(|(&image, spec)| Ok((image, spec.previous, spec.final_layout()?)))
            .collect::<Result<_>>()?;
        let fb_handle = fb.framebuffer;

        for (image_id, previous, final_layout) in attachment_plan {
            let image = self.store.image_mut(image_id);
            unsafe { image_should_have_layout(device, draw_buffer, image, previous) };
            // The pass transitions to its final layout internally; track
            // that now so queries mid-pass see the post-pass layout.
            image.current_layout = final_layout;
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(handle)
            .framebuffer(fb_handle)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            device.cmd_begin_render_pass(draw_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
        self.pass = PassState::Pass;
        self.bound_pipeline = None;
        Ok(())
    }

    /// Begin a pass on the next swapchain image, acquiring it first.
    pub fn draw_begin_for_screen(&mut self, clear_color: [f32; 4]) -> Result<()> {
        self.require_idle("draw_begin_for_screen")?;
        let frame = &self.frames[self.frame_index];

        let image_index = match self.screen_image {
            Some(index) => index,
            None => {
                let (index, suboptimal) =
                    unsafe { self.swapchain.acquire(frame.image_available)? };
                self.swapchain_suboptimal |= suboptimal;
                self.screen_image = Some(index);
                index
            }
        };

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.swapchain.present_pass)
            .framebuffer(self.swapchain.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.gpu.device().cmd_begin_render_pass(
                frame.draw_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        self.pass = PassState::ScreenPass;
        self.bound_pipeline = None;
        self.screen_drawn = true;
        Ok(())
    }

    pub fn draw_set_viewport(&mut self, viewport: vk::Viewport) -> Result<()> {
        self.require_pass("draw_set_viewport")?;
        unsafe {
            self.gpu
                .device()
                .cmd_set_viewport(self.frame().draw_buffer, 0, &[viewport]);
        }
        Ok(())
    }

    pub fn draw_set_scissor(&mut self, scissor: vk::Rect2D) -> Result<()> {
        self.require_pass("draw_set_scissor")?;
        unsafe {
            self.gpu
                .device()
                .cmd_set_scissor(self.frame().draw_buffer, 0, &[scissor]);
        }
        Ok(())
    }

    /// Honoured only by pipelines carrying line width as dynamic state;
    /// otherwise warns and records nothing.
    pub fn draw_set_line_width(&mut self, width: f32) -> Result<()> {
        self.require_pass("draw_set_line_width")?;
        let dynamic = self.bound_pipeline.is_some_and(|id| {
            self.store
                .pipeline(id)
                .dynamic_states
                .contains(&vk::DynamicState::LINE_WIDTH)
        });
        if !dynamic {
            tracing::warn!("bound pipeline has no dynamic line width");
            return Ok(());
        }
        unsafe {
            self.gpu
                .device()
                .cmd_set_line_width(self.frame().draw_buffer, width);
        }
        Ok(())
    }

    /// Honoured only by pipelines with a stencil state, whose reference
    /// is dynamic; otherwise warns and records nothing.
    pub fn draw_set_stencil_reference(&mut self, face: StencilFace, reference: u32) -> Result<()> {
        self.require_pass("draw_set_stencil_reference")?;
        let dynamic = self.bound_pipeline.is_some_and(|id| {
            self.store
                .pipeline(id)
                .dynamic_states
                .contains(&vk::DynamicState::STENCIL_REFERENCE)
        });
        if !dynamic {
            tracing::warn!("bound pipeline has no stencil state");
            return Ok(());
        }
        unsafe {
            self.gpu.device().cmd_set_stencil_reference(
                self.frame().draw_buffer,
                face.flags(),
                reference,
            );
        }
        Ok(())
    }

    pub fn draw_push_constants(
        &mut self,
        shader: ResourceId,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        self.require_pass("draw_push_constants")?;
        let layout = self.store.shader(shader).pipeline_layout;
        unsafe {
            self.gpu.device().cmd_push_constants(
                self.frame().draw_buffer,
                layout,
                stages,
                offset,
                data,
            );
        }
        Ok(())
    }

    pub fn draw_bind_pipeline(&mut self, pipeline: ResourceId) -> Result<()> {
        self.require_pass("draw_bind_pipeline")?;
        let handle = self.store.pipeline(pipeline).pipeline;
        unsafe {
            self.gpu.device().cmd_bind_pipeline(
                self.frame().draw_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                handle,
            );
        }
        self.bound_pipeline = Some(pipeline);
        Ok(())
    }

    pub fn draw_bind_vertex_buffer(&mut self, buffer: ResourceId) -> Result<()> {
        self.require_pass("draw_bind_vertex_buffer")?;
        let handle = self.store.buffer(buffer).gpu.buffer;
        unsafe {
            self.gpu.device().cmd_bind_vertex_buffers(
                self.frame().draw_buffer,
                0,
                &[handle],
                &[0],
            );
        }
        Ok(())
    }

    pub fn draw_bind_index_buffer(&mut self, buffer: ResourceId) -> Result<()> {
        self.require_pass("draw_bind_index_buffer")?;
        let record = self.store.buffer(buffer);
        let info = record.index.ok_or_else(|| {
            GpuError::InvalidState(format!("buffer {buffer} is not an index buffer"))
        })?;
        unsafe {
            self.gpu.device().cmd_bind_index_buffer(
                self.frame().draw_buffer,
                record.gpu.buffer,
                0,
                info.index_type,
            );
        }
        Ok(())
    }

    /// Bind uniform sets starting at `first_set`. Images referenced by
    /// the sets get their sampled-layout barriers recorded on the setup
    /// buffer, which runs before the draw buffer on the same queue.
    pub fn draw_bind_uniform_sets(
        &mut self,
        pipeline: ResourceId,
        first_set: u32,
        sets: &[ResourceId],
    ) -> Result<()> {
        self.require_pass("draw_bind_uniform_sets")?;
        let device = self.gpu.device();
        let frame = &self.frames[self.frame_index];
        let layout = self.store.pipeline(pipeline).layout;

        let mut handles = Vec::with_capacity(sets.len());
        let mut sampled_images = Vec::new();
        for &set_id in sets {
            let set = self.store.uniform_set(set_id);
            handles.push(set.descriptor_set);
            sampled_images.extend_from_slice(&set.images);
        }

        let setup_buffer = frame.setup_buffer;
        let draw_buffer = frame.draw_buffer;
        for image_id in sampled_images {
            let image = self.store.image_mut(image_id);
            let usage = if image.aspect.contains(vk::ImageAspectFlags::DEPTH) {
                ImageUsage::DepthStencilReadOnly
            } else {
                ImageUsage::ColorSampled
            };
            unsafe { image_should_have_layout(device, setup_buffer, image, usage) };
        }

        unsafe {
            device.cmd_bind_descriptor_sets(
                draw_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                &handles,
                &[],
            );
        }
        Ok(())
    }

    pub fn draw_indexed(&mut self, index_count: u32, first_index: u32) -> Result<()> {
        self.require_pass("draw_indexed")?;
        unsafe {
            self.gpu.device().cmd_draw_indexed(
                self.frame().draw_buffer,
                index_count,
                1,
                first_index,
                0,
                0,
            );
        }
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        self.require_pass("draw")?;
        unsafe {
            self.gpu
                .device()
                .cmd_draw(self.frame().draw_buffer, vertex_count, 1, first_vertex, 0);
        }
        Ok(())
    }

    pub fn draw_end(&mut self) -> Result<()> {
        if self.pass != PassState::Pass {
            return Err(GpuError::InvalidState(
                "draw_end without matching draw_begin".to_string(),
            ));
        }
        unsafe { self.gpu.device().cmd_end_render_pass(self.frame().draw_buffer) };
        self.pass = PassState::Idle;
        self.bound_pipeline = None;
        Ok(())
    }

    pub fn draw_end_for_screen(&mut self) -> Result<()> {
        if self.pass != PassState::ScreenPass {
            return Err(GpuError::InvalidState(
                "draw_end_for_screen without matching draw_begin_for_screen".to_string(),
            ));
        }
        unsafe { self.gpu.device().cmd_end_render_pass(self.frame().draw_buffer) };
        self.pass = PassState::Idle;
        self.bound_pipeline = None;
        Ok(())
    }

    // ---- timestamps ---------------------------------------------------

    /// Reset this frame's query pool (on the setup buffer) and start a
    /// fresh capture.
    pub fn timestamp_query_begin(&mut self) -> Result<()> {
        self.require_idle("timestamp_query_begin")?;
        let frame = &mut self.frames[self.frame_index];
        unsafe {
            self.gpu.device().cmd_reset_query_pool(
                frame.setup_buffer,
                frame.query_pool,
                0,
                MAX_TIMESTAMP_QUERIES,
            );
        }
        frame.timestamps_written = 0;
        Ok(())
    }

    /// Write one timestamp at the bottom of the pipe on the draw buffer.
    /// Warns and records nothing past the pool's capacity.
    pub fn timestamp_write(&mut self) {
        let frame = &mut self.frames[self.frame_index];
        if frame.timestamps_written >= MAX_TIMESTAMP_QUERIES {
            tracing::warn!(
                capacity = MAX_TIMESTAMP_QUERIES,
                "timestamp query pool exhausted for this frame"
            );
            return;
        }
        unsafe {
            self.gpu.device().cmd_write_timestamp(
                frame.draw_buffer,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                frame.query_pool,
                frame.timestamps_written,
            );
        }
        frame.timestamps_written += 1;
    }

    /// Try a non-blocking host read of the previous wave's results; stale
    /// results persist until a newer wave lands.
    pub fn timestamp_query_end(&mut self) -> Result<()> {
        let prev = (self.frame_index + 1) % FRAMES_IN_FLIGHT;
        if self.frames[prev].submitted_frame == 0 {
            return Ok(());
        }
        let harvested =
            unsafe { self.frames[prev].harvest_timestamps(self.gpu.device())? };
        if let Some(raw) = harvested {
            if !raw.is_empty() {
                self.store_timestamps(&raw);
            }
        }
        Ok(())
    }

    /// Fetch `count` timestamp values in nanoseconds. `None` until at
    /// least as many frames as the ring holds have fully completed.
    pub fn timestamp_get_results(&self, count: usize) -> Option<&[u64]> {
        if self.timestamp_results.len() < count {
            return None;
        }
        Some(&self.timestamp_results[..count])
    }

    fn store_timestamps(&mut self, raw: &[u64]) {
        self.timestamp_results = scale_timestamps(raw, self.gpu.info().timestamp_period);
    }

    // ---- frame flow ---------------------------------------------------

    /// Close both command buffers, submit them, present if the screen was
    /// drawn to, advance to the next frame slot and wait its fence, then
    /// run matured deferred destructions and reopen the buffers.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_frame(&mut self) -> Result<()> {
        self.require_idle("end_frame")?;
        let device = self.gpu.device();
        let frame = &mut self.frames[self.frame_index];

        unsafe {
            device.end_command_buffer(frame.setup_buffer)?;
            device.end_command_buffer(frame.draw_buffer)?;
            device.reset_fences(&[frame.in_flight])?;
        }

        let setup_buffers = [frame.setup_buffer];
        let draw_buffers = [frame.draw_buffer];
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.draw_complete];

        let setup_submit = vk::SubmitInfo::default().command_buffers(&setup_buffers);
        let mut draw_submit = vk::SubmitInfo::default().command_buffers(&draw_buffers);
        if self.screen_drawn {
            draw_submit = draw_submit
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .signal_semaphores(&signal_semaphores);
        }

        unsafe {
            device.queue_submit(
                self.gpu.graphics_queue(),
                &[setup_submit, draw_submit],
                frame.in_flight,
            )?;
        }
        frame.submitted_frame = self.frame_number;

        if let Some(image_index) = self.screen_image.take() {
            let suboptimal = unsafe {
                self.swapchain.present(
                    self.gpu.present_queue(),
                    image_index,
                    self.frames[self.frame_index].draw_complete,
                )?
            };
            self.swapchain_suboptimal |= suboptimal;
        }
        self.screen_drawn = false;
        self.frame_number += 1;

        // Suspend on the next slot; its previous submission must retire
        // before its buffers and query pool can be reused.
        self.frame_index = (self.frame_index + 1) % FRAMES_IN_FLIGHT;
        let next = &self.frames[self.frame_index];
        unsafe {
            device
                .wait_for_fences(&[next.in_flight], true, u64::MAX)
                .map_err(|_| GpuError::DeviceLost)?;
        }
        if next.submitted_frame > 0 {
            self.frames_completed = next.submitted_frame;
            if next.timestamps_written > 0 {
                if let Some(raw) = unsafe { next.harvest_timestamps(device)? } {
                    self.store_timestamps(&raw);
                }
            }
        }

        self.run_deferred(self.frames_completed)?;
        unsafe { self.begin_frame_buffers(self.frame_index)? };
        Ok(())
    }

    /// Block until the GPU is idle and run every deferred destruction
    /// belonging to a submitted frame.
    pub fn sync(&mut self) -> Result<()> {
        self.require_idle("sync")?;
        self.gpu.wait_idle()?;
        self.frames_completed = self.frame_number.saturating_sub(1);
        self.run_deferred(self.frames_completed)
    }

    /// Tear down and recreate the swapchain at a new size. Blocks on the
    /// device; existing pipelines keep working against the new pass.
    pub fn screen_resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.require_idle("screen_resize")?;
        self.gpu.wait_idle()?;
        let replacement = unsafe {
            Swapchain::new(
                &self.gpu,
                &self.surface,
                width,
                height,
                Some(self.swapchain.swapchain),
            )?
        };
        let old = std::mem::replace(&mut self.swapchain, replacement);
        unsafe { old.destroy(self.gpu.device()) };
        self.screen_image = None;
        self.swapchain_suboptimal = false;
        Ok(())
    }

    fn run_deferred(&mut self, finished_frame: u64) -> Result<()> {
        let device = self.gpu.device();
        let mut allocator = self.gpu.allocator().lock();
        for op in self.deferred.drain_completed(finished_frame) {
            unsafe {
                deferred::execute(device, &mut allocator, &mut self.pools, &mut self.store, op)?;
            }
        }
        Ok(())
    }

    /// Destroy every live resource directly; the device is already idle.
    fn destroy_live_resources(&mut self) {
        let mut ops = Vec::new();
        ops.extend(self.store.uniform_sets.keys().copied().map(DestroyOp::UniformSet));
        ops.extend(self.store.framebuffers.keys().copied().map(DestroyOp::Framebuffer));
        ops.extend(self.store.pipelines.keys().copied().map(DestroyOp::Pipeline));
        ops.extend(self.store.render_passes.keys().copied().map(DestroyOp::RenderPass));
        ops.extend(self.store.shaders.keys().copied().map(DestroyOp::Shader));
        ops.extend(self.store.samplers.keys().copied().map(DestroyOp::Sampler));
        ops.extend(self.store.images.keys().copied().map(DestroyOp::Image));
        ops.extend(self.store.buffers.keys().copied().map(DestroyOp::Buffer));

        let device = self.gpu.device();
        let mut allocator = self.gpu.allocator().lock();
        for op in ops {
            if let Err(err) = unsafe {
                deferred::execute(device, &mut allocator, &mut self.pools, &mut self.store, op)
            } {
                tracing::warn!("shutdown destruction failed: {err}");
            }
        }
    }
}

/// Convert raw timestamp ticks to nanoseconds.
fn scale_timestamps(raw: &[u64], period: f32) -> Vec<u64> {
    let period = f64::from(period);
    raw.iter()
        .map(|&ticks| (ticks as f64 * period) as u64)
        .collect()
}

impl Drop for GraphicsController {
    fn drop(&mut self) {
        if self.gpu.wait_idle().is_err() {
            tracing::warn!("device wait failed during shutdown");
        }

        // Everything submitted has retired; matured and pending requests
        // alike can run now.
        let pending = self.deferred.drain_all();
        {
            let device = self.gpu.device();
            let mut allocator = self.gpu.allocator().lock();
            for op in pending {
                if let Err(err) = unsafe {
                    deferred::execute(device, &mut allocator, &mut self.pools, &mut self.store, op)
                } {
                    tracing::warn!("shutdown destruction failed: {err}");
                }
            }
        }
        self.destroy_live_resources();

        unsafe {
            self.pools.destroy(self.gpu.device());
            for frame in &mut self.frames {
                frame.destroy(self.gpu.device());
            }
            self.swapchain.destroy(self.gpu.device());
            self.surface.destroy();
        }
        tracing::debug!("graphics controller shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_scaling_applies_device_period() {
        // An RTX-class period of 1 ns passes ticks through unchanged.
        assert_eq!(scale_timestamps(&[100, 250], 1.0), vec![100, 250]);
        // A 52.08 ns period (older mobile parts) scales up.
        assert_eq!(scale_timestamps(&[2], 52.08), vec![104]);
        assert!(scale_timestamps(&[], 1.0).is_empty());
    }

    #[test]
    fn stencil_face_flags() {
        assert_eq!(StencilFace::Front.flags(), vk::StencilFaceFlags::FRONT);
        assert_eq!(StencilFace::Back.flags(), vk::StencilFaceFlags::BACK);
        assert_eq!(
            StencilFace::FrontAndBack.flags(),
            vk::StencilFaceFlags::FRONT_AND_BACK
        );
    }
}
