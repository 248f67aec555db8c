//! Deferred destruction.
//!
//! Destroying a resource the GPU may still be reading is a use-after-free,
//! so destruction requests are queued with the frame number they were made
//! in and executed only once that frame's fence has signalled. A destroyed
//! id stays valid in the store until its request matures, so uses recorded
//! earlier in the frame keep working.

use std::collections::VecDeque;

use crate::descriptors::DescriptorPools;
use crate::error::Result;
use crate::memory::{AllocatedBuffer, AllocatedImage, DeviceAllocator};
use crate::shader::destroy_shader;
use crate::store::{ResourceId, ResourceStore};

/// One queued destruction. Resource variants carry the id and erase the
/// record when they run; staging variants carry the orphaned allocation
/// directly, since it never had an id.
pub(crate) enum DestroyOp {
    Buffer(ResourceId),
    Image(ResourceId),
    Sampler(ResourceId),
    Shader(ResourceId),
    Pipeline(ResourceId),
    RenderPass(ResourceId),
    Framebuffer(ResourceId),
    UniformSet(ResourceId),
    StagingBuffer(AllocatedBuffer),
    StagingImage(AllocatedImage),
}

/// FIFO of destructions, oldest frame first.
#[derive(Default)]
pub(crate) struct DeferredQueue {
    pending: VecDeque<(u64, DestroyOp)>,
}

impl DeferredQueue {
    /// Queue `op` for destruction once `frame` has finished on the GPU.
    pub fn push(&mut self, frame: u64, op: DestroyOp) {
        self.pending.push_back((frame, op));
    }

    /// Pop every op queued in or before `finished_frame`.
    pub fn drain_completed(&mut self, finished_frame: u64) -> Vec<DestroyOp> {
        let mut matured = Vec::new();
        while let Some((frame, _)) = self.pending.front() {
            if *frame > finished_frame {
                break;
            }
            let (_, op) = self.pending.pop_front().expect("front was Some");
            matured.push(op);
        }
        matured
    }

    /// Pop everything; used at shutdown after a device-wide wait.
    pub fn drain_all(&mut self) -> Vec<DestroyOp> {
        self.pending.drain(..).map(|(_, op)| op).collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Execute one destruction now, erasing the record from the store.
///
/// # Safety
///
/// The GPU must no longer reference the resource.
pub(crate) unsafe fn execute(
    device: &ash::Device,
    allocator: &mut DeviceAllocator,
    pools: &mut DescriptorPools,
    store: &mut ResourceStore,
    op: DestroyOp,
) -> Result<()> {
    unsafe {
        match op {
            DestroyOp::Buffer(id) => {
                let mut record = store.buffers.remove(&id).expect("buffer already erased");
                allocator.free_buffer(&mut record.gpu)?;
            }
            DestroyOp::Image(id) => {
                let mut record = store.images.remove(&id).expect("image already erased");
                allocator.free_image(&mut record.gpu)?;
            }
            DestroyOp::Sampler(id) => {
                let record = store.samplers.remove(&id).expect("sampler already erased");
                device.destroy_sampler(record.sampler, None);
            }
            DestroyOp::Shader(id) => {
                let record = store.shaders.remove(&id).expect("shader already erased");
                destroy_shader(device, &record);
            }
            DestroyOp::Pipeline(id) => {
                let record = store.pipelines.remove(&id).expect("pipeline already erased");
                device.destroy_pipeline(record.pipeline, None);
            }
            DestroyOp::RenderPass(id) => {
                let record = store
                    .render_passes
                    .remove(&id)
                    .expect("render pass already erased");
                device.destroy_render_pass(record.render_pass, None);
            }
            DestroyOp::Framebuffer(id) => {
                let record = store
                    .framebuffers
                    .remove(&id)
                    .expect("framebuffer already erased");
                device.destroy_framebuffer(record.framebuffer, None);
                for view in record.views {
                    device.destroy_image_view(view, None);
                }
            }
            DestroyOp::UniformSet(id) => {
                let record = store
                    .uniform_sets
                    .remove(&id)
                    .expect("uniform set already erased");
                for view in record.owned_views {
                    device.destroy_image_view(view, None);
                }
                pools.free(
                    device,
                    &record.pool_signature,
                    record.pool_index,
                    record.descriptor_set,
                )?;
            }
            DestroyOp::StagingBuffer(mut buffer) => allocator.free_buffer(&mut buffer)?,
            DestroyOp::StagingImage(mut image) => allocator.free_image(&mut image)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> DestroyOp {
        DestroyOp::Sampler(ResourceId(1))
    }

    #[test]
    fn ops_mature_in_frame_order() {
        let mut queue = DeferredQueue::default();
        queue.push(1, op());
        queue.push(2, op());
        queue.push(2, op());
        queue.push(4, op());

        assert_eq!(queue.drain_completed(0).len(), 0);
        assert_eq!(queue.drain_completed(2).len(), 3);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_completed(4).len(), 1);
    }

    #[test]
    fn drain_all_empties_the_queue() {
        let mut queue = DeferredQueue::default();
        queue.push(7, op());
        queue.push(9, op());
        assert_eq!(queue.drain_all().len(), 2);
        assert_eq!(queue.len(), 0);
    }
}
