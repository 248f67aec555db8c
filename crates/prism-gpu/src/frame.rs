//! Per-frame resources.
//!
//! The scheduler runs a small fixed ring of frames. Each frame owns its
//! command pool, a setup buffer for barriers and transfers that must land
//! before the draws, a draw buffer, the sync objects tying it to the
//! swapchain, and a timestamp query pool.

use ash::vk;

use crate::error::Result;

/// Frames recorded ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Timestamp queries available per frame.
pub const MAX_TIMESTAMP_QUERIES: u32 = 64;

pub(crate) struct Frame {
    pub command_pool: vk::CommandPool,
    /// Recorded first; carries barriers and staging copies.
    pub setup_buffer: vk::CommandBuffer,
    pub draw_buffer: vk::CommandBuffer,
    /// Signalled when this frame's submission retires.
    pub in_flight: vk::Fence,
    pub image_available: vk::Semaphore,
    pub draw_complete: vk::Semaphore,
    pub query_pool: vk::QueryPool,
    pub timestamps_written: u32,
    /// Frame number of the last submission through this slot.
    pub submitted_frame: u64,
}

impl Frame {
    /// # Safety
    ///
    /// `device` must be valid and support Vulkan 1.2 host query reset.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queue_family);
            let command_pool = device.create_command_pool(&pool_info, None)?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(2);
            let buffers = device.allocate_command_buffers(&alloc_info)?;

            // Signalled so the first wait on this slot returns immediately.
            let fence_info =
                vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            let in_flight = device.create_fence(&fence_info, None)?;

            let semaphore_info = vk::SemaphoreCreateInfo::default();
            let image_available = device.create_semaphore(&semaphore_info, None)?;
            let draw_complete = device.create_semaphore(&semaphore_info, None)?;

            let query_info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::TIMESTAMP)
                .query_count(MAX_TIMESTAMP_QUERIES);
            let query_pool = device.create_query_pool(&query_info, None)?;
            // Queries start undefined; host reset puts them in a known state.
            device.reset_query_pool(query_pool, 0, MAX_TIMESTAMP_QUERIES);

            Ok(Self {
                command_pool,
                setup_buffer: buffers[0],
                draw_buffer: buffers[1],
                in_flight,
                image_available,
                draw_complete,
                query_pool,
                timestamps_written: 0,
                submitted_frame: 0,
            })
        }
    }

    /// Read back the written timestamps without waiting.
    ///
    /// Returns `None` when results are not yet available.
    ///
    /// # Safety
    ///
    /// The pool's writes must have been submitted.
    pub unsafe fn harvest_timestamps(&self, device: &ash::Device) -> Result<Option<Vec<u64>>> {
        if self.timestamps_written == 0 {
            return Ok(Some(Vec::new()));
        }
        let mut raw = vec![0u64; self.timestamps_written as usize];
        let result = unsafe {
            device.get_query_pool_results(
                self.query_pool,
                0,
                &mut raw,
                vk::QueryResultFlags::TYPE_64,
            )
        };
        match result {
            Ok(()) => Ok(Some(raw)),
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// # Safety
    ///
    /// The GPU must be done with this frame's submission.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_query_pool(self.query_pool, None);
            device.destroy_semaphore(self.draw_complete, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
