// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::DeviceContext;
use crate::error::{Result, VkResultExt};
use crate::geometry::GeometryBuffer;
use crate::pipeline::RenderTargets;

/// Opaque black.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// One pre-recorded command buffer per framebuffer, re-recorded wholesale on
/// every swapchain rebuild.
pub struct CommandRecorder {
    device: ash::Device,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandRecorder {
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            queue_family_index: ctx.families.graphics,
            ..Default::default()
        };
        let pool = unsafe { ctx.device.create_command_pool(&pool_info, None) }
            .context("vkCreateCommandPool")?;
        Ok(CommandRecorder {
            device: ctx.device.clone(),
            pool,
            buffers: Vec::new(),
        })
    }

    /// Frees any previous buffers, then allocates and records one per
    /// framebuffer of `targets`.
    pub fn record(
        &mut self,
        targets: &RenderTargets,
        extent: vk::Extent2D,
        geometry: &GeometryBuffer,
    ) -> Result<()> {
        self.release();

        let alloc_info = vk::CommandBufferAllocateInfo {
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: targets.framebuffers.len() as u32,
            ..Default::default()
        };
        self.buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("vkAllocateCommandBuffers")?;

        let clears = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        }];
        let d = &self.device;
        for (&cmd, &framebuffer) in self.buffers.iter().zip(&targets.framebuffers) {
            unsafe {
                let begin = vk::CommandBufferBeginInfo::default();
                d.begin_command_buffer(cmd, &begin)
                    .context("vkBeginCommandBuffer")?;

                let rp_begin = vk::RenderPassBeginInfo {
                    render_pass: targets.render_pass,
                    framebuffer,
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    },
                    clear_value_count: clears.len() as u32,
                    p_clear_values: clears.as_ptr(),
                    ..Default::default()
                };
                d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, targets.pipeline);
                d.cmd_bind_vertex_buffers(cmd, 0, &[geometry.buffer], &[0]);
                d.cmd_draw(cmd, geometry.vertex_count(), 1, 0, 0);
                d.cmd_end_render_pass(cmd);

                d.end_command_buffer(cmd).context("vkEndCommandBuffer")?;
            }
        }
        Ok(())
    }

    pub fn buffer(&self, image_index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index).copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Returns the recorded buffers to the pool; the pool itself stays.
    pub fn release(&mut self) {
        if !self.buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.pool, &self.buffers) };
            self.buffers.clear();
        }
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        self.release();
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}
