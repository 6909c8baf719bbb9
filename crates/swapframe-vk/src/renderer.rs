// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use swapframe_render::{RenderSize, Renderer, ResizeSignal, ShaderSource, WindowHost};
use tracing::{debug, info, warn};

use crate::commands::CommandRecorder;
use crate::device::DeviceContext;
use crate::error::{GraphicsError, Result, VkResultExt};
use crate::frame::{
    on_acquire, on_present, AcquireOutcome, FramePacer, FrameSlots, MAX_FRAMES_IN_FLIGHT,
};
use crate::geometry::{GeometryBuffer, TRIANGLE_PAIR};
use crate::lifecycle::{
    initial_drawable_size, rebuild, wait_for_drawable_size, RebuildCounts, RebuildSteps,
    SwapchainResources,
};
use crate::pipeline::ShaderCode;
use crate::swapchain::VsyncMode;

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub app_name: String,
    pub vsync_mode: VsyncMode,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            app_name: "swapframe".to_owned(),
            vsync_mode: VsyncMode::default(),
        }
    }
}

/// Draws the fixed triangle pair into a window, one frame per `render_tick`.
///
/// Fields drop top to bottom, which is the reverse of creation: sync objects,
/// command buffers, geometry, swapchain-derived state, then the device
/// context. The window goes last so the surface never outlives it.
pub struct VkRenderer<W>
where
    W: WindowHost + HasWindowHandle + HasDisplayHandle,
{
    frames: FrameSlots,
    pacer: FramePacer,
    recorder: CommandRecorder,
    geometry: GeometryBuffer,
    chain: SwapchainResources,
    shaders: ShaderCode,
    ctx: DeviceContext,
    resize: ResizeSignal,
    vsync: VsyncMode,
    window: W,
}

impl<W> VkRenderer<W>
where
    W: WindowHost + HasWindowHandle + HasDisplayHandle,
{
    pub fn new(mut window: W, shaders: &dyn ShaderSource, cfg: &RendererConfig) -> Result<Self> {
        let resize = ResizeSignal::new();
        window.set_resize_notifier(resize.notifier());

        let shaders = ShaderCode::from_source(shaders)?;
        let ctx = DeviceContext::new(&window, &cfg.app_name)?;
        let size = initial_drawable_size(&mut window)?;
        let chain = SwapchainResources::build(&ctx, size, cfg.vsync_mode, &shaders)?;
        let geometry = GeometryBuffer::new(&ctx, &TRIANGLE_PAIR)?;

        let mut recorder = CommandRecorder::new(&ctx)?;
        recorder.record(chain.targets(), chain.extent(), &geometry)?;
        let image_count = RebuildCounts::of(&chain, &recorder).check()?;

        let frames = FrameSlots::new(&ctx.device, MAX_FRAMES_IN_FLIGHT)?;
        let pacer = FramePacer::new(frames.len(), image_count);

        let extent = chain.extent();
        info!(
            "renderer ready ({}x{}, {} images, {} frames in flight)",
            extent.width,
            extent.height,
            image_count,
            frames.len()
        );

        Ok(VkRenderer {
            frames,
            pacer,
            recorder,
            geometry,
            chain,
            shaders,
            ctx,
            resize,
            vsync: cfg.vsync_mode,
            window,
        })
    }

    /// Rebuilds everything derived from the swapchain. Frame slots and the
    /// geometry buffer are left alone.
    fn recreate_swapchain(&mut self) -> Result<()> {
        if let Some(counts) = rebuild(self)? {
            let extent = self.chain.extent();
            info!(
                "swapchain recreated ({}x{}, {} images, {:?})",
                extent.width,
                extent.height,
                counts.images,
                self.chain.swapchain().present_mode()
            );
        }
        Ok(())
    }
}

impl<W> RebuildSteps for VkRenderer<W>
where
    W: WindowHost + HasWindowHandle + HasDisplayHandle,
{
    fn drawable_size(&mut self) -> Option<RenderSize> {
        wait_for_drawable_size(&mut self.window)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }

    fn release_commands(&mut self) {
        self.recorder.release();
    }

    fn release_swapchain(&mut self) {
        self.chain.release();
    }

    fn build_swapchain(&mut self, size: RenderSize) -> Result<()> {
        self.chain = SwapchainResources::build(&self.ctx, size, self.vsync, &self.shaders)?;
        Ok(())
    }

    fn record_commands(&mut self) -> Result<()> {
        self.recorder
            .record(self.chain.targets(), self.chain.extent(), &self.geometry)
    }

    fn counts(&self) -> RebuildCounts {
        RebuildCounts::of(&self.chain, &self.recorder)
    }

    fn reset_image_owners(&mut self, image_count: usize) {
        self.pacer.reset_images(image_count);
    }
}

impl<W> Renderer for VkRenderer<W>
where
    W: WindowHost + HasWindowHandle + HasDisplayHandle,
{
    type Error = GraphicsError;

    fn should_close(&self) -> bool {
        self.window.close_requested()
    }

    fn render_tick(&mut self) -> Result<()> {
        self.window.pump_events();

        let sync = self.frames.get(self.pacer.current());
        let device = &self.ctx.device;

        // Bounds the CPU to MAX_FRAMES_IN_FLIGHT frames ahead.
        unsafe { device.wait_for_fences(&[sync.in_flight], true, u64::MAX) }
            .context("vkWaitForFences")?;

        let acquired = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.chain.swapchain().handle,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match on_acquire(acquired)? {
            AcquireOutcome::Render(index) => index,
            AcquireOutcome::Rebuild => {
                debug!("acquire: swapchain out of date");
                // Nothing was signaled or reset, so the slot is still clean.
                self.pacer.finish_tick(&self.resize, true);
                return self.recreate_swapchain();
            }
        };
        let image = image_index as usize;

        // More images than slots: the image may still be in use by the
        // other slot's submission.
        if let Some(owner) = self.pacer.owner_of(image) {
            unsafe { device.wait_for_fences(&[owner], true, u64::MAX) }
                .context("vkWaitForFences")?;
        }
        self.pacer.claim(image, sync.in_flight);
        unsafe { device.reset_fences(&[sync.in_flight]) }.context("vkResetFences")?;

        // Counts are checked after every build, so this only fails on a driver
        // handing out an index past the image list.
        let cmd = self.recorder.buffer(image).ok_or(GraphicsError::Vulkan {
            op: "vkQueueSubmit",
            result: vk::Result::ERROR_UNKNOWN,
        })?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_finished,
            ..Default::default()
        };
        unsafe {
            device.queue_submit(
                self.ctx.graphics_queue,
                std::slice::from_ref(&submit),
                sync.in_flight,
            )
        }
        .context("vkQueueSubmit")?;

        let swapchain = self.chain.swapchain().handle;
        let present = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let stale = on_present(unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        })?;

        if self.pacer.finish_tick(&self.resize, stale) {
            debug!("present: stale={stale}, rebuilding");
            self.recreate_swapchain()?;
        }
        Ok(())
    }
}

impl<W> Drop for VkRenderer<W>
where
    W: WindowHost + HasWindowHandle + HasDisplayHandle,
{
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still uses it.
        if let Err(e) = self.ctx.wait_idle() {
            warn!("wait_idle before teardown failed: {e}");
        }
    }
}
