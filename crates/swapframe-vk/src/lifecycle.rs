// SPDX-License-Identifier: CEPL-1.0
//! Swapchain-derived state as one releasable unit, and the minimize wait that
//! precedes rebuilding it.
use ash::vk;
use swapframe_render::{RenderSize, WindowHost};
use tracing::debug;

use crate::commands::CommandRecorder;
use crate::device::DeviceContext;
use crate::error::{GraphicsError, Result};
use crate::pipeline::{RenderTargets, ShaderCode};
use crate::swapchain::{Swapchain, VsyncMode};

/// Everything rebuilt on recreation. Field order is teardown order: targets
/// reference the swapchain's views.
pub struct SwapchainResources {
    targets: RenderTargets,
    swapchain: Swapchain,
}

impl SwapchainResources {
    pub fn build(
        ctx: &DeviceContext,
        size: RenderSize,
        vsync: VsyncMode,
        shaders: &ShaderCode,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(ctx, size, vsync)?;
        let targets = RenderTargets::new(&ctx.device, &swapchain, shaders)?;
        Ok(SwapchainResources { targets, swapchain })
    }

    /// Render targets first, then views and swapchain.
    pub fn release(&mut self) {
        self.targets.release();
        self.swapchain.release();
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }
}

/// Per-image object counts after a build. Every image needs exactly one
/// framebuffer and one recorded command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebuildCounts {
    pub images: usize,
    pub framebuffers: usize,
    pub command_buffers: usize,
}

impl RebuildCounts {
    pub fn of(chain: &SwapchainResources, recorder: &CommandRecorder) -> Self {
        RebuildCounts {
            images: chain.image_count(),
            framebuffers: chain.targets().framebuffer_count(),
            command_buffers: recorder.len(),
        }
    }

    /// The image count, if all three agree.
    pub fn check(self) -> Result<usize> {
        if self.images == self.framebuffers && self.images == self.command_buffers {
            Ok(self.images)
        } else {
            Err(GraphicsError::ImageCountMismatch {
                images: self.images,
                framebuffers: self.framebuffers,
                command_buffers: self.command_buffers,
            })
        }
    }
}

/// The individual steps of a swapchain rebuild. [`rebuild`] fixes their
/// order; the renderer supplies them over real handles.
pub(crate) trait RebuildSteps {
    fn drawable_size(&mut self) -> Option<RenderSize>;
    fn wait_idle(&mut self) -> Result<()>;
    fn release_commands(&mut self);
    fn release_swapchain(&mut self);
    fn build_swapchain(&mut self, size: RenderSize) -> Result<()>;
    fn record_commands(&mut self) -> Result<()>;
    fn counts(&self) -> RebuildCounts;
    fn reset_image_owners(&mut self, image_count: usize);
}

/// Tears down and rebuilds the swapchain-derived state. Returns `None` when
/// the window closed while minimized and nothing was touched.
pub(crate) fn rebuild<S: RebuildSteps + ?Sized>(steps: &mut S) -> Result<Option<RebuildCounts>> {
    let Some(size) = steps.drawable_size() else {
        debug!("close requested while minimized, skipping recreation");
        return Ok(None);
    };
    steps.wait_idle()?;

    // STRICT ORDER: command buffers reference the framebuffers and pipeline.
    steps.release_commands();
    steps.release_swapchain();

    steps.build_swapchain(size)?;
    steps.record_commands()?;
    let counts = steps.counts();
    steps.reset_image_owners(counts.check()?);
    Ok(Some(counts))
}

/// Size for the first swapchain. Waits out a window that starts minimized.
pub fn initial_drawable_size<W: WindowHost + ?Sized>(window: &mut W) -> Result<RenderSize> {
    wait_for_drawable_size(window).ok_or(GraphicsError::ClosedBeforeDrawable)
}

/// Blocks on window events while the framebuffer is zero-sized. Returns
/// `None` if the window asks to close meanwhile.
pub fn wait_for_drawable_size<W: WindowHost + ?Sized>(window: &mut W) -> Option<RenderSize> {
    let mut size = window.framebuffer_size();
    if size.is_empty() {
        debug!("framebuffer is {}x{}, waiting", size.width, size.height);
    }
    while size.is_empty() {
        if window.close_requested() {
            return None;
        }
        window.wait_events();
        size = window.framebuffer_size();
    }
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePacer;
    use ash::vk::Handle;
    use std::collections::VecDeque;
    use swapframe_render::ResizeNotifier;

    /// Replays a scripted sequence of sizes, one per processed event batch.
    struct ScriptedWindow {
        size: RenderSize,
        upcoming: VecDeque<RenderSize>,
        waits: usize,
        close_after: Option<usize>,
    }

    impl ScriptedWindow {
        fn new(sizes: &[(u32, u32)]) -> Self {
            let mut upcoming: VecDeque<RenderSize> =
                sizes.iter().map(|&(w, h)| RenderSize::new(w, h)).collect();
            let size = upcoming.pop_front().unwrap_or_default();
            ScriptedWindow {
                size,
                upcoming,
                waits: 0,
                close_after: None,
            }
        }
    }

    impl WindowHost for ScriptedWindow {
        fn framebuffer_size(&self) -> RenderSize {
            self.size
        }
        fn pump_events(&mut self) {}
        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(next) = self.upcoming.pop_front() {
                self.size = next;
            }
        }
        fn close_requested(&self) -> bool {
            self.close_after.is_some_and(|n| self.waits >= n)
        }
        fn set_resize_notifier(&mut self, _notifier: ResizeNotifier) {}
    }

    #[test]
    fn minimized_window_blocks_until_nonzero() {
        let mut window = ScriptedWindow::new(&[(0, 0), (0, 0), (400, 300)]);
        assert_eq!(
            wait_for_drawable_size(&mut window),
            Some(RenderSize::new(400, 300))
        );
        assert_eq!(window.waits, 2);
    }

    #[test]
    fn visible_window_does_not_wait() {
        let mut window = ScriptedWindow::new(&[(800, 600)]);
        assert_eq!(
            wait_for_drawable_size(&mut window),
            Some(RenderSize::new(800, 600))
        );
        assert_eq!(window.waits, 0);
    }

    #[test]
    fn one_zero_dimension_still_waits() {
        let mut window = ScriptedWindow::new(&[(1024, 0), (1024, 768)]);
        assert_eq!(
            wait_for_drawable_size(&mut window),
            Some(RenderSize::new(1024, 768))
        );
        assert_eq!(window.waits, 1);
    }

    #[test]
    fn close_while_minimized_gives_up() {
        let mut window = ScriptedWindow::new(&[(0, 0), (0, 0), (0, 0), (640, 480)]);
        window.close_after = Some(1);
        assert_eq!(wait_for_drawable_size(&mut window), None);
        assert_eq!(window.waits, 1);
    }

    #[test]
    fn startup_waits_for_a_drawable_window() {
        let mut window = ScriptedWindow::new(&[(0, 0), (800, 600)]);
        assert_eq!(
            initial_drawable_size(&mut window).unwrap(),
            RenderSize::new(800, 600)
        );
        assert_eq!(window.waits, 1);
    }

    #[test]
    fn startup_close_while_minimized_is_an_error() {
        let mut window = ScriptedWindow::new(&[(0, 0), (0, 0)]);
        window.close_after = Some(1);
        assert!(matches!(
            initial_drawable_size(&mut window),
            Err(GraphicsError::ClosedBeforeDrawable)
        ));
    }

    #[test]
    fn counts_must_agree() {
        let ok = RebuildCounts {
            images: 3,
            framebuffers: 3,
            command_buffers: 3,
        };
        assert_eq!(ok.check().unwrap(), 3);

        let short = RebuildCounts {
            command_buffers: 2,
            ..ok
        };
        assert!(matches!(
            short.check(),
            Err(GraphicsError::ImageCountMismatch {
                images: 3,
                framebuffers: 3,
                command_buffers: 2
            })
        ));
        assert!(RebuildCounts { framebuffers: 4, ..ok }.check().is_err());
    }

    /// Stands in for the renderer: handles are plain counters, and every step
    /// is logged.
    struct FakeRenderer {
        window: ScriptedWindow,
        log: Vec<&'static str>,
        next_handle: u64,
        next_image_count: usize,
        drop_one_command_buffer: bool,
        swapchain: Option<u64>,
        framebuffers: Vec<u64>,
        command_buffers: Vec<u64>,
        geometry: u64,
        slot_fences: Vec<vk::Fence>,
        pacer: FramePacer,
    }

    impl FakeRenderer {
        fn new(window: ScriptedWindow, image_count: usize) -> Self {
            let mut this = FakeRenderer {
                window,
                log: Vec::new(),
                next_handle: 100,
                next_image_count: image_count,
                drop_one_command_buffer: false,
                swapchain: None,
                framebuffers: Vec::new(),
                command_buffers: Vec::new(),
                geometry: 7,
                slot_fences: vec![vk::Fence::from_raw(1), vk::Fence::from_raw(2)],
                pacer: FramePacer::new(2, image_count),
            };
            this.build_swapchain(RenderSize::new(800, 600)).unwrap();
            this.record_commands().unwrap();
            this.log.clear();
            this
        }

        fn handle(&mut self) -> u64 {
            self.next_handle += 1;
            self.next_handle
        }
    }

    impl RebuildSteps for FakeRenderer {
        fn drawable_size(&mut self) -> Option<RenderSize> {
            wait_for_drawable_size(&mut self.window)
        }
        fn wait_idle(&mut self) -> Result<()> {
            self.log.push("wait_idle");
            Ok(())
        }
        fn release_commands(&mut self) {
            self.log.push("release_commands");
            self.command_buffers.clear();
        }
        fn release_swapchain(&mut self) {
            self.log.push("release_swapchain");
            assert!(self.command_buffers.is_empty(), "framebuffers freed under live commands");
            self.framebuffers.clear();
            self.swapchain = None;
        }
        fn build_swapchain(&mut self, _size: RenderSize) -> Result<()> {
            self.log.push("build_swapchain");
            self.swapchain = Some(self.handle());
            let framebuffers = (0..self.next_image_count).map(|_| self.handle()).collect();
            self.framebuffers = framebuffers;
            Ok(())
        }
        fn record_commands(&mut self) -> Result<()> {
            self.log.push("record_commands");
            let mut n = self.framebuffers.len();
            if self.drop_one_command_buffer {
                n -= 1;
            }
            let command_buffers = (0..n).map(|_| self.handle()).collect();
            self.command_buffers = command_buffers;
            Ok(())
        }
        fn counts(&self) -> RebuildCounts {
            RebuildCounts {
                images: self.next_image_count,
                framebuffers: self.framebuffers.len(),
                command_buffers: self.command_buffers.len(),
            }
        }
        fn reset_image_owners(&mut self, image_count: usize) {
            self.log.push("reset_image_owners");
            self.pacer.reset_images(image_count);
        }
    }

    #[test]
    fn rebuild_runs_steps_in_teardown_order() {
        let mut r = FakeRenderer::new(ScriptedWindow::new(&[(800, 600)]), 3);
        rebuild(&mut r).unwrap();
        assert_eq!(
            r.log,
            [
                "wait_idle",
                "release_commands",
                "release_swapchain",
                "build_swapchain",
                "record_commands",
                "reset_image_owners",
            ]
        );
    }

    #[test]
    fn rebuild_replaces_only_swapchain_derived_handles() {
        let mut r = FakeRenderer::new(ScriptedWindow::new(&[(800, 600)]), 3);
        r.pacer.claim(1, r.slot_fences[0]);
        r.pacer.advance();
        let old_swapchain = r.swapchain;
        let old_framebuffers = r.framebuffers.clone();
        let old_commands = r.command_buffers.clone();
        let slot_fences = r.slot_fences.clone();

        r.next_image_count = 4;
        let counts = rebuild(&mut r).unwrap().unwrap();

        assert_eq!(
            counts,
            RebuildCounts {
                images: 4,
                framebuffers: 4,
                command_buffers: 4
            }
        );
        assert_ne!(r.swapchain, old_swapchain);
        assert!(r.framebuffers.iter().all(|f| !old_framebuffers.contains(f)));
        assert!(r.command_buffers.iter().all(|c| !old_commands.contains(c)));

        assert_eq!(r.geometry, 7);
        assert_eq!(r.slot_fences, slot_fences);
        assert_eq!(r.pacer.current(), 1);
        assert_eq!(r.pacer.image_count(), 4);
        assert!((0..4).all(|i| r.pacer.owner_of(i).is_none()));
    }

    #[test]
    fn mismatched_rebuild_is_rejected_before_reuse() {
        let mut r = FakeRenderer::new(ScriptedWindow::new(&[(800, 600)]), 3);
        r.pacer.claim(0, r.slot_fences[0]);
        r.drop_one_command_buffer = true;

        assert!(matches!(
            rebuild(&mut r),
            Err(GraphicsError::ImageCountMismatch { .. })
        ));
        assert!(!r.log.contains(&"reset_image_owners"));
    }

    #[test]
    fn rebuild_waits_out_a_minimize() {
        let mut r = FakeRenderer::new(ScriptedWindow::new(&[(0, 0), (640, 480)]), 2);
        assert!(rebuild(&mut r).unwrap().is_some());
        assert_eq!(r.window.waits, 1);
    }

    #[test]
    fn close_while_minimized_skips_rebuild() {
        let mut r = FakeRenderer::new(ScriptedWindow::new(&[(0, 0), (0, 0)]), 2);
        r.window.close_after = Some(1);
        let swapchain = r.swapchain;

        assert_eq!(rebuild(&mut r).unwrap(), None);
        assert!(r.log.is_empty());
        assert_eq!(r.swapchain, swapchain);
    }
}
