// SPDX-License-Identifier: CEPL-1.0
//! Frame slots and the bookkeeping that ties swapchain images to the fence of
//! the slot that last rendered them.
use ash::prelude::VkResult;
use ash::vk;
use swapframe_render::ResizeSignal;

use crate::error::{GraphicsError, Result, VkResultExt};

/// Upper bound on frames the CPU may queue ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// The ring of per-slot sync objects. Lives for the whole renderer and is not
/// touched by swapchain recreation.
pub struct FrameSlots {
    device: ash::Device,
    slots: Vec<FrameSync>,
}

impl FrameSlots {
    pub fn new(device: &ash::Device, count: usize) -> Result<Self> {
        let mut this = FrameSlots {
            device: device.clone(),
            slots: Vec::with_capacity(count),
        };

        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on each slot returns immediately.
        let fence_ci = vk::FenceCreateInfo {
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..count {
            unsafe {
                let image_available = device
                    .create_semaphore(&sem_ci, None)
                    .context("vkCreateSemaphore")?;
                let render_finished = match device.create_semaphore(&sem_ci, None) {
                    Ok(s) => s,
                    Err(result) => {
                        device.destroy_semaphore(image_available, None);
                        return Err(GraphicsError::Vulkan {
                            op: "vkCreateSemaphore",
                            result,
                        });
                    }
                };
                let in_flight = match device.create_fence(&fence_ci, None) {
                    Ok(f) => f,
                    Err(result) => {
                        device.destroy_semaphore(image_available, None);
                        device.destroy_semaphore(render_finished, None);
                        return Err(GraphicsError::Vulkan {
                            op: "vkCreateFence",
                            result,
                        });
                    }
                };
                this.slots.push(FrameSync {
                    image_available,
                    render_finished,
                    in_flight,
                });
            }
        }
        Ok(this)
    }

    pub fn get(&self, slot: usize) -> FrameSync {
        self.slots[slot]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        unsafe {
            for s in self.slots.drain(..) {
                self.device.destroy_semaphore(s.image_available, None);
                self.device.destroy_semaphore(s.render_finished, None);
                self.device.destroy_fence(s.in_flight, None);
            }
        }
    }
}

/// Slot rotation plus the per-image fence table. Pure bookkeeping, no device
/// calls.
#[derive(Debug)]
pub struct FramePacer {
    current: usize,
    slot_count: usize,
    images_in_flight: Vec<vk::Fence>,
}

impl FramePacer {
    pub fn new(slot_count: usize, image_count: usize) -> Self {
        FramePacer {
            current: 0,
            slot_count: slot_count.max(1),
            images_in_flight: vec![vk::Fence::null(); image_count],
        }
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slot_count;
    }

    /// Fence of the slot that last submitted work for `image`, if any.
    pub fn owner_of(&self, image: usize) -> Option<vk::Fence> {
        self.images_in_flight
            .get(image)
            .copied()
            .filter(|f| *f != vk::Fence::null())
    }

    /// Records `fence` as the new owner of `image`.
    pub fn claim(&mut self, image: usize, fence: vk::Fence) {
        if let Some(entry) = self.images_in_flight.get_mut(image) {
            *entry = fence;
        }
    }

    /// Clears every owner and resizes the table for a rebuilt swapchain.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight
            .resize(image_count, vk::Fence::null());
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Closes a tick: advances the slot and consumes the resize flag. Returns
    /// whether the swapchain has to be rebuilt.
    pub fn finish_tick(&mut self, resize: &ResizeSignal, stale: bool) -> bool {
        self.advance();
        // Taken unconditionally so a stale present and a resize rebuild once.
        let resized = resize.take();
        stale || resized
    }
}

/// What a tick does with the result of `vkAcquireNextImageKHR`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Submit and present this image. Suboptimal acquires land here too;
    /// present reports them again.
    Render(u32),
    /// Out of date: rebuild without submitting.
    Rebuild,
}

pub fn on_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, _suboptimal)) => Ok(AcquireOutcome::Render(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Rebuild),
        Err(result) => Err(GraphicsError::Vulkan {
            op: "vkAcquireNextImageKHR",
            result,
        }),
    }
}

/// Whether a `vkQueuePresentKHR` result leaves the swapchain stale.
pub fn on_present(result: VkResult<bool>) -> Result<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(result) => Err(GraphicsError::Vulkan {
            op: "vkQueuePresentKHR",
            result,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::HashSet;

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    #[test]
    fn rotation_has_period_n() {
        let mut pacer = FramePacer::new(MAX_FRAMES_IN_FLIGHT, 3);
        let start = pacer.current();
        let mut seen = Vec::new();
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            seen.push(pacer.current());
            pacer.advance();
        }
        assert_eq!(pacer.current(), start);
        assert_eq!(seen, vec![0, 1]);

        for _ in 0..(MAX_FRAMES_IN_FLIGHT * 7) {
            pacer.advance();
        }
        assert_eq!(pacer.current(), start);
    }

    #[test]
    fn fresh_table_has_no_owners() {
        let pacer = FramePacer::new(2, 4);
        assert_eq!(pacer.image_count(), 4);
        assert!((0..4).all(|i| pacer.owner_of(i).is_none()));
        assert!(pacer.owner_of(10).is_none());
    }

    #[test]
    fn claim_records_slot_fence() {
        let mut pacer = FramePacer::new(2, 3);
        pacer.claim(1, fence(11));
        assert_eq!(pacer.owner_of(1), Some(fence(11)));

        pacer.claim(1, fence(22));
        assert_eq!(pacer.owner_of(1), Some(fence(22)));
        // Out-of-range claims are ignored.
        pacer.claim(9, fence(33));
        assert_eq!(pacer.image_count(), 3);
    }

    #[test]
    fn table_never_holds_more_than_n_fences() {
        let slot_fences = [fence(1), fence(2)];
        let image_count = 4;
        let mut pacer = FramePacer::new(slot_fences.len(), image_count);

        // Images come back in an order unrelated to slot order.
        for image in [0, 2, 3, 1, 1, 0, 3, 2, 2, 0] {
            let f = slot_fences[pacer.current()];
            pacer.claim(image, f);
            pacer.advance();

            let distinct: HashSet<u64> = (0..image_count)
                .filter_map(|i| pacer.owner_of(i))
                .map(|f| f.as_raw())
                .collect();
            assert!(distinct.len() <= MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn reset_clears_owners_and_resizes() {
        let mut pacer = FramePacer::new(2, 3);
        pacer.claim(0, fence(5));
        pacer.claim(2, fence(6));
        pacer.advance();

        pacer.reset_images(5);
        assert_eq!(pacer.image_count(), 5);
        assert!((0..5).all(|i| pacer.owner_of(i).is_none()));
        // Slot rotation survives a rebuild.
        assert_eq!(pacer.current(), 1);
    }

    #[test]
    fn rebuild_keeps_slot_fences_claimable() {
        let slot_fences = [fence(1), fence(2)];
        let mut pacer = FramePacer::new(slot_fences.len(), 2);
        pacer.claim(0, slot_fences[pacer.current()]);
        pacer.advance();

        pacer.reset_images(3);
        let slot = pacer.current();
        pacer.claim(2, slot_fences[slot]);
        assert_eq!(slot, 1);
        assert_eq!(pacer.owner_of(2), Some(fence(2)));
        assert!(pacer.owner_of(0).is_none());
    }

    #[test]
    fn acquired_images_are_rendered() {
        assert_eq!(on_acquire(Ok((2, false))).unwrap(), AcquireOutcome::Render(2));
        // Suboptimal acquires still use the image.
        assert_eq!(on_acquire(Ok((0, true))).unwrap(), AcquireOutcome::Render(0));
    }

    #[test]
    fn out_of_date_acquire_rebuilds() {
        assert_eq!(
            on_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::Rebuild
        );
    }

    #[test]
    fn other_acquire_errors_are_fatal() {
        match on_acquire(Err(vk::Result::ERROR_DEVICE_LOST)) {
            Err(GraphicsError::Vulkan { op, result }) => {
                assert_eq!(op, "vkAcquireNextImageKHR");
                assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(on_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn present_results_map_to_staleness() {
        assert!(!on_present(Ok(false)).unwrap());
        assert!(on_present(Ok(true)).unwrap());
        assert!(on_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        match on_present(Err(vk::Result::ERROR_DEVICE_LOST)) {
            Err(GraphicsError::Vulkan { op, .. }) => assert_eq!(op, "vkQueuePresentKHR"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn out_of_date_acquire_advances_and_consumes_resize() {
        let mut pacer = FramePacer::new(MAX_FRAMES_IN_FLIGHT, 3);
        let resize = ResizeSignal::new();
        resize.notifier().raise();

        let outcome = on_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
        assert_eq!(outcome, AcquireOutcome::Rebuild);
        assert!(pacer.finish_tick(&resize, true));
        assert_eq!(pacer.current(), 1);
        assert!(!resize.take());
    }

    #[test]
    fn stale_present_and_resize_rebuild_once() {
        let mut pacer = FramePacer::new(MAX_FRAMES_IN_FLIGHT, 3);
        let resize = ResizeSignal::new();
        resize.notifier().raise();

        let stale = on_present(Ok(true)).unwrap();
        assert!(pacer.finish_tick(&resize, stale));
        // The flag went with that rebuild, so the next clean tick does nothing.
        assert!(!pacer.finish_tick(&resize, false));
    }

    #[test]
    fn resize_flag_clears_on_every_completed_tick() {
        let mut pacer = FramePacer::new(MAX_FRAMES_IN_FLIGHT, 3);
        let resize = ResizeSignal::new();
        let notifier = resize.notifier();

        assert!(!pacer.finish_tick(&resize, false));

        notifier.raise();
        assert!(pacer.finish_tick(&resize, false));
        assert!(!resize.take());

        for _ in 0..4 {
            assert!(!pacer.finish_tick(&resize, false));
        }
        assert_eq!(pacer.current(), (1 + 1 + 4) % MAX_FRAMES_IN_FLIGHT);
    }
}
