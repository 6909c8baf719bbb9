// SPDX-License-Identifier: CEPL-1.0
//! Surface queries, swapchain creation and one image view per image.
use ash::khr::swapchain;
use ash::vk;
use swapframe_render::RenderSize;
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::{GraphicsError, Result, VkResultExt};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VsyncMode {
    /// Strictly synchronized, always available.
    Fifo,
    /// Low-latency when offered, FIFO otherwise.
    #[default]
    Mailbox,
}

/// 8-bit BGRA sRGB if offered, else whatever the device lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: VsyncMode) -> vk::PresentModeKHR {
    match vsync {
        VsyncMode::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's current extent, unless it is the `u32::MAX` sentinel, in
/// which case the framebuffer size clamped into the supported bounds.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    // max/min rather than clamp: a driver reporting min > max must not panic.
    vk::Extent2D {
        width: framebuffer.width.max(min.width).min(max.width),
        height: framebuffer.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, capped by a nonzero maximum.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharingConfig {
    pub mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
}

impl SharingConfig {
    pub fn for_families(graphics: u32, present: u32) -> Self {
        if graphics != present {
            SharingConfig {
                mode: vk::SharingMode::CONCURRENT,
                queue_family_indices: vec![graphics, present],
            }
        } else {
            SharingConfig {
                mode: vk::SharingMode::EXCLUSIVE,
                queue_family_indices: Vec::new(),
            }
        }
    }
}

pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    pub(crate) handle: vk::SwapchainKHR,
    pub(crate) format: vk::Format,
    pub(crate) present_mode: vk::PresentModeKHR,
    pub(crate) extent: vk::Extent2D,
    pub(crate) images: Vec<vk::Image>,
    pub(crate) views: Vec<vk::ImageView>,
}

impl Swapchain {
    pub fn new(ctx: &DeviceContext, framebuffer: RenderSize, vsync: VsyncMode) -> Result<Self> {
        let surface_loader = ctx.surface_loader();
        let surface = ctx.surface();
        let (caps, formats, modes) = unsafe {
            (
                surface_loader
                    .get_physical_device_surface_capabilities(ctx.phys, surface)
                    .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                surface_loader
                    .get_physical_device_surface_formats(ctx.phys, surface)
                    .context("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                surface_loader
                    .get_physical_device_surface_present_modes(ctx.phys, surface)
                    .context("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            )
        };

        let surf_format = choose_surface_format(&formats).ok_or(GraphicsError::Vulkan {
            op: "vkGetPhysicalDeviceSurfaceFormatsKHR",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        let present_mode = choose_present_mode(&modes, vsync);
        let extent = choose_extent(&caps, framebuffer);
        let min_count = choose_image_count(&caps);
        let sharing = SharingConfig::for_families(ctx.families.graphics, ctx.families.present);

        let swap_info = vk::SwapchainCreateInfoKHR {
            surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing.mode,
            queue_family_index_count: sharing.queue_family_indices.len() as u32,
            p_queue_family_indices: sharing.queue_family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let handle = unsafe { ctx.swapchain_loader.create_swapchain(&swap_info, None) }
            .context("vkCreateSwapchainKHR")?;

        // Owned from here: an error below still destroys what exists.
        let mut this = Swapchain {
            device: ctx.device.clone(),
            loader: ctx.swapchain_loader.clone(),
            handle,
            format: surf_format.format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
        };

        // The requested count is only a hint.
        this.images = unsafe { this.loader.get_swapchain_images(handle) }
            .context("vkGetSwapchainImagesKHR")?;
        this.views.reserve(this.images.len());
        for &image in &this.images {
            let iv_info = vk::ImageViewCreateInfo {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: surf_format.format,
                components: vk::ComponentMapping::default(),
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { this.device.create_image_view(&iv_info, None) }
                .context("vkCreateImageView")?;
            this.views.push(view);
        }

        debug!(
            "sharing={:?} families={:?} images(min={} requested={} got={})",
            sharing.mode,
            sharing.queue_family_indices,
            caps.min_image_count,
            min_count,
            this.images.len()
        );
        info!(
            "swapchain: format={:?} / {:?}, present_mode={:?}, extent={}x{}, images={}",
            surf_format.format,
            surf_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            this.images.len()
        );
        Ok(this)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroys views then the swapchain. Safe to call more than once.
    pub fn release(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release();
    }
}
