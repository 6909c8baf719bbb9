// SPDX-License-Identifier: CEPL-1.0
//! Vulkan core that keeps a swapchain alive across resizes and minimizes and
//! draws a fixed pair of triangles into it, at most two frames in flight.
//!
//! Construction order is device context, swapchain and render targets,
//! geometry buffer, command buffers, frame slots. Teardown is the reverse and
//! happens on drop.

mod commands;
mod device;
mod error;
mod frame;
mod geometry;
mod instance;
mod lifecycle;
mod pipeline;
mod renderer;
mod swapchain;

pub use commands::{CommandRecorder, CLEAR_COLOR};
pub use device::{supports_extensions, DeviceContext, QueueFamilies, QueueFamilyIndices, DEVICE_EXTENSIONS};
pub use error::{GraphicsError, Result};
pub use frame::{
    on_acquire, on_present, AcquireOutcome, FramePacer, FrameSlots, FrameSync, MAX_FRAMES_IN_FLIGHT,
};
pub use geometry::{find_memory_type, GeometryBuffer, Vertex, TRIANGLE_PAIR};
pub use instance::{
    application_name, find_missing_layer, require_layers, ENABLE_VALIDATION, VALIDATION_LAYERS,
};
pub use lifecycle::{initial_drawable_size, wait_for_drawable_size, RebuildCounts, SwapchainResources};
pub use pipeline::{RenderTargets, ShaderCode};
pub use renderer::{RendererConfig, VkRenderer};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, SharingConfig,
    Swapchain, VsyncMode,
};
