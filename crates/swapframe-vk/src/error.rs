// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::HandleError;
use thiserror::Error;

/// Every failure the core surfaces. All of them are fatal: stale-swapchain
/// conditions are recovered internally and never reach the caller.
#[derive(Error, Debug)]
pub enum GraphicsError {
    #[error("no Vulkan-capable physical device found")]
    NoPhysicalDevice,

    #[error("no physical device supports the required device extensions")]
    NoSuitableDevice,

    #[error("selected device has no {0} queue family")]
    MissingQueueFamily(&'static str),

    #[error("requested validation layer {0} is not available")]
    MissingValidationLayer(String),

    #[error("no memory type in bits {type_bits:#b} provides {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("invalid SPIR-V for the {stage} stage: {source}")]
    InvalidShader {
        stage: &'static str,
        source: std::io::Error,
    },

    #[error("window closed before it had a drawable size")]
    ClosedBeforeDrawable,

    #[error(
        "swapchain rebuild out of step: {images} images, {framebuffers} framebuffers, {command_buffers} command buffers"
    )]
    ImageCountMismatch {
        images: usize,
        framebuffers: usize,
        command_buffers: usize,
    },

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] HandleError),

    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },
}

pub type Result<T> = std::result::Result<T, GraphicsError>;

/// Names the operation behind a raw `VkResult`.
pub(crate) trait VkResultExt<T> {
    fn context(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn context(self, op: &'static str) -> Result<T> {
        self.map_err(|result| GraphicsError::Vulkan { op, result })
    }
}
