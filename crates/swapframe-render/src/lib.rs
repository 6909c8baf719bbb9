// SPDX-License-Identifier: CEPL-1.0
//! Contracts between a rendering core and the collaborators it does not own:
//! the window, the resize notification and the precompiled shader blobs.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use raw_window_handle;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero (minimized window).
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The window side of the renderer. Surface provisioning additionally needs
/// the `raw_window_handle` traits; they are bounded separately by the backend.
pub trait WindowHost {
    /// Current drawable size in physical pixels.
    fn framebuffer_size(&self) -> RenderSize;
    /// Processes pending events without blocking.
    fn pump_events(&mut self);
    /// Blocks until at least one event was processed.
    fn wait_events(&mut self);
    fn close_requested(&self) -> bool;
    /// Hands the window a raise-only handle to the renderer's resize flag.
    fn set_resize_notifier(&mut self, notifier: ResizeNotifier);
}

/// Opaque precompiled SPIR-V blobs for the two programmable stages.
pub trait ShaderSource {
    fn vertex_spirv(&self) -> &[u8];
    fn fragment_spirv(&self) -> &[u8];
}

/// Consumer end of the resize flag. Only the owner may clear it.
#[derive(Debug, Default)]
pub struct ResizeSignal {
    flag: Arc<AtomicBool>,
}

/// Producer end of the resize flag. Can only raise it.
#[derive(Clone, Debug)]
pub struct ResizeNotifier {
    flag: Arc<AtomicBool>,
}

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifier(&self) -> ResizeNotifier {
        ResizeNotifier {
            flag: Arc::clone(&self.flag),
        }
    }

    /// Returns whether the flag was raised since the last call, clearing it.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

impl ResizeNotifier {
    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

pub trait Renderer {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Forwards the window's close-request state.
    fn should_close(&self) -> bool;
    /// Runs one acquire/submit/present cycle, recreating the swapchain when needed.
    fn render_tick(&mut self) -> Result<(), Self::Error>;
}
