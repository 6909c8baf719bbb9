// SPDX-License-Identifier: CEPL-1.0
//! Desktop window collaborator. The event loop is driven by pumping from the
//! render loop instead of handing control to `run_app`, so a tick stays a
//! plain blocking call on the caller's thread.
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use swapframe_render::{RenderSize, ResizeNotifier, WindowHost};
use tracing::{debug, info};

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    raw_window_handle::{
        DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
    },
    window::{Window, WindowAttributes, WindowId},
};

#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 800,
            height: 600,
            title: "vulkan-tutorial".to_owned(),
            resizable: true,
        }
    }
}

pub struct DesktopWindow {
    // Declared first: the window must drop before its event loop.
    state: WindowState,
    event_loop: EventLoop<()>,
}

struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    create_error: Option<String>,
    close_requested: bool,
    resize: Option<ResizeNotifier>,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                info!("window created ({}x{})", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => self.create_error = Some(e.to_string()),
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                debug!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(resize) = &self.resize {
                    resize.raise();
                }
            }
            _ => {}
        }
    }
}

impl DesktopWindow {
    pub fn new(cfg: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let attributes = Window::default_attributes()
            .with_title(cfg.title.clone())
            .with_inner_size(LogicalSize::new(f64::from(cfg.width), f64::from(cfg.height)))
            .with_resizable(cfg.resizable);

        let mut this = DesktopWindow {
            state: WindowState {
                attributes,
                window: None,
                create_error: None,
                close_requested: false,
                resize: None,
            },
            event_loop,
        };

        // Desktop backends deliver `resumed` on the first pump.
        while this.state.window.is_none() {
            if let PumpStatus::Exit(code) = this.pump(Some(Duration::ZERO)) {
                bail!("event loop exited with code {code} before the window was created");
            }
            if let Some(e) = this.state.create_error.take() {
                return Err(anyhow!("create_window: {e}"));
            }
        }
        Ok(this)
    }

    fn pump(&mut self, timeout: Option<Duration>) -> PumpStatus {
        self.event_loop.pump_app_events(timeout, &mut self.state)
    }
}

impl WindowHost for DesktopWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.state
            .window
            .as_ref()
            .map(|w| {
                let size = w.inner_size();
                RenderSize::new(size.width, size.height)
            })
            .unwrap_or_default()
    }

    fn pump_events(&mut self) {
        if let PumpStatus::Exit(_) = self.pump(Some(Duration::ZERO)) {
            self.state.close_requested = true;
        }
    }

    fn wait_events(&mut self) {
        if let PumpStatus::Exit(_) = self.pump(None) {
            self.state.close_requested = true;
        }
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }

    fn set_resize_notifier(&mut self, notifier: ResizeNotifier) {
        self.state.resize = Some(notifier);
    }
}

impl HasWindowHandle for DesktopWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for DesktopWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.event_loop.display_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_initial_window() {
        let cfg = WindowConfig::default();
        assert_eq!((cfg.width, cfg.height), (800, 600));
        assert!(cfg.resizable);
        assert_eq!(cfg.title, "vulkan-tutorial");
    }
}
