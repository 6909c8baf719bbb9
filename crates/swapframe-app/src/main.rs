// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use swapframe_core::init_tracing;
use swapframe_platform::{DesktopWindow, WindowConfig};
use swapframe_render::{Renderer, ShaderSource};
use swapframe_vk::{GraphicsError, RendererConfig, VkRenderer, VsyncMode};
use tracing::{info, warn};

static VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv"));
static FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv"));

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing is fine
    #[arg(long, default_value = "swapframe.toml")]
    config: PathBuf,
    /// Initial window width, overrides the config
    #[arg(long)]
    width: Option<u32>,
    /// Initial window height, overrides the config
    #[arg(long)]
    height: Option<u32>,
    /// Always present with FIFO
    #[arg(long)]
    fifo: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
struct WindowCfg {
    width: u32,
    height: u32,
    title: String,
    resizable: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
struct RenderCfg {
    vsync_mode: VsyncModeCfg,
    log_fps: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum VsyncModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let d = WindowConfig::default();
        WindowCfg {
            width: d.width,
            height: d.height,
            title: d.title,
            resizable: d.resizable,
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            vsync_mode: VsyncModeCfg::Mailbox,
            log_fps: true,
        }
    }
}

impl From<VsyncModeCfg> for VsyncMode {
    fn from(mode: VsyncModeCfg) -> Self {
        match mode {
            VsyncModeCfg::Fifo => VsyncMode::Fifo,
            VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
        }
    }
}

impl AppCfg {
    /// Command-line flags win over the file.
    fn apply_args(&mut self, args: &Args) {
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if args.fifo {
            self.render.vsync_mode = VsyncModeCfg::Fifo;
        }
    }

    fn window_config(&self) -> WindowConfig {
        WindowConfig {
            width: self.window.width,
            height: self.window.height,
            title: self.window.title.clone(),
            resizable: self.window.resizable,
        }
    }

    fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            app_name: self.window.title.clone(),
            vsync_mode: self.render.vsync_mode.into(),
        }
    }
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// SPIR-V compiled from shaders/ by the build script.
struct EmbeddedShaders;

impl ShaderSource for EmbeddedShaders {
    fn vertex_spirv(&self) -> &[u8] {
        VERT_SPV
    }

    fn fragment_spirv(&self) -> &[u8] {
        FRAG_SPV
    }
}

struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        FpsCounter { frames: 0, since: now }
    }

    /// Counts one frame; yields the count once a second has passed.
    fn frame(&mut self, now: Instant) -> Option<u32> {
        self.frames = self.frames.saturating_add(1);
        if now.duration_since(self.since) < Duration::from_secs(1) {
            return None;
        }
        let n = self.frames;
        self.frames = 0;
        self.since = now;
        Some(n)
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);
    info!(
        "window {}x{}, vsync_mode={:?}",
        cfg.window.width, cfg.window.height, cfg.render.vsync_mode
    );

    let window = DesktopWindow::new(&cfg.window_config())?;
    let mut renderer = match VkRenderer::new(window, &EmbeddedShaders, &cfg.renderer_config()) {
        Ok(r) => r,
        Err(GraphicsError::ClosedBeforeDrawable) => {
            info!("window closed before its first frame");
            return Ok(());
        }
        Err(e) => return Err(e).context("vulkan init"),
    };

    let mut fps = FpsCounter::new(Instant::now());
    while !renderer.should_close() {
        renderer.render_tick()?;
        if cfg.render.log_fps {
            if let Some(n) = fps.frame(Instant::now()) {
                info!("fps ~ {n}");
            }
        }
    }

    info!("close requested, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg.window, WindowCfg::default());
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert_eq!(cfg.render.vsync_mode, VsyncModeCfg::Mailbox);
        assert!(cfg.render.log_fps);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [window]
            width = 1280

            [render]
            vsync_mode = "fifo"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.window.title, "vulkan-tutorial");
        assert_eq!(cfg.render.vsync_mode, VsyncModeCfg::Fifo);
        assert!(cfg.render.log_fps);
    }

    #[test]
    fn unknown_vsync_mode_is_rejected() {
        let res = toml::from_str::<AppCfg>("[render]\nvsync_mode = \"immediate\"\n");
        assert!(res.is_err());
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = load_cfg(Path::new("definitely/not/here/swapframe.toml"));
        assert_eq!(cfg.window, WindowCfg::default());
    }

    #[test]
    fn malformed_file_falls_back() {
        let path = std::env::temp_dir().join(format!("swapframe-bad-{}.toml", std::process::id()));
        fs::write(&path, "[window\nwidth = ").unwrap();
        let cfg = load_cfg(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(cfg.window, WindowCfg::default());
        assert_eq!(cfg.render.vsync_mode, VsyncModeCfg::Mailbox);
    }

    #[test]
    fn flags_override_file() {
        let mut cfg: AppCfg = toml::from_str("[window]\nwidth = 1024\nheight = 768\n").unwrap();
        let args = Args::parse_from(["swapframe", "--height", "480", "--fifo"]);
        cfg.apply_args(&args);

        assert_eq!((cfg.window.width, cfg.window.height), (1024, 480));
        let rc = cfg.renderer_config();
        assert_eq!(rc.vsync_mode, VsyncMode::Fifo);
        assert_eq!(rc.app_name, "vulkan-tutorial");
        assert_eq!(args.config, PathBuf::from("swapframe.toml"));
    }

    #[test]
    fn fps_counter_reports_once_per_second() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new(t0);
        assert_eq!(fps.frame(t0 + Duration::from_millis(300)), None);
        assert_eq!(fps.frame(t0 + Duration::from_millis(700)), None);
        assert_eq!(fps.frame(t0 + Duration::from_millis(1000)), Some(3));
        assert_eq!(fps.frame(t0 + Duration::from_millis(1500)), None);
    }

    #[test]
    fn embedded_shaders_are_spirv() {
        let magic = [0x03, 0x02, 0x23, 0x07];
        assert_eq!(&EmbeddedShaders.vertex_spirv()[..4], &magic);
        assert_eq!(&EmbeddedShaders.fragment_spirv()[..4], &magic);
    }
}
