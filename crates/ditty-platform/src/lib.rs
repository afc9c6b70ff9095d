// SPDX-License-Identifier: CEPL-1.0
//! Window provider: winit re-export plus the few helpers the app needs.

pub use winit;

use anyhow::{anyhow, Result};
use ditty_core::WindowCfg;
use winit::{
    dpi::LogicalSize,
    raw_window_handle::{HasDisplayHandle, RawDisplayHandle},
    window::{Window, WindowAttributes},
};

pub fn window_attributes(cfg: &WindowCfg, backend: &str) -> WindowAttributes {
    Window::default_attributes()
        .with_title(format!("{} ({backend})", cfg.title))
        .with_inner_size(LogicalSize::new(cfg.width.max(1), cfg.height.max(1)))
}

/// Short name of the windowing system behind a display handle.
pub fn describe_display(raw: RawDisplayHandle) -> &'static str {
    match raw {
        RawDisplayHandle::Wayland(_) => "wayland",
        RawDisplayHandle::Xlib(_) => "xlib",
        RawDisplayHandle::Xcb(_) => "xcb",
        RawDisplayHandle::Windows(_) => "win32",
        RawDisplayHandle::AppKit(_) => "appkit",
        RawDisplayHandle::UiKit(_) => "uikit",
        RawDisplayHandle::Android(_) => "android",
        RawDisplayHandle::Web(_) => "web",
        _ => "other",
    }
}

/// Logs which windowing system we ended up on.
pub fn log_platform(window: &Window) -> Result<()> {
    let raw = window
        .display_handle()
        .map_err(|e| anyhow!("display_handle: {e}"))?
        .as_raw();
    let size = window.inner_size();
    tracing::info!(
        "window {}x{} on {} (scale {:.2})",
        size.width,
        size.height,
        describe_display(raw),
        window.scale_factor()
    );
    Ok(())
}
