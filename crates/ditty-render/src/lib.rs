// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use std::{fmt, num::NonZeroIsize};

pub mod names;
pub mod sync;

pub use ditty_core::{config::default_clear, VsyncMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero extent; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub validation: bool,
}

/// Whether a `render` call put a frame on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing to present: zero-sized surface, or the swap chain went stale
    /// and was rebuilt instead.
    Skipped,
}

/// What the device initializer ended up with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterInfo {
    pub api: &'static str,
    pub name: String,
    pub version: String,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.api, self.version, self.name)
    }
}

/// The Win32 `HWND` behind a window, for the Direct3D backends.
pub fn win32_hwnd(window: &dyn HasWindowHandle) -> Result<NonZeroIsize> {
    match window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw() {
        RawWindowHandle::Win32(h) => Ok(h.hwnd),
        other => Err(anyhow!("expected a Win32 window handle, got {other:?}")),
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: &RenderOptions,
    ) -> Result<Self>
    where
        Self: Sized;

    fn adapter(&self) -> &AdapterInfo;
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, on: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extent_is_empty() {
        assert!(RenderSize::new(0, 480).is_empty());
        assert!(RenderSize::new(640, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }

    struct FakeWindow(RawWindowHandle);

    impl HasWindowHandle for FakeWindow {
        fn window_handle(
            &self,
        ) -> Result<raw_window_handle::WindowHandle<'_>, raw_window_handle::HandleError> {
            Ok(unsafe { raw_window_handle::WindowHandle::borrow_raw(self.0) })
        }
    }

    #[test]
    fn hwnd_from_win32_handle() {
        let hwnd = NonZeroIsize::new(0x1234).unwrap();
        let w = FakeWindow(RawWindowHandle::Win32(raw_window_handle::Win32WindowHandle::new(hwnd)));
        assert_eq!(win32_hwnd(&w).unwrap(), hwnd);
    }

    #[test]
    fn hwnd_rejects_other_platforms() {
        let xlib = raw_window_handle::XlibWindowHandle::new(42);
        let w = FakeWindow(RawWindowHandle::Xlib(xlib));
        assert!(win32_hwnd(&w).is_err());
    }

    #[test]
    fn adapter_info_display() {
        let info = AdapterInfo {
            api: "Vulkan",
            name: "llvmpipe".into(),
            version: "1.3.255".into(),
        };
        assert_eq!(info.to_string(), "Vulkan 1.3.255 on llvmpipe");
    }
}
