// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ditty_render::{default_clear, AdapterInfo, FrameStatus, RenderOptions, RenderSize, Renderer};
use glow::HasContext as _;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use tracing::{info, warn};

use glutin::{
    config::{Config, ConfigTemplateBuilder},
    context::{
        ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentContext,
        PossiblyCurrentContext, Version,
    },
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};

use std::num::NonZeroU32;

/// Core-profile versions to try, newest first. 4.1 is the newest macOS
/// ships; 3.3 covers VMs and software rasterizers.
const CONTEXT_VERSIONS: [Version; 2] = [
    Version { major: 4, minor: 1 },
    Version { major: 3, minor: 3 },
];

pub fn context_versions() -> &'static [Version] {
    &CONTEXT_VERSIONS
}

pub struct GlRenderer {
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    gl: glow::Context,
    size: RenderSize,
    clear: [f32; 4],
    vsync: bool,
    adapter: AdapterInfo,
}

fn nz(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v).unwrap_or(NonZeroU32::MIN)
}

fn swap_interval(vsync: bool) -> SwapInterval {
    if vsync {
        SwapInterval::Wait(NonZeroU32::MIN)
    } else {
        SwapInterval::DontWait
    }
}

/// Which platform GL API glutin should open. EGL is tried first where it
/// exists; Windows falls back to WGL and X11 to GLX. macOS only has CGL.
#[cfg(windows)]
fn display_preference(window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::EglThenWgl(Some(window))
}

#[cfg(target_os = "macos")]
fn display_preference(_window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::Cgl
}

#[cfg(all(unix, not(target_vendor = "apple"), not(target_os = "android")))]
fn display_preference(_window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::EglThenGlx(Box::new(winit::platform::x11::register_xlib_error_hook))
}

#[cfg(target_os = "android")]
fn display_preference(_window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::Egl
}

/// Calls `create` for each version in order and returns the first success.
/// Every failure is logged; if none succeed the last error is returned.
fn try_versions<T, E>(
    versions: &[Version],
    mut create: impl FnMut(Version) -> Result<T, E>,
) -> Result<(T, Version)>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let mut last_err = None;
    for &version in versions {
        match create(version) {
            Ok(v) => return Ok((v, version)),
            Err(e) => {
                warn!(
                    "GL {}.{} core context unavailable: {e}",
                    version.major, version.minor
                );
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) => anyhow::Error::new(e).context("create_context"),
        None => anyhow!("create_context: no versions to try"),
    })
}

/// Creates a core-profile context, falling back through `CONTEXT_VERSIONS`.
fn create_context(
    display: &Display,
    config: &Config,
    window_handle: RawWindowHandle,
) -> Result<(NotCurrentContext, Version)> {
    try_versions(context_versions(), |version| {
        let attrs = ContextAttributesBuilder::new()
            .with_profile(GlProfile::Core)
            .with_context_api(ContextApi::OpenGl(Some(version)))
            .build(Some(window_handle));
        unsafe { display.create_context(config, &attrs) }
    })
}

impl GlRenderer {
    fn make_current(
        display: &Display,
        window_handle: RawWindowHandle,
        size: RenderSize,
    ) -> Result<(PossiblyCurrentContext, Surface<WindowSurface>, glow::Context)> {
        let template = ConfigTemplateBuilder::new()
            .compatible_with_native_window(window_handle)
            .build();
        let mut configs = unsafe { display.find_configs(template) }.context("find_configs")?;
        let config = configs.next().ok_or_else(|| anyhow!("no GL configs"))?;

        let sattrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
            window_handle,
            nz(size.width),
            nz(size.height),
        );
        let surface = unsafe { display.create_window_surface(&config, &sattrs) }
            .context("create_window_surface")?;

        let (not_current, version) = create_context(display, &config, window_handle)?;
        info!("GL context {}.{} core", version.major, version.minor);

        let context = not_current.make_current(&surface).context("make_current")?;

        let gl = unsafe {
            glow::Context::from_loader_function_cstr(|s| display.get_proc_address(s) as *const _)
        };

        Ok((context, surface, gl))
    }

    fn apply_vsync(&self) {
        if let Err(e) = self
            .surface
            .set_swap_interval(&self.context, swap_interval(self.vsync))
        {
            warn!("set_swap_interval(vsync={}): {e}", self.vsync);
        }
    }
}

impl Renderer for GlRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display_handle: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: &RenderOptions,
    ) -> Result<Self> {
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let dh = display_handle
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let display =
            unsafe { Display::new(dh, display_preference(wh)) }.context("Display::new")?;
        let version_string = display.version_string();
        info!("GL display: {}", version_string);

        let (context, surface, gl) = Self::make_current(&display, wh, size)?;

        let adapter = unsafe {
            AdapterInfo {
                api: "OpenGL",
                name: gl.get_parameter_string(glow::RENDERER),
                version: gl.get_parameter_string(glow::VERSION),
            }
        };

        let r = Self {
            context,
            surface,
            gl,
            size,
            clear: default_clear(),
            vsync: opts.vsync,
            adapter,
        };
        r.apply_vsync();
        Ok(r)
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        if size.is_empty() {
            return Ok(());
        }

        self.surface
            .resize(&self.context, nz(size.width), nz(size.height));
        self.apply_vsync();

        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn set_vsync(&mut self, on: bool) -> Result<()> {
        if self.vsync != on {
            self.vsync = on;
            self.apply_vsync();
        }
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        if self.size.is_empty() {
            return Ok(FrameStatus::Skipped);
        }

        unsafe {
            self.gl
                .viewport(0, 0, self.size.width as i32, self.size.height as i32);
            self.gl
                .clear_color(self.clear[0], self.clear[1], self.clear[2], self.clear[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }

        self.surface
            .swap_buffers(&self.context)
            .context("swap_buffers")?;

        Ok(FrameStatus::Presented)
    }
}
