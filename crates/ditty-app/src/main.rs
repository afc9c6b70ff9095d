// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use ditty_core::{config::DEFAULT_CONFIG_PATH, init_tracing, AppCfg, BackendKind};
use ditty_core::{ClearSource, FrameStats};
use ditty_render::{FrameStatus, RenderOptions, RenderSize, Renderer};
use ditty_render_gl::GlRenderer;
use ditty_render_vk::VkRenderer;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

#[cfg(windows)]
use ditty_render_d3d11::D3d11Renderer;
#[cfg(windows)]
use ditty_render_d3d12::D3d12Renderer;
#[cfg(target_os = "macos")]
use ditty_render_metal::MetalRenderer;

use ditty_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Graphics API: vk | gl | d3d11 | d3d12 | metal (overrides the config file)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// TOML config; a missing file means defaults
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Create the device and swap chain, log the adapter, then exit
    #[arg(long)]
    probe: bool,

    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,
}

fn load_cfg(path: &Path) -> AppCfg {
    match AppCfg::load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{e}; using defaults");
            AppCfg::default()
        }
    }
}

fn limit_reached(presented: u64, limit: Option<u64>) -> bool {
    limit.is_some_and(|n| presented >= n)
}

fn ensure_available(kind: BackendKind) -> Result<()> {
    if kind.is_available() {
        Ok(())
    } else {
        anyhow::bail!("the {kind} backend is not built for this platform")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    ToggleVsync,
    Quit,
}

fn key_action(key: PhysicalKey) -> Option<KeyAction> {
    match key {
        PhysicalKey::Code(KeyCode::KeyV) => Some(KeyAction::ToggleVsync),
        PhysicalKey::Code(KeyCode::Escape) => Some(KeyAction::Quit),
        _ => None,
    }
}

fn control_flow(vsync: bool) -> ControlFlow {
    if vsync {
        ControlFlow::Wait
    } else {
        ControlFlow::Poll
    }
}

/// Renders one frame and counts it if it reached the screen.
fn draw_frame(
    renderer: &mut dyn Renderer,
    clear: &mut ClearSource,
    stats: &mut FrameStats,
) -> Result<FrameStatus> {
    if clear.is_animated() {
        renderer.set_clear_color(clear.next_color());
    }
    let status = renderer.render()?;
    if status == FrameStatus::Presented {
        stats.record_frame();
    }
    Ok(status)
}

enum Backend {
    Vk(Box<VkRenderer>),
    Gl(Box<GlRenderer>),
    #[cfg(windows)]
    D3d11(Box<D3d11Renderer>),
    #[cfg(windows)]
    D3d12(Box<D3d12Renderer>),
    #[cfg(target_os = "macos")]
    Metal(Box<MetalRenderer>),
}

impl Backend {
    fn create(
        kind: BackendKind,
        window: &Window,
        size: RenderSize,
        opts: &RenderOptions,
    ) -> Result<Self> {
        let backend = match kind {
            BackendKind::Vk => Backend::Vk(Box::new(VkRenderer::new(window, window, size, opts)?)),
            BackendKind::Gl => Backend::Gl(Box::new(GlRenderer::new(window, window, size, opts)?)),
            #[cfg(windows)]
            BackendKind::D3d11 => {
                Backend::D3d11(Box::new(D3d11Renderer::new(window, window, size, opts)?))
            }
            #[cfg(windows)]
            BackendKind::D3d12 => {
                Backend::D3d12(Box::new(D3d12Renderer::new(window, window, size, opts)?))
            }
            #[cfg(target_os = "macos")]
            BackendKind::Metal => {
                Backend::Metal(Box::new(MetalRenderer::new(window, window, size, opts)?))
            }
            _ => {
                ensure_available(kind)?;
                anyhow::bail!("no renderer registered for {kind}");
            }
        };
        Ok(backend)
    }

    fn renderer(&mut self) -> &mut dyn Renderer {
        match self {
            Backend::Vk(r) => r.as_mut(),
            Backend::Gl(r) => r.as_mut(),
            #[cfg(windows)]
            Backend::D3d11(r) => r.as_mut(),
            #[cfg(windows)]
            Backend::D3d12(r) => r.as_mut(),
            #[cfg(target_os = "macos")]
            Backend::Metal(r) => r.as_mut(),
        }
    }
}

struct App {
    cfg: AppCfg,
    backend_kind: BackendKind,
    probe: bool,
    frame_limit: Option<u64>,

    // The renderer holds the window's surface, so it is declared (and
    // dropped) first.
    backend: Option<Backend>,
    window: Option<Window>,
    render_size: RenderSize,

    clear: ClearSource,
    stats: FrameStats,
    paused: bool,
    exiting: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, args: &Args) -> Self {
        let backend_kind = args.backend.unwrap_or(cfg.render.backend);
        let clear = ClearSource::from_cfg(&cfg.render);
        Self {
            cfg,
            backend_kind,
            probe: args.probe,
            frame_limit: args.frames,
            backend: None,
            window: None,
            render_size: RenderSize::new(1, 1),
            clear,
            stats: FrameStats::new(Instant::now()),
            paused: false,
            exiting: false,
            failure: None,
        }
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            vsync: self.cfg.render.vsync,
            vsync_mode: self.cfg.render.vsync_mode,
            validation: self.cfg.validation_enabled(),
        }
    }

    /// Renderer goes first; it still references the window's surface.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.backend = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failure = Some(err);
        self.shutdown(event_loop);
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let kind = self.backend_kind;
        let attrs = ditty_platform::window_attributes(&self.cfg.window, kind.as_str());
        let window = event_loop.create_window(attrs).context("create_window")?;
        if let Err(e) = ditty_platform::log_platform(&window) {
            warn!("{e}");
        }

        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);

        let mut backend = Backend::create(kind, &window, self.render_size, &self.render_options())
            .with_context(|| format!("{kind} init"))?;

        let renderer = backend.renderer();
        info!("backend = {kind}: {}", renderer.adapter());
        renderer.set_clear_color(self.clear.next_color());
        info!(
            "vsync = {} ({:?}), clear = {:?}",
            self.cfg.render.vsync, self.cfg.render.vsync_mode, self.cfg.render.clear
        );

        self.window = Some(window);
        self.backend = Some(backend);
        Ok(())
    }

    fn resize(&mut self) -> Result<()> {
        if let Some(backend) = &mut self.backend {
            backend.renderer().resize(self.render_size)?;
        }
        Ok(())
    }

    fn draw(&mut self) -> Result<FrameStatus> {
        let Some(backend) = &mut self.backend else {
            return Ok(FrameStatus::Skipped);
        };
        draw_frame(backend.renderer(), &mut self.clear, &mut self.stats)
    }

    fn toggle_vsync(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let on = !self.cfg.render.vsync;
        if let Some(backend) = &mut self.backend {
            backend.renderer().set_vsync(on)?;
        }
        self.cfg.render.vsync = on;
        event_loop.set_control_flow(control_flow(on));
        info!("vsync = {on}");
        Ok(())
    }

    /// Shuts down once `--frames` presents have happened. True if exiting.
    fn stop_at_limit(&mut self, event_loop: &ActiveEventLoop) -> bool {
        if !limit_reached(self.stats.total(), self.frame_limit) {
            return false;
        }
        info!("presented {} frames, exiting", self.stats.total());
        self.shutdown(event_loop);
        true
    }

    fn request_redraw(&self) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
            if self.probe {
                info!("probe ok");
                self.shutdown(event_loop);
                return;
            }
            if self.stop_at_limit(event_loop) {
                return;
            }
        }

        event_loop.set_control_flow(control_flow(self.cfg.render.vsync));

        self.paused = self.render_size.is_empty();
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            self.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }

                if !self.paused {
                    if let Err(e) = self.resize() {
                        self.fail(event_loop, e.context("resize"));
                        return;
                    }
                    self.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                let now_paused = occluded || self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={} → paused={}", occluded, self.paused);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                match key_action(event.physical_key) {
                    Some(KeyAction::ToggleVsync) => {
                        if let Err(e) = self.toggle_vsync(event_loop) {
                            self.fail(event_loop, e.context("set_vsync"));
                        }
                    }
                    Some(KeyAction::Quit) => {
                        info!("Escape pressed");
                        self.shutdown(event_loop);
                    }
                    None => {}
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused || self.stop_at_limit(event_loop) {
                    return;
                }
                if let Err(e) = self.draw() {
                    self.fail(event_loop, e.context("render"));
                    return;
                }
                self.stop_at_limit(event_loop);
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        let now = Instant::now();
        if self.paused {
            // zero-sized or occluded window: sleep until something changes
            event_loop.set_control_flow(ControlFlow::Wait);
            self.stats.restart(now);
            return;
        }

        event_loop.set_control_flow(control_flow(self.cfg.render.vsync));
        self.request_redraw();

        if let Some(fps) = self.stats.tick(now) {
            info!("fps ~ {fps}");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    ensure_available(args.backend.unwrap_or(cfg.render.backend))?;

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, &args);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_backend_to_the_config() {
        let args = Args::try_parse_from(["ditty"]).unwrap();
        assert_eq!(args.backend, None);
        assert_eq!(args.config, PathBuf::from("ditty.toml"));
        assert!(!args.probe);
        assert_eq!(args.frames, None);
    }

    #[test]
    fn parses_every_flag() {
        let args = Args::try_parse_from([
            "ditty", "--backend", "gl", "--config", "alt.toml", "--probe", "--frames", "120",
        ])
        .unwrap();
        assert_eq!(args.backend, Some(BackendKind::Gl));
        assert_eq!(args.config, PathBuf::from("alt.toml"));
        assert!(args.probe);
        assert_eq!(args.frames, Some(120));
    }

    #[test]
    fn backend_names_accept_aliases() {
        let args = Args::try_parse_from(["ditty", "--backend", "Vulkan"]).unwrap();
        assert_eq!(args.backend, Some(BackendKind::Vk));
        let args = Args::try_parse_from(["ditty", "--backend", "d3d12"]).unwrap();
        assert_eq!(args.backend, Some(BackendKind::D3d12));
        let args = Args::try_parse_from(["ditty", "--backend", "metal"]).unwrap();
        assert_eq!(args.backend, Some(BackendKind::Metal));
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Args::try_parse_from(["ditty", "--backend", "dx9"]).is_err());
        assert!(Args::try_parse_from(["ditty", "--frames", "many"]).is_err());
    }

    #[test]
    fn cli_backend_overrides_config() {
        let cfg = AppCfg::parse("[render]\nbackend = \"gl\"\n").unwrap();
        let args = Args::try_parse_from(["ditty", "--backend", "vk"]).unwrap();
        assert_eq!(App::new(cfg.clone(), &args).backend_kind, BackendKind::Vk);

        let args = Args::try_parse_from(["ditty"]).unwrap();
        assert_eq!(App::new(cfg, &args).backend_kind, BackendKind::Gl);
    }

    #[test]
    fn frame_limit() {
        assert!(!limit_reached(1_000_000, None));
        assert!(!limit_reached(9, Some(10)));
        assert!(limit_reached(10, Some(10)));
        // --frames 0 stops before the first present
        assert!(limit_reached(0, Some(0)));
    }

    #[test]
    fn unavailable_backends_fail_before_the_window_opens() {
        assert!(ensure_available(BackendKind::Vk).is_ok());
        assert!(ensure_available(BackendKind::Gl).is_ok());
        assert_eq!(ensure_available(BackendKind::D3d11).is_ok(), cfg!(windows));
        assert_eq!(
            ensure_available(BackendKind::Metal).is_ok(),
            cfg!(target_os = "macos")
        );
    }

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(
            key_action(PhysicalKey::Code(KeyCode::KeyV)),
            Some(KeyAction::ToggleVsync)
        );
        assert_eq!(
            key_action(PhysicalKey::Code(KeyCode::Escape)),
            Some(KeyAction::Quit)
        );
        assert_eq!(key_action(PhysicalKey::Code(KeyCode::KeyB)), None);
    }

    #[test]
    fn vsync_waits_and_free_running_polls() {
        assert_eq!(control_flow(true), ControlFlow::Wait);
        assert_eq!(control_flow(false), ControlFlow::Poll);
    }

    /// Plays back a fixed list of frame outcomes.
    struct ScriptedRenderer {
        outcomes: Vec<FrameStatus>,
        colors: Vec<[f32; 4]>,
        adapter: ditty_render::AdapterInfo,
    }

    impl ScriptedRenderer {
        fn with(mut outcomes: Vec<FrameStatus>) -> Self {
            outcomes.reverse();
            Self {
                outcomes,
                colors: Vec::new(),
                adapter: ditty_render::AdapterInfo {
                    api: "scripted",
                    name: "test".into(),
                    version: "0".into(),
                },
            }
        }
    }

    impl Renderer for ScriptedRenderer {
        fn new(
            _window: &dyn ditty_platform::winit::raw_window_handle::HasWindowHandle,
            _display: &dyn ditty_platform::winit::raw_window_handle::HasDisplayHandle,
            _size: RenderSize,
            _opts: &RenderOptions,
        ) -> Result<Self> {
            anyhow::bail!("constructed directly in tests")
        }

        fn adapter(&self) -> &ditty_render::AdapterInfo {
            &self.adapter
        }

        fn resize(&mut self, _size: RenderSize) -> Result<()> {
            Ok(())
        }

        fn render(&mut self) -> Result<FrameStatus> {
            self.outcomes
                .pop()
                .ok_or_else(|| anyhow::anyhow!("out of frames"))
        }

        fn set_clear_color(&mut self, rgba: [f32; 4]) {
            self.colors.push(rgba);
        }

        fn set_vsync(&mut self, _on: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn skipped_frames_are_not_counted() {
        let mut r = ScriptedRenderer::with(vec![
            FrameStatus::Presented,
            FrameStatus::Skipped,
            FrameStatus::Presented,
        ]);
        let mut clear = ClearSource::Fixed([0.0, 0.0, 0.0, 1.0]);
        let mut stats = FrameStats::new(Instant::now());

        assert_eq!(draw_frame(&mut r, &mut clear, &mut stats).unwrap(), FrameStatus::Presented);
        assert_eq!(draw_frame(&mut r, &mut clear, &mut stats).unwrap(), FrameStatus::Skipped);
        assert_eq!(stats.total(), 1);
        draw_frame(&mut r, &mut clear, &mut stats).unwrap();
        assert_eq!(stats.total(), 2);
        assert!(draw_frame(&mut r, &mut clear, &mut stats).is_err());
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn fixed_clear_is_not_resent_every_frame() {
        let mut r = ScriptedRenderer::with(vec![FrameStatus::Presented; 3]);
        let mut clear = ClearSource::Fixed([0.5, 0.5, 0.5, 1.0]);
        let mut stats = FrameStats::new(Instant::now());
        for _ in 0..3 {
            draw_frame(&mut r, &mut clear, &mut stats).unwrap();
        }
        assert!(r.colors.is_empty());

        let cfg = AppCfg::default();
        let mut random = ClearSource::from_cfg(&cfg.render);
        let mut r = ScriptedRenderer::with(vec![FrameStatus::Presented; 2]);
        draw_frame(&mut r, &mut random, &mut stats).unwrap();
        draw_frame(&mut r, &mut random, &mut stats).unwrap();
        assert_eq!(r.colors.len(), 2);
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("ditty-app-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[render\nvsync = ").unwrap();
        let cfg = load_cfg(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg, AppCfg::default());
    }
}
