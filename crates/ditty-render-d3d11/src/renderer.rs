// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ditty_render::{
    default_clear, names, win32_hwnd, AdapterInfo, FrameStatus, RenderOptions, RenderSize,
    Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use windows::core::Interface;
use windows::Win32::Foundation::{HMODULE, HWND};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

// Field order is release order.
pub struct D3d11Renderer {
    rtv: Option<ID3D11RenderTargetView>,
    swap_chain: IDXGISwapChain,
    context: ID3D11DeviceContext,
    device: ID3D11Device,

    size: RenderSize,
    clear: [f32; 4],
    vsync: bool,
    adapter: AdapterInfo,
}

struct DeviceBundle {
    swap_chain: IDXGISwapChain,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    level: D3D_FEATURE_LEVEL,
}

unsafe fn create_device_and_swap_chain(
    hwnd: HWND,
    size: RenderSize,
    debug: bool,
) -> windows::core::Result<DeviceBundle> {
    let desc = DXGI_SWAP_CHAIN_DESC {
        BufferDesc: DXGI_MODE_DESC {
            Width: size.width,
            Height: size.height,
            RefreshRate: DXGI_RATIONAL {
                Numerator: 0,
                Denominator: 1,
            },
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            ..Default::default()
        },
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 1,
        OutputWindow: hwnd,
        Windowed: true.into(),
        ..Default::default()
    };

    let mut flags = D3D11_CREATE_DEVICE_SINGLETHREADED;
    if debug {
        flags |= D3D11_CREATE_DEVICE_DEBUG;
    }

    let mut swap_chain = None;
    let mut device = None;
    let mut context = None;
    let mut level = D3D_FEATURE_LEVEL::default();

    unsafe {
        D3D11CreateDeviceAndSwapChain(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            flags,
            None,
            D3D11_SDK_VERSION,
            Some(&desc),
            Some(&mut swap_chain),
            Some(&mut device),
            Some(&mut level),
            Some(&mut context),
        )?;
    }

    match (swap_chain, device, context) {
        (Some(swap_chain), Some(device), Some(context)) => Ok(DeviceBundle {
            swap_chain,
            device,
            context,
            level,
        }),
        _ => Err(windows::core::Error::from(windows::Win32::Foundation::E_POINTER)),
    }
}

unsafe fn create_rtv(
    device: &ID3D11Device,
    swap_chain: &IDXGISwapChain,
) -> Result<ID3D11RenderTargetView> {
    unsafe {
        let framebuffer: ID3D11Texture2D = swap_chain.GetBuffer(0).context("GetBuffer(0)")?;
        let mut rtv = None;
        device
            .CreateRenderTargetView(&framebuffer, None, Some(&mut rtv))
            .context("CreateRenderTargetView")?;
        rtv.ok_or_else(|| anyhow!("CreateRenderTargetView returned no view"))
    }
}

unsafe fn adapter_info(device: &ID3D11Device, level: D3D_FEATURE_LEVEL) -> Result<AdapterInfo> {
    unsafe {
        let dxgi: IDXGIDevice = device.cast()?;
        let desc = dxgi.GetAdapter()?.GetDesc()?;
        Ok(AdapterInfo {
            api: "Direct3D 11",
            name: names::utf16_until_nul(&desc.Description),
            version: format!("feature level {}", names::feature_level_name(level.0 as u32)),
        })
    }
}

impl Renderer for D3d11Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        _display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: &RenderOptions,
    ) -> Result<Self> {
        let hwnd = HWND(win32_hwnd(window)?.get() as *mut _);

        unsafe {
            let bundle = match create_device_and_swap_chain(hwnd, size, opts.validation) {
                Ok(b) => b,
                Err(e) if opts.validation && e.code() == DXGI_ERROR_SDK_COMPONENT_MISSING => {
                    warn!("D3D11 debug layer not installed; continuing without it");
                    create_device_and_swap_chain(hwnd, size, false)
                        .context("D3D11CreateDeviceAndSwapChain")?
                }
                Err(e) => return Err(e).context("D3D11CreateDeviceAndSwapChain"),
            };

            let rtv = create_rtv(&bundle.device, &bundle.swap_chain)?;
            let adapter = adapter_info(&bundle.device, bundle.level)?;
            info!("D3D11 swap chain ready ({}x{})", size.width, size.height);

            Ok(Self {
                rtv: Some(rtv),
                swap_chain: bundle.swap_chain,
                context: bundle.context,
                device: bundle.device,
                size,
                clear: default_clear(),
                vsync: opts.vsync,
                adapter,
            })
        }
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        if size.is_empty() {
            return Ok(());
        }

        // all references to the back buffer must be gone before ResizeBuffers
        self.rtv = None;
        unsafe {
            self.context.ClearState();
            self.swap_chain
                .ResizeBuffers(
                    0,
                    size.width,
                    size.height,
                    DXGI_FORMAT_UNKNOWN,
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .context("ResizeBuffers")?;
            self.rtv = Some(create_rtv(&self.device, &self.swap_chain)?);
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn set_vsync(&mut self, on: bool) -> Result<()> {
        self.vsync = on;
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        if self.size.is_empty() {
            return Ok(FrameStatus::Skipped);
        }
        let Some(rtv) = &self.rtv else {
            return Ok(FrameStatus::Skipped);
        };

        unsafe {
            self.context.ClearRenderTargetView(rtv, &self.clear);
            self.swap_chain
                .Present(u32::from(self.vsync), DXGI_PRESENT(0))
                .ok()
                .context("Present")?;
        }
        Ok(FrameStatus::Presented)
    }
}
