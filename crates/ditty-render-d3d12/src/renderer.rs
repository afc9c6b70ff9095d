// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ditty_render::sync::FenceLedger;
use ditty_render::{
    default_clear, names, win32_hwnd, AdapterInfo, FrameStatus, RenderOptions, RenderSize,
    Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::mem::ManuallyDrop;
use tracing::{debug, info, warn};

use windows::core::Interface;
use windows::Win32::Foundation::{
    CloseHandle, HANDLE, HWND, WAIT_EVENT, WAIT_FAILED, WAIT_OBJECT_0,
};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

/// Back buffers in the flip chain; one allocator and fence slot each.
const BACK_BUFFERS: u32 = 2;

const MIN_FEATURE_LEVEL: D3D_FEATURE_LEVEL = D3D_FEATURE_LEVEL_11_0;

pub struct D3d12Renderer {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_stride: usize,
    render_targets: Vec<ID3D12Resource>,
    allocators: Vec<ID3D12CommandAllocator>,
    list: ID3D12GraphicsCommandList,

    fence: ID3D12Fence,
    fence_event: HANDLE,
    ledger: FenceLedger,

    size: RenderSize,
    clear: [f32; 4],
    vsync: bool,
    adapter: AdapterInfo,
}

unsafe fn enable_debug_layer() -> bool {
    let mut debug: Option<ID3D12Debug> = None;
    unsafe {
        if D3D12GetDebugInterface(&mut debug).is_err() {
            return false;
        }
        match debug {
            Some(d) => {
                d.EnableDebugLayer();
                true
            }
            None => false,
        }
    }
}

unsafe fn create_factory(debug: bool) -> Result<IDXGIFactory4> {
    unsafe {
        if debug {
            match CreateDXGIFactory2::<IDXGIFactory4>(DXGI_CREATE_FACTORY_DEBUG) {
                Ok(f) => return Ok(f),
                Err(e) => warn!("DXGI debug factory unavailable: {e}"),
            }
        }
        CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0)).context("CreateDXGIFactory2")
    }
}

/// First enumerated adapter that can create a device at the minimum level.
/// DXGI lists hardware adapters before WARP, so a software adapter is only
/// picked when nothing else works.
unsafe fn first_d3d12_adapter(factory: &IDXGIFactory4) -> Result<(IDXGIAdapter1, String)> {
    unsafe {
        for i in 0.. {
            let adapter = match factory.EnumAdapters1(i) {
                Ok(a) => a,
                Err(_) => break,
            };
            let desc = adapter.GetDesc1()?;
            let name = names::utf16_until_nul(&desc.Description);

            if D3D12CreateDevice(
                &adapter,
                MIN_FEATURE_LEVEL,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
            .is_ok()
            {
                if (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0 {
                    warn!("using software adapter {name}");
                }
                return Ok((adapter, name));
            }
            debug!("adapter {name} cannot create a D3D12 device");
        }
        Err(anyhow!("no adapter supports Direct3D 12 at feature level 11_0"))
    }
}

fn check_wait(result: WAIT_EVENT) -> Result<()> {
    match result {
        WAIT_OBJECT_0 => Ok(()),
        WAIT_FAILED => Err(std::io::Error::last_os_error()).context("WaitForSingleObject"),
        other => Err(anyhow!("WaitForSingleObject returned {:#x}", other.0)),
    }
}

/// Non-owning transition barrier. The borrowed resource outlives the call
/// that records it.
fn transition(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

impl D3d12Renderer {
    fn rtv_handle(&self, index: usize) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + index * self.rtv_stride,
        }
    }

    /// Fetches the swap chain buffers and writes one RTV per buffer.
    unsafe fn create_render_targets(
        device: &ID3D12Device,
        swap_chain: &IDXGISwapChain3,
        heap: &ID3D12DescriptorHeap,
        stride: usize,
    ) -> Result<Vec<ID3D12Resource>> {
        let mut targets = Vec::with_capacity(BACK_BUFFERS as usize);
        unsafe {
            let start = heap.GetCPUDescriptorHandleForHeapStart();
            for i in 0..BACK_BUFFERS {
                let resource: ID3D12Resource =
                    swap_chain.GetBuffer(i).with_context(|| format!("GetBuffer({i})"))?;
                let handle = D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: start.ptr + i as usize * stride,
                };
                device.CreateRenderTargetView(&resource, None, handle);
                targets.push(resource);
            }
        }
        Ok(targets)
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        unsafe {
            if self.fence.GetCompletedValue() < value {
                self.fence
                    .SetEventOnCompletion(value, self.fence_event)
                    .context("SetEventOnCompletion")?;
                check_wait(WaitForSingleObject(self.fence_event, INFINITE))?;
            }
        }
        Ok(())
    }

    /// Signals a fresh value on the queue and blocks until the GPU reaches it.
    fn wait_for_gpu(&mut self) -> Result<()> {
        let value = self.ledger.drain();
        unsafe {
            self.queue
                .Signal(&self.fence, value)
                .context("Signal")?;
        }
        self.wait_for(value)
    }

    fn record(&self, index: usize) -> Result<()> {
        let allocator = &self.allocators[index];
        let target = &self.render_targets[index];
        unsafe {
            allocator.Reset().context("allocator Reset")?;
            self.list
                .Reset(allocator, None)
                .context("command list Reset")?;

            self.list.ResourceBarrier(&[transition(
                target,
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            )]);
            self.list
                .ClearRenderTargetView(self.rtv_handle(index), &self.clear, None);
            self.list.ResourceBarrier(&[transition(
                target,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PRESENT,
            )]);

            self.list.Close().context("command list Close")?;
        }
        Ok(())
    }
}

impl Renderer for D3d12Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        _display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: &RenderOptions,
    ) -> Result<Self> {
        let hwnd = HWND(win32_hwnd(window)?.get() as *mut _);

        unsafe {
            let debug = opts.validation && enable_debug_layer();
            if opts.validation && !debug {
                warn!("D3D12 debug layer not available");
            }

            let factory = create_factory(debug)?;
            let (adapter, adapter_name) = first_d3d12_adapter(&factory)?;

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(&adapter, MIN_FEATURE_LEVEL, &mut device)
                .context("D3D12CreateDevice")?;
            let device = device.ok_or_else(|| anyhow!("D3D12CreateDevice returned no device"))?;

            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                    Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                    ..Default::default()
                })
                .context("CreateCommandQueue")?;

            let desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: size.width,
                Height: size.height,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: BACK_BUFFERS,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                ..Default::default()
            };
            let swap_chain: IDXGISwapChain1 = factory
                .CreateSwapChainForHwnd(&queue, hwnd, &desc, None, None)
                .context("CreateSwapChainForHwnd")?;
            if let Err(e) = factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) {
                warn!("MakeWindowAssociation: {e}");
            }
            let swap_chain: IDXGISwapChain3 = swap_chain.cast()?;

            let rtv_heap: ID3D12DescriptorHeap = device
                .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    NumDescriptors: BACK_BUFFERS,
                    Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                    ..Default::default()
                })
                .context("CreateDescriptorHeap")?;
            let rtv_stride =
                device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;
            let render_targets =
                Self::create_render_targets(&device, &swap_chain, &rtv_heap, rtv_stride)?;

            let allocators = (0..BACK_BUFFERS)
                .map(|_| device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT))
                .collect::<windows::core::Result<Vec<ID3D12CommandAllocator>>>()
                .context("CreateCommandAllocator")?;

            let list: ID3D12GraphicsCommandList = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocators[0], None)
                .context("CreateCommandList")?;
            // created open; render() expects it closed
            list.Close()?;

            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .context("CreateFence")?;
            let fence_event = CreateEventA(None, false, false, None).context("CreateEventA")?;

            let adapter = AdapterInfo {
                api: "Direct3D 12",
                name: adapter_name,
                version: format!(
                    "feature level {}",
                    names::feature_level_name(MIN_FEATURE_LEVEL.0 as u32)
                ),
            };
            info!(
                "D3D12 swap chain ready ({}x{}, {} buffers)",
                size.width, size.height, BACK_BUFFERS
            );

            Ok(Self {
                device,
                queue,
                swap_chain,
                rtv_heap,
                rtv_stride,
                render_targets,
                allocators,
                list,
                fence,
                fence_event,
                ledger: FenceLedger::new(BACK_BUFFERS as usize),
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
        if size == self.size {
            return Ok(());
        }
        self.size = size;
        if size.is_empty() {
            return Ok(());
        }

        self.wait_for_gpu()?;
        // every back buffer reference must be released before ResizeBuffers
        self.render_targets.clear();
        unsafe {
            self.swap_chain
                .ResizeBuffers(
                    BACK_BUFFERS,
                    size.width,
                    size.height,
                    DXGI_FORMAT_UNKNOWN,
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .context("ResizeBuffers")?;
            self.render_targets = Self::create_render_targets(
                &self.device,
                &self.swap_chain,
                &self.rtv_heap,
                self.rtv_stride,
            )?;
        }
        self.ledger.reset_slots(BACK_BUFFERS as usize);
        debug!("D3D12 buffers resized to {}x{}", size.width, size.height);
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

        let index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() } as usize;

        // the allocator for this buffer may still be in use by the frame
        // submitted two presents ago
        let completed = unsafe { self.fence.GetCompletedValue() };
        if let Some(value) = self.ledger.pending(index, completed) {
            self.wait_for(value)?;
        }

        self.record(index)?;

        unsafe {
            let lists = [Some(self.list.cast::<ID3D12CommandList>()?)];
            self.queue.ExecuteCommandLists(&lists);

            self.swap_chain
                .Present(u32::from(self.vsync), DXGI_PRESENT(0))
                .ok()
                .context("Present")?;

            let value = self.ledger.signal(index);
            self.queue
                .Signal(&self.fence, value)
                .context("Signal")?;
        }
        Ok(FrameStatus::Presented)
    }
}

impl Drop for D3d12Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_gpu() {
            warn!("D3D12 drain on drop failed: {e:#}");
        }
        unsafe {
            if !self.fence_event.is_invalid() {
                let _ = CloseHandle(self.fence_event);
            }
        }
    }
}
