// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Result};
use ditty_render::{
    default_clear, AdapterInfo, FrameStatus, RenderOptions, RenderSize, Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use tracing::{debug, info};

use objc2::rc::{autoreleasepool, Retained};
use objc2::runtime::ProtocolObject;
use objc2_app_kit::NSView;
use objc2_core_foundation::CGSize;
use objc2_metal::{
    MTLClearColor, MTLCommandBuffer, MTLCommandEncoder, MTLCommandQueue,
    MTLCreateSystemDefaultDevice, MTLDevice, MTLLoadAction, MTLPixelFormat,
    MTLRenderPassDescriptor, MTLStoreAction,
};
use objc2_quartz_core::{CAMetalDrawable, CAMetalLayer};

pub struct MetalRenderer {
    layer: Retained<CAMetalLayer>,
    queue: Retained<ProtocolObject<dyn MTLCommandQueue>>,
    device: Retained<ProtocolObject<dyn MTLDevice>>,
    /// Last submitted frame; waited on before teardown.
    in_flight: Option<Retained<ProtocolObject<dyn MTLCommandBuffer>>>,

    size: RenderSize,
    clear: [f32; 4],
    adapter: AdapterInfo,
}

fn drawable_size(size: RenderSize) -> CGSize {
    CGSize::new(f64::from(size.width), f64::from(size.height))
}

fn clear_color(rgba: [f32; 4]) -> MTLClearColor {
    MTLClearColor {
        red: f64::from(rgba[0]),
        green: f64::from(rgba[1]),
        blue: f64::from(rgba[2]),
        alpha: f64::from(rgba[3]),
    }
}

impl Renderer for MetalRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        _display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: &RenderOptions,
    ) -> Result<Self> {
        let ns_view = match window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw() {
            RawWindowHandle::AppKit(h) => h.ns_view,
            other => return Err(anyhow!("expected an AppKit window handle, got {other:?}")),
        };

        let device = unsafe { MTLCreateSystemDefaultDevice() }
            .ok_or_else(|| anyhow!("MTLCreateSystemDefaultDevice returned no device"))?;
        let queue = device
            .newCommandQueue()
            .ok_or_else(|| anyhow!("newCommandQueue failed"))?;

        let layer = CAMetalLayer::new();
        unsafe {
            layer.setDevice(Some(&device));
            layer.setPixelFormat(MTLPixelFormat::BGRA8Unorm);
            layer.setDrawableSize(drawable_size(size));
            layer.setDisplaySyncEnabled(opts.vsync);

            // winit hands out the content view; the event loop runs on the
            // main thread, which AppKit requires here.
            let view: &NSView = ns_view.cast::<NSView>().as_ref();
            view.setWantsLayer(true);
            view.setLayer(Some(&layer));
        }

        let adapter = AdapterInfo {
            api: "Metal",
            name: device.name().to_string(),
            version: "BGRA8Unorm CAMetalLayer".to_string(),
        };
        info!("Metal layer ready ({}x{})", size.width, size.height);

        Ok(Self {
            layer,
            queue,
            device,
            in_flight: None,
            size,
            clear: default_clear(),
            adapter,
        })
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        if !size.is_empty() {
            unsafe { self.layer.setDrawableSize(drawable_size(size)) };
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    fn set_vsync(&mut self, on: bool) -> Result<()> {
        unsafe { self.layer.setDisplaySyncEnabled(on) };
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        if self.size.is_empty() {
            return Ok(FrameStatus::Skipped);
        }

        autoreleasepool(|_| {
            let Some(drawable) = (unsafe { self.layer.nextDrawable() }) else {
                debug!("no drawable available, skipping frame");
                return Ok(FrameStatus::Skipped);
            };

            let pass = unsafe { MTLRenderPassDescriptor::new() };
            unsafe {
                let color = pass.colorAttachments().objectAtIndexedSubscript(0);
                color.setTexture(Some(&drawable.texture()));
                color.setLoadAction(MTLLoadAction::Clear);
                color.setStoreAction(MTLStoreAction::Store);
                color.setClearColor(clear_color(self.clear));
            }

            let cmd = self
                .queue
                .commandBuffer()
                .ok_or_else(|| anyhow!("commandBuffer failed"))?;
            let encoder = cmd
                .renderCommandEncoderWithDescriptor(&pass)
                .ok_or_else(|| anyhow!("renderCommandEncoderWithDescriptor failed"))?;
            encoder.endEncoding();

            cmd.presentDrawable(ProtocolObject::from_ref(&*drawable));
            cmd.commit();
            self.in_flight = Some(cmd);
            Ok(FrameStatus::Presented)
        })
    }
}

impl Drop for MetalRenderer {
    fn drop(&mut self) {
        if let Some(cmd) = self.in_flight.take() {
            unsafe { cmd.waitUntilCompleted() };
        }
        debug!("Metal device {} released", self.device.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawable_size_is_in_pixels() {
        let s = drawable_size(RenderSize::new(640, 480));
        assert_eq!((s.width, s.height), (640.0, 480.0));
    }

    #[test]
    fn clear_color_widens_channels() {
        let c = clear_color([0.5, 0.25, 0.0, 1.0]);
        assert_eq!((c.red, c.green, c.blue, c.alpha), (0.5, 0.25, 0.0, 1.0));
    }
}
