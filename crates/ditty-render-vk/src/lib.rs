// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use ditty_render::sync::{FrameCursor, FRAMES_IN_FLIGHT};
use ditty_render::{
    default_clear, AdapterInfo, FrameStatus, RenderOptions, RenderSize, Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};

use ash::khr::{portability_enumeration, portability_subset, surface, swapchain};
use ash::{vk, Entry, Instance};
use std::ffi::CStr;
use std::ops::Deref;

mod choose;
mod debug;

use choose::{
    choose_present_mode, choose_surface_format, choose_transform, extent_from_caps, image_count,
};
use debug::{DebugMessenger, VALIDATION_LAYER};

// Fields drop in declaration order: swap chain (in `Drop`), then the device,
// then the instance.
pub struct VkRenderer {
    swapchain_loader: swapchain::Device,
    chain: SwapchainBundle,
    cursor: FrameCursor,

    queue: vk::Queue,
    device: DeviceCore,
    phys: vk::PhysicalDevice,
    core: InstanceCore,

    clear: vk::ClearValue,
    opts: RenderOptions,
    size: RenderSize,
    adapter: AdapterInfo,
}

/// Instance-level objects. Destroying a null surface is a no-op, so this can
/// be dropped halfway through setup.
struct InstanceCore {
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
    instance: Instance,
    entry: Entry,
}

impl Drop for InstanceCore {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(dbg) = &self.debug {
                dbg.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// The logical device plus the per-frame objects that live as long as it.
struct DeviceCore {
    frames: Vec<FrameSync>,
    cmd_pool: vk::CommandPool,
    device: ash::Device,
}

impl Deref for DeviceCore {
    type Target = ash::Device;

    fn deref(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for DeviceCore {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            if let Err(e) = d.device_wait_idle() {
                warn!("device_wait_idle during teardown: {e:?}");
            }
            for f in &self.frames {
                d.destroy_fence(f.in_flight, None);
                d.destroy_semaphore(f.image_available, None);
            }
            // frees the command buffers too
            d.destroy_command_pool(self.cmd_pool, None);
            d.destroy_device(None);
        }
    }
}

/// Per frame in flight.
struct FrameSync {
    cmd: vk::CommandBuffer,
    image_available: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Everything that has to be rebuilt when the surface changes.
struct SwapchainBundle {
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    // indexed by swapchain image, not by frame
    render_finished: Vec<vk::Semaphore>,
}

impl SwapchainBundle {
    /// Destroys everything except the swapchain handle itself, which may
    /// still be needed as `old_swapchain`.
    unsafe fn destroy_dependents(&self, device: &ash::Device) {
        for &s in &self.render_finished {
            device.destroy_semaphore(s, None);
        }
        for &fb in &self.framebuffers {
            device.destroy_framebuffer(fb, None);
        }
        for &iv in &self.image_views {
            device.destroy_image_view(iv, None);
        }
        device.destroy_render_pass(self.render_pass, None);
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle during teardown: {e:?}");
            }
            self.chain.destroy_dependents(&self.device);
            self.swapchain_loader
                .destroy_swapchain(self.chain.swapchain, None);
        }
    }
}

fn has_layer(props: &[vk::LayerProperties], name: &CStr) -> bool {
    props
        .iter()
        .any(|p| p.layer_name_as_c_str().is_ok_and(|n| n == name))
}

fn has_extension(props: &[vk::ExtensionProperties], name: &CStr) -> bool {
    props
        .iter()
        .any(|p| p.extension_name_as_c_str().is_ok_and(|n| n == name))
}

/// Portability drivers (MoltenVK) are only enumerated when the instance opts
/// in with `VK_KHR_portability_enumeration`.
fn portability_instance(
    available: &[vk::ExtensionProperties],
) -> (Option<&'static CStr>, vk::InstanceCreateFlags) {
    if has_extension(available, portability_enumeration::NAME) {
        (
            Some(portability_enumeration::NAME),
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR,
        )
    } else {
        (None, vk::InstanceCreateFlags::empty())
    }
}

/// Device extensions to enable. A device that exposes
/// `VK_KHR_portability_subset` must have it enabled.
fn device_extensions(available: &[vk::ExtensionProperties]) -> Vec<&'static CStr> {
    let mut exts = vec![swapchain::NAME];
    if has_extension(available, portability_subset::NAME) {
        exts.push(portability_subset::NAME);
    }
    exts
}

/// Returns the instance and whether validation ended up enabled.
unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    want_validation: bool,
) -> Result<(Instance, bool)> {
    let app_name = c"ditty";

    let app_info = vk::ApplicationInfo {
        p_application_name: app_name.as_ptr(),
        application_version: 0,
        p_engine_name: app_name.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut exts = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let ext_props = entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default();
    let (portability, flags) = portability_instance(&ext_props);
    if let Some(name) = portability {
        info!("enabling {name:?}");
        exts.push(name.as_ptr());
    }

    let mut layers = Vec::new();
    let mut validation = false;
    if want_validation {
        let layer_props = entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default();

        if !has_layer(&layer_props, VALIDATION_LAYER) {
            warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        } else if !has_extension(&ext_props, ash::ext::debug_utils::NAME) {
            warn!("validation requested but VK_EXT_debug_utils is unavailable");
        } else {
            layers.push(VALIDATION_LAYER.as_ptr());
            exts.push(ash::ext::debug_utils::NAME.as_ptr());
            validation = true;
        }
    }

    let create_info = vk::InstanceCreateInfo {
        flags,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    Ok((instance, validation))
}

/// First physical device with a queue family that can both draw and present.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    for phys in instance.enumerate_physical_devices()? {
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        for (i, q) in qprops.iter().enumerate() {
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && surface_loader
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false)
            {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(anyhow!("no suitable physical device/queue family"))
}

unsafe fn adapter_info(instance: &Instance, phys: vk::PhysicalDevice) -> AdapterInfo {
    let props = instance.get_physical_device_properties(phys);
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown device".to_string());
    let v = props.api_version;
    AdapterInfo {
        api: "Vulkan",
        name,
        version: format!(
            "{}.{}.{}",
            vk::api_version_major(v),
            vk::api_version_minor(v),
            vk::api_version_patch(v)
        ),
    }
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    // Single color attachment: cleared on load, handed to the presentation engine.
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // The layout transition must not start before the acquire semaphore,
    // which the submit waits on at COLOR_ATTACHMENT_OUTPUT.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    Ok(device.create_render_pass(&rp_info, None)?)
}

#[allow(clippy::too_many_arguments)]
unsafe fn create_swapchain_bundle(
    device: &ash::Device,
    surface_loader: &surface::Instance,
    swapchain_loader: &swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    old_swapchain: vk::SwapchainKHR,
    size: RenderSize,
    opts: &RenderOptions,
) -> Result<SwapchainBundle> {
    let caps = surface_loader.get_physical_device_surface_capabilities(phys, surface)?;
    let formats = surface_loader.get_physical_device_surface_formats(phys, surface)?;
    let modes = surface_loader.get_physical_device_surface_present_modes(phys, surface)?;

    let surf_format =
        choose_surface_format(&formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
    let present_mode = choose_present_mode(&modes, opts.vsync, opts.vsync_mode);
    let extent = extent_from_caps(&caps, size);
    let min_count = image_count(&caps);

    info!(
        "swapchain: {:?}/{:?}, {}, {}x{}, images>={}",
        surf_format.format,
        surf_format.color_space,
        choose::present_mode_name(present_mode),
        extent.width,
        extent.height,
        min_count
    );

    let swap_info = vk::SwapchainCreateInfoKHR {
        surface,
        min_image_count: min_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: vk::SharingMode::EXCLUSIVE,
        pre_transform: choose_transform(&caps),
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain,
        ..Default::default()
    };

    let swapchain = swapchain_loader
        .create_swapchain(&swap_info, None)
        .context("create_swapchain")?;
    let images = swapchain_loader.get_swapchain_images(swapchain)?;

    let mut image_views = Vec::with_capacity(images.len());
    for &image in &images {
        let iv_info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: surf_format.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        image_views.push(device.create_image_view(&iv_info, None)?);
    }

    let render_pass = create_render_pass(device, surf_format.format)?;

    let mut framebuffers = Vec::with_capacity(image_views.len());
    for view in &image_views {
        let fb_info = vk::FramebufferCreateInfo {
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        framebuffers.push(device.create_framebuffer(&fb_info, None)?);
    }

    let sem_ci = vk::SemaphoreCreateInfo::default();
    let mut render_finished = Vec::with_capacity(images.len());
    for _ in 0..images.len() {
        render_finished.push(device.create_semaphore(&sem_ci, None)?);
    }

    Ok(SwapchainBundle {
        swapchain,
        format: surf_format,
        extent,
        images,
        image_views,
        render_pass,
        framebuffers,
        render_finished,
    })
}

/// Fills `core.frames`; anything created before a failure is still released
/// when `core` drops.
unsafe fn create_frames(core: &mut DeviceCore) -> Result<()> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        command_pool: core.cmd_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: FRAMES_IN_FLIGHT as u32,
        ..Default::default()
    };
    let cmds = core.allocate_command_buffers(&alloc_info)?;

    let sem_ci = vk::SemaphoreCreateInfo::default();
    // signaled so the first wait on each frame returns immediately
    let fence_ci = vk::FenceCreateInfo {
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    for cmd in cmds {
        let image_available = core.create_semaphore(&sem_ci, None)?;
        let in_flight = match core.create_fence(&fence_ci, None) {
            Ok(f) => f,
            Err(e) => {
                core.destroy_semaphore(image_available, None);
                return Err(e.into());
            }
        };
        core.frames.push(FrameSync {
            cmd,
            image_available,
            in_flight,
        });
    }
    Ok(())
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    opts: &RenderOptions,
) -> Result<VkRenderer> {
    let dh = display
        .display_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();

    let entry = Entry::load().context("loading the Vulkan library")?;
    let (instance, validation) = create_instance(&entry, dh, opts.validation)?;
    let mut core = InstanceCore {
        surface_loader: surface::Instance::new(&entry, &instance),
        surface: vk::SurfaceKHR::null(),
        debug: None,
        instance,
        entry,
    };
    if validation {
        core.debug = Some(DebugMessenger::new(&core.entry, &core.instance)?);
    }

    core.surface = ash_window::create_surface(&core.entry, &core.instance, dh, wh, None)
        .context("create_surface")?;

    let (phys, queue_family) =
        pick_device_and_queue(&core.instance, &core.surface_loader, core.surface)?;
    let adapter = adapter_info(&core.instance, phys);

    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let available = core
        .instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default();
    let device_exts: Vec<_> = device_extensions(&available)
        .iter()
        .map(|n| n.as_ptr())
        .collect();
    let dinfo = vk::DeviceCreateInfo {
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let device = core
        .instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let mut device = DeviceCore {
        frames: Vec::with_capacity(FRAMES_IN_FLIGHT),
        cmd_pool: vk::CommandPool::null(),
        device,
    };
    let queue = device.get_device_queue(queue_family, 0);

    let pool_info = vk::CommandPoolCreateInfo {
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    device.cmd_pool = device.create_command_pool(&pool_info, None)?;
    create_frames(&mut device)?;

    let swapchain_loader = swapchain::Device::new(&core.instance, &device);
    let chain = create_swapchain_bundle(
        &device,
        &core.surface_loader,
        &swapchain_loader,
        phys,
        core.surface,
        vk::SwapchainKHR::null(),
        size,
        opts,
    )?;

    Ok(VkRenderer {
        swapchain_loader,
        chain,
        cursor: FrameCursor::new(FRAMES_IN_FLIGHT),
        queue,
        device,
        phys,
        core,
        clear: vk::ClearValue {
            color: vk::ClearColorValue {
                float32: default_clear(),
            },
        },
        opts: *opts,
        size,
        adapter,
    })
}

impl VkRenderer {
    unsafe fn recreate_swapchain(&mut self) -> Result<()> {
        if self.size.is_empty() {
            return Ok(());
        }

        self.device
            .device_wait_idle()
            .context("device_wait_idle")?;

        let fresh = create_swapchain_bundle(
            &self.device,
            &self.core.surface_loader,
            &self.swapchain_loader,
            self.phys,
            self.core.surface,
            self.chain.swapchain,
            self.size,
            &self.opts,
        )?;
        let old = std::mem::replace(&mut self.chain, fresh);
        old.destroy_dependents(&self.device);
        self.swapchain_loader.destroy_swapchain(old.swapchain, None);

        self.cursor.reset();
        Ok(())
    }

    /// Reset + re-record this frame's command buffer to clear `image_index`.
    unsafe fn record_frame(&self, cmd: vk::CommandBuffer, image_index: usize) -> Result<()> {
        self.device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let begin = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        self.device.begin_command_buffer(cmd, &begin)?;

        let clears = [self.clear];
        let rp_begin = vk::RenderPassBeginInfo {
            render_pass: self.chain.render_pass,
            framebuffer: self.chain.framebuffers[image_index],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.chain.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };

        self.device
            .cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        self.device.cmd_end_render_pass(cmd);

        self.device.end_command_buffer(cmd)?;
        Ok(())
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: &RenderOptions,
    ) -> Result<Self> {
        let r = unsafe { build_renderer(window, display, size, opts)? };
        info!(
            "Vulkan swapchain ready ({}x{}, {:?}, {} images, validation={})",
            r.chain.extent.width,
            r.chain.extent.height,
            r.chain.format.format,
            r.chain.images.len(),
            r.core.debug.is_some()
        );
        Ok(r)
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.size = size;
        unsafe { self.recreate_swapchain() }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        };
    }

    fn set_vsync(&mut self, on: bool) -> Result<()> {
        if self.opts.vsync == on {
            return Ok(());
        }
        self.opts.vsync = on;
        unsafe { self.recreate_swapchain() }
    }

    // Per frame:
    // 1) wait this frame's fence (GPU done with its command buffer)
    // 2) acquire (signals image_available)
    // 3) record + submit (waits image_available, signals render_finished[image])
    // 4) present (waits render_finished[image])
    fn render(&mut self) -> Result<FrameStatus> {
        if self.size.is_empty() {
            return Ok(FrameStatus::Skipped);
        }

        unsafe {
            let frame = &self.device.frames[self.cursor.current()];
            let (cmd, image_available, in_flight) =
                (frame.cmd, frame.image_available, frame.in_flight);

            self.device
                .wait_for_fences(&[in_flight], true, u64::MAX)
                .context("wait_for_fences")?;

            let image_index = match self.swapchain_loader.acquire_next_image(
                self.chain.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            ) {
                Ok((index, _suboptimal)) => index,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    // skip this frame; the fence is still signaled
                    self.recreate_swapchain()?;
                    return Ok(FrameStatus::Skipped);
                }
                Err(e) => return Err(anyhow!("acquire_next_image: {e:?}")),
            };

            // only reset once we know work will be submitted against it
            self.device.reset_fences(&[in_flight])?;

            self.record_frame(cmd, image_index as usize)?;

            let render_finished = self.chain.render_finished[image_index as usize];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let submit = vk::SubmitInfo {
                wait_semaphore_count: 1,
                p_wait_semaphores: &image_available,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &render_finished,
                ..Default::default()
            };
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), in_flight)
                .context("queue_submit")?;

            let present = vk::PresentInfoKHR {
                wait_semaphore_count: 1,
                p_wait_semaphores: &render_finished,
                swapchain_count: 1,
                p_swapchains: &self.chain.swapchain,
                p_image_indices: &image_index,
                ..Default::default()
            };
            let needs_recreate = match self.swapchain_loader.queue_present(self.queue, &present) {
                Ok(suboptimal) => suboptimal,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
                Err(e) => return Err(anyhow!("queue_present: {e:?}")),
            };

            self.cursor.advance();

            if needs_recreate {
                self.recreate_swapchain()?;
            }
        }
        Ok(FrameStatus::Presented)
    }
}
