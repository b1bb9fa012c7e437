// Surface context - one on-screen presentation target end to end
//
// Owns the surface, swapchain, render target, command buffers, and per-image
// sync objects for a single drawable, and runs the per-frame
// acquire/record/submit/present sequence. Built on top of DeviceManager;
// never outlives it.
//
// Frame cycle:
//   wait fence[current] -> consume pending resize -> acquire image
//   -> reset+begin commands -> begin render pass (caller records draws)
//   -> end pass -> submit -> present -> advance current frame
//
// The submit waits on the acquire semaphore for `current_frame` but signals
// the present semaphore for the *acquired image index*; the two diverge once
// the image count is driver-chosen, which is why the sync set is sized per
// image rather than to a fixed frames-in-flight constant.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use super::device::{DeviceManager, SharedDeviceManager};
use super::swapchain::Swapchain;
use super::sync::SyncSet;

/// What the windowing collaborator must provide: native handles for surface
/// creation plus two live queries. Neither query result is cached - the
/// framebuffer size is read when sizing decisions are made and the clear
/// color is read fresh every frame.
pub trait Drawable: HasWindowHandle + HasDisplayHandle {
    /// Current framebuffer size in pixels. Minimized windows report zero.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Clear color for the frame about to be recorded.
    fn clear_color(&self) -> [f32; 4];
}

/// Render pass plus one framebuffer per swapchain image view.
pub struct RenderTarget {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    device: ash::Device,
    orphaned: bool,
}

impl RenderTarget {
    pub fn new(device: &ash::Device, swapchain: &Swapchain) -> Result<Self> {
        // Single color attachment: clear on load, store on end, transition
        // to the presentable layout at pass end
        let color_attachment = vk::AttachmentDescription::builder()
            .format(swapchain.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_refs = [color_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build();

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);

        let render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        let mut target = Self {
            render_pass,
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            device: device.clone(),
            orphaned: false,
        };

        for &view in &swapchain.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            target.framebuffers.push(framebuffer);
        }

        Ok(target)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn abandon(mut self) {
        self.orphaned = true;
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if self.orphaned {
            return;
        }

        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Command pool plus one primary buffer per swapchain image. Buffers are
/// reset and re-recorded every frame.
pub struct FrameCommands {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: ash::Device,
    orphaned: bool,
}

impl FrameCommands {
    pub fn new(device: &ash::Device, queue_family: u32, image_count: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(image_count as u32);

        let buffers = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        Ok(Self {
            pool,
            buffers,
            device: device.clone(),
            orphaned: false,
        })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, index: usize) -> vk::CommandBuffer {
        self.buffers[index]
    }

    pub fn abandon(mut self) {
        self.orphaned = true;
    }
}

impl Drop for FrameCommands {
    fn drop(&mut self) {
        if self.orphaned {
            return;
        }

        // Destroying the pool frees its buffers
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Cached device state, refreshed whenever the manager's generation moves.
struct GpuLink {
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    generation: u64,
}

fn link_gpu(manager: &DeviceManager) -> Result<GpuLink> {
    let gpu = manager.gpu()?;
    Ok(GpuLink {
        device: gpu.device.clone(),
        queue: gpu.graphics_queue,
        queue_family: gpu.queue_family,
        generation: manager.generation(),
    })
}

fn build_frame_resources(
    manager: &DeviceManager,
    surface: vk::SurfaceKHR,
    framebuffer_size: (u32, u32),
    preferred_present_mode: vk::PresentModeKHR,
) -> Result<(Swapchain, RenderTarget, FrameCommands, SyncSet)> {
    let inst = manager.instance_state()?;
    let gpu = manager.gpu()?;

    let swapchain = Swapchain::new(
        &inst.instance,
        &gpu.device,
        gpu.physical_device,
        &inst.surface_fns,
        surface,
        framebuffer_size,
        preferred_present_mode,
    )?;
    let target = RenderTarget::new(&gpu.device, &swapchain)?;
    let commands = FrameCommands::new(&gpu.device, gpu.queue_family, swapchain.image_count())?;
    let sync = SyncSet::new(&gpu.device, swapchain.image_count())?;

    debug_assert_eq!(swapchain.image_count(), swapchain.image_views.len());
    debug_assert_eq!(swapchain.image_count(), commands.len());
    debug_assert_eq!(swapchain.image_count(), sync.len());

    Ok((swapchain, target, commands, sync))
}

pub struct SurfaceContext {
    // Field order mirrors reverse-creation teardown; explicit Drop below
    // still drives the ordering through these Options.
    sync: Option<SyncSet>,
    commands: Option<FrameCommands>,
    target: Option<RenderTarget>,
    swapchain: Option<Swapchain>,

    surface: vk::SurfaceKHR,
    gpu: GpuLink,
    drawable: Arc<dyn Drawable>,
    manager: SharedDeviceManager,
    preferred_present_mode: vk::PresentModeKHR,

    current_frame: usize,
    image_index: u32,
    pending_resize: bool,
    recording: bool,
}

impl SurfaceContext {
    /// Attach the drawable's surface to the manager (which may trigger a
    /// device re-selection) and build the full presentation chain against
    /// the selected device. Fails fatally; nothing half-built survives.
    pub fn new(
        manager: SharedDeviceManager,
        drawable: Arc<dyn Drawable>,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let display = drawable
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window = drawable
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let mut mgr = manager.lock();
        let surface = mgr.attach_surface(display, window)?;

        let built = (|| {
            let gpu = link_gpu(&mgr)?;
            let resources = build_frame_resources(
                &mgr,
                surface,
                drawable.framebuffer_size(),
                preferred_present_mode,
            )?;
            Ok::<_, anyhow::Error>((gpu, resources))
        })();

        let (gpu, (swapchain, target, commands, sync)) = match built {
            Ok(parts) => parts,
            Err(e) => {
                mgr.detach_surface(surface);
                return Err(e);
            }
        };
        drop(mgr);

        Ok(Self {
            sync: Some(sync),
            commands: Some(commands),
            target: Some(target),
            swapchain: Some(swapchain),
            surface,
            gpu,
            drawable,
            manager,
            preferred_present_mode,
            current_frame: 0,
            image_index: 0,
            pending_resize: false,
            recording: false,
        })
    }

    /// Resize notification from the window collaborator. Zero sizes come
    /// from minimized windows and are a no-op; the flag is consumed at the
    /// top of the next frame, never mid-frame.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.pending_resize = resize_request(self.pending_resize, width, height);
    }

    /// Open a frame: wait for the previous frame on this sync slot, apply a
    /// pending rebuild, acquire an image, and begin the render pass with the
    /// drawable's current clear color. Returns false when the frame was
    /// skipped (minimized, or the swapchain went out of date); the caller
    /// records draw work and calls `end_frame` only on true.
    pub fn begin_frame(&mut self) -> Result<bool> {
        if self.recording {
            if cfg!(debug_assertions) {
                log::warn!("begin_frame called while a frame is already open");
            }
            return Ok(true);
        }

        self.refresh_device_link()?;

        match frame_plan(self.pending_resize, self.drawable.framebuffer_size()) {
            FramePlan::SkipMinimized => return Ok(false),
            FramePlan::Recreate => {
                self.wait_current_fence()?;
                self.recreate_swapchain()?;
                self.pending_resize = false;
            }
            FramePlan::Proceed => self.wait_current_fence()?,
        }

        let (acquire_semaphore, fence) = {
            let sync = self.sync.as_ref().context("Sync objects missing")?;
            let frame = sync.frame(self.current_frame);
            (frame.acquire, frame.in_flight)
        };

        let swapchain = self.swapchain.as_ref().context("Swapchain missing")?;
        let (image_index, suboptimal) = match swapchain.acquire(acquire_semaphore)? {
            Some(acquired) => acquired,
            None => {
                // Out of date: rebuild next frame, nothing was signaled
                self.pending_resize = true;
                return Ok(false);
            }
        };
        if suboptimal {
            self.pending_resize = true;
        }

        unsafe {
            self.gpu
                .device
                .reset_fences(&[fence])
                .context("Failed to reset frame fence")?;
        }

        let commands = self.commands.as_ref().context("Command buffers missing")?;
        let target = self.target.as_ref().context("Render target missing")?;
        let cmd = commands.buffer(image_index as usize);

        unsafe {
            self.gpu
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.gpu
                .device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            // Clear color is read from the drawable at call time, so changes
            // apply without a context rebuild
            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.drawable.clear_color(),
                },
            }];

            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(target.render_pass())
                .framebuffer(target.framebuffer(image_index as usize))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: swapchain.extent,
                })
                .clear_values(&clear_values);

            self.gpu
                .device
                .cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
        }

        self.image_index = image_index;
        self.recording = true;
        Ok(true)
    }

    /// Close the frame: end the render pass, submit, present, and advance
    /// the frame counter. Out-of-date or suboptimal presentation is not an
    /// error; it flags a rebuild and the frame counts as complete.
    pub fn end_frame(&mut self) -> Result<()> {
        if !self.recording {
            if cfg!(debug_assertions) {
                log::warn!("end_frame called without an open frame");
            }
            return Ok(());
        }

        let sync = self.sync.as_ref().context("Sync objects missing")?;
        let commands = self.commands.as_ref().context("Command buffers missing")?;
        let swapchain = self.swapchain.as_ref().context("Swapchain missing")?;

        let cmd = commands.buffer(self.image_index as usize);

        unsafe {
            self.gpu.device.cmd_end_render_pass(cmd);
            self.gpu
                .device
                .end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        // Wait on the acquire semaphore for this frame slot, signal the
        // present semaphore owned by the acquired image
        let wait_semaphores = [sync.frame(self.current_frame).acquire];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.frame(self.image_index as usize).present];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.gpu
                .device
                .queue_submit(
                    self.gpu.queue,
                    &[submit_info.build()],
                    sync.frame(self.current_frame).in_flight,
                )
                .context("Failed to submit command buffer")?;
        }

        let needs_rebuild = swapchain.present(
            self.gpu.queue,
            self.image_index,
            sync.frame(self.image_index as usize).present,
        )?;
        if needs_rebuild {
            self.pending_resize = true;
        }

        self.current_frame = next_frame_index(self.current_frame, sync.len());
        self.recording = false;
        Ok(())
    }

    /// Idle the device, destroy the presentation chain in reverse creation
    /// order, and rebuild it from the surface's current capabilities.
    fn recreate_swapchain(&mut self) -> Result<()> {
        unsafe {
            self.gpu
                .device
                .device_wait_idle()
                .context("Failed to idle device before swapchain rebuild")?;
        }

        self.sync = None;
        self.commands = None;
        self.target = None;
        self.swapchain = None;

        let mgr = self.manager.lock();
        let (swapchain, target, commands, sync) = build_frame_resources(
            &mgr,
            self.surface,
            self.drawable.framebuffer_size(),
            self.preferred_present_mode,
        )?;
        drop(mgr);

        log::debug!(
            "Swapchain recreated: {}x{}, {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count()
        );

        self.swapchain = Some(swapchain);
        self.target = Some(target);
        self.commands = Some(commands);
        self.sync = Some(sync);
        self.current_frame = 0;
        self.image_index = 0;
        Ok(())
    }

    /// If the manager re-selected the device since our resources were built,
    /// those handles died with the old logical device. Abandon them (no
    /// destroy calls into a dead device) and rebuild against the new one.
    fn refresh_device_link(&mut self) -> Result<()> {
        let mgr = self.manager.lock();
        if mgr.generation() == self.gpu.generation {
            return Ok(());
        }

        log::info!("Device changed underneath surface context, rebuilding resources");

        if let Some(sync) = self.sync.take() {
            sync.abandon();
        }
        if let Some(commands) = self.commands.take() {
            commands.abandon();
        }
        if let Some(target) = self.target.take() {
            target.abandon();
        }
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.abandon();
        }

        self.gpu = link_gpu(&mgr)?;
        let (swapchain, target, commands, sync) = build_frame_resources(
            &mgr,
            self.surface,
            self.drawable.framebuffer_size(),
            self.preferred_present_mode,
        )?;
        drop(mgr);

        self.swapchain = Some(swapchain);
        self.target = Some(target);
        self.commands = Some(commands);
        self.sync = Some(sync);
        self.current_frame = 0;
        self.image_index = 0;
        self.recording = false;
        Ok(())
    }

    fn wait_current_fence(&self) -> Result<()> {
        let sync = self.sync.as_ref().context("Sync objects missing")?;
        let fence = sync.frame(self.current_frame).in_flight;

        unsafe {
            self.gpu
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .context("Failed waiting for previous frame")?;
        }
        Ok(())
    }

    // Overlay collaborator surface: enough to inject draw commands into the
    // same render pass without owning a swapchain.

    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.target.as_ref().map(|t| t.render_pass())
    }

    /// Command buffer for the image acquired by the open frame.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        if self.recording {
            self.commands
                .as_ref()
                .map(|c| c.buffer(self.image_index as usize))
        } else {
            None
        }
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.gpu.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.gpu.queue_family
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|s| s.extent)
    }

    pub fn image_count(&self) -> Option<usize> {
        self.swapchain.as_ref().map(|s| s.image_count())
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }
}

impl Drop for SurfaceContext {
    fn drop(&mut self) {
        let device_alive = self.manager.lock().generation() == self.gpu.generation;

        if device_alive {
            unsafe {
                let _ = self.gpu.device.device_wait_idle();
            }
            // Other sync slots may still carry outstanding GPU work
            if let Some(sync) = &self.sync {
                let _ = sync.wait_all();
            }
            self.sync = None;
            self.commands = None;
            self.target = None;
            self.swapchain = None;
        } else {
            // The logical device these were created on is already gone
            if let Some(sync) = self.sync.take() {
                sync.abandon();
            }
            if let Some(commands) = self.commands.take() {
                commands.abandon();
            }
            if let Some(target) = self.target.take() {
                target.abandon();
            }
            if let Some(swapchain) = self.swapchain.take() {
                swapchain.abandon();
            }
        }

        self.manager.lock().detach_surface(self.surface);
    }
}

// ---------------------------------------------------------------------------
// Frame-pacing policy, kept free of Vulkan handles so it can be tested.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePlan {
    /// Zero-area framebuffer: no swapchain call is attempted.
    SkipMinimized,
    /// A resize was flagged; rebuild before acquiring.
    Recreate,
    Proceed,
}

fn frame_plan(pending_resize: bool, framebuffer_size: (u32, u32)) -> FramePlan {
    if framebuffer_size.0 == 0 || framebuffer_size.1 == 0 {
        FramePlan::SkipMinimized
    } else if pending_resize {
        FramePlan::Recreate
    } else {
        FramePlan::Proceed
    }
}

/// Zero sizes come from minimized windows and must not flag a rebuild.
fn resize_request(pending: bool, width: u32, height: u32) -> bool {
    if width == 0 || height == 0 {
        pending
    } else {
        true
    }
}

fn next_frame_index(current: usize, image_count: usize) -> usize {
    (current + 1) % image_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_cycles_with_image_count_period() {
        let image_count = 3;
        let mut frame = 0;
        for step in 1..=100 {
            frame = next_frame_index(frame, image_count);
            assert!(frame < image_count);
            assert_eq!(frame, step % image_count);
        }
    }

    #[test]
    fn frame_index_wraps_for_any_count() {
        for count in 1..=8 {
            assert_eq!(next_frame_index(count - 1, count), 0);
        }
    }

    #[test]
    fn zero_resize_is_a_no_op() {
        assert!(!resize_request(false, 0, 600));
        assert!(!resize_request(false, 800, 0));
        assert!(resize_request(true, 0, 0));
        assert!(resize_request(false, 800, 600));
    }

    #[test]
    fn minimized_frame_skips_even_with_pending_resize() {
        assert_eq!(frame_plan(true, (0, 0)), FramePlan::SkipMinimized);
        assert_eq!(frame_plan(false, (800, 0)), FramePlan::SkipMinimized);
    }

    #[test]
    fn pending_resize_recreates_once_visible() {
        assert_eq!(frame_plan(true, (800, 600)), FramePlan::Recreate);
        assert_eq!(frame_plan(false, (800, 600)), FramePlan::Proceed);
    }

    #[test]
    fn minimize_then_restore_recreates_exactly_once() {
        // 800x600 -> 0x0 (minimize) -> 1024x768: the rebuild happens after
        // the non-zero resize, and only once.
        fn run_frame(pending: &mut bool, fb: (u32, u32)) -> bool {
            match frame_plan(*pending, fb) {
                FramePlan::Recreate => {
                    *pending = false;
                    true
                }
                _ => false,
            }
        }

        let mut pending = false;
        let mut recreations = 0;

        recreations += run_frame(&mut pending, (800, 600)) as u32;

        pending = resize_request(pending, 0, 0);
        for _ in 0..3 {
            recreations += run_frame(&mut pending, (0, 0)) as u32;
        }
        assert_eq!(recreations, 0);

        pending = resize_request(pending, 1024, 768);
        recreations += run_frame(&mut pending, (1024, 768)) as u32;
        assert_eq!(recreations, 1);

        recreations += run_frame(&mut pending, (1024, 768)) as u32;
        assert_eq!(recreations, 1);
    }
}
