// Device manager - shared Vulkan instance/device lifecycle
//
// Responsibilities:
// - Instance creation with validation layers (first surface attach)
// - Physical device selection against the whole registered surface set
// - Logical device + graphics/present queue creation
// - Re-selection when a new surface outgrows the current device
// - Full teardown when the last surface detaches
//
// One instance per process, explicitly constructed and shared behind
// Arc<Mutex<_>> by whatever composes the application.

use anyhow::{Context, Result};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

/// How SurfaceContexts share the manager. Frame loops are single-threaded,
/// the lock just serializes attach/detach against frame-time reads.
pub type SharedDeviceManager = Arc<Mutex<DeviceManager>>;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const DEVICE_EXTENSIONS: [&CStr; 1] = [ash::extensions::khr::Swapchain::name()];

/// Instance-level state, alive while at least one surface is attached.
pub(crate) struct InstanceState {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_fns: ash::extensions::khr::Surface,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

/// The selected physical/logical device pair and its shared queue.
pub(crate) struct Gpu {
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub queue_family: u32,
    pub adapter_name: String,
}

pub struct DeviceManager {
    app_name: String,
    enable_validation: bool,
    surfaces: Vec<vk::SurfaceKHR>,
    instance: Option<InstanceState>,
    gpu: Option<Gpu>,
    /// Bumped on every device (re)selection and teardown. Contexts compare
    /// this against the generation they built their resources under.
    generation: u64,
}

impl DeviceManager {
    /// No Vulkan work happens here; the instance is created lazily on the
    /// first surface attach. Validation is only honored in debug builds.
    pub fn new(app_name: &str, enable_validation: bool) -> Self {
        Self {
            app_name: app_name.to_owned(),
            enable_validation: cfg!(debug_assertions) && enable_validation,
            surfaces: Vec::new(),
            instance: None,
            gpu: None,
            generation: 0,
        }
    }

    pub fn into_shared(self) -> SharedDeviceManager {
        Arc::new(Mutex::new(self))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn adapter_name(&self) -> Option<&str> {
        self.gpu.as_ref().map(|g| g.adapter_name.as_str())
    }

    /// Queue family index shared by every context on this device. Exposed so
    /// overlay collaborators can allocate their own pools against it.
    pub fn queue_family_index(&self) -> Option<u32> {
        self.gpu.as_ref().map(|g| g.queue_family)
    }

    pub fn graphics_queue(&self) -> Option<vk::Queue> {
        self.gpu.as_ref().map(|g| g.graphics_queue)
    }

    pub(crate) fn instance_state(&self) -> Result<&InstanceState> {
        self.instance.as_ref().context("Vulkan instance not created")
    }

    pub(crate) fn gpu(&self) -> Result<&Gpu> {
        self.gpu.as_ref().context("No Vulkan device selected")
    }

    /// Register a new presentation surface. On the first attach this creates
    /// the instance; on every attach the current device is re-validated
    /// against the entire surface set and replaced if it no longer qualifies.
    /// Detaching never forces a re-selection.
    pub(crate) fn attach_surface(
        &mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR> {
        if self.instance.is_none() {
            self.instance = Some(self.create_instance(display)?);
        }

        let surface = {
            let inst = self.instance.as_ref().context("Vulkan instance not created")?;
            create_native_surface(&inst.entry, &inst.instance, display, window)?
        };

        self.surfaces.push(surface);

        let selection = if self.gpu.is_none() {
            self.select_device()
        } else {
            match self.current_device_suits_all() {
                Ok(true) => {
                    log::debug!(
                        "Current device still serves all {} surfaces",
                        self.surfaces.len()
                    );
                    Ok(())
                }
                Ok(false) => {
                    log::info!("Current device cannot serve the new surface set, re-selecting");
                    self.select_device()
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = selection {
            // Unwind: no partially attached surface is left reachable
            self.surfaces.pop();
            if let Some(inst) = &self.instance {
                unsafe { inst.surface_fns.destroy_surface(surface, None) };
            }
            if self.surfaces.is_empty() {
                self.destroy_gpu();
                self.destroy_instance();
            } else if self.gpu.is_none() {
                // Re-selection destroyed the old device before failing. The
                // remaining set was served before this attach, so selecting
                // for it again succeeds and existing contexts rebuild through
                // the generation check instead of erroring.
                if let Err(restore) = self.select_device() {
                    log::error!(
                        "Failed to restore device for {} remaining surfaces: {:#}",
                        self.surfaces.len(),
                        restore
                    );
                }
            }
            return Err(e);
        }

        Ok(surface)
    }

    /// Drop a surface from the registry. When the registry empties, the
    /// device selection and then the instance are destroyed.
    pub(crate) fn detach_surface(&mut self, surface: vk::SurfaceKHR) {
        let Some(index) = self.surfaces.iter().position(|&s| s == surface) else {
            if cfg!(debug_assertions) {
                log::warn!("detach_surface called with an unregistered surface");
            }
            return;
        };
        self.surfaces.remove(index);

        if let Some(inst) = &self.instance {
            unsafe { inst.surface_fns.destroy_surface(surface, None) };
        }

        if self.surfaces.is_empty() {
            log::info!("Last surface detached, tearing down device and instance");
            self.destroy_gpu();
            self.destroy_instance();
        }
    }

    fn create_instance(&self, display: RawDisplayHandle) -> Result<InstanceState> {
        log::info!("Creating Vulkan instance for '{}'", self.app_name);

        let entry = unsafe { ash::Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let wanted_layers: Vec<&CStr> = if self.enable_validation {
            vec![VALIDATION_LAYER]
        } else {
            Vec::new()
        };

        let available = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        if !layers_supported(&available, &wanted_layers) {
            anyhow::bail!("Required validation layers are not available");
        }

        let app_name = CString::new(self.app_name.as_str())?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"frameloop")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = surface_extensions(display)?;
        if self.enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_ptrs: Vec<*const c_char> = wanted_layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if self.enable_validation {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_fns = ash::extensions::khr::Surface::new(&entry, &instance);

        Ok(InstanceState {
            entry,
            instance,
            surface_fns,
            debug_utils,
        })
    }

    /// Run selection over every enumerated physical device and create the
    /// logical device for the winner. Fails when no device can present to
    /// every registered surface.
    fn select_device(&mut self) -> Result<()> {
        self.destroy_gpu();

        let inst = self.instance.as_ref().context("Vulkan instance not created")?;

        let physical_devices = unsafe { inst.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;
        if physical_devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut profiles = Vec::with_capacity(physical_devices.len());
        for &pd in &physical_devices {
            profiles.push(profile_adapter(inst, &self.surfaces, pd)?);
        }

        let (index, queue_family) = select_adapter(&profiles).with_context(|| {
            format!(
                "No device can present to all {} registered surfaces",
                self.surfaces.len()
            )
        })?;
        let physical_device = physical_devices[index];

        let (device, graphics_queue) =
            self.create_logical_device(physical_device, queue_family)?;

        let props = unsafe { inst.instance.get_physical_device_properties(physical_device) };
        let adapter_name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        log::info!(
            "Selected GPU: {} ({})",
            adapter_name,
            vendor_name(props.vendor_id)
        );
        log::info!(
            "API {}.{}.{}, driver {}.{}.{}, queue family {}",
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version),
            vk::api_version_major(props.driver_version),
            vk::api_version_minor(props.driver_version),
            vk::api_version_patch(props.driver_version),
            queue_family
        );

        self.gpu = Some(Gpu {
            physical_device,
            device,
            graphics_queue,
            queue_family,
            adapter_name,
        });
        self.generation += 1;

        Ok(())
    }

    fn create_logical_device(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let inst = self.instance.as_ref().context("Vulkan instance not created")?;

        let queue_priorities = [1.0_f32];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions: Vec<*const c_char> =
            DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            inst.instance
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok((device, graphics_queue))
    }

    /// Re-validation after an attach: the recorded queue family must still
    /// present to every surface in the combined set. Checking the recorded
    /// family (not just any family) keeps the queue handed to existing
    /// contexts valid.
    fn current_device_suits_all(&self) -> Result<bool> {
        let inst = self.instance.as_ref().context("Vulkan instance not created")?;
        let gpu = self.gpu.as_ref().context("No Vulkan device selected")?;

        let profile = profile_adapter(inst, &self.surfaces, gpu.physical_device)?;
        Ok(family_suits_all(&profile, gpu.queue_family))
    }

    fn destroy_gpu(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            unsafe {
                let _ = gpu.device.device_wait_idle();
                gpu.device.destroy_device(None);
            }
            self.generation += 1;
        }
    }

    fn destroy_instance(&mut self) {
        if let Some(mut inst) = self.instance.take() {
            unsafe {
                if let Some((debug_fns, messenger)) = inst.debug_utils.take() {
                    debug_fns.destroy_debug_utils_messenger(messenger, None);
                }
                inst.instance.destroy_instance(None);
            }
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        // Normally empty by now; contexts detach their own surfaces first
        if !self.surfaces.is_empty() {
            log::warn!(
                "DeviceManager dropped with {} surfaces still attached",
                self.surfaces.len()
            );
            if let Some(inst) = &self.instance {
                for &surface in &self.surfaces {
                    unsafe { inst.surface_fns.destroy_surface(surface, None) };
                }
            }
            self.surfaces.clear();
        }
        self.destroy_gpu();
        self.destroy_instance();
    }
}

fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_fns = ash::extensions::ext::DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_fns.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to create debug messenger")?;

    Ok((debug_fns, messenger))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

/// Instance extensions needed to present to the given window system:
/// VK_KHR_surface plus the platform-specific surface extension.
fn surface_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => ash::extensions::khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => ash::extensions::khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => ash::extensions::khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => ash::extensions::khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported window system: {:?}", other),
    };

    Ok(vec![
        ash::extensions::khr::Surface::name().as_ptr(),
        platform.as_ptr(),
    ])
}

/// Create a surface from raw window-system handles.
fn create_native_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const c_void;
            let hwnd = handle.hwnd.get() as *const c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            let loader = ash::extensions::khr::Win32Surface::new(entry, instance);
            unsafe { loader.create_win32_surface(&create_info, None) }
                .context("Failed to create Win32 surface")
        }

        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .map(|d| d.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut _)
                .window(window.window);
            let loader = ash::extensions::khr::XlibSurface::new(entry, instance);
            unsafe { loader.create_xlib_surface(&create_info, None) }
                .context("Failed to create Xlib surface")
        }

        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display
                .connection
                .map(|c| c.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection)
                .window(window.window.get());
            let loader = ash::extensions::khr::XcbSurface::new(entry, instance);
            unsafe { loader.create_xcb_surface(&create_info, None) }
                .context("Failed to create XCB surface")
        }

        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(window.surface.as_ptr());
            let loader = ash::extensions::khr::WaylandSurface::new(entry, instance);
            unsafe { loader.create_wayland_surface(&create_info, None) }
                .context("Failed to create Wayland surface")
        }

        _ => anyhow::bail!("Unsupported window system"),
    }
}

// ---------------------------------------------------------------------------
// Selection policy. Everything the scoring needs is snapshotted into plain
// structs first, so the policy itself has no driver dependency.
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct QueueFamilyProfile {
    pub graphics: bool,
    /// One flag per registered surface, in registry order.
    pub presentable: Vec<bool>,
}

#[derive(Debug)]
pub(crate) struct AdapterProfile {
    pub discrete: bool,
    pub memory_mib: u64,
    pub has_presentation_extensions: bool,
    pub queue_families: Vec<QueueFamilyProfile>,
}

/// Snapshot one physical device against the current surface set.
fn profile_adapter(
    inst: &InstanceState,
    surfaces: &[vk::SurfaceKHR],
    physical_device: vk::PhysicalDevice,
) -> Result<AdapterProfile> {
    let props = unsafe { inst.instance.get_physical_device_properties(physical_device) };
    let memory = unsafe {
        inst.instance
            .get_physical_device_memory_properties(physical_device)
    };

    let memory_mib = memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .map(|heap| heap.size)
        .sum::<u64>()
        / (1024 * 1024);

    let available_extensions = unsafe {
        inst.instance
            .enumerate_device_extension_properties(physical_device)
    }
    .context("Failed to enumerate device extensions")?;

    let has_presentation_extensions = DEVICE_EXTENSIONS.iter().all(|wanted| {
        available_extensions.iter().any(|ext| {
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == *wanted
        })
    });

    let family_props = unsafe {
        inst.instance
            .get_physical_device_queue_family_properties(physical_device)
    };

    let mut queue_families = Vec::with_capacity(family_props.len());
    for (index, family) in family_props.iter().enumerate() {
        let mut presentable = Vec::with_capacity(surfaces.len());
        for &surface in surfaces {
            let supported = unsafe {
                inst.surface_fns.get_physical_device_surface_support(
                    physical_device,
                    index as u32,
                    surface,
                )
            }
            .unwrap_or(false);
            presentable.push(supported);
        }
        queue_families.push(QueueFamilyProfile {
            graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            presentable,
        });
    }

    Ok(AdapterProfile {
        discrete: props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
        memory_mib,
        has_presentation_extensions,
        queue_families,
    })
}

/// First queue family that supports graphics and can present to every
/// registered surface. Multi-surface compatibility is mandatory.
fn present_queue_family(profile: &AdapterProfile) -> Option<u32> {
    profile
        .queue_families
        .iter()
        .position(|family| family.graphics && family.presentable.iter().all(|&p| p))
        .map(|index| index as u32)
}

fn family_suits_all(profile: &AdapterProfile, queue_family: u32) -> bool {
    profile.has_presentation_extensions
        && profile
            .queue_families
            .get(queue_family as usize)
            .map(|family| family.graphics && family.presentable.iter().all(|&p| p))
            .unwrap_or(false)
}

/// -1 marks an unusable device. Eligible devices score +1000 for a discrete
/// GPU plus total heap memory in MiB.
fn rate_adapter(profile: &AdapterProfile) -> i64 {
    if !profile.has_presentation_extensions || present_queue_family(profile).is_none() {
        return -1;
    }

    let mut score = 0_i64;
    if profile.discrete {
        score += 1000;
    }
    score + profile.memory_mib as i64
}

/// Best-scoring eligible device, ties broken by enumeration order.
fn select_adapter(profiles: &[AdapterProfile]) -> Option<(usize, u32)> {
    let mut best: Option<(usize, i64)> = None;

    for (index, profile) in profiles.iter().enumerate() {
        let score = rate_adapter(profile);
        if score < 0 {
            continue;
        }
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((index, score));
        }
    }

    let (index, _) = best?;
    let family = present_queue_family(&profiles[index])?;
    Some((index, family))
}

fn layers_supported(available: &[vk::LayerProperties], wanted: &[&CStr]) -> bool {
    wanted.iter().all(|layer| {
        available
            .iter()
            .any(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) } == *layer)
    })
}

fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x1002 => "AMD",
        0x10DE => "NVIDIA",
        0x8086 => "Intel",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(graphics: bool, presentable: &[bool]) -> QueueFamilyProfile {
        QueueFamilyProfile {
            graphics,
            presentable: presentable.to_vec(),
        }
    }

    fn adapter(
        discrete: bool,
        memory_mib: u64,
        families: Vec<QueueFamilyProfile>,
    ) -> AdapterProfile {
        AdapterProfile {
            discrete,
            memory_mib,
            has_presentation_extensions: true,
            queue_families: families,
        }
    }

    #[test]
    fn queue_family_needs_graphics_and_every_surface() {
        let profile = adapter(
            true,
            4096,
            vec![
                family(true, &[true, false]),
                family(false, &[true, true]),
                family(true, &[true, true]),
            ],
        );
        assert_eq!(present_queue_family(&profile), Some(2));
    }

    #[test]
    fn no_family_serves_all_surfaces() {
        let profile = adapter(
            true,
            4096,
            vec![family(true, &[true, false]), family(true, &[false, true])],
        );
        assert_eq!(present_queue_family(&profile), None);
        assert_eq!(rate_adapter(&profile), -1);
    }

    #[test]
    fn missing_presentation_extension_is_unusable() {
        let mut profile = adapter(true, 8192, vec![family(true, &[true])]);
        profile.has_presentation_extensions = false;
        assert_eq!(rate_adapter(&profile), -1);
        assert!(!family_suits_all(&profile, 0));
    }

    #[test]
    fn discrete_gpu_outscores_integrated_at_equal_memory() {
        let discrete = adapter(true, 4096, vec![family(true, &[true])]);
        let integrated = adapter(false, 4096, vec![family(true, &[true])]);
        assert!(rate_adapter(&discrete) > rate_adapter(&integrated));
        assert_eq!(rate_adapter(&discrete), 1000 + 4096);
    }

    #[test]
    fn selection_picks_highest_score() {
        let profiles = vec![
            adapter(false, 2048, vec![family(true, &[true])]),
            adapter(true, 8192, vec![family(true, &[true])]),
        ];
        assert_eq!(select_adapter(&profiles), Some((1, 0)));
    }

    #[test]
    fn selection_ties_break_by_enumeration_order() {
        let profiles = vec![
            adapter(true, 4096, vec![family(true, &[true])]),
            adapter(true, 4096, vec![family(true, &[true])]),
        ];
        assert_eq!(select_adapter(&profiles), Some((0, 0)));
    }

    #[test]
    fn only_common_device_wins_even_when_integrated() {
        // Second surface only reachable from the integrated GPU; the
        // discrete one must lose despite its score.
        let profiles = vec![
            adapter(true, 8192, vec![family(true, &[true, false])]),
            adapter(false, 2048, vec![family(true, &[true, true])]),
        ];
        assert_eq!(select_adapter(&profiles), Some((1, 0)));
    }

    #[test]
    fn failed_reselection_restores_prior_surface_set() {
        // Attaching a second surface with no device serving both fails the
        // combined selection, but the set that was served before the attach
        // still selects, so the unwind can re-select for it rather than
        // leaving existing surfaces with no device.
        let combined = vec![
            adapter(true, 8192, vec![family(true, &[true, false])]),
            adapter(false, 2048, vec![family(true, &[false, true])]),
        ];
        assert_eq!(select_adapter(&combined), None);

        let remaining = vec![
            adapter(true, 8192, vec![family(true, &[true])]),
            adapter(false, 2048, vec![family(true, &[false])]),
        ];
        assert_eq!(select_adapter(&remaining), Some((0, 0)));
    }

    #[test]
    fn no_common_device_fails_selection() {
        // Neither device serves both surfaces - selection must fail rather
        // than silently drop one surface.
        let profiles = vec![
            adapter(true, 8192, vec![family(true, &[true, false])]),
            adapter(false, 2048, vec![family(true, &[false, true])]),
        ];
        assert_eq!(select_adapter(&profiles), None);
    }

    #[test]
    fn empty_enumeration_fails_selection() {
        assert_eq!(select_adapter(&[]), None);
    }

    #[test]
    fn recorded_family_revalidation_is_idempotent() {
        // Attaching a surface the recorded family already presents to must
        // not trigger a re-selection.
        let before = adapter(true, 4096, vec![family(true, &[true])]);
        let family_index = present_queue_family(&before).unwrap();

        let after = adapter(true, 4096, vec![family(true, &[true, true])]);
        assert!(family_suits_all(&after, family_index));

        let grown = adapter(true, 4096, vec![family(true, &[true, false])]);
        assert!(!family_suits_all(&grown, family_index));
    }

    fn layer(name: &str) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        for (i, byte) in name.bytes().enumerate() {
            props.layer_name[i] = byte as c_char;
        }
        props
    }

    #[test]
    fn validation_layer_matching() {
        let available = [layer("VK_LAYER_KHRONOS_validation"), layer("VK_LAYER_MESA_overlay")];
        assert!(layers_supported(&available, &[VALIDATION_LAYER]));
        assert!(layers_supported(&available, &[]));
        assert!(!layers_supported(&[layer("VK_LAYER_MESA_overlay")], &[VALIDATION_LAYER]));
    }

    #[test]
    fn vendor_names_from_pci_ids() {
        assert_eq!(vendor_name(0x1002), "AMD");
        assert_eq!(vendor_name(0x10DE), "NVIDIA");
        assert_eq!(vendor_name(0x8086), "Intel");
        assert_eq!(vendor_name(0xFFFF), "Unknown");
    }
}
