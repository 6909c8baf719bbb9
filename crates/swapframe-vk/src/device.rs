// SPDX-License-Identifier: CEPL-1.0
//! Device context: instance, surface, physical device selection, logical
//! device and its queues. Created once and destroyed last.
use std::ffi::{c_char, CStr};

use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::error::{GraphicsError, Result, VkResultExt};
use crate::instance::{create_instance, DebugMessenger, ENABLE_VALIDATION, VALIDATION_LAYERS};

pub const DEVICE_EXTENSIONS: &[&CStr] = &[swapchain::NAME];

/// Selection verdict for one candidate: every required extension is offered.
pub fn supports_extensions(available: &[&CStr], required: &[&CStr]) -> bool {
    required
        .iter()
        .all(|want| available.iter().any(|have| have == want))
}

/// Queue family lookup result before validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// Validated queue families; both are indices into the device's family list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// First graphics-capable family and, independently, the first family
    /// that can present. `supports_present` is asked in index order.
    pub fn find<E>(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> std::result::Result<bool, E>,
    ) -> std::result::Result<Self, E> {
        let graphics = families
            .iter()
            .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        let mut present = None;
        for i in 0..families.len() as u32 {
            if supports_present(i)? {
                present = Some(i);
                break;
            }
        }

        Ok(Self { graphics, present })
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(self) -> Result<QueueFamilies> {
        let graphics = self
            .graphics
            .ok_or(GraphicsError::MissingQueueFamily("graphics"))?;
        let present = self
            .present
            .ok_or(GraphicsError::MissingQueueFamily("present"))?;
        Ok(QueueFamilies { graphics, present })
    }
}

impl QueueFamilies {
    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub struct DeviceContext {
    pub(crate) device: ash::Device,
    pub(crate) swapchain_loader: swapchain::Device,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) families: QueueFamilies,
    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    // Dropped after the logical device.
    pub(crate) base: InstanceBase,
}

/// Instance-level half of the context. Owning it from the moment the instance
/// exists means every early return in `DeviceContext::new` tears down what was
/// already created.
pub(crate) struct InstanceBase {
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
    instance: ash::Instance,
    entry: Entry,
}

impl Drop for InstanceBase {
    fn drop(&mut self) {
        // STRICT TEARDOWN ORDER: surface, messenger, instance.
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some(debug) = &mut self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl DeviceContext {
    pub fn new<W>(window: &W, app_name: &str) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let dh = window.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let entry = Entry::linked();
        let instance = create_instance(&entry, dh, app_name)?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let mut base = InstanceBase {
            surface_loader,
            surface: vk::SurfaceKHR::null(),
            debug: None,
            instance,
            entry,
        };
        if ENABLE_VALIDATION {
            base.debug = Some(DebugMessenger::new(&base.entry, &base.instance)?);
        }
        base.surface =
            unsafe { ash_window::create_surface(&base.entry, &base.instance, dh, wh, None) }
                .context("ash_window::create_surface")?;

        let phys = pick_physical_device(&base.instance)?;
        let props = unsafe { base.instance.get_physical_device_queue_family_properties(phys) };
        let families = QueueFamilyIndices::find(&props, |i| unsafe {
            base.surface_loader
                .get_physical_device_surface_support(phys, i, base.surface)
        })
        .context("vkGetPhysicalDeviceSurfaceSupportKHR")?
        .resolve()?;
        debug!(
            "queue families: graphics={} present={}",
            families.graphics, families.present
        );

        let device = create_logical_device(&base.instance, phys, families)?;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = swapchain::Device::new(&base.instance, &device);
        let memory_properties =
            unsafe { base.instance.get_physical_device_memory_properties(phys) };

        Ok(DeviceContext {
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            families,
            phys,
            memory_properties,
            base,
        })
    }

    pub(crate) fn surface_loader(&self) -> &surface::Instance {
        &self.base.surface_loader
    }

    pub(crate) fn surface(&self) -> vk::SurfaceKHR {
        self.base.surface
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        // The instance half follows via field drop.
        unsafe { self.device.destroy_device(None) };
    }
}

fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.context("vkEnumeratePhysicalDevices")?;
    if devices.is_empty() {
        return Err(GraphicsError::NoPhysicalDevice);
    }

    // First match wins; candidates are not ranked.
    for phys in devices {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());
        if cfg!(debug_assertions) {
            debug!("candidate device: {name}");
        }

        let ext_props = unsafe { instance.enumerate_device_extension_properties(phys) }
            .context("vkEnumerateDeviceExtensionProperties")?;
        let available: Vec<&CStr> = ext_props
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok())
            .collect();

        if supports_extensions(&available, DEVICE_EXTENSIONS) {
            info!("selected device: {name}");
            return Ok(phys);
        }
    }
    Err(GraphicsError::NoSuitableDevice)
}

fn create_logical_device(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let extensions: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
    let layers: Vec<*const c_char> = if ENABLE_VALIDATION {
        VALIDATION_LAYERS.iter().map(|l| l.as_ptr()).collect()
    } else {
        Vec::new()
    };
    let features = vk::PhysicalDeviceFeatures::default();

    let dinfo = vk::DeviceCreateInfo {
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    unsafe { instance.create_device(phys, &dinfo, None) }.context("vkCreateDevice")
}
