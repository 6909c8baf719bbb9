// SPDX-License-Identifier: CEPL-1.0
//! Instance creation, validation layers and the debug messenger.
use std::ffi::{c_char, c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{GraphicsError, Result, VkResultExt};

/// Validation is a debug-build feature only.
pub const ENABLE_VALIDATION: bool = cfg!(debug_assertions);

pub const VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

const ENGINE_NAME: &CStr = c"swapframe";

/// First requested name that `available` lacks, if any.
pub fn find_missing_layer<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Option<&'a CStr> {
    requested
        .iter()
        .copied()
        .find(|want| !available.iter().any(|have| have == want))
}

/// Fails with the first requested layer the loader does not offer.
pub fn require_layers(requested: &[&CStr], available: &[&CStr]) -> Result<()> {
    match find_missing_layer(requested, available) {
        Some(missing) => Err(GraphicsError::MissingValidationLayer(
            missing.to_string_lossy().into_owned(),
        )),
        None => Ok(()),
    }
}

fn check_validation_layers(entry: &Entry) -> Result<()> {
    let props = unsafe { entry.enumerate_instance_layer_properties() }
        .context("vkEnumerateInstanceLayerProperties")?;
    let available: Vec<&CStr> = props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .collect();
    require_layers(VALIDATION_LAYERS, &available)
}

/// The application name as a C string. Interior NULs are dropped rather than
/// truncating the name.
pub fn application_name(name: &str) -> CString {
    match CString::new(name) {
        Ok(c) => c,
        Err(e) => {
            warn!("application name contains a NUL byte, stripping it");
            let bytes: Vec<u8> = e.into_vec().into_iter().filter(|&b| b != 0).collect();
            CString::new(bytes).unwrap_or_default()
        }
    }
}

pub(crate) fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    app_name: &str,
) -> Result<ash::Instance> {
    // Layers are checked before anything is created.
    if ENABLE_VALIDATION {
        check_validation_layers(entry)?;
    }

    let app_name = application_name(app_name);
    let app_info = vk::ApplicationInfo {
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: ENGINE_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?
        .to_vec();
    let layers: Vec<*const c_char> = if ENABLE_VALIDATION {
        extensions.push(debug_utils::NAME.as_ptr());
        VALIDATION_LAYERS.iter().map(|l| l.as_ptr()).collect()
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None) }.context("vkCreateInstance")?;
    info!(
        "Vulkan instance ready (validation={}, {} extensions)",
        ENABLE_VALIDATION,
        extensions.len()
    );
    Ok(instance)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) fn new(entry: &Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let handle = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .context("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, handle })
    }

    /// Must run before the owning instance is destroyed.
    pub(crate) fn destroy(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.handle, None)
        };
        self.handle = vk::DebugUtilsMessengerEXT::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_layers_present() {
        let available = [c"VK_LAYER_MESA_overlay", c"VK_LAYER_KHRONOS_validation"];
        assert_eq!(find_missing_layer(VALIDATION_LAYERS, &available), None);
        assert!(require_layers(VALIDATION_LAYERS, &available).is_ok());
    }

    #[test]
    fn missing_layer_is_reported_by_name() {
        let available = [c"VK_LAYER_KHRONOS_validation"];
        let err = require_layers(&[c"X"], &available).unwrap_err();
        match err {
            GraphicsError::MissingValidationLayer(name) => assert_eq!(name, "X"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_layer_list_reports_first_request() {
        let requested = [c"A", c"B"];
        assert_eq!(find_missing_layer(&requested, &[]), Some(c"A"));
    }

    #[test]
    fn nothing_requested_needs_nothing() {
        assert!(require_layers(&[], &[]).is_ok());
    }

    #[test]
    fn plain_app_name_is_kept() {
        assert_eq!(application_name("swapframe").as_c_str(), c"swapframe");
    }

    #[test]
    fn nul_bytes_are_stripped_from_app_name() {
        assert_eq!(application_name("swap\0frame").as_c_str(), c"swapframe");
        assert_eq!(application_name("\0\0").as_c_str(), c"");
    }
}
