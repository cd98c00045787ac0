//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, and debug messengers.
//!
//! # Example
//!
//! ```no_run
//! use frametech_rhi::instance::{Instance, InstanceConfig};
//!
//! let config = InstanceConfig {
//!     app_name: "FrameTech".to_string(),
//!     app_version: (0, 1, 0),
//!     enable_validation: cfg!(debug_assertions),
//! };
//! let instance = Instance::new(&config, &[]).expect("Failed to create Vulkan instance");
//!
//! let vk_instance = instance.handle();
//! let entry = instance.entry();
//! ```

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Engine name reported to the driver.
const ENGINE_NAME: &CStr = c"FrameTech";

/// Settings used to create the [`Instance`].
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Application version as (major, minor, patch).
    pub app_version: (u32, u32, u32),
    /// Enables the Khronos validation layer and debug messenger when available.
    pub enable_validation: bool,
}

/// Vulkan instance wrapper with optional validation layer support.
///
/// This struct manages the lifetime of the Vulkan instance and its associated
/// debug utilities. When dropped, it properly cleans up all Vulkan resources.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle (only present when validation is enabled)
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Application identity and validation toggle
    /// * `surface_extensions` - Window-system extensions required to create a surface
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Vulkan library cannot be loaded
    /// - Required extensions are not available
    /// - Instance creation fails
    /// - Debug messenger setup fails (when validation is enabled)
    pub fn new(
        config: &InstanceConfig,
        surface_extensions: &[*const c_char],
    ) -> Result<Self, RhiError> {
        // Load the Vulkan library
        let entry = unsafe { Entry::load()? };

        Self::log_supported_extensions(&entry);

        let validation_available =
            config.enable_validation && Self::is_validation_layer_available(&entry)?;
        if config.enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_name = CString::new(config.app_name.as_str())
            .unwrap_or_else(|_| CString::from(c"Application"));
        let (major, minor, patch) = config.app_version;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, major, minor, patch))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = Self::get_required_extensions(surface_extensions);
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .flags(Self::create_flags());

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(RhiError::from)?
        };

        info!(
            "Vulkan instance created for '{}' (API version 1.3)",
            config.app_name
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            info!("Validation layers enabled");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Surface extensions plus the ones the platform always needs.
    ///
    /// Duplicates are dropped so callers may pass a list that already contains
    /// `VK_KHR_surface`.
    fn get_required_extensions(surface_extensions: &[*const c_char]) -> Vec<*const c_char> {
        let mut extensions: Vec<*const c_char> = vec![ash::khr::surface::NAME.as_ptr()];

        #[cfg(target_os = "macos")]
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

        for &ext in surface_extensions {
            // SAFETY: callers pass pointers to static, null-terminated extension names.
            let name = unsafe { CStr::from_ptr(ext) };
            let already_listed = extensions
                .iter()
                .any(|&known| unsafe { CStr::from_ptr(known) } == name);
            if !already_listed {
                extensions.push(ext);
            }
        }

        extensions
    }

    fn create_flags() -> vk::InstanceCreateFlags {
        if cfg!(target_os = "macos") {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        }
    }

    /// Logs every instance extension the loader reports.
    fn log_supported_extensions(entry: &Entry) {
        match unsafe { entry.enumerate_instance_extension_properties(None) } {
            Ok(extensions) => {
                debug!("{} supported instance extension(s)", extensions.len());
                for (i, ext) in extensions.iter().enumerate() {
                    let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                    debug!("  {} -> {}", i, name.to_string_lossy());
                }
            }
            Err(e) => warn!("Failed to enumerate instance extensions: {}", e),
        }
    }

    /// Checks if the Khronos validation layer is available.
    fn is_validation_layer_available(entry: &Entry) -> Result<bool, RhiError> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let validation_layer_name = VALIDATION_LAYER_NAME.to_bytes_with_nul();

        let found = available_layers.iter().any(|layer| {
            let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            layer_name.to_bytes_with_nul() == validation_layer_name
        });

        Ok(found)
    }

    /// Sets up the debug messenger for validation layer callbacks.
    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
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

        let messenger = unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(RhiError::from)?
        };

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            // Destroy debug messenger before instance
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Debug callback function for validation layer messages.
///
/// This function is called by the Vulkan validation layer when it detects
/// issues with API usage. Messages are logged using the tracing crate.
///
/// # Safety
///
/// This function is called from the Vulkan driver and must follow the
/// Vulkan specification for debug callbacks.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            info!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            debug!("[Vulkan {} Verbose] {}", type_str, message);
        }
    }

    // Returning VK_FALSE indicates the call should not be aborted
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enable_validation: bool) -> InstanceConfig {
        InstanceConfig {
            app_name: "FrameTech tests".to_string(),
            app_version: (0, 1, 0),
            enable_validation,
        }
    }

    #[test]
    fn test_instance_creation_without_validation() {
        // Requires a Vulkan loader and driver
        match Instance::new(&config(false), &[]) {
            Ok(instance) => {
                assert!(!instance.has_validation());
            }
            Err(e) => {
                eprintln!("Skipping test: Vulkan not available ({e})");
            }
        }
    }

    #[test]
    fn test_instance_creation_with_validation() {
        match Instance::new(&config(true), &[]) {
            Ok(instance) => {
                // Validation might or might not be available depending on the system
                if instance.has_validation() {
                    assert!(instance.debug_utils.is_some());
                    assert!(instance.debug_messenger.is_some());
                }
            }
            Err(e) => {
                eprintln!("Skipping test: Vulkan not available ({e})");
            }
        }
    }

    #[test]
    fn test_required_extensions_deduplicated() {
        let surface = [
            ash::khr::surface::NAME.as_ptr(),
            ash::khr::xlib_surface::NAME.as_ptr(),
        ];
        let extensions = Instance::get_required_extensions(&surface);

        let surface_count = extensions
            .iter()
            .filter(|&&ext| unsafe { CStr::from_ptr(ext) } == ash::khr::surface::NAME)
            .count();
        assert_eq!(surface_count, 1);
        assert!(
            extensions
                .iter()
                .any(|&ext| unsafe { CStr::from_ptr(ext) } == ash::khr::xlib_surface::NAME)
        );
    }
}
