//! Physical device (GPU) selection and queue family discovery.
//!
//! # Overview
//!
//! Selection is first-fit: candidates are visited in enumeration order and the
//! first one passing [`is_suitable`] wins, even if a later one is faster.
//!
//! Queue roles are then assigned with [`QueueFamilySet::assign`]: each role, in
//! [`QueueRole::ALL`] order, takes the first family that supports it and has not
//! been claimed by an earlier role.
//!
//! # Example
//!
//! ```no_run
//! use frametech_rhi::instance::{Instance, InstanceConfig};
//! use frametech_rhi::physical_device::{QueueFamilySet, select_physical_device};
//! use frametech_rhi::device::DEVICE_EXTENSIONS;
//! use ash::vk;
//!
//! # fn example(instance: &Instance, surface: vk::SurfaceKHR) -> frametech_rhi::RhiResult<()> {
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let info = select_physical_device(instance.handle(), DEVICE_EXTENSIONS)?;
//! let families = QueueFamilySet::discover(&info, surface, &surface_loader)?;
//! let assignment = families.assign()?;
//! println!("graphics family: {}", assignment.graphics());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::ffi::CStr;
use std::fmt;

use ash::vk;
use bitflags::bitflags;
use tracing::{debug, info, warn};

use crate::error::{DeviceError, RhiError};

/// Device names accepted despite not being discrete GPUs.
///
/// Only consulted on macOS, where these integrated chips are the norm.
pub const LOW_POWER_ALLOWLIST: &[&str] = &["Apple M1", "Apple M2"];

bitflags! {
    /// What a single queue family can do for the engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueCapabilities: u32 {
        const GRAPHICS = 0x1;
        const PRESENT = 0x2;
        const TRANSFER = 0x4;
    }
}

/// Logical role a queue plays in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Transfer,
}

impl QueueRole {
    /// Every role, in assignment order.
    pub const ALL: [QueueRole; 3] = [QueueRole::Graphics, QueueRole::Present, QueueRole::Transfer];

    /// Capability a family needs to serve this role.
    pub fn capability(self) -> QueueCapabilities {
        match self {
            QueueRole::Graphics => QueueCapabilities::GRAPHICS,
            QueueRole::Present => QueueCapabilities::PRESENT,
            QueueRole::Transfer => QueueCapabilities::TRANSFER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QueueRole::Graphics => "graphics",
            QueueRole::Present => "present",
            QueueRole::Transfer => "transfer",
        }
    }
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Family index chosen for each queue role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAssignment {
    roles: Vec<(QueueRole, u32)>,
}

impl QueueAssignment {
    /// Family assigned to `role`, if it was part of the assignment.
    pub fn family(&self, role: QueueRole) -> Option<u32> {
        self.roles
            .iter()
            .find(|(assigned, _)| *assigned == role)
            .map(|&(_, family)| family)
    }

    /// Graphics family. Assignments built by [`QueueFamilySet::assign`] always have one.
    #[inline]
    pub fn graphics(&self) -> u32 {
        self.family(QueueRole::Graphics).unwrap_or_default()
    }

    #[inline]
    pub fn present(&self) -> u32 {
        self.family(QueueRole::Present).unwrap_or_default()
    }

    #[inline]
    pub fn transfer(&self) -> u32 {
        self.family(QueueRole::Transfer).unwrap_or_default()
    }

    /// Distinct family indices, in role order.
    ///
    /// Used for queue create infos and concurrent sharing lists.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(self.roles.len());
        for &(_, family) in &self.roles {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// Role/family pairs in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (QueueRole, u32)> + '_ {
        self.roles.iter().copied()
    }
}

/// Per-family capability bitmasks for one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFamilySet {
    capabilities: Vec<QueueCapabilities>,
}

impl QueueFamilySet {
    /// Builds the set from precomputed per-family capabilities.
    pub fn from_capabilities(capabilities: Vec<QueueCapabilities>) -> Self {
        Self { capabilities }
    }

    /// Tests every family of `info` for graphics, surface present and transfer support.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NoQueueSupport`] when no family covers a role, or
    /// the native error if the present-support query fails.
    pub fn discover(
        info: &PhysicalDeviceInfo,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let mut capabilities = Vec::with_capacity(info.queue_families.len());

        for (index, family) in info.queue_families.iter().enumerate() {
            let index = index as u32;
            let mut caps = QueueCapabilities::empty();

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                caps |= QueueCapabilities::GRAPHICS;
            }
            let present_supported = unsafe {
                surface_loader.get_physical_device_surface_support(info.device, index, surface)?
            };
            if present_supported {
                caps |= QueueCapabilities::PRESENT;
            }
            if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
                caps |= QueueCapabilities::TRANSFER;
            }

            debug!(
                "Queue family {}: {} queue(s), capabilities {:?}",
                index, family.queue_count, caps
            );
            capabilities.push(caps);
        }

        let set = Self::from_capabilities(capabilities);
        set.ensure_coverage()?;
        Ok(set)
    }

    /// Union of every family's capabilities.
    pub fn coverage(&self) -> QueueCapabilities {
        self.capabilities
            .iter()
            .fold(QueueCapabilities::empty(), |acc, caps| acc | *caps)
    }

    /// Fails if some role is not supported by any family at all.
    pub fn ensure_coverage(&self) -> Result<(), DeviceError> {
        let coverage = self.coverage();
        match QueueRole::ALL
            .into_iter()
            .find(|role| !coverage.contains(role.capability()))
        {
            Some(role) => Err(DeviceError::NoQueueSupport(role)),
            None => Ok(()),
        }
    }

    /// Assigns every role in [`QueueRole::ALL`] order.
    pub fn assign(&self) -> Result<QueueAssignment, DeviceError> {
        self.assign_roles(&QueueRole::ALL)
    }

    /// First-fit assignment of `roles` to distinct families.
    ///
    /// Each role takes the lowest-index family that supports it and is not yet
    /// used; the family is then marked used. Role order therefore decides which
    /// family a multi-capable family ends up serving.
    pub fn assign_roles(&self, roles: &[QueueRole]) -> Result<QueueAssignment, DeviceError> {
        let mut used: HashSet<u32> = HashSet::with_capacity(roles.len());
        let mut assigned = Vec::with_capacity(roles.len());

        for &role in roles {
            let family = self
                .capabilities
                .iter()
                .enumerate()
                .map(|(index, caps)| (index as u32, caps))
                .find(|(index, caps)| !used.contains(index) && caps.contains(role.capability()))
                .map(|(index, _)| index)
                .ok_or(DeviceError::NoQueueSupport(role))?;

            used.insert(family);
            info!("{} queue family index is {}", role, family);
            assigned.push((role, family));
        }

        Ok(QueueAssignment { roles: assigned })
    }

    /// Capabilities of each family, by family index.
    pub fn capabilities(&self) -> &[QueueCapabilities] {
        &self.capabilities
    }
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family properties, indexed by family.
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Names of the device extensions the driver exposes.
    pub extensions: Vec<String>,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns the device type (Discrete, Integrated, etc.).
    pub fn device_type(&self) -> vk::PhysicalDeviceType {
        self.properties.device_type
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Whether the driver exposes the named extension.
    pub fn supports_extension(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.extensions.iter().any(|ext| *ext == name)
    }
}

impl fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families.len())
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Suitability predicate used by [`select_physical_device`].
///
/// A device qualifies when it is a discrete GPU, or when `allow_low_power` is
/// set and its name is in [`LOW_POWER_ALLOWLIST`].
pub fn is_suitable(device_type: vk::PhysicalDeviceType, name: &str, allow_low_power: bool) -> bool {
    device_type == vk::PhysicalDeviceType::DISCRETE_GPU
        || (allow_low_power && LOW_POWER_ALLOWLIST.contains(&name))
}

/// Returns the first candidate accepted by `predicate`, in iteration order.
pub fn first_suitable<T>(
    candidates: impl IntoIterator<Item = T>,
    mut predicate: impl FnMut(&T) -> bool,
) -> Option<T> {
    candidates.into_iter().find(|candidate| predicate(candidate))
}

/// Lists the physical devices visible to `instance`.
///
/// # Errors
///
/// Returns [`DeviceError::NoDeviceFound`] if the list is empty.
pub fn enumerate(instance: &ash::Instance) -> Result<Vec<vk::PhysicalDevice>, DeviceError> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.map_err(DeviceError::Enumeration)?;

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(DeviceError::NoDeviceFound);
    }

    info!("Found {} GPU(s)", devices.len());
    Ok(devices)
}

/// Selects the first suitable physical device in enumeration order.
///
/// Each visited candidate is logged together with its extensions; required
/// extensions the candidate lacks are reported as warnings.
///
/// # Errors
///
/// Returns [`DeviceError::NoDeviceFound`] or [`DeviceError::NoSuitableDevice`].
pub fn select_physical_device(
    instance: &ash::Instance,
    required_extensions: &[&CStr],
) -> Result<PhysicalDeviceInfo, DeviceError> {
    let devices = enumerate(instance)?;
    let candidates = devices.len();
    let allow_low_power = cfg!(target_os = "macos");

    let selected = first_suitable(
        devices
            .into_iter()
            .map(|device| describe_device(instance, device)),
        |info| {
            info!(
                "Checking device '{}' ({}, id {})",
                info.device_name(),
                info.device_type_name(),
                info.properties.device_id
            );
            log_extensions(info, required_extensions);

            let suitable = is_suitable(info.device_type(), info.device_name(), allow_low_power);
            debug!("Device '{}' suitable: {}", info.device_name(), suitable);
            suitable
        },
    )
    .ok_or_else(|| {
        warn!("No suitable GPU among {} candidate(s)", candidates);
        DeviceError::NoSuitableDevice { candidates }
    })?;

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch
    );

    Ok(selected)
}

fn describe_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> PhysicalDeviceInfo {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let extensions = match unsafe { instance.enumerate_device_extension_properties(device) } {
        Ok(properties) => properties
            .iter()
            .map(|ext| unsafe {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect(),
        Err(e) => {
            warn!("Failed to enumerate device extensions: {}", e);
            Vec::new()
        }
    };

    PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
        extensions,
    }
}

fn log_extensions(info: &PhysicalDeviceInfo, required: &[&CStr]) {
    debug!("{} available extension(s)", info.extensions.len());
    for ext in &info.extensions {
        debug!("  * {}", ext);
    }
    for ext in required {
        if info.supports_extension(ext) {
            debug!("Using extension '{}'", ext.to_string_lossy());
        } else {
            warn!(
                "Required extension '{}' not found on '{}', device creation may fail",
                ext.to_string_lossy(),
                info.device_name()
            );
        }
    }
}
