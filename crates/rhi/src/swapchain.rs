//! Swapchain queries, validation and creation.
//!
//! The swapchain is built once from a [`SwapchainSupportDetails`] snapshot
//! that has passed [`SwapchainSupportDetails::check`]. It is never recreated;
//! the window is not resizable.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{CreationFailure, RhiError, SwapchainError};
use crate::instance::Instance;

/// Preferred surface format.
const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Capabilities, formats and present modes of a (device, surface) pair.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Snapshots the surface support of `physical_device`.
    ///
    /// # Errors
    ///
    /// Returns [`SwapchainError::QueryFailed`] if any surface query fails.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, SwapchainError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(SwapchainError::QueryFailed)?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(SwapchainError::QueryFailed)?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(SwapchainError::QueryFailed)?;

        debug!(
            "Surface support: {} formats, {} present modes, image count {}..={}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Validates the snapshot against the requested image count.
    ///
    /// The bound check is literal: a `max_image_count` of 0 does not mean
    /// "unbounded" here, and a surface reporting `min > max` always fails.
    ///
    /// # Errors
    ///
    /// Returns [`SwapchainError::UnsupportedSwapchain`] describing the surface.
    pub fn check(&self, buffer_count: u32) -> Result<(), SwapchainError> {
        let min = self.capabilities.min_image_count;
        let max = self.capabilities.max_image_count;

        let supported = min > 0
            && min <= buffer_count
            && buffer_count <= max
            && !self.formats.is_empty()
            && !self.present_modes.is_empty();

        if supported {
            return Ok(());
        }

        warn!(
            "Surface cannot host {} images (min {}, max {}, {} formats, {} present modes)",
            buffer_count,
            min,
            max,
            self.formats.len(),
            self.present_modes.len()
        );
        Err(SwapchainError::UnsupportedSwapchain {
            min,
            max,
            requested: buffer_count,
            formats: self.formats.len(),
            present_modes: self.present_modes.len(),
        })
    }
}

/// Parameters picked from a validated [`SwapchainSupportDetails`].
#[derive(Clone, Copy, Debug)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainSettings {
    /// Picks format, present mode and extent for a window of `width`x`height`.
    ///
    /// # Errors
    ///
    /// Fails with [`SwapchainError::NoSurfaceFormat`] or
    /// [`SwapchainError::UnsupportedPresentMode`].
    pub fn choose(
        details: &SwapchainSupportDetails,
        image_count: u32,
        fps_limited: bool,
        width: u32,
        height: u32,
    ) -> Result<Self, SwapchainError> {
        let surface_format = choose_surface_format(&details.formats)?;
        let present_mode =
            choose_present_mode(&details.present_modes, preferred_present_mode(fps_limited))?;
        let extent = choose_extent(&details.capabilities, width, height);

        Ok(Self {
            surface_format,
            present_mode,
            extent,
            image_count,
        })
    }
}

/// Vulkan swapchain and its images.
///
/// Image views live in the frame resources, which must be destroyed first.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates the swapchain for `surface`.
    ///
    /// Images are shared concurrently between every distinct queue family the
    /// device assigned.
    ///
    /// # Errors
    ///
    /// Returns [`SwapchainError::SwapchainCreationFailed`] with the mapped
    /// native reason, or a raw Vulkan error if the images cannot be listed.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        details: &SwapchainSupportDetails,
        settings: SwapchainSettings,
    ) -> Result<Self, RhiError> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            settings.extent.width,
            settings.extent.height,
            settings.surface_format.format,
            settings.surface_format.color_space,
            settings.present_mode,
            settings.image_count
        );

        let families = device.queue_families().unique_families();
        let (sharing_mode, family_indices) = sharing_for(&families);
        debug!(
            "Swapchain image sharing {:?} over families {:?}",
            sharing_mode, family_indices
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(details.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|result| {
                let reason = CreationFailure::from(result);
                tracing::error!("vkCreateSwapchainKHR: {}", reason);
                SwapchainError::SwapchainCreationFailed(reason)
            })?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };
        info!("Swapchain created with {} images", images.len());

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            format: settings.surface_format.format,
            color_space: settings.surface_format.color_space,
            extent: settings.extent,
            present_mode: settings.present_mode,
        })
    }

    /// Acquires the next image, signaling `semaphore` once it is usable.
    ///
    /// Returns `(image_index, suboptimal)`. The wait is unbounded.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// Returns true if the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Picks B8G8R8A8_SRGB/SRGB_NONLINEAR if offered, otherwise the first format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, SwapchainError> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
        .ok_or(SwapchainError::NoSurfaceFormat)
}

/// FIFO paces presentation when a frame cap is set; otherwise frames tear freely.
#[inline]
pub fn preferred_present_mode(fps_limited: bool) -> vk::PresentModeKHR {
    if fps_limited {
        vk::PresentModeKHR::FIFO
    } else {
        vk::PresentModeKHR::IMMEDIATE
    }
}

/// Requires `preferred` to be offered by the surface. There is no fallback.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> Result<vk::PresentModeKHR, SwapchainError> {
    if modes.contains(&preferred) {
        Ok(preferred)
    } else {
        Err(SwapchainError::UnsupportedPresentMode(preferred))
    }
}

/// Clamps the window framebuffer size to the surface extent bounds.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width.max(capabilities.min_image_extent.width),
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height.max(capabilities.min_image_extent.height),
        ),
    }
}

fn sharing_for(families: &[u32]) -> (vk::SharingMode, &[u32]) {
    if families.len() > 1 {
        (vk::SharingMode::CONCURRENT, families)
    } else {
        (vk::SharingMode::EXCLUSIVE, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(min: u32, max: u32) -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: min,
                max_image_count: max,
                ..Default::default()
            },
            formats: vec![PREFERRED_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_requires_matching_color_space() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_empty() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(SwapchainError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn test_preferred_present_mode() {
        assert_eq!(preferred_present_mode(true), vk::PresentModeKHR::FIFO);
        assert_eq!(preferred_present_mode(false), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_choose_present_mode_has_no_fallback() {
        let modes = [vk::PresentModeKHR::IMMEDIATE];
        let err = choose_present_mode(&modes, vk::PresentModeKHR::FIFO).unwrap_err();
        assert!(matches!(
            err,
            SwapchainError::UnsupportedPresentMode(vk::PresentModeKHR::FIFO)
        ));

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert!(choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE).is_err());
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::FIFO).unwrap(),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_ignores_current_extent() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 1280, 720);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));
    }

    #[test]
    fn test_check_accepts_buffer_count_in_range() {
        assert!(details(2, 3).check(3).is_ok());
        assert!(details(3, 3).check(3).is_ok());
        assert!(details(1, 8).check(3).is_ok());
    }

    #[test]
    fn test_check_is_literal() {
        // Inverted bounds are rejected as reported.
        let err = details(4, 2).check(3).unwrap_err();
        assert!(matches!(
            err,
            SwapchainError::UnsupportedSwapchain {
                min: 4,
                max: 2,
                requested: 3,
                ..
            }
        ));

        assert!(details(0, 3).check(3).is_err());
        assert!(details(2, 2).check(3).is_err());
        // 0 is not treated as unbounded.
        assert!(details(2, 0).check(3).is_err());
    }

    #[test]
    fn test_check_requires_formats_and_modes() {
        let mut no_formats = details(2, 3);
        no_formats.formats.clear();
        assert!(no_formats.check(3).is_err());

        let mut no_modes = details(2, 3);
        no_modes.present_modes.clear();
        assert!(no_modes.check(3).is_err());
    }

    #[test]
    fn test_settings_choose() {
        let mut d = details(2, 3);
        d.capabilities.min_image_extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        d.capabilities.max_image_extent = vk::Extent2D {
            width: 800,
            height: 800,
        };

        let settings = SwapchainSettings::choose(&d, 3, true, 1280, 720).unwrap();
        assert_eq!(settings.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(settings.extent.width, 800);
        assert_eq!(settings.image_count, 3);

        assert!(SwapchainSettings::choose(&d, 3, false, 1280, 720).is_err());
    }

    #[test]
    fn test_sharing_mode() {
        let (mode, families) = sharing_for(&[0, 1, 2]);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, &[0, 1, 2]);

        let (mode, families) = sharing_for(&[0]);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());
    }
}
