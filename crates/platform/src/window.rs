//! Window management using winit.
//!
//! The window has a fixed size; the swapchain is created once for it.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use frametech_core::{Error, Result};

/// Owned `VkSurfaceKHR`, destroyed on drop.
///
/// The instance it was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for the surface capability, format and present-mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface with the same instance
        // as the loader; nothing else destroys it.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// A fixed-size window exposing the handles Vulkan surface creation needs.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    /// Creates a hidden, non-resizable window with a `width`x`height` inner
    /// size. Call [`show`](Self::show) once rendering can start.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let window = event_loop
            .create_window(window_attributes(width, height, title))
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{} '{}'", width, height, title);

        Ok(Self {
            window: Arc::new(window),
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current framebuffer size in pixels.
    ///
    /// This is the physical inner size, which differs from the requested
    /// size on scaled displays.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// True when the window has no drawable area.
    pub fn is_minimized(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        width == 0 || height == 0
    }

    /// Makes the window visible.
    pub fn show(&self) {
        self.window.set_visible(true);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The pointers reference static strings owned by `ash-window`.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("display handle unavailable: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Vulkan(format!("surface extensions unavailable: {}", e)))?;

        tracing::debug!(
            "Surface extensions: {:?}",
            extensions
                .iter()
                // SAFETY: ash_window returns null-terminated static names.
                .map(|&ext| unsafe { CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );

        Ok(extensions.to_vec())
    }

    /// Creates the Vulkan surface for this window.
    ///
    /// # Errors
    ///
    /// [`Error::Window`] if the native handles are unavailable,
    /// [`Error::Vulkan`] if the driver rejects the surface.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("display handle unavailable: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("window handle unavailable: {}", e)))?;

        // SAFETY: both handles come from the live winit window; the surface is
        // destroyed by Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| Error::Vulkan(format!("surface creation failed: {}", e)))?;

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

fn window_attributes(width: u32, height: u32, title: &str) -> WindowAttributes {
    WindowAttributes::default()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width, height))
        .with_resizable(false)
        .with_visible(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    use winit::dpi::Size;

    #[test]
    fn test_window_starts_hidden_and_fixed() {
        let attrs = window_attributes(1280, 720, "FrameTech");
        assert!(!attrs.visible);
        assert!(!attrs.resizable);
        assert_eq!(attrs.title, "FrameTech");
        assert_eq!(
            attrs.inner_size,
            Some(Size::Physical(PhysicalSize::new(1280, 720)))
        );
    }
}
