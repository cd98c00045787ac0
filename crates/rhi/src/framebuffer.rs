//! Per-image views and framebuffers over the swapchain.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{CreationFailure, ResourceError};

/// One color view and one framebuffer per swapchain image, index-aligned
/// with the swapchain's image list.
///
/// Must be destroyed before the swapchain and render pass it refers to.
pub struct FrameResources {
    device: Arc<Device>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl FrameResources {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            image_views: Vec::new(),
            framebuffers: Vec::new(),
        }
    }

    /// Creates a 2D color view for each image, in image order.
    ///
    /// Any views and framebuffers from an earlier call are destroyed first,
    /// keeping index `i` aligned with `images[i]`. Stops at the first failure. Views created before it stay owned and
    /// are released by [`destroy`](Self::destroy).
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::ImageViewCreationFailed`] with the index of
    /// the failing image.
    pub fn create_image_views(
        &mut self,
        images: &[vk::Image],
        format: vk::Format,
    ) -> Result<(), ResourceError> {
        self.destroy();
        self.image_views.reserve(images.len());

        for (index, &image) in images.iter().enumerate() {
            let create_info = image_view_info(image, format);

            let view = unsafe { self.device.handle().create_image_view(&create_info, None) }
                .map_err(|e| {
                    let reason = CreationFailure::from(e);
                    tracing::error!("Image view {} creation failed: {}", index, reason);
                    ResourceError::ImageViewCreationFailed { index, reason }
                })?;

            self.image_views.push(view);
        }

        debug!("Created {} image views", self.image_views.len());
        Ok(())
    }

    /// Creates one framebuffer per image view for `render_pass`, replacing
    /// any framebuffers from an earlier call.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::FramebufferCreationFailed`] on the first
    /// failure. Framebuffers created before it are released by
    /// [`destroy`](Self::destroy).
    pub fn create_framebuffers(
        &mut self,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<(), ResourceError> {
        self.destroy_framebuffers();
        self.framebuffers.reserve(self.image_views.len());

        for (index, view) in self.image_views.iter().enumerate() {
            let attachments = [*view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.handle().create_framebuffer(&create_info, None) }
                .map_err(|result| ResourceError::FramebufferCreationFailed { index, result })?;

            self.framebuffers.push(framebuffer);
        }

        info!(
            "Created {} framebuffers ({}x{})",
            self.framebuffers.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    #[inline]
    pub fn framebuffer(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).copied()
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_views.is_empty() && self.framebuffers.is_empty()
    }

    /// Releases framebuffers, then views. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.is_empty() {
            return;
        }

        self.destroy_framebuffers();
        let device = self.device.handle();
        for view in self.image_views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
        debug!("Frame resources destroyed");
    }

    fn destroy_framebuffers(&mut self) {
        let device = self.device.handle();
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn image_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_view_info() {
        let info = image_view_info(vk::Image::null(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(info.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(info.components.r, vk::ComponentSwizzle::IDENTITY);
        assert_eq!(info.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(info.subresource_range.level_count, 1);
        assert_eq!(info.subresource_range.layer_count, 1);
    }
}
