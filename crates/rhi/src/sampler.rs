//! Sampler creation.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Sampler settings shared by the black-hole passes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerDesc {
    /// Linear filtering, mirrored repeat, opaque black border.
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::MIRRORED_REPEAT,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        }
    }
}

impl SamplerDesc {
    fn create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(self.filter)
            .min_filter(self.filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(self.border_color)
            .unnormalized_coordinates(false)
    }
}

/// Vulkan sampler wrapper.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates a sampler and gives it a debug name.
    pub fn new(device: Arc<Device>, desc: &SamplerDesc, name: &str) -> RhiResult<Self> {
        let sampler = unsafe { device.handle().create_sampler(&desc.create_info(), None)? };
        crate::debug::name_object(device.as_ref(), sampler, name);
        debug!("Created sampler '{}'", name);
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_sampler(self.sampler, None) };
        debug!("Destroyed sampler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_desc_matches_skybox_sampling() {
        let info = SamplerDesc::default().create_info();
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::MIRRORED_REPEAT);
        assert_eq!(info.border_color, vk::BorderColor::FLOAT_OPAQUE_BLACK);
        assert_eq!(info.unnormalized_coordinates, vk::FALSE);
    }
}
