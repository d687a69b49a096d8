/* BEGIN LICENSE
  clspv-harness, a Vulkan test harness for clspv-compiled OpenCL kernels.
  Copyright (C) 2025 SupaMaggie70 (Magnus Larsson)


  clspv-harness is free software; you can redistribute it and/or
  modify it under the terms of the GNU General Public License
  as published by the Free Software Foundation; either version 3
  of the License, or (at your option) any later version.

  clspv-harness is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
END LICENSE */
//! Vulkan samplers for OpenCL sampler flags.

use ash::vk;
use spvmap::{AddressMode, Filter, SamplerDescription};

use crate::{HarnessError, HarnessResult};

pub fn vk_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

pub fn vk_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

/// Sampler state equivalent to `flags`, or an error if Vulkan can't express it.
pub fn sampler_create_info(flags: u32) -> HarnessResult<vk::SamplerCreateInfo<'static>> {
    let desc = SamplerDescription::from_opencl_flags(flags);
    if !desc.is_supported() {
        return Err(HarnessError::UnsupportedSampler(flags));
    }
    let address_mode = vk_address_mode(desc.address_mode);
    let filter = vk_filter(desc.filter);
    // Unnormalized coordinates pin the lod range to 0 and forbid anisotropy and compare
    Ok(vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .mip_lod_bias(0.0)
        .anisotropy_enable(false)
        .compare_enable(false)
        .min_lod(0.0)
        .max_lod(0.0)
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
        .unnormalized_coordinates(desc.unnormalized_coordinates))
}

/// # Safety
/// * `device` must be a valid logical device
pub unsafe fn create_compatible_sampler(
    device: &ash::Device,
    flags: u32,
) -> HarnessResult<vk::Sampler> {
    let info = sampler_create_info(flags)?;
    unsafe { Ok(device.create_sampler(&info, None)?) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvmap::sampler::*;

    #[test]
    fn create_info_matches_flags() {
        let info = sampler_create_info(CLK_ADDRESS_CLAMP | CLK_FILTER_LINEAR).unwrap();
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_BORDER);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.unnormalized_coordinates, vk::TRUE);

        let info = sampler_create_info(
            CLK_ADDRESS_MIRRORED_REPEAT | CLK_NORMALIZED_COORDS_TRUE | CLK_FILTER_NEAREST,
        )
        .unwrap();
        assert_eq!(
            info.address_mode_w,
            vk::SamplerAddressMode::MIRRORED_REPEAT
        );
        assert_eq!(info.min_filter, vk::Filter::NEAREST);
        assert_eq!(info.unnormalized_coordinates, vk::FALSE);
    }

    #[test]
    fn unsupported_flags_are_refused() {
        let flags = CLK_ADDRESS_REPEAT | CLK_NORMALIZED_COORDS_FALSE;
        assert!(matches!(
            sampler_create_info(flags),
            Err(HarnessError::UnsupportedSampler(f)) if f == flags
        ));
    }
}
