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
//! OpenCL sampler flags and how they translate to Vulkan sampler state.

use serde::{Deserialize, Serialize};

use crate::SamplerSpec;

pub const CLK_NORMALIZED_COORDS_FALSE: u32 = 0x0;
pub const CLK_NORMALIZED_COORDS_TRUE: u32 = 0x1;
pub const CLK_ADDRESS_NONE: u32 = 0x0;
pub const CLK_ADDRESS_CLAMP_TO_EDGE: u32 = 0x2;
pub const CLK_ADDRESS_CLAMP: u32 = 0x4;
pub const CLK_ADDRESS_REPEAT: u32 = 0x6;
pub const CLK_ADDRESS_MIRRORED_REPEAT: u32 = 0x8;
pub const CLK_FILTER_NEAREST: u32 = 0x10;
pub const CLK_FILTER_LINEAR: u32 = 0x20;

pub const NORMALIZED_COORDS_MASK: u32 = 0x1;
pub const ADDRESS_MASK: u32 = 0xE;
pub const FILTER_MASK: u32 = 0x30;

/// Named after the Vulkan modes they become.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressMode {
    ClampToEdge,
    ClampToBorder,
    Repeat,
    MirroredRepeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    Nearest,
    Linear,
}

/// The Vulkan-relevant meaning of a set of OpenCL sampler flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerDescription {
    pub address_mode: AddressMode,
    pub filter: Filter,
    pub unnormalized_coordinates: bool,
}

impl SamplerDescription {
    pub fn from_opencl_flags(flags: u32) -> Self {
        let address_mode = match flags & ADDRESS_MASK {
            CLK_ADDRESS_NONE | CLK_ADDRESS_CLAMP_TO_EDGE => AddressMode::ClampToEdge,
            CLK_ADDRESS_CLAMP => AddressMode::ClampToBorder,
            CLK_ADDRESS_REPEAT => AddressMode::Repeat,
            CLK_ADDRESS_MIRRORED_REPEAT => AddressMode::MirroredRepeat,
            _ => AddressMode::ClampToEdge,
        };
        let filter = if flags & FILTER_MASK == CLK_FILTER_LINEAR {
            Filter::Linear
        } else {
            Filter::Nearest
        };
        Self {
            address_mode,
            filter,
            unnormalized_coordinates: flags & NORMALIZED_COORDS_MASK
                == CLK_NORMALIZED_COORDS_FALSE,
        }
    }
    /// Vulkan only allows unnormalized coordinates together with the clamping address
    /// modes.
    pub fn is_supported(&self) -> bool {
        !self.unnormalized_coordinates
            || matches!(
                self.address_mode,
                AddressMode::ClampToEdge | AddressMode::ClampToBorder
            )
    }
}

pub fn is_sampler_supported(flags: u32) -> bool {
    SamplerDescription::from_opencl_flags(flags).is_supported()
}

const HASH_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const HASH_PRIME: u64 = 0x0000_0100_0000_01b3;
const HASH_INCREMENT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Murmur3 finalizer
fn mix(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// Content hash over the flags of an already sorted sampler list. Order matters, so
/// callers sort by binding first.
pub fn sampler_list_hash(samplers: &[SamplerSpec]) -> u64 {
    samplers.iter().fold(HASH_SEED, |h, s| {
        (h ^ mix(s.opencl_flags as u64))
            .wrapping_mul(HASH_PRIME)
            .wrapping_add(HASH_INCREMENT)
    })
}

/// The full identity of a literal sampler list: `(binding, flags)` pairs in list order,
/// plus the hash used to bucket it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SamplerListKey {
    pub hash: u64,
    pub entries: Vec<(u32, u32)>,
}

impl SamplerListKey {
    pub fn new(samplers: &[SamplerSpec]) -> Self {
        Self {
            hash: sampler_list_hash(samplers),
            entries: samplers
                .iter()
                .map(|s| (s.binding.unwrap_or(0), s.opencl_flags))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representability_is_exhaustive() {
        for address_bits in 0..8u32 {
            for normalized in [CLK_NORMALIZED_COORDS_FALSE, CLK_NORMALIZED_COORDS_TRUE] {
                for filter in [CLK_FILTER_NEAREST, CLK_FILTER_LINEAR] {
                    let flags = (address_bits << 1) | normalized | filter;
                    let desc = SamplerDescription::from_opencl_flags(flags);
                    let repeats = matches!(
                        desc.address_mode,
                        AddressMode::Repeat | AddressMode::MirroredRepeat
                    );
                    let expected = !(normalized == CLK_NORMALIZED_COORDS_FALSE && repeats);
                    assert_eq!(is_sampler_supported(flags), expected, "flags {flags:#x}");
                }
            }
        }
    }

    #[test]
    fn address_modes() {
        let mode = |f| SamplerDescription::from_opencl_flags(f).address_mode;
        assert_eq!(mode(CLK_ADDRESS_NONE), AddressMode::ClampToEdge);
        assert_eq!(mode(CLK_ADDRESS_CLAMP_TO_EDGE), AddressMode::ClampToEdge);
        assert_eq!(mode(CLK_ADDRESS_CLAMP), AddressMode::ClampToBorder);
        assert_eq!(mode(CLK_ADDRESS_REPEAT), AddressMode::Repeat);
        assert_eq!(mode(CLK_ADDRESS_MIRRORED_REPEAT), AddressMode::MirroredRepeat);
        // 0xA, 0xC and 0xE aren't OpenCL address modes
        assert_eq!(mode(0xA), AddressMode::ClampToEdge);
        assert_eq!(mode(0xE), AddressMode::ClampToEdge);
    }

    #[test]
    fn filter_and_coordinates() {
        let d = SamplerDescription::from_opencl_flags(
            CLK_FILTER_LINEAR | CLK_NORMALIZED_COORDS_TRUE | CLK_ADDRESS_REPEAT,
        );
        assert_eq!(d.filter, Filter::Linear);
        assert!(!d.unnormalized_coordinates);
        assert!(d.is_supported());

        let d = SamplerDescription::from_opencl_flags(0x12);
        assert_eq!(d.filter, Filter::Nearest);
        assert!(d.unnormalized_coordinates);
        assert!(d.is_supported());
    }

    #[test]
    fn repeat_with_unnormalized_coordinates_is_rejected() {
        assert!(!is_sampler_supported(
            CLK_ADDRESS_REPEAT | CLK_NORMALIZED_COORDS_FALSE | CLK_FILTER_NEAREST
        ));
        assert!(!is_sampler_supported(
            CLK_ADDRESS_MIRRORED_REPEAT | CLK_NORMALIZED_COORDS_FALSE
        ));
    }

    #[test]
    fn hash_depends_on_order_and_content() {
        let s = |flags, binding| SamplerSpec {
            opencl_flags: flags,
            descriptor_set: Some(0),
            binding: Some(binding),
        };
        let a = [s(0x12, 0), s(0x23, 1)];
        let b = [s(0x23, 0), s(0x12, 1)];
        assert_eq!(sampler_list_hash(&a), sampler_list_hash(&a.clone()));
        assert_ne!(sampler_list_hash(&a), sampler_list_hash(&b));
        assert_ne!(sampler_list_hash(&a[..1]), sampler_list_hash(&a));
        assert_ne!(sampler_list_hash(&[]), sampler_list_hash(&a[..1]));
    }
}
