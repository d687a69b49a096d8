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
use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::{ArgKind, KernelSpec, ModuleSpec, RESERVED_SPEC_CONSTANTS, is_sampler_supported};

/// Structural problems in an otherwise well formed spvmap.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("literal sampler {index} has no OpenCL flags")]
    SamplerZeroFlags { index: usize },
    #[error("literal sampler {index} must live in descriptor set 0, found {found:?}")]
    SamplerDescriptorSet { index: usize, found: Option<u32> },
    #[error("literal sampler {index} has no binding")]
    SamplerBindingUnset { index: usize },
    #[error("literal samplers disagree on their descriptor set ({first:?} vs {other:?})")]
    InconsistentSamplerSets {
        first: Option<u32>,
        other: Option<u32>,
    },
    #[error("literal samplers {first} and {other} both use binding {binding}")]
    DuplicateSamplerBinding {
        first: usize,
        other: usize,
        binding: u32,
    },
    #[error("literal sampler flags {flags:#x} can't be expressed as a Vulkan sampler")]
    UnsupportedSampler { flags: u32 },
    #[error("a kernel has an empty name")]
    EmptyKernelName,
    #[error("kernel `{kernel}` spreads its arguments over descriptor sets {first} and {other}")]
    KernelArgSetsDiffer {
        kernel: String,
        first: u32,
        other: u32,
    },
    #[error("kernel `{kernel}` binds its arguments in set {found}, expected set {expected}")]
    KernelArgSetNumber {
        kernel: String,
        expected: u32,
        found: u32,
    },
    #[error("kernel `{kernel}` argument {position} has an unknown kind")]
    UnknownArgKind { kernel: String, position: usize },
    #[error("kernel `{kernel}` argument {position} has no ordinal")]
    OrdinalUnset { kernel: String, position: usize },
    #[error("kernel `{kernel}` declares ordinal {ordinal} more than once")]
    DuplicateOrdinal { kernel: String, ordinal: u32 },
    #[error("kernel `{kernel}` local argument {ordinal} has no specialization constant")]
    LocalSpecConstantUnset { kernel: String, ordinal: u32 },
    #[error(
        "kernel `{kernel}` local argument {ordinal} uses specialization constant {id}, which holds the workgroup size"
    )]
    LocalSpecConstantReserved { kernel: String, ordinal: u32, id: u32 },
    #[error("kernel `{kernel}` sizes more than one local argument with specialization constant {id}")]
    DuplicateSpecConstant { kernel: String, id: u32 },
    #[error("kernel `{kernel}` binds arguments {first} and {other} at binding {binding}")]
    DuplicateArgBinding {
        kernel: String,
        first: u32,
        other: u32,
        binding: u32,
    },
    #[error("kernel `{kernel}` argument {ordinal} has no descriptor set")]
    ArgDescriptorSetUnset { kernel: String, ordinal: u32 },
    #[error("kernel `{kernel}` argument {ordinal} has no binding")]
    ArgBindingUnset { kernel: String, ordinal: u32 },
    #[error("kernel `{kernel}` argument {ordinal} has no offset")]
    ArgOffsetUnset { kernel: String, ordinal: u32 },
}

pub fn validate(module: &ModuleSpec) -> Result<(), ValidationError> {
    validate_samplers(module)?;
    let expected_set = module.argument_descriptor_set();
    for kernel in &module.kernels {
        validate_kernel(kernel, expected_set)?;
    }
    Ok(())
}

fn validate_samplers(module: &ModuleSpec) -> Result<(), ValidationError> {
    let first_set = module.samplers.first().map(|s| s.descriptor_set);
    let mut bindings = HashMap::new();
    for (index, sampler) in module.samplers.iter().enumerate() {
        if sampler.opencl_flags == 0 {
            return Err(ValidationError::SamplerZeroFlags { index });
        }
        if let Some(first) = first_set {
            if sampler.descriptor_set != first {
                return Err(ValidationError::InconsistentSamplerSets {
                    first,
                    other: sampler.descriptor_set,
                });
            }
        }
        if sampler.descriptor_set != Some(0) {
            return Err(ValidationError::SamplerDescriptorSet {
                index,
                found: sampler.descriptor_set,
            });
        }
        let Some(binding) = sampler.binding else {
            return Err(ValidationError::SamplerBindingUnset { index });
        };
        if let Some(&first) = bindings.get(&binding) {
            return Err(ValidationError::DuplicateSamplerBinding {
                first,
                other: index,
                binding,
            });
        }
        bindings.insert(binding, index);
        if !is_sampler_supported(sampler.opencl_flags) {
            return Err(ValidationError::UnsupportedSampler {
                flags: sampler.opencl_flags,
            });
        }
    }
    Ok(())
}

fn validate_kernel(kernel: &KernelSpec, expected_set: u32) -> Result<(), ValidationError> {
    if kernel.name.is_empty() {
        return Err(ValidationError::EmptyKernelName);
    }
    let name = || kernel.name.clone();
    let mut ordinals = HashSet::new();
    let mut spec_constants = HashSet::new();
    // binding -> ordinal of the argument owning it
    let mut bindings = HashMap::new();
    let mut kernel_set = None;
    for (position, arg) in kernel.args.iter().enumerate() {
        if arg.kind == ArgKind::Unknown {
            return Err(ValidationError::UnknownArgKind {
                kernel: name(),
                position,
            });
        }
        let Some(ordinal) = arg.ordinal else {
            return Err(ValidationError::OrdinalUnset {
                kernel: name(),
                position,
            });
        };
        if !ordinals.insert(ordinal) {
            return Err(ValidationError::DuplicateOrdinal {
                kernel: name(),
                ordinal,
            });
        }
        if arg.kind.is_local() {
            let Some(id) = arg.spec_constant else {
                return Err(ValidationError::LocalSpecConstantUnset {
                    kernel: name(),
                    ordinal,
                });
            };
            if id < RESERVED_SPEC_CONSTANTS {
                return Err(ValidationError::LocalSpecConstantReserved {
                    kernel: name(),
                    ordinal,
                    id,
                });
            }
            if !spec_constants.insert(id) {
                return Err(ValidationError::DuplicateSpecConstant { kernel: name(), id });
            }
            continue;
        }
        let Some(set) = arg.descriptor_set else {
            return Err(ValidationError::ArgDescriptorSetUnset {
                kernel: name(),
                ordinal,
            });
        };
        let Some(binding) = arg.binding else {
            return Err(ValidationError::ArgBindingUnset {
                kernel: name(),
                ordinal,
            });
        };
        if arg.offset.is_none() {
            return Err(ValidationError::ArgOffsetUnset {
                kernel: name(),
                ordinal,
            });
        }
        if arg.is_primary_binding() {
            if let Some(&first) = bindings.get(&binding) {
                return Err(ValidationError::DuplicateArgBinding {
                    kernel: name(),
                    first,
                    other: ordinal,
                    binding,
                });
            }
            bindings.insert(binding, ordinal);
        }
        match kernel_set {
            None => kernel_set = Some(set),
            Some(first) if first != set => {
                return Err(ValidationError::KernelArgSetsDiffer {
                    kernel: name(),
                    first,
                    other: set,
                });
            }
            Some(_) => {}
        }
    }
    match kernel_set {
        Some(found) if found != expected_set => Err(ValidationError::KernelArgSetNumber {
            kernel: name(),
            expected: expected_set,
            found,
        }),
        _ => Ok(()),
    }
}
