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
use std::{cell::Cell, ffi::CString};

use ash::vk;
use scopeguard::defer;
use spvmap::{ArgKind, KernelSpec, RESERVED_SPEC_CONSTANTS};

use crate::{Device, HarnessError, HarnessResult, Invocation, Module};

/// The descriptor an argument of `kind` is bound through. `Local` arguments are sized by
/// a specialization constant instead and have none.
pub fn descriptor_type(kind: ArgKind) -> Option<vk::DescriptorType> {
    match kind {
        ArgKind::Pod | ArgKind::Buffer => Some(vk::DescriptorType::STORAGE_BUFFER),
        ArgKind::PodUbo | ArgKind::BufferUbo => Some(vk::DescriptorType::UNIFORM_BUFFER),
        ArgKind::RoImage => Some(vk::DescriptorType::SAMPLED_IMAGE),
        ArgKind::WoImage => Some(vk::DescriptorType::STORAGE_IMAGE),
        ArgKind::Sampler => Some(vk::DescriptorType::SAMPLER),
        ArgKind::CombinedImageSampler => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ArgKind::Local | ArgKind::Unknown => None,
    }
}

/// Number of workgroups needed to cover `work_items` with groups of `workgroup_size`.
pub fn dispatch_size(work_items: [u32; 3], workgroup_size: [u32; 3]) -> [u32; 3] {
    std::array::from_fn(|i| work_items[i].div_ceil(workgroup_size[i]))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpecConstant {
    pub id: u32,
    pub value: u32,
}

/// Workgroup size at constant ids 0, 1 and 2, followed by `trailing`.
pub(crate) fn specialization_constants(
    workgroup_size: [u32; 3],
    trailing: &[SpecConstant],
) -> Vec<SpecConstant> {
    (0..RESERVED_SPEC_CONSTANTS)
        .map(|i| SpecConstant {
            id: i,
            value: workgroup_size[i as usize],
        })
        .chain(trailing.iter().copied())
        .collect()
}

/// # Safety
/// * `device` must be valid
pub(crate) unsafe fn build_descriptor_layout(
    device: &ash::Device,
    spec: &KernelSpec,
) -> HarnessResult<Option<vk::DescriptorSetLayout>> {
    if !spec.has_descriptors() {
        return Ok(None);
    }
    let mut bindings = Vec::new();
    for arg in spec.args.iter().filter(|a| a.is_primary_binding()) {
        let (Some(binding), Some(ty)) = (arg.binding, descriptor_type(arg.kind)) else {
            continue;
        };
        bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
        );
    }
    let layout = unsafe {
        device.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
            None,
        )?
    };
    Ok(Some(layout))
}

/// Literal samplers take set 0 when present, the kernel's own arguments the next set.
///
/// # Safety
/// * `device` and the layouts must be valid
pub(crate) unsafe fn build_pipeline_layout(
    device: &ash::Device,
    sampler_layout: Option<vk::DescriptorSetLayout>,
    arg_layout: Option<vk::DescriptorSetLayout>,
) -> HarnessResult<vk::PipelineLayout> {
    let set_layouts: Vec<_> = sampler_layout.into_iter().chain(arg_layout).collect();
    unsafe {
        Ok(device.create_pipeline_layout(
            &vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts),
            None,
        )?)
    }
}

struct BuiltPipeline {
    constants: Vec<SpecConstant>,
    pipeline: vk::Pipeline,
}

/// A module entry point with its layouts, bound to a workgroup size.
///
/// The compute pipeline is only built when an invocation runs, since `local` arguments
/// add specialization constants that aren't known before then.
pub struct Kernel<'m> {
    module: &'m Module,
    spec: &'m KernelSpec,
    entry: CString,
    workgroup_size: [u32; 3],
    arg_layout: Option<vk::DescriptorSetLayout>,
    arg_set: Option<vk::DescriptorSet>,
    pipeline_layout: vk::PipelineLayout,
    pipeline: Option<BuiltPipeline>,
}

impl<'m> Kernel<'m> {
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub(crate) fn new(
        device: &Device,
        module: &'m Module,
        spec: &'m KernelSpec,
        workgroup_size: [u32; 3],
    ) -> HarnessResult<Self> {
        if workgroup_size.contains(&0) {
            return Err(HarnessError::InvalidWorkgroupSize(workgroup_size));
        }
        // Names come from SPIR-V OpEntryPoint strings, which can't hold a NUL
        let entry = CString::new(spec.name.clone()).map_err(|_| {
            HarnessError::UnknownEntryPoint {
                module: module.name().to_owned(),
                entry_point: spec.name.clone(),
            }
        })?;
        unsafe {
            let raw = &device.device;
            let err = Cell::new(true);
            let arg_layout = build_descriptor_layout(raw, spec)?;
            defer! {
                if err.get() {
                    if let Some(layout) = arg_layout {
                        raw.destroy_descriptor_set_layout(layout, None);
                    }
                }
            }
            let arg_set = match arg_layout {
                Some(layout) => {
                    let _pools = device.lock_pools()?;
                    Some(
                        raw.allocate_descriptor_sets(
                            &vk::DescriptorSetAllocateInfo::default()
                                .descriptor_pool(device.descriptor_pool)
                                .set_layouts(std::slice::from_ref(&layout)),
                        )?[0],
                    )
                }
                None => None,
            };
            let pipeline_layout = build_pipeline_layout(
                raw,
                module.sampler_group().map(|g| g.layout),
                arg_layout,
            )?;
            err.set(false);
            log::debug!(
                "Created kernel `{}` of module `{}` with workgroup size {:?}",
                spec.name,
                module.name(),
                workgroup_size
            );
            Ok(Self {
                module,
                spec,
                entry,
                workgroup_size,
                arg_layout,
                arg_set,
                pipeline_layout,
                pipeline: None,
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
    pub fn spec(&self) -> &'m KernelSpec {
        self.spec
    }
    pub fn module(&self) -> &'m Module {
        self.module
    }
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }
    pub fn argument_layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.arg_layout
    }
    pub fn argument_set(&self) -> Option<vk::DescriptorSet> {
        self.arg_set
    }
    /// Descriptor sets in binding order: literal samplers first, then arguments.
    pub fn descriptor_sets(&self) -> Vec<vk::DescriptorSet> {
        self.module
            .sampler_group()
            .map(|g| g.descriptor_set)
            .into_iter()
            .chain(self.arg_set)
            .collect()
    }
    /// Constants of the current pipeline, or `None` before the first build.
    pub fn specialization(&self) -> Option<&[SpecConstant]> {
        self.pipeline.as_ref().map(|p| p.constants.as_slice())
    }
    pub fn is_built(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Makes sure the pipeline matches the workgroup size plus `trailing` constants,
    /// rebuilding it if they changed.
    ///
    /// # Safety
    /// * No submitted work may be using the current pipeline
    pub unsafe fn update_pipeline(
        &mut self,
        device: &Device,
        trailing: &[SpecConstant],
    ) -> HarnessResult<vk::Pipeline> {
        let constants = specialization_constants(self.workgroup_size, trailing);
        if let Some(built) = &self.pipeline {
            if built.constants == constants {
                return Ok(built.pipeline);
            }
        }
        let values: Vec<u32> = constants.iter().map(|c| c.value).collect();
        let entries: Vec<_> = constants
            .iter()
            .enumerate()
            .map(|(i, c)| {
                vk::SpecializationMapEntry::default()
                    .constant_id(c.id)
                    .offset((i * size_of::<u32>()) as u32)
                    .size(size_of::<u32>())
            })
            .collect();
        let specialization = vk::SpecializationInfo::default()
            .map_entries(&entries)
            .data(bytemuck::cast_slice(&values));
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(self.module.shader())
                    .name(&self.entry)
                    .specialization_info(&specialization),
            )
            .layout(self.pipeline_layout);
        let pipeline = unsafe {
            device
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|e| e.1)?[0]
        };
        if let Some(old) = self.pipeline.take() {
            unsafe {
                device.device.destroy_pipeline(old.pipeline, None);
            }
        }
        log::debug!(
            "Built pipeline for `{}` with specialization {:?}",
            self.spec.name,
            values
        );
        self.pipeline = Some(BuiltPipeline {
            constants,
            pipeline,
        });
        Ok(pipeline)
    }

    /// Starts staging a new dispatch of this kernel.
    pub fn create_invocation<'a>(&'a mut self, device: &'a Device) -> Invocation<'a, 'm> {
        Invocation::new(device, self)
    }

    /// The argument set is not returned to the pool.
    ///
    /// # Safety
    /// * No submitted work may be using the kernel
    pub unsafe fn destroy(self, device: &Device) {
        unsafe {
            if let Some(built) = self.pipeline {
                device.device.destroy_pipeline(built.pipeline, None);
            }
            device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            if let Some(layout) = self.arg_layout {
                device.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_one_descriptor_type() {
        use vk::DescriptorType as D;
        let table = [
            (ArgKind::Pod, Some(D::STORAGE_BUFFER)),
            (ArgKind::Buffer, Some(D::STORAGE_BUFFER)),
            (ArgKind::PodUbo, Some(D::UNIFORM_BUFFER)),
            (ArgKind::BufferUbo, Some(D::UNIFORM_BUFFER)),
            (ArgKind::RoImage, Some(D::SAMPLED_IMAGE)),
            (ArgKind::WoImage, Some(D::STORAGE_IMAGE)),
            (ArgKind::Sampler, Some(D::SAMPLER)),
            (ArgKind::CombinedImageSampler, Some(D::COMBINED_IMAGE_SAMPLER)),
            (ArgKind::Local, None),
            (ArgKind::Unknown, None),
        ];
        for (kind, ty) in table {
            assert_eq!(descriptor_type(kind), ty, "{kind:?}");
        }
    }

    #[test]
    fn dispatch_rounds_up() {
        assert_eq!(dispatch_size([64, 1, 1], [8, 1, 1]), [8, 1, 1]);
        assert_eq!(dispatch_size([65, 3, 1], [8, 2, 1]), [9, 2, 1]);
        assert_eq!(dispatch_size([0, 1, 1], [8, 1, 1]), [0, 1, 1]);
    }

    #[test]
    fn workgroup_size_leads_the_constants() {
        let trailing = [SpecConstant { id: 3, value: 256 }];
        let constants = specialization_constants([4, 2, 1], &trailing);
        assert_eq!(
            constants,
            vec![
                SpecConstant { id: 0, value: 4 },
                SpecConstant { id: 1, value: 2 },
                SpecConstant { id: 2, value: 1 },
                SpecConstant { id: 3, value: 256 },
            ]
        );
    }
}
