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
use std::{
    cell::Cell,
    collections::{HashMap, hash_map::Entry},
    sync::Mutex,
};

use ash::vk;
use gpu_allocator::{
    AllocationSizes, AllocatorDebugSettings,
    vulkan::{Allocator, AllocatorCreateDesc},
};
use scopeguard::defer;
use spvmap::{SamplerListKey, SamplerSpec};

use crate::{HarnessError, HarnessResult, sampler::create_compatible_sampler};

/// A descriptor set holding a module's literal samplers, and its layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerDescriptorGroup {
    pub descriptor_set: vk::DescriptorSet,
    pub layout: vk::DescriptorSetLayout,
}

/// Samplers and sampler descriptor sets, shared by every module loaded on a device and
/// kept until the device is destroyed.
#[derive(Default)]
struct SamplerCache {
    samplers: HashMap<u32, vk::Sampler>,
    /// Buckets by content hash; a hit must also match the full `(binding, flags)` list.
    groups: HashMap<u64, Vec<(Vec<(u32, u32)>, SamplerDescriptorGroup)>>,
}

/// The long lived context kernels are built and run on.
///
/// The logical device, queue and both pools are borrowed: [`Device::destroy`] releases
/// only what the device allocated itself.
pub struct Device {
    pub(crate) device: ash::Device,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    timestamp_period: f32,
    timestamp_valid_bits: u32,
    pub(crate) descriptor_pool: vk::DescriptorPool,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) queue: vk::Queue,
    queue_family_idx: u32,
    pub(crate) alloc: Mutex<Allocator>,
    cache: Mutex<SamplerCache>,
    /// Held while allocating from the borrowed pools or submitting to the queue.
    pools: Mutex<()>,
}

impl Device {
    /// # Safety
    /// * All handles must be valid and belong to `device`
    /// * `queue` must support compute and come from `queue_family_idx`
    /// * `command_pool` must have been created for `queue_family_idx`
    /// * The handles must outlive the returned device
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn from_existing(
        debug: bool,
        instance: &ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        descriptor_pool: vk::DescriptorPool,
        command_pool: vk::CommandPool,
        queue: vk::Queue,
        queue_family_idx: u32,
    ) -> HarnessResult<Self> {
        unsafe {
            let properties = instance.get_physical_device_properties(physical_device);
            let memory_properties =
                instance.get_physical_device_memory_properties(physical_device);
            let timestamp_valid_bits = instance
                .get_physical_device_queue_family_properties(physical_device)
                .get(queue_family_idx as usize)
                .map(|q| q.timestamp_valid_bits)
                .unwrap_or(0);
            let alloc = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: if debug {
                    AllocatorDebugSettings {
                        log_leaks_on_shutdown: true,
                        log_memory_information: true,
                        ..Default::default()
                    }
                } else {
                    AllocatorDebugSettings::default()
                },
                buffer_device_address: false,
                allocation_sizes: AllocationSizes::default(),
            })?;
            log::debug!(
                "Created device on {:?} with {} memory types, timestamp period {}ns",
                properties.device_name_as_c_str().unwrap_or_default(),
                memory_properties.memory_type_count,
                properties.limits.timestamp_period
            );
            Ok(Self {
                device,
                physical_device,
                memory_properties,
                timestamp_period: properties.limits.timestamp_period,
                timestamp_valid_bits,
                descriptor_pool,
                command_pool,
                queue,
                queue_family_idx,
                alloc: Mutex::new(alloc),
                cache: Mutex::new(SamplerCache::default()),
                pools: Mutex::new(()),
            })
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_idx
    }
    /// Nanoseconds per timestamp tick.
    pub fn timestamp_period(&self) -> f32 {
        self.timestamp_period
    }
    /// Zero when the compute queue can't write timestamps.
    pub fn timestamp_valid_bits(&self) -> u32 {
        self.timestamp_valid_bits
    }

    fn lock_cache(&self) -> HarnessResult<std::sync::MutexGuard<'_, SamplerCache>> {
        self.cache
            .lock()
            .map_err(|e| HarnessError::LockError(e.to_string()))
    }

    pub(crate) fn lock_pools(&self) -> HarnessResult<std::sync::MutexGuard<'_, ()>> {
        self.pools
            .lock()
            .map_err(|e| HarnessError::LockError(e.to_string()))
    }

    /// The sampler for `opencl_flags`, created on first use.
    pub fn get_cached_sampler(&self, opencl_flags: u32) -> HarnessResult<vk::Sampler> {
        let mut cache = self.lock_cache()?;
        self.cached_sampler(&mut cache, opencl_flags)
    }

    fn cached_sampler(
        &self,
        cache: &mut SamplerCache,
        opencl_flags: u32,
    ) -> HarnessResult<vk::Sampler> {
        match cache.samplers.entry(opencl_flags) {
            Entry::Occupied(e) => Ok(*e.get()),
            Entry::Vacant(e) => {
                let sampler = unsafe { create_compatible_sampler(&self.device, opencl_flags)? };
                log::debug!("Created sampler for OpenCL flags {opencl_flags:#x}");
                Ok(*e.insert(sampler))
            }
        }
    }

    /// The descriptor set binding every sampler of `samplers` at its declared binding.
    /// Modules declaring the same sampler list get the same set.
    ///
    /// `samplers` must already be sorted by binding, as the parser leaves them.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn get_cached_sampler_descriptor_group(
        &self,
        samplers: &[SamplerSpec],
    ) -> HarnessResult<SamplerDescriptorGroup> {
        let key = SamplerListKey::new(samplers);
        let mut cache = self.lock_cache()?;
        if let Some(bucket) = cache.groups.get(&key.hash) {
            if let Some((_, group)) = bucket.iter().find(|(entries, _)| *entries == key.entries) {
                log::trace!("Sampler descriptor cache hit for {:#018x}", key.hash);
                return Ok(*group);
            }
        }
        let group = self.create_sampler_descriptor_group(&mut cache, &key)?;
        log::debug!(
            "Built sampler descriptor set for {} samplers ({:#018x})",
            key.entries.len(),
            key.hash
        );
        cache
            .groups
            .entry(key.hash)
            .or_default()
            .push((key.entries, group));
        Ok(group)
    }

    fn create_sampler_descriptor_group(
        &self,
        cache: &mut SamplerCache,
        key: &SamplerListKey,
    ) -> HarnessResult<SamplerDescriptorGroup> {
        let mut sampler_handles = Vec::with_capacity(key.entries.len());
        for &(_, flags) in &key.entries {
            sampler_handles.push(self.cached_sampler(cache, flags)?);
        }
        let bindings: Vec<_> = key
            .entries
            .iter()
            .map(|&(binding, _)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        unsafe {
            let err = Cell::new(true);
            let layout = self.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                None,
            )?;
            defer! {
                if err.get() {
                    self.device.destroy_descriptor_set_layout(layout, None);
                }
            }
            let descriptor_set = {
                let _pools = self.lock_pools()?;
                self.device.allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::default()
                        .descriptor_pool(self.descriptor_pool)
                        .set_layouts(std::slice::from_ref(&layout)),
                )?[0]
            };
            let image_infos: Vec<_> = sampler_handles
                .iter()
                .map(|&sampler| vk::DescriptorImageInfo::default().sampler(sampler))
                .collect();
            let writes: Vec<_> = key
                .entries
                .iter()
                .zip(&image_infos)
                .map(|(&(binding, _), info)| {
                    vk::WriteDescriptorSet::default()
                        .dst_set(descriptor_set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::SAMPLER)
                        .image_info(std::slice::from_ref(info))
                })
                .collect();
            self.device.update_descriptor_sets(&writes, &[]);
            err.set(false);
            Ok(SamplerDescriptorGroup {
                descriptor_set,
                layout,
            })
        }
    }

    /// Number of distinct samplers created so far.
    pub fn cached_sampler_count(&self) -> HarnessResult<usize> {
        Ok(self.lock_cache()?.samplers.len())
    }

    /// Number of distinct sampler descriptor sets created so far.
    pub fn cached_sampler_group_count(&self) -> HarnessResult<usize> {
        Ok(self.lock_cache()?.groups.values().map(Vec::len).sum())
    }

    /// # Safety
    /// * Currently no safety requirements. This is subject to change
    pub unsafe fn wait_idle(&self) -> HarnessResult<()> {
        let _pools = self.lock_pools()?;
        unsafe {
            self.device.queue_wait_idle(self.queue)?;
        }
        Ok(())
    }

    /// Releases the caches and the memory allocator. Descriptor sets go back to the
    /// pool only when its owner destroys or resets it.
    ///
    /// # Safety
    /// * All GPU work must be completed
    /// * All modules, kernels and resources created on this device must be destroyed
    pub unsafe fn destroy(self) -> HarnessResult<()> {
        let cache = self
            .cache
            .into_inner()
            .map_err(|e| HarnessError::LockError(e.to_string()))?;
        unsafe {
            for (_, sampler) in cache.samplers {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, group) in cache.groups.into_values().flatten() {
                self.device.destroy_descriptor_set_layout(group.layout, None);
            }
        }
        let alloc = self
            .alloc
            .into_inner()
            .map_err(|e| HarnessError::LockError(e.to_string()))?;
        alloc.report_memory_leaks(log::Level::Error);
        drop(alloc);
        Ok(())
    }
}
