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
//! Standalone Vulkan setup for when no host application hands us a device.

use std::{borrow::Cow, cell::Cell, ffi};

use ash::{Entry, vk};
use log::Level;
use scopeguard::defer;

use crate::{Device, HarnessError, HarnessResult};

const VALIDATION_LAYER: &ffi::CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextDescriptor {
    /// Enables the validation layer when installed, and routes its messages to `log`.
    pub debug: bool,
    /// Maximum number of descriptor sets in the shared pool.
    pub descriptor_pool_sets: u32,
    /// Pool capacity for each descriptor type kernels can use.
    pub descriptors_per_type: u32,
}

impl Default for ContextDescriptor {
    fn default() -> Self {
        Self {
            debug: false,
            descriptor_pool_sets: 256,
            descriptors_per_type: 1024,
        }
    }
}

/// Owns the instance, logical device and pools behind a [`Device`].
pub struct VulkanContext {
    _entry: Entry,
    instance: ash::Instance,
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    descriptor_pool: vk::DescriptorPool,
    command_pool: vk::CommandPool,
    device: Device,
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        unsafe { ffi::CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy() }
    };
    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        unsafe { ffi::CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };
    let level = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => Level::Trace,
        _ => Level::Error,
    };
    log::log!(
        level,
        "{message_type:?} [{message_id_name} ({message_id_number})] : {message}"
    );
    vk::FALSE
}

/// First queue family of any physical device that supports compute.
fn pick_compute_queue(
    instance: &ash::Instance,
) -> HarnessResult<(vk::PhysicalDevice, u32)> {
    unsafe {
        instance
            .enumerate_physical_devices()?
            .into_iter()
            .find_map(|phyd| {
                instance
                    .get_physical_device_queue_family_properties(phyd)
                    .iter()
                    .position(|q| q.queue_flags.contains(vk::QueueFlags::COMPUTE))
                    .map(|i| (phyd, i as u32))
            })
            .ok_or(HarnessError::NoSupportedDevice)
    }
}

impl VulkanContext {
    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn create(desc: &ContextDescriptor) -> HarnessResult<Self> {
        unsafe {
            let err = Cell::new(true);
            let entry = Entry::load()?;
            let has_validation = desc.debug
                && entry
                    .enumerate_instance_layer_properties()?
                    .iter()
                    .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
            if desc.debug && !has_validation {
                log::warn!("Validation layer requested but not installed");
            }
            let layers = if has_validation {
                vec![VALIDATION_LAYER.as_ptr()]
            } else {
                Vec::new()
            };
            let extensions = if desc.debug {
                vec![ash::ext::debug_utils::NAME.as_ptr()]
            } else {
                Vec::new()
            };
            let app_info =
                vk::ApplicationInfo::default().api_version(vk::make_api_version(0, 1, 1, 0));
            let instance = entry.create_instance(
                &vk::InstanceCreateInfo::default()
                    .application_info(&app_info)
                    .enabled_layer_names(&layers)
                    .enabled_extension_names(&extensions),
                None,
            )?;
            let instance_guard = instance.clone();
            defer! {
                if err.get() {
                    instance_guard.destroy_instance(None);
                }
            }
            let debug_messenger = if desc.debug {
                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let messenger = loader.create_debug_utils_messenger(
                    &vk::DebugUtilsMessengerCreateInfoEXT::default()
                        .message_severity(
                            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                        )
                        .message_type(
                            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                        )
                        .pfn_user_callback(Some(vulkan_debug_callback)),
                    None,
                )?;
                Some((loader, messenger))
            } else {
                None
            };
            let messenger_guard = debug_messenger.clone();
            defer! {
                if err.get() {
                    if let Some((loader, messenger)) = &messenger_guard {
                        loader.destroy_debug_utils_messenger(*messenger, None);
                    }
                }
            }

            let (phyd, queue_family_idx) = pick_compute_queue(&instance)?;
            let queue_priority = 1.0;
            let queue_create_info = vk::DeviceQueueCreateInfo::default()
                .queue_priorities(std::slice::from_ref(&queue_priority))
                .queue_family_index(queue_family_idx);
            let raw = instance.create_device(
                phyd,
                &vk::DeviceCreateInfo::default()
                    .queue_create_infos(std::slice::from_ref(&queue_create_info)),
                None,
            )?;
            defer! {
                if err.get() {
                    raw.destroy_device(None);
                }
            }
            let queue = raw.get_device_queue(queue_family_idx, 0);
            let command_pool = raw.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family_idx)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )?;
            defer! {
                if err.get() {
                    raw.destroy_command_pool(command_pool, None);
                }
            }
            let pool_sizes: Vec<_> = [
                vk::DescriptorType::SAMPLER,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::DescriptorType::UNIFORM_BUFFER,
            ]
            .into_iter()
            .map(|ty| {
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(desc.descriptors_per_type)
            })
            .collect();
            let descriptor_pool = raw.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(desc.descriptor_pool_sets)
                    .pool_sizes(&pool_sizes),
                None,
            )?;
            defer! {
                if err.get() {
                    raw.destroy_descriptor_pool(descriptor_pool, None);
                }
            }
            let device = Device::from_existing(
                desc.debug,
                &instance,
                raw.clone(),
                phyd,
                descriptor_pool,
                command_pool,
                queue,
                queue_family_idx,
            )?;
            err.set(false);
            Ok(Self {
                _entry: entry,
                instance,
                debug_messenger,
                descriptor_pool,
                command_pool,
                device,
            })
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// # Safety
    /// * Every module, kernel and resource created on [`Self::device`] must be destroyed
    pub unsafe fn destroy(self) -> HarnessResult<()> {
        unsafe {
            self.device.wait_idle()?;
            let raw = self.device.raw().clone();
            self.device.destroy()?;
            raw.destroy_descriptor_pool(self.descriptor_pool, None);
            raw.destroy_command_pool(self.command_pool, None);
            raw.destroy_device(None);
            if let Some((loader, messenger)) = self.debug_messenger {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        Ok(())
    }
}
