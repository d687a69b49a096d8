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
//! Buffers and images for test fixtures to hand to invocations.

use std::{cell::Cell, ops::Range};

use ash::vk;
use gpu_allocator::{
    MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
};
use scopeguard::defer;

use crate::{Device, HarnessError, HarnessResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub size: u64,
    pub storage: bool,
    pub uniform: bool,
    pub transfer_src: bool,
    pub transfer_dst: bool,
}

impl BufferDescriptor {
    pub fn storage(size: u64) -> Self {
        Self {
            size,
            storage: true,
            ..Default::default()
        }
    }
    pub fn uniform(size: u64) -> Self {
        Self {
            size,
            uniform: true,
            ..Default::default()
        }
    }
    fn usage(&self) -> vk::BufferUsageFlags {
        use vk::BufferUsageFlags as F;
        let mut flags = F::empty();
        if self.storage {
            flags |= F::STORAGE_BUFFER;
        }
        if self.uniform {
            flags |= F::UNIFORM_BUFFER;
        }
        if self.transfer_src {
            flags |= F::TRANSFER_SRC;
        }
        if self.transfer_dst {
            flags |= F::TRANSFER_DST;
        }
        flags
    }
}

/// Host visible buffer memory.
pub struct Buffer {
    pub(crate) buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }
    /// # Safety
    /// * No submitted work may be using the buffer
    pub unsafe fn write(&mut self, offset: u64, data: &[u8]) -> HarnessResult<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .ok_or(HarnessError::NotHostVisible)?;
        let range = host_range(offset, data.len(), self.size)?;
        mapped[range].copy_from_slice(data);
        Ok(())
    }
    /// # Safety
    /// * No submitted work may be writing the buffer
    pub unsafe fn read(&self, offset: u64, data: &mut [u8]) -> HarnessResult<()> {
        let mapped = self
            .allocation
            .mapped_slice()
            .ok_or(HarnessError::NotHostVisible)?;
        let range = host_range(offset, data.len(), self.size)?;
        data.copy_from_slice(&mapped[range]);
        Ok(())
    }
    /// Reads the whole buffer as a slice of `T`.
    ///
    /// # Safety
    /// * No submitted work may be writing the buffer
    pub unsafe fn contents<T: bytemuck::Pod>(&self) -> HarnessResult<Vec<T>> {
        let mut out = vec![T::zeroed(); self.size as usize / size_of::<T>()];
        unsafe { self.read(0, bytemuck::cast_slice_mut(&mut out))? };
        Ok(out)
    }
}

/// Byte range of a host access, bounded by the buffer size rather than the mapping.
fn host_range(offset: u64, len: usize, size: u64) -> HarnessResult<Range<usize>> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(HarnessError::OutOfBounds { offset, len, size }),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub sampled: bool,
    pub storage: bool,
}

/// A 2D, single mip, single layer image with a view over all of it.
pub struct Image {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    allocation: Allocation,
    descriptor: ImageDescriptor,
    usage: vk::ImageUsageFlags,
    /// Layout the last completed invocation left the image in.
    layout: Cell<vk::ImageLayout>,
}

impl Image {
    pub fn raw(&self) -> vk::Image {
        self.image
    }
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.get()
    }
    pub(crate) fn set_layout(&self, layout: vk::ImageLayout) {
        self.layout.set(layout);
    }
}

pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

impl Device {
    pub fn create_buffer(&self, desc: &BufferDescriptor) -> HarnessResult<Buffer> {
        let usage = desc.usage();
        unsafe {
            let err = Cell::new(true);
            let buffer = self.device.create_buffer(
                &vk::BufferCreateInfo::default()
                    .size(desc.size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )?;
            defer! {
                if err.get() {
                    self.device.destroy_buffer(buffer, None);
                }
            }
            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = self
                .alloc
                .lock()
                .map_err(|e| HarnessError::LockError(e.to_string()))?
                .allocate(&AllocationCreateDesc {
                    name: "clspv buffer",
                    requirements,
                    location: MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })?;
            if let Err(e) =
                self.device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            {
                if let Ok(mut alloc) = self.alloc.lock() {
                    let _ = alloc.free(allocation);
                }
                return Err(e.into());
            }
            err.set(false);
            Ok(Buffer {
                buffer,
                allocation,
                size: desc.size,
                usage,
            })
        }
    }

    /// # Safety
    /// * No submitted work may be using the buffer
    pub unsafe fn destroy_buffer(&self, buffer: Buffer) -> HarnessResult<()> {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        self.alloc
            .lock()
            .map_err(|e| HarnessError::LockError(e.to_string()))?
            .free(buffer.allocation)?;
        Ok(())
    }

    pub fn create_image(&self, desc: &ImageDescriptor) -> HarnessResult<Image> {
        let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if desc.sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if desc.storage {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        unsafe {
            let err = Cell::new(true);
            let image = self.device.create_image(
                &vk::ImageCreateInfo::default()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(desc.format)
                    .extent(vk::Extent3D {
                        width: desc.width,
                        height: desc.height,
                        depth: 1,
                    })
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED),
                None,
            )?;
            defer! {
                if err.get() {
                    self.device.destroy_image(image, None);
                }
            }
            let requirements = self.device.get_image_memory_requirements(image);
            let allocation = self
                .alloc
                .lock()
                .map_err(|e| HarnessError::LockError(e.to_string()))?
                .allocate(&AllocationCreateDesc {
                    name: "clspv image",
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })?;
            let bound = self
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .and_then(|()| {
                    self.device.create_image_view(
                        &vk::ImageViewCreateInfo::default()
                            .image(image)
                            .view_type(vk::ImageViewType::TYPE_2D)
                            .format(desc.format)
                            .subresource_range(color_subresource_range()),
                        None,
                    )
                });
            let view = match bound {
                Ok(view) => view,
                Err(e) => {
                    if let Ok(mut alloc) = self.alloc.lock() {
                        let _ = alloc.free(allocation);
                    }
                    return Err(e.into());
                }
            };
            err.set(false);
            Ok(Image {
                image,
                view,
                allocation,
                descriptor: *desc,
                usage,
                layout: Cell::new(vk::ImageLayout::UNDEFINED),
            })
        }
    }

    /// # Safety
    /// * No submitted work may be using the image
    pub unsafe fn destroy_image(&self, image: Image) -> HarnessResult<()> {
        unsafe {
            self.device.destroy_image_view(image.view, None);
            self.device.destroy_image(image.image, None);
        }
        self.alloc
            .lock()
            .map_err(|e| HarnessError::LockError(e.to_string()))?
            .free(image.allocation)?;
        Ok(())
    }
}
