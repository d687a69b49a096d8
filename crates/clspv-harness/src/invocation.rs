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
    collections::BTreeMap,
    time::{Duration, Instant},
};

use ash::vk;
use scopeguard::defer;
use spvmap::{ArgKind, ArgSpec};

use crate::{
    Buffer, Device, HarnessError, HarnessResult, Image, Kernel, SpecConstant, descriptor_type,
    dispatch_size, resource::color_subresource_range,
};

/// Timestamp slots, in recording order.
const TS_START: u32 = 0;
const TS_AFTER_BARRIER: u32 = 1;
const TS_AFTER_DISPATCH: u32 = 2;
const TS_END: u32 = 3;
const TIMESTAMP_COUNT: u32 = 4;

/// Timing of one completed dispatch. GPU durations are zero when the queue can't
/// write timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionTime {
    /// Host time from submission until the queue went idle.
    pub cpu_duration: Duration,
    /// Between the timestamps around the dispatch.
    pub gpu_execution: Duration,
    /// Time spent in the barrier that makes the arguments visible to the shader.
    pub gpu_host_barrier: Duration,
    pub gpu_total: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArgumentCall {
    StorageBuffer,
    UniformBuffer,
    ReadOnlyImage,
    WriteOnlyImage,
    Sampler,
    CombinedImageSampler,
    LocalArraySize,
}

impl ArgumentCall {
    fn name(self) -> &'static str {
        match self {
            Self::StorageBuffer => "a storage buffer",
            Self::UniformBuffer => "a uniform buffer",
            Self::ReadOnlyImage => "a read-only image",
            Self::WriteOnlyImage => "a write-only image",
            Self::Sampler => "a sampler",
            Self::CombinedImageSampler => "a combined image sampler",
            Self::LocalArraySize => "a local array size",
        }
    }
    fn descriptor_type(self) -> Option<vk::DescriptorType> {
        match self {
            Self::StorageBuffer => Some(vk::DescriptorType::STORAGE_BUFFER),
            Self::UniformBuffer => Some(vk::DescriptorType::UNIFORM_BUFFER),
            Self::ReadOnlyImage => Some(vk::DescriptorType::SAMPLED_IMAGE),
            Self::WriteOnlyImage => Some(vk::DescriptorType::STORAGE_IMAGE),
            Self::Sampler => Some(vk::DescriptorType::SAMPLER),
            Self::CombinedImageSampler => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            Self::LocalArraySize => None,
        }
    }
    fn accepts(self, kind: ArgKind) -> bool {
        match self {
            Self::LocalArraySize => kind.is_local(),
            _ => descriptor_type(kind) == self.descriptor_type(),
        }
    }
}

enum DescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    ty: vk::DescriptorType,
    info: DescriptorInfo,
}

/// One dispatch of a kernel, staged argument by argument.
///
/// Arguments must be added in the kernel's declared order: resource arguments by
/// ordinal, then POD arguments by ordinal. Each call is checked against the declared
/// kind, and a failed call leaves the invocation unusable.
pub struct Invocation<'a, 'm> {
    device: &'a Device,
    kernel: &'a mut Kernel<'m>,
    next_arg: usize,
    writes: BTreeMap<u32, PendingWrite>,
    buffer_barriers: Vec<vk::BufferMemoryBarrier<'static>>,
    image_barriers: Vec<vk::ImageMemoryBarrier<'static>>,
    image_transitions: Vec<(&'a Image, vk::ImageLayout)>,
    local_sizes: Vec<SpecConstant>,
}

impl<'a, 'm> Invocation<'a, 'm> {
    pub(crate) fn new(device: &'a Device, kernel: &'a mut Kernel<'m>) -> Self {
        Self {
            device,
            kernel,
            next_arg: 0,
            writes: BTreeMap::new(),
            buffer_barriers: Vec::new(),
            image_barriers: Vec::new(),
            image_transitions: Vec::new(),
            local_sizes: Vec::new(),
        }
    }

    /// The argument the next `add_*` call must supply.
    pub fn next_argument(&self) -> Option<&'m ArgSpec> {
        self.kernel.spec().args.get(self.next_arg)
    }
    pub fn arguments_supplied(&self) -> usize {
        self.next_arg
    }

    fn check_next(&self, call: ArgumentCall) -> HarnessResult<&'m ArgSpec> {
        let spec = self.kernel.spec();
        let arg = spec
            .args
            .get(self.next_arg)
            .ok_or_else(|| HarnessError::TooManyArguments {
                kernel: spec.name.clone(),
                declared: spec.args.len(),
            })?;
        if !call.accepts(arg.kind) {
            return Err(HarnessError::IncompatibleArgument {
                kernel: spec.name.clone(),
                position: self.next_arg,
                expected: arg.kind,
                call: call.name(),
            });
        }
        Ok(arg)
    }

    fn incompatible(&self, reason: &'static str) -> HarnessError {
        HarnessError::IncompatibleResource {
            kernel: self.kernel.name().to_owned(),
            position: self.next_arg,
            reason,
        }
    }

    /// Arguments past the first word of a binding share that binding's descriptor.
    fn queue_write(&mut self, arg: &ArgSpec, ty: vk::DescriptorType, info: DescriptorInfo) {
        if let (true, Some(binding)) = (arg.is_primary_binding(), arg.binding) {
            self.writes.insert(binding, PendingWrite { ty, info });
        }
        self.next_arg += 1;
    }

    fn buffer_barrier(
        buffer: &Buffer,
        src: vk::AccessFlags,
        dst: vk::AccessFlags,
    ) -> vk::BufferMemoryBarrier<'static> {
        vk::BufferMemoryBarrier::default()
            .src_access_mask(src)
            .dst_access_mask(dst)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.raw())
            .offset(0)
            .size(vk::WHOLE_SIZE)
    }

    fn transition(&mut self, image: &'a Image, layout: vk::ImageLayout, dst: vk::AccessFlags) {
        self.image_barriers.push(
            vk::ImageMemoryBarrier::default()
                .src_access_mask(
                    vk::AccessFlags::HOST_WRITE
                        | vk::AccessFlags::TRANSFER_WRITE
                        | vk::AccessFlags::SHADER_WRITE,
                )
                .dst_access_mask(dst)
                .old_layout(image.layout())
                .new_layout(layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.raw())
                .subresource_range(color_subresource_range()),
        );
        self.image_transitions.push((image, layout));
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn add_storage_buffer_argument(&mut self, buffer: &'a Buffer) -> HarnessResult<()> {
        let arg = self.check_next(ArgumentCall::StorageBuffer)?;
        if !buffer.usage().contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
            return Err(self.incompatible("buffer was not created with storage usage"));
        }
        let earlier_writes = vk::AccessFlags::HOST_WRITE
            | vk::AccessFlags::TRANSFER_WRITE
            | vk::AccessFlags::SHADER_WRITE;
        self.buffer_barriers.push(Self::buffer_barrier(
            buffer,
            earlier_writes,
            vk::AccessFlags::SHADER_READ,
        ));
        self.buffer_barriers.push(Self::buffer_barrier(
            buffer,
            earlier_writes,
            vk::AccessFlags::SHADER_WRITE,
        ));
        self.queue_write(
            arg,
            vk::DescriptorType::STORAGE_BUFFER,
            DescriptorInfo::Buffer(
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer.raw())
                    .offset(0)
                    .range(vk::WHOLE_SIZE),
            ),
        );
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn add_uniform_buffer_argument(&mut self, buffer: &'a Buffer) -> HarnessResult<()> {
        let arg = self.check_next(ArgumentCall::UniformBuffer)?;
        if !buffer.usage().contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            return Err(self.incompatible("buffer was not created with uniform usage"));
        }
        self.buffer_barriers.push(Self::buffer_barrier(
            buffer,
            vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::UNIFORM_READ,
        ));
        self.queue_write(
            arg,
            vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorInfo::Buffer(
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer.raw())
                    .offset(0)
                    .range(vk::WHOLE_SIZE),
            ),
        );
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn add_read_only_image_argument(&mut self, image: &'a Image) -> HarnessResult<()> {
        let arg = self.check_next(ArgumentCall::ReadOnlyImage)?;
        if !image.usage().contains(vk::ImageUsageFlags::SAMPLED) {
            return Err(self.incompatible("image was not created with sampled usage"));
        }
        let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        self.transition(image, layout, vk::AccessFlags::SHADER_READ);
        self.queue_write(
            arg,
            vk::DescriptorType::SAMPLED_IMAGE,
            DescriptorInfo::Image(
                vk::DescriptorImageInfo::default()
                    .image_view(image.view())
                    .image_layout(layout),
            ),
        );
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn add_write_only_image_argument(&mut self, image: &'a Image) -> HarnessResult<()> {
        let arg = self.check_next(ArgumentCall::WriteOnlyImage)?;
        if !image.usage().contains(vk::ImageUsageFlags::STORAGE) {
            return Err(self.incompatible("image was not created with storage usage"));
        }
        let layout = vk::ImageLayout::GENERAL;
        self.transition(image, layout, vk::AccessFlags::SHADER_WRITE);
        self.queue_write(
            arg,
            vk::DescriptorType::STORAGE_IMAGE,
            DescriptorInfo::Image(
                vk::DescriptorImageInfo::default()
                    .image_view(image.view())
                    .image_layout(layout),
            ),
        );
        Ok(())
    }

    /// `sampler` is usually one from [`Device::get_cached_sampler`].
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn add_sampler_argument(&mut self, sampler: vk::Sampler) -> HarnessResult<()> {
        let arg = self.check_next(ArgumentCall::Sampler)?;
        self.queue_write(
            arg,
            vk::DescriptorType::SAMPLER,
            DescriptorInfo::Image(vk::DescriptorImageInfo::default().sampler(sampler)),
        );
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn add_combined_image_sampler_argument(
        &mut self,
        image: &'a Image,
        sampler: vk::Sampler,
    ) -> HarnessResult<()> {
        let arg = self.check_next(ArgumentCall::CombinedImageSampler)?;
        if !image.usage().contains(vk::ImageUsageFlags::SAMPLED) {
            return Err(self.incompatible("image was not created with sampled usage"));
        }
        let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        self.transition(image, layout, vk::AccessFlags::SHADER_READ);
        self.queue_write(
            arg,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorInfo::Image(
                vk::DescriptorImageInfo::default()
                    .sampler(sampler)
                    .image_view(image.view())
                    .image_layout(layout),
            ),
        );
        Ok(())
    }

    /// Sizes a `local` array argument. The count becomes a specialization constant, so
    /// a new count rebuilds the pipeline when the invocation runs.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn add_local_array_size_argument(&mut self, element_count: u32) -> HarnessResult<()> {
        let arg = self.check_next(ArgumentCall::LocalArraySize)?;
        if element_count == 0 {
            return Err(self.incompatible("local arrays need at least one element"));
        }
        let id = arg
            .spec_constant
            .ok_or_else(|| self.incompatible("local argument has no specialization constant"))?;
        self.local_sizes.push(SpecConstant {
            id,
            value: element_count,
        });
        self.next_arg += 1;
        Ok(())
    }

    /// Records, submits and waits for the dispatch covering `global_size` work items.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn run(self, global_size: [u32; 3]) -> HarnessResult<ExecutionTime> {
        let declared = self.kernel.spec().args.len();
        if self.next_arg < declared {
            return Err(HarnessError::MissingArguments {
                kernel: self.kernel.name().to_owned(),
                supplied: self.next_arg,
                declared,
            });
        }
        let device = self.device;
        let raw = &device.device;
        unsafe {
            // The previous run waited for the queue to drain, so the pipeline is idle
            let pipeline = self.kernel.update_pipeline(device, &self.local_sizes)?;
            if let Some(set) = self.kernel.argument_set() {
                let writes: Vec<_> = self
                    .writes
                    .iter()
                    .map(|(&binding, write)| {
                        let w = vk::WriteDescriptorSet::default()
                            .dst_set(set)
                            .dst_binding(binding)
                            .descriptor_type(write.ty);
                        match &write.info {
                            DescriptorInfo::Buffer(info) => {
                                w.buffer_info(std::slice::from_ref(info))
                            }
                            DescriptorInfo::Image(info) => {
                                w.image_info(std::slice::from_ref(info))
                            }
                        }
                    })
                    .collect();
                raw.update_descriptor_sets(&writes, &[]);
            }

            let _pools = device.lock_pools()?;
            let cb = raw.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(device.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )?[0];
            defer! {
                raw.free_command_buffers(device.command_pool, &[cb]);
            }
            let query_pool = if device.timestamp_valid_bits() != 0 {
                Some(raw.create_query_pool(
                    &vk::QueryPoolCreateInfo::default()
                        .query_type(vk::QueryType::TIMESTAMP)
                        .query_count(TIMESTAMP_COUNT),
                    None,
                )?)
            } else {
                log::warn!("Compute queue has no timestamp support, GPU times will read as zero");
                None
            };
            defer! {
                if let Some(pool) = query_pool {
                    raw.destroy_query_pool(pool, None);
                }
            }
            let timestamp = |stage, slot| {
                if let Some(pool) = query_pool {
                    raw.cmd_write_timestamp(cb, stage, pool, slot);
                }
            };

            raw.begin_command_buffer(
                cb,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
            raw.cmd_bind_pipeline(cb, vk::PipelineBindPoint::COMPUTE, pipeline);
            let sets = self.kernel.descriptor_sets();
            if !sets.is_empty() {
                raw.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::COMPUTE,
                    self.kernel.pipeline_layout(),
                    0,
                    &sets,
                    &[],
                );
            }
            if let Some(pool) = query_pool {
                raw.cmd_reset_query_pool(cb, pool, 0, TIMESTAMP_COUNT);
            }
            timestamp(vk::PipelineStageFlags::TOP_OF_PIPE, TS_START);
            raw.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::HOST
                    | vk::PipelineStageFlags::COMPUTE_SHADER
                    | vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &self.buffer_barriers,
                &self.image_barriers,
            );
            timestamp(vk::PipelineStageFlags::COMPUTE_SHADER, TS_AFTER_BARRIER);
            let [x, y, z] = dispatch_size(global_size, self.kernel.workgroup_size());
            raw.cmd_dispatch(cb, x, y, z);
            timestamp(vk::PipelineStageFlags::COMPUTE_SHADER, TS_AFTER_DISPATCH);
            timestamp(vk::PipelineStageFlags::BOTTOM_OF_PIPE, TS_END);
            raw.end_command_buffer(cb)?;

            let start = Instant::now();
            raw.queue_submit(
                device.queue,
                &[vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&cb))],
                vk::Fence::null(),
            )?;
            raw.queue_wait_idle(device.queue)?;
            let cpu_duration = start.elapsed();

            for (image, layout) in &self.image_transitions {
                image.set_layout(*layout);
            }

            let mut time = ExecutionTime {
                cpu_duration,
                ..Default::default()
            };
            if let Some(pool) = query_pool {
                let mut ticks = [0u64; TIMESTAMP_COUNT as usize];
                raw.get_query_pool_results(
                    pool,
                    0,
                    &mut ticks,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )?;
                let span = |from: u32, to: u32| {
                    ticks_to_duration(
                        ticks[from as usize],
                        ticks[to as usize],
                        device.timestamp_valid_bits(),
                        device.timestamp_period(),
                    )
                };
                time.gpu_host_barrier = span(TS_START, TS_AFTER_BARRIER);
                time.gpu_execution = span(TS_AFTER_BARRIER, TS_AFTER_DISPATCH);
                time.gpu_total = span(TS_START, TS_END);
            }
            log::debug!(
                "Ran `{}` over {:?} work items ({:?} workgroups) in {:?}",
                self.kernel.name(),
                global_size,
                [x, y, z],
                time
            );
            Ok(time)
        }
    }
}

/// Elapsed time between two raw timestamps, of which only the low `valid_bits` count.
fn ticks_to_duration(from: u64, to: u64, valid_bits: u32, period_ns: f32) -> Duration {
    let mask = if valid_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << valid_bits) - 1
    };
    let ticks = (to & mask).wrapping_sub(from & mask) & mask;
    Duration::from_nanos((ticks as f64 * period_ns as f64) as u64)
}
