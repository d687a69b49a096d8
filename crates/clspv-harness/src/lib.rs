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
//! Runs clspv-compiled OpenCL kernels through Vulkan compute.
//!
//! A [`Module`] pairs a SPIR-V binary with the spvmap clspv wrote next to it. Kernels
//! created from a module own their descriptor set and pipeline layouts, and each
//! [`Invocation`] stages arguments in the kernel's declared order, records a timestamped
//! dispatch and waits for it to finish.
//!
//! Everything is synchronous. A [`Device`] may be shared between threads, but an
//! invocation submits and then waits for the queue to drain before returning.

mod context;
mod device;
mod error;
pub mod fixture;
mod invocation;
mod kernel;
mod module;
mod resource;
pub mod sampler;

#[cfg(test)]
mod tests;

pub use context::{ContextDescriptor, VulkanContext};
pub use device::{Device, SamplerDescriptorGroup};
pub use error::{HarnessError, HarnessResult};
pub use invocation::{ExecutionTime, Invocation};
pub use kernel::{Kernel, SpecConstant, descriptor_type, dispatch_size};
pub use module::{Module, spirv_words};
pub use resource::{Buffer, BufferDescriptor, Image, ImageDescriptor};

pub use ash;
pub use spvmap;
