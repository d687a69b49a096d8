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
use ash::vk;
use spvmap::ArgKind;
use thiserror::Error;

#[must_use]
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A Vulkan call failed; the native result code is kept.
    #[error("Vulkan error: {0}")]
    VulkanRaw(#[from] vk::Result),
    #[error("{0}")]
    VulkanLoadError(#[from] ash::LoadingError),
    #[error("{0}")]
    AllocationError(#[from] gpu_allocator::AllocationError),
    #[error("{0}")]
    Spvmap(#[from] spvmap::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("spvmap is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("SPIR-V binary is {0} bytes long, which is not a whole number of words")]
    MisalignedShaderBinary(usize),
    #[error("Module `{module}` has no kernel named `{entry_point}`")]
    UnknownEntryPoint { module: String, entry_point: String },
    #[error("Workgroup size {0:?} has a zero dimension")]
    InvalidWorkgroupSize([u32; 3]),
    #[error("Too many arguments: kernel `{kernel}` only declares {declared}")]
    TooManyArguments { kernel: String, declared: usize },
    #[error(
        "Incompatible argument {position} of kernel `{kernel}`: {call} was supplied where {expected:?} is declared"
    )]
    IncompatibleArgument {
        kernel: String,
        position: usize,
        expected: ArgKind,
        call: &'static str,
    },
    #[error("Incompatible resource for argument {position} of kernel `{kernel}`: {reason}")]
    IncompatibleResource {
        kernel: String,
        position: usize,
        reason: &'static str,
    },
    #[error("Kernel `{kernel}` was run with {supplied} of its {declared} arguments")]
    MissingArguments {
        kernel: String,
        supplied: usize,
        declared: usize,
    },
    #[error("OpenCL sampler flags {0:#x} can't be represented by a Vulkan sampler")]
    UnsupportedSampler(u32),
    #[error("Access of {len} bytes at offset {offset} overruns a {size} byte buffer")]
    OutOfBounds { offset: u64, len: usize, size: u64 },
    #[error("Resource memory is not host visible")]
    NotHostVisible,
    #[error("{0}")]
    LockError(String),
    #[error("No supported vulkan device")]
    NoSupportedDevice,
}

impl HarnessError {
    /// The native Vulkan result behind this error, if there is one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::VulkanRaw(e) => Some(*e),
            _ => None,
        }
    }
    pub fn is_vulkan_error(&self) -> bool {
        self.vk_result().is_some()
    }
    pub fn is_out_of_device_memory(&self) -> bool {
        match self {
            Self::VulkanRaw(e) => *e == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            Self::AllocationError(e) => {
                matches!(e, gpu_allocator::AllocationError::OutOfMemory)
            }
            _ => false,
        }
    }
    pub fn is_out_of_host_memory(&self) -> bool {
        match self {
            Self::VulkanRaw(e) => *e == vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            _ => false,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

impl From<spvmap::ValidationError> for HarnessError {
    fn from(e: spvmap::ValidationError) -> Self {
        Self::Spvmap(spvmap::Error::Validation(e))
    }
}
