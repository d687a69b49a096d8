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
use std::borrow::Cow;

use ash::vk;
use spvmap::ModuleSpec;

use crate::{
    Device, HarnessError, HarnessResult, Kernel, SamplerDescriptorGroup,
    fixture::ResourceLoader,
};

/// Reinterprets a SPIR-V binary as words, copying only if `bytes` isn't 4-byte aligned.
pub fn spirv_words(bytes: &[u8]) -> HarnessResult<Cow<'_, [u32]>> {
    if bytes.len() % 4 != 0 {
        return Err(HarnessError::MisalignedShaderBinary(bytes.len()));
    }
    Ok(match bytemuck::try_cast_slice(bytes) {
        Ok(words) => Cow::Borrowed(words),
        Err(_) => Cow::Owned(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
    })
}

/// A SPIR-V module together with its parsed spvmap.
pub struct Module {
    name: String,
    spec: ModuleSpec,
    shader: vk::ShaderModule,
    sampler_group: Option<SamplerDescriptorGroup>,
}

impl Module {
    /// Loads `{name}.spv` and `{name}.spvmap` through `loader`.
    pub fn load(
        device: &Device,
        loader: &dyn ResourceLoader,
        name: &str,
    ) -> HarnessResult<Self> {
        let spirv = loader.load(&format!("{name}.spv"))?;
        let spvmap = String::from_utf8(loader.load(&format!("{name}.spvmap"))?)?;
        Self::from_parts(device, name, &spirv, &spvmap)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(device, spirv, spvmap)))]
    pub fn from_parts(
        device: &Device,
        name: &str,
        spirv: &[u8],
        spvmap: &str,
    ) -> HarnessResult<Self> {
        let spec = spvmap::parse(spvmap)?;
        Self::from_spec(device, name, spirv, spec)
    }

    /// Like [`Self::from_parts`], for a spec that was built or edited in code. The spec
    /// is validated before anything is created.
    pub fn from_spec(
        device: &Device,
        name: &str,
        spirv: &[u8],
        mut spec: ModuleSpec,
    ) -> HarnessResult<Self> {
        spvmap::sort_samplers(&mut spec.samplers);
        for kernel in &mut spec.kernels {
            spvmap::reorder_args(&mut kernel.args);
        }
        spvmap::validate(&spec)?;
        let words = spirv_words(spirv)?;
        // Sampler sets live in the device cache, so only the shader needs cleanup
        let sampler_group = if spec.has_samplers() {
            Some(device.get_cached_sampler_descriptor_group(&spec.samplers)?)
        } else {
            None
        };
        let shader = unsafe {
            device
                .device
                .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(&words), None)?
        };
        log::info!(
            "Loaded module `{name}` with {} kernels and {} literal samplers",
            spec.kernels.len(),
            spec.samplers.len()
        );
        Ok(Self {
            name: name.to_owned(),
            spec,
            shader,
            sampler_group,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.spec.entry_points()
    }
    pub fn shader(&self) -> vk::ShaderModule {
        self.shader
    }
    pub fn sampler_group(&self) -> Option<SamplerDescriptorGroup> {
        self.sampler_group
    }

    pub fn create_kernel(
        &self,
        device: &Device,
        entry_point: &str,
        workgroup_size: [u32; 3],
    ) -> HarnessResult<Kernel<'_>> {
        let spec = self
            .spec
            .kernel(entry_point)
            .ok_or_else(|| HarnessError::UnknownEntryPoint {
                module: self.name.clone(),
                entry_point: entry_point.to_owned(),
            })?;
        Kernel::new(device, self, spec, workgroup_size)
    }

    /// # Safety
    /// * Every kernel created from this module must be destroyed
    pub unsafe fn destroy(self, device: &Device) {
        unsafe {
            device.device.destroy_shader_module(self.shader, None);
        }
    }
}
