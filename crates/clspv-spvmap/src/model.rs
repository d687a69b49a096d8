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
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::sampler::SamplerListKey;

/// Specialization constants 0, 1 and 2 hold the workgroup size; `local` arguments are
/// sized through ids from here on.
pub const RESERVED_SPEC_CONSTANTS: u32 = 3;

/// One OpenCL literal sampler declared by a module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerSpec {
    pub opencl_flags: u32,
    /// `None` when the map didn't say.
    pub descriptor_set: Option<u32>,
    pub binding: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKind {
    #[default]
    Unknown,
    /// Plain data packed into a storage buffer
    Pod,
    /// Plain data packed into a uniform buffer
    PodUbo,
    Buffer,
    BufferUbo,
    CombinedImageSampler,
    RoImage,
    WoImage,
    Sampler,
    /// Workgroup-local array, sized through a specialization constant
    Local,
}

const ARG_KIND_TOKENS: [(&str, ArgKind); 9] = [
    ("pod", ArgKind::Pod),
    ("pod_ubo", ArgKind::PodUbo),
    ("buffer", ArgKind::Buffer),
    ("buffer_ubo", ArgKind::BufferUbo),
    ("combined_image_sampler", ArgKind::CombinedImageSampler),
    ("ro_image", ArgKind::RoImage),
    ("wo_image", ArgKind::WoImage),
    ("sampler", ArgKind::Sampler),
    ("local", ArgKind::Local),
];

impl ArgKind {
    pub fn from_token(token: &str) -> Option<Self> {
        ARG_KIND_TOKENS
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, kind)| *kind)
    }
    /// The spvmap token for this kind. `Unknown` has none.
    pub fn token(&self) -> Option<&'static str> {
        ARG_KIND_TOKENS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(t, _)| *t)
    }
    pub fn is_pod(&self) -> bool {
        matches!(self, Self::Pod | Self::PodUbo)
    }
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            Self::RoImage | Self::WoImage | Self::CombinedImageSampler
        )
    }
}

/// One positional kernel parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Source-level name, when the map carries one.
    pub name: Option<String>,
    pub kind: ArgKind,
    pub ordinal: Option<u32>,
    pub descriptor_set: Option<u32>,
    pub binding: Option<u32>,
    pub offset: Option<u32>,
    /// Specialization constant id holding the element count of a `local` argument.
    pub spec_constant: Option<u32>,
    pub arg_size: Option<u32>,
}

impl ArgSpec {
    /// Whether this argument owns a descriptor binding. Arguments spanning several
    /// words of the same binding only contribute through their `offset == 0` entry.
    pub fn is_primary_binding(&self) -> bool {
        !self.kind.is_local() && self.offset == Some(0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub name: String,
    pub args: Vec<ArgSpec>,
}

impl KernelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }
    /// The descriptor set shared by all non-local arguments, if there are any.
    pub fn descriptor_set(&self) -> Option<u32> {
        self.args
            .iter()
            .find(|a| !a.kind.is_local())
            .and_then(|a| a.descriptor_set)
    }
    pub fn resource_args(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args
            .iter()
            .filter(|a| !a.kind.is_pod() && !a.kind.is_local())
    }
    pub fn pod_args(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args.iter().filter(|a| a.kind.is_pod())
    }
    pub fn local_args(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args.iter().filter(|a| a.kind.is_local())
    }
    /// True if at least one argument needs a descriptor.
    pub fn has_descriptors(&self) -> bool {
        self.args.iter().any(|a| !a.kind.is_local())
    }
}

/// Everything the spvmap of one SPIR-V module declares.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub samplers: Vec<SamplerSpec>,
    pub kernels: Vec<KernelSpec>,
}

impl ModuleSpec {
    pub fn kernel(&self, name: &str) -> Option<&KernelSpec> {
        self.kernels.iter().find(|k| k.name == name)
    }
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }
    pub fn has_samplers(&self) -> bool {
        !self.samplers.is_empty()
    }
    /// Literal samplers occupy set 0 when present, pushing kernel arguments to set 1.
    pub fn argument_descriptor_set(&self) -> u32 {
        if self.has_samplers() { 1 } else { 0 }
    }
    /// The full identity of the literal-sampler list, in binding order.
    pub fn sampler_key(&self) -> SamplerListKey {
        SamplerListKey::new(&self.samplers)
    }

    /// Renders the module back into spvmap text. Feeding the output to
    /// [`crate::parse`] yields an equal module.
    pub fn to_spvmap(&self) -> String {
        let mut out = String::new();
        for sampler in &self.samplers {
            let _ = write!(out, "sampler,{}", sampler.opencl_flags);
            write_opt(&mut out, "descriptorSet", sampler.descriptor_set);
            write_opt(&mut out, "binding", sampler.binding);
            out.push('\n');
        }
        for kernel in &self.kernels {
            let name = quote_field(&kernel.name);
            if kernel.args.is_empty() {
                let _ = writeln!(out, "kernel_decl,{name}");
                continue;
            }
            for arg in &kernel.args {
                let _ = write!(out, "kernel,{name}");
                if let Some(arg_name) = &arg.name {
                    let _ = write!(out, ",arg,{}", quote_field(arg_name));
                }
                write_opt(&mut out, "argOrdinal", arg.ordinal);
                write_opt(&mut out, "descriptorSet", arg.descriptor_set);
                write_opt(&mut out, "binding", arg.binding);
                write_opt(&mut out, "offset", arg.offset);
                if let Some(token) = arg.kind.token() {
                    let _ = write!(out, ",argKind,{token}");
                }
                write_opt(&mut out, "arrayNumElemSpecId", arg.spec_constant);
                write_opt(&mut out, "argSize", arg.arg_size);
                out.push('\n');
            }
        }
        out
    }
}

fn write_opt(out: &mut String, key: &str, value: Option<u32>) {
    if let Some(v) = value {
        let _ = write!(out, ",{key},{v}");
    }
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}
