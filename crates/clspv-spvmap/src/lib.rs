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
//! Data model and parser for the `spvmap` sidecar files clspv writes next to each
//! compiled SPIR-V module.
//!
//! The map describes, per kernel, how each OpenCL argument is bound to a Vulkan
//! descriptor (or specialization constant), as well as the literal samplers the
//! module declares. Nothing in this crate talks to Vulkan; the `clspv-harness` crate
//! turns a [`ModuleSpec`] into layouts and pipelines.

mod model;
mod parse;
pub mod sampler;
mod validate;


pub use model::*;
pub use parse::{ParseError, ParseErrorKind, parse, reorder_args, sort_samplers};
pub use sampler::{
    AddressMode, Filter, SamplerDescription, SamplerListKey, is_sampler_supported,
    sampler_list_hash,
};
pub use validate::{ValidationError, validate};

use thiserror::Error;

#[must_use]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, Error>;
