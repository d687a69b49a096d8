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

use std::collections::HashMap;

use ash::vk;
use dev_utils::vulkan_test;
use spvmap::ArgKind;

use crate as harness;
use harness::{
    BufferDescriptor, Device, HarnessError, Module, SpecConstant, fixture::ResourceLoader,
    spirv_words,
};

const ONE_BUFFER: &str =
    "kernel,main,arg,data,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n";
const SAMPLED_ONE_BUFFER: &str = "sampler,0x12,descriptorSet,0,binding,0\n\
    kernel,main,argOrdinal,0,descriptorSet,1,binding,0,offset,0,argKind,buffer\n";

fn doubling_module(device: &Device, spvmap: &str) -> harness::HarnessResult<Module> {
    let set = if spvmap.starts_with("sampler") { 1 } else { 0 };
    let spirv = spirv::as_bytes(&spirv::doubling_shader(set, spvmap.contains("local")));
    Module::from_parts(device, "doubling", &spirv, spvmap)
}

#[test]
fn misaligned_spirv_is_rejected() {
    assert!(matches!(
        spirv_words(&[3, 2, 0x23, 7, 1]),
        Err(HarnessError::MisalignedShaderBinary(5))
    ));
    let words = spirv::doubling_shader(0, false);
    let bytes = spirv::as_bytes(&words);
    assert_eq!(&*spirv_words(&bytes).unwrap(), words.as_slice());
    // Unaligned start still yields the same words
    let mut shifted = vec![0u8];
    shifted.extend_from_slice(&bytes);
    assert_eq!(&*spirv_words(&shifted[1..]).unwrap(), words.as_slice());
}

#[test]
fn assembled_shader_header() {
    let words = spirv::doubling_shader(0, true);
    assert_eq!(words[0], 0x0723_0203);
    assert_eq!(words[3], 29);
}

fn sampler_cache(device: &Device) -> anyhow::Result<()> {
    let a = device.get_cached_sampler(0x12)?;
    let b = device.get_cached_sampler(0x12)?;
    assert_eq!(a, b);
    assert_ne!(a, device.get_cached_sampler(0x23)?);
    assert_eq!(device.cached_sampler_count()?, 2);
    // CLK_ADDRESS_REPEAT with unnormalized coordinates
    assert!(matches!(
        device.get_cached_sampler(0x16),
        Err(HarnessError::UnsupportedSampler(0x16))
    ));
    assert_eq!(device.cached_sampler_count()?, 2);
    Ok(())
}
vulkan_test!(sampler_cache);

fn sampler_group_is_shared(device: &Device) -> anyhow::Result<()> {
    let first = doubling_module(device, SAMPLED_ONE_BUFFER)?;
    let second = doubling_module(device, SAMPLED_ONE_BUFFER)?;
    let a = first.sampler_group().expect("module declares a sampler");
    let b = second.sampler_group().expect("module declares a sampler");
    assert_eq!(a, b);
    assert_eq!(device.cached_sampler_group_count()?, 1);

    let kernel = first.create_kernel(device, "main", [8, 1, 1])?;
    assert_eq!(kernel.descriptor_sets().len(), 2);
    assert_eq!(kernel.descriptor_sets()[0], a.descriptor_set);
    unsafe {
        kernel.destroy(device);
        first.destroy(device);
        second.destroy(device);
    }
    Ok(())
}
vulkan_test!(sampler_group_is_shared);

fn too_many_arguments(device: &Device) -> anyhow::Result<()> {
    let spvmap = "kernel,main,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n\
        kernel,main,argOrdinal,1,descriptorSet,0,binding,1,offset,0,argKind,pod\n";
    let module = doubling_module(device, spvmap)?;
    let mut kernel = module.create_kernel(device, "main", [8, 1, 1])?;
    let data = device.create_buffer(&BufferDescriptor::storage(256))?;
    let pod = device.create_buffer(&BufferDescriptor::storage(16))?;
    {
        let mut invocation = kernel.create_invocation(device);
        invocation.add_storage_buffer_argument(&data)?;
        assert_eq!(invocation.next_argument().map(|a| a.kind), Some(ArgKind::Pod));
        invocation.add_storage_buffer_argument(&pod)?;
        assert!(invocation.next_argument().is_none());
        let err = invocation.add_storage_buffer_argument(&data).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::TooManyArguments { declared: 2, .. }
        ));
    }
    unsafe {
        device.destroy_buffer(data)?;
        device.destroy_buffer(pod)?;
        kernel.destroy(device);
        module.destroy(device);
    }
    Ok(())
}
vulkan_test!(too_many_arguments);

fn argument_kinds_are_enforced(device: &Device) -> anyhow::Result<()> {
    let spvmap = "kernel,main,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,sampler\n\
        kernel,main,argOrdinal,1,descriptorSet,0,binding,1,offset,0,argKind,buffer\n";
    let module = doubling_module(device, spvmap)?;
    let mut kernel = module.create_kernel(device, "main", [1, 1, 1])?;
    let storage = device.create_buffer(&BufferDescriptor::storage(64))?;
    let uniform = device.create_buffer(&BufferDescriptor::uniform(64))?;
    {
        let mut invocation = kernel.create_invocation(device);
        let err = invocation.add_storage_buffer_argument(&storage).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::IncompatibleArgument {
                position: 0,
                expected: ArgKind::Sampler,
                ..
            }
        ));
    }
    {
        let mut invocation = kernel.create_invocation(device);
        invocation.add_sampler_argument(device.get_cached_sampler(0x13)?)?;
        let err = invocation.add_storage_buffer_argument(&uniform).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::IncompatibleResource { position: 1, .. }
        ));
        let err = invocation.add_uniform_buffer_argument(&uniform).unwrap_err();
        assert!(matches!(err, HarnessError::IncompatibleArgument { .. }));
    }
    unsafe {
        device.destroy_buffer(storage)?;
        device.destroy_buffer(uniform)?;
        kernel.destroy(device);
        module.destroy(device);
    }
    Ok(())
}
vulkan_test!(argument_kinds_are_enforced);

fn dispatch_writes_buffer(device: &Device) -> anyhow::Result<()> {
    let module = doubling_module(device, ONE_BUFFER)?;
    assert_eq!(module.entry_points().collect::<Vec<_>>(), ["main"]);
    let mut kernel = module.create_kernel(device, "main", [8, 1, 1])?;
    let mut data = device.create_buffer(&BufferDescriptor::storage(64 * 4))?;
    unsafe { data.write(0, &[0xff; 64 * 4])? };

    let err = kernel.create_invocation(device).run([64, 1, 1]).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::MissingArguments {
            supplied: 0,
            declared: 1,
            ..
        }
    ));
    assert!(!kernel.is_built());

    let mut invocation = kernel.create_invocation(device);
    invocation.add_storage_buffer_argument(&data)?;
    let time = invocation.run([64, 1, 1])?;
    log::info!("Dispatch took {time:?}");
    assert!(time.gpu_total >= time.gpu_execution);

    let contents: Vec<u32> = unsafe { data.contents()? };
    let expected: Vec<u32> = (0..64).map(|i| i * 2).collect();
    assert_eq!(contents, expected);
    assert_eq!(
        kernel.specialization(),
        Some(
            &[
                SpecConstant { id: 0, value: 8 },
                SpecConstant { id: 1, value: 1 },
                SpecConstant { id: 2, value: 1 },
            ][..]
        )
    );
    unsafe {
        device.destroy_buffer(data)?;
        kernel.destroy(device);
        module.destroy(device);
    }
    Ok(())
}
vulkan_test!(dispatch_writes_buffer);

fn host_access_is_bounded(device: &Device) -> anyhow::Result<()> {
    let mut data = device.create_buffer(&BufferDescriptor::storage(64))?;
    unsafe {
        data.write(60, &[1, 2, 3, 4])?;
        assert!(matches!(
            data.write(61, &[0; 4]),
            Err(HarnessError::OutOfBounds { size: 64, .. })
        ));
        let mut tail = [0u8; 8];
        assert!(matches!(
            data.read(60, &mut tail),
            Err(HarnessError::OutOfBounds { offset: 60, len: 8, .. })
        ));
        data.read(60, &mut tail[..4])?;
        assert_eq!(tail[..4], [1, 2, 3, 4]);
        device.destroy_buffer(data)?;
    }
    Ok(())
}
vulkan_test!(host_access_is_bounded);

fn local_sizes_rebuild_pipeline(device: &Device) -> anyhow::Result<()> {
    let spvmap = format!("{ONE_BUFFER}kernel,main,argOrdinal,1,argKind,local,arrayNumElemSpecId,3\n");
    let module = doubling_module(device, &spvmap)?;
    let mut kernel = module.create_kernel(device, "main", [4, 1, 1])?;
    let data = device.create_buffer(&BufferDescriptor::storage(16 * 4))?;
    for count in [16, 16, 32] {
        let mut invocation = kernel.create_invocation(device);
        invocation.add_storage_buffer_argument(&data)?;
        invocation.add_local_array_size_argument(count)?;
        invocation.run([16, 1, 1])?;
        let constants = kernel.specialization().expect("pipeline was built");
        assert_eq!(constants.len(), 4);
        assert_eq!(constants[3], SpecConstant { id: 3, value: count });
    }
    {
        let mut invocation = kernel.create_invocation(device);
        invocation.add_storage_buffer_argument(&data)?;
        assert!(matches!(
            invocation.add_local_array_size_argument(0),
            Err(HarnessError::IncompatibleResource { position: 1, .. })
        ));
    }
    unsafe {
        device.destroy_buffer(data)?;
        kernel.destroy(device);
        module.destroy(device);
    }
    Ok(())
}
vulkan_test!(local_sizes_rebuild_pipeline);

fn modules_load_through_loader(device: &Device) -> anyhow::Result<()> {
    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    files.insert(
        "doubling.spv".to_owned(),
        spirv::as_bytes(&spirv::doubling_shader(0, false)),
    );
    files.insert("doubling.spvmap".to_owned(), ONE_BUFFER.as_bytes().to_vec());
    let module = Module::load(device, &files, "doubling")?;
    assert_eq!(module.spec().kernels[0].args[0].name.as_deref(), Some("data"));
    assert!(matches!(
        module.create_kernel(device, "missing", [1, 1, 1]),
        Err(HarnessError::UnknownEntryPoint { .. })
    ));
    assert!(matches!(
        module.create_kernel(device, "main", [0, 1, 1]),
        Err(HarnessError::InvalidWorkgroupSize([0, 1, 1]))
    ));
    assert!(matches!(
        Module::load(device, &files, "absent"),
        Err(HarnessError::Io(_))
    ));
    assert!(files.load("doubling.spvmap").is_ok());
    unsafe { module.destroy(device) };
    Ok(())
}
vulkan_test!(modules_load_through_loader);

fn image_usage_is_checked(device: &Device) -> anyhow::Result<()> {
    let image = device.create_image(&harness::ImageDescriptor {
        width: 4,
        height: 4,
        format: vk::Format::R8G8B8A8_UNORM,
        sampled: true,
        storage: false,
    })?;
    assert_eq!(image.layout(), vk::ImageLayout::UNDEFINED);
    assert!(image.usage().contains(vk::ImageUsageFlags::SAMPLED));
    let spvmap = "kernel,main,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,wo_image\n";
    let module = doubling_module(device, spvmap)?;
    let mut kernel = module.create_kernel(device, "main", [1, 1, 1])?;
    {
        let mut invocation = kernel.create_invocation(device);
        assert!(matches!(
            invocation.add_write_only_image_argument(&image),
            Err(HarnessError::IncompatibleResource { .. })
        ));
    }
    unsafe {
        kernel.destroy(device);
        module.destroy(device);
        device.destroy_image(image)?;
    }
    Ok(())
}
vulkan_test!(image_usage_is_checked);
