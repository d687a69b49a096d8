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
//! Loads clspv modules from a directory and lists each kernel's argument ABI.
//!
//! `cargo run --example run_module -- <module>...`, with the modules' `.spv` and
//! `.spvmap` files in `CLSPV_KERNEL_DIR` (default: the current directory).

use clspv_harness::{
    ContextDescriptor, Device, Module, VulkanContext,
    fixture::{DirectoryLoader, TestOutcome, TestRunner},
};

pub fn main() -> anyhow::Result<()> {
    dev_utils::init_logging();
    let dir = std::env::var("CLSPV_KERNEL_DIR").unwrap_or_else(|_| ".".to_owned());
    let loader = DirectoryLoader::new(dir);
    let names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        anyhow::bail!("usage: run_module <module>...");
    }

    let context = VulkanContext::create(&ContextDescriptor {
        debug: true,
        ..Default::default()
    })?;
    let mut runner = TestRunner::<Device>::new();
    for name in &names {
        let loader = &loader;
        runner.register(name.clone(), move |device| {
            let module = Module::load(device, loader, name)?;
            println!("{name}:");
            for kernel in &module.spec().kernels {
                println!("  {}", kernel.name);
                for arg in &kernel.args {
                    println!(
                        "    {:>2} {:<24} {:?} set {:?} binding {:?}",
                        arg.ordinal.map_or(-1, |o| o as i64),
                        arg.name.as_deref().unwrap_or("-"),
                        arg.kind,
                        arg.descriptor_set,
                        arg.binding
                    );
                }
            }
            let mut outcome = TestOutcome::Pass;
            for entry_point in module.entry_points() {
                match module.create_kernel(device, entry_point, [1, 1, 1]) {
                    Ok(kernel) => unsafe { kernel.destroy(device) },
                    Err(e) => {
                        outcome = TestOutcome::Fail(format!("{entry_point}: {e}"));
                        break;
                    }
                }
            }
            unsafe { module.destroy(device) };
            Ok(outcome)
        });
    }
    let summary = runner.run(context.device());
    unsafe { context.destroy()? };
    println!(
        "{} modules: {} ok, {} failed",
        summary.total(),
        summary.passed,
        summary.failed
    );
    Ok(())
}
