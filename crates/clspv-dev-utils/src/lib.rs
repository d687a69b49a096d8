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
pub use paste;
use std::{
    fmt::Write,
    sync::{LazyLock, Mutex, MutexGuard},
};
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
};

pub struct EnterSpanPrinter;

impl<S> tracing_subscriber::Layer<S> for EnterSpanPrinter
where
    S: tracing::Subscriber,
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_enter(&self, id: &tracing::Id, ctx: Context<'_, S>) {
        if let Some(span_ref) = ctx.span(id) {
            let name = span_ref.name();

            let mut fields = String::new();
            if let Some(ext) = span_ref
                .extensions()
                .get::<tracing_subscriber::fmt::FormattedFields<
                    tracing_subscriber::fmt::format::DefaultFields,
                >>()
            {
                write!(fields, "{ext}").ok();
            }

            println!("\t{name} [{fields}]");
        }
    }
}
pub fn setup_trace_printer() {
    let _ = tracing_subscriber::registry()
        .with(EnterSpanPrinter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|a| &a != "0" && &a != "false" && !a.is_empty())
}
pub fn setup_trace_printer_if_env() {
    if env_flag("CLSPV_LOG_FULL_TRACE") {
        setup_trace_printer();
    }
}
/// Set `CLSPV_SKIP_VULKAN` to skip every test that needs a device.
pub fn should_skip_vulkan() -> bool {
    env_flag("CLSPV_SKIP_VULKAN")
}
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();
    setup_trace_printer_if_env();
}

static DEVICE_CREATE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Some drivers misbehave when several devices are brought up at once, so device tests
/// run one at a time. A panicking test doesn't block the others.
pub fn device_lock() -> MutexGuard<'static, ()> {
    DEVICE_CREATE_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wraps `fn $test_name(device: &harness::Device) -> anyhow::Result<()>` in a test that
/// brings up a Vulkan context, or skips when there is none.
#[macro_export]
macro_rules! vulkan_test {
    ($test_name:ident) => {
        $crate::paste::paste! {
            #[test]
            pub fn [<$test_name _vulkan>]() {
                $crate::init_logging();
                if $crate::should_skip_vulkan() {
                    return;
                }
                let _lock = $crate::device_lock();
                let context = match harness::VulkanContext::create(&harness::ContextDescriptor {
                    debug: true,
                    ..Default::default()
                }) {
                    Ok(context) => context,
                    Err(e) => {
                        log::warn!("Skipping {}: no Vulkan device ({e})", stringify!($test_name));
                        return;
                    }
                };
                log::info!("Created Vulkan context");
                let result = $test_name(context.device());
                unsafe { context.destroy().unwrap() };
                result.unwrap();
            }
        }
    };
}
