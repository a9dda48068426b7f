//! Tracing initialisation for processes embedding chatmem.
//!
//! `RUST_LOG` wins when set; otherwise `general.log_level` is the filter.
//! Only the first call in a process installs a subscriber.

use chatmem_core::config::GeneralConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(general: &GeneralConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(general.log_level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if general.log_format == "json" {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .is_ok()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().is_ok()
    }
}
