// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod palette;
pub mod stats;

pub use config::{AppCfg, BackendKind, ClearMode, ConfigError, RenderCfg, VsyncMode, WindowCfg};
pub use palette::ClearSource;
pub use stats::FrameStats;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
