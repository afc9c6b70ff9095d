// SPDX-License-Identifier: CEPL-1.0
//! Metal backend. Empty on targets other than macOS.

#[cfg(target_os = "macos")]
mod renderer;

#[cfg(target_os = "macos")]
pub use renderer::MetalRenderer;
