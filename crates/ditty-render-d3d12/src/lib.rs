// SPDX-License-Identifier: CEPL-1.0
//! Direct3D 12 backend. Empty on non-Windows targets.

#[cfg(windows)]
mod renderer;

#[cfg(windows)]
pub use renderer::D3d12Renderer;
