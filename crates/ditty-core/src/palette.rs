// SPDX-License-Identifier: CEPL-1.0
use crate::config::{ClearMode, RenderCfg};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Supplies the clear color for each frame.
#[derive(Debug, Clone)]
pub enum ClearSource {
    Fixed([f32; 4]),
    Random(SmallRng),
}

impl ClearSource {
    pub fn from_cfg(cfg: &RenderCfg) -> Self {
        match cfg.clear {
            ClearMode::Fixed => ClearSource::Fixed(cfg.clear_color),
            ClearMode::Random => ClearSource::Random(SmallRng::from_entropy()),
        }
    }

    /// Channels are uniform in `[0, 1)`; alpha is always 1.
    pub fn next_color(&mut self) -> [f32; 4] {
        match self {
            ClearSource::Fixed(rgba) => *rgba,
            ClearSource::Random(rng) => [rng.gen(), rng.gen(), rng.gen(), 1.0],
        }
    }

    /// Fixed colors only need to be handed to the renderer once.
    pub fn is_animated(&self) -> bool {
        matches!(self, ClearSource::Random(_))
    }
}
