use std::{fmt, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ParticleConfig;

/// Colours a particle may take: red, magenta, blue, cyan, green, yellow.
pub const PALETTE: [Rgb; 6] = [
    Rgb::new(0xff, 0x00, 0x00),
    Rgb::new(0xff, 0x00, 0xff),
    Rgb::new(0x00, 0x00, 0xff),
    Rgb::new(0x00, 0xff, 0xff),
    Rgb::new(0x00, 0xff, 0x00),
    Rgb::new(0xff, 0xff, 0x00),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticleId(u64);

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "particle#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    Square { rotation_deg: f32 },
    Circle,
}

/// A short-lived decorative shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: ParticleId,
    /// Horizontal position in viewport-width units, `[0, 100)`.
    pub x_vw: f32,
    /// Vertical start relative to the top of the visible area.
    pub y_offset_px: f32,
    pub size_px: f32,
    pub color: Rgb,
    pub shape: Shape,
    pub glow_px: f32,
    pub born_at: Duration,
    pub lifetime: Duration,
}

impl Particle {
    pub fn expires_at(&self) -> Duration {
        self.born_at + self.lifetime
    }
}

/// Produces randomised particles from a seedable stream.
#[derive(Debug)]
pub struct ParticleEmitter {
    config: ParticleConfig,
    rng: StdRng,
    next_id: u64,
}

impl ParticleEmitter {
    pub fn new(config: ParticleConfig) -> Self {
        Self::from_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: ParticleConfig, seed: u64) -> Self {
        Self::from_rng(config, StdRng::seed_from_u64(seed))
    }

    fn from_rng(config: ParticleConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng,
            next_id: 0,
        }
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    /// Creates the next particle, born at `now`.
    pub fn spawn(&mut self, now: Duration) -> Particle {
        let id = ParticleId(self.next_id);
        self.next_id += 1;

        let min = self.config.min_size_px.min(self.config.max_size_px);
        let max = self.config.min_size_px.max(self.config.max_size_px);
        let size_px = if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        };

        let color = PALETTE[self.rng.gen_range(0..PALETTE.len())];
        let square = self
            .rng
            .gen_bool(self.config.square_probability.clamp(0.0, 1.0));
        let shape = if square {
            Shape::Square {
                rotation_deg: self.rng.gen_range(0.0..360.0),
            }
        } else {
            Shape::Circle
        };

        Particle {
            id,
            x_vw: self.rng.gen_range(0.0..100.0),
            y_offset_px: self.config.start_offset_px,
            size_px,
            color,
            shape,
            glow_px: self.config.glow_px,
            born_at: now,
            lifetime: self.config.lifetime(),
        }
    }
}
