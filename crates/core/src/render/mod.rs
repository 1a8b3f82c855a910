use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Particle, ParticleId};

/// Presentation modes toggled on the root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationMode {
    Party,
    Shake,
}

impl PresentationMode {
    pub fn class_name(self) -> &'static str {
        match self {
            PresentationMode::Party => "party-mode",
            PresentationMode::Shake => "party-shake",
        }
    }
}

/// Static decorations living in the particle layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixture {
    LaserBeam,
    ReverseLaserBeam,
    Strobe,
    MirrorBall,
}

impl Fixture {
    pub const ALL: [Fixture; 4] = [
        Fixture::LaserBeam,
        Fixture::ReverseLaserBeam,
        Fixture::Strobe,
        Fixture::MirrorBall,
    ];
}

/// Boundary to whatever draws the effect. Implementations must tolerate
/// calls that refer to elements which no longer exist.
pub trait RenderSurface {
    /// Creates the particle layer and its fixtures if they are missing.
    fn ensure_fixtures(&mut self);

    fn set_mode(&mut self, mode: PresentationMode, enabled: bool);

    /// Removes and re-adds a mode with a layout flush in between, so that an
    /// animation bound to it starts over.
    fn restart_mode(&mut self, mode: PresentationMode);

    /// Toggles the pump class on the pulse targets.
    fn set_pump(&mut self, enabled: bool);

    /// Appends a particle to the layer. Returns `false` when there is no
    /// layer to append to.
    fn append_particle(&mut self, particle: &Particle) -> bool;

    fn remove_particle(&mut self, id: ParticleId);

    /// Drops every particle from the layer.
    fn clear_particles(&mut self);
}

/// Counters kept by [`MemorySurface`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceStats {
    pub appended: usize,
    pub removed: usize,
    pub cleared: usize,
    pub restarts: usize,
    pub layout_flushes: usize,
    pub pumps: usize,
    pub missing_layer: usize,
}

/// In-memory render surface recording the state a document would have.
#[derive(Debug, Default)]
pub struct MemorySurface {
    layer: bool,
    auto_create_layer: bool,
    fixtures: BTreeSet<Fixture>,
    modes: BTreeSet<PresentationMode>,
    pumped: bool,
    particles: BTreeMap<ParticleId, Particle>,
    stats: SurfaceStats,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self {
            auto_create_layer: true,
            ..Default::default()
        }
    }

    /// Surface whose particle layer never materialises, as when the host
    /// document strips it.
    pub fn without_layer() -> Self {
        Self::default()
    }

    pub fn has_layer(&self) -> bool {
        self.layer
    }

    pub fn fixtures(&self) -> &BTreeSet<Fixture> {
        &self.fixtures
    }

    pub fn is_mode_enabled(&self, mode: PresentationMode) -> bool {
        self.modes.contains(&mode)
    }

    pub fn is_pumped(&self) -> bool {
        self.pumped
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn contains(&self, id: ParticleId) -> bool {
        self.particles.contains_key(&id)
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.particles.values()
    }

    pub fn stats(&self) -> &SurfaceStats {
        &self.stats
    }
}

impl RenderSurface for MemorySurface {
    fn ensure_fixtures(&mut self) {
        if !self.layer && self.auto_create_layer {
            self.layer = true;
            tracing::debug!("created particle layer");
        }
        if self.layer {
            self.fixtures.extend(Fixture::ALL);
        }
    }

    fn set_mode(&mut self, mode: PresentationMode, enabled: bool) {
        if enabled {
            self.modes.insert(mode);
        } else {
            self.modes.remove(&mode);
        }
    }

    fn restart_mode(&mut self, mode: PresentationMode) {
        self.modes.remove(&mode);
        self.stats.layout_flushes += 1;
        self.modes.insert(mode);
        self.stats.restarts += 1;
    }

    fn set_pump(&mut self, enabled: bool) {
        if enabled && !self.pumped {
            self.stats.pumps += 1;
        }
        self.pumped = enabled;
    }

    fn append_particle(&mut self, particle: &Particle) -> bool {
        if !self.layer {
            self.stats.missing_layer += 1;
            return false;
        }
        self.particles.insert(particle.id, particle.clone());
        self.stats.appended += 1;
        true
    }

    fn remove_particle(&mut self, id: ParticleId) {
        if self.particles.remove(&id).is_some() {
            self.stats.removed += 1;
        }
    }

    fn clear_particles(&mut self) {
        if !self.particles.is_empty() {
            self.stats.cleared += self.particles.len();
            self.particles.clear();
        }
    }
}
