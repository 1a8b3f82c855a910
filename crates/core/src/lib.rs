//! Core library for the Party Mode celebration effect.
//!
//! A party session toggles presentation modes on a render surface, rains
//! coloured particles, pulses the screen on every beat and plays a
//! synthesised backing track. The render surface and the audio output are
//! traits, so the same controller drives a document, a terminal, or the
//! in-memory implementations used by the tests and the offline renderer.

pub mod analysis;
pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod particles;
pub mod pulse;
pub mod record;
pub mod render;
pub mod session;
pub mod synth;
pub mod timeline;

pub use analysis::{check_kicks, KickDetector, KickReport};
#[cfg(feature = "playback")]
pub use audio::{CpalBackend, CpalOutput};
pub use audio::{
    AudioBackend, AudioOutput, MixBuffer, MixHandle, OfflineBackend, StreamMixer,
    UnavailableBackend,
};
pub use clock::{Clock, Fired, PlaybackClock, SystemClock, TimerId, TimerQueue};
pub use config::{
    AudioConfig, ParticleConfig, PartyConfig, SessionConfig, TempoConfig, TimelineLength,
};
pub use error::{PartyError, Result};
pub use particles::{Particle, ParticleEmitter, ParticleId, Rgb, Shape, PALETTE};
pub use pulse::BeatTracker;
pub use record::{Recorder, RecordingSettings};
pub use render::{Fixture, MemorySurface, PresentationMode, RenderSurface, SurfaceStats};
pub use session::{ControllerStats, PartyController};
pub use synth::{Automation, Oscillator, Voice, VoiceKind, Waveform, MIN_SAMPLE_RATE};
pub use timeline::{AudioTimeline, ScheduledSound, LEAD_ARPEGGIO};
