use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure. The defaults are the constants the
/// effect ships with; a JSON file may override any subset of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    pub session: SessionConfig,
    pub tempo: TempoConfig,
    pub particles: ParticleConfig,
    pub audio: AudioConfig,
}

impl PartyConfig {
    /// Reads a configuration from a JSON file. Missing fields keep their
    /// default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Number of beats the audio timeline covers for this configuration.
    pub fn timeline_beats(&self) -> u32 {
        match self.tempo.length {
            TimelineLength::Fixed { beats } => beats,
            TimelineLength::MatchSession => {
                (self.session.duration().as_secs_f64() / self.tempo.beat_seconds()).floor() as u32
            }
        }
    }
}

/// Timing of one party session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_ms: u64,
    pub particle_interval_ms: u64,
    pub pump_ms: u64,
}

impl SessionConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn particle_interval(&self) -> Duration {
        Duration::from_millis(self.particle_interval_ms.max(1))
    }

    pub fn pump(&self) -> Duration {
        Duration::from_millis(self.pump_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_ms: 8_000,
            particle_interval_ms: 30,
            pump_ms: 100,
        }
    }
}

/// How many beats the backing track is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineLength {
    /// A fixed number of beats, regardless of the session duration.
    Fixed { beats: u32 },
    /// As many whole beats as fit into the session duration.
    MatchSession,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub bpm: f64,
    pub length: TimelineLength,
}

impl TempoConfig {
    pub fn beat_seconds(&self) -> f64 {
        60.0 / self.bpm.max(1.0)
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            bpm: 140.0,
            length: TimelineLength::Fixed { beats: 32 },
        }
    }
}

/// Appearance of the falling particles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub lifetime_ms: u64,
    pub min_size_px: f32,
    pub max_size_px: f32,
    /// Probability that a particle is drawn as a rotated square rather than
    /// a circle.
    pub square_probability: f64,
    pub glow_px: f32,
    pub start_offset_px: f32,
}

impl ParticleConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms)
    }
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            lifetime_ms: 2_000,
            min_size_px: 5.0,
            max_size_px: 25.0,
            square_probability: 0.7,
            glow_px: 15.0,
            start_offset_px: -20.0,
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// FFT window of the kick alignment check.
    pub kick_window_ms: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            kick_window_ms: 32.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_thirty_two_beats() {
        let config = PartyConfig::default();
        assert_eq!(config.timeline_beats(), 32);
        assert_eq!(config.session.duration(), Duration::from_secs(8));
    }

    #[test]
    fn match_session_derives_beats_from_duration() {
        let mut config = PartyConfig::default();
        config.tempo.length = TimelineLength::MatchSession;
        // 8 s at 140 BPM is 18.67 beats.
        assert_eq!(config.timeline_beats(), 18);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            PartyConfig::from_json_str(r#"{ "session": { "duration_ms": 4000 } }"#).unwrap();
        assert_eq!(config.session.duration_ms, 4_000);
        assert_eq!(config.session.particle_interval_ms, 30);
        assert_eq!(config.tempo.bpm, 140.0);
    }

    #[test]
    fn parses_timeline_length() {
        let config =
            PartyConfig::from_json_str(r#"{ "tempo": { "length": "match_session" } }"#).unwrap();
        assert_eq!(config.tempo.length, TimelineLength::MatchSession);

        let config =
            PartyConfig::from_json_str(r#"{ "tempo": { "length": { "fixed": { "beats": 8 } } } }"#)
                .unwrap();
        assert_eq!(config.timeline_beats(), 8);
    }
}
