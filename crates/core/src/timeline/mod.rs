use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PartyConfig, Voice, VoiceKind};

/// Downbeat bass: lower cutoff, longer tail.
const HEAVY_BASS: Voice = Voice::Bass {
    cutoff_hz: 150.0,
    sustain: 0.3,
};
const LIGHT_BASS: Voice = Voice::Bass {
    cutoff_hz: 300.0,
    sustain: 0.1,
};

/// Beat offsets of the air horn accents.
const AIR_HORN_BEATS: [f64; 3] = [0.0, 4.0, 8.0];

const SPAN_EPSILON: f64 = 1e-9;

/// Lead arpeggio, played once in eighth notes from the top of the track.
pub const LEAD_ARPEGGIO: [f32; 16] = [
    523.25, 659.25, 783.99, 1046.50, //
    523.25, 659.25, 783.99, 1046.50, //
    587.33, 739.99, 880.00, 1174.66, //
    523.25, 659.25, 783.99, 1046.50,
];

/// One sound of the backing track, `offset` seconds after the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSound {
    pub offset: f64,
    pub voice: Voice,
}

impl ScheduledSound {
    pub fn new(offset: f64, voice: Voice) -> Self {
        Self { offset, voice }
    }
}

/// The full precomputed backing track plus the beat grid the visual pulse
/// follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTimeline {
    pub bpm: f64,
    pub beat_seconds: f64,
    pub beats: u32,
    pub sounds: Vec<ScheduledSound>,
}

impl AudioTimeline {
    /// Builds the track for `beats` beats at `bpm`.
    pub fn build(bpm: f64, beats: u32) -> Self {
        let beat = 60.0 / bpm.max(1.0);
        let mut sounds = Vec::new();

        for i in 0..beats {
            let time = f64::from(i) * beat;

            sounds.push(ScheduledSound::new(time, Voice::Kick));
            sounds.push(ScheduledSound::new(time + beat / 2.0, Voice::HiHat));

            let bass = if i % 4 == 0 { HEAVY_BASS } else { LIGHT_BASS };
            sounds.push(ScheduledSound::new(time, bass));

            if i % 2 == 1 {
                sounds.push(ScheduledSound::new(time, Voice::Snare));
            }
        }

        // Accents and lead notes past the end of a short grid are dropped.
        let span = f64::from(beats) * beat + SPAN_EPSILON;

        for beat_offset in AIR_HORN_BEATS {
            let offset = beat_offset * beat;
            if offset <= span {
                sounds.push(ScheduledSound::new(offset, Voice::AirHorn));
            }
        }

        let eighth = beat / 2.0;
        for (i, freq_hz) in LEAD_ARPEGGIO.iter().enumerate() {
            let offset = i as f64 * eighth;
            if offset > span {
                break;
            }
            sounds.push(ScheduledSound::new(
                offset,
                Voice::Lead {
                    freq_hz: *freq_hz,
                    length: eighth as f32,
                },
            ));
        }

        sounds.sort_by(|a, b| a.offset.total_cmp(&b.offset));

        Self {
            bpm,
            beat_seconds: beat,
            beats,
            sounds,
        }
    }

    pub fn from_config(config: &PartyConfig) -> Self {
        Self::build(config.tempo.bpm, config.timeline_beats())
    }

    /// Seconds covered by the beat grid.
    pub fn span(&self) -> f64 {
        f64::from(self.beats) * self.beat_seconds
    }

    /// Offset of beat `index` from the anchor.
    pub fn beat_offset(&self, index: u32) -> f64 {
        f64::from(index) * self.beat_seconds
    }

    pub fn count(&self, kind: VoiceKind) -> usize {
        self.sounds
            .iter()
            .filter(|sound| sound.voice.kind() == kind)
            .count()
    }

    pub fn counts(&self) -> BTreeMap<VoiceKind, usize> {
        let mut counts = BTreeMap::new();
        for sound in &self.sounds {
            *counts.entry(sound.voice.kind()).or_insert(0) += 1;
        }
        counts
    }
}
