//! Voice synthesis for the party track.
//!
//! Every voice is a short, self-contained sound rendered from oscillators or
//! noise shaped by [`Automation`] curves. Curves follow the audio-param model:
//! a value is held until the next breakpoint, which either jumps, ramps
//! linearly, or ramps exponentially towards its target.

use std::f32::consts::{FRAC_1_SQRT_2, TAU};

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{PartyError, Result};

/// Lowest sample rate voices render at. Below it the bass filter has no
/// usable band under Nyquist.
pub const MIN_SAMPLE_RATE: u32 = 1_000;

/// Samples between bass filter coefficient updates.
const FILTER_UPDATE_INTERVAL: usize = 32;
const BASS_FILTER_FLOOR_HZ: f32 = 50.0;

/// The six instruments of the party track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceKind {
    Kick,
    Snare,
    HiHat,
    Bass,
    AirHorn,
    Lead,
}

/// One synthesised sound and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Voice {
    /// Sine thump with a steep downward pitch sweep.
    Kick,
    /// Burst of white noise.
    Snare,
    /// Short square-wave chirp sweeping upwards.
    HiHat,
    /// Low-passed sawtooth an octave below `cutoff_hz`, the filter closing
    /// over `sustain` seconds.
    Bass { cutoff_hz: f32, sustain: f32 },
    /// Two detuned sawtooths with a pitch drop.
    AirHorn,
    /// Square-wave melody note lasting `length` seconds.
    Lead { freq_hz: f32, length: f32 },
}

impl Voice {
    pub fn kind(&self) -> VoiceKind {
        match self {
            Voice::Kick => VoiceKind::Kick,
            Voice::Snare => VoiceKind::Snare,
            Voice::HiHat => VoiceKind::HiHat,
            Voice::Bass { .. } => VoiceKind::Bass,
            Voice::AirHorn => VoiceKind::AirHorn,
            Voice::Lead { .. } => VoiceKind::Lead,
        }
    }

    /// Seconds between the start and stop of the voice.
    pub fn duration(&self) -> f32 {
        match *self {
            Voice::Kick => 0.4,
            Voice::Snare => 0.1,
            Voice::HiHat => 0.05,
            Voice::Bass { sustain, .. } => sustain.max(0.0) + 0.1,
            Voice::AirHorn => 0.5,
            Voice::Lead { length, .. } => length.max(0.0),
        }
    }

    /// Renders the voice as mono samples starting at its onset.
    pub fn render<R: Rng>(&self, sample_rate: u32, rng: &mut R) -> Result<Vec<f32>> {
        if sample_rate < MIN_SAMPLE_RATE {
            return Err(PartyError::InvalidInput("sample rate must be at least 1 kHz"));
        }

        let len = (self.duration() * sample_rate as f32).ceil() as usize;
        let sr = sample_rate as f32;

        let samples = match *self {
            Voice::Kick => {
                let freq = Automation::new(200.0).exponential_ramp_to(0.01, 0.4);
                let gain = Automation::new(1.5).exponential_ramp_to(0.01, 0.4);
                Oscillator::new(Waveform::Sine).render(len, sr, &freq, &gain)
            }
            Voice::Snare => {
                let gain = Automation::new(0.5).exponential_ramp_to(0.01, 0.1);
                (0..len)
                    .map(|i| rng.gen_range(-1.0_f32..1.0) * gain.value_at(i as f32 / sr))
                    .collect()
            }
            Voice::HiHat => {
                let freq = Automation::new(1_000.0).linear_ramp_to(4_000.0, 0.05);
                let gain = Automation::new(0.2).exponential_ramp_to(0.01, 0.05);
                Oscillator::new(Waveform::Square).render(len, sr, &freq, &gain)
            }
            Voice::Bass { cutoff_hz, sustain } => render_bass(len, sr, cutoff_hz, sustain)?,
            Voice::AirHorn => {
                let gain = Automation::new(0.4)
                    .linear_ramp_to(0.4, 0.1)
                    .linear_ramp_to(0.0, 0.4);
                let unity = Automation::new(1.0);
                let low = Automation::new(400.0)
                    .linear_ramp_to(400.0, 0.1)
                    .linear_ramp_to(300.0, 0.3);
                let high = Automation::new(405.0)
                    .linear_ramp_to(405.0, 0.1)
                    .linear_ramp_to(305.0, 0.3);
                let first = Oscillator::new(Waveform::Sawtooth).render(len, sr, &low, &unity);
                let second = Oscillator::new(Waveform::Sawtooth).render(len, sr, &high, &unity);
                first
                    .iter()
                    .zip(&second)
                    .enumerate()
                    .map(|(i, (a, b))| (a + b) * gain.value_at(i as f32 / sr))
                    .collect()
            }
            Voice::Lead { freq_hz, .. } => {
                let freq = Automation::new(freq_hz);
                let gain = Automation::new(0.1).linear_ramp_to(0.0, 0.1);
                Oscillator::new(Waveform::Square).render(len, sr, &freq, &gain)
            }
        };

        Ok(samples)
    }
}

fn render_bass(len: usize, sr: f32, cutoff_hz: f32, sustain: f32) -> Result<Vec<f32>> {
    let sustain = sustain.max(f32::EPSILON);
    let freq = Automation::new(cutoff_hz / 2.0);
    let gain = Automation::new(0.6).linear_ramp_to(0.0, sustain);
    let cutoff = Automation::new(cutoff_hz).linear_ramp_to(BASS_FILTER_FLOOR_HZ, sustain);

    let raw = Oscillator::new(Waveform::Sawtooth).render(len, sr, &freq, &Automation::new(1.0));
    let mut filter = DirectForm2Transposed::<f32>::new(lowpass(sr, cutoff.value_at(0.0))?);

    let mut out = Vec::with_capacity(len);
    for (i, sample) in raw.into_iter().enumerate() {
        let t = i as f32 / sr;
        if i > 0 && i % FILTER_UPDATE_INTERVAL == 0 {
            filter.update_coefficients(lowpass(sr, cutoff.value_at(t))?);
        }
        out.push(filter.run(sample) * gain.value_at(t));
    }
    Ok(out)
}

fn lowpass(sr: f32, cutoff_hz: f32) -> Result<Coefficients<f32>> {
    let nyquist = sr * 0.5;
    let cutoff = cutoff_hz.clamp(10.0, nyquist * 0.99);
    Coefficients::<f32>::from_params(Type::LowPass, sr.hz(), cutoff.hz(), FRAC_1_SQRT_2)
        .map_err(|err| PartyError::msg(format!("bass filter rejected {cutoff} Hz: {err:?}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
}

impl Waveform {
    /// Value of the waveform at `phase` in `[0, 1)`.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (TAU * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
        }
    }
}

/// Phase-accumulating oscillator.
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Self { waveform, phase: 0.0 }
    }

    /// Renders `len` samples with frequency and gain following the given
    /// curves.
    pub fn render(&mut self, len: usize, sr: f32, freq: &Automation, gain: &Automation) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sr;
                let value = self.waveform.sample(self.phase) * gain.value_at(t);
                self.phase = (self.phase + freq.value_at(t) / sr).rem_euclid(1.0);
                value
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ramp {
    Set,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Breakpoint {
    time: f32,
    value: f32,
    ramp: Ramp,
}

/// Piecewise parameter curve over voice-relative time in seconds.
///
/// Breakpoints must be added in non-decreasing time order.
#[derive(Debug, Clone, PartialEq)]
pub struct Automation {
    initial: f32,
    points: Vec<Breakpoint>,
}

impl Automation {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            points: Vec::new(),
        }
    }

    pub fn set_value_at(self, value: f32, time: f32) -> Self {
        self.push(value, time, Ramp::Set)
    }

    pub fn linear_ramp_to(self, value: f32, time: f32) -> Self {
        self.push(value, time, Ramp::Linear)
    }

    /// Exponential ramps need both endpoints non-zero and of equal sign;
    /// otherwise the previous value is held until `time`.
    pub fn exponential_ramp_to(self, value: f32, time: f32) -> Self {
        self.push(value, time, Ramp::Exponential)
    }

    pub fn value_at(&self, t: f32) -> f32 {
        let mut prev_time = 0.0;
        let mut prev_value = self.initial;

        for point in &self.points {
            if t < point.time {
                let span = point.time - prev_time;
                if span <= 0.0 {
                    return prev_value;
                }
                let progress = ((t - prev_time) / span).clamp(0.0, 1.0);
                return match point.ramp {
                    Ramp::Set => prev_value,
                    Ramp::Linear => prev_value + (point.value - prev_value) * progress,
                    Ramp::Exponential if prev_value * point.value > 0.0 => {
                        prev_value * (point.value / prev_value).powf(progress)
                    }
                    Ramp::Exponential => prev_value,
                };
            }
            prev_time = point.time;
            prev_value = point.value;
        }

        prev_value
    }

    fn push(mut self, value: f32, time: f32, ramp: Ramp) -> Self {
        let floor = self.points.last().map(|p| p.time).unwrap_or(0.0);
        self.points.push(Breakpoint {
            time: time.max(floor),
            value,
            ramp,
        });
        self
    }
}
