//! Kick alignment check for rendered mixes.
//!
//! The kick and the bass carry almost all of the track's energy below a few
//! hundred hertz, while hi-hats, horns and the lead sit above it. A rise in
//! that low band therefore marks a beat. [`KickDetector`] finds those rises
//! with a short-time FFT, and [`check_kicks`] pairs them with the kick offsets
//! of an [`AudioTimeline`] to show whether the mix actually lands on the grid
//! the visual pulse follows.

use std::f32::consts::TAU;

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::{AudioTimeline, MixBuffer, PartyError, Result, VoiceKind};

/// Upper edge of the band the kick and bass live in.
const KICK_BAND_HZ: f32 = 250.0;
/// Fraction of the strongest rise a frame needs to count as an onset.
const FLUX_SENSITIVITY: f32 = 0.2;
/// Two onsets closer than this are one hit.
const MIN_ONSET_GAP: f64 = 0.1;

/// Low-band onset detector over mono samples.
#[derive(Debug, Clone)]
pub struct KickDetector {
    sample_rate: u32,
    window: usize,
    hop: usize,
}

impl KickDetector {
    /// Detector whose FFT window covers roughly `window_ms`, rounded up to a
    /// power of two. Frames advance by a quarter window.
    pub fn new(sample_rate: u32, window_ms: f32) -> Self {
        let target = (sample_rate as f32 * window_ms.max(1.0) / 1000.0).ceil() as usize;
        let window = target.max(4).next_power_of_two();
        Self {
            sample_rate,
            window,
            hop: window / 4,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Seconds between frame centres.
    pub fn frame_seconds(&self) -> f64 {
        self.hop as f64 / f64::from(self.sample_rate)
    }

    /// Positive change of low-band energy per frame. Frame `k` is centred
    /// on sample `k * hop`; samples outside the buffer count as silence.
    pub fn low_band_flux(&self, samples: &[f32]) -> Result<Vec<f32>> {
        if self.sample_rate == 0 {
            return Err(PartyError::InvalidInput("sample rate must be non-zero"));
        }

        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(self.window);
        let mut input = plan.make_input_vec();
        let mut spectrum = plan.make_output_vec();
        let mut scratch = plan.make_scratch_vec();

        let window: Vec<f32> = (0..self.window)
            .map(|n| 0.5 - 0.5 * (TAU * n as f32 / self.window as f32).cos())
            .collect();
        let bin_hz = self.sample_rate as f32 / self.window as f32;
        let top_bin = ((KICK_BAND_HZ / bin_hz).floor() as usize).clamp(1, spectrum.len() - 1);

        let half = self.window / 2;
        let frames = samples.len().div_ceil(self.hop);
        let mut flux = Vec::with_capacity(frames);
        let mut previous = 0.0_f32;

        for frame in 0..frames {
            let centre = frame * self.hop;
            for (n, slot) in input.iter_mut().enumerate() {
                *slot = (centre + n)
                    .checked_sub(half)
                    .and_then(|index| samples.get(index))
                    .map_or(0.0, |sample| sample * window[n]);
            }
            plan.process_with_scratch(&mut input, &mut spectrum, &mut scratch)?;

            let energy: f32 = spectrum[1..=top_bin].iter().map(|bin| bin.norm_sqr()).sum();
            flux.push((energy - previous).max(0.0));
            previous = energy;
        }

        Ok(flux)
    }

    /// Onset times in seconds, in order.
    pub fn detect(&self, samples: &[f32]) -> Result<Vec<f64>> {
        let flux = self.low_band_flux(samples)?;
        let strongest = flux.iter().copied().fold(0.0_f32, f32::max);
        if strongest <= f32::EPSILON {
            return Ok(Vec::new());
        }
        let threshold = strongest * FLUX_SENSITIVITY;

        let mut onsets: Vec<f64> = Vec::new();
        for (frame, value) in flux.iter().enumerate() {
            let before = frame.checked_sub(1).map_or(0.0, |i| flux[i]);
            let after = flux.get(frame + 1).copied().unwrap_or(0.0);
            if *value < threshold || *value < before || *value <= after {
                continue;
            }

            let time = frame as f64 * self.frame_seconds();
            if onsets.last().map_or(true, |last| time - last >= MIN_ONSET_GAP) {
                onsets.push(time);
            }
        }
        Ok(onsets)
    }
}

/// How well the detected onsets of a mix line up with the kick grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KickReport {
    /// Kicks of the timeline that start inside the mix.
    pub expected: usize,
    pub matched: usize,
    pub onsets: usize,
    /// Onsets with no kick within tolerance.
    pub extra: usize,
    pub tolerance_ms: f64,
    pub mean_error_ms: f64,
    pub max_error_ms: f64,
    /// Tempo from the median gap between matched onsets.
    pub tempo_bpm: Option<f64>,
}

impl KickReport {
    /// Every expected kick was heard.
    pub fn is_aligned(&self) -> bool {
        self.matched == self.expected
    }
}

/// Compares the kicks of `timeline` with the onsets found in `mix`, assuming
/// the track was anchored at the start of the mix.
pub fn check_kicks(
    mix: &MixBuffer,
    timeline: &AudioTimeline,
    window_ms: f32,
) -> Result<KickReport> {
    let detector = KickDetector::new(mix.sample_rate, window_ms);
    let onsets = detector.detect(&mix.samples)?;
    let tolerance = detector.window() as f64 / f64::from(mix.sample_rate);
    let duration = f64::from(mix.duration_seconds());

    let kicks: Vec<f64> = timeline
        .sounds
        .iter()
        .filter(|sound| sound.voice.kind() == VoiceKind::Kick && sound.offset < duration)
        .map(|sound| sound.offset)
        .collect();

    let mut used = vec![false; onsets.len()];
    let mut hits = Vec::new();
    for kick in &kicks {
        let nearest = onsets
            .iter()
            .enumerate()
            .filter(|(index, _)| !used[*index])
            .map(|(index, onset)| (index, *onset, (onset - kick).abs()))
            .min_by(|a, b| a.2.total_cmp(&b.2));

        if let Some((index, onset, error)) = nearest {
            if error <= tolerance {
                used[index] = true;
                hits.push((onset, error));
            }
        }
    }

    let matched = hits.len();
    let (mean_error, max_error) = if matched == 0 {
        (0.0, 0.0)
    } else {
        let total: f64 = hits.iter().map(|(_, error)| error).sum();
        let max = hits.iter().map(|(_, error)| *error).fold(0.0, f64::max);
        (total / matched as f64, max)
    };

    let report = KickReport {
        expected: kicks.len(),
        matched,
        onsets: onsets.len(),
        extra: onsets.len() - matched,
        tolerance_ms: tolerance * 1000.0,
        mean_error_ms: mean_error * 1000.0,
        max_error_ms: max_error * 1000.0,
        tempo_bpm: median_tempo(hits.iter().map(|(onset, _)| *onset)),
    };

    if report.is_aligned() {
        tracing::debug!(?report, "kicks aligned with the beat grid");
    } else {
        tracing::warn!(
            expected = report.expected,
            matched = report.matched,
            "mix drifts from the beat grid"
        );
    }
    Ok(report)
}

fn median_tempo(onsets: impl Iterator<Item = f64>) -> Option<f64> {
    let mut onsets: Vec<f64> = onsets.collect();
    onsets.sort_by(f64::total_cmp);
    let mut gaps: Vec<f64> = onsets.windows(2).map(|pair| pair[1] - pair[0]).collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_by(f64::total_cmp);
    let median = gaps[gaps.len() / 2];
    (median > 0.0).then(|| 60.0 / median)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::Voice;

    fn mix_of(sample_rate: u32, seconds: f64, hits: &[(f64, Voice)]) -> MixBuffer {
        let mut rng = StdRng::seed_from_u64(5);
        let mut samples = vec![0.0; (seconds * f64::from(sample_rate)) as usize];
        for (at, voice) in hits {
            let start = (at * f64::from(sample_rate)).round() as usize;
            for (slot, value) in samples[start..]
                .iter_mut()
                .zip(voice.render(sample_rate, &mut rng).unwrap())
            {
                *slot += value;
            }
        }
        MixBuffer {
            sample_rate,
            samples,
            voices: hits.len(),
        }
    }

    #[test]
    fn window_rounds_up_to_a_power_of_two() {
        let detector = KickDetector::new(8_000, 32.0);
        assert_eq!(detector.window(), 256);
        assert_eq!(detector.hop(), 64);
        assert_eq!(KickDetector::new(48_000, 32.0).window(), 2_048);
    }

    #[test]
    fn silence_has_no_onsets() {
        let detector = KickDetector::new(8_000, 32.0);
        assert!(detector.detect(&[0.0; 4_000]).unwrap().is_empty());
    }

    #[test]
    fn finds_isolated_kicks() {
        let mix = mix_of(8_000, 2.0, &[(0.25, Voice::Kick), (1.25, Voice::Kick)]);
        let detector = KickDetector::new(8_000, 32.0);
        let onsets = detector.detect(&mix.samples).unwrap();

        assert_eq!(onsets.len(), 2);
        assert!((onsets[0] - 0.25).abs() <= 0.032);
        assert!((onsets[1] - 1.25).abs() <= 0.032);
    }

    #[test]
    fn hi_hats_do_not_read_as_kicks() {
        let mix = mix_of(
            8_000,
            2.0,
            &[(0.2, Voice::Kick), (0.6, Voice::HiHat), (1.0, Voice::HiHat)],
        );
        let onsets = KickDetector::new(8_000, 32.0).detect(&mix.samples).unwrap();
        assert_eq!(onsets.len(), 1);
    }

    #[test]
    fn kicks_on_the_grid_are_aligned() {
        let timeline = AudioTimeline::build(140.0, 8);
        let hits: Vec<_> = (0..8)
            .map(|beat| (timeline.beat_offset(beat), Voice::Kick))
            .collect();
        let mix = mix_of(8_000, timeline.span() + 0.5, &hits);

        let report = check_kicks(&mix, &timeline, 32.0).unwrap();
        assert_eq!(report.expected, 8);
        assert!(report.is_aligned(), "{report:?}");
        assert_eq!(report.extra, 0);
        let tempo = report.tempo_bpm.expect("tempo from matched kicks");
        assert!((tempo - 140.0).abs() < 5.0);
    }

    #[test]
    fn shifted_kicks_are_reported_missing() {
        let timeline = AudioTimeline::build(140.0, 4);
        // A quarter beat late is well past the window.
        let late = timeline.beat_seconds / 4.0;
        let hits: Vec<_> = (0..4)
            .map(|beat| (timeline.beat_offset(beat) + late, Voice::Kick))
            .collect();
        let mix = mix_of(8_000, timeline.span() + 0.5, &hits);

        let report = check_kicks(&mix, &timeline, 32.0).unwrap();
        assert_eq!(report.expected, 4);
        assert_eq!(report.matched, 0);
        assert!(!report.is_aligned());
        assert_eq!(report.extra, report.onsets);
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let detector = KickDetector::new(0, 32.0);
        assert!(detector.low_band_flux(&[0.0; 16]).is_err());
    }
}
