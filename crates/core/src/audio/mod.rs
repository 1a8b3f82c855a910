//! Audio output boundary.
//!
//! The controller schedules the whole track on an [`AudioOutput`] opened from
//! an [`AudioBackend`]. The offline backend renders into memory; with the
//! `playback` feature, [`CpalBackend`] plays on the default device.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use rand::{rngs::StdRng, SeedableRng};

use crate::{synth::MIN_SAMPLE_RATE, Clock, PartyError, Result, Voice};

#[cfg(feature = "playback")]
mod device;
mod stream;

#[cfg(feature = "playback")]
pub use device::{CpalBackend, CpalOutput};
pub use stream::StreamMixer;

/// Factory for audio outputs. Opening may fail when the host has no device
/// or refuses playback.
pub trait AudioBackend {
    fn open(&mut self) -> Result<Box<dyn AudioOutput>>;
}

/// An open audio output context.
pub trait AudioOutput {
    /// Seconds elapsed on the output's own clock since it was opened.
    fn current_time(&self) -> f64;

    /// Hands a voice to the output to start at `at` seconds on its clock.
    /// Once scheduled, a voice cannot be retracted.
    fn schedule(&mut self, at: f64, voice: &Voice) -> Result<()>;

    /// Releases the output. Calling it twice is harmless.
    fn close(&mut self);
}

/// Frame index of a start time in seconds. Negative times start at once.
fn start_frame(at: f64, sample_rate: u32) -> usize {
    (at.max(0.0) * f64::from(sample_rate)).round() as usize
}

/// Mono mix accumulated by an [`OfflineOutput`].
#[derive(Debug, Clone, Default)]
pub struct MixBuffer {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
    pub voices: usize,
}

impl MixBuffer {
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }

    fn add(&mut self, start: usize, rendered: &[f32]) {
        let end = start + rendered.len();
        if self.samples.len() < end {
            self.samples.resize(end, 0.0);
        }
        for (slot, value) in self.samples[start..end].iter_mut().zip(rendered) {
            *slot += value;
        }
        self.voices += 1;
    }
}

/// Shared, thread-safe view over the mix an offline output renders into.
#[derive(Debug, Clone)]
pub struct MixHandle {
    shared: Arc<Mutex<MixBuffer>>,
}

impl MixHandle {
    fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(MixBuffer {
                sample_rate,
                ..Default::default()
            })),
        }
    }

    pub fn snapshot(&self) -> Result<MixBuffer> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MixBuffer>> {
        self.shared
            .lock()
            .map_err(|_| PartyError::msg("mix buffer has been poisoned"))
    }
}

/// Backend that renders every scheduled voice into an in-memory mix. Its
/// outputs read time from the shared clock, so a manual clock gives fully
/// deterministic sessions.
pub struct OfflineBackend<C> {
    clock: C,
    sample_rate: u32,
    seed: Option<u64>,
    opened: usize,
    active: Arc<AtomicUsize>,
    last_mix: Option<MixHandle>,
}

impl<C: Clock + Clone + 'static> OfflineBackend<C> {
    pub fn new(clock: C, sample_rate: u32) -> Self {
        Self {
            clock,
            sample_rate,
            seed: None,
            opened: 0,
            active: Arc::new(AtomicUsize::new(0)),
            last_mix: None,
        }
    }

    /// Seeds the noise generator of every output opened from now on.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of outputs opened over the backend's lifetime.
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// Number of outputs currently open.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Mix of the most recently opened output.
    pub fn last_mix(&self) -> Option<MixHandle> {
        self.last_mix.clone()
    }
}

impl<C: Clock + Clone + 'static> AudioBackend for OfflineBackend<C> {
    fn open(&mut self) -> Result<Box<dyn AudioOutput>> {
        if self.sample_rate < MIN_SAMPLE_RATE {
            return Err(PartyError::AudioUnavailable(format!(
                "sample rate {} Hz is below {MIN_SAMPLE_RATE} Hz",
                self.sample_rate
            )));
        }

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.opened as u64)),
            None => StdRng::from_entropy(),
        };
        let mix = MixHandle::new(self.sample_rate);

        self.opened += 1;
        self.active.fetch_add(1, Ordering::SeqCst);
        self.last_mix = Some(mix.clone());
        tracing::debug!(sample_rate = self.sample_rate, "opened offline audio output");

        Ok(Box::new(OfflineOutput {
            clock: Box::new(self.clock.clone()),
            opened_at: self.clock.now(),
            sample_rate: self.sample_rate,
            rng,
            mix,
            active: Some(self.active.clone()),
        }))
    }
}

/// Output opened by [`OfflineBackend`].
pub struct OfflineOutput {
    clock: Box<dyn Clock>,
    opened_at: Duration,
    sample_rate: u32,
    rng: StdRng,
    mix: MixHandle,
    active: Option<Arc<AtomicUsize>>,
}

impl AudioOutput for OfflineOutput {
    fn current_time(&self) -> f64 {
        self.clock.now().saturating_sub(self.opened_at).as_secs_f64()
    }

    fn schedule(&mut self, at: f64, voice: &Voice) -> Result<()> {
        if self.active.is_none() {
            return Err(PartyError::msg("audio output is closed"));
        }
        if !at.is_finite() {
            return Err(PartyError::InvalidInput("voice start time must be finite"));
        }

        let rendered = voice.render(self.sample_rate, &mut self.rng)?;
        let start = start_frame(at, self.sample_rate);
        self.mix.lock()?.add(start, &rendered);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("closed offline audio output");
        }
    }
}

impl Drop for OfflineOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Backend standing in for a host that denies audio, e.g. blocked autoplay.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AudioBackend for UnavailableBackend {
    fn open(&mut self) -> Result<Box<dyn AudioOutput>> {
        Err(PartyError::AudioUnavailable(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlaybackClock;

    #[test]
    fn output_clock_starts_at_open() {
        let clock = PlaybackClock::new();
        clock.advance(Duration::from_secs(3));
        let mut backend = OfflineBackend::new(clock.clone(), 1_000);
        let output = backend.open().unwrap();

        assert_eq!(output.current_time(), 0.0);
        clock.advance(Duration::from_millis(500));
        assert!((output.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn schedules_voices_into_the_mix() {
        let clock = PlaybackClock::new();
        let mut backend = OfflineBackend::new(clock, 1_000).with_seed(3);
        let mut output = backend.open().unwrap();

        output.schedule(1.0, &Voice::Kick).unwrap();
        let mix = backend.last_mix().unwrap().snapshot().unwrap();
        assert_eq!(mix.voices, 1);
        assert_eq!(mix.samples.len(), 1_400);
        assert!(mix.samples[..1_000].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn tracks_open_outputs() {
        let mut backend = OfflineBackend::new(PlaybackClock::new(), 1_000);
        let mut first = backend.open().unwrap();
        let second = backend.open().unwrap();
        assert_eq!(backend.active(), 2);

        first.close();
        first.close();
        assert_eq!(backend.active(), 1);
        drop(second);
        assert_eq!(backend.active(), 0);
        assert_eq!(backend.opened(), 2);
    }

    #[test]
    fn closed_output_refuses_voices() {
        let mut backend = OfflineBackend::new(PlaybackClock::new(), 1_000);
        let mut output = backend.open().unwrap();
        output.close();
        assert!(output.schedule(0.0, &Voice::Snare).is_err());
    }

    #[test]
    fn low_sample_rate_is_refused_at_open() {
        let mut backend = OfflineBackend::new(PlaybackClock::new(), 16);
        assert!(matches!(backend.open(), Err(PartyError::AudioUnavailable(_))));
        assert_eq!(backend.active(), 0);
    }

    #[test]
    fn unavailable_backend_reports_reason() {
        let mut backend = UnavailableBackend::new("autoplay blocked");
        let err = backend.open().err().expect("open must fail");
        assert!(format!("{err}").contains("autoplay blocked"));
    }
}
