//! Real-time output through the host's default audio device using cpal.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rand::{rngs::StdRng, SeedableRng};

use super::{start_frame, stream::StreamMixer, AudioBackend, AudioOutput, MixHandle};
use crate::{synth::MIN_SAMPLE_RATE, PartyError, Result, Voice};

/// Opens one output stream on the default device per session. Each output
/// also records what it scheduled, so a live session can be saved.
#[derive(Default)]
pub struct CpalBackend {
    seed: Option<u64>,
    opened: usize,
    last_mix: Option<MixHandle>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the noise generator of every output opened from now on.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of outputs opened over the backend's lifetime.
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// Voices scheduled on the most recently opened output.
    pub fn last_mix(&self) -> Option<MixHandle> {
        self.last_mix.clone()
    }
}

impl AudioBackend for CpalBackend {
    fn open(&mut self) -> Result<Box<dyn AudioOutput>> {
        let host = cpal::default_host();
        tracing::info!(host = ?host.id(), "audio host");

        let device = host
            .default_output_device()
            .ok_or_else(|| PartyError::AudioUnavailable("no output device found".to_string()))?;
        let supported = device.default_output_config().map_err(unavailable)?;

        let sample_rate = supported.sample_rate().0;
        if sample_rate < MIN_SAMPLE_RATE {
            return Err(PartyError::AudioUnavailable(format!(
                "device runs at {sample_rate} Hz, below {MIN_SAMPLE_RATE} Hz"
            )));
        }
        let channels = usize::from(supported.channels()).max(1);

        let mixer = StreamMixer::new(sample_rate);
        let frames = mixer.frame_counter();
        let mixer = Arc::new(Mutex::new(mixer));

        let config = supported.config();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, mixer.clone(), channels)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, mixer.clone(), channels)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, mixer.clone(), channels)
            }
            other => Err(PartyError::AudioUnavailable(format!(
                "unsupported sample format {other:?}"
            ))),
        }?;
        stream.play().map_err(unavailable)?;

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.opened as u64)),
            None => StdRng::from_entropy(),
        };
        let mix = MixHandle::new(sample_rate);
        self.opened += 1;
        self.last_mix = Some(mix.clone());

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            channels,
            "audio stream started"
        );

        Ok(Box::new(CpalOutput {
            stream: Some(stream),
            mixer,
            frames,
            sample_rate,
            rng,
            mix,
        }))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<StreamMixer>>,
    channels: usize,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut mono = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0.0);
                match mixer.lock() {
                    Ok(mut mixer) => mixer.fill(&mut mono),
                    Err(_) => mono.fill(0.0),
                }

                // mono to every channel
                for (frame, value) in data.chunks_mut(channels).zip(&mono) {
                    for sample in frame.iter_mut() {
                        *sample = T::from_sample(*value);
                    }
                }
            },
            |err| tracing::error!(%err, "audio stream error"),
            None,
        )
        .map_err(unavailable)
}

fn unavailable(err: impl fmt::Display) -> PartyError {
    PartyError::AudioUnavailable(err.to_string())
}

/// Output opened by [`CpalBackend`]. Its clock is the stream's frame counter.
pub struct CpalOutput {
    stream: Option<cpal::Stream>,
    mixer: Arc<Mutex<StreamMixer>>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    rng: StdRng,
    mix: MixHandle,
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::SeqCst) as f64 / f64::from(self.sample_rate)
    }

    fn schedule(&mut self, at: f64, voice: &Voice) -> Result<()> {
        if self.stream.is_none() {
            return Err(PartyError::msg("audio output is closed"));
        }
        if !at.is_finite() {
            return Err(PartyError::InvalidInput("voice start time must be finite"));
        }

        let rendered = voice.render(self.sample_rate, &mut self.rng)?;
        let start = start_frame(at, self.sample_rate);
        self.mix.lock()?.add(start, &rendered);
        self.mixer
            .lock()
            .map_err(|_| PartyError::msg("stream mixer has been poisoned"))?
            .queue(start as u64, rendered);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!(%err, "could not pause stream before closing");
            }
            tracing::debug!("closed audio stream");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
