use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};

use crate::{MixBuffer, PartyError, Result};

/// Where and how a rendered mix is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub output_path: PathBuf,
    /// Scale applied to every sample before writing.
    pub gain: f32,
    /// Clamp samples to [-1, 1] after applying `gain`.
    pub clip: bool,
}

impl RecordingSettings {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            gain: 1.0,
            clip: true,
        }
    }
}

/// Writes mixes as mono 32-bit float WAV files.
#[derive(Debug)]
pub struct Recorder {
    settings: RecordingSettings,
}

impl Recorder {
    pub fn new(settings: RecordingSettings) -> Self {
        Self { settings }
    }

    pub fn output_path(&self) -> &Path {
        &self.settings.output_path
    }

    /// Writes `mix` and returns the number of samples written.
    pub fn write(&self, mix: &MixBuffer) -> Result<usize> {
        if mix.sample_rate == 0 {
            return Err(PartyError::InvalidInput("mix has no sample rate"));
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate: mix.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let mut writer = WavWriter::create(&self.settings.output_path, spec)?;
        for sample in &mix.samples {
            let mut value = sample * self.settings.gain;
            if self.settings.clip {
                value = value.clamp(-1.0, 1.0);
            }
            writer.write_sample(value)?;
        }
        writer.finalize()?;

        tracing::info!(
            path = %self.settings.output_path.display(),
            samples = mix.samples.len(),
            "wrote mix"
        );
        Ok(mix.samples.len())
    }
}
