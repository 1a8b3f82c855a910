//! Sample-clocked mixer for real-time output streams.
//!
//! The stream callback pulls frames through [`StreamMixer::fill`], which
//! advances a shared frame counter. That counter is the output's clock: an
//! output reads it without taking the mixer lock, so beat tracking follows
//! what has actually been handed to the device.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

struct QueuedVoice {
    start: u64,
    samples: Vec<f32>,
}

impl QueuedVoice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Mixes queued voices into mono frames on demand.
pub struct StreamMixer {
    sample_rate: u32,
    frames: Arc<AtomicU64>,
    voices: Vec<QueuedVoice>,
}

impl StreamMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: Arc::new(AtomicU64::new(0)),
            voices: Vec::new(),
        }
    }

    /// Counter of frames handed to the device so far.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        self.frames.clone()
    }

    pub fn frames_played(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Seconds of audio consumed by the stream.
    pub fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames_played() as f64 / f64::from(self.sample_rate)
    }

    /// Queues rendered samples to start at frame `start`. A start that has
    /// already passed plays the remainder from the current frame.
    pub fn queue(&mut self, start: u64, samples: Vec<f32>) {
        let voice = QueuedVoice { start, samples };
        if voice.end() > self.frames_played() {
            self.voices.push(voice);
        }
    }

    /// Voices that have not finished playing.
    pub fn pending(&self) -> usize {
        self.voices.len()
    }

    /// Writes the next `out.len()` frames and advances the counter.
    pub fn fill(&mut self, out: &mut [f32]) {
        let first = self.frames_played();

        for (offset, slot) in out.iter_mut().enumerate() {
            let frame = first + offset as u64;
            let mixed: f32 = self
                .voices
                .iter()
                .filter(|voice| frame >= voice.start)
                .filter_map(|voice| voice.samples.get((frame - voice.start) as usize))
                .sum();
            // soft clip
            *slot = mixed.tanh();
        }

        let end = first + out.len() as u64;
        self.frames.store(end, Ordering::SeqCst);
        self.voices.retain(|voice| voice.end() > end);
    }
}
