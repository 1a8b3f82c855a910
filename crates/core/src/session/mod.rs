//! Party session lifecycle.
//!
//! [`PartyController`] owns every resource a session needs: the particle
//! loop timer, the auto-stop timer, the pump release timer and the audio
//! output. Only one session exists at a time; starting a new one tears the
//! previous one down first. All work happens inside [`PartyController::tick`],
//! which the host calls from its loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    pulse::{self, BeatTracker},
    AudioBackend, AudioOutput, AudioTimeline, Clock, Fired, ParticleEmitter, ParticleId,
    PartyConfig, PresentationMode, RenderSurface, TimerId, TimerQueue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerTask {
    SpawnParticle,
    RemoveParticle(ParticleId),
    ReleasePump,
    AutoStop,
}

struct ActiveAudio {
    output: Box<dyn AudioOutput>,
    /// Output time the track was scheduled against.
    anchor: f64,
}

struct PartySession {
    number: u64,
    started_at: Duration,
    /// Auto-stop deadline; no beat past it is pulsed.
    ends_at: Duration,
    particle_loop: TimerId,
    auto_stop: TimerId,
    pump_release: Option<TimerId>,
    audio: Option<ActiveAudio>,
    beats: BeatTracker,
}

/// Running totals across every session a controller has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub sessions_started: u64,
    pub sessions_stopped: u64,
    pub particles_spawned: usize,
    pub beats: u32,
    pub voices_scheduled: usize,
    pub audio_failures: usize,
}

/// Drives the party effect against a render surface and an audio backend.
pub struct PartyController<S, B, C> {
    config: PartyConfig,
    timeline: AudioTimeline,
    surface: S,
    backend: B,
    clock: C,
    emitter: ParticleEmitter,
    timers: TimerQueue<TimerTask>,
    session: Option<PartySession>,
    stats: ControllerStats,
}

impl<S, B, C> PartyController<S, B, C>
where
    S: RenderSurface,
    B: AudioBackend,
    C: Clock,
{
    /// Controller with an entropy-seeded particle emitter.
    pub fn new(config: PartyConfig, surface: S, backend: B, clock: C) -> Self {
        let emitter = ParticleEmitter::new(config.particles.clone());
        Self::with_emitter(config, surface, backend, clock, emitter)
    }

    /// Controller whose particles come from a fixed random stream.
    pub fn with_seed(config: PartyConfig, surface: S, backend: B, clock: C, seed: u64) -> Self {
        let emitter = ParticleEmitter::with_seed(config.particles.clone(), seed);
        Self::with_emitter(config, surface, backend, clock, emitter)
    }

    fn with_emitter(
        config: PartyConfig,
        surface: S,
        backend: B,
        clock: C,
        emitter: ParticleEmitter,
    ) -> Self {
        let timeline = AudioTimeline::from_config(&config);
        if timeline.span() > config.session.duration().as_secs_f64() {
            tracing::info!(
                track_seconds = timeline.span(),
                session_seconds = config.session.duration().as_secs_f64(),
                "audio timeline outlasts the session; its tail plays after stop"
            );
        }

        Self {
            config,
            timeline,
            surface,
            backend,
            clock,
            emitter,
            timers: TimerQueue::new(),
            session: None,
            stats: ControllerStats::default(),
        }
    }

    /// Starts a session. An active session is stopped first, so there is
    /// never more than one particle loop or audio output.
    pub fn start(&mut self) {
        if self.session.is_some() {
            tracing::info!("party already running, restarting");
            self.stop();
        }

        let now = self.clock.now();
        self.surface.ensure_fixtures();
        self.surface.set_mode(PresentationMode::Party, true);

        let interval = self.config.session.particle_interval();
        let particle_loop =
            self.timers
                .schedule_repeating(now + interval, interval, TimerTask::SpawnParticle);
        let ends_at = now + self.config.session.duration();
        let auto_stop = self.timers.schedule_once(ends_at, TimerTask::AutoStop);

        let audio = self.open_audio();
        self.stats.sessions_started += 1;
        let number = self.stats.sessions_started;

        tracing::info!(
            session = number,
            bpm = self.timeline.bpm,
            beats = self.timeline.beats,
            audio = audio.is_some(),
            "party started"
        );

        self.session = Some(PartySession {
            number,
            started_at: now,
            ends_at,
            particle_loop,
            auto_stop,
            pump_release: None,
            audio,
            beats: BeatTracker::new(self.timeline.beat_seconds, self.timeline.beats),
        });

        self.emit_due_beats(now);
    }

    /// Stops the active session, if any. Particle removal timers are left
    /// running; their elements are already gone from the layer.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        self.surface.set_mode(PresentationMode::Party, false);
        self.surface.set_mode(PresentationMode::Shake, false);
        self.surface.set_pump(false);

        self.timers.cancel(session.particle_loop);
        self.timers.cancel(session.auto_stop);
        if let Some(id) = session.pump_release {
            self.timers.cancel(id);
        }

        if let Some(mut audio) = session.audio {
            audio.output.close();
        }

        self.surface.clear_particles();
        self.stats.sessions_stopped += 1;

        tracing::info!(
            session = session.number,
            beats = session.beats.emitted(),
            "party stopped"
        );
    }

    /// Runs everything that came due up to the clock's current time.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.emit_due_beats(now);
        while let Some(fired) = self.timers.pop_due(now) {
            self.dispatch(fired);
        }
    }

    /// Whether a session is running.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the running session holds an audio output.
    pub fn has_audio(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.audio.is_some())
            .unwrap_or(false)
    }

    /// Configuration the controller was built with.
    pub fn config(&self) -> &PartyConfig {
        &self.config
    }

    /// Track scheduled on every session's audio output.
    pub fn timeline(&self) -> &AudioTimeline {
        &self.timeline
    }

    /// Render surface the effect draws on.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Audio backend outputs are opened from.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Clock timers and beats are measured against.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Totals across every session so far.
    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Number of particle loops currently armed.
    pub fn particle_loops(&self) -> usize {
        self.timers
            .count_matching(|task| *task == TimerTask::SpawnParticle)
    }

    /// Particles still waiting for their removal timer.
    pub fn pending_removals(&self) -> usize {
        self.timers
            .count_matching(|task| matches!(task, TimerTask::RemoveParticle(_)))
    }

    /// Whether any timer is still armed, including removals that outlive the
    /// session.
    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    /// Earliest armed timer deadline, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    fn open_audio(&mut self) -> Option<ActiveAudio> {
        let mut output = match self.backend.open() {
            Ok(output) => output,
            Err(err) => {
                self.stats.audio_failures += 1;
                tracing::warn!(%err, "audio unavailable, continuing with visuals only");
                return None;
            }
        };

        let anchor = output.current_time();
        for sound in &self.timeline.sounds {
            if let Err(err) = output.schedule(anchor + sound.offset, &sound.voice) {
                self.stats.audio_failures += 1;
                tracing::warn!(%err, voice = ?sound.voice.kind(), "failed to schedule voice");
                output.close();
                return None;
            }
            self.stats.voices_scheduled += 1;
        }

        Some(ActiveAudio { output, anchor })
    }

    fn emit_due_beats(&mut self, now: Duration) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // The audio clock is authoritative when there is one.
        let elapsed = match &session.audio {
            Some(audio) => audio.output.current_time() - audio.anchor,
            None => now.saturating_sub(session.started_at).as_secs_f64(),
        };
        // A coarse tick can jump past the auto-stop deadline.
        let limit = session.ends_at.saturating_sub(session.started_at).as_secs_f64();
        let elapsed = elapsed.min(limit);

        let due = session.beats.due(elapsed);
        if due.is_empty() {
            return;
        }

        for beat in due {
            tracing::trace!(session = session.number, beat, "beat");
            pulse::trigger(&mut self.surface);
            self.stats.beats += 1;
        }

        if let Some(id) = session.pump_release.take() {
            self.timers.cancel(id);
        }
        session.pump_release = Some(
            self.timers
                .schedule_once(now + self.config.session.pump(), TimerTask::ReleasePump),
        );
    }

    fn dispatch(&mut self, fired: Fired<TimerTask>) {
        match fired.task {
            TimerTask::SpawnParticle => {
                if self.session.is_none() {
                    return;
                }
                let particle = self.emitter.spawn(fired.deadline);
                self.stats.particles_spawned += 1;
                if self.surface.append_particle(&particle) {
                    self.timers.schedule_once(
                        particle.expires_at(),
                        TimerTask::RemoveParticle(particle.id),
                    );
                }
            }
            TimerTask::RemoveParticle(id) => self.surface.remove_particle(id),
            TimerTask::ReleasePump => {
                if let Some(session) = self.session.as_mut() {
                    session.pump_release = None;
                }
                self.surface.set_pump(false);
            }
            TimerTask::AutoStop => {
                tracing::debug!("party duration elapsed");
                self.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemorySurface, OfflineBackend, PlaybackClock, UnavailableBackend};

    type OfflineController = PartyController<MemorySurface, OfflineBackend<PlaybackClock>, PlaybackClock>;

    fn controller() -> (OfflineController, PlaybackClock) {
        let clock = PlaybackClock::new();
        let backend = OfflineBackend::new(clock.clone(), 8_000).with_seed(1);
        let controller = PartyController::with_seed(
            PartyConfig::default(),
            MemorySurface::new(),
            backend,
            clock.clone(),
            7,
        );
        (controller, clock)
    }

    fn run_for(controller: &mut OfflineController, clock: &PlaybackClock, total: Duration) {
        let step = Duration::from_millis(5);
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            clock.advance(step);
            elapsed += step;
            controller.tick();
        }
    }

    #[test]
    fn start_enables_party_mode_and_audio() {
        let (mut controller, _clock) = controller();
        controller.start();

        assert!(controller.is_active());
        assert!(controller.has_audio());
        assert!(controller.surface().is_mode_enabled(PresentationMode::Party));
        assert_eq!(controller.backend().active(), 1);
        assert_eq!(controller.particle_loops(), 1);
        assert_eq!(controller.stats().beats, 1, "beat zero fires on start");
    }

    #[test]
    fn double_start_keeps_one_loop_and_one_output() {
        let (mut controller, clock) = controller();
        controller.start();
        run_for(&mut controller, &clock, Duration::from_millis(200));
        controller.start();

        assert_eq!(controller.particle_loops(), 1);
        assert_eq!(controller.backend().active(), 1);
        assert_eq!(controller.backend().opened(), 2);
        assert_eq!(controller.stats().sessions_stopped, 1);
    }

    #[test]
    fn stop_without_session_is_a_no_op() {
        let (mut controller, _clock) = controller();
        controller.stop();
        controller.stop();

        assert!(!controller.is_active());
        assert!(!controller.has_pending_timers());
        assert_eq!(controller.stats().sessions_stopped, 0);
        assert_eq!(controller.backend().opened(), 0);
    }

    #[test]
    fn stop_halts_particles_and_clears_layer() {
        let (mut controller, clock) = controller();
        controller.start();
        run_for(&mut controller, &clock, Duration::from_millis(500));
        assert!(controller.surface().particle_count() > 0);

        controller.stop();
        assert_eq!(controller.surface().particle_count(), 0);
        assert_eq!(controller.particle_loops(), 0);
        assert_eq!(controller.backend().active(), 0);
        assert!(!controller.surface().is_mode_enabled(PresentationMode::Party));
        assert!(!controller.surface().is_mode_enabled(PresentationMode::Shake));

        let spawned = controller.stats().particles_spawned;
        run_for(&mut controller, &clock, Duration::from_millis(500));
        assert_eq!(controller.stats().particles_spawned, spawned);
        assert_eq!(controller.surface().particle_count(), 0);
    }

    #[test]
    fn particles_are_removed_after_their_lifetime() {
        let (mut controller, clock) = controller();
        controller.start();

        // First particle is born one interval in.
        clock.advance(Duration::from_millis(30));
        controller.tick();
        let first = controller
            .surface()
            .particles()
            .next()
            .cloned()
            .expect("one particle");
        assert_eq!(first.born_at, Duration::from_millis(30));

        clock.set(first.expires_at() - Duration::from_millis(1));
        controller.tick();
        assert!(controller.surface().contains(first.id));

        clock.set(first.expires_at());
        controller.tick();
        assert!(!controller.surface().contains(first.id));
    }

    #[test]
    fn removal_timers_survive_restart() {
        let (mut controller, clock) = controller();
        controller.start();
        run_for(&mut controller, &clock, Duration::from_millis(300));
        let pending = controller.pending_removals();
        assert!(pending > 0);

        controller.stop();
        assert_eq!(controller.pending_removals(), pending);
        controller.start();

        // Particles from the first session were born at 30..=300 ms.
        clock.set(Duration::from_millis(2_029));
        controller.tick();
        let current = controller.surface().particle_count();
        assert!(current > 0);
        assert_eq!(controller.pending_removals(), pending + current);

        clock.set(Duration::from_millis(2_300));
        controller.tick();
        assert_eq!(
            controller.pending_removals(),
            controller.surface().particle_count()
        );
    }

    #[test]
    fn session_stops_itself_after_duration() {
        let (mut controller, clock) = controller();
        controller.start();
        run_for(&mut controller, &clock, Duration::from_millis(7_990));
        assert!(controller.is_active());

        run_for(&mut controller, &clock, Duration::from_millis(20));
        assert!(!controller.is_active());
        assert_eq!(controller.backend().active(), 0);
        assert_eq!(controller.surface().particle_count(), 0);
    }

    #[test]
    fn beats_follow_the_tempo() {
        let (mut controller, clock) = controller();
        controller.start();
        // 8 s at 140 BPM reaches beat 18 (offset 7.71 s).
        run_for(&mut controller, &clock, Duration::from_millis(8_000));
        assert_eq!(controller.stats().beats, 19);
        assert_eq!(controller.surface().stats().restarts, 19);
    }

    #[test]
    fn coarse_tick_past_the_deadline_pulses_no_late_beat() {
        let (mut controller, clock) = controller();
        controller.start();

        clock.set(Duration::from_millis(7_900));
        controller.tick();
        assert_eq!(controller.stats().beats, 19);

        // Beat 19 would land at 8.14 s, after the session ends.
        clock.set(Duration::from_millis(8_500));
        controller.tick();
        assert!(!controller.is_active());
        assert_eq!(controller.stats().beats, 19);
        assert_eq!(controller.surface().stats().restarts, 19);
        assert!(!controller.surface().is_pumped());
    }

    #[test]
    fn pump_clears_after_its_delay() {
        let (mut controller, clock) = controller();
        controller.start();
        assert!(controller.surface().is_pumped());

        clock.advance(Duration::from_millis(99));
        controller.tick();
        assert!(controller.surface().is_pumped());

        clock.advance(Duration::from_millis(1));
        controller.tick();
        assert!(!controller.surface().is_pumped());
    }

    #[test]
    fn visuals_run_without_audio() {
        let clock = PlaybackClock::new();
        let mut controller = PartyController::with_seed(
            PartyConfig::default(),
            MemorySurface::new(),
            UnavailableBackend::new("no device"),
            clock.clone(),
            3,
        );
        controller.start();
        assert!(controller.is_active());
        assert!(!controller.has_audio());

        for _ in 0..100 {
            clock.advance(Duration::from_millis(10));
            controller.tick();
        }
        assert!(controller.surface().particle_count() > 0);
        // beats at 0, 0.43 and 0.86 s
        assert_eq!(controller.stats().beats, 3);
        assert_eq!(controller.stats().audio_failures, 1);
    }

    #[test]
    fn missing_layer_is_tolerated() {
        let clock = PlaybackClock::new();
        let mut controller = PartyController::with_seed(
            PartyConfig::default(),
            MemorySurface::without_layer(),
            UnavailableBackend::new("no device"),
            clock.clone(),
            3,
        );
        controller.start();
        for _ in 0..20 {
            clock.advance(Duration::from_millis(30));
            controller.tick();
        }
        assert_eq!(controller.surface().particle_count(), 0);
        assert_eq!(controller.pending_removals(), 0);
        assert!(controller.stats().particles_spawned > 0);
        controller.stop();
    }
}
