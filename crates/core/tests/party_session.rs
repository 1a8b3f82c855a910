use std::time::Duration;

use party_mode_core::{
    check_kicks, MemorySurface, OfflineBackend, PartyConfig, PartyController, PlaybackClock,
    PresentationMode, TimelineLength, VoiceKind,
};

type OfflineController =
    PartyController<MemorySurface, OfflineBackend<PlaybackClock>, PlaybackClock>;

fn offline(config: PartyConfig) -> (OfflineController, PlaybackClock) {
    let clock = PlaybackClock::new();
    let backend = OfflineBackend::new(clock.clone(), 8_000).with_seed(11);
    let controller =
        PartyController::with_seed(config, MemorySurface::new(), backend, clock.clone(), 11);
    (controller, clock)
}

#[test]
fn full_session_renders_the_whole_track() {
    let (mut controller, clock) = offline(PartyConfig::default());
    controller.start();
    assert_eq!(controller.stats().voices_scheduled, 32 + 32 + 32 + 16 + 3 + 16);

    while controller.is_active() || controller.has_pending_timers() {
        clock.advance(Duration::from_millis(10));
        controller.tick();
    }

    let surface = controller.surface();
    assert_eq!(surface.particle_count(), 0);
    assert_eq!(surface.fixtures().len(), 4);
    assert!(!surface.is_mode_enabled(PresentationMode::Party));
    assert!(!surface.is_pumped());
    // one particle every 30 ms up to 7.98 s
    assert_eq!(controller.stats().particles_spawned, 266);
    assert_eq!(surface.stats().appended, 266);

    let mix = controller
        .backend()
        .last_mix()
        .expect("session opened an output")
        .snapshot()
        .unwrap();
    assert_eq!(mix.voices, controller.stats().voices_scheduled);
    // The track runs past the session; the last hi-hat starts at 31.5 beats.
    let last_hat = 31.5 * 60.0 / 140.0;
    assert!(mix.duration_seconds() > last_hat as f32);

    let report = check_kicks(&mix, controller.timeline(), 32.0).unwrap();
    assert_eq!(report.expected, 32);
    assert!(report.is_aligned(), "{report:?}");
    let tempo = report.tempo_bpm.expect("tempo from matched kicks");
    assert!((tempo - 140.0).abs() < 5.0);
}

#[test]
fn match_session_length_keeps_track_inside_session() {
    let mut config = PartyConfig::default();
    config.tempo.length = TimelineLength::MatchSession;
    let (controller, _clock) = offline(config);

    let timeline = controller.timeline();
    assert_eq!(timeline.count(VoiceKind::Kick), 18);
    assert!(timeline.span() <= controller.config().session.duration().as_secs_f64());
    assert!(timeline.sounds.iter().all(|s| s.offset <= timeline.span()));
}

#[test]
fn short_match_session_drops_late_accents() {
    let mut config = PartyConfig::default();
    config.session.duration_ms = 2_000;
    config.tempo.length = TimelineLength::MatchSession;
    let (controller, _clock) = offline(config);

    let timeline = controller.timeline();
    assert_eq!(timeline.beats, 4);
    assert_eq!(timeline.count(VoiceKind::AirHorn), 2);
    assert_eq!(timeline.count(VoiceKind::Lead), 9);
    assert!(timeline.sounds.iter().all(|s| s.offset <= timeline.span()));
}

#[test]
fn restart_mid_session_resets_beats_and_audio() {
    let (mut controller, clock) = offline(PartyConfig::default());
    controller.start();
    for _ in 0..100 {
        clock.advance(Duration::from_millis(10));
        controller.tick();
    }
    let beats_before = controller.stats().beats;
    assert_eq!(beats_before, 3);

    controller.start();
    assert_eq!(controller.backend().active(), 1);
    assert_eq!(controller.particle_loops(), 1);
    // beat zero of the new session
    assert_eq!(controller.stats().beats, beats_before + 1);
}
