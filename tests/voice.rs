//! Voice component integration tests
//!
//! Tests wake detection without requiring audio hardware

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use beacon_satellite::Result;
use beacon_satellite::audio::{Cue, SAMPLE_RATE, to_bytes};
use beacon_satellite::voice::{
    CaptureSource, DetectorState, DetectorTrigger, EnergyDetector, WakeDetector, WakeTrigger,
};

mod common;

use common::{MockSink, SinkCall};

/// Samples per 20 ms frame
const FRAME: usize = 320;

/// Samples in `ms` milliseconds
const fn samples_for(ms: usize) -> usize {
    SAMPLE_RATE as usize * ms / 1000
}

/// Generate sine wave audio samples
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn generate_sine_samples(frequency: f32, duration_ms: usize, amplitude: f32) -> Vec<i16> {
    (0..samples_for(duration_ms))
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (amplitude * 32767.0 * (2.0 * std::f32::consts::PI * frequency * t).sin()) as i16
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_ms: usize) -> Vec<i16> {
    vec![0; samples_for(duration_ms)]
}

/// Feed whole frames, returning the index of the frame that fired
fn first_detection(detector: &mut EnergyDetector, audio: &[i16]) -> Option<usize> {
    audio
        .chunks_exact(FRAME)
        .position(|frame| detector.detect(frame))
}

/// Capture source replaying a fixed stereo script, then silence
struct ScriptedSource {
    script: Mutex<VecDeque<u8>>,
}

impl ScriptedSource {
    /// Left channel carries `mono`, right channel is noise-free silence
    fn stereo(mono: &[i16]) -> Arc<Self> {
        let interleaved: Vec<i16> = mono.iter().flat_map(|s| [*s, 0]).collect();
        Arc::new(Self {
            script: Mutex::new(to_bytes(&interleaved).into()),
        })
    }
}

impl CaptureSource for ScriptedSource {
    fn read(&self, buf: &mut [u8]) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        for byte in buf.iter_mut() {
            *byte = script.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn channel_count(&self) -> usize {
        2
    }
}

#[test]
fn test_detector_starts_idle() {
    let detector = EnergyDetector::new(FRAME);
    assert_eq!(detector.state(), DetectorState::Idle);
    assert_eq!(detector.frame_samples(), FRAME);
}

#[test]
fn test_silence_never_fires() {
    let mut detector = EnergyDetector::new(FRAME);
    assert_eq!(first_detection(&mut detector, &generate_silence(3000)), None);
    assert_eq!(detector.state(), DetectorState::Idle);
}

#[test]
fn test_utterance_fires_after_trailing_silence() {
    let mut detector = EnergyDetector::new(FRAME);
    let mut audio = generate_silence(200);
    audio.extend(generate_sine_samples(440.0, 600, 0.5));
    audio.extend(generate_silence(1000));

    let fired = first_detection(&mut detector, &audio).expect("utterance should fire");

    // Speech ends at frame 40; the 26th silent frame crosses 0.5 s of silence
    assert_eq!(fired, 65);
    assert_eq!(detector.state(), DetectorState::Idle);
}

#[test]
fn test_quiet_tone_is_not_speech() {
    let mut detector = EnergyDetector::new(FRAME);
    let mut audio = generate_sine_samples(440.0, 1000, 0.01);
    audio.extend(generate_silence(1000));

    assert_eq!(first_detection(&mut detector, &audio), None);
}

#[test]
fn test_trigger_listens_to_first_channel() {
    let mut audio = generate_sine_samples(300.0, 500, 0.5);
    audio.extend(generate_silence(600));
    let source = ScriptedSource::stereo(&audio);
    let mut trigger = DetectorTrigger::new(source, EnergyDetector::new(FRAME));

    let polls = audio.len() / FRAME + 10;
    let fired = (0..polls).filter(|_| trigger.poll().unwrap()).count();
    assert_eq!(fired, 1);
}

#[test]
fn test_trigger_reset_discards_partial_speech() {
    let audio = generate_sine_samples(300.0, 500, 0.5);
    let source = ScriptedSource::stereo(&audio);
    let mut trigger = DetectorTrigger::new(source, EnergyDetector::new(FRAME));

    for _ in 0..audio.len() / FRAME {
        assert!(!trigger.poll().unwrap());
    }
    trigger.reset();

    // Only silence follows; without the earlier speech nothing fires
    assert!((0..60).all(|_| !trigger.poll().unwrap()));
}

#[test]
fn test_cue_plays_through_sink() {
    let sink = MockSink::new();
    let cue = Cue::default_tone(SAMPLE_RATE);

    cue.play(sink.as_ref()).unwrap();

    // 150 ms of 16 kHz PCM16
    assert_eq!(sink.calls(), vec![SinkCall::Write(cue.pcm().to_vec())]);
    assert_eq!(cue.pcm().len(), 4800);
}
